pub mod redact;
pub mod timing;
