use serde_json::Value;

const MASK: &str = "***";

/// Replace the values of sensitive keys with `***`, at any depth.
/// Keys are compared case-insensitively against `fields`.
pub fn redact(value: &mut Value, fields: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if fields.iter().any(|f| f.eq_ignore_ascii_case(key)) {
                    *val = Value::String(MASK.into());
                } else {
                    redact(val, fields);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                redact(item, fields);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> Vec<String> {
        vec!["password".into(), "token".into(), "secret".into()]
    }

    #[test]
    fn masks_top_level_and_nested_fields() {
        let mut body = json!({
            "email": "a@example.com",
            "Password": "hunter2",
            "profile": { "token": "abc", "name": "Ada" },
            "keys": [ { "secret": 42 }, "plain" ]
        });
        redact(&mut body, &fields());

        assert_eq!(
            body,
            json!({
                "email": "a@example.com",
                "Password": "***",
                "profile": { "token": "***", "name": "Ada" },
                "keys": [ { "secret": "***" }, "plain" ]
            })
        );
    }

    #[test]
    fn scalars_are_untouched() {
        let mut body = json!("password");
        redact(&mut body, &fields());
        assert_eq!(body, json!("password"));
    }
}
