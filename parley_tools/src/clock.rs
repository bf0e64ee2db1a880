use chrono::{Local, Utc};
use serde_json::json;

use crate::{ToolDescriptor, schema_object};

/// `current_time`: reports the wall clock, local time unless `utc` is set.
#[must_use]
pub fn current_time_tool() -> ToolDescriptor {
    ToolDescriptor::blocking(
        "current_time",
        "Get the current date and time in RFC 3339 format.",
        schema_object(
            json!({
                "utc": {
                    "type": "boolean",
                    "description": "Return UTC instead of local time"
                }
            }),
            &[],
        ),
        |input| {
            let utc = input
                .get("utc")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            Ok(if utc {
                Utc::now().to_rfc3339()
            } else {
                Local::now().to_rfc3339()
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolHandler;

    #[test]
    fn returns_parseable_timestamp() {
        let ToolHandler::Blocking(handler) = current_time_tool().handler else {
            panic!("current_time should be a blocking tool");
        };
        let stamp = handler(json!({"utc": true})).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }
}
