use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::database::DatabaseManager;

/// Merge `data` (when it is an object) into a `{success, message}` envelope
pub fn success_envelope(message: &str, data: Option<Value>) -> Value {
    let mut response = Map::new();
    response.insert("success".into(), json!(true));
    response.insert("message".into(), json!(message));
    match data {
        Some(Value::Object(fields)) => response.extend(fields),
        Some(other) => {
            response.insert("data".into(), other);
        }
        None => {}
    }
    Value::Object(response)
}

/// Output a success message in the appropriate format
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&success_envelope(message, data))?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Print a serializable report; text mode prints it as indented JSON under the message
pub fn output_report<T: Serialize>(output_format: &OutputFormat, message: &str, report: &T) -> anyhow::Result<()> {
    let value = serde_json::to_value(report)?;
    match output_format {
        OutputFormat::Json => output_success(output_format, message, Some(json!({ "data": value }))),
        OutputFormat::Text => {
            println!("✓ {}", message);
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
    }
}

/// Lazy pools for the configured databases; the first query surfaces connection errors
pub fn connect(config: &AppConfig) -> anyhow::Result<DatabaseManager> {
    Ok(DatabaseManager::connect_lazy(&config.database)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_data_is_flattened_into_the_envelope() {
        let envelope = success_envelope("Seeded", Some(json!({ "rules": 42 })));
        assert_eq!(envelope, json!({ "success": true, "message": "Seeded", "rules": 42 }));
    }

    #[test]
    fn scalar_data_lands_under_data() {
        let envelope = success_envelope("Counted", Some(json!(3)));
        assert_eq!(envelope["data"], 3);
        assert_eq!(envelope["success"], true);
    }

    #[test]
    fn no_data_leaves_only_the_message() {
        let envelope = success_envelope("Done", None);
        assert_eq!(envelope.as_object().map(|o| o.len()), Some(2));
    }
}
