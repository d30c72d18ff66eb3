//! Typed access to tool call arguments.

use serde_json::Value;

use crate::error::LiveTxtError;

/// Wrapper around decoded tool call arguments providing typed extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Decode the embedded JSON string a model emits. Blank input means no arguments.
    pub fn from_json_str(raw: &str) -> Result<Self, LiveTxtError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::new(serde_json::json!({})));
        }
        serde_json::from_str(trimmed)
            .map(Self::new)
            .map_err(|e| LiveTxtError::InvalidArgument(format!("Failed to parse arguments: {e}")))
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn into_raw(self) -> Value {
        self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, LiveTxtError> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| LiveTxtError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, LiveTxtError> {
        self.value
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| LiveTxtError::InvalidArgument(format!("Missing integer argument: {key}")))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, LiveTxtError> {
        self.value
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| LiveTxtError::InvalidArgument(format!("Missing float argument: {key}")))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, LiveTxtError> {
        self.value
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| LiveTxtError::InvalidArgument(format!("Missing boolean argument: {key}")))
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, LiveTxtError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            LiveTxtError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn typed_getters_report_missing_keys() {
        let args = ToolArguments::new(json!({"city": "Oslo", "days": 3, "metric": true}));
        assert_eq!(args.get_str("city").unwrap(), "Oslo");
        assert_eq!(args.get_i64("days").unwrap(), 3);
        assert!(args.get_bool("metric").unwrap());
        assert_eq!(args.get_str_opt("country"), None);

        let err = args.get_str("country").unwrap_err();
        assert!(err.to_string().contains("country"));
    }

    #[test]
    fn blank_json_string_is_empty_object() {
        let args = ToolArguments::from_json_str("  ").unwrap();
        assert_eq!(args.raw(), &json!({}));
        assert!(ToolArguments::from_json_str("{oops").is_err());
    }

    #[test]
    fn deserializes_into_struct() {
        #[derive(Deserialize)]
        struct Query {
            city: String,
        }
        let args = ToolArguments::from_json_str(r#"{"city":"Lima"}"#).unwrap();
        let query: Query = args.deserialize().unwrap();
        assert_eq!(query.city, "Lima");
    }
}
