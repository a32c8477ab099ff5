//! Declared parameter schemas.
//!
//! Validation collects every violation before failing and injects declared
//! defaults for absent optional parameters.

use crate::domain::error::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Named call parameters.
pub type Parameters = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub param_type: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: true,
            allowed_values: None,
            default: None,
            description: None,
        }
    }

    pub fn optional(param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(param_type)
        }
    }

    pub fn allowed(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.allowed_values = Some(values.into_iter().collect());
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Parameter schema of an API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    params: BTreeMap<String, ParamSpec>,
    /// Reject parameters the schema does not declare.
    strict: bool,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn params(&self) -> impl Iterator<Item = (&String, &ParamSpec)> {
        self.params.iter()
    }

    /// Check `parameters` and return them with defaults applied.
    pub fn validate(&self, api: &str, mut parameters: Parameters) -> Result<Parameters, ApiError> {
        let mut violations = Vec::new();

        for (name, spec) in &self.params {
            match parameters.get(name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &spec.default {
                        parameters.insert(name.clone(), default.clone());
                    } else if spec.required {
                        violations.push(format!("missing required parameter '{name}'"));
                    }
                }
                Some(value) => {
                    if !spec.param_type.accepts(value) {
                        violations.push(format!(
                            "parameter '{name}' expected {}, got {}",
                            spec.param_type,
                            json_kind(value)
                        ));
                    } else if let Some(allowed) = &spec.allowed_values {
                        if !allowed.contains(value) {
                            violations.push(format!(
                                "parameter '{name}' value {value} is not one of {}",
                                Value::Array(allowed.clone())
                            ));
                        }
                    }
                }
            }
        }

        if self.strict {
            for name in parameters.keys() {
                if !self.params.contains_key(name) {
                    violations.push(format!("unknown parameter '{name}'"));
                }
            }
        }

        if violations.is_empty() {
            Ok(parameters)
        } else {
            Err(ApiError::ParameterValidation {
                api: api.to_string(),
                violations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => Parameters::new(),
        }
    }

    fn lab_schema() -> ParameterSchema {
        ParameterSchema::new()
            .param("name", ParamSpec::required(ParamType::String))
            .param("count", ParamSpec::optional(ParamType::Integer).default_value(json!(1)))
            .param(
                "mode",
                ParamSpec::optional(ParamType::String).allowed([json!("fast"), json!("safe")]),
            )
    }

    #[test]
    fn test_valid_parameters_get_defaults() {
        let validated = lab_schema()
            .validate("Lab.Start", params(json!({"name": "lab1"})))
            .unwrap();
        assert_eq!(validated["count"], json!(1));
        assert!(!validated.contains_key("mode"));
    }

    #[test]
    fn test_reports_every_violation() {
        let err = lab_schema()
            .validate(
                "Lab.Start",
                params(json!({"count": "three", "mode": "reckless"})),
            )
            .unwrap_err();
        match err {
            ApiError::ParameterValidation { api, violations } => {
                assert_eq!(api, "Lab.Start");
                assert_eq!(violations.len(), 3);
                assert!(violations.iter().any(|v| v.contains("'name'")));
                assert!(violations.iter().any(|v| v.contains("expected Integer, got string")));
                assert!(violations.iter().any(|v| v.contains("reckless")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_strict_rejects_unknown() {
        let schema = lab_schema().strict();
        let err = schema
            .validate("Lab.Start", params(json!({"name": "x", "extra": true})))
            .unwrap_err();
        assert!(err.to_string().contains("unknown parameter 'extra'"));

        // Lenient schemas pass unknown parameters through.
        assert!(lab_schema()
            .validate("Lab.Start", params(json!({"name": "x", "extra": true})))
            .is_ok());
    }

    #[test]
    fn test_type_checks() {
        assert!(ParamType::Integer.accepts(&json!(3)));
        assert!(!ParamType::Integer.accepts(&json!(3.5)));
        assert!(ParamType::Number.accepts(&json!(3)));
        assert!(ParamType::Any.accepts(&Value::Null));
        assert!(ParamType::Object.accepts(&json!({})));
    }
}
