//! Tools the agent can invoke by name.
//!
//! A tool describes itself with a [`ToolSchema`] (rendered into prompts) and
//! is called with a keyword-argument [`Payload`]. [`Tool::call`] validates
//! the arguments against the declared parameters, fills in defaults, and
//! only then runs [`Tool::execute`].

use agentir_store::Payload;
use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Schema types
// ---------------------------------------------------------------------------

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

fn default_required() -> bool {
    true
}

impl ToolParameter {
    /// A required parameter.
    pub fn new(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type,
            required: true,
            default: None,
            enum_values: None,
        }
    }

    /// Make the parameter optional with a fallback value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.required = false;
        self.default = Some(default);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_enum<I: IntoIterator<Item = Value>>(mut self, values: I) -> Self {
        self.enum_values = Some(values.into_iter().collect());
        self
    }

    /// Must the caller supply it? A default makes it optional.
    pub fn is_mandatory(&self) -> bool {
        self.required && self.default.is_none()
    }

    fn property_schema(&self) -> Value {
        let mut property = json!({
            "type": self.param_type.as_str(),
            "description": self.description,
        });
        if let Some(default) = &self.default {
            property["default"] = default.clone();
        }
        if let Some(values) = &self.enum_values {
            property["enum"] = Value::Array(values.clone());
        }
        property
    }
}

/// Draft-7 object schema for a parameter list. Undeclared keys are rejected.
pub fn parameters_schema(params: &[ToolParameter]) -> Value {
    let properties: Map<String, Value> = params
        .iter()
        .map(|p| (p.name.clone(), p.property_schema()))
        .collect();
    let required: Vec<&str> = params
        .iter()
        .filter(|p| p.is_mandatory())
        .map(|p| p.name.as_str())
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Self-description of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolSchema {
    /// `{name, description, parameters}` where `parameters` is the Draft-7
    /// argument schema.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": parameters_schema(&self.parameters),
        })
    }

    /// Pretty-printed [`ToolSchema::to_value`] for inclusion in prompts.
    pub fn to_json_schema(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_value())?)
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default)]
    pub result: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Payload,
}

impl ToolOutput {
    pub fn ok(result: Payload) -> Self {
        Self {
            success: true,
            result,
            error: None,
            metadata: Payload::new(),
        }
    }

    /// Wrap a raw return value as `{"result": value}`.
    pub fn from_value(value: Value) -> Self {
        let mut result = Payload::new();
        result.insert("result".into(), value);
        Self::ok(result)
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Payload::new(),
            error: Some(error.into()),
            metadata: Payload::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ToolParameter>;

    /// Run with already validated arguments.
    async fn execute(&self, args: Payload) -> Result<ToolOutput>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters(),
        }
    }

    /// Check `args` against the declared parameters.
    fn validate(&self, args: &Payload) -> std::result::Result<(), String> {
        validate_args(&self.parameters(), args)
    }

    /// Validate, fill defaults, execute.
    async fn call(&self, mut args: Payload) -> Result<ToolOutput> {
        if let Err(reason) = self.validate(&args) {
            warn!(tool = %self.name(), %reason, "tool arguments rejected");
            return Ok(ToolOutput::failure(reason));
        }
        for param in self.parameters() {
            if let Some(default) = param.default {
                args.entry(param.name).or_insert(default);
            }
        }
        debug!(tool = %self.name(), "executing tool");
        self.execute(args).await
    }
}

/// Validate `args` against [`parameters_schema`]. All violations are
/// reported, joined by `", "`.
pub fn validate_args(params: &[ToolParameter], args: &Payload) -> std::result::Result<(), String> {
    let schema_value = parameters_schema(params);
    let schema = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema_value)
        .map_err(|e| format!("Invalid parameter schema: {e}"))?;

    let instance = Value::Object(args.clone());
    if let Err(errors) = schema.validate(&instance) {
        let messages: Vec<String> = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        return Err(format!("Invalid arguments: {}", messages.join(", ")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FnTool
// ---------------------------------------------------------------------------

type ToolFn = dyn Fn(&Payload) -> std::result::Result<Value, String> + Send + Sync;

/// A tool backed by a plain closure.
pub struct FnTool {
    name: String,
    description: String,
    parameters: Vec<ToolParameter>,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Payload) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            func: Box::new(func),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        self.parameters.clone()
    }

    async fn execute(&self, args: Payload) -> Result<ToolOutput> {
        match (self.func)(&args) {
            Ok(value) => Ok(ToolOutput::from_value(value)),
            Err(e) => Ok(ToolOutput::failure(format!("Error executing function: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> FnTool {
        FnTool::new("check_weather", "Weather for a city", |args| {
            let city = args.get("city").and_then(Value::as_str).unwrap_or_default();
            let unit = args.get("unit").and_then(Value::as_str).unwrap_or_default();
            if city == "Atlantis" {
                return Err("city not found".into());
            }
            Ok(json!(format!("sunny in {city} ({unit})")))
        })
        .with_parameter(ToolParameter::new("city", ParamType::String, "City name"))
        .with_parameter(
            ToolParameter::new("unit", ParamType::String, "Unit")
                .with_default(json!("celsius"))
                .with_enum([json!("celsius"), json!("fahrenheit")]),
        )
    }

    fn args(v: Value) -> Payload {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn call_fills_defaults() {
        let out = weather().call(args(json!({"city": "Oslo"}))).await.unwrap();
        assert!(out.success);
        assert_eq!(out.result["result"], "sunny in Oslo (celsius)");
    }

    #[tokio::test]
    async fn invalid_arguments_fail_without_executing() {
        let tool = weather();
        for (bad, needle) in [
            (json!({}), "\"city\" is a required property"),
            (json!({"city": 3}), "/city: 3 is not of type \"string\""),
            (json!({"city": "Oslo", "unit": "kelvin"}), "/unit: \"kelvin\" is not one of"),
            (json!({"city": "Oslo", "when": "now"}), "'when' was unexpected"),
        ] {
            let out = tool.call(args(bad)).await.unwrap();
            assert!(!out.success);
            let error = out.error.unwrap();
            assert!(error.contains(needle), "{error}");
        }
    }

    #[tokio::test]
    async fn closure_errors_become_failed_output() {
        let out = weather().call(args(json!({"city": "Atlantis"}))).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("Error executing function: city not found"));
    }

    #[test]
    fn schema_renders_as_draft7_object() {
        let schema = weather().schema();
        assert_eq!(schema.name, "check_weather");
        let text = schema.to_json_schema().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        let params = &v["parameters"];
        assert_eq!(params["type"], "object");
        assert_eq!(params["additionalProperties"], false);
        assert_eq!(params["required"], json!(["city"]));
        assert_eq!(params["properties"]["city"]["type"], "string");
        assert!(params["properties"]["city"].get("enum").is_none());
        assert_eq!(params["properties"]["unit"]["default"], "celsius");
        assert_eq!(params["properties"]["unit"]["enum"][1], "fahrenheit");
    }

    #[test]
    fn every_violation_is_reported() {
        let params = weather().parameters();
        let err = validate_args(&params, &args(json!({"unit": "kelvin", "when": 1}))).unwrap_err();
        assert!(err.starts_with("Invalid arguments: "), "{err}");
        assert!(err.contains("\"city\" is a required property"), "{err}");
        assert!(err.contains("\"kelvin\" is not one of"), "{err}");
        assert!(err.contains("'when' was unexpected"), "{err}");
    }

    #[test]
    fn integer_and_number_types() {
        let params = vec![
            ToolParameter::new("n", ParamType::Integer, "count"),
            ToolParameter::new("x", ParamType::Number, "ratio").optional(),
        ];
        assert!(validate_args(&params, &args(json!({"n": 2, "x": 2}))).is_ok());
        assert!(validate_args(&params, &args(json!({"n": 2.5}))).is_err());
        assert!(validate_args(&params, &args(json!({"n": 1, "x": 0.5}))).is_ok());
    }
}
