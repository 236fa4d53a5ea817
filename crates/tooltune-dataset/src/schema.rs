//! Input data model: tool schemas, calls and training examples.
//!
//! These mirror the JSON files users author by hand. Parameter and argument order is
//! significant for the rendered grammar, so every mapping here preserves the order in
//! which keys appear in the source document.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

/// The `parameters` object of a tool schema. Always rendered as an `OBJECT`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub required: Vec<String>,
}

/// One property of a tool's parameter object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

/// Property map in source-document order.
pub type Properties = IndexMap<String, PropertySchema>;

impl ToolSchema {
    /// Names listed in `required` that are not declared under `properties`.
    pub fn undeclared_required(&self) -> Vec<&str> {
        self.parameters
            .required
            .iter()
            .filter(|r| !self.parameters.properties.contains_key(r.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// A concrete invocation of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), arguments: Map::new() }
    }

    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

/// A user query paired with the calls the model is expected to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingExample {
    pub user_query: String,
    #[serde(default)]
    pub expected_tool_calls: Vec<ToolCall>,
}
