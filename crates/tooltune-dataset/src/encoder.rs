//! Encoder for the function-calling grammar the model is trained to emit.
//!
//! Declarations:
//!
//! ```text
//! <start_function_declaration>declaration:NAME{description:<escape>..<escape>,parameters:{..},required:[..],type:<escape>OBJECT<escape>}<end_function_declaration>
//! ```
//!
//! Calls:
//!
//! ```text
//! <start_function_call>call:NAME{key:<escape>value<escape>,..}<end_function_call>
//! ```
//!
//! Free text is wrapped in `<escape>` delimiters exactly once. The delimiter is not
//! escaped when it occurs inside a value; the inference-side parser reads the current
//! form, so values containing `<escape>` produce ambiguous output.

use crate::schema::{PropertySchema, ToolCall, ToolSchema};
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;
use std::fmt::Write as _;
use std::io;

pub const ESCAPE: &str = "<escape>";
pub const DECLARATION_START: &str = "<start_function_declaration>";
pub const DECLARATION_END: &str = "<end_function_declaration>";
pub const CALL_START: &str = "<start_function_call>";
pub const CALL_END: &str = "<end_function_call>";

const DEFAULT_PROPERTY_TYPE: &str = "STRING";

/// Wraps a free-text value in escape delimiters.
pub fn escape(value: &str) -> String {
    format!("{ESCAPE}{value}{ESCAPE}")
}

/// Renders a tool schema as a declaration.
pub fn encode_declaration(tool: &ToolSchema) -> String {
    let params = tool
        .parameters
        .properties
        .iter()
        .map(|(key, prop)| encode_property(key, prop))
        .collect::<Vec<_>>()
        .join(",");

    let required = tool.parameters.required.iter().map(|r| escape(r)).collect::<Vec<_>>().join(",");

    format!(
        "{DECLARATION_START}declaration:{name}{{description:{desc},parameters:{{{params}}},required:[{required}],type:{object}}}{DECLARATION_END}",
        name = tool.name,
        desc = escape(&tool.description),
        object = escape("OBJECT"),
    )
}

fn encode_property(key: &str, prop: &PropertySchema) -> String {
    let ty = prop.property_type.as_deref().unwrap_or(DEFAULT_PROPERTY_TYPE).to_uppercase();
    let desc = prop.description.as_deref().unwrap_or("");

    let mut out = format!("{key}:{{description:{},type:{}", escape(desc), escape(&ty));
    if let Some(values) = &prop.enum_values {
        let members = values.iter().map(|v| escape(&value_text(v))).collect::<Vec<_>>().join(",");
        let _ = write!(out, ",enum:[{members}]");
    }
    out.push('}');
    out
}

/// Renders a function call.
pub fn encode_call(call: &ToolCall) -> String {
    let args = call
        .arguments
        .iter()
        .map(|(k, v)| format!("{k}:{}", escape(&value_text(v))))
        .collect::<Vec<_>>()
        .join(",");

    format!("{CALL_START}call:{name}{{{args}}}{CALL_END}", name = call.name)
}

/// Textual form of an argument value before escaping.
///
/// Strings are used verbatim and numbers keep their JSON text. Booleans and null are
/// spelled `True`/`False`/`None`, matching the existing training corpora. Mappings and
/// sequences are rendered as spaced JSON (see [`json_text`]).
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        Value::Array(_) | Value::Object(_) => json_text(value),
    }
}

/// JSON with `", "` / `": "` separators and ASCII-only output, e.g. `{"key": "value"}`.
///
/// This is the spelling existing training corpora use for structured arguments, so it
/// must stay byte-stable.
pub fn json_text(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    if value.serialize(&mut ser).is_err() {
        // Serializing a Value into a Vec cannot fail.
        return value.to_string();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParameterSchema, Properties};
    use serde_json::json;

    fn prop(ty: &str, desc: &str) -> PropertySchema {
        PropertySchema {
            property_type: Some(ty.to_string()),
            description: Some(desc.to_string()),
            enum_values: None,
        }
    }

    fn calculate_tool() -> ToolSchema {
        ToolSchema {
            name: "calculate".to_string(),
            description: "Evaluate a mathematical expression".to_string(),
            parameters: ParameterSchema {
                properties: Properties::from([("expression".to_string(), prop("string", "Math expression"))]),
                required: vec!["expression".to_string()],
            },
        }
    }

    #[test]
    fn test_declaration_exact_form() {
        assert_eq!(
            encode_declaration(&calculate_tool()),
            "<start_function_declaration>declaration:calculate{description:<escape>Evaluate a mathematical expression<escape>,\
             parameters:{expression:{description:<escape>Math expression<escape>,type:<escape>STRING<escape>}},\
             required:[<escape>expression<escape>],type:<escape>OBJECT<escape>}<end_function_declaration>"
        );
    }

    #[test]
    fn test_declaration_framing() {
        let out = encode_declaration(&calculate_tool());
        assert!(out.starts_with("<start_function_declaration>declaration:"));
        assert!(out.ends_with("}<end_function_declaration>"));
    }

    #[test]
    fn test_declaration_multiple_params_keep_order() {
        let tool = ToolSchema {
            name: "search".to_string(),
            description: "Search the web".to_string(),
            parameters: ParameterSchema {
                properties: Properties::from([
                    ("query".to_string(), prop("string", "Search query")),
                    ("limit".to_string(), prop("integer", "Max results")),
                ]),
                required: vec!["query".to_string()],
            },
        };
        let out = encode_declaration(&tool);
        let q = out.find("query:{description:<escape>Search query<escape>").unwrap();
        let l = out.find("limit:{description:<escape>Max results<escape>,type:<escape>INTEGER<escape>}").unwrap();
        assert!(q < l);
        assert!(out.contains("required:[<escape>query<escape>]"));
    }

    #[test]
    fn test_declaration_enum_members() {
        let mut unit = prop("string", "Temperature unit");
        unit.enum_values = Some(vec![json!("celsius"), json!("fahrenheit")]);
        let tool = ToolSchema {
            name: "set_unit".to_string(),
            description: "Set temperature unit".to_string(),
            parameters: ParameterSchema {
                properties: Properties::from([("unit".to_string(), unit)]),
                required: vec!["unit".to_string()],
            },
        };
        let out = encode_declaration(&tool);
        assert!(out.contains("type:<escape>STRING<escape>,enum:[<escape>celsius<escape>,<escape>fahrenheit<escape>]}"));
    }

    #[test]
    fn test_declaration_without_parameters() {
        let tool: ToolSchema =
            serde_json::from_value(json!({"name": "get_time", "description": "Get current time", "parameters": {}}))
                .unwrap();
        let out = encode_declaration(&tool);
        assert!(out.contains("declaration:get_time{"));
        assert!(out.contains("parameters:{}"));
        assert!(out.contains("required:[]"));
    }

    #[test]
    fn test_missing_type_defaults_to_string() {
        let tool: ToolSchema = serde_json::from_value(json!({
            "name": "note",
            "description": "Save a note",
            "parameters": {"properties": {"body": {"description": "Text"}}}
        }))
        .unwrap();
        assert!(encode_declaration(&tool).contains("body:{description:<escape>Text<escape>,type:<escape>STRING<escape>}"));
    }

    #[test]
    fn test_call_basic() {
        let call = ToolCall::new("calculate").with_arg("expression", "5 * 12");
        assert_eq!(
            encode_call(&call),
            "<start_function_call>call:calculate{expression:<escape>5 * 12<escape>}<end_function_call>"
        );
    }

    #[test]
    fn test_call_multiple_args() {
        let call = ToolCall::new("search").with_arg("query", "weather").with_arg("limit", 5);
        let out = encode_call(&call);
        assert!(out.starts_with("<start_function_call>call:search{"));
        assert!(out.ends_with("}<end_function_call>"));
        assert!(out.contains("query:<escape>weather<escape>,limit:<escape>5<escape>"));
    }

    #[test]
    fn test_call_mapping_argument_uses_spaced_json() {
        let call = ToolCall::new("update").with_arg("data", json!({"key": "value"}));
        assert!(encode_call(&call).contains(r#"data:<escape>{"key": "value"}<escape>"#));
    }

    #[test]
    fn test_call_sequence_argument_uses_spaced_json() {
        let call = ToolCall::new("process").with_arg("items", json!([1, 2, 3]));
        assert!(encode_call(&call).contains("items:<escape>[1, 2, 3]<escape>"));
    }

    #[test]
    fn test_call_nested_composite_is_escaped_once() {
        let call = ToolCall::new("save").with_arg("doc", json!({"tags": ["a", "b"], "meta": {"n": 1}}));
        let out = encode_call(&call);
        assert!(out.contains(r#"doc:<escape>{"tags": ["a", "b"], "meta": {"n": 1}}<escape>"#));
        assert_eq!(out.matches(ESCAPE).count(), 2);
    }

    #[test]
    fn test_call_empty_arguments() {
        assert_eq!(
            encode_call(&ToolCall::new("get_time")),
            "<start_function_call>call:get_time{}<end_function_call>"
        );
    }

    #[test]
    fn test_scalar_spelling() {
        assert_eq!(value_text(&json!(true)), "True");
        assert_eq!(value_text(&json!(false)), "False");
        assert_eq!(value_text(&json!(null)), "None");
        assert_eq!(value_text(&json!(2.5)), "2.5");
        assert_eq!(value_text(&json!("plain")), "plain");
    }

    #[test]
    fn test_call_bool_and_null_arguments() {
        let call = ToolCall::new("t").with_arg("flag", true).with_arg("none", Value::Null);
        assert_eq!(
            encode_call(&call),
            "<start_function_call>call:t{flag:<escape>True<escape>,none:<escape>None<escape>}<end_function_call>"
        );
    }

    #[test]
    fn test_declaration_non_string_enum_members() {
        let mut level = prop("integer", "Verbosity");
        level.enum_values = Some(vec![json!(1), json!(2), json!(false)]);
        let tool = ToolSchema {
            name: "set_level".to_string(),
            description: "Set log verbosity".to_string(),
            parameters: ParameterSchema {
                properties: Properties::from([("level".to_string(), level)]),
                required: Vec::new(),
            },
        };
        assert!(
            encode_declaration(&tool)
                .contains("type:<escape>INTEGER<escape>,enum:[<escape>1<escape>,<escape>2<escape>,<escape>False<escape>]}")
        );
    }

    #[test]
    fn test_json_text_escapes_non_ascii() {
        assert_eq!(json_text(&json!({"city": "Zürich"})), r#"{"city": "Z\u00fcrich"}"#);
        assert_eq!(json_text(&json!(["😀"])), r#"["\ud83d\ude00"]"#);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let tool = calculate_tool();
        let call = ToolCall::new("calculate").with_arg("expression", "1+1").with_arg("opts", json!({"a": [1]}));
        assert_eq!(encode_declaration(&tool), encode_declaration(&tool.clone()));
        assert_eq!(encode_call(&call), encode_call(&call.clone()));
    }

    #[test]
    fn test_every_free_text_field_wrapped_once() {
        let out = encode_declaration(&calculate_tool());
        // description, param description, param type, required entry, OBJECT
        assert_eq!(out.matches(ESCAPE).count(), 10);
        assert!(!out.contains("<escape><escape>"));
    }
}
