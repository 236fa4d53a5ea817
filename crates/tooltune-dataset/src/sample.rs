//! Renders training conversations from examples and tool declarations.

use crate::dataset::TrainingSample;
use crate::encoder::{encode_call, encode_declaration, CALL_START, ESCAPE};
use crate::schema::{ParameterSchema, ToolSchema, TrainingExample};

pub const BOS: &str = "<bos>";
pub const START_OF_TURN: &str = "<start_of_turn>";
pub const END_OF_TURN: &str = "<end_of_turn>";

/// Markers a trained model's completion must contain.
pub const PROTOCOL_MARKERS: [&str; 2] = ["<start_function_call>call:", ESCAPE];

const PREAMBLE: &str = "You are a model that can do function calling with the following functions.\n\
Must use the EXACT format: <start_function_call>call:name{arg:<escape>val<escape>}<end_function_call>\n\
Example: <start_function_call>call:calculate{expression:<escape>5*12<escape>}<end_function_call>";

const SMOKE_QUERY: &str = "What is 5 * 12?";

/// Joins the declarations of every tool, one per line.
pub fn declarations_block(tools: &[ToolSchema]) -> String {
    tools.iter().map(encode_declaration).collect::<Vec<_>>().join("\n")
}

fn developer_turn(tools: &[ToolSchema]) -> String {
    format!("{PREAMBLE}\n{}", declarations_block(tools))
}

/// Renders one example as a full developer/user/model conversation.
///
/// Only the first expected call is used. Returns `None` when the example has no calls.
pub fn compose_sample(example: &TrainingExample, tools: &[ToolSchema]) -> Option<TrainingSample> {
    let call = example.expected_tool_calls.first()?;

    let text = format!(
        "{BOS}{START_OF_TURN}developer\n{developer}{END_OF_TURN}\n\
         {START_OF_TURN}user\n{query}{END_OF_TURN}\n\
         {START_OF_TURN}model\n{call}{END_OF_TURN}",
        developer = developer_turn(tools),
        query = example.user_query,
        call = encode_call(call),
    );

    Some(TrainingSample { text })
}

/// Prompt used to smoke-test a trained model: a single `calculate` declaration and a
/// user turn, left open at the start of the model turn.
pub fn smoke_prompt() -> String {
    let calculate = ToolSchema {
        name: "calculate".to_string(),
        description: "Math".to_string(),
        parameters: ParameterSchema::default(),
    };

    format!(
        "{BOS}{START_OF_TURN}developer\n{developer}{END_OF_TURN}\n\
         {START_OF_TURN}user\n{SMOKE_QUERY}{END_OF_TURN}\n\
         {START_OF_TURN}model\n",
        developer = developer_turn(std::slice::from_ref(&calculate)),
    )
}

/// True when `completion` carries every protocol marker.
pub fn has_protocol_markers(completion: &str) -> bool {
    PROTOCOL_MARKERS.iter().all(|m| completion.contains(m))
}

/// Index of the first function call in `text`, if any.
pub fn first_call_offset(text: &str) -> Option<usize> {
    text.find(CALL_START)
}
