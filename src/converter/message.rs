use serde_json::{json, Value};

use crate::types::content::{self, Content, FunctionResponse, Part};
use crate::types::{FunctionCall, Message, Role, ToolCall};

use super::args::{from_wire_args, to_wire_args};

/// 通用 Content → Ollama 消息
pub fn to_ollama_message(content: &Content) -> Message {
    let role = ollama_role(content.role);

    let mut text = String::new();
    let mut images = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_name = None;
    let mut tool_call_id = None;

    for part in content.parts() {
        match part {
            Part::Text(t) => text.push_str(t),
            Part::InlineData(blob) => {
                if !blob.data.is_empty() {
                    images.push(blob.data.clone());
                }
            }
            Part::FunctionCall(call) => {
                if call.name.is_empty() {
                    continue;
                }
                tool_calls.push(ToolCall {
                    id: call.id.clone(),
                    tool_type: None,
                    function: FunctionCall {
                        name: call.name.clone(),
                        index: None,
                        arguments: to_wire_args(call.args.as_ref()),
                    },
                });
            }
            Part::FunctionResponse(response) => {
                tool_name = Some(response.name.clone());
                // 旧的调用方不带 id 时退回使用函数名关联
                tool_call_id = Some(
                    response
                        .id
                        .clone()
                        .unwrap_or_else(|| response.name.clone()),
                );
                text.push_str(&response_text(response.response.as_ref()));
            }
        }
    }

    let is_tool = role == Role::Tool;

    Message {
        role,
        content: text,
        images: (!images.is_empty()).then_some(images),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_name: tool_name.filter(|_| is_tool),
        tool_call_id: tool_call_id.filter(|_| is_tool),
    }
}

/// Ollama 消息 → 通用 Content
pub fn to_content(message: &Message) -> Content {
    let mut parts = Vec::new();

    match (&message.role, &message.tool_call_id) {
        (Role::Tool, Some(id)) => {
            parts.push(Part::FunctionResponse(FunctionResponse {
                id: Some(id.clone()),
                name: message
                    .tool_name
                    .clone()
                    .unwrap_or_else(|| "tool".to_string()),
                response: Some(json!({ "output": message.content })),
            }));
        }
        _ => {
            if !message.content.is_empty() {
                parts.push(Part::Text(message.content.clone()));
            }
        }
    }

    for call in message.tool_calls.iter().flatten() {
        parts.push(Part::FunctionCall(content::FunctionCall {
            id: call.id.clone(),
            name: call.function.name.clone(),
            args: Some(from_wire_args(&call.function.arguments)),
        }));
    }

    Content::new(content_role(message.role), parts)
}

fn ollama_role(role: Option<content::Role>) -> Role {
    match role {
        Some(content::Role::Model) => Role::Assistant,
        Some(content::Role::System) => Role::System,
        Some(content::Role::Function) => Role::Tool,
        Some(content::Role::User) | Some(content::Role::Unknown) | None => Role::User,
    }
}

fn content_role(role: Role) -> content::Role {
    match role {
        Role::Assistant => content::Role::Model,
        Role::Tool => content::Role::Function,
        Role::User => content::Role::User,
        Role::System => content::Role::System,
    }
}

/// 函数响应的文本内容：字符串原样，`{output: string}` 取 output，其余序列化
fn response_text(response: Option<&Value>) -> String {
    match response {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(value) => match value.get("output") {
            Some(Value::String(output)) => output.clone(),
            _ => value.to_string(),
        },
    }
}
