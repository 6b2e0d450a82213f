use serde_json::{Map, Value};

use crate::types::content::{
    self, GenerateContentConfig, GenerateContentParameters, Part, SystemInstruction,
};
use crate::types::{ChatRequest, Format, FunctionDefinition, Message, Options, Role, Tool};

use super::message::to_ollama_message;

const JSON_MIME_TYPE: &str = "application/json";

/// 通用生成请求 → Ollama `/api/chat` 请求（`stream` 由客户端按调用设置）
pub fn build_chat_request(params: &GenerateContentParameters) -> ChatRequest {
    let config = params.config.as_ref();
    let mut messages = Vec::with_capacity(params.contents.len() + 1);

    if let Some(instruction) = config.and_then(|c| c.system_instruction.as_ref()) {
        let system = system_text(instruction);
        if !system.is_empty() {
            messages.push(Message {
                role: Role::System,
                content: system,
                ..Default::default()
            });
        }
    }

    messages.extend(
        params
            .contents
            .iter()
            .filter(|content| content.parts.is_some())
            .map(to_ollama_message),
    );

    ChatRequest {
        model: params.model.clone(),
        messages,
        stream: false,
        format: config.and_then(response_format),
        options: config.map(to_options),
        tools: config.and_then(|c| to_ollama_tools(c.tools.as_deref())),
        keep_alive: None,
    }
}

/// 系统指令归一化为单个字符串
pub fn system_text(instruction: &SystemInstruction) -> String {
    match instruction {
        SystemInstruction::Text(text) => text.clone(),
        SystemInstruction::Content(content) => to_ollama_message(content).content,
        SystemInstruction::Parts(parts) => parts.iter().filter_map(Part::as_text).collect(),
        SystemInstruction::Part(part) => part.as_text().unwrap_or_default().to_string(),
    }
}

pub fn to_options(config: &GenerateContentConfig) -> Options {
    Options {
        temperature: config.temperature,
        top_p: config.top_p,
        top_k: config.top_k,
        num_predict: config.max_output_tokens,
        stop: config.stop_sequences.clone(),
    }
}

/// 只转换带 functionDeclarations 的工具；结果为空时返回 None
pub fn to_ollama_tools(tools: Option<&[content::Tool]>) -> Option<Vec<Tool>> {
    let converted: Vec<Tool> = tools?
        .iter()
        .filter_map(|tool| tool.function_declarations.as_ref())
        .flatten()
        .filter(|declaration| !declaration.name.is_empty())
        .map(|declaration| {
            Tool::function(FunctionDefinition {
                name: declaration.name.clone(),
                description: declaration.description.clone().unwrap_or_default(),
                parameters: declaration
                    .parameters
                    .clone()
                    .or_else(|| declaration.parameters_json_schema.clone())
                    .unwrap_or_else(|| Value::Object(Map::new())),
            })
        })
        .collect();

    (!converted.is_empty()).then_some(converted)
}

fn response_format(config: &GenerateContentConfig) -> Option<Format> {
    if config.response_mime_type.as_deref() != Some(JSON_MIME_TYPE) {
        return None;
    }
    Some(match &config.response_json_schema {
        Some(schema) => Format::Schema(schema.clone()),
        None => Format::Json,
    })
}
