use crate::types::content::{
    Candidate, FinishReason, GenerateContentResponse, Part, UsageMetadata,
};
use crate::types::{ChatResponse, Message};

use super::message::to_content;

/// Ollama 响应（或流中的一条记录）→ 通用响应，恰好一个候选
pub fn to_generate_content_response(response: &ChatResponse) -> GenerateContentResponse {
    // 流的最后一条记录可能只有统计信息
    let content = match &response.message {
        Some(message) => to_content(message),
        None => to_content(&Message::default()),
    };

    let text = content.text();
    let function_calls: Vec<_> = content
        .parts()
        .iter()
        .filter_map(Part::as_function_call)
        .cloned()
        .collect();

    GenerateContentResponse {
        text,
        candidates: vec![Candidate {
            content,
            finish_reason: response.done.then_some(FinishReason::Stop),
            index: 0,
        }],
        usage_metadata: UsageMetadata {
            prompt_token_count: response.prompt_eval_count,
            candidates_token_count: response.eval_count,
            total_token_count: response
                .prompt_eval_count
                .unwrap_or(0)
                .saturating_add(response.eval_count.unwrap_or(0)),
        },
        function_calls: (!function_calls.is_empty()).then_some(function_calls),
    }
}
