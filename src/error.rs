use reqwest::StatusCode;
use thiserror::Error;

/// 传输层与 Ollama 接口错误
#[derive(Debug, Error)]
pub enum Error {
    #[error("Ollama API 错误 ({status})：{body}")]
    Api { status: StatusCode, body: String },

    #[error("请求 Ollama 失败：{0}")]
    Transport(#[from] reqwest::Error),

    #[error("流式响应没有响应体")]
    MissingBody,

    #[error("流式记录超过 {limit} 字节仍未结束")]
    LineTooLong { limit: usize },

    #[error("解析 Ollama 响应失败：{0}")]
    Decode(#[from] serde_json::Error),

    #[error("Ollama 错误：{0}")]
    Backend(String),

    #[error("无效的请求头：{0}")]
    InvalidHeader(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
