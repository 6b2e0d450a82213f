//! 通用内容格式与 Ollama 格式之间的转换
mod args;
mod message;
mod request;
mod response;

pub use args::{from_wire_args, to_wire_args};
pub use message::{to_content, to_ollama_message};
pub use request::{build_chat_request, system_text, to_ollama_tools, to_options};
pub use response::to_generate_content_response;
