pub mod content;
mod function;
mod ollama;

pub use function::{Arguments, FunctionCall, FunctionDefinition, Tool, ToolCall};
pub use ollama::{
    ChatRequest, ChatResponse, EmbedInput, EmbedRequest, EmbedResponse, Format, GenerateRequest,
    GenerateResponse, ListResponse, Message, ModelDetails, ModelInfo, Options, Role,
};
