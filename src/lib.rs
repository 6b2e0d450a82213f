pub mod cli;
pub mod client;
pub mod config;
pub mod converter;
pub mod error;
pub mod generator;
pub mod stream;
pub mod types;

#[cfg(test)]
mod testing;

pub use cli::run_cli;
pub use client::{BackendRecord, ByteStream, OllamaClient, RecordStream};
pub use config::{ClientConfig, Config, ModelConfig};
pub use error::{Error, Result};
pub use generator::OllamaContentGenerator;
pub use stream::{JsonLines, LineDecoder, MAX_LINE_BYTES};
