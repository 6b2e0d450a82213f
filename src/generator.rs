//! 以通用内容格式驱动 Ollama 的生成器

use futures::stream::{BoxStream, StreamExt};

use crate::client::OllamaClient;
use crate::config::ClientConfig;
use crate::converter::{build_chat_request, to_generate_content_response};
use crate::error::Result;
use crate::types::content::{
    ContentEmbedding, EmbedContent, EmbedContentParameters, EmbedContentResponse,
    GenerateContentParameters, GenerateContentResponse,
};
use crate::types::{ChatRequest, EmbedInput, EmbedRequest};

pub struct OllamaContentGenerator {
    client: OllamaClient,
    keep_alive: Option<String>,
}

impl OllamaContentGenerator {
    pub fn new(client: OllamaClient) -> Self {
        OllamaContentGenerator {
            client,
            keep_alive: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(OllamaClient::new(config)?).with_keep_alive(config.keep_alive.clone()))
    }

    pub fn with_keep_alive(mut self, keep_alive: Option<String>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    pub async fn generate_content(
        &self,
        params: &GenerateContentParameters,
    ) -> Result<GenerateContentResponse> {
        let response = self.client.chat(self.chat_request(params)).await?;
        Ok(to_generate_content_response(&response))
    }

    /// 每条流记录转换为一个通用响应；带 `error` 字段的记录作为错误交付
    pub async fn generate_content_stream(
        &self,
        params: &GenerateContentParameters,
    ) -> Result<BoxStream<'static, Result<GenerateContentResponse>>> {
        let records = self.client.chat_stream(self.chat_request(params)).await?;

        Ok(records
            .map(|record| record.map(|record| to_generate_content_response(&record)))
            .boxed())
    }

    /// 单条文本以字符串发送，多条以列表发送
    pub async fn embed_content(
        &self,
        params: &EmbedContentParameters,
    ) -> Result<EmbedContentResponse> {
        let mut texts: Vec<String> = params
            .contents
            .iter()
            .filter_map(|content| match content {
                EmbedContent::Content(c) if c.parts.is_none() => None,
                other => Some(other.text()),
            })
            .collect();

        let input = if texts.len() == 1 {
            EmbedInput::Single(texts.remove(0))
        } else {
            EmbedInput::Batch(texts)
        };

        let request = EmbedRequest {
            model: params.model.clone(),
            input,
            keep_alive: self.keep_alive.clone(),
        };
        let response = self.client.embed(&request).await?;

        Ok(EmbedContentResponse {
            embeddings: response
                .embeddings
                .into_iter()
                .map(|values| ContentEmbedding { values })
                .collect(),
        })
    }

    fn chat_request(&self, params: &GenerateContentParameters) -> ChatRequest {
        let mut request = build_chat_request(params);
        request.keep_alive = self.keep_alive.clone();
        request
    }
}
