use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::ready;
use futures::stream::{BoxStream, FusedStream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::stream::JsonLines;
use crate::types::{
    ChatRequest, ChatResponse, EmbedRequest, EmbedResponse, GenerateRequest, GenerateResponse,
    ListResponse,
};

/// 响应体的字节块流
pub type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

/// 可能携带服务端 `error` 字段的响应记录
pub trait BackendRecord {
    fn take_error(&mut self) -> Option<String>;
}

impl BackendRecord for ChatResponse {
    fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }
}

impl BackendRecord for GenerateResponse {
    fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }
}

fn check_record<T: BackendRecord>(mut record: T) -> Result<T> {
    match record.take_error() {
        Some(err) => Err(Error::Backend(err)),
        None => Ok(record),
    }
}

/// 流式接口返回的记录流：带 `error` 字段的记录以 [`Error::Backend`] 交付
pub struct RecordStream<T> {
    lines: JsonLines<ByteStream, T>,
}

impl<T> RecordStream<T> {
    /// 提前结束并释放响应体
    pub fn close(&mut self) {
        self.lines.close();
    }

    pub fn is_closed(&self) -> bool {
        self.lines.is_closed()
    }
}

impl<T> Stream for RecordStream<T>
where
    T: BackendRecord + DeserializeOwned + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(Pin::new(&mut this.lines).poll_next(cx));
        Poll::Ready(item.map(|record| record.and_then(check_record)))
    }
}

impl<T> FusedStream for RecordStream<T>
where
    T: BackendRecord + DeserializeOwned + Unpin,
{
    fn is_terminated(&self) -> bool {
        self.lines.is_closed()
    }
}

/// Ollama HTTP 客户端。只持有不可变配置，可在并发调用间共享。
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    headers: HeaderMap,
}

impl OllamaClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_http_client(Client::new(), config)
    }

    pub fn with_http_client(client: Client, config: &ClientConfig) -> Result<Self> {
        Ok(OllamaClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers: build_headers(config)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub async fn chat(&self, mut request: ChatRequest) -> Result<ChatResponse> {
        request.stream = false;
        self.log_chat(&request);

        let response = self.post("/api/chat", &request).await?;
        check_record(read_json::<ChatResponse>(response).await?)
    }

    /// 流式对话：返回按行解码的响应记录
    pub async fn chat_stream(
        &self,
        mut request: ChatRequest,
    ) -> Result<RecordStream<ChatResponse>> {
        request.stream = true;
        self.log_chat(&request);

        let response = self.post("/api/chat", &request).await?;
        json_lines(response)
    }

    pub async fn generate(&self, mut request: GenerateRequest) -> Result<GenerateResponse> {
        request.stream = false;

        let response = self.post("/api/generate", &request).await?;
        check_record(read_json::<GenerateResponse>(response).await?)
    }

    pub async fn generate_stream(
        &self,
        mut request: GenerateRequest,
    ) -> Result<RecordStream<GenerateResponse>> {
        request.stream = true;

        let response = self.post("/api/generate", &request).await?;
        json_lines(response)
    }

    pub async fn embed(&self, request: &EmbedRequest) -> Result<EmbedResponse> {
        let response = self.post("/api/embed", request).await?;
        read_json(response).await
    }

    pub async fn list_models(&self) -> Result<ListResponse> {
        let url = self.url("/api/tags");
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await?;

        read_json(check_status(response).await?).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await?;

        check_status(response).await
    }

    fn log_chat(&self, request: &ChatRequest) {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            stream = request.stream,
            "发送对话请求"
        );
    }
}

fn build_headers(config: &ClientConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidHeader(name.clone()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidHeader(name.as_str().to_string()))?;
        headers.insert(name, value);
    }

    let api_key = config.api_key.as_deref().map(str::trim).unwrap_or_default();
    if !api_key.is_empty() {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| Error::InvalidHeader(AUTHORIZATION.as_str().to_string()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            debug!("读取错误响应体失败（{}）：{}", status, e);
            String::new()
        }
    };
    Err(Error::Api { status, body })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

fn json_lines<T>(response: Response) -> Result<RecordStream<T>> {
    if response.content_length() == Some(0) {
        return Err(Error::MissingBody);
    }
    Ok(RecordStream {
        lines: JsonLines::new(response.bytes_stream().boxed()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chunked_response, json_response, stub};
    use crate::types::{EmbedInput, Message, Role};
    use reqwest::StatusCode;

    fn client(base_url: &str, api_key: Option<&str>) -> OllamaClient {
        let config = ClientConfig {
            base_url: format!("{}/", base_url),
            api_key: api_key.map(str::to_string),
            ..Default::default()
        };
        OllamaClient::new(&config).unwrap()
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "llama3".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: "hi".to_string(),
                ..Default::default()
            }],
            stream: true,
            ..Default::default()
        }
    }

    #[test]
    fn headers_include_content_type_extras_and_bearer() {
        let mut config = ClientConfig {
            api_key: Some(" secret ".to_string()),
            ..Default::default()
        };
        config.headers.insert("X-Client".to_string(), "bridge".to_string());

        let headers = build_headers(&config).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers["x-client"], "bridge");
        assert_eq!(headers[AUTHORIZATION], "Bearer secret");
    }

    #[test]
    fn blank_api_key_sends_no_authorization() {
        let config = ClientConfig {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        let headers = build_headers(&config).unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn invalid_header_is_rejected() {
        let mut config = ClientConfig::default();
        config.headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(build_headers(&config), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = client("http://localhost:11434", None);
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.url("/api/chat"), "http://localhost:11434/api/chat");
    }

    #[tokio::test]
    async fn chat_posts_non_streaming_request() {
        let body = r#"{"model":"llama3","created_at":"2025-01-01T00:00:00Z","message":{"role":"assistant","content":"hello"},"done":true,"eval_count":4}"#;
        let (base_url, server) = stub(json_response("200 OK", body)).await;

        let response = client(&base_url, Some("secret")).chat(request()).await.unwrap();
        assert_eq!(response.message.unwrap().content, "hello");
        assert!(response.done);
        assert_eq!(response.eval_count, Some(4));

        let sent = server.await.unwrap();
        assert!(sent.starts_with("POST /api/chat HTTP/1.1"));
        let lower = sent.to_lowercase();
        assert!(lower.contains("authorization: bearer secret"));
        assert!(lower.contains("content-type: application/json"));
        assert!(sent.contains(r#""stream":false"#));
    }

    #[tokio::test]
    async fn error_status_carries_code_and_body() {
        let (base_url, server) = stub(json_response("404 Not Found", "model not found")).await;

        let err = client(&base_url, None).chat(request()).await.unwrap_err();
        match err {
            Error::Api { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "model not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn backend_error_field_is_surfaced() {
        let (base_url, server) = stub(json_response("200 OK", r#"{"error":"out of memory"}"#)).await;

        let err = client(&base_url, None).chat(request()).await.unwrap_err();
        assert!(matches!(err, Error::Backend(ref m) if m == "out of memory"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn chat_stream_decodes_split_records() {
        let chunks = [
            r#"{"model":"llama3","message":{"role":"assistant","content":"Hel"},"done":false}"#,
            "\n{\"model\":\"llama3\",\"message\":{\"role\":\"assis",
            "tant\",\"content\":\"lo\"},\"done\":false}\n",
            r#"{"model":"llama3","done":true,"prompt_eval_count":1,"eval_count":2}"#,
        ];
        let (base_url, server) = stub(chunked_response(&chunks)).await;

        let stream = client(&base_url, None).chat_stream(request()).await.unwrap();
        let records: Vec<ChatResponse> = stream.map(|r| r.unwrap()).collect().await;

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message.as_ref().unwrap().content, "Hel");
        assert_eq!(records[1].message.as_ref().unwrap().content, "lo");
        assert!(records[2].done);
        assert!(records[2].message.is_none());

        let sent = server.await.unwrap();
        assert!(sent.contains(r#""stream":true"#));
    }

    #[tokio::test]
    async fn empty_stream_body_is_an_error() {
        let response = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
        let (base_url, server) = stub(response).await;

        let result = client(&base_url, None).chat_stream(request()).await;
        assert!(matches!(result, Err(Error::MissingBody)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn generate_stream_yields_tokens() {
        let chunks = [
            "{\"model\":\"m\",\"response\":\"a\",\"done\":false}\n{\"model\":\"m\",\"resp",
            "onse\":\"b\",\"done\":true,\"context\":[1,2]}\n",
        ];
        let (base_url, server) = stub(chunked_response(&chunks)).await;

        let request = GenerateRequest {
            model: "m".to_string(),
            prompt: "say ab".to_string(),
            ..Default::default()
        };
        let stream = client(&base_url, None).generate_stream(request).await.unwrap();
        let records: Vec<GenerateResponse> = stream.map(|r| r.unwrap()).collect().await;

        let text: String = records.iter().map(|r| r.response.as_str()).collect();
        assert_eq!(text, "ab");
        assert_eq!(records[1].context, Some(vec![1, 2]));

        let sent = server.await.unwrap();
        assert!(sent.starts_with("POST /api/generate HTTP/1.1"));
    }

    #[tokio::test]
    async fn generate_stream_error_record_is_backend_error() {
        let chunks = [
            "{\"model\":\"m\",\"response\":\"a\",\"done\":false}\n",
            "{\"error\":\"model runner stopped\"}\n",
        ];
        let (base_url, server) = stub(chunked_response(&chunks)).await;

        let request = GenerateRequest {
            model: "m".to_string(),
            prompt: "hi".to_string(),
            ..Default::default()
        };
        let mut stream = client(&base_url, None).generate_stream(request).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().response, "a");
        match stream.next().await {
            Some(Err(Error::Backend(message))) => assert_eq!(message, "model runner stopped"),
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(stream.next().await.is_none());
        assert!(stream.is_closed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn chat_stream_error_record_is_backend_error() {
        let chunks = ["{\"error\":\"out of memory\"}\n"];
        let (base_url, server) = stub(chunked_response(&chunks)).await;

        let mut stream = client(&base_url, None).chat_stream(request()).await.unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Err(Error::Backend(ref m))) if m == "out of memory"
        ));
        stream.close();
        assert!(stream.is_terminated());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreadable_error_body_keeps_status() {
        // 声明的长度大于实际发送的内容，读取响应体会失败
        let response =
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 100\r\nConnection: close\r\n\r\nboom"
                .to_string();
        let (base_url, server) = stub(response).await;

        let err = client(&base_url, None).chat(request()).await.unwrap_err();
        match err {
            Error::Api { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn embed_posts_input() {
        let (base_url, server) =
            stub(json_response("200 OK", r#"{"model":"e","embeddings":[[0.5,0.25]]}"#)).await;

        let request = EmbedRequest {
            model: "e".to_string(),
            input: EmbedInput::Single("hello".to_string()),
            keep_alive: None,
        };
        let response = client(&base_url, None).embed(&request).await.unwrap();
        assert_eq!(response.embeddings, vec![vec![0.5, 0.25]]);

        let sent = server.await.unwrap();
        assert!(sent.starts_with("POST /api/embed HTTP/1.1"));
        assert!(sent.contains(r#""input":"hello""#));
    }

    #[tokio::test]
    async fn list_models_reads_tags() {
        let body = r#"{"models":[{"name":"llama3:latest","modified_at":"2024-05-01T10:00:00Z","size":4661224676,"digest":"abc","details":{"family":"llama","parameter_size":"8B"}}]}"#;
        let (base_url, server) = stub(json_response("200 OK", body)).await;

        let response = client(&base_url, Some("k")).list_models().await.unwrap();
        assert_eq!(response.models.len(), 1);
        assert_eq!(response.models[0].name, "llama3:latest");
        let details = response.models[0].details.as_ref().unwrap();
        assert_eq!(details.parameter_size.as_deref(), Some("8B"));

        let sent = server.await.unwrap();
        assert!(sent.starts_with("GET /api/tags HTTP/1.1"));
        assert!(sent.to_lowercase().contains("authorization: bearer k"));
    }
}
