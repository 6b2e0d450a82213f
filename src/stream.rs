//! 按行分隔的 JSON（NDJSON）流解码。
//!
//! 响应体以任意大小的字节块到达，一条记录可能跨越多个块。每行可以带
//! `data:` 前缀；解析失败的行直接丢弃，不会中断整个流。

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream};
use futures::ready;
use serde::de::DeserializeOwned;

use crate::error::Error;

/// 行首可选的帧前缀
pub const FRAME_PREFIX: &str = "data:";

/// 未结束行的最大缓冲字节数
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// 单缓冲区的行解码器：保留最后一个不完整的片段，其余行解析为记录
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    limit: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        LineDecoder::with_limit(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        LineDecoder::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        LineDecoder {
            buffer: Vec::new(),
            limit,
        }
    }

    /// 追加一个字节块，返回其中所有完整行解析出的记录。
    ///
    /// 未结束的行超过上限时清空缓冲并返回 [`Error::LineTooLong`]。
    pub fn feed<T: DeserializeOwned>(&mut self, chunk: &[u8]) -> Result<Vec<T>, Error> {
        // 缓冲中已有的部分不含 `\n`，只需扫描新到的字节；
        // `\n` 不会出现在多字节 UTF-8 序列内部，按字节切分是安全的
        let Some(last_newline) = chunk.iter().rposition(|&b| b == b'\n') else {
            if self.buffer.len() + chunk.len() > self.limit {
                return Err(self.overflow());
            }
            self.buffer.extend_from_slice(chunk);
            return Ok(Vec::new());
        };

        let (complete, rest) = chunk.split_at(last_newline + 1);
        if rest.len() > self.limit {
            return Err(self.overflow());
        }

        let mut lines = std::mem::replace(&mut self.buffer, rest.to_vec());
        lines.extend_from_slice(complete);

        Ok(lines
            .split(|&b| b == b'\n')
            .filter_map(parse_record)
            .collect())
    }

    /// 流结束时处理剩余的缓冲内容
    pub fn finish<T: DeserializeOwned>(&mut self) -> Option<T> {
        let rest = std::mem::take(&mut self.buffer);
        parse_record(&rest)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn overflow(&mut self) -> Error {
        self.buffer = Vec::new();
        Error::LineTooLong { limit: self.limit }
    }
}

fn parse_record<T: DeserializeOwned>(line: &[u8]) -> Option<T> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    let payload = line
        .strip_prefix(FRAME_PREFIX)
        .map(str::trim_start)
        .unwrap_or(line);

    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str(payload) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::debug!("丢弃无法解析的流记录：{} ({})", payload, e);
            None
        }
    }
}

/// 把字节块流转换为按需拉取的记录流。
///
/// 只有在已解码的记录全部交给调用方之后才会读取下一个字节块。
/// 响应体在正常结束、出错、`close()` 或被丢弃时释放。
pub struct JsonLines<S, T> {
    body: Option<Pin<Box<S>>>,
    decoder: LineDecoder,
    pending: VecDeque<T>,
    _record: PhantomData<fn() -> T>,
}

impl<S, T> JsonLines<S, T> {
    pub fn new(body: S) -> Self {
        JsonLines::with_decoder(body, LineDecoder::new())
    }

    pub fn with_decoder(body: S, decoder: LineDecoder) -> Self {
        JsonLines {
            body: Some(Box::pin(body)),
            decoder,
            pending: VecDeque::new(),
            _record: PhantomData,
        }
    }

    /// 提前结束：释放响应体并丢弃尚未交付的记录
    pub fn close(&mut self) {
        self.body = None;
        self.decoder = LineDecoder::with_limit(self.decoder.limit);
        self.pending.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.body.is_none() && self.pending.is_empty()
    }
}

impl<S, B, E, T> Stream for JsonLines<S, T>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<Error>,
    T: DeserializeOwned + Unpin,
{
    type Item = Result<T, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(record) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(record)));
            }

            let Some(body) = this.body.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(body.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => match this.decoder.feed(chunk.as_ref()) {
                    Ok(records) => this.pending.extend(records),
                    Err(e) => {
                        this.close();
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Some(Err(e)) => {
                    this.close();
                    return Poll::Ready(Some(Err(e.into())));
                }
                None => {
                    this.body = None;
                    return Poll::Ready(this.decoder.finish().map(Ok));
                }
            }
        }
    }
}

impl<S, B, E, T> FusedStream for JsonLines<S, T>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<Error>,
    T: DeserializeOwned + Unpin,
{
    fn is_terminated(&self) -> bool {
        self.is_closed()
    }
}
