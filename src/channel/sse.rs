//! Server-Sent Events framing for the subscriber side.
//!
//! Only the parts of `text/event-stream` that progress streams use are
//! handled: `data:` lines (joined with `\n`), comments, and blank-line
//! dispatch. Other fields (`event:`, `id:`, `retry:`) are skipped.

use std::collections::VecDeque;
use std::string::FromUtf8Error;

use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

/// Failure while reading an event stream.
#[derive(Debug, Error)]
pub enum SseError<E> {
    #[error("transport error: {0}")]
    Transport(E),

    #[error("event stream is not valid UTF-8: {0}")]
    InvalidUtf8(#[source] FromUtf8Error),
}

/// Incremental decoder turning byte chunks into event payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: Vec<String>,
    // Last chunk ended on `\r`; a leading `\n` in the next one belongs to it.
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the payloads of every event it completed.
    ///
    /// Chunks may split lines (and UTF-8 sequences) anywhere. Lines end on
    /// `\r\n`, `\n` or a bare `\r`. A line that is not valid UTF-8 yields an
    /// error and discards the event it belonged to.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<String, FromUtf8Error>> {
        let mut events = Vec::new();
        for &byte in chunk {
            match byte {
                b'\n' if self.after_cr => self.after_cr = false,
                b'\r' | b'\n' => {
                    self.after_cr = byte == b'\r';
                    if let Some(event) = self.end_line() {
                        events.push(event);
                    }
                }
                _ => {
                    self.after_cr = false;
                    self.line.push(byte);
                }
            }
        }
        events
    }

    fn end_line(&mut self) -> Option<Result<String, FromUtf8Error>> {
        match String::from_utf8(std::mem::take(&mut self.line)) {
            Ok(line) => self.process_line(&line).map(Ok),
            Err(e) => {
                self.data.clear();
                Some(Err(e))
            }
        }
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.data).join("\n"));
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}

/// Adapt a byte stream into a stream of event payloads.
pub fn events<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, SseError<E>>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    futures::stream::unfold(
        (bytes, SseDecoder::new(), VecDeque::<Result<String, FromUtf8Error>>::new()),
        |(mut bytes, mut decoder, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    let event = event.map_err(SseError::InvalidUtf8);
                    return Some((event, (bytes, decoder, pending)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.feed(chunk.as_ref())),
                    Some(Err(e)) => {
                        return Some((Err(SseError::Transport(e)), (bytes, decoder, pending)))
                    }
                    None => return None,
                }
            }
        },
    )
}

/// Open an SSE subscription at `url` with the given correlation `query`.
pub async fn subscribe(
    client: &Client,
    url: &str,
    query: &[(&str, &str)],
) -> Result<impl Stream<Item = Result<String, SseError<reqwest::Error>>>, reqwest::Error> {
    info!(%url, ?query, "Subscribing to progress stream");
    let response = client
        .get(url)
        .query(query)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?
        .error_for_status()?;
    Ok(events(Box::pin(response.bytes_stream())))
}
