//! Server-sent-events plumbing shared by every streaming adapter.
//!
//! Backends differ in what their `data:` payloads mean, not in how the
//! lines are framed. Each adapter supplies a [`ChunkDecoder`]; the reader
//! task here owns the byte stream, the line buffer and cancellation.

use conclave_core::error::ProviderError;
use conclave_core::provider::{EventStream, STREAM_BUFFER, StreamEvent};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Incremental `\n`-delimited line splitter over a byte stream.
///
/// Bytes are buffered undecoded so a multi-byte character split across
/// network chunks is reassembled before decoding.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes and drain every complete `data:` payload.
    ///
    /// Blank lines, comments (`:`) and `event:` lines are skipped; the
    /// payload JSON carries its own type.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

/// Turns one backend's `data:` payloads into normalized events.
pub(crate) trait ChunkDecoder: Send + 'static {
    /// Decode one payload. Unparseable payloads yield no events.
    fn decode(&mut self, data: &str) -> Result<Vec<StreamEvent>, ProviderError>;

    /// Whether the terminal event has been produced.
    fn is_done(&self) -> bool;

    /// Called when the body ends. Backends without an explicit end marker
    /// finish here; otherwise an early end is an interruption.
    fn finish(&mut self) -> Result<Vec<StreamEvent>, ProviderError>;
}

/// Spawn the reader task for a successful streaming response.
///
/// The task stops reading, dropping the connection, as soon as the
/// receiver is dropped.
pub(crate) fn spawn_reader<D: ChunkDecoder>(
    provider: &str,
    response: reqwest::Response,
    mut decoder: D,
) -> EventStream {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let provider = provider.to_string();

    tokio::spawn(async move {
        let mut byte_stream = response.bytes_stream();
        let mut lines = LineBuffer::default();

        loop {
            let chunk = tokio::select! {
                _ = tx.closed() => {
                    debug!(provider = %provider, "Stream receiver dropped, aborting read");
                    return;
                }
                chunk = byte_stream.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(b)) => b,
                Some(Err(e)) => {
                    let _ = tx
                        .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                        .await;
                    return;
                }
                None => break,
            };

            for data in lines.push(&bytes) {
                match decoder.decode(&data) {
                    Ok(events) => {
                        for event in events {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
                if decoder.is_done() {
                    return;
                }
            }
        }

        trace!(provider = %provider, "Stream body ended");
        match decoder.finish() {
            Ok(events) => {
                for event in events {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
            }
        }
    });

    rx
}

/// Drive a decoder over a complete SSE body without a network.
#[cfg(test)]
pub(crate) fn decode_body<D: ChunkDecoder>(
    mut decoder: D,
    body: &str,
) -> Vec<Result<StreamEvent, ProviderError>> {
    let mut out = Vec::new();
    let mut lines = LineBuffer::default();
    for data in lines.push(body.as_bytes()) {
        match decoder.decode(&data) {
            Ok(events) => out.extend(events.into_iter().map(Ok)),
            Err(e) => {
                out.push(Err(e));
                return out;
            }
        }
        if decoder.is_done() {
            return out;
        }
    }
    match decoder.finish() {
        Ok(events) => out.extend(events.into_iter().map(Ok)),
        Err(e) => out.push(Err(e)),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_only() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"data: {\"a\":").is_empty());
        let payloads = buf.push(b"1}\n\ndata: [DONE]\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn skips_comments_and_event_lines() {
        let mut buf = LineBuffer::default();
        let payloads = buf.push(b": keep-alive\r\nevent: ping\r\ndata: {}\r\n");
        assert_eq!(payloads, vec!["{}".to_string()]);
    }

    #[test]
    fn reassembles_multibyte_split_across_chunks() {
        let bytes = "data: héllo\n".as_bytes();
        let split = 8; // inside the two-byte 'é'
        let mut buf = LineBuffer::default();
        assert!(buf.push(&bytes[..split]).is_empty());
        let payloads = buf.push(&bytes[split..]);
        assert_eq!(payloads, vec!["héllo".to_string()]);
    }
}
