//! Server-sent events decoding for OpenAI-compatible streaming responses.
//!
//! The response body is a sequence of `data: {json}` lines, each carrying a
//! `choices[0].delta.content` fragment, terminated by `data: [DONE]`.
//! Bytes are buffered until a full line is available so multi-byte UTF-8
//! sequences split across network chunks decode correctly.

use futures_util::{Stream, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;

use super::{CompletionError, TextStream};

/// One decoded SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// An incremental piece of assistant text.
    Delta(String),
    /// End-of-stream marker.
    Done,
}

/// Parses a raw SSE line (OpenAI-compatible format).
///
/// Returns `None` for keep-alives, comments, non-data fields, and chunks
/// without text (role announcements, empty deltas).
pub fn parse_sse_line(line: &str) -> Result<Option<SseEvent>, CompletionError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();

    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| CompletionError::Protocol(format!("invalid SSE payload: {e}")))?;

    if let Some(error) = json.get("error") {
        let message = error["message"].as_str().unwrap_or("unknown error");
        return Err(CompletionError::Protocol(format!(
            "endpoint reported an error mid-stream: {message}"
        )));
    }

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };

    if let Some(content) = first["delta"]["content"].as_str() {
        if !content.is_empty() {
            return Ok(Some(SseEvent::Delta(content.to_string())));
        }
    }

    if first["finish_reason"].as_str().is_some() {
        return Ok(Some(SseEvent::Done));
    }

    Ok(None)
}

struct SseState<S> {
    bytes: S,
    buf: Vec<u8>,
    pending: VecDeque<Result<String, CompletionError>>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Decodes every complete line in the buffer.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.decode(&line);
            if self.finished {
                self.buf.clear();
                return;
            }
        }
    }

    fn decode(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        match parse_sse_line(&line) {
            Ok(Some(SseEvent::Delta(text))) => self.pending.push_back(Ok(text)),
            Ok(Some(SseEvent::Done)) => self.finished = true,
            Ok(None) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// Turns a body byte stream into a lazy stream of text fragments.
///
/// The returned stream is single-pass. Each pull waits at most `idle` for
/// more bytes; a stall yields a [`CompletionError::Timeout`] and ends the
/// stream. Dropping the stream drops the underlying body, closing the
/// connection.
pub fn sse_text_stream<S, B, E>(bytes: S, idle: Duration) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<CompletionError> + Send + 'static,
{
    let state = SseState {
        bytes,
        buf: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures_util::stream::unfold(state, move |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }

            let next = if idle.is_zero() {
                st.bytes.next().await
            } else {
                match tokio::time::timeout(idle, st.bytes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        st.finished = true;
                        return Some((Err(CompletionError::Timeout(idle)), st));
                    }
                }
            };

            match next {
                Some(Ok(chunk)) => {
                    st.buf.extend_from_slice(chunk.as_ref());
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    // Body ended without [DONE]; decode a trailing unterminated line.
                    st.finished = true;
                    if !st.buf.is_empty() {
                        let rest = std::mem::take(&mut st.buf);
                        st.decode(&rest);
                    }
                }
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
        )
    }

    async fn collect(stream: TextStream) -> Vec<Result<String, CompletionError>> {
        stream.collect().await
    }

    #[test]
    fn parses_delta_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"Revenue"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            Some(SseEvent::Delta("Revenue".to_string()))
        );
    }

    #[test]
    fn parses_done_marker() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), Some(SseEvent::Done));
        assert_eq!(parse_sse_line("data:[DONE]\r").unwrap(), Some(SseEvent::Done));
    }

    #[test]
    fn skips_comments_and_role_chunks() {
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_sse_line("event: message").unwrap(), None);
        let role = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role).unwrap(), None);
    }

    #[test]
    fn finish_reason_ends_stream() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), Some(SseEvent::Done));
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        let err = parse_sse_line("data: {not json").unwrap_err();
        assert!(matches!(err, CompletionError::Protocol(_)));
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_chunks() {
        let body = format!("{}{}data: [DONE]\n\n", chunk("Gross "), chunk("margin"));
        let (a, b) = body.as_bytes().split_at(17);
        let parts: Vec<Result<Vec<u8>, CompletionError>> = vec![Ok(a.to_vec()), Ok(b.to_vec())];
        let stream = sse_text_stream(futures_util::stream::iter(parts), Duration::from_secs(5));

        let fragments: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(fragments, vec!["Gross ", "margin"]);
    }

    #[tokio::test]
    async fn multibyte_character_split_across_chunks() {
        let body = format!("{}data: [DONE]\n", chunk("¥20.1B"));
        let bytes = body.as_bytes();
        let split = body.find('¥').unwrap() + 1; // inside the two-byte sequence
        let parts: Vec<Result<Vec<u8>, CompletionError>> =
            vec![Ok(bytes[..split].to_vec()), Ok(bytes[split..].to_vec())];
        let stream = sse_text_stream(futures_util::stream::iter(parts), Duration::from_secs(5));

        let fragments = collect(stream).await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap(), "¥20.1B");
    }

    #[tokio::test]
    async fn ignores_bytes_after_done() {
        let body = format!("{}data: [DONE]\n{}", chunk("a"), chunk("b"));
        let parts: Vec<Result<Vec<u8>, CompletionError>> = vec![Ok(body.into_bytes())];
        let stream = sse_text_stream(futures_util::stream::iter(parts), Duration::ZERO);
        let fragments = collect(stream).await;
        assert_eq!(fragments.len(), 1);
    }

    #[tokio::test]
    async fn unterminated_body_still_yields_text() {
        let body = chunk("tail");
        let parts: Vec<Result<Vec<u8>, CompletionError>> =
            vec![Ok(body.trim_end().as_bytes().to_vec())];
        let stream = sse_text_stream(futures_util::stream::iter(parts), Duration::ZERO);
        let fragments = collect(stream).await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap(), "tail");
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let parts: Vec<Result<Vec<u8>, CompletionError>> = vec![
            Ok(chunk("partial").into_bytes()),
            Err(CompletionError::Protocol("connection reset".into())),
            Ok(chunk("never").into_bytes()),
        ];
        let stream = sse_text_stream(futures_util::stream::iter(parts), Duration::ZERO);
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
