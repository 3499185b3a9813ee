use futures_util::{stream, StreamExt};
use reqwest::header::ACCEPT;

use crate::events::Envelope;

use super::reconnect::{Connect, EnvelopeStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Chunks may split lines and
/// multi-byte characters anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    frames.push(SseFrame {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
                self.event = None;
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_owned()),
                "data" => self.data.push(value.to_owned()),
                _ => {}
            }
        }
        frames
    }
}

/// Frames that aren't envelopes (`connected`, keep-alives) are dropped.
fn envelope(frame: SseFrame) -> Option<Envelope> {
    serde_json::from_str(&frame.data).ok()
}

pub struct SseConnector {
    http: reqwest::Client,
    url: String,
}

impl SseConnector {
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }
}

impl Connect for SseConnector {
    async fn connect(&self) -> anyhow::Result<EnvelopeStream> {
        let response = self.http
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        let mut decoder = SseDecoder::default();
        let events = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.push(&bytes).into_iter().filter_map(envelope).map(Ok).collect(),
                Err(e) => vec![Err(anyhow::Error::from(e))],
            })
            .flat_map(stream::iter);

        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn frames_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: message\nda").is_empty());
        let frames = decoder.push(b"ta: {\"type\":\"message\",\"data\":1}\n\n");
        assert_eq!(frames, vec![SseFrame {
            event: Some("message".to_owned()),
            data: r#"{"type":"message","data":1}"#.to_owned(),
        }]);
    }

    #[test]
    fn comments_and_crlf_are_handled() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b": keep-alive\r\n\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(frames, vec![SseFrame { event: None, data: "a\nb".to_owned() }]);
    }

    #[test]
    fn multibyte_characters_survive_a_split() {
        let bytes = "data: 🐕\n\n".as_bytes();
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&bytes[..8]).is_empty());
        assert_eq!(decoder.push(&bytes[8..])[0].data, "🐕");
    }

    #[test]
    fn only_envelopes_pass() {
        assert_eq!(envelope(SseFrame { event: Some("connected".to_owned()), data: "ok".to_owned() }), None);
        let env = envelope(SseFrame {
            event: Some("chat.rejected".to_owned()),
            data: r#"{"type":"chat.rejected","data":{}}"#.to_owned(),
        }).unwrap();
        assert_eq!(env.kind, EventKind::ChatRejected);
    }
}
