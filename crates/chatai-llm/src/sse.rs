//! Incremental decoder for the upstream `text/event-stream` body.
//!
//! Only `data: ` lines matter. Each carries either the `[DONE]` marker or a
//! JSON chunk shaped like `{"choices":[{"delta":{"content":"..."}}]}`.
//! Comment lines, blank lines and payloads that fail to parse are skipped.

use serde::Deserialize;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Delta(String),
    Done,
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Decoded text not yet terminated by a newline.
    text: String,
    /// Trailing bytes of a UTF-8 sequence cut by a network chunk boundary.
    partial: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `[DONE]` has been seen. Further input is ignored once it has.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk of body bytes and return the frames it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        if self.done {
            return Vec::new();
        }
        self.decode_utf8(bytes);

        let mut frames = Vec::new();
        while let Some(end) = self.text.find('\n') {
            let line: String = self.text.drain(..=end).collect();
            match parse_line(line.trim()) {
                Some(Frame::Done) => {
                    self.done = true;
                    self.text.clear();
                    frames.push(Frame::Done);
                    break;
                }
                Some(frame) => frames.push(frame),
                None => {}
            }
        }
        frames
    }

    fn decode_utf8(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);

        loop {
            match std::str::from_utf8(&self.partial) {
                Ok(s) => {
                    self.text.push_str(s);
                    self.partial.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.partial[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.partial.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.partial.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

fn parse_line(line: &str) -> Option<Frame> {
    let data = line.strip_prefix(DATA_PREFIX)?;
    if data == DONE_MARKER {
        return Some(Frame::Done);
    }

    let chunk: Chunk = serde_json::from_str(data).ok()?;
    let content = chunk.choices.into_iter().next()?.delta.content?;
    if content.is_empty() {
        return None;
    }
    Some(Frame::Delta(content))
}
