//! Emulated streaming: split a finished string into fixed-size `chunk`
//! events followed by one `done` event carrying the whole text.

use std::iter::FusedIterator;

use sidecar_protocol::SessionEvent;

/// Lazy, finite sequence of `chunk` events then exactly one `done`.
///
/// Chunk size counts characters (Unicode scalar values), never bytes, so a
/// chunk boundary can't split a multi-byte character.
#[derive(Debug)]
pub struct Chunks {
    text: String,
    size: usize,
    offset: usize,
    finished: bool,
}

impl Chunks {
    pub fn new(text: impl Into<String>, size: usize) -> Self {
        Self {
            text: text.into(),
            size: size.max(1),
            offset: 0,
            finished: false,
        }
    }
}

impl Iterator for Chunks {
    type Item = SessionEvent;

    fn next(&mut self) -> Option<SessionEvent> {
        if self.finished {
            return None;
        }

        if self.offset < self.text.len() {
            let rest = &self.text[self.offset..];
            let end = rest
                .char_indices()
                .nth(self.size)
                .map_or(rest.len(), |(i, _)| i);
            let text = rest[..end].to_string();
            self.offset += end;
            return Some(SessionEvent::Chunk { text });
        }

        self.finished = true;
        Some(SessionEvent::Done {
            text: std::mem::take(&mut self.text),
        })
    }
}

impl FusedIterator for Chunks {}
