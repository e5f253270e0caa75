//! Output destinations for a running script's text stream.
//!
//! An [`OutputSink`] is whatever the presentation layer renders from. Sinks
//! are not expected to be thread-safe: the engine hands each one to a single
//! [`StreamBuffer`](crate::buffer::StreamBuffer), which serializes every write.

use std::sync::{Arc, Mutex};

/// Append-only text destination with a trimmable front.
///
/// Lengths are measured in characters.
pub trait OutputSink: Send {
    fn append(&mut self, text: &str);

    /// Number of characters currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the oldest `count` characters.
    fn discard_front(&mut self, count: usize);
}

/// A sink shared between the engine (writer) and the presentation layer.
pub type SharedSink = Arc<Mutex<dyn OutputSink>>;

/// In-memory trailing window of script output.
///
/// The bundled sink for viewers that render the whole retained text.
#[derive(Debug, Default, Clone)]
pub struct OutputWindow {
    text: String,
    chars: usize,
}

impl OutputWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh window for sharing with the engine.
    pub fn shared() -> Arc<Mutex<OutputWindow>> {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn snapshot(&self) -> String {
        self.text.clone()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.chars = 0;
    }
}

impl OutputSink for OutputWindow {
    fn append(&mut self, text: &str) {
        self.text.push_str(text);
        self.chars += text.chars().count();
    }

    fn len(&self) -> usize {
        self.chars
    }

    fn discard_front(&mut self, count: usize) {
        if count >= self.chars {
            self.clear();
            return;
        }
        let cut = self
            .text
            .char_indices()
            .nth(count)
            .map_or(self.text.len(), |(idx, _)| idx);
        self.text.drain(..cut);
        self.chars -= count;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
