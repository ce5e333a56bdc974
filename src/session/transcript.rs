use std::sync::{Arc, Mutex};

use crate::sync::lock;

/// Append-only reply text
///
/// Tokens are concatenated in call order with no normalization. Clones
/// share the same text.
#[derive(Debug, Clone, Default)]
pub struct TranscriptSink {
    text: Arc<Mutex<String>>,
}

impl TranscriptSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, token: &str) {
        if token.is_empty() {
            return;
        }
        lock(&self.text).push_str(token);
    }

    /// Full accumulated text
    pub fn text(&self) -> String {
        lock(&self.text).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.text).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.text).is_empty()
    }
}
