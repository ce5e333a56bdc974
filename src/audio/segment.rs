use anyhow::{Context, Result};
use base64::Engine;
use bytes::Bytes;

/// One independently decodable unit of synthesized speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    /// Position in the session's reply, in the order records were routed
    pub sequence: u64,
    /// Encoded audio (MP3 from the backend, any symphonia-probeable format accepted)
    pub data: Bytes,
}

impl AudioSegment {
    pub fn new(sequence: u64, data: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            data: data.into(),
        }
    }

    /// Decode the base64 body of an `AUDIO::` record
    pub fn from_base64(sequence: u64, encoded: &str) -> Result<Self> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .context("Invalid base64 audio payload")?;

        if data.is_empty() {
            anyhow::bail!("Empty audio segment");
        }

        Ok(Self::new(sequence, data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
