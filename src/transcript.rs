//! Transcript aggregation for the tutoring session
//!
//! Transcript text arrives as incremental per-speaker deltas and is only
//! committed to the transcript when the service signals a turn boundary.
//! Manual typed messages bypass the buffers and append immediately so the
//! user sees their own words before any server acknowledgment.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::live::Channel;

/// Who said a committed transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl From<Channel> for Role {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Input => Role::User,
            Channel::Output => Role::Assistant,
        }
    }
}

/// One finalized transcript line. Immutable once appended.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    fn new(role: Role, text: String) -> Self {
        Self {
            role,
            text,
            timestamp: Utc::now(),
        }
    }

    /// Immediate entry for manually typed user text.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text.into())
    }
}

/// Pending per-speaker text for the turn in progress.
///
/// Both buffers are empty immediately after a turn boundary is processed.
#[derive(Debug, Default)]
pub struct TurnBuffers {
    input: String,
    output: String,
}

impl TurnBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an incremental fragment to the matching speaker buffer.
    pub fn push_fragment(&mut self, speaker: Channel, delta: &str) {
        if delta.is_empty() {
            return;
        }
        match speaker {
            Channel::Input => self.input.push_str(delta),
            Channel::Output => self.output.push_str(delta),
        }
    }

    /// Commit the turn in progress.
    ///
    /// Trims both buffers and emits one entry per non-empty buffer, user
    /// first (chronological speaking order), then clears both. An empty turn
    /// yields nothing.
    pub fn complete_turn(&mut self) -> Vec<TranscriptEntry> {
        let mut entries = Vec::with_capacity(2);

        let input = self.input.trim();
        if !input.is_empty() {
            entries.push(TranscriptEntry::new(Role::User, input.to_string()));
        }

        let output = self.output.trim();
        if !output.is_empty() {
            entries.push(TranscriptEntry::new(Role::Assistant, output.to_string()));
        }

        self.input.clear();
        self.output.clear();

        if !entries.is_empty() {
            log::debug!("Turn committed: {} entries", entries.len());
        }
        entries
    }

    /// Discard any pending fragments without committing.
    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }
}
