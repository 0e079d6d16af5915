use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressRecordError {
    #[error("progress record has no subject id")]
    MissingSubjectId,
}

//
// ─── PROGRESS RECORD ──────────────────────────────────────────────────────────
//

/// Accumulated progress for one subject since the last successful flush.
///
/// Records are coalesced rather than queued: merging a newer update into an
/// older one keeps the furthest `elapsed_seconds` / `position_seconds`, never
/// clears `completed`, and takes the newest `milestone` when one is supplied.
/// Unknown fields travel through `extra` untouched.
///
/// Seconds are fractional. Negative or non-finite values are read as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub elapsed_seconds: f64,
    #[serde(default)]
    pub position_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u32>,
    #[serde(default)]
    pub completed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressRecord {
    /// Creates an empty record for the given subject.
    #[must_use]
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            elapsed_seconds: 0.0,
            position_seconds: 0.0,
            milestone: None,
            completed: false,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_elapsed(mut self, seconds: f64) -> Self {
        self.elapsed_seconds = clamp_seconds(seconds);
        self
    }

    #[must_use]
    pub fn with_position(mut self, seconds: f64) -> Self {
        self.position_seconds = clamp_seconds(seconds);
        self
    }

    #[must_use]
    pub fn with_milestone(mut self, milestone: u32) -> Self {
        self.milestone = Some(milestone);
        self
    }

    #[must_use]
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Checks that the record can be keyed in a buffer.
    ///
    /// # Errors
    ///
    /// Returns `ProgressRecordError::MissingSubjectId` if the id is empty or blank.
    pub fn validate(&self) -> Result<(), ProgressRecordError> {
        if self.subject_id.trim().is_empty() {
            return Err(ProgressRecordError::MissingSubjectId);
        }
        Ok(())
    }

    /// Replaces negative or non-finite seconds with zero.
    ///
    /// Deserialized records bypass the builders, so buffers call this before
    /// storing a record.
    pub fn normalize(&mut self) {
        self.elapsed_seconds = clamp_seconds(self.elapsed_seconds);
        self.position_seconds = clamp_seconds(self.position_seconds);
    }

    /// Folds `incoming` into `self`, treating `incoming` as the more recent update.
    ///
    /// The subject id of `self` is kept; callers are expected to merge only
    /// records for the same subject.
    pub fn merge_from(&mut self, incoming: ProgressRecord) {
        self.elapsed_seconds =
            clamp_seconds(self.elapsed_seconds).max(clamp_seconds(incoming.elapsed_seconds));
        self.position_seconds =
            clamp_seconds(self.position_seconds).max(clamp_seconds(incoming.position_seconds));
        // Milestones are not ordered; the latest one reported wins.
        if incoming.milestone.is_some() {
            self.milestone = incoming.milestone;
        }
        self.completed |= incoming.completed;
        self.extra.extend(incoming.extra);
    }
}

fn clamp_seconds(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}
