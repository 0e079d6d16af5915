use serde::{Deserialize, Serialize};

use super::ProgressRecord;

/// Body of a batch upload: `{ "items": [...] }`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressBatch {
    pub items: Vec<ProgressRecord>,
}

impl ProgressBatch {
    #[must_use]
    pub fn new(items: Vec<ProgressRecord>) -> Self {
        Self { items }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Serializes the batch to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if an extra field cannot be encoded.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Hands the records back, e.g. to requeue them after a failed send.
    #[must_use]
    pub fn into_items(self) -> Vec<ProgressRecord> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn wire_format_wraps_items() {
        let batch = ProgressBatch::new(vec![
            ProgressRecord::new("L1").with_elapsed(5.0).with_milestone(2),
        ]);
        let value: Value = serde_json::from_slice(&batch.to_json_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "items": [{
                    "subjectId": "L1",
                    "elapsedSeconds": 5.0,
                    "positionSeconds": 0.0,
                    "milestone": 2,
                    "completed": false
                }]
            })
        );
    }
}
