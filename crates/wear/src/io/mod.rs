pub mod csv;
pub mod geojson;

use std::path::Path;

use serde::Serialize;

use crate::error::Result;

/// Pretty JSON for any report type.
pub fn to_json_string<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn save_json<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    std::fs::write(path, to_json_string(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchSummary, UnmeasuredCell};

    #[test]
    fn summary_round_trips_through_file() {
        let summary = BatchSummary {
            total_jobs: 3,
            measured: 2,
            unmeasured: vec![UnmeasuredCell {
                image_id: "W2".to_string(),
                tooth_index: 1,
                reason: "worn image: Image is empty".to_string(),
            }],
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("summary.json");
        save_json(&summary, &path).expect("saved");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["unmeasured"][0]["image_id"], "W2");
        assert_eq!(value["measured"], 2);
    }
}
