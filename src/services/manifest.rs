use crate::services::transfer::{RemoteSession, TransferError};
use crate::utils::validation::file_stem;
use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to write manifest {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Failed to encode manifest: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransferError),
}

/// One dataset registration: `{ key: { "file_name": file_name } }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub key: String,
    pub file_name: String,
}

impl ManifestEntry {
    pub fn new(key: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            file_name: file_name.into(),
        }
    }

    /// Keyed by the client's base name, pointing at the timestamped remote file.
    pub fn for_upload(original_name: &str, remote_file_name: &str) -> Self {
        Self::new(file_stem(original_name), remote_file_name)
    }
}

#[derive(Debug, Clone)]
pub struct ManifestUpdate {
    pub manifest_path: String,
    pub entry: ManifestEntry,
}

/// Merges `entry` into `existing` manifest bytes.
///
/// Missing, unparsable or non-object content is treated as an empty manifest.
/// Other top-level keys keep their values and order.
pub fn merge_entry(existing: Option<&[u8]>, entry: &ManifestEntry) -> Map<String, Value> {
    let mut manifest = match existing.map(serde_json::from_slice::<Value>) {
        Some(Ok(Value::Object(map))) => map,
        Some(Ok(_)) => {
            tracing::warn!("Manifest is not a JSON object, starting from an empty one");
            Map::new()
        }
        Some(Err(e)) => {
            tracing::warn!("Manifest is not valid JSON ({}), starting from an empty one", e);
            Map::new()
        }
        None => Map::new(),
    };

    manifest.insert(entry.key.clone(), json!({ "file_name": entry.file_name }));
    manifest
}

/// Read-modify-write of the manifest at `path` over an open session.
pub async fn merge_remote(
    session: &dyn RemoteSession,
    path: &str,
    entry: &ManifestEntry,
) -> Result<(), ManifestError> {
    let existing = session.read_file(path).await.map_err(|e| match e {
        TransferError::Timeout { .. } | TransferError::Cancelled(_) => ManifestError::Transport(e),
        other => ManifestError::Read {
            path: path.to_string(),
            reason: other.to_string(),
        },
    })?;

    if existing.is_none() {
        tracing::debug!("Manifest {} does not exist yet, creating it", path);
    }

    let merged = merge_entry(existing.as_deref(), entry);
    let encoded = serde_json::to_string_pretty(&Value::Object(merged))?;

    session
        .write_file(path, encoded.as_bytes())
        .await
        .map_err(|e| ManifestError::Write {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_remote::InMemoryRemote;
    use crate::services::transfer::{RemoteConnector, TransferTarget};
    use std::path::PathBuf;

    fn entry() -> ManifestEntry {
        ManifestEntry::new("data", "20250101_120000_data.json")
    }

    fn parse(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_for_upload_uses_stem_as_key() {
        let entry = ManifestEntry::for_upload("data.json", "20250101_120000_data.json");
        assert_eq!(entry.key, "data");
        assert_eq!(entry.file_name, "20250101_120000_data.json");
    }

    #[test]
    fn test_merge_into_missing_manifest() {
        let merged = merge_entry(None, &entry());
        assert_eq!(
            Value::Object(merged),
            json!({ "data": { "file_name": "20250101_120000_data.json" } })
        );
    }

    #[test]
    fn test_merge_preserves_other_keys_in_order() {
        let existing = br#"{"alpaca": {"file_name": "alpaca.json", "formatting": "alpaca"}, "zeta": {"file_name": "z.json"}}"#;
        let merged = merge_entry(Some(existing), &entry());

        let keys: Vec<&str> = merged.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["alpaca", "zeta", "data"]);
        assert_eq!(merged["alpaca"]["formatting"], "alpaca");
    }

    #[test]
    fn test_merge_overwrites_existing_key() {
        let existing = br#"{"data": {"file_name": "old.json", "columns": {"prompt": "q"}}}"#;
        let merged = merge_entry(Some(existing), &entry());
        assert_eq!(
            merged["data"],
            json!({ "file_name": "20250101_120000_data.json" })
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let once = Value::Object(merge_entry(None, &entry()));
        let bytes = serde_json::to_vec(&once).unwrap();
        let twice = Value::Object(merge_entry(Some(&bytes), &entry()));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_treats_corrupt_manifest_as_empty() {
        let merged = merge_entry(Some(b"{not json"), &entry());
        assert_eq!(merged.len(), 1);

        let merged = merge_entry(Some(b"[1, 2, 3]"), &entry());
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn test_merge_remote_writes_pretty_json() {
        let remote = InMemoryRemote::new()
            .with_file("/data/dataset_info.json", br#"{"alpaca":{"file_name":"a.json"}}"#);
        let target = TransferTarget {
            remote_host: "h".to_string(),
            remote_port: 22,
            username: "u".to_string(),
            private_key_path: PathBuf::from("/k"),
        };
        let session = remote.connect(&target).await.unwrap();

        merge_remote(session.as_ref(), "/data/dataset_info.json", &entry())
            .await
            .unwrap();
        session.close().await;

        let written = remote.file("/data/dataset_info.json").unwrap();
        let text = String::from_utf8(written.clone()).unwrap();
        assert!(text.contains("\n  \"alpaca\": {"));
        assert_eq!(
            parse(&written),
            json!({
                "alpaca": { "file_name": "a.json" },
                "data": { "file_name": "20250101_120000_data.json" }
            })
        );
    }
}
