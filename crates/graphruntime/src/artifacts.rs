//! Artifact store for `OutsValue` and `Plot` outputs.
//!
//! Each value is written as an envelope carrying its own hash; loading
//! recomputes the hash and rejects records that do not match. `OutsPath`
//! outputs live where the node wrote them and are only checked for presence.

use crate::layout::{write_json, StateLayout};
use graphcore::hashing::hash_value;
use graphcore::{CacheError, NodeId, Role, Value};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub node_id: NodeId,
    pub attribute: String,
    pub role: Role,
    pub hash: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: StateLayout,
}

impl ArtifactStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn save(&self, id: &NodeId, attribute: &str, role: &Role, value: &Value) -> io::Result<()> {
        let record = ArtifactRecord {
            node_id: id.clone(),
            attribute: attribute.to_string(),
            role: role.clone(),
            hash: hash_value(value)?,
            value: value.clone(),
        };
        write_json(&self.layout.artifact_file(id, attribute), &record)
    }

    /// Stored value, `None` if nothing was stored.
    pub fn load(&self, id: &NodeId, attribute: &str) -> Result<Option<Value>, CacheError> {
        let path = self.layout.artifact_file(id, attribute);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corruption(id, format!("cannot read {}: {}", path.display(), e))),
        };

        let record: ArtifactRecord = serde_json::from_slice(&bytes)
            .map_err(|e| corruption(id, format!("unreadable artifact '{}': {}", attribute, e)))?;
        if &record.node_id != id || record.attribute != attribute {
            return Err(corruption(
                id,
                format!("artifact file holds {}.{}", record.node_id, record.attribute),
            ));
        }
        let actual = hash_value(&record.value).map_err(|e| corruption(id, e.to_string()))?;
        if actual != record.hash {
            return Err(corruption(id, format!("hash mismatch for artifact '{}'", attribute)));
        }
        Ok(Some(record.value))
    }

    /// Drops every stored value of a node.
    pub fn remove_values(&self, id: &NodeId) -> io::Result<()> {
        match std::fs::remove_dir_all(self.layout.outs_dir(id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// An `OutsPath` counts as produced when it exists and is non-empty.
pub fn outs_path_present(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

/// A plot value is a table holding at least the `x` and `y` columns, with
/// equal lengths when both are arrays.
pub fn check_plot(value: &Value, x: &str, y: &str) -> Result<(), String> {
    let table = value
        .as_object()
        .ok_or_else(|| format!("expected a table, got {}", value.type_name()))?;
    let column = |name: &str| table.get(name).ok_or_else(|| format!("missing column '{}'", name));
    let (xs, ys) = (column(x)?, column(y)?);
    if let (Some(xs), Some(ys)) = (xs.as_array(), ys.as_array()) {
        if xs.len() != ys.len() {
            return Err(format!(
                "columns '{}' and '{}' have different lengths ({} vs {})",
                x,
                y,
                xs.len(),
                ys.len()
            ));
        }
    }
    Ok(())
}

fn corruption(id: &NodeId, detail: String) -> CacheError {
    CacheError::CacheCorruption {
        node_id: id.clone(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore, StateLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        (dir, ArtifactStore::new(layout.clone()), layout)
    }

    #[test]
    fn stored_value_loads_back_as_same_variant() {
        let (_dir, store, _) = store();
        let id = NodeId::from("Evaluate");
        store.save(&id, "score", &Role::OutsValue, &Value::Int(3)).unwrap();
        assert_eq!(store.load(&id, "score").unwrap(), Some(Value::Int(3)));
        assert_eq!(store.load(&id, "other").unwrap(), None);

        store.remove_values(&id).unwrap();
        assert_eq!(store.load(&id, "score").unwrap(), None);
    }

    #[test]
    fn tampered_value_is_detected() {
        let (_dir, store, layout) = store();
        let id = NodeId::from("Evaluate");
        store.save(&id, "score", &Role::OutsValue, &Value::Number(0.5)).unwrap();

        let file = layout.artifact_file(&id, "score");
        let mut record: serde_json::Value = serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();
        record["value"]["value"] = serde_json::json!(0.9);
        std::fs::write(&file, serde_json::to_vec(&record).unwrap()).unwrap();

        assert!(matches!(store.load(&id, "score"), Err(CacheError::CacheCorruption { .. })));
    }

    #[test]
    fn empty_outputs_are_not_present() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("model.pkl");
        assert!(!outs_path_present(&file));
        std::fs::write(&file, "").unwrap();
        assert!(!outs_path_present(&file));
        std::fs::write(&file, "weights").unwrap();
        assert!(outs_path_present(&file));

        let empty_dir = dir.path().join("features");
        std::fs::create_dir(&empty_dir).unwrap();
        assert!(!outs_path_present(&empty_dir));
    }

    #[test]
    fn plot_needs_both_columns() {
        let ok = Value::table([
            ("Step", vec![Value::Int(0), Value::Int(10)]),
            ("Temp", vec![Value::Number(300.0), Value::Number(301.5)]),
        ]);
        assert!(check_plot(&ok, "Step", "Temp").is_ok());
        assert!(check_plot(&ok, "Step", "Press").unwrap_err().contains("Press"));
        assert!(check_plot(&Value::Int(1), "Step", "Temp").is_err());

        let ragged = Value::table([("x", vec![Value::Int(0)]), ("y", vec![])]);
        assert!(check_plot(&ragged, "x", "y").is_err());
    }
}
