//! On-disk layout of a project.
//!
//! ```text
//! <root>/.graph/graph.json
//! <root>/.graph/nodes/<id>/fingerprint.json
//! <root>/.graph/nodes/<id>/params.json
//! <root>/.graph/nodes/<id>/outs/<attr>.json
//! <root>/nodes/<id>/                 node working directory
//! ```

use graphcore::NodeId;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

const STATE_DIR: &str = ".graph";
const NWD_DIR: &str = "nodes";

/// Placeholder for the node working directory in path templates.
pub const NWD_PLACEHOLDER: &str = "{nwd}";

#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn graph_file(&self) -> PathBuf {
        self.state_dir().join("graph.json")
    }

    pub fn node_state_dir(&self, id: &NodeId) -> PathBuf {
        self.state_dir().join("nodes").join(id.as_str())
    }

    pub fn fingerprint_file(&self, id: &NodeId) -> PathBuf {
        self.node_state_dir(id).join("fingerprint.json")
    }

    pub fn params_file(&self, id: &NodeId) -> PathBuf {
        self.node_state_dir(id).join("params.json")
    }

    pub fn outs_dir(&self, id: &NodeId) -> PathBuf {
        self.node_state_dir(id).join("outs")
    }

    pub fn artifact_file(&self, id: &NodeId, attribute: &str) -> PathBuf {
        self.outs_dir(id).join(format!("{}.json", attribute))
    }

    /// Working directory of a node.
    pub fn nwd(&self, id: &NodeId) -> PathBuf {
        self.root.join(NWD_DIR).join(id.as_str())
    }

    /// Expands `{nwd}` and anchors relative paths at the project root.
    pub fn resolve_template(&self, template: &str, id: &NodeId) -> PathBuf {
        let nwd = format!("{}/{}", NWD_DIR, id.as_str());
        let expanded = template.replace(NWD_PLACEHOLDER, &nwd);
        let path = Path::new(&expanded);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Deletes every persisted fingerprint, artifact and graph record.
    pub fn remove_state(&self) -> io::Result<()> {
        match std::fs::remove_dir_all(self.state_dir()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Writes pretty JSON through a temporary sibling file and a rename, so a
/// reader never observes a half-written record.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_expand_nwd_and_anchor_at_root() {
        let layout = StateLayout::new("/work");
        let id = NodeId::from("Lammps");
        assert_eq!(
            layout.resolve_template("{nwd}/input.lmp_data", &id),
            PathBuf::from("/work/nodes/Lammps/input.lmp_data")
        );
        assert_eq!(layout.resolve_template("model.pkl", &id), PathBuf::from("/work/model.pkl"));
        assert_eq!(layout.resolve_template("/abs/x", &id), PathBuf::from("/abs/x"));
    }

    #[test]
    fn write_json_creates_parents_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/record.json");
        write_json(&target, &serde_json::json!({"k": 1})).unwrap();
        assert!(target.exists());
        assert!(!target.with_extension("json.tmp").exists());
        remove_file_if_exists(&target).unwrap();
        remove_file_if_exists(&target).unwrap();
    }

    #[test]
    fn removing_missing_state_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        StateLayout::new(dir.path()).remove_state().unwrap();
    }
}
