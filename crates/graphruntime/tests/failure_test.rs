mod common;

use common::*;
use graphcore::{AttrRef, DefinitionError, ExecutionError, GraphError, NodeError, NodeSpec, NodeState};
use graphruntime::Project;

fn named(name: &str) -> NodeSpec {
    NodeSpec::new().with_name(name)
}

#[tokio::test]
async fn test_cycle_is_rejected_before_any_run() {
    let dir = tempfile::tempdir().unwrap();
    let log = RunLog::default();

    let mut project = Project::open(config(dir.path())).unwrap();
    project.add(Link(log.clone()), named("A").with_dep("input", AttrRef::new("C", "out"))).unwrap();
    project.add(Link(log.clone()), named("B").with_dep("input", AttrRef::new("A", "out"))).unwrap();
    project.add(Link(log.clone()), named("C").with_dep("input", AttrRef::new("B", "out"))).unwrap();

    match project.build().await {
        Err(GraphError::CyclicGraph { cycle_path }) => {
            let path: Vec<&str> = cycle_path.iter().map(|id| id.as_str()).collect();
            assert_eq!(path, vec!["A", "B", "C", "A"]);
        }
        other => panic!("expected a cycle error, got {:?}", other.map(|r| r.summary())),
    }
    assert!(log.take().is_empty());
    assert!(!dir.path().join("nodes").exists());
}

#[tokio::test]
async fn test_failure_blocks_descendants_but_not_independent_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let log = RunLog::default();

    let mut project = Project::open(config(dir.path())).unwrap();
    project.add(Source(log.clone()), named("A")).unwrap();
    project.add(Fails(log.clone()), named("B").with_dep("input", AttrRef::new("A", "out"))).unwrap();
    project.add(Link(log.clone()), named("C").with_dep("input", AttrRef::new("B", "out"))).unwrap();
    project.add(Link(log.clone()), named("E").with_dep("input", AttrRef::new("C", "out"))).unwrap();
    project.add(Link(log.clone()), named("D").with_dep("input", AttrRef::new("A", "out"))).unwrap();

    let err = project.build().await.unwrap_err();
    let report = err.report().expect("build failure carries a report");

    assert_eq!(report.state_of("A"), Some(NodeState::Succeeded));
    assert_eq!(report.state_of("B"), Some(NodeState::Failed));
    assert_eq!(report.state_of("C"), Some(NodeState::Blocked));
    assert_eq!(report.state_of("E"), Some(NodeState::Blocked));
    assert_eq!(report.state_of("D"), Some(NodeState::Succeeded));
    assert_eq!(report.outcome("E").unwrap().reason, "blocked by 'B'");

    assert_eq!(report.first_failed().unwrap().node_id.as_str(), "B");
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(
        &report.errors[0],
        ExecutionError::NodeExecution { node_id, cause: NodeError::ExecutionFailed(msg) }
            if node_id.as_str() == "B" && msg == "boom"
    ));
    assert_eq!(log.take(), vec!["A", "B", "D"]);
}

#[tokio::test]
async fn test_failed_node_is_retried_next_build() {
    let dir = tempfile::tempdir().unwrap();
    let log = RunLog::default();

    for _ in 0..2 {
        let mut project = Project::open(config(dir.path())).unwrap();
        project.add(Source(log.clone()), named("A")).unwrap();
        project.add(Fails(log.clone()), named("B").with_dep("input", AttrRef::new("A", "out"))).unwrap();
        assert!(project.build().await.is_err());
    }
    // A is cached the second time, B is not
    assert_eq!(log.take(), vec!["A", "B", "B"]);
}

#[tokio::test]
async fn test_missing_output_fails_the_node() {
    let dir = tempfile::tempdir().unwrap();

    let mut project = Project::open(config(dir.path())).unwrap();
    project.add(Forgetful, NodeSpec::new()).unwrap();
    let err = project.build().await.unwrap_err();
    let report = err.report().unwrap();

    assert_eq!(report.state_of("Forgetful"), Some(NodeState::Failed));
    assert!(matches!(
        &report.errors[0],
        ExecutionError::MissingOutput { attribute, .. } if attribute == "value"
    ));
    // No fingerprint was recorded, so the next build tries again
    assert!(!dir.path().join(".graph/nodes/Forgetful/fingerprint.json").exists());
}

#[tokio::test]
async fn test_panic_is_reported_as_node_failure() {
    let dir = tempfile::tempdir().unwrap();
    let log = RunLog::default();

    let mut project = Project::open(config(dir.path())).unwrap();
    project.add(Panics, NodeSpec::new()).unwrap();
    project.add(Source(log.clone()), NodeSpec::new()).unwrap();
    let err = project.build().await.unwrap_err();
    let report = err.report().unwrap();

    assert_eq!(report.state_of("Panics"), Some(NodeState::Failed));
    assert_eq!(report.state_of("Source"), Some(NodeState::Succeeded));
    assert!(matches!(
        &report.errors[0],
        ExecutionError::NodeExecution { cause: NodeError::Panicked(msg), .. } if msg == "kaboom"
    ));
}

#[tokio::test]
async fn test_corrupted_artifact_is_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let log = RunLog::default();

    let mut project = Project::open(config(dir.path())).unwrap();
    declare_pipeline(&mut project, &log, 50).unwrap();
    project.build().await.unwrap();
    log.take();

    std::fs::write(dir.path().join(".graph/nodes/Prepare/outs/data.json"), "garbage").unwrap();
    let report = project.build().await.unwrap();

    assert_eq!(log.take(), vec!["Prepare"]);
    assert_eq!(report.state_of("Featurize"), Some(NodeState::Skipped));
    assert!(report.outcome("Prepare").unwrap().reason.contains("Cache corruption"));
}

#[tokio::test]
async fn test_corrupted_fingerprint_is_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let log = RunLog::default();

    let mut project = Project::open(config(dir.path())).unwrap();
    project.add(Source(log.clone()), NodeSpec::new()).unwrap();
    project.build().await.unwrap();

    std::fs::write(dir.path().join(".graph/nodes/Source/fingerprint.json"), "{").unwrap();
    let report = project.build().await.unwrap();
    assert_eq!(report.state_of("Source"), Some(NodeState::Succeeded));
    assert_eq!(log.take(), vec!["Source", "Source"]);
}

#[tokio::test]
async fn test_declaration_errors() {
    let dir = tempfile::tempdir().unwrap();
    let log = RunLog::default();
    let mut project = Project::open(config(dir.path())).unwrap();

    project.add(Source(log.clone()), NodeSpec::new()).unwrap();
    let err = project.add(Source(log.clone()), NodeSpec::new()).unwrap_err();
    assert!(matches!(err, GraphError::Definition(DefinitionError::NameCollision { .. })));

    let err = project.add(Link(log.clone()), named("L")).unwrap_err();
    assert!(matches!(err, GraphError::Definition(DefinitionError::UnboundDependency { .. })));

    let err = project
        .add(Source(log.clone()), named("S").with_param("value", f64::NAN))
        .unwrap_err();
    assert!(matches!(err, GraphError::Definition(DefinitionError::UnhashableParameter { .. })));

    project.add(Link(log.clone()), named("orphan").with_dep("input", AttrRef::new("ghost", "out"))).unwrap();
    let err = project.close().unwrap_err();
    assert!(matches!(err, GraphError::UnknownNode { .. }));

    // A failed close still ends the declaration phase
    assert!(matches!(
        project.add(Source(log.clone()), named("late")),
        Err(GraphError::ProjectClosed)
    ));
}

#[tokio::test]
async fn test_node_id_cannot_escape_the_project() {
    let dir = tempfile::tempdir().unwrap();
    let log = RunLog::default();
    std::fs::create_dir_all(dir.path().join("outs")).unwrap();
    std::fs::write(dir.path().join("outs/keep.txt"), "user data").unwrap();

    let mut project = Project::open(config(dir.path())).unwrap();
    let err = project.add(Source(log.clone()), named("../..")).unwrap_err();
    assert!(matches!(err, GraphError::Definition(DefinitionError::InvalidNodeId { .. })));

    project.add(Source(log.clone()), NodeSpec::new()).unwrap();
    project.build().await.unwrap();
    assert!(dir.path().join("outs/keep.txt").exists());
    assert!(!dir.path().join("fingerprint.json").exists());
}
