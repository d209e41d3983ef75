// Test nodes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use graphcore::{DefinitionError, GraphError, Node, NodeContext, NodeDefinition, NodeError, NodeSpec, Value};
use graphruntime::{Project, ProjectConfig};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Ids of nodes whose `run` was invoked.
#[derive(Clone, Default)]
pub struct RunLog(Arc<Mutex<Vec<String>>>);

impl RunLog {
    pub fn record(&self, ctx: &NodeContext) {
        self.0.lock().unwrap().push(ctx.node_id.to_string());
    }

    /// Drains the log, sorted.
    pub fn take(&self) -> Vec<String> {
        let mut ran = std::mem::take(&mut *self.0.lock().unwrap());
        ran.sort();
        ran
    }
}

pub fn config(root: &Path) -> ProjectConfig {
    ProjectConfig::default().with_root(root)
}

pub struct Prepare(pub RunLog);

#[async_trait]
impl Node for Prepare {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Prepare").param("rows", 4i64).outs("data").build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        self.0.record(ctx);
        let rows = ctx.param_i64("rows")?;
        ctx.set_output("data", Value::Array((0..rows).map(Value::Int).collect()));
        Ok(())
    }
}

pub struct Featurize(pub RunLog);

#[async_trait]
impl Node for Featurize {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Featurize")
            .deps("prepared")
            .outs_path("features", "{nwd}/features.json")
            .build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        self.0.record(ctx);
        let json = serde_json::to_vec(&ctx.dep("prepared")?.to_json()).unwrap();
        std::fs::write(ctx.path("features")?, json)?;
        Ok(())
    }
}

pub struct Train(pub RunLog);

#[async_trait]
impl Node for Train {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Train")
            .param("min_split", 0.01)
            .param("n_est", 50i64)
            .param("seed", 20170428i64)
            .deps_path("features", Some("data/features"))
            .outs_path("model", "{nwd}/model.txt")
            .outs("n_features")
            .build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        self.0.record(ctx);
        let features: serde_json::Value =
            serde_json::from_slice(&std::fs::read(ctx.path("features")?)?).unwrap();
        let count = features.as_array().map(|a| a.len()).unwrap_or(0) as i64;
        let model = format!("n_est={} features={}", ctx.param_i64("n_est")?, count);
        std::fs::write(ctx.path("model")?, model)?;
        ctx.set_output("n_features", count);
        Ok(())
    }
}

pub struct Evaluate(pub RunLog);

#[async_trait]
impl Node for Evaluate {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Evaluate")
            .deps("model")
            .deps("features")
            .plots("curve", "threshold", "precision")
            .outs("score")
            .build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        self.0.record(ctx);
        let model_path = ctx.dep("model")?.as_str().unwrap().to_string();
        let model = std::fs::read_to_string(model_path)?;
        ctx.set_output("score", model.len() as f64 / 100.0);
        ctx.set_output(
            "curve",
            Value::table([
                ("threshold", vec![Value::Number(0.25), Value::Number(0.75)]),
                ("precision", vec![Value::Number(0.6), Value::Number(0.9)]),
            ]),
        );
        Ok(())
    }
}

/// Prepare -> Featurize -> Train -> Evaluate, with Evaluate also reading
/// Featurize's features.
pub fn declare_pipeline(project: &mut Project, log: &RunLog, n_est: i64) -> Result<(), GraphError> {
    let prepare = project.add(Prepare(log.clone()), NodeSpec::new())?;
    let featurize = project.add(
        Featurize(log.clone()),
        NodeSpec::new().with_dep("prepared", prepare.output("data")),
    )?;
    let train = project.add(
        Train(log.clone()),
        NodeSpec::new()
            .with_param("n_est", n_est)
            .with_dep("features", featurize.output("features")),
    )?;
    project.add(
        Evaluate(log.clone()),
        NodeSpec::new()
            .with_dep("model", train.output("model"))
            .with_dep("features", featurize.output("features")),
    )?;
    Ok(())
}

pub struct Source(pub RunLog);

#[async_trait]
impl Node for Source {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Source").param("value", 1i64).outs("out").build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        self.0.record(ctx);
        let value = ctx.param("value")?.clone();
        ctx.set_output("out", value);
        Ok(())
    }
}

pub struct Link(pub RunLog);

#[async_trait]
impl Node for Link {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Link").deps("input").outs("out").build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        self.0.record(ctx);
        let value = ctx.dep("input")?.clone();
        ctx.set_output("out", value);
        Ok(())
    }
}

pub struct Fails(pub RunLog);

#[async_trait]
impl Node for Fails {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Fails").deps("input").outs("out").build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        self.0.record(ctx);
        Err(NodeError::ExecutionFailed("boom".to_string()))
    }
}

pub struct Panics;

#[async_trait]
impl Node for Panics {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Panics").outs("out").build()
    }

    async fn run(&self, _ctx: &mut NodeContext) -> Result<(), NodeError> {
        panic!("kaboom")
    }
}

/// Declares an output it never sets.
pub struct Forgetful;

#[async_trait]
impl Node for Forgetful {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Forgetful").outs("value").build()
    }

    async fn run(&self, _ctx: &mut NodeContext) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Reads an external input file.
pub struct ReadFile(pub RunLog);

#[async_trait]
impl Node for ReadFile {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("ReadFile")
            .deps_path("source", Some("inputs/source.txt"))
            .outs("text")
            .build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        self.0.record(ctx);
        let text = std::fs::read_to_string(ctx.path("source")?)?;
        ctx.set_output("text", text);
        Ok(())
    }
}

/// Collects a list dependency into one array output.
pub struct Collect(pub RunLog);

#[async_trait]
impl Node for Collect {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Collect").deps("data").outs("all").build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        self.0.record(ctx);
        let all = ctx.dep("data")?.clone();
        ctx.set_output("all", all);
        Ok(())
    }
}

/// Start and end of each `run`, per node id.
#[derive(Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<(String, Instant, Instant)>>>);

impl Timeline {
    pub fn window(&self, id: &str) -> (Instant, Instant) {
        let entries = self.0.lock().unwrap();
        let (_, start, end) = entries.iter().find(|(node, _, _)| node == id).unwrap();
        (*start, *end)
    }

    fn push(&self, ctx: &NodeContext, start: Instant) {
        self.0.lock().unwrap().push((ctx.node_id.to_string(), start, Instant::now()));
    }
}

/// Sleeps for `millis` before producing its output.
pub struct Sleepy(pub Timeline);

#[async_trait]
impl Node for Sleepy {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Sleepy").param("millis", 200i64).outs("out").build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        let start = Instant::now();
        let millis = ctx.param_i64("millis")?;
        tokio::time::sleep(Duration::from_millis(millis as u64)).await;
        ctx.set_output("out", millis);
        self.0.push(ctx, start);
        Ok(())
    }
}

/// Reads two upstream values.
pub struct Join(pub Timeline);

#[async_trait]
impl Node for Join {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Join").deps("left").deps("right").outs("sum").build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        let start = Instant::now();
        let left = ctx.dep("left")?.as_i64().unwrap_or(0);
        let right = ctx.dep("right")?.as_i64().unwrap_or(0);
        ctx.set_output("sum", left + right);
        self.0.push(ctx, start);
        Ok(())
    }
}
