use async_trait::async_trait;
use graphcore::{DefinitionError, Node, NodeContext, NodeDefinition, NodeError, Value};
use graphruntime::{NodeFactory, NodeMetadata};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as Process;

/// Runs an external executable in the node working directory
///
/// `input`, when the file exists, is piped to stdin. Stdout is written to
/// the `stdout` path; a command that prints nothing therefore fails with a
/// missing output. A non-zero exit status fails the node.
pub struct Command;

#[async_trait]
impl Node for Command {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Command")
            .version("1")
            .required_param("program")
            .param("args", Value::Array(Vec::new()))
            .deps_path("input", Some("{nwd}/stdin"))
            .outs_path("stdout", "{nwd}/stdout.txt")
            .build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        let program = ctx.param_str("program")?.to_string();
        let args = string_list(ctx.param("args")?)?;
        let input = ctx.path("input")?.to_path_buf();
        let stdout_path = ctx.path("stdout")?.to_path_buf();

        let stdin_data = if input.is_file() {
            Some(tokio::fs::read(&input).await?)
        } else {
            None
        };

        tracing::debug!("Node {} spawning {} {:?} in {}", ctx.node_id, program, args, ctx.nwd.display());
        ctx.events.info(format!("Running {} {}", program, args.join(" ")));

        let mut cmd = Process::new(&program);
        cmd.args(&args)
            .current_dir(&ctx.nwd)
            .stdin(if stdin_data.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to spawn {}: {}", program, e)))?;

        if let (Some(data), Some(mut stdin)) = (stdin_data, child.stdin.take()) {
            stdin
                .write_all(&data)
                .await
                .map_err(|e| NodeError::ExecutionFailed(format!("Failed to write stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to wait for process: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            ctx.events.warn(format!("{} stderr: {}", program, stderr.trim()));
        }
        if !output.status.success() {
            return Err(NodeError::ExecutionFailed(format!(
                "{} exited with status: {}. stderr: {}",
                program, output.status, stderr
            )));
        }

        tokio::fs::write(&stdout_path, &output.stdout).await?;
        Ok(())
    }
}

fn string_list(value: &Value) -> Result<Vec<String>, NodeError> {
    let mismatch = || NodeError::InvalidInputType {
        field: "args".to_string(),
        expected: "array of strings".to_string(),
        actual: value.type_name().to_string(),
    };
    value
        .as_array()
        .ok_or_else(mismatch)?
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            Value::Int(n) => Ok(n.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(mismatch()),
        })
        .collect()
}

pub struct CommandFactory;

impl NodeFactory for CommandFactory {
    fn create(&self) -> Arc<dyn Node> {
        Arc::new(Command)
    }

    fn node_type(&self) -> &str {
        "command"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Run an external executable and capture stdout".to_string(),
            category: "process".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(dir: &std::path::Path, program: &str, args: Vec<Value>) -> NodeContext {
        NodeContext::standalone("cmd", dir)
            .with_param("program", program)
            .with_param("args", Value::Array(args))
            .with_path("input", dir.join("stdin"))
            .with_path("stdout", dir.join("stdout.txt"))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), "echo", vec!["hello".into(), Value::Int(3)]);
        Command.run(&mut ctx).await.unwrap();

        let out = std::fs::read_to_string(dir.path().join("stdout.txt")).unwrap();
        assert_eq!(out.trim(), "hello 3");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pipes_existing_input_to_stdin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stdin"), "from file").unwrap();
        let mut ctx = context(dir.path(), "cat", vec![]);
        Command.run(&mut ctx).await.unwrap();

        let out = std::fs::read_to_string(dir.path().join("stdout.txt")).unwrap();
        assert_eq!(out, "from file");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), "false", vec![]);
        assert!(matches!(Command.run(&mut ctx).await, Err(NodeError::ExecutionFailed(_))));
    }

    #[test]
    fn args_must_be_strings_or_numbers() {
        assert!(string_list(&Value::Array(vec![Value::Bool(true)])).is_err());
        assert!(string_list(&Value::String("a b".into())).is_err());
    }
}
