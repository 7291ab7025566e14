//! Node-control platform.
//!
//! Shells out to a node-control executable (`platform.ctl`) through
//! `tokio::process::Command`, locally for local nodes and through `ssh` for
//! worker endpoints. SSH keys must be pre-configured; BatchMode is forced.
//!
//! Every subcommand prints JSON on stdout:
//!
//! | Subcommand | Output |
//! |------------|--------|
//! | `start --count N --network MODE [--bootstrap URL] [--proxy URL]` | `["node-id", ...]` |
//! | `install --node ID --instances N --app SRC` | `[{"key", "app_id", "cell"}, ...]` |
//! | `call --node ID --cell CELL --fn OP --payload JSON` | call result |
//! | `signals --node ID` | one `{"recipient", "payload"}` per line, until killed |
//! | `share-peers --node ID@HOST ...` | ignored |
//! | `stop --node ID` | ignored |
//!
//! `share-peers` always runs on the local host and receives every node as
//! `ID@HOST`, split at the first `@`; `HOST` is the worker endpoint or `local`.

use super::{Agent, NodeHandle, NodeId, NodeSpec, Platform, PlatformError, SignalSink, WorkerEndpoint};
use crate::config::{AppSource, NetworkMode, PlatformConfig};
use async_trait::async_trait;
use load_types::{AgentKey, Operation, SignalEvent};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

/// Remote directory app bundles are copied to before install.
const REMOTE_BUNDLE_DIR: &str = "/tmp";

/// Errors from node-control commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Command failed to execute (process spawn error).
    #[error("spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// Command returned non-zero exit code.
    #[error("command failed on {host}: exit={exit_code}, stderr={stderr}")]
    CommandFailed {
        /// Target host.
        host: String,
        /// Exit code.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// Command succeeded but printed something unusable.
    #[error("unexpected output from {command}: {detail}")]
    BadOutput {
        /// Subcommand that produced the output.
        command: String,
        /// Parse failure detail.
        detail: String,
    },

    /// SCP transfer failed.
    #[error("scp failed: {0}")]
    ScpFailed(String),
}

/// Result of executing a command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Machine a command runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTarget {
    /// The orchestrator's own machine.
    Local,
    /// A worker reached over SSH.
    Ssh {
        /// Host name or IP.
        host: String,
        /// SSH user; `None` uses the ssh default.
        user: Option<String>,
        /// Connection timeout in seconds.
        connect_timeout_secs: u64,
    },
}

impl CommandTarget {
    /// Target for an endpoint (`host` or `user@host`), or local when `None`.
    pub fn for_endpoint(endpoint: Option<&WorkerEndpoint>, config: &PlatformConfig) -> Self {
        let Some(endpoint) = endpoint else {
            return CommandTarget::Local;
        };
        let (user, host) = match endpoint.as_str().split_once('@') {
            Some((user, host)) => (Some(user.to_string()), host.to_string()),
            None => (config.ssh_user.clone(), endpoint.as_str().to_string()),
        };
        CommandTarget::Ssh {
            host,
            user,
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    /// Host name used in errors and logs.
    pub fn host(&self) -> &str {
        match self {
            CommandTarget::Local => "localhost",
            CommandTarget::Ssh { host, .. } => host,
        }
    }

    fn destination(&self) -> Option<String> {
        match self {
            CommandTarget::Local => None,
            CommandTarget::Ssh { host, user, .. } => Some(match user {
                Some(user) => format!("{}@{}", user, host),
                None => host.clone(),
            }),
        }
    }

    fn ssh_options(connect_timeout_secs: u64) -> Vec<String> {
        vec![
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            format!("ConnectTimeout={}", connect_timeout_secs),
            "-o".into(),
            "BatchMode=yes".into(),
        ]
    }

    fn command(&self, program: &[String], args: &[String]) -> tokio::process::Command {
        match self {
            CommandTarget::Local => {
                let mut cmd = tokio::process::Command::new(&program[0]);
                cmd.args(&program[1..]).args(args);
                cmd
            }
            CommandTarget::Ssh {
                connect_timeout_secs,
                ..
            } => {
                let remote = program
                    .iter()
                    .chain(args)
                    .map(|arg| shell_quote(arg))
                    .collect::<Vec<_>>()
                    .join(" ");
                let mut cmd = tokio::process::Command::new("ssh");
                cmd.args(Self::ssh_options(*connect_timeout_secs))
                    .arg(self.destination().unwrap_or_default())
                    .arg(remote);
                cmd
            }
        }
    }

    /// Execute a command on the target.
    ///
    /// Returns the raw result including exit code, stdout, and stderr.
    /// Does NOT fail on non-zero exit; use `exec_ok` for that.
    pub async fn exec(&self, program: &[String], args: &[String]) -> Result<CommandOutput, CommandError> {
        tracing::debug!(host = self.host(), ?args, "exec");
        let output = self.command(program, args).output().await?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Execute a command on the target, failing on non-zero exit.
    pub async fn exec_ok(&self, program: &[String], args: &[String]) -> Result<CommandOutput, CommandError> {
        let result = self.exec(program, args).await?;
        if !result.success() {
            return Err(CommandError::CommandFailed {
                host: self.host().to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }

    /// Start a long-running command whose stdout is read line by line.
    ///
    /// The child is killed when the returned handle is dropped.
    pub fn spawn_piped(&self, program: &[String], args: &[String]) -> Result<tokio::process::Child, CommandError> {
        let child = self
            .command(program, args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }

    /// Copy a local file to the target via SCP. Local targets are a no-op.
    pub async fn scp_to(&self, local: &Path, remote: &str) -> Result<(), CommandError> {
        let CommandTarget::Ssh {
            connect_timeout_secs,
            ..
        } = self
        else {
            return Ok(());
        };
        let destination = self.destination().unwrap_or_default();
        let output = tokio::process::Command::new("scp")
            .args(Self::ssh_options(*connect_timeout_secs))
            .arg(local)
            .arg(format!("{}:{}", destination, remote))
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CommandError::ScpFailed(format!(
                "scp to {}:{} failed: {}",
                destination, remote, stderr
            )));
        }

        Ok(())
    }
}

/// Quote an argument for a POSIX shell on the far side of `ssh`.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn decode<T: serde::de::DeserializeOwned>(command: &str, output: &CommandOutput) -> Result<T, CommandError> {
    serde_json::from_str(output.stdout.trim()).map_err(|e| CommandError::BadOutput {
        command: command.to_string(),
        detail: e.to_string(),
    })
}

/// Agent as printed by `install`.
#[derive(Debug, Deserialize)]
struct InstalledAgent {
    key: AgentKey,
    app_id: String,
    cell: String,
}

/// Platform backed by a node-control executable.
#[derive(Debug)]
pub struct CommandPlatform {
    /// Executable and leading arguments.
    ctl: Vec<String>,
    config: PlatformConfig,
    /// Where each live node runs.
    targets: Mutex<HashMap<NodeId, CommandTarget>>,
    /// Signal reader tasks per node; each owns its `signals` child.
    streams: Mutex<HashMap<NodeId, Vec<JoinHandle<()>>>>,
}

impl CommandPlatform {
    /// Create a platform from configuration.
    ///
    /// `config.ctl` may carry leading arguments (`"sh ./ctl.sh"`).
    pub fn new(config: PlatformConfig) -> Result<Self, CommandError> {
        let ctl: Vec<String> = config.ctl.split_whitespace().map(str::to_string).collect();
        if ctl.is_empty() {
            return Err(CommandError::BadOutput {
                command: "config".into(),
                detail: "platform.ctl is empty".into(),
            });
        }
        Ok(Self {
            ctl,
            config,
            targets: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
        })
    }

    fn target(&self, node: &NodeId) -> Result<CommandTarget, PlatformError> {
        let targets = self.targets.lock().unwrap();
        targets
            .get(node)
            .cloned()
            .ok_or_else(|| PlatformError::UnknownNode(node.clone()))
    }

    /// Resolve the bundle argument for `install`, copying local files to remote targets.
    async fn bundle_arg(&self, target: &CommandTarget, app: &AppSource) -> Result<String, CommandError> {
        match (target, app) {
            (_, AppSource::Url { url }) => Ok(url.clone()),
            (CommandTarget::Local, AppSource::Path(path)) => Ok(path.display().to_string()),
            (CommandTarget::Ssh { .. }, AppSource::Path(path)) => {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "bundle".to_string());
                let remote = format!("{}/chatload-{}", REMOTE_BUNDLE_DIR, file_name);
                target.scp_to(path, &remote).await?;
                Ok(remote)
            }
        }
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl Platform for CommandPlatform {
    async fn create_nodes(
        &self,
        spec: &NodeSpec,
        endpoint: Option<&WorkerEndpoint>,
    ) -> Result<Vec<NodeHandle>, PlatformError> {
        let target = CommandTarget::for_endpoint(endpoint, &self.config);
        let count = spec.count.to_string();
        let mode = match spec.network.mode {
            NetworkMode::Local => "local",
            NetworkMode::Networked => "networked",
        };
        let mut cmd_args = args(&["start", "--count", &count, "--network", mode]);
        if let Some(url) = &spec.network.bootstrap_url {
            cmd_args.extend(args(&["--bootstrap", url]));
        }
        if let Some(url) = &spec.network.proxy_url {
            cmd_args.extend(args(&["--proxy", url]));
        }

        let unreachable = |reason: String| PlatformError::Unreachable {
            endpoint: target.host().to_string(),
            reason,
        };
        let output = self
            .ctl_exec(&target, &cmd_args)
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let ids: Vec<NodeId> = decode("start", &output).map_err(|e| unreachable(e.to_string()))?;

        let mut targets = self.targets.lock().unwrap();
        Ok(ids
            .into_iter()
            .map(|id| {
                targets.insert(id.clone(), target.clone());
                NodeHandle {
                    id,
                    endpoint: endpoint.cloned(),
                }
            })
            .collect())
    }

    async fn shutdown_node(&self, node: &NodeHandle) -> Result<(), PlatformError> {
        let streams = self.streams.lock().unwrap().remove(&node.id);
        for handle in streams.into_iter().flatten() {
            handle.abort();
        }

        let target = self.target(&node.id)?;
        self.ctl_exec(&target, &args(&["stop", "--node", node.id.as_str()]))
            .await?;
        self.targets.lock().unwrap().remove(&node.id);
        Ok(())
    }

    async fn install_app(
        &self,
        node: &NodeHandle,
        app: &AppSource,
        instances: usize,
    ) -> Result<Vec<Agent>, PlatformError> {
        let target = self.target(&node.id)?;
        let install_error = |reason: String| PlatformError::Install {
            node: node.id.clone(),
            reason,
        };

        let bundle = self
            .bundle_arg(&target, app)
            .await
            .map_err(|e| install_error(e.to_string()))?;
        let count = instances.to_string();
        let output = self
            .ctl_exec(
                &target,
                &args(&["install", "--node", node.id.as_str(), "--instances", &count, "--app", &bundle]),
            )
            .await
            .map_err(|e| install_error(e.to_string()))?;
        let installed: Vec<InstalledAgent> =
            decode("install", &output).map_err(|e| install_error(e.to_string()))?;

        Ok(installed
            .into_iter()
            .map(|a| Agent {
                key: a.key,
                node: node.id.clone(),
                app_id: a.app_id,
                cell: a.cell,
            })
            .collect())
    }

    async fn call(
        &self,
        agent: &Agent,
        op: Operation,
        payload: Value,
    ) -> Result<Value, PlatformError> {
        let target = self.target(&agent.node)?;
        let payload = serde_json::to_string(&payload)?;
        let call_error = |reason: String| PlatformError::Call { op, reason };

        let output = self
            .ctl_exec(
                &target,
                &args(&[
                    "call",
                    "--node",
                    agent.node.as_str(),
                    "--cell",
                    &agent.cell,
                    "--fn",
                    op.as_str(),
                    "--payload",
                    &payload,
                ]),
            )
            .await
            .map_err(|e| call_error(e.to_string()))?;
        decode("call", &output).map_err(|e| call_error(e.to_string()))
    }

    async fn register_signal_handler(
        &self,
        node: &NodeHandle,
        sink: SignalSink,
    ) -> Result<(), PlatformError> {
        let target = self.target(&node.id)?;
        let mut child = target.spawn_piped(&self.ctl, &args(&["signals", "--node", node.id.as_str()]))?;
        let stdout = child.stdout.take().ok_or_else(|| CommandError::BadOutput {
            command: "signals".into(),
            detail: "stdout not captured".into(),
        })?;

        let node_id = node.id.clone();
        let handle = tokio::spawn(async move {
            // Keep the child alive for as long as the reader runs.
            let _child = child;
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<SignalEvent>(&line) {
                        Ok(event) => {
                            if sink.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(node = %node_id, "undecodable signal line: {}", e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(node = %node_id, "signal stream error: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!(node = %node_id, "signal stream closed");
        });

        self.streams
            .lock()
            .unwrap()
            .entry(node.id.clone())
            .or_default()
            .push(handle);
        Ok(())
    }

    async fn share_peer_info(&self, nodes: &[NodeHandle]) -> Result<(), PlatformError> {
        for node in nodes {
            self.target(&node.id)?;
        }
        self.ctl_exec(&CommandTarget::Local, &share_peers_args(nodes)).await?;
        Ok(())
    }
}

fn share_peers_args(nodes: &[NodeHandle]) -> Vec<String> {
    let mut cmd_args = args(&["share-peers"]);
    for node in nodes {
        cmd_args.push("--node".into());
        cmd_args.push(node.to_string());
    }
    cmd_args
}

impl CommandPlatform {
    async fn ctl_exec(&self, target: &CommandTarget, args: &[String]) -> Result<CommandOutput, CommandError> {
        target.exec_ok(&self.ctl, args).await
    }
}
