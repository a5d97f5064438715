//! Generation collaborator contract and the subprocess bridge.
//!
//! A [`Generator`] receives the primary document and the resolved
//! [`ArtifactPlan`], writes the requested artifacts into the asset
//! directory, and returns a metadata fragment. [`BridgeGenerator`] talks to
//! an external command over a JSON-lines stdin/stdout protocol:
//!
//! ```text
//! <- {"type":"ready"}
//! -> {"type":"generate","id":"req-1","request":{...}}
//! <- {"type":"result","id":"req-1","output":{"fragment":{...},"failed_kinds":[...]}}
//!    or {"type":"error","id":"req-1","error":"..."}
//! -> {"type":"shutdown"}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use archivist_shared::{
    ArchivistError, ArtifactKind, ArtifactPlan, GeneratorConfig, MetaFragment, Result,
};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// What the generation collaborator is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub asset_id: String,
    pub title: String,
    pub primary_document_path: PathBuf,
    /// Asset directory; artifacts are written here.
    pub target_directory: PathBuf,
    /// Where per-item comparison files go.
    pub comparison_directory: PathBuf,
    /// Requested kinds plus sub-mode selections and comparison items.
    pub plan: ArtifactPlan,
}

/// An optional kind the collaborator could not produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedKind {
    pub kind: ArtifactKind,
    pub error: String,
}

/// What the collaborator returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    #[serde(default)]
    pub fragment: MetaFragment,
    #[serde(default)]
    pub failed_kinds: Vec<FailedKind>,
}

impl GenerationOutput {
    /// The plan minus the kinds that failed.
    pub fn produced_plan(&self, requested: &ArtifactPlan) -> ArtifactPlan {
        let failed = |kind: ArtifactKind| self.failed_kinds.iter().any(|f| f.kind == kind);
        let mut plan = requested.clone();
        plan.kinds.retain(|k| !failed(*k));
        if failed(ArtifactKind::Canvas) {
            plan.diagram_type = None;
        }
        if failed(ArtifactKind::Base) {
            plan.base_mode = None;
            plan.comparison_items.clear();
        }
        plan
    }

    /// Whether the mandatory kind is among the failures.
    pub fn mandatory_failed(&self) -> bool {
        self.failed_kinds.iter().any(|f| f.kind.is_mandatory())
    }
}

/// A generation collaborator.
///
/// `Err` means the call as a whole failed (no partial credit). Files a
/// collaborator already wrote are left in place either way.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput>;
}

/// Generator used when no collaborator is configured: produces nothing.
pub struct NoopGenerator;

#[async_trait]
impl Generator for NoopGenerator {
    fn name(&self) -> &str {
        "noop"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationOutput> {
        Ok(GenerationOutput::default())
    }
}

// ---------------------------------------------------------------------------
// Bridge protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum RequestMessage<'a> {
    #[serde(rename = "generate")]
    Generate {
        id: &'a str,
        request: &'a GenerationRequest,
    },
    #[serde(rename = "shutdown")]
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseMessage {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "result")]
    Result {
        id: String,
        #[serde(default)]
        output: GenerationOutput,
    },
    #[serde(rename = "error")]
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

/// Handle to the spawned collaborator process.
struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

impl BridgeHandle {
    fn spawn(config: &BridgeConfig) -> Result<Self> {
        info!(cmd = %config.command, "spawning generation bridge");

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            ArchivistError::Generation(format!(
                "failed to spawn bridge: {e}. Is `{}` installed?",
                config.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ArchivistError::Generation("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ArchivistError::Generation("failed to capture bridge stdout".into()))?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
        };
        if let Err(e) = handle.wait_for_ready() {
            let _ = handle.child.kill();
            let _ = handle.child.wait();
            return Err(e);
        }
        Ok(handle)
    }

    fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| ArchivistError::Generation(format!("bridge read error: {e}")))?;
        if line.is_empty() {
            return Err(ArchivistError::Generation(
                "bridge closed stdout unexpectedly".into(),
            ));
        }
        serde_json::from_str(line.trim()).map_err(|e| {
            let shown: String = line.chars().take(200).collect();
            ArchivistError::Generation(format!("invalid bridge message: {e} (got: {shown})"))
        })
    }

    fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message()? {
            ResponseMessage::Ready => {
                info!("bridge is ready");
                Ok(())
            }
            other => Err(ArchivistError::Generation(format!(
                "expected ready message, got: {other:?}"
            ))),
        }
    }

    fn send_request(&mut self, id: &str, request: &GenerationRequest) -> Result<GenerationOutput> {
        let json = serde_json::to_string(&RequestMessage::Generate { id, request }).map_err(|e| {
            ArchivistError::Generation(format!("failed to serialize request: {e}"))
        })?;
        writeln!(self.stdin, "{json}")
            .and_then(|_| self.stdin.flush())
            .map_err(|e| ArchivistError::Generation(format!("failed to write to bridge: {e}")))?;

        match self.read_message()? {
            ResponseMessage::Result { id: resp_id, output } => {
                if resp_id != id {
                    warn!(expected = %id, got = %resp_id, "bridge answered with unexpected id");
                }
                Ok(output)
            }
            ResponseMessage::Error { error, .. } => Err(ArchivistError::Generation(error)),
            ResponseMessage::Ready => Err(ArchivistError::Generation(
                "unexpected ready message during generation".into(),
            )),
        }
    }

    fn shutdown(mut self) {
        if let Ok(json) = serde_json::to_string(&RequestMessage::Shutdown) {
            let _ = writeln!(self.stdin, "{json}");
            let _ = self.stdin.flush();
        }
        drop(self.stdin);
        match self.child.wait() {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// BridgeGenerator
// ---------------------------------------------------------------------------

/// Resolved bridge command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// Runs the configured command once per generation request.
pub struct BridgeGenerator {
    config: BridgeConfig,
}

impl BridgeGenerator {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Build from the `[generator]` section; `None` when no command is set.
    pub fn from_config(config: &GeneratorConfig) -> Option<Self> {
        let command = config.command.as_deref()?.trim();
        if command.is_empty() {
            return None;
        }
        Some(Self::new(BridgeConfig {
            command: command.to_string(),
            args: config.args.clone(),
            working_dir: config.working_dir.as_ref().map(PathBuf::from),
        }))
    }
}

#[async_trait]
impl Generator for BridgeGenerator {
    fn name(&self) -> &str {
        "bridge"
    }

    #[instrument(skip_all, fields(asset_id = %request.asset_id, cmd = %self.config.command))]
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let config = self.config.clone();
        let request = request.clone();

        tokio::task::spawn_blocking(move || {
            let mut handle = BridgeHandle::spawn(&config)?;
            let result = handle.send_request("req-1", &request);
            handle.shutdown();
            result
        })
        .await
        .map_err(|e| ArchivistError::Generation(format!("bridge task failed: {e}")))?
    }
}

/// Pick the generator for a configuration.
pub fn generator_from_config(config: &GeneratorConfig) -> Box<dyn Generator> {
    match BridgeGenerator::from_config(config) {
        Some(bridge) => Box::new(bridge),
        None => Box::new(NoopGenerator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_shared::BaseMode;

    fn request() -> GenerationRequest {
        let mut plan = ArtifactPlan::primary_only();
        plan.kinds.push(ArtifactKind::Base);
        plan.base_mode = Some(BaseMode::Comparison);
        plan.comparison_items = vec!["Rust".into(), "Go".into()];
        GenerationRequest {
            asset_id: "abc".into(),
            title: "t".into(),
            primary_document_path: "/tmp/x/article.md".into(),
            target_directory: "/tmp/x".into(),
            comparison_directory: "/tmp/x/comparisons".into(),
            plan,
        }
    }

    #[test]
    fn produced_plan_drops_failed_kinds() {
        let out = GenerationOutput {
            fragment: MetaFragment::default(),
            failed_kinds: vec![FailedKind {
                kind: ArtifactKind::Base,
                error: "template error".into(),
            }],
        };
        let produced = out.produced_plan(&request().plan);
        assert_eq!(produced.kinds, vec![ArtifactKind::Note]);
        assert!(produced.base_mode.is_none());
        assert!(produced.comparison_items.is_empty());
        assert!(!out.mandatory_failed());
    }

    #[test]
    fn request_message_shape() {
        let req = request();
        let json = serde_json::to_value(RequestMessage::Generate {
            id: "req-1",
            request: &req,
        })
        .unwrap();
        assert_eq!(json["type"], "generate");
        assert_eq!(json["request"]["plan"]["kinds"][1], "base");
        assert_eq!(json["request"]["plan"]["base_mode"], "comparison");
    }

    #[test]
    fn from_config_requires_command() {
        assert!(BridgeGenerator::from_config(&GeneratorConfig::default()).is_none());
        let cfg = GeneratorConfig {
            command: Some("node".into()),
            args: vec!["bridge.js".into()],
            working_dir: None,
        };
        assert!(BridgeGenerator::from_config(&cfg).is_some());
    }

    #[tokio::test]
    async fn noop_generator_returns_empty_fragment() {
        let out = NoopGenerator.generate(&request()).await.unwrap();
        assert!(out.fragment.is_empty());
        assert!(out.failed_kinds.is_empty());
    }

    #[cfg(unix)]
    fn sh(script: &str) -> BridgeGenerator {
        BridgeGenerator::new(BridgeConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            working_dir: None,
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bridge_round_trip() {
        let script = r#"echo '{"type":"ready"}'
read line
echo '{"type":"result","id":"req-1","output":{"fragment":{"category":"tech","tags":["rust"]},"failed_kinds":[{"kind":"canvas","error":"no layout"}]}}'
read line"#;
        let out = sh(script).generate(&request()).await.unwrap();
        assert_eq!(out.fragment.category.as_deref(), Some("tech"));
        assert_eq!(out.fragment.tags, vec!["rust"]);
        assert_eq!(out.failed_kinds[0].kind, ArtifactKind::Canvas);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bridge_error_is_generation_error() {
        let script = r#"echo '{"type":"ready"}'
read line
echo '{"type":"error","id":"req-1","error":"model unavailable"}'
read line"#;
        let err = sh(script).generate(&request()).await.unwrap_err();
        assert_eq!(err.reason(), "generation");
        assert!(err.to_string().contains("model unavailable"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bridge_that_exits_early_fails() {
        let err = sh("exit 0").generate(&request()).await.unwrap_err();
        assert!(err.to_string().contains("closed stdout"));
    }
}
