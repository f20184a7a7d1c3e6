//! Per-file task model for the queue runner.

use crate::config::Config;
use crate::naming::ArtifactPaths;
use crate::supervisor::SupervisorError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for a single task. Never escapes the queue runner.
#[derive(Debug, Error)]
pub enum TaskError {
    /// No encoder binary was found at startup
    #[error("encoder not found; set encoder.path or put ffmpeg on PATH")]
    EncoderNotFound,

    /// The source vanished between enqueue and processing
    #[error("source file is missing: {0}")]
    SourceMissing(PathBuf),

    /// The output directory could not be created
    #[error("failed to create output directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to open the per-file log
    #[error("failed to open task log: {0}")]
    Log(std::io::Error),

    /// Failed to write the frame-server script
    #[error("failed to write frame-server script: {0}")]
    Script(std::io::Error),

    /// The encoder could not be started
    #[error("failed to start encoder: {0}")]
    Spawn(#[from] SupervisorError),

    /// The encoder exited unsuccessfully
    #[error("{stage} failed with exit code {}", display_code(.exit_code))]
    EncoderFailed {
        stage: &'static str,
        exit_code: Option<i32>,
    },

    /// Stopped by the user
    #[error("cancelled")]
    Cancelled,
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (killed)".to_string(),
    }
}

/// Stage of a task in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    LoggingStarted,
    PreTranscoding,
    ScriptGenerated,
    Encoding,
    Succeeded,
    Failed,
    CleanedUp,
}

impl TaskState {
    /// Convert state to string for logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::LoggingStarted => "logging_started",
            TaskState::PreTranscoding => "pre_transcoding",
            TaskState::ScriptGenerated => "script_generated",
            TaskState::Encoding => "encoding",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::CleanedUp => "cleaned_up",
        }
    }
}

/// How a task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    Cancelled,
    /// The queue stopped before this task started
    NotRun,
}

/// One item of work
#[derive(Debug, Clone)]
pub struct FileTask {
    /// Position in the queue
    pub index: usize,
    pub source_path: PathBuf,
    pub base_name: String,
    pub extension: String,
    pub paths: ArtifactPaths,
    /// Advisory lines picked out of the encoder output
    pub errors: Vec<String>,
    pub state: TaskState,
}

impl FileTask {
    pub fn new(index: usize, source_path: &Path, cfg: &Config) -> Self {
        let base_name = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = source_path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            index,
            source_path: source_path.to_path_buf(),
            base_name,
            extension,
            paths: ArtifactPaths::derive(source_path, cfg),
            errors: Vec::new(),
            state: TaskState::Pending,
        }
    }

    /// Directory holding the source, used for directory-change notices
    pub fn directory(&self) -> &Path {
        self.source_path.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// Result of one task as surfaced to the host
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub index: usize,
    pub source: PathBuf,
    /// Where the encoded file ended up, if anywhere
    pub output: Option<PathBuf>,
    pub outcome: TaskOutcome,
    /// Why the task failed
    pub failure: Option<String>,
    /// Advisory error lines from the encoder output
    pub errors: Vec<String>,
    /// Filesystem problems during replace, timestamps or cleanup
    pub warnings: Vec<String>,
    pub elapsed_secs: f64,
}

impl TaskReport {
    pub fn not_run(task: &FileTask) -> Self {
        Self {
            index: task.index,
            source: task.source_path.clone(),
            output: None,
            outcome: TaskOutcome::NotRun,
            failure: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            elapsed_secs: 0.0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == TaskOutcome::Succeeded
    }
}
