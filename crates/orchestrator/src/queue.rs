//! Queue runner
//!
//! Drives a list of source files through the pipeline one at a time on a
//! single blocking worker. Every task ends in exactly one report; a failing
//! task never stops the queue, only a stop request does.

use crate::command::{describe_settings, plan_encode, EncodePlan};
use crate::concurrency::ConcurrencyPlan;
use crate::config::Config;
use crate::frameserver::write_script;
use crate::progress::{aggregate_percent, estimate_remaining, format_eta};
use crate::replace::{
    cleanup_transient, preserve_failed_output, replace_original, ReplaceError, SourceTimes,
};
use crate::startup::{EncoderBinary, StartupReport};
use crate::status::{is_error_line, ProgressUpdate};
use crate::supervisor::{Invocation, OutputObserver, ProcessSupervisor, StopHandle};
use crate::task::{FileTask, TaskError, TaskOutcome, TaskReport, TaskState};
use crate::task_log::TaskLog;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Lifecycle of one queue run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Idle,
    Running,
    Completed,
    Stopped,
}

/// Everything the runner reports while it works
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    QueueStarted {
        total: usize,
    },
    /// The next task lives in a different directory than the previous one
    DirectoryChanged {
        directory: PathBuf,
    },
    TaskStarted {
        index: usize,
        total: usize,
        source: PathBuf,
    },
    TaskStage {
        index: usize,
        state: TaskState,
    },
    /// In-file progress of the running invocation
    Progress {
        index: usize,
        percent: Option<u8>,
        position_secs: u64,
        status: String,
    },
    Line {
        index: usize,
        line: String,
    },
    /// Queue-level progress, separate from the in-file percent
    QueueProgress {
        finished: usize,
        total: usize,
        percent: u8,
    },
    Eta {
        remaining_secs: u64,
        remaining: String,
    },
    TaskFinished {
        report: TaskReport,
    },
    QueueFinished {
        summary: QueueSummary,
    },
}

/// Receives queue events
pub trait ProgressSink {
    fn emit(&mut self, event: QueueEvent);
}

impl ProgressSink for UnboundedSender<QueueEvent> {
    fn emit(&mut self, event: QueueEvent) {
        // The host went away; the queue still runs to completion
        if self.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

impl ProgressSink for Vec<QueueEvent> {
    fn emit(&mut self, event: QueueEvent) {
        self.push(event);
    }
}

/// Aggregate result of a queue run
#[derive(Debug, Clone, Serialize)]
pub struct QueueSummary {
    pub state: QueueState,
    pub reports: Vec<TaskReport>,
    pub elapsed_secs: f64,
}

impl QueueSummary {
    pub fn count(&self, outcome: TaskOutcome) -> usize {
        self.reports.iter().filter(|r| r.outcome == outcome).count()
    }

    /// 0 when every task succeeded, 2 when stopped, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        if self.state == QueueState::Stopped {
            2
        } else if self.reports.iter().all(TaskReport::succeeded) {
            0
        } else {
            1
        }
    }
}

/// Forwards supervisor output to the sink and the task log
struct TaskObserver<'a> {
    index: usize,
    sink: &'a mut dyn ProgressSink,
    log: &'a mut TaskLog,
}

impl OutputObserver for TaskObserver<'_> {
    fn on_progress(&mut self, update: &ProgressUpdate) {
        self.sink.emit(QueueEvent::Progress {
            index: self.index,
            percent: update.percent,
            position_secs: update.position_secs,
            status: update.status.clone(),
        });
    }

    fn on_line(&mut self, line: &str) {
        if is_error_line(line) {
            self.log.warn(line);
        } else {
            self.log.info(line);
        }
        self.sink.emit(QueueEvent::Line {
            index: self.index,
            line: line.to_string(),
        });
    }
}

/// Runs a queue against one configuration snapshot
pub struct QueueRunner {
    config: Config,
    encoder: Option<EncoderBinary>,
    plugin_dir: PathBuf,
    threads: u32,
    supervisor: ProcessSupervisor,
    state: QueueState,
}

impl QueueRunner {
    /// Snapshot `config` and take the encoder found at startup
    pub fn new(config: &Config, startup: &StartupReport) -> Self {
        Self::with_encoder(config, startup.encoder.clone(), startup.plugin_dir.clone())
    }

    pub fn with_encoder(config: &Config, encoder: Option<EncoderBinary>, plugin_dir: PathBuf) -> Self {
        let plan = ConcurrencyPlan::derive(config);
        Self {
            config: config.clone(),
            encoder,
            plugin_dir,
            threads: plan.frame_server_threads,
            supervisor: ProcessSupervisor::default(),
            state: QueueState::Idle,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn encoder(&self) -> Option<&EncoderBinary> {
        self.encoder.as_ref()
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    /// Handle for stopping the run from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.supervisor.stop_handle().clone()
    }

    /// Build the tasks for `inputs` without running anything
    pub fn tasks(&self, inputs: &[PathBuf]) -> Vec<FileTask> {
        inputs
            .iter()
            .enumerate()
            .map(|(index, path)| FileTask::new(index, path, &self.config))
            .collect()
    }

    /// The invocations and script a task would use
    pub fn plan(&self, task: &FileTask) -> EncodePlan {
        plan_encode(&task.paths, &self.config, &self.plugin_dir, self.threads)
    }

    /// Run the whole queue on a blocking worker
    pub fn spawn<S>(mut self, inputs: Vec<PathBuf>, mut sink: S) -> JoinHandle<QueueSummary>
    where
        S: ProgressSink + Send + 'static,
    {
        tokio::task::spawn_blocking(move || self.run(&inputs, &mut sink))
    }

    /// Run the whole queue on the calling thread
    pub fn run(&mut self, inputs: &[PathBuf], sink: &mut dyn ProgressSink) -> QueueSummary {
        let started = Instant::now();
        let mut tasks = self.tasks(inputs);
        let total = tasks.len();
        let stop = self.stop_handle();

        self.state = QueueState::Running;
        info!("Queue started with {} file(s): {}", total, describe_settings(&self.config));
        sink.emit(QueueEvent::QueueStarted { total });

        let mut reports = Vec::with_capacity(total);
        let mut previous_dir: Option<PathBuf> = None;

        for task in tasks.iter_mut() {
            if stop.is_stop_requested() {
                reports.push(TaskReport::not_run(task));
                continue;
            }

            let directory = task.directory().to_path_buf();
            if previous_dir.as_ref() != Some(&directory) {
                sink.emit(QueueEvent::DirectoryChanged {
                    directory: directory.clone(),
                });
                previous_dir = Some(directory);
            }

            sink.emit(QueueEvent::TaskStarted {
                index: task.index,
                total,
                source: task.source_path.clone(),
            });
            let report = self.run_task(task, sink);
            sink.emit(QueueEvent::TaskFinished {
                report: report.clone(),
            });
            reports.push(report);

            let finished = reports.len();
            sink.emit(QueueEvent::QueueProgress {
                finished,
                total,
                percent: aggregate_percent(finished, total),
            });
            if let Some(eta) = estimate_remaining(started.elapsed(), finished, total) {
                sink.emit(QueueEvent::Eta {
                    remaining_secs: eta.as_secs(),
                    remaining: format_eta(eta),
                });
            }
        }

        // A stop after the last task finished leaves nothing interrupted
        let interrupted = reports
            .iter()
            .any(|r| matches!(r.outcome, TaskOutcome::Cancelled | TaskOutcome::NotRun));
        self.state = if interrupted {
            QueueState::Stopped
        } else {
            QueueState::Completed
        };

        let summary = QueueSummary {
            state: self.state,
            reports,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            "Queue {}: {} succeeded, {} failed, {} cancelled, {} not run",
            if self.state == QueueState::Stopped { "stopped" } else { "completed" },
            summary.count(TaskOutcome::Succeeded),
            summary.count(TaskOutcome::Failed),
            summary.count(TaskOutcome::Cancelled),
            summary.count(TaskOutcome::NotRun),
        );
        sink.emit(QueueEvent::QueueFinished {
            summary: summary.clone(),
        });
        summary
    }

    fn set_state(&self, task: &mut FileTask, state: TaskState, sink: &mut dyn ProgressSink) {
        task.state = state;
        sink.emit(QueueEvent::TaskStage {
            index: task.index,
            state,
        });
    }

    /// Run one task to its report. Nothing escapes this boundary.
    fn run_task(&self, task: &mut FileTask, sink: &mut dyn ProgressSink) -> TaskReport {
        let started = Instant::now();
        let mut report = TaskReport::not_run(task);

        // Preconditions fail fast, before any file is touched
        let precheck = self
            .encoder
            .as_ref()
            .ok_or(TaskError::EncoderNotFound)
            .and_then(|encoder| {
                if task.source_path.is_file() {
                    Ok(encoder)
                } else {
                    Err(TaskError::SourceMissing(task.source_path.clone()))
                }
            })
            .and_then(|encoder| {
                fs::create_dir_all(&task.paths.work_dir)
                    .map(|()| encoder)
                    .map_err(|source| TaskError::WorkDir {
                        path: task.paths.work_dir.clone(),
                        source,
                    })
            })
            .and_then(|encoder| {
                TaskLog::open(&task.paths.log)
                    .map(|log| (encoder, log))
                    .map_err(TaskError::Log)
            });
        let (encoder, mut log) = match precheck {
            Ok(ready) => ready,
            Err(e) => {
                warn!("{}: {}", task.source_path.display(), e);
                self.set_state(task, TaskState::Failed, sink);
                report.outcome = TaskOutcome::Failed;
                report.failure = Some(e.to_string());
                report.elapsed_secs = started.elapsed().as_secs_f64();
                return report;
            }
        };

        self.set_state(task, TaskState::LoggingStarted, sink);
        log.info(&format!("Processing {}", task.source_path.display()));
        log.info(&format!("Settings: {}", describe_settings(&self.config)));

        let result = self.encode(task, encoder, &mut log, sink);
        report.errors = task.errors.clone();

        match result {
            Ok(()) => {
                report.output = Some(self.finish_success(task, &mut log, &mut report.warnings));
                report.outcome = TaskOutcome::Succeeded;
                log.info("Completed successfully");
                self.set_state(task, TaskState::Succeeded, sink);
            }
            Err(e) => {
                report.outcome = match e {
                    TaskError::Cancelled => TaskOutcome::Cancelled,
                    _ => TaskOutcome::Failed,
                };
                log.error(&e.to_string());
                warn!("{}: {}", task.source_path.display(), e);
                report.failure = Some(e.to_string());
                match preserve_failed_output(&task.paths.output, &task.paths.error) {
                    Ok(Some(path)) => {
                        log.info(&format!("Partial output kept as {}", path.display()));
                        report.output = Some(path);
                    }
                    Ok(None) => {}
                    Err(e) => report.warnings.push(e.to_string()),
                }
                self.set_state(task, TaskState::Failed, sink);
            }
        }

        let keep = report.outcome == TaskOutcome::Cancelled && self.config.output.keep_artifacts_on_stop;
        if keep {
            log.info("Keeping intermediate files for inspection");
        } else {
            report.warnings.extend(cleanup_transient(&task.paths));
        }
        self.set_state(task, TaskState::CleanedUp, sink);

        for warning in &report.warnings {
            log.warn(warning);
            warn!("{}: {}", task.source_path.display(), warning);
        }
        if let Err(e) = log.close() {
            report
                .warnings
                .push(format!("could not flush {}: {}", task.paths.log.display(), e));
        }

        report.elapsed_secs = started.elapsed().as_secs_f64();
        report
    }

    /// Pre-transcode, script and main encode, in order
    fn encode(
        &self,
        task: &mut FileTask,
        encoder: &EncoderBinary,
        log: &mut TaskLog,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), TaskError> {
        let plan = self.plan(task);

        if let Some(args) = &plan.pre_transcode {
            self.set_state(task, TaskState::PreTranscoding, sink);
            self.run_stage("pre-transcode", &encoder.invocation(args), task, log, sink)?;
        }

        if let Some(script) = &plan.script {
            write_script(&script.path, &script.contents).map_err(TaskError::Script)?;
            log.info(&format!("Wrote frame-server script {}", script.path.display()));
            self.set_state(task, TaskState::ScriptGenerated, sink);
        }

        self.set_state(task, TaskState::Encoding, sink);
        self.run_stage("encode", &encoder.invocation(&plan.main), task, log, sink)
    }

    fn run_stage(
        &self,
        stage: &'static str,
        invocation: &Invocation,
        task: &mut FileTask,
        log: &mut TaskLog,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), TaskError> {
        log.info(&format!("Command: {}", invocation.command_line()));

        let mut observer = TaskObserver {
            index: task.index,
            sink: &mut *sink,
            log: &mut *log,
        };
        let result = self.supervisor.run(invocation, &mut observer)?;
        task.errors.extend(result.error_lines.iter().cloned());
        match result.exit_code {
            Some(code) => log.info(&format!("Process completed with return code {}", code)),
            None => log.warn("Process ended without a return code"),
        }

        if result.cancelled {
            return Err(TaskError::Cancelled);
        }
        if !result.success() {
            return Err(TaskError::EncoderFailed {
                stage,
                exit_code: result.exit_code,
            });
        }
        log.info(&format!("{} finished", stage));
        Ok(())
    }

    /// Replace the original or carry its timestamps over. Never fails the task.
    ///
    /// # Returns
    /// Where the encoded file ended up
    fn finish_success(&self, task: &FileTask, log: &mut TaskLog, warnings: &mut Vec<String>) -> PathBuf {
        let paths = &task.paths;

        if self.config.output.replace_original {
            return match replace_original(&paths.source, &paths.output) {
                Ok((backup, times)) => {
                    log.info(&format!("Replaced original, backup at {}", backup.display()));
                    if let Some(times) = times {
                        if let Err(e) = times.apply(&paths.source) {
                            warnings.push(e.to_string());
                        }
                    }
                    paths.source.clone()
                }
                Err(e) => {
                    warnings.push(e.to_string());
                    paths.output.clone()
                }
            };
        }

        if self.config.output.preserve_timestamps {
            if let Err(e) = copy_times(&paths.source, &paths.output) {
                warnings.push(e.to_string());
            }
        }
        paths.output.clone()
    }
}

fn copy_times(from: &Path, to: &Path) -> Result<(), ReplaceError> {
    SourceTimes::capture(from)?.apply(to)
}
