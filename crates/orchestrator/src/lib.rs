//! videer
//!
//! Batch transcode orchestrator: builds ffmpeg invocations and frame-server
//! scripts for a queue of files, supervises each encode, and manages the
//! artifacts every task leaves behind.

pub mod command;
pub mod concurrency;
pub mod frameserver;
pub mod naming;
pub mod process_tree;
pub mod progress;
pub mod queue;
pub mod replace;
pub mod scan;
pub mod startup;
pub mod status;
pub mod supervisor;
pub mod task;
pub mod task_log;

pub use videer_config as config;
pub use videer_config::{Config, QualityProfile};
pub use command::{build_main_args, build_pre_transcode_args, plan_encode, ArgList, EncodePlan};
pub use concurrency::ConcurrencyPlan;
pub use frameserver::generate_script;
pub use naming::ArtifactPaths;
pub use queue::{ProgressSink, QueueEvent, QueueRunner, QueueState, QueueSummary};
pub use scan::collect_inputs;
pub use startup::{run_startup_checks, EncoderBinary, StartupError, StartupReport};
pub use supervisor::{Invocation, ProcessResult, ProcessSupervisor, StopHandle, SupervisorError};
pub use task::{FileTask, TaskError, TaskOutcome, TaskReport, TaskState};
