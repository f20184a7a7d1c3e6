//! CLI entry point for videer
//!
//! Builds the configuration snapshot, runs startup checks and drives the
//! queue, printing progress as text or JSON lines.

use clap::Parser;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use videer::command::render_command_line;
use videer::config::{AudioCodec, Container, EncoderPreset, VideoCodec, MAX_CRF};
use videer::{
    collect_inputs, run_startup_checks, Config, QualityProfile, QueueEvent, QueueRunner, TaskOutcome,
};

/// videer - batch video transcoding with ffmpeg and an optional frame server
#[derive(Parser, Debug)]
#[command(name = "videer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Files (or directories, with --recursive) to transcode
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Path to a configuration file (config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Quality profile applied before individual overrides: web, hq, archive
    #[arg(long)]
    profile: Option<QualityProfile>,

    /// Video codec, e.g. libx265 or hevc_nvenc
    #[arg(long)]
    video_codec: Option<VideoCodec>,

    /// Audio codec, e.g. aac or flac
    #[arg(long)]
    audio_codec: Option<AudioCodec>,

    /// Constant rate factor (CQ for NVENC)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=MAX_CRF as i64))]
    crf: Option<u8>,

    /// Audio bitrate in kbps
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    abr: Option<u32>,

    /// Encoder preset, ultrafast .. veryslow
    #[arg(long)]
    preset: Option<EncoderPreset>,

    /// Output container: mkv, mp4, avi, mov, webm
    #[arg(long)]
    container: Option<Container>,

    /// Serve the input through a generated frame-server script
    #[arg(long)]
    frame_server: bool,

    /// Use the FFMS2 source filters instead of AVISource
    #[arg(long)]
    alternate_source: bool,

    /// Deinterlace with QTGMC (requires --frame-server)
    #[arg(long)]
    deinterlace: bool,

    /// Source is top field first
    #[arg(long)]
    top_field_first: bool,

    /// Halve the frame rate after deinterlacing
    #[arg(long)]
    halve_frame_rate: bool,

    /// Add the deshake filter
    #[arg(long)]
    stabilize: bool,

    /// Add the h264_mp4toannexb bitstream filter
    #[arg(long)]
    fix_corrupt_stream: bool,

    /// Downmix audio to two channels
    #[arg(long)]
    downmix_stereo: bool,

    /// Decode video to a raw intermediate first
    #[arg(long)]
    pre_transcode_video: bool,

    /// Decode audio to a raw intermediate first
    #[arg(long)]
    pre_transcode_audio: bool,

    /// Replace each original with its encode, keeping `<name>.old`
    #[arg(long)]
    replace_original: bool,

    /// Path to the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Directory for outputs and intermediates (default: next to each source)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Walk directories given as inputs
    #[arg(short, long)]
    recursive: bool,

    /// Print queue events as JSON lines
    #[arg(long)]
    json: bool,

    /// Print the commands and scripts without running anything
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Configuration snapshot: file (or defaults) + env, then profile, then flags
    fn build_config(&self) -> Result<Config, String> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)
                .map_err(|e| format!("Failed to load {}: {}", path.display(), e))?,
            None => {
                let mut cfg = Config::default();
                cfg.apply_env_overrides();
                cfg
            }
        };

        if let Some(profile) = self.profile {
            profile.apply(&mut cfg);
        }

        if let Some(codec) = self.video_codec {
            cfg.video.codec = codec;
        }
        if let Some(codec) = self.audio_codec {
            cfg.audio.codec = codec;
        }
        if let Some(crf) = self.crf {
            cfg.video.crf = crf;
        }
        if let Some(abr) = self.abr {
            cfg.audio.bitrate_kbps = abr;
        }
        if let Some(preset) = self.preset {
            cfg.video.preset = preset;
        }
        if let Some(container) = self.container {
            cfg.output.container = container;
        }

        // Flags only switch features on; the file decides otherwise
        cfg.frame_server.enabled |= self.frame_server;
        cfg.frame_server.alternate_source |= self.alternate_source;
        cfg.frame_server.deinterlace |= self.deinterlace;
        cfg.frame_server.top_field_first |= self.top_field_first;
        cfg.frame_server.halve_frame_rate |= self.halve_frame_rate;
        cfg.video.stabilize |= self.stabilize;
        cfg.video.fix_corrupt_stream |= self.fix_corrupt_stream;
        cfg.audio.downmix_stereo |= self.downmix_stereo;
        cfg.preprocess.video |= self.pre_transcode_video;
        cfg.preprocess.audio |= self.pre_transcode_audio;
        cfg.output.replace_original |= self.replace_original;

        if let Some(ffmpeg) = &self.ffmpeg {
            cfg.encoder.path = Some(ffmpeg.clone());
        }
        if let Some(dir) = &self.output_dir {
            cfg.output.directory = Some(dir.clone());
        }

        cfg.validate().map_err(|e| e.to_string())?;
        Ok(cfg)
    }
}

/// Human-readable rendering of one event
fn print_event(event: &QueueEvent) {
    match event {
        QueueEvent::QueueStarted { total } => println!("Queue: {} file(s)", total),
        QueueEvent::DirectoryChanged { directory } => {
            println!("Directory: {}", directory.display())
        }
        QueueEvent::TaskStarted {
            index,
            total,
            source,
        } => println!("[{}/{}] {}", index + 1, total, source.display()),
        QueueEvent::TaskStage { index, state } => debug!("task {} -> {}", index, state.as_str()),
        QueueEvent::Progress {
            percent, status, ..
        } => match percent {
            Some(pct) => eprint!("\r  {:>3}%  {}", pct, status),
            None => eprint!("\r  {}", status),
        },
        QueueEvent::Line { line, .. } => debug!("{}", line),
        QueueEvent::QueueProgress {
            finished,
            total,
            percent,
        } => println!("Overall: {}/{} ({}%)", finished, total, percent),
        QueueEvent::Eta { remaining, .. } => println!("Remaining: {}", remaining),
        QueueEvent::TaskFinished { report } => {
            eprintln!();
            match report.outcome {
                TaskOutcome::Succeeded => match &report.output {
                    Some(output) => println!("  done -> {}", output.display()),
                    None => println!("  done"),
                },
                TaskOutcome::Cancelled => println!("  cancelled"),
                TaskOutcome::Failed | TaskOutcome::NotRun => println!(
                    "  FAILED: {}",
                    report.failure.as_deref().unwrap_or("unknown error")
                ),
            }
            for line in &report.errors {
                println!("  ! {}", line);
            }
            for warning in &report.warnings {
                println!("  warning: {}", warning);
            }
        }
        QueueEvent::QueueFinished { summary } => println!(
            "Finished in {:.0}s: {} succeeded, {} failed, {} cancelled, {} not run",
            summary.elapsed_secs,
            summary.count(TaskOutcome::Succeeded),
            summary.count(TaskOutcome::Failed),
            summary.count(TaskOutcome::Cancelled),
            summary.count(TaskOutcome::NotRun),
        ),
    }
}

fn print_json(event: &QueueEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Failed to serialize event: {}", e),
    }
}

/// Print what each task would run
fn dry_run(runner: &QueueRunner, inputs: &[PathBuf]) {
    let encoder = runner.encoder();
    for task in runner.tasks(inputs) {
        println!("# {}", task.source_path.display());
        let plan = runner.plan(&task);
        let render = |args: &videer::ArgList| match encoder {
            Some(binary) => binary.invocation(args).command_line(),
            None => render_command_line(std::path::Path::new("ffmpeg"), args),
        };
        if let Some(args) = &plan.pre_transcode {
            println!("{}", render(args));
        }
        if let Some(script) = &plan.script {
            println!("# {}", script.path.display());
            print!("{}", script.contents);
        }
        println!("{}", render(&plan.main));
        println!();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = match args.build_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let inputs = collect_inputs(&args.inputs, args.recursive);
    if inputs.is_empty() {
        error!("No input files");
        return ExitCode::FAILURE;
    }

    let startup = run_startup_checks(&cfg);
    let runner = QueueRunner::new(&cfg, &startup);

    if args.dry_run {
        dry_run(&runner, &inputs);
        return ExitCode::SUCCESS;
    }

    // Ctrl-C stops the queue and kills the running encode
    let stop = runner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping queue");
            if let Err(e) = tokio::task::spawn_blocking(move || stop.request_stop()).await {
                error!("Stop request failed: {}", e);
            }
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = runner.spawn(inputs, tx);

    while let Some(event) = rx.recv().await {
        if args.json {
            print_json(&event);
        } else {
            print_event(&event);
        }
    }

    match worker.await {
        Ok(summary) => {
            info!("Exit code {}", summary.exit_code());
            ExitCode::from(summary.exit_code())
        }
        Err(e) => {
            error!("Queue worker panicked: {}", e);
            ExitCode::FAILURE
        }
    }
}
