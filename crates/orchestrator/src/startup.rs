//! Startup checks for videer
//!
//! Locates the encoder binary, detects its version and resolves the
//! frame-server plugin directory. Nothing here aborts startup: a missing
//! encoder is a warning, and every task then fails fast on its own.

use crate::command::ArgList;
use crate::config::{Config, EncoderConfig};
use crate::frameserver::missing_plugins;
use crate::supervisor::Invocation;
use log::{info, warn};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Encoder program name, without platform suffix
pub const ENCODER_NAME: &str = "ffmpeg";

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg version could not be determined: {0}")]
    FfmpegVersion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The encoder to run, possibly behind a launcher such as `nice -n 10`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderBinary {
    /// The encoder itself
    pub path: PathBuf,
    /// Program actually executed (the launcher, or the encoder)
    pub program: PathBuf,
    /// Arguments placed before the encoder's own arguments
    pub leading_args: Vec<OsString>,
}

impl EncoderBinary {
    /// Run `path` directly, or through `launcher` when it is non-empty
    pub fn new(path: PathBuf, launcher: &[String]) -> Self {
        match launcher.split_first() {
            Some((program, rest)) => {
                let mut leading_args: Vec<OsString> = rest.iter().map(OsString::from).collect();
                leading_args.push(path.clone().into_os_string());
                Self {
                    path,
                    program: PathBuf::from(program),
                    leading_args,
                }
            }
            None => Self {
                program: path.clone(),
                path,
                leading_args: Vec::new(),
            },
        }
    }

    /// Locate the encoder named by the configuration
    pub fn from_config(cfg: &EncoderConfig) -> Option<Self> {
        locate_encoder(cfg.path.as_deref()).map(|path| Self::new(path, &cfg.launcher))
    }

    /// Full invocation for one argument list
    pub fn invocation(&self, args: &ArgList) -> Invocation {
        Invocation::new(
            &self.program,
            self.leading_args.iter().chain(args.as_slice()).cloned(),
        )
    }
}

fn executable_name(name: &str) -> String {
    format!("{}{}", name, env::consts::EXE_SUFFIX)
}

/// Resolve a program name against PATH
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    let file_name = executable_name(name);
    env::split_paths(&path_var)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

/// Directory holding the running executable
fn application_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Find the encoder binary
///
/// Search order:
/// 1. The explicit path, if configured (a bare name is looked up on PATH)
/// 2. PATH
/// 3. The application directory
/// 4. `bin/` below the application directory
pub fn locate_encoder(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        if path.components().count() == 1 {
            if let Some(found) = path.to_str().and_then(find_in_path) {
                return Some(found);
            }
        }
        warn!("Configured encoder {} does not exist", path.display());
        return None;
    }

    if let Some(found) = find_in_path(ENCODER_NAME) {
        return Some(found);
    }

    let app_dir = application_dir()?;
    let file_name = executable_name(ENCODER_NAME);
    [app_dir.join(&file_name), app_dir.join("bin").join(&file_name)]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

/// Frame-server plugin directory: configured, or `plugins/` next to the executable
pub fn resolve_plugin_dir(cfg: &Config) -> PathBuf {
    if let Some(dir) = &cfg.frame_server.plugin_dir {
        return dir.clone();
    }
    application_dir()
        .map(|dir| dir.join("plugins"))
        .unwrap_or_else(|| PathBuf::from("plugins"))
}

/// Extract the major version from `ffmpeg -version` output
///
/// Handles both release (`ffmpeg version 6.1.1`) and git
/// (`ffmpeg version n8.0-12-gabc`) builds.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;
    let mut words = line.split_whitespace();
    words.find(|w| w.eq_ignore_ascii_case("version"))?;
    let token = words.next()?.trim_start_matches(['n', 'N']);
    token
        .split(['.', '-'])
        .next()
        .and_then(|major| major.parse().ok())
}

/// Run `<encoder> -version` and parse the major version
pub fn detect_encoder_version(encoder: &EncoderBinary) -> Result<u32, StartupError> {
    let output = Command::new(&encoder.program)
        .args(&encoder.leading_args)
        .arg("-version")
        .stdin(Stdio::null())
        .output()?;

    if !output.status.success() {
        return Err(StartupError::FfmpegVersion(format!(
            "{} -version exited with {}",
            encoder.path.display(),
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffmpeg_version(&stdout).ok_or_else(|| {
        StartupError::FfmpegVersion(format!(
            "unrecognised output: {}",
            stdout.lines().next().unwrap_or("(empty)")
        ))
    })
}

/// What startup found
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub encoder: Option<EncoderBinary>,
    pub encoder_version: Option<u32>,
    pub plugin_dir: PathBuf,
    pub warnings: Vec<String>,
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. Configuration warnings
/// 2. Encoder lookup and version detection
/// 3. Frame-server plugins, when the frame server is enabled
pub fn run_startup_checks(cfg: &Config) -> StartupReport {
    let mut warnings = cfg.warnings();

    let encoder = EncoderBinary::from_config(&cfg.encoder);
    let mut encoder_version = None;
    match &encoder {
        Some(binary) => match detect_encoder_version(binary) {
            Ok(major) => {
                info!("Using {} (major version {})", binary.path.display(), major);
                encoder_version = Some(major);
            }
            Err(e) => warnings.push(e.to_string()),
        },
        None => warnings.push(format!(
            "{} not found on PATH, next to the executable, or in bin/; every task will fail",
            ENCODER_NAME
        )),
    }

    let plugin_dir = resolve_plugin_dir(cfg);
    if cfg.frame_server.enabled {
        for missing in missing_plugins(&plugin_dir) {
            warnings.push(format!("frame-server plugin missing: {}", missing.display()));
        }
    }

    for warning in &warnings {
        warn!("{}", warning);
    }

    StartupReport {
        encoder,
        encoder_version,
        plugin_dir,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_launcher_prefix_wraps_encoder() {
        let binary = EncoderBinary::new(
            PathBuf::from("/usr/bin/ffmpeg"),
            &["nice".to_string(), "-n".to_string(), "10".to_string()],
        );
        let mut args = ArgList::new();
        args.opt("-i", "in.avi").arg("out.mkv");

        let invocation = binary.invocation(&args);

        assert_eq!(invocation.program, PathBuf::from("nice"));
        assert_eq!(
            invocation.args,
            vec!["-n", "10", "/usr/bin/ffmpeg", "-i", "in.avi", "out.mkv"]
                .into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_no_launcher_runs_encoder_directly() {
        let binary = EncoderBinary::new(PathBuf::from("/opt/ffmpeg"), &[]);
        assert_eq!(binary.program, PathBuf::from("/opt/ffmpeg"));
        assert!(binary.leading_args.is_empty());
    }

    #[test]
    fn test_explicit_encoder_path() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join("my-ffmpeg");
        std::fs::write(&fake, b"").unwrap();

        assert_eq!(locate_encoder(Some(&fake)), Some(fake.clone()));
        assert_eq!(locate_encoder(Some(&dir.path().join("absent"))), None);
    }

    #[test]
    fn test_explicit_configured_plugin_dir() {
        let mut cfg = Config::default();
        cfg.frame_server.plugin_dir = Some(PathBuf::from("/opt/avs"));
        assert_eq!(resolve_plugin_dir(&cfg), PathBuf::from("/opt/avs"));
    }

    #[test]
    fn test_missing_encoder_is_warning_not_error() {
        let mut cfg = Config::default();
        cfg.encoder.path = Some(PathBuf::from("/nonexistent/dir/ffmpeg"));

        let report = run_startup_checks(&cfg);

        assert!(report.encoder.is_none());
        assert!(report.warnings.iter().any(|w| w.contains("not found")));
    }

    #[cfg(unix)]
    #[test]
    fn test_detect_version_through_launcher() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("fake-ffmpeg.sh");
        std::fs::write(
            &script,
            "echo 'ffmpeg version 7.1 Copyright (c) 2000-2024 the FFmpeg developers'\n",
        )
        .unwrap();
        let binary = EncoderBinary::new(script, &["/bin/sh".to_string()]);

        assert_eq!(detect_encoder_version(&binary).unwrap(), 7);
    }

    #[test]
    fn test_parse_garbage_version() {
        assert_eq!(parse_ffmpeg_version("not an encoder"), None);
        assert_eq!(parse_ffmpeg_version("ffmpeg version git-2024"), None);
    }

    // **Feature: videer, Property: FFmpeg version parsing**
    //
    // *For any* release or git-style version string, the parser SHALL return
    // the major version.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let version_output = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers\nbuilt with gcc 12.2.0",
                major, minor, patch
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }

        #[test]
        fn prop_ffmpeg_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let version_output = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024",
                major, minor, git_hash
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }
    }
}
