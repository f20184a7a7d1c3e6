//! Output naming and artifact tracking.
//!
//! Every path a task can create is a pure function of the source path and the
//! configuration, so cleanup can always recompute what to delete without any
//! persisted state.

use crate::config::Config;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Extension of the raw pre-transcode intermediate.
pub const TRANSCODE_SUFFIX: &str = ".trans.avi";
/// Extension of the generated frame-server script.
pub const SCRIPT_EXTENSION: &str = "avs";
/// Suffix FFMS2 appends to the file it indexes.
pub const INDEX_SUFFIX: &str = ".ffindex";
/// Suffix given to partial output of a failed task.
pub const ERROR_SUFFIX: &str = ".error";
/// Suffix of the backup made before replacing an original.
pub const BACKUP_SUFFIX: &str = ".old";

/// All paths derived for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub source: PathBuf,
    /// Directory that receives the output and the transient files
    pub work_dir: PathBuf,
    pub output: PathBuf,
    pub transcode: PathBuf,
    pub script: PathBuf,
    pub source_index: PathBuf,
    pub transcode_index: PathBuf,
    pub error: PathBuf,
    pub log: PathBuf,
}

/// Human-readable fingerprint of the settings that shape the output.
///
/// `{crf}{video}_{audio}{kbps}`, e.g. `23libx265_aac256`.
pub fn settings_fingerprint(cfg: &Config) -> String {
    format!(
        "{}{}_{}{}",
        cfg.video.crf, cfg.video.codec, cfg.audio.codec, cfg.audio.bitrate_kbps
    )
}

/// Append a suffix to a full path without touching its existing extension.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn stem_with(base: &OsStr, tail: &str) -> OsString {
    let mut name = base.to_owned();
    name.push(tail);
    name
}

impl ArtifactPaths {
    /// Derive every artifact path for `source` under `cfg`.
    pub fn derive(source: &Path, cfg: &Config) -> Self {
        let base = source.file_stem().unwrap_or_else(|| OsStr::new("output"));
        let file_name = source.file_name().unwrap_or(base);
        let source_dir = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let work_dir = cfg.output.directory.clone().unwrap_or(source_dir);

        let output_name = stem_with(
            base,
            &format!(
                "_{}.{}",
                settings_fingerprint(cfg),
                cfg.output.container.extension()
            ),
        );
        let transcode = work_dir.join(stem_with(base, TRANSCODE_SUFFIX));

        Self {
            source: source.to_path_buf(),
            output: work_dir.join(output_name),
            transcode_index: with_suffix(&transcode, INDEX_SUFFIX),
            transcode,
            script: work_dir.join(stem_with(base, &format!(".{}", SCRIPT_EXTENSION))),
            source_index: with_suffix(source, INDEX_SUFFIX),
            error: work_dir.join(stem_with(file_name, ERROR_SUFFIX)),
            log: work_dir.join(stem_with(base, ".log")),
            work_dir,
        }
    }

    /// Files the pipeline may create that are never kept after a task.
    pub fn transient(&self) -> [&Path; 4] {
        [
            &self.transcode,
            &self.script,
            &self.source_index,
            &self.transcode_index,
        ]
    }

    /// Backup path used when the original is replaced.
    pub fn backup(&self) -> PathBuf {
        with_suffix(&self.source, BACKUP_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioCodec, Container, VideoCodec};
    use proptest::prelude::*;

    fn scenario_config() -> Config {
        let mut cfg = Config::default();
        cfg.video.codec = VideoCodec::Libx265;
        cfg.audio.codec = AudioCodec::Aac;
        cfg.video.crf = 23;
        cfg.audio.bitrate_kbps = 256;
        cfg.output.container = Container::Mkv;
        cfg
    }

    #[test]
    fn test_concrete_output_name() {
        let paths = ArtifactPaths::derive(Path::new("/videos/clip.avi"), &scenario_config());
        assert_eq!(paths.output, PathBuf::from("/videos/clip_23libx265_aac256.mkv"));
    }

    #[test]
    fn test_transient_paths() {
        let paths = ArtifactPaths::derive(Path::new("/videos/clip.avi"), &scenario_config());

        assert_eq!(paths.transcode, PathBuf::from("/videos/clip.trans.avi"));
        assert_eq!(paths.script, PathBuf::from("/videos/clip.avs"));
        assert_eq!(paths.source_index, PathBuf::from("/videos/clip.avi.ffindex"));
        assert_eq!(paths.transcode_index, PathBuf::from("/videos/clip.trans.avi.ffindex"));
        assert_eq!(paths.error, PathBuf::from("/videos/clip.avi.error"));
        assert_eq!(paths.log, PathBuf::from("/videos/clip.log"));
        assert_eq!(paths.backup(), PathBuf::from("/videos/clip.avi.old"));
    }

    #[test]
    fn test_output_directory_moves_work_files_but_not_source_index() {
        let mut cfg = scenario_config();
        cfg.output.directory = Some(PathBuf::from("/out"));
        let paths = ArtifactPaths::derive(Path::new("/videos/clip.avi"), &cfg);

        assert_eq!(paths.output, PathBuf::from("/out/clip_23libx265_aac256.mkv"));
        assert_eq!(paths.script, PathBuf::from("/out/clip.avs"));
        assert_eq!(paths.source_index, PathBuf::from("/videos/clip.avi.ffindex"));
    }

    #[test]
    fn test_names_with_spaces_and_dots() {
        let paths = ArtifactPaths::derive(
            Path::new("/my videos/holiday 2019.part1.mp4"),
            &scenario_config(),
        );
        assert_eq!(
            paths.output,
            PathBuf::from("/my videos/holiday 2019.part1_23libx265_aac256.mkv")
        );
    }

    #[test]
    fn test_distinct_settings_never_collide() {
        let source = Path::new("/videos/clip.avi");
        let a = ArtifactPaths::derive(source, &scenario_config());
        let mut cfg = scenario_config();
        cfg.video.crf = 24;
        let b = ArtifactPaths::derive(source, &cfg);
        assert_ne!(a.output, b.output);
    }

    // **Feature: videer, Property: Cleanup determinism**
    //
    // *For any* source name and settings, deriving the paths twice SHALL give
    // the same transient set, so cleanup needs no stored state.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_artifact_paths_are_recomputable(
            name in "[a-zA-Z0-9 _.-]{1,30}",
            crf in 0u8..=51,
            kbps in 1u32..1024,
        ) {
            let source = PathBuf::from("/media").join(format!("{}.mkv", name));
            let mut cfg = scenario_config();
            cfg.video.crf = crf;
            cfg.audio.bitrate_kbps = kbps;

            let first = ArtifactPaths::derive(&source, &cfg);
            let second = ArtifactPaths::derive(&source, &cfg.clone());

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.transient(), second.transient());
            prop_assert!(first.output != source);
        }
    }
}
