//! Command builder for the ffmpeg invocations of one task
//!
//! Builds argument vectors as typed token lists. Nothing here is ever joined
//! into a shell string for execution; `render_command_line` exists only for
//! the audit log.

use crate::config::{AudioCodec, Config, Container, EncoderPreset, VideoCodec};
use crate::frameserver::generate_script;
use crate::naming::ArtifactPaths;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Fixed identifying comment written into every output
pub const METADATA_COMMENT: &str = "comment=Made with videer";

/// Decoder error detection applied to every invocation
const ERR_DETECT: &str = "crccheck+bitstream+buffer";

/// Ordered list of encoder argument tokens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgList(Vec<OsString>);

impl ArgList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single token
    pub fn arg<S: AsRef<OsStr>>(&mut self, token: S) -> &mut Self {
        self.0.push(token.as_ref().to_owned());
        self
    }

    /// Append a flag followed by its value
    pub fn opt<V: AsRef<OsStr>>(&mut self, flag: &str, value: V) -> &mut Self {
        self.arg(flag).arg(value)
    }

    pub fn as_slice(&self) -> &[OsString] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lossy string view, for tests and logging
    pub fn to_strings(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl<'a> IntoIterator for &'a ArgList {
    type Item = &'a OsString;
    type IntoIter = std::slice::Iter<'a, OsString>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Quality flag for a video codec, if it takes one
///
/// NVENC uses constant quality, the software long-GOP encoders use CRF.
/// ProRes and rawvideo have no rate factor; stream copy never encodes.
pub fn quality_flag(codec: VideoCodec) -> Option<&'static str> {
    match codec {
        VideoCodec::H264Nvenc | VideoCodec::HevcNvenc => Some("-cq"),
        VideoCodec::Libx264 | VideoCodec::Libx265 => Some("-crf"),
        VideoCodec::ProresKs | VideoCodec::Rawvideo | VideoCodec::Copy => None,
    }
}

/// Whether the audio codec is given `-b:a`
pub fn audio_takes_bitrate(codec: AudioCodec) -> bool {
    codec != AudioCodec::Copy && !codec.is_lossless()
}

/// `-preset` value for a codec, if it has speed presets
///
/// NVENC only knows p1 (fastest) .. p7 (slowest).
pub fn preset_value(codec: VideoCodec, preset: EncoderPreset) -> Option<&'static str> {
    match codec {
        VideoCodec::Libx264 | VideoCodec::Libx265 => Some(preset.as_str()),
        VideoCodec::H264Nvenc | VideoCodec::HevcNvenc => Some(match preset {
            EncoderPreset::Ultrafast => "p1",
            EncoderPreset::Superfast => "p2",
            EncoderPreset::Veryfast | EncoderPreset::Faster => "p3",
            EncoderPreset::Fast => "p4",
            EncoderPreset::Medium => "p5",
            EncoderPreset::Slow => "p6",
            EncoderPreset::Slower | EncoderPreset::Veryslow => "p7",
        }),
        VideoCodec::ProresKs | VideoCodec::Rawvideo | VideoCodec::Copy => None,
    }
}

fn uses_gop_tuning(codec: VideoCodec) -> bool {
    matches!(
        codec,
        VideoCodec::Libx264 | VideoCodec::Libx265 | VideoCodec::H264Nvenc | VideoCodec::HevcNvenc
    )
}

/// Summary written into the description metadata
pub fn describe_settings(cfg: &Config) -> String {
    let video = match (cfg.video.codec, quality_flag(cfg.video.codec)) {
        (VideoCodec::Copy, _) => "video copy".to_string(),
        (codec, Some(flag)) => format!(
            "{} {} {} {}",
            codec,
            cfg.video.preset,
            flag.trim_start_matches('-'),
            cfg.video.crf
        ),
        (codec, None) => codec.to_string(),
    };
    let audio = if audio_takes_bitrate(cfg.audio.codec) {
        format!("{} {}k", cfg.audio.codec, cfg.audio.bitrate_kbps)
    } else if cfg.audio.codec == AudioCodec::Copy {
        "audio copy".to_string()
    } else {
        cfg.audio.codec.to_string()
    };
    format!("{}, {}", video, audio)
}

fn common_prefix(args: &mut ArgList) {
    args.opt("-err_detect", ERR_DETECT).arg("-hide_banner").arg("-y");
}

fn stream_mapping(args: &mut ArgList) {
    args.opt("-map", "0:v").opt("-map", "0:a?").opt("-map", "0:s?");
}

/// Arguments for the raw intermediate pass
///
/// Video is decoded to rawvideo and/or audio to pcm_s32le; the other stream
/// is copied. No bitstream filter is ever applied here.
pub fn build_pre_transcode_args(paths: &ArtifactPaths, cfg: &Config) -> ArgList {
    let mut args = ArgList::new();
    common_prefix(&mut args);
    args.opt("-i", &paths.source);
    stream_mapping(&mut args);

    let vcodec = if cfg.preprocess.video { "rawvideo" } else { "copy" };
    let acodec = if cfg.preprocess.audio { "pcm_s32le" } else { "copy" };
    args.opt("-c:v", vcodec).opt("-c:a", acodec).opt("-c:s", "copy");

    args.opt("-f", Container::Avi.muxer());
    args.arg(&paths.transcode);
    args
}

/// Arguments for the main encode reading from `input`
pub fn build_main_args(input: &Path, output: &Path, cfg: &Config) -> ArgList {
    let vcodec = cfg.video.codec;
    let acodec = cfg.audio.codec;
    let mut args = ArgList::new();

    common_prefix(&mut args);
    if vcodec.is_nvenc() {
        args.opt("-hwaccel", "cuda");
    }
    args.opt("-i", input);

    stream_mapping(&mut args);

    // Video
    args.opt("-c:v", vcodec.as_str());
    if let Some(preset) = preset_value(vcodec, cfg.video.preset) {
        args.opt("-preset", preset);
    }
    if let Some(flag) = quality_flag(vcodec) {
        args.opt(flag, cfg.video.crf.to_string());
    }
    if vcodec != VideoCodec::Copy {
        let mut filters: Vec<&str> = cfg
            .video
            .filters
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect();
        if cfg.video.stabilize {
            filters.push("deshake");
        }
        if !filters.is_empty() {
            args.opt("-vf", filters.join(","));
        }
    }

    // Audio
    args.opt("-c:a", acodec.as_str());
    if audio_takes_bitrate(acodec) {
        args.opt("-b:a", format!("{}k", cfg.audio.bitrate_kbps));
    }
    if cfg.audio.downmix_stereo && acodec != AudioCodec::Copy {
        args.opt("-ac", "2");
    }

    // Subtitles are always copied
    args.opt("-c:s", "copy");

    if cfg.video.fix_corrupt_stream {
        args.opt("-bsf:v", "h264_mp4toannexb");
    }

    args.opt("-map_metadata", "0").opt("-map_chapters", "0");
    args.opt("-metadata", METADATA_COMMENT);
    args.opt("-metadata", format!("description={}", describe_settings(cfg)));

    if uses_gop_tuning(vcodec) {
        args.opt("-bf", "2")
            .opt("-flags", "+cgop")
            .opt("-pix_fmt", "yuv420p");
    }

    for extra in cfg.encoder.extra_args.split_whitespace() {
        args.arg(extra);
    }

    if cfg.output.container == Container::Mp4 {
        args.opt("-movflags", "+faststart");
    }
    args.opt("-f", cfg.output.container.muxer());
    args.arg(output);
    args
}

/// Script that must exist on disk before the main encode runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    pub path: PathBuf,
    pub contents: String,
}

/// Everything needed to run one task, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodePlan {
    pub pre_transcode: Option<ArgList>,
    pub script: Option<ScriptRequest>,
    pub main: ArgList,
}

/// Plan the invocations for one task
///
/// # Arguments
/// * `paths` - Derived artifact paths for the task
/// * `cfg` - Configuration snapshot of the run
/// * `plugin_dir` - Frame-server plugin directory
/// * `threads` - Frame-server thread count
pub fn plan_encode(paths: &ArtifactPaths, cfg: &Config, plugin_dir: &Path, threads: u32) -> EncodePlan {
    // Step 1: optional raw intermediate
    let pre_transcode = cfg
        .preprocess
        .enabled()
        .then(|| build_pre_transcode_args(paths, cfg));
    let decoded_source: &Path = if pre_transcode.is_some() {
        &paths.transcode
    } else {
        &paths.source
    };

    // Step 2: optional script, which then becomes the encoder input
    let script = cfg.frame_server.enabled.then(|| ScriptRequest {
        path: paths.script.clone(),
        contents: generate_script(
            decoded_source,
            &cfg.frame_server,
            cfg.video.preset,
            plugin_dir,
            threads,
        ),
    });
    let input: &Path = match &script {
        Some(request) => &request.path,
        None => decoded_source,
    };

    // Step 3: main encode
    let main = build_main_args(input, &paths.output, cfg);

    EncodePlan {
        pre_transcode,
        script,
        main,
    }
}

/// Render a program and its arguments as one line for the audit log
///
/// Tokens containing whitespace are double-quoted unless they are already
/// quoted or start with `-`.
pub fn render_command_line<'a, I>(program: &Path, args: I) -> String
where
    I: IntoIterator<Item = &'a OsString>,
{
    let mut line = quote_token(&program.to_string_lossy());
    for arg in args {
        line.push(' ');
        line.push_str(&quote_token(&arg.to_string_lossy()));
    }
    line
}

fn quote_token(token: &str) -> String {
    if token.contains(char::is_whitespace) && !token.starts_with('"') && !token.starts_with('-') {
        format!("\"{}\"", token)
    } else {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use proptest::prelude::*;

    /// Helper to check if args contain a flag with a specific value
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    /// Helper to check if args contain a standalone flag
    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|arg| arg == flag)
    }

    fn position(args: &[String], token: &str) -> Option<usize> {
        args.iter().position(|a| a == token)
    }

    fn paths_for(source: &str, cfg: &Config) -> ArtifactPaths {
        ArtifactPaths::derive(Path::new(source), cfg)
    }

    fn main_args(cfg: &Config) -> Vec<String> {
        let paths = paths_for("/videos/clip.avi", cfg);
        build_main_args(&paths.source, &paths.output, cfg).to_strings()
    }

    fn video_codec_strategy() -> impl Strategy<Value = VideoCodec> {
        prop::sample::select(VideoCodec::ALL.to_vec())
    }

    fn audio_codec_strategy() -> impl Strategy<Value = AudioCodec> {
        prop::sample::select(AudioCodec::ALL.to_vec())
    }

    fn container_strategy() -> impl Strategy<Value = Container> {
        prop::sample::select(Container::ALL.to_vec())
    }

    prop_compose! {
        fn config_strategy()(
            vcodec in video_codec_strategy(),
            acodec in audio_codec_strategy(),
            container in container_strategy(),
            crf in 0u8..=51,
            kbps in 1u32..1024,
            flags in prop::collection::vec(proptest::bool::ANY, 8),
            extras in "[a-z0-9 ]{0,20}",
        ) -> Config {
            let mut cfg = Config::default();
            cfg.video.codec = vcodec;
            cfg.audio.codec = acodec;
            cfg.output.container = container;
            cfg.video.crf = crf;
            cfg.audio.bitrate_kbps = kbps;
            cfg.video.stabilize = flags[0];
            cfg.video.fix_corrupt_stream = flags[1];
            cfg.audio.downmix_stereo = flags[2];
            cfg.frame_server.enabled = flags[3];
            cfg.frame_server.deinterlace = flags[4];
            cfg.frame_server.alternate_source = flags[5];
            cfg.preprocess.video = flags[6];
            cfg.preprocess.audio = flags[7];
            cfg.encoder.extra_args = extras;
            cfg
        }
    }

    #[test]
    fn test_concrete_scenario_libx265_aac_mkv() {
        let mut cfg = Config::default();
        cfg.video.codec = VideoCodec::Libx265;
        cfg.audio.codec = AudioCodec::Aac;
        cfg.video.crf = 23;
        cfg.audio.bitrate_kbps = 256;
        cfg.output.container = Container::Mkv;

        let args = main_args(&cfg);

        assert!(has_flag_with_value(&args, "-c:v", "libx265"));
        assert!(has_flag_with_value(&args, "-crf", "23"));
        assert!(has_flag_with_value(&args, "-c:a", "aac"));
        assert!(has_flag_with_value(&args, "-b:a", "256k"));
        assert!(has_flag_with_value(&args, "-f", "matroska"));
        assert_eq!(
            args.last().map(String::as_str),
            Some("/videos/clip_23libx265_aac256.mkv")
        );
        assert!(!has_flag(&args, "-hwaccel"));
        assert!(!has_flag(&args, "-movflags"));
    }

    #[test]
    fn test_video_copy_has_no_quality_flag() {
        let mut cfg = Config::default();
        cfg.video.codec = VideoCodec::Copy;
        cfg.video.filters = vec!["scale=1280:-2".to_string()];
        cfg.video.stabilize = true;

        let args = main_args(&cfg);

        assert!(has_flag_with_value(&args, "-c:v", "copy"));
        assert!(!has_flag(&args, "-crf"));
        assert!(!has_flag(&args, "-cq"));
        assert!(!has_flag(&args, "-vf"));
        assert!(!has_flag(&args, "-preset"));
        assert!(!has_flag(&args, "-pix_fmt"));
    }

    #[test]
    fn test_stream_mapping_and_subtitle_copy_always_present() {
        for &vcodec in VideoCodec::ALL {
            let mut cfg = Config::default();
            cfg.video.codec = vcodec;
            let args = main_args(&cfg);

            assert!(has_flag_with_value(&args, "-map", "0:v"));
            assert!(has_flag_with_value(&args, "-map", "0:a?"));
            assert!(has_flag_with_value(&args, "-map", "0:s?"));
            assert!(has_flag_with_value(&args, "-c:s", "copy"));
        }
    }

    #[test]
    fn test_metadata_tokens_are_single_arguments() {
        let mut cfg = Config::default();
        cfg.video.preset = EncoderPreset::Veryslow;
        let args = main_args(&cfg);

        assert!(has_flag_with_value(&args, "-metadata", METADATA_COMMENT));
        assert!(has_flag_with_value(
            &args,
            "-metadata",
            "description=libx265 veryslow crf 23, aac 256k"
        ));
    }

    #[test]
    fn test_filters_joined_with_stabilize_last() {
        let mut cfg = Config::default();
        cfg.video.filters = vec!["crop=1920:800".to_string(), "scale=1280:-2".to_string()];
        cfg.video.stabilize = true;
        let args = main_args(&cfg);

        assert!(has_flag_with_value(&args, "-vf", "crop=1920:800,scale=1280:-2,deshake"));
    }

    #[test]
    fn test_downmix_only_when_audio_reencoded() {
        let mut cfg = Config::default();
        cfg.audio.downmix_stereo = true;
        assert!(has_flag_with_value(&main_args(&cfg), "-ac", "2"));

        cfg.audio.codec = AudioCodec::Copy;
        assert!(!has_flag(&main_args(&cfg), "-ac"));
    }

    #[test]
    fn test_extra_args_split_on_whitespace() {
        let mut cfg = Config::default();
        cfg.encoder.extra_args = "  -tune   film -x265-params log-level=error ".to_string();
        let args = main_args(&cfg);

        assert!(has_flag_with_value(&args, "-tune", "film"));
        assert!(has_flag_with_value(&args, "-x265-params", "log-level=error"));
    }

    #[test]
    fn test_nvenc_preset_mapping() {
        let mut cfg = Config::default();
        cfg.video.codec = VideoCodec::HevcNvenc;
        cfg.video.preset = EncoderPreset::Slow;
        let args = main_args(&cfg);

        assert!(has_flag_with_value(&args, "-preset", "p6"));
        assert!(has_flag_with_value(&args, "-cq", "23"));
    }

    #[test]
    fn test_pre_transcode_args() {
        let mut cfg = Config::default();
        cfg.preprocess.video = true;
        cfg.video.fix_corrupt_stream = true;
        let paths = paths_for("/videos/clip.avi", &cfg);
        let args = build_pre_transcode_args(&paths, &cfg).to_strings();

        assert!(has_flag_with_value(&args, "-i", "/videos/clip.avi"));
        assert!(has_flag_with_value(&args, "-c:v", "rawvideo"));
        assert!(has_flag_with_value(&args, "-c:a", "copy"));
        assert!(has_flag_with_value(&args, "-c:s", "copy"));
        assert!(!has_flag(&args, "-bsf:v"));
        assert_eq!(args.last().map(String::as_str), Some("/videos/clip.trans.avi"));
    }

    #[test]
    fn test_plan_chains_intermediate_into_script_into_encode() {
        let mut cfg = Config::default();
        cfg.preprocess.audio = true;
        cfg.frame_server.enabled = true;
        let paths = paths_for("/videos/clip.avi", &cfg);

        let plan = plan_encode(&paths, &cfg, Path::new("/plugins"), 4);

        assert!(plan.pre_transcode.is_some());
        let script = plan.script.expect("script requested");
        assert_eq!(script.path, PathBuf::from("/videos/clip.avs"));
        assert!(script.contents.contains("/videos/clip.trans.avi"));
        assert!(has_flag_with_value(&plan.main.to_strings(), "-i", "/videos/clip.avs"));
    }

    #[test]
    fn test_plan_without_options_reads_source() {
        let cfg = Config::default();
        let paths = paths_for("/videos/clip.avi", &cfg);
        let plan = plan_encode(&paths, &cfg, Path::new("/plugins"), 4);

        assert!(plan.pre_transcode.is_none());
        assert!(plan.script.is_none());
        assert!(has_flag_with_value(&plan.main.to_strings(), "-i", "/videos/clip.avi"));
    }

    #[test]
    fn test_render_quotes_tokens_with_spaces() {
        let mut args = ArgList::new();
        args.opt("-i", "/my videos/clip one.avi")
            .opt("-metadata", "comment=Made with videer")
            .arg("\"already quoted\"")
            .arg("-flag with space");

        let line = render_command_line(Path::new("/usr/bin/ffmpeg"), &args);

        assert_eq!(
            line,
            "/usr/bin/ffmpeg -i \"/my videos/clip one.avi\" -metadata \"comment=Made with videer\" \"already quoted\" -flag with space"
        );
    }

    // **Feature: videer, Property: Command determinism**
    //
    // *For any* configuration, planning the same task twice SHALL produce
    // identical argument vectors and script text.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_plan_is_deterministic(cfg in config_strategy()) {
            let paths = paths_for("/videos/clip.avi", &cfg);
            let first = plan_encode(&paths, &cfg, Path::new("/plugins"), 8);
            let second = plan_encode(&paths, &cfg.clone(), Path::new("/plugins"), 8);
            prop_assert_eq!(first, second);
        }

        // **Feature: videer, Property: Passthrough correctness**
        #[test]
        fn prop_passthrough_omits_quality_and_bitrate(cfg in config_strategy()) {
            let args = main_args(&cfg);

            if cfg.video.codec == VideoCodec::Copy {
                prop_assert!(!has_flag(&args, "-crf"));
                prop_assert!(!has_flag(&args, "-cq"));
            }
            if cfg.audio.codec == AudioCodec::Copy || cfg.audio.codec.is_lossless() {
                prop_assert!(!has_flag(&args, "-b:a"));
            } else {
                let expected = format!("{}k", cfg.audio.bitrate_kbps);
                prop_assert!(has_flag_with_value(&args, "-b:a", &expected));
            }
        }

        // **Feature: videer, Property: Container-conditional fast start**
        #[test]
        fn prop_faststart_iff_mp4(cfg in config_strategy()) {
            let args = main_args(&cfg);
            prop_assert_eq!(
                has_flag_with_value(&args, "-movflags", "+faststart"),
                cfg.output.container == Container::Mp4
            );
            prop_assert!(has_flag_with_value(&args, "-f", cfg.output.container.muxer()));
        }

        // **Feature: videer, Property: Hardware codec branching**
        #[test]
        fn prop_hwaccel_precedes_input_for_nvenc(cfg in config_strategy()) {
            let args = main_args(&cfg);
            let hw = position(&args, "-hwaccel");
            let input = position(&args, "-i");

            if cfg.video.codec.is_nvenc() {
                prop_assert!(hw.is_some() && input.is_some() && hw < input);
                prop_assert!(has_flag_with_value(&args, "-hwaccel", "cuda"));
                prop_assert!(has_flag_with_value(&args, "-cq", &cfg.video.crf.to_string()));
                prop_assert!(!has_flag(&args, "-crf"));
            } else {
                prop_assert!(hw.is_none());
                prop_assert!(!has_flag(&args, "-cq"));
            }
        }

        #[test]
        fn prop_corruption_fix_only_on_main_encode(cfg in config_strategy()) {
            let paths = paths_for("/videos/clip.avi", &cfg);
            let plan = plan_encode(&paths, &cfg, Path::new("/plugins"), 2);

            prop_assert_eq!(
                has_flag(&plan.main.to_strings(), "-bsf:v"),
                cfg.video.fix_corrupt_stream
            );
            if let Some(pre) = plan.pre_transcode {
                prop_assert!(!has_flag(&pre.to_strings(), "-bsf:v"));
            }
            prop_assert_eq!(
                plan.main.to_strings().last().cloned(),
                Some(paths.output.to_string_lossy().into_owned())
            );
        }
    }
}
