//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Highest accepted constant rate factor
pub const MAX_CRF: u8 = 51;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value is outside its accepted range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Video encoder selected for the main encode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    Libx264,
    Libx265,
    H264Nvenc,
    HevcNvenc,
    ProresKs,
    Rawvideo,
    /// Stream copy, no re-encoding
    Copy,
}

impl VideoCodec {
    pub const ALL: &'static [VideoCodec] = &[
        VideoCodec::Libx264,
        VideoCodec::Libx265,
        VideoCodec::H264Nvenc,
        VideoCodec::HevcNvenc,
        VideoCodec::ProresKs,
        VideoCodec::Rawvideo,
        VideoCodec::Copy,
    ];

    /// The ffmpeg encoder identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::Libx264 => "libx264",
            VideoCodec::Libx265 => "libx265",
            VideoCodec::H264Nvenc => "h264_nvenc",
            VideoCodec::HevcNvenc => "hevc_nvenc",
            VideoCodec::ProresKs => "prores_ks",
            VideoCodec::Rawvideo => "rawvideo",
            VideoCodec::Copy => "copy",
        }
    }

    /// True for the NVIDIA hardware encoders
    pub fn is_nvenc(&self) -> bool {
        matches!(self, VideoCodec::H264Nvenc | VideoCodec::HevcNvenc)
    }
}

/// Audio encoder selected for the main encode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    Aac,
    Libmp3lame,
    Libopus,
    Ac3,
    Flac,
    PcmS32le,
    /// Stream copy, no re-encoding
    Copy,
}

impl AudioCodec {
    pub const ALL: &'static [AudioCodec] = &[
        AudioCodec::Aac,
        AudioCodec::Libmp3lame,
        AudioCodec::Libopus,
        AudioCodec::Ac3,
        AudioCodec::Flac,
        AudioCodec::PcmS32le,
        AudioCodec::Copy,
    ];

    /// The ffmpeg encoder identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Libmp3lame => "libmp3lame",
            AudioCodec::Libopus => "libopus",
            AudioCodec::Ac3 => "ac3",
            AudioCodec::Flac => "flac",
            AudioCodec::PcmS32le => "pcm_s32le",
            AudioCodec::Copy => "copy",
        }
    }

    /// Lossless codecs never take a bitrate
    pub fn is_lossless(&self) -> bool {
        matches!(self, AudioCodec::Flac | AudioCodec::PcmS32le)
    }
}

/// Encoder speed/quality tradeoff
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPreset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl EncoderPreset {
    pub const ALL: &'static [EncoderPreset] = &[
        EncoderPreset::Ultrafast,
        EncoderPreset::Superfast,
        EncoderPreset::Veryfast,
        EncoderPreset::Faster,
        EncoderPreset::Fast,
        EncoderPreset::Medium,
        EncoderPreset::Slow,
        EncoderPreset::Slower,
        EncoderPreset::Veryslow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderPreset::Ultrafast => "ultrafast",
            EncoderPreset::Superfast => "superfast",
            EncoderPreset::Veryfast => "veryfast",
            EncoderPreset::Faster => "faster",
            EncoderPreset::Fast => "fast",
            EncoderPreset::Medium => "medium",
            EncoderPreset::Slow => "slow",
            EncoderPreset::Slower => "slower",
            EncoderPreset::Veryslow => "veryslow",
        }
    }
}

/// Output container
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mkv,
    Mp4,
    Avi,
    Mov,
    Webm,
}

impl Container {
    pub const ALL: &'static [Container] = &[
        Container::Mkv,
        Container::Mp4,
        Container::Avi,
        Container::Mov,
        Container::Webm,
    ];

    pub fn as_str(&self) -> &'static str {
        self.extension()
    }

    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mkv => "mkv",
            Container::Mp4 => "mp4",
            Container::Avi => "avi",
            Container::Mov => "mov",
            Container::Webm => "webm",
        }
    }

    /// Muxer name passed to `-f`
    pub fn muxer(&self) -> &'static str {
        match self {
            Container::Mkv => "matroska",
            Container::Mp4 => "mp4",
            Container::Avi => "avi",
            Container::Mov => "mov",
            Container::Webm => "webm",
        }
    }
}

/// Parse any of the identifier enums from its ffmpeg name (case-insensitive)
fn parse_named<T: Copy>(
    all: &[T],
    name: fn(&T) -> &'static str,
    kind: &str,
    s: &str,
) -> Result<T, String> {
    let wanted = s.trim().to_lowercase();
    all.iter()
        .find(|v| name(v) == wanted)
        .copied()
        .ok_or_else(|| {
            let known: Vec<&str> = all.iter().map(name).collect();
            format!("unknown {} '{}', expected one of: {}", kind, s, known.join(", "))
        })
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_named(Self::ALL, Self::as_str, "video codec", s)
    }
}

impl FromStr for AudioCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_named(Self::ALL, Self::as_str, "audio codec", s)
    }
}

impl FromStr for EncoderPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "Very Slow" style labels are accepted too
        let compact: String = s.split_whitespace().collect();
        parse_named(Self::ALL, Self::as_str, "preset", &compact)
    }
}

impl FromStr for Container {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_named(Self::ALL, Self::as_str, "container", s.trim_start_matches('.'))
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for EncoderPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video settings for the main encode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoConfig {
    #[serde(default = "default_video_codec")]
    pub codec: VideoCodec,
    /// Constant rate factor, sent as CQ to the NVENC encoders
    #[serde(default = "default_crf")]
    pub crf: u8,
    #[serde(default = "default_preset")]
    pub preset: EncoderPreset,
    /// Opaque filter expressions (scale, crop, pad ...) joined into `-vf`
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub stabilize: bool,
    /// Append the h264_mp4toannexb bitstream filter to the main encode
    #[serde(default)]
    pub fix_corrupt_stream: bool,
}

fn default_video_codec() -> VideoCodec {
    VideoCodec::Libx265
}

fn default_crf() -> u8 {
    23
}

fn default_preset() -> EncoderPreset {
    EncoderPreset::Medium
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: default_video_codec(),
            crf: default_crf(),
            preset: default_preset(),
            filters: Vec::new(),
            stabilize: false,
            fix_corrupt_stream: false,
        }
    }
}

/// Audio settings for the main encode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_audio_codec")]
    pub codec: AudioCodec,
    #[serde(default = "default_audio_bitrate")]
    pub bitrate_kbps: u32,
    #[serde(default)]
    pub downmix_stereo: bool,
}

fn default_audio_codec() -> AudioCodec {
    AudioCodec::Aac
}

fn default_audio_bitrate() -> u32 {
    256
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: default_audio_codec(),
            bitrate_kbps: default_audio_bitrate(),
            downmix_stereo: false,
        }
    }
}

/// AviSynth+ frame-server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameServerConfig {
    /// Feed the encoder a generated script instead of the source
    #[serde(default)]
    pub enabled: bool,
    /// Use the indexed FFMS2 source filter instead of AVISource
    #[serde(default)]
    pub alternate_source: bool,
    #[serde(default)]
    pub deinterlace: bool,
    #[serde(default)]
    pub top_field_first: bool,
    /// Only honoured inside the deinterlacer
    #[serde(default)]
    pub halve_frame_rate: bool,
    /// QTGMC preset name; derived from `video.preset` when unset
    #[serde(default)]
    pub deinterlace_preset: Option<String>,
    /// Verbatim script lines inserted after the colorspace conversion
    #[serde(default)]
    pub extras: String,
    /// Directory holding the plugin DLLs and .avsi imports
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,
}


impl Default for FrameServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alternate_source: false,
            deinterlace: false,
            top_field_first: false,
            halve_frame_rate: false,
            deinterlace_preset: None,
            extras: String::new(),
            plugin_dir: None,
        }
    }
}

/// Output placement and post-encode handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_container")]
    pub container: Container,
    /// Write outputs here instead of next to each source
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Swap the encoded file into the source path, keeping `<source>.old`
    #[serde(default)]
    pub replace_original: bool,
    /// Copy the source's access/modification times onto the output
    #[serde(default = "default_preserve_timestamps")]
    pub preserve_timestamps: bool,
    /// Leave transient artifacts behind when the queue is stopped mid-task
    #[serde(default)]
    pub keep_artifacts_on_stop: bool,
}

fn default_container() -> Container {
    Container::Mkv
}

fn default_preserve_timestamps() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            container: default_container(),
            directory: None,
            replace_original: false,
            preserve_timestamps: default_preserve_timestamps(),
            keep_artifacts_on_stop: false,
        }
    }
}

/// Raw intermediate pass before the main encode
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PreprocessConfig {
    /// Decode video to rawvideo first
    #[serde(default)]
    pub video: bool,
    /// Decode audio to pcm_s32le first
    #[serde(default)]
    pub audio: bool,
}

impl PreprocessConfig {
    pub fn enabled(&self) -> bool {
        self.video || self.audio
    }
}

/// Encoder binary location and passthrough arguments
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EncoderConfig {
    /// Explicit ffmpeg path; searched for when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Wrapper program and arguments placed before the encoder, e.g. `["nice", "-n", "10"]`
    #[serde(default)]
    pub launcher: Vec<String>,
    /// Extra encoder arguments, split on whitespace
    #[serde(default)]
    pub extra_args: String,
}

/// CPU-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CpuConfig {
    /// Number of logical cores (auto-detected if None)
    pub logical_cores: Option<u32>,
}

/// Main configuration structure
///
/// A run clones this once at queue start; later edits never reach a running queue.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub frame_server: FrameServerConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub cpu: CpuConfig,
}

fn env_bool(val: &str) -> Option<bool> {
    // Accept "true", "1", "yes" as true; "false", "0", "no" as false
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - VIDEER_VIDEO_CODEC -> video.codec
    /// - VIDEER_CRF -> video.crf
    /// - VIDEER_PRESET -> video.preset
    /// - VIDEER_AUDIO_CODEC -> audio.codec
    /// - VIDEER_AUDIO_BITRATE -> audio.bitrate_kbps
    /// - VIDEER_CONTAINER -> output.container
    /// - VIDEER_REPLACE_ORIGINAL -> output.replace_original
    /// - VIDEER_FFMPEG -> encoder.path
    /// - VIDEER_LOGICAL_CORES -> cpu.logical_cores
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VIDEER_VIDEO_CODEC") {
            if let Ok(codec) = val.parse() {
                self.video.codec = codec;
            }
        }

        if let Ok(val) = env::var("VIDEER_CRF") {
            if let Ok(crf) = val.parse::<u8>() {
                self.video.crf = crf;
            }
        }

        if let Ok(val) = env::var("VIDEER_PRESET") {
            if let Ok(preset) = val.parse() {
                self.video.preset = preset;
            }
        }

        if let Ok(val) = env::var("VIDEER_AUDIO_CODEC") {
            if let Ok(codec) = val.parse() {
                self.audio.codec = codec;
            }
        }

        if let Ok(val) = env::var("VIDEER_AUDIO_BITRATE") {
            if let Ok(kbps) = val.parse::<u32>() {
                self.audio.bitrate_kbps = kbps;
            }
        }

        if let Ok(val) = env::var("VIDEER_CONTAINER") {
            if let Ok(container) = val.parse() {
                self.output.container = container;
            }
        }

        if let Ok(val) = env::var("VIDEER_REPLACE_ORIGINAL") {
            if let Some(flag) = env_bool(&val) {
                self.output.replace_original = flag;
            }
        }

        if let Ok(val) = env::var("VIDEER_FFMPEG") {
            if !val.trim().is_empty() {
                self.encoder.path = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("VIDEER_LOGICAL_CORES") {
            if let Ok(cores) = val.parse::<u32>() {
                self.cpu.logical_cores = Some(cores);
            }
        }
    }

    /// Reject values the encoder can never accept
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video.crf > MAX_CRF {
            return Err(ConfigError::Invalid(format!(
                "crf {} is above the maximum of {}",
                self.video.crf, MAX_CRF
            )));
        }
        if self.audio.bitrate_kbps == 0 {
            return Err(ConfigError::Invalid(
                "audio bitrate must be greater than zero".to_string(),
            ));
        }
        if self.cpu.logical_cores == Some(0) {
            return Err(ConfigError::Invalid(
                "cpu.logical_cores must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Non-fatal notes about combinations the encoder may reject or ignore
    ///
    /// Nothing here is corrected; the configuration is used exactly as given.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let container = self.output.container;

        if self.video.codec == VideoCodec::ProresKs
            && !matches!(container, Container::Mov | Container::Mkv)
        {
            warnings.push(format!(
                "prores_ks works best in mov or mkv, not {}",
                container
            ));
        }

        if container == Container::Webm {
            warnings.push(format!(
                "webm only holds VP8/VP9/AV1 video and Vorbis/Opus audio; {} / {} will likely be rejected",
                self.video.codec, self.audio.codec
            ));
        }

        if self.frame_server.deinterlace && !self.frame_server.enabled {
            warnings.push("deinterlacing requires the frame server; it will be skipped".to_string());
        }

        if self.frame_server.halve_frame_rate && !self.frame_server.deinterlace {
            warnings.push("halving the frame rate only applies while deinterlacing".to_string());
        }

        if self.frame_server.enabled && !self.frame_server.alternate_source && self.frame_server.deinterlace {
            warnings.push(
                "deinterlacing through the frame server usually needs the FFMS2 source filter".to_string(),
            );
        }

        if self.video.codec == VideoCodec::Copy
            && (!self.video.filters.is_empty() || self.video.stabilize)
        {
            warnings.push("video filters are ignored when the video stream is copied".to_string());
        }

        warnings
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
