//! Named quality profiles
//!
//! Each profile overwrites the codec, quality and container settings of a
//! configuration in one step. Flags and paths are left alone.

use crate::config::{AudioCodec, Config, Container, EncoderPreset, VideoCodec};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityProfile {
    /// H.264/AAC in MP4 for streaming and sharing
    Web,
    /// HEVC/Opus in Matroska
    HighQuality,
    /// ProRes with uncompressed audio in QuickTime
    Archive,
}

impl QualityProfile {
    pub const ALL: &'static [QualityProfile] = &[
        QualityProfile::Web,
        QualityProfile::HighQuality,
        QualityProfile::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityProfile::Web => "web",
            QualityProfile::HighQuality => "hq",
            QualityProfile::Archive => "archive",
        }
    }

    /// Overwrite the codec/quality/container fields of `cfg`
    pub fn apply(&self, cfg: &mut Config) {
        let (vcodec, acodec, crf, kbps, preset, container) = match self {
            QualityProfile::Web => (
                VideoCodec::Libx264,
                AudioCodec::Aac,
                23,
                192,
                EncoderPreset::Fast,
                Container::Mp4,
            ),
            QualityProfile::HighQuality => (
                VideoCodec::Libx265,
                AudioCodec::Libopus,
                18,
                256,
                EncoderPreset::Slow,
                Container::Mkv,
            ),
            QualityProfile::Archive => (
                VideoCodec::ProresKs,
                AudioCodec::PcmS32le,
                10,
                512,
                EncoderPreset::Medium,
                Container::Mov,
            ),
        };

        cfg.video.codec = vcodec;
        cfg.video.crf = crf;
        cfg.video.preset = preset;
        cfg.audio.codec = acodec;
        cfg.audio.bitrate_kbps = kbps;
        cfg.output.container = container;
    }
}

impl FromStr for QualityProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "web" => Ok(QualityProfile::Web),
            "hq" | "high" | "high-quality" => Ok(QualityProfile::HighQuality),
            "archive" => Ok(QualityProfile::Archive),
            other => Err(format!(
                "unknown profile '{}', expected one of: web, hq, archive",
                other
            )),
        }
    }
}

impl fmt::Display for QualityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
