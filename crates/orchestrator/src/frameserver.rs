//! AviSynth+ frame-server script generation.
//!
//! The script loads the plugins, picks exactly one source filter, converts the
//! colorspace, optionally deinterlaces, and always ends with `Prefetch`.

use crate::config::{EncoderPreset, FrameServerConfig};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Plugin DLLs loaded by every script, in load order
pub const PLUGINS: &[&str] = &[
    "masktools2.dll",
    "mvtools2.dll",
    "nnedi3.dll",
    "ffms2.dll",
    "RgTools.dll",
];

/// Script imports loaded after the plugins
pub const IMPORTS: &[&str] = &["QTGMC.avsi", "Zs_RF_Shared.avsi"];

/// Filters that must run in serialized MT mode
const SERIALIZED_FILTERS: &[&str] = &[
    "QTGMC",
    "nnedi3",
    "MVAnalyse",
    "MVDegrain1",
    "MVDegrain2",
    "MVDegrain3",
    "FFVideoSource",
];

/// QTGMC preset matching an encoder speed preset
pub fn qtgmc_preset(preset: EncoderPreset) -> &'static str {
    match preset {
        EncoderPreset::Ultrafast => "Ultra Fast",
        EncoderPreset::Superfast => "Super Fast",
        EncoderPreset::Veryfast => "Very Fast",
        EncoderPreset::Faster => "Faster",
        EncoderPreset::Fast => "Fast",
        EncoderPreset::Medium => "Medium",
        EncoderPreset::Slow => "Slow",
        EncoderPreset::Slower => "Slower",
        EncoderPreset::Veryslow => "Very Slow",
    }
}

/// Build the script text for `source`
///
/// # Arguments
/// * `source` - File the script reads (the source or the raw intermediate)
/// * `fs` - Frame-server settings
/// * `preset` - Run preset, which picks the QTGMC preset unless overridden
/// * `plugin_dir` - Directory holding the plugins and imports
/// * `threads` - Worker thread count for `EdiThreads` and `Prefetch`
pub fn generate_script(
    source: &Path,
    fs: &FrameServerConfig,
    preset: EncoderPreset,
    plugin_dir: &Path,
    threads: u32,
) -> String {
    let threads = threads.max(1);
    let mut lines: Vec<String> = Vec::new();

    for plugin in PLUGINS {
        lines.push(format!("LoadPlugin(\"{}\")", plugin_dir.join(plugin).display()));
    }
    for import in IMPORTS {
        lines.push(format!("Import(\"{}\")", plugin_dir.join(import).display()));
    }

    lines.push("SetFilterMTMode(\"DEFAULT_MT_MODE\", 2)".to_string());
    for filter in SERIALIZED_FILTERS {
        lines.push(format!("SetFilterMTMode(\"{}\", 3)", filter));
    }

    let source = source.display();
    if fs.alternate_source {
        lines.push(format!("v = FFVideoSource(\"{}\", track=-1)", source));
        lines.push(format!("a = FFAudioSource(\"{}\", track=-1)", source));
        lines.push("AudioDub(v, a)".to_string());
    } else {
        lines.push(format!("AVISource(\"{}\", audio=true)", source));
    }

    lines.push("ConvertToYV24(matrix=\"rec709\")".to_string());

    let extras = fs.extras.trim();
    if !extras.is_empty() {
        lines.extend(extras.lines().map(|l| l.trim_end().to_string()));
    }

    if fs.top_field_first {
        lines.push("AssumeTFF()".to_string());
    } else if fs.deinterlace {
        lines.push("AssumeBFF()".to_string());
    }

    if fs.deinterlace {
        let divisor = if fs.halve_frame_rate { ", FPSDivisor=2" } else { "" };
        let name = fs
            .deinterlace_preset
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| qtgmc_preset(preset));
        lines.push(format!(
            "QTGMC(Preset=\"{}\"{}, EdiThreads={})",
            name, divisor, threads
        ));
    }

    lines.push(format!("Prefetch({})", threads));

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

/// Write the script, replacing any previous one
pub fn write_script(path: &Path, contents: &str) -> io::Result<()> {
    fs::write(path, contents)
}

/// Plugins and imports that are not present in `plugin_dir`
pub fn missing_plugins(plugin_dir: &Path) -> Vec<PathBuf> {
    PLUGINS
        .iter()
        .chain(IMPORTS.iter())
        .map(|name| plugin_dir.join(name))
        .filter(|path| !path.is_file())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn script_for(fs: &FrameServerConfig) -> Vec<String> {
        generate_script(
            Path::new("/videos/clip.avi"),
            fs,
            EncoderPreset::Medium,
            Path::new("/plugins"),
            8,
        )
            .lines()
            .map(String::from)
            .collect()
    }

    fn index_of(lines: &[String], prefix: &str) -> Option<usize> {
        lines.iter().position(|l| l.starts_with(prefix))
    }

    fn is_source_line(line: &str) -> bool {
        line.starts_with("AVISource(") || line.starts_with("v = FFVideoSource(")
    }

    #[test]
    fn test_direct_source_script() {
        let lines = script_for(&FrameServerConfig::default());

        assert_eq!(lines[0], "LoadPlugin(\"/plugins/masktools2.dll\")");
        assert!(lines.contains(&"Import(\"/plugins/QTGMC.avsi\")".to_string()));
        assert!(lines.contains(&"AVISource(\"/videos/clip.avi\", audio=true)".to_string()));
        assert!(!lines.iter().any(|l| l.contains("FFVideoSource(\"")));
        assert!(!lines.iter().any(|l| l.starts_with("QTGMC(")));
        assert!(!lines.iter().any(|l| l.starts_with("Assume")));
        assert_eq!(lines.last().map(String::as_str), Some("Prefetch(8)"));
    }

    #[test]
    fn test_alternate_source_script() {
        let fs = FrameServerConfig {
            alternate_source: true,
            ..FrameServerConfig::default()
        };
        let lines = script_for(&fs);

        let v = index_of(&lines, "v = FFVideoSource(\"/videos/clip.avi\", track=-1)").unwrap();
        assert_eq!(lines[v + 1], "a = FFAudioSource(\"/videos/clip.avi\", track=-1)");
        assert_eq!(lines[v + 2], "AudioDub(v, a)");
        assert!(index_of(&lines, "AVISource(").is_none());
    }

    #[test]
    fn test_deinterlace_with_halving() {
        let fs = FrameServerConfig {
            deinterlace: true,
            halve_frame_rate: true,
            ..FrameServerConfig::default()
        };
        let lines = script_for(&fs);

        assert!(lines.contains(&"AssumeBFF()".to_string()));
        assert!(lines.contains(&"QTGMC(Preset=\"Medium\", FPSDivisor=2, EdiThreads=8)".to_string()));
    }

    #[test]
    fn test_qtgmc_follows_run_preset() {
        let fs = FrameServerConfig {
            deinterlace: true,
            ..FrameServerConfig::default()
        };
        let script = generate_script(
            Path::new("/videos/clip.avi"),
            &fs,
            EncoderPreset::Veryslow,
            Path::new("/plugins"),
            4,
        );

        assert!(script.contains("QTGMC(Preset=\"Very Slow\", EdiThreads=4)"));
    }

    #[test]
    fn test_qtgmc_preset_override() {
        let fs = FrameServerConfig {
            deinterlace: true,
            deinterlace_preset: Some("Placebo".to_string()),
            ..FrameServerConfig::default()
        };
        let script = generate_script(
            Path::new("/videos/clip.avi"),
            &fs,
            EncoderPreset::Fast,
            Path::new("/plugins"),
            4,
        );

        assert!(script.contains("QTGMC(Preset=\"Placebo\", EdiThreads=4)"));
    }

    #[test]
    fn test_halving_without_deinterlace_has_no_effect() {
        let fs = FrameServerConfig {
            halve_frame_rate: true,
            ..FrameServerConfig::default()
        };
        let lines = script_for(&fs);

        assert!(!lines.iter().any(|l| l.contains("FPSDivisor")));
    }

    #[test]
    fn test_top_field_first_wins_over_bff() {
        let fs = FrameServerConfig {
            deinterlace: true,
            top_field_first: true,
            ..FrameServerConfig::default()
        };
        let lines = script_for(&fs);

        assert!(lines.contains(&"AssumeTFF()".to_string()));
        assert!(!lines.contains(&"AssumeBFF()".to_string()));
    }

    #[test]
    fn test_extras_inserted_before_deinterlacing() {
        let fs = FrameServerConfig {
            deinterlace: true,
            extras: "Crop(8, 0, -8, 0)\nTweak(sat=1.1)".to_string(),
            ..FrameServerConfig::default()
        };
        let lines = script_for(&fs);

        let convert = index_of(&lines, "ConvertToYV24").unwrap();
        let crop = index_of(&lines, "Crop(").unwrap();
        let tweak = index_of(&lines, "Tweak(").unwrap();
        let qtgmc = index_of(&lines, "QTGMC(").unwrap();
        assert!(convert < crop && crop < tweak && tweak < qtgmc);
    }

    #[test]
    fn test_missing_plugins_reports_absent_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ffms2.dll"), b"").unwrap();
        fs::write(dir.path().join("QTGMC.avsi"), b"").unwrap();

        let missing = missing_plugins(dir.path());

        assert_eq!(missing.len(), PLUGINS.len() + IMPORTS.len() - 2);
        assert!(!missing.contains(&dir.path().join("ffms2.dll")));
        assert!(missing.contains(&dir.path().join("nnedi3.dll")));
    }

    #[test]
    fn test_write_script_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.avs");
        write_script(&path, "old").unwrap();
        write_script(&path, "new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    prop_compose! {
        fn frame_server_strategy()(
            alternate_source in proptest::bool::ANY,
            deinterlace in proptest::bool::ANY,
            top_field_first in proptest::bool::ANY,
            halve_frame_rate in proptest::bool::ANY,
            extras in prop::option::of("[a-z]{1,8}\\(\\)"),
        ) -> FrameServerConfig {
            FrameServerConfig {
                enabled: true,
                alternate_source,
                deinterlace,
                top_field_first,
                halve_frame_rate,
                extras: extras.unwrap_or_default(),
                ..FrameServerConfig::default()
            }
        }
    }

    // **Feature: videer, Property: Script ordering and source exclusivity**
    //
    // *For any* frame-server settings, loads precede the single source
    // directive, deinterlacing follows the colorspace conversion, and
    // Prefetch is the last line.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_script_ordering(fs in frame_server_strategy(), threads in 1u32..64) {
            let script = generate_script(
                Path::new("/in/clip.avi"),
                &fs,
                EncoderPreset::Medium,
                Path::new("/p"),
                threads,
            );
            let lines: Vec<String> = script.lines().map(String::from).collect();

            let sources: Vec<usize> = lines
                .iter()
                .enumerate()
                .filter(|(_, l)| is_source_line(l))
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(sources.len(), 1);
            let source = sources[0];

            let last_load = lines
                .iter()
                .rposition(|l| l.starts_with("LoadPlugin(") || l.starts_with("Import("))
                .unwrap();
            prop_assert!(last_load < source);

            let convert = index_of(&lines, "ConvertToYV24").unwrap();
            prop_assert!(source < convert);
            if let Some(qtgmc) = index_of(&lines, "QTGMC(") {
                prop_assert!(fs.deinterlace);
                prop_assert!(convert < qtgmc);
            } else {
                prop_assert!(!fs.deinterlace);
            }

            let last_non_empty = lines.iter().rev().find(|l| !l.trim().is_empty()).unwrap();
            prop_assert_eq!(last_non_empty, &format!("Prefetch({})", threads));
        }
    }
}
