use serde::Deserialize;
use std::path::Path;

use crate::audio::analysis::{DEFAULT_FFT_SIZE, DEFAULT_SMEARNESS, DEFAULT_SMOOTHNESS};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_smoothness")]
    pub smoothness: f32,
    #[serde(default = "default_smearness")]
    pub smearness: f32,
}

#[derive(Debug, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default = "default_pix_fmt")]
    pub pix_fmt: String,
    #[serde(default)]
    pub retries: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            smoothness: default_smoothness(),
            smearness: default_smearness(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            codec: default_codec(),
            video_bitrate: default_video_bitrate(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            pix_fmt: default_pix_fmt(),
            retries: 0,
        }
    }
}

fn default_width() -> u32 { 1920 }
fn default_height() -> u32 { 1080 }
fn default_fps() -> u32 { 60 }
fn default_fft_size() -> usize { DEFAULT_FFT_SIZE }
fn default_smoothness() -> f32 { DEFAULT_SMOOTHNESS }
fn default_smearness() -> f32 { DEFAULT_SMEARNESS }
fn default_ffmpeg() -> String { "ffmpeg".into() }
fn default_codec() -> String { "libx264".into() }
fn default_video_bitrate() -> String { "2500k".into() }
fn default_audio_codec() -> String { "aac".into() }
fn default_audio_bitrate() -> String { "200k".into() }
fn default_pix_fmt() -> String { "yuv420p".into() }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [output]
            fps = 30

            [encoder]
            video_bitrate = "8M"
            retries = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.output.fps, 30);
        assert_eq!(config.output.width, 1920);
        assert_eq!(config.analysis.fft_size, 1 << 15);
        assert_eq!(config.analysis.smoothness, 8.0);
        assert_eq!(config.encoder.video_bitrate, "8M");
        assert_eq!(config.encoder.codec, "libx264");
        assert_eq!(config.encoder.retries, 2);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.output.height, 1080);
        assert_eq!(config.analysis.smearness, 3.0);
        assert_eq!(config.encoder.pix_fmt, "yuv420p");
    }

    #[test]
    fn unreadable_or_invalid_files_are_none() {
        let dir = std::env::temp_dir().join(format!("spectra-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bad = dir.join("bad.toml");
        std::fs::write(&bad, "[output]\nfps = \"fast\"\n").unwrap();
        assert!(load_config(&bad).is_none());
        assert!(load_config(&dir.join("missing.toml")).is_none());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
