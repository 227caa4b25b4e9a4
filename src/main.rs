mod audio;
mod cli;
mod config;
mod encode;
mod export;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use audio::analysis::{AnalyzerSettings, SpectrumAnalyzer};
use cli::Cli;
use encode::{EncoderSettings, FfmpegEncoder};
use export::{AnalysisContext, CancelToken, ExportScheduler, ExportState};
use render::GpuSpectrumRenderer;

/// Resolution of the progress bar, which tracks the fraction of audio consumed.
const PROGRESS_STEPS: u64 = 1000;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect spectra.toml / global config
    let config_path = cli.config.clone().or_else(find_config);
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.width == 1920 { cli.width = cfg.output.width; }
            if cli.height == 1080 { cli.height = cfg.output.height; }
            if cli.fps == 60 { cli.fps = cfg.output.fps; }
            if cli.fft_size == 32768 { cli.fft_size = cfg.analysis.fft_size; }
            if cli.smoothness == 8.0 { cli.smoothness = cfg.analysis.smoothness; }
            if cli.smearness == 3.0 { cli.smearness = cfg.analysis.smearness; }
            if cli.ffmpeg == "ffmpeg" { cli.ffmpeg = cfg.encoder.ffmpeg; }
            if cli.codec == "libx264" { cli.codec = cfg.encoder.codec; }
            if cli.video_bitrate == "2500k" { cli.video_bitrate = cfg.encoder.video_bitrate; }
            if cli.audio_codec == "aac" { cli.audio_codec = cfg.encoder.audio_codec; }
            if cli.audio_bitrate == "200k" { cli.audio_bitrate = cfg.encoder.audio_bitrate; }
            if cli.pix_fmt == "yuv420p" { cli.pix_fmt = cfg.encoder.pix_fmt; }
            if cli.retries == 0 { cli.retries = cfg.encoder.retries; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    let input = cli.input.as_ref().context("Input audio file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    log::info!("spectra - audio spectrum video export");
    log::info!("Input: {}", input.display());
    log::info!("Output: {}", cli.output.display());
    log::info!("Resolution: {}x{} @ {}fps", cli.width, cli.height, cli.fps);

    // 1. Decode audio
    log::info!("Decoding audio...");
    let source = Arc::new(audio::decode::decode_audio(input)?);
    log::info!(
        "Decoded {:.1}s: {}Hz, {} channel(s)",
        source.duration_secs(),
        source.sample_rate,
        source.channels
    );

    // 2. Analyzer
    let analyzer = SpectrumAnalyzer::new(AnalyzerSettings {
        fft_size: cli.fft_size,
        smoothness: cli.smoothness,
        smearness: cli.smearness,
    })?;
    let bucket_count = analyzer.bucket_ranges().len();
    log::info!("FFT size {}, {} frequency buckets", analyzer.fft_size(), bucket_count);
    if let (Some(low), Some(high)) = (
        analyzer.bucket_frequency_range(0, source.sample_rate),
        analyzer.bucket_frequency_range(bucket_count.saturating_sub(1), source.sample_rate),
    ) {
        log::debug!("Buckets span {:.1}Hz to {:.1}Hz", low.start, high.end);
    }
    let mut ctx = AnalysisContext::new(analyzer);

    // 3. Initialize GPU
    log::info!("Initializing GPU...");
    let mut renderer = GpuSpectrumRenderer::new(cli.width, cli.height, bucket_count)?;

    // 4. Start the encoder
    let settings = EncoderSettings {
        program: cli.ffmpeg.clone(),
        width: cli.width,
        height: cli.height,
        fps: cli.fps,
        video_codec: cli.codec.clone(),
        video_bitrate: cli.video_bitrate.clone(),
        audio_codec: cli.audio_codec.clone(),
        audio_bitrate: cli.audio_bitrate.clone(),
        pix_fmt: cli.pix_fmt.clone(),
        ..Default::default()
    };

    let mut scheduler: ExportScheduler<FfmpegEncoder> = ExportScheduler::new();
    spawn_cancel_listener(scheduler.cancel_token());
    log::info!("Type q and press Enter to stop early");

    // 5. Render loop
    let pb = ProgressBar::new(PROGRESS_STEPS);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {percent}% ({eta} remaining) {msg}")?
            .progress_chars("=>-"),
    );

    let mut retries_left = cli.retries;
    loop {
        log::info!("Starting FFmpeg encoder...");
        scheduler.start(&mut ctx, Arc::clone(&source), cli.fps, || {
            FfmpegEncoder::start(&settings, input, &cli.output)
        });
        scheduler.run(&mut ctx, &mut renderer, |progress| {
            pb.set_position((progress.fraction() * PROGRESS_STEPS as f32) as u64);
            pb.set_message(format!("{} frames", progress.frames));
        });

        let retry = match scheduler.state() {
            ExportState::Failed(err) if retries_left > 0 => {
                log::warn!("Export failed: {}; retrying ({} left)", err, retries_left);
                true
            }
            _ => false,
        };
        if !retry {
            break;
        }
        retries_left -= 1;
        scheduler.reset();
        pb.reset();
    }

    let state = scheduler.state();
    match state {
        ExportState::Done { cancelled: false } => {
            pb.finish_with_message("Rendering complete");
            log::info!("Done! Output: {}", cli.output.display());
            Ok(())
        }
        ExportState::Done { cancelled: true } => {
            pb.abandon_with_message("Cancelled");
            log::warn!("Export cancelled; {} holds the frames rendered so far", cli.output.display());
            Ok(())
        }
        ExportState::Failed(err) => {
            pb.abandon_with_message("Failed");
            anyhow::bail!("Export failed: {}", err)
        }
        other => anyhow::bail!("Export stopped in unexpected state {:?}", other),
    }
}

fn find_config() -> Option<PathBuf> {
    let local = PathBuf::from("spectra.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("spectra").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("spectra").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

/// Cancel the export when a line reading `q` arrives on stdin.
fn spawn_cancel_listener(token: CancelToken) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("q") {
                log::info!("Cancelling export...");
                token.cancel();
                break;
            }
        }
    });
}
