use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "spectra", about = "Render an audio file's spectrum to a video, in sync with the audio")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub input: Option<PathBuf>,

    /// Output video file
    #[arg(short, long, default_value = "output.mp4")]
    pub output: PathBuf,

    /// Video width in pixels
    #[arg(long, default_value_t = 1920)]
    pub width: u32,

    /// Video height in pixels
    #[arg(long, default_value_t = 1080)]
    pub height: u32,

    /// Frames per second
    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// FFT window length in samples (power of two)
    #[arg(long, default_value_t = 32768)]
    pub fft_size: usize,

    /// Rate at which bars follow the spectrum, per second
    #[arg(long, default_value_t = 8.0)]
    pub smoothness: f32,

    /// Rate at which smear trails follow the bars, per second
    #[arg(long, default_value_t = 3.0)]
    pub smearness: f32,

    /// FFmpeg video codec
    #[arg(long, default_value = "libx264")]
    pub codec: String,

    /// Video bitrate passed to -vb
    #[arg(long, default_value = "2500k")]
    pub video_bitrate: String,

    /// FFmpeg audio codec
    #[arg(long, default_value = "aac")]
    pub audio_codec: String,

    /// Audio bitrate passed to -ab
    #[arg(long, default_value = "200k")]
    pub audio_bitrate: String,

    /// FFmpeg output pixel format
    #[arg(long, default_value = "yuv420p")]
    pub pix_fmt: String,

    /// FFmpeg executable
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: String,

    /// Restart the export this many times if the encoder fails
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Config file (defaults to ./spectra.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_encoder_defaults() {
        let cli = Cli::parse_from(["spectra", "song.wav"]);
        assert_eq!(cli.input, Some(PathBuf::from("song.wav")));
        assert_eq!(cli.output, PathBuf::from("output.mp4"));
        assert_eq!((cli.width, cli.height, cli.fps), (1920, 1080, 60));
        assert_eq!(cli.fft_size, 1 << 15);
        assert_eq!(cli.video_bitrate, "2500k");
        assert_eq!(cli.audio_bitrate, "200k");
        assert_eq!(cli.retries, 0);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from(["spectra", "a.flac", "-o", "b.mkv", "--fps", "30", "--fft-size", "4096"]);
        assert_eq!(cli.output, PathBuf::from("b.mkv"));
        assert_eq!(cli.fps, 30);
        assert_eq!(cli.fft_size, 4096);
    }
}
