pub mod ffmpeg;

pub use ffmpeg::{EncodeError, EncoderSettings, FfmpegEncoder};

/// Consumer of rendered frames for the duration of one export session.
pub trait FrameSink {
    /// Write one RGBA frame. Blocks until the consumer accepts it; after an
    /// error the session must not be written to again.
    fn send_frame(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<(), EncodeError>;

    /// Finish the session and report whether the consumer exited cleanly.
    fn end(self) -> Result<(), EncodeError>
    where
        Self: Sized;
}
