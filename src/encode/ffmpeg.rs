use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use super::FrameSink;

/// How many trailing lines of encoder diagnostics are kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to spawn encoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write frame to encoder: {0}")]
    Write(#[source] std::io::Error),
    #[error("frame is {actual} bytes, expected {expected} for a {width}x{height} RGBA surface")]
    FrameSize {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
    },
    #[error("encoder session is closed")]
    SessionClosed,
    #[error("failed to wait for encoder: {0}")]
    Wait(#[source] std::io::Error),
    #[error("encoder exited with {status}{}", format_tail(.stderr_tail))]
    Exit {
        status: ExitStatus,
        stderr_tail: Vec<String>,
    },
}

fn format_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!(":\n{}", lines.join("\n"))
    }
}

/// Encoder invocation parameters. Defaults give libx264 at 2500k with
/// 200k AAC audio, 1920x1080 at 60fps.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderSettings {
    pub program: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_codec: String,
    pub video_bitrate: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub pix_fmt: String,
    pub loglevel: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".into(),
            width: 1920,
            height: 1080,
            fps: 60,
            video_codec: "libx264".into(),
            video_bitrate: "2500k".into(),
            audio_codec: "aac".into(),
            audio_bitrate: "200k".into(),
            pix_fmt: "yuv420p".into(),
            loglevel: "verbose".into(),
        }
    }
}

/// Command line for one export: raw RGBA frames on stdin, audio track read
/// from `audio_path`, muxed into `output_path`.
pub fn ffmpeg_args(settings: &EncoderSettings, audio_path: &Path, output_path: &Path) -> Vec<OsString> {
    let size = format!("{}x{}", settings.width, settings.height);
    let rate = settings.fps.to_string();

    let mut args: Vec<OsString> = [
        "-loglevel", settings.loglevel.as_str(),
        "-y",
        "-f", "rawvideo",
        "-pix_fmt", "rgba",
        "-s", size.as_str(),
        "-r", rate.as_str(),
        "-i", "-",
        "-i",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(audio_path.as_os_str().to_owned());

    args.extend(
        [
            "-c:v", settings.video_codec.as_str(),
            "-vb", settings.video_bitrate.as_str(),
            "-c:a", settings.audio_codec.as_str(),
            "-ab", settings.audio_bitrate.as_str(),
            "-pix_fmt", settings.pix_fmt.as_str(),
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push(output_path.as_os_str().to_owned());
    args
}

/// One encoding session backed by a child process reading raw frames on
/// stdin.
///
/// `end` consumes the session, so teardown happens at most once; if a
/// session is dropped without `end`, `Drop` closes the pipe and reaps the
/// child.
pub struct FfmpegEncoder {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<Vec<String>>>,
    width: u32,
    height: u32,
    flipped: Vec<u8>,
    alive: bool,
    frames_sent: u64,
}

impl FfmpegEncoder {
    pub fn start(settings: &EncoderSettings, audio_path: &Path, output_path: &Path) -> Result<Self, EncodeError> {
        let mut command = Command::new(&settings.program);
        command.args(ffmpeg_args(settings, audio_path, output_path));

        let encoder = Self::spawn(command, settings.width, settings.height)?;
        log::info!(
            "FFmpeg encoder started: {}x{} @ {}fps, codec={}, output={}",
            settings.width,
            settings.height,
            settings.fps,
            settings.video_codec,
            output_path.display()
        );
        Ok(encoder)
    }

    /// Spawn an arbitrary command as the frame consumer. Its stdin receives
    /// the frames; stdout is discarded and stderr is forwarded to the log.
    pub fn spawn(mut command: Command, width: u32, height: u32) -> Result<Self, EncodeError> {
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EncodeError::Spawn { program, source })?;

        let stdin = child.stdin.take();
        // Drain stderr continuously: a chatty encoder blocked on a full
        // stderr pipe would stop reading stdin and stall every frame write.
        let stderr_drain = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    log::debug!("ffmpeg: {}", line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<String>>()
            })
        });

        Ok(Self {
            child: Some(child),
            stdin,
            stderr_drain,
            width,
            height,
            flipped: Vec::with_capacity(width as usize * height as usize * 4),
            alive: true,
            frames_sent: 0,
        })
    }

    /// Write one RGBA frame, last row first. Blocks until the encoder has
    /// accepted the whole frame.
    pub fn send_frame(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<(), EncodeError> {
        if !self.alive {
            return Err(EncodeError::SessionClosed);
        }
        let result = self.write_flipped(pixels, width, height);
        if result.is_err() {
            self.alive = false;
        } else {
            self.frames_sent += 1;
        }
        result
    }

    fn write_flipped(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<(), EncodeError> {
        let expected = self.width as usize * self.height as usize * 4;
        if width != self.width || height != self.height || pixels.len() != expected {
            return Err(EncodeError::FrameSize {
                expected,
                actual: pixels.len(),
                width: self.width,
                height: self.height,
            });
        }

        flip_rows(pixels, width as usize * 4, &mut self.flipped);

        let stdin = self.stdin.as_mut().ok_or(EncodeError::SessionClosed)?;
        stdin.write_all(&self.flipped).map_err(EncodeError::Write)?;
        Ok(())
    }

    /// Close the frame stream and wait for the encoder to exit.
    pub fn end(mut self) -> Result<(), EncodeError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), EncodeError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        self.alive = false;

        // Closing stdin is the end-of-stream signal.
        drop(self.stdin.take());

        let waited = child.wait();
        if waited.is_err() {
            // The drain thread only finishes once the child closes stderr.
            let _ = child.kill();
        }
        let stderr_tail = self
            .stderr_drain
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        exit_result(waited, stderr_tail)?;

        log::info!("FFmpeg encoding complete ({} frames)", self.frames_sent);
        Ok(())
    }
}

impl FrameSink for FfmpegEncoder {
    fn send_frame(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<(), EncodeError> {
        FfmpegEncoder::send_frame(self, pixels, width, height)
    }

    fn end(self) -> Result<(), EncodeError> {
        FfmpegEncoder::end(self)
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.child.is_some() {
            log::warn!("Encoder session dropped without being ended; finalizing it now");
            if let Err(err) = self.finish() {
                log::error!("{}", err);
            }
        }
    }
}

fn exit_result(waited: std::io::Result<ExitStatus>, stderr_tail: Vec<String>) -> Result<(), EncodeError> {
    let status = waited.map_err(EncodeError::Wait)?;
    if !status.success() {
        return Err(EncodeError::Exit { status, stderr_tail });
    }
    Ok(())
}

/// Copy `pixels` into `out` with the row order reversed.
pub fn flip_rows(pixels: &[u8], row_bytes: usize, out: &mut Vec<u8>) {
    out.clear();
    if row_bytes == 0 {
        return;
    }
    for row in pixels.chunks_exact(row_bytes).rev() {
        out.extend_from_slice(row);
    }
}
