use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::analysis::SpectrumAnalyzer;
use crate::audio::buffer::SampleBuffer;
use crate::audio::decode::AudioSource;
use crate::encode::{EncodeError, FrameSink};
use crate::render::SpectrumRenderer;

/// Channel fed to the analyzer; the others are ignored.
const ANALYZED_CHANNEL: usize = 0;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("audio source cannot be exported: {0}")]
    InvalidSource(String),
    #[error("could not start the encoder: {0}")]
    EncoderSpawn(#[source] EncodeError),
    #[error("encoder rejected a frame: {0}")]
    EncoderWrite(#[source] EncodeError),
    #[error("encoder did not finish cleanly: {0}")]
    EncoderExit(#[source] EncodeError),
    #[error("failed to render frame: {0}")]
    Render(String),
}

#[derive(Debug)]
pub enum ExportState {
    Idle,
    Exporting,
    /// Waiting to finalize the encoder; `cancelled` records why
    Draining { cancelled: bool },
    Done { cancelled: bool },
    Failed(ExportError),
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportState::Done { .. } | ExportState::Failed(_))
    }
}

/// Cooperative cancellation flag, checked once per tick.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The analyzer and the sample window it reads, owned by the caller and
/// lent to the scheduler for each operation.
pub struct AnalysisContext {
    pub analyzer: SpectrumAnalyzer,
    pub buffer: SampleBuffer,
}

impl AnalysisContext {
    pub fn new(analyzer: SpectrumAnalyzer) -> Self {
        let buffer = SampleBuffer::new(analyzer.fft_size());
        Self { analyzer, buffer }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportProgress {
    pub cursor: usize,
    pub total: usize,
    pub frames: u64,
}

impl ExportProgress {
    /// Fraction of the audio consumed, clamped to 1.0 while trailing decay
    /// frames are rendered.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        (self.cursor as f32 / self.total as f32).min(1.0)
    }
}

struct ExportJob {
    source: Arc<AudioSource>,
    fps: u32,
    cursor: usize,
    frames: u64,
}

impl ExportJob {
    fn total(&self) -> usize {
        self.source.frame_count()
    }

    /// Cursor position after the next frame. Computed from the frame index
    /// so that fractional `sample_rate / fps` ratios do not drift.
    fn next_cursor(&self) -> usize {
        ((self.frames + 1) * self.source.sample_rate as u64 / self.fps as u64) as usize
    }

    /// Push the next frame's worth of samples, silence past the end of the
    /// source.
    fn feed(&mut self, buffer: &SampleBuffer) {
        let end = self.next_cursor();
        for frame in self.cursor..end {
            buffer.push(self.source.sample(frame, ANALYZED_CHANNEL).unwrap_or(0.0));
        }
        self.cursor = end;
    }
}

/// Drives one offline export at a time: advances a virtual playback cursor
/// over the source at a fixed frame rate, analyzes, renders and hands each
/// frame to the encoder session.
///
/// Every started session is ended exactly once, whether the export
/// completes, is cancelled, or fails mid-way.
pub struct ExportScheduler<S: FrameSink> {
    state: ExportState,
    job: Option<ExportJob>,
    session: Option<S>,
    cancel: CancelToken,
}

impl<S: FrameSink> Default for ExportScheduler<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: FrameSink> ExportScheduler<S> {
    pub fn new() -> Self {
        Self {
            state: ExportState::Idle,
            job: None,
            session: None,
            cancel: CancelToken::default(),
        }
    }

    pub fn state(&self) -> &ExportState {
        &self.state
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> ExportProgress {
        match &self.job {
            Some(job) => ExportProgress {
                cursor: job.cursor,
                total: job.total(),
                frames: job.frames,
            },
            None => ExportProgress {
                cursor: 0,
                total: 0,
                frames: 0,
            },
        }
    }

    /// Begin exporting `source` at `fps`. `launch` starts the encoder
    /// session; it is only called once the source has been validated.
    pub fn start<F>(&mut self, ctx: &mut AnalysisContext, source: Arc<AudioSource>, fps: u32, launch: F) -> &ExportState
    where
        F: FnOnce() -> Result<S, EncodeError>,
    {
        if !matches!(self.state, ExportState::Idle) {
            log::warn!("Export requested while another export is in state {:?}", self.state);
            return &self.state;
        }

        if let Err(reason) = validate_source(&source, fps) {
            log::error!("Refusing to export: {}", reason);
            self.state = ExportState::Failed(ExportError::InvalidSource(reason));
            return &self.state;
        }

        ctx.analyzer.clear();
        ctx.buffer.clear();
        self.cancel.reset();

        match launch() {
            Ok(session) => {
                log::info!(
                    "Export started: {} frames of audio at {}Hz, {}fps",
                    source.frame_count(),
                    source.sample_rate,
                    fps
                );
                self.session = Some(session);
                self.job = Some(ExportJob {
                    source,
                    fps,
                    cursor: 0,
                    frames: 0,
                });
                self.state = ExportState::Exporting;
            }
            Err(err) => {
                log::error!("Encoder failed to start: {}", err);
                self.state = ExportState::Failed(ExportError::EncoderSpawn(err));
            }
        }
        &self.state
    }

    /// Advance the export by one step.
    pub fn tick<R: SpectrumRenderer>(&mut self, ctx: &mut AnalysisContext, renderer: &mut R) -> &ExportState {
        match self.state {
            ExportState::Exporting => self.tick_exporting(ctx, renderer),
            ExportState::Draining { cancelled } => self.drain(cancelled),
            _ => {}
        }
        &self.state
    }

    fn tick_exporting<R: SpectrumRenderer>(&mut self, ctx: &mut AnalysisContext, renderer: &mut R) {
        let Some(job) = self.job.as_mut() else {
            self.state = ExportState::Done { cancelled: false };
            return;
        };

        if self.cancel.is_cancelled() {
            log::info!("Export cancelled at frame {}", job.frames);
            self.state = ExportState::Draining { cancelled: true };
            return;
        }

        if job.cursor >= job.total() && ctx.analyzer.settled() {
            log::info!("Audio exhausted and spectrum settled after {} frames", job.frames);
            self.state = ExportState::Draining { cancelled: false };
            return;
        }

        job.feed(&ctx.buffer);
        ctx.analyzer.analyze(&ctx.buffer, 1.0 / job.fps as f32);

        let (width, height) = renderer.size();
        let pixels = match renderer.render(ctx.analyzer.view()) {
            Ok(pixels) => pixels,
            Err(err) => {
                let message = format!("{:#}", err);
                log::error!("Rendering frame {} failed: {}", job.frames, message);
                self.abort_session();
                self.state = ExportState::Failed(ExportError::Render(message));
                return;
            }
        };

        let frame = job.frames;
        let sent = match self.session.as_mut() {
            Some(session) => session.send_frame(&pixels, width, height),
            None => Err(EncodeError::SessionClosed),
        };
        match sent {
            Ok(()) => {
                if let Some(job) = self.job.as_mut() {
                    job.frames += 1;
                }
                log::trace!("Sent frame {}", frame);
            }
            Err(err) => {
                log::error!("Encoder rejected frame {}: {}", frame, err);
                self.abort_session();
                self.state = ExportState::Failed(ExportError::EncoderWrite(err));
            }
        }
    }

    fn drain(&mut self, cancelled: bool) {
        let result = match self.session.take() {
            Some(session) => session.end(),
            None => Ok(()),
        };
        self.state = match result {
            Ok(()) => {
                let frames = self.job.as_ref().map_or(0, |job| job.frames);
                log::info!("Export finished: {} frames{}", frames, if cancelled { " (cancelled)" } else { "" });
                ExportState::Done { cancelled }
            }
            Err(err) => {
                log::error!("Encoder did not finish cleanly: {}", err);
                ExportState::Failed(ExportError::EncoderExit(err))
            }
        };
    }

    /// Tear the session down after a mid-export failure. The failure that
    /// caused it is what gets reported; a bad exit status here is only logged.
    fn abort_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.end() {
                log::warn!("Encoder teardown after failure: {}", err);
            }
        }
    }

    /// Tick until the export reaches `Done` or `Failed`, reporting progress
    /// after every step.
    pub fn run<R, P>(&mut self, ctx: &mut AnalysisContext, renderer: &mut R, mut on_progress: P) -> &ExportState
    where
        R: SpectrumRenderer,
        P: FnMut(&ExportProgress),
    {
        while !self.state.is_terminal() {
            if matches!(self.state, ExportState::Idle) {
                break;
            }
            self.tick(ctx, renderer);
            on_progress(&self.progress());
        }
        &self.state
    }

    /// Dismiss a finished or failed export so a new one can be started.
    /// Returns false (and does nothing) while an export is still running.
    pub fn reset(&mut self) -> bool {
        if !matches!(self.state, ExportState::Idle) && !self.state.is_terminal() {
            return false;
        }
        self.state = ExportState::Idle;
        self.job = None;
        true
    }
}

impl<S: FrameSink> Drop for ExportScheduler<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            log::warn!("Export abandoned in state {:?}; finalizing encoder", self.state);
            if let Err(err) = session.end() {
                log::error!("{}", err);
            }
        }
    }
}

fn validate_source(source: &AudioSource, fps: u32) -> Result<(), String> {
    if fps == 0 {
        return Err("frame rate must be positive".into());
    }
    if source.channels == 0 {
        return Err("source has no channels".into());
    }
    if source.sample_rate < fps {
        return Err(format!(
            "sample rate {}Hz is lower than the frame rate {}fps",
            source.sample_rate, fps
        ));
    }
    Ok(())
}
