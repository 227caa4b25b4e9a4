use rustfft::num_complex::Complex32;
use std::ops::Range;

use super::buffer::SampleBuffer;
use super::features::SpectrumView;
use super::fft::{fft, hann};

pub const DEFAULT_FFT_SIZE: usize = 1 << 15;
pub const DEFAULT_SMOOTHNESS: f32 = 8.0;
pub const DEFAULT_SMEARNESS: f32 = 3.0;

/// Each bucket spans `[f, ceil(f * BUCKET_STEP))` bins.
const BUCKET_STEP: f32 = 1.06;
const LOWEST_BIN: f32 = 1.0;
const SETTLE_EPSILON: f32 = 1e-3;

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("FFT size must be a non-zero power of two, got {0}")]
    InvalidFftSize(usize),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnalyzerSettings {
    /// Window length N; must be a power of two
    pub fft_size: usize,
    /// Rate (1/s) at which `smoothed` chases the current buckets
    pub smoothness: f32,
    /// Rate (1/s) at which `smeared` chases `smoothed`
    pub smearness: f32,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            smoothness: DEFAULT_SMOOTHNESS,
            smearness: DEFAULT_SMEARNESS,
        }
    }
}

/// Streaming spectrum analyzer: Hann window, FFT, log-frequency buckets,
/// peak normalization and two cascaded one-pole smoothers.
///
/// All per-frame arrays are sized to N at construction and reused; entries
/// past the current bucket count are never exposed.
pub struct SpectrumAnalyzer {
    settings: AnalyzerSettings,
    window: Vec<f32>,
    buckets: Vec<Range<usize>>,
    raw: Vec<f32>,
    windowed: Vec<f32>,
    spectrum: Vec<Complex32>,
    log_buckets: Vec<f32>,
    smoothed: Vec<f32>,
    smeared: Vec<f32>,
    bucket_count: usize,
}

impl SpectrumAnalyzer {
    pub fn new(settings: AnalyzerSettings) -> Result<Self, AnalyzerError> {
        let n = settings.fft_size;
        if n == 0 || !n.is_power_of_two() {
            return Err(AnalyzerError::InvalidFftSize(n));
        }

        let buckets = bucket_bins(n);
        log::debug!(
            "Spectrum analyzer: N={}, {} buckets, smoothness={}, smearness={}",
            n,
            buckets.len(),
            settings.smoothness,
            settings.smearness
        );

        Ok(Self {
            settings,
            window: (0..n).map(|i| if n > 1 { hann(i, n) } else { 1.0 }).collect(),
            buckets,
            raw: vec![0.0; n],
            windowed: vec![0.0; n],
            spectrum: vec![Complex32::new(0.0, 0.0); n],
            log_buckets: vec![0.0; n],
            smoothed: vec![0.0; n],
            smeared: vec![0.0; n],
            bucket_count: 0,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.settings.fft_size
    }

    /// Analyze the current contents of `buffer`, advancing the smoothers by
    /// `dt` seconds. Returns the number of valid buckets.
    ///
    /// In export mode `dt` must be the fixed `1 / fps`, never wall-clock time.
    pub fn analyze(&mut self, buffer: &SampleBuffer, dt: f32) -> usize {
        assert_eq!(
            buffer.capacity(),
            self.settings.fft_size,
            "sample buffer capacity does not match the analyzer FFT size"
        );
        buffer.snapshot(&mut self.raw);

        for ((w, &x), &coeff) in self.windowed.iter_mut().zip(&self.raw).zip(&self.window) {
            *w = x * coeff;
        }

        let n = self.settings.fft_size;
        fft(&self.windowed, 0, 1, &mut self.spectrum, n);

        let mut max_amp = 1.0f32;
        for (slot, bins) in self.log_buckets.iter_mut().zip(&self.buckets) {
            let mut a = 0.0f32;
            for bin in &self.spectrum[bins.clone()] {
                let b = log_power(*bin);
                if b > a {
                    a = b;
                }
            }
            if a > max_amp {
                max_amp = a;
            }
            *slot = a;
        }

        let m = self.buckets.len();
        for value in &mut self.log_buckets[..m] {
            *value /= max_amp;
        }

        let smooth_rate = self.settings.smoothness * dt;
        let smear_rate = self.settings.smearness * dt;
        for i in 0..m {
            self.smoothed[i] += (self.log_buckets[i] - self.smoothed[i]) * smooth_rate;
            self.smeared[i] += (self.smoothed[i] - self.smeared[i]) * smear_rate;
        }

        self.bucket_count = m;
        log::trace!("analyze: dt={:.4}, m={}, peak log-power={:.3}", dt, m, max_amp);
        m
    }

    /// Buckets of the last `analyze` call. Empty before the first call and
    /// after `clear`.
    pub fn view(&self) -> SpectrumView<'_> {
        let m = self.bucket_count;
        SpectrumView {
            log_buckets: &self.log_buckets[..m],
            smoothed: &self.smoothed[..m],
            smeared: &self.smeared[..m],
        }
    }

    /// True once every smoothed and smeared value has decayed below 1e-3.
    pub fn settled(&self) -> bool {
        !self
            .smoothed
            .iter()
            .chain(self.smeared.iter())
            .any(|&v| v > SETTLE_EPSILON)
    }

    /// Reset all spectral state. Call before every new analysis session so
    /// the previous session's decay does not bleed into it.
    pub fn clear(&mut self) {
        self.raw.fill(0.0);
        self.windowed.fill(0.0);
        self.spectrum.fill(Complex32::new(0.0, 0.0));
        self.log_buckets.fill(0.0);
        self.smoothed.fill(0.0);
        self.smeared.fill(0.0);
        self.bucket_count = 0;
    }

    /// FFT bin range covered by each bucket, in bucket order.
    pub fn bucket_ranges(&self) -> &[Range<usize>] {
        &self.buckets
    }

    /// Frequency range in Hz covered by bucket `index`.
    pub fn bucket_frequency_range(&self, index: usize, sample_rate: u32) -> Option<Range<f32>> {
        let bins = self.buckets.get(index)?;
        let hz_per_bin = sample_rate as f32 / self.settings.fft_size as f32;
        Some(bins.start as f32 * hz_per_bin..bins.end as f32 * hz_per_bin)
    }
}

/// Geometric bucket scan over bins `[1, n/2)`: starting at bin 1, each bucket
/// covers `[f, ceil(f * 1.06))`, clamped to `n/2`.
pub fn bucket_bins(n: usize) -> Vec<Range<usize>> {
    let half = n / 2;
    let mut buckets = Vec::new();
    let mut f = LOWEST_BIN;
    while (f as usize) < half {
        let f1 = (f * BUCKET_STEP).ceil();
        buckets.push(f as usize..(f1 as usize).min(half));
        f = f1;
    }
    buckets
}

#[inline]
fn log_power(z: Complex32) -> f32 {
    (z.re * z.re + z.im * z.im).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const N: usize = 1024;

    fn analyzer() -> SpectrumAnalyzer {
        SpectrumAnalyzer::new(AnalyzerSettings {
            fft_size: N,
            ..Default::default()
        })
        .unwrap()
    }

    fn tone(buffer: &SampleBuffer, freq_bin: f32) {
        tone_at(buffer, freq_bin, 0.8);
    }

    fn tone_at(buffer: &SampleBuffer, freq_bin: f32, amplitude: f32) {
        for i in 0..N {
            let t = i as f32 / N as f32;
            buffer.push((2.0 * PI * freq_bin * t).sin() * amplitude);
        }
    }

    #[test]
    fn rejects_invalid_fft_sizes() {
        for size in [0, 3, 1000] {
            let result = SpectrumAnalyzer::new(AnalyzerSettings {
                fft_size: size,
                ..Default::default()
            });
            assert!(matches!(result, Err(AnalyzerError::InvalidFftSize(s)) if s == size));
        }
    }

    #[test]
    fn buckets_tile_lower_half_of_spectrum() {
        let buckets = bucket_bins(N);
        assert_eq!(buckets[0], 1..2);
        assert_eq!(buckets.last().unwrap().end, N / 2);
        for pair in buckets.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start < pair[0].end);
        }
        assert!(buckets.len() <= N / 2);
    }

    #[test]
    fn bucket_count_is_deterministic() {
        let buffer = SampleBuffer::new(N);
        let mut analyzer = analyzer();
        tone(&buffer, 40.0);
        let first = analyzer.analyze(&buffer, 1.0 / 60.0);
        tone(&buffer, 90.0);
        let second = analyzer.analyze(&buffer, 1.0 / 60.0);
        assert_eq!(first, second);
        assert_eq!(first, analyzer.bucket_ranges().len());
        assert_eq!(analyzer.view().bucket_count(), first);
    }

    #[test]
    fn normalizes_peak_bucket_to_one() {
        let buffer = SampleBuffer::new(N);
        let mut analyzer = analyzer();
        tone(&buffer, 64.0);
        analyzer.analyze(&buffer, 1.0 / 60.0);

        let view = analyzer.view();
        let peak = view.log_buckets.iter().copied().fold(0.0f32, f32::max);
        assert_eq!(peak, 1.0);
        assert!(view.log_buckets.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn quiet_signal_is_not_stretched_to_full_scale() {
        // Peak bin magnitude is about amplitude * N / 4; the normalizer never
        // divides by less than 1.0, so log-powers below that stay small.
        let buffer = SampleBuffer::new(N);
        let mut analyzer = analyzer();
        tone_at(&buffer, 64.0, 5e-3);
        analyzer.analyze(&buffer, 1.0 / 60.0);
        let peak = analyzer.view().log_buckets.iter().copied().fold(0.0f32, f32::max);
        assert!(peak > 0.0 && peak < 1.0, "peak was {}", peak);
        assert!(analyzer.view().log_buckets.iter().all(|&v| (0.0..=1.0).contains(&v)));

        let buffer = SampleBuffer::new(N);
        tone_at(&buffer, 64.0, 1e-3);
        analyzer.analyze(&buffer, 1.0 / 60.0);
        let peak = analyzer.view().log_buckets.iter().copied().fold(0.0f32, f32::max);
        assert!(peak < 1.0, "peak was {}", peak);
        assert!(analyzer.view().log_buckets.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn silence_yields_zero_buckets() {
        let buffer = SampleBuffer::new(N);
        let mut analyzer = analyzer();
        analyzer.analyze(&buffer, 1.0 / 60.0);
        assert!(analyzer.view().log_buckets.iter().all(|&v| v == 0.0));
        assert!(analyzer.settled());
    }

    #[test]
    fn peak_bucket_contains_tone_frequency() {
        let buffer = SampleBuffer::new(N);
        let mut analyzer = analyzer();
        tone(&buffer, 100.0);
        analyzer.analyze(&buffer, 1.0 / 60.0);

        let view = analyzer.view();
        let loudest = view
            .log_buckets
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert!(analyzer.bucket_ranges()[loudest].contains(&100));

        let hz = analyzer.bucket_frequency_range(loudest, N as u32).unwrap();
        assert!(hz.start <= 100.0 && 100.0 < hz.end);
    }

    #[test]
    fn smoothing_converges_without_overshoot() {
        let buffer = SampleBuffer::new(N);
        let mut analyzer = analyzer();
        tone(&buffer, 32.0);

        let dt = 1.0 / 60.0;
        let mut previous = vec![0.0f32; N];
        for _ in 0..300 {
            analyzer.analyze(&buffer, dt);
            let view = analyzer.view();
            for (i, (&target, &value)) in view.log_buckets.iter().zip(view.smoothed).enumerate() {
                assert!(value >= previous[i], "bucket {} moved away from its target", i);
                assert!(value <= target + 1e-6, "bucket {} overshot", i);
                previous[i] = value;
            }
        }

        let view = analyzer.view();
        for (&target, &value) in view.log_buckets.iter().zip(view.smoothed) {
            assert!((target - value).abs() < 1e-3);
        }
    }

    #[test]
    fn settles_after_input_stops_and_wakes_on_new_input() {
        let buffer = SampleBuffer::new(N);
        let mut analyzer = analyzer();
        let dt = 1.0 / 60.0;

        tone(&buffer, 50.0);
        for _ in 0..30 {
            analyzer.analyze(&buffer, dt);
        }
        assert!(!analyzer.settled());

        for _ in 0..N {
            buffer.push(0.0);
        }
        let mut ticks = 0;
        while !analyzer.settled() {
            analyzer.analyze(&buffer, dt);
            ticks += 1;
            assert!(ticks < 10_000, "analyzer never settled");
        }
        assert!(ticks > 1);
        assert!(analyzer.view().smoothed.iter().all(|&v| v <= SETTLE_EPSILON));
        assert!(analyzer.view().smeared.iter().all(|&v| v <= SETTLE_EPSILON));

        tone(&buffer, 50.0);
        analyzer.analyze(&buffer, dt);
        assert!(!analyzer.settled());
    }

    #[test]
    fn clear_resets_all_state() {
        let buffer = SampleBuffer::new(N);
        let mut analyzer = analyzer();
        tone(&buffer, 20.0);
        analyzer.analyze(&buffer, 1.0 / 30.0);
        assert!(!analyzer.settled());

        analyzer.clear();
        assert!(analyzer.settled());
        assert!(analyzer.view().is_empty());
    }
}
