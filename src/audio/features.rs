/// Per-tick analyzer output handed to renderers.
///
/// All three slices have the same length (the bucket count of the last
/// `analyze` call) and hold values in `0.0..=1.0`.
#[derive(Clone, Copy, Debug)]
pub struct SpectrumView<'a> {
    /// Normalized log-magnitude per bucket for the current tick
    pub log_buckets: &'a [f32],
    /// First low-pass stage, follows `log_buckets` at the smoothness rate
    pub smoothed: &'a [f32],
    /// Second low-pass stage, trails `smoothed` at the smearness rate
    pub smeared: &'a [f32],
}

impl SpectrumView<'_> {
    pub fn bucket_count(&self) -> usize {
        self.log_buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_buckets.is_empty()
    }
}
