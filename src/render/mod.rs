pub mod frame;
pub mod pipeline;
pub mod spectrum;

pub use spectrum::GpuSpectrumRenderer;

use crate::audio::features::SpectrumView;

/// Turns one analyzer tick into a picture.
pub trait SpectrumRenderer {
    /// Surface size in pixels.
    fn size(&self) -> (u32, u32);

    /// Draws `view` and returns `width * height * 4` RGBA bytes with rows
    /// stored bottom to top.
    fn render(&mut self, view: SpectrumView<'_>) -> anyhow::Result<Vec<u8>>;
}
