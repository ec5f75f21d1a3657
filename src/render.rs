//! Frame composition: the style table, the static background and the CPU compositor.

pub mod background;
mod blend;
pub mod compositor;
pub mod style;
mod text;

/// A composited frame as premultiplied RGBA8 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    pub width: u32,
    pub height: u32,
    /// Premultiplied RGBA8 bytes, tightly packed, row-major.
    pub data: Vec<u8>,
}
