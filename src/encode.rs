//! Encoding sinks.
//!
//! Sinks consume composited frames in log order and are driven by `RenderSession`.

/// MP4 output through the system `ffmpeg`.
pub mod ffmpeg;
/// Single-image PNG output.
pub mod png;
/// The sink trait and the in-memory sink.
pub mod sink;
