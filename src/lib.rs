//! fleetreel turns the frame log of a mobility-on-demand simulation into a replay video.
//!
//! The pipeline is strictly ordered:
//!
//! - a [`LogReader`] yields one [`FrameRecord`] per frame from a batch or streaming log,
//! - a [`FrameAggregator`] projects it onto the background canvas and updates trip counters,
//! - a [`Compositor`] rasterizes the resulting [`RenderableFrame`] on the CPU,
//! - a [`FrameSink`] (usually [`FfmpegSink`]) encodes the frames in index order.
//!
//! [`RenderSession`] wires these together, optionally compositing windows of frames in parallel.
#![forbid(unsafe_code)]

mod foundation;

pub mod aggregate;
pub mod config;
pub mod encode;
pub mod log;
pub mod projection;
pub mod render;
pub mod session;

pub use crate::foundation::core::{
    BoundingBox, Canvas, Fps, FrameIndex, GeoPoint, PixelPoint, Point, Rgba8,
};
pub use crate::foundation::error::{ReelError, ReelResult};

pub use crate::aggregate::{
    FrameAggregator, LineStyle, RenderableFrame, RoutePreview, TripCounters, VehicleMarker,
};
pub use crate::config::{PlatformConfig, RenderConfig, RenderOverrides};
pub use crate::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts, is_ffmpeg_on_path};
pub use crate::encode::png::PngSink;
pub use crate::encode::sink::{FrameSink, InMemorySink, SinkConfig};
pub use crate::log::model::{FrameRecord, Route, TripEvent, TripStatus, VehicleSnapshot};
pub use crate::log::reader::{LogFormat, LogReader};
pub use crate::projection::{Projector, project};
pub use crate::render::FrameRGBA;
pub use crate::render::background::Background;
pub use crate::render::compositor::{Compositor, CompositorSeed};
pub use crate::render::style::RenderStyle;
pub use crate::session::{
    RenderSession, RenderStats, RenderThreading, open_log, open_log_prefix,
};
