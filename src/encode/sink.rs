use crate::foundation::core::{Fps, FrameIndex};
use crate::foundation::error::ReelResult;
use crate::render::FrameRGBA;

/// Configuration provided to a [`FrameSink`] before the first frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
}

/// Consumer of composited frames.
///
/// `push_frame` is called in strictly increasing `FrameIndex` order. After a failure anywhere in
/// the pipeline the session calls `abort` instead of `end`; a sink must then leave no finished
/// output behind.
pub trait FrameSink: Send {
    fn begin(&mut self, cfg: SinkConfig) -> ReelResult<()>;
    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> ReelResult<()>;
    /// Finalize the output after the last frame.
    fn end(&mut self) -> ReelResult<()>;
    /// Discard everything written so far.
    fn abort(&mut self) {}
}

/// Keeps frames in memory, for tests and previews.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: Vec<(FrameIndex, FrameRGBA)>,
    finished: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg
    }

    pub fn frames(&self) -> &[(FrameIndex, FrameRGBA)] {
        &self.frames
    }

    /// `true` once `end` succeeded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> ReelResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        self.finished = false;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> ReelResult<()> {
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> ReelResult<()> {
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.frames.clear();
        self.finished = false;
    }
}
