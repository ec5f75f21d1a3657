use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::encode::ffmpeg::{ensure_parent_dir, flatten_premul_over_bg_to_opaque_rgba8};
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{FrameIndex, Rgba8};
use crate::foundation::error::{ReelError, ReelResult};
use crate::render::FrameRGBA;

/// Writes exactly one frame as an opaque PNG.
///
/// Nothing touches the disk until `end`.
#[derive(Debug)]
pub struct PngSink {
    out_path: PathBuf,
    bg: Rgba8,
    cfg: Option<SinkConfig>,
    frame: Option<(FrameIndex, Vec<u8>)>,
}

impl PngSink {
    pub fn new(out_path: impl Into<PathBuf>, bg: Rgba8) -> Self {
        Self {
            out_path: out_path.into(),
            bg,
            cfg: None,
            frame: None,
        }
    }

    pub fn out_path(&self) -> &Path {
        &self.out_path
    }
}

impl FrameSink for PngSink {
    fn begin(&mut self, cfg: SinkConfig) -> ReelResult<()> {
        self.cfg = Some(cfg);
        self.frame = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> ReelResult<()> {
        let cfg = self
            .cfg
            .ok_or_else(|| ReelError::encoding("png sink not started"))?;
        if let Some((first, _)) = &self.frame {
            return Err(ReelError::encoding(format!(
                "png sink holds frame {} and cannot take frame {}",
                first.0, idx.0
            )));
        }
        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(ReelError::encoding(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }

        let mut rgba = vec![0u8; frame.data.len()];
        flatten_premul_over_bg_to_opaque_rgba8(&mut rgba, &frame.data, self.bg)?;
        self.frame = Some((idx, rgba));
        Ok(())
    }

    fn end(&mut self) -> ReelResult<()> {
        let cfg = self
            .cfg
            .take()
            .ok_or_else(|| ReelError::encoding("png sink not started"))?;
        let (idx, rgba) = self
            .frame
            .take()
            .ok_or_else(|| ReelError::encoding("png sink received no frame"))?;

        ensure_parent_dir(&self.out_path)?;
        let img = image::RgbaImage::from_raw(cfg.width, cfg.height, rgba)
            .ok_or_else(|| ReelError::encoding("frame buffer does not match its size"))?;
        img.save(&self.out_path)
            .with_context(|| format!("write png '{}'", self.out_path.display()))?;
        tracing::info!(path = %self.out_path.display(), frame = idx.0, "wrote frame image");
        Ok(())
    }

    fn abort(&mut self) {
        self.cfg = None;
        self.frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Fps;

    fn cfg() -> SinkConfig {
        SinkConfig {
            width: 2,
            height: 2,
            fps: Fps::new(1, 1).unwrap(),
        }
    }

    fn frame(alpha: u8) -> FrameRGBA {
        FrameRGBA {
            width: 2,
            height: 2,
            data: [0, 0, 0, alpha].repeat(4),
        }
    }

    #[test]
    fn writes_flattened_png() {
        let path = PathBuf::from("target").join("png_sink").join("one.png");
        let _ = std::fs::remove_file(&path);
        let mut sink = PngSink::new(path.clone(), Rgba8::rgb(0, 255, 0));
        sink.begin(cfg()).unwrap();
        sink.push_frame(FrameIndex(3), &frame(0)).unwrap();
        sink.end().unwrap();

        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(1, 1).0, [0, 255, 0, 255]);
    }

    #[test]
    fn second_frame_is_rejected() {
        let mut sink = PngSink::new("target/png_sink/two.png", Rgba8::rgb(0, 0, 0));
        sink.begin(cfg()).unwrap();
        sink.push_frame(FrameIndex(0), &frame(255)).unwrap();
        assert!(sink.push_frame(FrameIndex(1), &frame(255)).is_err());
    }

    #[test]
    fn abort_writes_nothing() {
        let path = PathBuf::from("target").join("png_sink").join("aborted.png");
        let _ = std::fs::remove_file(&path);
        let mut sink = PngSink::new(path.clone(), Rgba8::rgb(0, 0, 0));
        sink.begin(cfg()).unwrap();
        sink.push_frame(FrameIndex(0), &frame(255)).unwrap();
        sink.abort();
        assert!(!path.exists());
        assert!(sink.end().is_err());
    }
}
