use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{Fps, FrameIndex, Rgba8};
use crate::foundation::error::{ReelError, ReelResult};
use crate::render::FrameRGBA;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Options for [`FfmpegSink`].
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    pub out_path: PathBuf,
    /// Replace an existing file at `out_path`.
    pub overwrite: bool,
    /// Color transparent pixels are flattened over.
    pub bg: Rgba8,
    /// `libx264` constant rate factor; `None` keeps the encoder default.
    pub crf: Option<u8>,
}

impl FfmpegSinkOpts {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            overwrite: true,
            bg: Rgba8::rgb(0, 0, 0),
            crf: None,
        }
    }
}

/// Streams raw frames to a system `ffmpeg` process that writes H.264/MP4.
///
/// The video is written to a sibling `.partial` file and moved into place by `end`, so an
/// interrupted render never leaves a playable but incomplete file at `out_path`.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,

    scratch: Vec<u8>,
    cfg: Option<SinkConfig>,
    last_idx: Option<FrameIndex>,
    frames_written: u64,
}

impl FfmpegSink {
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            scratch: Vec::new(),
            cfg: None,
            last_idx: None,
            frames_written: 0,
        }
    }

    pub fn out_path(&self) -> &Path {
        &self.opts.out_path
    }

    fn partial_path(&self) -> PathBuf {
        partial_path_for(&self.opts.out_path)
    }

    fn join_stderr(&mut self) -> ReelResult<Vec<u8>> {
        match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ReelError::encoding("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| ReelError::encoding(format!("ffmpeg stderr read failed: {e}"))),
            None => Ok(Vec::new()),
        }
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> ReelResult<()> {
        if cfg.fps.num == 0 || cfg.fps.den == 0 {
            return Err(ReelError::encoding("fps must be non-zero"));
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(ReelError::encoding("frame width/height must be non-zero"));
        }
        if !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2) {
            return Err(ReelError::encoding(format!(
                "frame size {}x{} must be even for yuv420p output",
                cfg.width, cfg.height
            )));
        }

        ensure_parent_dir(&self.opts.out_path)?;
        if !self.opts.overwrite && self.opts.out_path.exists() {
            return Err(ReelError::encoding(format!(
                "output file '{}' already exists",
                self.opts.out_path.display()
            )));
        }

        if !is_ffmpeg_on_path() {
            return Err(ReelError::encoding(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let partial = self.partial_path();
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.arg("-y");

        // Frames arrive premultiplied and are flattened to opaque RGBA in `push_frame`.
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
        ]);
        push_input_fps(&mut cmd, cfg.fps);
        cmd.args(["-i", "pipe:0"]);
        cmd.args(["-an", "-c:v", "libx264", "-pix_fmt", "yuv420p"]);
        if let Some(crf) = self.opts.crf {
            cmd.args(["-crf", &crf.to_string()]);
        }
        // The `.partial` extension hides the container from ffmpeg's guesser.
        cmd.args(["-movflags", "+faststart", "-f", "mp4"]);
        cmd.arg(&partial);

        tracing::debug!(args = ?cmd.get_args().collect::<Vec<_>>(), "spawning ffmpeg");
        let mut child = cmd.spawn().map_err(|e| {
            ReelError::encoding(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReelError::encoding("failed to open ffmpeg stdin"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ReelError::encoding("failed to open ffmpeg stderr"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        self.scratch = vec![0u8; cfg.width as usize * cfg.height as usize * 4];
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.last_idx = None;
        self.frames_written = 0;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> ReelResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| ReelError::encoding("ffmpeg sink not started"))?;
        if let Some(last) = self.last_idx
            && idx.0 <= last.0
        {
            return Err(ReelError::encoding(format!(
                "out-of-order frame {} after frame {}",
                idx.0, last.0
            )));
        }
        self.last_idx = Some(idx);

        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(ReelError::encoding(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }
        if frame.data.len() != self.scratch.len() {
            return Err(ReelError::encoding(
                "frame data length does not match width*height*4",
            ));
        }

        flatten_premul_over_bg_to_opaque_rgba8(&mut self.scratch, &frame.data, self.opts.bg)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ReelError::encoding("ffmpeg sink is already finalized"));
        };

        use std::io::Write as _;
        stdin.write_all(&self.scratch).map_err(|e| {
            ReelError::encoding(format!("failed to write frame {} to ffmpeg: {e}", idx.0))
        })?;
        self.frames_written += 1;
        Ok(())
    }

    fn end(&mut self) -> ReelResult<()> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| ReelError::encoding("ffmpeg sink not started"))?;

        let status = child
            .wait()
            .map_err(|e| ReelError::encoding(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr_bytes = self.join_stderr()?;
        self.cfg = None;

        let partial = self.partial_path();
        if !status.success() {
            let _ = std::fs::remove_file(&partial);
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(ReelError::encoding(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        std::fs::rename(&partial, &self.opts.out_path).map_err(|e| {
            ReelError::encoding(format!(
                "failed to move '{}' to '{}': {e}",
                partial.display(),
                self.opts.out_path.display()
            ))
        })?;
        tracing::info!(
            path = %self.opts.out_path.display(),
            frames = self.frames_written,
            "video finalized"
        );
        Ok(())
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let _ = self.join_stderr();
        self.cfg = None;

        let partial = self.partial_path();
        if partial.exists() {
            match std::fs::remove_file(&partial) {
                Ok(()) => tracing::debug!(path = %partial.display(), "removed partial video"),
                Err(e) => tracing::warn!(path = %partial.display(), "could not remove partial video: {e}"),
            }
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.abort();
        }
    }
}

fn partial_path_for(out: &Path) -> PathBuf {
    let mut name = out
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "video".into());
    name.push(".partial");
    out.with_file_name(name)
}

fn push_input_fps(cmd: &mut Command, fps: Fps) {
    // `-r` before `-i` sets the rawvideo input rate; rationals pass through as `num/den`.
    cmd.args(["-r", &format!("{}/{}", fps.num, fps.den)]);
}

pub(crate) fn flatten_premul_over_bg_to_opaque_rgba8(
    dst: &mut [u8],
    src_premul: &[u8],
    bg: Rgba8,
) -> ReelResult<()> {
    if dst.len() != src_premul.len() || !dst.len().is_multiple_of(4) {
        return Err(ReelError::encoding(
            "flatten expects equal-length rgba8 buffers",
        ));
    }

    let (bg_r, bg_g, bg_b) = (u16::from(bg.r), u16::from(bg.g), u16::from(bg.b));
    for (d, s) in dst.chunks_exact_mut(4).zip(src_premul.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }

        let inv = 255 - a;
        d[0] = (u16::from(s[0]) + mul_div255(bg_r, inv)).min(255) as u8;
        d[1] = (u16::from(s[1]) + mul_div255(bg_g, inv)).min(255) as u8;
        d[2] = (u16::from(s[2]) + mul_div255(bg_b, inv)).min(255) as u8;
        d[3] = 255;
    }
    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u16 {
    ((u32::from(x) * u32::from(y) + 127) / 255) as u16
}

/// Create the parent directory of `path` if needed.
pub fn ensure_parent_dir(path: &Path) -> ReelResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            ReelError::encoding(format!(
                "failed to create output directory '{}': {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}

/// `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_premul_alpha_0_returns_bg() {
        let src = vec![0u8, 0, 0, 0];
        let mut dst = vec![0u8; 4];
        flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &src, Rgba8::rgb(10, 20, 30)).unwrap();
        assert_eq!(dst, vec![10, 20, 30, 255]);
    }

    #[test]
    fn flatten_premul_alpha_255_is_identity() {
        let src = vec![1u8, 2, 3, 255];
        let mut dst = vec![0u8; 4];
        flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &src, Rgba8::rgb(10, 20, 30)).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn flatten_premul_half_alpha_blends() {
        let src = vec![128u8, 0, 0, 128];
        let mut dst = vec![0u8; 4];
        flatten_premul_over_bg_to_opaque_rgba8(&mut dst, &src, Rgba8::rgb(0, 0, 255)).unwrap();
        assert_eq!(dst, vec![128, 0, 127, 255]);
    }

    #[test]
    fn begin_reports_unwritable_output_dir_as_encoding_error() {
        let dir = PathBuf::from("target").join("ffmpeg_blocked");
        std::fs::create_dir_all(&dir).unwrap();
        let blocker = dir.join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();

        let mut sink = FfmpegSink::new(FfmpegSinkOpts::new(blocker.join("out.mp4")));
        let err = sink
            .begin(SinkConfig {
                width: 10,
                height: 10,
                fps: Fps::new(2, 1).unwrap(),
            })
            .unwrap_err();
        assert!(matches!(err, ReelError::Encoding(_)), "{err}");
        assert!(!blocker.join("out.mp4.partial").exists());
    }

    #[test]
    fn partial_path_is_a_sibling() {
        assert_eq!(
            partial_path_for(Path::new("out/run.mp4")),
            PathBuf::from("out/run.mp4.partial")
        );
    }

    #[test]
    fn begin_rejects_odd_sizes_before_spawning() {
        let mut sink = FfmpegSink::new(FfmpegSinkOpts::new("target/ffmpeg_odd/out.mp4"));
        let err = sink
            .begin(SinkConfig {
                width: 11,
                height: 10,
                fps: Fps::new(2, 1).unwrap(),
            })
            .unwrap_err();
        assert!(matches!(err, ReelError::Encoding(_)));
    }

    #[test]
    fn push_before_begin_is_an_encoding_error() {
        let mut sink = FfmpegSink::new(FfmpegSinkOpts::new("target/ffmpeg_unstarted/out.mp4"));
        let frame = FrameRGBA {
            width: 2,
            height: 2,
            data: vec![0; 16],
        };
        assert!(matches!(
            sink.push_frame(FrameIndex(0), &frame),
            Err(ReelError::Encoding(_))
        ));
    }
}
