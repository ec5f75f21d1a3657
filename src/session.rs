//! Render sessions: drive log records through aggregation and composition into a sink.

use std::sync::{Arc, mpsc};

use rayon::prelude::*;

use crate::{
    aggregate::{FrameAggregator, RenderableFrame, TripCounters},
    config::RenderConfig,
    encode::sink::{FrameSink, SinkConfig},
    foundation::{
        core::{Fps, FrameIndex},
        error::{ReelError, ReelResult},
    },
    log::{model::FrameRecord, reader::LogReader},
    projection::Projector,
    render::{FrameRGBA, background::Background, compositor::Compositor},
};

const MAX_REORDER_BUFFER_BYTES: u64 = 128 * 1024 * 1024;
const ENCODE_QUEUE_FRAMES: usize = 4;

/// How a session spreads work over threads.
#[derive(Clone, Debug)]
pub struct RenderThreading {
    /// Aggregate and composite windows of frames on a dedicated rayon pool.
    pub parallel: bool,
    /// Frames read ahead per window; also bounds the frames held in memory.
    pub chunk_size: usize,
    /// Worker thread count. `None` uses rayon defaults.
    pub threads: Option<usize>,
}

impl Default for RenderThreading {
    fn default() -> Self {
        Self {
            parallel: false,
            chunk_size: 32,
            threads: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Frames the log was expected to hold.
    pub frames_total: u64,
    /// Frames handed to the sink.
    pub frames_rendered: u64,
    /// Trip counters as of the last rendered frame.
    pub counters: TripCounters,
}

/// A configured renderer: projection and timing for aggregation plus a compositor prototype.
///
/// Nothing in a session changes from frame to frame; trip counters are threaded through each
/// render call explicitly.
pub struct RenderSession {
    aggregator: FrameAggregator,
    compositor: Compositor,
    fps: Fps,
    threading: RenderThreading,
}

impl RenderSession {
    pub fn new(
        aggregator: FrameAggregator,
        compositor: Compositor,
        fps: Fps,
        threading: RenderThreading,
    ) -> ReelResult<Self> {
        if aggregator.projector().canvas() != compositor.canvas() {
            return Err(ReelError::render(
                "projection canvas does not match the background canvas",
            ));
        }
        Ok(Self {
            aggregator,
            compositor,
            fps,
            threading,
        })
    }

    /// Load the background and font named by `cfg` and build the session around them.
    pub fn from_config(cfg: &RenderConfig, threading: RenderThreading) -> ReelResult<Self> {
        let background = Background::load(&cfg.background_path)?;
        let projector = Projector::new(cfg.bbox, background.canvas());
        let aggregator = FrameAggregator::new(projector, cfg.frame_interval_s, cfg.warmup_cutoff_s);

        let style = Arc::new(cfg.style.clone());
        let explicit_font = cfg.style.font_path.is_some();
        let font = match cfg.style.resolve_font() {
            Some(path) => match std::fs::read(&path) {
                Ok(bytes) => Some(Arc::new(bytes)),
                Err(e) if explicit_font => {
                    return Err(ReelError::config(format!(
                        "read font '{}': {e}",
                        path.display()
                    )));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "could not read system font: {e}");
                    None
                }
            },
            None => None,
        };

        let compositor = match Compositor::new(background.clone(), style.clone(), font.clone()) {
            Ok(c) => c,
            Err(e) if font.is_some() && !explicit_font => {
                tracing::warn!("system font rejected ({e}), rendering without text");
                Compositor::new(background, style, None)?
            }
            Err(e) => return Err(e),
        };
        if !compositor.draws_text() {
            tracing::warn!("no usable font found, the status line will only be logged");
        }

        tracing::info!(
            width = compositor.canvas().width,
            height = compositor.canvas().height,
            fps = %cfg.fps,
            frame_interval_s = cfg.frame_interval_s,
            "render session ready"
        );
        Self::new(aggregator, compositor, cfg.fps, threading)
    }

    pub fn fps(&self) -> Fps {
        self.fps
    }

    pub fn aggregator(&self) -> &FrameAggregator {
        &self.aggregator
    }

    /// Render frame `index` of `reader` on its own, for previews.
    ///
    /// Earlier frames are still read and aggregated so that the counters match a full render.
    pub fn render_single_frame(
        &mut self,
        reader: LogReader,
        index: FrameIndex,
    ) -> ReelResult<(RenderableFrame, FrameRGBA)> {
        if index.0 >= reader.expected_frames() {
            return Err(ReelError::config(format!(
                "frame {} is past the {} frame(s) expected in the log",
                index.0,
                reader.expected_frames()
            )));
        }

        let mut prior = TripCounters::default();
        for item in reader {
            let (i, record) = item?;
            let (frame, counters) = self.aggregator.aggregate(i, &record, prior);
            prior = counters;
            if i == index {
                let rgba = self.compositor.compose(&frame)?;
                tracing::info!(frame = i.0, status = %frame.status_text(), "rendered frame");
                return Ok((frame, rgba));
            }
        }
        Err(ReelError::render(format!(
            "log ended before frame {}",
            index.0
        )))
    }

    /// Render every frame of `reader` into `sink`, in log order.
    ///
    /// The sink runs on its own thread behind a short queue. On any failure, whether reading,
    /// composing or encoding, the sink is aborted instead of finalized.
    #[tracing::instrument(skip_all, fields(parallel = self.threading.parallel))]
    pub fn render_to_sink(
        &mut self,
        reader: LogReader,
        sink: &mut dyn FrameSink,
    ) -> ReelResult<RenderStats> {
        let canvas = self.compositor.canvas();
        let cfg = SinkConfig {
            width: canvas.width,
            height: canvas.height,
            fps: self.fps,
        };
        let frames_total = reader.expected_frames();

        let pool = if self.threading.parallel {
            Some(build_thread_pool(self.threading.threads)?)
        } else {
            None
        };

        if let Err(e) = sink.begin(cfg) {
            sink.abort();
            return Err(e);
        }

        let (produce_res, encode_res) = std::thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel::<FrameMsg>(ENCODE_QUEUE_FRAMES);
            let sink_ref: &mut dyn FrameSink = &mut *sink;

            let enc = scope.spawn(move || -> ReelResult<u64> {
                let mut pushed = 0u64;
                for msg in rx {
                    sink_ref.push_frame(msg.idx, &msg.frame)?;
                    pushed += 1;
                }
                Ok(pushed)
            });

            let produce_res = match pool.as_ref() {
                Some(pool) => self.produce_parallel(reader, pool, &tx),
                None => self.produce_sequential(reader, &tx),
            };
            drop(tx);

            let encode_res = enc
                .join()
                .unwrap_or_else(|_| Err(ReelError::encoding("encoder thread panicked")));
            (produce_res, encode_res)
        });

        // An encoder failure closes the queue, which the producer sees as a send error.
        let outcome = match (produce_res, encode_res) {
            (_, Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Ok(counters), Ok(pushed)) => Ok((pushed, counters)),
        };

        let (frames_rendered, counters) = match outcome {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("render failed, discarding output: {e}");
                sink.abort();
                return Err(e);
            }
        };
        if let Err(e) = sink.end() {
            sink.abort();
            return Err(e);
        }

        tracing::info!(
            frames = frames_rendered,
            fps = %self.fps,
            requested = counters.total_requested,
            accepted = counters.accepted,
            completed = counters.completed,
            "render finished"
        );
        Ok(RenderStats {
            frames_total,
            frames_rendered,
            counters,
        })
    }

    fn produce_sequential(
        &mut self,
        reader: LogReader,
        tx: &mpsc::SyncSender<FrameMsg>,
    ) -> ReelResult<TripCounters> {
        let mut prior = TripCounters::default();
        for item in reader {
            let (idx, record) = item?;
            let (frame, counters) = self.aggregator.aggregate(idx, &record, prior);
            prior = counters;
            let rgba = self.compositor.compose(&frame)?;
            log_frame(&frame);
            send(tx, idx, rgba)?;
        }
        Ok(prior)
    }

    fn produce_parallel(
        &self,
        mut reader: LogReader,
        pool: &rayon::ThreadPool,
        tx: &mpsc::SyncSender<FrameMsg>,
    ) -> ReelResult<TripCounters> {
        let chunk_size = self.window_frames();
        let aggregator = &self.aggregator;
        let seed = self.compositor.seed();
        let mut prior = TripCounters::default();

        loop {
            let window = reader
                .by_ref()
                .take(chunk_size)
                .collect::<ReelResult<Vec<(FrameIndex, FrameRecord)>>>()?;
            if window.is_empty() {
                return Ok(prior);
            }

            let mut frames = pool.install(|| {
                window
                    .par_iter()
                    .map(|(idx, record)| {
                        aggregator
                            .aggregate(*idx, record, TripCounters::default())
                            .0
                    })
                    .collect::<Vec<_>>()
            });
            prior = thread_counters(&mut frames, prior);

            let rendered = pool.install(|| {
                frames
                    .par_iter()
                    .map_init(|| seed.build(), |c, frame| c.compose(frame))
                    .collect::<Vec<_>>()
            });
            for (frame, rgba) in frames.iter().zip(rendered) {
                let rgba = rgba?;
                log_frame(frame);
                send(tx, frame.index, rgba)?;
            }
        }
    }

    fn window_frames(&self) -> usize {
        let canvas = self.compositor.canvas();
        let bytes_per_frame = (canvas.bytes_rgba8() as u64).max(1);
        let max_by_mem = (MAX_REORDER_BUFFER_BYTES / bytes_per_frame).max(1);
        (self.threading.chunk_size.max(1) as u64).min(max_by_mem) as usize
    }
}

/// Open the log named by `cfg`, expecting `cfg.frame_count` frames.
pub fn open_log(cfg: &RenderConfig) -> ReelResult<LogReader> {
    LogReader::open(&cfg.log_path, cfg.log_format, cfg.frame_count)
}

/// Open the log with only the first `frames` frames expected, for single-frame previews.
pub fn open_log_prefix(cfg: &RenderConfig, frames: u64) -> ReelResult<LogReader> {
    LogReader::open(&cfg.log_path, cfg.log_format, frames)
}

/// Carry counters through a window of frames aggregated independently, in index order.
///
/// Each frame ends up with the running maximum of `prior` and every recount up to it, which is
/// what sequential aggregation produces. Returns the counters of the last frame.
fn thread_counters(frames: &mut [RenderableFrame], mut prior: TripCounters) -> TripCounters {
    for frame in frames {
        prior = prior.merge_max(frame.counters);
        frame.counters = prior;
    }
    prior
}

struct FrameMsg {
    idx: FrameIndex,
    frame: FrameRGBA,
}

fn send(tx: &mpsc::SyncSender<FrameMsg>, idx: FrameIndex, frame: FrameRGBA) -> ReelResult<()> {
    tx.send(FrameMsg { idx, frame })
        .map_err(|_| ReelError::encoding("encoder thread is not accepting frames"))
}

fn log_frame(frame: &RenderableFrame) {
    tracing::debug!(
        frame = frame.index.0,
        vehicles = frame.vehicles.len(),
        walkaways = frame.walkaways.len(),
        status = %frame.status_text(),
        "composited frame"
    );
}

fn build_thread_pool(threads: Option<usize>) -> ReelResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(ReelError::config("thread count must be >= 1 when set"));
    }
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| ReelError::render(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encode::sink::InMemorySink,
        foundation::core::{BoundingBox, Canvas, Rgba8},
        log::reader::LogFormat,
        render::style::RenderStyle,
    };

    fn session(threading: RenderThreading) -> RenderSession {
        let canvas = Canvas::new(20, 20).unwrap();
        let bbox = BoundingBox::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let aggregator = FrameAggregator::new(Projector::new(bbox, canvas), 1.0, 0.0);
        let bg = Background::solid(canvas, Rgba8::rgb(255, 255, 255)).unwrap();
        let compositor = Compositor::new(bg, Arc::new(RenderStyle::default()), None).unwrap();
        RenderSession::new(aggregator, compositor, Fps::new(2, 1).unwrap(), threading).unwrap()
    }

    fn streaming_log(frames: usize, terminated: bool) -> String {
        let mut out = String::new();
        for i in 0..frames {
            out.push_str(&format!(
                "system_time: {i}\nvehicles:\n  - pos: {{lon: {x}, lat: 5}}\n",
                x = i % 10
            ));
            if terminated || i + 1 < frames {
                out.push_str("---\n");
            }
        }
        out
    }

    fn reader(text: String, expected: u64) -> LogReader {
        LogReader::from_reader(std::io::Cursor::new(text), LogFormat::Streaming, expected).unwrap()
    }

    #[test]
    fn sequential_render_pushes_every_frame_in_order() {
        let mut s = session(RenderThreading::default());
        let mut sink = InMemorySink::new();
        let stats = s.render_to_sink(reader(streaming_log(5, true), 5), &mut sink).unwrap();

        assert_eq!(
            stats,
            RenderStats {
                frames_total: 5,
                frames_rendered: 5,
                counters: TripCounters::default(),
            }
        );
        assert!(sink.is_finished());
        let idx: Vec<u64> = sink.frames().iter().map(|(i, _)| i.0).collect();
        assert_eq!(idx, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn parallel_render_matches_sequential() {
        let mut seq = session(RenderThreading::default());
        let mut par = session(RenderThreading {
            parallel: true,
            chunk_size: 3,
            threads: Some(2),
        });
        let mut a = InMemorySink::new();
        let mut b = InMemorySink::new();
        seq.render_to_sink(reader(streaming_log(7, true), 7), &mut a).unwrap();
        par.render_to_sink(reader(streaming_log(7, true), 7), &mut b).unwrap();
        assert_eq!(a.frames(), b.frames());
    }

    /// Trip `a` waits then walks away; trip `b` completes and then drops out of the list, so the
    /// last frame's own recount is lower than the one before it.
    fn shrinking_trip_log() -> String {
        let frames = [
            "system_time: 0\nvehicles: []\ntrips:\n\
             \x20 - {request_time: 0, origin: {lon: 1, lat: 1}, status: WAITING}\n",
            "system_time: 1\nvehicles: []\ntrips:\n\
             \x20 - {request_time: 0, origin: {lon: 1, lat: 1}, status: WAITING}\n\
             \x20 - {request_time: 1, origin: {lon: 2, lat: 2}, status: COMPLETE}\n",
            "system_time: 2\nvehicles: []\ntrips:\n\
             \x20 - {request_time: 0, origin: {lon: 1, lat: 1}, status: WALKAWAY}\n",
        ];
        frames.iter().map(|f| format!("{f}---\n")).collect()
    }

    #[test]
    fn counters_hold_their_peak_when_a_recount_drops() {
        let peak = TripCounters {
            total_requested: 2,
            accepted: 2,
            completed: 1,
        };
        for parallel in [false, true] {
            let mut s = session(RenderThreading {
                parallel,
                chunk_size: 2,
                threads: Some(2),
            });
            let mut sink = InMemorySink::new();
            let stats = s
                .render_to_sink(reader(shrinking_trip_log(), 3), &mut sink)
                .unwrap();
            assert_eq!(stats.frames_rendered, 3);
            assert_eq!(stats.counters, peak, "parallel = {parallel}");
        }
    }

    #[test]
    fn threaded_counters_match_sequential_aggregation() {
        let s = session(RenderThreading::default());
        let records: Vec<(FrameIndex, FrameRecord)> = reader(shrinking_trip_log(), 3)
            .collect::<ReelResult<_>>()
            .unwrap();

        let mut prior = TripCounters::default();
        let mut sequential = Vec::new();
        for (idx, record) in &records {
            let (_, next) = s.aggregator.aggregate(*idx, record, prior);
            sequential.push(next);
            prior = next;
        }

        let mut frames: Vec<RenderableFrame> = records
            .iter()
            .map(|(idx, record)| {
                s.aggregator
                    .aggregate(*idx, record, TripCounters::default())
                    .0
            })
            .collect();
        // The last frame recounts lower on its own.
        assert_eq!(
            frames[2].counters,
            TripCounters {
                total_requested: 1,
                accepted: 0,
                completed: 0,
            }
        );
        let (head, tail) = frames.split_at_mut(2);
        let carried = thread_counters(head, TripCounters::default());
        let last = thread_counters(tail, carried);

        let threaded: Vec<TripCounters> = frames.iter().map(|f| f.counters).collect();
        assert_eq!(threaded, sequential);
        assert_eq!(last, sequential[2]);
        assert_eq!(sequential[2], sequential[1]);
    }

    #[test]
    fn truncated_log_aborts_the_sink() {
        for parallel in [false, true] {
            let mut s = session(RenderThreading {
                parallel,
                chunk_size: 2,
                threads: Some(2),
            });
            let mut sink = InMemorySink::new();
            let err = s
                .render_to_sink(reader(streaming_log(3, false), 3), &mut sink)
                .unwrap_err();
            assert!(
                matches!(err, ReelError::TruncatedLog { expected: 3, read: 2 }),
                "{err}"
            );
            assert_eq!(err.last_good_frame(), Some(1));
            assert!(!sink.is_finished());
            assert!(sink.frames().is_empty());
        }
    }

    #[test]
    fn single_frame_render_checks_bounds() {
        let mut s = session(RenderThreading::default());
        let (frame, rgba) = s
            .render_single_frame(reader(streaming_log(4, true), 4), FrameIndex(2))
            .unwrap();
        assert_eq!(frame.index, FrameIndex(2));
        assert_eq!(frame.system_time_s, 2.0);
        assert_eq!(rgba.data.len(), 20 * 20 * 4);

        let err = s
            .render_single_frame(reader(streaming_log(4, true), 2), FrameIndex(2))
            .unwrap_err();
        assert!(matches!(err, ReelError::Config(_)));
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(build_thread_pool(Some(0)).is_err());
        assert!(build_thread_pool(Some(1)).is_ok());
    }

    #[test]
    fn mismatched_canvas_is_rejected() {
        let bbox = BoundingBox::new(0.0, 1.0, 0.0, 1.0).unwrap();
        let aggregator =
            FrameAggregator::new(Projector::new(bbox, Canvas::new(10, 10).unwrap()), 1.0, 0.0);
        let bg = Background::solid(Canvas::new(20, 20).unwrap(), Rgba8::rgb(0, 0, 0)).unwrap();
        let compositor = Compositor::new(bg, Arc::new(RenderStyle::default()), None).unwrap();
        assert!(
            RenderSession::new(
                aggregator,
                compositor,
                Fps::new(1, 1).unwrap(),
                RenderThreading::default()
            )
            .is_err()
        );
    }
}
