use std::{
    fs::File,
    io::{BufRead, BufReader, Cursor},
    path::Path,
};

use anyhow::Context as _;

use crate::{
    foundation::{
        core::FrameIndex,
        error::{ReelError, ReelResult},
    },
    log::model::{FrameRecord, TripEvent},
};

/// Line that terminates every block of a streaming log.
pub const STREAM_SENTINEL: &str = "---";

/// On-disk shape of a simulation log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Decide from the first meaningful line of the log.
    #[default]
    Auto,
    /// One document holding every frame.
    Batch,
    /// One self-contained block per frame, each followed by a `---` line.
    Streaming,
}

impl LogFormat {
    /// Guess the format from the head of a log.
    ///
    /// A top-level sequence (`- ...` / `[`) or a `frames:` mapping is a batch document;
    /// anything else is treated as a stream of per-frame blocks. A YAML sequence followed by a
    /// sentinel line is a stream of one-element-sequence blocks.
    pub fn sniff(head: &[u8]) -> Self {
        let head = String::from_utf8_lossy(head);
        for line in head.lines() {
            let t = line.trim();
            if t.is_empty() || t.starts_with('#') || t == STREAM_SENTINEL {
                continue;
            }
            let yaml_sequence = t.starts_with('-') && !t.starts_with(STREAM_SENTINEL);
            let batch = t.starts_with('[')
                || yaml_sequence
                || t.starts_with("frames:")
                || t.starts_with("\"frames\"")
                || (t.starts_with('{') && t.contains("\"frames\""));
            if yaml_sequence && has_inner_sentinel(&head) {
                return Self::Streaming;
            }
            return if batch { Self::Batch } else { Self::Streaming };
        }
        Self::Streaming
    }
}

/// Whether a sentinel line follows content, i.e. `text` holds more than one YAML document.
fn has_inner_sentinel(text: &str) -> bool {
    let mut seen_content = false;
    for line in text.lines() {
        let t = line.trim_end();
        if t == STREAM_SENTINEL {
            if seen_content {
                return true;
            }
        } else if !t.trim_start().is_empty() && !t.trim_start().starts_with('#') {
            seen_content = true;
        }
    }
    false
}

/// Forward-only, single-pass reader yielding exactly `expected` frame records.
///
/// Yields `TruncatedLog` if the source runs dry first, then stops. Any error ends iteration.
pub struct LogReader {
    source: Source,
    expected: u64,
    produced: u64,
    done: bool,
}

enum Source {
    Batch(BatchFrames),
    Streaming(StreamingBlocks),
}

impl LogReader {
    /// Open a log file.
    pub fn open(path: &Path, format: LogFormat, expected: u64) -> ReelResult<Self> {
        let f = File::open(path).with_context(|| format!("open log '{}'", path.display()))?;
        let json_hint = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let reader = Self::from_reader_with_hint(BufReader::new(f), format, expected, json_hint)?;
        tracing::info!(
            path = %path.display(),
            format = ?reader.format(),
            expected,
            "opened simulation log"
        );
        Ok(reader)
    }

    /// Build a reader over any buffered source.
    pub fn from_reader(
        reader: impl BufRead + Send + 'static,
        format: LogFormat,
        expected: u64,
    ) -> ReelResult<Self> {
        Self::from_reader_with_hint(reader, format, expected, false)
    }

    fn from_reader_with_hint(
        mut reader: impl BufRead + Send + 'static,
        format: LogFormat,
        expected: u64,
        json_hint: bool,
    ) -> ReelResult<Self> {
        let sniffed = format == LogFormat::Auto;
        let format = match format {
            LogFormat::Auto => {
                let head = reader.fill_buf().context("peek log head")?;
                LogFormat::sniff(head)
            }
            f => f,
        };

        let source = match format {
            LogFormat::Batch => {
                let mut text = String::new();
                reader
                    .read_to_string(&mut text)
                    .context("read batch log document")?;
                // A first block longer than the peeked head hides its sentinel from `sniff`.
                let json = text.trim_start().starts_with(['[', '{']);
                if sniffed && !json && has_inner_sentinel(&text) {
                    tracing::debug!("log head looked like a batch document, reading a stream");
                    let blocks = StreamingBlocks::new(Box::new(Cursor::new(text.into_bytes())));
                    return Ok(Self {
                        source: Source::Streaming(blocks),
                        expected,
                        produced: 0,
                        done: false,
                    });
                }
                let frames = BatchFrames::parse(&text, json_hint)?;
                let available = frames.len() as u64;
                if available < expected {
                    return Err(ReelError::TruncatedLog {
                        expected,
                        read: available,
                    });
                }
                if available > expected {
                    tracing::warn!(
                        available,
                        expected,
                        "batch log holds more frames than requested, ignoring the rest"
                    );
                }
                Source::Batch(frames)
            }
            _ => Source::Streaming(StreamingBlocks::new(Box::new(reader))),
        };

        Ok(Self {
            source,
            expected,
            produced: 0,
            done: false,
        })
    }

    pub fn format(&self) -> LogFormat {
        match self.source {
            Source::Batch(_) => LogFormat::Batch,
            Source::Streaming(_) => LogFormat::Streaming,
        }
    }

    pub fn expected_frames(&self) -> u64 {
        self.expected
    }

    pub fn frames_read(&self) -> u64 {
        self.produced
    }

    fn pull(&mut self, index: u64) -> ReelResult<Option<FrameRecord>> {
        match &mut self.source {
            Source::Batch(frames) => frames.next_frame(index),
            Source::Streaming(blocks) => blocks.next_frame(index),
        }
    }
}

impl Iterator for LogReader {
    type Item = ReelResult<(FrameIndex, FrameRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.produced >= self.expected {
            self.done = true;
            return None;
        }

        let index = self.produced;
        match self.pull(index) {
            Ok(Some(record)) => {
                self.produced += 1;
                Some(Ok((FrameIndex(index), record)))
            }
            Ok(None) => {
                self.done = true;
                Some(Err(ReelError::TruncatedLog {
                    expected: self.expected,
                    read: self.produced,
                }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Batch document, parsed once; individual frames are decoded on demand.
struct BatchFrames {
    raw: RawFrames,
    terminal_trips: Vec<TripEvent>,
}

enum RawFrames {
    Yaml(std::vec::IntoIter<serde_yaml::Value>),
    Json(std::vec::IntoIter<serde_json::Value>),
}

impl BatchFrames {
    fn parse(text: &str, json_hint: bool) -> ReelResult<Self> {
        let looks_json = json_hint || text.trim_start().starts_with(['[', '{']);
        if looks_json && let Ok(doc) = serde_json::from_str::<serde_json::Value>(text) {
            return Self::from_json(doc);
        }
        let doc: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| ReelError::malformed(0, format!("batch log is not valid YAML: {e}")))?;
        Self::from_yaml(doc)
    }

    fn from_yaml(doc: serde_yaml::Value) -> ReelResult<Self> {
        match doc {
            serde_yaml::Value::Sequence(frames) => Ok(Self {
                raw: RawFrames::Yaml(frames.into_iter()),
                terminal_trips: Vec::new(),
            }),
            serde_yaml::Value::Mapping(mut map) => {
                let frames = match map.remove("frames") {
                    Some(serde_yaml::Value::Sequence(frames)) => frames,
                    _ => {
                        return Err(ReelError::malformed(
                            0,
                            "batch log mapping must contain a `frames` sequence",
                        ));
                    }
                };
                let terminal_trips = match map.remove("trips") {
                    Some(v) => serde_yaml::from_value(v).map_err(|e| {
                        ReelError::malformed(0, format!("invalid terminal trip list: {e}"))
                    })?,
                    None => Vec::new(),
                };
                Ok(Self {
                    raw: RawFrames::Yaml(frames.into_iter()),
                    terminal_trips,
                })
            }
            serde_yaml::Value::Null => Ok(Self {
                raw: RawFrames::Yaml(Vec::new().into_iter()),
                terminal_trips: Vec::new(),
            }),
            _ => Err(ReelError::malformed(
                0,
                "batch log must be a sequence of frames or a mapping with `frames`",
            )),
        }
    }

    fn from_json(doc: serde_json::Value) -> ReelResult<Self> {
        match doc {
            serde_json::Value::Array(frames) => Ok(Self {
                raw: RawFrames::Json(frames.into_iter()),
                terminal_trips: Vec::new(),
            }),
            serde_json::Value::Object(mut map) => {
                let frames = match map.remove("frames") {
                    Some(serde_json::Value::Array(frames)) => frames,
                    _ => {
                        return Err(ReelError::malformed(
                            0,
                            "batch log object must contain a `frames` array",
                        ));
                    }
                };
                let terminal_trips = match map.remove("trips") {
                    Some(v) => serde_json::from_value(v).map_err(|e| {
                        ReelError::malformed(0, format!("invalid terminal trip list: {e}"))
                    })?,
                    None => Vec::new(),
                };
                Ok(Self {
                    raw: RawFrames::Json(frames.into_iter()),
                    terminal_trips,
                })
            }
            _ => Err(ReelError::malformed(
                0,
                "batch log must be an array of frames or an object with `frames`",
            )),
        }
    }

    fn len(&self) -> usize {
        match &self.raw {
            RawFrames::Yaml(it) => it.len(),
            RawFrames::Json(it) => it.len(),
        }
    }

    fn next_frame(&mut self, index: u64) -> ReelResult<Option<FrameRecord>> {
        let decoded = match &mut self.raw {
            RawFrames::Yaml(it) => it
                .next()
                .map(|v| serde_yaml::from_value::<FrameRecord>(v).map_err(|e| e.to_string())),
            RawFrames::Json(it) => it
                .next()
                .map(|v| serde_json::from_value::<FrameRecord>(v).map_err(|e| e.to_string())),
        };
        let Some(decoded) = decoded else {
            return Ok(None);
        };
        let mut record = decoded.map_err(|msg| ReelError::malformed(index, msg))?;
        if !self.terminal_trips.is_empty() {
            record.attach_terminal_trips(&self.terminal_trips);
        }
        Ok(Some(record))
    }
}

/// Sentinel-delimited stream of per-frame YAML blocks.
///
/// Holds at most one undecoded block in memory. Blocks are split as raw bytes; text decoding
/// is part of decoding the frame.
struct StreamingBlocks {
    reader: Box<dyn BufRead + Send>,
    line: Vec<u8>,
    block: Vec<u8>,
}

impl StreamingBlocks {
    fn new(reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader,
            line: Vec::new(),
            block: Vec::new(),
        }
    }

    /// Read the next sentinel-terminated block. `None` when the stream ends first.
    fn next_block(&mut self, index: u64) -> ReelResult<Option<&[u8]>> {
        self.block.clear();
        loop {
            self.line.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut self.line)
                .with_context(|| format!("read log block for frame {index}"))?;
            if n == 0 {
                if !self.block.trim_ascii().is_empty() {
                    tracing::warn!(
                        frame = index,
                        bytes = self.block.len(),
                        "log ends inside an unterminated block"
                    );
                }
                return Ok(None);
            }
            if self.line.trim_ascii_end() == STREAM_SENTINEL.as_bytes() {
                // Leading document markers and blank blocks carry no frame.
                if self.block.trim_ascii().is_empty() {
                    self.block.clear();
                    continue;
                }
                return Ok(Some(self.block.as_slice()));
            }
            self.block.extend_from_slice(&self.line);
        }
    }

    fn next_frame(&mut self, index: u64) -> ReelResult<Option<FrameRecord>> {
        let Some(block) = self.next_block(index)? else {
            return Ok(None);
        };
        std::str::from_utf8(block)
            .map_err(|e| format!("block is not valid UTF-8: {e}"))
            .and_then(decode_block)
            .map(Some)
            .map_err(|msg| ReelError::malformed(index, msg))
    }
}

/// Decode one streaming block. The simulator wraps each frame in a one-element sequence, so
/// that shape is accepted too.
fn decode_block(block: &str) -> Result<FrameRecord, String> {
    let value: serde_yaml::Value = serde_yaml::from_str(block).map_err(|e| e.to_string())?;
    let value = match value {
        serde_yaml::Value::Sequence(mut items) if items.len() == 1 => items.remove(0),
        serde_yaml::Value::Sequence(items) => {
            return Err(format!(
                "block holds {} frames, expected exactly one",
                items.len()
            ));
        }
        other => other,
    };
    serde_yaml::from_value(value).map_err(|e| e.to_string())
}
