use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use fleetreel::FrameSink as _;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(Parser, Debug)]
#[command(name = "fleetreel", version, about = "Render a simulation frame log into a video")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the whole log as an MP4 video (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Render a single frame as a PNG.
    Frame(FrameArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Platform config (YAML).
    #[arg(long)]
    config: PathBuf,

    /// Simulation log; defaults to the config's datalog path.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Background map image; defaults to the config's background path.
    #[arg(long)]
    background: Option<PathBuf>,

    /// Log shape.
    #[arg(long, value_enum)]
    format: Option<FormatChoice>,

    /// Number of frames in the log; defaults to the simulated duration over the frame interval.
    #[arg(long)]
    frames: Option<u64>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output MP4 path; defaults to the config's video path.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Composite frames on a worker pool.
    #[arg(long)]
    parallel: bool,

    /// Worker thread count (with `--parallel`).
    #[arg(long)]
    threads: Option<usize>,

    /// Frames composited per parallel window.
    #[arg(long, default_value_t = 32)]
    chunk_size: usize,

    /// libx264 constant rate factor.
    #[arg(long)]
    crf: Option<u8>,
}

#[derive(Args, Debug)]
struct FrameArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Frame index (0-based).
    #[arg(long)]
    frame: u64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Auto,
    Batch,
    Streaming,
}

impl From<FormatChoice> for fleetreel::LogFormat {
    fn from(c: FormatChoice) -> Self {
        match c {
            FormatChoice::Auto => Self::Auto,
            FormatChoice::Batch => Self::Batch,
            FormatChoice::Streaming => Self::Streaming,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Frame(args) => cmd_frame(args),
    }
}

fn load_config(
    common: &CommonArgs,
    output_path: Option<PathBuf>,
) -> anyhow::Result<fleetreel::RenderConfig> {
    let platform = fleetreel::PlatformConfig::load(&common.config)?;
    let overrides = fleetreel::RenderOverrides {
        log_path: common.log.clone(),
        background_path: common.background.clone(),
        output_path,
        log_format: common.format.map(Into::into),
        frame_count: common.frames,
    };
    let cfg = fleetreel::RenderConfig::from_platform(&platform, &overrides)
        .with_context(|| format!("invalid config '{}'", common.config.display()))?;
    Ok(cfg)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.common, args.out)?;
    let threading = fleetreel::RenderThreading {
        parallel: args.parallel,
        chunk_size: args.chunk_size,
        threads: args.threads,
    };
    let mut session = fleetreel::RenderSession::from_config(&cfg, threading)?;
    let reader = fleetreel::open_log(&cfg)?;

    let mut opts = fleetreel::FfmpegSinkOpts::new(cfg.output_path.clone());
    opts.bg = cfg.style.flatten_rgba;
    opts.crf = args.crf;
    let mut sink = fleetreel::FfmpegSink::new(opts);

    let stats = session.render_to_sink(reader, &mut sink)?;
    println!(
        "wrote {} ({} frames at {} fps)",
        cfg.output_path.display(),
        stats.frames_rendered,
        cfg.fps
    );
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.common, None)?;
    if args.frame >= cfg.frame_count {
        anyhow::bail!(
            "frame {} is out of range, the log holds {} frame(s)",
            args.frame,
            cfg.frame_count
        );
    }
    let mut session =
        fleetreel::RenderSession::from_config(&cfg, fleetreel::RenderThreading::default())?;
    let reader = fleetreel::open_log_prefix(&cfg, args.frame + 1)?;
    let (frame, rgba) = session.render_single_frame(reader, fleetreel::FrameIndex(args.frame))?;

    let mut sink = fleetreel::PngSink::new(args.out.clone(), cfg.style.flatten_rgba);
    let canvas = session.aggregator().projector().canvas();
    sink.begin(fleetreel::SinkConfig {
        width: canvas.width,
        height: canvas.height,
        fps: session.fps(),
    })?;
    sink.push_frame(frame.index, &rgba)?;
    sink.end()?;

    println!("wrote {} ({})", args.out.display(), frame.status_text());
    Ok(())
}
