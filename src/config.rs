//! Platform configuration (`platform.yml`) and the render parameters derived from it.

use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::{
    foundation::{
        core::{BoundingBox, Fps},
        error::{ReelError, ReelResult},
    },
    log::reader::LogFormat,
    render::style::RenderStyle,
};

/// The subset of the simulator's platform config this crate reads.
///
/// Unknown sections (fleet, request and routing settings) are ignored.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct PlatformConfig {
    pub area_config: AreaConfig,
    pub simulation_config: SimulationConfig,
    #[serde(default)]
    pub output_config: OutputConfig,
    #[serde(default)]
    pub render_style: RenderStyle,
}

#[derive(Clone, Copy, Debug, serde::Deserialize)]
pub struct AreaConfig {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

#[derive(Clone, Copy, Debug, serde::Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Dispatch cycle length.
    pub cycle_s: f64,
    pub simulation_duration_s: f64,
    /// Trips requested before this time do not count toward the statistics.
    pub warmup_duration_s: f64,
    pub winddown_duration_s: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cycle_s: 30.0,
            simulation_duration_s: 3600.0,
            warmup_duration_s: 1800.0,
            winddown_duration_s: 1800.0,
        }
    }
}

impl SimulationConfig {
    pub fn total_duration_s(&self) -> f64 {
        self.warmup_duration_s + self.simulation_duration_s + self.winddown_duration_s
    }
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub datalog_config: DatalogConfig,
    pub video_config: VideoConfig,
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct DatalogConfig {
    pub output_datalog: bool,
    pub path_to_output_datalog: PathBuf,
}

impl Default for DatalogConfig {
    fn default() -> Self {
        Self {
            output_datalog: false,
            path_to_output_datalog: PathBuf::from("datalog/datalog.yml"),
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub render_video: bool,
    pub path_to_output_video: PathBuf,
    pub frames_per_cycle: u32,
    pub replay_speed: f64,
    pub path_to_background_image: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            render_video: false,
            path_to_output_video: PathBuf::from("media/video.mp4"),
            frames_per_cycle: 1,
            replay_speed: 1.0,
            path_to_background_image: None,
            log_format: LogFormat::Auto,
        }
    }
}

impl PlatformConfig {
    pub fn load(path: &Path) -> ReelResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read platform config '{}'", path.display()))?;
        let cfg = Self::from_yaml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded platform config");
        Ok(cfg)
    }

    pub fn from_yaml_str(text: &str) -> ReelResult<Self> {
        serde_yaml::from_str(text).map_err(|e| ReelError::config(format!("platform config: {e}")))
    }
}

/// Overrides applied on top of the platform config, typically from the command line.
#[derive(Clone, Debug, Default)]
pub struct RenderOverrides {
    pub log_path: Option<PathBuf>,
    pub background_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub log_format: Option<LogFormat>,
    pub frame_count: Option<u64>,
}

/// Validated parameters for one render run.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub bbox: BoundingBox,
    pub log_path: PathBuf,
    pub log_format: LogFormat,
    pub background_path: PathBuf,
    pub output_path: PathBuf,
    /// Simulated seconds between consecutive log frames.
    pub frame_interval_s: f64,
    pub replay_speed: f64,
    pub fps: Fps,
    /// Number of frames the log is expected to hold.
    pub frame_count: u64,
    pub warmup_cutoff_s: f64,
    pub style: RenderStyle,
}

impl RenderConfig {
    /// Validate `platform` and derive the render parameters.
    ///
    /// Fails with [`ReelError::Config`] when the simulator was not asked to write a datalog or
    /// render a video, and with [`ReelError::InvalidBoundingBox`] for a degenerate area.
    pub fn from_platform(platform: &PlatformConfig, overrides: &RenderOverrides) -> ReelResult<Self> {
        let output = &platform.output_config;
        if !output.datalog_config.output_datalog {
            return Err(ReelError::config(
                "output_config.datalog_config.output_datalog is false; no datalog to render",
            ));
        }
        if !output.video_config.render_video {
            return Err(ReelError::config(
                "output_config.video_config.render_video is false",
            ));
        }

        let area = platform.area_config;
        let bbox = BoundingBox::new(area.lon_min, area.lon_max, area.lat_min, area.lat_max)?;

        let sim = platform.simulation_config;
        let video = &output.video_config;
        if !(sim.cycle_s.is_finite() && sim.cycle_s > 0.0) {
            return Err(ReelError::config(format!(
                "simulation_config.cycle_s must be positive, got {}",
                sim.cycle_s
            )));
        }
        if video.frames_per_cycle == 0 {
            return Err(ReelError::config("video_config.frames_per_cycle must be at least 1"));
        }
        for (name, v) in [
            ("simulation_duration_s", sim.simulation_duration_s),
            ("warmup_duration_s", sim.warmup_duration_s),
            ("winddown_duration_s", sim.winddown_duration_s),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(ReelError::config(format!(
                    "simulation_config.{name} must be non-negative, got {v}"
                )));
            }
        }

        let frame_interval_s = sim.cycle_s / f64::from(video.frames_per_cycle);
        let fps = Fps::for_replay(frame_interval_s, video.replay_speed)?;
        let frame_count = match overrides.frame_count {
            Some(n) => n,
            None => (sim.total_duration_s() / frame_interval_s).round() as u64,
        };
        if frame_count == 0 {
            return Err(ReelError::config("frame count is zero; nothing to render"));
        }

        let background_path = overrides
            .background_path
            .clone()
            .or_else(|| video.path_to_background_image.clone())
            .ok_or_else(|| {
                ReelError::config(
                    "no background image: set video_config.path_to_background_image or pass one explicitly",
                )
            })?;

        platform.render_style.validate()?;

        Ok(Self {
            bbox,
            log_path: overrides
                .log_path
                .clone()
                .unwrap_or_else(|| output.datalog_config.path_to_output_datalog.clone()),
            log_format: overrides.log_format.unwrap_or(video.log_format),
            background_path,
            output_path: overrides
                .output_path
                .clone()
                .unwrap_or_else(|| video.path_to_output_video.clone()),
            frame_interval_s,
            replay_speed: video.replay_speed,
            fps,
            frame_count,
            warmup_cutoff_s: sim.warmup_duration_s,
            style: platform.render_style.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Rgba8;

    const PLATFORM: &str = r#"
area_config:
  lon_min: 0.0
  lon_max: 10.0
  lat_min: 0.0
  lat_max: 10.0
mod_system_config:
  fleet_config:
    fleet_size: 4
simulation_config:
  cycle_s: 30
  simulation_duration_s: 60
  warmup_duration_s: 30
  winddown_duration_s: 30
output_config:
  datalog_config:
    output_datalog: true
    path_to_output_datalog: datalog/run.yml
  video_config:
    render_video: true
    path_to_output_video: media/run.mp4
    frames_per_cycle: 3
    replay_speed: 20
    path_to_background_image: media/map.png
"#;

    fn platform() -> PlatformConfig {
        PlatformConfig::from_yaml_str(PLATFORM).unwrap()
    }

    #[test]
    fn derives_interval_fps_and_frame_count() {
        let cfg = RenderConfig::from_platform(&platform(), &RenderOverrides::default()).unwrap();
        assert_eq!(cfg.frame_interval_s, 10.0);
        assert_eq!(cfg.fps, Fps::new(2, 1).unwrap());
        assert_eq!(cfg.frame_count, 12);
        assert_eq!(cfg.warmup_cutoff_s, 30.0);
        assert_eq!(cfg.log_path, PathBuf::from("datalog/run.yml"));
        assert_eq!(cfg.background_path, PathBuf::from("media/map.png"));
        assert_eq!(cfg.log_format, LogFormat::Auto);
    }

    #[test]
    fn overrides_win() {
        let overrides = RenderOverrides {
            log_path: Some("other.yml".into()),
            output_path: Some("out.mp4".into()),
            log_format: Some(LogFormat::Streaming),
            frame_count: Some(5),
            ..RenderOverrides::default()
        };
        let cfg = RenderConfig::from_platform(&platform(), &overrides).unwrap();
        assert_eq!(cfg.log_path, PathBuf::from("other.yml"));
        assert_eq!(cfg.output_path, PathBuf::from("out.mp4"));
        assert_eq!(cfg.log_format, LogFormat::Streaming);
        assert_eq!(cfg.frame_count, 5);
    }

    #[test]
    fn disabled_outputs_are_config_errors() {
        let mut p = platform();
        p.output_config.video_config.render_video = false;
        let err = RenderConfig::from_platform(&p, &RenderOverrides::default()).unwrap_err();
        assert!(matches!(err, ReelError::Config(_)));

        let mut p = platform();
        p.output_config.datalog_config.output_datalog = false;
        let err = RenderConfig::from_platform(&p, &RenderOverrides::default()).unwrap_err();
        assert!(matches!(err, ReelError::Config(_)));
    }

    #[test]
    fn missing_output_config_means_disabled() {
        let text = PLATFORM.split("output_config:").next().unwrap();
        let p = PlatformConfig::from_yaml_str(text).unwrap();
        assert!(matches!(
            RenderConfig::from_platform(&p, &RenderOverrides::default()),
            Err(ReelError::Config(_))
        ));
    }

    #[test]
    fn inverted_area_is_an_invalid_bounding_box() {
        let mut p = platform();
        p.area_config.lon_max = -1.0;
        let err = RenderConfig::from_platform(&p, &RenderOverrides::default()).unwrap_err();
        assert!(matches!(err, ReelError::InvalidBoundingBox(_)));
    }

    #[test]
    fn missing_background_is_a_config_error() {
        let mut p = platform();
        p.output_config.video_config.path_to_background_image = None;
        assert!(matches!(
            RenderConfig::from_platform(&p, &RenderOverrides::default()),
            Err(ReelError::Config(_))
        ));
        let overrides = RenderOverrides {
            background_path: Some("bg.png".into()),
            ..RenderOverrides::default()
        };
        assert!(RenderConfig::from_platform(&p, &overrides).is_ok());
    }

    #[test]
    fn render_style_section_is_read() {
        let text = format!("{PLATFORM}render_style:\n  vehicle_radius_px: 7\n  default_color: \"#ff0000\"\n");
        let p = PlatformConfig::from_yaml_str(&text).unwrap();
        assert_eq!(p.render_style.vehicle_radius_px, 7.0);
        assert_eq!(p.render_style.default_color, Rgba8::rgb(255, 0, 0));
    }
}
