use crate::foundation::error::{ReelError, ReelResult};

pub use kurbo::Point;

/// Pixel-space coordinate; `y` grows downward.
pub type PixelPoint = Point;

/// Absolute 0-based index of a rendered frame (and of the log record that produced it).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Geographic coordinate in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Geographic window shown on the background image.
///
/// Always constructed through [`BoundingBox::new`], which rejects empty or inverted boxes, so
/// projection never has to re-check the extents.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct BoundingBox {
    lon_min: f64,
    lon_max: f64,
    lat_min: f64,
    lat_max: f64,
}

impl BoundingBox {
    pub fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> ReelResult<Self> {
        let all = [lon_min, lon_max, lat_min, lat_max];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(ReelError::invalid_bbox(format!(
                "bounds must be finite, got lon [{lon_min}, {lon_max}] lat [{lat_min}, {lat_max}]"
            )));
        }
        if lon_max <= lon_min {
            return Err(ReelError::invalid_bbox(format!(
                "lon_max ({lon_max}) must be greater than lon_min ({lon_min})"
            )));
        }
        if lat_max <= lat_min {
            return Err(ReelError::invalid_bbox(format!(
                "lat_max ({lat_max}) must be greater than lat_min ({lat_min})"
            )));
        }
        Ok(Self {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        })
    }

    pub fn lon_min(&self) -> f64 {
        self.lon_min
    }

    pub fn lon_max(&self) -> f64 {
        self.lon_max
    }

    pub fn lat_min(&self) -> f64 {
        self.lat_min
    }

    pub fn lat_max(&self) -> f64 {
        self.lat_max
    }

    pub fn lon_span(&self) -> f64 {
        self.lon_max - self.lon_min
    }

    pub fn lat_span(&self) -> f64 {
        self.lat_max - self.lat_min
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.lon_min + self.lon_max) * 0.5,
            (self.lat_min + self.lat_max) * 0.5,
        )
    }
}

/// Pixel dimensions of the background image, and therefore of every output frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> ReelResult<Self> {
        if width == 0 || height == 0 {
            return Err(ReelError::config(format!(
                "canvas must be non-empty, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    pub fn bytes_rgba8(self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4)
    }
}

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    const REPLAY_DEN: u64 = 1000;

    pub fn new(num: u32, den: u32) -> ReelResult<Self> {
        if den == 0 {
            return Err(ReelError::config("fps den must be > 0"));
        }
        if num == 0 {
            return Err(ReelError::config("fps num must be > 0"));
        }
        let g = gcd(u64::from(num), u64::from(den)) as u32;
        Ok(Self {
            num: num / g,
            den: den / g,
        })
    }

    /// Output rate that plays `frame_interval_s` of simulated time per frame `replay_speed`
    /// times faster than real time.
    ///
    /// The rate is kept as a rational with millisecond-level resolution so that ffmpeg gets an
    /// exact `num/den` rather than a rounded float.
    pub fn for_replay(frame_interval_s: f64, replay_speed: f64) -> ReelResult<Self> {
        if !frame_interval_s.is_finite() || frame_interval_s <= 0.0 {
            return Err(ReelError::config(format!(
                "frame interval must be finite and > 0, got {frame_interval_s}"
            )));
        }
        if !replay_speed.is_finite() || replay_speed <= 0.0 {
            return Err(ReelError::config(format!(
                "replay_speed must be finite and > 0, got {replay_speed}"
            )));
        }
        let rate = replay_speed / frame_interval_s;
        let num = (rate * Self::REPLAY_DEN as f64).round();
        if num < 1.0 || num > f64::from(u32::MAX) {
            return Err(ReelError::config(format!(
                "output fps {rate} is out of the supported range"
            )));
        }
        Self::new(num as u32, Self::REPLAY_DEN as u32)
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }

    pub fn frames_to_secs(self, frames: u64) -> f64 {
        (frames as f64) * self.frame_duration_secs()
    }
}

impl std::fmt::Display for Fps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Straight-alpha RGBA8 color, written as `#RRGGBB` / `#RRGGBBAA` in config files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn parse_hex(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let s = s.strip_prefix('#').unwrap_or(s);

        fn hex_byte(pair: &str) -> Result<u8, String> {
            u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex byte \"{pair}\""))
        }

        if !s.is_ascii() {
            return Err("hex color must be ASCII".to_owned());
        }
        match s.len() {
            6 => Ok(Self::rgb(
                hex_byte(&s[0..2])?,
                hex_byte(&s[2..4])?,
                hex_byte(&s[4..6])?,
            )),
            8 => Ok(Self::rgba(
                hex_byte(&s[0..2])?,
                hex_byte(&s[2..4])?,
                hex_byte(&s[4..6])?,
                hex_byte(&s[6..8])?,
            )),
            _ => Err("hex color must be #RRGGBB or #RRGGBBAA (case-insensitive)".to_owned()),
        }
    }
}

impl serde::Serialize for Rgba8 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!(
            "#{:02x}{:02x}{:02x}{:02x}",
            self.r, self.g, self.b, self.a
        ))
    }
}

impl<'de> serde::Deserialize<'de> for Rgba8 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_hex(&s).map_err(serde::de::Error::custom)
    }
}
