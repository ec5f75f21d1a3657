use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::foundation::{
    core::Rgba8,
    error::{ReelError, ReelResult},
};

/// Fonts tried, in order, when no font is configured.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Visual parameters of the compositor. Every field has a default, so a config file only needs
/// to name what it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderStyle {
    /// Vehicle colors, indexed by vehicle slot.
    pub palette: Vec<Rgba8>,
    /// Color for slots beyond the end of `palette`.
    pub default_color: Rgba8,
    pub vehicle_radius_px: f64,
    pub route_width_px: f64,
    /// `[on, off]` lengths of the second route preview.
    pub dash_pattern_px: [f64; 2],
    /// `[on, off]` lengths of the third route preview.
    pub dot_pattern_px: [f64; 2],
    pub dispatched_color: Rgba8,
    pub dispatched_radius_px: f64,
    pub walkaway_color: Rgba8,
    pub walkaway_size_px: f64,
    pub text_color: Rgba8,
    pub text_size_px: f32,
    pub text_margin_px: f64,
    /// Panel drawn behind the status text.
    pub text_backdrop: Rgba8,
    /// TTF/OTF used for the status text. Falls back to common system fonts.
    pub font_path: Option<PathBuf>,
    /// Color transparent pixels are flattened over before encoding.
    pub flatten_rgba: Rgba8,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            palette: vec![
                Rgba8::rgb(0x1f, 0x77, 0xb4),
                Rgba8::rgb(0xff, 0x7f, 0x0e),
                Rgba8::rgb(0x2c, 0xa0, 0x2c),
                Rgba8::rgb(0xd6, 0x27, 0x28),
                Rgba8::rgb(0x94, 0x67, 0xbd),
                Rgba8::rgb(0x8c, 0x56, 0x4b),
                Rgba8::rgb(0xe3, 0x77, 0xc2),
                Rgba8::rgb(0x7f, 0x7f, 0x7f),
                Rgba8::rgb(0xbc, 0xbd, 0x22),
                Rgba8::rgb(0x17, 0xbe, 0xcf),
            ],
            default_color: Rgba8::rgb(0x40, 0x40, 0x40),
            vehicle_radius_px: 4.0,
            route_width_px: 1.5,
            dash_pattern_px: [6.0, 4.0],
            dot_pattern_px: [1.5, 3.0],
            dispatched_color: Rgba8::rgba(0x00, 0x80, 0x00, 0xd0),
            dispatched_radius_px: 3.0,
            walkaway_color: Rgba8::rgb(0xe0, 0x10, 0x10),
            walkaway_size_px: 4.0,
            text_color: Rgba8::rgb(0x10, 0x10, 0x10),
            text_size_px: 18.0,
            text_margin_px: 10.0,
            text_backdrop: Rgba8::rgba(0xff, 0xff, 0xff, 0xb0),
            font_path: None,
            flatten_rgba: Rgba8::rgb(0, 0, 0),
        }
    }
}

impl RenderStyle {
    pub fn color_for_slot(&self, slot: usize) -> Rgba8 {
        self.palette.get(slot).copied().unwrap_or(self.default_color)
    }

    pub fn validate(&self) -> ReelResult<()> {
        let lengths = [
            ("vehicle_radius_px", self.vehicle_radius_px),
            ("route_width_px", self.route_width_px),
            ("dispatched_radius_px", self.dispatched_radius_px),
            ("walkaway_size_px", self.walkaway_size_px),
            ("text_size_px", f64::from(self.text_size_px)),
        ];
        for (name, v) in lengths {
            if !v.is_finite() || v <= 0.0 {
                return Err(ReelError::config(format!(
                    "render_style.{name} must be finite and > 0, got {v}"
                )));
            }
        }
        for (name, pattern) in [
            ("dash_pattern_px", self.dash_pattern_px),
            ("dot_pattern_px", self.dot_pattern_px),
        ] {
            if pattern.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                return Err(ReelError::config(format!(
                    "render_style.{name} entries must be finite and > 0"
                )));
            }
        }
        if !self.text_margin_px.is_finite() || self.text_margin_px < 0.0 {
            return Err(ReelError::config(
                "render_style.text_margin_px must be finite and >= 0",
            ));
        }
        Ok(())
    }

    /// Font file for the status text: the configured one, else the first system font found.
    pub fn resolve_font(&self) -> Option<PathBuf> {
        if let Some(p) = &self.font_path {
            return Some(p.clone());
        }
        SYSTEM_FONT_CANDIDATES
            .iter()
            .map(Path::new)
            .find(|p| p.is_file())
            .map(Path::to_path_buf)
    }
}
