use std::{path::Path, sync::Arc};

use anyhow::Context as _;

use crate::foundation::{
    core::{Canvas, Rgba8},
    error::{ReelError, ReelResult},
};

/// Static map image every frame is drawn over, held as premultiplied RGBA8.
///
/// Cloning shares the pixel data.
#[derive(Clone)]
pub struct Background {
    canvas: Canvas,
    premul: Arc<Vec<u8>>,
}

impl std::fmt::Debug for Background {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Background")
            .field("canvas", &self.canvas)
            .finish_non_exhaustive()
    }
}

impl Background {
    /// Decode a raster image from disk.
    ///
    /// Odd dimensions are cropped by one pixel so frames can be encoded as yuv420p.
    pub fn load(path: &Path) -> ReelResult<Self> {
        let img = image::open(path)
            .with_context(|| format!("decode background image '{}'", path.display()))?
            .to_rgba8();
        let (w, h) = img.dimensions();
        let (even_w, even_h) = (w & !1, h & !1);
        let img = if (even_w, even_h) != (w, h) {
            tracing::warn!(
                width = w,
                height = h,
                "background has odd dimensions, cropping to {even_w}x{even_h}"
            );
            image::imageops::crop_imm(&img, 0, 0, even_w, even_h).to_image()
        } else {
            img
        };
        let bg = Self::from_rgba8(img.width(), img.height(), img.into_raw())?;
        tracing::info!(
            path = %path.display(),
            width = bg.canvas.width,
            height = bg.canvas.height,
            "loaded background image"
        );
        Ok(bg)
    }

    /// Build from straight-alpha RGBA8 pixels.
    pub fn from_rgba8(width: u32, height: u32, mut rgba: Vec<u8>) -> ReelResult<Self> {
        let canvas = Canvas::new(width, height)?;
        canvas_dims_u16(canvas)?;
        if rgba.len() != canvas.bytes_rgba8() {
            return Err(ReelError::render(format!(
                "background has {} bytes, expected {} for {width}x{height}",
                rgba.len(),
                canvas.bytes_rgba8()
            )));
        }
        premultiply_rgba8_in_place(&mut rgba);
        Ok(Self {
            canvas,
            premul: Arc::new(rgba),
        })
    }

    /// A single-color background, for previews and tests.
    pub fn solid(canvas: Canvas, color: Rgba8) -> ReelResult<Self> {
        let rgba = color
            .to_array()
            .iter()
            .copied()
            .cycle()
            .take(canvas.bytes_rgba8())
            .collect();
        Self::from_rgba8(canvas.width, canvas.height, rgba)
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    pub(crate) fn premul_rgba8(&self) -> &[u8] {
        &self.premul
    }
}

pub(crate) fn canvas_dims_u16(canvas: Canvas) -> ReelResult<(u16, u16)> {
    let w: u16 = canvas.width.try_into().map_err(|_| {
        ReelError::render(format!("canvas width {} exceeds {}", canvas.width, u16::MAX))
    })?;
    let h: u16 = canvas.height.try_into().map_err(|_| {
        ReelError::render(format!(
            "canvas height {} exceeds {}",
            canvas.height,
            u16::MAX
        ))
    })?;
    Ok((w, h))
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 255 {
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premultiply_scales_color_by_alpha() {
        let mut px = vec![255u8, 128, 0, 128, 10, 20, 30, 255, 200, 200, 200, 0];
        premultiply_rgba8_in_place(&mut px);
        assert_eq!(px, vec![128, 64, 0, 128, 10, 20, 30, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn solid_background_reports_its_canvas() {
        let bg = Background::solid(Canvas::new(8, 6).unwrap(), Rgba8::rgb(1, 2, 3)).unwrap();
        assert_eq!(bg.canvas(), Canvas::new(8, 6).unwrap());
    }

    #[test]
    fn rejects_byte_length_mismatch_and_oversized_canvas() {
        assert!(Background::from_rgba8(2, 2, vec![0; 15]).is_err());
        assert!(canvas_dims_u16(Canvas::new(70_000, 2).unwrap()).is_err());
    }

    #[test]
    fn stores_premultiplied_pixels() {
        let bg = Background::from_rgba8(1, 1, vec![200, 100, 0, 128]).unwrap();
        assert_eq!(bg.premul_rgba8(), &[100, 50, 0, 128]);
    }

    #[test]
    fn load_crops_odd_images_to_even() {
        let dir = std::path::PathBuf::from("target").join("background_crop");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("odd.png");
        image::RgbaImage::from_pixel(11, 7, image::Rgba([9, 9, 9, 255]))
            .save(&path)
            .unwrap();

        let bg = Background::load(&path).unwrap();
        assert_eq!(bg.canvas(), Canvas::new(10, 6).unwrap());
    }
}
