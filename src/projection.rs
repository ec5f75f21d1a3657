use crate::foundation::core::{BoundingBox, Canvas, GeoPoint, PixelPoint};

/// Linear equirectangular mapping from a [`BoundingBox`] onto a [`Canvas`].
///
/// North is up: `lat_max` maps to `y = 0`. Points outside the box map outside the canvas; they
/// are not clamped, and drawing them is simply invisible.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projector {
    bbox: BoundingBox,
    canvas: Canvas,
}

impl Projector {
    pub fn new(bbox: BoundingBox, canvas: Canvas) -> Self {
        Self { bbox, canvas }
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    pub fn project(&self, point: GeoPoint) -> PixelPoint {
        project(point, &self.bbox, self.canvas)
    }

    pub fn project_all<'a>(
        &self,
        points: impl IntoIterator<Item = &'a GeoPoint>,
    ) -> Vec<PixelPoint> {
        points.into_iter().map(|p| self.project(*p)).collect()
    }
}

/// Project a geographic point into pixel space.
pub fn project(point: GeoPoint, bbox: &BoundingBox, canvas: Canvas) -> PixelPoint {
    let x = (point.lon - bbox.lon_min()) / bbox.lon_span() * f64::from(canvas.width);
    let y = (bbox.lat_max() - point.lat) / bbox.lat_span() * f64::from(canvas.height);
    PixelPoint::new(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_projector() -> Projector {
        Projector::new(
            BoundingBox::new(0.0, 10.0, 0.0, 10.0).unwrap(),
            Canvas::new(100, 100).unwrap(),
        )
    }

    #[test]
    fn center_maps_to_canvas_center() {
        let bbox = BoundingBox::new(113.90, 114.25, 22.10, 22.60).unwrap();
        let canvas = Canvas::new(1280, 720).unwrap();
        let p = project(bbox.center(), &bbox, canvas);
        assert!((p.x - 640.0).abs() < 1e-9);
        assert!((p.y - 360.0).abs() < 1e-9);
    }

    #[test]
    fn corners_map_to_canvas_corners_with_north_up() {
        let proj = unit_projector();
        assert_eq!(proj.project(GeoPoint::new(0.0, 10.0)), PixelPoint::new(0.0, 0.0));
        assert_eq!(
            proj.project(GeoPoint::new(10.0, 10.0)),
            PixelPoint::new(100.0, 0.0)
        );
        assert_eq!(
            proj.project(GeoPoint::new(0.0, 0.0)),
            PixelPoint::new(0.0, 100.0)
        );
        assert_eq!(
            proj.project(GeoPoint::new(10.0, 0.0)),
            PixelPoint::new(100.0, 100.0)
        );
    }

    #[test]
    fn vehicle_in_the_middle_lands_on_pixel_fifty_fifty() {
        let proj = unit_projector();
        assert_eq!(proj.project(GeoPoint::new(5.0, 5.0)), PixelPoint::new(50.0, 50.0));
    }

    #[test]
    fn points_outside_the_box_are_not_clamped() {
        let proj = unit_projector();
        let p = proj.project(GeoPoint::new(-5.0, 15.0));
        assert_eq!(p, PixelPoint::new(-50.0, -50.0));
        let q = proj.project(GeoPoint::new(20.0, -10.0));
        assert_eq!(q, PixelPoint::new(200.0, 200.0));
    }
}
