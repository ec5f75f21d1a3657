use std::sync::Arc;

use vello_cpu::kurbo::{Affine, BezPath, Cap, Circle, Join, Rect, Shape as _, Stroke};

use crate::{
    aggregate::{LineStyle, RenderableFrame},
    foundation::{
        core::{Canvas, PixelPoint, Rgba8},
        error::ReelResult,
    },
    render::{
        FrameRGBA,
        background::{Background, canvas_dims_u16},
        blend::over_in_place,
        style::RenderStyle,
        text::{TextBrush, TextLayoutEngine},
    },
};

const CIRCLE_TOLERANCE: f64 = 0.1;

/// Read-only compositor inputs; cheap to clone and safe to share across threads.
#[derive(Clone, Debug)]
pub struct CompositorSeed {
    background: Background,
    style: Arc<RenderStyle>,
    font_bytes: Option<Arc<Vec<u8>>>,
    size: (u16, u16),
}

impl CompositorSeed {
    /// A compositor with no scratch state. The inputs were already validated by
    /// [`Compositor::new`], so a font that fails to load here is dropped.
    pub fn build(&self) -> Compositor {
        Compositor {
            background: self.background.clone(),
            style: self.style.clone(),
            font_bytes: self.font_bytes.clone(),
            text: self
                .font_bytes
                .as_ref()
                .and_then(|f| TextLayoutEngine::new(f).ok()),
            ctx: None,
            size: self.size,
        }
    }
}

/// Draws a [`RenderableFrame`] over the background.
///
/// Z-order: background, route previews, vehicle markers, trip markers, status text. Everything
/// but the background is rasterized onto a transparent layer and blended over it. A compositor
/// keeps only scratch buffers between calls; its output depends on the frame alone. Parallel
/// renders build one per worker from a [`CompositorSeed`].
pub struct Compositor {
    background: Background,
    style: Arc<RenderStyle>,
    font_bytes: Option<Arc<Vec<u8>>>,
    text: Option<TextLayoutEngine>,
    ctx: Option<vello_cpu::RenderContext>,
    size: (u16, u16),
}

impl Compositor {
    /// `font_bytes` is optional; without it the status text is not drawn.
    pub fn new(
        background: Background,
        style: Arc<RenderStyle>,
        font_bytes: Option<Arc<Vec<u8>>>,
    ) -> ReelResult<Self> {
        style.validate()?;
        let size = canvas_dims_u16(background.canvas())?;
        let text = font_bytes.as_ref().map(TextLayoutEngine::new).transpose()?;
        Ok(Self {
            background,
            style,
            font_bytes,
            text,
            ctx: None,
            size,
        })
    }

    /// The shareable inputs of this compositor, for building one per worker thread.
    pub fn seed(&self) -> CompositorSeed {
        CompositorSeed {
            background: self.background.clone(),
            style: self.style.clone(),
            font_bytes: self.font_bytes.clone(),
            size: self.size,
        }
    }

    pub fn canvas(&self) -> Canvas {
        self.background.canvas()
    }

    pub fn style(&self) -> &RenderStyle {
        &self.style
    }

    pub fn draws_text(&self) -> bool {
        self.text.is_some()
    }

    pub fn compose(&mut self, frame: &RenderableFrame) -> ReelResult<FrameRGBA> {
        let (w, h) = self.size;
        let mut ctx = match self.ctx.take() {
            Some(ctx) if ctx.width() == w && ctx.height() == h => ctx,
            _ => vello_cpu::RenderContext::new(w, h),
        };
        ctx.reset();
        ctx.set_transform(Affine::IDENTITY);

        self.draw_routes(&mut ctx, frame);
        self.draw_vehicles(&mut ctx, frame);
        self.draw_trip_markers(&mut ctx, frame);
        self.draw_status_text(&mut ctx, frame);

        let mut overlay = vello_cpu::Pixmap::new(w, h);
        ctx.flush();
        ctx.render_to_pixmap(&mut overlay);
        self.ctx = Some(ctx);

        let mut data = self.background.premul_rgba8().to_vec();
        over_in_place(&mut data, overlay.data_as_u8_slice())?;
        let canvas = self.background.canvas();
        Ok(FrameRGBA {
            width: canvas.width,
            height: canvas.height,
            data,
        })
    }

    fn draw_routes(&self, ctx: &mut vello_cpu::RenderContext, frame: &RenderableFrame) {
        for vehicle in &frame.vehicles {
            let color = self.style.color_for_slot(vehicle.slot);
            for preview in &vehicle.previews {
                let Some(path) = polyline(&preview.points) else {
                    continue;
                };
                ctx.set_stroke(self.stroke_for(preview.style));
                ctx.set_paint(paint_color(color));
                ctx.stroke_path(&path);
            }
        }
    }

    fn draw_vehicles(&self, ctx: &mut vello_cpu::RenderContext, frame: &RenderableFrame) {
        let r = self.style.vehicle_radius_px;
        for vehicle in &frame.vehicles {
            ctx.set_paint(paint_color(self.style.color_for_slot(vehicle.slot)));
            ctx.fill_path(&circle(vehicle.position, r));
        }
    }

    fn draw_trip_markers(&self, ctx: &mut vello_cpu::RenderContext, frame: &RenderableFrame) {
        ctx.set_paint(paint_color(self.style.dispatched_color));
        for &origin in &frame.dispatched {
            ctx.fill_path(&circle(origin, self.style.dispatched_radius_px));
        }

        let s = self.style.walkaway_size_px;
        ctx.set_stroke(
            Stroke::new(self.style.route_width_px.max(1.0) * 1.5).with_caps(Cap::Round),
        );
        ctx.set_paint(paint_color(self.style.walkaway_color));
        for &origin in &frame.walkaways {
            let c = to_cpu_point(origin);
            let mut cross = BezPath::new();
            cross.move_to((c.x - s, c.y - s));
            cross.line_to((c.x + s, c.y + s));
            cross.move_to((c.x - s, c.y + s));
            cross.line_to((c.x + s, c.y - s));
            ctx.stroke_path(&cross);
        }
    }

    fn draw_status_text(&mut self, ctx: &mut vello_cpu::RenderContext, frame: &RenderableFrame) {
        let Some(engine) = self.text.as_mut() else {
            return;
        };
        let style = &self.style;
        let layout = engine.layout(
            &frame.status_text(),
            style.text_size_px,
            TextBrush::from(style.text_color),
        );

        let m = style.text_margin_px;
        let pad = f64::from(style.text_size_px) * 0.25;
        ctx.set_transform(Affine::IDENTITY);
        ctx.set_paint(paint_color(style.text_backdrop));
        ctx.fill_rect(&Rect::new(
            m - pad,
            m - pad,
            m + f64::from(layout.width()) + pad,
            m + f64::from(layout.height()) + pad,
        ));

        ctx.set_transform(Affine::translate((m, m)));
        for line in layout.lines() {
            for item in line.items() {
                let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                    continue;
                };
                let brush = run.style().brush;
                ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                    brush.r, brush.g, brush.b, brush.a,
                ));
                let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                    id: g.id,
                    x: g.x,
                    y: g.y,
                });
                ctx.glyph_run(engine.font())
                    .font_size(run.run().font_size())
                    .fill_glyphs(glyphs);
            }
        }
        ctx.set_transform(Affine::IDENTITY);
    }

    fn stroke_for(&self, style: LineStyle) -> Stroke {
        let base = Stroke::new(self.style.route_width_px)
            .with_join(Join::Round)
            .with_caps(Cap::Round);
        match style {
            LineStyle::Solid => base,
            LineStyle::Dashed => base.with_dashes(0.0, self.style.dash_pattern_px),
            LineStyle::Dotted => base.with_dashes(0.0, self.style.dot_pattern_px),
        }
    }
}

fn paint_color(c: Rgba8) -> vello_cpu::peniko::Color {
    vello_cpu::peniko::Color::from_rgba8(c.r, c.g, c.b, c.a)
}

fn to_cpu_point(p: PixelPoint) -> vello_cpu::kurbo::Point {
    vello_cpu::kurbo::Point::new(p.x, p.y)
}

fn circle(center: PixelPoint, r: f64) -> BezPath {
    Circle::new(to_cpu_point(center), r).to_path(CIRCLE_TOLERANCE)
}

/// Open polyline through `points`; `None` when there is nothing to stroke.
fn polyline(points: &[PixelPoint]) -> Option<BezPath> {
    let (first, rest) = points.split_first()?;
    if rest.is_empty() {
        return None;
    }
    let mut path = BezPath::new();
    path.move_to(to_cpu_point(*first));
    for p in rest {
        path.line_to(to_cpu_point(*p));
    }
    Some(path)
}
