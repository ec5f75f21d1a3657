use std::sync::Arc;

use crate::foundation::{
    core::Rgba8,
    error::{ReelError, ReelResult},
};

/// Brush carried through Parley layouts; straight-alpha RGBA8.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct TextBrush {
    pub(crate) r: u8,
    pub(crate) g: u8,
    pub(crate) b: u8,
    pub(crate) a: u8,
}

impl From<Rgba8> for TextBrush {
    fn from(c: Rgba8) -> Self {
        Self {
            r: c.r,
            g: c.g,
            b: c.b,
            a: c.a,
        }
    }
}

/// Single-font plain-text shaper for the status line.
///
/// Each compositor owns one; the Parley contexts are mutable scratch state and are not shared.
pub(crate) struct TextLayoutEngine {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrush>,
    family_name: String,
    font: vello_cpu::peniko::FontData,
}

impl TextLayoutEngine {
    pub(crate) fn new(font_bytes: &Arc<Vec<u8>>) -> ReelResult<Self> {
        let mut font_ctx = parley::FontContext::default();
        let families = font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(font_bytes.to_vec()), None);
        let family_id = families
            .first()
            .map(|(id, _)| *id)
            .ok_or_else(|| ReelError::render("no font families registered from font bytes"))?;
        let family_name = font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| ReelError::render("registered font family has no name"))?
            .to_string();

        Ok(Self {
            font_ctx,
            layout_ctx: parley::LayoutContext::new(),
            family_name,
            font: vello_cpu::peniko::FontData::new(
                vello_cpu::peniko::Blob::from(font_bytes.to_vec()),
                0,
            ),
        })
    }

    pub(crate) fn font(&self) -> &vello_cpu::peniko::FontData {
        &self.font
    }

    pub(crate) fn layout(
        &mut self,
        text: &str,
        size_px: f32,
        brush: TextBrush,
    ) -> parley::Layout<TextBrush> {
        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(self.family_name.clone())),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<TextBrush> = builder.build(text);
        layout.break_all_lines(None);
        layout
    }
}
