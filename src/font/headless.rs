//! Headless synthetic font driver.
//!
//! No files, no outlines: faces are described by coverage ranges and produce
//! solid rectangular bitmaps with em-proportional metrics. Shaping emits one
//! glyph per character with byte-offset clusters, which is enough to drive
//! every path of the renderer deterministically. Used by the unit and
//! integration tests and by the benchmarks.

use super::driver::{
    f26dot6_to_px, F26Dot6, FaceMetrics, FaceSize, FaceSpec, FontDriver, GlyphBitmap, LoadFlags,
    ShapedGlyph,
};
use anyhow::Result;
use std::ops::RangeInclusive;

/// A synthetic face: coverage plus em-proportional geometry.
#[derive(Debug, Clone)]
pub struct HeadlessFace {
    coverage: Vec<RangeInclusive<u32>>,
    size: FaceSize,
    hinting: bool,
    hintstyle: i32,
    scalable: bool,
    /// Glyph advance as a fraction of the em size.
    advance_factor: f32,
    /// Overrides the bitmap width; defaults to the advance.
    glyph_width_px: Option<usize>,
}

impl HeadlessFace {
    /// A face covering the given codepoint ranges.
    pub fn new<I>(coverage: I) -> Self
    where
        I: IntoIterator<Item = RangeInclusive<u32>>,
    {
        HeadlessFace {
            coverage: coverage.into_iter().collect(),
            size: FaceSize {
                width: 10 * 64,
                height: 10 * 64,
                xdpi: 96.0,
                ydpi: 96.0,
            },
            hinting: false,
            hintstyle: 0,
            scalable: true,
            advance_factor: 0.5,
            glyph_width_px: None,
        }
    }

    /// A face covering printable ASCII.
    pub fn ascii() -> Self {
        HeadlessFace::new([0x20..=0x7e])
    }

    pub fn with_hinting(mut self, hinting: bool, hintstyle: i32) -> Self {
        self.hinting = hinting;
        self.hintstyle = hintstyle;
        self
    }

    pub fn with_scalable(mut self, scalable: bool) -> Self {
        self.scalable = scalable;
        self
    }

    pub fn with_advance_factor(mut self, factor: f32) -> Self {
        self.advance_factor = factor;
        self
    }

    pub fn with_glyph_width(mut self, px: usize) -> Self {
        self.glyph_width_px = Some(px);
        self
    }

    /// Em size in pixels at the current scaled size.
    fn px_em(&self) -> f32 {
        f26dot6_to_px(self.size.height) * self.size.ydpi / 72.0
    }

    fn ascent(&self) -> f32 {
        0.8 * self.px_em()
    }

    fn advance_px(&self) -> f32 {
        self.advance_factor * self.px_em()
    }

    fn covers(&self, cp: u32) -> bool {
        self.coverage.iter().any(|r| r.contains(&cp))
    }
}

/// Driver for [`HeadlessFace`] values.
#[derive(Debug, Clone, Default)]
pub struct HeadlessFontDriver;

impl HeadlessFontDriver {
    pub fn new() -> Self {
        HeadlessFontDriver
    }
}

impl FontDriver for HeadlessFontDriver {
    type Face = HeadlessFace;

    fn open_face(&self, spec: &FaceSpec) -> Result<Self::Face> {
        Ok(HeadlessFace::ascii().with_hinting(spec.hinting, spec.hintstyle))
    }

    fn set_size(
        &self,
        face: &mut Self::Face,
        width: F26Dot6,
        height: F26Dot6,
        xdpi: f32,
        ydpi: f32,
    ) -> Result<()> {
        face.size = FaceSize {
            width,
            height,
            xdpi,
            ydpi,
        };
        Ok(())
    }

    fn size(&self, face: &Self::Face) -> FaceSize {
        face.size
    }

    fn hint_preferences(&self, face: &Self::Face) -> (bool, i32) {
        (face.hinting, face.hintstyle)
    }

    fn is_scalable(&self, face: &Self::Face) -> bool {
        face.scalable
    }

    fn glyph_for_codepoint(&self, face: &Self::Face, cp: u32) -> u16 {
        if face.covers(cp) {
            ((cp % 0xfff0) + 1) as u16
        } else {
            0
        }
    }

    fn shape(
        &self,
        face: &mut Self::Face,
        text: &str,
        _flags: LoadFlags,
    ) -> Result<Vec<ShapedGlyph>> {
        let advance = (face.advance_px() * 64.0).round() as F26Dot6;
        Ok(text
            .char_indices()
            .map(|(offset, c)| ShapedGlyph {
                glyph: self.glyph_for_codepoint(face, c as u32),
                cluster: offset as u32,
                mask: 0,
                x_offset: 0,
                y_offset: 0,
                x_advance: advance,
                y_advance: 0,
            })
            .collect())
    }

    fn load_and_render_glyph(
        &self,
        face: &mut Self::Face,
        _glyph: u16,
        _flags: LoadFlags,
    ) -> Result<GlyphBitmap> {
        let width = face
            .glyph_width_px
            .unwrap_or_else(|| face.advance_px().round() as usize)
            .max(1);
        let rows = (face.ascent().ceil() as usize).max(1);
        Ok(GlyphBitmap {
            pixels: vec![0xff; width * rows],
            width,
            rows,
            stride: width,
            bearing_x: 0,
            bearing_y: (face.ascent() * 64.0) as F26Dot6,
            advance: (face.advance_px() * 64.0).round() as F26Dot6,
        })
    }

    fn face_metrics(&self, face: &Self::Face) -> FaceMetrics {
        let px = face.px_em();
        FaceMetrics {
            ascent: 0.8 * px,
            descent: 0.25 * px,
            underline_position: 0.1 * px,
            underline_thickness: (0.05 * px).max(1.0),
        }
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    fn sized(face: HeadlessFace, pt: i32) -> HeadlessFace {
        let mut face = face;
        HeadlessFontDriver
            .set_size(&mut face, pt * 64, pt * 64, 96.0, 96.0)
            .unwrap();
        face
    }

    #[test]
    fn test_coverage() {
        let driver = HeadlessFontDriver::new();
        let face = HeadlessFace::ascii();
        assert!(driver.has_codepoint(&face, 'A' as u32));
        assert!(!driver.has_codepoint(&face, 0x4e2d));
        assert_eq!(driver.glyph_for_codepoint(&face, 0x4e2d), 0);
        assert_ne!(driver.glyph_for_codepoint(&face, 'A' as u32), 0);
    }

    #[test]
    fn test_shape_clusters_are_byte_offsets() {
        let driver = HeadlessFontDriver::new();
        let mut face = sized(HeadlessFace::new([0x20..=0x9fff]), 12);
        let glyphs = driver.shape(&mut face, "a\u{4e2d}b", LoadFlags::empty()).unwrap();
        assert_eq!(glyphs.len(), 3);
        assert_eq!(glyphs[0].cluster, 0);
        assert_eq!(glyphs[1].cluster, 1);
        assert_eq!(glyphs[2].cluster, 4); // after the 3-byte CJK char
    }

    #[test]
    fn test_bitmap_scales_with_size() {
        let driver = HeadlessFontDriver::new();
        let mut face = sized(HeadlessFace::ascii(), 12);
        // 12pt at 96dpi is a 16px em; advance factor 0.5 gives 8px.
        let bm = driver
            .load_and_render_glyph(&mut face, 1, LoadFlags::RENDER)
            .unwrap();
        assert_eq!(bm.width, 8);
        assert_eq!(bm.pixels.len(), bm.rows * bm.stride);

        let mut small = sized(HeadlessFace::ascii(), 6);
        let bm = driver
            .load_and_render_glyph(&mut small, 1, LoadFlags::RENDER)
            .unwrap();
        assert_eq!(bm.width, 4);
    }

    #[test]
    fn test_metrics_proportions() {
        let driver = HeadlessFontDriver::new();
        let face = sized(HeadlessFace::ascii(), 12);
        let fm = driver.face_metrics(&face);
        assert_eq!(fm.ascent, 12.8);
        assert_eq!(fm.descent, 4.0);
        assert!(fm.underline_thickness >= 1.0);
    }
}
