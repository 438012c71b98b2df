//! Production font driver: fontdue outlines shaped with rustybuzz.
//!
//! Font bytes are kept in an `Arc` so the shaping engine can borrow them
//! transiently per run; fontdue owns its own parse for rasterization.
//! rustybuzz reports positions in font units, which this driver scales into
//! 26.6 fixed point so the renderer's divide-by-64 contract holds.
//!
//! fontdue applies its own grid fitting, so the hint-derived load flags are
//! accepted for contract compatibility but do not change rasterization; the
//! face records its hinting preferences for the policy computation upstream.

use super::driver::{
    f26dot6_to_px, F26Dot6, FaceMetrics, FaceSize, FaceSpec, FontDriver, GlyphBitmap, LoadFlags,
    ShapedGlyph,
};
use anyhow::{anyhow, Context, Result};
use log::debug;
use std::sync::Arc;

/// An opened outline face plus its scaled size and hinting preferences.
#[derive(Debug)]
pub struct OpenTypeFace {
    bytes: Arc<Vec<u8>>,
    face_index: u32,
    font: fontdue::Font,
    units_per_em: f32,
    underline: Option<(f32, f32)>, // (position, thickness) in font units
    size: FaceSize,
    hinting: bool,
    hintstyle: i32,
}

impl OpenTypeFace {
    /// Parses a face from raw font bytes.
    pub fn from_bytes(bytes: Vec<u8>, index: u32, hinting: bool, hintstyle: i32) -> Result<Self> {
        let font = fontdue::Font::from_bytes(
            bytes.as_slice(),
            fontdue::FontSettings {
                collection_index: index,
                ..fontdue::FontSettings::default()
            },
        )
        .map_err(|e| anyhow!("failed to parse font face: {}", e))?;

        let parsed = rustybuzz::ttf_parser::Face::parse(&bytes, index)
            .map_err(|e| anyhow!("failed to parse font tables: {}", e))?;
        let units_per_em = parsed.units_per_em() as f32;
        let underline = parsed
            .underline_metrics()
            .map(|m| (m.position as f32, m.thickness as f32));

        Ok(OpenTypeFace {
            bytes: Arc::new(bytes),
            face_index: index,
            font,
            units_per_em,
            underline,
            size: FaceSize {
                width: 10 * 64,
                height: 10 * 64,
                xdpi: 96.0,
                ydpi: 96.0,
            },
            hinting,
            hintstyle,
        })
    }

    /// Em size in pixels at the current scaled size.
    fn px_em(&self) -> f32 {
        f26dot6_to_px(self.size.height) * self.size.ydpi / 72.0
    }

    /// Pixels per font unit at the current scaled size.
    fn unit_scale(&self) -> f32 {
        self.px_em() / self.units_per_em
    }
}

/// Driver wrapping fontdue (rasterization) and rustybuzz (shaping).
#[derive(Debug, Clone, Default)]
pub struct OpenTypeFontDriver;

impl OpenTypeFontDriver {
    pub fn new() -> Self {
        OpenTypeFontDriver
    }
}

impl FontDriver for OpenTypeFontDriver {
    type Face = OpenTypeFace;

    fn open_face(&self, spec: &FaceSpec) -> Result<Self::Face> {
        let bytes = std::fs::read(&spec.path)
            .with_context(|| format!("failed to read font file {}", spec.path.display()))?;
        debug!(
            "OpenTypeFontDriver: opening face {} (index {}, {} bytes)",
            spec.path.display(),
            spec.index,
            bytes.len()
        );
        OpenTypeFace::from_bytes(bytes, spec.index, spec.hinting, spec.hintstyle)
            .with_context(|| format!("failed to load face {}", spec.path.display()))
    }

    fn set_size(
        &self,
        face: &mut Self::Face,
        width: F26Dot6,
        height: F26Dot6,
        xdpi: f32,
        ydpi: f32,
    ) -> Result<()> {
        if width <= 0 || height <= 0 {
            return Err(anyhow!("invalid char size {}x{}", width, height));
        }
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

    fn is_scalable(&self, _face: &Self::Face) -> bool {
        // fontdue only handles outline fonts.
        true
    }

    fn glyph_for_codepoint(&self, face: &Self::Face, cp: u32) -> u16 {
        match char::from_u32(cp) {
            Some(c) => face.font.lookup_glyph_index(c),
            None => 0,
        }
    }

    fn shape(
        &self,
        face: &mut Self::Face,
        text: &str,
        _flags: LoadFlags,
    ) -> Result<Vec<ShapedGlyph>> {
        let shaping_face = rustybuzz::Face::from_slice(&face.bytes, face.face_index)
            .ok_or_else(|| anyhow!("failed to create shaping face"))?;
        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str(text);
        // Script, language and direction are guessed from the buffer content.
        let output = rustybuzz::shape(&shaping_face, &[], buffer);

        let scale = face.unit_scale();
        let to_26_6 = |units: i32| (units as f32 * scale * 64.0).round() as F26Dot6;

        Ok(output
            .glyph_infos()
            .iter()
            .zip(output.glyph_positions())
            .map(|(info, pos)| ShapedGlyph {
                glyph: info.glyph_id as u16,
                cluster: info.cluster,
                mask: 0,
                x_offset: to_26_6(pos.x_offset),
                y_offset: to_26_6(pos.y_offset),
                x_advance: to_26_6(pos.x_advance),
                y_advance: to_26_6(pos.y_advance),
            })
            .collect())
    }

    fn load_and_render_glyph(
        &self,
        face: &mut Self::Face,
        glyph: u16,
        _flags: LoadFlags,
    ) -> Result<GlyphBitmap> {
        let (metrics, pixels) = face.font.rasterize_indexed(glyph, face.px_em());
        Ok(GlyphBitmap {
            width: metrics.width,
            rows: metrics.height,
            stride: metrics.width,
            bearing_x: (metrics.xmin * 64) as F26Dot6,
            bearing_y: ((metrics.ymin + metrics.height as i32) * 64) as F26Dot6,
            advance: (metrics.advance_width * 64.0).round() as F26Dot6,
            pixels,
        })
    }

    fn face_metrics(&self, face: &Self::Face) -> FaceMetrics {
        let px = face.px_em();
        let (ascent, descent) = match face.font.horizontal_line_metrics(px) {
            Some(lm) => (lm.ascent, -lm.descent),
            None => (0.8 * px, 0.25 * px),
        };
        let scale = face.unit_scale();
        let (underline_position, underline_thickness) = match face.underline {
            // TrueType reports the position below the baseline as negative.
            Some((pos, thickness)) => ((-pos * scale).max(0.0), (thickness * scale).max(1.0)),
            None => (descent / 2.0, 1.0),
        };
        FaceMetrics {
            ascent,
            descent,
            underline_position,
            underline_thickness,
        }
    }
}
