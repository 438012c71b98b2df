//! Font engine primitives behind a trait.
//!
//! This module defines the `FontDriver` trait: thin wrappers around an
//! outline engine (glyph loading and rasterization) and a shaping engine
//! bound to each face. The renderer implements everything else — selection,
//! caching, placement — on top of these primitives, so a driver stays small.
//!
//! All pen positions crossing this seam are 26.6 fixed point (the low six
//! bits are fractional); the core divides by 64 when it needs pixels.

use anyhow::Result;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 26.6 fixed-point value: 1/64th of a pixel per unit.
pub type F26Dot6 = i32;

/// Converts a 26.6 fixed-point value to fractional pixels.
pub fn f26dot6_to_px(v: F26Dot6) -> f32 {
    v as f32 / 64.0
}

bitflags! {
    /// Glyph load flags handed to the outline engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LoadFlags: u32 {
        /// Rasterize the glyph, not just its metrics.
        const RENDER = 1 << 0;
        /// Disable hinting entirely.
        const NO_HINTING = 1 << 1;
        /// Full grid fitting.
        const TARGET_NORMAL = 1 << 2;
        /// Light, mostly-vertical grid fitting.
        const TARGET_LIGHT = 1 << 3;
    }
}

/// Maps the user's hinting preferences onto load flags.
///
/// `base` is [`LoadFlags::RENDER`] for rasterizing loads and empty for the
/// loads the shaping engine issues internally. With hinting enabled,
/// `hintstyle >= 3` selects full grid fitting, `1..=2` the light target, and
/// anything else leaves the engine default; with hinting disabled the
/// no-hinting flag is set.
pub fn load_flags(hinting: bool, hintstyle: i32, base: LoadFlags) -> LoadFlags {
    let mut flags = base;
    if hinting {
        if hintstyle >= 3 {
            flags |= LoadFlags::TARGET_NORMAL;
        } else if hintstyle > 0 {
            flags |= LoadFlags::TARGET_LIGHT;
        }
    } else {
        flags |= LoadFlags::NO_HINTING;
    }
    flags
}

/// Everything needed to open a face: where it lives and how to hint it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSpec {
    /// Path of the font file on disk.
    pub path: PathBuf,
    /// Face index within a collection file (0 for single-face files).
    pub index: u32,
    /// Whether hinting is enabled for this face.
    pub hinting: bool,
    /// Hint style strength, interpreted by [`load_flags`].
    pub hintstyle: i32,
}

/// One glyph produced by shaping a text run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedGlyph {
    /// Glyph id in the face; 0 is the missing-glyph id.
    pub glyph: u16,
    /// Byte offset of the source cluster in the shaped string.
    pub cluster: u32,
    /// Engine-specific glyph mask; 0 when the engine has none to report.
    pub mask: u32,
    pub x_offset: F26Dot6,
    pub y_offset: F26Dot6,
    pub x_advance: F26Dot6,
    pub y_advance: F26Dot6,
}

/// An 8-bit grayscale glyph rendering plus the metrics placement needs.
#[derive(Debug, Clone)]
pub struct GlyphBitmap {
    /// Coverage bytes, row-major, `rows * stride` long.
    pub pixels: Vec<u8>,
    /// Width in pixels of the covered region.
    pub width: usize,
    /// Number of rows.
    pub rows: usize,
    /// Bytes per row. Engines reporting a negative pitch hand over its
    /// absolute value.
    pub stride: usize,
    /// Horizontal bearing from the pen to the left edge, 26.6.
    pub bearing_x: F26Dot6,
    /// Vertical bearing from the baseline to the top edge, 26.6.
    pub bearing_y: F26Dot6,
    /// Horizontal advance, 26.6.
    pub advance: F26Dot6,
}

/// Scaled vertical metrics of a face, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMetrics {
    /// Distance from the baseline to the top of the em box (positive up).
    pub ascent: f32,
    /// Distance from the baseline to the bottom of the em box (positive
    /// down).
    pub descent: f32,
    /// Offset of the underline below the baseline (positive down).
    pub underline_position: f32,
    /// Underline stroke thickness.
    pub underline_thickness: f32,
}

/// A face's current scaled size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceSize {
    /// Character width in 26.6 points.
    pub width: F26Dot6,
    /// Character height in 26.6 points.
    pub height: F26Dot6,
    pub xdpi: f32,
    pub ydpi: f32,
}

/// Font engine driver trait.
///
/// Implementors wrap a concrete outline + shaping engine pair. The renderer
/// uses these primitives for everything it does; it never loads font files
/// or positions glyphs on its own.
pub trait FontDriver {
    /// Engine-specific face handle.
    type Face;

    /// Opens the face described by `spec`. Errors carry a human-readable
    /// message derived from the engine's failure.
    fn open_face(&self, spec: &FaceSpec) -> Result<Self::Face>;

    /// Sets the face's scaled size and informs the shaping engine bound to
    /// it of the new scale.
    fn set_size(
        &self,
        face: &mut Self::Face,
        width: F26Dot6,
        height: F26Dot6,
        xdpi: f32,
        ydpi: f32,
    ) -> Result<()>;

    /// The face's current scaled size.
    fn size(&self, face: &Self::Face) -> FaceSize;

    /// The (hinting, hintstyle) pair the face was opened with.
    fn hint_preferences(&self, face: &Self::Face) -> (bool, i32);

    /// Whether the face carries scalable outlines (and thus supports the
    /// rescale path for oversized glyphs).
    fn is_scalable(&self, face: &Self::Face) -> bool;

    /// Glyph id for a codepoint; 0 means the face does not cover it.
    fn glyph_for_codepoint(&self, face: &Self::Face, cp: u32) -> u16;

    /// Coverage probe used for style and fallback decisions.
    fn has_codepoint(&self, face: &Self::Face, cp: u32) -> bool {
        self.glyph_for_codepoint(face, cp) != 0
    }

    /// Shapes a UTF-8 run against the face: script/direction guessing
    /// followed by complex shaping. Engines that support it apply `flags`
    /// to the glyph loads they issue internally; others shape with their
    /// defaults.
    fn shape(&self, face: &mut Self::Face, text: &str, flags: LoadFlags)
        -> Result<Vec<ShapedGlyph>>;

    /// Loads a glyph and rasterizes it into an 8-bit grayscale bitmap.
    fn load_and_render_glyph(
        &self,
        face: &mut Self::Face,
        glyph: u16,
        flags: LoadFlags,
    ) -> Result<GlyphBitmap>;

    /// Scaled vertical metrics for the face at its current size.
    fn face_metrics(&self, face: &Self::Face) -> FaceMetrics;
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_flags_no_hinting() {
        let flags = load_flags(false, 3, LoadFlags::RENDER);
        assert_eq!(flags, LoadFlags::RENDER | LoadFlags::NO_HINTING);
    }

    #[test]
    fn test_load_flags_full_hinting() {
        assert_eq!(
            load_flags(true, 3, LoadFlags::RENDER),
            LoadFlags::RENDER | LoadFlags::TARGET_NORMAL
        );
        assert_eq!(
            load_flags(true, 7, LoadFlags::empty()),
            LoadFlags::TARGET_NORMAL
        );
    }

    #[test]
    fn test_load_flags_light_hinting() {
        assert_eq!(
            load_flags(true, 1, LoadFlags::RENDER),
            LoadFlags::RENDER | LoadFlags::TARGET_LIGHT
        );
        assert_eq!(
            load_flags(true, 2, LoadFlags::empty()),
            LoadFlags::TARGET_LIGHT
        );
    }

    #[test]
    fn test_load_flags_engine_default() {
        // Hinting on but style <= 0: only the base flag.
        assert_eq!(load_flags(true, 0, LoadFlags::RENDER), LoadFlags::RENDER);
        assert_eq!(load_flags(true, -1, LoadFlags::empty()), LoadFlags::empty());
    }

    #[test]
    fn test_f26dot6_conversion() {
        assert_eq!(f26dot6_to_px(64), 1.0);
        assert_eq!(f26dot6_to_px(96), 1.5);
        assert_eq!(f26dot6_to_px(-32), -0.5);
    }
}
