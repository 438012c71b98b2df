// src/config.rs

//! User-tunable knobs consumed by the renderer.
//!
//! The host owns configuration loading; these structs only need to
//! deserialize from whatever format it uses.

use serde::{Deserialize, Serialize};

/// Adjustments applied to the cell metrics measured from the medium face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontOptions {
    /// Additive line-height adjustment in pixels. Applied when non-zero.
    pub adjust_line_height_px: i32,
    /// Multiplicative line-height adjustment. Applied when non-zero.
    pub adjust_line_height_frac: f32,
}

impl Default for FontOptions {
    fn default() -> Self {
        FontOptions {
            adjust_line_height_px: 0,
            adjust_line_height_frac: 0.0,
        }
    }
}
