//! glyphgrid: the text rendering core of a GPU-accelerated terminal.
//!
//! The crate turns a logical grid of character cells into rasterized,
//! cell-sized glyph bitmaps placed into a 3-D GPU sprite atlas. For every
//! frame it answers four questions: which face renders a cell (style
//! selection, symbol maps, lazy fallback discovery, synthesized box glyphs),
//! how a run of same-face cells is shaped, how each shaped glyph is
//! rasterized and fitted into cell buffers, and where in the atlas each
//! (glyph, context) pair lives so a rendered glyph is uploaded at most once.
//!
//! Font engines stay behind the [`font::driver::FontDriver`] trait; the
//! bundled [`font::opentype::OpenTypeFontDriver`] wraps fontdue and
//! rustybuzz, and [`font::headless::HeadlessFontDriver`] is a synthetic
//! engine for tests and benchmarks. GPU texture uploads go through an
//! injected sink; box-drawing bitmaps and fallback face discovery come from
//! host callbacks.

pub mod cell;
pub mod config;
pub mod error;
pub mod font;
pub mod raster;
pub mod render;
pub mod sprite;

pub use cell::{Cell, Line};
pub use config::FontOptions;
pub use error::RenderError;
pub use font::driver::{FaceSpec, FontDriver};
pub use render::{BoxDrawing, CellMetrics, FallbackResolver, Renderer, UploadSink, MISSING_GLYPH};
pub use sprite::{SpritePos, SpriteTracker};
