//! Font engine integration.
//!
//! The rendering core never talks to an outline or shaping engine directly;
//! everything goes through the [`driver::FontDriver`] trait. Two drivers
//! ship with the crate: [`opentype`] wraps real font files (fontdue for
//! rasterization, rustybuzz for shaping), [`headless`] is a deterministic
//! synthetic engine for tests and benchmarks.

pub mod driver;
pub mod headless;
pub mod opentype;
