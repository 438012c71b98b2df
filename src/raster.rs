// src/raster.rs

//! Glyph bitmap processing: fitting engine output into cell-sized buffers.
//!
//! Rendered glyphs rarely match the cell grid exactly. This module owns the
//! fitting rules: minor italic overshoot is cropped column by column, heavy
//! overflow on scalable faces triggers a one-shot rescale, and anything else
//! is clipped during placement. Placement composes glyphs into a cell strip
//! with wrap-around additive blending, which stacked combining marks rely
//! on; saturating here changes visible output.

use crate::font::driver::{f26dot6_to_px, FontDriver, GlyphBitmap, LoadFlags};
use anyhow::Result;
use log::trace;

/// Grayscale level above which a column counts as carrying glyph coverage.
const TEXT_THRESHOLD: u8 = 200;

/// A glyph bitmap after overflow processing.
///
/// `start_x` is the number of leading source columns placement must skip;
/// `width` already excludes both trimmed and skipped columns' share.
#[derive(Debug, Clone)]
pub struct ProcessedBitmap {
    pub pixels: Vec<u8>,
    pub width: usize,
    pub rows: usize,
    pub stride: usize,
    pub start_x: usize,
    pub bearing_x: i32,
    pub bearing_y: i32,
}

impl From<GlyphBitmap> for ProcessedBitmap {
    fn from(bm: GlyphBitmap) -> Self {
        ProcessedBitmap {
            pixels: bm.pixels,
            width: bm.width,
            rows: bm.rows,
            stride: bm.stride,
            start_x: 0,
            bearing_x: bm.bearing_x,
            bearing_y: bm.bearing_y,
        }
    }
}

/// Crops `extra` columns of overflow from an italic glyph.
///
/// Columns whose every pixel is at most [`TEXT_THRESHOLD`] are discarded
/// from the right edge first; whatever overflow remains is skipped from the
/// left edge via `start_x`.
fn trim_borders(bm: &mut ProcessedBitmap, mut extra: usize) {
    let mut column_has_text = false;
    let mut x = bm.width as isize - 1;
    while !column_has_text && x >= 0 && extra > 0 {
        for y in 0..bm.rows {
            if bm.pixels[x as usize + y * bm.stride] > TEXT_THRESHOLD {
                column_has_text = true;
                break;
            }
        }
        if !column_has_text {
            bm.width -= 1;
            extra -= 1;
        }
        x -= 1;
    }

    bm.start_x = extra;
    bm.width -= extra;
}

/// Loads and renders a glyph, then fits it to `cell_width * num_cells`.
///
/// Overflow handling, in order:
/// 1. minor overshoot on italics (less than half a cell) is trimmed;
/// 2. overflow beyond `max(2, cell_width / 3)` on a scalable face triggers a
///    rescale: the face is temporarily resized by the aspect ratio, the
///    glyph re-rendered once without further rescaling, and the previous
///    size restored;
/// 3. anything else is accepted and clipped during placement.
pub fn render_bitmap<D: FontDriver>(
    driver: &D,
    face: &mut D::Face,
    glyph: u16,
    cell_width: usize,
    num_cells: usize,
    italic: bool,
    flags: LoadFlags,
    rescale: bool,
) -> Result<ProcessedBitmap> {
    let mut bm = ProcessedBitmap::from(driver.load_and_render_glyph(face, glyph, flags)?);
    let max_width = cell_width * num_cells;
    if bm.width > max_width {
        let extra = bm.width - max_width;
        if italic && extra < cell_width / 2 {
            trim_borders(&mut bm, extra);
        } else if rescale && driver.is_scalable(face) && extra > (cell_width / 3).max(2) {
            let saved = driver.size(face);
            let ar = max_width as f32 / bm.width as f32;
            trace!(
                "raster: rescaling glyph {}: {}px into {}px (ratio {:.3})",
                glyph,
                bm.width,
                max_width,
                ar
            );
            driver.set_size(
                face,
                (saved.width as f32 * ar) as i32,
                (saved.height as f32 * ar) as i32,
                saved.xdpi,
                saved.ydpi,
            )?;
            let rescaled = render_bitmap(
                driver, face, glyph, cell_width, num_cells, italic, flags, false,
            );
            driver.set_size(face, saved.width, saved.height, saved.xdpi, saved.ydpi)?;
            bm = rescaled?;
        }
    }
    Ok(bm)
}

/// Composes a processed bitmap into a cell strip.
///
/// The destination column follows the pen position plus the horizontal
/// bearing: negative lands skip source columns, overflow on the right slides
/// the start back (floored at zero). The destination row places the top of
/// the bitmap at `baseline - (y_offset + bearing_y)`, clamping ascender
/// overflow to the top of the strip. Pixels are blended additively modulo
/// 256.
pub fn place_bitmap_in_cell(
    cell: &mut [u8],
    bm: &ProcessedBitmap,
    cell_width: usize,
    cell_height: usize,
    x_offset: f32,
    y_offset: f32,
    baseline: usize,
) {
    let xoff = (x_offset + f26dot6_to_px(bm.bearing_x)) as isize;
    let mut src_start_column = bm.start_x;
    let mut dest_start_column = 0usize;
    if xoff < 0 {
        src_start_column += (-xoff) as usize;
    } else {
        dest_start_column = xoff as usize;
    }
    if dest_start_column > 0 && dest_start_column + bm.width > cell_width {
        let extra = dest_start_column + bm.width - cell_width;
        dest_start_column = if extra > dest_start_column {
            0
        } else {
            dest_start_column - extra
        };
    }

    let yoff = (y_offset + f26dot6_to_px(bm.bearing_y)) as isize;
    let dest_start_row = if yoff > 0 && yoff as usize > baseline {
        0
    } else {
        (baseline as isize - yoff) as usize
    };

    let mut sr = 0;
    let mut dr = dest_start_row;
    while sr < bm.rows && dr < cell_height {
        let mut sc = src_start_column;
        let mut dc = dest_start_column;
        while sc < bm.width && dc < cell_width {
            let dst = &mut cell[dr * cell_width + dc];
            *dst = dst.wrapping_add(bm.pixels[sr * bm.stride + sc]);
            sc += 1;
            dc += 1;
        }
        sr += 1;
        dr += 1;
    }
}

/// Slices a `(num_cells * cell_width) x cell_height` strip into per-cell
/// buffers by column. Concatenating the results horizontally reproduces the
/// strip exactly.
pub fn split_cells(
    src: &[u8],
    cell_width: usize,
    cell_height: usize,
    num_cells: usize,
) -> Vec<Vec<u8>> {
    let stride = num_cells * cell_width;
    (0..num_cells)
        .map(|i| {
            let mut cell = vec![0u8; cell_width * cell_height];
            for y in 0..cell_height {
                let src_row = y * stride + i * cell_width;
                cell[y * cell_width..(y + 1) * cell_width]
                    .copy_from_slice(&src[src_row..src_row + cell_width]);
            }
            cell
        })
        .collect()
}

/// Measures the cell width a face wants: the ceiling of the largest
/// horizontal advance over printable ASCII.
pub fn cell_width_hint<D: FontDriver>(
    driver: &D,
    face: &mut D::Face,
    flags: LoadFlags,
) -> Result<u32> {
    let mut width = 0u32;
    for cp in 32u32..128 {
        let glyph = driver.glyph_for_codepoint(face, cp);
        let bm = driver.load_and_render_glyph(face, glyph, flags)?;
        width = width.max(f26dot6_to_px(bm.advance).ceil() as u32);
    }
    Ok(width)
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::driver::{FaceSize, FontDriver};
    use crate::font::headless::{HeadlessFace, HeadlessFontDriver};

    fn bitmap(width: usize, rows: usize, fill: u8) -> ProcessedBitmap {
        ProcessedBitmap {
            pixels: vec![fill; width * rows],
            width,
            rows,
            stride: width,
            start_x: 0,
            bearing_x: 0,
            bearing_y: 0,
        }
    }

    #[test]
    fn test_trim_removes_blank_right_columns() {
        let mut bm = bitmap(10, 2, 255);
        // Columns 8 and 9 carry no coverage.
        for y in 0..2 {
            bm.pixels[y * 10 + 8] = 10;
            bm.pixels[y * 10 + 9] = 10;
        }
        trim_borders(&mut bm, 2);
        assert_eq!(bm.width, 8);
        assert_eq!(bm.start_x, 0);
    }

    #[test]
    fn test_trim_residue_skips_left_columns() {
        let mut bm = bitmap(10, 2, 255);
        // Only column 9 is blank; the second overflow column is taken from
        // the left.
        for y in 0..2 {
            bm.pixels[y * 10 + 9] = 0;
        }
        trim_borders(&mut bm, 2);
        assert_eq!(bm.start_x, 1);
        assert_eq!(bm.width, 8);
    }

    #[test]
    fn test_trim_threshold_boundary() {
        let mut bm = bitmap(4, 1, 0);
        // Exactly 200 still counts as blank; 201 does not.
        bm.pixels[3] = 200;
        trim_borders(&mut bm, 1);
        assert_eq!(bm.width, 3);

        let mut bm = bitmap(4, 1, 0);
        bm.pixels[3] = 201;
        trim_borders(&mut bm, 1);
        assert_eq!(bm.start_x, 1);
        assert_eq!(bm.width, 3);
    }

    #[test]
    fn test_place_wraps_instead_of_saturating() {
        let mut cell = vec![200u8; 4];
        let mut bm = bitmap(2, 2, 100);
        bm.bearing_y = 2 * 64;
        place_bitmap_in_cell(&mut cell, &bm, 2, 2, 0.0, 0.0, 2);
        // 200 + 100 wraps to 44.
        assert_eq!(cell, vec![44u8; 4]);
    }

    #[test]
    fn test_place_positions_at_baseline() {
        let mut cell = vec![0u8; 4 * 6];
        let mut bm = bitmap(2, 2, 255);
        bm.bearing_y = 2 * 64; // top of bitmap two rows above the baseline
        bm.bearing_x = 64; // one column in
        place_bitmap_in_cell(&mut cell, &bm, 4, 6, 0.0, 0.0, 4);
        // Rows 2..4, columns 1..3 are covered.
        for y in 0..6 {
            for x in 0..4 {
                let expected = if (2..4).contains(&y) && (1..3).contains(&x) {
                    255
                } else {
                    0
                };
                assert_eq!(cell[y * 4 + x], expected, "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_place_clamps_ascender_overflow() {
        let mut cell = vec![0u8; 4 * 4];
        let mut bm = bitmap(2, 2, 255);
        bm.bearing_y = 10 * 64; // way above the cell
        place_bitmap_in_cell(&mut cell, &bm, 4, 4, 0.0, 0.0, 3);
        // Clamped to the top row.
        assert_eq!(cell[0], 255);
        assert_eq!(cell[4], 255);
        assert_eq!(cell[8], 0);
    }

    #[test]
    fn test_place_negative_pen_skips_source_columns() {
        let mut cell = vec![0u8; 4 * 2];
        let mut bm = bitmap(3, 2, 0);
        // Mark each source column distinctly.
        for y in 0..2 {
            for x in 0..3 {
                bm.pixels[y * 3 + x] = (x + 1) as u8;
            }
        }
        bm.bearing_x = -64; // pen one pixel to the left of the cell
        bm.bearing_y = 2 * 64;
        place_bitmap_in_cell(&mut cell, &bm, 4, 2, 0.0, 0.0, 2);
        // Source column 0 is cut off; columns 1, 2 land at 0, 1.
        assert_eq!(&cell[0..3], &[2, 3, 0]);
    }

    #[test]
    fn test_place_slides_back_on_right_overflow() {
        let mut cell = vec![0u8; 4 * 1];
        let mut bm = bitmap(3, 1, 9);
        bm.bearing_x = 3 * 64; // would start at column 3 and overflow by 2
        bm.bearing_y = 64;
        place_bitmap_in_cell(&mut cell, &bm, 4, 1, 0.0, 0.0, 1);
        assert_eq!(cell, vec![0, 9, 9, 9]);
    }

    #[test]
    fn test_split_cells_round_trip() {
        let cell_width = 3;
        let cell_height = 2;
        let num_cells = 2;
        let strip: Vec<u8> = (0..(cell_width * num_cells * cell_height) as u8).collect();
        let cells = split_cells(&strip, cell_width, cell_height, num_cells);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0], vec![0, 1, 2, 6, 7, 8]);
        assert_eq!(cells[1], vec![3, 4, 5, 9, 10, 11]);

        // Horizontal concatenation reproduces the strip.
        let mut rebuilt = vec![0u8; strip.len()];
        for (i, cell) in cells.iter().enumerate() {
            for y in 0..cell_height {
                let dst = y * cell_width * num_cells + i * cell_width;
                rebuilt[dst..dst + cell_width]
                    .copy_from_slice(&cell[y * cell_width..(y + 1) * cell_width]);
            }
        }
        assert_eq!(rebuilt, strip);
    }

    #[test]
    fn test_cell_width_hint_uses_max_ascii_advance() {
        let driver = HeadlessFontDriver::new();
        let mut face = HeadlessFace::ascii();
        driver.set_size(&mut face, 12 * 64, 12 * 64, 96.0, 96.0).unwrap();
        // 16px em, advance factor 0.5.
        let hint = cell_width_hint(&driver, &mut face, LoadFlags::RENDER).unwrap();
        assert_eq!(hint, 8);
    }

    #[test]
    fn test_render_bitmap_fits_without_overflow() {
        let driver = HeadlessFontDriver::new();
        let mut face = HeadlessFace::ascii();
        driver.set_size(&mut face, 12 * 64, 12 * 64, 96.0, 96.0).unwrap();
        let bm = render_bitmap(&driver, &mut face, 1, 8, 1, false, LoadFlags::RENDER, true)
            .unwrap();
        assert_eq!(bm.width, 8);
        assert_eq!(bm.start_x, 0);
    }

    #[test]
    fn test_render_bitmap_trims_italic_overshoot() {
        let driver = HeadlessFontDriver::new();
        // 10px wide glyphs over an 8px cell: 2px overshoot, under half a cell.
        let mut face = HeadlessFace::ascii().with_glyph_width(10);
        driver.set_size(&mut face, 12 * 64, 12 * 64, 96.0, 96.0).unwrap();
        let bm = render_bitmap(&driver, &mut face, 1, 8, 1, true, LoadFlags::RENDER, true)
            .unwrap();
        // Solid coverage everywhere, so the overshoot is skipped on the left.
        assert_eq!(bm.width, 8);
        assert_eq!(bm.start_x, 2);
    }

    #[test]
    fn test_render_bitmap_rescales_heavy_overflow() {
        let driver = HeadlessFontDriver::new();
        // Advance factor 1.5: 24px glyphs over an 8px cell.
        let mut face = HeadlessFace::ascii().with_advance_factor(1.5);
        driver.set_size(&mut face, 12 * 64, 12 * 64, 96.0, 96.0).unwrap();
        let saved = driver.size(&face);
        let bm = render_bitmap(&driver, &mut face, 1, 8, 1, false, LoadFlags::RENDER, true)
            .unwrap();
        assert!(bm.width <= 8, "rescaled width {} still overflows", bm.width);
        // The original size was restored afterwards.
        assert_eq!(driver.size(&face), saved);
    }

    #[test]
    fn test_render_bitmap_accepts_overflow_on_unscalable_face() {
        let driver = HeadlessFontDriver::new();
        let mut face = HeadlessFace::ascii()
            .with_advance_factor(1.5)
            .with_scalable(false);
        driver.set_size(&mut face, 12 * 64, 12 * 64, 96.0, 96.0).unwrap();
        let bm = render_bitmap(&driver, &mut face, 1, 8, 1, false, LoadFlags::RENDER, true)
            .unwrap();
        // Clipping happens later, during placement.
        assert_eq!(bm.width, 24);
    }

    #[test]
    fn test_size_for_face_round_trip() {
        let driver = HeadlessFontDriver::new();
        let mut face = HeadlessFace::ascii();
        driver.set_size(&mut face, 640, 1280, 72.0, 72.0).unwrap();
        assert_eq!(
            driver.size(&face),
            FaceSize {
                width: 640,
                height: 1280,
                xdpi: 72.0,
                ydpi: 72.0,
            }
        );
    }
}
