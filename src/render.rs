// src/render.rs

//! The renderer: grid cells in, atlas sprites out.
//!
//! One [`Renderer`] exists per window. It owns the installed fonts, the
//! sprite tracker, the scratch canvas and the upload sink, and exposes the
//! per-frame entry point [`Renderer::render_line`], which walks a line,
//! partitions it into maximal runs of cells resolving to the same face, and
//! renders each run: shaping, rasterization on cache miss, sprite upload,
//! and writing the assigned (x, y, z) indices back into the cells.
//!
//! All operations are synchronous and single threaded; the upload sink must
//! not call back into the renderer. Configuration mutators are transactional:
//! on error the previous fonts and metrics stay installed.

use crate::cell::{Cell, Line};
use crate::config::FontOptions;
use crate::error::RenderError;
use crate::font::driver::{
    f26dot6_to_px, load_flags, F26Dot6, FontDriver, LoadFlags, ShapedGlyph,
};
use crate::raster::{cell_width_hint, place_bitmap_in_cell, render_bitmap, split_cells};
use crate::sprite::{SpriteMap, SpriteTracker};
use log::{debug, error, info, trace, warn};

/// Sprite x index of the missing-glyph placeholder. The host's prerender
/// pass (blank, underline, curly underline, strikethrough, missing) puts its
/// missing-glyph bitmap in this slot.
pub const MISSING_GLYPH: u32 = 4;

/// Index of the medium face in the font table; always present once
/// [`Renderer::set_font`] has succeeded.
const MEDIUM: usize = 0;

/// Upper bound on lazily discovered fallback faces.
const MAX_FALLBACK_FONTS: usize = 256;

/// Receives every rasterized sprite exactly once: (x, y, z, pixels), where
/// `pixels` is a `cell_width * cell_height` grayscale buffer.
pub type UploadSink = Box<dyn FnMut(u32, u32, u32, &[u8])>;

/// Host callback resolving a coverage miss: (cell text, bold, italic) to a
/// face, or `None` when the system has nothing suitable.
pub type FallbackResolver<F> = Box<dyn FnMut(&str, bool, bool) -> anyhow::Result<Option<F>>>;

/// Host callback pre-rendering a box-drawing codepoint into a
/// `cell_width * cell_height` buffer.
pub type BoxDrawing = Box<dyn FnMut(u32) -> anyhow::Result<Vec<u8>>>;

/// Published cell geometry, derived from the medium face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellMetrics {
    pub cell_width: u32,
    pub cell_height: u32,
    pub baseline: u32,
    pub underline_position: u32,
    pub underline_thickness: u32,
}

/// A user symbol-map range, resolved to a slot in the font table.
#[derive(Debug, Clone, Copy)]
struct SymbolRange {
    left: u32,
    right: u32,
    font: usize,
}

/// An installed face plus its style and sprite cache.
struct Font<D: FontDriver> {
    face: D::Face,
    bold: bool,
    italic: bool,
    sprites: SpriteMap,
}

impl<D: FontDriver> Font<D> {
    fn new(face: D::Face, bold: bool, italic: bool) -> Self {
        Font {
            face,
            bold,
            italic,
            sprites: SpriteMap::new(),
        }
    }
}

/// What the font selector decided for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FontSel {
    /// Empty cell; sprite (0, 0, 0).
    Blank,
    /// Box-drawing codepoint; synthesized via the box-drawing callback.
    Boxed,
    /// No face covers the cell; sprite ([`MISSING_GLYPH`], 0, 0).
    Missing,
    /// Index into the font table.
    Face(usize),
}

/// Glyph id for a codepoint routed to the box font.
fn box_glyph_id(ch: u32) -> u16 {
    match ch {
        0x2500..=0x257f => (ch - 0x2500) as u16,
        0xe0b0 => 0x80,
        0xe0b2 => 0x81,
        _ => 0x82,
    }
}

/// Packs the glyph ids following the primary into the cache key's 64-bit
/// extra-glyph token, four 16-bit slots, low slot first. Glyphs beyond the
/// fourth do not participate in the key.
fn pack_extra_glyphs(glyphs: &[ShapedGlyph]) -> u64 {
    let mut packed = 0u64;
    for (i, g) in glyphs.iter().take(4).enumerate() {
        packed |= (g.glyph as u64) << (16 * i);
    }
    packed
}

/// The installed point size and dpi.
#[derive(Debug, Clone, Copy)]
struct FontSize {
    pt_sz: f32,
    xdpi: f32,
    ydpi: f32,
}

impl FontSize {
    fn char_size(&self) -> F26Dot6 {
        (self.pt_sz * 64.0) as F26Dot6
    }
}

/// The terminal text rendering core. See the module docs.
pub struct Renderer<D: FontDriver> {
    driver: D,
    options: FontOptions,
    tracker: SpriteTracker,
    /// Medium face, styled faces, symbol-map faces, then discovered
    /// fallbacks from `fallback_start` on.
    fonts: Vec<Font<D>>,
    bold: Option<usize>,
    italic: Option<usize>,
    bi: Option<usize>,
    symbol_maps: Vec<SymbolRange>,
    fallback_start: usize,
    box_sprites: SpriteMap,
    metrics: CellMetrics,
    size: Option<FontSize>,
    /// Scratch strip big enough for a double-width glyph.
    canvas: Vec<u8>,
    fallback_resolver: Option<FallbackResolver<D::Face>>,
    box_drawing: Option<BoxDrawing>,
    native_sink: UploadSink,
    user_sink: Option<UploadSink>,
}

impl<D: FontDriver> Renderer<D> {
    /// Creates a renderer around a driver and the native upload sink.
    /// [`Renderer::set_font`] must run before the first `render_line`.
    pub fn new(driver: D, native_sink: UploadSink, options: FontOptions) -> Self {
        Renderer {
            driver,
            options,
            tracker: SpriteTracker::new(),
            fonts: Vec::new(),
            bold: None,
            italic: None,
            bi: None,
            symbol_maps: Vec::new(),
            fallback_start: 0,
            box_sprites: SpriteMap::new(),
            metrics: CellMetrics::default(),
            size: None,
            canvas: Vec::new(),
            fallback_resolver: None,
            box_drawing: None,
            native_sink,
            user_sink: None,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The currently published cell geometry.
    pub fn cell_metrics(&self) -> CellMetrics {
        self.metrics
    }

    /// Installs the GPU capacity limits.
    pub fn set_sprite_map_limits(&mut self, max_texture_size: u32, max_array_len: u32) {
        self.tracker.set_limits(max_texture_size, max_array_len);
    }

    /// Recomputes the atlas grid for a cell size and resets the cursor.
    pub fn set_sprite_map_layout(&mut self, cell_width: u32, cell_height: u32) {
        self.tracker.set_layout(cell_width, cell_height);
    }

    /// Tight bounding volume of the atlas slots handed out so far.
    pub fn current_layout(&self) -> (u32, u32, u32) {
        self.tracker.current_layout()
    }

    /// Switches to a user upload sink, or back to the native one on `None`.
    pub fn set_upload_sink(&mut self, sink: Option<UploadSink>) {
        self.user_sink = sink;
    }

    /// Full reconfiguration: installs a new font set, rebuilds the symbol
    /// tables, resets every sprite cache and republishes the cell metrics.
    #[allow(clippy::too_many_arguments)]
    pub fn set_font(
        &mut self,
        fallback_resolver: FallbackResolver<D::Face>,
        box_drawing: BoxDrawing,
        symbol_maps: Vec<(u32, u32, usize)>,
        symbol_map_faces: Vec<(D::Face, bool, bool)>,
        pt_sz: f32,
        xdpi: f32,
        ydpi: f32,
        medium: D::Face,
        bold: Option<D::Face>,
        italic: Option<D::Face>,
        bi: Option<D::Face>,
    ) -> Result<CellMetrics, RenderError> {
        let mut fonts = Vec::with_capacity(4 + symbol_map_faces.len());
        fonts.push(Font::new(medium, false, false));
        let bold_idx = bold.map(|face| {
            fonts.push(Font::new(face, true, false));
            fonts.len() - 1
        });
        let italic_idx = italic.map(|face| {
            fonts.push(Font::new(face, false, true));
            fonts.len() - 1
        });
        let bi_idx = bi.map(|face| {
            fonts.push(Font::new(face, true, true));
            fonts.len() - 1
        });

        let symbol_base = fonts.len();
        let symbol_font_count = symbol_map_faces.len();
        for (face, b, i) in symbol_map_faces {
            fonts.push(Font::new(face, b, i));
        }
        let mut ranges = Vec::with_capacity(symbol_maps.len());
        for (left, right, idx) in symbol_maps {
            if idx >= symbol_font_count {
                return Err(RenderError::BadMetrics(format!(
                    "symbol map U+{:04X}..U+{:04X} references missing face {}",
                    left, right, idx
                )));
            }
            ranges.push(SymbolRange {
                left,
                right,
                font: symbol_base + idx,
            });
        }

        let size = FontSize { pt_sz, xdpi, ydpi };
        let metrics = Self::measure(&self.driver, &mut fonts, size, &self.options)?;
        info!(
            "Renderer: installed font set: {} faces, cell {}x{}, baseline {}",
            fonts.len(),
            metrics.cell_width,
            metrics.cell_height,
            metrics.baseline
        );

        self.fonts = fonts;
        self.bold = bold_idx;
        self.italic = italic_idx;
        self.bi = bi_idx;
        self.symbol_maps = ranges;
        self.fallback_start = self.fonts.len();
        self.fallback_resolver = Some(fallback_resolver);
        self.box_drawing = Some(box_drawing);
        self.box_sprites.clear();
        self.size = Some(size);
        self.commit_metrics(metrics);
        Ok(metrics)
    }

    /// Resizes every installed face and republishes the cell metrics.
    /// On failure the previous size is restored and the old metrics remain
    /// in force.
    pub fn set_font_size(
        &mut self,
        pt_sz: f32,
        xdpi: f32,
        ydpi: f32,
    ) -> Result<CellMetrics, RenderError> {
        if self.fonts.is_empty() {
            return Err(RenderError::BadMetrics("no fonts installed".into()));
        }
        let old = self.size;
        let size = FontSize { pt_sz, xdpi, ydpi };
        match Self::measure(&self.driver, &mut self.fonts, size, &self.options) {
            Ok(metrics) => {
                for font in &mut self.fonts {
                    font.sprites.clear();
                }
                self.box_sprites.clear();
                self.size = Some(size);
                self.commit_metrics(metrics);
                Ok(metrics)
            }
            Err(e) => {
                if let Some(old) = old {
                    let char_size = old.char_size();
                    for font in &mut self.fonts {
                        if let Err(restore) = self.driver.set_size(
                            &mut font.face,
                            char_size,
                            char_size,
                            old.xdpi,
                            old.ydpi,
                        ) {
                            warn!("Renderer: failed to restore previous font size: {restore:#}");
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Uploads host-prerendered sprites starting at the current cursor. The
    /// first sprite issued is always a blank cell; the provided buffers
    /// follow. Returns the x coordinate of the last sprite issued, which the
    /// host compares against the buffer count to detect an undersized atlas.
    pub fn send_prerendered_sprites(&mut self, buffers: &[&[u8]]) -> Result<u32, RenderError> {
        if self.fonts.is_empty() {
            return Err(RenderError::BadMetrics("no fonts installed".into()));
        }
        let Renderer {
            tracker,
            canvas,
            native_sink,
            user_sink,
            metrics,
            ..
        } = self;
        let sink = match user_sink {
            Some(s) => s,
            None => native_sink,
        };
        let cell_bytes = (metrics.cell_width * metrics.cell_height) as usize;
        canvas[..cell_bytes].fill(0);
        let pos = tracker.alloc()?;
        sink(pos.x, pos.y, pos.z, &canvas[..cell_bytes]);
        let mut last_x = pos.x;
        for buffer in buffers {
            let pos = tracker.alloc()?;
            sink(pos.x, pos.y, pos.z, buffer);
            last_x = pos.x;
        }
        Ok(last_x)
    }

    /// Renders a line: partitions it into maximal same-face runs and renders
    /// each. Cell sprites are written in place. Internal errors blank or
    /// missing-mark the affected cells and the rest of the line continues.
    pub fn render_line(&mut self, line: &mut Line) {
        if self.fonts.is_empty() {
            warn!("Renderer: render_line called before set_font; line skipped");
            return;
        }
        let mut run_sel: Option<FontSel> = None;
        let mut first_cell_in_run = 0usize;
        let mut prev_width = 0u16;
        let mut i = 0usize;
        while i < line.cells.len() {
            if prev_width == 2 {
                // Continuation half of a double-wide glyph; its sprite is
                // written by the wide cell's render.
                prev_width = 0;
                i += 1;
                continue;
            }
            let sel = self.font_for_cell(&line.cells[i]);
            prev_width = line.cells[i].width();
            if run_sel != Some(sel) {
                if let Some(prev_sel) = run_sel {
                    if i > first_cell_in_run {
                        self.render_run(line, first_cell_in_run, i, prev_sel);
                    }
                }
                run_sel = Some(sel);
                first_cell_in_run = i;
            }
            i += 1;
        }
        if let Some(prev_sel) = run_sel {
            if i > first_cell_in_run {
                self.render_run(line, first_cell_in_run, i, prev_sel);
            }
        }
    }

    /// Resizes every face in `fonts` and measures the cell geometry from the
    /// medium face. Pure with respect to the renderer's own state.
    fn measure(
        driver: &D,
        fonts: &mut [Font<D>],
        size: FontSize,
        options: &FontOptions,
    ) -> Result<CellMetrics, RenderError> {
        let char_size = size.char_size();
        if char_size <= 0 {
            return Err(RenderError::BadMetrics(format!(
                "font size {} is not positive",
                size.pt_sz
            )));
        }
        for font in fonts.iter_mut() {
            driver
                .set_size(&mut font.face, char_size, char_size, size.xdpi, size.ydpi)
                .map_err(RenderError::FaceLoad)?;
        }

        let medium = &mut fonts[MEDIUM];
        let (hinting, hintstyle) = driver.hint_preferences(&medium.face);
        let flags = load_flags(hinting, hintstyle, LoadFlags::RENDER);
        let cell_width = cell_width_hint(driver, &mut medium.face, flags)
            .map_err(RenderError::FaceLoad)?;
        if cell_width == 0 {
            return Err(RenderError::ZeroCellWidth);
        }

        let fm = driver.face_metrics(&medium.face);
        let mut cell_height = (fm.ascent + fm.descent).ceil() as i64;
        if options.adjust_line_height_px != 0 {
            cell_height += options.adjust_line_height_px as i64;
        }
        if options.adjust_line_height_frac != 0.0 {
            cell_height = (cell_height as f32 * options.adjust_line_height_frac) as i64;
        }
        if cell_height < 4 {
            return Err(RenderError::BadMetrics(
                "line height too small after adjustment".into(),
            ));
        }
        if cell_height > 1000 {
            return Err(RenderError::BadMetrics(
                "line height too large after adjustment".into(),
            ));
        }
        let cell_height = cell_height as u32;
        let baseline = fm.ascent.ceil() as u32;
        let underline_position = ((baseline as i64) + fm.underline_position.round() as i64)
            .clamp(0, cell_height as i64 - 1) as u32;
        let underline_thickness = (fm.underline_thickness.round() as u32).max(1);

        Ok(CellMetrics {
            cell_width,
            cell_height,
            baseline,
            underline_position,
            underline_thickness,
        })
    }

    /// Publishes validated metrics: atlas layout and scratch canvas.
    fn commit_metrics(&mut self, metrics: CellMetrics) {
        self.metrics = metrics;
        self.tracker
            .set_layout(metrics.cell_width, metrics.cell_height);
        self.canvas =
            vec![0u8; (metrics.cell_width * 2 * metrics.cell_height) as usize];
    }

    /// True when the face covers the cell's base character and every
    /// combining mark.
    fn has_cell_text(&self, font_idx: usize, cell: &Cell) -> bool {
        let face = &self.fonts[font_idx].face;
        cell.codepoints()
            .all(|cp| self.driver.has_codepoint(face, cp))
    }

    /// Maps a cell to a face or a sentinel. Pure except for lazy fallback
    /// discovery, which may append to the font table.
    fn font_for_cell(&mut self, cell: &Cell) -> FontSel {
        match cell.ch {
            0 => FontSel::Blank,
            0x2500..=0x2570 | 0x2574..=0x257f | 0xe0b0 | 0xe0b2 => FontSel::Boxed,
            ch => {
                for range in &self.symbol_maps {
                    if range.left <= ch && ch <= range.right {
                        return FontSel::Face(range.font);
                    }
                }
                let styled = match (cell.bold(), cell.italic()) {
                    (false, false) => MEDIUM,
                    (true, false) => self.bold.unwrap_or(MEDIUM),
                    (false, true) => self.italic.unwrap_or(MEDIUM),
                    (true, true) => self.bi.unwrap_or(MEDIUM),
                };
                if self.has_cell_text(styled, cell) {
                    return FontSel::Face(styled);
                }
                self.fallback_font(cell)
            }
        }
    }

    /// Looks for a discovered fallback with matching style and coverage,
    /// invoking the host resolver when none exists yet.
    fn fallback_font(&mut self, cell: &Cell) -> FontSel {
        let bold = cell.bold();
        let italic = cell.italic();
        for idx in self.fallback_start..self.fonts.len() {
            if self.fonts[idx].bold == bold
                && self.fonts[idx].italic == italic
                && self.has_cell_text(idx, cell)
            {
                trace!("Renderer: U+{:04X} found in fallback face {}", cell.ch, idx);
                return FontSel::Face(idx);
            }
        }

        if self.fonts.len() - self.fallback_start >= MAX_FALLBACK_FONTS {
            warn!(
                "Renderer: fallback font table is full; U+{:04X} renders as missing",
                cell.ch
            );
            return FontSel::Missing;
        }
        let resolver = match self.fallback_resolver.as_mut() {
            Some(r) => r,
            None => return FontSel::Missing,
        };
        let text = cell.text();
        let face = match resolver(&text, bold, italic) {
            Ok(Some(face)) => face,
            Ok(None) => {
                debug!("Renderer: no fallback face available for {:?}", text);
                return FontSel::Missing;
            }
            Err(e) => {
                warn!("Renderer: fallback resolver failed for {:?}: {e:#}", text);
                return FontSel::Missing;
            }
        };

        let mut font = Font::new(face, bold, italic);
        if let Some(size) = self.size {
            let char_size = size.char_size();
            if let Err(e) =
                self.driver
                    .set_size(&mut font.face, char_size, char_size, size.xdpi, size.ydpi)
            {
                warn!("Renderer: failed to size fallback face: {e:#}");
            }
        }
        info!(
            "Renderer: discovered fallback face {} for {:?} (bold={}, italic={})",
            self.fonts.len(),
            text,
            bold,
            italic
        );
        self.fonts.push(font);
        FontSel::Face(self.fonts.len() - 1)
    }

    /// Closes a run: cells `start..end` of the line all resolved to `sel`.
    fn render_run(&mut self, line: &mut Line, start: usize, end: usize, sel: FontSel) {
        debug!("Renderer: run {}..{} -> {:?}", start, end, sel);
        match sel {
            FontSel::Blank => {
                for cell in &mut line.cells[start..end] {
                    cell.set_sprite(0, 0, 0);
                }
            }
            FontSel::Missing => {
                for cell in &mut line.cells[start..end] {
                    cell.set_sprite(MISSING_GLYPH, 0, 0);
                }
            }
            FontSel::Boxed => {
                for i in start..end {
                    self.render_box_cell(&mut line.cells[i]);
                }
            }
            FontSel::Face(idx) => self.render_face_run(line, start, end, idx),
        }
    }

    /// Renders one box-drawing cell through the box font's sprite cache and
    /// the host's box-drawing callback.
    fn render_box_cell(&mut self, cell: &mut Cell) {
        let glyph = box_glyph_id(cell.ch);
        let (pos, rendered) =
            match self
                .box_sprites
                .position_for(&mut self.tracker, glyph, 0, false)
            {
                Ok(entry) => (entry.pos(), entry.rendered),
                Err(e) => {
                    error!(
                        "Renderer: no sprite slot for box glyph U+{:04X}: {}; cell renders as the missing glyph",
                        cell.ch, e
                    );
                    cell.set_sprite(MISSING_GLYPH, 0, 0);
                    return;
                }
            };
        cell.set_sprite(pos.x, pos.y, pos.z);
        if rendered {
            return;
        }
        let buffer = {
            let func = match self.box_drawing.as_mut() {
                Some(f) => f,
                None => return,
            };
            match func(cell.ch) {
                Ok(buffer) => buffer,
                Err(e) => {
                    error!("Renderer: box drawing failed for U+{:04X}: {e:#}", cell.ch);
                    cell.set_sprite(0, 0, 0);
                    return;
                }
            }
        };
        let sink = match &mut self.user_sink {
            Some(s) => s,
            None => &mut self.native_sink,
        };
        sink(pos.x, pos.y, pos.z, &buffer);
        if let Ok(entry) = self
            .box_sprites
            .position_for(&mut self.tracker, glyph, 0, false)
        {
            entry.rendered = true;
        }
    }

    /// Renders a run backed by a real face: shape the concatenated text,
    /// group shaped glyphs into their base cells, render each group.
    fn render_face_run(&mut self, line: &mut Line, start: usize, end: usize, font_idx: usize) {
        let mut text = String::new();
        let mut cell_for_byte: Vec<usize> = Vec::new();
        {
            let cells = &line.cells[start..end];
            let mut prev_width = 0u16;
            for (ri, cell) in cells.iter().enumerate() {
                if prev_width == 2 {
                    prev_width = 0;
                    continue;
                }
                prev_width = cell.width();
                let from = text.len();
                cell.push_text(&mut text);
                cell_for_byte.extend(std::iter::repeat(ri).take(text.len() - from));
            }
        }
        if text.is_empty() {
            return;
        }

        let glyphs = {
            let Renderer { driver, fonts, .. } = self;
            let font = &mut fonts[font_idx];
            let (hinting, hintstyle) = driver.hint_preferences(&font.face);
            let flags = load_flags(hinting, hintstyle, LoadFlags::empty());
            match driver.shape(&mut font.face, &text, flags) {
                Ok(glyphs) => glyphs,
                Err(e) => {
                    error!("Renderer: shaping failed for {:?}: {e:#}", text);
                    for cell in &mut line.cells[start..end] {
                        cell.set_sprite(0, 0, 0);
                    }
                    return;
                }
            }
        };
        trace!("Renderer: shaped {:?} into {} glyphs", text, glyphs.len());

        // Group shaped glyphs by the cell owning their cluster's start byte.
        let mut groups: Vec<(usize, Vec<ShapedGlyph>)> = Vec::new();
        for glyph in glyphs {
            let ri = cell_for_byte
                .get(glyph.cluster as usize)
                .copied()
                .unwrap_or_else(|| cell_for_byte.last().copied().unwrap_or(0));
            if matches!(groups.last(), Some((cur, _)) if *cur == ri) {
                groups.last_mut().unwrap().1.push(glyph);
            } else {
                groups.push((ri, vec![glyph]));
            }
        }

        let mut covered = vec![false; end - start];
        for (ri, group) in &groups {
            covered[*ri] = true;
            if line.cells[start + ri].width() == 2 && ri + 1 < covered.len() {
                covered[ri + 1] = true;
            }
            self.render_cell_group(line, start + ri, font_idx, group);
        }
        // Cells the shaper folded into a neighbouring cluster render blank.
        for (ri, seen) in covered.iter().enumerate() {
            if !seen {
                line.cells[start + ri].set_sprite(0, 0, 0);
            }
        }
    }

    /// Renders the glyph cluster group landing in one base cell, uploading
    /// one sprite per covered cell on a cache miss.
    fn render_cell_group(
        &mut self,
        line: &mut Line,
        cell_index: usize,
        font_idx: usize,
        glyphs: &[ShapedGlyph],
    ) {
        let Renderer {
            driver,
            tracker,
            fonts,
            canvas,
            metrics,
            native_sink,
            user_sink,
            ..
        } = self;
        let font = &mut fonts[font_idx];
        let cell_width = metrics.cell_width as usize;
        let cell_height = metrics.cell_height as usize;
        let baseline = metrics.baseline as usize;
        let num_cells = if line.cells[cell_index].width() == 2 {
            2
        } else {
            1
        };

        let primary = glyphs[0].glyph;
        let extra = pack_extra_glyphs(&glyphs[1..]);

        let first = match font.sprites.position_for(tracker, primary, extra, false) {
            Ok(entry) => (entry.pos(), entry.rendered),
            Err(e) => {
                error!("Renderer: {e}; cell renders as the missing glyph");
                Self::set_missing(line, cell_index, num_cells);
                return;
            }
        };
        let second = if num_cells == 2 {
            match font.sprites.position_for(tracker, primary, extra, true) {
                Ok(entry) => Some((entry.pos(), entry.rendered)),
                Err(e) => {
                    error!("Renderer: {e}; cell renders as the missing glyph");
                    Self::set_missing(line, cell_index, num_cells);
                    return;
                }
            }
        } else {
            None
        };

        if !first.1 {
            let strip_width = cell_width * num_cells;
            let strip = &mut canvas[..strip_width * cell_height];
            strip.fill(0);

            let (hinting, hintstyle) = driver.hint_preferences(&font.face);
            let flags = load_flags(hinting, hintstyle, LoadFlags::RENDER);
            let italic = font.italic;
            let mut x = 0.0f32;
            let mut y;
            for glyph in glyphs {
                if glyph.glyph == 0 {
                    continue;
                }
                let bm = match render_bitmap(
                    driver,
                    &mut font.face,
                    glyph.glyph,
                    cell_width,
                    num_cells,
                    italic,
                    flags,
                    true,
                ) {
                    Ok(bm) => bm,
                    Err(e) => {
                        error!("Renderer: failed to rasterize glyph {}: {e:#}", glyph.glyph);
                        for offset in 0..num_cells {
                            if let Some(cell) = line.cells.get_mut(cell_index + offset) {
                                cell.set_sprite(0, 0, 0);
                            }
                        }
                        return;
                    }
                };
                x += f26dot6_to_px(glyph.x_offset);
                y = f26dot6_to_px(glyph.y_offset);
                place_bitmap_in_cell(strip, &bm, strip_width, cell_height, x, y, baseline);
                x += f26dot6_to_px(glyph.x_advance);
            }

            let sink = match user_sink {
                Some(s) => s,
                None => native_sink,
            };
            if num_cells == 1 {
                sink(first.0.x, first.0.y, first.0.z, strip);
            } else {
                let halves = split_cells(strip, cell_width, cell_height, num_cells);
                sink(first.0.x, first.0.y, first.0.z, &halves[0]);
                if let Some((pos, _)) = second {
                    sink(pos.x, pos.y, pos.z, &halves[1]);
                }
            }
            if let Ok(entry) = font.sprites.position_for(tracker, primary, extra, false) {
                entry.rendered = true;
            }
            if second.is_some() {
                if let Ok(entry) = font.sprites.position_for(tracker, primary, extra, true) {
                    entry.rendered = true;
                }
            }
        }

        line.cells[cell_index].set_sprite(first.0.x, first.0.y, first.0.z);
        if let Some((pos, _)) = second {
            if let Some(cell) = line.cells.get_mut(cell_index + 1) {
                cell.set_sprite(pos.x, pos.y, pos.z);
            }
        }
    }

    fn set_missing(line: &mut Line, cell_index: usize, num_cells: usize) {
        for offset in 0..num_cells {
            if let Some(cell) = line.cells.get_mut(cell_index + offset) {
                cell.set_sprite(MISSING_GLYPH, 0, 0);
            }
        }
    }
}
