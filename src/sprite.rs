// src/sprite.rs

//! Sprite atlas bookkeeping.
//!
//! The GPU side stores one cell-sized bitmap per atlas slot, addressed by an
//! (x, y, z) triple into an array of 2-D textures. Slots are assigned by a
//! monotone cursor and are never reclaimed while a configuration lives: a
//! glyph rendered once keeps its slot, which makes the cache path O(1) and
//! turns the upload stream into an append-only log.
//!
//! Two pieces live here:
//! - [`SpriteTracker`]: the cursor plus the installed capacity limits.
//! - [`SpriteMap`]: a per-font map from (glyph, extra-glyph packing,
//!   second-half flag) to the slot assigned to it, with a `rendered` bit
//!   recording whether pixels were ever uploaded for that slot.

use crate::error::RenderError;
use log::trace;

/// Number of head slots in a [`SpriteMap`]. Power of two; the glyph id is
/// masked with `BUCKETS - 1` to pick a bucket.
const BUCKETS: usize = 1024;
const BUCKET_MASK: u16 = (BUCKETS - 1) as u16;

/// Hard ceiling on atlas dimensions and layer count.
const COORD_LIMIT: u32 = u16::MAX as u32;

/// An assigned slot in the sprite atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpritePos {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl SpritePos {
    /// Ordering key: positions are issued in increasing (z, y, x) order.
    pub fn key(&self) -> (u32, u32, u32) {
        (self.z, self.y, self.x)
    }
}

/// Monotone slot allocator for the sprite atlas.
#[derive(Debug, Clone)]
pub struct SpriteTracker {
    max_texture_size: u32,
    max_array_len: u32,
    max_y: u32,
    x: u32,
    y: u32,
    z: u32,
    xnum: u32,
    ynum: u32,
    exhausted: bool,
}

impl Default for SpriteTracker {
    fn default() -> Self {
        SpriteTracker {
            max_texture_size: 1000,
            max_array_len: 1000,
            max_y: 100,
            x: 0,
            y: 0,
            z: 0,
            xnum: 1,
            ynum: 1,
            exhausted: false,
        }
    }
}

impl SpriteTracker {
    pub fn new() -> Self {
        SpriteTracker::default()
    }

    /// Installs the GPU capacity limits: the maximum texture edge in pixels
    /// and the maximum number of array layers.
    pub fn set_limits(&mut self, max_texture_size: u32, max_array_len: u32) {
        self.max_texture_size = max_texture_size;
        self.max_array_len = max_array_len;
    }

    /// Recomputes the per-layer grid for the given cell size and resets the
    /// cursor to the origin.
    pub fn set_layout(&mut self, cell_width: u32, cell_height: u32) {
        self.xnum = (self.max_texture_size / cell_width.max(1)).clamp(1, COORD_LIMIT);
        self.max_y = (self.max_texture_size / cell_height.max(1)).clamp(1, COORD_LIMIT);
        self.ynum = 1;
        self.x = 0;
        self.y = 0;
        self.z = 0;
        self.exhausted = false;
    }

    /// The tight bounding volume occupied so far, as (xnum, ynum, z).
    /// The GPU side sizes its textures from this.
    pub fn current_layout(&self) -> (u32, u32, u32) {
        (self.xnum, self.ynum, self.z)
    }

    /// Current cursor, i.e. the slot the next allocation will receive.
    pub fn position(&self) -> SpritePos {
        SpritePos {
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }

    /// Hands out the slot under the cursor and advances it.
    ///
    /// The allocation that steps past the final layer still receives its
    /// (valid) slot; every allocation after it fails with
    /// [`RenderError::AtlasExhausted`].
    pub fn alloc(&mut self) -> Result<SpritePos, RenderError> {
        if self.exhausted {
            return Err(RenderError::AtlasExhausted);
        }
        let pos = self.position();
        self.increment();
        Ok(pos)
    }

    fn increment(&mut self) {
        self.x += 1;
        if self.x >= self.xnum {
            self.x = 0;
            self.y += 1;
            self.ynum = self.ynum.max(self.y + 1).min(self.max_y);
            if self.y >= self.max_y {
                self.y = 0;
                self.z += 1;
                if self.z >= self.max_array_len.min(COORD_LIMIT) {
                    self.exhausted = true;
                }
            }
        }
    }
}

/// One cache entry: the key that owns a slot plus the slot itself.
///
/// Once `filled`, the key and position are immutable until the map is
/// cleared. `rendered` flips to true after the upload sink has observed the
/// slot's pixels; a filled-but-unrendered entry is the caller's signal to
/// rasterize.
#[derive(Debug, Clone, Default)]
pub struct SpritePosition {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub glyph: u16,
    pub extra_glyphs: u64,
    pub is_second: bool,
    pub filled: bool,
    pub rendered: bool,
}

impl SpritePosition {
    pub fn pos(&self) -> SpritePos {
        SpritePos {
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }

    fn matches(&self, glyph: u16, extra_glyphs: u64, is_second: bool) -> bool {
        self.filled
            && self.glyph == glyph
            && self.extra_glyphs == extra_glyphs
            && self.is_second == is_second
    }

    fn claim(&mut self, glyph: u16, extra_glyphs: u64, is_second: bool, pos: SpritePos) {
        self.glyph = glyph;
        self.extra_glyphs = extra_glyphs;
        self.is_second = is_second;
        self.filled = true;
        self.rendered = false;
        self.x = pos.x;
        self.y = pos.y;
        self.z = pos.z;
    }

    fn reset(&mut self) {
        *self = SpritePosition::default();
    }
}

/// Where a lookup landed inside a bucket.
#[derive(Clone, Copy)]
enum Slot {
    Head,
    HeadClaim,
    Chain(usize),
    ChainClaim(usize),
    ChainAppend,
}

/// Per-font glyph → sprite-slot cache.
///
/// A fixed array of 1024 head entries indexed by `glyph & 0x3ff`, each head
/// rooting a chain for colliding keys. The common case (glyph already at its
/// head slot) touches exactly one entry; chains allocate lazily and survive
/// [`SpriteMap::clear`] as a free pool.
#[derive(Debug)]
pub struct SpriteMap {
    heads: Vec<SpritePosition>,
    chains: Vec<Vec<SpritePosition>>,
}

impl Default for SpriteMap {
    fn default() -> Self {
        SpriteMap::new()
    }
}

impl SpriteMap {
    pub fn new() -> Self {
        SpriteMap {
            heads: vec![SpritePosition::default(); BUCKETS],
            chains: vec![Vec::new(); BUCKETS],
        }
    }

    /// Finds the entry for the key, claiming a fresh atlas slot on a miss.
    ///
    /// A returned entry with `rendered == false` has a slot but no pixels
    /// yet. Fails only when a miss needs a slot and the atlas is exhausted.
    pub fn position_for(
        &mut self,
        tracker: &mut SpriteTracker,
        glyph: u16,
        extra_glyphs: u64,
        is_second: bool,
    ) -> Result<&mut SpritePosition, RenderError> {
        let idx = (glyph & BUCKET_MASK) as usize;

        let slot = if self.heads[idx].matches(glyph, extra_glyphs, is_second) {
            Slot::Head
        } else if !self.heads[idx].filled {
            Slot::HeadClaim
        } else {
            let chain = &self.chains[idx];
            let mut found = Slot::ChainAppend;
            for (i, entry) in chain.iter().enumerate() {
                if !entry.filled {
                    found = Slot::ChainClaim(i);
                    break;
                }
                if entry.matches(glyph, extra_glyphs, is_second) {
                    found = Slot::Chain(i);
                    break;
                }
            }
            found
        };

        let pos = match slot {
            Slot::Head | Slot::Chain(_) => None,
            _ => {
                let pos = tracker.alloc()?;
                trace!(
                    "SpriteMap: glyph {} (extra {:#x}, second {}) -> ({}, {}, {})",
                    glyph,
                    extra_glyphs,
                    is_second,
                    pos.x,
                    pos.y,
                    pos.z
                );
                Some(pos)
            }
        };

        Ok(match slot {
            Slot::Head => &mut self.heads[idx],
            Slot::HeadClaim => {
                let head = &mut self.heads[idx];
                head.claim(glyph, extra_glyphs, is_second, pos.unwrap());
                head
            }
            Slot::Chain(i) => &mut self.chains[idx][i],
            Slot::ChainClaim(i) => {
                let entry = &mut self.chains[idx][i];
                entry.claim(glyph, extra_glyphs, is_second, pos.unwrap());
                entry
            }
            Slot::ChainAppend => {
                let mut entry = SpritePosition::default();
                entry.claim(glyph, extra_glyphs, is_second, pos.unwrap());
                let chain = &mut self.chains[idx];
                chain.push(entry);
                chain.last_mut().unwrap()
            }
        })
    }

    /// Resets every entry to the unfilled state. Chain nodes are kept as a
    /// free pool and get reused by subsequent claims.
    pub fn clear(&mut self) {
        for head in &mut self.heads {
            head.reset();
        }
        for chain in &mut self.chains {
            for entry in chain.iter_mut() {
                entry.reset();
            }
        }
    }

    /// Releases the chain nodes. Head entries are reset in place.
    pub fn free(&mut self) {
        for head in &mut self.heads {
            head.reset();
        }
        for chain in &mut self.chains {
            chain.clear();
            chain.shrink_to_fit();
        }
    }
}
