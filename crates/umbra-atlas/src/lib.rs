//! Bin-packing lightmap cache: fixed-size pages, epoch eviction, dirty rects.
//!
//! Blocks live in an arena and chain through each other by index: `lnext`/
//! `lprev` walk a line of equal-height blocks, `bnext`/`bprev` walk the
//! column of lines down a page. Owned and free blocks together always tile
//! their page exactly.
#![forbid(unsafe_code)]

use hashbrown::HashMap;

#[cfg(test)]
mod tests;

/// Key of whoever holds a cached region, typically a surface index.
pub type OwnerId = u32;

/// Arena index of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// RGBA8 page texel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Rgba {
        Rgba { r, g, b, a: 255 }
    }
}

/// Texel rectangle inside one page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TexelRect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl TexelRect {
    pub fn union(self, other: TexelRect) -> TexelRect {
        if self.w == 0 || self.h == 0 {
            return other;
        }
        if other.w == 0 || other.h == 0 {
            return self;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = (self.x + self.w).max(other.x + other.w);
        let y1 = (self.y + self.h).max(other.y + other.h);
        TexelRect {
            x: x0,
            y: y0,
            w: x1 - x0,
            h: y1 - y0,
        }
    }
}

/// Supplies backing storage (e.g. a GPU texture) when the cache opens a new
/// page. Returning `false` vetoes the page and the allocation fails soft.
pub trait PageProvider {
    fn alloc_page(&mut self, page: usize, width: u16, height: u16) -> bool;
}

/// Provider that accepts every page; handy in tests.
pub struct UnboundedPages;

impl PageProvider for UnboundedPages {
    fn alloc_page(&mut self, _page: usize, _width: u16, _height: u16) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The request exceeds the page dimensions; no eviction can help.
    TooBig,
    /// Every page is packed with blocks used this frame.
    Exhausted,
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AllocError::TooBig => write!(f, "request exceeds atlas page dimensions"),
            AllocError::Exhausted => write!(f, "atlas exhausted after eviction"),
        }
    }
}

impl std::error::Error for AllocError {}

#[derive(Clone, Copy, Debug, Default)]
struct Block {
    s: u16,
    t: u16,
    width: u16,
    height: u16,
    page: u16,
    owner: Option<OwnerId>,
    last_frame: u32,
    lnext: Option<BlockId>,
    lprev: Option<BlockId>,
    bnext: Option<BlockId>,
    bprev: Option<BlockId>,
    pool_next: Option<BlockId>,
    in_pool: bool,
}

struct AtlasPage {
    head: BlockId,
    pixels: Vec<Rgba>,
    dirty: Option<TexelRect>,
}

/// The cache itself. All mutation goes through owner-keyed entry points so
/// the block/owner back-references can never go out of step.
pub struct AtlasCache {
    page_size: u16,
    max_pages: usize,
    max_blocks: usize,
    blocks: Vec<Block>,
    pool: Option<BlockId>,
    pooled: usize,
    pages: Vec<AtlasPage>,
    regions: HashMap<OwnerId, BlockId>,
    overflow_logged: bool,
}

impl AtlasCache {
    pub fn new(page_size: u16, max_pages: usize) -> AtlasCache {
        assert!(page_size > 0, "atlas page size must be positive");
        assert!(max_pages > 0, "atlas needs at least one page");
        AtlasCache {
            page_size,
            max_pages,
            max_blocks: max_pages * 1024,
            blocks: Vec::new(),
            pool: None,
            pooled: 0,
            pages: Vec::new(),
            regions: HashMap::new(),
            overflow_logged: false,
        }
    }

    #[inline]
    pub fn page_size(&self) -> u16 {
        self.page_size
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn region_for(&self, owner: OwnerId) -> Option<BlockId> {
        self.regions.get(&owner).copied()
    }

    /// Page index and texel rectangle of a block.
    pub fn rect(&self, id: BlockId) -> (usize, TexelRect) {
        let b = &self.blocks[id.idx()];
        debug_assert!(!b.in_pool, "rect of a recycled block");
        (
            b.page as usize,
            TexelRect {
                x: b.s,
                y: b.t,
                w: b.width,
                h: b.height,
            },
        )
    }

    /// Stamp a block as referenced this frame so eviction spares it.
    #[inline]
    pub fn touch(&mut self, id: BlockId, frame: u32) {
        let b = &mut self.blocks[id.idx()];
        debug_assert!(b.owner.is_some(), "touch of an unowned block");
        b.last_frame = frame;
    }

    /// Zero every frame stamp; required when the frame clock wraps.
    pub fn reset_frames(&mut self) {
        for b in &mut self.blocks {
            b.last_frame = 0;
        }
    }

    /// Allocate a `width` x `height` region for `owner`. Scans lines of the
    /// exact height first, then splits a taller untouched line, then opens a
    /// new page through `provider`, then evicts stale blocks and retries.
    pub fn alloc_block(
        &mut self,
        owner: OwnerId,
        width: u16,
        height: u16,
        frame: u32,
        provider: &mut dyn PageProvider,
    ) -> Result<BlockId, AllocError> {
        assert!(width > 0 && height > 0, "zero-sized atlas request");
        assert!(
            !self.regions.contains_key(&owner),
            "owner {owner} already holds an atlas block"
        );
        if width > self.page_size || height > self.page_size {
            return Err(AllocError::TooBig);
        }

        // splits below may need up to three fresh block structs
        if self.free_structs() < 3 {
            self.flush_old(frame);
            if self.free_structs() < 3 {
                return Err(AllocError::Exhausted);
            }
        }

        if let Some(id) = self.try_place(width, height) {
            self.claim(id, owner, frame);
            return Ok(id);
        }
        if self.pages.len() < self.max_pages
            && provider.alloc_page(self.pages.len(), self.page_size, self.page_size)
        {
            self.open_page();
            if let Some(id) = self.try_place(width, height) {
                self.claim(id, owner, frame);
                return Ok(id);
            }
        }
        if self.flush_old(frame) > 0 {
            if let Some(id) = self.try_place(width, height) {
                self.claim(id, owner, frame);
                return Ok(id);
            }
        }

        if !self.overflow_logged {
            log::warn!("lightmap atlas overflow, no room for {width}x{height}");
            self.overflow_logged = true;
        }
        Err(AllocError::Exhausted)
    }

    /// Drop `owner`'s block, if any, coalescing free neighbors.
    pub fn release_owner(&mut self, owner: OwnerId) -> bool {
        let Some(id) = self.regions.get(&owner).copied() else {
            return false;
        };
        self.free_block(id, true);
        true
    }

    /// Evict every owned block not referenced on `frame`. Returns how many
    /// blocks were freed. This is the whole eviction policy: a block
    /// survives only if it was touched this frame.
    pub fn flush_old(&mut self, frame: u32) -> usize {
        let mut freed = 0usize;
        for page in 0..self.pages.len() {
            let mut line = Some(self.pages[page].head);
            while let Some(lid) = line {
                let mut cur = Some(lid);
                while let Some(bid) = cur {
                    let b = &self.blocks[bid.idx()];
                    let survivor = if b.owner.is_some() && b.last_frame != frame {
                        freed += 1;
                        self.free_block(bid, false)
                    } else {
                        bid
                    };
                    cur = self.blocks[survivor.idx()].lnext;
                }
                // merge an entirely free line with free neighbor lines
                let head = &self.blocks[lid.idx()];
                let survivor = if head.owner.is_none() && head.lnext.is_none() {
                    self.free_block(lid, true)
                } else {
                    lid
                };
                line = self.blocks[survivor.idx()].bnext;
            }
        }
        if freed > 0 {
            log::debug!("atlas eviction flushed {freed} stale blocks");
            self.overflow_logged = false;
        }
        freed
    }

    /// Release every owned block, e.g. when cached lightmap data was
    /// invalidated wholesale.
    pub fn flush_all(&mut self) {
        let owners: Vec<OwnerId> = self.regions.keys().copied().collect();
        for owner in owners {
            self.release_owner(owner);
        }
    }

    /// Copy a finished lightmap into the block's page and grow the page's
    /// dirty rectangle. `texels` must cover the whole block.
    pub fn blit(&mut self, id: BlockId, texels: &[Rgba]) {
        let (page, rect) = self.rect(id);
        assert_eq!(
            texels.len(),
            rect.w as usize * rect.h as usize,
            "partial lightmap write"
        );
        let stride = self.page_size as usize;
        let p = &mut self.pages[page];
        for row in 0..rect.h as usize {
            let src = &texels[row * rect.w as usize..(row + 1) * rect.w as usize];
            let at = (rect.y as usize + row) * stride + rect.x as usize;
            p.pixels[at..at + rect.w as usize].copy_from_slice(src);
        }
        p.dirty = Some(match p.dirty {
            Some(d) => d.union(rect),
            None => rect,
        });
    }

    /// Take the page's dirty rectangle and a copy of its texels for upload.
    pub fn take_dirty_region(&mut self, page: usize) -> Option<(TexelRect, Vec<Rgba>)> {
        let stride = self.page_size as usize;
        let p = &mut self.pages[page];
        let rect = p.dirty.take()?;
        let mut out = Vec::with_capacity(rect.w as usize * rect.h as usize);
        for row in 0..rect.h as usize {
            let at = (rect.y as usize + row) * stride + rect.x as usize;
            out.extend_from_slice(&p.pixels[at..at + rect.w as usize]);
        }
        Some((rect, out))
    }

    pub fn page_pixels(&self, page: usize) -> &[Rgba] {
        &self.pages[page].pixels
    }

    // ---- internals ----

    fn free_structs(&self) -> usize {
        self.pooled + self.max_blocks.saturating_sub(self.blocks.len())
    }

    fn new_block(&mut self, block: Block) -> BlockId {
        if let Some(id) = self.pool {
            self.pool = self.blocks[id.idx()].pool_next;
            self.pooled -= 1;
            self.blocks[id.idx()] = block;
            id
        } else {
            debug_assert!(self.blocks.len() < self.max_blocks, "block arena overrun");
            self.blocks.push(block);
            BlockId((self.blocks.len() - 1) as u32)
        }
    }

    fn recycle(&mut self, id: BlockId) {
        let b = &mut self.blocks[id.idx()];
        debug_assert!(!b.in_pool, "double free of atlas block");
        *b = Block {
            in_pool: true,
            pool_next: self.pool,
            ..Block::default()
        };
        self.pool = Some(id);
        self.pooled += 1;
    }

    fn open_page(&mut self) {
        let page = self.pages.len() as u16;
        let head = self.new_block(Block {
            s: 0,
            t: 0,
            width: self.page_size,
            height: self.page_size,
            page,
            ..Block::default()
        });
        self.pages.push(AtlasPage {
            head,
            pixels: vec![Rgba::default(); self.page_size as usize * self.page_size as usize],
            dirty: None,
        });
        log::debug!("opened atlas page {page}");
    }

    /// First-fit in exact-height lines, then vertical split of a taller
    /// untouched line. Returns an unowned block of exactly the right size.
    fn try_place(&mut self, width: u16, height: u16) -> Option<BlockId> {
        for page in 0..self.pages.len() {
            let mut line = Some(self.pages[page].head);
            while let Some(lid) = line {
                if self.blocks[lid.idx()].height == height {
                    let mut cur = Some(lid);
                    while let Some(bid) = cur {
                        let b = &self.blocks[bid.idx()];
                        if b.owner.is_none() && b.width >= width {
                            return Some(self.split_width(bid, width));
                        }
                        cur = b.lnext;
                    }
                }
                line = self.blocks[lid.idx()].bnext;
            }
        }

        for page in 0..self.pages.len() {
            let mut line = Some(self.pages[page].head);
            while let Some(lid) = line {
                let b = &self.blocks[lid.idx()];
                if b.owner.is_none() && b.lnext.is_none() && b.height > height {
                    self.split_height(lid, height);
                    return Some(self.split_width(lid, width));
                }
                line = self.blocks[lid.idx()].bnext;
            }
        }
        None
    }

    /// Carve the left `width` texels off a free block; the remainder, if
    /// any, becomes exactly one new free sibling in the line.
    fn split_width(&mut self, id: BlockId, width: u16) -> BlockId {
        let b = self.blocks[id.idx()];
        debug_assert!(b.owner.is_none() && b.width >= width);
        if b.width > width {
            let rest = self.new_block(Block {
                s: b.s + width,
                t: b.t,
                width: b.width - width,
                height: b.height,
                page: b.page,
                lnext: b.lnext,
                lprev: Some(id),
                ..Block::default()
            });
            if let Some(nn) = b.lnext {
                self.blocks[nn.idx()].lprev = Some(rest);
            }
            let b = &mut self.blocks[id.idx()];
            b.lnext = Some(rest);
            b.width = width;
        }
        id
    }

    /// Carve the top `height` texels off an untouched line; the remainder
    /// becomes exactly one new free line below it.
    fn split_height(&mut self, id: BlockId, height: u16) {
        let b = self.blocks[id.idx()];
        debug_assert!(b.owner.is_none() && b.lnext.is_none() && b.height > height);
        let rest = self.new_block(Block {
            s: 0,
            t: b.t + height,
            width: b.width,
            height: b.height - height,
            page: b.page,
            bnext: b.bnext,
            bprev: Some(id),
            ..Block::default()
        });
        if let Some(nn) = b.bnext {
            self.blocks[nn.idx()].bprev = Some(rest);
        }
        let b = &mut self.blocks[id.idx()];
        b.bnext = Some(rest);
        b.height = height;
    }

    fn claim(&mut self, id: BlockId, owner: OwnerId, frame: u32) {
        let b = &mut self.blocks[id.idx()];
        debug_assert!(b.owner.is_none());
        b.owner = Some(owner);
        b.last_frame = frame;
        self.regions.insert(owner, id);
    }

    /// Detach the owner and coalesce with free neighbors: first along the
    /// line, then, when the block spans its whole line and `check_lines` is
    /// set, with free neighbor lines. Returns the surviving block.
    fn free_block(&mut self, id: BlockId, check_lines: bool) -> BlockId {
        let mut id = id;
        if let Some(owner) = self.blocks[id.idx()].owner.take() {
            self.regions.remove(&owner);
            self.overflow_logged = false;
        }

        if let Some(next) = self.blocks[id.idx()].lnext {
            if self.blocks[next.idx()].owner.is_none() {
                let absorbed = self.blocks[next.idx()];
                let b = &mut self.blocks[id.idx()];
                b.width += absorbed.width;
                b.lnext = absorbed.lnext;
                if let Some(nn) = absorbed.lnext {
                    self.blocks[nn.idx()].lprev = Some(id);
                }
                self.recycle(next);
            }
        }
        if let Some(prev) = self.blocks[id.idx()].lprev {
            if self.blocks[prev.idx()].owner.is_none() {
                let absorbed = self.blocks[id.idx()];
                let p = &mut self.blocks[prev.idx()];
                p.width += absorbed.width;
                p.lnext = absorbed.lnext;
                if let Some(nn) = absorbed.lnext {
                    self.blocks[nn.idx()].lprev = Some(prev);
                }
                self.recycle(id);
                id = prev;
            }
        }

        let b = &self.blocks[id.idx()];
        if b.lprev.is_some() || b.lnext.is_some() || !check_lines {
            return id;
        }

        if let Some(next) = self.blocks[id.idx()].bnext {
            let n = &self.blocks[next.idx()];
            if n.owner.is_none() && n.lnext.is_none() {
                let absorbed = self.blocks[next.idx()];
                let b = &mut self.blocks[id.idx()];
                b.height += absorbed.height;
                b.bnext = absorbed.bnext;
                if let Some(nn) = absorbed.bnext {
                    self.blocks[nn.idx()].bprev = Some(id);
                }
                self.recycle(next);
            }
        }
        if let Some(prev) = self.blocks[id.idx()].bprev {
            let p = &self.blocks[prev.idx()];
            if p.owner.is_none() && p.lnext.is_none() {
                let absorbed = self.blocks[id.idx()];
                let p = &mut self.blocks[prev.idx()];
                p.height += absorbed.height;
                p.bnext = absorbed.bnext;
                if let Some(nn) = absorbed.bnext {
                    self.blocks[nn.idx()].bprev = Some(prev);
                }
                self.recycle(id);
                id = prev;
            }
        }
        id
    }

    /// Walk every page and panic on any broken invariant: non-tiling
    /// blocks, inconsistent chains, or owner back-references out of step.
    /// Cheap enough for tests and paranoid debugging, not for per-frame use.
    pub fn self_check(&self) {
        let mut visited = 0usize;
        let mut owned = 0usize;
        for (pi, page) in self.pages.iter().enumerate() {
            let mut t_cursor = 0u16;
            let mut line = Some(page.head);
            assert!(self.blocks[page.head.idx()].bprev.is_none(), "page {pi} head has bprev");
            while let Some(lid) = line {
                let lh = self.blocks[lid.idx()].height;
                assert_eq!(self.blocks[lid.idx()].s, 0, "page {pi} line not at s=0");
                assert_eq!(self.blocks[lid.idx()].t, t_cursor, "page {pi} line gap");
                assert!(self.blocks[lid.idx()].lprev.is_none(), "line head has lprev");
                let mut s_cursor = 0u16;
                let mut cur = Some(lid);
                let mut prev: Option<BlockId> = None;
                while let Some(bid) = cur {
                    let b = &self.blocks[bid.idx()];
                    visited += 1;
                    assert!(!b.in_pool, "pooled block reachable from page {pi}");
                    assert_eq!(b.page as usize, pi, "block on wrong page");
                    assert_eq!(b.t, t_cursor, "block off its line");
                    assert_eq!(b.height, lh, "block height differs from line");
                    assert_eq!(b.s, s_cursor, "overlap or gap in line");
                    assert_eq!(b.lprev, prev, "broken lprev chain");
                    assert!(b.width > 0 && b.height > 0, "degenerate block");
                    if let Some(owner) = b.owner {
                        owned += 1;
                        assert_eq!(
                            self.regions.get(&owner).copied(),
                            Some(bid),
                            "owner {owner} region entry out of step"
                        );
                    }
                    s_cursor += b.width;
                    prev = cur;
                    cur = b.lnext;
                }
                assert_eq!(s_cursor, self.page_size, "line does not tile page width");
                let next_line = self.blocks[lid.idx()].bnext;
                if let Some(nl) = next_line {
                    assert_eq!(self.blocks[nl.idx()].bprev, Some(lid), "broken bprev chain");
                }
                t_cursor += lh;
                line = next_line;
            }
            assert_eq!(t_cursor, self.page_size, "lines do not tile page height");
        }
        assert_eq!(owned, self.regions.len(), "dangling region entries");
        assert_eq!(
            visited,
            self.blocks.len() - self.pooled,
            "unreachable live blocks"
        );
    }
}
