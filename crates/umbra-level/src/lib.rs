//! Immutable BSP spatial index: sectors, segs, subsectors, nodes, sight traces.
#![forbid(unsafe_code)]

use umbra_geom::{Aabb, Plane, Vec3};

mod mapbuild;
mod surface;

pub use mapbuild::{MapAssembler, RoomDef};
pub use surface::{
    LIGHTMAP_GRID, MAX_SURFACE_EXTENT, RelightState, Surface, TexInfo, build_surfaces,
};

/// One child slot of a BSP node: an interior node or a subsector leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BspChild {
    Node(usize),
    Leaf(usize),
}

#[derive(Clone, Copy, Debug)]
pub struct Node {
    pub plane: Plane,
    /// Bounding box of each child subtree, same order as `children`.
    pub bbox: [Aabb; 2],
    pub children: [BspChild; 2],
}

/// Convex leaf region; its segs are a contiguous run in `Level::segs`.
#[derive(Clone, Copy, Debug)]
pub struct Subsector {
    pub sector: usize,
    pub first_seg: usize,
    pub seg_count: usize,
}

/// One directed wall segment. `v1 -> v2` runs with the owning subsector on
/// the front (plane-normal) side; the plane is recomputed on construction.
#[derive(Clone, Copy, Debug)]
pub struct Seg {
    pub v1: Vec3,
    pub v2: Vec3,
    pub plane: Plane,
    pub front_subsector: usize,
    /// Matching seg of the neighbor subsector for two-sided lines.
    pub partner: Option<usize>,
    pub back_sector: Option<usize>,
    pub two_sided: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct Sector {
    /// Floor plane, normal pointing up into the sector.
    pub floor: Plane,
    /// Ceiling plane, normal pointing down into the sector.
    pub ceiling: Plane,
    pub light_level: u8,
    pub light_color: umbra_geom::Rgb,
}

impl Sector {
    /// Height of a horizontal-ish plane at a 2-D position.
    #[inline]
    pub fn floor_z_at(&self, p: Vec3) -> f32 {
        plane_z_at(&self.floor, p)
    }

    #[inline]
    pub fn ceiling_z_at(&self, p: Vec3) -> f32 {
        plane_z_at(&self.ceiling, p)
    }

    /// True when `p` lies in the open space between floor and ceiling.
    #[inline]
    pub fn contains_height(&self, p: Vec3, slack: f32) -> bool {
        self.floor.point_dist(p) >= -slack && self.ceiling.point_dist(p) >= -slack
    }
}

#[inline]
fn plane_z_at(plane: &Plane, p: Vec3) -> f32 {
    // solve dot((x, y, z), n) == dist for z
    (plane.dist - plane.normal.x * p.x - plane.normal.y * p.y) / plane.normal.z
}

#[derive(Debug)]
pub enum LevelError {
    Empty(&'static str),
    BadIndex(&'static str),
    DegenerateSeg(usize),
}

impl core::fmt::Display for LevelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LevelError::Empty(what) => write!(f, "level has no {what}"),
            LevelError::BadIndex(what) => write!(f, "out-of-range {what} reference"),
            LevelError::DegenerateSeg(i) => write!(f, "seg {i} has zero 2-D length"),
        }
    }
}

impl std::error::Error for LevelError {}

/// Raw arrays handed over by the level builder tool.
pub struct LevelParts {
    pub sectors: Vec<Sector>,
    pub segs: Vec<Seg>,
    pub subsectors: Vec<Subsector>,
    pub nodes: Vec<Node>,
}

/// Immutable spatial index. The root node is the last entry of `nodes`;
/// a level with a single subsector may have no nodes at all.
pub struct Level {
    pub sectors: Vec<Sector>,
    pub segs: Vec<Seg>,
    pub subsectors: Vec<Subsector>,
    pub nodes: Vec<Node>,
    pub bounds: Aabb,
}

impl Level {
    pub fn new(mut parts: LevelParts) -> Result<Level, LevelError> {
        if parts.subsectors.is_empty() {
            return Err(LevelError::Empty("subsectors"));
        }
        if parts.sectors.is_empty() {
            return Err(LevelError::Empty("sectors"));
        }
        for sub in &parts.subsectors {
            if sub.sector >= parts.sectors.len() {
                return Err(LevelError::BadIndex("subsector sector"));
            }
            if sub.first_seg + sub.seg_count > parts.segs.len() {
                return Err(LevelError::BadIndex("subsector seg run"));
            }
        }
        for (i, seg) in parts.segs.iter_mut().enumerate() {
            if seg.front_subsector >= parts.subsectors.len() {
                return Err(LevelError::BadIndex("seg front subsector"));
            }
            if seg.two_sided && (seg.partner.is_none() || seg.back_sector.is_none()) {
                return Err(LevelError::BadIndex("two-sided seg missing partner"));
            }
            if let Some(s) = seg.back_sector {
                if s >= parts.sectors.len() {
                    return Err(LevelError::BadIndex("seg back sector"));
                }
            }
            let d = seg.v2 - seg.v1;
            if d.length2d_squared() < 1e-6 {
                return Err(LevelError::DegenerateSeg(i));
            }
            // inward-facing wall plane, interior on the left of v1 -> v2
            let normal = Vec3::new(-d.y, d.x, 0.0).normalized();
            seg.plane = Plane::new(normal, normal.dot(seg.v1));
        }
        let nsegs = parts.segs.len();
        for seg in &parts.segs {
            if let Some(p) = seg.partner {
                if p >= nsegs {
                    return Err(LevelError::BadIndex("seg partner"));
                }
            }
        }
        for node in &parts.nodes {
            for child in node.children {
                match child {
                    BspChild::Node(n) if n >= parts.nodes.len() => {
                        return Err(LevelError::BadIndex("node child"));
                    }
                    BspChild::Leaf(l) if l >= parts.subsectors.len() => {
                        return Err(LevelError::BadIndex("node leaf"));
                    }
                    _ => {}
                }
            }
        }

        let mut bounds = Aabb::EMPTY;
        for seg in &parts.segs {
            let sub = &parts.subsectors[seg.front_subsector];
            let sec = &parts.sectors[sub.sector];
            for v in [seg.v1, seg.v2] {
                bounds.include(Vec3::new(v.x, v.y, sec.floor_z_at(v)));
                bounds.include(Vec3::new(v.x, v.y, sec.ceiling_z_at(v)));
            }
        }

        log::debug!(
            "level: {} sectors, {} subsectors, {} segs, {} nodes",
            parts.sectors.len(),
            parts.subsectors.len(),
            parts.segs.len(),
            parts.nodes.len()
        );

        Ok(Level {
            sectors: parts.sectors,
            segs: parts.segs,
            subsectors: parts.subsectors,
            nodes: parts.nodes,
            bounds,
        })
    }

    #[inline]
    pub fn root(&self) -> BspChild {
        if self.nodes.is_empty() {
            BspChild::Leaf(0)
        } else {
            BspChild::Node(self.nodes.len() - 1)
        }
    }

    #[inline]
    pub fn subsector_segs(&self, sub: usize) -> &[Seg] {
        let ss = &self.subsectors[sub];
        &self.segs[ss.first_seg..ss.first_seg + ss.seg_count]
    }

    #[inline]
    pub fn subsector_sector(&self, sub: usize) -> &Sector {
        &self.sectors[self.subsectors[sub].sector]
    }

    /// World bounds of one leaf, from its seg verts and sector planes.
    pub fn subsector_bounds(&self, sub: usize) -> Aabb {
        let sec = self.subsector_sector(sub);
        let mut bb = Aabb::EMPTY;
        for seg in self.subsector_segs(sub) {
            for v in [seg.v1, seg.v2] {
                bb.include(Vec3::new(v.x, v.y, sec.floor_z_at(v)));
                bb.include(Vec3::new(v.x, v.y, sec.ceiling_z_at(v)));
            }
        }
        bb
    }

    /// Descend the tree to the leaf containing `p`.
    pub fn point_in_subsector(&self, p: Vec3) -> usize {
        let mut child = self.root();
        loop {
            match child {
                BspChild::Leaf(leaf) => return leaf,
                BspChild::Node(n) => {
                    let node = &self.nodes[n];
                    let side = if node.plane.point_dist(p) >= 0.0 { 0 } else { 1 };
                    child = node.children[side];
                }
            }
        }
    }

    /// Walk the subsector chain from `from` to `to` and report whether the
    /// segment reaches its destination without hitting a wall, a closed
    /// portal opening, or a floor/ceiling plane.
    pub fn trace_line(&self, from: Vec3, to: Vec3) -> bool {
        const EPS: f32 = 1e-4;
        let dir = to - from;
        let mut sub = self.point_in_subsector(from);
        let mut t_enter = 0.0f32;

        // bounded by portal hops, not geometry size
        for _ in 0..self.segs.len().max(8) {
            let sector = self.subsector_sector(sub);

            // earliest front-to-back seg crossing after t_enter
            let mut t_exit = 1.0f32;
            let mut exit_seg: Option<&Seg> = None;
            for seg in self.subsector_segs(sub) {
                let denom = dir.dot2d(seg.plane.normal);
                if denom >= -EPS {
                    continue; // moving away from or along this wall
                }
                let t = (seg.plane.dist - from.dot2d(seg.plane.normal)) / denom;
                if t <= t_enter + EPS || t >= t_exit {
                    continue;
                }
                t_exit = t;
                exit_seg = Some(seg);
            }

            // stay between the sector planes over [t_enter, t_exit]
            let a = from + dir * t_enter;
            let b = from + dir * t_exit.min(1.0);
            if !sector.contains_height(a, EPS) || !sector.contains_height(b, EPS) {
                return false;
            }

            let Some(seg) = exit_seg else {
                return true; // destination inside this subsector
            };
            if !seg.two_sided {
                return false;
            }
            let (Some(partner), Some(back_sector)) = (seg.partner, seg.back_sector) else {
                return false;
            };
            // portal opening check at the crossing point
            let cross = from + dir * t_exit;
            let back = &self.sectors[back_sector];
            if !back.contains_height(cross, EPS) {
                return false;
            }
            sub = self.segs[partner].front_subsector;
            t_enter = t_exit;
        }
        false
    }

    /// `trace_line` with an early reject when `to` is farther than
    /// `max_dist_squared`; returns the distance on success.
    pub fn cast_ray(&self, from: Vec3, to: Vec3, max_dist_squared: f32) -> Option<f32> {
        let dsq = (to - from).length_squared();
        if dsq > max_dist_squared {
            return None;
        }
        if !self.trace_line(from, to) {
            return None;
        }
        Some(dsq.max(1.0).sqrt())
    }
}
