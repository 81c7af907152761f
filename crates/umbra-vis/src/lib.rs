//! Per-frame visibility: view bitsets, portal flood-fill, light reach.
#![forbid(unsafe_code)]

use bit_vec::BitVec;
use umbra_geom::{Aabb, Frustum, Vec3};
use umbra_level::{BspChild, Level, Seg};

mod lightvis;
mod stamps;

pub use lightvis::{
    DynLightMarks, LightCone, LightVisResult, LightVisScratch, MIN_LIGHT_RADIUS, calc_light_vis,
};
pub use stamps::{FrameClock, FrameStamps};

/// Camera pose plus projection parameters. Field of view angles are full
/// angles in radians.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub origin: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub fov_x: f32,
    pub fov_y: f32,
}

impl Camera {
    /// Camera at `origin` looking along `forward` with z-up roll.
    pub fn looking(origin: Vec3, forward: Vec3, fov_x: f32, fov_y: f32) -> Camera {
        let forward = forward.normalized();
        let mut right = forward.cross(Vec3::UP);
        if right.length_squared() < 1e-6 {
            right = Vec3::new(1.0, 0.0, 0.0);
        }
        let right = right.normalized();
        let up = right.cross(forward).normalized();
        Camera {
            origin,
            forward,
            right,
            up,
            fov_x,
            fov_y,
        }
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_camera(
            self.origin,
            self.forward,
            self.right,
            self.up,
            self.fov_x,
            self.fov_y,
        )
    }
}

/// Bit per subsector, rebuilt every frame.
#[derive(Clone, Debug)]
pub struct VisSet {
    bits: BitVec,
}

impl VisSet {
    pub fn new(subsectors: usize) -> VisSet {
        VisSet {
            bits: BitVec::from_elem(subsectors, false),
        }
    }

    #[inline]
    pub fn clear_all(&mut self) {
        self.bits.clear();
    }

    #[inline]
    pub fn mark(&mut self, sub: usize) {
        self.bits.set(sub, true);
    }

    #[inline]
    pub fn contains(&self, sub: usize) -> bool {
        self.bits.get(sub).unwrap_or(false)
    }

    pub fn any(&self) -> bool {
        self.bits.any()
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| *b).count()
    }
}

/// Exact view-dependent visibility: BSP front-to-back with node-bbox
/// frustum rejection. Pruned subtrees are never revisited.
pub fn compute_visibility(level: &Level, camera: &Camera, out: &mut VisSet) {
    out.clear_all();
    let frustum = camera.frustum();
    descend(level, camera.origin, &frustum, level.root(), &level.bounds, out);
}

fn descend(
    level: &Level,
    eye: Vec3,
    frustum: &Frustum,
    child: BspChild,
    bbox: &Aabb,
    out: &mut VisSet,
) {
    if !frustum.intersects_box(bbox) {
        return;
    }
    match child {
        BspChild::Leaf(sub) => out.mark(sub),
        BspChild::Node(n) => {
            let node = &level.nodes[n];
            let near = if node.plane.point_dist(eye) >= 0.0 { 0 } else { 1 };
            descend(level, eye, frustum, node.children[near], &node.bbox[near], out);
            let far = near ^ 1;
            descend(level, eye, frustum, node.children[far], &node.bbox[far], out);
        }
    }
}

/// 2-D segment-vs-circle touch test for portal flooding.
fn circle_touches_seg(center: Vec3, radius_sq: f32, seg: &Seg) -> bool {
    let s0qp = center - seg.v1;
    if s0qp.length2d_squared() <= radius_sq {
        return true;
    }
    if (center - seg.v2).length2d_squared() <= radius_sq {
        return true;
    }
    let s0s1 = seg.v2 - seg.v1;
    let a = s0s1.dot2d(s0s1);
    if a <= 0.0 {
        return false;
    }
    let t = s0s1.dot2d(s0qp) / a;
    if !(0.0..=1.0).contains(&t) {
        return false;
    }
    let c = s0qp.dot2d(s0qp);
    c - a * t * t < radius_sq
}

/// View-independent reachability: bounded flood-fill from the subsector
/// containing `origin`, crossing only open portals the sphere touches.
/// Cheaper than the BSP walk when a light just needs a reach set.
pub fn flood_visibility(level: &Level, origin: Vec3, radius: f32, out: &mut VisSet) {
    out.clear_all();
    let start = level.point_in_subsector(origin);
    let radius_sq = radius * radius;
    let mut stack = vec![start];
    out.mark(start);
    while let Some(sub) = stack.pop() {
        for seg in level.subsector_segs(sub) {
            if !seg.two_sided {
                continue;
            }
            let Some(partner) = seg.partner else {
                continue;
            };
            let next = level.segs[partner].front_subsector;
            if out.contains(next) {
                continue;
            }
            let Some(back) = seg.back_sector else {
                continue;
            };
            // the shared opening must exist and overlap the sphere's z span
            let fsec = level.subsector_sector(sub);
            let bsec = &level.sectors[back];
            let mid = (seg.v1 + seg.v2) * 0.5;
            let open_lo = bsec.floor_z_at(mid).max(fsec.floor_z_at(mid));
            let open_hi = bsec.ceiling_z_at(mid).min(fsec.ceiling_z_at(mid));
            if open_hi <= open_lo {
                continue; // shut door or raised lift
            }
            if origin.z + radius <= open_lo || origin.z - radius >= open_hi {
                continue;
            }
            // sphere must reach the portal plane and span
            let dist = seg.plane.point_dist(origin);
            if dist * dist >= radius_sq {
                continue;
            }
            if !circle_touches_seg(origin, radius_sq, seg) {
                continue;
            }
            out.mark(next);
            stack.push(next);
        }
    }
}
