//! Per-light BSP visibility: which subsectors a light can reach, and which
//! of those the view can also see.

use umbra_geom::{Aabb, Vec3};
use umbra_level::{BspChild, Level};

use crate::stamps::FrameStamps;
use crate::VisSet;

/// Lights smaller than this never touch anything.
pub const MIN_LIGHT_RADIUS: f32 = 2.0;

/// Spotlight restriction; `half_angle` is in radians.
#[derive(Clone, Copy, Debug)]
pub struct LightCone {
    pub dir: Vec3,
    pub half_angle: f32,
}

impl LightCone {
    /// Conservative sphere-vs-cone test: widens the cone by the angle the
    /// sphere subtends, so it may admit a near miss but never rejects a hit.
    fn touches_sphere(&self, apex: Vec3, center: Vec3, radius: f32) -> bool {
        let to = center - apex;
        let d = to.length();
        if d <= radius {
            return true;
        }
        let ang = (self.dir.dot(to) / d).clamp(-1.0, 1.0).acos();
        let spread = (radius / d).clamp(0.0, 1.0).asin();
        ang - spread <= self.half_angle
    }
}

/// Reusable stamp arrays for light visibility walks. One pass per light;
/// the pass counter wraps the same way the frame clock does.
pub struct LightVisScratch {
    reach: FrameStamps,
    lit: FrameStamps,
    pass: u32,
}

impl LightVisScratch {
    pub fn new(subsectors: usize) -> LightVisScratch {
        LightVisScratch {
            reach: FrameStamps::new(subsectors),
            lit: FrameStamps::new(subsectors),
            pass: 0,
        }
    }

    fn begin_pass(&mut self) {
        if self.pass == u32::MAX {
            self.reach.reset();
            self.lit.reset();
            self.pass = 1;
        } else {
            self.pass += 1;
        }
    }

    #[inline]
    pub fn pass(&self) -> u32 {
        self.pass
    }

    /// Did the most recent walk reach this subsector?
    #[inline]
    pub fn reached(&self, sub: usize) -> bool {
        self.reach.is_marked(sub, self.pass)
    }

    /// Reached and also visible from the view.
    #[inline]
    pub fn view_reached(&self, sub: usize) -> bool {
        self.lit.is_marked(sub, self.pass)
    }
}

/// Output of one light walk. `bounds` stays empty unless requested.
#[derive(Clone, Debug)]
pub struct LightVisResult {
    pub touched: Vec<usize>,
    pub view_touched: Vec<usize>,
    pub bounds: Aabb,
}

impl LightVisResult {
    #[inline]
    pub fn is_view_visible(&self) -> bool {
        !self.view_touched.is_empty()
    }
}

struct LightWalk<'a> {
    level: &'a Level,
    view: &'a VisSet,
    origin: Vec3,
    radius: f32,
    cone: Option<LightCone>,
    calc_bounds: bool,
    sphere_box: Aabb,
}

/// Classify every BSP node box against the light sphere (and cone), stamping
/// reached leaves. Deterministic for fixed level and light parameters.
/// Returns `None` when the light reaches nothing.
pub fn calc_light_vis(
    level: &Level,
    scratch: &mut LightVisScratch,
    view: &VisSet,
    origin: Vec3,
    radius: f32,
    cone: Option<LightCone>,
    calc_bounds: bool,
) -> Option<LightVisResult> {
    if radius < MIN_LIGHT_RADIUS {
        return None;
    }
    scratch.begin_pass();
    let walk = LightWalk {
        level,
        view,
        origin,
        radius,
        cone,
        calc_bounds,
        sphere_box: Aabb::from_sphere(origin, radius),
    };
    let mut result = LightVisResult {
        touched: Vec::new(),
        view_touched: Vec::new(),
        bounds: Aabb::EMPTY,
    };
    walk_node(&walk, scratch, level.root(), &mut result);
    if result.touched.is_empty() {
        return None;
    }
    Some(result)
}

fn walk_node(walk: &LightWalk<'_>, scratch: &mut LightVisScratch, child: BspChild, out: &mut LightVisResult) {
    match child {
        BspChild::Leaf(sub) => visit_leaf(walk, scratch, sub, out),
        BspChild::Node(n) => {
            let node = &walk.level.nodes[n];
            let dist = node.plane.point_dist(walk.origin);
            if dist > walk.radius {
                // light wholly in front
                if node.bbox[0].overlaps_2d(&walk.sphere_box) {
                    walk_node(walk, scratch, node.children[0], out);
                }
            } else if dist < -walk.radius {
                if node.bbox[1].overlaps_2d(&walk.sphere_box) {
                    walk_node(walk, scratch, node.children[1], out);
                }
            } else {
                let near = usize::from(dist <= 0.0);
                for side in [near, near ^ 1] {
                    if node.bbox[side].overlaps_2d(&walk.sphere_box) {
                        walk_node(walk, scratch, node.children[side], out);
                    }
                }
            }
        }
    }
}

/// Stamp a reached subsector and fold it into the view intersection. The
/// old inlined update macro became this function.
fn visit_leaf(walk: &LightWalk<'_>, scratch: &mut LightVisScratch, sub: usize, out: &mut LightVisResult) {
    let pass = scratch.pass;
    if scratch.reach.is_marked(sub, pass) {
        return;
    }
    let bb = walk.level.subsector_bounds(sub);
    if !bb.touches_sphere(walk.origin, walk.radius) {
        return;
    }
    if let Some(cone) = &walk.cone {
        let center = (bb.min + bb.max) * 0.5;
        let radius = (bb.max - bb.min).length() * 0.5;
        if !cone.touches_sphere(walk.origin, center, radius) {
            return;
        }
    }
    scratch.reach.mark(sub, pass);
    out.touched.push(sub);
    if walk.view.contains(sub) {
        scratch.lit.mark(sub, pass);
        out.view_touched.push(sub);
        if walk.calc_bounds {
            out.bounds.union(&bb);
        }
    }
}

/// Per-subsector dynamic-light bitmask, epoch-guarded so stale frames never
/// need clearing.
pub struct DynLightMarks {
    bits: Vec<u32>,
    frames: Vec<u32>,
}

impl DynLightMarks {
    pub fn new(subsectors: usize) -> DynLightMarks {
        DynLightMarks {
            bits: vec![0; subsectors],
            frames: vec![0; subsectors],
        }
    }

    #[inline]
    pub fn mark(&mut self, sub: usize, bit: u32, frame: u32) {
        if self.frames[sub] != frame {
            self.frames[sub] = frame;
            self.bits[sub] = 0;
        }
        self.bits[sub] |= bit;
    }

    #[inline]
    pub fn get(&self, sub: usize, frame: u32) -> u32 {
        if self.frames[sub] == frame {
            self.bits[sub]
        } else {
            0
        }
    }

    /// Zero everything; required after a frame-clock wrap.
    pub fn reset(&mut self) {
        self.bits.fill(0);
        self.frames.fill(0);
    }
}
