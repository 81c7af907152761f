//! Renderable surfaces cut from level geometry, with lightmap extents.

use umbra_geom::{Aabb, Plane, Rgb, Vec3};

use crate::Level;

/// World units per lightmap texel.
pub const LIGHTMAP_GRID: i32 = 16;

/// Surfaces wider than this along either texture axis are subdivided so a
/// lightmap never exceeds the builder's sample grid.
pub const MAX_SURFACE_EXTENT: i32 = 240;

/// Texture-space basis for a surface: `s = dot(p, s_axis) + s_offs`.
#[derive(Clone, Copy, Debug)]
pub struct TexInfo {
    pub s_axis: Vec3,
    pub t_axis: Vec3,
    pub s_offs: f32,
    pub t_offs: f32,
}

impl TexInfo {
    #[inline]
    pub fn s_at(&self, p: Vec3) -> f32 {
        p.dot(self.s_axis) + self.s_offs
    }

    #[inline]
    pub fn t_at(&self, p: Vec3) -> f32 {
        p.dot(self.t_axis) + self.t_offs
    }
}

/// Lightmap lifecycle of one surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RelightState {
    Clean,
    #[default]
    NeedsRecalc,
    Building,
}

/// Polygon cut from a wall or a sector plane. Static lightmap buffers live
/// here; the atlas block it may occupy is tracked by the atlas itself.
pub struct Surface {
    pub verts: Vec<Vec3>,
    pub plane: Plane,
    pub subsector: usize,
    pub sector: usize,
    pub texinfo: TexInfo,
    /// Texture-space origin snapped down to the texel grid.
    pub texture_mins: [i32; 2],
    /// Texture-space span rounded up to whole texels.
    pub extents: [i32; 2],
    pub base_light: u8,
    pub base_color: Rgb,
    pub state: RelightState,
    /// Monochrome static lightmap, one byte per texel; `None` until lit.
    pub lightmap: Option<Vec<u8>>,
    /// Colored static lightmap, allocated only when some light is not white.
    pub lightmap_rgb: Option<Vec<Rgb>>,
    pub dlight_bits: u32,
    pub dlight_frame: u32,
    /// Guards against double enqueue within one frame.
    pub queue_frame: u32,
    /// Cached texels include dynamic light from the previous frame and must
    /// be rebuilt even if nothing else changed.
    pub cached_dlight: bool,
    /// Set once an atlas allocation failure for this surface was reported;
    /// cleared when space exists again.
    pub alloc_logged: bool,
}

impl Surface {
    /// Lightmap dimensions in texels.
    #[inline]
    pub fn lightmap_size(&self) -> (usize, usize) {
        (
            ((self.extents[0] / LIGHTMAP_GRID) + 1) as usize,
            ((self.extents[1] / LIGHTMAP_GRID) + 1) as usize,
        )
    }

    pub fn world_bounds(&self) -> Aabb {
        let mut bb = Aabb::EMPTY;
        for v in &self.verts {
            bb.include(*v);
        }
        bb
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        if self.state == RelightState::Clean {
            self.state = RelightState::NeedsRecalc;
        }
    }
}

fn polygon_area(verts: &[Vec3], plane: &Plane) -> f32 {
    if verts.len() < 3 {
        return 0.0;
    }
    let mut acc = Vec3::ZERO;
    for i in 1..verts.len() - 1 {
        acc += (verts[i] - verts[0]).cross(verts[i + 1] - verts[0]);
    }
    acc.dot(plane.normal) * 0.5
}

/// Split a convex polygon by the texture-space line `dot(p, axis) == at`.
/// Returns the (below, above) halves; either may be degenerate.
fn split_polygon(verts: &[Vec3], axis: Vec3, at: f32) -> (Vec<Vec3>, Vec<Vec3>) {
    let mut below = Vec::new();
    let mut above = Vec::new();
    let n = verts.len();
    for i in 0..n {
        let a = verts[i];
        let b = verts[(i + 1) % n];
        let da = a.dot(axis) - at;
        let db = b.dot(axis) - at;
        if da <= 0.0 {
            below.push(a);
        }
        if da >= 0.0 {
            above.push(a);
        }
        if (da < 0.0 && db > 0.0) || (da > 0.0 && db < 0.0) {
            let f = da / (da - db);
            let cut = a + (b - a) * f;
            below.push(cut);
            above.push(cut);
        }
    }
    (below, above)
}

struct SurfaceSeed {
    subsector: usize,
    sector: usize,
    plane: Plane,
    texinfo: TexInfo,
}

/// Compute extents, subdividing oversized polygons so every emitted surface
/// fits the lightmap sample grid.
fn emit_surface(out: &mut Vec<Surface>, level: &Level, seed: &SurfaceSeed, verts: Vec<Vec3>) {
    if verts.len() < 3 || polygon_area(&verts, &seed.plane).abs() < 1e-3 {
        return;
    }

    let mut mins = [f32::MAX; 2];
    let mut maxs = [f32::MIN; 2];
    for v in &verts {
        let st = [seed.texinfo.s_at(*v), seed.texinfo.t_at(*v)];
        for i in 0..2 {
            mins[i] = mins[i].min(st[i]);
            maxs[i] = maxs[i].max(st[i]);
        }
    }

    for i in 0..2 {
        if maxs[i] - mins[i] > MAX_SURFACE_EXTENT as f32 {
            // cut at the grid line nearest the middle of the span
            let mid = (mins[i] + maxs[i]) * 0.5;
            let grid = LIGHTMAP_GRID as f32;
            let at = (mid / grid).round() * grid;
            let axis = if i == 0 {
                seed.texinfo.s_axis
            } else {
                seed.texinfo.t_axis
            };
            let offs = if i == 0 {
                seed.texinfo.s_offs
            } else {
                seed.texinfo.t_offs
            };
            let (below, above) = split_polygon(&verts, axis, at - offs);
            emit_surface(out, level, seed, below);
            emit_surface(out, level, seed, above);
            return;
        }
    }

    let grid = LIGHTMAP_GRID as f32;
    let mut texture_mins = [0i32; 2];
    let mut extents = [0i32; 2];
    for i in 0..2 {
        let bmin = (mins[i] / grid).floor() as i32;
        let bmax = (maxs[i] / grid).ceil() as i32;
        texture_mins[i] = bmin * LIGHTMAP_GRID;
        extents[i] = (bmax - bmin) * LIGHTMAP_GRID;
    }

    let sec = &level.sectors[seed.sector];
    out.push(Surface {
        verts,
        plane: seed.plane,
        subsector: seed.subsector,
        sector: seed.sector,
        texinfo: seed.texinfo,
        texture_mins,
        extents,
        base_light: sec.light_level,
        base_color: sec.light_color,
        state: RelightState::NeedsRecalc,
        lightmap: None,
        lightmap_rgb: None,
        dlight_bits: 0,
        dlight_frame: 0,
        queue_frame: 0,
        cached_dlight: false,
        alloc_logged: false,
    });
}

fn wall_quad(v1: Vec3, v2: Vec3, z1a: f32, z1b: f32, z2a: f32, z2b: f32) -> Option<Vec<Vec3>> {
    // a = bottom, b = top, per endpoint; reject walls with no height anywhere
    if z1b - z1a < 1e-3 && z2b - z2a < 1e-3 {
        return None;
    }
    Some(vec![
        Vec3::new(v1.x, v1.y, z1b),
        Vec3::new(v2.x, v2.y, z2b),
        Vec3::new(v2.x, v2.y, z2a),
        Vec3::new(v1.x, v1.y, z1a),
    ])
}

/// Build the mutable surface set for a level: one or more quads per wall
/// seg plus floor and ceiling polygons per subsector.
pub fn build_surfaces(level: &Level) -> Vec<Surface> {
    let mut out = Vec::new();

    for seg in &level.segs {
        let front = level.subsector_sector(seg.front_subsector);
        let d = (seg.v2 - seg.v1).normalized();
        let f1 = front.floor_z_at(seg.v1);
        let f2 = front.floor_z_at(seg.v2);
        let c1 = front.ceiling_z_at(seg.v1);
        let c2 = front.ceiling_z_at(seg.v2);

        let mut quads: Vec<Vec<Vec3>> = Vec::new();
        match seg.back_sector {
            None => {
                if let Some(q) = wall_quad(seg.v1, seg.v2, f1, c1, f2, c2) {
                    quads.push(q);
                }
            }
            Some(bs) => {
                let back = &level.sectors[bs];
                let bf1 = back.floor_z_at(seg.v1);
                let bf2 = back.floor_z_at(seg.v2);
                let bc1 = back.ceiling_z_at(seg.v1);
                let bc2 = back.ceiling_z_at(seg.v2);
                // upper wall below the neighbor's lower ceiling
                if let Some(q) = wall_quad(seg.v1, seg.v2, bc1.max(f1), c1, bc2.max(f2), c2) {
                    quads.push(q);
                }
                // lower wall above the neighbor's higher floor
                if let Some(q) = wall_quad(seg.v1, seg.v2, f1, bf1.min(c1), f2, bf2.min(c2)) {
                    quads.push(q);
                }
            }
        }

        for quad in quads {
            let top = quad.iter().map(|v| v.z).fold(f32::MIN, f32::max);
            let seed = SurfaceSeed {
                subsector: seg.front_subsector,
                sector: level.subsectors[seg.front_subsector].sector,
                plane: seg.plane,
                texinfo: TexInfo {
                    s_axis: d,
                    t_axis: Vec3::new(0.0, 0.0, -1.0),
                    s_offs: -d.dot(seg.v1),
                    t_offs: top,
                },
            };
            emit_surface(&mut out, level, &seed, quad);
        }
    }

    for (si, _) in level.subsectors.iter().enumerate() {
        let segs = level.subsector_segs(si);
        if segs.len() < 3 {
            continue;
        }
        let sector_idx = level.subsectors[si].sector;
        let sec = &level.sectors[sector_idx];
        let loop2d: Vec<Vec3> = segs.iter().map(|s| s.v1).collect();

        // flats use world-aligned texture axes
        let flat_tex = TexInfo {
            s_axis: Vec3::new(1.0, 0.0, 0.0),
            t_axis: Vec3::new(0.0, 1.0, 0.0),
            s_offs: 0.0,
            t_offs: 0.0,
        };

        let floor_verts: Vec<Vec3> = loop2d
            .iter()
            .map(|v| Vec3::new(v.x, v.y, sec.floor_z_at(*v)))
            .collect();
        let seed = SurfaceSeed {
            subsector: si,
            sector: sector_idx,
            plane: sec.floor,
            texinfo: flat_tex,
        };
        emit_surface(&mut out, level, &seed, floor_verts);

        let ceil_verts: Vec<Vec3> = loop2d
            .iter()
            .rev()
            .map(|v| Vec3::new(v.x, v.y, sec.ceiling_z_at(*v)))
            .collect();
        let seed = SurfaceSeed {
            subsector: si,
            sector: sector_idx,
            plane: sec.ceiling,
            texinfo: flat_tex,
        };
        emit_surface(&mut out, level, &seed, ceil_verts);
    }

    log::debug!("built {} surfaces", out.len());
    out
}
