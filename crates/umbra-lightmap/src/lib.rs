//! Lightmap building: static accumulation with sight casts, per-frame
//! dynamic light, and the combine-and-blit path into the atlas.
#![forbid(unsafe_code)]

use umbra_atlas::{AtlasCache, OwnerId, PageProvider, Rgba};
use umbra_geom::{Vec3, clamp_to_byte};
use umbra_level::{LIGHTMAP_GRID, Level, RelightState, Surface};

mod store;
#[cfg(test)]
mod tests;

pub use store::{CacheError, level_checksum, load_lightmaps, save_lightmaps};

/// Largest lightmap dimension after surface subdivision; the scratch
/// buffers are sized for it (doubled for supersampling).
pub const MAX_LIGHTMAP_DIM: usize = 18;

const MAX_SAMPLES: usize = (MAX_LIGHTMAP_DIM * 2) * (MAX_LIGHTMAP_DIM * 2);

/// A static light as the builder sees it: already filtered to lights whose
/// reach includes the surface's subsector.
#[derive(Clone, Copy, Debug)]
pub struct StaticLightSample {
    pub origin: Vec3,
    pub radius: f32,
    pub color: umbra_geom::Rgb,
}

/// One dynamic-light slot, addressed by `Surface::dlight_bits`.
#[derive(Clone, Copy, Debug)]
pub struct DynLightSample {
    pub origin: Vec3,
    pub radius: f32,
    pub color: umbra_geom::Rgb,
    /// Cast a sight ray per sample instead of trusting the subsector walk.
    pub needs_trace: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct LightmapOptions {
    /// 2x supersampling with a box filter.
    pub extra_samples: bool,
    /// Floor for sector ambient light.
    pub ambient_min: u8,
    /// Static relight budget per frame, in texels.
    pub frame_budget_texels: u32,
}

impl Default for LightmapOptions {
    fn default() -> LightmapOptions {
        LightmapOptions {
            extra_samples: true,
            ambient_min: 0,
            frame_budget_texels: 64 * 1024,
        }
    }
}

/// World-to-texture transforms for one surface.
struct FaceVectors {
    texorg: Vec3,
    to_world: [Vec3; 2],
}

impl FaceVectors {
    /// Derive the back-projection from the texinfo axes. Fails for
    /// degenerate axes (texture plane perpendicular to the face).
    fn calc(surf: &Surface) -> Option<FaceVectors> {
        let tex = &surf.texinfo;
        let world_to_tex = [tex.s_axis, tex.t_axis];

        let mut texnormal = tex.t_axis.cross(tex.s_axis).normalized();
        if !texnormal.is_finite() || texnormal.length_squared() < 1e-6 {
            return None;
        }
        let mut distscale = texnormal.dot(surf.plane.normal);
        if distscale == 0.0 {
            return None;
        }
        if distscale < 0.0 {
            distscale = -distscale;
            texnormal = -texnormal;
        }
        let distscale = 1.0 / distscale;
        if !distscale.is_finite() {
            return None;
        }

        let mut to_world = [Vec3::ZERO; 2];
        for i in 0..2 {
            let len = world_to_tex[i].length();
            if len < 1e-6 {
                return None;
            }
            let dist = world_to_tex[i].dot(surf.plane.normal) * distscale;
            to_world[i] = (world_to_tex[i] - texnormal * dist) * (1.0 / (len * len));
        }

        // texture origin, then pushed one unit off the face plane so sample
        // points never sit exactly on it
        let mut texorg = -(to_world[0] * tex.s_offs) - to_world[1] * tex.t_offs;
        let dist = (texorg.dot(surf.plane.normal) - surf.plane.dist - 1.0) * distscale;
        texorg -= texnormal * dist;

        Some(FaceVectors {
            texorg,
            to_world,
        })
    }

    #[inline]
    fn point_at(&self, s: f32, t: f32) -> Vec3 {
        self.texorg + self.to_world[0] * s + self.to_world[1] * t
    }
}

/// Why a surface kept its `NeedsRecalc` state this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelightSkip {
    DegenerateFace,
}

/// Scratch buffers and options for lightmap work. One instance per
/// renderer; everything in here is frame-scoped state, not cache.
pub struct Lightmapper {
    pub opts: LightmapOptions,
    budget_left: u32,
    budget_logged: bool,
    points: Vec<Vec3>,
    mono: Vec<f32>,
    red: Vec<f32>,
    green: Vec<f32>,
    blue: Vec<f32>,
    block_r: Vec<u32>,
    block_g: Vec<u32>,
    block_b: Vec<u32>,
    texels: Vec<Rgba>,
}

impl Lightmapper {
    pub fn new(opts: LightmapOptions) -> Lightmapper {
        let texel_cap = MAX_LIGHTMAP_DIM * MAX_LIGHTMAP_DIM;
        Lightmapper {
            opts,
            budget_left: opts.frame_budget_texels,
            budget_logged: false,
            points: vec![Vec3::ZERO; MAX_SAMPLES],
            mono: vec![0.0; MAX_SAMPLES],
            red: vec![0.0; MAX_SAMPLES],
            green: vec![0.0; MAX_SAMPLES],
            blue: vec![0.0; MAX_SAMPLES],
            block_r: vec![0; texel_cap],
            block_g: vec![0; texel_cap],
            block_b: vec![0; texel_cap],
            texels: vec![Rgba::default(); texel_cap],
        }
    }

    /// Reset the per-frame relight budget.
    pub fn begin_frame(&mut self) {
        self.budget_left = self.opts.frame_budget_texels;
        self.budget_logged = false;
    }

    /// Sample grid for one surface: texel count, sample count per axis,
    /// texture-space start and step.
    fn grid(&self, surf: &Surface) -> (usize, usize, f32, f32, f32) {
        let (w, h) = surf.lightmap_size();
        if self.opts.extra_samples {
            (
                w * 2,
                h * 2,
                surf.texture_mins[0] as f32 - 8.0,
                surf.texture_mins[1] as f32 - 8.0,
                8.0,
            )
        } else {
            (
                w,
                h,
                surf.texture_mins[0] as f32,
                surf.texture_mins[1] as f32,
                16.0,
            )
        }
    }

    /// Back-project every grid point onto the face, nudging points that
    /// cannot see the face midpoint toward the middle to dodge walls.
    fn calc_points(&mut self, level: &Level, surf: &Surface, fv: &FaceVectors) -> usize {
        let (ws, hs, start_s, start_t, step) = self.grid(surf);
        let mids = surf.texture_mins[0] as f32 + surf.extents[0] as f32 * 0.5;
        let midt = surf.texture_mins[1] as f32 + surf.extents[1] as f32 * 0.5;
        let facemid = fv.point_at(mids, midt);

        let mut n = 0usize;
        for t in 0..hs {
            for s in 0..ws {
                let mut us = start_s + s as f32 * step;
                let mut ut = start_t + t as f32 * step;
                let mut pt = fv.point_at(us, ut);
                for attempt in 0..6 {
                    let fms = facemid - pt;
                    if fms.length2d_squared() < 0.002 {
                        break;
                    }
                    if level.trace_line(facemid, pt) {
                        break;
                    }
                    // walk the sample toward the face middle, alternating axes
                    if attempt & 1 != 0 {
                        if us > mids {
                            us = (us - 8.0).max(mids);
                        } else {
                            us = (us + 8.0).min(mids);
                        }
                    } else if ut > midt {
                        ut = (ut - 8.0).max(midt);
                    } else {
                        ut = (ut + 8.0).min(midt);
                    }
                    pt = fv.point_at(us, ut);
                }
                self.points[n] = pt;
                n += 1;
            }
        }
        n
    }

    /// Accumulate one static light over the sample grid. Returns
    /// (hit_anything, saw_color).
    fn single_light_face(
        &mut self,
        level: &Level,
        surf: &Surface,
        light: &StaticLightSample,
        samples: usize,
    ) -> (bool, bool) {
        let bb = surf.world_bounds();
        if !bb.touches_sphere(light.origin, light.radius) {
            return (false, false);
        }
        let dist = surf.plane.point_dist(light.origin);
        if dist <= -0.1 || dist > light.radius {
            return (false, false);
        }

        let mut hit = false;
        let mut colored = false;
        let squaredist = light.radius * light.radius;
        let rmul = light.color.r as f32 / 255.0;
        let gmul = light.color.g as f32 / 255.0;
        let bmul = light.color.b as f32 / 255.0;
        for c in 0..samples {
            let pt = self.points[c];
            let Some(d) = level.cast_ray(light.origin, pt, squaredist) else {
                continue;
            };
            let incoming = (light.origin - pt).normalized();
            let angle = 0.5 + 0.5 * incoming.dot(surf.plane.normal);
            // one light saturates at full intensity; the sum is clamped again
            let add = ((light.radius - d) * angle).min(255.0);
            if add < 0.0 {
                continue;
            }
            self.mono[c] += add;
            self.red[c] += add * rmul;
            self.green[c] += add * gmul;
            self.blue[c] += add * bmul;
            // ignore really tiny contributions
            if self.mono[c] > 1.0 {
                hit = true;
                if !light.color.is_white() {
                    colored = true;
                }
            }
        }
        (hit, colored)
    }

    /// Box-filter a sample channel down to texels (or copy it straight
    /// through when supersampling is off).
    fn resolve_channel(channel: &[f32], w: usize, h: usize, extra: bool, out: &mut [u8]) {
        if extra {
            let ws = w * 2;
            for t in 0..h {
                for s in 0..w {
                    let total = channel[(t * 2) * ws + s * 2]
                        + channel[(t * 2) * ws + s * 2 + 1]
                        + channel[(t * 2 + 1) * ws + s * 2]
                        + channel[(t * 2 + 1) * ws + s * 2 + 1];
                    out[t * w + s] = clamp_to_byte(total * 0.25);
                }
            }
        } else {
            for i in 0..w * h {
                out[i] = clamp_to_byte(channel[i]);
            }
        }
    }

    /// Recompute the static lightmap of one surface from scratch. Clears
    /// the buffers when nothing reaches the surface.
    pub fn light_face(
        &mut self,
        level: &Level,
        surf: &mut Surface,
        statics: &[StaticLightSample],
    ) -> Result<(), RelightSkip> {
        surf.state = RelightState::Building;
        let (w, h) = surf.lightmap_size();
        let (ws, hs, _, _, _) = self.grid(surf);
        let samples = ws * hs;
        debug_assert!(samples <= MAX_SAMPLES, "surface exceeds the sample grid");

        let mut points_ready = false;
        let mut hit = false;
        let mut colored = false;
        for light in statics {
            if !points_ready {
                // cheap rejects first; only build points when some light
                // can actually reach the face
                let bb = surf.world_bounds();
                if !bb.touches_sphere(light.origin, light.radius) {
                    continue;
                }
                let Some(fv) = FaceVectors::calc(surf) else {
                    surf.state = RelightState::NeedsRecalc;
                    return Err(RelightSkip::DegenerateFace);
                };
                self.mono[..samples].fill(0.0);
                self.red[..samples].fill(0.0);
                self.green[..samples].fill(0.0);
                self.blue[..samples].fill(0.0);
                self.calc_points(level, surf, &fv);
                points_ready = true;
            }
            let (h1, c1) = self.single_light_face(level, surf, light, samples);
            hit |= h1;
            colored |= c1;
        }

        if !hit {
            surf.lightmap = None;
            surf.lightmap_rgb = None;
            surf.state = RelightState::Clean;
            return Ok(());
        }

        let extra = self.opts.extra_samples;
        let mut mono = surf.lightmap.take().unwrap_or_default();
        mono.resize(w * h, 0);
        Self::resolve_channel(&self.mono[..samples], w, h, extra, &mut mono);
        surf.lightmap = Some(mono);

        if colored {
            let mut r = vec![0u8; w * h];
            let mut g = vec![0u8; w * h];
            let mut b = vec![0u8; w * h];
            Self::resolve_channel(&self.red[..samples], w, h, extra, &mut r);
            Self::resolve_channel(&self.green[..samples], w, h, extra, &mut g);
            Self::resolve_channel(&self.blue[..samples], w, h, extra, &mut b);
            let rgb: Vec<umbra_geom::Rgb> = (0..w * h)
                .map(|i| umbra_geom::Rgb::new(r[i], g[i], b[i]))
                .collect();
            surf.lightmap_rgb = Some(rgb);
        } else {
            surf.lightmap_rgb = None;
        }
        surf.state = RelightState::Clean;
        Ok(())
    }

    /// Accumulate this frame's dynamic lights into the 8.8 combine
    /// buffers. Never cached; the caller rebuilds the texels every frame a
    /// dynamic light touches the surface.
    fn add_dynamic_lights(
        &mut self,
        level: &Level,
        surf: &Surface,
        dlights: &[DynLightSample],
    ) {
        let (w, h) = surf.lightmap_size();
        let fv = FaceVectors::calc(surf);

        for (slot, dl) in dlights.iter().enumerate() {
            if surf.dlight_bits & (1u32 << slot) == 0 {
                continue;
            }
            let mut rad = dl.radius;
            let dist = surf.plane.point_dist(dl.origin);
            if dist <= -0.1 {
                continue;
            }
            rad -= dist.abs();
            if rad < 1.0 {
                continue;
            }
            let impact = dl.origin - surf.plane.normal * dist;
            let local_s = surf.texinfo.s_at(impact) - surf.texture_mins[0] as f32;
            let local_t = surf.texinfo.t_at(impact) - surf.texture_mins[1] as f32;

            let rmul = dl.color.r as f32;
            let gmul = dl.color.g as f32;
            let bmul = dl.color.b as f32;
            for t in 0..h {
                let td = (local_t as i32 - t as i32 * LIGHTMAP_GRID).abs();
                for s in 0..w {
                    let sd = (local_s as i32 - s as i32 * LIGHTMAP_GRID).abs();
                    // octagonal distance, same as the classic software path
                    let d = if sd > td { sd + (td >> 1) } else { td + (sd >> 1) } as f32;
                    if d >= rad {
                        continue;
                    }
                    if dl.needs_trace {
                        if let Some(fv) = &fv {
                            let grid = LIGHTMAP_GRID as f32;
                            let us = surf.texture_mins[0] as f32 + s as f32 * grid;
                            let ut = surf.texture_mins[1] as f32 + t as f32 * grid;
                            let spt = fv.point_at(us, ut);
                            if (spt - dl.origin).length_squared() > 4.0
                                && !level.trace_line(dl.origin, spt)
                            {
                                continue;
                            }
                        }
                    }
                    let i = t * w + s;
                    self.block_r[i] += ((rad - d) * rmul) as u32;
                    self.block_g[i] += ((rad - d) * gmul) as u32;
                    self.block_b[i] += ((rad - d) * bmul) as u32;
                }
            }
        }
    }

    /// Merge ambient, static and dynamic light into clamped RGBA texels.
    /// The result lives in the internal staging buffer.
    fn build_light_map(
        &mut self,
        level: &Level,
        surf: &Surface,
        dlights: &[DynLightSample],
        frame: u32,
    ) -> usize {
        let (w, h) = surf.lightmap_size();
        let size = w * h;

        // ambient floor in 8.8
        let base = (surf.base_light.max(self.opts.ambient_min) as u32) << 8;
        let tr = surf.base_color.r as u32 * base / 255;
        let tg = surf.base_color.g as u32 * base / 255;
        let tb = surf.base_color.b as u32 * base / 255;
        self.block_r[..size].fill(tr);
        self.block_g[..size].fill(tg);
        self.block_b[..size].fill(tb);

        if let Some(rgb) = &surf.lightmap_rgb {
            for i in 0..size {
                self.block_r[i] += (rgb[i].r as u32) << 8;
                self.block_g[i] += (rgb[i].g as u32) << 8;
                self.block_b[i] += (rgb[i].b as u32) << 8;
            }
        } else if let Some(mono) = &surf.lightmap {
            for i in 0..size {
                let t = (mono[i] as u32) << 8;
                self.block_r[i] += t;
                self.block_g[i] += t;
                self.block_b[i] += t;
            }
        }

        if surf.dlight_frame == frame {
            self.add_dynamic_lights(level, surf, dlights);
        }

        for i in 0..size {
            self.texels[i] = Rgba::new(
                (self.block_r[i] >> 8).min(255) as u8,
                (self.block_g[i] >> 8).min(255) as u8,
                (self.block_b[i] >> 8).min(255) as u8,
            );
        }
        size
    }

    /// Bring one surface's lightmap up to date in the atlas. Returns `true`
    /// when the surface has a valid cached block this frame; `false` means
    /// the caller renders it full-bright.
    #[allow(clippy::too_many_arguments)]
    pub fn cache_surface(
        &mut self,
        level: &Level,
        surf: &mut Surface,
        owner: OwnerId,
        atlas: &mut AtlasCache,
        provider: &mut dyn PageProvider,
        statics: &[StaticLightSample],
        dlights: &[DynLightSample],
        frame: u32,
    ) -> bool {
        let cached = atlas.region_for(owner);
        let lit_by_dlight = surf.dlight_frame == frame;

        // fast path: untouched surface with a resident block
        if let Some(id) = cached {
            if surf.state == RelightState::Clean && !lit_by_dlight && !surf.cached_dlight {
                atlas.touch(id, frame);
                return true;
            }
        }

        if surf.state == RelightState::NeedsRecalc {
            let (w, h) = surf.lightmap_size();
            let cost = (w * h) as u32;
            if cost > self.budget_left {
                // whole-surface writes only: stay dirty and retry next frame
                if !self.budget_logged {
                    log::debug!("relight budget exhausted, deferring static relight");
                    self.budget_logged = true;
                }
                if let Some(id) = cached {
                    atlas.touch(id, frame);
                    return true; // stale but whole texels
                }
                return false;
            }
            if self.light_face(level, surf, statics).is_err() {
                return false;
            }
            self.budget_left -= cost;
        }

        let (w, h) = surf.lightmap_size();
        let id = match cached {
            Some(id) => id,
            None => match atlas.alloc_block(owner, w as u16, h as u16, frame, provider) {
                Ok(id) => {
                    surf.alloc_logged = false;
                    id
                }
                Err(err) => {
                    // one report per surface per exhaustion episode
                    if !surf.alloc_logged {
                        log::warn!("surface {owner}: no lightmap block ({err}), full-bright");
                        surf.alloc_logged = true;
                    }
                    return false;
                }
            },
        };

        let size = self.build_light_map(level, surf, dlights, frame);
        atlas.blit(id, &self.texels[..size]);
        atlas.touch(id, frame);
        surf.cached_dlight = lit_by_dlight;
        true
    }
}
