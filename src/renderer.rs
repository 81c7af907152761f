//! The frame pipeline: visibility, light marking, lightmap caching, dirty
//! uploads, then the per-light shadow/light passes. Strictly sequential;
//! the ordering between stages is what makes the epoch stamps safe.

use std::io::{Read, Write};
use std::sync::Arc;

use umbra_atlas::{AtlasCache, PageProvider};
use umbra_geom::{ClipRect, Rgb, Vec3, clamp_to_byte};
use umbra_level::{Level, Surface, build_surfaces};
use umbra_lightmap::{
    CacheError, DynLightSample, Lightmapper, LightmapOptions, StaticLightSample, level_checksum,
    load_lightmaps, save_lightmaps,
};
use umbra_vis::{
    Camera, DynLightMarks, FrameClock, LightCone, LightVisScratch, VisSet, calc_light_vis,
    compute_visibility,
};

use crate::backend::RenderBackend;
use crate::config::RendererConfig;
use crate::lights::{DynLight, DynLights, StaticLights};
use crate::shadow::{LightPassInput, render_light_shadows};

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    pub frame: u32,
    pub visible_subsectors: usize,
    pub surfaces_drawn: usize,
    pub surfaces_fullbright: usize,
    pub pages_uploaded: usize,
    pub lights_rendered: usize,
    pub lights_skipped: usize,
}

/// Bridges atlas page provisioning to the render backend.
struct BackendPages<'a> {
    backend: &'a mut dyn RenderBackend,
}

impl PageProvider for BackendPages<'_> {
    fn alloc_page(&mut self, page: usize, width: u16, height: u16) -> bool {
        self.backend.alloc_page(page, width, height)
    }
}

pub struct Renderer {
    level: Arc<Level>,
    config: RendererConfig,
    surfaces: Vec<Surface>,
    by_subsector: Vec<Vec<usize>>,
    atlas: AtlasCache,
    lightmapper: Lightmapper,
    clock: FrameClock,
    vis: VisSet,
    light_scratch: LightVisScratch,
    dyn_marks: DynLightMarks,
    statics: StaticLights,
    dynlights: DynLights,
    last_view: Vec3,
    statics_buf: Vec<StaticLightSample>,
    dlights_buf: Vec<DynLightSample>,
    stats: FrameStats,
}

impl Renderer {
    pub fn new(level: Arc<Level>, config: RendererConfig) -> Renderer {
        let surfaces = build_surfaces(&level);
        let mut by_subsector: Vec<Vec<usize>> = vec![Vec::new(); level.subsectors.len()];
        for (i, s) in surfaces.iter().enumerate() {
            by_subsector[s.subsector].push(i);
        }
        let nsubs = level.subsectors.len();
        Renderer {
            atlas: AtlasCache::new(config.page_size, config.max_pages),
            lightmapper: Lightmapper::new(LightmapOptions {
                extra_samples: config.extra_samples,
                ambient_min: config.ambient_min,
                frame_budget_texels: config.relight_budget_texels,
            }),
            clock: FrameClock::new(),
            vis: VisSet::new(nsubs),
            light_scratch: LightVisScratch::new(nsubs),
            dyn_marks: DynLightMarks::new(nsubs),
            statics: StaticLights::new(),
            dynlights: DynLights::new(config.max_dynamic_lights),
            last_view: Vec3::ZERO,
            statics_buf: Vec::new(),
            dlights_buf: Vec::new(),
            stats: FrameStats::default(),
            surfaces,
            by_subsector,
            level,
            config,
        }
    }

    #[inline]
    pub fn level(&self) -> &Level {
        &self.level
    }

    #[inline]
    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    #[inline]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    #[inline]
    pub fn atlas(&self) -> &AtlasCache {
        &self.atlas
    }

    fn invalidate_reach(surfaces: &mut [Surface], reach: &VisSet) {
        for surf in surfaces.iter_mut() {
            if reach.contains(surf.subsector) {
                surf.mark_dirty();
            }
        }
    }

    /// Add or replace a world-authored light and invalidate only the
    /// lightmaps it can affect.
    pub fn add_static_light(&mut self, owner: u64, origin: Vec3, radius: f32, color: Rgb) {
        let light = self.statics.add(&self.level, owner, origin, radius, color);
        let reach = light.reach.clone();
        Self::invalidate_reach(&mut self.surfaces, &reach);
    }

    pub fn remove_static_light(&mut self, owner: u64) {
        if let Some(light) = self.statics.remove(owner) {
            Self::invalidate_reach(&mut self.surfaces, &light.reach);
        }
    }

    pub fn move_static_light(&mut self, owner: u64, origin: Vec3) {
        let Some(old) = self.statics.remove(owner) else {
            return;
        };
        Self::invalidate_reach(&mut self.surfaces, &old.reach);
        let light = self
            .statics
            .add(&self.level, owner, origin, old.radius, old.color);
        let reach = light.reach.clone();
        Self::invalidate_reach(&mut self.surfaces, &reach);
    }

    /// Collapse static lights that crowd each other, then relight what the
    /// dropped lights used to touch.
    pub fn refilter_static_lights(&mut self) {
        if self.statics.refilter(self.config.light_filter_coeff) > 0 {
            for surf in &mut self.surfaces {
                surf.mark_dirty();
            }
        }
    }

    /// Claim a dynamic light slot for this frame.
    pub fn add_dyn_light(
        &mut self,
        owner: Option<u64>,
        origin: Vec3,
        radius: f32,
        color: Rgb,
    ) -> Option<&mut DynLight> {
        self.dynlights
            .alloc(owner, origin, radius, color, self.last_view)
    }

    pub fn remove_dyn_light(&mut self, owner: u64) {
        self.dynlights.remove_owned(owner);
    }

    /// Age dynamic lights; call once per tick with the elapsed time.
    pub fn decay_dyn_lights(&mut self, dt: f32) {
        self.dynlights.decay(dt);
    }

    /// Render one frame through `backend`. See the module docs for the
    /// stage ordering; visibility always precedes light walks, and every
    /// atlas mutation precedes the first upload.
    pub fn render_frame(&mut self, camera: &Camera, backend: &mut dyn RenderBackend) -> FrameStats {
        if self.clock.advance() {
            // epoch wrapped: every stamp keyed by it starts over
            self.dyn_marks.reset();
            self.atlas.reset_frames();
            for surf in &mut self.surfaces {
                surf.dlight_frame = 0;
                surf.queue_frame = 0;
            }
            log::info!("frame epoch wrapped, stamps reset");
        }
        let frame = self.clock.frame();
        self.last_view = camera.origin;
        self.lightmapper.begin_frame();
        let mut stats = FrameStats {
            frame,
            ..FrameStats::default()
        };

        // visibility first; every light walk this frame depends on it
        compute_visibility(&self.level, camera, &mut self.vis);
        stats.visible_subsectors = self.vis.count();

        // mark which subsectors each live dynamic light reaches
        let live: Vec<(usize, DynLight)> = self
            .dynlights
            .iter_live()
            .map(|(i, l)| (i, *l))
            .collect();
        self.dlights_buf.clear();
        self.dlights_buf.resize(
            self.config.max_dynamic_lights.clamp(1, crate::MAX_DYN_LIGHTS),
            DynLightSample {
                origin: Vec3::ZERO,
                radius: 0.0,
                color: Rgb::BLACK,
                needs_trace: false,
            },
        );
        for (slot, l) in &live {
            let res = calc_light_vis(
                &self.level,
                &mut self.light_scratch,
                &self.vis,
                l.origin,
                l.radius,
                l.cone,
                false,
            );
            if let Some(res) = res {
                for &sub in &res.touched {
                    self.dyn_marks.mark(sub, 1 << slot, frame);
                }
            }
            self.dlights_buf[*slot] = DynLightSample {
                origin: l.origin,
                radius: l.radius,
                color: l.color,
                needs_trace: self.config.dynamic_clip,
            };
        }

        // world pass: relight, cache, draw
        for sub in 0..self.level.subsectors.len() {
            if !self.vis.contains(sub) {
                continue;
            }
            let bits = self.dyn_marks.get(sub, frame);
            self.statics_buf.clear();
            for l in self.statics.iter_active() {
                if l.reach.contains(sub) {
                    self.statics_buf.push(StaticLightSample {
                        origin: l.origin,
                        radius: l.radius,
                        color: l.color,
                    });
                }
            }
            for si_pos in 0..self.by_subsector[sub].len() {
                let si = self.by_subsector[sub][si_pos];
                let surf = &mut self.surfaces[si];
                if surf.queue_frame == frame {
                    continue;
                }
                surf.queue_frame = frame;
                if bits != 0 {
                    surf.dlight_bits = bits;
                    surf.dlight_frame = frame;
                }
                let ok = self.lightmapper.cache_surface(
                    &self.level,
                    &mut self.surfaces[si],
                    si as u32,
                    &mut self.atlas,
                    &mut BackendPages {
                        backend: &mut *backend,
                    },
                    &self.statics_buf,
                    &self.dlights_buf,
                    frame,
                );
                let region = if ok {
                    self.atlas
                        .region_for(si as u32)
                        .map(|id| self.atlas.rect(id))
                } else {
                    stats.surfaces_fullbright += 1;
                    None
                };
                backend.draw_world_surface(si, region);
                stats.surfaces_drawn += 1;
            }
        }

        // upload dirty lightmap texels; all atlas mutation is behind us
        for page in 0..self.atlas.page_count() {
            if let Some((rect, texels)) = self.atlas.take_dirty_region(page) {
                backend.upload_dirty_region(page, rect, &texels);
                stats.pages_uploaded += 1;
            }
        }

        // per-light shadow and light accumulation
        let viewport = ClipRect::new(0, 0, self.config.viewport_width, self.config.viewport_height);
        let input = LightPassInput {
            level: &self.level,
            surfaces: &self.surfaces,
            by_subsector: &self.by_subsector,
            vis: &self.vis,
            camera,
            viewport,
        };
        for (_, l) in &live {
            if render_light_shadows(
                &input,
                &mut self.light_scratch,
                l.origin,
                l.radius,
                l.color,
                l.cone,
                backend,
            ) {
                stats.lights_rendered += 1;
            } else {
                stats.lights_skipped += 1;
            }
        }
        if self.config.static_light_shadows {
            for l in self.statics.iter_active() {
                if render_light_shadows(
                    &input,
                    &mut self.light_scratch,
                    l.origin,
                    l.radius,
                    l.color,
                    None,
                    backend,
                ) {
                    stats.lights_rendered += 1;
                } else {
                    stats.lights_skipped += 1;
                }
            }
        }

        self.stats = stats;
        stats
    }

    /// Sample world lighting at a point: sector ambient plus the floor
    /// lightmap texel plus live dynamic lights. Used for entity lighting.
    pub fn light_point(&self, p: Vec3) -> Rgb {
        let sub = self.level.point_in_subsector(p);
        let sec = self.level.subsector_sector(sub);

        let base = sec.light_level.max(self.config.ambient_min) as f32;
        let mut r = sec.light_color.r as f32 * base / 255.0;
        let mut g = sec.light_color.g as f32 * base / 255.0;
        let mut b = sec.light_color.b as f32 * base / 255.0;

        // the floor lightmap texel under the point
        for &si in &self.by_subsector[sub] {
            let surf = &self.surfaces[si];
            if surf.plane.normal.z <= 0.5 {
                continue;
            }
            let ds = surf.texinfo.s_at(p) as i32 - surf.texture_mins[0];
            let dt = surf.texinfo.t_at(p) as i32 - surf.texture_mins[1];
            if ds < 0 || dt < 0 || ds > surf.extents[0] || dt > surf.extents[1] {
                continue;
            }
            let (w, _) = surf.lightmap_size();
            let i = (ds >> 4) as usize + (dt >> 4) as usize * w;
            if let Some(rgb) = &surf.lightmap_rgb {
                r += rgb[i].r as f32;
                g += rgb[i].g as f32;
                b += rgb[i].b as f32;
            } else if let Some(mono) = &surf.lightmap {
                r += mono[i] as f32;
                g += mono[i] as f32;
                b += mono[i] as f32;
            }
            break;
        }

        // live dynamic lights marked on this subsector
        let frame = self.clock.frame();
        let bits = self.dyn_marks.get(sub, frame);
        if bits != 0 {
            for (slot, l) in self.dynlights.iter_live() {
                if bits & (1 << slot) == 0 {
                    continue;
                }
                let add = l.radius - (p - l.origin).length();
                if add > 0.0 {
                    r += add * l.color.r as f32 / 255.0;
                    g += add * l.color.g as f32 / 255.0;
                    b += add * l.color.b as f32 / 255.0;
                }
            }
        }

        Rgb::new(clamp_to_byte(r), clamp_to_byte(g), clamp_to_byte(b))
    }

    /// Persist every static lightmap, keyed to this level.
    pub fn save_lightmap_cache<W: Write>(&self, w: W) -> Result<(), CacheError> {
        save_lightmaps(w, level_checksum(&self.level), &self.surfaces)
    }

    /// Restore a persisted lightmap cache. Any validation failure falls
    /// soft: the cache is dropped and every surface queues for relight.
    pub fn load_lightmap_cache<R: Read>(&mut self, r: R) -> Result<usize, CacheError> {
        match load_lightmaps(r, level_checksum(&self.level), &mut self.surfaces) {
            Ok(n) => Ok(n),
            Err(err) => {
                log::warn!("lightmap cache rejected ({err}), forcing full relight");
                self.atlas.flush_all();
                for surf in &mut self.surfaces {
                    surf.mark_dirty();
                }
                Err(err)
            }
        }
    }

    /// Drop every cached lightmap block, e.g. after a renderer mode switch.
    pub fn flush_lightmap_cache(&mut self) {
        self.atlas.flush_all();
        for surf in &mut self.surfaces {
            surf.mark_dirty();
        }
    }
}

/// Spotlight attachment for a claimed dynamic light slot.
pub fn spot(dir: Vec3, half_angle: f32) -> LightCone {
    LightCone {
        dir: dir.normalized(),
        half_angle,
    }
}
