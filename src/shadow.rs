//! Per-light shadow-volume and additive light pass.
//!
//! For every light that reaches view-visible subsectors: compute the shared
//! scissor, render shadow volumes for casting surfaces across the light's
//! whole reach, then the additive light pass over view-visible receivers.

use umbra_geom::{ClipRect, Rgb, Vec3};
use umbra_level::{Level, Surface};
use umbra_vis::{Camera, LightCone, LightVisScratch, VisSet, calc_light_vis};

use crate::backend::{BlendMode, RenderBackend};
use crate::scissor::light_scissor;

pub(crate) struct LightPassInput<'a> {
    pub level: &'a Level,
    pub surfaces: &'a [Surface],
    pub by_subsector: &'a [Vec<usize>],
    pub vis: &'a VisSet,
    pub camera: &'a Camera,
    pub viewport: ClipRect,
}

/// True when any vertex falls inside the spotlight cone.
fn surface_in_cone(surf: &Surface, origin: Vec3, cone: &LightCone) -> bool {
    surf.verts.iter().any(|v| {
        let to = *v - origin;
        let d = to.length();
        if d < 1e-3 {
            return true;
        }
        (cone.dir.dot(to) / d).clamp(-1.0, 1.0).acos() <= cone.half_angle
    })
}

/// Surfaces the light shines on cast and receive; everything else is
/// skipped. `0 < dist < radius` matches the facing test of the volume
/// renderer.
#[inline]
fn lit_distance(surf: &Surface, origin: Vec3, radius: f32) -> Option<f32> {
    let dist = surf.plane.point_dist(origin);
    if dist <= 0.0 || dist >= radius {
        None
    } else {
        Some(dist)
    }
}

/// Render one light's shadow and light sub-passes. Returns `false` when the
/// light was skipped (unreachable, invisible, or empty scissor).
pub(crate) fn render_light_shadows(
    input: &LightPassInput<'_>,
    scratch: &mut LightVisScratch,
    origin: Vec3,
    radius: f32,
    color: Rgb,
    cone: Option<LightCone>,
    backend: &mut dyn RenderBackend,
) -> bool {
    let Some(lv) = calc_light_vis(input.level, scratch, input.vis, origin, radius, cone, false)
    else {
        return false;
    };
    if !lv.is_view_visible() {
        return false;
    }

    let scissor = light_scissor(input.camera, input.viewport, origin, radius);
    if scissor.is_empty() {
        // cheap early-out, not an error
        return false;
    }
    backend.set_scissor(Some(scissor));

    // shadow volumes come from the light's whole reach: casters outside the
    // view still throw shadows into it
    backend.begin_shadow_volumes();
    for &sub in &lv.touched {
        for &si in &input.by_subsector[sub] {
            let surf = &input.surfaces[si];
            if surf.verts.len() < 3 {
                continue;
            }
            if lit_distance(surf, origin, radius).is_none() {
                continue;
            }
            backend.draw_shadow_volume(&surf.verts, origin, radius);
        }
    }
    backend.end_shadow_volumes();

    // additive pass over receivers the view can see
    backend.begin_light_pass(origin, radius, color);
    for &sub in &lv.view_touched {
        for &si in &input.by_subsector[sub] {
            let surf = &input.surfaces[si];
            if lit_distance(surf, origin, radius).is_none() {
                continue;
            }
            if let Some(c) = &cone {
                if !surface_in_cone(surf, origin, c) {
                    continue;
                }
            }
            backend.draw_light_surface(si, BlendMode::Additive);
        }
    }
    backend.end_light_pass();
    backend.set_scissor(None);
    true
}
