//! The narrow draw-call contract to the GPU layer. The core never issues
//! graphics-API calls itself; everything funnels through this trait the way
//! the rest of the engine keeps its renderer behind one seam.

use umbra_atlas::{Rgba, TexelRect};
use umbra_geom::{ClipRect, Rgb, Vec3};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    Additive,
}

pub trait RenderBackend {
    /// Back a new atlas page with a texture. Returning `false` vetoes the
    /// page and lightmap allocation fails soft.
    fn alloc_page(&mut self, page: usize, width: u16, height: u16) -> bool;

    /// Upload the changed part of an atlas page.
    fn upload_dirty_region(&mut self, page: usize, rect: TexelRect, texels: &[Rgba]);

    /// World-pass draw of one surface, with its lightmap region when cached
    /// and `None` for the full-bright fallback.
    fn draw_world_surface(&mut self, surface: usize, lightmap: Option<(usize, TexelRect)>);

    /// Screen-space scissor shared by a light's shadow and light sub-passes.
    fn set_scissor(&mut self, rect: Option<ClipRect>);

    fn begin_shadow_volumes(&mut self);

    /// Extrude this caster's silhouette away from the light to infinity and
    /// render it into the stencil.
    fn draw_shadow_volume(&mut self, verts: &[Vec3], light_origin: Vec3, radius: f32);

    fn end_shadow_volumes(&mut self);

    fn begin_light_pass(&mut self, origin: Vec3, radius: f32, color: Rgb);

    fn draw_light_surface(&mut self, surface: usize, blend: BlendMode);

    fn end_light_pass(&mut self);
}

/// What a [`NullBackend`] saw, in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    AllocPage(usize),
    Upload {
        page: usize,
        rect: TexelRect,
        texel_count: usize,
    },
    DrawWorld {
        surface: usize,
        lit: bool,
    },
    SetScissor(Option<ClipRect>),
    BeginShadowVolumes,
    ShadowVolume {
        vert_count: usize,
    },
    EndShadowVolumes,
    BeginLightPass {
        color: Rgb,
    },
    DrawLight {
        surface: usize,
        blend: BlendMode,
    },
    EndLightPass,
}

/// Records every call and draws nothing. Used by tests and headless runs.
#[derive(Default)]
pub struct NullBackend {
    pub calls: Vec<BackendCall>,
    /// Pages the backend refuses to allocate, for exhaustion tests.
    pub refuse_pages: bool,
}

impl NullBackend {
    pub fn new() -> NullBackend {
        NullBackend::default()
    }

    pub fn count(&self, f: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|c| f(c)).count()
    }
}

impl RenderBackend for NullBackend {
    fn alloc_page(&mut self, page: usize, _width: u16, _height: u16) -> bool {
        if self.refuse_pages {
            return false;
        }
        self.calls.push(BackendCall::AllocPage(page));
        true
    }

    fn upload_dirty_region(&mut self, page: usize, rect: TexelRect, texels: &[Rgba]) {
        self.calls.push(BackendCall::Upload {
            page,
            rect,
            texel_count: texels.len(),
        });
    }

    fn draw_world_surface(&mut self, surface: usize, lightmap: Option<(usize, TexelRect)>) {
        self.calls.push(BackendCall::DrawWorld {
            surface,
            lit: lightmap.is_some(),
        });
    }

    fn set_scissor(&mut self, rect: Option<ClipRect>) {
        self.calls.push(BackendCall::SetScissor(rect));
    }

    fn begin_shadow_volumes(&mut self) {
        self.calls.push(BackendCall::BeginShadowVolumes);
    }

    fn draw_shadow_volume(&mut self, verts: &[Vec3], _light_origin: Vec3, _radius: f32) {
        self.calls.push(BackendCall::ShadowVolume {
            vert_count: verts.len(),
        });
    }

    fn end_shadow_volumes(&mut self) {
        self.calls.push(BackendCall::EndShadowVolumes);
    }

    fn begin_light_pass(&mut self, _origin: Vec3, _radius: f32, color: Rgb) {
        self.calls.push(BackendCall::BeginLightPass { color });
    }

    fn draw_light_surface(&mut self, surface: usize, blend: BlendMode) {
        self.calls.push(BackendCall::DrawLight { surface, blend });
    }

    fn end_light_pass(&mut self) {
        self.calls.push(BackendCall::EndLightPass);
    }
}
