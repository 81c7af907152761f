//! BSP renderer core: per-frame visibility, lightmap caching, dynamic
//! lighting and the shadow/light accumulation pass.
//!
//! The crates underneath do the heavy lifting; this one owns the frame
//! pipeline and the narrow contract to the GPU backend.
#![forbid(unsafe_code)]

mod backend;
mod config;
mod lights;
mod renderer;
mod scissor;
mod shadow;

pub use backend::{BackendCall, BlendMode, NullBackend, RenderBackend};
pub use config::RendererConfig;
pub use lights::{DynLight, DynLights, MAX_DYN_LIGHTS, StaticLight, StaticLights};
pub use renderer::{FrameStats, Renderer, spot};
pub use scissor::light_scissor;

pub use umbra_atlas::{AllocError, AtlasCache, Rgba, TexelRect};
pub use umbra_geom::{Aabb, ClipRect, Frustum, Plane, Rgb, Vec3};
pub use umbra_level::{Level, LevelParts, MapAssembler, RelightState, RoomDef, Surface};
pub use umbra_lightmap::{CacheError, Lightmapper, level_checksum, load_lightmaps, save_lightmaps};
pub use umbra_vis::{Camera, LightCone, VisSet, compute_visibility, flood_visibility};
