//! Renderer tunables. No CLI surface; construct a value or load TOML.

use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Atlas page width/height in texels.
    pub page_size: u16,
    /// Hard cap on atlas pages; past it the cache evicts or fails soft.
    pub max_pages: usize,
    /// Active dynamic light slots, at most [`crate::MAX_DYN_LIGHTS`].
    pub max_dynamic_lights: usize,
    /// 2x supersampled static lightmaps.
    pub extra_samples: bool,
    /// Ambient floor applied on top of sector light.
    pub ambient_min: u8,
    /// Static relight budget per frame, in texels.
    pub relight_budget_texels: u32,
    /// Cast per-sample sight rays for dynamic lights.
    pub dynamic_clip: bool,
    /// Run the shadow/light pass for static lights too.
    pub static_light_shadows: bool,
    /// Two static lights closer than `coeff * radius` collapse into one.
    pub light_filter_coeff: f32,
    pub viewport_width: i32,
    pub viewport_height: i32,
}

impl Default for RendererConfig {
    fn default() -> RendererConfig {
        RendererConfig {
            page_size: 128,
            max_pages: 8,
            max_dynamic_lights: 32,
            extra_samples: true,
            ambient_min: 0,
            relight_budget_texels: 64 * 1024,
            dynamic_clip: true,
            static_light_shadows: false,
            light_filter_coeff: 0.2,
            viewport_width: 640,
            viewport_height: 480,
        }
    }
}

impl RendererConfig {
    pub fn from_path(path: &Path) -> Result<RendererConfig, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        let cfg: RendererConfig = toml::from_str(&s)?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: RendererConfig =
            toml::from_str("max_pages = 2\nextra_samples = false\n").expect("parse");
        assert_eq!(cfg.max_pages, 2);
        assert!(!cfg.extra_samples);
        assert_eq!(cfg.page_size, RendererConfig::default().page_size);
    }
}
