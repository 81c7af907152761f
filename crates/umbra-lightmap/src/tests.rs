use super::*;
use umbra_atlas::UnboundedPages;
use umbra_geom::Rgb;
use umbra_level::{MapAssembler, RoomDef, build_surfaces};

fn cube_room(side: f32) -> Level {
    let mut asm = MapAssembler::new();
    asm.add_room(RoomDef::new(0.0, 0.0, side, side, 0.0, side));
    asm.build().expect("cube room")
}

fn mapper() -> Lightmapper {
    Lightmapper::new(LightmapOptions::default())
}

#[test]
fn uniform_light_fills_every_texel_exactly() {
    let level = cube_room(48.0);
    let mut surfs = build_surfaces(&level);
    let light = StaticLightSample {
        origin: Vec3::new(24.0, 24.0, 24.0),
        radius: 1.0e5,
        color: Rgb::new(128, 64, 0),
    };
    let mut lm = mapper();
    for surf in &mut surfs {
        assert_eq!(surf.lightmap_size(), (4, 4));
        lm.light_face(&level, surf, &[light]).expect("light face");
        let rgb = surf.lightmap_rgb.as_ref().expect("colored lightmap");
        assert_eq!(rgb.len(), 16);
        for texel in rgb {
            assert_eq!(*texel, Rgb::new(128, 64, 0));
        }
    }

    // remove the light: every texel must return to black
    let mut atlas = AtlasCache::new(128, 2);
    for (i, surf) in surfs.iter_mut().enumerate() {
        surf.state = umbra_level::RelightState::NeedsRecalc;
        lm.begin_frame();
        let ok = lm.cache_surface(
            &level,
            surf,
            i as u32,
            &mut atlas,
            &mut UnboundedPages,
            &[],
            &[],
            1,
        );
        assert!(ok);
        assert!(surf.lightmap.is_none());
        let id = atlas.region_for(i as u32).expect("cached block");
        let (page, rect) = atlas.rect(id);
        let stride = atlas.page_size() as usize;
        let pixels = atlas.page_pixels(page);
        for row in 0..rect.h as usize {
            for col in 0..rect.w as usize {
                let p = pixels[(rect.y as usize + row) * stride + rect.x as usize + col];
                assert_eq!((p.r, p.g, p.b), (0, 0, 0));
            }
        }
    }
}

#[test]
fn light_face_is_idempotent() {
    let level = cube_room(96.0);
    let mut surfs = build_surfaces(&level);
    let light = StaticLightSample {
        origin: Vec3::new(30.0, 40.0, 50.0),
        radius: 300.0,
        color: Rgb::new(255, 180, 90),
    };
    let mut lm = mapper();
    for surf in &mut surfs {
        lm.light_face(&level, surf, &[light]).expect("first pass");
        let mono1 = surf.lightmap.clone();
        let rgb1 = surf.lightmap_rgb.clone();
        surf.state = umbra_level::RelightState::NeedsRecalc;
        lm.light_face(&level, surf, &[light]).expect("second pass");
        assert_eq!(surf.lightmap, mono1);
        assert_eq!(surf.lightmap_rgb, rgb1);
    }
}

#[test]
fn clean_cached_surface_skips_rebuild() {
    let level = cube_room(48.0);
    let mut surfs = build_surfaces(&level);
    let mut lm = mapper();
    let mut atlas = AtlasCache::new(128, 2);
    let surf = &mut surfs[0];

    lm.begin_frame();
    assert!(lm.cache_surface(
        &level,
        surf,
        0,
        &mut atlas,
        &mut UnboundedPages,
        &[],
        &[],
        1
    ));
    let id = atlas.region_for(0).expect("block");
    assert!(atlas.take_dirty_region(0).is_some());

    // second frame, nothing changed: same block, no new dirty texels
    lm.begin_frame();
    assert!(lm.cache_surface(
        &level,
        surf,
        0,
        &mut atlas,
        &mut UnboundedPages,
        &[],
        &[],
        2
    ));
    assert_eq!(atlas.region_for(0), Some(id));
    assert!(atlas.take_dirty_region(0).is_none());
}

#[test]
fn budget_defers_whole_surfaces() {
    let level = cube_room(48.0);
    let mut surfs = build_surfaces(&level);
    let mut lm = Lightmapper::new(LightmapOptions {
        frame_budget_texels: 0,
        ..LightmapOptions::default()
    });
    let mut atlas = AtlasCache::new(128, 2);
    let surf = &mut surfs[0];

    lm.begin_frame();
    let ok = lm.cache_surface(
        &level,
        surf,
        0,
        &mut atlas,
        &mut UnboundedPages,
        &[],
        &[],
        1,
    );
    // no cached block and no budget: the surface renders full-bright and
    // keeps waiting for a relight
    assert!(!ok);
    assert_eq!(surf.state, umbra_level::RelightState::NeedsRecalc);
    assert_eq!(atlas.region_for(0), None);
}

#[test]
fn dynamic_light_is_rebuilt_not_cached() {
    let level = cube_room(64.0);
    let mut surfs = build_surfaces(&level);
    // pick the floor
    let idx = surfs
        .iter()
        .position(|s| s.plane.normal.z > 0.5)
        .expect("floor surface");
    let surf = &mut surfs[idx];
    let mut lm = mapper();
    let mut atlas = AtlasCache::new(128, 2);

    let dl = DynLightSample {
        origin: Vec3::new(32.0, 32.0, 16.0),
        radius: 200.0,
        color: Rgb::new(255, 255, 255),
        needs_trace: false,
    };
    surf.dlight_bits = 1;
    surf.dlight_frame = 1;

    lm.begin_frame();
    assert!(lm.cache_surface(
        &level,
        surf,
        0,
        &mut atlas,
        &mut UnboundedPages,
        &[],
        &[dl],
        1
    ));
    let id = atlas.region_for(0).expect("block");
    let (page, rect) = atlas.rect(id);
    let stride = atlas.page_size() as usize;
    let lit = atlas.page_pixels(page)[rect.y as usize * stride + rect.x as usize];
    assert!(lit.r > 0);
    assert!(surf.cached_dlight);

    // next frame the light is gone: texels must be rebuilt back to ambient
    lm.begin_frame();
    assert!(lm.cache_surface(
        &level,
        surf,
        0,
        &mut atlas,
        &mut UnboundedPages,
        &[],
        &[],
        2
    ));
    assert!(!surf.cached_dlight);
    let dark = atlas.page_pixels(page)[rect.y as usize * stride + rect.x as usize];
    assert_eq!((dark.r, dark.g, dark.b), (0, 0, 0));
}

#[test]
fn persisted_cache_round_trips() {
    let level = cube_room(96.0);
    let key = level_checksum(&level);
    let mut surfs = build_surfaces(&level);
    let light = StaticLightSample {
        origin: Vec3::new(48.0, 48.0, 48.0),
        radius: 400.0,
        color: Rgb::new(200, 150, 100),
    };
    let mut lm = mapper();
    for surf in &mut surfs {
        lm.light_face(&level, surf, &[light]).expect("light face");
    }

    let mut blob = Vec::new();
    save_lightmaps(&mut blob, key, &surfs).expect("save");

    let mut fresh = build_surfaces(&level);
    let restored = load_lightmaps(blob.as_slice(), key, &mut fresh).expect("load");
    assert_eq!(restored, fresh.len());
    for (a, b) in surfs.iter().zip(fresh.iter()) {
        assert_eq!(a.lightmap, b.lightmap);
        assert_eq!(a.lightmap_rgb, b.lightmap_rgb);
        assert_eq!(b.state, umbra_level::RelightState::Clean);
    }
}

#[test]
fn persisted_cache_fails_soft() {
    let level = cube_room(96.0);
    let key = level_checksum(&level);
    let mut surfs = build_surfaces(&level);
    let mut blob = Vec::new();
    save_lightmaps(&mut blob, key, &surfs).expect("save");

    // wrong level key
    assert!(matches!(
        load_lightmaps(blob.as_slice(), key ^ 1, &mut surfs),
        Err(CacheError::WrongLevel)
    ));

    // corrupted body
    let mut bad = blob.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0xff;
    assert!(matches!(
        load_lightmaps(bad.as_slice(), key, &mut surfs),
        Err(CacheError::Corrupt)
    ));

    // truncated read
    let short = &blob[..blob.len() - 4];
    assert!(matches!(
        load_lightmaps(short, key, &mut surfs),
        Err(CacheError::Io(_))
    ));

    // wrong magic
    let mut other = blob.clone();
    other[0] = b'X';
    assert!(matches!(
        load_lightmaps(other.as_slice(), key, &mut surfs),
        Err(CacheError::BadMagic)
    ));

    // surfaces stayed dirty through all of it
    assert!(
        surfs
            .iter()
            .all(|s| s.state == umbra_level::RelightState::NeedsRecalc)
    );
}
