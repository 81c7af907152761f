use std::sync::Arc;

use umbra::{
    BackendCall, Camera, MapAssembler, NullBackend, Renderer, RendererConfig, RelightState, Rgb,
    RoomDef, Vec3,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn two_room_level() -> Arc<umbra::Level> {
    let mut asm = MapAssembler::new();
    asm.add_room(RoomDef::new(0.0, 0.0, 256.0, 256.0, 0.0, 128.0));
    asm.add_room(RoomDef::new(256.0, 0.0, 512.0, 256.0, 0.0, 128.0));
    Arc::new(asm.build().expect("two-room level"))
}

fn camera() -> Camera {
    Camera::looking(
        Vec3::new(64.0, 128.0, 48.0),
        Vec3::new(1.0, 0.0, 0.0),
        2.0,
        1.6,
    )
}

#[test]
fn world_pass_draws_visible_surfaces_lit() {
    init_logs();
    let mut r = Renderer::new(two_room_level(), RendererConfig::default());
    r.add_static_light(1, Vec3::new(128.0, 128.0, 64.0), 300.0, Rgb::WHITE);
    let mut backend = NullBackend::new();
    let stats = r.render_frame(&camera(), &mut backend);

    assert!(stats.visible_subsectors >= 1);
    assert!(stats.surfaces_drawn > 0);
    assert_eq!(stats.surfaces_fullbright, 0);
    assert!(stats.pages_uploaded > 0);
    assert!(backend.count(|c| matches!(c, BackendCall::DrawWorld { lit: true, .. })) > 0);

    // every drawn surface ended the frame clean
    for s in r.surfaces() {
        if s.queue_frame == stats.frame {
            assert_eq!(s.state, RelightState::Clean);
        }
    }
}

#[test]
fn uploads_follow_every_atlas_mutation() {
    init_logs();
    let mut r = Renderer::new(two_room_level(), RendererConfig::default());
    r.add_static_light(1, Vec3::new(128.0, 128.0, 64.0), 300.0, Rgb::WHITE);
    r.add_dyn_light(None, Vec3::new(320.0, 128.0, 64.0), 128.0, Rgb::new(255, 128, 0)).expect("dyn light slot");
    let mut backend = NullBackend::new();
    r.render_frame(&camera(), &mut backend);

    let first_upload = backend
        .calls
        .iter()
        .position(|c| matches!(c, BackendCall::Upload { .. }))
        .expect("at least one upload");
    let last_world = backend
        .calls
        .iter()
        .rposition(|c| matches!(c, BackendCall::DrawWorld { .. }))
        .expect("world draws");
    let last_page = backend
        .calls
        .iter()
        .rposition(|c| matches!(c, BackendCall::AllocPage(_)))
        .expect("page allocation");
    assert!(first_upload > last_world, "upload before the world pass ended");
    assert!(first_upload > last_page, "upload before page provisioning");

    // light passes strictly after the uploads
    if let Some(first_light) = backend
        .calls
        .iter()
        .position(|c| matches!(c, BackendCall::BeginShadowVolumes))
    {
        let last_upload = backend
            .calls
            .iter()
            .rposition(|c| matches!(c, BackendCall::Upload { .. }))
            .expect("uploads");
        assert!(first_light > last_upload);
    }
}

#[test]
fn dynamic_light_gets_scissored_shadow_and_light_pass() {
    init_logs();
    let mut r = Renderer::new(two_room_level(), RendererConfig::default());
    r.add_dyn_light(None, Vec3::new(160.0, 128.0, 64.0), 150.0, Rgb::new(0, 255, 0)).expect("dyn light slot");
    let mut backend = NullBackend::new();
    let stats = r.render_frame(&camera(), &mut backend);

    assert_eq!(stats.lights_rendered, 1);
    assert_eq!(stats.lights_skipped, 0);

    let calls = &backend.calls;
    let scissor_on = calls
        .iter()
        .position(|c| matches!(c, BackendCall::SetScissor(Some(_))))
        .expect("scissor set");
    let shadows = calls
        .iter()
        .position(|c| matches!(c, BackendCall::BeginShadowVolumes))
        .expect("shadow pass");
    let light = calls
        .iter()
        .position(|c| matches!(c, BackendCall::BeginLightPass { .. }))
        .expect("light pass");
    let scissor_off = calls
        .iter()
        .rposition(|c| matches!(c, BackendCall::SetScissor(None)))
        .expect("scissor cleared");
    assert!(scissor_on < shadows && shadows < light && light < scissor_off);
    assert!(backend.count(|c| matches!(c, BackendCall::ShadowVolume { .. })) > 0);
    assert!(backend.count(|c| matches!(c, BackendCall::DrawLight { .. })) > 0);
}

#[test]
fn light_behind_camera_is_skipped_entirely() {
    init_logs();
    let mut r = Renderer::new(two_room_level(), RendererConfig::default());
    // camera sits in room 0 looking +x; a light that reaches only the space
    // behind it resolves to an empty scissor or no view intersection
    let cam = Camera::looking(
        Vec3::new(480.0, 128.0, 48.0),
        Vec3::new(1.0, 0.0, 0.0),
        0.9,
        0.7,
    );
    r.add_dyn_light(None, Vec3::new(32.0, 128.0, 64.0), 64.0, Rgb::WHITE).expect("dyn light slot");
    let mut backend = NullBackend::new();
    let stats = r.render_frame(&cam, &mut backend);
    assert_eq!(stats.lights_rendered, 0);
    assert_eq!(stats.lights_skipped, 1);
    assert_eq!(
        backend.count(|c| matches!(c, BackendCall::BeginLightPass { .. })),
        0
    );
}

#[test]
fn page_veto_degrades_to_fullbright() {
    init_logs();
    let mut r = Renderer::new(two_room_level(), RendererConfig::default());
    let mut backend = NullBackend::new();
    backend.refuse_pages = true;
    let stats = r.render_frame(&camera(), &mut backend);
    assert!(stats.surfaces_drawn > 0);
    assert_eq!(stats.surfaces_fullbright, stats.surfaces_drawn);
    assert_eq!(stats.pages_uploaded, 0);
    assert!(backend.count(|c| matches!(c, BackendCall::DrawWorld { lit: true, .. })) == 0);
}

#[test]
fn static_light_changes_invalidate_their_reach_only() {
    init_logs();
    let level = two_room_level();
    let mut r = Renderer::new(level, RendererConfig::default());
    let mut backend = NullBackend::new();
    r.render_frame(&camera(), &mut backend);
    assert!(r.surfaces().iter().all(|s| s.state != RelightState::Building));

    // a light confined to room 0 must not dirty room 1 surfaces
    r.add_static_light(5, Vec3::new(64.0, 128.0, 64.0), 100.0, Rgb::WHITE);
    let dirty_rooms: Vec<usize> = r
        .surfaces()
        .iter()
        .filter(|s| s.state == RelightState::NeedsRecalc)
        .map(|s| s.subsector)
        .collect();
    assert!(!dirty_rooms.is_empty());
    assert!(dirty_rooms.iter().all(|&sub| sub == 0));

    // removing it dirties the same set again
    let mut backend = NullBackend::new();
    r.render_frame(&camera(), &mut backend);
    r.remove_static_light(5);
    assert!(
        r.surfaces()
            .iter()
            .any(|s| s.state == RelightState::NeedsRecalc)
    );
}

#[test]
fn lightmap_cache_round_trips_through_renderer() {
    init_logs();
    let level = two_room_level();
    let mut r = Renderer::new(level.clone(), RendererConfig::default());
    r.add_static_light(1, Vec3::new(128.0, 128.0, 64.0), 400.0, Rgb::new(220, 180, 140));
    let mut backend = NullBackend::new();
    // look both ways so every surface gets lit and cached
    r.render_frame(&camera(), &mut backend);
    let cam_back = Camera::looking(
        Vec3::new(448.0, 128.0, 48.0),
        Vec3::new(-1.0, 0.0, 0.0),
        2.0,
        1.6,
    );
    r.render_frame(&cam_back, &mut backend);

    let mut blob = Vec::new();
    r.save_lightmap_cache(&mut blob).expect("save cache");

    let mut fresh = Renderer::new(level, RendererConfig::default());
    let restored = fresh.load_lightmap_cache(blob.as_slice()).expect("load cache");
    assert_eq!(restored, fresh.surfaces().len());
    for (a, b) in r.surfaces().iter().zip(fresh.surfaces().iter()) {
        assert_eq!(a.lightmap, b.lightmap);
        assert_eq!(a.lightmap_rgb, b.lightmap_rgb);
    }

    // corrupt blob: fail soft into a full relight sweep
    let mut bad = blob.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0x55;
    let mut other = Renderer::new(two_room_level(), RendererConfig::default());
    assert!(other.load_lightmap_cache(bad.as_slice()).is_err());
    assert!(
        other
            .surfaces()
            .iter()
            .all(|s| s.state == RelightState::NeedsRecalc)
    );
}

#[test]
fn light_point_blends_static_and_dynamic() {
    init_logs();
    let mut r = Renderer::new(two_room_level(), RendererConfig::default());
    r.add_static_light(1, Vec3::new(128.0, 128.0, 64.0), 300.0, Rgb::WHITE);
    let mut backend = NullBackend::new();
    r.render_frame(&camera(), &mut backend);

    let lit = r.light_point(Vec3::new(128.0, 128.0, 8.0));
    assert!(lit.r > 0);

    // a red dynamic light shifts the sample toward red
    r.add_dyn_light(None, Vec3::new(128.0, 128.0, 32.0), 200.0, Rgb::new(255, 0, 0)).expect("dyn light slot");
    r.render_frame(&camera(), &mut backend);
    let reddish = r.light_point(Vec3::new(128.0, 128.0, 8.0));
    assert!(reddish.r > lit.r || reddish.r == 255);
    assert!(reddish.r >= reddish.g);
}
