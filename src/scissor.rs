//! Screen-space scissor rectangle bounding a light's projected influence.
//! Computed once per light and shared by its shadow and light sub-passes.

use umbra_geom::{ClipRect, Vec3};
use umbra_vis::Camera;

const NEAR: f32 = 0.1;

/// Conservative projection of the light sphere onto the viewport. An empty
/// result means the light cannot affect any pixel this frame.
pub fn light_scissor(camera: &Camera, viewport: ClipRect, origin: Vec3, radius: f32) -> ClipRect {
    let d = origin - camera.origin;
    let cx = d.dot(camera.right);
    let cy = d.dot(camera.up);
    let cz = d.dot(camera.forward);

    if cz + radius <= NEAR {
        // wholly behind the view plane
        return ClipRect::default();
    }
    if cz - radius <= NEAR {
        // the sphere straddles the near plane; no useful bound exists
        return viewport;
    }

    let vw = viewport.width() as f32;
    let vh = viewport.height() as f32;
    let fx = (vw * 0.5) / (camera.fov_x * 0.5).tan();
    let fy = (vh * 0.5) / (camera.fov_y * 0.5).tan();

    // project the sphere's camera-space box corners
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    for dx in [-radius, radius] {
        for dy in [-radius, radius] {
            for dz in [-radius, radius] {
                let z = cz + dz;
                let sx = vw * 0.5 + (cx + dx) / z * fx;
                let sy = vh * 0.5 - (cy + dy) / z * fy;
                min_x = min_x.min(sx);
                min_y = min_y.min(sy);
                max_x = max_x.max(sx);
                max_y = max_y.max(sy);
            }
        }
    }

    let rect = ClipRect::new(
        min_x.floor() as i32,
        min_y.floor() as i32,
        max_x.ceil() as i32,
        max_y.ceil() as i32,
    );
    rect.intersect(&viewport)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::looking(
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            std::f32::consts::FRAC_PI_2,
            std::f32::consts::FRAC_PI_2,
        )
    }

    #[test]
    fn light_behind_camera_is_empty() {
        let vp = ClipRect::new(0, 0, 640, 480);
        let r = light_scissor(&camera(), vp, Vec3::new(-100.0, 0.0, 0.0), 32.0);
        assert!(r.is_empty());
    }

    #[test]
    fn centered_light_shrinks_with_distance() {
        let vp = ClipRect::new(0, 0, 640, 480);
        let near = light_scissor(&camera(), vp, Vec3::new(50.0, 0.0, 0.0), 20.0);
        let far = light_scissor(&camera(), vp, Vec3::new(400.0, 0.0, 0.0), 20.0);
        assert!(!near.is_empty() && !far.is_empty());
        assert!(far.width() < near.width());
        assert!(far.height() < near.height());
    }

    #[test]
    fn off_screen_light_clips_to_empty() {
        let vp = ClipRect::new(0, 0, 640, 480);
        // far to the side, outside the 90 degree frustum
        let r = light_scissor(&camera(), vp, Vec3::new(100.0, 10000.0, 0.0), 16.0);
        assert!(r.is_empty());
    }

    #[test]
    fn enclosing_sphere_covers_the_viewport() {
        let vp = ClipRect::new(0, 0, 640, 480);
        let r = light_scissor(&camera(), vp, Vec3::new(5.0, 0.0, 0.0), 64.0);
        assert_eq!(r, vp);
    }
}
