//! Minimal geometry and color types for renderer crates (no GPU dependency).
#![forbid(unsafe_code)]

use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    pub const UP: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn dot(self, rhs: Vec3) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    #[inline]
    pub fn dot2d(self, rhs: Vec3) -> f32 {
        self.x * rhs.x + self.y * rhs.y
    }

    #[inline]
    pub fn cross(self, rhs: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * rhs.z - self.z * rhs.y,
            y: self.z * rhs.x - self.x * rhs.z,
            z: self.x * rhs.y - self.y * rhs.x,
        }
    }

    #[inline]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    #[inline]
    pub fn length2d_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    #[inline]
    pub fn normalized(self) -> Vec3 {
        let len = self.length();
        if len > 0.0 { self / len } else { self }
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    #[inline]
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    #[inline]
    fn add_assign(&mut self, rhs: Vec3) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    #[inline]
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3 {
    #[inline]
    fn sub_assign(&mut self, rhs: Vec3) {
        self.x -= rhs.x;
        self.y -= rhs.y;
        self.z -= rhs.z;
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    #[inline]
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f32> for Vec3 {
    type Output = Vec3;
    #[inline]
    fn div(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    #[inline]
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// Oriented plane in point-normal form: `dot(p, normal) == dist` on the plane.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
}

/// Which side of a plane a box or point lies on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneSide {
    Front,
    Back,
    Crossing,
}

impl Plane {
    #[inline]
    pub const fn new(normal: Vec3, dist: f32) -> Self {
        Self { normal, dist }
    }

    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Option<Plane> {
        let normal = (b - a).cross(c - a).normalized();
        if normal.length_squared() < 1e-6 {
            return None;
        }
        Some(Plane::new(normal, normal.dot(a)))
    }

    #[inline]
    pub fn point_dist(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.dist
    }

    #[inline]
    pub fn point_side(&self, p: Vec3) -> PlaneSide {
        if self.point_dist(p) >= 0.0 {
            PlaneSide::Front
        } else {
            PlaneSide::Back
        }
    }

    /// Classify an axis-aligned box against the plane.
    pub fn box_side(&self, bb: &Aabb) -> PlaneSide {
        // near/far corner selection per axis sign
        let mut near = bb.min;
        let mut far = bb.max;
        if self.normal.x < 0.0 {
            core::mem::swap(&mut near.x, &mut far.x);
        }
        if self.normal.y < 0.0 {
            core::mem::swap(&mut near.y, &mut far.y);
        }
        if self.normal.z < 0.0 {
            core::mem::swap(&mut near.z, &mut far.z);
        }
        if self.point_dist(near) > 0.0 {
            PlaneSide::Front
        } else if self.point_dist(far) < 0.0 {
            PlaneSide::Back
        } else {
            PlaneSide::Crossing
        }
    }

    /// Distance of a sphere center; negative beyond `-radius` means fully behind.
    #[inline]
    pub fn sphere_side(&self, center: Vec3, radius: f32) -> PlaneSide {
        let d = self.point_dist(center);
        if d > radius {
            PlaneSide::Front
        } else if d < -radius {
            PlaneSide::Back
        } else {
            PlaneSide::Crossing
        }
    }

    #[inline]
    pub fn flipped(&self) -> Plane {
        Plane::new(-self.normal, -self.dist)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Inverted box; unioning anything into it yields that thing.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::new(f32::MAX, f32::MAX, f32::MAX),
        max: Vec3::new(f32::MIN, f32::MIN, f32::MIN),
    };

    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn include(&mut self, p: Vec3) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    #[inline]
    pub fn union(&mut self, other: &Aabb) {
        if other.is_empty() {
            return;
        }
        self.include(other.min);
        self.include(other.max);
    }

    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Overlap test ignoring z, used to reject BSP subtrees against a
    /// light's horizontal extent.
    #[inline]
    pub fn overlaps_2d(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    #[inline]
    pub fn touches_sphere(&self, center: Vec3, radius: f32) -> bool {
        let mut dsq = 0.0f32;
        for (lo, hi, c) in [
            (self.min.x, self.max.x, center.x),
            (self.min.y, self.max.y, center.y),
            (self.min.z, self.max.z, center.z),
        ] {
            if c < lo {
                dsq += (lo - c) * (lo - c);
            } else if c > hi {
                dsq += (c - hi) * (c - hi);
            }
        }
        dsq <= radius * radius
    }

    pub fn from_sphere(center: Vec3, radius: f32) -> Aabb {
        Aabb::new(
            Vec3::new(center.x - radius, center.y - radius, center.z - radius),
            Vec3::new(center.x + radius, center.y + radius, center.z + radius),
        )
    }
}

/// View frustum as a set of inward-facing planes.
#[derive(Clone, Debug, Default)]
pub struct Frustum {
    planes: [Plane; 5],
    count: usize,
}

impl Frustum {
    /// Build from a camera basis. `fov_x`/`fov_y` are full angles in radians.
    pub fn from_camera(
        origin: Vec3,
        forward: Vec3,
        right: Vec3,
        up: Vec3,
        fov_x: f32,
        fov_y: f32,
    ) -> Frustum {
        let hx = fov_x * 0.5;
        let hy = fov_y * 0.5;
        let mk = |normal: Vec3| Plane::new(normal, normal.dot(origin));
        let planes = [
            // near
            mk(forward),
            // left/right: rotate forward around up by half fov
            mk((forward * hx.sin() + right * hx.cos()).normalized()),
            mk((forward * hx.sin() - right * hx.cos()).normalized()),
            // bottom/top
            mk((forward * hy.sin() + up * hy.cos()).normalized()),
            mk((forward * hy.sin() - up * hy.cos()).normalized()),
        ];
        Frustum { planes, count: 5 }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.count > 0
    }

    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes[..self.count]
            .iter()
            .all(|pl| pl.point_dist(center) >= -radius)
    }

    /// Conservative box test: rejects only boxes fully behind some plane.
    pub fn intersects_box(&self, bb: &Aabb) -> bool {
        self.planes[..self.count]
            .iter()
            .all(|pl| pl.box_side(bb) != PlaneSide::Back)
    }
}

/// Integer screen-space rectangle, half-open on the right/bottom edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClipRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl ClipRect {
    #[inline]
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    #[inline]
    pub fn width(&self) -> i32 {
        (self.x1 - self.x0).max(0)
    }

    #[inline]
    pub fn height(&self) -> i32 {
        (self.y1 - self.y0).max(0)
    }

    #[inline]
    pub fn intersect(&self, other: &ClipRect) -> ClipRect {
        ClipRect::new(
            self.x0.max(other.x0),
            self.y0.max(other.y0),
            self.x1.min(other.x1),
            self.y1.min(other.y1),
        )
    }

    #[inline]
    pub fn union(&self, other: &ClipRect) -> ClipRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        ClipRect::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }
}

/// 8-bit RGB triple shared by light colors and lightmap texels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[inline]
    pub fn is_white(&self) -> bool {
        *self == Rgb::WHITE
    }
}

/// Round and clamp an accumulated light value to a byte.
#[inline]
pub fn clamp_to_byte(v: f32) -> u8 {
    let t = (v + 0.5) as i32;
    t.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plane_box_sides() {
        let pl = Plane::new(Vec3::new(0.0, 0.0, 1.0), 10.0);
        let above = Aabb::new(Vec3::new(0.0, 0.0, 11.0), Vec3::new(1.0, 1.0, 12.0));
        let below = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 9.0));
        let across = Aabb::new(Vec3::new(0.0, 0.0, 9.0), Vec3::new(1.0, 1.0, 11.0));
        assert_eq!(pl.box_side(&above), PlaneSide::Front);
        assert_eq!(pl.box_side(&below), PlaneSide::Back);
        assert_eq!(pl.box_side(&across), PlaneSide::Crossing);
    }

    #[test]
    fn empty_aabb_union_is_identity() {
        let mut bb = Aabb::EMPTY;
        let other = Aabb::new(Vec3::new(-1.0, -2.0, -3.0), Vec3::new(4.0, 5.0, 6.0));
        bb.union(&other);
        assert_eq!(bb, other);
    }

    #[test]
    fn cliprect_union_and_intersect() {
        let a = ClipRect::new(0, 0, 10, 10);
        let b = ClipRect::new(5, 5, 20, 20);
        assert_eq!(a.intersect(&b), ClipRect::new(5, 5, 10, 10));
        assert_eq!(a.union(&b), ClipRect::new(0, 0, 20, 20));
        let gap = ClipRect::new(30, 30, 40, 40);
        assert!(a.intersect(&gap).is_empty());
    }

    #[test]
    fn frustum_accepts_forward_sphere() {
        let fr = Frustum::from_camera(
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::UP,
            std::f32::consts::FRAC_PI_2,
            std::f32::consts::FRAC_PI_2,
        );
        assert!(fr.contains_sphere(Vec3::new(100.0, 0.0, 0.0), 1.0));
        assert!(!fr.contains_sphere(Vec3::new(-100.0, 0.0, 0.0), 1.0));
    }

    proptest! {
        #[test]
        fn sub_then_add_roundtrips(a in any::<Vec3>(), b in any::<Vec3>()) {
            prop_assume!(a.is_finite() && b.is_finite());
            prop_assume!(a.length() < 1e6 && b.length() < 1e6);
            let c = a + b - b;
            prop_assert!((c - a).length() <= 1e-2 * (1.0 + a.length()));
        }

        #[test]
        fn union_contains_both(mut a in any::<Aabb>(), b in any::<Aabb>()) {
            prop_assume!(!a.is_empty() && !b.is_empty());
            prop_assume!(a.min.is_finite() && a.max.is_finite());
            prop_assume!(b.min.is_finite() && b.max.is_finite());
            a.union(&b);
            prop_assert!(a.contains(b.min) && a.contains(b.max));
        }

        #[test]
        fn clamp_to_byte_in_range(v in -1e6f32..1e6f32) {
            let b = clamp_to_byte(v);
            prop_assert!(b == 0 || b == 255 || (v > -1.0 && v < 256.0));
        }
    }
}
