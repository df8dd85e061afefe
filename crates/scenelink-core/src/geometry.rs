//! Minimal vector and bounding-box math in model space

use serde::{Deserialize, Serialize};

/// Point or direction in model/world space
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance_squared(self, other: Self) -> f64 {
        let d = self - other;
        d.dot(d)
    }

    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    pub fn scale(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Unit vector in the same direction, or `None` for a zero-length vector
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        (len > f64::EPSILON).then(|| self.scale(1.0 / len))
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

/// Axis-aligned bounding box, used for camera fitting and overlay anchors
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// The empty box: union identity, contains nothing
    pub fn empty() -> Self {
        Self {
            min: Vec3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Vec3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Build from the `{min: [..], max: [..]}` arrays the resource API returns
    pub fn from_arrays(min: [f64; 3], max: [f64; 3]) -> Self {
        Self::new(Vec3::from_array(min), Vec3::from_array(max))
    }

    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y || self.max.z < self.min.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max).scale(0.5)
    }

    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

/// Row-major affine 4×4 transform, as carried by 360° collections and
/// annotation regions
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transform(pub [f64; 16]);

impl Transform {
    pub const IDENTITY: Transform = Transform([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// `None` unless `values` holds exactly 16 elements
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        <[f64; 16]>::try_from(values).ok().map(Self)
    }

    pub fn translation(offset: Vec3) -> Self {
        let mut m = Self::IDENTITY.0;
        m[3] = offset.x;
        m[7] = offset.y;
        m[11] = offset.z;
        Self(m)
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let m = &self.0;
        Vec3::new(
            m[0] * p.x + m[1] * p.y + m[2] * p.z + m[3],
            m[4] * p.x + m[5] * p.y + m[6] * p.z + m[7],
            m[8] * p.x + m[9] * p.y + m[10] * p.z + m[11],
        )
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Camera pose: eye position and look-at target
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraState {
    pub position: Vec3,
    pub target: Vec3,
}

impl CameraState {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self { position, target }
    }

    /// Pose looking at `bbox` from a distance of `radius_factor` times its half-diagonal
    pub fn fit(bbox: &BoundingBox, radius_factor: f64) -> Self {
        let target = bbox.center();
        let radius = (bbox.size().length() * 0.5).max(f64::EPSILON) * radius_factor;
        let dir = Vec3::new(1.0, 1.0, 1.0).scale(1.0 / 3f64.sqrt());
        Self::new(target + dir.scale(radius), target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_points() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(Transform::IDENTITY.transform_point(p), p);
        assert_eq!(
            Transform::translation(Vec3::new(10.0, 0.0, -1.0)).transform_point(p),
            Vec3::new(11.0, 2.0, 2.0)
        );
        assert!(Transform::from_slice(&[1.0; 12]).is_none());

        let json = serde_json::to_string(&Transform::IDENTITY).unwrap();
        assert!(json.starts_with("[1.0,0.0,0.0,0.0,"));
        let back: Transform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Transform::IDENTITY);
    }

    #[test]
    fn test_vec3_ops() {
        let a = Vec3::new(1.0, 2.0, -1.0);
        let b = Vec3::new(0.5, -2.0, 3.0);
        assert_eq!(a + b, Vec3::new(1.5, 0.0, 2.0));
        assert_eq!(a - b, Vec3::new(0.5, 4.0, -4.0));
        assert_eq!(a.dot(b), -6.5);
        assert_eq!(Vec3::new(3.0, 4.0, 0.0).length(), 5.0);
        assert_eq!(
            Vec3::new(1.0, 0.0, 0.0).cross(Vec3::new(0.0, 1.0, 0.0)),
            Vec3::new(0.0, 0.0, 1.0)
        );
        assert_eq!(Vec3::ZERO.normalized(), None);
    }

    #[test]
    fn test_bounding_box_center_and_union() {
        let a = BoundingBox::from_arrays([0.0, 0.0, 0.0], [2.0, 2.0, 2.0]);
        let b = BoundingBox::from_arrays([1.0, -1.0, 0.0], [4.0, 1.0, 1.0]);
        assert_eq!(a.center(), Vec3::new(1.0, 1.0, 1.0));

        let u = a.union(&b);
        assert_eq!(u.min, Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(u.max, Vec3::new(4.0, 2.0, 2.0));
    }

    #[test]
    fn test_empty_box_is_union_identity() {
        let empty = BoundingBox::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.size(), Vec3::ZERO);

        let a = BoundingBox::from_arrays([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]);
        assert_eq!(empty.union(&a), a);
        assert!(a.contains(Vec3::ZERO));
        assert!(!a.contains(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_camera_fit_looks_at_center() {
        let bbox = BoundingBox::from_arrays([0.0, 0.0, 0.0], [2.0, 2.0, 2.0]);
        let camera = CameraState::fit(&bbox, 3.0);
        assert_eq!(camera.target, Vec3::new(1.0, 1.0, 1.0));
        let distance = camera.position.distance(camera.target);
        assert!((distance - 3.0 * 3f64.sqrt()).abs() < 1e-9);
    }
}
