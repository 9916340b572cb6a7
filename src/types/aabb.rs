use na::{Point3, Vector3};

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    /// Inverted-empty box: growing it by any point yields that point.
    pub fn new() -> Self {
        Self {
            min: Point3::new(f32::MAX, f32::MAX, f32::MAX),
            max: Point3::new(-f32::MAX, -f32::MAX, -f32::MAX),
        }
    }

    pub fn from_min_max(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self { min, max }
    }

    pub fn grow(&mut self, p: Point3<f32>) {
        self.min = Point3::new(
            self.min.x.min(p.x),
            self.min.y.min(p.y),
            self.min.z.min(p.z),
        );
        self.max = Point3::new(
            self.max.x.max(p.x),
            self.max.y.max(p.y),
            self.max.z.max(p.z),
        );
    }

    pub fn combine(a: &Self, b: &Self) -> Self {
        Self {
            min: Point3::new(
                a.min.x.min(b.min.x),
                a.min.y.min(b.min.y),
                a.min.z.min(b.min.z),
            ),
            max: Point3::new(
                a.max.x.max(b.max.x),
                a.max.y.max(b.max.y),
                a.max.z.max(b.max.z),
            ),
        }
    }

    /// Pad equally in all directions, e.g. to avoid zero-thickness boxes
    /// for axis-aligned triangles.
    pub fn pad(&mut self, v: f32) {
        let d = Vector3::new(v, v, v);
        self.min -= d;
        self.max += d;
    }

    pub fn extent(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Half of the surface area. Sufficient as a relative SAH-style cost.
    pub fn half_area(&self) -> f32 {
        let d = self.extent();
        d.x * d.y + d.y * d.z + d.z * d.x
    }

    pub fn area(&self) -> f32 {
        2.0 * self.half_area()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grow_from_empty() {
        let mut b = Aabb::new();
        b.grow(Point3::new(1.0, -2.0, 3.0));
        b.grow(Point3::new(-1.0, 2.0, 0.0));
        assert_eq!(b.min, Point3::new(-1.0, -2.0, 0.0));
        assert_eq!(b.max, Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_combine_covers_both() {
        let a = Aabb::from_min_max(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let b = Aabb::from_min_max(Point3::new(-2.0, 0.5, 0.0), Point3::new(0.5, 3.0, 1.0));
        let c = Aabb::combine(&a, &b);
        assert_eq!(c.min, Point3::new(-2.0, 0.0, 0.0));
        assert_eq!(c.max, Point3::new(1.0, 3.0, 1.0));
    }

    #[test]
    fn test_combine_with_empty_is_identity() {
        let a = Aabb::from_min_max(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 2.0, 3.0));
        let c = Aabb::combine(&a, &Aabb::new());
        assert_eq!(c.min, a.min);
        assert_eq!(c.max, a.max);
    }

    #[test]
    fn test_area() {
        let a = Aabb::from_min_max(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 2.0, 3.0));
        assert_eq!(a.half_area(), 1.0 * 2.0 + 2.0 * 3.0 + 3.0 * 1.0);
        assert_eq!(a.area(), 2.0 * a.half_area());
    }

    #[test]
    fn test_pad() {
        let mut a = Aabb::from_min_max(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        a.pad(0.5);
        assert_eq!(a.min, Point3::new(-0.5, -0.5, -0.5));
        assert_eq!(a.max, Point3::new(1.5, 1.5, 1.5));
    }
}
