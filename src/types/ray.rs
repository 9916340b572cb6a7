use na::{Matrix4, Point3, Vector3};

#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Vector3<f32>,
    /// Componentwise reciprocal of `direction`, cached for slab tests.
    /// Infinite components for axis-parallel rays are fine there.
    pub inv_direction: Vector3<f32>,
}

impl Ray {
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Self {
        Self {
            origin,
            direction,
            inv_direction: Vector3::new(1.0 / direction.x, 1.0 / direction.y, 1.0 / direction.z),
        }
    }

    pub fn at(&self, t: f32) -> Point3<f32> {
        self.origin + t * self.direction
    }

    /// Transform into another space (instance local space via the inverse
    /// transform). The direction is intentionally not normalized so that t
    /// values remain comparable with world space.
    pub fn transformed(&self, m: &Matrix4<f32>) -> Self {
        let origin = m.transform_point(&self.origin);
        let direction = m.transform_vector(&self.direction);
        Self::new(origin, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at() {
        let r = Ray::new(Point3::new(0.0, 0.0, -5.0), Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(r.at(5.0), Point3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_inv_direction() {
        let r = Ray::new(Point3::origin(), Vector3::new(2.0, -4.0, 1.0));
        assert_eq!(r.inv_direction, Vector3::new(0.5, -0.25, 1.0));
    }

    #[test]
    fn test_transform_keeps_t_scale() {
        // Scaling space by 2 must scale the direction as well, so a point
        // reached at t in world space is reached at the same t locally.
        let m = Matrix4::new_scaling(2.0);
        let r = Ray::new(Point3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0));
        let tr = r.transformed(&m);
        assert_eq!(tr.origin, Point3::new(2.0, 0.0, 0.0));
        assert_eq!(tr.direction, Vector3::new(0.0, 2.0, 0.0));
    }
}
