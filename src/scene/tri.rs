use na::{Matrix4, Point3, Vector3};

use crate::types::aabb::Aabb;

pub const MTL_ID_MASK: u32 = 0xffff;

/// Mesh triangle. Immutable after mesh creation except for `ltri_id`,
/// which is written during light triangle (re)building only.
#[derive(Clone, Copy, Debug)]
pub struct Triangle {
    pub v0: Point3<f32>,
    pub v1: Point3<f32>,
    pub v2: Point3<f32>,
    pub n0: Vector3<f32>,
    pub n1: Vector3<f32>,
    pub n2: Vector3<f32>,
    /// Low 16 bits are the material id.
    pub mtl: u32,
    /// Back-link into the scene's light triangle table. Valid only while
    /// the owning instance is emissive.
    pub ltri_id: u32,
}

impl Triangle {
    pub fn new(v: [Point3<f32>; 3], n: Option<[Vector3<f32>; 3]>, mtl_id: u16) -> Self {
        let face = face_normal(&v[0], &v[1], &v[2]);
        let n = n.unwrap_or([face, face, face]);
        Self {
            v0: v[0],
            v1: v[1],
            v2: v[2],
            n0: n[0],
            n1: n[1],
            n2: n[2],
            mtl: mtl_id as u32,
            ltri_id: 0,
        }
    }

    pub fn mtl_id(&self) -> u16 {
        (self.mtl & MTL_ID_MASK) as u16
    }

    pub fn bounds(&self) -> Aabb {
        let mut b = Aabb::new();
        b.grow(self.v0);
        b.grow(self.v1);
        b.grow(self.v2);
        b
    }
}

pub fn face_normal(v0: &Point3<f32>, v1: &Point3<f32>, v2: &Point3<f32>) -> Vector3<f32> {
    (v1 - v0).cross(&(v2 - v0)).normalize()
}

/// Heron's formula.
pub fn tri_area(v0: &Point3<f32>, v1: &Point3<f32>, v2: &Point3<f32>) -> f32 {
    let a = (v2 - v0).norm();
    let b = (v1 - v0).norm();
    let c = (v2 - v1).norm();
    let s = 0.5 * (a + b + c);
    (s * (s - a) * (s - b) * (s - c)).max(0.0).sqrt()
}

/// World-space copy of an emissive triangle used for light sampling.
/// Lives in a contiguous table owned by the scene; `tri_id` points back at
/// the source triangle within its mesh, `inst_id` at the owning instance.
#[derive(Clone, Copy, Debug)]
pub struct LightTri {
    pub v0: Point3<f32>,
    pub v1: Point3<f32>,
    pub v2: Point3<f32>,
    pub nrm: Vector3<f32>,
    pub area: f32,
    pub power: f32,
    pub emission: Vector3<f32>,
    pub tri_id: u32,
    pub inst_id: u32,
}

impl LightTri {
    pub fn build(
        t: &Triangle,
        tri_id: u32,
        inst_id: u32,
        transform: &Matrix4<f32>,
        inv_transform: &Matrix4<f32>,
        emission: Vector3<f32>,
    ) -> Self {
        let mut lt = Self {
            v0: Point3::origin(),
            v1: Point3::origin(),
            v2: Point3::origin(),
            nrm: Vector3::zeros(),
            area: 0.0,
            power: 0.0,
            emission,
            tri_id,
            inst_id,
        };
        lt.update(t, transform, inv_transform);
        lt
    }

    /// Refresh world-space data after a transform change. Emission is left
    /// untouched; material changes go through a full rebuild instead.
    pub fn update(&mut self, t: &Triangle, transform: &Matrix4<f32>, inv_transform: &Matrix4<f32>) {
        self.v0 = transform.transform_point(&t.v0);
        self.v1 = transform.transform_point(&t.v1);
        self.v2 = transform.transform_point(&t.v2);

        // Assumes emissive triangles carry face normals, i.e. n0 == n1 == n2
        self.nrm = inv_transform
            .transpose()
            .transform_vector(&t.n0)
            .normalize();

        self.area = tri_area(&self.v0, &self.v1, &self.v2);
        self.power = self.area * (self.emission.x + self.emission.y + self.emission.z);
    }

    /// Summed emission, the importance term the light tree clusters by.
    pub fn intensity(&self) -> f32 {
        self.emission.x + self.emission.y + self.emission.z
    }

    pub fn bounds(&self) -> Aabb {
        let mut b = Aabb::new();
        b.grow(self.v0);
        b.grow(self.v1);
        b.grow(self.v2);
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tri_area() {
        // Right triangle with legs 3 and 4
        let a = tri_area(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(3.0, 0.0, 0.0),
            &Point3::new(0.0, 4.0, 0.0),
        );
        assert!((a - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_degenerate_tri_area_is_zero() {
        let a = tri_area(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(2.0, 0.0, 0.0),
        );
        assert!(a.abs() < 1e-4);
    }

    #[test]
    fn test_face_normal_fallback() {
        let t = Triangle::new(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            None,
            0,
        );
        assert!((t.n0 - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-6);
        assert_eq!(t.n0, t.n1);
        assert_eq!(t.n1, t.n2);
    }

    #[test]
    fn test_ltri_update_transforms_vertices() {
        let t = Triangle::new(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            None,
            0,
        );
        let m = Matrix4::new_translation(&Vector3::new(0.0, 5.0, 0.0));
        let inv = m.try_inverse().unwrap();
        let lt = LightTri::build(&t, 0, 3, &m, &inv, Vector3::new(2.0, 2.0, 2.0));

        assert_eq!(lt.v0, Point3::new(0.0, 5.0, 0.0));
        assert!((lt.area - 0.5).abs() < 1e-5);
        assert!((lt.power - 0.5 * 6.0).abs() < 1e-4);
        assert_eq!(lt.inst_id, 3);
        // Translation does not change the normal
        assert!((lt.nrm.y.abs() - 1.0).abs() < 1e-6);
    }
}
