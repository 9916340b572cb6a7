use na::{Point3, Vector3};

/// Data-only camera record. Viewport math lives in the renderer; the
/// scene just owns these and tracks which one is active.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub eye: Point3<f32>,
    pub tgt: Point3<f32>,
    pub vert_fov: f32,
}

impl Camera {
    pub fn new(eye: Point3<f32>, tgt: Point3<f32>, vert_fov: f32) -> Self {
        Self { eye, tgt, vert_fov }
    }

    pub fn forward(&self) -> Vector3<f32> {
        (self.tgt - self.eye).normalize()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Point3::new(0.0, 0.0, 10.0),
            tgt: Point3::origin(),
            vert_fov: 45.0,
        }
    }
}
