use super::tri::Triangle;

/// Owned triangle array plus scene bookkeeping. Created once at load time
/// and never resized afterwards.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub tris: Vec<Triangle>,
    /// Set at attach time; meshes with emissive materials get their
    /// triangles mirrored into the light triangle table.
    pub is_emissive: bool,
    /// Offset into the scene's global triangle buffer. The mesh's BLAS
    /// nodes start at 2 * ofs in the BLAS node buffer.
    pub ofs: u32,
}

impl Mesh {
    pub fn new(tris: Vec<Triangle>) -> Self {
        Self {
            tris,
            is_emissive: false,
            ofs: 0,
        }
    }

    pub fn tri_cnt(&self) -> u32 {
        self.tris.len() as u32
    }
}
