//! Error types for the tracing core.
//!
//! Only precondition violations surface as errors (fixed capacities, 16 bit
//! id ranges, traversal stack depth). Degenerate geometry such as near
//! zero-area triangles or parallel rays is handled locally as a miss and is
//! never reported through this type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A fixed-capacity arena is full. Capacities are set once at scene
    /// init and never grow.
    #[error("Capacity exceeded for {what} (capacity: {capacity})")]
    CapacityExceeded { what: &'static str, capacity: usize },

    /// Ids and BVH child indices are packed into 16 bit fields.
    #[error("Id range exceeded for {0}")]
    IdRangeExceeded(&'static str),

    /// The fixed traversal stack was exhausted. Truncating traversal would
    /// silently drop geometry, so this aborts the query instead.
    #[error("Traversal stack overflow (depth {0})")]
    TraversalStackOverflow(usize),

    /// Mesh id does not reference an attached mesh.
    #[error("Invalid mesh id: {0}")]
    InvalidMeshId(u16),

    /// Instance id does not reference a created instance.
    #[error("Invalid instance id: {0}")]
    InvalidInstanceId(u16),

    /// Material id does not reference an added material.
    #[error("Invalid material id: {0}")]
    InvalidMaterialId(u16),

    /// Camera id does not reference a camera slot.
    #[error("Invalid camera id: {0}")]
    InvalidCameraId(u16),

    /// `Scene::finalize` sized the triangle and BLAS buffers; meshes must
    /// all be attached before that.
    #[error("Scene is already finalized, meshes cannot be attached anymore")]
    AlreadyFinalized,

    /// Scene operations that need the triangle/BLAS buffers were called
    /// before `Scene::finalize`.
    #[error("Scene is not finalized, attach all meshes and call finalize first")]
    NotFinalized,
}

pub type Result<T> = std::result::Result<T, Error>;
