//! Spatial acceleration and scene core for a real-time path tracer.
//!
//! The crate owns the CPU side of the render loop: meshes, materials and
//! instances live in fixed-capacity arenas inside [`scene::Scene`], a
//! two-level BVH (per-mesh BLAS, per-scene TLAS) accelerates ray queries,
//! and emissive triangles are mirrored into a light table with an
//! intensity-weighted tree for importance sampling. Mutations are cheap
//! flag flips; [`scene::Scene::prepare_render`] reconciles them once per
//! frame and reports what changed through dirty bits, so an upload layer
//! can copy exactly the buffers that moved.

extern crate nalgebra as na;

pub mod bvh;
pub mod camera;
pub mod error;
pub mod intersect;
pub mod lighttree;
pub mod scene;
pub mod types;

pub use error::{Error, Result};
