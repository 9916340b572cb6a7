//! Mutable scene graph and its incremental update protocol.
//!
//! Mutations only flip per-instance state bits; `prepare_render` runs a
//! single reconciliation pass that collapses any number of per-frame
//! mutations into at most one TLAS rebuild and one contiguous light
//! triangle rebuild.

pub mod inst;
pub mod mesh;
pub mod mtl;
pub mod tri;

use na::{Matrix4, Point3, Vector3};
use rayon::prelude::*;

use crate::bvh::{build_blas, build_tlas, BvhNode};
use crate::camera::Camera;
use crate::error::{Error, Result};
use crate::intersect::{intersect_tlas, Hit, EPSILON};
use crate::types::aabb::Aabb;
use crate::types::ray::Ray;

use inst::{Inst, InstInfo, InstState, Shape, INST_DATA_MASK, MTL_OVERRIDE_BIT, SHAPE_TYPE_BIT};
use mesh::Mesh;
use mtl::Material;
use tri::LightTri;

/// Finite TLAS footprint for the otherwise infinite plane shape.
const PLANE_EXTENT: f32 = 1000.0;

/// Dirty bits consumed by the external render upload step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dirty(u32);

impl Dirty {
    pub const CFG: u32 = 1;
    pub const CAM: u32 = 2;
    pub const MTL: u32 = 4;
    pub const TRI: u32 = 8;
    pub const LTRI: u32 = 16;
    pub const BLAS: u32 = 32;
    pub const INST: u32 = 64;

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn set(&mut self, bits: u32) {
        self.0 |= bits;
    }

    fn clear(&mut self, bits: u32) {
        self.0 &= !bits;
    }
}

/// The scene: fixed-capacity arenas for meshes, materials, instances,
/// light triangles and both BVH levels, plus the dirty bookkeeping that
/// drives incremental rebuilds.
pub struct Scene {
    mtls: Vec<Material>,
    max_mtl_cnt: usize,

    meshes: Vec<Mesh>,
    max_mesh_cnt: usize,

    instances: Vec<Inst>,
    inst_info: Vec<InstInfo>,
    max_inst_cnt: usize,

    tlas_nodes: Vec<BvhNode>,
    tlas_node_cnt: usize,

    /// BLAS nodes of all meshes in one buffer; a mesh's nodes start at
    /// 2 * mesh.ofs.
    blas_nodes: Vec<BvhNode>,

    ltris: Vec<LightTri>,
    /// Per light triangle: source triangle index within its mesh.
    tri_ids: Vec<u32>,
    max_ltri_cnt: usize,

    cams: Vec<Camera>,
    active_cam: usize,

    bg_col: Vector3<f32>,

    dirty: Dirty,
    /// Next free offset in the global triangle buffer.
    curr_ofs: u32,
    finalized: bool,
}

impl Scene {
    pub fn new(
        max_mesh_cnt: usize,
        max_mtl_cnt: usize,
        max_cam_cnt: usize,
        max_inst_cnt: usize,
    ) -> Result<Self> {
        // TLAS children are 16 bit node indices, so a full tree of 2N-1
        // nodes limits N harder than the 16 bit instance id does
        if max_inst_cnt > 0x8000 {
            return Err(Error::IdRangeExceeded("instances"));
        }
        // Material ids are packed into 16 bits
        if max_mtl_cnt > 0x10000 {
            return Err(Error::IdRangeExceeded("materials"));
        }

        let mut dirty = Dirty::default();
        dirty.set(Dirty::CFG | Dirty::CAM);

        Ok(Self {
            mtls: Vec::with_capacity(max_mtl_cnt),
            max_mtl_cnt,
            meshes: Vec::with_capacity(max_mesh_cnt),
            max_mesh_cnt,
            instances: Vec::with_capacity(max_inst_cnt),
            inst_info: Vec::with_capacity(max_inst_cnt),
            max_inst_cnt,
            tlas_nodes: vec![BvhNode::leaf(&Aabb::new(), 0); 2 * max_inst_cnt],
            tlas_node_cnt: 0,
            blas_nodes: Vec::new(),
            ltris: Vec::new(),
            tri_ids: Vec::new(),
            max_ltri_cnt: 0,
            cams: vec![Camera::default(); max_cam_cnt.max(1)],
            active_cam: 0,
            bg_col: Vector3::zeros(),
            dirty,
            curr_ofs: 0,
            finalized: false,
        })
    }

    // --- materials ---

    pub fn add_material(&mut self, mtl: Material) -> Result<u16> {
        if self.mtls.len() == self.max_mtl_cnt {
            return Err(Error::CapacityExceeded {
                what: "materials",
                capacity: self.max_mtl_cnt,
            });
        }
        let id = self.mtls.len() as u16;
        self.mtls.push(mtl);
        self.dirty.set(Dirty::MTL);
        Ok(id)
    }

    /// Overwrite a material in place. Emissive status changes of already
    /// instanced materials must go through `update_instance_material` so
    /// the light triangle table gets reconciled.
    pub fn update_material(&mut self, mtl_id: u16, mtl: Material) -> Result<()> {
        let slot = self
            .mtls
            .get_mut(mtl_id as usize)
            .ok_or(Error::InvalidMaterialId(mtl_id))?;
        *slot = mtl;
        self.dirty.set(Dirty::MTL);
        Ok(())
    }

    pub fn material(&self, mtl_id: u16) -> Result<&Material> {
        self.mtls
            .get(mtl_id as usize)
            .ok_or(Error::InvalidMaterialId(mtl_id))
    }

    // --- meshes ---

    /// Attach a mesh before `finalize`. Returns its id; the mesh receives
    /// its offset into the global triangle buffer here.
    pub fn attach_mesh(&mut self, mut mesh: Mesh, is_emissive: bool) -> Result<u16> {
        // finalize sized the BLAS buffer, a later mesh would index past it
        if self.finalized {
            return Err(Error::AlreadyFinalized);
        }
        if self.meshes.len() == self.max_mesh_cnt {
            return Err(Error::CapacityExceeded {
                what: "meshes",
                capacity: self.max_mesh_cnt,
            });
        }
        // BLAS children are 16 bit node indices
        if mesh.tris.len() > 0x8000 {
            return Err(Error::IdRangeExceeded("mesh triangles"));
        }

        mesh.ofs = self.curr_ofs;
        self.curr_ofs += mesh.tri_cnt();
        mesh.is_emissive = is_emissive;

        self.dirty.set(Dirty::TRI);

        let id = self.meshes.len() as u16;
        self.meshes.push(mesh);
        Ok(id)
    }

    pub fn mesh(&self, mesh_id: u16) -> Result<&Mesh> {
        self.meshes
            .get(mesh_id as usize)
            .ok_or(Error::InvalidMeshId(mesh_id))
    }

    /// Allocate the light triangle table and the BLAS buffer, then build a
    /// BLAS per mesh. Call once after all meshes are attached.
    pub fn finalize(&mut self) {
        let max_tri_cnt: usize = self.meshes.iter().map(|m| m.tris.len()).sum();

        // Any triangle can end up in the light table through a material
        // override, so size for all of them
        self.max_ltri_cnt = max_tri_cnt;
        self.ltris = Vec::with_capacity(max_tri_cnt);
        self.tri_ids = Vec::with_capacity(max_tri_cnt);

        self.blas_nodes = vec![BvhNode::leaf(&Aabb::new(), 0); 2 * max_tri_cnt];

        // Meshes are independent, build their hierarchies in parallel
        let built: Vec<(u32, Vec<BvhNode>)> = self
            .meshes
            .par_iter()
            .filter(|m| !m.tris.is_empty())
            .map(|m| {
                let mut nodes = vec![BvhNode::leaf(&Aabb::new(), 0); 2 * m.tris.len()];
                build_blas(&mut nodes, &m.tris);
                (m.ofs, nodes)
            })
            .collect();

        for (ofs, nodes) in built {
            let base = 2 * ofs as usize;
            self.blas_nodes[base..base + nodes.len()].copy_from_slice(&nodes);
        }

        self.dirty.set(Dirty::BLAS);
        self.finalized = true;
    }

    // --- instances ---

    fn alloc_instance(&mut self) -> Result<u16> {
        if !self.finalized {
            return Err(Error::NotFinalized);
        }
        if self.instances.len() == self.max_inst_cnt {
            return Err(Error::CapacityExceeded {
                what: "instances",
                capacity: self.max_inst_cnt,
            });
        }
        Ok(self.instances.len() as u16)
    }

    /// Create an instance of an attached mesh. `mtl_id` of Some overrides
    /// the per-triangle materials of the whole mesh.
    pub fn add_instance(
        &mut self,
        mesh_id: u16,
        mtl_id: Option<u16>,
        flags: u32,
        transform: Matrix4<f32>,
    ) -> Result<u16> {
        let inst_id = self.alloc_instance()?;
        if mesh_id as usize >= self.meshes.len() {
            return Err(Error::InvalidMeshId(mesh_id));
        }
        if let Some(id) = mtl_id {
            if id as usize >= self.mtls.len() {
                return Err(Error::InvalidMaterialId(id));
            }
        }

        self.inst_info.push(InstInfo {
            transform: Matrix4::identity(),
            inv_transform: Matrix4::identity(),
            bounds: Aabb::new(),
            mesh_id,
            shape: None,
            ltri_ofs: 0,
            ltri_cnt: 0,
            state: InstState::default(),
        });

        self.instances.push(Inst {
            inv_transform: [0.0; 12],
            id: inst_id as u32,
            // Payload of mesh instances is the mesh id; the mesh carries
            // the triangle/BLAS offsets
            data: mesh_id as u32 & INST_DATA_MASK,
            flags,
        });

        self.update_transform(inst_id, transform)?;
        self.update_instance_material(inst_id, mtl_id)?;

        Ok(inst_id)
    }

    /// Create an analytic shape instance. Shapes have no per-triangle
    /// materials, so an override material is mandatory.
    pub fn add_shape_instance(
        &mut self,
        shape: Shape,
        mtl_id: u16,
        flags: u32,
        transform: Matrix4<f32>,
    ) -> Result<u16> {
        let inst_id = self.alloc_instance()?;
        if mtl_id as usize >= self.mtls.len() {
            return Err(Error::InvalidMaterialId(mtl_id));
        }

        self.inst_info.push(InstInfo {
            transform: Matrix4::identity(),
            inv_transform: Matrix4::identity(),
            bounds: Aabb::new(),
            mesh_id: 0,
            shape: Some(shape),
            ltri_ofs: 0,
            ltri_cnt: 0,
            state: InstState::default(),
        });

        self.instances.push(Inst {
            inv_transform: [0.0; 12],
            id: ((mtl_id as u32) << 16) | inst_id as u32,
            data: MTL_OVERRIDE_BIT | SHAPE_TYPE_BIT | (shape as u32),
            flags,
        });

        self.update_transform(inst_id, transform)?;
        // Shapes never contribute light triangles, but the material still
        // marks the instance for reconciliation
        self.inst_info[inst_id as usize].state.mark_material_dirty();

        Ok(inst_id)
    }

    /// Store a new transform and its inverse in the shadow record. The
    /// compact record and world bounds follow at the next prepare pass.
    pub fn update_transform(&mut self, inst_id: u16, transform: Matrix4<f32>) -> Result<()> {
        let info = self
            .inst_info
            .get_mut(inst_id as usize)
            .ok_or(Error::InvalidInstanceId(inst_id))?;

        info.transform = transform;
        info.inv_transform = transform.try_inverse().unwrap_or_else(|| {
            // Near-singular transforms are expected in normal scenes
            // (zero scale); recover with identity instead of failing
            log::warn!(
                "Transform of instance {} is not invertible, using identity",
                inst_id
            );
            Matrix4::identity()
        });
        info.state.mark_transform_dirty();
        Ok(())
    }

    /// Set or clear the instance's material override and re-derive its
    /// emissive status. The previous status is captured so the prepare
    /// pass can see emissive -> non-emissive transitions.
    pub fn update_instance_material(&mut self, inst_id: u16, mtl_id: Option<u16>) -> Result<()> {
        let i = inst_id as usize;
        if i >= self.instances.len() {
            return Err(Error::InvalidInstanceId(inst_id));
        }
        if let Some(id) = mtl_id {
            if id as usize >= self.mtls.len() {
                return Err(Error::InvalidMaterialId(id));
            }
        }

        self.inst_info[i].state.capture_was_emissive();

        let is_shape = self.instances[i].is_shape();
        let emissive = match mtl_id {
            Some(id) => {
                self.instances[i].id = ((id as u32) << 16) | (inst_id as u32);
                self.instances[i].data |= MTL_OVERRIDE_BIT;
                self.mtls[id as usize].is_emissive()
            }
            None => {
                if is_shape {
                    // A shape instance cannot fall back to mesh materials
                    return Err(Error::InvalidInstanceId(inst_id));
                }
                self.instances[i].id = inst_id as u32;
                self.instances[i].data &= !MTL_OVERRIDE_BIT;
                let mesh_id = self.inst_info[i].mesh_id;
                self.meshes[mesh_id as usize].is_emissive
            }
        };

        // Only mesh instances feed the light triangle table
        self.inst_info[i].state.set_emissive(emissive && !is_shape);
        self.inst_info[i].state.mark_material_dirty();
        Ok(())
    }

    /// Replace the opaque GPU flags payload.
    pub fn update_flags(&mut self, inst_id: u16, flags: u32) -> Result<()> {
        let inst = self
            .instances
            .get_mut(inst_id as usize)
            .ok_or(Error::InvalidInstanceId(inst_id))?;
        inst.flags = flags;
        self.dirty.set(Dirty::INST);
        Ok(())
    }

    /// "Removal": instances are a dense array, disabling excludes the
    /// instance from the TLAS and empties its light range instead.
    pub fn disable_instance(&mut self, inst_id: u16) -> Result<()> {
        let info = self
            .inst_info
            .get_mut(inst_id as usize)
            .ok_or(Error::InvalidInstanceId(inst_id))?;
        info.state.disable();
        Ok(())
    }

    pub fn enable_instance(&mut self, inst_id: u16) -> Result<()> {
        let info = self
            .inst_info
            .get_mut(inst_id as usize)
            .ok_or(Error::InvalidInstanceId(inst_id))?;
        info.state.enable();
        Ok(())
    }

    pub fn instance_state(&self, inst_id: u16) -> Result<InstState> {
        self.inst_info
            .get(inst_id as usize)
            .map(|info| info.state)
            .ok_or(Error::InvalidInstanceId(inst_id))
    }

    pub fn instance_info(&self, inst_id: u16) -> Result<&InstInfo> {
        self.inst_info
            .get(inst_id as usize)
            .ok_or(Error::InvalidInstanceId(inst_id))
    }

    // --- cameras ---

    pub fn set_active_camera(&mut self, cam_id: u16) -> Result<()> {
        if cam_id as usize >= self.cams.len() {
            return Err(Error::InvalidCameraId(cam_id));
        }
        self.active_cam = cam_id as usize;
        self.dirty.set(Dirty::CAM);
        Ok(())
    }

    pub fn active_camera(&self) -> &Camera {
        &self.cams[self.active_cam]
    }

    pub fn update_camera(&mut self, cam_id: u16, cam: Camera) -> Result<()> {
        let slot = self
            .cams
            .get_mut(cam_id as usize)
            .ok_or(Error::InvalidCameraId(cam_id))?;
        *slot = cam;
        self.dirty.set(Dirty::CAM);
        Ok(())
    }

    // --- config ---

    pub fn set_bg_col(&mut self, col: Vector3<f32>) {
        self.bg_col = col;
        self.dirty.set(Dirty::CFG);
    }

    pub fn bg_col(&self) -> Vector3<f32> {
        self.bg_col
    }

    // --- dirty bookkeeping ---

    pub fn dirty(&self) -> Dirty {
        self.dirty
    }

    pub fn clear_dirty(&mut self, bits: u32) {
        self.dirty.clear(bits);
    }

    // --- reconciliation ---

    /// Reconcile all per-instance dirty state in one pass. Call once per
    /// frame after all mutations and before any upload or query.
    ///
    /// Light triangle ranges are contiguous in instance order, so the
    /// first material-dirty instance that is (or was) emissive forces a
    /// rebuild of every emissive instance's range from there on; earlier
    /// ranges are untouched. Transform changes of emissive instances that
    /// are not caught by that rebuild update their ranges in place.
    pub fn prepare_render(&mut self) -> Result<()> {
        let mut rebuild_tlas = false;
        let mut rebuild_ltris = false;
        let mut ltri_cnt: u32 = 0;

        for i in 0..self.instances.len() {
            let state = self.inst_info[i].state;
            let disabled = state.is_disabled();
            let emissive = state.is_emissive();

            // Reset light ranges of disabled instances
            if disabled {
                self.inst_info[i].ltri_ofs = 0;
                self.inst_info[i].ltri_cnt = 0;
            }

            // First dirty emissive (or previously emissive) instance:
            // every range from here on is stale
            if !rebuild_ltris
                && state.is_material_dirty()
                && (emissive || state.was_emissive())
            {
                rebuild_ltris = true;
                self.ltris.truncate(ltri_cnt as usize);
                self.tri_ids.truncate(ltri_cnt as usize);
                self.dirty.set(Dirty::LTRI);
            }

            if rebuild_ltris && !disabled {
                if emissive {
                    self.build_ltris_for(i, ltri_cnt)?;
                } else {
                    // Covers instances that just turned non-emissive
                    self.inst_info[i].ltri_ofs = 0;
                    self.inst_info[i].ltri_cnt = 0;
                }
            }

            if self.inst_info[i].state.is_transform_dirty() {
                if !disabled {
                    if !rebuild_ltris && emissive {
                        self.update_ltris_for(i);
                    }

                    // Project the shadow record's inverse transform into
                    // the compact record
                    let inv = self.inst_info[i].inv_transform;
                    self.instances[i].set_inv_transform(&inv);

                    // Conservative world bounds: the 8 corners of the
                    // local box through the new transform
                    let local = self.local_bounds(i);
                    let transform = self.inst_info[i].transform;
                    let mut bounds = Aabb::new();
                    for cx in [local.min.x, local.max.x] {
                        for cy in [local.min.y, local.max.y] {
                            for cz in [local.min.z, local.max.z] {
                                bounds
                                    .grow(transform.transform_point(&Point3::new(cx, cy, cz)));
                            }
                        }
                    }
                    self.inst_info[i].bounds = bounds;
                }

                self.inst_info[i].state.clear_transform_dirty();
                rebuild_tlas = true;
            }

            self.inst_info[i].state.clear_frame_transients();
            ltri_cnt += self.inst_info[i].ltri_cnt;
        }

        if rebuild_ltris {
            // Trim stale entries past the last rebuilt range
            self.ltris.truncate(ltri_cnt as usize);
            self.tri_ids.truncate(ltri_cnt as usize);
        }

        if rebuild_tlas {
            self.tlas_node_cnt = build_tlas(&mut self.tlas_nodes, &self.inst_info);
            self.dirty.set(Dirty::INST);
        }

        Ok(())
    }

    /// Local-space bounds an instance's world box derives from: the BLAS
    /// root box for meshes, the unit cube for box/sphere shapes, a large
    /// finite footprint for the plane.
    fn local_bounds(&self, i: usize) -> Aabb {
        match self.inst_info[i].shape {
            Some(Shape::Plane) => Aabb::from_min_max(
                Point3::new(-PLANE_EXTENT, -EPSILON, -PLANE_EXTENT),
                Point3::new(PLANE_EXTENT, EPSILON, PLANE_EXTENT),
            ),
            Some(Shape::Box) | Some(Shape::Sphere) => Aabb::from_min_max(
                Point3::new(-1.0, -1.0, -1.0),
                Point3::new(1.0, 1.0, 1.0),
            ),
            None => {
                let mesh = &self.meshes[self.inst_info[i].mesh_id as usize];
                self.blas_nodes[2 * mesh.ofs as usize].bounds()
            }
        }
    }

    /// Rebuild an instance's light triangles at `ltri_ofs`. With an
    /// active material override every triangle emits; otherwise only the
    /// triangles whose own material is emissive.
    fn build_ltris_for(&mut self, i: usize, ltri_ofs: u32) -> Result<()> {
        debug_assert_eq!(self.ltris.len(), ltri_ofs as usize);

        let inst = self.instances[i];
        let info = self.inst_info[i];
        let mesh = &mut self.meshes[info.mesh_id as usize];

        let override_emission = if inst.has_mtl_override() {
            Some(self.mtls[inst.mtl_override_id() as usize].emission())
        } else {
            None
        };

        let mut cnt: u32 = 0;
        for (ti, t) in mesh.tris.iter_mut().enumerate() {
            let emission = match override_emission {
                Some(e) => e,
                None => {
                    let mtl = &self.mtls[t.mtl_id() as usize];
                    if !mtl.is_emissive() {
                        continue;
                    }
                    mtl.emission()
                }
            };

            if self.ltris.len() == self.max_ltri_cnt {
                return Err(Error::CapacityExceeded {
                    what: "light triangles",
                    capacity: self.max_ltri_cnt,
                });
            }

            let ltri_id = ltri_ofs + cnt;
            self.ltris.push(LightTri::build(
                t,
                ti as u32,
                i as u32,
                &info.transform,
                &info.inv_transform,
                emission,
            ));
            self.tri_ids.push(ti as u32);

            // Emissive triangles link their light entry; light meshes
            // must not be instanced twice for this to hold
            t.ltri_id = ltri_id;
            cnt += 1;
        }

        let info = &mut self.inst_info[i];
        info.ltri_ofs = ltri_ofs;
        info.ltri_cnt = cnt;

        // Triangles carry modified ltri back-links
        self.dirty.set(Dirty::TRI | Dirty::LTRI);
        Ok(())
    }

    /// Re-transform an instance's existing light triangles in place after
    /// a transform-only change.
    fn update_ltris_for(&mut self, i: usize) {
        let info = self.inst_info[i];
        let mesh = &self.meshes[info.mesh_id as usize];

        for k in 0..info.ltri_cnt {
            let ltri_id = (info.ltri_ofs + k) as usize;
            let tri_id = self.tri_ids[ltri_id] as usize;
            self.ltris[ltri_id].update(&mesh.tris[tri_id], &info.transform, &info.inv_transform);
        }

        self.dirty.set(Dirty::LTRI);
    }

    // --- queries & views ---

    /// Resolve the closest intersection along the ray. Pure and reentrant
    /// on a prepared scene snapshot.
    pub fn intersect(&self, ray: &Ray) -> Result<Hit> {
        let mut h = Hit::none();
        intersect_tlas(
            ray,
            &self.tlas_nodes,
            self.tlas_node_cnt,
            &self.instances,
            &self.meshes,
            &self.blas_nodes,
            &mut h,
        )?;
        Ok(h)
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn instances(&self) -> &[Inst] {
        &self.instances
    }

    pub fn ltris(&self) -> &[LightTri] {
        &self.ltris
    }

    pub fn ltri_cnt(&self) -> u32 {
        self.ltris.len() as u32
    }

    pub fn blas_nodes(&self) -> &[BvhNode] {
        &self.blas_nodes
    }

    pub fn tlas_nodes(&self) -> &[BvhNode] {
        &self.tlas_nodes[..self.tlas_node_cnt]
    }

    pub fn tri_cnt(&self) -> u32 {
        self.curr_ofs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::tri::Triangle;

    fn quad_mesh(mtl_id: u16) -> Mesh {
        let v = [
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(-1.0, 1.0, 0.0),
        ];
        Mesh::new(vec![
            Triangle::new([v[0], v[1], v[2]], None, mtl_id),
            Triangle::new([v[0], v[2], v[3]], None, mtl_id),
        ])
    }

    fn test_scene() -> (Scene, u16, u16, u16) {
        let mut s = Scene::new(8, 8, 1, 16).unwrap();
        let white = s.add_material(Material::new(Vector3::new(0.8, 0.8, 0.8))).unwrap();
        let light = s
            .add_material(Material::emissive(Vector3::new(1.0, 1.0, 1.0), 5.0))
            .unwrap();
        let mesh = s.attach_mesh(quad_mesh(white), false).unwrap();
        s.finalize();
        (s, white, light, mesh)
    }

    #[test]
    fn test_instance_before_finalize_fails() {
        let mut s = Scene::new(2, 2, 1, 2).unwrap();
        let white = s.add_material(Material::new(Vector3::zeros())).unwrap();
        let mesh = s.attach_mesh(quad_mesh(white), false).unwrap();
        let res = s.add_instance(mesh, None, 0, Matrix4::identity());
        assert!(matches!(res, Err(Error::NotFinalized)));
    }

    #[test]
    fn test_instance_capacity_respects_node_packing() {
        // A full TLAS has 2N-1 nodes addressed by 16 bit child indices,
        // which caps N below the 16 bit instance id range
        assert!(matches!(
            Scene::new(1, 1, 1, 0x8000 + 1),
            Err(Error::IdRangeExceeded("instances"))
        ));
        assert!(Scene::new(1, 1, 1, 0x8000).is_ok());
    }

    #[test]
    fn test_attach_after_finalize_fails() {
        let (mut s, white, _, _) = test_scene();
        let res = s.attach_mesh(quad_mesh(white), false);
        assert!(matches!(res, Err(Error::AlreadyFinalized)));
    }

    #[test]
    fn test_invalid_camera_id() {
        let (mut s, ..) = test_scene();
        assert!(matches!(
            s.set_active_camera(5),
            Err(Error::InvalidCameraId(5))
        ));
        assert!(matches!(
            s.update_camera(9, Camera::default()),
            Err(Error::InvalidCameraId(9))
        ));
    }

    #[test]
    fn test_instance_capacity() {
        let mut s = Scene::new(2, 2, 1, 2).unwrap();
        let white = s.add_material(Material::new(Vector3::zeros())).unwrap();
        let mesh = s.attach_mesh(quad_mesh(white), false).unwrap();
        s.finalize();
        s.add_instance(mesh, None, 0, Matrix4::identity()).unwrap();
        s.add_instance(mesh, None, 0, Matrix4::identity()).unwrap();
        let res = s.add_instance(mesh, None, 0, Matrix4::identity());
        assert!(matches!(res, Err(Error::CapacityExceeded { .. })));
    }

    #[test]
    fn test_mesh_instance_intersection() {
        let (mut s, _, _, mesh) = test_scene();
        let id = s
            .add_instance(
                mesh,
                None,
                0,
                Matrix4::new_translation(&Vector3::new(0.0, 0.0, 2.0)),
            )
            .unwrap();
        s.prepare_render().unwrap();

        let r = Ray::new(Point3::new(0.0, 0.0, -3.0), Vector3::new(0.0, 0.0, 1.0));
        let h = s.intersect(&r).unwrap();
        assert!(h.is_hit());
        assert!((h.t - 5.0).abs() < 1e-4);
        assert_eq!(h.inst_id(), id);
    }

    #[test]
    fn test_sphere_shape_scenario() {
        let (mut s, white, _, _) = test_scene();
        let id = s
            .add_shape_instance(Shape::Sphere, white, 0, Matrix4::identity())
            .unwrap();
        s.prepare_render().unwrap();

        let r = Ray::new(Point3::new(0.0, 0.0, -5.0), Vector3::new(0.0, 0.0, 1.0));
        let h = s.intersect(&r).unwrap();
        assert!((h.t - 4.0).abs() < 1e-4);
        assert_eq!(h.inst_id(), id);
        assert_eq!(h.prim_id(), Shape::Sphere as u16);
    }

    #[test]
    fn test_emissive_transition_builds_ltris() {
        let (mut s, _, light, mesh) = test_scene();
        let id = s.add_instance(mesh, None, 0, Matrix4::identity()).unwrap();
        s.prepare_render().unwrap();
        assert_eq!(s.ltri_cnt(), 0);

        s.clear_dirty(u32::MAX);
        s.update_instance_material(id, Some(light)).unwrap();
        s.prepare_render().unwrap();

        assert_eq!(s.ltri_cnt(), 2);
        assert_eq!(s.instance_info(id).unwrap().ltri_cnt, 2);
        assert!(s.dirty().contains(Dirty::LTRI | Dirty::TRI));
    }

    #[test]
    fn test_emissive_to_dark_clears_ltris() {
        let (mut s, white, light, mesh) = test_scene();
        let id = s.add_instance(mesh, Some(light), 0, Matrix4::identity()).unwrap();
        s.prepare_render().unwrap();
        assert_eq!(s.ltri_cnt(), 2);

        s.update_instance_material(id, Some(white)).unwrap();
        s.prepare_render().unwrap();
        assert_eq!(s.ltri_cnt(), 0);
        assert_eq!(s.instance_info(id).unwrap().ltri_cnt, 0);
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let (mut s, _, light, mesh) = test_scene();
        s.add_instance(mesh, Some(light), 0, Matrix4::identity()).unwrap();
        s.prepare_render().unwrap();

        s.clear_dirty(u32::MAX);
        s.prepare_render().unwrap();
        // No mutations in between: no rebuilds, nothing re-dirtied
        assert!(s.dirty().is_empty());
    }

    #[test]
    fn test_ltri_ranges_are_contiguous_and_disjoint() {
        let mut s = Scene::new(8, 8, 1, 16).unwrap();
        let light = s
            .add_material(Material::emissive(Vector3::new(1.0, 1.0, 1.0), 2.0))
            .unwrap();
        // Separate meshes; emissive meshes must not be instanced twice
        let m0 = s.attach_mesh(quad_mesh(light), true).unwrap();
        let m1 = s.attach_mesh(quad_mesh(light), true).unwrap();
        let m2 = s.attach_mesh(quad_mesh(light), true).unwrap();
        s.finalize();

        let i0 = s.add_instance(m0, None, 0, Matrix4::identity()).unwrap();
        let i1 = s.add_instance(m1, None, 0, Matrix4::identity()).unwrap();
        let i2 = s.add_instance(m2, None, 0, Matrix4::identity()).unwrap();
        s.disable_instance(i1).unwrap();
        s.prepare_render().unwrap();

        let a = s.instance_info(i0).unwrap();
        let b = s.instance_info(i1).unwrap();
        let c = s.instance_info(i2).unwrap();

        assert_eq!(b.ltri_cnt, 0);
        assert_eq!((a.ltri_ofs, a.ltri_cnt), (0, 2));
        assert_eq!((c.ltri_ofs, c.ltri_cnt), (2, 2));
        assert_eq!(s.ltri_cnt(), 4);

        // Every ltri's owner links back into that owner's range
        for (k, lt) in s.ltris().iter().enumerate() {
            let info = s.instance_info(lt.inst_id as u16).unwrap();
            let k = k as u32;
            assert!(k >= info.ltri_ofs && k < info.ltri_ofs + info.ltri_cnt);
        }
    }

    #[test]
    fn test_disabled_instance_is_excluded() {
        let (mut s, _, light, mesh) = test_scene();
        let id = s.add_instance(mesh, Some(light), 0, Matrix4::identity()).unwrap();
        s.prepare_render().unwrap();

        let r = Ray::new(Point3::new(0.0, 0.0, -3.0), Vector3::new(0.0, 0.0, 1.0));
        assert!(s.intersect(&r).unwrap().is_hit());

        s.disable_instance(id).unwrap();
        s.prepare_render().unwrap();

        assert!(!s.intersect(&r).unwrap().is_hit());
        assert_eq!(s.instance_info(id).unwrap().ltri_cnt, 0);
        assert_eq!(s.ltri_cnt(), 0);

        // Re-enabling brings geometry and lights back
        s.enable_instance(id).unwrap();
        s.prepare_render().unwrap();
        assert!(s.intersect(&r).unwrap().is_hit());
        assert_eq!(s.ltri_cnt(), 2);
    }

    #[test]
    fn test_transform_update_moves_ltris_in_place() {
        let (mut s, _, light, mesh) = test_scene();
        let id = s.add_instance(mesh, Some(light), 0, Matrix4::identity()).unwrap();
        s.prepare_render().unwrap();
        assert!((s.ltris()[0].v0.z - 0.0).abs() < 1e-6);

        s.update_transform(id, Matrix4::new_translation(&Vector3::new(0.0, 0.0, 4.0)))
            .unwrap();
        s.prepare_render().unwrap();

        // Same count, new world positions
        assert_eq!(s.ltri_cnt(), 2);
        assert!((s.ltris()[0].v0.z - 4.0).abs() < 1e-5);

        // World bounds followed the transform
        let b = s.instance_info(id).unwrap().bounds;
        assert!(b.min.z > 3.0 && b.max.z < 5.0);
    }

    #[test]
    fn test_singular_transform_recovers() {
        let (mut s, _, _, mesh) = test_scene();
        let id = s
            .add_instance(mesh, None, 0, Matrix4::new_scaling(0.0))
            .unwrap();
        s.prepare_render().unwrap();
        // Inverse fell back to identity, instance still reconciled
        assert!(!s.instance_state(id).unwrap().is_transform_dirty());
    }
}
