//! Ray intersection queries against triangles, analytic primitives and
//! both hierarchy levels. All queries are pure; absence of intersection is
//! expressed through the `MAX_DIST` sentinel, and the only error path is
//! traversal stack exhaustion, which must be surfaced rather than
//! truncated (truncation silently drops geometry from the render).

use na::Point3;

use crate::bvh::BvhNode;
use crate::error::{Error, Result};
use crate::scene::inst::{Inst, Shape, INST_ID_MASK};
use crate::scene::mesh::Mesh;
use crate::scene::tri::Triangle;
use crate::types::ray::Ray;

pub const MAX_DIST: f32 = f32::MAX;
pub const EPSILON: f32 = 1e-6;

const NODE_STACK_SIZE: usize = 32;

/// Hit record. `e` packs (tri id << 16) | inst id for mesh hits and
/// (shape type << 16) | inst id for analytic hits.
#[derive(Clone, Copy, Debug)]
pub struct Hit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    pub e: u32,
}

impl Hit {
    pub fn none() -> Self {
        Self {
            t: MAX_DIST,
            u: 0.0,
            v: 0.0,
            e: 0,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.t < MAX_DIST
    }

    pub fn inst_id(&self) -> u16 {
        (self.e & INST_ID_MASK) as u16
    }

    /// Triangle id relative to the mesh (mesh hits) or the shape tag
    /// (analytic hits); interpret via the instance's payload kind.
    pub fn prim_id(&self) -> u16 {
        (self.e >> 16) as u16
    }
}

impl Default for Hit {
    fn default() -> Self {
        Self::none()
    }
}

/// Slab test against the ray's parametric range, using the precomputed
/// inverse direction [Laine et al. 2013; Afra et al. 2016]. Returns tnear
/// on a useful hit, MAX_DIST otherwise.
pub fn intersect_aabb(r: &Ray, curr_t: f32, min: Point3<f32>, max: Point3<f32>) -> f32 {
    let t0 = (min - r.origin).component_mul(&r.inv_direction);
    let t1 = (max - r.origin).component_mul(&r.inv_direction);

    let tnear = t0.inf(&t1).max();
    let tfar = t0.sup(&t1).min();

    if tnear <= tfar && tnear < curr_t && tfar > EPSILON {
        tnear
    } else {
        MAX_DIST
    }
}

/// Infinite plane at the origin in XZ, in instance local space.
pub fn intersect_plane(r: &Ray, inst_id: u32, h: &mut Hit) {
    let d = r.direction.y;
    if d.abs() > EPSILON {
        let t = -r.origin.y / d;
        if t < h.t && t > EPSILON {
            h.t = t;
            h.e = ((Shape::Plane as u32) << 16) | (inst_id & INST_ID_MASK);
        }
    }
}

/// Axis-aligned unit box (-1..1) in instance local space.
pub fn intersect_unit_box(r: &Ray, inst_id: u32, h: &mut Hit) {
    let t0 = (Point3::new(-1.0, -1.0, -1.0) - r.origin).component_mul(&r.inv_direction);
    let t1 = (Point3::new(1.0, 1.0, 1.0) - r.origin).component_mul(&r.inv_direction);

    let tnear = t0.inf(&t1).max();
    let tfar = t0.sup(&t1).min();

    if tnear <= tfar {
        if tnear < h.t && tnear > EPSILON {
            h.t = tnear;
            h.e = ((Shape::Box as u32) << 16) | (inst_id & INST_ID_MASK);
            return;
        }
        if tfar < h.t && tfar > EPSILON {
            h.t = tfar;
            h.e = ((Shape::Box as u32) << 16) | (inst_id & INST_ID_MASK);
        }
    }
}

/// Unit sphere at the origin in instance local space. Both quadratic
/// roots are tried, nearer valid one wins.
pub fn intersect_unit_sphere(r: &Ray, inst_id: u32, h: &mut Hit) {
    let a = r.direction.dot(&r.direction);
    let b = r.origin.coords.dot(&r.direction);
    let c = r.origin.coords.dot(&r.origin.coords) - 1.0;

    let d = b * b - a * c;
    if d < 0.0 {
        return;
    }

    let d = d.sqrt();
    let mut t = (-b - d) / a;
    if t <= EPSILON || h.t <= t {
        t = (-b + d) / a;
        if t <= EPSILON || h.t <= t {
            return;
        }
    }

    h.t = t;
    h.e = ((Shape::Sphere as u32) << 16) | (inst_id & INST_ID_MASK);
}

/// Moeller/Trumbore ray-triangle intersection.
pub fn intersect_tri(r: &Ray, t: &Triangle, inst_id: u32, tri_id: u32, h: &mut Hit) {
    let edge1 = t.v1 - t.v0;
    let edge2 = t.v2 - t.v0;

    let pvec = r.direction.cross(&edge2);
    let det = edge1.dot(&pvec);

    // Ray in plane of triangle
    if det.abs() < EPSILON {
        return;
    }

    let inv_det = 1.0 / det;
    let tvec = r.origin - t.v0;

    let u = tvec.dot(&pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return;
    }

    let qvec = tvec.cross(&edge1);
    let v = r.direction.dot(&qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return;
    }

    let dist = edge2.dot(&qvec) * inv_det;
    if dist > EPSILON && dist < h.t {
        h.t = dist;
        h.u = u;
        h.v = v;
        // tri_id is relative to the mesh
        h.e = (tri_id << 16) | (inst_id & INST_ID_MASK);
    }
}

/// Traverse a mesh's BLAS with an explicit fixed-depth stack, nearer
/// child first.
pub fn intersect_blas(
    r: &Ray,
    nodes: &[BvhNode],
    tris: &[Triangle],
    inst_id: u32,
    h: &mut Hit,
) -> Result<()> {
    let mut stack = [0u32; NODE_STACK_SIZE];
    let mut stack_pos = 0;
    let mut ni = 0u32;

    loop {
        let n = &nodes[ni as usize];
        if n.is_leaf() {
            intersect_tri(r, &tris[n.idx as usize], inst_id, n.idx, h);
            if stack_pos > 0 {
                stack_pos -= 1;
                ni = stack[stack_pos];
            } else {
                return Ok(());
            }
        } else {
            let mut c1 = n.left();
            let mut c2 = n.right();
            let n1 = &nodes[c1 as usize];
            let n2 = &nodes[c2 as usize];
            let mut d1 = intersect_aabb(r, h.t, n1.min, n1.max);
            let mut d2 = intersect_aabb(r, h.t, n2.min, n2.max);
            if d1 > d2 {
                std::mem::swap(&mut d1, &mut d2);
                std::mem::swap(&mut c1, &mut c2);
            }
            if d1 == MAX_DIST {
                // Both children missed, pop
                if stack_pos > 0 {
                    stack_pos -= 1;
                    ni = stack[stack_pos];
                } else {
                    return Ok(());
                }
            } else {
                ni = c1;
                if d2 < MAX_DIST {
                    if stack_pos == NODE_STACK_SIZE {
                        return Err(Error::TraversalStackOverflow(NODE_STACK_SIZE));
                    }
                    stack[stack_pos] = c2;
                    stack_pos += 1;
                }
            }
        }
    }
}

/// Intersect one instance: transform the ray into local space, then
/// dispatch on the payload kind (analytic shape vs mesh BLAS).
pub fn intersect_inst(
    r: &Ray,
    inst: &Inst,
    meshes: &[Mesh],
    blas_nodes: &[BvhNode],
    h: &mut Hit,
) -> Result<()> {
    let r_obj = r.transformed(&inst.inv_transform_matrix());

    if let Some(shape) = inst.shape() {
        match shape {
            Shape::Plane => intersect_plane(&r_obj, inst.id, h),
            Shape::Box => intersect_unit_box(&r_obj, inst.id, h),
            Shape::Sphere => intersect_unit_sphere(&r_obj, inst.id, h),
        }
        Ok(())
    } else {
        let mesh = &meshes[inst.payload() as usize];
        let ofs = 2 * mesh.ofs as usize;
        intersect_blas(&r_obj, &blas_nodes[ofs..], &mesh.tris, inst.id, h)
    }
}

/// Traverse the TLAS; leaves dispatch into `intersect_inst`. `node_cnt`
/// of 0 means no enabled instances and an immediate miss.
pub fn intersect_tlas(
    r: &Ray,
    tlas_nodes: &[BvhNode],
    node_cnt: usize,
    instances: &[Inst],
    meshes: &[Mesh],
    blas_nodes: &[BvhNode],
    h: &mut Hit,
) -> Result<()> {
    if node_cnt == 0 {
        return Ok(());
    }

    let mut stack = [0u32; NODE_STACK_SIZE];
    let mut stack_pos = 0;
    let mut ni = 0u32;

    loop {
        let n = &tlas_nodes[ni as usize];
        if n.is_leaf() {
            intersect_inst(r, &instances[n.idx as usize], meshes, blas_nodes, h)?;
            if stack_pos > 0 {
                stack_pos -= 1;
                ni = stack[stack_pos];
            } else {
                return Ok(());
            }
        } else {
            let mut c1 = n.left();
            let mut c2 = n.right();
            let n1 = &tlas_nodes[c1 as usize];
            let n2 = &tlas_nodes[c2 as usize];
            let mut d1 = intersect_aabb(r, h.t, n1.min, n1.max);
            let mut d2 = intersect_aabb(r, h.t, n2.min, n2.max);
            if d1 > d2 {
                std::mem::swap(&mut d1, &mut d2);
                std::mem::swap(&mut c1, &mut c2);
            }
            if d1 == MAX_DIST {
                if stack_pos > 0 {
                    stack_pos -= 1;
                    ni = stack[stack_pos];
                } else {
                    return Ok(());
                }
            } else {
                ni = c1;
                if d2 < MAX_DIST {
                    if stack_pos == NODE_STACK_SIZE {
                        return Err(Error::TraversalStackOverflow(NODE_STACK_SIZE));
                    }
                    stack[stack_pos] = c2;
                    stack_pos += 1;
                }
            }
        }
    }
}
