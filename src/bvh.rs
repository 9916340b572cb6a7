//! Bounding volume hierarchies via bottom-up agglomerative clustering
//! (Walter et al., Fast Agglomerative Clustering for Rendering).
//!
//! The same clustering loop builds the per-mesh BLAS and the scene TLAS;
//! only the leaf set differs. Node buffers are caller-allocated with
//! capacity 2N so a build over N items can place its 2N-1 nodes and still
//! relocate the root into the reserved slot 0.

use na::Point3;

use crate::scene::inst::InstInfo;
use crate::scene::tri::Triangle;
use crate::types::aabb::Aabb;

/// BLAS and TLAS node, GPU layout.
#[derive(Clone, Copy, Debug)]
pub struct BvhNode {
    pub min: Point3<f32>,
    /// Packed child node indices, 16 bits each; 0 marks a leaf (the root
    /// slot is reserved, so no real child ever has index 0).
    pub children: u32,
    pub max: Point3<f32>,
    /// Primitive index, set at leaf nodes only.
    pub idx: u32,
}

impl BvhNode {
    pub fn leaf(bounds: &Aabb, idx: u32) -> Self {
        Self {
            min: bounds.min,
            children: 0,
            max: bounds.max,
            idx,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children == 0
    }

    pub fn left(&self) -> u32 {
        self.children & 0xffff
    }

    pub fn right(&self) -> u32 {
        self.children >> 16
    }

    pub fn pack_children(left: u32, right: u32) -> u32 {
        debug_assert!(left > 0 && left <= 0xffff, "left child out of 16 bit range");
        debug_assert!(right > 0 && right <= 0xffff, "right child out of 16 bit range");
        (right << 16) | left
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_min_max(self.min, self.max)
    }
}

/// Scan the active list for the partner that merges with `idx` at minimal
/// cost. Ties resolve to the first minimal candidate; the tie-break is
/// intentionally unspecified beyond being deterministic.
fn find_best<F>(nodes: &[BvhNode], active: &[u32], idx: usize, cost: &F) -> usize
where
    F: Fn(&BvhNode, &BvhNode) -> f32,
{
    let mut best_cost = f32::MAX;
    let mut best_idx = 0;

    let n = &nodes[active[idx] as usize];
    for (i, &other) in active.iter().enumerate() {
        if i != idx {
            let c = cost(n, &nodes[other as usize]);
            if c < best_cost {
                best_cost = c;
                best_idx = i;
            }
        }
    }

    best_idx
}

/// Locally-ordered agglomerative clustering over the nodes referenced by
/// `active`. New interior nodes are appended starting at `node_cnt`; the
/// last one formed is the root and is moved into slot 0. Returns the
/// number of nodes in use (2N-1 for N active leaves, 0 for none).
fn cluster<F>(nodes: &mut [BvhNode], active: &mut Vec<u32>, mut node_cnt: usize, cost: F) -> usize
where
    F: Fn(&BvhNode, &BvhNode) -> f32,
{
    if active.is_empty() {
        return 0;
    }

    if active.len() > 1 {
        let mut a = 0;
        let mut b = find_best(nodes, active, a, &cost);
        while active.len() > 1 {
            let c = find_best(nodes, active, b, &cost);
            if a == c {
                // Mutual best match, merge a and b
                let idx_a = active[a];
                let idx_b = active[b];

                let node_a = nodes[idx_a as usize];
                let node_b = nodes[idx_b as usize];

                nodes[node_cnt] = BvhNode {
                    min: Aabb::combine(&node_a.bounds(), &node_b.bounds()).min,
                    children: BvhNode::pack_children(idx_a, idx_b),
                    max: Aabb::combine(&node_a.bounds(), &node_b.bounds()).max,
                    idx: 0,
                };

                // Replace a's slot with the merged node, remove b's slot by
                // swapping in the last active entry
                active[a] = node_cnt as u32;
                node_cnt += 1;
                active.swap_remove(b);
                if a == active.len() {
                    // a's slot was the swapped-in last entry, follow it
                    a = b;
                }

                b = find_best(nodes, active, a, &cost);
            } else {
                // b had a better match in c, advance the search window
                a = b;
                b = c;
            }
        }
    }

    // Root node was formed last, move it into the reserved slot 0
    node_cnt -= 1;
    nodes[0] = nodes[node_cnt];
    node_cnt
}

/// Half surface area of the combined box. Cheap SAH proxy without a
/// primitive count term.
fn half_area_cost(a: &BvhNode, b: &BvhNode) -> f32 {
    Aabb::combine(&a.bounds(), &b.bounds()).half_area()
}

/// Build a BLAS over a mesh's triangles. `nodes` must hold 2 * tris.len()
/// entries. Returns the node count in use.
pub fn build_blas(nodes: &mut [BvhNode], tris: &[Triangle]) -> usize {
    let mut active: Vec<u32> = Vec::with_capacity(tris.len());

    // One leaf per triangle; slot 0 stays reserved for the root
    for (i, t) in tris.iter().enumerate() {
        nodes[1 + i] = BvhNode::leaf(&t.bounds(), i as u32);
        active.push(1 + i as u32);
    }

    let node_cnt = 1 + active.len();
    cluster(nodes, &mut active, node_cnt, half_area_cost)
}

/// Build a TLAS over the instances' world-space bounds. Disabled instances
/// get no leaf, so the tree may use fewer than 2 * instances.len() - 1
/// nodes. Returns the node count in use, 0 when nothing is enabled.
pub fn build_tlas(nodes: &mut [BvhNode], instances: &[InstInfo]) -> usize {
    let mut active: Vec<u32> = Vec::with_capacity(instances.len());

    let mut leaf_cnt = 0;
    for (i, info) in instances.iter().enumerate() {
        if !info.state.is_disabled() {
            nodes[1 + leaf_cnt] = BvhNode::leaf(&info.bounds, i as u32);
            active.push(1 + leaf_cnt as u32);
            leaf_cnt += 1;
        }
    }

    let node_cnt = 1 + leaf_cnt;
    cluster(nodes, &mut active, node_cnt, half_area_cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use na::{Matrix4, Vector3};

    use crate::scene::inst::InstState;

    fn tri_at(x: f32, y: f32, z: f32) -> Triangle {
        Triangle::new(
            [
                Point3::new(x, y, z),
                Point3::new(x + 1.0, y, z),
                Point3::new(x, y + 1.0, z),
            ],
            None,
            0,
        )
    }

    fn check_subtree(nodes: &[BvhNode], idx: u32, leaves: &mut Vec<u32>) -> Aabb {
        let n = &nodes[idx as usize];
        if n.is_leaf() {
            leaves.push(n.idx);
            return n.bounds();
        }
        let l = check_subtree(nodes, n.left(), leaves);
        let r = check_subtree(nodes, n.right(), leaves);
        let combined = Aabb::combine(&l, &r);
        assert_eq!(n.min, combined.min, "interior box must union its children");
        assert_eq!(n.max, combined.max, "interior box must union its children");
        n.bounds()
    }

    #[test]
    fn test_blas_node_count_and_root() {
        for n in 1..24usize {
            let tris: Vec<Triangle> = (0..n)
                .map(|i| tri_at(i as f32 * 1.5, (i % 3) as f32, (i % 5) as f32))
                .collect();
            let mut nodes = vec![BvhNode::leaf(&Aabb::new(), 0); 2 * n];
            let used = build_blas(&mut nodes, &tris);
            assert_eq!(used, 2 * n - 1);

            let mut leaves = Vec::new();
            check_subtree(&nodes, 0, &mut leaves);
            leaves.sort();
            let expect: Vec<u32> = (0..n as u32).collect();
            assert_eq!(leaves, expect, "every triangle appears in exactly one leaf");
        }
    }

    #[test]
    fn test_single_tri_is_root_leaf() {
        let tris = vec![tri_at(0.0, 0.0, 0.0)];
        let mut nodes = vec![BvhNode::leaf(&Aabb::new(), 0); 2];
        let used = build_blas(&mut nodes, &tris);
        assert_eq!(used, 1);
        assert!(nodes[0].is_leaf());
        assert_eq!(nodes[0].idx, 0);
    }

    #[test]
    fn test_two_tris_root_is_exact_combine() {
        let tris = vec![tri_at(0.0, 0.0, 0.0), tri_at(4.0, 2.0, -1.0)];
        let mut nodes = vec![BvhNode::leaf(&Aabb::new(), 0); 4];
        let used = build_blas(&mut nodes, &tris);
        assert_eq!(used, 3);

        let expect = Aabb::combine(&tris[0].bounds(), &tris[1].bounds());
        assert!(!nodes[0].is_leaf());
        assert_eq!(nodes[0].min, expect.min);
        assert_eq!(nodes[0].max, expect.max);
    }

    fn info_at(x: f32) -> InstInfo {
        let mut b = Aabb::new();
        b.grow(Point3::new(x, 0.0, 0.0));
        b.grow(Point3::new(x + 1.0, 1.0, 1.0));
        InstInfo {
            transform: Matrix4::identity(),
            inv_transform: Matrix4::identity(),
            bounds: b,
            mesh_id: 0,
            shape: None,
            ltri_ofs: 0,
            ltri_cnt: 0,
            state: InstState::default(),
        }
    }

    #[test]
    fn test_tlas_skips_disabled_instances() {
        let mut infos: Vec<InstInfo> = (0..6).map(|i| info_at(i as f32 * 2.0)).collect();
        infos[2].state.disable();
        infos[4].state.disable();

        let mut nodes = vec![BvhNode::leaf(&Aabb::new(), 0); 12];
        let used = build_tlas(&mut nodes, &infos);
        // 4 enabled leaves
        assert_eq!(used, 2 * 4 - 1);

        let mut leaves = Vec::new();
        check_subtree(&nodes, 0, &mut leaves);
        leaves.sort();
        assert_eq!(leaves, vec![0, 1, 3, 5]);
    }

    #[test]
    fn test_tlas_all_disabled_is_empty() {
        let mut infos: Vec<InstInfo> = (0..3).map(|i| info_at(i as f32)).collect();
        for info in infos.iter_mut() {
            info.state.disable();
        }
        let mut nodes = vec![BvhNode::leaf(&Aabb::new(), 0); 6];
        assert_eq!(build_tlas(&mut nodes, &infos), 0);
    }

    #[test]
    fn test_identical_boxes_still_terminate() {
        // Degenerate ties everywhere; first-found ordering must still
        // produce a full tree
        let tris: Vec<Triangle> = (0..8).map(|_| tri_at(0.0, 0.0, 0.0)).collect();
        let mut nodes = vec![BvhNode::leaf(&Aabb::new(), 0); 16];
        let used = build_blas(&mut nodes, &tris);
        assert_eq!(used, 15);
    }
}
