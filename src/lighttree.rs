//! Light tree: the agglomerative builder specialized for emissive
//! triangles. Clustering is weighted by emitted power times squared
//! spatial extent instead of pure surface area, and every node keeps a
//! parent back-link so samplers can walk upward from a leaf.
//!
//! Walter et al: Fast Agglomerative Clustering for Rendering
//! Walter et al: Lightcuts: A Scalable Approach to Illumination
//! Cem Yuksel: Stochastic Lightcuts for Sampling Many Lights

use na::{Point3, Vector3};
use rand::Rng;

use crate::scene::tri::LightTri;
use crate::types::aabb::Aabb;

/// Children's normals must agree at least this much to propagate a
/// blended normal upward.
const NRM_BLEND_DOT: f32 = 0.9;

#[derive(Clone, Copy, Debug)]
pub struct LightNode {
    pub min: Point3<f32>,
    /// Packed child node indices, 16 bits each; 0 marks a leaf.
    pub children: u32,
    pub max: Point3<f32>,
    /// (parent node id << 16) | (light id & 0xffff). The light half is
    /// meaningful at leaves only.
    pub idx: u32,
    /// Blended outgoing normal, or zero when the children disagree and no
    /// directional statement can be made at this node.
    pub nrm: Vector3<f32>,
    /// Sum of the subtree's emission terms.
    pub intensity: f32,
}

impl LightNode {
    pub fn is_leaf(&self) -> bool {
        self.children == 0
    }

    pub fn left(&self) -> u32 {
        self.children & 0xffff
    }

    pub fn right(&self) -> u32 {
        self.children >> 16
    }

    pub fn light_id(&self) -> u32 {
        self.idx & 0xffff
    }

    pub fn parent(&self) -> u32 {
        self.idx >> 16
    }

    fn set_parent(&mut self, parent: u32) {
        debug_assert!(parent <= 0xffff, "parent out of 16 bit range");
        self.idx = (parent << 16) | (self.idx & 0xffff);
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_min_max(self.min, self.max)
    }
}

fn find_best(nodes: &[LightNode], active: &[u32], idx: usize) -> usize {
    let mut best_cost = f32::MAX;
    let mut best_idx = 0;

    let n = &nodes[active[idx] as usize];
    for (i, &other) in active.iter().enumerate() {
        if i != idx {
            let o = &nodes[other as usize];
            let diag = Aabb::combine(&n.bounds(), &o.bounds()).extent();
            // Total emitted power times squared extent approximates the
            // directional sampling error of merging the two clusters
            let cost = (n.intensity + o.intensity) * diag.dot(&diag);
            if cost < best_cost {
                best_cost = cost;
                best_idx = i;
            }
        }
    }

    best_idx
}

/// Build the light tree over the scene's light triangle table. `nodes`
/// must hold 2 * ltris.len() entries. Returns the node count in use.
pub fn build_light_tree(nodes: &mut [LightNode], ltris: &[LightTri]) -> usize {
    let mut active: Vec<u32> = Vec::with_capacity(ltris.len());

    for (i, lt) in ltris.iter().enumerate() {
        let b = lt.bounds();
        nodes[1 + i] = LightNode {
            min: b.min,
            children: 0,
            max: b.max,
            idx: i as u32,
            nrm: lt.nrm,
            intensity: lt.intensity(),
        };
        active.push(1 + i as u32);
    }

    let mut node_cnt = 1 + active.len();

    if active.is_empty() {
        return 0;
    }

    if active.len() > 1 {
        let mut a = 0;
        let mut b = find_best(nodes, &active, a);
        while active.len() > 1 {
            let c = find_best(nodes, &active, b);
            if a == c {
                let idx_a = active[a];
                let idx_b = active[b];

                let node_a = nodes[idx_a as usize];
                let node_b = nodes[idx_b as usize];

                let bounds = Aabb::combine(&node_a.bounds(), &node_b.bounds());
                let nrm = if node_a.nrm.dot(&node_b.nrm) > NRM_BLEND_DOT {
                    // Children agree, keep their "same" normal
                    (node_a.nrm + node_b.nrm).normalize()
                } else {
                    Vector3::zeros()
                };

                nodes[node_cnt] = LightNode {
                    min: bounds.min,
                    children: (idx_b << 16) | idx_a,
                    max: bounds.max,
                    idx: 0,
                    nrm,
                    intensity: node_a.intensity + node_b.intensity,
                };

                // The last merge forms the root, which ends up in slot 0
                let parent = if active.len() == 2 { 0 } else { node_cnt as u32 };
                nodes[idx_a as usize].set_parent(parent);
                nodes[idx_b as usize].set_parent(parent);

                active[a] = node_cnt as u32;
                node_cnt += 1;
                active.swap_remove(b);
                if a == active.len() {
                    a = b;
                }

                b = find_best(nodes, &active, a);
            } else {
                a = b;
                b = c;
            }
        }
    }

    node_cnt -= 1;
    nodes[0] = nodes[node_cnt];
    node_cnt
}

/// Leaf node index for a light. Leaves occupy slots 1..=n except for a
/// single-light tree, whose leaf doubles as the root.
pub fn leaf_for_light(node_cnt: usize, light_id: u32) -> u32 {
    if node_cnt == 1 {
        0
    } else {
        1 + light_id
    }
}

/// Importance-sample a light by descending from the root, choosing
/// children proportionally to their subtree intensity. Returns the light
/// id and the probability of having picked it.
pub fn sample_light<R: Rng>(
    nodes: &[LightNode],
    node_cnt: usize,
    rng: &mut R,
) -> Option<(u32, f32)> {
    if node_cnt == 0 {
        return None;
    }

    let mut n = &nodes[0];
    let mut pdf = 1.0f32;

    while !n.is_leaf() {
        let left = &nodes[n.left() as usize];
        let right = &nodes[n.right() as usize];

        let total = left.intensity + right.intensity;
        let p_left = if total > 0.0 {
            left.intensity / total
        } else {
            0.5
        };

        if rng.gen::<f32>() < p_left {
            pdf *= p_left;
            n = left;
        } else {
            pdf *= 1.0 - p_left;
            n = right;
        }
    }

    Some((n.light_id(), pdf))
}
