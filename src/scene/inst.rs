use na::Matrix4;

use crate::types::aabb::Aabb;

pub const INST_ID_MASK: u32 = 0xffff;
/// Highest bit of `Inst::data`: material override active.
pub const MTL_OVERRIDE_BIT: u32 = 0x8000_0000;
/// Second highest bit of `Inst::data`: analytic shape instead of a mesh.
pub const SHAPE_TYPE_BIT: u32 = 0x4000_0000;
/// Remaining 30 bits: mesh id or shape tag; the mesh record carries the
/// triangle/BLAS buffer offsets.
pub const INST_DATA_MASK: u32 = 0x3fff_ffff;

/// Analytic primitives intersected in unit/local space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Plane = 0,
    Box = 1,
    Sphere = 2,
}

impl Shape {
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Shape::Plane),
            1 => Some(Shape::Box),
            2 => Some(Shape::Sphere),
            _ => None,
        }
    }
}

/// Per-instance lifecycle bits. Not mutually exclusive; transitions are
/// encoded in the named methods below so call sites cannot get the
/// combinations wrong.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstState(u32);

impl InstState {
    pub const DISABLED: u32 = 1;
    pub const TRANS_DIRTY: u32 = 2;
    pub const MTL_DIRTY: u32 = 4;
    pub const EMISSIVE: u32 = 8;
    pub const WAS_EMISSIVE: u32 = 16;

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_disabled(&self) -> bool {
        self.0 & Self::DISABLED != 0
    }

    pub fn is_transform_dirty(&self) -> bool {
        self.0 & Self::TRANS_DIRTY != 0
    }

    pub fn is_material_dirty(&self) -> bool {
        self.0 & Self::MTL_DIRTY != 0
    }

    pub fn is_emissive(&self) -> bool {
        self.0 & Self::EMISSIVE != 0
    }

    pub fn was_emissive(&self) -> bool {
        self.0 & Self::WAS_EMISSIVE != 0
    }

    pub fn mark_transform_dirty(&mut self) {
        self.0 |= Self::TRANS_DIRTY;
    }

    pub fn mark_material_dirty(&mut self) {
        self.0 |= Self::MTL_DIRTY;
    }

    /// Remember the current emissive status before a material change so the
    /// reconciliation pass can detect emissive -> non-emissive transitions.
    pub fn capture_was_emissive(&mut self) {
        if self.is_emissive() {
            self.0 |= Self::WAS_EMISSIVE;
        }
    }

    pub fn set_emissive(&mut self, emissive: bool) {
        if emissive {
            self.0 |= Self::EMISSIVE;
        } else {
            self.0 &= !Self::EMISSIVE;
        }
    }

    /// Disabling forces full reconciliation of the instance on the next
    /// prepare pass (TLAS rebuild, light triangle range reset).
    pub fn disable(&mut self) {
        self.0 |= Self::DISABLED | Self::TRANS_DIRTY | Self::MTL_DIRTY;
    }

    /// Re-enabling equally forces full reconciliation.
    pub fn enable(&mut self) {
        self.0 &= !Self::DISABLED;
        self.0 |= Self::TRANS_DIRTY | Self::MTL_DIRTY;
    }

    pub fn clear_transform_dirty(&mut self) {
        self.0 &= !Self::TRANS_DIRTY;
    }

    /// MTL_DIRTY and WAS_EMISSIVE are single-frame transition signals,
    /// cleared at the end of each instance's reconciliation.
    pub fn clear_frame_transients(&mut self) {
        self.0 &= !(Self::MTL_DIRTY | Self::WAS_EMISSIVE);
    }
}

/// Compact, render-ready instance record (GPU layout). Derived projection
/// of `InstInfo`; the scene keeps it in sync.
#[derive(Clone, Copy, Debug)]
pub struct Inst {
    /// Inverse transform as 3x4 row-major floats.
    pub inv_transform: [f32; 12],
    /// (mtl override id << 16) | (inst id & 0xffff)
    pub id: u32,
    /// See the bit constants above.
    pub data: u32,
    /// Opaque payload forwarded to the renderer (e.g. invisibility).
    pub flags: u32,
}

impl Inst {
    pub fn inst_id(&self) -> u16 {
        (self.id & INST_ID_MASK) as u16
    }

    pub fn mtl_override_id(&self) -> u16 {
        (self.id >> 16) as u16
    }

    pub fn has_mtl_override(&self) -> bool {
        self.data & MTL_OVERRIDE_BIT != 0
    }

    pub fn is_shape(&self) -> bool {
        self.data & SHAPE_TYPE_BIT != 0
    }

    pub fn payload(&self) -> u32 {
        self.data & INST_DATA_MASK
    }

    pub fn shape(&self) -> Option<Shape> {
        if self.is_shape() {
            Shape::from_tag(self.payload())
        } else {
            None
        }
    }

    pub fn set_inv_transform(&mut self, inv: &Matrix4<f32>) {
        for row in 0..3 {
            for col in 0..4 {
                self.inv_transform[row * 4 + col] = inv[(row, col)];
            }
        }
    }

    pub fn inv_transform_matrix(&self) -> Matrix4<f32> {
        let t = &self.inv_transform;
        Matrix4::new(
            t[0], t[1], t[2], t[3], //
            t[4], t[5], t[6], t[7], //
            t[8], t[9], t[10], t[11], //
            0.0, 0.0, 0.0, 1.0,
        )
    }
}

/// CPU-only shadow record, the single source of truth per instance.
#[derive(Clone, Copy, Debug)]
pub struct InstInfo {
    pub transform: Matrix4<f32>,
    pub inv_transform: Matrix4<f32>,
    /// Conservative world-space bounds (8 transformed corners of the local
    /// box), refreshed when the transform changes.
    pub bounds: Aabb,
    pub mesh_id: u16,
    pub shape: Option<Shape>,
    pub ltri_ofs: u32,
    pub ltri_cnt: u32,
    pub state: InstState,
}
