use na::Vector3;

/// Material parameters as the upload layer expects them. The core itself
/// only cares about the emission predicate and the emitted color.
#[derive(Clone, Copy, Debug)]
pub struct Material {
    /// Diffuse color of non-metallic, specular color of metallic
    pub col: Vector3<f32>,
    /// Appearance range from dielectric to conductor (0 - 1)
    pub metallic: f32,
    /// Perfect reflection to completely diffuse (0 - 1)
    pub roughness: f32,
    /// Index of refraction
    pub ior: f32,
    /// Flag if material is refractive
    pub refractive: f32,
    /// Emission intensity, > 0 makes the material a light
    pub emissive: f32,
}

impl Material {
    pub fn new(col: Vector3<f32>) -> Self {
        Self {
            col,
            metallic: 0.0,
            roughness: 0.5,
            ior: 1.5,
            refractive: 0.0,
            emissive: 0.0,
        }
    }

    pub fn emissive(col: Vector3<f32>, intensity: f32) -> Self {
        let mut m = Self::new(col);
        m.emissive = intensity;
        m
    }

    pub fn is_emissive(&self) -> bool {
        self.emissive > 0.0
    }

    pub fn emission(&self) -> Vector3<f32> {
        self.col * self.emissive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emissive_predicate() {
        let m = Material::new(Vector3::new(1.0, 1.0, 1.0));
        assert!(!m.is_emissive());

        let l = Material::emissive(Vector3::new(1.0, 0.5, 0.5), 4.0);
        assert!(l.is_emissive());
        assert_eq!(l.emission(), Vector3::new(4.0, 2.0, 2.0));
    }
}
