//! glTF metallic-roughness material parameters
//!
//! Based on the glTF 2.0 core material model plus the
//! KHR_materials_{transmission,volume,ior,emissive_strength} extensions.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Sentinel for "no texture bound" in [`MaterialParams::textures`].
pub const NO_TEXTURE: i32 = -1;

/// glTF alpha mode.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Binary coverage against the cutoff
    Mask(f32),
    Blend,
}

impl AlphaMode {
    /// Encoding used in the GPU record (`flags.x`).
    pub fn code(self) -> u32 {
        match self {
            AlphaMode::Opaque => 0,
            AlphaMode::Mask(_) => 1,
            AlphaMode::Blend => 2,
        }
    }

    pub fn cutoff(self) -> f32 {
        match self {
            AlphaMode::Mask(c) => c,
            _ => 0.5,
        }
    }

    /// Surface opacity seen by a ray for a given sampled alpha.
    ///
    /// OPAQUE ignores alpha, MASK is binary, BLEND is fractional.
    pub fn opacity(self, alpha: f32) -> f32 {
        match self {
            AlphaMode::Opaque => 1.0,
            AlphaMode::Mask(cutoff) => {
                if alpha >= cutoff {
                    1.0
                } else {
                    0.0
                }
            }
            AlphaMode::Blend => alpha.clamp(0.0, 1.0),
        }
    }
}

/// Material record as stored in the GPU material table.
///
/// Maps directly to the WGSL `Material` struct (vec4 packing, 112 bytes).
/// All color values are linear.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct MaterialParams {
    /// Base color factor (rgba)
    pub base_color: Vec4,
    /// Emissive (rgb, strength already applied), alpha cutoff (a)
    pub emissive_cutoff: Vec4,
    /// x=metallic, y=roughness, z=ior, w=transmission
    pub pbr: Vec4,
    /// Volume attenuation color (rgb), attenuation distance (a, 0 = none)
    pub attenuation: Vec4,
    /// x=thickness, y=normal scale, zw=unused
    pub misc: Vec4,
    /// x=alpha mode, y=double sided, z=has volume, w=unused
    pub flags: [u32; 4],
    /// Texture array layers: base color, metallic-roughness, normal, emissive
    pub textures: [i32; 4],
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            emissive_cutoff: Vec4::new(0.0, 0.0, 0.0, 0.5),
            // glTF defaults: fully metallic and rough
            pbr: Vec4::new(1.0, 1.0, 1.5, 0.0),
            attenuation: Vec4::new(1.0, 1.0, 1.0, 0.0),
            misc: Vec4::new(0.0, 1.0, 0.0, 0.0),
            flags: [0; 4],
            textures: [NO_TEXTURE; 4],
        }
    }
}

impl MaterialParams {
    /// Simple dielectric diffuse material
    pub fn diffuse(color: Vec3) -> Self {
        let mut p = Self::default();
        p.base_color = color.extend(1.0);
        p.pbr.x = 0.0;
        p
    }

    /// Metal with the given tint
    pub fn metal(color: Vec3, roughness: f32) -> Self {
        let mut p = Self::default();
        p.base_color = color.extend(1.0);
        p.pbr.x = 1.0;
        p.pbr.y = roughness;
        p
    }

    /// Emissive-only surface
    pub fn emissive_light(color: Vec3, strength: f32) -> Self {
        let mut p = Self::diffuse(Vec3::ZERO);
        p.emissive_cutoff = (color * strength).extend(0.5);
        p
    }

    pub fn with_alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.flags[0] = mode.code();
        self.emissive_cutoff.w = mode.cutoff();
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.base_color.w = alpha;
        self
    }

    pub fn with_double_sided(mut self, double_sided: bool) -> Self {
        self.flags[1] = double_sided as u32;
        self
    }

    /// Thin-walled transmission with optional Beer-Lambert volume.
    pub fn with_transmission(mut self, transmission: f32, attenuation: Vec3, distance: f32, thickness: f32) -> Self {
        self.pbr.w = transmission;
        self.attenuation = attenuation.extend(distance);
        self.misc.x = thickness;
        self.flags[2] = (distance > 0.0 || thickness > 0.0) as u32;
        self
    }

    // Accessors

    pub fn alpha_mode(&self) -> AlphaMode {
        match self.flags[0] {
            1 => AlphaMode::Mask(self.emissive_cutoff.w),
            2 => AlphaMode::Blend,
            _ => AlphaMode::Opaque,
        }
    }

    pub fn double_sided(&self) -> bool {
        self.flags[1] != 0
    }

    pub fn metallic(&self) -> f32 {
        self.pbr.x
    }

    pub fn roughness(&self) -> f32 {
        self.pbr.y
    }

    pub fn ior(&self) -> f32 {
        self.pbr.z
    }

    pub fn transmission(&self) -> f32 {
        self.pbr.w
    }

    pub fn emissive(&self) -> Vec3 {
        self.emissive_cutoff.truncate()
    }

    /// True if shadow rays should attenuate instead of block.
    pub fn is_transmissive(&self) -> bool {
        self.pbr.w > 0.0
    }

    pub fn has_volume(&self) -> bool {
        self.flags[2] != 0
    }

    /// True if the traversal may commit hits without evaluating opacity.
    pub fn is_opaque(&self) -> bool {
        self.alpha_mode() == AlphaMode::Opaque && !self.is_transmissive()
    }

    /// Per-channel extinction coefficient of the volume (Beer-Lambert).
    pub fn extinction(&self) -> Vec3 {
        let distance = self.attenuation.w;
        if distance <= 0.0 {
            return Vec3::ZERO;
        }
        let color = self.attenuation.truncate().max(Vec3::splat(1e-4));
        -Vec3::new(color.x.ln(), color.y.ln(), color.z.ln()) / distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_record_is_112_bytes() {
        assert_eq!(std::mem::size_of::<MaterialParams>(), 112);
    }

    #[test]
    fn test_alpha_mode_opacity() {
        assert_eq!(AlphaMode::Opaque.opacity(0.1), 1.0);
        assert_eq!(AlphaMode::Mask(0.5).opacity(0.49), 0.0);
        assert_eq!(AlphaMode::Mask(0.5).opacity(0.5), 1.0);
        assert_eq!(AlphaMode::Blend.opacity(0.25), 0.25);
    }

    #[test]
    fn test_alpha_mode_survives_encoding() {
        let m = MaterialParams::default().with_alpha_mode(AlphaMode::Mask(0.3));
        assert_eq!(m.alpha_mode(), AlphaMode::Mask(0.3));
        assert!(!m.is_opaque());
    }

    #[test]
    fn test_extinction_matches_attenuation_distance() {
        let m = MaterialParams::default().with_transmission(1.0, Vec3::splat(0.5), 2.0, 0.1);
        let sigma = m.extinction();
        // After one attenuation distance the transmittance equals the attenuation color
        let t = (-sigma * 2.0).exp();
        assert!((t.x - 0.5).abs() < 1e-5);
        assert!(m.has_volume());
    }
}
