//! Outline of the selected render node.
//!
//! A display pixel is overwritten with the silhouette color when its 3x3
//! neighbourhood in the object-ID image holds the selected ID and some
//! other ID. Neighbours outside the image are skipped.

use bytemuck::{Pod, Zeroable};

use crate::gpu::{ComputeKernel, GBuffer, GpuContext};
use crate::shaders;

pub const DEFAULT_COLOR: [f32; 3] = [1.0, 0.6, 0.1];

/// CPU twin of the GPU pass: true for pixels to overwrite.
pub fn silhouette_mask(ids: &[u32], width: u32, height: u32, selected: u32) -> Vec<bool> {
    let (w, h) = (width as i64, height as i64);
    let mut mask = vec![false; ids.len()];
    for y in 0..h {
        for x in 0..w {
            let mut has_selected = false;
            let mut has_other = false;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (px, py) = (x + dx, y + dy);
                    if px < 0 || py < 0 || px >= w || py >= h {
                        continue;
                    }
                    if ids[(py * w + px) as usize] == selected {
                        has_selected = true;
                    } else {
                        has_other = true;
                    }
                }
            }
            mask[(y * w + x) as usize] = has_selected && has_other;
        }
    }
    mask
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SilhouettePush {
    width: u32,
    height: u32,
    selected: u32,
    _pad: u32,
    color: [f32; 4],
}

pub struct SilhouettePass {
    kernel: ComputeKernel,
}

impl SilhouettePass {
    pub fn new(ctx: &mut GpuContext, gbuffer_layout: &wgpu::BindGroupLayout) -> Self {
        let kernel = ComputeKernel::new(
            ctx,
            "silhouette",
            &shaders::silhouette_source(),
            &[gbuffer_layout],
            std::mem::size_of::<SilhouettePush>() as u32,
        );
        Self { kernel }
    }

    pub fn run(&self, encoder: &mut wgpu::CommandEncoder, gbuffer: &GBuffer, selected: u32, color: [f32; 3]) -> bool {
        let (width, height) = gbuffer.size();
        let push = SilhouettePush {
            width,
            height,
            selected,
            _pad: 0,
            color: [color[0], color[1], color[2], 1.0],
        };
        self.kernel
            .dispatch(encoder, &[gbuffer.bind_group()], bytemuck::bytes_of(&push), (width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::descriptor::NO_OBJECT;

    const N: u32 = NO_OBJECT;

    #[test]
    fn test_outline_is_the_boundary_ring() {
        #[rustfmt::skip]
        let ids = [
            N, N, N, N, N,
            N, 3, 3, 3, N,
            N, 3, 3, 3, N,
            N, 3, 3, 3, N,
            N, N, N, N, N,
        ];
        let mask = silhouette_mask(&ids, 5, 5, 3);
        // interior pixel sees only the selected id
        assert!(!mask[12]);
        // corners of the object and the background next to it are both marked
        assert!(mask[6]);
        assert!(mask[0]);
        assert!(mask[24]);
    }

    #[test]
    fn test_highlighted_iff_both_ids_in_neighbourhood() {
        let ids = [1, 1, 2, 2, 2, 2, 7, 7, 7];
        let mask = silhouette_mask(&ids, 3, 3, 7);
        for (i, m) in mask.iter().enumerate() {
            let (x, y) = ((i % 3) as i64, (i / 3) as i64);
            let mut sel = false;
            let mut other = false;
            for j in 0..9 {
                let (jx, jy) = ((j % 3) as i64, (j / 3) as i64);
                if (jx - x).abs() <= 1 && (jy - y).abs() <= 1 {
                    if ids[j] == 7 {
                        sel = true;
                    } else {
                        other = true;
                    }
                }
            }
            assert_eq!(*m, sel && other, "pixel {i}");
        }
    }

    #[test]
    fn test_nothing_selected_nothing_marked() {
        let ids = [0, 1, 2, 3];
        assert!(silhouette_mask(&ids, 2, 2, 9).iter().all(|m| !m));
        // a fully selected image has no other id
        assert!(silhouette_mask(&[5; 4], 2, 2, 5).iter().all(|m| !m));
    }
}
