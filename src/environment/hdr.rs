//! HDR/EXR latitude-longitude environment with importance sampling.

use std::f32::consts::PI;
use std::path::Path;

use super::{direction_to_uv, uv_to_direction, EnvSample, Emitter};
use crate::util::{luminance, sampling, Vec2, Vec3};
use crate::{Error, Result};

/// One level of the blur chain.
#[derive(Clone, Debug)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec3>,
}

impl MipLevel {
    fn fetch(&self, uv: Vec2) -> Vec3 {
        let x = ((uv.x * self.width as f32) as u32).min(self.width - 1);
        let y = ((uv.y * self.height as f32) as u32).min(self.height - 1);
        self.pixels[(y * self.width + x) as usize]
    }

    /// 2x2 box downsample (odd edges clamp).
    fn downsample(&self) -> Self {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let mut sum = Vec3::ZERO;
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let sx = (x * 2 + dx).min(self.width - 1);
                    let sy = (y * 2 + dy).min(self.height - 1);
                    sum += self.pixels[(sy * self.width + sx) as usize];
                }
                pixels.push(sum * 0.25);
            }
        }
        Self { width, height, pixels }
    }
}

/// Environment map plus its importance table.
pub struct HdrEnvironment {
    /// Level 0 is the source image; further levels are the blur chain
    pub mips: Vec<MipLevel>,
    /// Inclusive CDF over rows (one entry per row)
    pub marginal_cdf: Vec<f32>,
    /// Inclusive CDF within each row (width entries per row)
    pub conditional_cdf: Vec<f32>,
    /// Luminance integral over the sphere at intensity 1
    integral: f32,
    pub intensity: f32,
    pub rotation: f32,
}

/// Load HDR/EXR file using image crate as linear RGB.
fn load_image_file(path: &Path) -> Result<(u32, u32, Vec<Vec3>)> {
    use image::{GenericImageView, ImageReader};

    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let (width, height) = img.dimensions();
    let rgba = img.to_rgba32f();
    let pixels = rgba
        .as_raw()
        .chunks_exact(4)
        .map(|px| Vec3::new(px[0], px[1], px[2]))
        .collect();
    Ok((width, height, pixels))
}

/// Build importance sampling CDFs from luminance data.
/// Returns (conditional_cdf, marginal_cdf, weighted total).
///
/// For equirectangular maps, we weight by sin(theta) to account for solid angle.
fn build_env_cdfs(width: u32, height: u32, pixels: &[Vec3]) -> (Vec<f32>, Vec<f32>, f32) {
    let w = width as usize;
    let h = height as usize;

    let mut conditional_cdf = vec![0.0f32; w * h];
    let mut row_integrals = vec![0.0f32; h];

    for y in 0..h {
        let theta = PI * (y as f32 + 0.5) / h as f32;
        let sin_theta = theta.sin();

        let row_start = y * w;
        let mut row_sum = 0.0f32;
        for x in 0..w {
            row_sum += luminance(pixels[row_start + x]).max(0.0) * sin_theta;
            conditional_cdf[row_start + x] = row_sum;
        }
        if row_sum > 0.0 {
            for v in &mut conditional_cdf[row_start..row_start + w] {
                *v /= row_sum;
            }
        }
        row_integrals[y] = row_sum;
    }

    let mut marginal_cdf = vec![0.0f32; h];
    let mut total = 0.0f32;
    for y in 0..h {
        total += row_integrals[y];
        marginal_cdf[y] = total;
    }
    if total > 0.0 {
        for v in &mut marginal_cdf {
            *v /= total;
        }
    }

    (conditional_cdf, marginal_cdf, total)
}

/// First index whose inclusive CDF value reaches `u`.
fn search_cdf(cdf: &[f32], u: f32) -> usize {
    cdf.partition_point(|&c| c < u).min(cdf.len() - 1)
}

/// Probability mass of entry `i` in an inclusive CDF.
fn cdf_mass(cdf: &[f32], i: usize) -> f32 {
    cdf[i] - if i == 0 { 0.0 } else { cdf[i - 1] }
}

impl HdrEnvironment {
    /// Load an `.hdr` or `.exr` file.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if ext != "hdr" && ext != "exr" {
            return Err(Error::UnsupportedFormat(format!("environment map '.{ext}'")));
        }
        let (width, height, pixels) = load_image_file(path)?;
        let env = Self::from_pixels(width, height, pixels)?;
        log::info!(
            "Loaded environment {} ({}x{}, integral {:.3})",
            path.display(),
            width,
            height,
            env.integral
        );
        Ok(env)
    }

    /// Build from linear RGB pixels (row-major, top row = +Y).
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<Vec3>) -> Result<Self> {
        if width == 0 || height == 0 || pixels.len() != (width * height) as usize {
            return Err(Error::UnsupportedFormat(format!(
                "environment map {width}x{height} with {} pixels",
                pixels.len()
            )));
        }
        let (conditional_cdf, marginal_cdf, total) = build_env_cdfs(width, height, &pixels);
        let texel_area = (2.0 * PI / width as f32) * (PI / height as f32);

        let mut mips = vec![MipLevel { width, height, pixels }];
        while let Some(last) = mips.last() {
            if last.width == 1 && last.height == 1 {
                break;
            }
            let next = last.downsample();
            mips.push(next);
        }

        Ok(Self {
            mips,
            marginal_cdf,
            conditional_cdf,
            integral: total * texel_area,
            intensity: 1.0,
            rotation: 0.0,
        })
    }

    pub fn width(&self) -> u32 {
        self.mips[0].width
    }

    pub fn height(&self) -> u32 {
        self.mips[0].height
    }

    fn has_importance(&self) -> bool {
        self.marginal_cdf.last().is_some_and(|&c| c > 0.0)
    }

    /// Pdf of picking texel (x, y) converted to solid angle at `sin_theta`.
    fn texel_pdf(&self, x: usize, y: usize, sin_theta: f32) -> f32 {
        if sin_theta <= 1e-6 {
            return 0.0;
        }
        let w = self.width() as usize;
        let row = &self.conditional_cdf[y * w..(y + 1) * w];
        let p = cdf_mass(&self.marginal_cdf, y) * cdf_mass(row, x);
        p * (w * self.height() as usize) as f32 / (2.0 * PI * PI * sin_theta)
    }
}

impl Emitter for HdrEnvironment {
    fn radiance(&self, dir: Vec3) -> Vec3 {
        self.mips[0].fetch(direction_to_uv(dir, self.rotation)) * self.intensity
    }

    fn sample(&self, xi: Vec2) -> EnvSample {
        if !self.has_importance() {
            let direction = sampling::uniform_sphere(xi);
            return EnvSample {
                direction,
                pdf: 1.0 / (4.0 * PI),
                radiance: self.radiance(direction),
                is_delta: false,
            };
        }
        let (w, h) = (self.width() as usize, self.height() as usize);
        let y = search_cdf(&self.marginal_cdf, xi.y);
        let row = &self.conditional_cdf[y * w..(y + 1) * w];
        let x = search_cdf(row, xi.x);

        // Reuse the variates for the position inside the texel
        let dy = ((xi.y - (self.marginal_cdf[y] - cdf_mass(&self.marginal_cdf, y))) / cdf_mass(&self.marginal_cdf, y).max(1e-12))
            .clamp(0.0, 1.0);
        let dx = ((xi.x - (row[x] - cdf_mass(row, x))) / cdf_mass(row, x).max(1e-12)).clamp(0.0, 1.0);
        let uv = Vec2::new((x as f32 + dx) / w as f32, (y as f32 + dy) / h as f32);
        let direction = uv_to_direction(uv, self.rotation);
        let sin_theta = (uv.y * PI).sin();

        EnvSample {
            direction,
            pdf: self.texel_pdf(x, y, sin_theta),
            radiance: self.mips[0].pixels[y * w + x] * self.intensity,
            is_delta: false,
        }
    }

    fn eval_pdf(&self, dir: Vec3) -> f32 {
        if !self.has_importance() {
            return 1.0 / (4.0 * PI);
        }
        let (w, h) = (self.width() as usize, self.height() as usize);
        let uv = direction_to_uv(dir, self.rotation);
        let x = ((uv.x * w as f32) as usize).min(w - 1);
        let y = ((uv.y * h as f32) as usize).min(h - 1);
        self.texel_pdf(x, y, (uv.y * PI).sin())
    }

    fn background(&self, dir: Vec3, blur: f32) -> Vec3 {
        let uv = direction_to_uv(dir, self.rotation);
        let level = blur.clamp(0.0, 1.0) * (self.mips.len() - 1) as f32;
        let lo = level.floor() as usize;
        let hi = (lo + 1).min(self.mips.len() - 1);
        let a = self.mips[lo].fetch(uv);
        let b = self.mips[hi].fetch(uv);
        a.lerp(b, level - lo as f32) * self.intensity
    }

    fn integral(&self) -> f32 {
        self.integral * self.intensity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(width: u32, height: u32, value: f32) -> HdrEnvironment {
        HdrEnvironment::from_pixels(width, height, vec![Vec3::splat(value); (width * height) as usize]).unwrap()
    }

    #[test]
    fn test_constant_map_integral_is_four_pi() {
        let env = constant(64, 32, 1.0);
        assert!((env.integral() - 4.0 * PI).abs() < 0.05, "{}", env.integral());
    }

    #[test]
    fn test_cdfs_end_at_one() {
        let env = constant(16, 8, 2.0);
        assert!((env.marginal_cdf.last().unwrap() - 1.0).abs() < 1e-5);
        for y in 0..8 {
            assert!((env.conditional_cdf[y * 16 + 15] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_sample_pdf_matches_eval_pdf() {
        let mut pixels = vec![Vec3::splat(0.1); 32 * 16];
        pixels[5 * 32 + 7] = Vec3::splat(50.0);
        let mut env = HdrEnvironment::from_pixels(32, 16, pixels).unwrap();
        env.rotation = 0.4;
        let mut rng = sampling::Rng::new(9);
        for _ in 0..200 {
            let s = env.sample(rng.next_vec2());
            let pdf = env.eval_pdf(s.direction);
            assert!(s.pdf > 0.0);
            assert!((s.pdf - pdf).abs() <= 1e-3 * s.pdf.max(1.0), "{} vs {}", s.pdf, pdf);
        }
    }

    #[test]
    fn test_importance_estimate_matches_integral() {
        let mut pixels = vec![Vec3::splat(0.2); 32 * 16];
        pixels[3 * 32 + 20] = Vec3::splat(100.0);
        let env = HdrEnvironment::from_pixels(32, 16, pixels).unwrap();
        let mut rng = sampling::Rng::new(3);
        let n = 20_000;
        let mut sum = 0.0;
        for _ in 0..n {
            let s = env.sample(rng.next_vec2());
            if s.pdf > 0.0 {
                sum += luminance(s.radiance) / s.pdf;
            }
        }
        let estimate = sum / n as f32;
        assert!((estimate - env.integral()).abs() / env.integral() < 0.05, "{estimate} vs {}", env.integral());
    }

    #[test]
    fn test_blur_chain_preserves_mean() {
        let mut pixels = vec![Vec3::ZERO; 8 * 4];
        pixels[0] = Vec3::splat(32.0);
        let env = HdrEnvironment::from_pixels(8, 4, pixels).unwrap();
        assert_eq!(env.mips.last().unwrap().pixels.len(), 1);
        assert!((env.mips.last().unwrap().pixels[0].x - 1.0).abs() < 1e-5);
        assert_eq!(env.background(Vec3::Y, 1.0), Vec3::splat(1.0));
    }

    #[test]
    fn test_missing_file_reported() {
        assert!(matches!(
            HdrEnvironment::load(Path::new("/nope/sky.hdr")),
            Err(Error::FileNotFound(_))
        ));
    }
}
