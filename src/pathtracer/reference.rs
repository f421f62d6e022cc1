//! CPU reference integrator.
//!
//! Follows `shaders/pathtrace.wgsl` step for step (same random stream,
//! same hit state, same policies) so GPU changes can be checked against
//! it. Textures are not sampled: materials use their factors times the
//! vertex color.

use std::ops::{Add, Mul};

use gltf_pbr::bsdf::{self, SurfaceSample};
use gltf_pbr::MaterialParams;
use rayon::prelude::*;

use super::accumulation::{accumulate, Accumulation};
use super::policy::{self, ShadowTransmission};
use super::raygen::{self, Lens};
use super::PathTracerSettings;
use crate::accel::{AccelCache, Candidate, Ray, TraceFlags};
use crate::environment::Environment;
use crate::scene::descriptor::{Camera, DebugMethod, NO_OBJECT};
use crate::scene::{LightKind, Scene};
use crate::util::{sampling::Rng, Mat4, UVec2, Vec2, Vec3, Vec4};

/// Origin offset along the geometric normal, relative to the hit magnitude.
const RAY_EPSILON: f32 = 1e-4;

/// Inputs that change per frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameParams {
    pub frame: u32,
    pub samples: u32,
    /// Halton offset in [-0.5, 0.5)² replacing the random sub-pixel offset
    pub jitter: Option<Vec2>,
    pub prev_view_proj: Mat4,
}

impl FrameParams {
    pub fn new(frame: u32, samples: u32) -> Self {
        Self {
            frame,
            samples,
            jitter: None,
            prev_view_proj: Mat4::IDENTITY,
        }
    }
}

/// One pixel's outputs: radiance, the denoiser guides of the first sample
/// and the object ID under the pixel centre.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelSample {
    /// Mean over the frame's samples
    pub color: Vec3,
    pub albedo: Vec3,
    /// World normal (xyz) and roughness (w)
    pub normal_roughness: Vec4,
    /// View depth (x) and motion in pixels (yz)
    pub depth_motion: Vec3,
    pub object_id: u32,
}

impl Default for PixelSample {
    fn default() -> Self {
        Self {
            color: Vec3::ZERO,
            albedo: Vec3::ZERO,
            normal_roughness: Vec4::ZERO,
            depth_motion: Vec3::ZERO,
            object_id: NO_OBJECT,
        }
    }
}

/// Image of [`PixelSample`]s, row-major from the top-left.
#[derive(Clone, Debug)]
pub struct ReferenceImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<PixelSample>,
}

impl ReferenceImage {
    pub fn get(&self, x: u32, y: u32) -> &PixelSample {
        &self.pixels[(y * self.width + x) as usize]
    }

    pub fn colors(&self) -> Vec<Vec3> {
        self.pixels.iter().map(|p| p.color).collect()
    }
}

/// Material inputs at a hit.
#[derive(Clone, Copy, Debug)]
struct Surface {
    params: MaterialParams,
    /// Base color factor times vertex color
    base: Vec4,
    opacity: f32,
}

impl Surface {
    fn bsdf(&self) -> SurfaceSample {
        let mut s = SurfaceSample::from_params(&self.params);
        s.base_color = self.base.truncate();
        s
    }
}

/// Geometry at a committed hit, in world space.
#[derive(Clone, Copy, Debug)]
struct HitState {
    position: Vec3,
    /// Faces the incoming ray
    geo_normal: Vec3,
    normal: Vec3,
    tangent: Vec3,
    bitangent: Vec3,
    uv0: Vec2,
    uv1: Vec2,
    color: Vec4,
}

#[inline]
fn interpolate<T>(a: T, b: T, c: T, w: Vec3) -> T
where
    T: Mul<f32, Output = T> + Add<Output = T>,
{
    a * w.x + b * w.y + c * w.z
}

#[inline]
fn offset_origin(p: Vec3, n: Vec3) -> Vec3 {
    p + n * (RAY_EPSILON * (1.0 + p.abs().max_element()))
}

/// Emitted radiance and falloff of one scene light towards a point.
struct LightSample {
    direction: Vec3,
    distance: f32,
    radiance: Vec3,
}

fn sample_scene_light(light: &crate::scene::Light, p: Vec3) -> Option<LightSample> {
    let emitted = light.color * light.intensity;
    match light.kind {
        LightKind::Directional => Some(LightSample {
            direction: (-light.direction).normalize_or_zero(),
            distance: f32::INFINITY,
            radiance: emitted,
        }),
        LightKind::Point => {
            let to_light = light.position - p;
            let d2 = to_light.length_squared();
            if d2 <= 0.0 {
                return None;
            }
            let d = d2.sqrt();
            let falloff = if light.range > 0.0 {
                let r = (d / light.range).powi(4);
                (1.0 - r).clamp(0.0, 1.0).powi(2)
            } else {
                1.0
            };
            Some(LightSample {
                direction: to_light / d,
                distance: d,
                radiance: emitted * (falloff / d2),
            })
        }
    }
}

/// CPU path tracer over a scene snapshot.
pub struct ReferenceRenderer<'a> {
    pub scene: &'a Scene,
    pub accel: &'a AccelCache,
    pub env: &'a Environment,
    pub settings: &'a PathTracerSettings,
}

impl<'a> ReferenceRenderer<'a> {
    pub fn new(scene: &'a Scene, accel: &'a AccelCache, env: &'a Environment, settings: &'a PathTracerSettings) -> Self {
        Self {
            scene,
            accel,
            env,
            settings,
        }
    }

    /// Render every pixel of one frame.
    #[tracing::instrument(skip_all, fields(frame = params.frame, width = viewport.x, height = viewport.y))]
    pub fn render_frame(&self, camera: &Camera, viewport: UVec2, params: &FrameParams) -> ReferenceImage {
        let pixels = (0..viewport.x * viewport.y)
            .into_par_iter()
            .map(|i| self.render_pixel(camera, viewport, UVec2::new(i % viewport.x, i / viewport.x), params))
            .collect();
        ReferenceImage {
            width: viewport.x,
            height: viewport.y,
            pixels,
        }
    }

    /// Accumulate `frames` frames of a still camera; returns the running mean.
    pub fn render_progressive(&self, camera: &Camera, viewport: UVec2, frames: u32) -> Vec<Vec3> {
        let mut state = Accumulation::new(self.settings.effective_max_frames());
        let mut acc = vec![Vec3::ZERO; (viewport.x * viewport.y) as usize];
        let samples = self.settings.max_samples.max(1);
        for _ in 0..frames {
            let Some(frame) = state.begin_frame(&camera.view, camera.fov_y) else {
                break;
            };
            let image = self.render_frame(camera, viewport, &FrameParams::new(frame, samples));
            let w = state.blend_weight(samples);
            for (a, p) in acc.iter_mut().zip(&image.pixels) {
                *a = accumulate(*a, p.color, w);
            }
            state.end_frame(samples);
        }
        acc
    }

    /// All samples of one pixel for one frame.
    pub fn render_pixel(&self, camera: &Camera, viewport: UVec2, pixel: UVec2, params: &FrameParams) -> PixelSample {
        let (inv_view, inv_proj) = raygen::camera_matrices(camera);
        let lens = Lens {
            aperture: self.settings.aperture,
            focal_distance: self.settings.focal_distance,
        };
        let samples = if self.settings.debug_method == DebugMethod::None {
            params.samples.max(1)
        } else {
            1
        };

        let mut out = PixelSample {
            object_id: self.pixel_object_id(&inv_view, &inv_proj, pixel, viewport),
            ..Default::default()
        };
        let mut sum = Vec3::ZERO;
        for s in 0..samples {
            let mut rng = Rng::for_pixel(pixel.x, pixel.y, params.frame, s);
            let offset = raygen::subpixel_offset(&mut rng, s, samples, params.jitter);
            let ray = raygen::primary_ray(&inv_view, &inv_proj, pixel, offset, viewport, lens, &mut rng);
            if s == 0 {
                self.write_guides(&mut out, camera, viewport, params, &ray, &mut rng.clone());
            }
            let c = if self.settings.debug_method == DebugMethod::None {
                self.trace_path(ray, &mut rng)
            } else {
                self.debug_output(&ray, &mut rng)
            };
            sum += c;
        }
        out.color = sum / samples as f32;
        out
    }

    /// Radiance along one camera path, firefly-clamped.
    pub fn trace_path(&self, mut ray: Ray, rng: &mut Rng) -> Vec3 {
        let env = self.env.active();
        let blur = self.env.settings.blur;
        let mut radiance = Vec3::ZERO;
        let mut throughput = Vec3::ONE;
        let mut inside = false;
        let mut last_delta = true;
        let mut last_pdf = 0.0;

        for depth in 0..=self.settings.max_depth {
            let Some(hit) = self.closest_hit(&ray, rng) else {
                if depth == 0 {
                    radiance += throughput * env.background(ray.direction, blur);
                } else {
                    let w = policy::bsdf_mis_weight(last_delta, last_pdf, env.eval_pdf(ray.direction));
                    radiance += throughput * env.radiance(ray.direction) * w;
                }
                break;
            };
            let state = self.hit_state(&hit, &ray);
            let surface = self.surface(hit.render_node, state.color);
            if inside {
                throughput *= (-surface.params.extinction() * hit.t).exp();
            }
            radiance += throughput * surface.params.emissive();
            if depth == self.settings.max_depth {
                break;
            }

            let wo = -ray.direction;
            let bsdf_surface = surface.bsdf();
            let env_sample = env.sample(rng.next_vec2());
            let scattered = bsdf::sample(&bsdf_surface, state.normal, wo, rng.next_vec3());

            // Shadow rays after BSDF sampling, in the kernel's order
            let origin = offset_origin(state.position, state.geo_normal);
            if env_sample.pdf > 0.0 {
                let l = env_sample.direction;
                if (l.dot(state.geo_normal) > 0.0) != inside {
                    let (f_cos, bsdf_pdf) = bsdf::eval(&bsdf_surface, state.normal, wo, l);
                    if f_cos.max_element() > 0.0 {
                        let w = policy::light_mis_weight(env_sample.is_delta, env_sample.pdf, bsdf_pdf);
                        let t = self.shadow_transmission(origin, l, f32::INFINITY, rng);
                        radiance += throughput * f_cos * env_sample.radiance * t * (w / env_sample.pdf);
                    }
                }
            }
            for light in &self.scene.lights {
                let Some(ls) = sample_scene_light(light, state.position) else {
                    continue;
                };
                let l = ls.direction;
                if (l.dot(state.geo_normal) > 0.0) == inside {
                    continue;
                }
                let (f_cos, _) = bsdf::eval(&bsdf_surface, state.normal, wo, l);
                if f_cos.max_element() <= 0.0 {
                    continue;
                }
                let t = self.shadow_transmission(origin, l, ls.distance, rng);
                radiance += throughput * f_cos * ls.radiance * t;
            }

            let Some(bs) = scattered else { break };
            throughput *= bs.weight;
            let next_origin = if bs.is_delta && bs.direction.dot(state.geo_normal) < 0.0 {
                inside = !inside;
                offset_origin(state.position, -state.geo_normal)
            } else {
                origin
            };
            ray = Ray::new(next_origin, bs.direction);
            last_delta = bs.is_delta;
            last_pdf = bs.pdf;

            match policy::russian_roulette(throughput, depth, self.settings.rr_min_depth, rng) {
                Some(p) => throughput /= p,
                None => break,
            }
        }
        policy::clamp_firefly(radiance, self.settings.firefly_clamp)
    }

    /// Closest hit with stochastic alpha acceptance.
    fn closest_hit(&self, ray: &Ray, rng: &mut Rng) -> Option<Candidate> {
        self.accel.trace(self.scene, ray, 0.0, f32::INFINITY, TraceFlags::CLOSEST, &mut |c| {
            let opacity = self.candidate_surface(c).opacity;
            policy::accept_candidate(opacity, rng)
        })
    }

    /// Transmission towards a light `t_max` away (0 when blocked).
    fn shadow_transmission(&self, origin: Vec3, dir: Vec3, t_max: f32, rng: &mut Rng) -> Vec3 {
        let ray = Ray::new(origin, dir);
        let mut shadow = ShadowTransmission::new(self.settings.shadow_t_min);
        let blocked = self.accel.trace(self.scene, &ray, 0.0, t_max, TraceFlags::SHADOW, &mut |c| {
            let s = self.candidate_surface(c);
            !shadow.on_candidate(&s.params, s.base.truncate(), s.opacity, c.t, rng)
        });
        if blocked.is_some() {
            Vec3::ZERO
        } else {
            shadow.transmission
        }
    }

    fn vertices(&self, c: &Candidate) -> Option<[&gltf_pbr::Vertex; 3]> {
        let prim = self.scene.primitives.get(c.primitive as usize)?;
        let base = c.triangle as usize * 3;
        let tri = prim.indices.get(base..base + 3)?;
        Some([
            prim.vertices.get(tri[0] as usize)?,
            prim.vertices.get(tri[1] as usize)?,
            prim.vertices.get(tri[2] as usize)?,
        ])
    }

    fn candidate_surface(&self, c: &Candidate) -> Surface {
        let color = match self.vertices(c) {
            Some([a, b, v]) => interpolate(Vec4::from(a.color), Vec4::from(b.color), Vec4::from(v.color), c.barycentrics),
            None => Vec4::ONE,
        };
        self.surface(c.render_node, color)
    }

    fn surface(&self, render_node: u32, vertex_color: Vec4) -> Surface {
        let params = self
            .scene
            .render_nodes
            .get(render_node as usize)
            .and_then(|rn| self.scene.materials.get(rn.material))
            .map(|m| m.params)
            .unwrap_or_default();
        let base = params.base_color * vertex_color;
        Surface {
            params,
            base,
            opacity: params.alpha_mode().opacity(base.w),
        }
    }

    fn hit_state(&self, c: &Candidate, ray: &Ray) -> HitState {
        let position = ray.at(c.t);
        let rn = &self.scene.render_nodes[c.render_node as usize];
        let prim = &self.scene.primitives[c.primitive as usize];
        let Some([a, b, v]) = self.vertices(c) else {
            let n = -ray.direction;
            let (tangent, bitangent) = bsdf::orthonormal_basis(n);
            return HitState {
                position,
                geo_normal: n,
                normal: n,
                tangent,
                bitangent,
                uv0: Vec2::ZERO,
                uv1: Vec2::ZERO,
                color: Vec4::ONE,
            };
        };
        let w = c.barycentrics;
        let wo = -ray.direction;

        let (pa, pb, pc) = (Vec3::from(a.position), Vec3::from(b.position), Vec3::from(v.position));
        let mut geo = rn.normal_matrix.transform_vector3((pb - pa).cross(pc - pa)).normalize_or(wo);
        let flipped = geo.dot(wo) < 0.0;
        if flipped {
            geo = -geo;
        }

        let mut normal = if prim.attributes.normals {
            let n = interpolate(Vec3::from(a.normal), Vec3::from(b.normal), Vec3::from(v.normal), w);
            rn.normal_matrix.transform_vector3(n).normalize_or(geo)
        } else {
            geo
        };
        if flipped {
            normal = -normal;
        }
        if normal.dot(wo) <= 0.0 {
            normal = geo;
        }

        let (tangent, bitangent) = if prim.attributes.tangents {
            let t4 = interpolate(Vec4::from(a.tangent), Vec4::from(b.tangent), Vec4::from(v.tangent), w);
            let t = rn.transform.transform_vector3(t4.truncate());
            let t = (t - normal * normal.dot(t)).normalize_or_zero();
            if t == Vec3::ZERO {
                bsdf::orthonormal_basis(normal)
            } else {
                let sign = if t4.w < 0.0 { -1.0 } else { 1.0 };
                (t, normal.cross(t) * sign)
            }
        } else {
            bsdf::orthonormal_basis(normal)
        };

        HitState {
            position,
            geo_normal: geo,
            normal,
            tangent,
            bitangent,
            uv0: interpolate(Vec2::from(a.uv0), Vec2::from(b.uv0), Vec2::from(v.uv0), w),
            uv1: interpolate(Vec2::from(a.uv1), Vec2::from(b.uv1), Vec2::from(v.uv1), w),
            color: interpolate(Vec4::from(a.color), Vec4::from(b.color), Vec4::from(v.color), w),
        }
    }

    /// Attribute view of the primary hit (miss = black).
    fn debug_output(&self, ray: &Ray, rng: &mut Rng) -> Vec3 {
        let Some(hit) = self.closest_hit(ray, rng) else {
            return Vec3::ZERO;
        };
        let state = self.hit_state(&hit, ray);
        let s = self.surface(hit.render_node, state.color);
        let encode = |v: Vec3| v * 0.5 + Vec3::splat(0.5);
        match self.settings.debug_method {
            DebugMethod::None => Vec3::ZERO,
            DebugMethod::BaseColor => s.base.truncate(),
            DebugMethod::Metallic => Vec3::splat(s.params.metallic()),
            DebugMethod::Roughness => Vec3::splat(s.params.roughness()),
            DebugMethod::Normal => encode(state.normal),
            DebugMethod::Tangent => encode(state.tangent),
            DebugMethod::Bitangent => encode(state.bitangent),
            DebugMethod::Emissive => s.params.emissive(),
            DebugMethod::Opacity => Vec3::splat(s.opacity * (1.0 - s.params.transmission())),
            DebugMethod::TexCoord0 => state.uv0.extend(0.0),
            DebugMethod::TexCoord1 => state.uv1.extend(0.0),
        }
    }

    /// Render node under the pixel centre (opaque, both faces, no jitter).
    fn pixel_object_id(&self, inv_view: &Mat4, inv_proj: &Mat4, pixel: UVec2, viewport: UVec2) -> u32 {
        let ray = raygen::pinhole_ray(inv_view, inv_proj, pixel, Vec2::splat(0.5), viewport);
        self.accel
            .trace(self.scene, &ray, 0.0, f32::INFINITY, TraceFlags::PICK, &mut |_| true)
            .map_or(NO_OBJECT, |h| h.render_node)
    }

    /// Denoiser guides from the first sample's primary ray.
    fn write_guides(&self, out: &mut PixelSample, camera: &Camera, viewport: UVec2, params: &FrameParams, ray: &Ray, rng: &mut Rng) {
        let hit = self.closest_hit(ray, rng);
        let world = match &hit {
            Some(h) => ray.at(h.t),
            None => ray.at(camera.far),
        };
        if let Some(h) = &hit {
            let state = self.hit_state(h, ray);
            let s = self.surface(h.render_node, state.color);
            out.albedo = s.base.truncate();
            out.normal_roughness = state.normal.extend(s.params.roughness());
        }
        let depth = -camera.view.transform_point3(world).z;
        let to_pixel = |m: Mat4| {
            let ndc = m.project_point3(world);
            Vec2::new((ndc.x * 0.5 + 0.5) * viewport.x as f32, (0.5 - ndc.y * 0.5) * viewport.y as f32)
        };
        let motion = to_pixel(camera.view_proj()) - to_pixel(params.prev_view_proj);
        out.depth_motion = Vec3::new(depth, motion.x, motion.y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvKind, EnvironmentSettings, HdrEnvironment, SkyParams};
    use crate::scene::cube_scene;
    use crate::util::{luminance, sampling};
    use gltf_pbr::AlphaMode;

    fn accel_for(scene: &Scene) -> AccelCache {
        let mut accel = AccelCache::new();
        accel.update(scene, 1);
        accel
    }

    fn solid_env(color: Vec3) -> Environment {
        let settings = EnvironmentSettings {
            kind: EnvKind::SolidColor,
            solid_color: color.to_array(),
            ..Default::default()
        };
        Environment::new(settings, SkyParams::default())
    }

    fn front_camera() -> Camera {
        Camera::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y, 0.6, 1.0)
    }

    #[test]
    fn test_unlit_cube_on_black_is_black() {
        let scene = cube_scene(MaterialParams::diffuse(Vec3::new(0.8, 0.2, 0.2)), &[Mat4::IDENTITY]);
        let accel = accel_for(&scene);
        let env = solid_env(Vec3::ZERO);
        let settings = PathTracerSettings {
            max_depth: 1,
            max_samples: 1,
            max_frames: 1,
            ..Default::default()
        };
        let r = ReferenceRenderer::new(&scene, &accel, &env, &settings);
        let image = r.render_progressive(&front_camera(), UVec2::new(8, 8), 1);
        assert!(image.iter().all(|c| c.max_element() <= 1e-6));
    }

    #[test]
    fn test_empty_scene_shows_environment_background() {
        let scene = Scene::default();
        let accel = accel_for(&scene);
        let pixels: Vec<Vec3> = (0..32 * 16)
            .map(|i| Vec3::new((i % 32) as f32 / 32.0, (i / 32) as f32 / 16.0, 0.25))
            .collect();
        let mut env = Environment::default();
        env.settings.intensity = 1.5;
        env.set_hdr(HdrEnvironment::from_pixels(32, 16, pixels).unwrap());
        let settings = PathTracerSettings {
            max_depth: 0,
            firefly_clamp: 0.0,
            ..Default::default()
        };
        let r = ReferenceRenderer::new(&scene, &accel, &env, &settings);
        let camera = front_camera();
        let viewport = UVec2::new(6, 4);
        let image = r.render_frame(&camera, viewport, &FrameParams::new(0, 1));
        let (iv, ip) = raygen::camera_matrices(&camera);
        for y in 0..viewport.y {
            for x in 0..viewport.x {
                let mut rng = Rng::for_pixel(x, y, 0, 0);
                let offset = raygen::subpixel_offset(&mut rng, 0, 1, None);
                let ray = raygen::pinhole_ray(&iv, &ip, UVec2::new(x, y), offset, viewport);
                let expected = env.active().background(ray.direction, 0.0);
                assert!((image.get(x, y).color - expected).abs().max_element() < 1e-5);
                assert_eq!(image.get(x, y).object_id, NO_OBJECT);
            }
        }
    }

    #[test]
    fn test_blended_surface_transmits_one_minus_alpha() {
        let alpha = 0.3;
        let material = MaterialParams::diffuse(Vec3::ONE)
            .with_alpha_mode(AlphaMode::Blend)
            .with_alpha(alpha);
        let scene = cube_scene(material, &[Mat4::IDENTITY]);
        let accel = accel_for(&scene);
        let env = solid_env(Vec3::ONE);
        let settings = PathTracerSettings {
            max_depth: 0,
            max_samples: 1,
            ..Default::default()
        };
        let r = ReferenceRenderer::new(&scene, &accel, &env, &settings);
        let image = r.render_progressive(&front_camera(), UVec2::new(8, 8), 400);
        // the centre 2x2 pixels look through exactly one front face
        let mean: f32 = [(3, 3), (4, 3), (3, 4), (4, 4)]
            .iter()
            .map(|&(x, y)| image[y * 8 + x].x)
            .sum::<f32>()
            / 4.0;
        assert!((mean - (1.0 - alpha)).abs() < 0.05, "mean {mean}");
    }

    #[test]
    fn test_samples_respect_firefly_clamp() {
        let scene = cube_scene(MaterialParams::emissive_light(Vec3::ONE, 1000.0), &[Mat4::IDENTITY]);
        let accel = accel_for(&scene);
        let env = solid_env(Vec3::splat(50.0));
        let settings = PathTracerSettings {
            firefly_clamp: 4.0,
            ..Default::default()
        };
        let r = ReferenceRenderer::new(&scene, &accel, &env, &settings);
        let image = r.render_frame(&front_camera(), UVec2::new(8, 8), &FrameParams::new(0, 1));
        for p in &image.pixels {
            assert!(luminance(p.color) <= 4.0 + 1e-3);
        }
    }

    #[test]
    fn test_zero_aperture_ignores_focal_distance() {
        let scene = cube_scene(MaterialParams::diffuse(Vec3::splat(0.5)), &[Mat4::IDENTITY]);
        let accel = accel_for(&scene);
        let env = Environment::default();
        let a = PathTracerSettings::default();
        let b = PathTracerSettings {
            focal_distance: 1.5,
            ..a.clone()
        };
        let camera = front_camera();
        let params = FrameParams::new(3, 2);
        let ia = ReferenceRenderer::new(&scene, &accel, &env, &a).render_frame(&camera, UVec2::new(6, 6), &params);
        let ib = ReferenceRenderer::new(&scene, &accel, &env, &b).render_frame(&camera, UVec2::new(6, 6), &params);
        assert_eq!(ia.colors(), ib.colors());
    }

    #[test]
    fn test_guides_describe_primary_hit() {
        let scene = cube_scene(MaterialParams::diffuse(Vec3::new(0.2, 0.4, 0.6)), &[Mat4::IDENTITY]);
        let accel = accel_for(&scene);
        let env = Environment::default();
        let settings = PathTracerSettings::default();
        let r = ReferenceRenderer::new(&scene, &accel, &env, &settings);
        let camera = front_camera();
        let mut params = FrameParams::new(0, 1);
        params.prev_view_proj = camera.view_proj();
        let p = r.render_pixel(&camera, UVec2::new(9, 9), UVec2::new(4, 4), &params);
        assert_eq!(p.object_id, 0);
        assert!((p.albedo - Vec3::new(0.2, 0.4, 0.6)).length() < 1e-5);
        assert!(p.normal_roughness.truncate().dot(Vec3::Z) > 0.99);
        assert!((p.depth_motion.x - 2.5).abs() < 0.05);
        assert!(p.depth_motion.y.abs() < 1e-3 && p.depth_motion.z.abs() < 1e-3);
    }

    #[test]
    fn test_debug_normal_is_encoded() {
        let scene = cube_scene(MaterialParams::diffuse(Vec3::ONE), &[Mat4::IDENTITY]);
        let accel = accel_for(&scene);
        let env = solid_env(Vec3::ONE);
        let settings = PathTracerSettings {
            debug_method: DebugMethod::Normal,
            ..Default::default()
        };
        let r = ReferenceRenderer::new(&scene, &accel, &env, &settings);
        let image = r.render_frame(&front_camera(), UVec2::new(9, 9), &FrameParams::new(0, 4));
        assert!((image.get(4, 4).color - Vec3::new(0.5, 0.5, 1.0)).length() < 1e-4);
        // misses are black in debug views
        assert_eq!(image.get(0, 0).color, Vec3::ZERO);
    }

    #[test]
    fn test_sky_lit_face_converges() {
        let scene = cube_scene(MaterialParams::diffuse(Vec3::splat(0.7)), &[Mat4::IDENTITY]);
        let accel = accel_for(&scene);
        let env = Environment::default();
        let settings = PathTracerSettings {
            max_samples: 32,
            max_frames: 200,
            ..Default::default()
        };
        let r = ReferenceRenderer::new(&scene, &accel, &env, &settings);
        let camera = Camera::look_at(Vec3::new(0.0, 3.0, 1.5), Vec3::new(0.0, 0.5, 0.0), Vec3::Y, 0.8, 1.0);
        let viewport = UVec2::new(16, 16);
        let patch: Vec<UVec2> = (6..10).flat_map(|y| (6..10).map(move |x| UVec2::new(x, y))).collect();

        let mut state = Accumulation::new(settings.max_frames);
        let mut acc = vec![Vec3::ZERO; patch.len()];
        while let Some(frame) = state.begin_frame(&camera.view, camera.fov_y) {
            let params = FrameParams::new(frame, settings.max_samples);
            let w = state.blend_weight(settings.max_samples);
            for (a, &px) in acc.iter_mut().zip(&patch) {
                *a = accumulate(*a, r.render_pixel(&camera, viewport, px, &params).color, w);
            }
            state.end_frame(settings.max_samples);
        }

        let lum: Vec<f32> = acc.iter().map(|&c| luminance(c)).collect();
        let mean = lum.iter().sum::<f32>() / lum.len() as f32;
        let var = lum.iter().map(|l| (l - mean).powi(2)).sum::<f32>() / lum.len() as f32;
        assert!(mean > 0.0);
        assert!(var.sqrt() <= 0.01 * mean, "std {} mean {mean}", var.sqrt());
    }

    #[test]
    fn test_shadow_of_opaque_cube_blocks_light() {
        let scene = cube_scene(MaterialParams::default(), &[Mat4::IDENTITY]);
        let accel = accel_for(&scene);
        let env = Environment::default();
        let settings = PathTracerSettings::default();
        let r = ReferenceRenderer::new(&scene, &accel, &env, &settings);
        let mut rng = Rng::new(9);
        for _ in 0..32 {
            let d = sampling::uniform_sphere(rng.next_vec2());
            let origin = -d * 3.0;
            let t = r.shadow_transmission(origin, d, 6.0, &mut rng);
            // every line through the origin crosses the cube
            assert_eq!(t, Vec3::ZERO);
        }
    }
}
