//! Command-line options.
//!
//! `gltf-viewer [scene.gltf|scene.glb] [--flag [value]]...`
//!
//! Flags take one dash or two. Boolean flags may stand alone (true) or be
//! followed by `0`/`1`/`true`/`false`. Unknown flags are ignored.

use std::path::PathBuf;

use crate::denoise::DenoiserKind;
use crate::environment::EnvKind;
use crate::frame::Backend;
use crate::scene::descriptor::DebugMethod;
use crate::settings::RendererState;

/// Values given on the command line; `None` keeps the persisted value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Options {
    pub scene: Option<PathBuf>,
    pub hdr: Option<PathBuf>,
    pub max_frames: Option<u32>,
    pub max_samples: Option<u32>,
    pub max_depth: Option<u32>,
    pub show_axis: Option<bool>,
    pub environment: Option<EnvKind>,
    pub backend: Option<Backend>,
    pub ai_denoiser: Option<bool>,
    pub mc_denoiser: Option<bool>,
    pub mc_auto_denoise: Option<bool>,
    pub mc_auto_denoise_interval: Option<u32>,
    pub raster_wireframe: Option<bool>,
    pub raster_use_recorded: Option<bool>,
    pub hdr_intensity: Option<f32>,
    pub hdr_rotation: Option<f32>,
    pub hdr_blur: Option<f32>,
    pub solid_background_color: Option<[f32; 3]>,
    pub silhouette_color: Option<[f32; 3]>,
    pub debug_method: Option<DebugMethod>,
    pub exposure: Option<f32>,
    pub gamma: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    /// Unrecognised flags, kept for diagnostics
    pub ignored: Vec<String>,
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn parse_vec3(s: &str) -> Option<[f32; 3]> {
    let v: Vec<f32> = s.split(',').map(|t| t.trim().parse().ok()).collect::<Option<_>>()?;
    <[f32; 3]>::try_from(v).ok()
}

impl Options {
    pub fn from_env() -> Self {
        Self::parse(std::env::args().skip(1))
    }

    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut opts = Self::default();
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            i += 1;
            let Some(flag) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
                if opts.scene.is_none() {
                    opts.scene = Some(PathBuf::from(arg));
                }
                continue;
            };
            let next = args.get(i).map(String::as_str);

            // optional boolean argument
            let mut flag_bool = || match next.and_then(parse_bool) {
                Some(b) => {
                    i += 1;
                    b
                }
                None => true,
            };
            match flag {
                "raytrace" => {
                    if flag_bool() {
                        opts.backend = Some(Backend::PathTracer);
                    }
                }
                "raster" => {
                    if flag_bool() {
                        opts.backend = Some(Backend::Rasterizer);
                    }
                }
                "sky" => {
                    if flag_bool() {
                        opts.environment = Some(EnvKind::Sky);
                    }
                }
                "solidBackground" | "useSolidBackground" => {
                    if flag_bool() {
                        opts.environment = Some(EnvKind::SolidColor);
                    }
                }
                "showAxis" => opts.show_axis = Some(flag_bool()),
                "dlssEnable" => opts.ai_denoiser = Some(flag_bool()),
                "optixEnable" => opts.mc_denoiser = Some(flag_bool()),
                "optixAutoDenoiseEnabled" => opts.mc_auto_denoise = Some(flag_bool()),
                "rasterWireframe" => opts.raster_wireframe = Some(flag_bool()),
                "rasterUseRecordedCmd" => opts.raster_use_recorded = Some(flag_bool()),
                _ => {
                    // flags that need a value
                    let Some(value) = next else {
                        log::debug!("Flag '{arg}' is missing its value");
                        opts.ignored.push(arg.clone());
                        continue;
                    };
                    if opts.apply_valued(flag, value) {
                        i += 1;
                    } else {
                        log::debug!("Ignoring command-line flag '{arg}'");
                        opts.ignored.push(arg.clone());
                    }
                }
            }
        }
        opts
    }

    /// Handle a flag that takes a value. False if the flag is unknown
    /// or the value does not parse.
    fn apply_valued(&mut self, flag: &str, value: &str) -> bool {
        match flag {
            "filename" => self.scene = Some(PathBuf::from(value)),
            "hdr" => self.hdr = Some(PathBuf::from(value)),
            "maxFrames" => self.max_frames = value.parse().ok(),
            "maxSamples" => self.max_samples = value.parse().ok(),
            "maxDepth" => self.max_depth = value.parse().ok(),
            "optixAutoDenoiseInterval" => self.mc_auto_denoise_interval = value.parse().ok(),
            "hdrEnvIntensity" => self.hdr_intensity = value.parse().ok(),
            "hdrEnvRotation" => self.hdr_rotation = value.parse().ok(),
            "hdrBlur" => self.hdr_blur = value.parse().ok(),
            "solidBackgroundColor" => self.solid_background_color = parse_vec3(value),
            "silhouetteColor" => self.silhouette_color = parse_vec3(value),
            "tmExposure" => self.exposure = value.parse().ok(),
            "tmGamma" => self.gamma = value.parse().ok(),
            "tmContrast" => self.contrast = value.parse().ok(),
            "tmSaturation" => self.saturation = value.parse().ok(),
            "envSystem" => {
                self.environment = match value {
                    "0" => Some(EnvKind::Sky),
                    "1" => Some(EnvKind::Hdr),
                    "2" => Some(EnvKind::SolidColor),
                    _ => None,
                }
            }
            "renderSystem" => {
                self.backend = match value {
                    "0" => Some(Backend::PathTracer),
                    "1" => Some(Backend::Rasterizer),
                    _ => None,
                }
            }
            "debugMethod" => {
                self.debug_method = value
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| DebugMethod::ALL.get(i).copied())
            }
            _ => return false,
        }
        true
    }

    /// Override persisted values for this session.
    pub fn apply(&self, state: &mut RendererState) {
        let pt = &mut state.path_tracer;
        if let Some(v) = self.max_frames {
            pt.max_frames = v.max(1);
        }
        if let Some(v) = self.max_samples {
            pt.max_samples = v.clamp(1, 100);
        }
        if let Some(v) = self.max_depth {
            pt.max_depth = v;
        }
        if let Some(v) = self.debug_method {
            pt.debug_method = v;
        }
        if let Some(v) = self.show_axis {
            state.show_axis = v;
        }
        if let Some(v) = self.backend {
            state.renderer = v;
        }
        if let Some(v) = self.environment {
            state.environment.kind = v;
        }
        if self.hdr.is_some() && self.environment.is_none() {
            state.environment.kind = EnvKind::Hdr;
        }
        if let Some(v) = self.hdr_intensity {
            state.environment.intensity = v;
        }
        if let Some(v) = self.hdr_rotation {
            state.environment.rotation = v;
        }
        if let Some(v) = self.hdr_blur {
            state.environment.blur = v.clamp(0.0, 1.0);
        }
        if let Some(v) = self.solid_background_color {
            state.environment.solid_color = v;
        }
        if let Some(v) = self.silhouette_color {
            state.silhouette_color = v;
        }
        match (self.ai_denoiser, self.mc_denoiser) {
            (Some(true), _) => state.denoiser = DenoiserKind::AiReconstruction,
            (_, Some(true)) => state.denoiser = DenoiserKind::MonteCarlo,
            (Some(false), _) if state.denoiser == DenoiserKind::AiReconstruction => state.denoiser = DenoiserKind::None,
            (_, Some(false)) if state.denoiser == DenoiserKind::MonteCarlo => state.denoiser = DenoiserKind::None,
            _ => {}
        }
        if let Some(v) = self.mc_auto_denoise {
            state.monte_carlo.auto_denoise = v;
        }
        if let Some(v) = self.mc_auto_denoise_interval {
            state.monte_carlo.interval = v.max(1);
        }
        if let Some(v) = self.raster_wireframe {
            state.raster.wireframe = v;
        }
        if let Some(v) = self.raster_use_recorded {
            state.raster.use_recorded = v;
        }
        let tm = &mut state.tone_map;
        if let Some(v) = self.exposure {
            tm.exposure = v;
        }
        if let Some(v) = self.gamma {
            tm.gamma = v;
        }
        if let Some(v) = self.contrast {
            tm.contrast = v;
        }
        if let Some(v) = self.saturation {
            tm.saturation = v;
        }
    }
}
