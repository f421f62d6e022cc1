//! Persistent settings in INI form.
//!
//! Each persisted element is a `#[serde(default)]` struct stored in its
//! own section, one `key=value` line per field:
//!
//! ```text
//! [ElementRenderer][State]
//! renderer=PathTracer
//! path_tracer.max_depth=5
//! environment.solid_color=0,0,0
//! ```
//!
//! Nested structs flatten to dotted keys, bools are `1`/`0`, arrays are
//! comma separated and strings are written unquoted. Values are read back
//! against the shape of the element's default: unknown keys are ignored
//! and a value that does not parse leaves that field at its default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::denoise::{AtrousSettings, DenoiserKind, MonteCarloSettings};
use crate::environment::{EnvironmentSettings, SkyParams};
use crate::frame::Backend;
use crate::pathtracer::PathTracerSettings;
use crate::post::silhouette::DEFAULT_COLOR;
use crate::post::ToneMapSettings;
use crate::raster::RasterSettings;
use crate::util::{Error, Result};

const MAX_RECENT_FILES: usize = 10;

/// A struct persisted as one INI section.
pub trait Element: Serialize + DeserializeOwned + Default {
    /// Section name, e.g. `ElementRenderer`
    const NAME: &'static str;
}

/// Renderer, environment and post-processing state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererState {
    pub renderer: Backend,
    pub environment: EnvironmentSettings,
    pub sky: SkyParams,
    pub path_tracer: PathTracerSettings,
    pub tone_map: ToneMapSettings,
    pub silhouette_color: [f32; 3],
    pub denoiser: DenoiserKind,
    pub atrous: AtrousSettings,
    pub monte_carlo: MonteCarloSettings,
    pub raster: RasterSettings,
    pub show_axis: bool,
    pub last_hdr_file: Option<PathBuf>,
}

impl Default for RendererState {
    fn default() -> Self {
        Self {
            renderer: Backend::PathTracer,
            environment: EnvironmentSettings::default(),
            sky: SkyParams::default(),
            path_tracer: PathTracerSettings::default(),
            tone_map: ToneMapSettings::default(),
            silhouette_color: DEFAULT_COLOR,
            denoiser: DenoiserKind::None,
            atrous: AtrousSettings::default(),
            monte_carlo: MonteCarloSettings::default(),
            raster: RasterSettings::default(),
            show_axis: true,
            last_hdr_file: None,
        }
    }
}

impl Element for RendererState {
    const NAME: &'static str = "ElementRenderer";
}

/// Window layout and recent files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowState {
    pub width: f32,
    pub height: f32,
    pub side_panel_width: f32,
    pub show_loader: bool,
    pub last_file: Option<PathBuf>,
    /// Most recent first
    pub recent_files: Vec<PathBuf>,
}

impl Default for WindowState {
    fn default() -> Self {
        Self {
            width: 1600.0,
            height: 900.0,
            side_panel_width: 320.0,
            show_loader: true,
            last_file: None,
            recent_files: Vec::new(),
        }
    }
}

impl WindowState {
    /// Move `path` to the front of the recent list.
    pub fn add_recent(&mut self, path: PathBuf) {
        self.recent_files.retain(|p| p != &path);
        self.recent_files.insert(0, path.clone());
        self.recent_files.truncate(MAX_RECENT_FILES);
        self.last_file = Some(path);
    }

    /// Recent files that still exist.
    pub fn recent_files(&self) -> Vec<&PathBuf> {
        self.recent_files.iter().filter(|p| p.exists()).collect()
    }
}

impl Element for WindowState {
    const NAME: &'static str = "ElementWindow";
}

/// Orbit camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraState {
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub fov_y_degrees: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            eye: [0.0, 0.0, 5.0],
            target: [0.0; 3],
            fov_y_degrees: 45.0,
        }
    }
}

impl Element for CameraState {
    const NAME: &'static str = "ElementCamera";
}

/// INI sections keyed by element name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IniStore {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl IniStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<config dir>/gltf-viewer/settings.ini`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("gltf-viewer");
            p.push("settings.ini");
            p
        })
    }

    /// Read `path`; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_ini_string())?;
        log::debug!("Settings saved to {}", path.display());
        Ok(())
    }

    pub fn parse(text: &str) -> Self {
        let mut store = Self::new();
        let mut current: Option<String> = None;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('[') {
                // `[Element][State]` or `[Element]`
                current = rest.split(']').next().map(|name| name.trim().to_string());
                if let Some(name) = &current {
                    store.sections.entry(name.clone()).or_default();
                }
                continue;
            }
            let (Some(section), Some((key, value))) = (&current, line.split_once('=')) else {
                log::debug!("Ignoring settings line '{line}'");
                continue;
            };
            store
                .sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
        store
    }

    pub fn to_ini_string(&self) -> String {
        let mut out = String::new();
        for (name, entries) in &self.sections {
            out.push_str(&format!("[{name}][State]\n"));
            for (key, value) in entries {
                out.push_str(&format!("{key}={value}\n"));
            }
            out.push('\n');
        }
        out
    }

    pub fn raw(&self, element: &str, key: &str) -> Option<&str> {
        self.sections.get(element)?.get(key).map(String::as_str)
    }

    pub fn set<T: Element>(&mut self, value: &T) -> Result<()> {
        let json = serde_json::to_value(value)?;
        let mut entries = BTreeMap::new();
        flatten("", &json, &mut entries);
        self.sections.insert(T::NAME.to_string(), entries);
        Ok(())
    }

    /// The stored element, field by field over its default.
    pub fn get<T: Element>(&self) -> T {
        let Some(entries) = self.sections.get(T::NAME) else {
            return T::default();
        };
        let Ok(mut current) = serde_json::to_value(T::default()) else {
            return T::default();
        };
        let mut shape = BTreeMap::new();
        flatten_values("", &current, &mut shape);

        for (key, text) in entries {
            let Some(template) = shape.get(key) else {
                log::debug!("{}: unknown key '{key}'", T::NAME);
                continue;
            };
            let Some(value) = parse_value(text, template) else {
                log::warn!("{}: bad value '{text}' for '{key}'", T::NAME);
                continue;
            };
            let mut candidate = current.clone();
            set_path(&mut candidate, key, value);
            // a value of the right JSON type can still be rejected (enum names)
            if serde_json::from_value::<T>(candidate.clone()).is_ok() {
                current = candidate;
            } else {
                log::warn!("{}: bad value '{text}' for '{key}'", T::NAME);
            }
        }
        serde_json::from_value(current).unwrap_or_default()
    }

    /// Like [`IniStore::get`] but fails when the section is missing.
    pub fn require<T: Element>(&self) -> Result<T> {
        if self.sections.contains_key(T::NAME) {
            Ok(self.get())
        } else {
            Err(Error::Settings(format!("missing section [{}]", T::NAME)))
        }
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        // persisted floats are f32; print their shortest form, not the widened f64
        Value::Number(n) => match n.as_f64() {
            Some(f) if !n.is_i64() && !n.is_u64() => (f as f32).to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten(&join_key(prefix, k), v, out);
            }
        }
        Value::Array(items) => {
            let text: Vec<String> = items.iter().map(format_scalar).collect();
            out.insert(prefix.to_string(), text.join(","));
        }
        Value::Null => {}
        scalar => {
            out.insert(prefix.to_string(), format_scalar(scalar));
        }
    }
}

fn flatten_values(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_values(&join_key(prefix, k), v, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

fn parse_scalar(text: &str, template: &Value) -> Option<Value> {
    let text = text.trim();
    match template {
        Value::Bool(_) => match text.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(Value::Bool(true)),
            "0" | "false" | "no" | "off" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Number(n) if n.is_u64() => text.parse::<u64>().ok().map(|v| Value::Number(v.into())),
        Value::Number(n) if n.is_i64() => text.parse::<i64>().ok().map(|v| Value::Number(v.into())),
        Value::Number(_) => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        // strings and fields whose default is null
        _ => Some(Value::String(text.to_string())),
    }
}

fn parse_value(text: &str, template: &Value) -> Option<Value> {
    match template {
        Value::Array(items) => {
            if text.trim().is_empty() {
                return Some(Value::Array(Vec::new()));
            }
            let element = items.first().cloned().unwrap_or(Value::String(String::new()));
            text.split(',')
                .map(|t| parse_scalar(t, &element))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array)
        }
        Value::Null if text.is_empty() => Some(Value::Null),
        other => parse_scalar(text, other),
    }
}

fn set_path(root: &mut Value, key: &str, value: Value) {
    let mut node = root;
    let mut parts = key.split('.').peekable();
    while let Some(part) = parts.next() {
        let Value::Object(map) = node else { return; };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        node = map.entry(part.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvKind;
    use crate::post::ToneCurve;

    #[test]
    fn test_flattened_keys_and_value_forms() {
        let mut store = IniStore::new();
        let mut state = RendererState::default();
        state.raster.wireframe = true;
        state.environment.rotation = 0.1;
        store.set(&state).unwrap();
        let text = store.to_ini_string();
        assert!(text.starts_with("[ElementRenderer][State]\n"));
        assert!(text.contains("renderer=PathTracer\n"));
        assert!(text.contains("raster.wireframe=1\n"));
        assert!(text.contains("environment.solid_color=0,0,0\n"));
        assert!(text.contains("path_tracer.max_depth=5\n"));
        assert!(!text.contains("0.0,"));
        // f32 keeps its own digits instead of 0.10000000149011612
        assert!(text.contains("environment.rotation=0.1\n"));
        // None fields are not written
        assert!(!text.contains("last_hdr_file"));
    }

    #[test]
    fn test_round_trip_through_text() {
        let mut store = IniStore::new();
        let mut state = RendererState::default();
        state.renderer = Backend::Rasterizer;
        state.environment.kind = EnvKind::Hdr;
        state.environment.rotation = 1.25;
        state.tone_map.curve = ToneCurve::Hable;
        state.path_tracer.max_frames = 64;
        state.last_hdr_file = Some(PathBuf::from("/tmp/studio.hdr"));
        store.set(&state).unwrap();

        let mut window = WindowState::default();
        window.add_recent(PathBuf::from("a.glb"));
        window.add_recent(PathBuf::from("b.gltf"));
        store.set(&window).unwrap();

        let parsed = IniStore::parse(&store.to_ini_string());
        assert_eq!(parsed.get::<RendererState>(), state);
        let w: WindowState = parsed.get();
        assert_eq!(w.recent_files, vec![PathBuf::from("b.gltf"), PathBuf::from("a.glb")]);
    }

    #[test]
    fn test_bad_values_fall_back_per_field() {
        let text = "[ElementRenderer][State]\n\
                    path_tracer.max_depth=seven\n\
                    path_tracer.max_samples=4\n\
                    tone_map.curve=Sepia\n\
                    raster.wireframe=true\n\
                    no_such_key=3\n\
                    [ElementNvml][State]\n\
                    ShowLoader=1\n";
        let store = IniStore::parse(text);
        let state: RendererState = store.get();
        assert_eq!(state.path_tracer.max_depth, 5);
        assert_eq!(state.path_tracer.max_samples, 4);
        assert_eq!(state.tone_map.curve, ToneCurve::Aces);
        assert!(state.raster.wireframe);
        assert_eq!(store.raw("ElementNvml", "ShowLoader"), Some("1"));
    }

    #[test]
    fn test_missing_section_is_default() {
        let store = IniStore::parse("");
        assert_eq!(store.get::<CameraState>(), CameraState::default());
        assert!(matches!(store.require::<CameraState>(), Err(Error::Settings(_))));
    }

    #[test]
    fn test_recent_files_are_capped_and_deduplicated() {
        let mut w = WindowState::default();
        for i in 0..15 {
            w.add_recent(PathBuf::from(format!("{i}.glb")));
        }
        w.add_recent(PathBuf::from("3.glb"));
        assert_eq!(w.recent_files.len(), MAX_RECENT_FILES);
        assert_eq!(w.recent_files[0], PathBuf::from("3.glb"));
        assert_eq!(w.recent_files.iter().filter(|p| p.as_os_str() == "3.glb").count(), 1);
    }
}
