//! WGSL composition and compile cache.
//!
//! Kernels are concatenations of shared modules. The composed text is
//! hashed; a hit returns the cached module, a miss compiles inside a
//! validation scope so a broken edit is reported instead of aborting.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::util::Result;

#[derive(Default)]
pub struct ShaderCache {
    modules: HashMap<u64, wgpu::ShaderModule>,
    compiles: usize,
}

/// Join shader modules in dependency order.
pub fn compose(parts: &[&str]) -> String {
    let mut source = String::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for part in parts {
        source.push_str(part);
        source.push('\n');
    }
    source
}

pub fn source_hash(source: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Module for `source`, compiling it on first use.
    pub fn get_or_compile(&mut self, device: &wgpu::Device, label: &str, source: &str) -> Result<wgpu::ShaderModule> {
        let key = source_hash(source);
        if let Some(module) = self.modules.get(&key) {
            return Ok(module.clone());
        }

        let _span = tracing::info_span!("compile_shader", label).entered();
        let module = super::validated(device, label, || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        })
        .inspect_err(|e| log::error!("{e}"))?;

        self.compiles += 1;
        log::debug!("Compiled shader '{label}' ({} bytes)", source.len());
        self.modules.insert(key, module.clone());
        Ok(module)
    }

    /// Forget compiled modules (shader reload).
    pub fn clear(&mut self) {
        self.modules.clear();
    }

    /// Number of compilations performed so far.
    pub fn compile_count(&self) -> usize {
        self.compiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_order() {
        let source = compose(&["const A: f32 = 1.0;", "const B: f32 = A;"]);
        assert!(source.find("const A").unwrap() < source.find("const B").unwrap());
        assert!(source.ends_with('\n'));
    }

    #[test]
    fn test_hash_tracks_content() {
        assert_eq!(source_hash("fn a() {}"), source_hash("fn a() {}"));
        assert_ne!(source_hash("fn a() {}"), source_hash("fn b() {}"));
    }
}
