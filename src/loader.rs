//! Background loader thread.
//!
//! Scene and HDR loads (parsing, BLAS/TLAS builds, CDF precompute) run
//! off the UI thread. While a request is pending the handle reports
//! busy; the viewer skips rendering and shows an overlay until the
//! result arrives. Loads are not cancellable.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::accel::AccelCache;
use crate::environment::HdrEnvironment;
use crate::scene::{self, Scene};
use crate::util::{Error, Result};

/// What a dropped or opened file is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Scene,
    Hdr,
}

/// `.gltf`/`.glb` load a scene, `.hdr` an environment, anything else is ignored.
pub fn classify(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "gltf" | "glb" => Some(FileKind::Scene),
        "hdr" => Some(FileKind::Hdr),
        _ => None,
    }
}

#[derive(Debug)]
pub enum LoaderCommand {
    LoadScene { path: PathBuf, generation: u64 },
    LoadHdr { path: PathBuf },
    Stop,
}

pub enum LoaderResult {
    /// Scene with its acceleration structures built for `generation`.
    SceneReady {
        path: PathBuf,
        scene: Box<Scene>,
        accel: Box<AccelCache>,
        generation: u64,
    },
    HdrReady { path: PathBuf, hdr: Box<HdrEnvironment> },
    Failed { path: PathBuf, error: Error },
}

pub struct LoaderHandle {
    tx: Sender<LoaderCommand>,
    rx: Receiver<LoaderResult>,
    handle: Option<JoinHandle<()>>,
    pending: usize,
    next_generation: u64,
}

impl LoaderHandle {
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = channel::<LoaderCommand>();
        let (res_tx, res_rx) = channel::<LoaderResult>();
        let handle = thread::Builder::new()
            .name("gltf-loader".into())
            .spawn(move || loader_loop(cmd_rx, res_tx))
            .map_err(|e| log::error!("Failed to spawn loader thread: {e}"))
            .ok();
        Self {
            tx: cmd_tx,
            rx: res_rx,
            handle,
            pending: 0,
            next_generation: 1,
        }
    }

    /// Queue `path` by extension. Returns false for unsupported files.
    pub fn request(&mut self, path: PathBuf) -> bool {
        let cmd = match classify(&path) {
            Some(FileKind::Scene) => {
                let generation = self.next_generation;
                self.next_generation += 1;
                LoaderCommand::LoadScene { path, generation }
            }
            Some(FileKind::Hdr) => LoaderCommand::LoadHdr { path },
            None => {
                log::debug!("Ignoring unsupported file {}", path.display());
                return false;
            }
        };
        if self.tx.send(cmd).is_err() {
            log::error!("Loader thread is gone");
            return false;
        }
        self.pending += 1;
        true
    }

    pub fn is_busy(&self) -> bool {
        self.pending > 0
    }

    /// Next finished load (non-blocking).
    pub fn try_recv(&mut self) -> Option<LoaderResult> {
        let result = self.rx.try_recv().ok()?;
        self.pending = self.pending.saturating_sub(1);
        Some(result)
    }

    /// Block until the next load finishes.
    pub fn recv(&mut self) -> Option<LoaderResult> {
        let result = self.rx.recv().ok()?;
        self.pending = self.pending.saturating_sub(1);
        Some(result)
    }

    pub fn stop(&mut self) {
        let _ = self.tx.send(LoaderCommand::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LoaderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Load a scene and build its acceleration structures.
pub fn load_scene(path: &Path, generation: u64) -> Result<(Scene, AccelCache)> {
    let _span = tracing::info_span!("load_scene", path = %path.display()).entered();
    let scene = scene::load_gltf(path)?;
    let mut accel = AccelCache::new();
    accel.update(&scene, generation);
    log::info!(
        "Loaded {}: {} render nodes, {} primitives",
        path.display(),
        scene.render_nodes.len(),
        scene.primitives.len()
    );
    Ok((scene, accel))
}

fn loader_loop(rx: Receiver<LoaderCommand>, tx: Sender<LoaderResult>) {
    while let Ok(cmd) = rx.recv() {
        let result = match cmd {
            LoaderCommand::LoadScene { path, generation } => match load_scene(&path, generation) {
                Ok((scene, accel)) => LoaderResult::SceneReady {
                    path,
                    scene: Box::new(scene),
                    accel: Box::new(accel),
                    generation,
                },
                Err(error) => LoaderResult::Failed { path, error },
            },
            LoaderCommand::LoadHdr { path } => match HdrEnvironment::load(&path) {
                Ok(hdr) => LoaderResult::HdrReady {
                    path,
                    hdr: Box::new(hdr),
                },
                Err(error) => LoaderResult::Failed { path, error },
            },
            LoaderCommand::Stop => break,
        };
        if tx.send(result).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kinds_by_extension() {
        assert_eq!(classify(Path::new("a/Box.glb")), Some(FileKind::Scene));
        assert_eq!(classify(Path::new("Box.GLTF")), Some(FileKind::Scene));
        assert_eq!(classify(Path::new("studio.hdr")), Some(FileKind::Hdr));
        assert_eq!(classify(Path::new("notes.txt")), None);
        assert_eq!(classify(Path::new("noext")), None);
    }

    #[test]
    fn test_missing_file_reports_failure_and_clears_busy() {
        let mut loader = LoaderHandle::spawn();
        assert!(!loader.is_busy());
        assert!(loader.request(PathBuf::from("/definitely/not/here.glb")));
        assert!(loader.is_busy());
        match loader.recv() {
            Some(LoaderResult::Failed { error, .. }) => assert!(matches!(error, Error::FileNotFound(_))),
            _ => panic!("expected a failure"),
        }
        assert!(!loader.is_busy());
        assert!(!loader.request(PathBuf::from("readme.md")));
    }
}
