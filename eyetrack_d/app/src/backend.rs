//! Dynamic tracking-backend loading.
//!
//! Backends (camera access + model inference) are native libraries
//! exposing a `create_backend` symbol. Running without one is not an
//! error; the scheduler keeps emitting neutral frames.

use api::EyeTrackingBackend;
use anyhow::Result;
use libloading::{Library, Symbol};
use log::{error, info, warn};
use std::fs;
use std::path::Path;

pub fn load_backend(plugins_dir: &Path, active: &str) -> Option<Box<dyn EyeTrackingBackend>> {
    if !plugins_dir.exists() {
        warn!("Plugins directory {:?} not found. Creating it.", plugins_dir);
        if let Err(e) = fs::create_dir_all(plugins_dir) {
            error!("Failed to create plugins directory: {}", e);
        }
        return None;
    }

    let entries = match fs::read_dir(plugins_dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Failed to read plugins directory {:?}: {}", plugins_dir, e);
            return None;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path
            .extension()
            .is_some_and(|ext| ext == "dll" || ext == "so" || ext == "dylib")
        {
            continue;
        }

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        if !active.is_empty() && filename != active {
            continue;
        }

        info!("Loading backend: {:?}", path);
        match load_library(&path) {
            Ok(backend) => {
                info!("✓ Successfully loaded backend: {}", filename);
                return Some(backend);
            }
            Err(e) => {
                error!("✗ Failed to load backend {:?}: {}", path, e);
            }
        }
    }

    warn!(
        "No tracking backend loaded from {:?}; emitting neutral frames",
        plugins_dir
    );
    None
}

fn load_library(path: &Path) -> Result<Box<dyn EyeTrackingBackend>> {
    unsafe {
        let lib = Library::new(path)?;
        let func: Symbol<unsafe extern "C" fn() -> Box<dyn EyeTrackingBackend>> =
            lib.get(b"create_backend")?;
        let backend = func();
        // The library must stay mapped for as long as the backend
        // lives; it is leaked alongside the process.
        std::mem::forget(lib);
        Ok(backend)
    }
}
