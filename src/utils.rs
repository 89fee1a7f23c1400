//! Filesystem and device helpers

use std::fs;
use std::path::Path;

use candle_core::Device;
use candle_nn::VarMap;
use tracing::info;

use crate::error::{Error, Result};

/// Ensure directory exists
pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            Error::persistence(format!("failed to create {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

/// Safe file write with atomic operation
pub fn write_file_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .and_then(|_| fs::rename(&temp_path, path))
        .map_err(|e| Error::persistence(format!("failed to write {}: {}", path.display(), e)))
}

/// Save every variable as safetensors, replacing `path` only once the write succeeded
pub fn save_var_map_atomic<P: AsRef<Path>>(var_map: &VarMap, path: P) -> Result<()> {
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    var_map
        .save(&temp_path)
        .map_err(|e| Error::persistence(format!("failed to save weights to {}: {}", path.display(), e)))?;
    fs::rename(&temp_path, path)
        .map_err(|e| Error::persistence(format!("failed to save weights to {}: {}", path.display(), e)))
}

/// Load safetensors weights into the existing variables of `var_map`
pub fn load_var_map<P: AsRef<Path>>(var_map: &VarMap, path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::config(format!("weights file {} does not exist", path.display())));
    }

    // VarMap clones share their variables, so loading through a clone updates the model
    let mut target = var_map.clone();
    target.load(path)?;
    Ok(())
}

/// Names and shapes of the tensors stored in a safetensors file
pub fn inspect_weights<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Vec<usize>)>> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .map_err(|e| Error::config(format!("failed to read weights {}: {}", path.display(), e)))?;
    let tensors = safetensors::SafeTensors::deserialize(&bytes)
        .map_err(|e| Error::config(format!("{} is not a safetensors file: {}", path.display(), e)))?;

    let mut entries: Vec<(String, Vec<usize>)> = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| (name, view.shape().to_vec()))
        .collect();
    entries.sort();
    Ok(entries)
}

/// Pick the training device
pub fn select_device(force_cpu: bool) -> Result<Device> {
    if force_cpu {
        info!("Forced CPU usage, expect training to be slower");
        return Ok(Device::Cpu);
    }

    #[cfg(feature = "cuda")]
    {
        return Ok(Device::cuda_if_available(0)?);
    }

    #[cfg(all(feature = "metal", not(feature = "cuda")))]
    {
        return Ok(Device::new_metal(0).unwrap_or(Device::Cpu));
    }

    #[allow(unreachable_code)]
    Ok(Device::Cpu)
}
