//! Accelerator detection
//!
//! Looks for GPU device nodes once at startup. The result decides whether
//! model layers are offloaded when the model is loaded.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use once_cell::sync::OnceCell;

/// Device nodes checked in order: DRM render nodes, then the Vivante driver
/// found on i.MX8 boards.
pub const DEVICE_NODES: &[&str] = &["/dev/dri", "/dev/galcore"];

/// Upper bound on how long detection may take before it counts as absent.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

static CAPABILITY: OnceCell<bool> = OnceCell::new();

/// Accelerator information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceleratorInfo {
    /// The device node that was found, if any
    pub device: Option<PathBuf>,
    pub is_available: bool,
}

impl AcceleratorInfo {
    fn absent() -> Self {
        Self::default()
    }

    fn found(device: &Path) -> Self {
        Self {
            device: Some(device.to_path_buf()),
            is_available: true,
        }
    }
}

/// Returns whether an accelerator is available on this host.
///
/// Detection runs on the first call only; later calls return the cached flag.
pub fn probe() -> bool {
    *CAPABILITY.get_or_init(|| {
        tracing::info!("Checking for GPU acceleration capabilities...");
        let info = detect_accelerator(DEVICE_NODES, PROBE_TIMEOUT);
        match &info.device {
            Some(device) => tracing::info!("GPU acceleration available via {}", device.display()),
            None => tracing::info!("No GPU acceleration available"),
        }
        info.is_available
    })
}

/// Scan `nodes` for an accelerator device, giving up after `timeout`.
///
/// The scan runs on its own thread. If it hangs (a wedged driver can block
/// `stat` on its device node) the thread is left behind and the result is
/// "absent". Errors are logged, never returned.
pub fn detect_accelerator<P: AsRef<Path>>(nodes: &[P], timeout: Duration) -> AcceleratorInfo {
    let nodes: Vec<PathBuf> = nodes.iter().map(|p| p.as_ref().to_path_buf()).collect();
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("accelerator-probe".to_string())
        .spawn(move || {
            let _ = tx.send(scan_device_nodes(&nodes));
        });

    if let Err(e) = spawned {
        tracing::error!("Error checking GPU: could not spawn probe thread: {}", e);
        return AcceleratorInfo::absent();
    }

    match rx.recv_timeout(timeout) {
        Ok(info) => info,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!("GPU detection did not finish within {:?}, assuming none", timeout);
            AcceleratorInfo::absent()
        }
        Err(RecvTimeoutError::Disconnected) => {
            tracing::error!("Error checking GPU: probe thread exited without a result");
            AcceleratorInfo::absent()
        }
    }
}

fn scan_device_nodes(nodes: &[PathBuf]) -> AcceleratorInfo {
    for node in nodes {
        let metadata = match fs::metadata(node) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("No GPU device at {}: {}", node.display(), e);
                continue;
            }
        };

        if !metadata.is_dir() {
            return AcceleratorInfo::found(node);
        }

        // A device directory only counts when something is in it
        match fs::read_dir(node) {
            Ok(entries) => {
                let names: Vec<String> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                if !names.is_empty() {
                    tracing::info!("Found GPU devices: {}", names.join(" "));
                    return AcceleratorInfo::found(node);
                }
            }
            Err(e) => {
                tracing::debug!("Cannot list {}: {}", node.display(), e);
            }
        }
    }

    AcceleratorInfo::absent()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_nodes_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let info = detect_accelerator(&[missing], Duration::from_secs(1));
        assert!(!info.is_available);
        assert!(info.device.is_none());
    }

    #[test]
    fn test_empty_device_dir_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let info = detect_accelerator(&[dir.path()], Duration::from_secs(1));
        assert!(!info.is_available);
    }

    #[test]
    fn test_populated_device_dir_is_available() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("renderD128"), b"").unwrap();
        let info = detect_accelerator(&[dir.path()], Duration::from_secs(1));
        assert!(info.is_available);
        assert_eq!(info.device.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_device_file_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("galcore");
        std::fs::write(&node, b"").unwrap();
        let missing = dir.path().join("dri");
        let info = detect_accelerator(&[missing, node.clone()], Duration::from_secs(1));
        assert!(info.is_available);
        assert_eq!(info.device, Some(node));
    }

    #[test]
    fn test_probe_is_cached() {
        assert_eq!(probe(), probe());
    }
}
