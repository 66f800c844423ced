//! Host checks run before the container runtime is touched
//!
//! A failed check never drops a module from the selection. It is reported
//! so a service that cannot come up is easy to explain.

use std::fmt;
use std::path::PathBuf;

use crate::cli::Action;
use crate::config::LauncherConfig;
use crate::registry::Selection;

/// Socket the Jetson camera stack exposes to apriltag
pub const ARGUS_SOCKET: &str = "/tmp/argus_socket";
/// Power model config mounted into `status`
pub const NVPMODEL_CONF: &str = "/etc/nvpmodel.conf";
/// NVIDIA VPI libraries needed to build apriltag
pub const NVIDIA_VPI_DIR: &str = "/opt/nvidia/vpi1/";

/// A host requirement a selected module is missing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightWarning {
    pub module: String,
    pub message: String,
}

impl fmt::Display for PreflightWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.module, self.message)
    }
}

/// Locate an executable on `PATH`
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Check host requirements for the selected modules
pub fn check(
    selection: &Selection,
    config: &LauncherConfig,
    action: Action,
) -> Vec<PreflightWarning> {
    let mut warnings = Vec::new();
    let mut warn = |module: &str, message: String| {
        warnings.push(PreflightWarning {
            module: module.to_string(),
            message,
        })
    };

    let running = action == Action::Run;

    if running && selection.contains("mavp2p") && !selection.contains("simulator") {
        let device = &config.fcc.device;
        if !device.exists() {
            warn(
                "mavp2p",
                format!("FCC serial device {} does not exist", device.display()),
            );
        }
    }

    if running && selection.contains("pcm") {
        let device = &config.pcc.device;
        if !device.exists() {
            warn(
                "pcm",
                format!("PCC serial device {} does not exist", device.display()),
            );
        }
    }

    if selection.contains("apriltag") {
        if running && !std::path::Path::new(ARGUS_SOCKET).exists() {
            warn(
                "apriltag",
                format!("Argus socket {} does not exist", ARGUS_SOCKET),
            );
        }
        if action == Action::Build && !std::path::Path::new(NVIDIA_VPI_DIR).is_dir() {
            warn(
                "apriltag",
                format!("NVIDIA libraries not found at {}", NVIDIA_VPI_DIR),
            );
        }
    }

    if running && selection.contains("status") {
        if !std::path::Path::new(NVPMODEL_CONF).is_file() {
            warn("status", format!("{} does not exist", NVPMODEL_CONF));
        }
        if find_in_path("nvpmodel").is_none() {
            warn("status", "nvpmodel is not on PATH".to_string());
        }
    }

    if selection.contains("sandbox") {
        let dir = config.modules_dir.join("sandbox");
        if !dir.is_dir() {
            warn(
                "sandbox",
                format!("sandbox directory {} does not exist", dir.display()),
            );
        }
    }

    warnings
}
