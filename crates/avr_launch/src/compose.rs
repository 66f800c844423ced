//! Compose document rendering
//!
//! Produces a `docker-compose.yml` holding exactly the selected services.
//! Dependencies on services outside the selection are dropped so compose
//! never pulls in anything that was not asked for.

use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::LauncherConfig;
use crate::preflight::{find_in_path, ARGUS_SOCKET, NVPMODEL_CONF};
use crate::registry::{ModuleDef, Registry, Selection};

const RESTART_ON_FAILURE: &str = "on-failure";

/// Root compose document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposeFile {
    pub version: String,
    pub services: IndexMap<String, ComposeService>,
}

/// One compose service entry
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComposeService {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub environment: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub privileged: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub tty: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stdin_open: bool,
}

/// Display variables forwarded to a windowed simulator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayEnv {
    pub display: String,
    pub wayland_display: String,
    pub xdg_runtime_dir: String,
    pub pulse_server: String,
}

impl DisplayEnv {
    /// Read the display variables of the invoking session
    pub fn from_env() -> Self {
        let var = |key: &str, default: &str| {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        Self {
            display: var("DISPLAY", ":0"),
            wayland_display: var("WAYLAND_DISPLAY", "wayland-0"),
            xdg_runtime_dir: var("XDG_RUNTIME_DIR", ""),
            pulse_server: var("PULSE_SERVER", ""),
        }
    }
}

/// Host-dependent rendering options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Build every image from `modules_dir` instead of pulling
    pub local: bool,
    /// Run the simulator without a display
    pub headless: bool,
    pub display: DisplayEnv,
    /// Host path of the `nvpmodel` binary mounted into `status`
    pub nvpmodel: PathBuf,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            local: false,
            headless: false,
            display: DisplayEnv::default(),
            nvpmodel: PathBuf::from("/usr/sbin/nvpmodel"),
        }
    }
}

impl ComposeOptions {
    /// Options for the current host
    pub fn detect(local: bool, headless: bool) -> Self {
        let defaults = Self::default();
        Self {
            local,
            headless,
            display: if headless {
                DisplayEnv::default()
            } else {
                DisplayEnv::from_env()
            },
            nvpmodel: find_in_path("nvpmodel").unwrap_or(defaults.nvpmodel),
        }
    }
}

impl ComposeFile {
    /// Render the compose document for a selection
    pub fn render(
        registry: &Registry,
        selection: &Selection,
        config: &LauncherConfig,
        options: &ComposeOptions,
    ) -> Self {
        let ctx = RenderContext {
            selection,
            config,
            options,
            modules_dir: absolute(&config.modules_dir),
            simulator: selection.contains("simulator"),
        };

        let services = selection
            .iter()
            .filter_map(|name| registry.module(name))
            .map(|module| (module.name.to_string(), ctx.service(module)))
            .collect();

        Self {
            version: "3".to_string(),
            services,
        }
    }

    pub fn to_yaml(&self) -> Result<String, ComposeError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the document, creating parent directories as needed
    pub fn write_to(&self, path: &Path) -> Result<(), ComposeError> {
        let yaml = self.to_yaml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ComposeError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, yaml).map_err(|e| ComposeError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        log::debug!("Wrote compose file {}", path.display());
        Ok(())
    }
}

/// Compose reads a relative bind source without a `./` prefix as a
/// named volume, so host paths are made absolute against the working
/// directory.
fn absolute(path: &Path) -> PathBuf {
    match std::path::absolute(path) {
        Ok(path) => path,
        Err(e) => {
            log::warn!("Cannot resolve {}: {}", path.display(), e);
            Path::new(".").join(path)
        }
    }
}

struct RenderContext<'a> {
    selection: &'a Selection,
    config: &'a LauncherConfig,
    options: &'a ComposeOptions,
    modules_dir: PathBuf,
    simulator: bool,
}

impl RenderContext<'_> {
    fn service(&self, module: &ModuleDef) -> ComposeService {
        let mut service = ComposeService {
            depends_on: module
                .depends_on
                .iter()
                .filter(|dep| self.selection.contains(dep))
                .map(|dep| dep.to_string())
                .collect(),
            restart: Some(RESTART_ON_FAILURE.to_string()),
            ..Default::default()
        };

        match module.image {
            Some(image) if !self.options.local => service.image = Some(self.config.image(image)),
            _ => service.build = Some(self.build_dir(module.name)),
        }

        match module.name {
            "mqtt" => self.mqtt(&mut service),
            "mavp2p" => self.mavp2p(&mut service),
            "fusion" => {
                self.mqtt_env(&mut service);
                self.px4_home_env(&mut service);
            }
            "vio" => {
                self.mqtt_env(&mut service);
                service.privileged = true;
                service.volumes.push(format!(
                    "{}:/usr/local/zed/settings/",
                    self.modules_dir.join("vio").join("settings").display()
                ));
            }
            "apriltag" => {
                self.mqtt_env(&mut service);
                service.volumes.push(format!("{ARGUS_SOCKET}:{ARGUS_SOCKET}"));
            }
            "pcm" => self.pcm(&mut service),
            "thermal" => {
                self.mqtt_env(&mut service);
                service.privileged = true;
            }
            "status" => {
                self.mqtt_env(&mut service);
                service.privileged = true;
                service.volumes.push(format!("{NVPMODEL_CONF}:/app/nvpmodel.conf"));
                service
                    .volumes
                    .push(format!("{}:/app/nvpmodel", self.options.nvpmodel.display()));
            }
            "simulator" => self.simulator(&mut service),
            _ => self.mqtt_env(&mut service),
        }

        service
    }

    fn build_dir(&self, name: &str) -> String {
        self.modules_dir.join(name).display().to_string()
    }

    fn mqtt_env(&self, service: &mut ComposeService) {
        let mqtt = &self.config.mqtt;
        service
            .environment
            .insert("MQTT_HOST".to_string(), mqtt.host.clone());
        service
            .environment
            .insert("MQTT_PORT".to_string(), mqtt.port.to_string());
    }

    fn px4_home_env(&self, service: &mut ComposeService) {
        let home = &self.config.px4_home;
        service
            .environment
            .insert("PX4_HOME_LAT".to_string(), home.lat.to_string());
        service
            .environment
            .insert("PX4_HOME_LON".to_string(), home.lon.to_string());
        service
            .environment
            .insert("PX4_HOME_ALT".to_string(), home.alt.to_string());
    }

    fn mqtt(&self, service: &mut ComposeService) {
        let port = self.config.mqtt.port;
        service.ports.push(format!("{port}:{port}/tcp"));
        service
            .environment
            .insert("MQTT_PORT".to_string(), port.to_string());
    }

    fn mavp2p(&self, service: &mut ComposeService) {
        let mavlink = &self.config.mavlink;
        let mut endpoints = vec![
            format!("tcps:0.0.0.0:{}", mavlink.tcp_port),
            format!("udpc:fcm:{}", mavlink.udp_port_1),
            format!("udpc:fcm:{}", mavlink.udp_port_2),
        ];
        service
            .ports
            .push(format!("{0}:{0}/tcp", mavlink.tcp_port));

        if self.simulator {
            // Offboard link from the simulator
            endpoints.push(format!("udps:0.0.0.0:{}", mavlink.simulator_port));
            service
                .ports
                .push(format!("{0}:{0}/udp", mavlink.simulator_port));
        } else {
            let fcc = &self.config.fcc;
            let device = fcc.device.display();
            endpoints.insert(0, format!("serial:{}:{}", device, fcc.baud_rate));
            service.devices.push(format!("{device}:{device}"));
        }

        service.command = Some(endpoints.join(" "));
        service
            .environment
            .insert("MAVLINK_UDP_1".to_string(), mavlink.udp_port_1.to_string());
        service
            .environment
            .insert("MAVLINK_UDP_2".to_string(), mavlink.udp_port_2.to_string());
    }

    fn pcm(&self, service: &mut ComposeService) {
        let pcc = &self.config.pcc;
        let device = pcc.device.display();
        self.mqtt_env(service);
        service.devices.push(format!("{device}:{device}"));
        service
            .environment
            .insert("PCC_SERIAL_DEVICE".to_string(), device.to_string());
        service
            .environment
            .insert("PCC_SERIAL_BAUD_RATE".to_string(), pcc.baud_rate.to_string());
    }

    fn simulator(&self, service: &mut ComposeService) {
        // PX4 wants an interactive terminal for its commander shell
        service.tty = true;
        service.stdin_open = true;
        service.restart = None;
        self.px4_home_env(service);

        if self.options.headless {
            service
                .environment
                .insert("HEADLESS".to_string(), "1".to_string());
        } else {
            let display = &self.options.display;
            for (key, value) in [
                ("DISPLAY", &display.display),
                ("WAYLAND_DISPLAY", &display.wayland_display),
                ("XDG_RUNTIME_DIR", &display.xdg_runtime_dir),
                ("PULSE_SERVER", &display.pulse_server),
            ] {
                service.environment.insert(key.to_string(), value.clone());
            }
            service
                .volumes
                .push("/tmp/.X11-unix:/tmp/.X11-unix".to_string());
        }
    }
}

/// Errors when producing the compose file
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("Failed to serialize compose file: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("Failed to write '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
