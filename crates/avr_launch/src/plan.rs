//! Launch plan: the ordered services plus the compose document

use std::fmt;
use std::path::Path;

use crate::compose::{ComposeError, ComposeFile, ComposeOptions};
use crate::config::LauncherConfig;
use crate::registry::{Registry, Selection};
use crate::runtime::order::{OrderError, StartOrder};

/// Everything needed to act on a selection
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub project_name: String,
    pub selection: Selection,
    pub order: StartOrder,
    pub compose: ComposeFile,
}

impl LaunchPlan {
    pub fn build(
        registry: &Registry,
        selection: Selection,
        config: &LauncherConfig,
        options: &ComposeOptions,
    ) -> Result<Self, PlanError> {
        let order = StartOrder::build(registry, &selection)?;
        let compose = ComposeFile::render(registry, &selection, config, options);
        Ok(Self {
            project_name: config.project_name.clone(),
            selection,
            order,
            compose,
        })
    }

    /// Service names in start order
    pub fn services(&self) -> &[String] {
        self.order.services()
    }

    /// Write the compose document the runtime will read
    pub fn write_compose(&self, path: &Path) -> Result<(), PlanError> {
        self.compose.write_to(path)?;
        Ok(())
    }
}

impl fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;
        writeln!(f, "Project: {}", self.project_name)?;
        writeln!(f)?;
        writeln!(f, "Services (in start order):")?;

        for (i, name) in self.order.launch_order().enumerate() {
            let Some(service) = self.compose.services.get(name) else {
                continue;
            };
            writeln!(f)?;
            writeln!(f, "  {}. {}", i + 1, name)?;
            if let Some(image) = &service.image {
                writeln!(f, "     Image: {}", image)?;
            }
            if let Some(build) = &service.build {
                writeln!(f, "     Build: {}", build)?;
            }
            if let Some(command) = &service.command {
                writeln!(f, "     Command: {}", command)?;
            }
            if !service.depends_on.is_empty() {
                writeln!(f, "     Depends on: {}", service.depends_on.join(", "))?;
            }
            if !service.devices.is_empty() {
                writeln!(f, "     Devices: {}", service.devices.join(", "))?;
            }
        }

        Ok(())
    }
}

/// Errors building a launch plan
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_display() {
        let registry = Registry::builtin();
        let selection = registry.resolve(&["mqtt", "fcm"]).unwrap();
        let plan = LaunchPlan::build(
            &registry,
            selection,
            &LauncherConfig::default(),
            &ComposeOptions::default(),
        )
        .unwrap();

        assert_eq!(plan.services(), ["mqtt", "fcm"]);

        let text = plan.to_string();
        assert!(text.contains("Project: avr"));
        assert!(text.contains("1. mqtt"));
        assert!(text.contains("2. fcm"));
        assert!(text.contains("Depends on: mqtt"));
        assert!(text.contains("Image: ghcr.io/bellflight/avr/mosquitto:latest"));
    }
}
