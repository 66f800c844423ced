//! AVR module launcher
//!
//! Resolves module names and group shortcuts into a validated set of
//! containers, renders a compose file for exactly that set and supervises
//! the containers until interrupted.
//!
//! # Example
//!
//! ```text
//! avr_launch run -m thermal status    # minimal flight set plus two modules
//! avr_launch pull -n                  # pull the normal set
//! avr_launch run --dry-run fcm        # show the plan, touch nothing
//! avr_launch stop                     # bring the whole project down
//! ```
//!
//! # Groups
//!
//! | token | modules |
//! |---|---|
//! | `-m` / `minimal` | fcm, fusion, mavp2p, mqtt, vio |
//! | `-n` / `normal` | minimal + apriltag, pcm, status, thermal |
//! | `-a` / `all` | normal + sandbox |

pub mod cli;
pub mod compose;
pub mod config;
pub mod plan;
pub mod preflight;
pub mod privilege;
pub mod registry;
pub mod runtime;

pub use cli::{Action, LaunchArgs};
pub use compose::{ComposeError, ComposeFile, ComposeOptions};
pub use config::{ConfigError, LauncherConfig};
pub use plan::{LaunchPlan, PlanError};
pub use registry::{Registry, RegistryError, ResolveError, Selection};
pub use runtime::{
    launch, supervise, ContainerRuntime, DockerCompose, LaunchError, RunOutcome, RunSession,
    RuntimeError, SessionConfig, SessionState, ShutdownReport, StartOrder, StopError,
    WaitOutcome,
};
