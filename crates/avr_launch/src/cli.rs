//! Command-line interface for avr_launch

use argh::FromArgs;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Run, build, pull or stop the AVR flight software containers
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// action to perform: run, build, pull, stop
    #[argh(positional)]
    pub action: Action,

    /// modules or group names to act on (e.g. fcm thermal minimal)
    #[argh(positional)]
    pub modules: Vec<String>,

    /// add the minimal flight set (fcm, fusion, mavp2p, mqtt, vio)
    #[argh(switch, short = 'm')]
    pub min: bool,

    /// add the normal set (minimal plus apriltag, pcm, status, thermal)
    #[argh(switch, short = 'n')]
    pub norm: bool,

    /// add every module except the simulator
    #[argh(switch, short = 'a')]
    pub all: bool,

    /// build containers locally rather than using pre-built images
    #[argh(switch, short = 'l')]
    pub local: bool,

    /// run the simulator headless
    #[argh(switch)]
    pub headless: bool,

    /// print the launch plan and compose file without touching docker
    #[argh(switch)]
    pub dry_run: bool,

    /// do not re-launch through sudo when not running as root
    #[argh(switch)]
    pub no_sudo: bool,

    /// path to the launcher config (default: <config dir>/avr/launch.yaml)
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, default = "String::from(\"info\")")]
    pub log_level: String,
}

/// What to do with the selected modules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Run,
    Build,
    Pull,
    Stop,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(Action::Run),
            "build" => Ok(Action::Build),
            "pull" => Ok(Action::Pull),
            "stop" => Ok(Action::Stop),
            other => Err(format!(
                "Unknown action '{}'. Expected one of: run, build, pull, stop",
                other
            )),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Run => "run",
            Action::Build => "build",
            Action::Pull => "pull",
            Action::Stop => "stop",
        };
        f.write_str(name)
    }
}

impl LaunchArgs {
    /// Module tokens to resolve, with group switches appended as their
    /// group tokens
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = self.modules.clone();
        for (enabled, token) in [(self.min, "-m"), (self.norm, "-n"), (self.all, "-a")] {
            if enabled {
                tokens.push(token.to_string());
            }
        }
        tokens
    }

    /// Normalized log filter, falling back to `info`
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}
