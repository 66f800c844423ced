//! Module registry and token resolution
//!
//! Modules and groups are plain data tables. Adding a group (or a module)
//! is a table edit, the resolver itself never changes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A deployable flight-software service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleDef {
    /// Service name, also used as the compose service key
    pub name: &'static str,
    /// One-line description for help output
    pub description: &'static str,
    /// Image name under the configured image base. `None` means the module
    /// is always built on the device.
    pub image: Option<&'static str>,
    /// Services this one expects to be up first
    pub depends_on: &'static [&'static str],
}

/// A named alias expanding to a set of modules
#[derive(Debug, Clone, Copy)]
pub struct GroupDef {
    pub name: &'static str,
    /// Tokens that select this group on the command line
    pub tokens: &'static [&'static str],
    pub members: &'static [&'static str],
}

pub const MODULES: &[ModuleDef] = &[
    ModuleDef {
        name: "fcm",
        description: "flight control module",
        image: Some("flightcontrol"),
        depends_on: &["mqtt", "mavp2p"],
    },
    ModuleDef {
        name: "fusion",
        description: "sensor fusion",
        image: Some("fusion"),
        depends_on: &["mqtt", "vio"],
    },
    ModuleDef {
        name: "mavp2p",
        description: "MAVLink proxy",
        image: Some("mavp2p"),
        depends_on: &[],
    },
    ModuleDef {
        name: "mqtt",
        description: "MQTT message bus",
        image: Some("mosquitto"),
        depends_on: &[],
    },
    ModuleDef {
        name: "vio",
        description: "visual-inertial odometry",
        image: Some("visual"),
        depends_on: &["mqtt"],
    },
    ModuleDef {
        name: "apriltag",
        description: "AprilTag detection",
        image: None,
        depends_on: &["mqtt"],
    },
    ModuleDef {
        name: "pcm",
        description: "peripheral control module",
        image: Some("peripheralcontrol"),
        depends_on: &["mqtt"],
    },
    ModuleDef {
        name: "status",
        description: "status reporting",
        image: Some("status"),
        depends_on: &["mqtt"],
    },
    ModuleDef {
        name: "thermal",
        description: "thermal camera",
        image: Some("thermal"),
        depends_on: &["mqtt"],
    },
    ModuleDef {
        name: "sandbox",
        description: "user sandbox",
        image: None,
        depends_on: &["mqtt"],
    },
    ModuleDef {
        name: "simulator",
        description: "PX4 simulator",
        image: Some("simulator"),
        depends_on: &[],
    },
];

pub const GROUPS: &[GroupDef] = &[
    GroupDef {
        name: "minimal",
        tokens: &["-m", "--min", "min", "minimal"],
        members: &["fcm", "fusion", "mavp2p", "mqtt", "vio"],
    },
    GroupDef {
        name: "normal",
        tokens: &["-n", "--norm", "norm", "normal"],
        members: &[
            "fcm", "fusion", "mavp2p", "mqtt", "vio", "apriltag", "pcm", "status", "thermal",
        ],
    },
    GroupDef {
        name: "all",
        tokens: &["-a", "--all", "all"],
        members: &[
            "fcm", "fusion", "mavp2p", "mqtt", "vio", "apriltag", "pcm", "status", "thermal",
            "sandbox",
        ],
    },
];

/// A group as held by a [`Registry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub tokens: Vec<String>,
    pub members: BTreeSet<String>,
}

/// Known modules and groups
#[derive(Debug, Clone)]
pub struct Registry {
    modules: BTreeMap<&'static str, ModuleDef>,
    groups: Vec<Group>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    /// Registry with the built-in module and group tables
    pub fn builtin() -> Self {
        let modules = MODULES.iter().map(|m| (m.name, *m)).collect();
        let groups = GROUPS
            .iter()
            .map(|g| Group {
                name: g.name.to_string(),
                tokens: g.tokens.iter().map(|t| t.to_string()).collect(),
                members: g.members.iter().map(|m| m.to_string()).collect(),
            })
            .collect();
        Self { modules, groups }
    }

    /// Register an extra group, selectable by its name
    pub fn add_group<I, S>(&mut self, name: &str, members: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.modules.contains_key(name) || self.group_for(name).is_some() {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }

        let members: BTreeSet<String> = members.into_iter().map(Into::into).collect();
        if members.is_empty() {
            return Err(RegistryError::EmptyGroup(name.to_string()));
        }
        if let Some(unknown) = members.iter().find(|m| !self.modules.contains_key(m.as_str())) {
            return Err(RegistryError::UnknownMember {
                group: name.to_string(),
                module: unknown.clone(),
            });
        }

        self.groups.push(Group {
            name: name.to_string(),
            tokens: vec![name.to_string()],
            members,
        });
        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<&ModuleDef> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleDef> {
        self.modules.values()
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    fn group_for(&self, token: &str) -> Option<&Group> {
        self.groups
            .iter()
            .find(|g| g.tokens.iter().any(|t| t == token))
    }

    /// Resolve user tokens into a validated selection.
    ///
    /// Group tokens expand to their members, module names are taken as-is.
    /// The first unknown token aborts resolution, so a returned selection
    /// is always a subset of the registry.
    pub fn resolve<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Selection, ResolveError> {
        let mut selected = BTreeSet::new();

        for token in tokens {
            let token = token.as_ref();
            if let Some(group) = self.group_for(token) {
                selected.extend(group.members.iter().cloned());
            } else if self.modules.contains_key(token) {
                selected.insert(token.to_string());
            } else {
                return Err(ResolveError::UnknownToken(token.to_string()));
            }
        }

        if selected.is_empty() {
            return Err(ResolveError::EmptySelection);
        }

        Ok(Selection(selected))
    }
}

/// Deduplicated set of module names to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection(BTreeSet<String>);

impl Selection {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().collect();
        write!(f, "{}", names.join(", "))
    }
}

/// Errors from [`Registry::resolve`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Unknown module or group: '{0}'")]
    UnknownToken(String),

    #[error("No modules selected (pass module names or one of -m, -n, -a)")]
    EmptySelection,
}

/// Errors when extending the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Group name '{0}' is already a module or group")]
    DuplicateName(String),

    #[error("Group '{0}' has no members")]
    EmptyGroup(String),

    #[error("Group '{group}' references unknown module '{module}'")]
    UnknownMember { group: String, module: String },
}
