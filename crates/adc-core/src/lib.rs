pub mod gate;
pub mod idle;
pub mod nav_tree;
pub mod refresh;
pub mod resource;
pub mod session;

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

pub use gate::{GateDecision, GatePolicy, NavigationGate};
pub use idle::{ActivityEvent, ActivityKind, IdleMonitor};
pub use nav_tree::{Expansion, NavCommand, NavRow, NavRowKind, NavTreeController, TreePhase};
pub use refresh::{RefreshBus, Subscription};
pub use resource::{ResourceError, ResourceLayer};
pub use session::{CredentialBackend, MemoryBackend, SessionCredential, SessionError, SessionStore};

pub const DASHBOARD_LABEL: &str = "Dashboard";
pub const SETTINGS_LABEL: &str = "Settings";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavModule {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavSubmodule {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub module_id: String,
}

/// Startup configuration problems. Always fatal; never defaulted away.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("idle timeout must be a positive number of minutes, got {0}")]
    InvalidIdleTimeout(f64),
    #[error("invalid api base url '{0}'")]
    InvalidBaseUrl(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Login,
    Register,
    Dashboard,
    Settings,
    Parameters,
    Preferences,
    Plugin,
    Users,
    Submodule {
        module_id: String,
        submodule_id: String,
    },
}

/// Fixed children of the settings tree, in display order.
pub const SETTINGS_LEAVES: [Destination; 4] = [
    Destination::Parameters,
    Destination::Preferences,
    Destination::Plugin,
    Destination::Users,
];

impl Destination {
    pub fn parse(path: &str) -> Option<Self> {
        let trimmed = path.trim();
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        match trimmed {
            "" | "/dashboard" => return Some(Destination::Dashboard),
            "/login" | "/logout" => return Some(Destination::Login),
            "/register" => return Some(Destination::Register),
            "/settings" => return Some(Destination::Settings),
            "/settings/parameters" => return Some(Destination::Parameters),
            "/settings/preferences" => return Some(Destination::Preferences),
            "/settings/plugin" => return Some(Destination::Plugin),
            "/settings/users" => return Some(Destination::Users),
            _ => {}
        }

        let rest = trimmed.strip_prefix("/modules/")?;
        let (module_id, submodule_id) = rest.split_once('/')?;
        if module_id.is_empty() || submodule_id.is_empty() || submodule_id.contains('/') {
            return None;
        }
        Some(Destination::Submodule {
            module_id: module_id.to_string(),
            submodule_id: submodule_id.to_string(),
        })
    }

    pub fn path(&self) -> String {
        match self {
            Destination::Login => "/login".to_string(),
            Destination::Register => "/register".to_string(),
            Destination::Dashboard => "/dashboard".to_string(),
            Destination::Settings => "/settings".to_string(),
            Destination::Parameters => "/settings/parameters".to_string(),
            Destination::Preferences => "/settings/preferences".to_string(),
            Destination::Plugin => "/settings/plugin".to_string(),
            Destination::Users => "/settings/users".to_string(),
            Destination::Submodule {
                module_id,
                submodule_id,
            } => format!("/modules/{module_id}/{submodule_id}"),
        }
    }

    /// Login and registration are the only destinations reachable without a session.
    pub fn is_protected(&self) -> bool {
        !matches!(self, Destination::Login | Destination::Register)
    }

    /// Sidebar label for fixed destinations. Submodule labels come from the tree.
    pub fn fixed_label(&self) -> Option<&'static str> {
        match self {
            Destination::Login => Some("Login"),
            Destination::Register => Some("Register"),
            Destination::Dashboard => Some(DASHBOARD_LABEL),
            Destination::Settings => Some(SETTINGS_LABEL),
            Destination::Parameters => Some("Parameters"),
            Destination::Preferences => Some("Preferences"),
            Destination::Plugin => Some("Plugin"),
            Destination::Users => Some("Users"),
            Destination::Submodule { .. } => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Deserialize an ID that can be either a string or a number into a String
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}
