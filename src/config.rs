//! Server configuration
//!
//! Read from the `[server]` table of a TOML file:
//!
//! ```toml
//! [server]
//! applications = "resource-lists, pres-rules"   # or ["..."], or "all"
//! document_validation = true
//! root = "http://xcap.example.com/xcap-root"
//! ```

use crate::appusage::Application;
use crate::error::XcapResult;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use tracing::warn;

/// Default XCAP root URI
pub const DEFAULT_ROOT: &str = "http://localhost/xcap-root";

/// Applications the server exposes
///
/// `"all"` stands for every production application. Names that do not
/// identify a supported application are dropped with a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledApplications(Vec<Application>);

impl EnabledApplications {
    pub fn all() -> Self {
        EnabledApplications(Application::PRODUCTION.to_vec())
    }

    /// Resolve configured names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let names: Vec<&str> = names
            .iter()
            .map(|n| n.as_ref().trim())
            .filter(|n| !n.is_empty())
            .collect();
        if names.len() == 1 && names[0].eq_ignore_ascii_case("all") {
            return Self::all();
        }

        let mut applications = Vec::new();
        for name in names {
            match Application::from_auid(name) {
                Some(app) if !applications.contains(&app) => applications.push(app),
                Some(_) => {}
                None => warn!("ignoring unknown application: {}", name),
            }
        }
        EnabledApplications(applications)
    }

    /// Resolve a comma-separated list
    pub fn parse(value: &str) -> Self {
        Self::from_names(&value.split(',').collect::<Vec<_>>())
    }

    pub fn applications(&self) -> &[Application] {
        &self.0
    }

    pub fn contains(&self, application: Application) -> bool {
        self.0.contains(&application)
    }
}

impl Default for EnabledApplications {
    fn default() -> Self {
        Self::all()
    }
}

impl<'de> Deserialize<'de> for EnabledApplications {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            List(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => EnabledApplications::parse(&text),
            Raw::List(names) => EnabledApplications::from_names(&names),
        })
    }
}

/// `[server]` settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub applications: EnabledApplications,
    /// Validate documents against their application's schema on write
    pub document_validation: bool,
    /// XCAP root URI
    pub root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            applications: EnabledApplications::all(),
            document_validation: true,
            root: DEFAULT_ROOT.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
}

impl ServerConfig {
    /// Parse a TOML document; a missing `[server]` table means defaults
    pub fn from_toml_str(text: &str) -> XcapResult<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.server)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> XcapResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
