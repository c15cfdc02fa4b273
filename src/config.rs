//! Runtime bootstrap configuration and tracing setup.
//!
//! [`JitConfig`] is a plain value consumed once by [`crate::jit::init`]. It can be built in
//! code or read from `MONOBRIDGE_*` environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `MONOBRIDGE_ASSEMBLY_DIR` | [`JitConfig::assembly_dir`] |
//! | `MONOBRIDGE_CONFIG_DIR` | [`JitConfig::config_dir`] |
//! | `MONOBRIDGE_ASSEMBLIES_PATH` | [`JitConfig::assemblies_path`] |
//! | `MONOBRIDGE_DOMAIN` | [`JitConfig::domain_name`] |
//! | `MONOBRIDGE_DEBUG` | [`DebuggingConfig::enabled`] |
//! | `MONOBRIDGE_DEBUG_ADDRESS` | [`DebuggingConfig::address`] |
//! | `MONOBRIDGE_DEBUG_PORT` | [`DebuggingConfig::port`] |
//! | `MONOBRIDGE_DEBUG_LOG_LEVEL` | [`DebuggingConfig::log_level`] |

use std::path::{Path, PathBuf};

use crate::{emulation::ROOT_DOMAIN_NAME, Error, Result};

/// Framework profile directory below the assembly directory.
const PROFILE_DIR: &str = "mono/4.5";

/// Installs a `tracing-subscriber` fmt subscriber filtered by `RUST_LOG`.
///
/// Without `RUST_LOG` the bridge logs at `info`, or `debug` in debug builds. Does nothing
/// if a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            EnvFilter::new("monobridge=debug")
        }
        #[cfg(not(debug_assertions))]
        {
            EnvFilter::new("monobridge=info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .ok();
}

/// Settings of the runtime's soft debugger agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggingConfig {
    /// Whether the agent should be started.
    pub enabled: bool,
    /// Address the agent listens on.
    pub address: String,
    /// Port the agent listens on.
    pub port: u16,
    /// Verbosity of the agent's own log.
    pub log_level: u32,
}

impl Default for DebuggingConfig {
    fn default() -> Self {
        DebuggingConfig {
            enabled: false,
            address: "127.0.0.1".to_string(),
            port: 55555,
            log_level: 0,
        }
    }
}

impl DebuggingConfig {
    /// The `--debugger-agent` option a native runtime expects for these settings.
    #[must_use]
    pub fn agent_option(&self) -> String {
        format!(
            "--debugger-agent=transport=dt_socket,suspend=n,server=y,address={}:{},embedding=1,loglevel={}",
            self.address, self.port, self.log_level
        )
    }
}

/// Bootstrap configuration of the managed runtime.
///
/// ```rust
/// use monobridge::JitConfig;
///
/// let config = JitConfig::new()
///     .with_assembly_dir("/opt/mono/lib")
///     .with_domain_name("scripts");
/// assert_eq!(config.domain_name, "scripts");
/// assert!(config.effective_assemblies_path().unwrap().ends_with("mono/4.5"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    /// Directory holding the framework assemblies.
    pub assembly_dir: Option<PathBuf>,
    /// Directory holding the runtime configuration.
    pub config_dir: Option<PathBuf>,
    /// Directories probed for assemblies, separated like `PATH`.
    ///
    /// Defaults to the framework profile below [`JitConfig::assembly_dir`].
    pub assemblies_path: Option<String>,
    /// Name of the domain scripts run in.
    pub domain_name: String,
    /// Debugger agent settings.
    pub debugging: DebuggingConfig,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            assembly_dir: None,
            config_dir: None,
            assemblies_path: None,
            domain_name: ROOT_DOMAIN_NAME.to_string(),
            debugging: DebuggingConfig::default(),
        }
    }
}

impl JitConfig {
    /// The default configuration: root domain, no directories, debugging off.
    #[must_use]
    pub fn new() -> Self {
        JitConfig::default()
    }

    /// Reads the configuration from `MONOBRIDGE_*` variables, see the module docs.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if a numeric or boolean variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = JitConfig::default();
        if let Some(dir) = lookup("MONOBRIDGE_ASSEMBLY_DIR") {
            config.assembly_dir = Some(dir.into());
        }
        if let Some(dir) = lookup("MONOBRIDGE_CONFIG_DIR") {
            config.config_dir = Some(dir.into());
        }
        config.assemblies_path = lookup("MONOBRIDGE_ASSEMBLIES_PATH");
        if let Some(name) = lookup("MONOBRIDGE_DOMAIN") {
            config.domain_name = name;
        }

        if let Some(enabled) = lookup("MONOBRIDGE_DEBUG") {
            config.debugging.enabled = parse_flag("MONOBRIDGE_DEBUG", &enabled)?;
        }
        if let Some(address) = lookup("MONOBRIDGE_DEBUG_ADDRESS") {
            config.debugging.address = address;
        }
        if let Some(port) = lookup("MONOBRIDGE_DEBUG_PORT") {
            config.debugging.port = parse_number("MONOBRIDGE_DEBUG_PORT", &port)?;
        }
        if let Some(level) = lookup("MONOBRIDGE_DEBUG_LOG_LEVEL") {
            config.debugging.log_level = parse_number("MONOBRIDGE_DEBUG_LOG_LEVEL", &level)?;
        }
        Ok(config)
    }

    /// Sets the framework assembly directory.
    #[must_use]
    pub fn with_assembly_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assembly_dir = Some(dir.into());
        self
    }

    /// Sets the runtime configuration directory.
    #[must_use]
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Sets the assembly probing path explicitly.
    #[must_use]
    pub fn with_assemblies_path(mut self, path: impl Into<String>) -> Self {
        self.assemblies_path = Some(path.into());
        self
    }

    /// Sets the name of the script domain.
    #[must_use]
    pub fn with_domain_name(mut self, name: impl Into<String>) -> Self {
        self.domain_name = name.into();
        self
    }

    /// Sets the debugger agent settings.
    #[must_use]
    pub fn with_debugging(mut self, debugging: DebuggingConfig) -> Self {
        self.debugging = debugging;
        self
    }

    /// The probing path handed to the runtime, if any.
    #[must_use]
    pub fn effective_assemblies_path(&self) -> Option<String> {
        if let Some(path) = &self.assemblies_path {
            return Some(path.clone());
        }
        self.assembly_dir
            .as_deref()
            .map(|dir| dir.join(Path::new(PROFILE_DIR)).to_string_lossy().into_owned())
    }

    /// The runtime configuration file below [`JitConfig::config_dir`].
    #[must_use]
    pub fn config_file(&self) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|dir| dir.join("mono").join("config"))
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Error(format!("{name}: expected a boolean, got '{value}'"))),
    }
}

fn parse_number<N: std::str::FromStr>(name: &str, value: &str) -> Result<N> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Error(format!("{name}: expected a number, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = JitConfig::default();
        assert_eq!(config.domain_name, ROOT_DOMAIN_NAME);
        assert_eq!(config.effective_assemblies_path(), None);
        assert_eq!(config.config_file(), None);
        assert!(!config.debugging.enabled);
        assert_eq!(config.debugging.port, 55555);
    }

    #[test]
    fn test_builder() {
        let config = JitConfig::new()
            .with_assembly_dir("/opt/mono/lib")
            .with_config_dir("/opt/mono/etc")
            .with_domain_name("scripts");
        assert_eq!(
            config.effective_assemblies_path().as_deref(),
            Some("/opt/mono/lib/mono/4.5")
        );
        assert_eq!(config.config_file(), Some(PathBuf::from("/opt/mono/etc/mono/config")));

        let explicit = config.with_assemblies_path("/a:/b");
        assert_eq!(explicit.effective_assemblies_path().as_deref(), Some("/a:/b"));
    }

    #[test]
    fn test_from_lookup() {
        let config = JitConfig::from_lookup(lookup(&[
            ("MONOBRIDGE_ASSEMBLY_DIR", "/usr/lib"),
            ("MONOBRIDGE_DOMAIN", "game"),
            ("MONOBRIDGE_DEBUG", "true"),
            ("MONOBRIDGE_DEBUG_PORT", "5000"),
            ("MONOBRIDGE_DEBUG_LOG_LEVEL", "2"),
        ]))
        .unwrap();
        assert_eq!(config.assembly_dir, Some(PathBuf::from("/usr/lib")));
        assert_eq!(config.domain_name, "game");
        assert!(config.debugging.enabled);
        assert_eq!(config.debugging.address, "127.0.0.1");
        assert_eq!(
            config.debugging.agent_option(),
            "--debugger-agent=transport=dt_socket,suspend=n,server=y,address=127.0.0.1:5000,embedding=1,loglevel=2"
        );

        assert_eq!(JitConfig::from_lookup(lookup(&[])).unwrap(), JitConfig::default());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let port = JitConfig::from_lookup(lookup(&[("MONOBRIDGE_DEBUG_PORT", "70000")]));
        assert!(matches!(port, Err(Error::Error(message)) if message.contains("MONOBRIDGE_DEBUG_PORT")));
        assert!(JitConfig::from_lookup(lookup(&[("MONOBRIDGE_DEBUG", "maybe")])).is_err());
    }
}
