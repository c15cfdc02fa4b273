//! Bootstrap and shutdown of the managed runtime.
//!
//! [`init`] establishes the execution context every other operation assumes: an installed
//! runtime and a current domain. When the host has not installed a native runtime through
//! [`crate::runtime::install`], the in-process [`crate::emulation`] is installed instead.

use std::sync::RwLock;

use crate::{
    assembly::Assembly,
    config::JitConfig,
    domain::Domain,
    emulation,
    logger::log_message,
    runtime,
    types::reset_all_caches,
    Result,
};

/// The script domain created by [`init`], if it is not the root domain.
static SCRIPT_DOMAIN: RwLock<Option<Domain>> = RwLock::new(None);

/// Initializes the runtime and returns the domain scripts run in.
///
/// If `config` names a domain other than the runtime's root domain, that domain is created
/// and made current. Calling `init` again creates a fresh script domain.
///
/// # Errors
/// Returns an error if the emulation can not be created or the script domain can not be
/// created or entered.
pub fn init(config: JitConfig) -> Result<Domain> {
    if !runtime::is_installed() {
        emulation::shared()?;
    }
    let rt = runtime::get()?;

    if let Some(path) = config.effective_assemblies_path() {
        rt.set_assemblies_path(&path);
    }
    if let Some(file) = config.config_file() {
        tracing::debug!(file = %file.display(), "runtime configuration file");
    }
    if config.debugging.enabled {
        tracing::warn!(
            option = %config.debugging.agent_option(),
            "debugger agent is managed by the host runtime, option not applied"
        );
    }

    let corlib = Assembly::corlib()?;
    log_message(
        "trace",
        &format!("{} was loaded from: {}", corlib.name(), corlib.filename()),
    );

    let root = Domain::current()?;
    if config.domain_name == root.name() {
        tracing::debug!(domain = root.name(), "runtime initialized");
        return Ok(root);
    }

    let domain = Domain::new(&config.domain_name)?;
    domain.set_current()?;
    if let Some(previous) = try_write_lock!(SCRIPT_DOMAIN).replace(domain.clone()) {
        previous.unload()?;
    }
    tracing::debug!(domain = domain.name(), "runtime initialized");
    Ok(domain)
}

/// Unloads the script domain created by [`init`] and resets every metadata cache.
///
/// Handles obtained before the shutdown must not be used afterwards.
///
/// # Errors
/// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
pub fn shutdown() -> Result<()> {
    runtime::get()?;
    let script = try_write_lock!(SCRIPT_DOMAIN).take();
    if let Some(domain) = script {
        domain.unload()?;
    }
    reset_all_caches();
    tracing::debug!("runtime shut down");
    Ok(())
}
