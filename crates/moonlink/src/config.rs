//! Profile resolution with CLI flag overrides.
//!
//! The shared config crate owns the TOML types and credential chain; this
//! module layers `GlobalOpts` on top and hands core a `BridgeConfig`.

use moonlink_config::{Config, Profile};
use moonlink_core::BridgeConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use moonlink_config::{config_path, load_config_or_default, save_config};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.active_profile_name(global.profile.as_deref())
}

/// Apply flag overrides to a profile. Flags win over the file.
pub fn apply_overrides(profile: &mut Profile, global: &GlobalOpts) {
    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
    }
    if let Some(port) = global.port {
        profile.port = port;
    }
    if global.tls {
        profile.use_tls = true;
    }
    if let Some(transport) = global.transport {
        profile.transport = Some(transport.as_str().to_owned());
    }
    if let Some(secs) = global.poll_interval {
        profile.poll_interval = Some(secs);
    }
    if let Some(secs) = global.timeout {
        profile.timeout = Some(secs);
    }
}

/// Build a `BridgeConfig` from the config file, profile, and CLI overrides.
///
/// Without a matching profile, `--host` alone is enough to connect to an
/// instance that does not require a login.
pub fn build_bridge_config(global: &GlobalOpts) -> Result<BridgeConfig, CliError> {
    let cfg = load_config_or_default();
    resolve(&cfg, global)
}

pub(crate) fn resolve(cfg: &Config, global: &GlobalOpts) -> Result<BridgeConfig, CliError> {
    let profile_name = active_profile_name(global, cfg);

    let mut profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.host.is_some() => Profile::new(String::new()),
        None if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: cfg.profile_names(),
            });
        }
        None => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
    };
    apply_overrides(&mut profile, global);

    tracing::debug!(profile = %profile_name, host = %profile.host, "profile resolved");
    Ok(moonlink_config::profile_to_bridge_config(
        &profile,
        &profile_name,
        &cfg.defaults,
    )?)
}
