//! Config subcommand handlers.

use dialoguer::{Confirm, Input, Select};

use moonlink_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);
    let _ = writeln!(out, "poll_interval = {}", cfg.defaults.poll_interval);
    let _ = writeln!(out, "transport = \"{}\"", cfg.defaults.transport);

    for (name, p) in &cfg.profiles {
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "host = \"{}\"", p.host);
        let _ = writeln!(out, "port = {}", p.port);
        let _ = writeln!(out, "use_tls = {}", p.use_tls);
        if let Some(accept) = p.accept_invalid_certs {
            let _ = writeln!(out, "accept_invalid_certs = {accept}");
        }
        let _ = writeln!(out, "auth = {}", p.auth);
        if let Some(ref u) = p.username {
            let _ = writeln!(out, "username = \"{u}\"");
        }
        if p.password.is_some() {
            let _ = writeln!(out, "password = \"****\"");
        }
        if let Some(ref env) = p.password_env {
            let _ = writeln!(out, "password_env = \"{env}\"");
        }
        if let Some(ref transport) = p.transport {
            let _ = writeln!(out, "transport = \"{transport}\"");
        }
        if let Some(secs) = p.poll_interval {
            let _ = writeln!(out, "poll_interval = {secs}");
        }
        if let Some(secs) = p.timeout {
            let _ = writeln!(out, "timeout = {secs}");
        }
    }

    out
}

/// Copy of `cfg` safe to serialize for display.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some("****".into());
        }
    }
    cfg
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn parse_flag(field: &str, value: &str) -> Result<bool, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: "must be 'true' or 'false'".into(),
    })
}

fn parse_secs(field: &str, value: &str) -> Result<u64, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: "must be a number (seconds)".into(),
    })
}

/// Apply `key = value` to a profile.
fn set_profile_key(profile: &mut Profile, key: &str, value: String) -> Result<(), CliError> {
    match key {
        "host" => profile.host = value,
        "port" => {
            profile.port = value.parse().map_err(|_| CliError::Validation {
                field: "port".into(),
                reason: "must be a number between 1 and 65535".into(),
            })?;
        }
        "use_tls" | "use-tls" | "tls" => profile.use_tls = parse_flag("use_tls", &value)?,
        "accept_invalid_certs" | "accept-invalid-certs" => {
            profile.accept_invalid_certs = Some(parse_flag("accept_invalid_certs", &value)?);
        }
        "auth" => profile.auth = parse_flag("auth", &value)?,
        "username" => profile.username = Some(value),
        "password_env" | "password-env" => profile.password_env = Some(value),
        "transport" => {
            if !matches!(value.as_str(), "websocket" | "ws" | "http" | "poll") {
                return Err(CliError::Validation {
                    field: "transport".into(),
                    reason: "must be 'websocket' or 'http'".into(),
                });
            }
            profile.transport = Some(value);
        }
        "poll_interval" | "poll-interval" => {
            let secs = parse_secs("poll_interval", &value)?;
            if secs == 0 {
                return Err(CliError::Validation {
                    field: "poll_interval".into(),
                    reason: "must be at least one second".into(),
                });
            }
            profile.poll_interval = Some(secs);
        }
        "timeout" => profile.timeout = Some(parse_secs("timeout", &value)?),
        other => {
            return Err(CliError::Validation {
                field: other.into(),
                reason: format!(
                    "unknown config key '{other}'. Valid keys: host, port, use_tls, \
                     accept_invalid_certs, auth, username, password_env, transport, \
                     poll_interval, timeout"
                ),
            });
        }
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(),

        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let out = output::render_single(&global.output, &redacted(&cfg), format_config_redacted, |_| {
                config::config_path().display().to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            let profile = cfg
                .profiles
                .entry(profile_name.clone())
                .or_insert_with(|| Profile::new(String::new()));

            set_profile_key(profile, &key, value)?;
            config::save_config(&cfg)?;
            eprintln!("✓ Set {key} on profile '{profile_name}'");
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: moonlink config init");
            } else {
                for (name, profile) in &cfg.profiles {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}\t{}:{}", profile.host, profile.port);
                }
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: cfg.profile_names(),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        ConfigCommand::SetPassword { name } => {
            let cfg = config::load_config_or_default();
            let profile_name = name.unwrap_or_else(|| config::active_profile_name(global, &cfg));
            if !cfg.profiles.contains_key(&profile_name) {
                return Err(CliError::ProfileNotFound {
                    available: cfg.profile_names(),
                    name: profile_name,
                });
            }

            let secret = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "value cannot be empty".into(),
                });
            }
            moonlink_config::store_password(&profile_name, &secret)?;
            eprintln!("✓ Password stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init() -> Result<(), CliError> {
    let config_path = config::config_path();
    eprintln!("moonlink configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    let mut cfg = config::load_config_or_default();

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default("default".into())
        .interact_text()
        .map_err(prompt_err)?;

    let host: String = Input::new()
        .with_prompt("Moonraker host")
        .default("localhost".into())
        .interact_text()
        .map_err(prompt_err)?;

    let port: u16 = Input::new()
        .with_prompt("Port")
        .default(7125)
        .interact_text()
        .map_err(prompt_err)?;

    let use_tls = Confirm::new()
        .with_prompt("Use https / wss?")
        .default(false)
        .interact()
        .map_err(prompt_err)?;

    let transport = Select::new()
        .with_prompt("Live-link transport")
        .items(&["websocket (push updates)", "http (polling)"])
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    let mut profile = Profile::new(host);
    profile.port = port;
    profile.use_tls = use_tls;
    profile.transport = Some(if transport == 0 { "websocket" } else { "http" }.into());

    profile.auth = Confirm::new()
        .with_prompt("Does Moonraker require a login?")
        .default(false)
        .interact()
        .map_err(prompt_err)?;

    if profile.auth {
        let user: String = Input::new()
            .with_prompt("Username")
            .interact_text()
            .map_err(prompt_err)?;
        let pass = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
        if user.is_empty() || pass.is_empty() {
            return Err(CliError::Validation {
                field: "credentials".into(),
                reason: "username and password cannot be empty".into(),
            });
        }
        profile.username = Some(user);

        let choices = &[
            "Store in system keyring (recommended)",
            "Save to config file (plaintext)",
        ];
        let selection = Select::new()
            .with_prompt("Where to store the password?")
            .items(choices)
            .default(0)
            .interact()
            .map_err(prompt_err)?;
        if selection == 0 {
            moonlink_config::store_password(&profile_name, &pass)?;
            eprintln!("   ✓ Password stored in system keyring");
        } else {
            profile.password = Some(pass);
        }
    }

    cfg.profiles.insert(profile_name.clone(), profile);
    cfg.default_profile = Some(profile_name.clone());
    config::save_config(&cfg)?;

    eprintln!("\n✓ Configuration written to {}", config_path.display());
    eprintln!("  Active profile: {profile_name}");
    eprintln!("\n  Test it: moonlink snapshot");
    Ok(())
}
