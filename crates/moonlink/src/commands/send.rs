//! `moonlink send`: dispatch one control command outside a session.

use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::debug;

use moonlink_core::{BridgeConfig, CommandDispatcher, ControlCommand, DispatchOutcome, StateValue};

use crate::cli::{GlobalOpts, SendArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct SendResult {
    command: String,
    endpoint: &'static str,
    status: &'static str,
}

pub async fn handle(config: &BridgeConfig, args: SendArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let command = parse_command(&args.command)?;
    let value = command_value(command, args.value)?;

    let dispatcher = CommandDispatcher::from_config(config)?;
    let bearer = dispatcher.login(&config.auth).await?;
    debug!(command = %command, authenticated = bearer.is_some(), "dispatching");

    match dispatcher.dispatch(bearer.as_ref(), &command.path(), &value).await {
        DispatchOutcome::Sent => {
            let result = SendResult {
                command: command.to_string(),
                endpoint: command.endpoint(),
                status: "sent",
            };
            let out = output::render_single(
                &global.output,
                &result,
                |r| format!("✓ {} sent ({})", r.command, r.endpoint),
                |r| r.status.to_owned(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
        DispatchOutcome::Rejected { message } => Err(CliError::CommandRejected {
            command: command.to_string(),
            message,
        }),
        DispatchOutcome::Failed { error } => Err(CliError::CommandFailed {
            command: command.to_string(),
            reason: error,
        }),
        DispatchOutcome::Ignored => Err(CliError::Validation {
            field: "value".into(),
            reason: format!("'{command}' has nothing to send"),
        }),
    }
}

/// Accept the control id in any case, e.g. `printPause` or `printpause`.
fn parse_command(raw: &str) -> Result<ControlCommand, CliError> {
    ControlCommand::iter()
        .find(|c| c.state_id().eq_ignore_ascii_case(raw.trim()))
        .ok_or_else(|| CliError::Validation {
            field: "command".into(),
            reason: format!(
                "unknown control '{raw}'. Valid: {}",
                ControlCommand::iter()
                    .map(ControlCommand::state_id)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })
}

/// Buttons are pressed; runGcode needs its script.
fn command_value(command: ControlCommand, value: Option<String>) -> Result<StateValue, CliError> {
    if command.is_button() {
        if value.is_some() {
            return Err(CliError::Validation {
                field: "value".into(),
                reason: format!("'{command}' takes no value"),
            });
        }
        return Ok(StateValue::Bool(true));
    }
    match value {
        Some(script) if !script.trim().is_empty() => Ok(StateValue::Text(script)),
        _ => Err(CliError::Validation {
            field: "value".into(),
            reason: format!("'{command}' needs a G-code script, e.g. moonlink send {command} \"G28\""),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_case_insensitively() {
        assert_eq!(parse_command("printPause").unwrap(), ControlCommand::PrintPause);
        assert_eq!(parse_command("EMERGENCYSTOP").unwrap(), ControlCommand::EmergencyStop);
        assert!(matches!(parse_command("explode"), Err(CliError::Validation { .. })));
    }

    #[test]
    fn values_match_the_command_kind() {
        assert_eq!(
            command_value(ControlCommand::PrintResume, None).unwrap(),
            StateValue::Bool(true)
        );
        assert!(command_value(ControlCommand::PrintResume, Some("x".into())).is_err());
        assert_eq!(
            command_value(ControlCommand::RunGcode, Some("G28".into())).unwrap(),
            StateValue::Text("G28".into())
        );
        assert!(command_value(ControlCommand::RunGcode, Some("  ".into())).is_err());
        assert!(command_value(ControlCommand::RunGcode, None).is_err());
    }
}
