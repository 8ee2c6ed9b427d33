//! `moonlink controls`: the writable states under `control.*`.

use serde::Serialize;
use strum::IntoEnumIterator;
use tabled::Tabled;

use moonlink_core::ControlCommand;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct ControlInfo {
    id: &'static str,
    path: String,
    label: &'static str,
    endpoint: &'static str,
    value_type: String,
}

#[derive(Tabled)]
struct ControlRow {
    #[tabled(rename = "Control")]
    id: &'static str,
    #[tabled(rename = "Description")]
    label: &'static str,
    #[tabled(rename = "Endpoint")]
    endpoint: &'static str,
    #[tabled(rename = "Type")]
    value_type: String,
}

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let controls: Vec<ControlInfo> = ControlCommand::iter()
        .map(|c| ControlInfo {
            id: c.state_id(),
            path: c.path(),
            label: c.label(),
            endpoint: c.endpoint(),
            value_type: c.meta().value_type.to_string(),
        })
        .collect();

    let out = output::render_list(
        &global.output,
        &controls,
        |c| ControlRow {
            id: c.id,
            label: c.label,
            endpoint: c.endpoint,
            value_type: c.value_type.clone(),
        },
        |c| c.id.to_owned(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
