//! `moonlink run`: keep the bridge up and stream the state tree.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use moonlink_core::{
    Bridge, BridgeConfig, CoreError, LinkNotice, MemoryStore, StateStore, StateValue, ValueType,
};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::output;

type InputLines = Lines<BufReader<Stdin>>;

pub async fn handle(config: BridgeConfig, args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let store = Arc::new(MemoryStore::new());
    let mut changes = store.changes();
    let color = output::should_color(&global.color);
    let mut input = args.stdin.then(|| BufReader::new(tokio::io::stdin()).lines());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let bridge = Bridge::new(config.clone(), Arc::clone(&store) as Arc<dyn StateStore>)?;
        let mut notices = bridge.notices();
        bridge.start().await?;
        info!(host = %config.host, transport = %config.transport, "bridge running");

        let ended = loop {
            tokio::select! {
                biased;

                _ = &mut ctrl_c => break None,

                result = bridge.wait() => break Some(result),

                change = changes.recv() => match change {
                    Ok(change) => {
                        if output::under_prefix(&change.path, args.filter.as_deref()) {
                            let line = output::change_line(&global.output, &change, color)?;
                            output::print_output(&line, global.quiet);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "change stream lagged"),
                    Err(RecvError::Closed) => break None,
                },

                notice = notices.recv() => {
                    if let Ok(notice) = notice {
                        report(&notice);
                    }
                }

                line = next_line(&mut input), if input.is_some() => match line {
                    Some(line) => apply_line(&store, &line),
                    None => input = None,
                },
            }
        };

        match ended {
            None => {
                info!("interrupted, shutting down");
                bridge.shutdown().await?;
                return Ok(());
            }
            Some(Ok(())) => return Ok(()),
            Some(Err(CoreError::RestartRequired { reason })) => {
                warn!(reason, "session ended, starting a new one");
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

fn report(notice: &LinkNotice) {
    match notice {
        LinkNotice::Opened => info!("link open"),
        LinkNotice::Closed { reason } => warn!(reason, "link closed"),
        LinkNotice::Error { message } => warn!(message, "link error"),
        LinkNotice::Synchronized => info!("state synchronized"),
    }
}

async fn next_line(input: &mut Option<InputLines>) -> Option<String> {
    match input {
        Some(lines) => match lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                None
            }
        },
        None => std::future::pending().await,
    }
}

/// Apply one `path=value` line as an external write.
fn apply_line(store: &MemoryStore, line: &str) {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return;
    }
    let Some((path, raw)) = line.split_once('=') else {
        warn!(line, "expected path=value");
        return;
    };
    let path = path.trim();

    let Some(entry) = store.get(path) else {
        warn!(path, "no such state");
        return;
    };
    if !entry.meta.writable {
        warn!(path, "state is read-only");
        return;
    }
    match parse_value(entry.meta.value_type, raw.trim()) {
        Some(value) => {
            store.request_write(path, value);
        }
        None => warn!(path, value = raw.trim(), expected = %entry.meta.value_type, "value does not fit"),
    }
}

/// Parse `raw` as a value of the declared type.
fn parse_value(value_type: ValueType, raw: &str) -> Option<StateValue> {
    match value_type {
        ValueType::Boolean => match raw {
            "true" | "1" | "on" => Some(StateValue::Bool(true)),
            "false" | "0" | "off" => Some(StateValue::Bool(false)),
            _ => None,
        },
        ValueType::Number => raw.parse().ok().map(StateValue::Number),
        ValueType::String | ValueType::Mixed => Some(StateValue::Text(raw.to_owned())),
    }
}
