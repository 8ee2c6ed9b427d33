//! `moonlink snapshot`: one full sync, printed as a table.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use moonlink_core::{Bridge, BridgeConfig, LinkNotice, MemoryStore, StateEntry, StateStore};

use crate::cli::{GlobalOpts, SnapshotArgs};
use crate::error::CliError;
use crate::output::{self, StateRow};

pub async fn handle(config: BridgeConfig, args: SnapshotArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let limit = config.timeout;
    let store = Arc::new(MemoryStore::new());
    let bridge = Bridge::new(config, Arc::clone(&store) as Arc<dyn StateStore>)?;

    let mut notices = bridge.notices();
    bridge.start().await?;

    let synced = tokio::time::timeout(limit, until_synchronized(&mut notices)).await;
    bridge.shutdown().await?;

    match synced {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(CliError::Timeout {
                seconds: limit.as_secs(),
            });
        }
    }

    let entries: Vec<StateEntry> = store
        .snapshot()
        .into_iter()
        .filter(|e| output::under_prefix(&e.path, args.filter.as_deref()))
        .collect();
    debug!(states = entries.len(), "snapshot collected");

    let out = output::render_list(&global.output, &entries, |e| StateRow::from(e), output::state_line)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Wait for the first `Synchronized` notice.
async fn until_synchronized(notices: &mut broadcast::Receiver<LinkNotice>) -> Result<(), CliError> {
    loop {
        match notices.recv().await {
            Ok(LinkNotice::Synchronized) => return Ok(()),
            Ok(LinkNotice::Error { message }) => warn!(message, "link error, still trying"),
            Ok(LinkNotice::Closed { reason }) => debug!(reason, "link closed, still trying"),
            Ok(LinkNotice::Opened) => debug!("link open"),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "notices lagged"),
            Err(RecvError::Closed) => {
                return Err(CliError::Session {
                    reason: "the bridge stopped before the first sync".into(),
                });
            }
        }
    }
}
