use tracing::info;

use crate::{
    dto::admin::{FlushReport, ReloadReport},
    error::ServiceError,
    state::SharedState,
};

/// Reload the configuration shards and reconcile live components.
pub async fn reload(state: &SharedState) -> Result<ReloadReport, ServiceError> {
    Ok(state.reloader().reload().await?)
}

/// Write every queued file now.
pub async fn flush(state: &SharedState) -> FlushReport {
    let report = state.cache().force_flush().await;
    info!(
        written = report.written,
        failed = report.failed,
        "manual flush requested"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing;

    #[tokio::test]
    async fn reload_of_untouched_shards_changes_nothing() {
        let (state, _events) = testing::state().await;
        let report = reload(&state).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(report.server_count, 1);
    }

    #[tokio::test]
    async fn flush_drains_the_queue() {
        let (state, _events) = testing::state().await;
        let players = state.config().current().players.clone();
        state.config().store_players(players).await.unwrap();
        assert_eq!(state.cache().pending().await, 1);

        let report = flush(&state).await;
        assert_eq!(report.written, 1);
        assert_eq!(report.pending, 0);
    }
}
