//! Log-based rendering of the replicated state.
//!
//! Stands in for the browser view: it reads the stores with `get` and
//! `query` like a render pass would, and follows the latest evaluation
//! per check to report state transitions as they happen.

use std::collections::BTreeMap;
use std::sync::Arc;

use lookout_sync::{KeyedStore, StoreEvent, SyncContext};
use lookout_types::{Check, CheckState, Evaluation, RecordKey};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Counts shown on the overview page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overview {
    /// Configured checks.
    pub checks: usize,
    /// Monitored hosts.
    pub hosts: usize,
    /// Cluster nodes.
    pub nodes: usize,
    /// Checks whose latest evaluation is down, sorted.
    pub down: Vec<String>,
}

/// Read the overview from the stores.
pub fn overview(context: &SyncContext) -> Overview {
    let mut down: Vec<String> = context
        .latest_evaluations
        .query(|evaluation| evaluation.state == CheckState::Down)
        .iter()
        .map(|evaluation| evaluation.check_id.clone())
        .collect();
    down.sort();
    Overview {
        checks: context.checks.len(),
        hosts: context.hosts.len(),
        nodes: context.nodes.len(),
        down,
    }
}

/// Log the overview.
pub fn log_overview(context: &SyncContext) {
    let overview = overview(context);
    let summary = context.summary.all().first().map(|s| s.checks);
    info!(
        checks = overview.checks,
        hosts = overview.hosts,
        nodes = overview.nodes,
        down = ?overview.down,
        summary_checks = ?summary,
        "overview"
    );
}

/// Whether moving from `previous` to `current` is worth reporting.
pub fn is_transition(previous: Option<CheckState>, current: CheckState) -> bool {
    previous.map_or(current != CheckState::Unknown, |previous| previous != current)
}

/// Log every state transition of the latest evaluation per check.
///
/// Runs until aborted.
pub async fn watch_evaluations(
    latest: Arc<KeyedStore<Evaluation>>,
    checks: Arc<KeyedStore<Check>>,
) {
    let mut events = latest.subscribe();
    let mut states: BTreeMap<RecordKey, CheckState> = latest
        .all()
        .iter()
        .map(|evaluation| (RecordKey::new(evaluation.check_id.as_str()), evaluation.state))
        .collect();

    loop {
        match events.recv().await {
            Ok(StoreEvent::Inserted { key, record, .. } | StoreEvent::Updated { key, record, .. }) => {
                let previous = states.insert(key.clone(), record.state);
                if is_transition(previous, record.state) {
                    let agent = checks.get(&key).map(|check| check.agent_id.clone());
                    info!(
                        check = %key,
                        agent = ?agent,
                        from = ?previous,
                        to = %record.state,
                        "check state changed"
                    );
                }
            }
            Ok(StoreEvent::Deleted { key, .. }) => {
                states.remove(&key);
                info!(check = %key, "check evaluation removed");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "view lagged, re-reading evaluations");
                states = latest
                    .all()
                    .iter()
                    .map(|evaluation| {
                        (RecordKey::new(evaluation.check_id.as_str()), evaluation.state)
                    })
                    .collect();
            }
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lookout_sync::SyncConfig;
    use lookout_sync::endpoint::parse_base;

    use super::*;

    fn evaluation(id: i64, check_id: &str, state: &str) -> Evaluation {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "check_id": check_id,
            "state": state,
        }))
        .unwrap()
    }

    #[test]
    fn transitions() {
        assert!(!is_transition(None, CheckState::Unknown));
        assert!(is_transition(None, CheckState::Down));
        assert!(!is_transition(Some(CheckState::Up), CheckState::Up));
        assert!(is_transition(Some(CheckState::Up), CheckState::Down));
    }

    #[test]
    fn overview_lists_down_checks() {
        let base = parse_base("http://localhost:9000/").unwrap();
        let context = SyncContext::new(SyncConfig::new(base));
        for record in [
            evaluation(1, "web", "up"),
            evaluation(2, "db", "down"),
            evaluation(3, "dns", "down"),
        ] {
            context.latest_evaluations.upsert(record).unwrap();
        }

        let overview = overview(&context);
        assert_eq!(overview.down, vec!["db".to_owned(), "dns".to_owned()]);
        assert_eq!(overview.checks, 0);
    }
}
