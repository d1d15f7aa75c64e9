//! Background escalation sweep: periodically auto-approves steps whose
//! waiting period elapsed.

use std::sync::Arc;

use chrono::Utc;
use countersign_core::config::EscalationConfig;
use countersign_core::orchestrator::Orchestrator;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Starts the recurring sweep, or returns `None` when escalation is
/// disabled by configuration.
pub fn spawn(orchestrator: Arc<Orchestrator>, config: &EscalationConfig) -> Option<JoinHandle<()>> {
    if !config.enabled {
        info!(event_name = "system.sweeper.disabled", "escalation sweep disabled");
        return None;
    }

    let interval = config.sweep_interval();
    info!(
        event_name = "system.sweeper.start",
        interval_secs = interval.as_secs(),
        "escalation sweep started"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a freshly started
        // server does not sweep before serving.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match orchestrator.run_escalation_sweep(Utc::now()).await {
                Ok(outcome) => {
                    info!(
                        event_name = "system.sweeper.pass_completed",
                        examined = outcome.examined,
                        auto_approved = outcome.auto_approved,
                        conflicts = outcome.conflicts,
                        "escalation sweep pass completed"
                    );
                }
                Err(err) => {
                    // Storage faults are operational; the next pass retries.
                    error!(
                        event_name = "system.sweeper.pass_failed",
                        error = %err,
                        "escalation sweep pass failed"
                    );
                }
            }
        }
    }))
}
