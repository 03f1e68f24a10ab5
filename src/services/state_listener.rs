use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    dao::models::GameState,
    services::{broadcast_service, event_mapper, retry::jittered_backoff},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Drops snapshots that do not advance the store revision.
///
/// Resubscribing replays the current snapshot, and some backends deliver a
/// revision more than once; neither must reach the audience twice.
#[derive(Debug, Default)]
pub struct RevisionTracker {
    /// `None` until the first snapshot; `Some(None)` after an absent one.
    last: Option<Option<u64>>,
}

impl RevisionTracker {
    /// Whether `snapshot` is new, remembering it when it is.
    pub fn observe(&mut self, snapshot: Option<&GameState>) -> bool {
        let revision = snapshot.map(|state| state.last_update);
        let fresh = match (self.last, revision) {
            (None, _) => true,
            (Some(None), None) => false,
            (Some(Some(previous)), Some(current)) => current > previous,
            (Some(_), _) => true,
        };
        if fresh {
            self.last = Some(revision);
        }
        fresh
    }
}

/// Spawn the listener on the runtime.
pub fn spawn(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(run(state))
}

/// Follow the live state forever, broadcasting one event per new revision.
///
/// The health flag follows the subscription: healthy on every delivered
/// snapshot, degraded as soon as it errors or ends. Resubscription backs off
/// from one to ten seconds with jitter.
pub async fn run(state: SharedState) {
    let mut tracker = RevisionTracker::default();
    let mut delay = INITIAL_DELAY;

    loop {
        let mut revisions = state.store().watch_state();
        let mut failure = None;

        while let Some(item) = revisions.next().await {
            match item {
                Ok(snapshot) => {
                    let received_at = Instant::now();
                    if state.health().set(true) {
                        info!("state subscription healthy; accepting new connections");
                    }
                    delay = INITIAL_DELAY;
                    if tracker.observe(snapshot.as_ref()) {
                        deliver(&state, snapshot.as_ref(), received_at);
                    } else {
                        debug!("skipping snapshot that does not advance lastUpdate");
                    }
                }
                Err(err) => {
                    failure = Some(err.to_string());
                    break;
                }
            }
        }

        let reason = failure.unwrap_or_else(|| "subscription ended".into());
        if state.health().set(false) {
            warn!(error = %reason, "state subscription lost; refusing new connections");
        } else {
            warn!(error = %reason, "state subscription attempt failed");
        }

        let pause = jittered_backoff(&mut rand::rng(), delay);
        sleep(pause).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

fn deliver(state: &SharedState, snapshot: Option<&GameState>, received_at: Instant) {
    let event = match event_mapper::map_snapshot(snapshot) {
        Ok(event) => event,
        Err(err) => {
            error!(error = %err, "dropping snapshot that violates the state schema");
            return;
        }
    };

    if let Err(err) = broadcast_service::broadcast(state, &event, received_at) {
        debug!(error = %err, "continuing after broadcast failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_machine::GamePhase;

    fn at(last_update: u64) -> GameState {
        let mut state = GameState::initial(GamePhase::ReadyForNext);
        state.last_update = last_update;
        state
    }

    #[test]
    fn tracker_drops_non_advancing_revisions() {
        let mut tracker = RevisionTracker::default();
        assert!(tracker.observe(Some(&at(10))));
        assert!(!tracker.observe(Some(&at(10))));
        assert!(!tracker.observe(Some(&at(9))));
        assert!(tracker.observe(Some(&at(11))));
    }

    #[test]
    fn tracker_reports_absence_once() {
        let mut tracker = RevisionTracker::default();
        assert!(tracker.observe(None));
        assert!(!tracker.observe(None));
        assert!(tracker.observe(Some(&at(1))));
        assert!(tracker.observe(None));
    }
}
