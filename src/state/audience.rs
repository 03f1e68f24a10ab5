use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dto::ws::{AudienceEvent, ServerFrame};

/// Result of pushing one frame to the audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Members the frame was queued for.
    pub delivered: usize,
    /// Members whose writer was already gone.
    pub failed: usize,
}

/// Registry of authenticated connections sharing the broadcast group.
///
/// Publishing and admission both run under the `last_event` lock so a
/// connection admitted concurrently with a broadcast gets that event exactly
/// once: either through the fan-out or as its catch-up frame.
#[derive(Debug, Default)]
pub struct Audience {
    members: DashMap<Uuid, mpsc::UnboundedSender<ServerFrame>>,
    last_event: Mutex<Option<(AudienceEvent, String)>>,
    live_connections: AtomicUsize,
}

impl Audience {
    /// Empty audience.
    pub fn new() -> Self {
        Self::default()
    }

    fn last_event_lock(&self) -> MutexGuard<'_, Option<(AudienceEvent, String)>> {
        self.last_event
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the broadcast group and receive the most recent event, if any.
    ///
    /// Returns `false` when the connection's writer is already gone.
    pub fn admit(&self, id: Uuid, tx: mpsc::UnboundedSender<ServerFrame>) -> bool {
        let last = self.last_event_lock();
        if let Some((_, payload)) = last.as_ref() {
            if tx.send(ServerFrame::Text(payload.clone())).is_err() {
                return false;
            }
        }
        self.members.insert(id, tx);
        true
    }

    /// Leave the broadcast group. Safe to call for connections never admitted.
    pub fn remove(&self, id: &Uuid) {
        self.members.remove(id);
    }

    /// Push a serialized event to every member and remember it for late joiners.
    pub fn publish(&self, event: &AudienceEvent, payload: String) -> Delivery {
        let mut last = self.last_event_lock();
        let mut delivery = Delivery {
            delivered: 0,
            failed: 0,
        };
        for member in self.members.iter() {
            if member.value().send(ServerFrame::Text(payload.clone())).is_ok() {
                delivery.delivered += 1;
            } else {
                delivery.failed += 1;
            }
        }
        *last = Some((event.clone(), payload));
        delivery
    }

    /// Most recently published event.
    pub fn last_event(&self) -> Option<AudienceEvent> {
        self.last_event_lock()
            .as_ref()
            .map(|(event, _)| event.clone())
    }

    /// Number of admitted members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Count a freshly opened connection, returning the new total.
    pub fn connection_opened(&self) -> usize {
        self.live_connections.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Count a closed connection, returning the new total.
    pub fn connection_closed(&self) -> usize {
        let previous = self
            .live_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Open connections, authenticated or not.
    pub fn live_connections(&self) -> usize {
        self.live_connections.load(Ordering::Acquire)
    }
}
