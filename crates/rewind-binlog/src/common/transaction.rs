//! Transaction start tracking
//!
//! A row event's header only records where the event itself ends. Output
//! lines for row statements show the span of the whole transaction instead,
//! starting at the transaction-opening marker. Which marker opens a
//! transaction depends on the source: a GTID event when global transaction
//! identifiers are enabled, an anonymous GTID event otherwise.

use crate::common::{DecodedEvent, EventPayload};

/// Event kind that opens a transaction on this source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMarkerKind {
    /// `GTID_EVENT` carrying a `uuid:gno` identity
    Gtid,
    /// `ANONYMOUS_GTID_EVENT`
    Anonymous,
}

impl TransactionMarkerKind {
    /// Select the marker kind from the source's GTID capability.
    pub fn from_gtid_mode(gtid_enabled: bool) -> Self {
        if gtid_enabled {
            TransactionMarkerKind::Gtid
        } else {
            TransactionMarkerKind::Anonymous
        }
    }

    fn opens(&self, payload: &EventPayload) -> bool {
        match (self, payload) {
            (TransactionMarkerKind::Gtid, EventPayload::TransactionIdentity { gtid }) => {
                gtid.is_some()
            }
            (TransactionMarkerKind::Anonymous, EventPayload::TransactionIdentity { gtid }) => {
                gtid.is_none()
            }
            _ => false,
        }
    }
}

/// Remembers where the current transaction started.
#[derive(Debug, Clone)]
pub struct TransactionPositionTracker {
    marker: TransactionMarkerKind,
    marker_start: Option<u64>,
}

impl TransactionPositionTracker {
    pub fn new(marker: TransactionMarkerKind) -> Self {
        Self {
            marker,
            marker_start: None,
        }
    }

    /// Update state from an event. Runs on every event, before filtering.
    pub fn observe(&mut self, event: &DecodedEvent) {
        if self.marker.opens(&event.payload) {
            self.marker_start = Some(event.start_position());
        } else if matches!(event.payload, EventPayload::TransactionCommit { .. }) {
            self.marker_start = None;
        }
    }

    /// Start offset to display for a row event.
    ///
    /// Falls back to the event's own start when no marker has been seen
    /// in the current transaction.
    pub fn row_start_position(&self, event: &DecodedEvent) -> u64 {
        self.marker_start.unwrap_or_else(|| event.start_position())
    }

    /// Forget the current marker (e.g. when switching files).
    pub fn reset(&mut self) {
        self.marker_start = None;
    }

    pub fn current_start(&self) -> Option<u64> {
        self.marker_start
    }
}
