//! Notifications delivered to the presentation layer.

use std::time::Duration;

use crate::protocol::ServerEvent;
use crate::snapshot::Phase;

/// Events emitted by [`TriviaClient`](crate::TriviaClient) on its event channel.
///
/// The snapshot published through the `watch` channel is the source of truth;
/// these events exist so a UI can react to edges (a toast on a new fault,
/// a sound on a new question) without diffing snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum TriviaEvent {
    /// The transport connected (or reconnected).
    Connected,
    /// The transport dropped. Per-session state is kept.
    Disconnected { reason: Option<String> },
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// A server event was reconciled into the snapshot.
    Update(ServerEvent),
    /// A server event was rejected as stale or malformed.
    Discarded {
        event: &'static str,
        reason: &'static str,
    },
    /// The derived phase changed.
    PhaseChanged { from: Phase, to: Phase },
    /// A server fault was shown and its display window has now elapsed.
    FaultCleared,
}
