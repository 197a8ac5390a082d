//! In-memory runtime state owned by the state manager (§4.6).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::family::Family;
use crate::reading::Reading;

/// Maximum number of transitions retained per device's history.
pub const MAX_TRANSITION_HISTORY: usize = 20;

/// Connection lifecycle state for a single device, as tracked by the pool
/// and mirrored into [`DeviceRuntimeState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

/// A single recorded state transition with a monotonic timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub error: Option<String>,
}

/// Per-mac runtime record the state manager owns, serialized by a
/// per-device async mutex at the call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRuntimeState {
    pub family: Family,
    pub connection_state: ConnectionState,
    pub polling_active: bool,
    pub last_error: Option<String>,
    pub latest_reading: Option<Reading>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_reading_time: Option<OffsetDateTime>,
    pub latest_status: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_status_update: Option<OffsetDateTime>,
    pub vehicle_id: Option<String>,
    history: VecDeque<StateTransition>,
}

impl DeviceRuntimeState {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            connection_state: ConnectionState::Disconnected,
            polling_active: false,
            last_error: None,
            latest_reading: None,
            last_reading_time: None,
            latest_status: None,
            last_status_update: None,
            vehicle_id: None,
            history: VecDeque::with_capacity(MAX_TRANSITION_HISTORY),
        }
    }

    /// Record a connection-state transition, evicting the oldest entry once
    /// the bounded history is full.
    pub fn record_transition(&mut self, to: ConnectionState, error: Option<String>, at: OffsetDateTime) {
        if self.history.len() == MAX_TRANSITION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition {
            from: self.connection_state,
            to,
            at,
            error: error.clone(),
        });
        self.connection_state = to;
        if error.is_some() {
            self.last_error = error;
        }
    }

    /// Read-only view of the bounded transition history, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    pub fn update_reading(&mut self, reading: Reading, at: OffsetDateTime) {
        self.latest_reading = Some(reading);
        self.last_reading_time = Some(at);
    }

    pub fn update_status(&mut self, status: impl Into<String>, at: OffsetDateTime) {
        self.latest_status = Some(status.into());
        self.last_status_update = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + n).unwrap()
    }

    #[test]
    fn new_state_starts_disconnected_and_inactive() {
        let state = DeviceRuntimeState::new(Family::Bm6);
        assert_eq!(state.connection_state, ConnectionState::Disconnected);
        assert!(!state.polling_active);
        assert!(state.history().is_empty());
    }

    #[test]
    fn record_transition_updates_current_state() {
        let mut state = DeviceRuntimeState::new(Family::Bm6);
        state.record_transition(ConnectionState::Connecting, None, t(0));
        assert_eq!(state.connection_state, ConnectionState::Connecting);
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.history()[0].from, ConnectionState::Disconnected);
    }

    #[test]
    fn record_transition_sets_last_error_on_error_transition() {
        let mut state = DeviceRuntimeState::new(Family::Bm6);
        state.record_transition(ConnectionState::Error, Some("timeout".into()), t(0));
        assert_eq!(state.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn history_is_bounded_and_evicts_oldest() {
        let mut state = DeviceRuntimeState::new(Family::Bm6);
        for i in 0..(MAX_TRANSITION_HISTORY + 5) {
            state.record_transition(ConnectionState::Connected, None, t(i as i64));
        }
        assert_eq!(state.history().len(), MAX_TRANSITION_HISTORY);
    }

    #[test]
    fn update_reading_sets_latest_and_timestamp() {
        let mut state = DeviceRuntimeState::new(Family::Bm2);
        let reading = Reading::builder(3.7, 0.0).build();
        state.update_reading(reading.clone(), t(0));
        assert_eq!(state.latest_reading, Some(reading));
        assert_eq!(state.last_reading_time, Some(t(0)));
    }
}
