// State management module
//
// This module provides the SyncStateManager which tracks the synchronization
// phase of every group behind Arc<RwLock<T>> and emits change events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Where a group is in its synchronization cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPhase {
    #[default]
    Idle,
    Planning,
    Applying,
    Failed,
    PartiallyFailed,
}

impl fmt::Display for GroupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupPhase::Idle => "idle",
            GroupPhase::Planning => "planning",
            GroupPhase::Applying => "applying",
            GroupPhase::Failed => "failed",
            GroupPhase::PartiallyFailed => "partially failed",
        };
        f.write_str(name)
    }
}

/// Observable engine state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineState {
    /// Current phase per group; groups never touched are absent (idle)
    pub phases: BTreeMap<String, GroupPhase>,

    /// Whether the last event saw synchronization enabled
    pub enabled: bool,

    /// Completion time of the most recent synchronization, any outcome
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl EngineState {
    pub fn phase(&self, group: &str) -> GroupPhase {
        self.phases.get(group).copied().unwrap_or_default()
    }
}

/// Change events emitted when state is modified
#[derive(Clone, Debug, PartialEq)]
pub enum SyncStateChange {
    PhaseChanged {
        group: String,
        from: GroupPhase,
        to: GroupPhase,
    },

    EnabledChanged {
        enabled: bool,
    },

    /// A synchronization finished (any outcome)
    SyncCompleted {
        at: DateTime<Utc>,
    },
}

/// Thread-safe engine state with event emission
///
/// - [`read()`](Self::read) for reading state without cloning
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to phase changes
pub struct SyncStateManager {
    state: Arc<RwLock<EngineState>>,
    state_tx: broadcast::Sender<SyncStateChange>,
}

impl SyncStateManager {
    /// Create a new manager with a broadcast buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(EngineState::default())),
            state_tx,
        }
    }

    /// Clone of the current state, safe to use without holding locks
    pub fn snapshot(&self) -> EngineState {
        self.state.read().unwrap().clone()
    }

    /// Execute a function with read access to the state
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&EngineState) -> R,
    {
        let state = self.state.read().unwrap();
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// Returns the events that were emitted.
    pub fn update<F>(&self, update_fn: F) -> Vec<SyncStateChange>
    where
        F: FnOnce(&mut EngineState),
    {
        let mut state = self.state.write().unwrap();
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = self.detect_changes(&old_state, &state);

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncStateChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(&self, old: &EngineState, new: &EngineState) -> Vec<SyncStateChange> {
        let mut changes = Vec::new();

        if old.enabled != new.enabled {
            changes.push(SyncStateChange::EnabledChanged {
                enabled: new.enabled,
            });
        }

        for (group, &to) in &new.phases {
            let from = old.phase(group);
            if from != to {
                changes.push(SyncStateChange::PhaseChanged {
                    group: group.clone(),
                    from,
                    to,
                });
            }
        }

        if old.last_sync_at != new.last_sync_at {
            if let Some(at) = new.last_sync_at {
                changes.push(SyncStateChange::SyncCompleted { at });
            }
        }

        changes
    }

    // Convenience methods used by the engine

    /// Move a group to `phase`
    pub fn set_phase(&self, group: &str, phase: GroupPhase) -> Vec<SyncStateChange> {
        self.update(|state| {
            state.phases.insert(group.to_string(), phase);
        })
    }

    /// Record the end of a synchronization: terminal phase, then back to idle.
    ///
    /// Failed and partially failed are observable as transitions before the
    /// group returns to idle.
    pub fn finish(&self, group: &str, terminal: GroupPhase) -> Vec<SyncStateChange> {
        let mut changes = Vec::new();
        if terminal != GroupPhase::Idle {
            changes.extend(self.set_phase(group, terminal));
        }
        changes.extend(self.update(|state| {
            state.phases.insert(group.to_string(), GroupPhase::Idle);
            state.last_sync_at = Some(Utc::now());
        }));
        changes
    }

    pub fn set_enabled(&self, enabled: bool) -> Vec<SyncStateChange> {
        self.update(|state| state.enabled = enabled)
    }

    pub fn phase(&self, group: &str) -> GroupPhase {
        self.read(|state| state.phase(group))
    }
}

impl Default for SyncStateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Cloneable for sharing across tasks
impl Clone for SyncStateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_manager() {
        let manager = SyncStateManager::new();
        let state = manager.snapshot();

        assert!(state.phases.is_empty());
        assert_eq!(state.phase("XS"), GroupPhase::Idle);
        assert!(state.last_sync_at.is_none());
    }

    #[test]
    fn test_set_phase_emits_transition() {
        let manager = SyncStateManager::new();

        let changes = manager.set_phase("XS", GroupPhase::Planning);

        assert_eq!(
            changes,
            vec![SyncStateChange::PhaseChanged {
                group: "XS".to_string(),
                from: GroupPhase::Idle,
                to: GroupPhase::Planning,
            }]
        );
        assert_eq!(manager.phase("XS"), GroupPhase::Planning);
    }

    #[test]
    fn test_same_phase_emits_nothing() {
        let manager = SyncStateManager::new();
        manager.set_phase("S", GroupPhase::Applying);

        assert!(manager.set_phase("S", GroupPhase::Applying).is_empty());
    }

    #[test]
    fn test_finish_passes_through_terminal_phase() {
        let manager = SyncStateManager::new();
        manager.set_phase("M", GroupPhase::Applying);

        let changes = manager.finish("M", GroupPhase::PartiallyFailed);

        assert!(matches!(
            changes[0],
            SyncStateChange::PhaseChanged { to: GroupPhase::PartiallyFailed, .. }
        ));
        assert!(matches!(
            changes[1],
            SyncStateChange::PhaseChanged {
                from: GroupPhase::PartiallyFailed,
                to: GroupPhase::Idle,
                ..
            }
        ));
        assert!(matches!(changes[2], SyncStateChange::SyncCompleted { .. }));
        assert_eq!(manager.phase("M"), GroupPhase::Idle);
    }

    #[test]
    fn test_enabled_change() {
        let manager = SyncStateManager::new();
        let changes = manager.set_enabled(true);
        assert_eq!(changes, vec![SyncStateChange::EnabledChanged { enabled: true }]);
        assert!(manager.set_enabled(true).is_empty());
    }

    #[test]
    fn test_subscribe_to_changes() {
        let manager = SyncStateManager::new();
        let mut rx = manager.subscribe();

        manager.set_phase("L", GroupPhase::Planning);

        let event = rx.try_recv();
        assert!(matches!(
            event.unwrap(),
            SyncStateChange::PhaseChanged { to: GroupPhase::Planning, .. }
        ));
    }

    #[test]
    fn test_clone_shares_state() {
        let manager1 = SyncStateManager::new();
        let manager2 = manager1.clone();

        manager1.set_phase("XS", GroupPhase::Applying);

        assert_eq!(manager2.phase("XS"), GroupPhase::Applying);
    }
}
