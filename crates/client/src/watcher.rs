// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use parking_lot::Mutex;
use quilldb_wire::NotifyAction;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatcherAction {
    Created,
    Updated,
    Removed,
}

impl From<NotifyAction> for WatcherAction {
    fn from(action: NotifyAction) -> Self {
        match action {
            NotifyAction::Create => WatcherAction::Created,
            NotifyAction::Update => WatcherAction::Updated,
            NotifyAction::Remove => WatcherAction::Removed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatcherStatus {
    Inactive,
    /// Registration (or re-registration after a reconnect) is on its
    /// way to the engine.
    Activating,
    Active,
}

#[derive(Clone, Debug)]
pub struct WatcherEvent {
    pub action: WatcherAction,
    pub object: Value,
    pub state_number: Option<u64>,
}

pub(crate) struct WatcherState {
    pub status: WatcherStatus,
    pub last_state_number: u64,
}

pub(crate) struct WatcherShared {
    pub uuid: String,
    pub query: String,
    pub actions: Vec<WatcherAction>,
    pub partition: Option<String>,
    pub state: Mutex<WatcherState>,
    pub events: crossbeam_channel::Sender<WatcherEvent>,
}

/// A live-notification subscription identified by a client-chosen UUID.
///
/// The connection holds only a weak reference; dropping every `Watcher`
/// handle lets the connection erase the registration on sight.
#[derive(Clone)]
pub struct Watcher {
    pub(crate) shared: Arc<WatcherShared>,
}

impl Watcher {
    /// Creates a watcher and the receiving end of its event stream.
    pub fn new(
        query: impl Into<String>,
        actions: Vec<WatcherAction>,
    ) -> (Watcher, crossbeam_channel::Receiver<WatcherEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let watcher = Watcher {
            shared: Arc::new(WatcherShared {
                uuid: Uuid::new_v4().as_hyphenated().to_string(),
                query: query.into(),
                actions,
                partition: None,
                state: Mutex::new(WatcherState {
                    status: WatcherStatus::Inactive,
                    last_state_number: 0,
                }),
                events: sender,
            }),
        };
        (watcher, receiver)
    }

    pub fn with_partition(self, name: impl Into<String>) -> Watcher {
        let shared = &self.shared;
        Watcher {
            shared: Arc::new(WatcherShared {
                uuid: shared.uuid.clone(),
                query: shared.query.clone(),
                actions: shared.actions.clone(),
                partition: Some(name.into()),
                state: Mutex::new(WatcherState {
                    status: WatcherStatus::Inactive,
                    last_state_number: 0,
                }),
                events: shared.events.clone(),
            }),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.shared.uuid
    }

    pub fn query(&self) -> &str {
        &self.shared.query
    }

    pub fn actions(&self) -> &[WatcherAction] {
        &self.shared.actions
    }

    pub fn status(&self) -> WatcherStatus {
        self.shared.state.lock().status
    }

    /// State number of the newest commit this watcher has seen.
    pub fn last_state_number(&self) -> u64 {
        self.shared.state.lock().last_state_number
    }
}
