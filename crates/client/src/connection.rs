// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! Transport-free connection state machine.
//!
//! The core keeps the pending-request FIFO (one request in flight at a
//! time), the watcher map and the reconnect policy. Every entry point
//! returns the `Effect`s the surrounding driver must execute; the core
//! itself never touches a socket or a timer.

use crate::request::{Request, RequestShared, RequestStatus};
use crate::watcher::{Watcher, WatcherAction, WatcherEvent, WatcherShared, WatcherStatus};
use quilldb_core::Error;
use quilldb_wire::Action;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unconnected,
    Connecting,
    Connected,
}

/// Side effects for the driver: the core decides, the driver acts.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Open the socket.
    Dial,
    /// Write one framed document.
    Send(Value),
    /// Single-shot timer; on expiry call `on_reconnect_timer`.
    ScheduleReconnect(Duration),
    StatusChanged(ConnectionStatus),
    /// The connection was dropped (after requeue and watcher reset).
    Disconnected,
}

#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    pub socket_path: PathBuf,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            socket_path: PathBuf::from("/tmp/quilldb.socket"),
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(5),
        }
    }
}

pub struct ConnectionCore {
    options: ConnectionOptions,
    status: ConnectionStatus,
    explicit_disconnect: bool,
    last_request_id: u64,
    pending: VecDeque<Weak<RequestShared>>,
    current: Option<Arc<RequestShared>>,
    watchers: HashMap<String, Weak<WatcherShared>>,
    // Engine-internal requests have no user handle; the core pins them
    // until they finish so the weak queue entries stay live.
    internal_holds: Vec<Request>,
}

impl ConnectionCore {
    pub fn new(options: ConnectionOptions) -> ConnectionCore {
        ConnectionCore {
            options,
            status: ConnectionStatus::Unconnected,
            explicit_disconnect: false,
            last_request_id: 0,
            pending: VecDeque::new(),
            current: None,
            watchers: HashMap::new(),
            internal_holds: Vec::new(),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Queued user requests, for introspection. Internal requests and
    /// expired entries are not reported.
    pub fn pending_requests(&self) -> usize {
        self.pending
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|request| !request.internal)
            .count()
    }

    /// Begins connecting. No-op unless currently unconnected.
    pub fn connect_requested(&mut self) -> Vec<Effect> {
        if self.status != ConnectionStatus::Unconnected {
            return Vec::new();
        }
        self.explicit_disconnect = false;
        self.status = ConnectionStatus::Connecting;
        vec![Effect::StatusChanged(self.status), Effect::Dial]
    }

    /// Tears the connection down for good; auto-reconnect is suppressed
    /// until the next `connect_requested`.
    pub fn disconnect_requested(&mut self) -> Vec<Effect> {
        self.explicit_disconnect = true;
        Vec::new()
    }

    pub fn explicitly_disconnected(&self) -> bool {
        self.explicit_disconnect
    }

    /// Appends a request to the queue and dispatches it when the line
    /// is idle. Requests already handed to a connection are refused.
    pub fn send(&mut self, request: &Request) -> bool {
        let accepted = {
            let mut state = request.shared.state.lock();
            match state.status {
                RequestStatus::Inactive | RequestStatus::Canceled => {
                    state.status = RequestStatus::Queued;
                    self.last_request_id += 1;
                    state.request_id = Some(self.last_request_id);
                    true
                }
                _ => false,
            }
        };
        if !accepted {
            warn!("cannot send request that is already being processed");
            return false;
        }
        if request.shared.internal {
            // internal requests go ahead of user requests but keep
            // their order among themselves
            let insert_at = self
                .pending
                .iter()
                .take_while(|entry| {
                    entry.upgrade().is_some_and(|request| request.internal)
                })
                .count();
            self.pending.insert(insert_at, Arc::downgrade(&request.shared));
        } else {
            self.pending.push_back(Arc::downgrade(&request.shared));
        }
        true
    }

    /// Pumps the queue: dispatches the next live request when connected
    /// and nothing is in flight.
    pub fn handle_request_queue(&mut self) -> Vec<Effect> {
        if self.current.is_some() || self.status != ConnectionStatus::Connected {
            return Vec::new();
        }
        while let Some(entry) = self.pending.pop_front() {
            let Some(request) = entry.upgrade() else { continue };
            let request_id = {
                let mut state = request.state.lock();
                if state.status == RequestStatus::Canceled {
                    continue;
                }
                state.status = RequestStatus::Sent;
                state.request_id.expect("queued request has an id")
            };
            let envelope = Request { shared: Arc::clone(&request) }.envelope(request_id);
            let frame = serde_json::to_value(&envelope).expect("envelope serializes");
            self.current = Some(request);
            return vec![Effect::Send(frame)];
        }
        Vec::new()
    }

    /// Cancels a queued request. Requests that were already sent (or
    /// are engine-internal) cannot be cancelled locally.
    pub fn cancel(&mut self, request: &Request) -> bool {
        if request.shared.internal {
            warn!("cannot cancel an engine-internal request");
            return false;
        }
        let mut state = request.shared.state.lock();
        match state.status {
            RequestStatus::Queued => {
                let before = self.pending.len();
                self.pending.retain(|entry| {
                    entry.upgrade().is_none_or(|queued| !Arc::ptr_eq(&queued, &request.shared))
                });
                if self.pending.len() == before {
                    warn!("cannot cancel a request that does not belong to this connection");
                    return false;
                }
                state.status = RequestStatus::Canceled;
                true
            }
            RequestStatus::Sent | RequestStatus::Receiving => {
                warn!("cannot cancel a request that was already sent");
                false
            }
            _ => {
                warn!("cannot cancel a request that was not added to a connection");
                false
            }
        }
    }

    /// Registers a watcher and queues its engine-internal registration
    /// request.
    pub fn add_watcher(&mut self, watcher: &Watcher) -> Vec<Effect> {
        if watcher.status() != WatcherStatus::Inactive {
            warn!("cannot add a watcher that is already active");
            return Vec::new();
        }
        self.init_watcher(&watcher.shared);
        self.handle_request_queue()
    }

    /// Unregisters a watcher and queues its teardown request.
    pub fn remove_watcher(&mut self, watcher: &Watcher) -> Vec<Effect> {
        if self.watchers.remove(&watcher.shared.uuid).is_none() {
            warn!("cannot remove a watcher that was not added");
            return Vec::new();
        }
        watcher.shared.state.lock().status = WatcherStatus::Inactive;
        let teardown = Request::internal(
            crate::request::RequestBody {
                action: Some(Action::Remove),
                object: Some(json!({ "_uuid": watcher.shared.uuid })),
                partition: watcher.shared.partition.clone(),
                ..Default::default()
            },
            None,
        );
        self.send(&teardown);
        // the teardown response is not interesting, but the request must
        // outlive its place in the queue
        self.keep_alive(teardown);
        self.handle_request_queue()
    }

    pub fn on_connected(&mut self) -> Vec<Effect> {
        debug_assert_eq!(self.status, ConnectionStatus::Connecting);
        self.status = ConnectionStatus::Connected;
        let mut effects = vec![Effect::StatusChanged(self.status)];
        self.reactivate_all_watchers();
        effects.extend(self.handle_request_queue());
        effects
    }

    pub fn on_disconnected(&mut self) -> Vec<Effect> {
        if let Some(current) = self.current.take() {
            {
                let mut state = current.state.lock();
                state.status = RequestStatus::Error;
                state.error =
                    Some((Error::DatabaseConnection(String::new()).code(), String::new()));
            }
            // user requests are re-queued at the head; an in-flight
            // watcher request is dropped, reactivation on reconnect
            // replaces it
            if !current.internal {
                self.pending.push_front(Arc::downgrade(&current));
            }
        }
        self.watchers.retain(|uuid, entry| match entry.upgrade() {
            Some(watcher) => {
                watcher.state.lock().status = WatcherStatus::Activating;
                true
            }
            None => {
                debug!(uuid, "erasing expired watcher");
                false
            }
        });

        let mut effects = Vec::new();
        if self.status == ConnectionStatus::Unconnected {
            effects.push(Effect::Disconnected);
            return effects;
        }
        let new_status = if self.options.auto_reconnect && !self.explicit_disconnect {
            effects.push(Effect::ScheduleReconnect(self.options.reconnect_interval));
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Unconnected
        };
        if self.status != new_status {
            self.status = new_status;
            effects.push(Effect::StatusChanged(new_status));
        }
        effects.push(Effect::Disconnected);
        effects
    }

    /// The coarse single-shot reconnect timer expired.
    pub fn on_reconnect_timer(&mut self) -> Vec<Effect> {
        match self.status {
            ConnectionStatus::Connecting => vec![Effect::Dial],
            _ => Vec::new(),
        }
    }

    /// Routes one received document: notifications by watcher UUID,
    /// responses by request id.
    pub fn on_received(&mut self, document: &Value) -> Vec<Effect> {
        if document.get("notify").is_some() {
            self.route_notification(document);
            return Vec::new();
        }

        let Some(current) = self.current.clone() else {
            return self.handle_request_queue();
        };
        let request_id = document.get("requestId").and_then(Value::as_u64);
        if request_id != current.state.lock().request_id {
            // a response for some other request; discard it
            return Vec::new();
        }
        self.current = None;

        match document.get("result") {
            Some(result) if result.is_object() => {
                let parsed = serde_json::from_value(result.clone()).unwrap_or_default();
                let mut state = current.state.lock();
                state.result = Some(parsed);
                state.status = RequestStatus::Finished;
            }
            _ => {
                let error = document.get("error").cloned().unwrap_or(Value::Null);
                let code =
                    error.get("errorCode").and_then(Value::as_i64).unwrap_or_default() as i32;
                let message = error
                    .get("errorMessage")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut state = current.state.lock();
                state.error = Some((code, message));
                state.status = RequestStatus::Error;
            }
        }
        self.finish_watcher_request(&current);
        self.handle_request_queue()
    }

    fn route_notification(&mut self, document: &Value) {
        let Some(uuid) = document.get("_uuid").and_then(Value::as_str) else {
            warn!("notification without a _uuid");
            return;
        };
        let notify = &document["notify"];
        let action = match notify.get("action").and_then(Value::as_str) {
            Some("create") => WatcherAction::Created,
            Some("update") => WatcherAction::Updated,
            Some("remove") => WatcherAction::Removed,
            other => {
                warn!(?other, "notification with an unrecognized action");
                return;
            }
        };
        let resolved = self.watchers.get(uuid).map(Weak::upgrade);
        match resolved {
            Some(Some(watcher)) => {
                let state_number = notify.get("stateNumber").and_then(Value::as_u64);
                {
                    let mut state = watcher.state.lock();
                    state.status = WatcherStatus::Active;
                    if let Some(state_number) = state_number {
                        state.last_state_number = state.last_state_number.max(state_number);
                    }
                }
                let event = WatcherEvent {
                    action,
                    object: notify.get("object").cloned().unwrap_or(Value::Null),
                    state_number,
                };
                let _ = watcher.events.send(event);
            }
            Some(None) => {
                warn!(uuid, "received notification for an already dropped watcher");
                self.watchers.remove(uuid);
            }
            // the watcher may have been removed concurrently
            None => {}
        }
    }

    fn finish_watcher_request(&mut self, request: &Arc<RequestShared>) {
        let Some(uuid) = &request.watcher_uuid else { return };
        let Some(watcher) = self.watchers.get(uuid).and_then(Weak::upgrade) else { return };
        let (status, registered_state) = {
            let state = request.state.lock();
            (state.status, state.result.as_ref().and_then(|result| result.state_number))
        };
        let mut state = watcher.state.lock();
        match status {
            RequestStatus::Finished => {
                if state.status == WatcherStatus::Activating {
                    state.status = WatcherStatus::Active;
                }
                // the registration commit marks the point live delivery
                // starts from
                if let Some(registered_state) = registered_state {
                    state.last_state_number = state.last_state_number.max(registered_state);
                }
            }
            _ => state.status = WatcherStatus::Inactive,
        }
    }

    fn reactivate_all_watchers(&mut self) {
        let entries: Vec<(String, Weak<WatcherShared>)> =
            self.watchers.iter().map(|(uuid, entry)| (uuid.clone(), entry.clone())).collect();
        for (uuid, entry) in entries {
            match entry.upgrade() {
                Some(watcher) => {
                    self.init_watcher(&watcher);
                }
                None => {
                    debug!(uuid, "erasing expired watcher");
                    self.watchers.remove(&uuid);
                }
            }
        }
    }

    /// Builds and queues the engine-internal request that reifies the
    /// watcher as a notification document. Registration is idempotent
    /// by UUID.
    fn init_watcher(&mut self, watcher: &Arc<WatcherShared>) {
        watcher.state.lock().status = WatcherStatus::Activating;
        let mut object = Map::new();
        object.insert("_type".to_string(), Value::from("notification"));
        object.insert("query".to_string(), Value::from(watcher.query.clone()));
        let actions: Vec<Value> = watcher
            .actions
            .iter()
            .map(|action| match action {
                WatcherAction::Created => Value::from("create"),
                WatcherAction::Updated => Value::from("update"),
                WatcherAction::Removed => Value::from("remove"),
            })
            .collect();
        object.insert("actions".to_string(), Value::from(actions));
        if let Some(partition) = &watcher.partition {
            object.insert("partition".to_string(), Value::from(partition.clone()));
        }
        // on re-registration, ask the engine to replay the commits this
        // watcher missed
        let last_state_number = watcher.state.lock().last_state_number;
        if last_state_number > 0 {
            object.insert("initialStateNumber".to_string(), Value::from(last_state_number));
        }
        object.insert("_uuid".to_string(), Value::from(watcher.uuid.clone()));

        self.watchers.insert(watcher.uuid.clone(), Arc::downgrade(watcher));

        let setup = Request::internal(
            crate::request::RequestBody {
                action: Some(Action::Create),
                object: Some(Value::Object(object)),
                partition: watcher.partition.clone(),
                ..Default::default()
            },
            Some(watcher.uuid.clone()),
        );
        self.send(&setup);
        self.keep_alive(setup);
    }

    // The queue holds weak references; internal requests have no user
    // handle, so the core pins them until they reach a terminal state.
    fn keep_alive(&mut self, request: Request) {
        self.internal_holds.retain(|held| {
            !matches!(
                held.shared.state.lock().status,
                RequestStatus::Finished | RequestStatus::Error | RequestStatus::Canceled
            )
        });
        self.internal_holds.push(request);
    }
}
