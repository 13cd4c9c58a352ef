// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! Server-side watcher registry.
//!
//! A watcher is reified as an ordinary `notification` document; writing
//! one arms the watcher, removing it disarms. The registry holds weak
//! subscriber handles and erases an entry the moment its subscriber is
//! found expired.

use crate::partition::{CommitRecord, Partition};
use crate::query::{ResidualQuery, parse_query};
use crate::{Error, Result};
use parking_lot::Mutex;
use quilldb_core::{Document, property};
use quilldb_wire::{Notification, NotifyAction, NotifyBody};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Type name of the documents that reify watcher registrations.
pub const NOTIFICATION_TYPE: &str = "notification";

/// Receives the notifications a watcher produces.
pub trait Subscriber: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// A subscriber delivering over an unbounded channel.
pub struct ChannelSubscriber {
    sender: crossbeam_channel::Sender<Notification>,
}

impl ChannelSubscriber {
    pub fn new() -> (Arc<ChannelSubscriber>, crossbeam_channel::Receiver<Notification>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Arc::new(ChannelSubscriber { sender }), receiver)
    }
}

impl Subscriber for ChannelSubscriber {
    fn notify(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }
}

struct RegisteredWatcher {
    partition: String,
    actions: Vec<NotifyAction>,
    query: ResidualQuery,
    subscriber: Weak<dyn Subscriber>,
}

#[derive(Default)]
pub struct WatcherRegistry {
    watchers: Mutex<HashMap<String, RegisteredWatcher>>,
}

impl WatcherRegistry {
    pub fn new() -> WatcherRegistry {
        WatcherRegistry::default()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.watchers.lock().contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.watchers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.lock().is_empty()
    }

    /// Arms a watcher from its notification document. Re-registration
    /// with the same UUID replaces the entry, so reactivation after a
    /// reconnect is idempotent.
    ///
    /// A document carrying `initialStateNumber` asks for catch-up: the
    /// commits it missed (newer than that state, older than the
    /// registration commit at `registration_state`) are replayed to
    /// this watcher before any live delivery.
    pub fn arm(
        &self,
        document: &Document,
        partition: &Partition,
        registration_state: u64,
        subscriber: Weak<dyn Subscriber>,
    ) -> Result<()> {
        let uuid = document
            .get(property::UUID)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::InvalidRequest("notification requires _uuid".to_string()))?;
        let query_text = document
            .get("query")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::InvalidRequest("notification requires a query".to_string()))?;
        let parsed = parse_query(query_text, None)?;
        let query = ResidualQuery::from_terms(&parsed.terms);

        let actions = match document.get("actions") {
            None => vec![NotifyAction::Create, NotifyAction::Update, NotifyAction::Remove],
            Some(value) => {
                let names = value.as_array().ok_or_else(|| {
                    Error::InvalidRequest("notification actions must be an array".to_string())
                })?;
                let mut actions = Vec::with_capacity(names.len());
                for name in names {
                    match name.as_str() {
                        Some("create") => actions.push(NotifyAction::Create),
                        Some("update") => actions.push(NotifyAction::Update),
                        Some("remove") => actions.push(NotifyAction::Remove),
                        other => {
                            return Err(Error::InvalidRequest(format!(
                                "unknown notification action {other:?}"
                            )));
                        }
                    }
                }
                actions
            }
        };
        let partition_name = document
            .get("partition")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(partition.name())
            .to_string();

        debug!(uuid, partition = %partition_name, "arming watcher");
        let watcher =
            RegisteredWatcher { partition: partition_name, actions, query, subscriber };

        if let Some(seen) = document.get("initialStateNumber").and_then(serde_json::Value::as_u64)
            && watcher.partition == partition.name()
        {
            for record in partition.commit_records_since(seen) {
                if record.state_number < registration_state {
                    deliver(uuid, &watcher, partition, &record);
                }
            }
        }

        self.watchers.lock().insert(uuid.to_string(), watcher);
        Ok(())
    }

    pub fn disarm(&self, uuid: &str) -> bool {
        let removed = self.watchers.lock().remove(uuid).is_some();
        if removed {
            debug!(uuid, "disarmed watcher");
        }
        removed
    }

    /// Routes one commit record to every armed watcher of the
    /// partition. Changes are delivered in commit order per watcher;
    /// removes are matched against the before-image. Expired
    /// subscribers are erased on sight.
    pub fn dispatch(&self, partition: &Partition, record: &CommitRecord) {
        let mut expired = Vec::new();
        let mut watchers = self.watchers.lock();
        for (uuid, watcher) in watchers.iter() {
            if watcher.partition != partition.name() {
                continue;
            }
            if !deliver(uuid, watcher, partition, record) {
                expired.push(uuid.clone());
            }
        }
        for uuid in expired {
            warn!(uuid, "erasing watcher with expired subscriber");
            watchers.remove(&uuid);
        }
    }
}

/// Sends one commit record's matching changes to one watcher. Returns
/// false when the subscriber has expired.
fn deliver(
    uuid: &str,
    watcher: &RegisteredWatcher,
    partition: &Partition,
    record: &CommitRecord,
) -> bool {
    let Some(subscriber) = watcher.subscriber.upgrade() else {
        return false;
    };
    let table_txn = partition.table().txn();
    let mut cache = HashMap::new();
    for change in &record.changes {
        if !watcher.actions.contains(&change.action) {
            continue;
        }
        let matched = match change.action {
            NotifyAction::Remove => change.before.as_ref(),
            NotifyAction::Create | NotifyAction::Update => Some(&change.after),
        };
        let Some(object) = matched else { continue };
        if !watcher.query.matches(object, &mut cache, partition, &table_txn) {
            continue;
        }
        subscriber.notify(Notification {
            uuid: uuid.to_string(),
            notify: NotifyBody {
                action: change.action,
                object: change.after.clone().into_value(),
                state_number: Some(record.state_number),
            },
        });
    }
    true
}
