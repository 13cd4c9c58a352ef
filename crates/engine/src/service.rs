// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! Request dispatch: the engine-side half of the connection coupling.

use crate::partition::{Partition, PartitionOptions, WriteAction};
use crate::watcher::{NOTIFICATION_TYPE, Subscriber, WatcherRegistry};
use crate::{Error, Result};
use parking_lot::RwLock;
use quilldb_core::{Document, property};
use quilldb_store::StoreOptions;
use quilldb_wire::{Action, Request, Response, ResponseResult};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct ServiceOptions {
    /// Partition directories live under this directory; `None` keeps
    /// every partition in memory.
    pub base_dir: Option<PathBuf>,
    pub default_partition: String,
    pub store: StoreOptions,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        ServiceOptions {
            base_dir: None,
            default_partition: "default".to_string(),
            store: StoreOptions::default(),
        }
    }
}

struct ServiceInner {
    options: ServiceOptions,
    partitions: RwLock<HashMap<String, Partition>>,
    watchers: WatcherRegistry,
}

/// Dispatches wire requests against named partitions and couples
/// notification-document writes to the watcher registry.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    pub fn new(options: ServiceOptions) -> Service {
        Service {
            inner: Arc::new(ServiceInner {
                options,
                partitions: RwLock::new(HashMap::new()),
                watchers: WatcherRegistry::new(),
            }),
        }
    }

    /// An in-memory service with the default partition name.
    pub fn memory() -> Service {
        Service::new(ServiceOptions::default())
    }

    pub fn watchers(&self) -> &WatcherRegistry {
        &self.inner.watchers
    }

    /// Looks up (opening or creating on first use) a partition; `None`
    /// selects the default partition.
    pub fn partition(&self, name: Option<&str>) -> Result<Partition> {
        let name = name.unwrap_or(&self.inner.options.default_partition);
        if let Some(partition) = self.inner.partitions.read().get(name) {
            return Ok(partition.clone());
        }
        let mut partitions = self.inner.partitions.write();
        if let Some(partition) = partitions.get(name) {
            return Ok(partition.clone());
        }
        let partition = match &self.inner.options.base_dir {
            Some(base_dir) => Partition::open(
                base_dir.join(name),
                name,
                PartitionOptions { store: self.inner.options.store },
            )?,
            None => Partition::memory(name),
        };
        partitions.insert(name.to_string(), partition.clone());
        Ok(partition)
    }

    /// Handles one request envelope. The subscriber handle, when given,
    /// receives the notifications of watchers this connection arms.
    pub fn handle_request(
        &self,
        request: &Request,
        subscriber: Option<&Arc<dyn Subscriber>>,
    ) -> Response {
        match self.dispatch(request, subscriber) {
            Ok(result) => Response::result(request.request_id, result),
            Err(error) => Response::error(request.request_id, error.code(), error.message()),
        }
    }

    fn dispatch(
        &self,
        request: &Request,
        subscriber: Option<&Arc<dyn Subscriber>>,
    ) -> Result<ResponseResult> {
        let partition = self.partition(request.partition.as_deref())?;
        match request.action {
            Action::Create | Action::Update | Action::Remove => {
                self.write(&partition, request, subscriber)
            }
            Action::Find => {
                let query = request
                    .query
                    .as_ref()
                    .ok_or_else(|| Error::InvalidRequest("find requires a query".to_string()))?;
                let result = partition.find(
                    query,
                    request.bindings.as_ref(),
                    request.limit,
                    request.offset,
                )?;
                Ok(ResponseResult {
                    data: Some(result.data),
                    state_number: Some(result.state_number),
                    count: Some(result.count),
                })
            }
            Action::ChangesSince => {
                let state_number = request.state_number.ok_or_else(|| {
                    Error::InvalidRequest("changesSince requires a state number".to_string())
                })?;
                let result = partition.changes_since(state_number, request.types.as_deref())?;
                Ok(ResponseResult {
                    count: Some(result.changes.len() as u64),
                    data: Some(result.changes),
                    state_number: Some(result.current_state_number),
                })
            }
        }
    }

    fn write(
        &self,
        partition: &Partition,
        request: &Request,
        subscriber: Option<&Arc<dyn Subscriber>>,
    ) -> Result<ResponseResult> {
        let action = match request.action {
            Action::Create => WriteAction::Create,
            Action::Update => WriteAction::Update,
            Action::Remove => WriteAction::Remove,
            _ => unreachable!("write called for a write action"),
        };
        let objects: Vec<Value> = match (&request.object, &request.objects) {
            (Some(object), _) => vec![object.clone()],
            (None, Some(objects)) => objects.clone(),
            (None, None) => {
                return Err(Error::InvalidRequest("write without an object".to_string()));
            }
        };
        let mut ops = Vec::with_capacity(objects.len());
        for value in objects {
            let document = Document::from_value(value).ok_or_else(|| {
                Error::InvalidRequest("write body must be a JSON object".to_string())
            })?;
            // Watcher re-registration after a reconnect replays the same
            // notification document; accept it as an update so the
            // replay is idempotent by UUID.
            let op_action = if action == WriteAction::Create
                && document.type_name() == Some(NOTIFICATION_TYPE)
                && let Some(identity) = document.uuid()
                && partition
                    .table()
                    .get(&partition.table().txn(), &identity)?
                    .is_some_and(|existing| !existing.is_deleted())
            {
                WriteAction::Update
            } else {
                action
            };
            ops.push((op_action, document));
        }

        let (results, record) = partition.apply(ops)?;

        // Writes of notification documents arm or disarm watchers for
        // the requesting connection.
        for written in &results {
            if written.type_name() != Some(NOTIFICATION_TYPE) {
                continue;
            }
            if written.is_deleted() {
                if let Some(uuid) = written.get(property::UUID).and_then(Value::as_str) {
                    self.inner.watchers.disarm(uuid);
                }
                continue;
            }
            match subscriber {
                Some(subscriber) => self.inner.watchers.arm(
                    written,
                    partition,
                    record.state_number,
                    Arc::downgrade(subscriber),
                )?,
                None => warn!("notification document written without a subscriber handle"),
            }
        }

        self.inner.watchers.dispatch(partition, &record);

        let data = results
            .iter()
            .map(|document| {
                json!({
                    "_uuid": document.get(property::UUID).cloned().unwrap_or(Value::Null),
                    "_version": document.get(property::VERSION).cloned().unwrap_or(Value::Null),
                })
            })
            .collect::<Vec<_>>();
        Ok(ResponseResult {
            count: Some(data.len() as u64),
            data: Some(data),
            state_number: Some(record.state_number),
        })
    }
}
