// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use parking_lot::Mutex;
use quilldb_wire::{Action, ResponseResult};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// Not yet handed to a connection.
    Inactive,
    Queued,
    Sent,
    Receiving,
    Finished,
    Error,
    Canceled,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct RequestBody {
    pub action: Option<Action>,
    pub object: Option<Value>,
    pub objects: Option<Vec<Value>>,
    pub query: Option<String>,
    pub bindings: Option<Map<String, Value>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub state_number: Option<u64>,
    pub types: Option<Vec<String>>,
    pub partition: Option<String>,
}

#[derive(Debug)]
pub(crate) struct RequestState {
    pub status: RequestStatus,
    pub request_id: Option<u64>,
    pub result: Option<ResponseResult>,
    pub error: Option<(i32, String)>,
}

pub(crate) struct RequestShared {
    pub body: RequestBody,
    pub state: Mutex<RequestState>,
    /// Engine-internal requests (watcher setup and teardown) jump the
    /// queue and cannot be cancelled.
    pub internal: bool,
    /// Set on watcher setup requests so their disposition drives the
    /// watcher's status.
    pub watcher_uuid: Option<String>,
}

/// A request queued on a connection. Cheap to clone; all clones observe
/// the same lifecycle.
#[derive(Clone)]
pub struct Request {
    pub(crate) shared: Arc<RequestShared>,
}

impl Request {
    fn with_body(body: RequestBody) -> Request {
        Request {
            shared: Arc::new(RequestShared {
                body,
                state: Mutex::new(RequestState {
                    status: RequestStatus::Inactive,
                    request_id: None,
                    result: None,
                    error: None,
                }),
                internal: false,
                watcher_uuid: None,
            }),
        }
    }

    pub(crate) fn internal(body: RequestBody, watcher_uuid: Option<String>) -> Request {
        Request {
            shared: Arc::new(RequestShared {
                body,
                state: Mutex::new(RequestState {
                    status: RequestStatus::Inactive,
                    request_id: None,
                    result: None,
                    error: None,
                }),
                internal: true,
                watcher_uuid,
            }),
        }
    }

    pub fn create(object: Value) -> Request {
        Request::with_body(RequestBody {
            action: Some(Action::Create),
            object: Some(object),
            ..RequestBody::default()
        })
    }

    pub fn create_many(objects: Vec<Value>) -> Request {
        Request::with_body(RequestBody {
            action: Some(Action::Create),
            objects: Some(objects),
            ..RequestBody::default()
        })
    }

    pub fn update(object: Value) -> Request {
        Request::with_body(RequestBody {
            action: Some(Action::Update),
            object: Some(object),
            ..RequestBody::default()
        })
    }

    pub fn remove(object: Value) -> Request {
        Request::with_body(RequestBody {
            action: Some(Action::Remove),
            object: Some(object),
            ..RequestBody::default()
        })
    }

    pub fn find(query: impl Into<String>) -> Request {
        Request::with_body(RequestBody {
            action: Some(Action::Find),
            query: Some(query.into()),
            ..RequestBody::default()
        })
    }

    pub fn find_with(
        query: impl Into<String>,
        bindings: Option<Map<String, Value>>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Request {
        Request::with_body(RequestBody {
            action: Some(Action::Find),
            query: Some(query.into()),
            bindings,
            limit,
            offset,
            ..RequestBody::default()
        })
    }

    pub fn changes_since(state_number: u64, types: Option<Vec<String>>) -> Request {
        Request::with_body(RequestBody {
            action: Some(Action::ChangesSince),
            state_number: Some(state_number),
            types,
            ..RequestBody::default()
        })
    }

    /// Targets a partition other than the default. Only meaningful
    /// before the request is handed to a connection.
    pub fn with_partition(self, name: impl Into<String>) -> Request {
        let mut body = self.shared.body.clone();
        body.partition = Some(name.into());
        Request::with_body(body)
    }

    pub fn status(&self) -> RequestStatus {
        self.shared.state.lock().status
    }

    pub fn request_id(&self) -> Option<u64> {
        self.shared.state.lock().request_id
    }

    pub fn is_internal(&self) -> bool {
        self.shared.internal
    }

    /// The response rows, once the request is Finished.
    pub fn take_results(&self) -> Vec<Value> {
        self.shared
            .state
            .lock()
            .result
            .as_mut()
            .and_then(|result| result.data.take())
            .unwrap_or_default()
    }

    pub fn state_number(&self) -> Option<u64> {
        self.shared.state.lock().result.as_ref().and_then(|result| result.state_number)
    }

    pub fn count(&self) -> Option<u64> {
        self.shared.state.lock().result.as_ref().and_then(|result| result.count)
    }

    /// The `(code, message)` pair of a failed request.
    pub fn error(&self) -> Option<(i32, String)> {
        self.shared.state.lock().error.clone()
    }

    pub(crate) fn envelope(&self, request_id: u64) -> quilldb_wire::Request {
        let body = &self.shared.body;
        let mut envelope =
            quilldb_wire::Request::new(request_id, body.action.unwrap_or(Action::Find));
        envelope.object = body.object.clone();
        envelope.objects = body.objects.clone();
        envelope.query = body.query.clone();
        envelope.bindings = body.bindings.clone();
        envelope.limit = body.limit;
        envelope.offset = body.offset;
        envelope.state_number = body.state_number;
        envelope.types = body.types.clone();
        envelope.partition = body.partition.clone();
        envelope
    }
}
