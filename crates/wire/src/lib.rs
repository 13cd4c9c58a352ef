// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! Envelope types for the length-framed JSON protocol. Each framed
//! document is one request, one response or one notification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Create,
    Update,
    Remove,
    Find,
    ChangesSince,
}

/// One request document. Fields irrelevant to the action stay absent on
/// the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_id: u64,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bindings: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    /// Target partition; absent implies the default partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

impl Request {
    pub fn new(request_id: u64, action: Action) -> Self {
        Request {
            request_id,
            action,
            object: None,
            objects: None,
            query: None,
            bindings: None,
            limit: None,
            offset: None,
            state_number: None,
            types: None,
            partition: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    pub error_code: i32,
    pub error_message: String,
}

/// One response document: exactly one of `result` and `error` is present.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub request_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResponseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn result(request_id: u64, result: ResponseResult) -> Self {
        Response { request_id, result: Some(result), error: None }
    }

    pub fn error(request_id: u64, error_code: i32, error_message: impl Into<String>) -> Self {
        Response {
            request_id,
            result: None,
            error: Some(ResponseError { error_code, error_message: error_message.into() }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotifyAction {
    Create,
    Update,
    Remove,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyBody {
    pub action: NotifyAction,
    pub object: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_number: Option<u64>,
}

/// One notification document, routed to a watcher by its UUID.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_uuid")]
    pub uuid: String,
    pub notify: NotifyBody,
}

/// An incoming framed document, classified by shape: a `notify` member
/// marks a notification, anything else is treated as a response.
#[derive(Clone, Debug)]
pub enum Message {
    Response(Response),
    Notification(Notification),
}

impl Message {
    pub fn parse(document: &Value) -> Option<Message> {
        let object = document.as_object()?;
        if object.contains_key("notify") {
            serde_json::from_value(document.clone()).ok().map(Message::Notification)
        } else {
            serde_json::from_value(document.clone()).ok().map(Message::Response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let mut request = Request::new(7, Action::Find);
        request.query = Some("[?_type=\"person\"]".into());
        request.limit = Some(10);
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({
                "requestId": 7,
                "action": "find",
                "query": "[?_type=\"person\"]",
                "limit": 10,
            })
        );
    }

    #[test]
    fn test_changes_since_action_name() {
        let request = Request::new(1, Action::ChangesSince);
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["action"], json!("changesSince"));
    }

    #[test]
    fn test_message_classification() {
        let response = json!({"requestId": 3, "result": {"count": 1}});
        assert!(matches!(Message::parse(&response), Some(Message::Response(_))));

        let notification = json!({
            "_uuid": "0e4bdb7c-9a3f-4a9c-9c22-8a8d4e2a1b00",
            "notify": {"action": "create", "object": {"_type": "t"}}
        });
        match Message::parse(&notification) {
            Some(Message::Notification(n)) => {
                assert_eq!(n.notify.action, NotifyAction::Create);
            }
            other => panic!("expected notification, got {other:?}"),
        }

        assert!(Message::parse(&json!("not an object")).is_none());
    }

    #[test]
    fn test_error_response_shape() {
        let response = Response::error(9, 2, "unknown action");
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(
            encoded,
            json!({
                "requestId": 9,
                "error": {"errorCode": 2, "errorMessage": "unknown action"},
            })
        );
    }
}
