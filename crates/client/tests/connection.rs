// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use quilldb_client::{
    ConnectionCore, ConnectionOptions, ConnectionStatus, Effect, Request, RequestStatus, Watcher,
    WatcherAction, WatcherStatus,
};
use serde_json::{Value, json};
use std::time::Duration;

mod common;

fn unconnected_core() -> ConnectionCore {
    common::init_tracing();
    ConnectionCore::new(ConnectionOptions::default())
}

fn connected_core() -> ConnectionCore {
    let mut core = unconnected_core();
    core.connect_requested();
    core.on_connected();
    core
}

fn sent_frames(effects: &[Effect]) -> Vec<Value> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Send(frame) => Some(frame.clone()),
            _ => None,
        })
        .collect()
}

fn response(request_id: u64) -> Value {
    json!({"requestId": request_id, "result": {"data": [], "stateNumber": 1, "count": 0}})
}

#[test]
fn test_send_assigns_monotonic_request_ids() {
    let mut core = unconnected_core();
    let first = Request::find("[?_type=\"t\"]");
    let second = Request::find("[?_type=\"t\"]");
    assert!(core.send(&first));
    assert!(core.send(&second));
    assert_eq!(first.request_id(), Some(1));
    assert_eq!(second.request_id(), Some(2));
    assert_eq!(first.status(), RequestStatus::Queued);
    assert_eq!(core.pending_requests(), 2);
}

#[test]
fn test_send_refuses_processed_requests() {
    let mut core = unconnected_core();
    let request = Request::find("[?_type=\"t\"]");
    assert!(core.send(&request));
    // already queued
    assert!(!core.send(&request));

    let mut core = connected_core();
    let request = Request::find("[?_type=\"t\"]");
    core.send(&request);
    core.handle_request_queue();
    assert_eq!(request.status(), RequestStatus::Sent);
    assert!(!core.send(&request));
}

#[test]
fn test_requests_wait_for_the_connection() {
    let mut core = unconnected_core();
    let request = Request::find("[?_type=\"t\"]");
    core.send(&request);
    assert!(sent_frames(&core.handle_request_queue()).is_empty());

    core.connect_requested();
    let frames = sent_frames(&core.on_connected());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["requestId"], json!(1));
    assert_eq!(frames[0]["action"], json!("find"));
}

#[test]
fn test_one_request_in_flight_at_a_time() {
    let mut core = connected_core();
    let first = Request::find("[?_type=\"a\"]");
    let second = Request::find("[?_type=\"b\"]");
    core.send(&first);
    let frames = sent_frames(&core.handle_request_queue());
    assert_eq!(frames.len(), 1);
    core.send(&second);
    // the line is busy; nothing is dispatched
    assert!(sent_frames(&core.handle_request_queue()).is_empty());
    assert_eq!(second.status(), RequestStatus::Queued);

    // the response frees the line and pumps the queue
    let effects = core.on_received(&response(first.request_id().unwrap()));
    assert_eq!(first.status(), RequestStatus::Finished);
    let frames = sent_frames(&effects);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["requestId"], second.request_id().unwrap());
}

#[test]
fn test_mismatched_response_is_discarded() {
    let mut core = connected_core();
    let request = Request::find("[?_type=\"t\"]");
    core.send(&request);
    core.handle_request_queue();

    let effects = core.on_received(&response(999));
    assert!(sent_frames(&effects).is_empty());
    assert_eq!(request.status(), RequestStatus::Sent);

    core.on_received(&response(request.request_id().unwrap()));
    assert_eq!(request.status(), RequestStatus::Finished);
}

#[test]
fn test_error_response_reaches_the_request() {
    let mut core = connected_core();
    let request = Request::find("[?_type=\"t\"]");
    core.send(&request);
    core.handle_request_queue();

    let envelope = json!({
        "requestId": request.request_id().unwrap(),
        "error": {"errorCode": 2, "errorMessage": "unknown action"},
    });
    core.on_received(&envelope);
    assert_eq!(request.status(), RequestStatus::Error);
    assert_eq!(request.error(), Some((2, "unknown action".to_string())));
}

#[test]
fn test_results_are_delivered() {
    let mut core = connected_core();
    let request = Request::find("[?_type=\"t\"]");
    core.send(&request);
    core.handle_request_queue();

    let envelope = json!({
        "requestId": request.request_id().unwrap(),
        "result": {"data": [{"v": 1}], "stateNumber": 4, "count": 1},
    });
    core.on_received(&envelope);
    assert_eq!(request.status(), RequestStatus::Finished);
    assert_eq!(request.take_results(), vec![json!({"v": 1})]);
    assert_eq!(request.state_number(), Some(4));
    assert_eq!(request.count(), Some(1));
}

#[test]
fn test_cancellation_rules() {
    let mut core = connected_core();
    let queued = Request::find("[?_type=\"a\"]");
    let sent = Request::find("[?_type=\"b\"]");
    core.send(&sent);
    core.handle_request_queue();
    core.send(&queued);

    // only queued requests can be cancelled
    assert!(core.cancel(&queued));
    assert_eq!(queued.status(), RequestStatus::Canceled);
    assert!(!core.cancel(&sent));
    assert_eq!(sent.status(), RequestStatus::Sent);

    // a request that never entered a connection cannot be cancelled
    let loose = Request::find("[?_type=\"c\"]");
    assert!(!core.cancel(&loose));
}

#[test]
fn test_dropped_request_handles_are_skipped() {
    let mut core = connected_core();
    let dropped = Request::find("[?_type=\"a\"]");
    let kept = Request::find("[?_type=\"b\"]");
    core.send(&dropped);
    core.send(&kept);
    drop(dropped);

    let frames = sent_frames(&core.handle_request_queue());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["requestId"], kept.request_id().unwrap());
}

#[test]
fn test_disconnect_requeues_the_in_flight_request() {
    let mut core = connected_core();
    let in_flight = Request::find("[?_type=\"a\"]");
    let queued = Request::find("[?_type=\"b\"]");
    core.send(&in_flight);
    core.handle_request_queue();
    core.send(&queued);

    let effects = core.on_disconnected();
    assert_eq!(in_flight.status(), RequestStatus::Error);
    assert_eq!(in_flight.error().unwrap().0, 1);
    assert!(effects.contains(&Effect::ScheduleReconnect(Duration::from_secs(5))));
    assert!(effects.contains(&Effect::Disconnected));
    assert_eq!(core.status(), ConnectionStatus::Connecting);

    // on reconnect the re-queued request goes out first, exactly once
    let frames = sent_frames(&core.on_connected());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["requestId"], in_flight.request_id().unwrap());
}

#[test]
fn test_disconnect_without_auto_reconnect() {
    common::init_tracing();
    let options = ConnectionOptions { auto_reconnect: false, ..Default::default() };
    let mut core = ConnectionCore::new(options);
    core.connect_requested();
    core.on_connected();

    let effects = core.on_disconnected();
    assert!(!effects.iter().any(|e| matches!(e, Effect::ScheduleReconnect(_))));
    assert_eq!(core.status(), ConnectionStatus::Unconnected);
}

#[test]
fn test_reconnect_timer_redials_while_connecting() {
    let mut core = connected_core();
    core.on_disconnected();
    assert_eq!(core.status(), ConnectionStatus::Connecting);
    assert_eq!(core.on_reconnect_timer(), vec![Effect::Dial]);

    let mut idle = unconnected_core();
    assert!(idle.on_reconnect_timer().is_empty());
}

#[test]
fn test_watcher_setup_is_internal_and_jumps_the_queue() {
    let mut core = connected_core();
    let user = Request::find("[?_type=\"t\"]");
    let in_flight = Request::find("[?_type=\"x\"]");
    core.send(&in_flight);
    core.handle_request_queue();
    core.send(&user);

    let (watcher, _events) = Watcher::new("[?_type=\"t\"]", vec![WatcherAction::Created]);
    core.add_watcher(&watcher);
    assert_eq!(watcher.status(), WatcherStatus::Activating);

    // the response to the in-flight request dispatches the watcher
    // registration before the earlier user request
    let effects = core.on_received(&response(in_flight.request_id().unwrap()));
    let frames = sent_frames(&effects);
    assert_eq!(frames.len(), 1);
    let object = &frames[0]["object"];
    assert_eq!(object["_type"], json!("notification"));
    assert_eq!(object["_uuid"], json!(watcher.uuid()));
    assert_eq!(object["query"], json!("[?_type=\"t\"]"));
    assert_eq!(object["actions"], json!(["create"]));

    // its completion activates the watcher and frees the line
    let registration_id = frames[0]["requestId"].as_u64().unwrap();
    let effects = core.on_received(&response(registration_id));
    assert_eq!(watcher.status(), WatcherStatus::Active);
    let frames = sent_frames(&effects);
    assert_eq!(frames[0]["requestId"], user.request_id().unwrap());
}

#[test]
fn test_notification_routing() {
    let mut core = connected_core();
    let (watcher, events) = Watcher::new("[?_type=\"t\"]", vec![WatcherAction::Created]);
    core.add_watcher(&watcher);

    let notification = json!({
        "_uuid": watcher.uuid(),
        "notify": {"action": "create", "object": {"_type": "t", "v": 1}, "stateNumber": 7},
    });
    core.on_received(&notification);
    let event = events.try_recv().unwrap();
    assert_eq!(event.action, WatcherAction::Created);
    assert_eq!(event.object["v"], json!(1));
    assert_eq!(event.state_number, Some(7));
    assert_eq!(watcher.last_state_number(), 7);

    // unknown UUIDs are ignored: the watcher may have been removed
    // concurrently
    let unknown = json!({
        "_uuid": "99999999-9999-4999-8999-999999999999",
        "notify": {"action": "create", "object": {}},
    });
    core.on_received(&unknown);
    assert!(events.try_recv().is_err());

    // an unrecognized action is a protocol violation and is dropped
    let bad = json!({
        "_uuid": watcher.uuid(),
        "notify": {"action": "mutate", "object": {}},
    });
    core.on_received(&bad);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_notifications_do_not_consume_the_in_flight_slot() {
    let mut core = connected_core();
    let (watcher, events) = Watcher::new("[?_type=\"t\"]", vec![WatcherAction::Created]);
    core.add_watcher(&watcher);
    let request = Request::find("[?_type=\"t\"]");
    core.send(&request);

    let notification = json!({
        "_uuid": watcher.uuid(),
        "notify": {"action": "create", "object": {"v": 1}},
    });
    let effects = core.on_received(&notification);
    assert!(sent_frames(&effects).is_empty());
    assert_eq!(events.try_recv().unwrap().object["v"], json!(1));
    // the registration request is still awaiting its response
    assert_eq!(request.status(), RequestStatus::Queued);
}

#[test]
fn test_reconnect_reactivates_watchers_before_user_requests() {
    let mut core = connected_core();
    let (watcher, _events) = Watcher::new("[?_type=\"t\"]", vec![WatcherAction::Created]);
    let frames = sent_frames(&core.add_watcher(&watcher));
    let registration_id = frames[0]["requestId"].as_u64().unwrap();
    core.on_received(&response(registration_id));
    assert_eq!(watcher.status(), WatcherStatus::Active);

    let user = Request::find("[?_type=\"t\"]");
    core.send(&user);

    core.on_disconnected();
    assert_eq!(watcher.status(), WatcherStatus::Activating);

    // re-registration goes out before the queued user request
    let frames = sent_frames(&core.on_connected());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["object"]["_uuid"], json!(watcher.uuid()));

    let replay_id = frames[0]["requestId"].as_u64().unwrap();
    let frames = sent_frames(&core.on_received(&response(replay_id)));
    assert_eq!(watcher.status(), WatcherStatus::Active);
    assert_eq!(frames[0]["requestId"], user.request_id().unwrap());
}

#[test]
fn test_dropped_watcher_is_erased_on_disconnect() {
    let mut core = connected_core();
    let (watcher, _events) = Watcher::new("[?_type=\"t\"]", vec![WatcherAction::Created]);
    let uuid = watcher.uuid().to_string();
    core.add_watcher(&watcher);
    drop(watcher);
    drop(_events);

    core.on_disconnected();
    let frames = sent_frames(&core.on_connected());
    // no re-registration for the dead watcher
    assert!(
        frames
            .iter()
            .all(|frame| frame["object"]["_uuid"] != json!(uuid.clone()))
    );
}

#[test]
fn test_remove_watcher_sends_teardown() {
    let mut core = connected_core();
    let (watcher, _events) = Watcher::new("[?_type=\"t\"]", vec![WatcherAction::Created]);
    let frames = sent_frames(&core.add_watcher(&watcher));
    core.on_received(&response(frames[0]["requestId"].as_u64().unwrap()));

    let effects = core.remove_watcher(&watcher);
    assert_eq!(watcher.status(), WatcherStatus::Inactive);
    let frames = sent_frames(&effects);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["action"], json!("remove"));
    assert_eq!(frames[0]["object"]["_uuid"], json!(watcher.uuid()));

    // notifications for the removed watcher are ignored
    let notification = json!({
        "_uuid": watcher.uuid(),
        "notify": {"action": "create", "object": {}},
    });
    core.on_received(&notification);
    assert!(_events.try_recv().is_err());
}

#[test]
fn test_internal_requests_cannot_be_cancelled() {
    let mut core = unconnected_core();
    let (watcher, _events) = Watcher::new("[?_type=\"t\"]", vec![WatcherAction::Created]);
    core.add_watcher(&watcher);
    // the registration request is internal; it is not reported as a
    // pending user request and cannot be reached for cancellation
    assert_eq!(core.pending_requests(), 0);
}
