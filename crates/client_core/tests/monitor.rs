mod support;

use std::{sync::Arc, time::Duration};

use client_core::{
    CardBoard, ConnectionState, Monitor, MonitorConfig, RequestError, SequentialIds,
};
use serde_json::{json, Value};
use shared::{domain::CardId, protocol::FieldValue, tables::StaticTables};

use support::{eventually, monitor_config, FakeServer};

fn start(config: MonitorConfig) -> (Monitor, Arc<CardBoard>) {
    let board = Arc::new(CardBoard::new());
    let monitor = Monitor::start_with_ids(
        config,
        &StaticTables::defaults(),
        board.clone(),
        Arc::new(SequentialIds::starting_at(1)),
    );
    (monitor, board)
}

fn card(id: &str) -> CardId {
    CardId::from(id)
}

#[tokio::test]
async fn broadcast_events_reach_their_cards() {
    let server = FakeServer::bind().await;
    let (monitor, board) = start(monitor_config(server.endpoint()));
    let mut peer = server.accept().await;

    peer.send(r#"{"Event":"Version","PHDVersion":"2.6.13","MsgVersion":1}"#)
        .await;
    peer.send(r#"{"Event":"GuideStep","Frame":7,"Time":12.5,"SNR":21.3}"#)
        .await;

    eventually("guide step on the guiding card", || {
        board.value(&card("guiding"), "SNR") == FieldValue::Number(21.3)
    })
    .await;
    assert_eq!(board.value(&card("guiding"), "Frame"), FieldValue::Number(7.0));
    assert_eq!(board.value(&card("guiding"), "HFD"), FieldValue::Absent);
    let version = monitor.version().expect("greeting retained");
    assert_eq!(
        version.payload.field("PHDVersion"),
        FieldValue::Text("2.6.13".into())
    );
    assert_eq!(monitor.stats().events_routed, 2);

    monitor.shutdown().await;
}

#[tokio::test]
async fn garbage_on_the_wire_is_discarded_without_dropping_the_session() {
    let server = FakeServer::bind().await;
    let (monitor, board) = start(monitor_config(server.endpoint()));
    let mut peer = server.accept().await;

    peer.send("{this is not json").await;
    peer.send(r#"{"no_event_here":1}"#).await;
    peer.send(r#"{"Event":"StarLost","Frame":42,"SNR":3.1}"#).await;

    eventually("star lost routed", || {
        board.value(&card("starLost"), "Frame") == FieldValue::Number(42.0)
    })
    .await;
    assert_eq!(board.value(&card("starLost"), "HFD"), FieldValue::Absent);
    assert!(monitor.wait_for_stats(|s| s.parse_failures == 2).await);
    assert_eq!(monitor.connection().state(), ConnectionState::Connected);

    monitor.shutdown().await;
}

#[tokio::test]
async fn non_utf8_record_counts_as_a_parse_failure() {
    let server = FakeServer::bind().await;
    let (monitor, board) = start(monitor_config(server.endpoint()));
    let mut peer = server.accept().await;

    peer.send_bytes(b"{\"Event\":\"StarLost\",\"Frame\":\xc3\x28}\r\n")
        .await;
    peer.send(r#"{"Event":"StarLost","Frame":43}"#).await;

    eventually("star lost routed", || {
        board.value(&card("starLost"), "Frame") == FieldValue::Number(43.0)
    })
    .await;
    assert!(monitor.wait_for_stats(|s| s.parse_failures == 1).await);
    assert_eq!(monitor.stats().events_routed, 1);
    assert_eq!(monitor.connection().state(), ConnectionState::Connected);

    monitor.shutdown().await;
}

#[tokio::test]
async fn out_of_order_replies_resolve_their_own_requests() {
    let server = FakeServer::bind().await;
    let (monitor, _board) = start(monitor_config(server.endpoint()));
    let mut peer = server.accept().await;
    assert!(
        monitor
            .connection()
            .wait_for_state(ConnectionState::Connected)
            .await
    );

    let server_side = async {
        let first = peer.recv_request().await;
        let second = peer.recv_request().await;
        for request in [&second, &first] {
            let reply = json!({
                "jsonrpc": "2.0",
                "result": request["method"],
                "id": request["id"],
            });
            peer.send(&reply.to_string()).await;
        }
        (first, second)
    };

    let (app_state, exposure, (first, second)) = tokio::join!(
        monitor.call("get_app_state", None),
        monitor.call("get_exposure", None),
        server_side,
    );

    assert_eq!(app_state, Ok(json!("get_app_state")));
    assert_eq!(exposure, Ok(json!("get_exposure")));
    let mut ids = vec![first["id"].clone(), second["id"].clone()];
    ids.sort_by_key(|id| id.as_u64());
    assert_eq!(ids, [json!(1), json!(2)]);
    assert_eq!(monitor.stats().correlation_misses, 0);

    monitor.shutdown().await;
}

#[tokio::test]
async fn pending_requests_fail_when_the_connection_drops() {
    let server = FakeServer::bind().await;
    let (monitor, _board) = start(monitor_config(server.endpoint()));
    let mut peer = server.accept().await;
    assert!(
        monitor
            .connection()
            .wait_for_state(ConnectionState::Connected)
            .await
    );

    let server_side = async move {
        peer.recv_request().await;
        peer.recv_request().await;
        drop(peer);
    };
    let (first, second, ()) = tokio::join!(
        monitor.call("get_exposure", None),
        monitor.call("get_pixel_scale", None),
        server_side,
    );

    assert!(matches!(first, Err(RequestError::ConnectionLost { .. })));
    assert!(matches!(second, Err(RequestError::ConnectionLost { .. })));

    monitor.shutdown().await;
}

#[tokio::test]
async fn call_without_session_is_rejected() {
    let endpoint = FakeServer::bind().await.endpoint();
    let board = Arc::new(CardBoard::new());
    let monitor = Monitor::start(monitor_config(endpoint), &StaticTables::defaults(), board);

    let err = monitor
        .call("get_app_state", None)
        .await
        .expect_err("nothing to talk to");
    assert_eq!(err, RequestError::NotConnected);

    monitor.shutdown().await;
}

#[tokio::test]
async fn poller_feeds_cooler_and_status_cards() {
    let server = FakeServer::bind().await;
    let mut config = monitor_config(server.endpoint());
    config.poll_interval = Duration::from_millis(50);
    config.poll_methods = vec!["get_cooler_status".into()];
    let (monitor, board) = start(config);
    let mut peer = server.accept().await;

    let request = peer.recv_request().await;
    assert_eq!(request["method"], "get_cooler_status");
    assert!(request.get("params").is_none());
    let reply = json!({
        "jsonrpc": "2.0",
        "result": {"coolerOn": true, "temperature": -10, "setpoint": -10, "power": 80},
        "id": request["id"],
    });
    peer.send(&reply.to_string()).await;

    eventually("cooler card updated", || {
        board.value(&card("cooler"), "coolerOn") == FieldValue::Bool(true)
    })
    .await;
    eventually("status card updated", || {
        board.value(&card("status"), "power") == FieldValue::Number(80.0)
    })
    .await;
    assert_eq!(
        board.value(&card("status"), "temperature"),
        FieldValue::Number(-10.0)
    );

    monitor.shutdown().await;
}

#[tokio::test]
async fn rejected_poll_surfaces_on_the_errors_card() {
    let server = FakeServer::bind().await;
    let mut config = monitor_config(server.endpoint());
    config.poll_interval = Duration::from_millis(50);
    config.poll_methods = vec!["get_cooler_status".into()];
    let (monitor, board) = start(config);
    let mut peer = server.accept().await;

    let request = peer.recv_request().await;
    let reply = json!({
        "jsonrpc": "2.0",
        "error": {"code": 1, "message": "camera not connected"},
        "id": request["id"],
    });
    peer.send(&reply.to_string()).await;

    eventually("errors card updated", || {
        board.value(&card("errors"), "message") == FieldValue::Text("camera not connected".into())
    })
    .await;

    monitor.shutdown().await;
}

#[tokio::test]
async fn session_greeting_is_cleared_when_the_session_closes() {
    let server = FakeServer::bind().await;
    let (monitor, _board) = start(monitor_config(server.endpoint()));
    let mut peer = server.accept().await;

    peer.send(r#"{"Event":"Version","PHDVersion":"2.6.13"}"#).await;
    eventually("greeting retained", || monitor.version().is_some()).await;

    drop(peer);
    eventually("greeting cleared", || monitor.version().is_none()).await;

    let _reconnected = server.accept().await;
    monitor.shutdown().await;
}

#[tokio::test]
async fn reload_swaps_tables_and_resets_cards() {
    let server = FakeServer::bind().await;
    let (monitor, board) = start(monitor_config(server.endpoint()));
    let mut peer = server.accept().await;

    peer.send(r#"{"Event":"StarLost","Frame":42}"#).await;
    eventually("star lost routed", || {
        board.value(&card("starLost"), "Frame") == FieldValue::Number(42.0)
    })
    .await;

    let tables = StaticTables::from_toml_str(
        r#"
[[events]]
event = "StarLost"
label = "Star Lost"

[[cards]]
header = "Lost"
id = "starLost"

[[cards.fields]]
event = "StarLost"
field = "Status"
label = "Status"
"#,
    )
    .expect("tables parse");
    let issues = monitor.reload(&tables);
    assert!(issues.is_empty());

    eventually("card reset", || board.card(&card("starLost")).is_empty()).await;

    peer.send(r#"{"Event":"StarLost","Frame":43,"Status":"lost"}"#).await;
    eventually("reloaded binding used", || {
        board.value(&card("starLost"), "Status") == FieldValue::Text("lost".into())
    })
    .await;
    assert_eq!(board.value(&card("starLost"), "Frame"), FieldValue::Absent);

    monitor.shutdown().await;
}

#[tokio::test]
async fn reply_results_keep_their_json_shape() {
    let server = FakeServer::bind().await;
    let (monitor, _board) = start(monitor_config(server.endpoint()));
    let mut peer = server.accept().await;
    assert!(
        monitor
            .connection()
            .wait_for_state(ConnectionState::Connected)
            .await
    );

    let server_side = async {
        let request = peer.recv_request().await;
        assert_eq!(request["params"], json!([true]));
        let reply = json!({"jsonrpc": "2.0", "result": 0, "id": request["id"]});
        peer.send(&reply.to_string()).await;
    };
    let (result, ()) = tokio::join!(
        monitor.call("set_paused", Some(Value::Bool(true))),
        server_side,
    );

    assert_eq!(result, Ok(json!(0)));
    monitor.shutdown().await;
}
