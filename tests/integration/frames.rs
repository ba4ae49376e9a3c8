use envelope_gateway::error::ErrorCode;
use envelope_gateway::models::{AppendOutcome, EnvelopeOut};
use envelope_gateway::wire::{self, ClientFrame};

#[test]
fn test_parse_send_frame() {
    let text = r#"{
        "v": 1, "t": "conv.send", "id": "req-1", "ts": 1700000000000,
        "body": { "conv_id": "c1", "msg_id": "m1", "env": "QUFB" }
    }"#;
    let inbound = wire::parse_client_frame(text).unwrap();
    assert_eq!(inbound.id, "req-1");
    match inbound.frame {
        ClientFrame::Send(body) => {
            assert_eq!(body.conv_id, "c1");
            assert_eq!(body.msg_id, "m1");
            assert_eq!(body.env, "QUFB");
            assert!(body.origin_gateway.is_none());
        }
        other => panic!("expected conv.send, got {other:?}"),
    }
}

#[test]
fn test_parse_subscribe_defaults() {
    let text = r#"{"v": 1, "t": "conv.subscribe", "id": "s", "ts": 0,
                   "body": {"conv_id": "c1"}}"#;
    let inbound = wire::parse_client_frame(text).unwrap();
    match inbound.frame {
        ClientFrame::Subscribe(body) => {
            assert_eq!(body.conv_id, "c1");
            assert_eq!(body.from_seq, None);
        }
        other => panic!("expected conv.subscribe, got {other:?}"),
    }
}

#[test]
fn test_unknown_fields_are_ignored() {
    let text = r#"{"v": 1, "t": "conv.ack", "id": "a", "ts": 0,
                   "body": {"conv_id": "c1", "seq": 7, "future_field": true}}"#;
    let inbound = wire::parse_client_frame(text).unwrap();
    match inbound.frame {
        ClientFrame::Ack(body) => assert_eq!(body.seq, 7),
        other => panic!("expected conv.ack, got {other:?}"),
    }
}

#[test]
fn test_parse_unsubscribe() {
    let text = r#"{"v": 1, "t": "conv.unsubscribe", "id": "u", "ts": 0,
                   "body": {"conv_id": "c1"}}"#;
    let inbound = wire::parse_client_frame(text).unwrap();
    match inbound.frame {
        ClientFrame::Unsubscribe(body) => assert_eq!(body.conv_id, "c1"),
        other => panic!("expected conv.unsubscribe, got {other:?}"),
    }
}

#[test]
fn test_unknown_frame_type_rejected() {
    let text = r#"{"v": 1, "t": "conv.explode", "id": "x", "ts": 0, "body": {}}"#;
    let err = wire::parse_client_frame(text).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidFrame);
}

#[test]
fn test_wrong_version_rejected() {
    let text = r#"{"v": 2, "t": "pong", "id": "x", "ts": 0, "body": {}}"#;
    let err = wire::parse_client_frame(text).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidFrame);

    let text = r#"{"t": "pong", "id": "x", "ts": 0, "body": {}}"#;
    assert!(wire::parse_client_frame(text).is_err());
}

#[test]
fn test_uppercase_body_keys_rejected() {
    let text = r#"{"v": 1, "t": "conv.send", "id": "x", "ts": 0,
                   "body": {"convId": "c1", "msg_id": "m1", "env": ""}}"#;
    let err = wire::parse_client_frame(text).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidFrame);
    assert!(err.message.contains("snake_case"));
}

#[test]
fn test_missing_required_body_field() {
    let text = r#"{"v": 1, "t": "conv.send", "id": "x", "ts": 0,
                   "body": {"conv_id": "c1"}}"#;
    let err = wire::parse_client_frame(text).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidFrame);
}

#[test]
fn test_non_object_body_rejected() {
    let text = r#"{"v": 1, "t": "pong", "id": "x", "ts": 0, "body": []}"#;
    assert!(wire::parse_client_frame(text).is_err());
    assert!(wire::parse_client_frame("not json at all").is_err());
}

#[test]
fn test_pong_needs_no_body() {
    let text = r#"{"v": 1, "t": "pong", "id": "x", "ts": 0}"#;
    let inbound = wire::parse_client_frame(text).unwrap();
    assert!(matches!(inbound.frame, ClientFrame::Pong));
}

#[test]
fn test_oversize_correlation_id_rejected() {
    let id = "x".repeat(129);
    let text = format!(r#"{{"v": 1, "t": "pong", "id": "{id}", "ts": 0, "body": {{}}}}"#);
    assert!(wire::parse_client_frame(&text).is_err());
}

#[test]
fn test_server_frame_envelope_shape() {
    let frame = wire::server_frame("ping", Some("corr-7"), serde_json::json!({}));
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["v"], 1);
    assert_eq!(value["t"], "ping");
    assert_eq!(value["id"], "corr-7");
    assert!(value["ts"].as_i64().unwrap() > 0);
    assert!(value["body"].is_object());
}

#[test]
fn test_event_frame_carries_envelope() {
    let row = EnvelopeOut {
        conv_id: "c1".to_string(),
        seq: 3,
        msg_id: "m3".to_string(),
        env: "QUFB".to_string(),
        ts: 1700000000000,
        origin_gateway: None,
        conv_home: None,
    };
    let frame = wire::event_frame(&row);
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["t"], "conv.event");
    assert_eq!(value["body"]["conv_id"], "c1");
    assert_eq!(value["body"]["seq"], 3);
    assert_eq!(value["body"]["env"], "QUFB");
    // Absent federation metadata stays off the wire.
    assert!(value["body"].get("origin_gateway").is_none());
}

#[test]
fn test_send_receipt_reports_duplicate() {
    let outcome = AppendOutcome {
        conv_id: "c1".to_string(),
        seq: 9,
        ts_ms: 1700000000000,
        duplicate: true,
    };
    let frame = wire::send_receipt_frame("corr-1", &outcome, "m9");
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["t"], "conv.acked");
    assert_eq!(value["id"], "corr-1");
    assert_eq!(value["body"]["seq"], 9);
    assert_eq!(value["body"]["msg_id"], "m9");
    assert_eq!(value["body"]["duplicate"], true);
}

#[test]
fn test_error_frame_carries_structured_details() {
    let err = envelope_gateway::replay::window_exceeded(
        1,
        envelope_gateway::store::ConvWindow {
            earliest_retained_seq: 3,
            next_seq: 6,
        },
    );
    let frame = wire::error_frame(None, &err);
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["t"], "error");
    assert_eq!(value["body"]["code"], "replay_window_exceeded");
    assert_eq!(value["body"]["requested_from_seq"], 1);
    assert_eq!(value["body"]["earliest_seq"], 3);
    assert_eq!(value["body"]["latest_seq"], 5);
}
