use crate::common::*;
use rocket::http::{ContentType, Status};

fn ack(
    client: &rocket::local::blocking::Client,
    token: &str,
    conv_id: &str,
    seq: i64,
) -> (Status, serde_json::Value) {
    let res = client
        .post("/v1/inbox")
        .header(ContentType::JSON)
        .header(bearer(token))
        .body(ack_frame(conv_id, seq))
        .dispatch();
    let status = res.status();
    (status, res.into_json().unwrap_or(serde_json::json!({})))
}

#[test]
fn test_ack_advances_cursor() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    send_env(&client, &token, "c1", "m1", b"x");
    send_env(&client, &token, "c1", "m2", b"x");

    let (status, body) = ack(&client, &token, "c1", 1);
    assert_eq!(status, Status::Ok);
    assert_eq!(body["conv_id"], "c1");
    assert_eq!(body["seq"], 1);
    assert_eq!(body["next_seq_to_ack"], 2);
}

#[test]
fn test_ack_never_regresses() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    for i in 1..=3 {
        send_env(&client, &token, "c1", &format!("m{i}"), b"x");
    }

    let (_, body) = ack(&client, &token, "c1", 3);
    assert_eq!(body["next_seq_to_ack"], 4);

    // Acking an older seq keeps the high-water mark.
    let (status, body) = ack(&client, &token, "c1", 1);
    assert_eq!(status, Status::Ok);
    assert_eq!(body["next_seq_to_ack"], 4);
}

#[test]
fn test_ack_out_of_range() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    send_env(&client, &token, "c1", "m1", b"x");

    // seq 0 and the unassigned head are both invalid.
    let (status, body) = ack(&client, &token, "c1", 0);
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["code"], "invalid_ack");

    let (status, body) = ack(&client, &token, "c1", 2);
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["code"], "invalid_ack");
    assert_eq!(body["latest_seq"], 1);
}

#[test]
fn test_ack_requires_membership() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    let mallory = session_token(&client, "mallory", "laptop");
    create_conv(&client, &alice, "c1");
    send_env(&client, &alice, "c1", "m1", b"x");

    let (status, body) = ack(&client, &mallory, "c1", 1);
    assert_eq!(status, Status::Forbidden);
    assert_eq!(body["code"], "not_member");
}

#[test]
fn test_cursors_are_per_session() {
    let client = test_client();
    let token_a = session_token(&client, "alice", "laptop");
    let token_b = session_token(&client, "alice", "phone");
    create_conv(&client, &token_a, "c1");
    for i in 1..=2 {
        send_env(&client, &token_a, "c1", &format!("m{i}"), b"x");
    }

    let (_, body) = ack(&client, &token_a, "c1", 2);
    assert_eq!(body["next_seq_to_ack"], 3);

    // The phone session's cursor is independent.
    let (_, body) = ack(&client, &token_b, "c1", 1);
    assert_eq!(body["next_seq_to_ack"], 2);
}
