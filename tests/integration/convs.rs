use crate::common::*;
use rocket::http::{ContentType, Status};

fn conversations(client: &rocket::local::blocking::Client, token: &str) -> serde_json::Value {
    let res = client
        .get("/v1/conversations")
        .header(bearer(token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

#[test]
fn test_conversations_lists_memberships_with_unread() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    let bob = session_token(&client, "bob", "laptop");
    create_conv(&client, &alice, "c1");
    create_conv(&client, &alice, "c2");
    invite(&client, &alice, "c1", "bob");
    for i in 1..=3 {
        send_env(&client, &alice, "c1", &format!("m{i}"), b"x");
    }

    // Bob sees only c1, fully unread.
    let body = conversations(&client, &bob);
    assert_eq!(body["count"], 1);
    let conv = &body["conversations"][0];
    assert_eq!(conv["conv_id"], "c1");
    assert_eq!(conv["role"], "member");
    assert_eq!(conv["latest_seq"], 3);
    assert_eq!(conv["unread_count"], 3);
    assert_eq!(body["total_unread"], 3);

    // Alice sees both; her c2 has no traffic.
    let body = conversations(&client, &alice);
    assert_eq!(body["count"], 2);
    let c2 = body["conversations"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["conv_id"] == "c2")
        .unwrap();
    assert_eq!(c2["role"], "owner");
    assert_eq!(c2["unread_count"], 0);
}

#[test]
fn test_ack_drains_unread() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    for i in 1..=4 {
        send_env(&client, &token, "c1", &format!("m{i}"), b"x");
    }

    client
        .post("/v1/inbox")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(ack_frame("c1", 3))
        .dispatch();

    let body = conversations(&client, &token);
    assert_eq!(body["conversations"][0]["next_seq_to_ack"], 4);
    assert_eq!(body["conversations"][0]["unread_count"], 1);
}

#[test]
fn test_cursor_endpoint() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    send_env(&client, &token, "c1", "m1", b"x");
    send_env(&client, &token, "c1", "m2", b"x");

    // No acks yet: the cursor sits at the window edge.
    let res = client
        .get("/v1/cursors?conv_id=c1")
        .header(bearer(&token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["next_seq_to_ack"], 1);
    assert_eq!(body["unread_count"], 2);

    client
        .post("/v1/inbox")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(ack_frame("c1", 2))
        .dispatch();

    let res = client
        .get("/v1/cursors?conv_id=c1")
        .header(bearer(&token))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["next_seq_to_ack"], 3);
    assert_eq!(body["unread_count"], 0);
}

#[test]
fn test_cursor_endpoint_requires_membership() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    let mallory = session_token(&client, "mallory", "laptop");
    create_conv(&client, &alice, "c1");

    let res = client
        .get("/v1/cursors?conv_id=c1")
        .header(bearer(&mallory))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_unread_is_per_session() {
    let client = test_client();
    let laptop = session_token(&client, "alice", "laptop");
    let phone = session_token(&client, "alice", "phone");
    create_conv(&client, &laptop, "c1");
    send_env(&client, &laptop, "c1", "m1", b"x");

    client
        .post("/v1/inbox")
        .header(ContentType::JSON)
        .header(bearer(&laptop))
        .body(ack_frame("c1", 1))
        .dispatch();

    let body = conversations(&client, &laptop);
    assert_eq!(body["total_unread"], 0);
    let body = conversations(&client, &phone);
    assert_eq!(body["total_unread"], 1);
}
