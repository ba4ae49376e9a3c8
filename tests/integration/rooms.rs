use crate::common::*;
use rocket::http::{ContentType, Status};

fn members(client: &rocket::local::blocking::Client, token: &str, conv_id: &str) -> serde_json::Value {
    let res = client
        .get(format!("/v1/rooms/members?conv_id={conv_id}"))
        .header(bearer(token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

fn room_op(
    client: &rocket::local::blocking::Client,
    token: &str,
    op: &str,
    conv_id: &str,
    user_id: &str,
) -> (Status, serde_json::Value) {
    let res = client
        .post(format!("/v1/rooms/{op}"))
        .header(ContentType::JSON)
        .header(bearer(token))
        .body(format!(
            r#"{{"conv_id": "{conv_id}", "user_id": "{user_id}"}}"#
        ))
        .dispatch();
    let status = res.status();
    (status, res.into_json().unwrap_or(serde_json::json!({})))
}

#[test]
fn test_create_room() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");

    let conv = create_conv(&client, &token, "c1");
    assert_eq!(conv["conv_id"], "c1");
    assert_eq!(conv["created_by"], "alice");
    assert_eq!(conv["earliest_retained_seq"], 1);
    assert_eq!(conv["next_seq"], 1);

    // Creator is the owner.
    let body = members(&client, &token, "c1");
    assert_eq!(body["count"], 1);
    assert_eq!(body["members"][0]["user_id"], "alice");
    assert_eq!(body["members"][0]["role"], "owner");
}

#[test]
fn test_create_room_generated_id() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");

    let res = client
        .post("/v1/rooms/create")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body("{}")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let conv: serde_json::Value = res.into_json().unwrap();
    assert!(conv["conv_id"].as_str().unwrap().starts_with("conv_"));
}

#[test]
fn test_create_duplicate_room_conflicts() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "dup");

    let res = client
        .post("/v1/rooms/create")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(r#"{"conv_id": "dup"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "conflict");
}

#[test]
fn test_create_room_requires_session() {
    let client = test_client();
    let res = client
        .post("/v1/rooms/create")
        .header(ContentType::JSON)
        .body(r#"{"conv_id": "c1"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_invite_and_members() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    invite(&client, &token, "c1", "bob");

    let body = members(&client, &token, "c1");
    assert_eq!(body["count"], 2);
    let bob = body["members"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["user_id"] == "bob")
        .unwrap();
    assert_eq!(bob["role"], "member");
}

#[test]
fn test_invite_existing_member_conflicts() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    invite(&client, &token, "c1", "bob");

    let (status, body) = room_op(&client, &token, "invite", "c1", "bob");
    assert_eq!(status, Status::Conflict);
    assert_eq!(body["code"], "conflict");
}

#[test]
fn test_member_cannot_invite() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    let bob = session_token(&client, "bob", "laptop");
    create_conv(&client, &alice, "c1");
    invite(&client, &alice, "c1", "bob");

    let (status, body) = room_op(&client, &bob, "invite", "c1", "carol");
    assert_eq!(status, Status::Forbidden);
    assert_eq!(body["code"], "forbidden");
}

#[test]
fn test_non_member_sees_not_member() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    let mallory = session_token(&client, "mallory", "laptop");
    create_conv(&client, &alice, "c1");

    let res = client
        .get("/v1/rooms/members?conv_id=c1")
        .header(bearer(&mallory))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "not_member");
}

#[test]
fn test_members_unknown_conv() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    let res = client
        .get("/v1/rooms/members?conv_id=ghost")
        .header(bearer(&token))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "conv_not_found");
}

#[test]
fn test_promote_then_admin_can_invite() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    let bob = session_token(&client, "bob", "laptop");
    create_conv(&client, &alice, "c1");
    invite(&client, &alice, "c1", "bob");

    let (status, body) = room_op(&client, &alice, "promote", "c1", "bob");
    assert_eq!(status, Status::Ok);
    assert_eq!(body["role"], "admin");

    // Bob, now admin, can invite members...
    let (status, _) = room_op(&client, &bob, "invite", "c1", "carol");
    assert_eq!(status, Status::Ok);

    // ...but cannot grant admin.
    let res = client
        .post("/v1/rooms/invite")
        .header(ContentType::JSON)
        .header(bearer(&bob))
        .body(r#"{"conv_id": "c1", "user_id": "dave", "role": "admin"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_admin_cannot_remove_owner() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    let bob = session_token(&client, "bob", "laptop");
    create_conv(&client, &alice, "c1");
    invite(&client, &alice, "c1", "bob");
    room_op(&client, &alice, "promote", "c1", "bob");

    let (status, _) = room_op(&client, &bob, "remove", "c1", "alice");
    assert_eq!(status, Status::Forbidden);
}

#[test]
fn test_remove_member() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    create_conv(&client, &alice, "c1");
    invite(&client, &alice, "c1", "bob");

    let (status, body) = room_op(&client, &alice, "remove", "c1", "bob");
    assert_eq!(status, Status::Ok);
    assert_eq!(body["removed"], true);

    let body = members(&client, &alice, "c1");
    assert_eq!(body["count"], 1);
}

#[test]
fn test_member_can_leave() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    let bob = session_token(&client, "bob", "laptop");
    create_conv(&client, &alice, "c1");
    invite(&client, &alice, "c1", "bob");

    let (status, _) = room_op(&client, &bob, "remove", "c1", "bob");
    assert_eq!(status, Status::Ok);
}

#[test]
fn test_last_owner_is_protected() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    create_conv(&client, &alice, "c1");

    let (status, _) = room_op(&client, &alice, "remove", "c1", "alice");
    assert_eq!(status, Status::Forbidden);
    let (status, _) = room_op(&client, &alice, "demote", "c1", "alice");
    assert_eq!(status, Status::Forbidden);
}

#[test]
fn test_promote_to_owner_then_demote() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    create_conv(&client, &alice, "c1");
    invite(&client, &alice, "c1", "bob");

    room_op(&client, &alice, "promote", "c1", "bob"); // member -> admin
    let (status, body) = room_op(&client, &alice, "promote", "c1", "bob"); // admin -> owner
    assert_eq!(status, Status::Ok);
    assert_eq!(body["role"], "owner");

    // With two owners, alice may now step down.
    let (status, body) = room_op(&client, &alice, "demote", "c1", "alice");
    assert_eq!(status, Status::Ok);
    assert_eq!(body["role"], "admin");
}
