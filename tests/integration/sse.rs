use crate::common::*;
use rocket::http::Status;

// The SSE body is an infinite stream, which the blocking local client cannot
// drain; these tests cover the request-time rejections. Stream semantics
// (drain, ordering, slow consumer) are exercised in fanout.rs and sends.rs.

#[test]
fn test_sse_requires_session() {
    let client = test_client();
    let res = client.get("/v1/sse?conv_id=c1").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_sse_requires_membership() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    let mallory = session_token(&client, "mallory", "laptop");
    create_conv(&client, &alice, "c1");

    let res = client
        .get("/v1/sse?conv_id=c1")
        .header(bearer(&mallory))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "not_member");
}

#[test]
fn test_sse_unknown_conversation() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    let res = client
        .get("/v1/sse?conv_id=ghost")
        .header(bearer(&token))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
