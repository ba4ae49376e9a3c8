use crate::common::*;
use rocket::http::{ContentType, Status};

#[test]
fn test_read_range_from_cursor() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    for i in 1..=5 {
        send_env(&client, &token, "c1", &format!("m{i}"), b"x");
    }

    let range = read_envelopes(&client, &token, "c1", Some(2));
    let seqs: Vec<i64> = range["envelopes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![2, 3, 4, 5]);
    assert_eq!(range["earliest_retained_seq"], 1);
    assert_eq!(range["next_seq"], 6);
}

#[test]
fn test_read_range_is_stable_between_reads() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    for i in 1..=4 {
        send_env(&client, &token, "c1", &format!("m{i}"), format!("payload-{i}").as_bytes());
    }

    let first = read_envelopes(&client, &token, "c1", Some(1));
    let second = read_envelopes(&client, &token, "c1", Some(1));
    assert_eq!(first["envelopes"], second["envelopes"]);
}

#[test]
fn test_replay_survives_restart() {
    let db_path = temp_db_path();
    let resume_token;
    {
        let client = test_client_on(&db_path);
        let ready = start_session(&client, "alice", "laptop");
        resume_token = ready["resume_token"].as_str().unwrap().to_string();
        let token = ready["session_token"].as_str().unwrap().to_string();
        create_conv(&client, &token, "c1");
        for i in 1..=5 {
            send_env(&client, &token, "c1", &format!("m{i}"), b"x");
        }
        // Client dropped here: the gateway "dies", the store survives.
    }

    let client = test_client_on(&db_path);

    // Resume the session against the restarted gateway.
    let res = client
        .post("/v1/session/resume")
        .header(ContentType::JSON)
        .body(format!(r#"{{"resume_token": "{resume_token}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let resumed: serde_json::Value = res.into_json().unwrap();
    let token = resumed["session_token"].as_str().unwrap();

    // Replay from 1 returns exactly seqs 1..=5.
    let range = read_envelopes(&client, token, "c1", Some(1));
    let seqs: Vec<i64> = range["envelopes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

    // The log continues at 6, not at 1.
    let outcome = send_env(&client, token, "c1", "m6", b"x");
    assert_eq!(outcome["seq"], 6);

    remove_db(&db_path);
}

#[test]
fn test_pruned_replay_window() {
    let client = test_client_with(|cfg| {
        cfg.max_retained = 3;
        cfg.admin_key = "test-admin".to_string();
    });
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    for i in 1..=5 {
        send_env(&client, &token, "c1", &format!("m{i}"), b"x");
    }

    let res = client
        .post("/v1/admin/prune")
        .header(bearer("test-admin"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Below the window: a single structured error with recovery bounds.
    let res = client
        .get("/v1/envelopes?conv_id=c1&from_seq=1")
        .header(bearer(&token))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "replay_window_exceeded");
    assert_eq!(body["requested_from_seq"], 1);
    assert_eq!(body["earliest_seq"], 3);
    assert_eq!(body["latest_seq"], 5);

    // Resubscribing from earliest_seq recovers deterministically.
    let range = read_envelopes(&client, &token, "c1", Some(3));
    let seqs: Vec<i64> = range["envelopes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![3, 4, 5]);
}

#[test]
fn test_default_read_starts_at_window_edge() {
    let client = test_client_with(|cfg| {
        cfg.max_retained = 2;
        cfg.admin_key = "test-admin".to_string();
    });
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    for i in 1..=4 {
        send_env(&client, &token, "c1", &format!("m{i}"), b"x");
    }
    client
        .post("/v1/admin/prune")
        .header(bearer("test-admin"))
        .dispatch();

    let range = read_envelopes(&client, &token, "c1", None);
    let seqs: Vec<i64> = range["envelopes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![3, 4]);
}

#[test]
fn test_pruned_msg_id_can_be_accepted_again() {
    let client = test_client_with(|cfg| {
        cfg.max_retained = 2;
        cfg.admin_key = "test-admin".to_string();
    });
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    for i in 1..=4 {
        send_env(&client, &token, "c1", &format!("m{i}"), b"x");
    }
    client
        .post("/v1/admin/prune")
        .header(bearer("test-admin"))
        .dispatch();

    // m1's row is gone; idempotency scope is the retained window.
    let outcome = send_env(&client, &token, "c1", "m1", b"again");
    assert_eq!(outcome["duplicate"], false);
    assert_eq!(outcome["seq"], 5);

    // A retained msg_id still dedupes.
    let outcome = send_env(&client, &token, "c1", "m4", b"x");
    assert_eq!(outcome["duplicate"], true);
    assert_eq!(outcome["seq"], 4);
}

#[test]
fn test_read_range_pages_by_limit() {
    let client = test_client();
    let token = session_token(&client, "alice", "laptop");
    create_conv(&client, &token, "c1");
    for i in 1..=6 {
        send_env(&client, &token, "c1", &format!("m{i}"), b"x");
    }

    let res = client
        .get("/v1/envelopes?conv_id=c1&from_seq=1&limit=2")
        .header(bearer(&token))
        .dispatch();
    let page: serde_json::Value = res.into_json().unwrap();
    let seqs: Vec<i64> = page["envelopes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 2]);

    // Continue from the last seen seq.
    let res = client
        .get("/v1/envelopes?conv_id=c1&from_seq=3&limit=2")
        .header(bearer(&token))
        .dispatch();
    let page: serde_json::Value = res.into_json().unwrap();
    let seqs: Vec<i64> = page["envelopes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![3, 4]);

    // A nonsense limit is clamped, not an error.
    let res = client
        .get("/v1/envelopes?conv_id=c1&from_seq=1&limit=0")
        .header(bearer(&token))
        .dispatch();
    assert_eq!(res.status().code, 200);
    let page: serde_json::Value = res.into_json().unwrap();
    assert_eq!(page["envelopes"].as_array().unwrap().len(), 1);
}

#[test]
fn test_read_requires_membership() {
    let client = test_client();
    let alice = session_token(&client, "alice", "laptop");
    let mallory = session_token(&client, "mallory", "laptop");
    create_conv(&client, &alice, "c1");

    let res = client
        .get("/v1/envelopes?conv_id=c1")
        .header(bearer(&mallory))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}
