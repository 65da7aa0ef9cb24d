/// HTTP tests for the messaging channel
mod common;

use axum::http::{Method, StatusCode};
use carepath::messaging::PushEvent;
use common::TestPortal;
use serde_json::json;

#[tokio::test]
async fn test_conversation_flow_and_read_state() {
    let portal = TestPortal::new().await;
    let admin = portal.admin_token().await;
    let psych = portal.psychologist(&admin, "pat@uni.edu").await;
    let student = portal.student(&psych, "sam@uni.edu", "S-1").await;

    for content in ["Hello", "Are you free Thursday?"] {
        let (status, message) = portal
            .post(
                &format!("/messages/{}", psych.id),
                &student.token,
                json!({ "content": content }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", message);
        assert_eq!(message["status"], "sent");
        assert_eq!(message["sender"]["kind"], "student");
    }

    let (status, conversations) = portal.get("/messages/conversations", &psych.token).await;
    assert_eq!(status, StatusCode::OK);
    let conversations = conversations.as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["counterpart"]["id"], student.id.as_str());
    assert_eq!(conversations[0]["unreadCount"], 2);
    assert_eq!(conversations[0]["lastMessage"]["content"], "Are you free Thursday?");

    let (status, history) = portal
        .get(&format!("/messages/{}", student.id), &psych.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<_> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, vec!["Hello", "Are you free Thursday?"]);

    let (status, read) = portal
        .send(
            Method::POST,
            &format!("/messages/{}/read", student.id),
            Some(&psych.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["updated"], 2);

    let (_, conversations) = portal.get("/messages/conversations", &psych.token).await;
    assert_eq!(conversations[0]["unreadCount"], 0);
}

#[tokio::test]
async fn test_messaging_is_limited_to_enrollment_pairs() {
    let portal = TestPortal::new().await;
    let admin = portal.admin_token().await;
    let pat = portal.psychologist(&admin, "pat@uni.edu").await;
    let lee = portal.psychologist(&admin, "lee@uni.edu").await;
    let student = portal.student(&pat, "sam@uni.edu", "S-1").await;

    let (status, _) = portal
        .post(
            &format!("/messages/{}", student.id),
            &lee.token,
            json!({ "content": "hi" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = portal
        .post(
            &format!("/messages/{}", student.id),
            &admin,
            json!({ "content": "hi" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = portal
        .post(
            &format!("/messages/{}", pat.id),
            &student.token,
            json!({ "content": "   " }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_pushes_to_open_connections() {
    let portal = TestPortal::new().await;
    let admin = portal.admin_token().await;
    let psych = portal.psychologist(&admin, "pat@uni.edu").await;
    let student = portal.student(&psych, "sam@uni.edu", "S-1").await;

    let (_, mut psych_events) = portal.ctx.connections.connect(&psych.id).await;
    let (_, mut student_events) = portal.ctx.connections.connect(&student.id).await;

    let (status, _) = portal
        .post(
            &format!("/messages/{}", psych.id),
            &student.token,
            json!({ "content": "Checking in" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    match psych_events.try_recv().unwrap() {
        PushEvent::NewMessage { message } => assert_eq!(message.content, "Checking in"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(
        student_events.try_recv().unwrap(),
        PushEvent::NewMessage { .. }
    ));

    portal
        .send(
            Method::POST,
            &format!("/messages/{}/read", student.id),
            Some(&psych.token),
            None,
        )
        .await;
    match student_events.try_recv().unwrap() {
        PushEvent::MessagesRead { reader_id, count } => {
            assert_eq!(reader_id, psych.id);
            assert_eq!(count, 1);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_socket_upgrade_requires_token() {
    let portal = TestPortal::new().await;

    let (status, _) = portal.send(Method::GET, "/messages/ws", None, None).await;
    assert!(status.is_client_error());
}
