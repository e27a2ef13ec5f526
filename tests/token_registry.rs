mod test_support;

use serde_json::json;
use test_support::{request, request_ok, seed_auth_token, spawn_app};

use campusd::notify::fake::FakeCall;
use campusd::notify::registry;

#[tokio::test]
async fn registration_subscribes_the_role_topic() {
    let app = spawn_app("campusd-registry-register");
    seed_auth_token(&app, "student-token", "student", "stu-1", None, None).await;

    request_ok(
        &app,
        "POST",
        "/device-tokens",
        Some("student-token"),
        Some(json!({ "token": "tok-a", "platform": "android" })),
    )
    .await;

    {
        let conn = app.state.db.lock().await;
        let valid = registry::list_valid_tokens(&conn, "student", "stu-1").expect("tokens");
        assert_eq!(valid, vec!["tok-a".to_string()]);
    }
    assert_eq!(
        app.provider.calls(),
        vec![FakeCall::Subscribe {
            topic: "students".to_string(),
            tokens: vec!["tok-a".to_string()],
        }]
    );
}

#[tokio::test]
async fn reregistering_under_a_new_role_switches_topics() {
    let app = spawn_app("campusd-registry-switch");
    seed_auth_token(&app, "student-token", "student", "stu-1", None, None).await;
    seed_auth_token(&app, "teacher-token", "teacher", "tch-9", None, None).await;

    request_ok(
        &app,
        "POST",
        "/device-tokens",
        Some("student-token"),
        Some(json!({ "token": "tok-a", "platform": "android" })),
    )
    .await;
    // Same physical device, new login.
    request_ok(
        &app,
        "POST",
        "/device-tokens",
        Some("teacher-token"),
        Some(json!({ "token": "tok-a", "platform": "android" })),
    )
    .await;

    {
        let conn = app.state.db.lock().await;
        assert!(registry::list_valid_tokens(&conn, "student", "stu-1")
            .expect("tokens")
            .is_empty());
        assert_eq!(
            registry::list_valid_tokens(&conn, "teacher", "tch-9").expect("tokens"),
            vec!["tok-a".to_string()]
        );
    }

    let calls = app.provider.calls();
    assert!(calls.contains(&FakeCall::Unsubscribe {
        topic: "students".to_string(),
        tokens: vec!["tok-a".to_string()],
    }));
    assert!(calls.contains(&FakeCall::Subscribe {
        topic: "teachers".to_string(),
        tokens: vec!["tok-a".to_string()],
    }));
}

#[tokio::test]
async fn reregistering_the_same_role_does_not_resubscribe() {
    let app = spawn_app("campusd-registry-noop");
    seed_auth_token(&app, "student-token", "student", "stu-1", None, None).await;

    for _ in 0..2 {
        request_ok(
            &app,
            "POST",
            "/device-tokens",
            Some("student-token"),
            Some(json!({ "token": "tok-a", "platform": "android" })),
        )
        .await;
    }
    let subscribes = app
        .provider
        .calls()
        .into_iter()
        .filter(|c| matches!(c, FakeCall::Subscribe { .. }))
        .count();
    assert_eq!(subscribes, 1);
}

#[tokio::test]
async fn unregistration_unsubscribes_every_role_topic_and_deletes() {
    let app = spawn_app("campusd-registry-unregister");
    seed_auth_token(&app, "student-token", "student", "stu-1", None, None).await;
    request_ok(
        &app,
        "POST",
        "/device-tokens",
        Some("student-token"),
        Some(json!({ "token": "tok-a", "platform": "android" })),
    )
    .await;

    request_ok(
        &app,
        "DELETE",
        "/device-tokens/tok-a",
        Some("student-token"),
        None,
    )
    .await;

    {
        let conn = app.state.db.lock().await;
        assert!(registry::list_valid_tokens(&conn, "student", "stu-1")
            .expect("tokens")
            .is_empty());
    }
    let unsubscribed: Vec<String> = app
        .provider
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            FakeCall::Unsubscribe { topic, .. } => Some(topic),
            _ => None,
        })
        .collect();
    assert_eq!(unsubscribed, vec!["students", "teachers", "admins"]);

    let (status, _) = request(
        &app,
        "DELETE",
        "/device-tokens/tok-a",
        Some("student-token"),
        None,
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn invalidated_tokens_never_reappear() {
    let app = spawn_app("campusd-registry-invalidate");
    seed_auth_token(&app, "student-token", "student", "stu-1", None, None).await;
    request_ok(
        &app,
        "POST",
        "/device-tokens",
        Some("student-token"),
        Some(json!({ "token": "tok-a", "platform": "android" })),
    )
    .await;

    let conn = app.state.db.lock().await;
    registry::invalidate(&conn, &["tok-a".to_string()]).expect("invalidate");
    assert!(registry::list_valid_tokens(&conn, "student", "stu-1")
        .expect("tokens")
        .is_empty());

    // The row survives for audit.
    let kept: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM device_tokens WHERE token = 'tok-a'",
            [],
            |r| r.get(0),
        )
        .expect("count");
    assert_eq!(kept, 1);
}
