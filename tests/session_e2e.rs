mod common;

use std::time::Duration;

use adventureboard_back::{
    config::AppConfig,
    dao::{keys, kv_store::SessionStorage},
    dto::{
        session::{Cursor, GameState, GameSystem, Presence, Roster},
        ws::ServerMessage,
    },
};
use common::{TestServer, assert_silent, next_frame, send_json};
use serde_json::json;

fn roster(frame: ServerMessage) -> Roster {
    match frame {
        ServerMessage::Connections { connections } => connections,
        other => panic!("expected roster, got {other:?}"),
    }
}

fn connection_id(frame: ServerMessage) -> String {
    match frame {
        ServerMessage::ConnectionId { connection_id } => connection_id,
        other => panic!("expected connection id, got {other:?}"),
    }
}

#[tokio::test]
async fn two_participants_share_roster_and_presence() {
    let server = TestServer::start().await;

    let mut a = server.join("abc", "u1").await;
    let a_id = connection_id(next_frame(&mut a).await);
    assert_eq!(
        next_frame(&mut a).await,
        ServerMessage::GameState {
            game_state: GameState::default()
        }
    );
    let own = roster(next_frame(&mut a).await);
    assert_eq!(own.len(), 1);
    assert!(own[&a_id].is_host);

    let mut b = server.join("abc", "u2").await;
    let b_id = connection_id(next_frame(&mut b).await);
    assert!(matches!(next_frame(&mut b).await, ServerMessage::GameState { .. }));
    let seen_by_b = roster(next_frame(&mut b).await);
    assert_eq!(seen_by_b.len(), 2);

    let seen_by_a = roster(next_frame(&mut a).await);
    assert_eq!(seen_by_a.len(), 2);
    assert_eq!(seen_by_a[&a_id].identity.id, "u1");
    assert!(seen_by_a[&a_id].is_host);
    assert_eq!(seen_by_a[&b_id].identity.id, "u2");
    assert!(!seen_by_a[&b_id].is_host);

    send_json(
        &mut b,
        json!({
            "type": "presence",
            "presence": { "pageId": "page:page", "cursor": { "x": 10, "y": 20 } }
        }),
    )
    .await;

    assert_eq!(
        next_frame(&mut a).await,
        ServerMessage::Presence {
            connection_id: b_id,
            presence: Presence {
                page_id: "page:page".into(),
                cursor: Some(Cursor { x: 10.0, y: 20.0 }),
            },
        }
    );
    assert_silent(&mut b, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn game_state_reaches_others_and_is_stored() {
    let server = TestServer::start().await;
    let mut a = server.join("abc", "u1").await;
    for _ in 0..3 {
        next_frame(&mut a).await;
    }
    let mut b = server.join("abc", "u2").await;
    for _ in 0..3 {
        next_frame(&mut b).await;
    }
    next_frame(&mut a).await;

    send_json(
        &mut a,
        json!({ "type": "gameState", "gameState": { "system": "daggerheart", "round": 3 } }),
    )
    .await;

    let ServerMessage::GameState { game_state } = next_frame(&mut b).await else {
        panic!("expected game-state");
    };
    assert_eq!(game_state.system, Some(GameSystem::Daggerheart));
    assert_eq!(game_state.extra["round"], json!(3));
    assert_silent(&mut a, Duration::from_millis(200)).await;

    let summary = server
        .state
        .sessions()
        .get("abc")
        .unwrap()
        .summary()
        .await
        .unwrap();
    let stored: Option<GameState> = adventureboard_back::dao::kv_store::get_json(
        server.store.as_ref(),
        &keys::game_state("u1", summary.campaign_id.as_deref().unwrap()),
    )
    .await
    .unwrap();
    assert_eq!(stored, Some(game_state));
}

#[tokio::test]
async fn closing_a_link_updates_the_roster() {
    let server = TestServer::start().await;
    let mut a = server.join("abc", "u1").await;
    let a_id = connection_id(next_frame(&mut a).await);
    next_frame(&mut a).await;
    next_frame(&mut a).await;

    let mut b = server.join("abc", "u2").await;
    for _ in 0..3 {
        next_frame(&mut b).await;
    }
    next_frame(&mut a).await;

    b.close(None).await.unwrap();

    let remaining = roster(next_frame(&mut a).await);
    assert_eq!(remaining.keys().collect::<Vec<_>>(), vec![&a_id]);

    let store = server.store.clone();
    let local = SessionStorage::new(store, "abc");
    let persisted: Option<Roster> = local.get_json(keys::local::CONNECTIONS).await.unwrap();
    assert_eq!(persisted.unwrap().len(), 1);
}

#[tokio::test]
async fn sessions_are_isolated_by_key() {
    let server = TestServer::start().await;
    let mut a = server.join("abc", "u1").await;
    for _ in 0..3 {
        next_frame(&mut a).await;
    }
    let mut other = server.join("xyz", "u2").await;
    let other_id = connection_id(next_frame(&mut other).await);
    next_frame(&mut other).await;
    let other_roster = roster(next_frame(&mut other).await);
    assert!(other_roster[&other_id].is_host);

    assert_silent(&mut a, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn admission_rejections_use_http_status() {
    let server = TestServer::start().await;
    let upgrade = [
        ("Upgrade", "websocket"),
        ("Connection", "Upgrade"),
        ("Sec-WebSocket-Version", "13"),
        ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
    ];

    // Missing instance id.
    assert_eq!(server.raw_get("/ws", &upgrade).await, 400);
    // Plain GET on the session endpoint.
    assert_eq!(server.raw_get("/ws?instanceId=abc", &[]).await, 426);
    // Upgrade without any identity.
    assert_eq!(server.raw_get("/ws?instanceId=abc", &upgrade).await, 401);

    let mut with_bad_identity = upgrade.to_vec();
    with_bad_identity.push(("x-session-identity", "{\"id\":\"\"}"));
    assert_eq!(
        server.raw_get("/ws?instanceId=abc", &with_bad_identity).await,
        401
    );

    assert!(server.state.sessions().get("abc").is_none());
}

#[tokio::test]
async fn anonymous_mode_admits_unidentified_callers() {
    let mut config = AppConfig::default();
    config.identity.anonymous_identity = Some("harris".into());
    let server = TestServer::start_with(config).await;

    let upgrade = [
        ("Upgrade", "websocket"),
        ("Connection", "Upgrade"),
        ("Sec-WebSocket-Version", "13"),
        ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
    ];
    assert_eq!(server.raw_get("/ws?instanceId=abc", &upgrade).await, 101);
}

#[tokio::test]
async fn health_and_session_introspection() {
    let server = TestServer::start().await;
    assert_eq!(server.raw_get("/healthcheck", &[]).await, 200);
    assert_eq!(server.raw_get("/sessions/abc", &[]).await, 404);

    let mut a = server.join("abc", "u1").await;
    for _ in 0..3 {
        next_frame(&mut a).await;
    }
    assert_eq!(server.raw_get("/sessions/abc", &[]).await, 200);
    assert_eq!(server.state.sessions().live_count(), 1);
}
