use axum::body::Body;
use axum::http::{Request, StatusCode};
use partydash::api;
use partydash::config::EngineConfig;
use partydash::engine::{Engine, PhaseMachine, RetryPolicy, Scheduler};
use partydash::store::{
    CheckpointStore, FileCheckpointStore, HistoryStore, InboxStore, MemoryStore, ProfileStore,
    RoomStore, StoreOp, Stores,
};
use partydash::trigger::spawn_activation_trigger;
use partydash::types::*;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn prompts(n: usize) -> Vec<Prompt> {
    (1..=n)
        .map(|i| Prompt {
            id: format!("p{}", i),
            text: format!("Prompt {}", i),
        })
        .collect()
}

fn players(connected: &[(&str, bool)]) -> Vec<RoomPlayer> {
    connected
        .iter()
        .map(|(id, connected)| RoomPlayer {
            id: id.to_string(),
            display_name: None,
            connected: *connected,
        })
        .collect()
}

fn fast_retry_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
        ..EngineConfig::default()
    }
}

fn scheduler_for(store: &Arc<MemoryStore>) -> Scheduler {
    Scheduler::new(Engine::new(Stores::in_memory(store.clone()), fast_retry_config()))
}

async fn wait_until_finished(store: &MemoryStore, room_id: &str, step: Duration) -> Room {
    for _ in 0..500 {
        let room = store.get_room(room_id).await.unwrap().unwrap();
        if room.status == RoomStatus::Finished {
            return room;
        }
        tokio::time::sleep(step).await;
    }
    panic!("room {} never finished", room_id);
}

/// Activation through the store, three rounds of seven votes, win at 21
#[tokio::test(start_paused = true)]
async fn test_full_match_from_activation() {
    let store = Arc::new(MemoryStore::with_prompts(prompts(10)));
    store
        .insert_room(Room::new(
            "room",
            players(&[("a", true), ("b", true), ("c", true)]),
            RoomSettings::default(),
        ))
        .await
        .unwrap();
    for round in 1..=3 {
        for voter in 0..7 {
            store
                .record_vote("room", round, &format!("fan-{}", voter), "b")
                .await
                .unwrap();
        }
    }

    let _trigger = spawn_activation_trigger(scheduler_for(&store));
    store.set_status("room", RoomStatus::Active).await.unwrap();

    let started = tokio::time::Instant::now();
    let room = wait_until_finished(&store, "room", Duration::from_secs(1)).await;
    assert!(started.elapsed() >= Duration::from_secs(3 * 51));

    assert_eq!(room.winner_id.as_deref(), Some("b"));
    assert_eq!(room.end_reason, None);
    assert_eq!(room.current_round, 3);
    assert_eq!(room.score_of("b").total_votes, 21);
    assert_eq!(room.score_of("b").round_wins, 3);
    assert_eq!(room.score_of("b").stars, 3);
    assert_eq!(room.score_of("a"), Score::default());

    let history = store.get_by_room("room").await.unwrap().unwrap();
    assert_eq!(history.rounds_played, 3);
    assert_eq!(history.finish_reason, FinishReason::WinThreshold);

    // 3 rounds of participation + win + star + voting, then the game-win bonus
    let b = store.get_profile("b").await.unwrap().unwrap();
    assert_eq!(b.xp, 3 * (10 + 50 + 25 + 5) + 100);
    assert_eq!((b.rounds_won, b.stars_earned, b.total_votes), (3, 3, 21));
    assert_eq!((b.games_played, b.games_won), (1, 1));

    let a = store.get_profile("a").await.unwrap().unwrap();
    assert_eq!(a.xp, 3 * 10);
    assert_eq!((a.games_played, a.games_won), (1, 0));
}

/// Admin API end to end: create, disconnect, activate, then read the history
#[tokio::test]
async fn test_early_termination_through_api() {
    let store = Arc::new(MemoryStore::with_prompts(prompts(3)));
    let scheduler = scheduler_for(&store);
    let _trigger = spawn_activation_trigger(scheduler.clone());
    let app = api::router(scheduler);

    let create = serde_json::json!({
        "id": "room",
        "players": [{"id": "a"}, {"id": "b"}, {"id": "c"}]
    });
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/rooms")
                .header("content-type", "application/json")
                .body(Body::from(create.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(
            Request::put("/api/rooms/room/players/c/connection")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"connected": false}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/rooms/room/activate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let room = wait_until_finished(&store, "room", Duration::from_millis(10)).await;
    assert_eq!(room.end_reason.as_deref(), Some("Insufficient players"));
    assert_eq!(room.current_round, 0);

    let response = app
        .oneshot(Request::get("/api/rooms/room/history").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let history: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(history["finish_reason"], "insufficient_players");
}

/// A second orchestrator cannot take a room that is already being driven
#[tokio::test(start_paused = true)]
async fn test_second_scheduler_is_locked_out() {
    let store = Arc::new(MemoryStore::with_prompts(prompts(10)));
    store
        .insert_room(Room::new(
            "room",
            players(&[("a", true), ("b", true), ("c", true)]),
            RoomSettings::default(),
        ))
        .await
        .unwrap();
    store.set_status("room", RoomStatus::Active).await.unwrap();

    let first = scheduler_for(&store);
    let second = scheduler_for(&store);

    let handle = first.launch("room").await.unwrap();
    assert!(handle.is_some());
    assert!(second.launch("room").await.unwrap().is_none());

    // Still locked out mid-round, after the lease has been renewed
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(second.launch("room").await.unwrap().is_none());
    let room = store.get_room("room").await.unwrap().unwrap();
    assert_eq!(room.current_round, 1);
}

/// Transient failures that never clear end in the dead-letter queue
#[tokio::test(start_paused = true)]
async fn test_failing_room_is_dead_lettered() {
    let store = Arc::new(MemoryStore::with_prompts(prompts(3)));
    store
        .insert_room(Room::new(
            "room",
            players(&[("a", true), ("b", true), ("c", true)]),
            RoomSettings::default(),
        ))
        .await
        .unwrap();
    store.set_status("room", RoomStatus::Active).await.unwrap();
    store.fail_next(StoreOp::RandomPrompt, 1_000).await;

    let scheduler = scheduler_for(&store);
    let handle = scheduler.launch("room").await.unwrap().unwrap();
    handle.await.unwrap();

    assert!(scheduler.dead_letters().contains("room").await);
    let letters = scheduler.dead_letters().list().await;
    assert_eq!(letters[0].attempts, 3);

    // Room is left as it was: active, no round started
    let room = store.get_room("room").await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Active);
    assert_eq!(room.current_round, 0);
}

/// A checkpoint on disk lets a fresh engine finish the interrupted round
#[tokio::test]
async fn test_round_resumes_from_file_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_prompts(prompts(5)));
    store
        .insert_room(Room::new(
            "room",
            players(&[("a", true), ("b", true), ("c", true)]),
            RoomSettings::default(),
        ))
        .await
        .unwrap();
    store.set_status("room", RoomStatus::Active).await.unwrap();

    let checkpoints = Arc::new(FileCheckpointStore::open(dir.path()).await.unwrap());
    let config = EngineConfig {
        phase_durations: PhaseDurations {
            prompt_secs: 0,
            submission_secs: 0,
            waiting_secs: 0,
            voting_secs: 0,
            results_secs: 0,
        },
        ..fast_retry_config()
    };
    let engine = Engine::new(
        Stores::in_memory(store.clone()).with_checkpoints(checkpoints.clone()),
        config,
    );

    // Simulate a crash right after round 1 entered voting
    let prompt = prompts(5).remove(3);
    store.record_round_start("room", 1, &prompt).await.unwrap();
    let mut machine = PhaseMachine::new("room", 1, prompt.clone(), engine.config.phase_durations);
    while machine.phase != Phase::Voting {
        machine.advance();
    }
    checkpoints.save_checkpoint(&machine).await.unwrap();
    store.record_vote("room", 1, "a", "c").await.unwrap();

    let room = store.get_room("room").await.unwrap().unwrap();
    let round = engine.play_round(&room).await.unwrap();

    assert_eq!(round, 1);
    let room = store.get_room("room").await.unwrap().unwrap();
    assert_eq!(room.used_prompts, vec![prompt.id]);
    assert_eq!(room.score_of("c").total_votes, 1);
    assert_eq!(room.last_scored_round, 1);
    assert!(!dir.path().join("room.json").exists());
}
