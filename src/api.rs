//! Admin HTTP API.
//!
//! Rooms are created and activated here; activation is what the trigger picks
//! up to start a match. The remaining endpoints feed the per-round inboxes and
//! expose state for inspection.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::engine::Scheduler;
use crate::store::StoreError;
use crate::types::*;

/// Errors returned to API clients
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(what) => ApiError::Conflict(what),
            StoreError::Unavailable(what) => ApiError::Unavailable(what),
            StoreError::Serialization(what) => ApiError::Internal(what),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("API error: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct NewPlayer {
    pub id: PlayerId,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    /// Generated when omitted
    #[serde(default)]
    pub id: Option<RoomId>,
    pub players: Vec<NewPlayer>,
    #[serde(default)]
    pub win_threshold: Option<u32>,
    #[serde(default)]
    pub min_players: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    pub connected: bool,
}

#[derive(Debug, Deserialize)]
pub struct SubmissionRequest {
    pub player_id: PlayerId,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub voter_id: VoterId,
    pub candidate_id: PlayerId,
}

/// Build the admin router
pub fn router(scheduler: Scheduler) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/{id}", get(get_room))
        .route("/api/rooms/{id}/activate", post(activate_room))
        .route(
            "/api/rooms/{id}/players/{player_id}/connection",
            put(set_connection),
        )
        .route("/api/rooms/{id}/submissions", post(post_submission))
        .route("/api/rooms/{id}/votes", post(post_vote))
        .route("/api/rooms/{id}/round", get(get_round_state))
        .route("/api/rooms/{id}/history", get(get_history))
        .route("/api/profiles/{user_id}", get(get_profile))
        .route("/api/dead-letters", get(list_dead_letters))
        .with_state(scheduler)
}

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// POST /api/rooms
async fn create_room(
    State(scheduler): State<Scheduler>,
    Json(req): Json<CreateRoomRequest>,
) -> ApiResult<(StatusCode, Json<Room>)> {
    if req.players.is_empty() {
        return Err(ApiError::BadRequest("a room needs players".to_string()));
    }

    let defaults = scheduler.engine().config.room_defaults;
    let settings = RoomSettings {
        win_threshold: req.win_threshold.unwrap_or(defaults.win_threshold),
        min_players: req.min_players.unwrap_or(defaults.min_players),
    };
    let players = req
        .players
        .into_iter()
        .map(|p| RoomPlayer {
            id: p.id,
            display_name: p.display_name,
            connected: true,
        })
        .collect();
    let id = req.id.unwrap_or_else(|| ulid::Ulid::new().to_string());
    let room = Room::new(id, players, settings);

    scheduler.engine().stores.rooms.insert_room(room.clone()).await?;
    tracing::info!("Created room {}", room.id);
    Ok((StatusCode::CREATED, Json(room)))
}

async fn load_room(scheduler: &Scheduler, room_id: &str) -> ApiResult<Room> {
    scheduler
        .engine()
        .stores
        .rooms
        .get_room(room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("room {}", room_id)))
}

/// GET /api/rooms/{id}
async fn get_room(State(scheduler): State<Scheduler>, Path(id): Path<RoomId>) -> ApiResult<Json<Room>> {
    Ok(Json(load_room(&scheduler, &id).await?))
}

/// POST /api/rooms/{id}/activate
///
/// Flips the room to active; the activation trigger starts the match.
async fn activate_room(
    State(scheduler): State<Scheduler>,
    Path(id): Path<RoomId>,
) -> ApiResult<StatusCode> {
    scheduler
        .engine()
        .stores
        .rooms
        .set_status(&id, RoomStatus::Active)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// PUT /api/rooms/{id}/players/{player_id}/connection
async fn set_connection(
    State(scheduler): State<Scheduler>,
    Path((id, player_id)): Path<(RoomId, PlayerId)>,
    Json(req): Json<ConnectionRequest>,
) -> ApiResult<StatusCode> {
    scheduler
        .engine()
        .stores
        .rooms
        .set_player_connected(&id, &player_id, req.connected)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Room that inbox writes go to; it must be mid-match
async fn inbox_room(scheduler: &Scheduler, room_id: &str) -> ApiResult<Room> {
    let room = load_room(scheduler, room_id).await?;
    if room.status != RoomStatus::Active || room.current_round == 0 {
        return Err(ApiError::Conflict(format!("room {} has no round in progress", room_id)));
    }
    Ok(room)
}

/// POST /api/rooms/{id}/submissions
async fn post_submission(
    State(scheduler): State<Scheduler>,
    Path(id): Path<RoomId>,
    Json(req): Json<SubmissionRequest>,
) -> ApiResult<StatusCode> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("empty submission".to_string()));
    }
    let room = inbox_room(&scheduler, &id).await?;
    if !room.has_player(&req.player_id) {
        return Err(ApiError::BadRequest(format!(
            "{} is not a player in room {}",
            req.player_id, id
        )));
    }
    scheduler
        .engine()
        .stores
        .inbox
        .record_submission(&id, room.current_round, &req.player_id, text.to_string())
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/rooms/{id}/votes
///
/// Anyone may vote, but only for a player who submitted an entry this round.
async fn post_vote(
    State(scheduler): State<Scheduler>,
    Path(id): Path<RoomId>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<StatusCode> {
    let room = inbox_room(&scheduler, &id).await?;
    if !room.has_player(&req.candidate_id) {
        return Err(ApiError::BadRequest(format!(
            "{} is not a player in room {}",
            req.candidate_id, id
        )));
    }

    let inbox = &scheduler.engine().stores.inbox;
    let submissions = inbox.submissions(&id, room.current_round).await?;
    if !submissions.contains_key(&req.candidate_id) {
        return Err(ApiError::Conflict(format!(
            "{} has no entry in round {}",
            req.candidate_id, room.current_round
        )));
    }

    inbox
        .record_vote(&id, room.current_round, &req.voter_id, &req.candidate_id)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /api/rooms/{id}/round
async fn get_round_state(
    State(scheduler): State<Scheduler>,
    Path(id): Path<RoomId>,
) -> ApiResult<Json<RoundState>> {
    scheduler
        .engine()
        .stores
        .round_states
        .get_round_state(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("round state for room {}", id)))
}

/// GET /api/rooms/{id}/history
async fn get_history(
    State(scheduler): State<Scheduler>,
    Path(id): Path<RoomId>,
) -> ApiResult<Json<MatchHistory>> {
    scheduler
        .engine()
        .stores
        .history
        .get_by_room(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("history for room {}", id)))
}

/// GET /api/profiles/{user_id}
async fn get_profile(
    State(scheduler): State<Scheduler>,
    Path(user_id): Path<PlayerId>,
) -> ApiResult<Json<UserProfile>> {
    scheduler
        .engine()
        .stores
        .profiles
        .get_profile(&user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("profile {}", user_id)))
}

/// GET /api/dead-letters
async fn list_dead_letters(State(scheduler): State<Scheduler>) -> Json<Vec<DeadLetter>> {
    Json(scheduler.dead_letters().list().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::store::{InboxStore, MemoryStore, RoomStore, Stores};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(store: &Arc<MemoryStore>) -> Router {
        let engine = Engine::new(Stores::in_memory(store.clone()), EngineConfig::default());
        router(Scheduler::new(engine))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let store = Arc::new(MemoryStore::new());
        let response = app(&store)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_and_get_room() {
        let store = Arc::new(MemoryStore::new());
        let body = serde_json::json!({
            "id": "room-1",
            "players": [{"id": "a"}, {"id": "b", "display_name": "Bea"}],
            "win_threshold": 5
        });
        let response = app(&store)
            .oneshot(json_request("POST", "/api/rooms", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["status"], "waiting");
        assert_eq!(created["settings"]["win_threshold"], 5);
        assert_eq!(created["settings"]["min_players"], 3);

        let response = app(&store)
            .oneshot(Request::get("/api/rooms/room-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["players"][1]["display_name"], "Bea");
    }

    #[tokio::test]
    async fn test_create_room_requires_players() {
        let store = Arc::new(MemoryStore::new());
        let response = app(&store)
            .oneshot(json_request("POST", "/api/rooms", serde_json::json!({"players": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_activate_missing_room() {
        let store = Arc::new(MemoryStore::new());
        let response = app(&store)
            .oneshot(
                Request::post("/api/rooms/ghost/activate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_activate_publishes_change() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_room(Room::new("room", Vec::new(), RoomSettings::default()))
            .await
            .unwrap();
        let mut changes = store.subscribe_status_changes();

        let response = app(&store)
            .oneshot(
                Request::post("/api/rooms/room/activate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(changes.recv().await.unwrap().to, RoomStatus::Active);
    }

    fn player(id: &str) -> RoomPlayer {
        RoomPlayer {
            id: id.to_string(),
            display_name: None,
            connected: true,
        }
    }

    /// Active room with players a, b, c at round 2
    async fn room_in_round_two(store: &MemoryStore) {
        store
            .insert_room(Room::new(
                "room",
                vec![player("a"), player("b"), player("c")],
                RoomSettings::default(),
            ))
            .await
            .unwrap();
        store.set_status("room", RoomStatus::Active).await.unwrap();
        let prompt = Prompt {
            id: "p".to_string(),
            text: "Worst superpower".to_string(),
        };
        store.record_round_start("room", 2, &prompt).await.unwrap();
    }

    #[tokio::test]
    async fn test_vote_requires_round_in_progress() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_room(Room::new("room", vec![player("a")], RoomSettings::default()))
            .await
            .unwrap();
        let vote = serde_json::json!({"voter_id": "v", "candidate_id": "a"});

        let response = app(&store)
            .oneshot(json_request("POST", "/api/rooms/room/votes", vote.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        store.set_status("room", RoomStatus::Active).await.unwrap();
        let prompt = Prompt {
            id: "p".to_string(),
            text: "Worst superpower".to_string(),
        };
        store.record_round_start("room", 2, &prompt).await.unwrap();
        store
            .record_submission("room", 2, "a", "Sneezing glitter".to_string())
            .await
            .unwrap();

        let response = app(&store)
            .oneshot(json_request("POST", "/api/rooms/room/votes", vote))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let votes = store.votes("room", 2).await.unwrap();
        assert_eq!(votes.get("v").map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn test_vote_for_unknown_candidate_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        room_in_round_two(&store).await;

        let vote = serde_json::json!({"voter_id": "a", "candidate_id": "ghost"});
        let response = app(&store)
            .oneshot(json_request("POST", "/api/rooms/room/votes", vote))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.votes("room", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vote_needs_candidate_entry() {
        let store = Arc::new(MemoryStore::new());
        room_in_round_two(&store).await;

        // b is a player but submitted nothing this round
        let vote = serde_json::json!({"voter_id": "a", "candidate_id": "b"});
        let response = app(&store)
            .oneshot(json_request("POST", "/api/rooms/room/votes", vote))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(store.votes("room", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submission_from_outsider_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        room_in_round_two(&store).await;

        let entry = serde_json::json!({"player_id": "ghost", "text": "Hello"});
        let response = app(&store)
            .oneshot(json_request("POST", "/api/rooms/room/submissions", entry))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.submissions("room", 2).await.unwrap().is_empty());

        let entry = serde_json::json!({"player_id": "b", "text": "Hello"});
        let response = app(&store)
            .oneshot(json_request("POST", "/api/rooms/room/submissions", entry))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_round_state_not_found() {
        let store = Arc::new(MemoryStore::new());
        let response = app(&store)
            .oneshot(Request::get("/api/rooms/room/round").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("round state"));
    }

    #[tokio::test]
    async fn test_dead_letters_empty() {
        let store = Arc::new(MemoryStore::new());
        let response = app(&store)
            .oneshot(Request::get("/api/dead-letters").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }
}
