use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::{FromRequest, Path, State},
    http::{Method, StatusCode},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use hearth_shared::{
    ActorRequest, AnswerRequest, CallId, CallSession, CreateGroupRequest, DeletedResponse,
    DirectMessage, GroupChat, GroupId, GroupMessage, GroupMessageRequest, IceCandidateRequest,
    InitiateCallRequest, LeaveResponse, MessageId, SendMessageRequest, UserId,
};
use hearth_store::Database;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            rate_limiter: RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst),
            config: Arc::new(config),
        }
    }

    /// Run a store operation under the connection lock. The guard never
    /// crosses an `.await`.
    fn store<T>(
        &self,
        op: impl FnOnce(&Database) -> hearth_store::Result<T>,
    ) -> Result<T, ServerError> {
        let db = self
            .db
            .lock()
            .map_err(|_| ServerError::Internal("database lock poisoned".into()))?;
        op(&db).map_err(ServerError::from)
    }
}

/// JSON body extractor whose rejections use the `{error}` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ServerError))]
pub struct ApiJson<T>(pub T);

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        // Direct messages. The path key is a username for GET and a
        // message id for DELETE.
        .route("/messages", post(send_message))
        .route("/messages/:key", get(list_messages).delete(delete_message))
        .route("/messages/:key/read", put(mark_read))
        // Group chats. Same convention: username for GET, group id otherwise.
        .route("/groupchats", post(create_group))
        .route("/groupchats/:key", get(list_groups).delete(delete_group))
        .route("/groupchats/:key/messages", post(post_group_message))
        .route("/groupchats/:key/leave", post(leave_group))
        // Call signaling.
        .route("/calls/initiate", post(initiate_call))
        .route("/calls/incoming/:key", get(incoming_call))
        .route("/calls/:key", get(get_call).delete(terminate_call))
        .route("/calls/:key/answer", post(answer_call))
        .route("/calls/:key/ice", post(add_ice_candidate))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    stale_call_secs: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        stale_call_secs: state.config.stale_call_secs,
    })
}

// ─── Direct messages ───

async fn list_messages(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<DirectMessage>>, ServerError> {
    let user = UserId::parse(&username)?;
    let messages = state.store(|db| db.direct_messages_for(&user))?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<(StatusCode, Json<DirectMessage>), ServerError> {
    let from = UserId::parse(&req.from)?;
    let to = UserId::parse(&req.to)?;
    let message = state.store(|db| db.insert_direct_message(&from, &to, &req.content))?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// The body is optional: legacy clients send none. When present it must be
/// a valid `{username}`, and only the recipient may mark the message read.
async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<DirectMessage>, ServerError> {
    let id = MessageId::parse(&id)?;
    let reader = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let req: ActorRequest = serde_json::from_slice(&body)
            .map_err(|e| ServerError::BadRequest(format!("Invalid request body: {e}")))?;
        Some(UserId::parse(&req.username)?)
    };
    let message = state.store(|db| db.mark_read(id, reader.as_ref()))?;
    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> Result<Json<DeletedResponse>, ServerError> {
    let id = MessageId::parse(&id)?;
    let requester = UserId::parse(&req.username)?;
    state.store(|db| db.delete_direct_message(id, &requester))?;

    info!(message = %id, by = %requester, "Message deleted via API");
    Ok(Json(DeletedResponse { deleted: true }))
}

// ─── Group chats ───

async fn create_group(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupChat>), ServerError> {
    let created_by = UserId::parse(&req.created_by)?;
    let members = req
        .members
        .iter()
        .map(|m| UserId::parse(m))
        .collect::<Result<Vec<_>, _>>()?;

    let group = state.store(|db| db.create_group(&req.name, &members, &created_by))?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn list_groups(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<GroupChat>>, ServerError> {
    let user = UserId::parse(&username)?;
    let groups = state.store(|db| db.groups_for(&user))?;
    Ok(Json(groups))
}

async fn post_group_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<GroupMessageRequest>,
) -> Result<(StatusCode, Json<GroupMessage>), ServerError> {
    let id = GroupId::parse(&id)?;
    let from = UserId::parse(&req.from)?;
    let message = state.store(|db| db.append_group_message(id, &from, &req.content))?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn leave_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> Result<Json<LeaveResponse>, ServerError> {
    let id = GroupId::parse(&id)?;
    let user = UserId::parse(&req.username)?;
    let outcome = state.store(|db| db.leave_group(id, &user))?;
    Ok(Json(LeaveResponse {
        left: true,
        dissolved: outcome.dissolved,
    }))
}

async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> Result<Json<DeletedResponse>, ServerError> {
    let id = GroupId::parse(&id)?;
    let requester = UserId::parse(&req.username)?;
    state.store(|db| db.delete_group(id, &requester))?;
    Ok(Json(DeletedResponse { deleted: true }))
}

// ─── Call signaling ───

async fn initiate_call(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<InitiateCallRequest>,
) -> Result<(StatusCode, Json<CallSession>), ServerError> {
    let from = UserId::parse(&req.from)?;
    let to = UserId::parse(&req.to)?;
    let session = state.store(|db| db.initiate_call(&from, &to, &req.offer))?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Serializes to `null` when nothing is ringing for the user.
async fn incoming_call(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Option<CallSession>>, ServerError> {
    let user = UserId::parse(&username)?;
    let session = state.store(|db| db.incoming_call(&user))?;
    Ok(Json(session))
}

async fn get_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CallSession>, ServerError> {
    let id = CallId::parse(&id)?;
    Ok(Json(state.store(|db| db.get_call(id))?))
}

async fn answer_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<AnswerRequest>,
) -> Result<Json<CallSession>, ServerError> {
    let id = CallId::parse(&id)?;
    Ok(Json(state.store(|db| db.submit_answer(id, &req.answer))?))
}

async fn add_ice_candidate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<IceCandidateRequest>,
) -> Result<Json<CallSession>, ServerError> {
    let id = CallId::parse(&id)?;
    Ok(Json(
        state.store(|db| db.append_ice_candidate(id, &req.candidate))?,
    ))
}

async fn terminate_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ServerError> {
    let id = CallId::parse(&id)?;
    state.store(|db| db.terminate_call(id))?;
    Ok(Json(DeletedResponse { deleted: true }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let db = Database::open_in_memory().unwrap();
        build_router(AppState::new(db, ServerConfig::default()))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = send(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn direct_message_lifecycle() {
        let app = app();

        let (status, sent) = send(
            &app,
            Method::POST,
            "/messages",
            Some(json!({"from": "alice", "to": "bob", "content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sent["read"], false);
        let id = sent["id"].as_str().unwrap().to_string();

        for user in ["alice", "bob"] {
            let (status, list) = send(&app, Method::GET, &format!("/messages/{user}"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(list.as_array().unwrap().len(), 1);
        }

        let (status, read) = send(&app, Method::PUT, &format!("/messages/{id}/read"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["read"], true);
        let (status, _) = send(&app, Method::PUT, &format!("/messages/{id}/read"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            Method::DELETE,
            &format!("/messages/{id}"),
            Some(json!({"username": "bob"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("sender"));

        let (status, body) = send(
            &app,
            Method::DELETE,
            &format!("/messages/{id}"),
            Some(json!({"username": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);

        let (_, list) = send(&app, Method::GET, "/messages/bob", None).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_receipt_from_sender_is_forbidden() {
        let app = app();
        let (_, sent) = send(
            &app,
            Method::POST,
            "/messages",
            Some(json!({"from": "alice", "to": "bob", "content": "hi"})),
        )
        .await;
        let id = sent["id"].as_str().unwrap();

        let (status, _) = send(
            &app,
            Method::PUT,
            &format!("/messages/{id}/read"),
            Some(json!({"username": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn read_receipt_with_misspelled_body_is_rejected() {
        let app = app();
        let (_, sent) = send(
            &app,
            Method::POST,
            "/messages",
            Some(json!({"from": "alice", "to": "bob", "content": "hi"})),
        )
        .await;
        let id = sent["id"].as_str().unwrap();

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/messages/{id}/read"),
            Some(json!({"usrname": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("username"));

        let (_, list) = send(&app, Method::GET, "/messages/bob", None).await;
        assert_eq!(list[0]["read"], false);

        let (status, read) = send(
            &app,
            Method::PUT,
            &format!("/messages/{id}/read"),
            Some(json!({"username": "bob"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["read"], true);
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        let app = app();

        let (status, body) = send(&app, Method::POST, "/messages", Some(json!({"from": "alice"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = send(
            &app,
            Method::POST,
            "/messages",
            Some(json!({"from": "alice", "to": "bob", "content": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message content must not be empty");

        let (status, _) = send(&app, Method::PUT, "/messages/not-a-uuid/read", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_resources_are_not_found() {
        let app = app();
        let missing = CallId::new();

        let (status, body) = send(&app, Method::GET, &format!("/calls/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Call not found");

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/groupchats/{}/messages", GroupId::new()),
            Some(json!({"from": "alice", "content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn group_chat_lifecycle() {
        let app = app();

        let (status, group) = send(
            &app,
            Method::POST,
            "/groupchats",
            Some(json!({"name": "Family", "members": ["dad", "kid"], "createdBy": "mom"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(group["members"], json!(["mom", "dad", "kid"]));
        let id = group["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/groupchats/{id}/messages"),
            Some(json!({"from": "kid", "content": "pizza?"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/groupchats/{id}/messages"),
            Some(json!({"from": "stranger", "content": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, groups) = send(&app, Method::GET, "/groupchats/dad", None).await;
        assert_eq!(groups[0]["messages"][0]["content"], "pizza?");

        let (status, _) = send(
            &app,
            Method::DELETE,
            &format!("/groupchats/{id}"),
            Some(json!({"username": "dad"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, left) = send(
            &app,
            Method::POST,
            &format!("/groupchats/{id}/leave"),
            Some(json!({"username": "dad"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(left, json!({"left": true, "dissolved": false}));

        let (status, _) = send(
            &app,
            Method::DELETE,
            &format!("/groupchats/{id}"),
            Some(json!({"username": "mom"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, groups) = send(&app, Method::GET, "/groupchats/kid", None).await;
        assert!(groups.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn call_signaling_flow() {
        let app = app();
        let offer = json!({"type": "offer", "sdp": "v=0 offer"});

        let (status, _) = send(&app, Method::GET, "/calls/incoming/bob", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, session) = send(
            &app,
            Method::POST,
            "/calls/initiate",
            Some(json!({"from": "alice", "to": "bob", "offer": offer})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = session["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            Method::POST,
            "/calls/initiate",
            Some(json!({"from": "carol", "to": "bob", "offer": offer})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, incoming) = send(&app, Method::GET, "/calls/incoming/bob", None).await;
        assert_eq!(incoming["id"], id.as_str());
        assert_eq!(incoming["offer"]["sdp"], "v=0 offer");

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/calls/{id}/ice"),
            Some(json!({"candidate": {"candidate": "candidate:1", "sdpMid": "0", "sdpMLineIndex": 0}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, answered) = send(
            &app,
            Method::POST,
            &format!("/calls/{id}/answer"),
            Some(json!({"answer": {"type": "answer", "sdp": "v=0 answer"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answered["answer"]["type"], "answer");
        assert_eq!(answered["iceCandidates"][0]["sdpMLineIndex"], 0);

        let (_, incoming) = send(&app, Method::GET, "/calls/incoming/bob", None).await;
        assert!(incoming.is_null());

        let (status, _) = send(&app, Method::DELETE, &format!("/calls/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Method::GET, &format!("/calls/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
