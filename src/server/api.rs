use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use previewd_common::{ContainerRecord, InstanceSpec, PreviewError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error::ApiError;
use super::extract::{ApiJson, Caller, ContainerContext};
use crate::auth::AuthorizationGate;
use crate::config::Environment;
use crate::orchestrator::ContainerOrchestrator;
use crate::resolver::SubdomainResolver;
use crate::storage::Store;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: Store,
    pub gate: AuthorizationGate,
    pub resolver: SubdomainResolver,
    pub orchestrator: ContainerOrchestrator,
    pub base_domain: String,
    pub environment: Environment,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AuthorizeRequest {
    pub subdomain: String,
    pub password: String,
}

#[derive(Deserialize, Default)]
pub struct CreateUserRequest {
    pub name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub text: String,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub blob: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCommentRequest {
    pub comment_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub emoji: String,
    pub comment_id: String,
}

#[derive(Deserialize)]
pub struct QuestionRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub blob: Value,
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub order: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub question_id: String,
    #[serde(default)]
    pub blob: Value,
}

// ── Response types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub id: String,
    pub subdomain: String,
    pub name: String,
    pub url: String,
    pub owner: String,
    pub state: String,
    pub created_at: String,
}

impl From<ContainerRecord> for ContainerInfo {
    fn from(record: ContainerRecord) -> Self {
        let name = record
            .blob
            .get("name")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| record.subdomain.clone());
        Self {
            id: record.id,
            subdomain: record.subdomain,
            name,
            url: record.url,
            owner: record.owner_user_id,
            state: record.state.as_str().to_string(),
            created_at: record.created_at,
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/instances", get(list_instances))
        .route("/api/instances/new", post(create_instance))
        .route("/api/instances/mine", get(my_instances))
        .route("/api/instances/logs/{name}", get(instance_logs))
        .route("/api/instances/{id}/stop", post(stop_instance))
        .route("/api/instances/{id}", delete(delete_instance))
        .route("/api/authorization", post(authorize_instance))
        .route("/api/users", post(create_user))
        .route("/api/users/role", get(user_role))
        .route(
            "/api/comments",
            get(list_comments).post(create_comment).delete(delete_comment),
        )
        .route("/api/comments/{thread_id}", get(thread_comments))
        .route("/api/reactions", post(add_reaction).delete(remove_reaction))
        .route("/api/questions", get(list_questions).post(create_question))
        .route("/api/questions/answers", get(questions_with_answers))
        .route("/api/questions/order", put(reorder_questions))
        .route(
            "/api/questions/{id}",
            put(edit_question).delete(delete_question),
        )
        .route("/api/answers", post(submit_answer))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_instances(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let containers = state.orchestrator.list_running().await?;
    Ok(Json(containers))
}

async fn create_instance(
    State(state): State<SharedState>,
    caller: Caller,
    ApiJson(spec): ApiJson<InstanceSpec>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .orchestrator
        .create_instance(&caller.primary.id, spec)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "containerInfo": ContainerInfo::from(record) })),
    ))
}

async fn my_instances(
    State(state): State<SharedState>,
    caller: Caller,
) -> Result<impl IntoResponse, ApiError> {
    let mut containers = Vec::new();
    for identity in caller.identities.iter() {
        let owned = state.orchestrator.list_for_owner(&identity.id).await?;
        containers.extend(owned.into_iter().map(ContainerInfo::from));
    }
    Ok(Json(containers))
}

async fn instance_logs(
    State(state): State<SharedState>,
    _caller: Caller,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = state.orchestrator.logs(&name).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], logs))
}

async fn stop_instance(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let route = state.orchestrator.route(&id).await?;
    state.gate.require_owner(&caller.identities, &route)?;
    let record = state.orchestrator.stop_instance(&id).await?;
    Ok(Json(json!({ "containerInfo": ContainerInfo::from(record) })))
}

async fn delete_instance(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let route = match state.orchestrator.route(&id).await {
        Ok(route) => route,
        // Already gone: deleting twice is a no-op.
        Err(PreviewError::NotFound { .. }) => return Ok(Json(json!({ "removed": false }))),
        Err(e) => return Err(e.into()),
    };
    state.gate.require_owner(&caller.identities, &route)?;
    let removed = state.orchestrator.delete_instance(&id).await?;
    Ok(Json(json!({ "removed": removed })))
}

async fn authorize_instance(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<AuthorizeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state
        .gate
        .authorize_instance(&req.subdomain, &req.password)
        .await?;
    Ok(Json(json!({ "token": token })))
}

async fn create_user(
    State(state): State<SharedState>,
    body: Option<ApiJson<CreateUserRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|ApiJson(req)| req).unwrap_or_default();
    let name = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let credentials = state.store.add_user(name).await?;
    Ok((StatusCode::CREATED, Json(credentials)))
}

async fn user_role(
    State(state): State<SharedState>,
    caller: Caller,
    ctx: ContainerContext,
) -> Result<impl IntoResponse, ApiError> {
    let role = state.gate.role_for(&caller.primary.id, &ctx.route);
    Ok(Json(json!({ "role": role })))
}

async fn list_comments(
    State(state): State<SharedState>,
    _caller: Caller,
    ctx: ContainerContext,
) -> Result<impl IntoResponse, ApiError> {
    let comments = state.store.get_comments(ctx.container_id()).await?;
    Ok(Json(comments))
}

async fn thread_comments(
    State(state): State<SharedState>,
    _caller: Caller,
    ctx: ContainerContext,
    Path(thread_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let comments = state
        .store
        .get_thread_comments(ctx.container_id(), &thread_id)
        .await?;
    Ok(Json(comments))
}

async fn create_comment(
    State(state): State<SharedState>,
    caller: Caller,
    ctx: ContainerContext,
    ApiJson(req): ApiJson<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.text.trim().is_empty() {
        return Err(PreviewError::bad_request("Comment text is required").into());
    }
    let thread_id = match req.thread_id {
        Some(thread_id) => {
            let owner = state.store.thread_container(&thread_id).await?;
            if owner.as_deref() != Some(ctx.container_id()) {
                return Err(PreviewError::not_found("thread", thread_id).into());
            }
            thread_id
        }
        None => state.store.add_thread(ctx.container_id(), &req.blob).await?,
    };
    let id = state
        .store
        .add_comment(&thread_id, &caller.primary.id, &req.text, &req.blob)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": id, "threadId": thread_id })),
    ))
}

async fn delete_comment(
    State(state): State<SharedState>,
    caller: Caller,
    ctx: ContainerContext,
    ApiJson(req): ApiJson<DeleteCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .gate
        .delete_comment(&caller.identities, &ctx.route, &req.comment_id)
        .await?;
    Ok(Json(json!({ "delRows": deleted })))
}

async fn add_reaction(
    State(state): State<SharedState>,
    caller: Caller,
    ctx: ContainerContext,
    ApiJson(req): ApiJson<ReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.emoji.trim().is_empty() {
        return Err(PreviewError::bad_request("Emoji is required").into());
    }
    let owner = state.store.comment_container(&req.comment_id).await?;
    if owner.as_deref() != Some(ctx.container_id()) {
        return Err(PreviewError::not_found("comment", req.comment_id).into());
    }
    let id = state
        .store
        .add_reaction(&req.comment_id, &caller.primary.id, &req.emoji)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn remove_reaction(
    State(state): State<SharedState>,
    caller: Caller,
    ctx: ContainerContext,
    ApiJson(req): ApiJson<ReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = state.store.comment_container(&req.comment_id).await?;
    if owner.as_deref() != Some(ctx.container_id()) {
        return Err(PreviewError::not_found("comment", req.comment_id).into());
    }
    let deleted = state
        .store
        .delete_reaction(&req.emoji, &caller.primary.id, &req.comment_id)
        .await?;
    Ok(Json(json!({ "delRows": deleted })))
}

async fn list_questions(
    State(state): State<SharedState>,
    _caller: Caller,
    ctx: ContainerContext,
) -> Result<impl IntoResponse, ApiError> {
    let questions = state.store.get_questions(ctx.container_id()).await?;
    Ok(Json(questions))
}

async fn questions_with_answers(
    State(state): State<SharedState>,
    _caller: Caller,
    ctx: ContainerContext,
) -> Result<impl IntoResponse, ApiError> {
    let questions = state
        .store
        .get_questions_with_answers(ctx.container_id())
        .await?;
    Ok(Json(questions))
}

async fn create_question(
    State(state): State<SharedState>,
    caller: Caller,
    ctx: ContainerContext,
    ApiJson(req): ApiJson<QuestionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.require_owner(&caller.identities, &ctx.route)?;
    if req.text.trim().is_empty() || req.kind.trim().is_empty() {
        return Err(PreviewError::bad_request("Question type and text are required").into());
    }
    let question = state
        .store
        .add_question(
            ctx.container_id(),
            Some(&caller.primary.id),
            &req.kind,
            &req.text,
            &req.blob,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(question)))
}

async fn edit_question(
    State(state): State<SharedState>,
    caller: Caller,
    ctx: ContainerContext,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<QuestionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.require_owner(&caller.identities, &ctx.route)?;
    let updated = state
        .store
        .edit_question(ctx.container_id(), &id, &req.kind, &req.text, &req.blob)
        .await?;
    if updated == 0 {
        return Err(PreviewError::not_found("question", id).into());
    }
    let question = state
        .store
        .get_question(ctx.container_id(), &id)
        .await?
        .ok_or_else(|| PreviewError::not_found("question", id.clone()))?;
    Ok(Json(question))
}

async fn delete_question(
    State(state): State<SharedState>,
    caller: Caller,
    ctx: ContainerContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.require_owner(&caller.identities, &ctx.route)?;
    let deleted = state.store.remove_question(ctx.container_id(), &id).await?;
    if deleted == 0 {
        return Err(PreviewError::not_found("question", id).into());
    }
    Ok(Json(json!({ "delRows": deleted })))
}

async fn reorder_questions(
    State(state): State<SharedState>,
    caller: Caller,
    ctx: ContainerContext,
    ApiJson(req): ApiJson<ReorderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.require_owner(&caller.identities, &ctx.route)?;
    let updated = state
        .store
        .reorder_questions(ctx.container_id(), &req.order)
        .await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn submit_answer(
    State(state): State<SharedState>,
    caller: Caller,
    ctx: ContainerContext,
    ApiJson(req): ApiJson<AnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = state.store.question_container(&req.question_id).await?;
    if owner.as_deref() != Some(ctx.container_id()) {
        return Err(PreviewError::not_found("question", req.question_id).into());
    }
    let id = state
        .store
        .upsert_answer(&req.question_id, &caller.primary.id, &req.blob)
        .await?;
    Ok(Json(json!({ "id": id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::SandboxConfig;
    use crate::orchestrator::runtime::fake::FakeRuntime;
    use crate::server::extract::IDENTITY_HEADER;
    use crate::storage::StorageBackend;
    use crate::storage::schema::{
        FIXTURE_GUEST_ID, FIXTURE_GUEST_SECRET, FIXTURE_OWNER_ID, FIXTURE_OWNER_SECRET,
        FIXTURE_PASSWORD,
    };
    use crate::storage::sqlite::SqliteBackend;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const HOST: &str = "one.localhost";

    async fn test_state() -> SharedState {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.initialize(true).await.unwrap();
        let store = Store::new(Arc::new(backend));
        let runtime = Arc::new(FakeRuntime::new());
        Arc::new(AppState {
            gate: AuthorizationGate::new(store.clone(), "test-secret", chrono::Duration::hours(1)),
            resolver: SubdomainResolver::new(store.clone()),
            orchestrator: ContainerOrchestrator::new(
                store.clone(),
                runtime,
                SandboxConfig::default(),
            ),
            store,
            base_domain: "localhost".to_string(),
            environment: Environment::Production,
        })
    }

    async fn test_app() -> Router {
        api_router().with_state(test_state().await)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn owner() -> String {
        format!("{}:{}", FIXTURE_OWNER_ID, FIXTURE_OWNER_SECRET)
    }

    fn guest() -> String {
        format!("{}:{}", FIXTURE_GUEST_ID, FIXTURE_GUEST_SECRET)
    }

    fn request(method: &str, uri: &str, identities: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, HOST);
        if let Some(identities) = identities {
            builder = builder.header(IDENTITY_HEADER, identities);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    // 1. Health check
    #[tokio::test]
    async fn test_health_check() {
        let app = test_app().await;
        let response = app
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
    }

    // 2. Identities
    #[tokio::test]
    async fn test_create_user_returns_credentials() {
        let app = test_app().await;
        let response = app
            .oneshot(request("POST", "/api/users", None, Some(json!({"name": "rev"}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["id"].as_str().unwrap().len(), 8);
        assert_eq!(body["secret"].as_str().unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_create_user_without_body() {
        let app = test_app().await;
        let response = app
            .oneshot(request("POST", "/api/users", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_missing_or_forged_identity_is_401() {
        let state = test_state().await;
        let app = api_router().with_state(state);
        let response = app
            .clone()
            .oneshot(request("GET", "/api/comments", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let forged = format!("{},{}:nope", owner(), FIXTURE_GUEST_ID);
        let response = app
            .oneshot(request("GET", "/api/comments", Some(&forged), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_user_role() {
        let app = test_app().await;
        let response = app
            .clone()
            .oneshot(request("GET", "/api/users/role", Some(&owner()), None))
            .await
            .unwrap();
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["role"], "dev");

        let response = app
            .oneshot(request("GET", "/api/users/role", Some(&guest()), None))
            .await
            .unwrap();
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["role"], "user");
    }

    #[tokio::test]
    async fn test_unknown_subdomain_is_404() {
        let app = test_app().await;
        let req = Request::builder()
            .uri("/api/comments")
            .header(header::HOST, "nope.localhost")
            .header(IDENTITY_HEADER, owner())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // 3. Comments and reactions
    #[tokio::test]
    async fn test_comment_lifecycle() {
        let app = test_app().await;
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/comments",
                Some(&guest()),
                Some(json!({"text": "Button is off by 2px", "blob": {"x": 10}})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Value = body_json(response.into_body()).await;
        let comment_id = created["id"].as_str().unwrap().to_string();
        let thread_id = created["threadId"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/reactions",
                Some(&owner()),
                Some(json!({"emoji": "👍", "commentId": comment_id})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/comments/{}", thread_id),
                Some(&guest()),
                None,
            ))
            .await
            .unwrap();
        let comments: Value = body_json(response.into_body()).await;
        assert_eq!(comments.as_array().unwrap().len(), 1);
        assert_eq!(comments[0]["text"], "Button is off by 2px");
        assert_eq!(comments[0]["reactions"][0]["emoji"], "👍");

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                "/api/reactions",
                Some(&owner()),
                Some(json!({"emoji": "👍", "commentId": comment_id})),
            ))
            .await
            .unwrap();
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["delRows"], 1);

        let response = app
            .oneshot(request(
                "DELETE",
                "/api/comments",
                Some(&guest()),
                Some(json!({"commentId": comment_id})),
            ))
            .await
            .unwrap();
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["delRows"], 1);
    }

    #[tokio::test]
    async fn test_comment_on_foreign_thread_is_404() {
        let app = test_app().await;
        let response = app
            .oneshot(request(
                "POST",
                "/api/comments",
                Some(&guest()),
                Some(json!({"text": "hi", "threadId": "deadbeef"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reaction_delete_is_scoped_to_addressed_instance() {
        let state = test_state().await;
        let other = state
            .orchestrator
            .create_instance(
                FIXTURE_GUEST_ID,
                InstanceSpec {
                    source_url: "https://git.example.com/app.git".into(),
                    git_ref: "main".into(),
                    name: "two".into(),
                    port: 3000,
                    kind: "node".into(),
                    password: None,
                },
            )
            .await
            .unwrap();
        let thread = state.store.add_thread(&other.id, &json!({})).await.unwrap();
        let comment = state
            .store
            .add_comment(&thread, FIXTURE_GUEST_ID, "elsewhere", &json!({}))
            .await
            .unwrap();
        state
            .store
            .add_reaction(&comment, FIXTURE_GUEST_ID, "🎉")
            .await
            .unwrap();

        // Addressed through "one", the comment lives on "two".
        let app = api_router().with_state(state.clone());
        let response = app
            .oneshot(request(
                "DELETE",
                "/api/reactions",
                Some(&guest()),
                Some(json!({"emoji": "🎉", "commentId": comment})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.store.get_comment_reactions(&comment).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_someone_elses_comment_is_silent() {
        let app = test_app().await;
        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                "/api/comments",
                Some(&guest()),
                Some(json!({"commentId": "1bd8052b"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["delRows"], 0);

        let response = app
            .oneshot(request("GET", "/api/comments", Some(&guest()), None))
            .await
            .unwrap();
        let comments: Value = body_json(response.into_body()).await;
        assert_eq!(comments.as_array().unwrap().len(), 1);
    }

    // 4. Questions and answers
    #[tokio::test]
    async fn test_question_management_is_owner_only() {
        let app = test_app().await;
        let response = app
            .oneshot(request(
                "POST",
                "/api/questions",
                Some(&guest()),
                Some(json!({"type": "text", "text": "Sneaky?"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_questions_reorder_and_answers() {
        let app = test_app().await;
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/questions",
                Some(&owner()),
                Some(json!({"type": "rating", "text": "How fast?"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let question: Value = body_json(response.into_body()).await;
        assert_eq!(question["order"], 1);
        let new_id = question["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/questions/order",
                Some(&owner()),
                Some(json!({"order": [new_id, "9a8b7c6d"]})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/questions/order",
                Some(&owner()),
                Some(json!({"order": ["bad id"]})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/answers",
                Some(&guest()),
                Some(json!({"questionId": new_id, "blob": {"value": 5}})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/api/questions/answers", Some(&owner()), None))
            .await
            .unwrap();
        let questions: Value = body_json(response.into_body()).await;
        assert_eq!(questions[0]["id"], new_id.as_str());
        assert_eq!(questions[0]["answers"][0]["blob"]["value"], 5);
        assert_eq!(questions[1]["id"], "9a8b7c6d");
        assert!(questions[1]["answers"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_and_delete_question() {
        let app = test_app().await;
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/questions/9a8b7c6d",
                Some(&owner()),
                Some(json!({"type": "text", "text": "Reworded?"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let question: Value = body_json(response.into_body()).await;
        assert_eq!(question["text"], "Reworded?");

        let response = app
            .clone()
            .oneshot(request("DELETE", "/api/questions/9a8b7c6d", Some(&owner()), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("DELETE", "/api/questions/9a8b7c6d", Some(&owner()), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // 5. Instances
    #[tokio::test]
    async fn test_instance_lifecycle() {
        let app = test_app().await;
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/instances/new",
                Some(&guest()),
                Some(json!({
                    "sourceUrl": "https://git.example.com/app.git",
                    "ref": "feature/login",
                    "name": "login-page",
                    "port": 3000,
                    "type": "node"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = body_json(response.into_body()).await;
        let info = &body["containerInfo"];
        assert_eq!(info["subdomain"], "login-page");
        assert_eq!(info["owner"], FIXTURE_GUEST_ID);
        assert_eq!(info["state"], "running");
        let id = info["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request("GET", "/api/instances/mine", Some(&guest()), None))
            .await
            .unwrap();
        let mine: Value = body_json(response.into_body()).await;
        assert_eq!(mine.as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                "/api/instances/logs/login-page",
                Some(&guest()),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );

        // Non-owner cannot stop or delete.
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/instances/{}/stop", id),
                Some(&owner()),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/instances/{}/stop", id),
                Some(&guest()),
                None,
            ))
            .await
            .unwrap();
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["containerInfo"]["state"], "stopped");

        for expected in [true, false] {
            let response = app
                .clone()
                .oneshot(request(
                    "DELETE",
                    &format!("/api/instances/{}", id),
                    Some(&guest()),
                    None,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body: Value = body_json(response.into_body()).await;
            assert_eq!(body["removed"], expected);
        }

        let response = app
            .oneshot(request("GET", "/api/instances", None, None))
            .await
            .unwrap();
        let all: Value = body_json(response.into_body()).await;
        assert!(all.as_array().unwrap().iter().all(|c| c["id"] != id.as_str()));
    }

    #[tokio::test]
    async fn test_create_instance_rejects_bad_name() {
        let app = test_app().await;
        let response = app
            .oneshot(request(
                "POST",
                "/api/instances/new",
                Some(&owner()),
                Some(json!({
                    "sourceUrl": "https://git.example.com/app.git",
                    "ref": "main",
                    "name": "-nope-",
                    "port": 3000,
                    "type": "node"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert!(body["errors"]["message"].as_str().unwrap().contains("Instance name"));
    }

    #[tokio::test]
    async fn test_create_instance_missing_field_is_400() {
        let app = test_app().await;
        let response = app
            .oneshot(request(
                "POST",
                "/api/instances/new",
                Some(&owner()),
                Some(json!({
                    "sourceUrl": "https://git.example.com/app.git",
                    "ref": "main",
                    "port": 3000,
                    "type": "node"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert!(body["errors"]["message"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let app = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/users")
            .header(header::HOST, HOST)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"name\":"))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert!(body["errors"]["message"].is_string());
    }

    #[tokio::test]
    async fn test_create_instance_on_taken_subdomain_is_409() {
        let app = test_app().await;
        let response = app
            .oneshot(request(
                "POST",
                "/api/instances/new",
                Some(&owner()),
                Some(json!({
                    "sourceUrl": "https://git.example.com/app.git",
                    "ref": "main",
                    "name": "one",
                    "port": 3000,
                    "type": "node"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    // 6. Instance passwords
    #[tokio::test]
    async fn test_authorization_endpoint() {
        let state = test_state().await;
        let app = api_router().with_state(state.clone());
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/authorization",
                None,
                Some(json!({"subdomain": "one", "password": FIXTURE_PASSWORD})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = body_json(response.into_body()).await;
        let claims = state
            .gate
            .verify_access_token(body["token"].as_str().unwrap())
            .unwrap();
        assert_eq!(claims.sub, "one");

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/authorization",
                None,
                Some(json!({"subdomain": "ONE", "password": FIXTURE_PASSWORD})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(
                "POST",
                "/api/authorization",
                None,
                Some(json!({"subdomain": "one", "password": "nope"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
