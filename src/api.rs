//! HTTP shell: axum router, handlers, and the response envelope.
//!
//! Every success body is `{"success": true, ...payload}`; every failure is
//! `{"success": false, "message": <string>}` with the status code derived
//! from the engine error taxonomy.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, MatchedPath, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;

pub enum ApiError {
    Engine(EngineError),
    /// Missing or malformed request body — a validation failure in the
    /// taxonomy, so it answers 400 in the same envelope.
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

/// `Json` with the rejection folded into the response envelope.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Validation(_) | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
        EngineError::Conflict(_)
        | EngineError::EmailTaken(_)
        | EngineError::PlateTaken(_)
        | EngineError::AlreadyReturned(_) => StatusCode::CONFLICT,
        EngineError::HasReservations(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
        EngineError::Wal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Engine(e) => {
                let status = status_for(&e);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("internal failure: {e}");
                }
                (status, e.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        let body = Json(json!({ "success": false, "message": message }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn router(engine: Arc<Engine>) -> Router {
    let api = Router::new()
        .route("/login", post(login))
        .route("/rooms", get(list_rooms))
        .route("/rooms/{id}", get(get_room))
        .route(
            "/room-reservations",
            get(list_room_reservations).post(create_room_reservation),
        )
        .route("/cars", get(list_cars))
        .route("/cars/{id}", get(get_car))
        .route(
            "/car-reservations",
            get(list_car_reservations).post(create_car_reservation),
        )
        .route("/car-return", put(return_car))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", put(update_user).delete(delete_user))
        .route("/user-reservations/{id}", get(user_reservations))
        .route("/health", get(health));

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let start = Instant::now();
    let response = next.run(req).await;

    metrics::counter!(
        observability::REQUESTS_TOTAL,
        "method" => method,
        "path" => path.clone(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "path" => path)
        .record(start.elapsed().as_secs_f64());

    response
}

// ── Handlers ─────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}

async fn login(
    State(engine): State<Arc<Engine>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let user = engine.login(&req.email, &req.password).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

async fn list_rooms(State(engine): State<Arc<Engine>>) -> Json<Value> {
    let rooms = engine.list_rooms().await;
    Json(json!({ "success": true, "rooms": rooms }))
}

async fn get_room(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<Id>,
) -> ApiResult<Json<Value>> {
    let room = engine.room(id).await?;
    Ok(Json(json!({ "success": true, "room": room })))
}

async fn list_room_reservations(
    State(engine): State<Arc<Engine>>,
    Query(filter): Query<RoomReservationFilter>,
) -> Json<Value> {
    let reservations = engine.list_room_reservations(filter).await;
    Json(json!({ "success": true, "reservations": reservations }))
}

async fn create_room_reservation(
    State(engine): State<Arc<Engine>>,
    ApiJson(req): ApiJson<NewRoomReservation>,
) -> ApiResult<Json<Value>> {
    let reservation = engine.create_room_reservation(req).await?;
    Ok(Json(json!({ "success": true, "reservation": reservation })))
}

async fn list_cars(State(engine): State<Arc<Engine>>) -> Json<Value> {
    let cars = engine.list_cars().await;
    Json(json!({ "success": true, "cars": cars }))
}

async fn get_car(State(engine): State<Arc<Engine>>, Path(id): Path<Id>) -> ApiResult<Json<Value>> {
    let car = engine.car(id).await?;
    Ok(Json(json!({ "success": true, "car": car })))
}

async fn list_car_reservations(
    State(engine): State<Arc<Engine>>,
    Query(filter): Query<CarReservationFilter>,
) -> Json<Value> {
    let reservations = engine.list_car_reservations(filter).await;
    Json(json!({ "success": true, "reservations": reservations }))
}

async fn create_car_reservation(
    State(engine): State<Arc<Engine>>,
    ApiJson(req): ApiJson<NewCarReservation>,
) -> ApiResult<Json<Value>> {
    let reservation = engine.create_car_reservation(req).await?;
    Ok(Json(json!({ "success": true, "reservation": reservation })))
}

async fn return_car(
    State(engine): State<Arc<Engine>>,
    ApiJson(req): ApiJson<CarReturnRequest>,
) -> ApiResult<Json<Value>> {
    let reservation = engine.return_car(req).await?;
    Ok(Json(json!({ "success": true, "reservation": reservation })))
}

async fn list_users(State(engine): State<Arc<Engine>>) -> Json<Value> {
    let users = engine.list_users().await;
    Json(json!({ "success": true, "users": users }))
}

async fn create_user(
    State(engine): State<Arc<Engine>>,
    ApiJson(req): ApiJson<NewUser>,
) -> ApiResult<Json<Value>> {
    let user = engine.create_user(req).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

async fn update_user(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<Id>,
    ApiJson(patch): ApiJson<UserPatch>,
) -> ApiResult<Json<Value>> {
    let user = engine.update_user(id, patch).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

async fn delete_user(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<Id>,
) -> ApiResult<Json<Value>> {
    let user = engine.delete_user(id).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

async fn user_reservations(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<Id>,
) -> ApiResult<Json<Value>> {
    let (car_reservations, room_reservations) = engine.user_reservations(id).await?;
    Ok(Json(json!({
        "success": true,
        "carReservations": car_reservations,
        "roomReservations": room_reservations,
    })))
}
