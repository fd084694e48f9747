use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::{BookingError, CreateRequest, Engine, UpdateRequest};
use crate::model::{ConflictInfo, ReservationView};

type ApiResult<T> = Result<T, BookingError>;

/// All routes, mounted under `/api`.
pub fn router(engine: Arc<Engine>) -> Router {
    let api = Router::new()
        .route("/bookings", get(list_active).post(create))
        .route("/bookings/{key}", get(list_room).patch(update))
        .route("/bookings/{key}/{edit_password}", patch(update_with_password))
        .route("/allBookings", get(list_all))
        .with_state(engine);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Serialize)]
struct ListBody {
    data: Vec<ReservationView>,
}

async fn list_active(State(engine): State<Arc<Engine>>) -> ApiResult<Json<ListBody>> {
    let data = engine.list_active(None).await?;
    Ok(Json(ListBody { data }))
}

async fn list_room(
    State(engine): State<Arc<Engine>>,
    Path(room): Path<String>,
) -> ApiResult<Json<ListBody>> {
    let data = engine.list_active(Some(&room)).await?;
    Ok(Json(ListBody { data }))
}

async fn list_all(State(engine): State<Arc<Engine>>) -> ApiResult<Json<ListBody>> {
    let data = engine.list_all().await?;
    Ok(Json(ListBody { data }))
}

async fn create(State(engine): State<Arc<Engine>>, body: Bytes) -> ApiResult<Response> {
    let req: CreateRequest = parse_body(&body)?;
    let created = engine.create(req).await?;
    let body = match created.ids.as_slice() {
        [id] => json!({ "id": id, "message": "Booking created" }),
        ids => json!({ "ids": ids, "message": format!("{} bookings created", ids.len()) }),
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn update(
    State(engine): State<Arc<Engine>>,
    Path(key): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    apply_update(&engine, &key, None, &body).await
}

async fn update_with_password(
    State(engine): State<Arc<Engine>>,
    Path((key, edit_password)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    apply_update(&engine, &key, Some(&edit_password), &body).await
}

async fn apply_update(
    engine: &Engine,
    id: &str,
    password: Option<&str>,
    body: &[u8],
) -> ApiResult<Response> {
    let req: UpdateRequest = parse_body(body)?;
    let updated = engine.update(id, password, req).await?;
    let message = if updated.cancelled {
        "Booking cancelled"
    } else {
        "Booking updated"
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "updatedCount": updated.updated_count,
    }))
    .into_response())
}

/// An empty body is an empty request; anything else must be a JSON object.
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, BookingError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| BookingError::MalformedBody(e.to_string()))
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    conflicts: Option<Vec<ConflictInfo>>,
}

fn status_of(err: &BookingError) -> StatusCode {
    match err {
        BookingError::MissingFields(_)
        | BookingError::MalformedBody(_)
        | BookingError::InvalidTime(_)
        | BookingError::UnknownRoom(_)
        | BookingError::Conflict(_)
        | BookingError::EmptyUpdate
        | BookingError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
        BookingError::WrongPassword => StatusCode::FORBIDDEN,
        BookingError::NotFound(_) | BookingError::UserNotFound(_) => StatusCode::NOT_FOUND,
        BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        let message = match &self {
            BookingError::Storage(e) => {
                tracing::error!("storage failure: {e}");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        let error = self.kind();
        let conflicts = match self {
            BookingError::Conflict(list) => Some(list),
            _ => None,
        };
        (
            status,
            Json(ErrorBody {
                error,
                message,
                conflicts,
            }),
        )
            .into_response()
    }
}
