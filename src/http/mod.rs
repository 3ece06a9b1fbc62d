use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Extension, Path, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    domain::{MachineRecord, is_machine_id, validate_job_id, validate_location_id},
    identity::IdentityGateway,
    workflow::{FaultKind, MachineResult, ReservationWorkflow, ResultCode},
};


#[derive(Clone)]
pub struct AppState {
    pub workflow: ReservationWorkflow,
}

/// Wire form of every response, including auth failures and unmatched routes.
#[derive(Serialize)]
struct MachineResponse {
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    machine: Option<MachineRecord>,
}

impl IntoResponse for MachineResult {
    fn into_response(self) -> Response {
        let status_code = self.code.http_status();
        let status =
            StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = MachineResponse {
            status_code,
            machine: self.machine,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct RequestMachineRequest {
    location_id: String,
    job_id: String,
}

#[derive(Clone)]
struct TokenAuthState {
    identity: Arc<dyn IdentityGateway>,
}

/// Routes, in match order:
///
/// | method | path                 | operation         |
/// |--------|----------------------|-------------------|
/// | POST   | `/machine/request`   | `request_machine` |
/// | GET    | `/machine/:id`       | `get_machine`     |
/// | POST   | `/machine/:id/start` | `start_machine`   |
///
/// Every request, matched or not, passes the token check first.
pub fn build_router(workflow: ReservationWorkflow, identity: Arc<dyn IdentityGateway>) -> Router {
    let app_state = AppState { workflow };
    let auth_state = TokenAuthState { identity };

    Router::new()
        .route(
            "/machine/request",
            post(request_machine).fallback(unmatched_route),
        )
        .route(
            "/machine/:machine_id",
            get(get_machine).fallback(unmatched_route),
        )
        .route(
            "/machine/:machine_id/start",
            post(start_machine).fallback(unmatched_route),
        )
        .fallback(unmatched_route)
        .layer(middleware::from_fn_with_state(auth_state, token_auth))
        .layer(Extension(app_state))
}

async fn token_auth(
    State(auth): State<TokenAuthState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let token = bearer_token(req.headers());
    if auth.identity.validate_token(token).await {
        return next.run(req).await;
    }
    debug!(method = %req.method(), path = %req.uri().path(), "rejected token");
    MachineResult::fault(FaultKind::AuthFailure).into_response()
}

/// A missing or non-bearer header reads as the empty token.
fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default()
}

fn bad_request() -> MachineResult {
    MachineResult {
        code: ResultCode::BadRequest,
        machine: None,
    }
}

async fn request_machine(
    Extension(state): Extension<AppState>,
    body: Result<Json<RequestMachineRequest>, JsonRejection>,
) -> MachineResult {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "malformed request body");
            return bad_request();
        }
    };
    if let Err(e) = validate_location_id(&req.location_id).and(validate_job_id(&req.job_id)) {
        debug!(error = %e, "invalid request body");
        return bad_request();
    }

    state
        .workflow
        .request_machine(&req.location_id, &req.job_id)
        .await
}

async fn get_machine(
    Extension(state): Extension<AppState>,
    Path(machine_id): Path<String>,
) -> MachineResult {
    if !is_machine_id(&machine_id) {
        return unmatched_route().await;
    }
    state.workflow.get_machine(&machine_id).await
}

async fn start_machine(
    Extension(state): Extension<AppState>,
    Path(machine_id): Path<String>,
) -> MachineResult {
    if !is_machine_id(&machine_id) {
        return unmatched_route().await;
    }
    state.workflow.start_machine(&machine_id).await
}

async fn unmatched_route() -> MachineResult {
    MachineResult::fault(FaultKind::Transient)
}
