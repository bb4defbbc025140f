use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State as AxumState,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use stakebook_execution::Store;
use stakebook_types::{
    EventWagerIntent, Identity, Intent, LedgerError, OwnerId, RoundWagerIntent, WagerId,
    MAX_OWNER_ID_LEN,
};
use std::sync::Arc;

use crate::Simulator;

const OWNER_HEADER: &str = "x-owner-id";
const PROFILE_HEADER: &str = "x-profile-complete";
const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

type SharedSimulator<S> = AxumState<Arc<Simulator<S>>>;

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    kind: &'a str,
    message: String,
}

#[derive(Deserialize)]
pub(super) struct AddFundsRequest {
    amount: f64,
}

/// Failure of an API call, rendered as `{code, kind, message}`.
#[derive(Debug)]
pub(super) enum ApiError {
    Unauthenticated(&'static str),
    Rejected(StatusCode, String),
    Ledger(LedgerError),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, kind, message) = match self {
            ApiError::Unauthenticated(message) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "request",
                message.to_string(),
            ),
            ApiError::Rejected(status, message) => (status, "BAD_REQUEST", "request", message),
            ApiError::Ledger(err) => {
                let kind = err.kind();
                let status = match err {
                    LedgerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    LedgerError::State(_) => StatusCode::CONFLICT,
                    LedgerError::Infrastructure(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.code(), kind.as_str(), err.to_string())
            }
        };
        (status, Json(ErrorBody { code, kind, message })).into_response()
    }
}

/// Identity asserted by the upstream authentication layer.
fn identity(headers: &HeaderMap) -> Result<Identity, ApiError> {
    let owner = headers
        .get(OWNER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::Unauthenticated("missing x-owner-id header"))?;
    if owner.len() > MAX_OWNER_ID_LEN {
        return Err(ApiError::Unauthenticated("x-owner-id header is too long"));
    }
    let profile_complete = headers
        .get(PROFILE_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| matches!(value, "1" | "true" | "TRUE" | "yes" | "YES"));
    Ok(Identity::new(OwnerId::from(owner), profile_complete))
}

async fn dispatch<S: Store + 'static>(
    simulator: &Simulator<S>,
    headers: &HeaderMap,
    intent: Intent,
) -> Result<Response, ApiError> {
    let identity = identity(headers)?;
    let receipt = simulator.dispatch(&identity, intent).await?;
    Ok(Json(receipt).into_response())
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn metrics<S: Store + 'static>(
    AxumState(simulator): SharedSimulator<S>,
) -> Response {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(OPENMETRICS_CONTENT_TYPE),
        )],
        simulator.metrics().render(),
    )
        .into_response()
}

pub(super) async fn wallet<S: Store + 'static>(
    AxumState(simulator): SharedSimulator<S>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let identity = identity(&headers)?;
    let view = simulator.view(&identity).await?;
    Ok(Json(view).into_response())
}

/// Generic intent endpoint; the body is a tagged [`Intent`].
pub(super) async fn intent<S: Store + 'static>(
    AxumState(simulator): SharedSimulator<S>,
    headers: HeaderMap,
    body: Result<Json<Intent>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(intent) = body?;
    dispatch(&simulator, &headers, intent).await
}

pub(super) async fn add_funds<S: Store + 'static>(
    AxumState(simulator): SharedSimulator<S>,
    headers: HeaderMap,
    body: Result<Json<AddFundsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    dispatch(
        &simulator,
        &headers,
        Intent::AddFunds {
            amount: request.amount,
        },
    )
    .await
}

pub(super) async fn place_event_wager<S: Store + 'static>(
    AxumState(simulator): SharedSimulator<S>,
    headers: HeaderMap,
    body: Result<Json<EventWagerIntent>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(intent) = body?;
    dispatch(&simulator, &headers, Intent::PlaceEventWager(intent)).await
}

pub(super) async fn withdraw_event_wager<S: Store + 'static>(
    AxumState(simulator): SharedSimulator<S>,
    headers: HeaderMap,
    id: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let wager_id = id.parse::<WagerId>().map_err(|err| {
        ApiError::Rejected(StatusCode::BAD_REQUEST, format!("invalid wager id: {err}"))
    })?;
    dispatch(&simulator, &headers, Intent::WithdrawEventWager { wager_id }).await
}

pub(super) async fn round<S: Store + 'static>(
    AxumState(simulator): SharedSimulator<S>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let identity = identity(&headers)?;
    Ok(Json(simulator.round(&identity).await).into_response())
}

pub(super) async fn place_round_wager<S: Store + 'static>(
    AxumState(simulator): SharedSimulator<S>,
    headers: HeaderMap,
    body: Result<Json<RoundWagerIntent>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(intent) = body?;
    dispatch(&simulator, &headers, Intent::PlaceRoundWager(intent)).await
}

pub(super) async fn cash_out<S: Store + 'static>(
    AxumState(simulator): SharedSimulator<S>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    dispatch(&simulator, &headers, Intent::CashOut).await
}
