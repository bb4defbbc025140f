use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use governor::middleware::NoOpMiddleware;
use stakebook_execution::Store;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::Simulator;

mod http;

/// HTTP surface of the presentation layer. Every wallet route acts on the
/// identity carried in the `x-owner-id` and `x-profile-complete` headers.
pub struct Api<S: Store> {
    simulator: Arc<Simulator<S>>,
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn governor_config(per_second: u64, burst: u32) -> Option<IpGovernorConfig> {
    let nanos_per_request = (1_000_000_000u64 / per_second).max(1);
    GovernorConfigBuilder::default()
        .period(Duration::from_nanos(nanos_per_request))
        .burst_size(burst)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
}

impl<S: Store + 'static> Api<S> {
    pub fn new(simulator: Arc<Simulator<S>>) -> Self {
        Self { simulator }
    }

    pub fn router(&self) -> Router {
        let http = &self.simulator.config().http;

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/metrics", get(http::metrics::<S>))
            .route("/wallet", get(http::wallet::<S>))
            .route("/wallet/intent", post(http::intent::<S>))
            .route("/wallet/funds", post(http::add_funds::<S>))
            .route("/wallet/event-wagers", post(http::place_event_wager::<S>))
            .route(
                "/wallet/event-wagers/:id/withdraw",
                post(http::withdraw_event_wager::<S>),
            )
            .route(
                "/wallet/round",
                get(http::round::<S>).post(http::place_round_wager::<S>),
            )
            .route("/wallet/round/cash-out", post(http::cash_out::<S>));

        let governor_conf = match http.rate_limit {
            Some((per_second, burst)) => {
                let config = governor_config(per_second, burst);
                if config.is_none() {
                    tracing::warn!(per_second, burst, "invalid rate-limit config; rate limiting disabled");
                }
                config.map(Arc::new)
            }
            None => None,
        };
        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };

        let router = router.layer(DefaultBodyLimit::max(http.body_limit_bytes));
        let router = router.layer(middleware::from_fn(request_id_middleware));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.simulator.clone())
    }
}

async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static("x-request-id"),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}
