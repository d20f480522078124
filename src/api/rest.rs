// REST API endpoints

use axum::{
    Router,
    extract::{Query, State},
    http::{Method as HttpMethod, Uri},
    response::Json,
    routing::get,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::Instrument;
use uuid::Uuid;

use super::{ErrorResponse, error_response};
use crate::config::Config;
use crate::diagnostics::{Dispatcher, Method, ProbeOutcome, RequestValidator};
use crate::error::DiagError;

const INDEX_TEXT: &str = "Network Diagnostics API\n\
Available endpoints:\n \
- /ping?target=<host>&count=<int>\n \
- /traceroute?target=<host>\n \
- /dns?domain=<domain>\n \
- /scan?host=<host>&start=<int>&end=<int>\n";

pub struct AppState {
    validator: RequestValidator,
    dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(validator: RequestValidator, dispatcher: Dispatcher) -> Self {
        AppState {
            validator,
            dispatcher,
        }
    }

    /// Validate then dispatch, inside a per-request span
    pub async fn handle(
        &self,
        method: Method,
        params: &HashMap<String, String>,
    ) -> Result<ProbeOutcome, DiagError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("request", %request_id, %method);

        async {
            let request = self.validator.validate(method, params)?;
            tracing::info!("{} {}", method, request.target);
            self.dispatcher.dispatch(&request).await
        }
        .instrument(span)
        .await
    }
}

pub fn create_api_router(state: Arc<AppState>, config: &Config) -> Router {
    let routes = Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/traceroute", get(traceroute))
        .route("/dns", get(dns))
        .route("/scan", get(scan))
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state);

    let router = if config.base_path.is_empty() {
        routes
    } else {
        Router::new().nest(&config.base_path, routes)
    };

    let router = router.fallback(unknown_method);

    if config.cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn index() -> &'static str {
    INDEX_TEXT
}

async fn ping(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ProbeOutcome>, ErrorResponse> {
    run(&state, Method::Ping, &params).await
}

async fn traceroute(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ProbeOutcome>, ErrorResponse> {
    run(&state, Method::Traceroute, &params).await
}

async fn dns(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ProbeOutcome>, ErrorResponse> {
    run(&state, Method::Dns, &params).await
}

async fn scan(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ProbeOutcome>, ErrorResponse> {
    run(&state, Method::Scan, &params).await
}

async fn run(
    state: &AppState,
    method: Method,
    params: &HashMap<String, String>,
) -> Result<Json<ProbeOutcome>, ErrorResponse> {
    state
        .handle(method, params)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn unknown_method(uri: Uri) -> ErrorResponse {
    let name = uri
        .path()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    error_response(DiagError::UnsupportedMethod(name))
}

async fn method_not_allowed(method: HttpMethod) -> ErrorResponse {
    error_response(DiagError::MethodNotAllowed(method.to_string()))
}
