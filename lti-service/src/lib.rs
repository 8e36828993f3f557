pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware,
};
use service_core::observability::REQUEST_ID_HEADER;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Environment, LtiConfig, SwaggerMode};
use crate::services::claims::DEEP_LINK_RETURN_PATH;
use crate::services::{
    ClaimsBuilder, ContentItemIntake, JwksCache, KeyManager, LtiStore, PlatformKeySet, TokenCodec,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::health::metrics,
        handlers::well_known::jwks,
        handlers::launch::login,
        handlers::launch::authorize_query,
        handlers::launch::authorize_form,
        handlers::content_item_return::content_item_return,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::ContentItemReturnResponse,
            handlers::launch::AuthorizationRequest,
            handlers::content_item_return::ContentItemReturnForm,
            services::IntakeReceipt,
            services::LaunchRequestType,
            services::Jwks,
            services::PublicJwk,
        )
    ),
    tags(
        (name = "LTI", description = "OIDC launch and deep-linking return"),
        (name = "Well-Known", description = "Public platform keys"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: LtiConfig,
    pub store: Arc<dyn LtiStore>,
    pub keys: KeyManager,
    pub codec: TokenCodec,
    pub claims: ClaimsBuilder,
    pub intake: ContentItemIntake,
}

impl AppState {
    /// Wire the core services around a store and the platform signing key.
    /// The JWKS cache and its HTTP client are created here, once per process.
    pub fn new(
        config: LtiConfig,
        store: Arc<dyn LtiStore>,
        platform: PlatformKeySet,
    ) -> Result<Self, AppError> {
        let http = KeyManager::http_client(&config.keys).map_err(AppError::ConfigError)?;
        let cache = Arc::new(JwksCache::new(Duration::from_secs(
            config.keys.jwks_cache_ttl_seconds,
        )));

        let keys = KeyManager::new(platform, http, cache);
        let codec = TokenCodec::new(keys.clone(), config.platform.token_leeway_seconds);
        let claims = ClaimsBuilder::new(store.clone(), &config.platform);
        let intake = ContentItemIntake::new(
            store.clone(),
            keys.clone(),
            codec.clone(),
            config.platform.issuer.clone(),
        );

        Ok(Self {
            config,
            store,
            keys,
            codec,
            claims,
            intake,
        })
    }
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, AppError> {
    let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins = allowed_origins
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>().map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]))
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let cors = cors_layer(&state.config.security.allowed_origins)?;
    let request_timeout = Duration::from_secs(state.config.common.request_timeout_seconds);

    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => state.config.swagger.enabled == SwaggerMode::Public,
    };

    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .route("/.well-known/jwks.json", get(handlers::well_known::jwks));

    if swagger_enabled {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        // The document stays reachable for programmatic clients.
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { axum::Json(ApiDoc::openapi()) }),
        );
    }

    let app = app
        .route("/lti/api/v1/jwks", get(handlers::well_known::jwks))
        .route("/lti/api/v1/login", get(handlers::launch::login))
        .route(
            "/lti/api/v1/authorize",
            get(handlers::launch::authorize_query).post(handlers::launch::authorize_form),
        )
        .route(
            DEEP_LINK_RETURN_PATH,
            post(handlers::content_item_return::content_item_return),
        )
        // Needs the matched route, so it runs inside routing.
        .route_layer(from_fn(metrics_middleware))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors);

    Ok(app)
}
