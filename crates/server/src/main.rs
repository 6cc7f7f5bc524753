mod error;
mod routes;

use axum::{
    extract::FromRef,
    routing::{get, post, put},
    Router,
};
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use quizhub_db::Db;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
}

/// Server configuration loaded from environment variables.
#[derive(Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub token_lifetimes: quizhub_api::crypto::TokenLifetimes,
}

fn env_secs(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl FromRef<AppState> for Db {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizhub_server=info,tower_http=info".into()),
        )
        .init();

    // Data directory
    let data_dir = std::env::var("QUIZHUB_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"));

    tracing::info!("data directory: {}", data_dir.display());

    let db = quizhub_db::init_db(&data_dir)?;
    tracing::info!("database initialized");

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set");
    }

    let defaults = quizhub_api::crypto::TokenLifetimes::default();
    let token_lifetimes = quizhub_api::crypto::TokenLifetimes {
        access_secs: env_secs("ACCESS_TOKEN_TTL_SECS", defaults.access_secs),
        refresh_secs: env_secs("REFRESH_TOKEN_TTL_SECS", defaults.refresh_secs),
    };

    let config = AppConfig {
        jwt_secret,
        token_lifetimes,
    };
    let state = AppState { db, config };

    let app = router()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    tracing::info!("starting server on port {port}");

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router() -> Router<AppState> {
    let api = Router::new()
        // Health
        .route("/health", get(routes::health::health))
        // Auth
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/refresh", post(routes::auth::refresh))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/password", put(routes::auth::change_password))
        .route("/auth/me", get(routes::auth::me))
        // Users
        .route("/users", get(routes::users::list_users))
        .route(
            "/users/{id}",
            get(routes::users::get_user)
                .put(routes::users::update_user)
                .delete(routes::users::delete_user),
        )
        // Companies
        .route(
            "/companies",
            post(routes::companies::create_company).get(routes::companies::list_companies),
        )
        .route(
            "/companies/{id}",
            get(routes::companies::get_company)
                .put(routes::companies::update_company)
                .delete(routes::companies::delete_company),
        )
        .route(
            "/companies/{id}/visibility",
            put(routes::companies::update_visibility),
        )
        // Members
        .route("/companies/{id}/members", get(routes::members::list_members))
        .route("/companies/{id}/leave", post(routes::members::leave_company))
        .route(
            "/companies/{id}/members/{user_id}",
            axum::routing::delete(routes::members::remove_member),
        )
        .route("/companies/{id}/admins", get(routes::members::list_admins))
        .route(
            "/companies/{id}/admins/{user_id}",
            post(routes::members::promote_admin).delete(routes::members::demote_admin),
        )
        // Invitations
        .route(
            "/invitations",
            post(routes::invitations::send_invitation)
                .get(routes::invitations::list_received),
        )
        .route("/invitations/sent", get(routes::invitations::list_sent))
        .route(
            "/invitations/{id}/accept",
            post(routes::invitations::accept_invitation),
        )
        .route(
            "/invitations/{id}/decline",
            post(routes::invitations::decline_invitation),
        )
        .route(
            "/invitations/{id}/cancel",
            post(routes::invitations::cancel_invitation),
        )
        // Join requests
        .route("/companies/{id}/join", post(routes::invitations::send_join_request))
        .route(
            "/companies/{id}/requests",
            get(routes::invitations::list_join_requests),
        )
        .route(
            "/requests/{id}/accept",
            post(routes::invitations::accept_join_request),
        )
        .route(
            "/requests/{id}/decline",
            post(routes::invitations::decline_join_request),
        )
        .route(
            "/requests/{id}/cancel",
            post(routes::invitations::cancel_join_request),
        )
        // Notifications
        .route(
            "/notifications",
            get(routes::notifications::list_notifications),
        )
        .route(
            "/notifications/{id}",
            get(routes::notifications::get_notification),
        )
        .route(
            "/notifications/{id}/read",
            post(routes::notifications::mark_read),
        )
        .route(
            "/notifications/read-all",
            post(routes::notifications::mark_all_read),
        )
        // Answers
        .route(
            "/companies/{id}/answers",
            post(routes::quizzes::create_answer),
        )
        .route(
            "/answers/{id}",
            put(routes::quizzes::update_answer).delete(routes::quizzes::delete_answer),
        )
        // Questions
        .route(
            "/companies/{id}/questions",
            post(routes::quizzes::create_question),
        )
        .route(
            "/questions/{id}",
            put(routes::quizzes::update_question).delete(routes::quizzes::delete_question),
        )
        // Quizzes
        .route(
            "/companies/{id}/quizzes",
            post(routes::quizzes::create_quiz).get(routes::quizzes::list_quizzes),
        )
        .route(
            "/quizzes/{id}",
            get(routes::quizzes::get_quiz)
                .put(routes::quizzes::update_quiz)
                .delete(routes::quizzes::delete_quiz),
        )
        .route(
            "/quizzes/{id}/submissions",
            post(routes::quizzes::submit_quiz),
        )
        // Analytics
        .route("/analytics/me", get(routes::analytics::my_overall_score))
        .route(
            "/quizzes/{id}/analytics/me",
            get(routes::analytics::my_quiz_score),
        )
        .route(
            "/companies/{id}/analytics/members/{user_id}",
            get(routes::analytics::member_score),
        )
        // Export / import
        .route("/companies/{id}/export", get(routes::transfer::export))
        .route("/companies/{id}/import", post(routes::transfer::import));

    Router::new().nest("/api/v1", api)
}
