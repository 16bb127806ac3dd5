use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Serialize;
use sqlx::{Connection, PgPool};
use tracing::{error, info_span, Instrument};

#[derive(Serialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    database: String,
}

// axum handler for health
pub async fn health(pool: Extension<PgPool>) -> impl IntoResponse {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let database_ok = match pool.0.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => true,
                Err(error) => {
                    error!("Failed to ping database: {error}");
                    false
                }
            }
        }
        Err(error) => {
            error!("Failed to acquire database connection: {error}");
            false
        }
    };

    let health = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if database_ok {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}
