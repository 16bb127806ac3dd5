//! Email delivery: transactional outbox plus a logging sender for dev.
//!
//! Verification flows enqueue a row in `email_outbox`; an out-of-process
//! worker owns actual delivery and retries. Keeping the enqueue on the
//! request path makes code issuance and email atomic enough for this
//! system: a crash between session save and enqueue degrades to "user
//! must re-request".

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, Instrument};

use crate::auth::gateway::EmailGateway;

const TEMPLATE: &str = "verification_code";

/// Enqueues verification emails into the `email_outbox` table.
pub struct OutboxEmailGateway {
    pool: PgPool,
}

impl OutboxEmailGateway {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailGateway for OutboxEmailGateway {
    async fn send_verification_email(&self, email: &str, code: &str) -> Result<()> {
        let payload = json!({
            "email": email,
            "code": code,
        });
        let payload_text =
            serde_json::to_string(&payload).context("failed to serialize email payload")?;

        let query = r"
            INSERT INTO email_outbox (to_email, template, payload_json)
            VALUES ($1, $2, $3::jsonb)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(email)
            .bind(TEMPLATE)
            .bind(payload_text)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to enqueue verification email")?;
        Ok(())
    }
}

/// Local dev sender that logs instead of delivering. The code itself is
/// not logged.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEmailGateway;

#[async_trait]
impl EmailGateway for LogEmailGateway {
    async fn send_verification_email(&self, email: &str, _code: &str) -> Result<()> {
        info!(to_email = %email, template = TEMPLATE, "verification email send stub");
        Ok(())
    }
}
