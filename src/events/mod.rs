//! Audit trail of administrative changes.
//!
//! Handlers publish [`AuditEvent`]s on a broadcast bus; a single listener
//! task persists them into `audit_log`. Each row is hashed together with
//! the hash of the row before it, see [`chain_hash`].

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Auditable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<i64>,
    pub subject: String,
    pub severity: Severity,
    pub payload: Value,
}

pub type EventBus = broadcast::Sender<AuditEvent>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<AuditEvent>) {
    broadcast::channel(1024)
}

/// Publishes `<entity>.<action>` with the new state and, for updates and
/// deletes, the previous one.
pub fn audit<T: Auditable>(bus: &EventBus, action: &str, actor_id: Option<i64>, entity: &T, old: Option<&T>) {
    let mut payload = serde_json::json!({
        "new": serde_json::to_value(entity).unwrap_or_default(),
    });
    if let Some(old) = old {
        payload["old"] = serde_json::to_value(old).unwrap_or_default();
    }

    let event = AuditEvent {
        id: Uuid::new_v4(),
        name: format!("{}.{}", T::entity_type(), action),
        occurred_at: Utc::now(),
        actor_id,
        subject: entity.subject(),
        severity: entity.severity_for_action(action),
        payload,
    };

    // No receiver only happens during shutdown; auditing never fails a request.
    if bus.send(event).is_err() {
        tracing::warn!("audit bus has no listener");
    }
}

const PERSIST_ATTEMPTS: u32 = 3;

/// An `audit_log` row as stored.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChainedRow {
    pub seq: i64,
    pub id: String,
    pub event_name: String,
    pub actor_id: Option<i64>,
    pub subject: String,
    pub occurred_at: String,
    pub payload: String,
    pub severity: String,
    pub prev_hash: Option<String>,
    #[serde(skip)]
    pub hash: String,
}

/// SHA-256 over the JSON of every column but `hash`, in field order.
/// `prev_hash` is part of it, which links each row to its predecessor.
pub fn chain_hash(row: &ChainedRow) -> String {
    let canonical = serde_json::to_string(row).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

pub async fn start_audit_listener(mut rx: broadcast::Receiver<AuditEvent>, pool: SqlitePool) {
    tracing::info!("audit listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = persist(&pool, &event).await {
                    tracing::error!(event = %event.name, error = %err, "failed to persist audit event");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit listener lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::info!("audit listener stopped");
}

async fn persist(pool: &SqlitePool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    let mut attempt = 1;
    loop {
        match append(pool, event).await {
            Err(err) if attempt < PERSIST_ATTEMPTS && is_busy(&err) => {
                tracing::warn!(event = %event.name, attempt, "audit log busy, retrying");
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn append(pool: &SqlitePool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    let payload = serde_json::to_string(&event.payload).unwrap_or_default();
    let occurred_at = event.occurred_at.to_rfc3339_opts(SecondsFormat::Micros, true);

    let mut tx = pool.begin().await?;

    // The insert is the first statement, so the write lock is held before
    // the chain head is read and no other writer can move it until commit.
    let mut row: ChainedRow = sqlx::query_as(
        r#"
        INSERT INTO audit_log (id, event_name, actor_id, subject, occurred_at, payload, severity, prev_hash, hash, seq)
        SELECT ?, ?, ?, ?, ?, ?, ?,
               (SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1),
               '',
               COALESCE((SELECT MAX(seq) FROM audit_log), 0) + 1
        RETURNING seq, id, event_name, actor_id, subject, occurred_at, payload, severity, prev_hash, hash
        "#,
    )
    .bind(event.id.to_string())
    .bind(&event.name)
    .bind(event.actor_id)
    .bind(&event.subject)
    .bind(&occurred_at)
    .bind(&payload)
    .bind(event.severity.as_str())
    .fetch_one(&mut *tx)
    .await?;

    row.hash = chain_hash(&row);
    sqlx::query("UPDATE audit_log SET hash = ? WHERE id = ?")
        .bind(&row.hash)
        .bind(&row.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// `SQLITE_BUSY` and its extended codes.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| code & 0xff == 5),
        _ => false,
    }
}
