use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::server::models::{HistoryEntry, Session, SessionState};

/// Persistence seam for sessions. The dialog driver is the only writer;
/// concurrent connects race on `save` with last-writer-wins semantics, and
/// history appends are idempotent by `message_id`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session, creating it in `PROVIDE_GREETING` when absent.
    async fn get_or_create(&self, session_id: &str, user_id: &str) -> Result<Session>;

    /// Replace the session's mutable fields.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Append one conversation-log entry. A repeated `message_id` is a no-op.
    async fn append_history(&self, session_id: &str, entry: &HistoryEntry) -> Result<()>;
}

/// In-memory store. Backs tests, store-less deployments and the per-
/// connection fallback when the real store goes away mid-conversation.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, session_id: &str, user_id: &str) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, user_id));
        Ok(session.clone())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn append_history(&self, session_id: &str, entry: &HistoryEntry) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            let exists = session
                .conversation_history
                .iter()
                .any(|e| e.message_id == entry.message_id);
            if !exists {
                session.conversation_history.push(entry.clone());
            }
        }
        Ok(())
    }
}

/// Postgres-backed store. The strawman travels as JSONB; the conversation
/// log is an append-only table ordered by `(timestamp, seq)`.
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("connecting session store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to session database")?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("running session store migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run session store migrations")?;
        Ok(())
    }

    async fn load_history(&self, session_id: &str) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, role, state, content, created_at, seq
            FROM session_messages
            WHERE session_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch conversation history")?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.try_get("role")?;
            let state: String = row.try_get("state")?;
            let content: serde_json::Value = row.try_get("content")?;
            entries.push(HistoryEntry {
                message_id: row.try_get("message_id")?,
                role: serde_json::from_value(serde_json::Value::String(role))
                    .context("Invalid role in history row")?,
                state: serde_json::from_value(serde_json::Value::String(state))
                    .context("Invalid state in history row")?,
                content: serde_json::from_value(content)
                    .context("Invalid content in history row")?,
                timestamp: row.try_get::<DateTime<Utc>, _>("created_at")?,
                seq: row.try_get::<i64, _>("seq")? as u64,
            });
        }
        Ok(entries)
    }
}

fn state_str(state: SessionState) -> String {
    match serde_json::to_value(state) {
        Ok(serde_json::Value::String(s)) => s,
        _ => "PROVIDE_GREETING".to_string(),
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn get_or_create(&self, session_id: &str, user_id: &str) -> Result<Session> {
        let row = sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_id, current_state, created_at, updated_at)
            VALUES ($1, $2, 'PROVIDE_GREETING', NOW(), NOW())
            ON CONFLICT (session_id) DO UPDATE SET updated_at = NOW()
            RETURNING session_id, user_id, current_state, strawman, final_url
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to load or create session")?;

        let state: String = row.try_get("current_state")?;
        let strawman: Option<serde_json::Value> = row.try_get("strawman")?;
        let session = Session {
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            current_state: serde_json::from_value(serde_json::Value::String(state))
                .context("Invalid state in session row")?,
            conversation_history: self.load_history(session_id).await?,
            presentation_strawman: match strawman {
                Some(value) => {
                    Some(serde_json::from_value(value).context("Invalid strawman in session row")?)
                }
                None => None,
            },
            final_presentation_url: row.try_get("final_url")?,
        };
        debug!(
            session_id,
            entries = session.conversation_history.len(),
            "session loaded"
        );
        Ok(session)
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let strawman = session
            .presentation_strawman
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("Failed to serialize strawman")?;

        sqlx::query(
            r#"
            UPDATE sessions
            SET current_state = $2, strawman = $3, final_url = $4, updated_at = NOW()
            WHERE session_id = $1
            "#,
        )
        .bind(&session.session_id)
        .bind(state_str(session.current_state))
        .bind(strawman)
        .bind(&session.final_presentation_url)
        .execute(&self.pool)
        .await
        .context("Failed to save session")?;
        Ok(())
    }

    async fn append_history(&self, session_id: &str, entry: &HistoryEntry) -> Result<()> {
        let role = match entry.role {
            crate::server::models::Role::User => "user",
            crate::server::models::Role::Assistant => "assistant",
        };
        sqlx::query(
            r#"
            INSERT INTO session_messages
                (message_id, session_id, role, state, content, created_at, seq)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(&entry.message_id)
        .bind(session_id)
        .bind(role)
        .bind(state_str(entry.state))
        .bind(serde_json::to_value(&entry.content).context("Failed to serialize history entry")?)
        .bind(entry.timestamp)
        .bind(entry.seq as i64)
        .execute(&self.pool)
        .await
        .context("Failed to append history entry")?;
        Ok(())
    }
}

/// Build the store selected by configuration: Postgres when a database URL
/// is present, in-memory otherwise.
pub async fn build_store(database_url: Option<&str>) -> Result<Arc<dyn SessionStore>> {
    match database_url {
        Some(url) => {
            let store = PostgresSessionStore::connect(url).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            info!("no DATABASE_URL set, using in-memory session store");
            Ok(Arc::new(InMemorySessionStore::new()))
        }
    }
}
