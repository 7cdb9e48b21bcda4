//! Game sessions.
//!
//! A session is created when a player starts a game and carries the game
//! state the client reports while playing. Its lifetime is fixed at creation;
//! updates never extend it.

use anyhow::{Context, Result, bail};
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{Connection, PgPool, Row, postgres::PgRow};
use std::{collections::HashMap, future::Future, pin::Pin};
use tokio::sync::RwLock;
use tracing::{Instrument, debug, info_span};
use utoipa::ToSchema;

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 60;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Session {
    pub session_id: String,
    pub player: String,
    #[schema(value_type = Object)]
    pub opaque_keys: Value,
    #[schema(value_type = Object)]
    pub game_state: Value,
    pub created_at: i64,
    pub expires_at: i64,
}

impl Session {
    #[must_use]
    pub fn is_live(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

/// Durable session storage.
///
/// Every read treats a session past `expires_at` as absent.
pub trait SessionStore: Send + Sync {
    fn create<'a>(
        &'a self,
        player: &'a str,
        opaque_keys: Value,
        now: i64,
    ) -> StoreFuture<'a, Session>;

    fn get<'a>(&'a self, session_id: &'a str, now: i64) -> StoreFuture<'a, Option<Session>>;

    /// Shallow merge: top-level keys of `patch` overwrite the stored ones.
    fn merge_game_state<'a>(
        &'a self,
        session_id: &'a str,
        patch: Value,
        now: i64,
    ) -> StoreFuture<'a, Option<Session>>;

    fn delete<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, bool>;

    /// Remove expired sessions. Returns how many were removed.
    fn sweep(&self, now: i64) -> StoreFuture<'_, usize>;

    /// Check that the backing storage is reachable.
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn backend(&self) -> &'static str;
}

/// 32 random bytes, hex encoded.
#[must_use]
pub fn new_session_id() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

fn patch_object(patch: Value) -> Result<Map<String, Value>> {
    match patch {
        Value::Object(map) => Ok(map),
        _ => bail!("game state must be a JSON object"),
    }
}

fn merge_shallow(target: &mut Value, patch: Map<String, Value>) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(existing) = target {
        for (key, value) in patch {
            existing.insert(key, value);
        }
    }
}

#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl_ms: i64,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl_ms: ttl_seconds.max(1) * 1000,
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL_SECONDS)
    }
}

impl SessionStore for MemorySessionStore {
    fn create<'a>(
        &'a self,
        player: &'a str,
        opaque_keys: Value,
        now: i64,
    ) -> StoreFuture<'a, Session> {
        let session = Session {
            session_id: new_session_id(),
            player: player.to_string(),
            opaque_keys,
            game_state: Value::Object(Map::new()),
            created_at: now,
            expires_at: now + self.ttl_ms,
        };
        Box::pin(async move {
            self.sessions
                .write()
                .await
                .insert(session.session_id.clone(), session.clone());
            Ok(session)
        })
    }

    fn get<'a>(&'a self, session_id: &'a str, now: i64) -> StoreFuture<'a, Option<Session>> {
        Box::pin(async move {
            let sessions = self.sessions.read().await;
            Ok(sessions
                .get(session_id)
                .filter(|session| session.is_live(now))
                .cloned())
        })
    }

    fn merge_game_state<'a>(
        &'a self,
        session_id: &'a str,
        patch: Value,
        now: i64,
    ) -> StoreFuture<'a, Option<Session>> {
        Box::pin(async move {
            let patch = patch_object(patch)?;
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions
                .get_mut(session_id)
                .filter(|session| session.is_live(now))
            else {
                return Ok(None);
            };
            merge_shallow(&mut session.game_state, patch);
            Ok(Some(session.clone()))
        })
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.sessions.write().await.remove(session_id).is_some()) })
    }

    fn sweep(&self, now: i64) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut sessions = self.sessions.write().await;
            let before = sessions.len();
            sessions.retain(|_, session| session.is_live(now));
            Ok(before - sessions.len())
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

const SESSION_COLUMNS: &str = "session_id, player, opaque_keys::text AS opaque_keys, game_state::text AS game_state, created_at, expires_at";

/// Sessions in the `game_sessions` table (see `db/sql/01_sessions.sql`).
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
    ttl_ms: i64,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool, ttl_seconds: i64) -> Self {
        Self {
            pool,
            ttl_ms: ttl_seconds.max(1) * 1000,
        }
    }
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    let opaque_keys: String = row.try_get("opaque_keys")?;
    let game_state: String = row.try_get("game_state")?;
    Ok(Session {
        session_id: row.try_get("session_id")?,
        player: row.try_get("player")?,
        opaque_keys: serde_json::from_str(&opaque_keys).context("invalid opaque_keys column")?,
        game_state: serde_json::from_str(&game_state).context("invalid game_state column")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

impl SessionStore for PgSessionStore {
    fn create<'a>(
        &'a self,
        player: &'a str,
        opaque_keys: Value,
        now: i64,
    ) -> StoreFuture<'a, Session> {
        let session_id = new_session_id();
        Box::pin(async move {
            let query = format!(
                "INSERT INTO game_sessions (session_id, player, opaque_keys, game_state, created_at, expires_at) \
                 VALUES ($1, $2, $3::jsonb, '{{}}'::jsonb, $4, $5) RETURNING {SESSION_COLUMNS}"
            );
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT"
            );
            let row = sqlx::query(&query)
                .bind(&session_id)
                .bind(player)
                .bind(opaque_keys.to_string())
                .bind(now)
                .bind(now + self.ttl_ms)
                .fetch_one(&self.pool)
                .instrument(span)
                .await
                .context("failed to insert session")?;
            session_from_row(&row)
        })
    }

    fn get<'a>(&'a self, session_id: &'a str, now: i64) -> StoreFuture<'a, Option<Session>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {SESSION_COLUMNS} FROM game_sessions WHERE session_id = $1 AND expires_at > $2"
            );
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT"
            );
            let row = sqlx::query(&query)
                .bind(session_id)
                .bind(now)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .context("failed to read session")?;
            row.as_ref().map(session_from_row).transpose()
        })
    }

    fn merge_game_state<'a>(
        &'a self,
        session_id: &'a str,
        patch: Value,
        now: i64,
    ) -> StoreFuture<'a, Option<Session>> {
        Box::pin(async move {
            let patch = Value::Object(patch_object(patch)?);
            // jsonb `||` replaces top-level keys only.
            let query = format!(
                "UPDATE game_sessions SET game_state = game_state || $2::jsonb \
                 WHERE session_id = $1 AND expires_at > $3 RETURNING {SESSION_COLUMNS}"
            );
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE"
            );
            let row = sqlx::query(&query)
                .bind(session_id)
                .bind(patch.to_string())
                .bind(now)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .context("failed to update session state")?;
            row.as_ref().map(session_from_row).transpose()
        })
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "DELETE"
            );
            let result = sqlx::query("DELETE FROM game_sessions WHERE session_id = $1")
                .bind(session_id)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to delete session")?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn sweep(&self, now: i64) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "DELETE"
            );
            let result = sqlx::query("DELETE FROM game_sessions WHERE expires_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to sweep sessions")?;
            let removed = usize::try_from(result.rows_affected()).unwrap_or(usize::MAX);
            debug!(removed, "expired sessions removed");
            Ok(removed)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let acquire_span = info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            );
            let mut conn = self
                .pool
                .acquire()
                .instrument(acquire_span)
                .await
                .context("failed to acquire database connection")?;
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            conn.ping()
                .instrument(ping_span)
                .await
                .context("failed to ping database")
        })
    }

    fn backend(&self) -> &'static str {
        "postgresql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PLAYER: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn session_ids_are_random_hex() {
        let first = new_session_id();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, new_session_id());
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = MemorySessionStore::new(60);
        let session = store
            .create(PLAYER, json!({"k": "v"}), 1_000)
            .await
            .unwrap();

        assert_eq!(session.expires_at, 61_000);
        assert_eq!(session.game_state, json!({}));

        let loaded = store.get(&session.session_id, 2_000).await.unwrap();
        assert_eq!(loaded, Some(session));
    }

    #[tokio::test]
    async fn expired_session_reads_as_absent() {
        let store = MemorySessionStore::new(60);
        let session = store.create(PLAYER, Value::Null, 0).await.unwrap();

        assert!(store.get(&session.session_id, 59_999).await.unwrap().is_some());
        assert!(store.get(&session.session_id, 60_000).await.unwrap().is_none());
        assert!(
            store
                .merge_game_state(&session.session_id, json!({"score": 1}), 60_000)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn merge_is_shallow_and_keeps_expiry() {
        let store = MemorySessionStore::new(60);
        let session = store.create(PLAYER, Value::Null, 0).await.unwrap();

        store
            .merge_game_state(
                &session.session_id,
                json!({"level": 1, "player": {"x": 1, "y": 2}}),
                10,
            )
            .await
            .unwrap();
        let merged = store
            .merge_game_state(
                &session.session_id,
                json!({"score": 50, "player": {"x": 5}}),
                20,
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            merged.game_state,
            json!({"level": 1, "score": 50, "player": {"x": 5}})
        );
        assert_eq!(merged.expires_at, session.expires_at);
    }

    #[tokio::test]
    async fn merge_rejects_non_objects() {
        let store = MemorySessionStore::new(60);
        let session = store.create(PLAYER, Value::Null, 0).await.unwrap();
        assert!(
            store
                .merge_game_state(&session.session_id, json!([1, 2]), 1)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn delete_and_sweep() {
        let store = MemorySessionStore::new(60);
        let first = store.create(PLAYER, Value::Null, 0).await.unwrap();
        let second = store.create(PLAYER, Value::Null, 30_000).await.unwrap();

        assert!(store.delete(&first.session_id).await.unwrap());
        assert!(!store.delete(&first.session_id).await.unwrap());

        let third = store.create(PLAYER, Value::Null, 0).await.unwrap();
        assert_eq!(store.sweep(70_000).await.unwrap(), 1);
        assert!(store.get(&third.session_id, 0).await.unwrap().is_none());
        assert!(store.get(&second.session_id, 70_000).await.unwrap().is_some());
    }
}
