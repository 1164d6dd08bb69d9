//! SqliteCapsuleStore - 永続化用の capsule store
//!
//! # 実装詳細
//! - 1 capsule = 1 行（`capsules` テーブル）
//! - claim は `claim_token` + `claim_expires_at_ms` の 2 カラムで表現（別テーブルは持たない）
//! - claim / commit / release は条件付き `UPDATE ... WHERE` 1 文で原子的に行い、
//!   `changes() == 1` で成否を判定
//! - 時刻はすべて UNIX epoch ミリ秒の INTEGER
//! - rusqlite は同期 API なので `spawn_blocking` で実行
//!
//! 複数プロセスが同じ DB ファイルを共有できます（WAL + busy_timeout）。
//! クラッシュで取り残された claim は `claim_expires_at_ms` を過ぎれば再び claim 可能になります。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::domain::{
    Capsule, CapsuleId, CapsulePatch, CapsuleStatus, Claim, ClaimToken, EditOutcome, OwnerId,
    StoreCounts, StoreError,
};
use crate::ports::CapsuleStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS capsules (
    id                  TEXT PRIMARY KEY,
    owner_id            TEXT NOT NULL,
    title               TEXT NOT NULL,
    recipient           TEXT NOT NULL,
    subject             TEXT NOT NULL,
    message             TEXT NOT NULL,
    media               TEXT NOT NULL DEFAULT '[]',   -- JSON array of locators
    deliver_at_ms       INTEGER NOT NULL,
    status              TEXT NOT NULL DEFAULT 'pending',
    claim_token         TEXT,
    claim_expires_at_ms INTEGER,
    attempts            INTEGER NOT NULL DEFAULT 0,
    last_error          TEXT,
    created_at_ms       INTEGER NOT NULL,
    updated_at_ms       INTEGER NOT NULL,
    delivered_at_ms     INTEGER
);
CREATE INDEX IF NOT EXISTS idx_capsules_due ON capsules(status, deliver_at_ms);
CREATE INDEX IF NOT EXISTS idx_capsules_owner ON capsules(owner_id, created_at_ms);
";

const COLUMNS: &str = "id, owner_id, title, recipient, subject, message, media, deliver_at_ms, \
     status, claim_token, claim_expires_at_ms, attempts, last_error, created_at_ms, \
     updated_at_ms, delivered_at_ms";

pub struct SqliteCapsuleStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCapsuleStore {
    /// Open (or create) the database file and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("open {}: {e}", path.display())))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(driver("enable WAL"))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(driver("open in-memory db"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(driver("set busy timeout"))?;
        conn.execute_batch(SCHEMA).map_err(driver("migrate"))?;
        tracing::debug!("capsule store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("connection lock poisoned: {e}")))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

fn driver(context: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::Unavailable(format!("{context}: {e}"))
}

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(ms: i64, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("{column} out of range: {ms}")))
}

/// Raw column values, decoded into a `Capsule` outside of rusqlite's error type.
struct CapsuleRow {
    id: String,
    owner_id: String,
    title: String,
    recipient: String,
    subject: String,
    message: String,
    media: String,
    deliver_at_ms: i64,
    status: String,
    claim_token: Option<String>,
    claim_expires_at_ms: Option<i64>,
    attempts: u32,
    last_error: Option<String>,
    created_at_ms: i64,
    updated_at_ms: i64,
    delivered_at_ms: Option<i64>,
}

impl CapsuleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            recipient: row.get(3)?,
            subject: row.get(4)?,
            message: row.get(5)?,
            media: row.get(6)?,
            deliver_at_ms: row.get(7)?,
            status: row.get(8)?,
            claim_token: row.get(9)?,
            claim_expires_at_ms: row.get(10)?,
            attempts: row.get(11)?,
            last_error: row.get(12)?,
            created_at_ms: row.get(13)?,
            updated_at_ms: row.get(14)?,
            delivered_at_ms: row.get(15)?,
        })
    }

    fn decode(self) -> Result<Capsule, StoreError> {
        let id: CapsuleId = self
            .id
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("id: {e}")))?;
        let owner_id: OwnerId = self
            .owner_id
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("owner_id of {id}: {e}")))?;
        let status = CapsuleStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("status of {id}: {}", self.status)))?;
        let media: Vec<String> = serde_json::from_str(&self.media)
            .map_err(|e| StoreError::Corrupt(format!("media of {id}: {e}")))?;

        let claim = match (self.claim_token, self.claim_expires_at_ms) {
            (Some(token), Some(expires_at_ms)) => {
                let token: ClaimToken = token
                    .parse()
                    .map_err(|e| StoreError::Corrupt(format!("claim_token of {id}: {e}")))?;
                Some(Claim::new(id, token, from_ms(expires_at_ms, "claim_expires_at_ms")?))
            }
            (None, None) => None,
            _ => return Err(StoreError::Corrupt(format!("half-written claim on {id}"))),
        };

        Ok(Capsule {
            id,
            owner_id,
            title: self.title,
            recipient: self.recipient,
            subject: self.subject,
            message: self.message,
            media,
            deliver_at: from_ms(self.deliver_at_ms, "deliver_at_ms")?,
            status,
            claim,
            attempts: self.attempts,
            last_error: self.last_error,
            created_at: from_ms(self.created_at_ms, "created_at_ms")?,
            updated_at: from_ms(self.updated_at_ms, "updated_at_ms")?,
            delivered_at: self
                .delivered_at_ms
                .map(|ms| from_ms(ms, "delivered_at_ms"))
                .transpose()?,
        })
    }
}

fn query_capsules(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Capsule>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(driver("prepare capsule query"))?;
    let rows = stmt
        .query_map(params, CapsuleRow::read)
        .map_err(driver("query capsules"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(driver("scan capsules"))?;
    rows.into_iter().map(CapsuleRow::decode).collect()
}

fn query_capsule(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Capsule>, StoreError> {
    conn.query_row(sql, params, CapsuleRow::read)
        .optional()
        .map_err(driver("query capsule"))?
        .map(CapsuleRow::decode)
        .transpose()
}

fn encode_media(media: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(media).map_err(|e| StoreError::Corrupt(format!("encode media: {e}")))
}

#[async_trait]
impl CapsuleStore for SqliteCapsuleStore {
    async fn insert(&self, capsule: Capsule) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let media = encode_media(&capsule.media)?;
            conn.execute(
                &format!(
                    "INSERT INTO capsules ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    capsule.id.to_storage(),
                    capsule.owner_id.to_storage(),
                    capsule.title,
                    capsule.recipient,
                    capsule.subject,
                    capsule.message,
                    media,
                    to_ms(capsule.deliver_at),
                    capsule.status.as_str(),
                    capsule.claim.map(|c| c.token.to_storage()),
                    capsule.claim.map(|c| to_ms(c.expires_at)),
                    capsule.attempts,
                    capsule.last_error,
                    to_ms(capsule.created_at),
                    to_ms(capsule.updated_at),
                    capsule.delivered_at.map(to_ms),
                ],
            )
            .map_err(driver("insert capsule"))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: CapsuleId) -> Result<Option<Capsule>, StoreError> {
        self.with_conn(move |conn| {
            query_capsule(
                conn,
                &format!("SELECT {COLUMNS} FROM capsules WHERE id = ?1"),
                params![id.to_storage()],
            )
        })
        .await
    }

    async fn get_owned(&self, owner: OwnerId, id: CapsuleId) -> Result<Option<Capsule>, StoreError> {
        self.with_conn(move |conn| {
            query_capsule(
                conn,
                &format!("SELECT {COLUMNS} FROM capsules WHERE id = ?1 AND owner_id = ?2"),
                params![id.to_storage(), owner.to_storage()],
            )
        })
        .await
    }

    async fn list_owned(&self, owner: OwnerId) -> Result<Vec<Capsule>, StoreError> {
        self.with_conn(move |conn| {
            query_capsules(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM capsules WHERE owner_id = ?1
                     ORDER BY created_at_ms DESC, id DESC"
                ),
                params![owner.to_storage()],
            )
        })
        .await
    }

    async fn update_owned(
        &self,
        owner: OwnerId,
        id: CapsuleId,
        patch: &CapsulePatch,
        now: DateTime<Utc>,
    ) -> Result<EditOutcome, StoreError> {
        let patch = patch.clone();
        self.with_conn(move |conn| {
            // IMMEDIATE: take the write lock before reading so another process
            // cannot claim between our check and our write.
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(driver("begin edit"))?;
            let Some(mut capsule) = query_capsule(
                &tx,
                &format!("SELECT {COLUMNS} FROM capsules WHERE id = ?1 AND owner_id = ?2"),
                params![id.to_storage(), owner.to_storage()],
            )?
            else {
                return Ok(EditOutcome::NotFound);
            };

            let outcome = capsule.apply_edit(&patch, now);
            if let EditOutcome::Updated(updated) = &outcome {
                tx.execute(
                    "UPDATE capsules
                     SET title = ?2, recipient = ?3, subject = ?4, message = ?5, media = ?6,
                         deliver_at_ms = ?7, updated_at_ms = ?8
                     WHERE id = ?1",
                    params![
                        id.to_storage(),
                        updated.title,
                        updated.recipient,
                        updated.subject,
                        updated.message,
                        encode_media(&updated.media)?,
                        to_ms(updated.deliver_at),
                        to_ms(updated.updated_at),
                    ],
                )
                .map_err(driver("update capsule"))?;
            }
            tx.commit().map_err(driver("commit edit"))?;
            Ok(outcome)
        })
        .await
    }

    async fn delete_owned(&self, owner: OwnerId, id: CapsuleId) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM capsules WHERE id = ?1 AND owner_id = ?2",
                    params![id.to_storage(), owner.to_storage()],
                )
                .map_err(driver("delete capsule"))?;
            Ok(deleted == 1)
        })
        .await
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Capsule>, StoreError> {
        self.with_conn(move |conn| {
            query_capsules(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM capsules
                     WHERE status = 'pending'
                       AND deliver_at_ms <= ?1
                       AND (claim_token IS NULL OR claim_expires_at_ms <= ?1)"
                ),
                params![to_ms(now)],
            )
        })
        .await
    }

    async fn claim(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let claim = *claim;
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE capsules
                     SET claim_token = ?2, claim_expires_at_ms = ?3,
                         attempts = attempts + 1, updated_at_ms = ?4
                     WHERE id = ?1
                       AND status = 'pending'
                       AND deliver_at_ms <= ?4
                       AND (claim_token IS NULL OR claim_expires_at_ms <= ?4)",
                    params![
                        claim.capsule_id.to_storage(),
                        claim.token.to_storage(),
                        to_ms(claim.expires_at),
                        to_ms(now),
                    ],
                )
                .map_err(driver("claim capsule"))?;
            Ok(changed == 1)
        })
        .await
    }

    async fn mark_delivered(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let claim = *claim;
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE capsules
                     SET status = 'delivered', delivered_at_ms = ?3, updated_at_ms = ?3,
                         claim_token = NULL, claim_expires_at_ms = NULL, last_error = NULL
                     WHERE id = ?1
                       AND status = 'pending'
                       AND (claim_token IS NULL OR claim_token = ?2)",
                    params![
                        claim.capsule_id.to_storage(),
                        claim.token.to_storage(),
                        to_ms(now),
                    ],
                )
                .map_err(driver("mark delivered"))?;
            Ok(changed == 1)
        })
        .await
    }

    async fn release_claim(
        &self,
        claim: &Claim,
        now: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        let claim = *claim;
        let reason = reason.map(str::to_string);
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE capsules
                     SET claim_token = NULL, claim_expires_at_ms = NULL,
                         last_error = COALESCE(?3, last_error), updated_at_ms = ?4
                     WHERE id = ?1 AND claim_token = ?2",
                    params![
                        claim.capsule_id.to_storage(),
                        claim.token.to_storage(),
                        reason,
                        to_ms(now),
                    ],
                )
                .map_err(driver("release claim"))?;
            Ok(changed == 1)
        })
        .await
    }

    async fn reap_expired_claims(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE capsules
                 SET claim_token = NULL, claim_expires_at_ms = NULL
                 WHERE claim_token IS NOT NULL AND claim_expires_at_ms <= ?1",
                params![to_ms(now)],
            )
            .map_err(driver("reap expired claims"))
        })
        .await
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<StoreCounts, StoreError> {
        self.with_conn(move |conn| {
            let (pending, claimed, delivered): (i64, i64, i64) = conn
                .query_row(
                    "SELECT
                        COALESCE(SUM(CASE WHEN status = 'pending'
                            AND (claim_token IS NULL OR claim_expires_at_ms <= ?1) THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN status = 'pending'
                            AND claim_token IS NOT NULL AND claim_expires_at_ms > ?1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN status = 'delivered' THEN 1 ELSE 0 END), 0)
                     FROM capsules",
                    params![to_ms(now)],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(driver("count capsules"))?;
            Ok(StoreCounts {
                pending: pending as usize,
                claimed: claimed as usize,
                delivered: delivered as usize,
            })
        })
        .await
    }
}
