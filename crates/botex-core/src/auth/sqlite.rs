use std::{
    future::Future,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{
    pool::PoolConnection,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, SqliteConnection, SqlitePool,
};

use crate::{
    domain::{GroupId, UserId},
    messaging::PlatformAdminPort,
};

use super::{
    schema,
    store::AccessControlStore,
    validation::{validate_identity, validate_rank_commands, validate_rank_name},
    Rank, RegisteredGroup, StoreError, StoreResult, User, OWNER_RANK,
};

/// SQLite-backed access-control store.
pub struct SqliteAccessStore {
    pool: SqlitePool,
    admin: Option<Arc<dyn PlatformAdminPort>>,
    closed: AtomicBool,
}

impl SqliteAccessStore {
    /// Open (creating if needed) a database file in WAL mode.
    pub async fn open(url: &str, admin: Option<Arc<dyn PlatformAdminPort>>) -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Self::from_pool(pool, admin))
    }

    /// Private in-memory database on a single long-lived connection.
    pub async fn open_in_memory(admin: Option<Arc<dyn PlatformAdminPort>>) -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Ok(Self::from_pool(pool, admin))
    }

    pub fn from_pool(pool: SqlitePool, admin: Option<Arc<dyn PlatformAdminPort>>) -> Self {
        Self {
            pool,
            admin,
            closed: AtomicBool::new(false),
        }
    }

    /// Migrate, seed default ranks and validate the resulting schema.
    pub async fn init_schema(&self, default_rank: &str) -> StoreResult<()> {
        self.ensure_open()?;
        validate_rank_name(default_rank)?;
        schema::run_migrations(&self.pool).await?;
        schema::seed_default_ranks(&self.pool, default_rank).await?;
        schema::validate_schema(&self.pool).await
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    // SQLite's CURRENT_TIMESTAMP format.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

fn user_from_row(row: &SqliteRow) -> StoreResult<User> {
    let registered_at: String = row.try_get("registered_at")?;
    let registered_by: Option<String> = row.try_get("registered_by")?;
    Ok(User {
        id: UserId(row.try_get("user_id")?),
        rank: row.try_get("rank")?,
        registered_at: parse_timestamp(&registered_at)?,
        registered_by: registered_by.map(UserId),
        active: row.try_get("active")?,
    })
}

fn rank_from_row(row: &SqliteRow) -> StoreResult<Rank> {
    let name: String = row.try_get("name")?;
    let raw: String = row.try_get("commands")?;
    let commands: Vec<String> = serde_json::from_str(&raw)
        .map_err(|e| StoreError::Corrupt(format!("rank {name}: commands: {e}")))?;
    Ok(Rank {
        name,
        level: row.try_get("level")?,
        commands,
        description: row.try_get("description")?,
        active: row.try_get("active")?,
    })
}

fn group_from_row(row: &SqliteRow) -> StoreResult<RegisteredGroup> {
    let registered_at: String = row.try_get("registered_at")?;
    Ok(RegisteredGroup {
        id: GroupId(row.try_get("group_id")?),
        registered_at: parse_timestamp(&registered_at)?,
        registered_by: UserId(row.try_get("registered_by")?),
        active: row.try_get("active")?,
    })
}

fn encode_commands(commands: &[String]) -> StoreResult<String> {
    serde_json::to_string(commands).map_err(|e| StoreError::InvalidInput(format!("commands: {e}")))
}

const USER_COLUMNS: &str = "user_id, rank, registered_at, registered_by, active";
const RANK_COLUMNS: &str = "name, level, commands, description, active";
const GROUP_COLUMNS: &str = "group_id, registered_at, registered_by, active";

/// Pooled connection with a write transaction already open.
///
/// `BEGIN IMMEDIATE` takes the write lock before the first read, so racing
/// writers wait on the busy timeout instead of failing a lock upgrade.
async fn begin_immediate(pool: &SqlitePool) -> StoreResult<PoolConnection<Sqlite>> {
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(conn)
}

/// Commit on success, roll back on error.
async fn finish<T>(mut conn: PoolConnection<Sqlite>, result: StoreResult<T>) -> StoreResult<T> {
    let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
    match sqlx::query(end).execute(&mut *conn).await {
        Ok(_) => result,
        Err(e) => {
            tracing::warn!(error = %e, statement = end, "closing transaction failed, dropping connection");
            // The connection may still hold the transaction; keep it out of the pool.
            if let Err(close) = conn.close().await {
                tracing::debug!(error = %close, "closing connection failed");
            }
            result.and(Err(e.into()))
        }
    }
}

/// Run a write transaction on its own task.
///
/// Dropping the caller's future does not interrupt the transaction, so it always
/// ends in COMMIT or ROLLBACK.
async fn in_write_tx<T, Fut>(work: Fut) -> StoreResult<T>
where
    T: Send + 'static,
    Fut: Future<Output = StoreResult<T>> + Send + 'static,
{
    tokio::spawn(work).await.map_err(|e| {
        tracing::error!(error = %e, "store write task failed");
        StoreError::Database(sqlx::Error::WorkerCrashed)
    })?
}

async fn insert_user(conn: &mut SqliteConnection, user: &User) -> StoreResult<()> {
    let rank_ok: Option<i64> = sqlx::query_scalar("SELECT 1 FROM ranks WHERE name = ? AND active = 1")
        .bind(&user.rank)
        .fetch_optional(&mut *conn)
        .await?;
    if rank_ok.is_none() {
        return Err(StoreError::InvalidRank(user.rank.clone()));
    }

    let existing: Option<bool> = sqlx::query_scalar("SELECT active FROM users WHERE user_id = ?")
        .bind(user.id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    let registered_by = user.registered_by.as_ref().map(|u| u.as_str());

    match existing {
        Some(true) => return Err(StoreError::UserAlreadyExists(user.id.to_string())),
        Some(false) => {
            sqlx::query(
                "UPDATE users SET rank = ?, registered_at = ?, registered_by = ?, active = 1
                 WHERE user_id = ?",
            )
            .bind(&user.rank)
            .bind(user.registered_at.to_rfc3339())
            .bind(registered_by)
            .bind(user.id.as_str())
            .execute(&mut *conn)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO users (user_id, rank, registered_at, registered_by, active)
                 VALUES (?, ?, ?, ?, 1)",
            )
            .bind(user.id.as_str())
            .bind(&user.rank)
            .bind(user.registered_at.to_rfc3339())
            .bind(registered_by)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

async fn modify_user(conn: &mut SqliteConnection, user: &User) -> StoreResult<()> {
    if user.active {
        let rank_ok: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM ranks WHERE name = ? AND active = 1")
                .bind(&user.rank)
                .fetch_optional(&mut *conn)
                .await?;
        if rank_ok.is_none() {
            return Err(StoreError::InvalidRank(user.rank.clone()));
        }
    }

    let res = sqlx::query(
        "UPDATE users SET rank = ?, registered_by = ?, active = ?
         WHERE user_id = ? AND active = 1",
    )
    .bind(&user.rank)
    .bind(user.registered_by.as_ref().map(|u| u.as_str()))
    .bind(user.active)
    .bind(user.id.as_str())
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::UserNotFound(user.id.to_string()));
    }
    Ok(())
}

async fn level_holder(
    conn: &mut SqliteConnection,
    level: i64,
    except: &str,
) -> StoreResult<Option<String>> {
    let holder = sqlx::query_scalar("SELECT name FROM ranks WHERE level = ? AND active = 1 AND name != ?")
        .bind(level)
        .bind(except)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(holder)
}

async fn insert_rank(conn: &mut SqliteConnection, rank: &Rank, commands: &str) -> StoreResult<()> {
    let existing: Option<bool> = sqlx::query_scalar("SELECT active FROM ranks WHERE name = ?")
        .bind(&rank.name)
        .fetch_optional(&mut *conn)
        .await?;
    if existing == Some(true) {
        return Err(StoreError::RankAlreadyExists(rank.name.clone()));
    }

    if let Some(holder) = level_holder(conn, rank.level, &rank.name).await? {
        return Err(StoreError::RankLevelTaken {
            level: rank.level,
            holder,
        });
    }

    if existing == Some(false) {
        sqlx::query(
            "UPDATE ranks SET level = ?, commands = ?, description = ?, active = 1
             WHERE name = ?",
        )
        .bind(rank.level)
        .bind(commands)
        .bind(&rank.description)
        .bind(&rank.name)
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query(
            "INSERT INTO ranks (name, level, commands, description, created_at, active)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(&rank.name)
        .bind(rank.level)
        .bind(commands)
        .bind(&rank.description)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn modify_rank(conn: &mut SqliteConnection, rank: &Rank, commands: &str) -> StoreResult<()> {
    if let Some(holder) = level_holder(conn, rank.level, &rank.name).await? {
        return Err(StoreError::RankLevelTaken {
            level: rank.level,
            holder,
        });
    }

    let res = sqlx::query(
        "UPDATE ranks SET level = ?, commands = ?, description = ?, active = ?
         WHERE name = ? AND active = 1",
    )
    .bind(rank.level)
    .bind(commands)
    .bind(&rank.description)
    .bind(rank.active)
    .bind(&rank.name)
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::RankNotFound(rank.name.clone()));
    }
    Ok(())
}

async fn deactivate_rank(conn: &mut SqliteConnection, name: &str) -> StoreResult<()> {
    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE rank = ? AND active = 1")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    if users > 0 {
        return Err(StoreError::RankInUse {
            rank: name.to_string(),
            users,
        });
    }

    let res = sqlx::query("UPDATE ranks SET active = 0 WHERE name = ? AND active = 1")
        .bind(name)
        .execute(&mut *conn)
        .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::RankNotFound(name.to_string()));
    }
    Ok(())
}

async fn insert_group(conn: &mut SqliteConnection, group: &RegisteredGroup) -> StoreResult<()> {
    let existing: Option<bool> =
        sqlx::query_scalar("SELECT active FROM registered_groups WHERE group_id = ?")
            .bind(group.id.as_str())
            .fetch_optional(&mut *conn)
            .await?;
    if existing == Some(true) {
        return Err(StoreError::GroupAlreadyExists(group.id.to_string()));
    }

    let registrar: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM users WHERE user_id = ? AND active = 1")
            .bind(group.registered_by.as_str())
            .fetch_optional(&mut *conn)
            .await?;
    if registrar.is_none() {
        return Err(StoreError::RegistrarNotFound(group.registered_by.to_string()));
    }

    if existing == Some(false) {
        sqlx::query(
            "UPDATE registered_groups SET registered_at = ?, registered_by = ?, active = 1
             WHERE group_id = ?",
        )
        .bind(group.registered_at.to_rfc3339())
        .bind(group.registered_by.as_str())
        .bind(group.id.as_str())
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query(
            "INSERT INTO registered_groups (group_id, registered_at, registered_by, active)
             VALUES (?, ?, ?, 1)",
        )
        .bind(group.id.as_str())
        .bind(group.registered_at.to_rfc3339())
        .bind(group.registered_by.as_str())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl AccessControlStore for SqliteAccessStore {
    async fn get_user(&self, id: &UserId) -> StoreResult<User> {
        self.ensure_open()?;
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = ? AND active = 1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => user_from_row(&row),
            None => Err(StoreError::UserNotFound(id.to_string())),
        }
    }

    async fn create_user(&self, user: &User) -> StoreResult<()> {
        self.ensure_open()?;
        validate_identity("user", user.id.as_str())?;
        if validate_rank_name(&user.rank).is_err() {
            return Err(StoreError::InvalidRank(user.rank.clone()));
        }

        let pool = self.pool.clone();
        let user = user.clone();
        in_write_tx(async move {
            let mut conn = begin_immediate(&pool).await?;
            let res = insert_user(&mut conn, &user).await;
            finish(conn, res).await
        })
        .await
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        self.ensure_open()?;
        let pool = self.pool.clone();
        let user = user.clone();
        in_write_tx(async move {
            let mut conn = begin_immediate(&pool).await?;
            let res = modify_user(&mut conn, &user).await;
            finish(conn, res).await
        })
        .await
    }

    async fn delete_user(&self, id: &UserId) -> StoreResult<()> {
        self.ensure_open()?;
        let res = sqlx::query("UPDATE users SET active = 0 WHERE user_id = ? AND active = 1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get_rank(&self, name: &str) -> StoreResult<Rank> {
        self.ensure_open()?;
        let row = sqlx::query(&format!(
            "SELECT {RANK_COLUMNS} FROM ranks WHERE name = ? AND active = 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => rank_from_row(&row),
            None => Err(StoreError::RankNotFound(name.to_string())),
        }
    }

    async fn create_rank(&self, rank: &Rank) -> StoreResult<()> {
        self.ensure_open()?;
        validate_rank_name(&rank.name)?;
        validate_rank_commands(&rank.commands)?;
        if rank.level < 0 {
            return Err(StoreError::InvalidInput("rank level cannot be negative".to_string()));
        }
        let commands = encode_commands(&rank.commands)?;

        let pool = self.pool.clone();
        let rank = rank.clone();
        in_write_tx(async move {
            let mut conn = begin_immediate(&pool).await?;
            let res = insert_rank(&mut conn, &rank, &commands).await;
            finish(conn, res).await
        })
        .await
    }

    async fn update_rank(&self, rank: &Rank) -> StoreResult<()> {
        self.ensure_open()?;
        validate_rank_commands(&rank.commands)?;
        let commands = encode_commands(&rank.commands)?;

        let pool = self.pool.clone();
        let rank = rank.clone();
        in_write_tx(async move {
            let mut conn = begin_immediate(&pool).await?;
            let res = modify_rank(&mut conn, &rank, &commands).await;
            finish(conn, res).await
        })
        .await
    }

    async fn delete_rank(&self, name: &str) -> StoreResult<()> {
        self.ensure_open()?;
        if name == OWNER_RANK {
            return Err(StoreError::InvalidInput(
                "the owner rank cannot be deleted".to_string(),
            ));
        }

        let pool = self.pool.clone();
        let name = name.to_string();
        in_write_tx(async move {
            let mut conn = begin_immediate(&pool).await?;
            let res = deactivate_rank(&mut conn, &name).await;
            finish(conn, res).await
        })
        .await
    }

    async fn list_ranks(&self) -> StoreResult<Vec<Rank>> {
        self.ensure_open()?;
        let rows = sqlx::query(&format!(
            "SELECT {RANK_COLUMNS} FROM ranks WHERE active = 1 ORDER BY level, name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rank_from_row).collect()
    }

    async fn count_users_with_rank(&self, name: &str) -> StoreResult<i64> {
        self.ensure_open()?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE rank = ? AND active = 1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn get_group(&self, id: &GroupId) -> StoreResult<RegisteredGroup> {
        self.ensure_open()?;
        let row = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM registered_groups WHERE group_id = ? AND active = 1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => group_from_row(&row),
            None => Err(StoreError::GroupNotFound(id.to_string())),
        }
    }

    async fn create_group(&self, group: &RegisteredGroup) -> StoreResult<()> {
        self.ensure_open()?;
        validate_identity("group", group.id.as_str())?;

        let pool = self.pool.clone();
        let group = group.clone();
        in_write_tx(async move {
            let mut conn = begin_immediate(&pool).await?;
            let res = insert_group(&mut conn, &group).await;
            finish(conn, res).await
        })
        .await
    }

    async fn delete_group(&self, id: &GroupId) -> StoreResult<()> {
        self.ensure_open()?;
        let res = sqlx::query(
            "UPDATE registered_groups SET active = 0 WHERE group_id = ? AND active = 1",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::GroupNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn is_platform_admin(&self, user: &UserId, group: &GroupId) -> StoreResult<bool> {
        self.ensure_open()?;
        if user.is_empty() || group.is_empty() {
            return Err(StoreError::InvalidInput(
                "user and group ids are required".to_string(),
            ));
        }

        let Some(admin) = &self.admin else {
            return Err(StoreError::AdminUnavailable(
                "no platform admin port configured".to_string(),
            ));
        };
        if !admin.is_connected() {
            return Err(StoreError::AdminUnavailable(
                "messaging client is not connected".to_string(),
            ));
        }

        admin
            .is_group_admin(user, group)
            .await
            .map_err(|e| StoreError::AdminUnavailable(e.to_string()))
    }

    async fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pool.close().await;
        tracing::info!("access control store closed");
        Ok(())
    }
}
