//! Versioned migrations, default rank seeding and schema validation.

use chrono::Utc;
use sqlx::SqlitePool;

use super::{models::default_ranks, StoreError, StoreResult};

const MODULE: &str = "auth";

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_ranks",
        statements: &[
            "CREATE TABLE IF NOT EXISTS ranks (
                name TEXT PRIMARY KEY,
                level INTEGER NOT NULL,
                commands TEXT NOT NULL DEFAULT '[]',
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            )",
            "CREATE INDEX IF NOT EXISTS idx_ranks_level ON ranks(level)",
            "CREATE INDEX IF NOT EXISTS idx_ranks_active ON ranks(active)",
        ],
    },
    Migration {
        version: 2,
        name: "create_users",
        statements: &[
            "CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                rank TEXT NOT NULL REFERENCES ranks(name),
                registered_at TEXT NOT NULL,
                registered_by TEXT,
                active INTEGER NOT NULL DEFAULT 1
            )",
            "CREATE INDEX IF NOT EXISTS idx_users_rank ON users(rank)",
            "CREATE INDEX IF NOT EXISTS idx_users_active ON users(active)",
        ],
    },
    Migration {
        version: 3,
        name: "create_registered_groups",
        statements: &[
            "CREATE TABLE IF NOT EXISTS registered_groups (
                group_id TEXT PRIMARY KEY,
                registered_at TEXT NOT NULL,
                registered_by TEXT NOT NULL REFERENCES users(user_id),
                active INTEGER NOT NULL DEFAULT 1
            )",
            "CREATE INDEX IF NOT EXISTS idx_groups_registered_by ON registered_groups(registered_by)",
            "CREATE INDEX IF NOT EXISTS idx_groups_active ON registered_groups(active)",
        ],
    },
];

const EXPECTED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "ranks",
        &["name", "level", "commands", "description", "created_at", "active"],
    ),
    (
        "users",
        &["user_id", "rank", "registered_at", "registered_by", "active"],
    ),
    (
        "registered_groups",
        &["group_id", "registered_at", "registered_by", "active"],
    ),
];

/// Apply pending migrations; returns how many ran.
pub async fn run_migrations(pool: &SqlitePool) -> StoreResult<usize> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            module TEXT NOT NULL,
            version INTEGER NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL,
            PRIMARY KEY (module, version)
        )",
    )
    .execute(pool)
    .await?;

    let current: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations WHERE module = ?")
            .bind(MODULE)
            .fetch_one(pool)
            .await?;
    let current = current.unwrap_or(0);

    let mut applied = 0;
    for m in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        for stmt in m.statements {
            sqlx::query(*stmt).execute(&mut *tx).await?;
        }
        sqlx::query(
            "INSERT INTO schema_migrations (module, version, name, applied_at) VALUES (?, ?, ?, ?)",
        )
        .bind(MODULE)
        .bind(m.version)
        .bind(m.name)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(version = m.version, name = m.name, "applied migration");
        applied += 1;
    }
    Ok(applied)
}

/// Seed default ranks on an empty table; later starts only add a missing default rank.
pub async fn seed_default_ranks(pool: &SqlitePool, default_rank: &str) -> StoreResult<()> {
    let mut tx = pool.begin().await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ranks")
        .fetch_one(&mut *tx)
        .await?;
    let now = Utc::now().to_rfc3339();

    if existing == 0 {
        for rank in default_ranks(default_rank) {
            let commands = serde_json::to_string(&rank.commands)
                .map_err(|e| StoreError::Corrupt(format!("encode commands: {e}")))?;
            sqlx::query(
                "INSERT INTO ranks (name, level, commands, description, created_at, active)
                 VALUES (?, ?, ?, ?, ?, 1)",
            )
            .bind(&rank.name)
            .bind(rank.level)
            .bind(commands)
            .bind(&rank.description)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            tracing::info!(rank = %rank.name, level = rank.level, "seeded default rank");
        }
    } else {
        let present: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM ranks WHERE name = ? AND active = 1")
                .bind(default_rank)
                .fetch_optional(&mut *tx)
                .await?;
        if present.is_none() {
            let max_level: Option<i64> =
                sqlx::query_scalar("SELECT MAX(level) FROM ranks WHERE active = 1")
                    .fetch_one(&mut *tx)
                    .await?;
            let level = max_level.unwrap_or(0) + 100;
            sqlx::query(
                "INSERT INTO ranks (name, level, commands, description, created_at, active)
                 VALUES (?, ?, '[]', 'Default rank for newly registered users', ?, 1)
                 ON CONFLICT(name) DO UPDATE SET level = excluded.level, active = 1",
            )
            .bind(default_rank)
            .bind(level)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            tracing::warn!(rank = default_rank, level, "default rank was missing, added it");
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Check every expected table and column exists.
pub async fn validate_schema(pool: &SqlitePool) -> StoreResult<()> {
    for (table, columns) in EXPECTED_COLUMNS {
        let found: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
            .bind(*table)
            .fetch_all(pool)
            .await?;
        if found.is_empty() {
            return Err(StoreError::Corrupt(format!("missing table {table}")));
        }
        for col in *columns {
            if !found.iter().any(|f| f.as_str() == *col) {
                return Err(StoreError::Corrupt(format!(
                    "table {table} is missing column {col}"
                )));
            }
        }
    }
    Ok(())
}
