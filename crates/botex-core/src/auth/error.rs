/// Typed failures of the access-control store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user already exists: {0}")]
    UserAlreadyExists(String),

    #[error("invalid rank: {0}")]
    InvalidRank(String),

    #[error("rank not found: {0}")]
    RankNotFound(String),

    #[error("rank already exists: {0}")]
    RankAlreadyExists(String),

    #[error("rank level {level} is already used by rank {holder}")]
    RankLevelTaken { level: i64, holder: String },

    #[error("rank {rank} is assigned to {users} user(s)")]
    RankInUse { rank: String, users: i64 },

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("group already registered: {0}")]
    GroupAlreadyExists(String),

    #[error("registrar is not an active user: {0}")]
    RegistrarNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("platform admin status unavailable: {0}")]
    AdminUnavailable(String),

    #[error("store is closed")]
    Closed,

    #[error("corrupt store data: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
