//! Rank-based access control: persistent registry plus the permission evaluator.

pub mod error;
pub mod evaluator;
pub mod models;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod validation;

pub use error::{StoreError, StoreResult};
pub use evaluator::{CheckOrder, EvaluatorPolicy, PermissionEvaluator};
pub use models::{
    default_ranks, Denial, PermissionResult, Rank, RegisteredGroup, User, BASIC_RANK, OWNER_RANK,
    WILDCARD,
};
pub use sqlite::SqliteAccessStore;
pub use store::{ensure_owner, AccessControlStore};
