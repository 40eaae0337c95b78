use async_trait::async_trait;

use crate::domain::{GroupId, UserId};

use super::{
    models::{RegisteredGroup, User},
    Rank, StoreError, StoreResult,
};

/// Persistent registry of users, ranks and registered groups.
///
/// Removal is always a soft delete (`active = false`). Lookups only see active
/// rows. Callers bound latency by wrapping calls in a timeout; dropping the
/// future cancels the operation.
#[async_trait]
pub trait AccessControlStore: Send + Sync {
    async fn get_user(&self, id: &UserId) -> StoreResult<User>;

    /// Fails with `UserAlreadyExists` for an active user and `InvalidRank` when the
    /// rank is missing or inactive. An inactive user is reactivated.
    async fn create_user(&self, user: &User) -> StoreResult<()>;

    async fn update_user(&self, user: &User) -> StoreResult<()>;

    async fn delete_user(&self, id: &UserId) -> StoreResult<()>;

    async fn get_rank(&self, name: &str) -> StoreResult<Rank>;

    async fn create_rank(&self, rank: &Rank) -> StoreResult<()>;

    async fn update_rank(&self, rank: &Rank) -> StoreResult<()>;

    /// Refused while users still hold the rank, and always for `owner`.
    async fn delete_rank(&self, name: &str) -> StoreResult<()>;

    /// Ordered by level, then name.
    async fn list_ranks(&self) -> StoreResult<Vec<Rank>>;

    async fn count_users_with_rank(&self, name: &str) -> StoreResult<i64>;

    async fn get_group(&self, id: &GroupId) -> StoreResult<RegisteredGroup>;

    /// Existence check and insert run in one transaction.
    async fn create_group(&self, group: &RegisteredGroup) -> StoreResult<()>;

    async fn delete_group(&self, id: &GroupId) -> StoreResult<()>;

    /// Asks the transport; `AdminUnavailable` when it cannot.
    async fn is_platform_admin(&self, user: &UserId, group: &GroupId) -> StoreResult<bool>;

    async fn close(&self) -> StoreResult<()>;
}

/// Make sure `owner_id` is registered with the owner rank.
///
/// Returns true when the user was created or promoted.
pub async fn ensure_owner(store: &dyn AccessControlStore, owner_id: &UserId) -> StoreResult<bool> {
    match store.get_user(owner_id).await {
        Ok(user) if user.rank == super::OWNER_RANK => Ok(false),
        Ok(mut user) => {
            user.rank = super::OWNER_RANK.to_string();
            store.update_user(&user).await?;
            Ok(true)
        }
        Err(StoreError::UserNotFound(_)) => {
            store
                .create_user(&User::new(owner_id.clone(), super::OWNER_RANK, None))
                .await?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
