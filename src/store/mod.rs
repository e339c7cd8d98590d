//! Persistence for user records.
//!
//! [`CredentialStore`] is the one seam that varies between deployments:
//! [`postgres::PgStore`] leans on the database's unique indexes and row
//! locks, while [`file::FileStore`] keeps the whole directory in a single
//! JSON file and serialises every mutation itself.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::users::model::{NewUser, PublicUser, UserRecord, UserUpdate};

pub mod file;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness invariant (`email` or `phone`) would be violated.
    #[error("{field} already exists")]
    Conflict { field: &'static str },
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `email` must already be normalised (trimmed, lowercase).
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;

    /// Inserts atomically with respect to email and phone uniqueness: of two
    /// racing inserts for the same key exactly one succeeds.
    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    /// Read-modify-write of one record. Fails with `Conflict` if the update
    /// would give the record a phone number another record already owns.
    async fn update(&self, id: Uuid, changes: UserUpdate) -> Result<UserRecord, StoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// All records, projected without the password hash, oldest first.
    async fn list_all(&self) -> Result<Vec<PublicUser>, StoreError>;
}
