use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{CredentialStore, StoreError};
use crate::users::model::{NewUser, PublicUser, UserRecord, UserUpdate};

/// Document-style store backed by PostgreSQL.
///
/// Uniqueness comes from the `users_email_key` / `users_phone_key` unique
/// constraints and per-record atomicity from row locks, so this layer holds
/// no in-process state of its own.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")
    }
}

/// Which uniqueness invariant a violated constraint protects.
fn conflict_field(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some(c) if c.contains("phone") => "phone",
        _ => "email",
    }
}

fn map_db_err(e: sqlx::Error, what: &'static str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        // unique_violation
        if db.code().as_deref() == Some("23505") {
            return StoreError::Conflict {
                field: conflict_field(db.constraint()),
            };
        }
    }
    StoreError::Backend(anyhow::Error::new(e).context(what))
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, email, phone, password_hash, gender, first_name, last_name,
                   address, dob, qualification, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_db_err(e, "find user by email"))
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, StoreError> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, email, phone, password_hash, gender, first_name, last_name,
                   address, dob, qualification, created_at, updated_at
            FROM users
            WHERE phone = $1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_db_err(e, "find user by phone"))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, email, phone, password_hash, gender, first_name, last_name,
                   address, dob, qualification, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_db_err(e, "find user by id"))
    }

    #[instrument(skip_all, fields(email = %user.email))]
    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (email, phone, password_hash, gender, first_name, last_name,
                               address, dob, qualification)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, email, phone, password_hash, gender, first_name, last_name,
                      address, dob, qualification, created_at, updated_at
            "#,
        )
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(user.gender.as_str())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.address)
        .bind(user.dob)
        .bind(&user.qualification)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_db_err(e, "insert user"))?;
        debug!(user_id = %record.id, "user inserted");
        Ok(record)
    }

    #[instrument(skip(self, changes))]
    async fn update(&self, id: Uuid, changes: UserUpdate) -> Result<UserRecord, StoreError> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let mut record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, email, phone, password_hash, gender, first_name, last_name,
                   address, dob, qualification, created_at, updated_at
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_db_err(e, "lock user"))?
        .ok_or(StoreError::NotFound)?;

        changes.apply(&mut record, OffsetDateTime::now_utc());

        let updated = sqlx::query_as::<_, UserRecord>(
            r#"
            UPDATE users
               SET phone = $2, password_hash = $3, gender = $4, first_name = $5,
                   last_name = $6, address = $7, dob = $8, qualification = $9,
                   updated_at = now()
             WHERE id = $1
            RETURNING id, email, phone, password_hash, gender, first_name, last_name,
                      address, dob, qualification, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&record.phone)
        .bind(&record.password_hash)
        .bind(record.gender.as_str())
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.address)
        .bind(record.dob)
        .bind(&record.qualification)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_db_err(e, "update user"))?;

        tx.commit().await.context("commit tx")?;
        debug!(user_id = %id, "user updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| map_db_err(e, "delete user"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<Vec<PublicUser>, StoreError> {
        sqlx::query_as::<_, PublicUser>(
            r#"
            SELECT id, email, phone, gender, first_name, last_name,
                   address, dob, qualification, created_at, updated_at
            FROM users
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .map_err(|e| map_db_err(e, "list users"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::users::model::fixtures::new_user;

    #[test]
    fn constraint_names_map_to_fields() {
        assert_eq!(conflict_field(Some("users_phone_key")), "phone");
        assert_eq!(conflict_field(Some("users_email_key")), "email");
        assert_eq!(conflict_field(None), "email");
    }

    #[test]
    fn non_database_errors_are_backend_errors() {
        let err = map_db_err(sqlx::Error::RowNotFound, "find user");
        assert!(matches!(err, StoreError::Backend(_)));
    }

    async fn live_store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL for live tests");
        let store = PgStore::connect(&url).await.expect("connect");
        store.migrate().await.expect("migrate");
        store
    }

    fn unique_email() -> String {
        format!("{}@example.com", Uuid::new_v4().simple())
    }

    fn unique_phone() -> String {
        format!("{}", 1_000_000_000u64 + (Uuid::new_v4().as_u128() % 8_999_999_999) as u64)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires DATABASE_URL"]
    async fn live_concurrent_inserts_admit_exactly_one() {
        let store = Arc::new(live_store().await);
        let email = unique_email();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let email = email.clone();
                tokio::spawn(async move { store.insert(new_user(&email, None)).await })
            })
            .collect();
        let mut ok = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::Conflict { field: "email" }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        let found = store.find_by_email(&email).await.unwrap().unwrap();
        assert!(store.delete(found.id).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn live_update_and_phone_conflict() {
        let store = live_store().await;
        let phone = unique_phone();
        let a = store.insert(new_user(&unique_email(), Some(&phone))).await.unwrap();
        let b = store.insert(new_user(&unique_email(), None)).await.unwrap();

        let err = store
            .update(
                b.id,
                UserUpdate {
                    phone: Some(phone.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "phone" }));

        let updated = store
            .update(
                b.id,
                UserUpdate {
                    address: Some("1 Infinite Loop".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.address.as_deref(), Some("1 Infinite Loop"));
        assert_eq!(updated.created_at, b.created_at);

        assert_eq!(store.find_by_phone(&phone).await.unwrap().map(|u| u.id), Some(a.id));
        assert!(store.delete(a.id).await.unwrap());
        assert!(store.delete(b.id).await.unwrap());
        assert!(!store.delete(b.id).await.unwrap());
    }
}
