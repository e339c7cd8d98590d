//! Flat-file credential store.
//!
//! The whole directory lives in one JSON array on disk and in one
//! `RwLock<Vec<UserRecord>>` in memory. Every mutation takes the write lock,
//! validates against the current collection, writes the complete new
//! collection to a sibling temp file, fsyncs it and renames it over the live
//! file. The in-memory copy is swapped only after the rename succeeds, so
//! readers (who take the read lock) never observe a half-applied change and a
//! crash leaves either the old or the new file, never a truncated one.
//!
//! Only one process may use a given file.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::Context;
use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::{io::AsyncWriteExt, sync::RwLock};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::{CredentialStore, StoreError};
use crate::users::model::{NewUser, PublicUser, UserRecord, UserUpdate};

pub struct FileStore {
    path: PathBuf,
    users: RwLock<Vec<UserRecord>>,
}

impl FileStore {
    /// Loads the directory from `path`, starting empty if the file does not
    /// exist yet. Parent directories are created as needed.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let users = load_from_file(&path).await?;
        check_invariants(&users).with_context(|| format!("corrupt users file {}", path.display()))?;
        info!(path = %path.display(), count = users.len(), "file store opened");
        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `users` to a temp file next to the live one, then renames it
    /// into place.
    async fn persist(&self, users: &[UserRecord]) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(users).context("serialize users")?;
        let tmp = self.temp_path();

        let written = async {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .with_context(|| format!("create {}", tmp.display()))?;
            file.write_all(&json).await.context("write users")?;
            file.sync_all().await.context("fsync users")?;
            tokio::fs::rename(&tmp, &self.path)
                .await
                .with_context(|| format!("replace {}", self.path.display()))
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                debug!(error = %cleanup, path = %tmp.display(), "temp file cleanup failed");
            }
            error!(error = ?e, path = %self.path.display(), "persist users failed");
            return Err(e);
        }

        self.sync_parent().await;
        debug!(path = %self.path.display(), count = users.len(), "users persisted");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "users.json".into());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
    }

    /// Makes the rename itself durable. Best effort: not every platform lets
    /// a directory be opened for syncing.
    async fn sync_parent(&self) {
        #[cfg(unix)]
        {
            let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                Some(p) => p.to_path_buf(),
                None => PathBuf::from("."),
            };
            match tokio::fs::File::open(&dir).await {
                Ok(d) => {
                    if let Err(e) = d.sync_all().await {
                        debug!(error = %e, "directory fsync failed");
                    }
                }
                Err(e) => debug!(error = %e, "directory open for fsync failed"),
            }
        }
    }
}

async fn load_from_file(path: &Path) -> anyhow::Result<Vec<UserRecord>> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) if json.trim().is_empty() => Ok(Vec::new()),
        Ok(json) => serde_json::from_str(&json)
            .with_context(|| format!("parse users file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("read users file {}", path.display())),
    }
}

fn check_invariants(users: &[UserRecord]) -> anyhow::Result<()> {
    let mut ids = HashSet::new();
    let mut emails = HashSet::new();
    let mut phones = HashSet::new();
    for u in users {
        anyhow::ensure!(ids.insert(u.id), "duplicate id {}", u.id);
        anyhow::ensure!(emails.insert(u.email.as_str()), "duplicate email {}", u.email);
        if let Some(phone) = u.phone.as_deref() {
            anyhow::ensure!(phones.insert(phone), "duplicate phone {phone}");
        }
    }
    Ok(())
}

fn phone_taken(users: &[UserRecord], phone: &str, except: Option<Uuid>) -> bool {
    users
        .iter()
        .any(|u| Some(u.id) != except && u.phone.as_deref() == Some(phone))
}

fn fresh_id(users: &[UserRecord]) -> Uuid {
    loop {
        let id = Uuid::new_v4();
        if !users.iter().any(|u| u.id == id) {
            return id;
        }
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|u| u.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    #[instrument(skip_all, fields(email = %user.email))]
    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut users = self.users.write().await;

        if users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict { field: "email" });
        }
        if let Some(phone) = user.phone.as_deref() {
            if phone_taken(&users, phone, None) {
                return Err(StoreError::Conflict { field: "phone" });
            }
        }

        let record = user.into_record(fresh_id(&users), OffsetDateTime::now_utc());
        let mut next = users.clone();
        next.push(record.clone());
        self.persist(&next).await?;
        *users = next;

        debug!(user_id = %record.id, "user inserted");
        Ok(record)
    }

    #[instrument(skip(self, changes))]
    async fn update(&self, id: Uuid, changes: UserUpdate) -> Result<UserRecord, StoreError> {
        let mut users = self.users.write().await;

        let idx = users
            .iter()
            .position(|u| u.id == id)
            .ok_or(StoreError::NotFound)?;
        if let Some(phone) = changes.new_phone(&users[idx]) {
            if phone_taken(&users, phone, Some(id)) {
                return Err(StoreError::Conflict { field: "phone" });
            }
        }

        let mut next = users.clone();
        changes.apply(&mut next[idx], OffsetDateTime::now_utc());
        let updated = next[idx].clone();
        self.persist(&next).await?;
        *users = next;

        debug!(user_id = %id, "user updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;

        let Some(idx) = users.iter().position(|u| u.id == id) else {
            return Ok(false);
        };
        let mut next = users.clone();
        next.remove(idx);
        self.persist(&next).await?;
        *users = next;

        debug!(user_id = %id, "user deleted");
        Ok(true)
    }

    async fn list_all(&self) -> Result<Vec<PublicUser>, StoreError> {
        let users = self.users.read().await;
        Ok(users.iter().map(PublicUser::from).collect())
    }
}
