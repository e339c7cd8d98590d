use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{ChangePasswordRequest, LoginRequest, RegisterRequest, Session, UpdateDetailsRequest},
    model::{NewUser, PublicUser, UserRecord, UserUpdate},
    validate,
};
use crate::{
    auth::{jwt::TokenService, password::PasswordHasher, policy},
    errors::AppError,
    store::CredentialStore,
};

/// Use cases of the user directory.
///
/// Backend-agnostic: everything storage-specific sits behind
/// [`CredentialStore`]. Password hashing always happens before or after a
/// store call, never inside one.
pub struct UserService {
    store: Arc<dyn CredentialStore>,
    tokens: Arc<TokenService>,
    hasher: PasswordHasher,
    dummy_hash: OnceCell<String>,
}

impl UserService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: Arc<TokenService>,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            store,
            tokens,
            hasher,
            dummy_hash: OnceCell::new(),
        }
    }

    #[instrument(skip_all)]
    pub async fn register(&self, req: RegisterRequest) -> Result<Session, AppError> {
        let user = self.create(req).await?;
        let token = self.issue(user.id)?;
        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(Session {
            token,
            user: user.into(),
        })
    }

    /// Same checks as [`register`](Self::register), but no session is issued.
    #[instrument(skip_all)]
    pub async fn admin_create(&self, req: RegisterRequest) -> Result<PublicUser, AppError> {
        let user = self.create(req).await?;
        info!(user_id = %user.id, email = %user.email, "user created");
        Ok(user.into())
    }

    async fn create(&self, req: RegisterRequest) -> Result<UserRecord, AppError> {
        let first_name = validate::required_text(req.first_name, "firstName")?;
        let last_name = validate::required_text(req.last_name, "lastName")?;
        let email = validate::email(req.email.as_deref().unwrap_or_default())?;
        let phone = validate::phone(req.phone.as_deref().unwrap_or_default())?;
        let password = req
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::required("password"))?;
        let gender = match validate::text(req.gender) {
            Some(g) => validate::gender(&g)?,
            None => Default::default(),
        };
        let dob = validate::text(req.dob)
            .map(|d| validate::dob(&d))
            .transpose()?;

        // Cheap early answer; the store re-checks atomically on insert.
        if self.store.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AppError::Conflict {
                field: "email".into(),
            });
        }
        if self.store.find_by_phone(&phone).await?.is_some() {
            warn!(email = %email, "phone already registered");
            return Err(AppError::Conflict {
                field: "phone".into(),
            });
        }

        if !policy::validate(&password) {
            warn!("password rejected by policy");
            return Err(AppError::validation("password", policy::PASSWORD_RULES));
        }

        let password_hash = self.hash(password).await?;

        let user = self
            .store
            .insert(NewUser {
                email,
                phone: Some(phone),
                password_hash,
                gender,
                first_name: Some(first_name),
                last_name: Some(last_name),
                address: validate::text(req.address),
                dob,
                qualification: validate::text(req.qualification),
            })
            .await?;
        Ok(user)
    }

    /// Unknown email and wrong password are indistinguishable to the caller,
    /// in both the response and the time taken.
    #[instrument(skip_all)]
    pub async fn login(&self, req: LoginRequest) -> Result<Session, AppError> {
        let email = validate::text(req.email)
            .map(|e| validate::normalize_email(&e))
            .ok_or_else(|| AppError::required("email"))?;
        let password = req
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::required("password"))?;

        let Some(user) = self.store.find_by_email(&email).await? else {
            let dummy = self.dummy_hash().await?;
            let _ = self.verify(password, dummy).await?;
            warn!(email = %email, "login unknown email");
            return Err(AppError::InvalidCredentials);
        };

        if !self.verify(password, user.password_hash.clone()).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        let token = self.issue(user.id)?;
        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok(Session {
            token,
            user: user.into(),
        })
    }

    /// Nothing to invalidate server-side; the caller discards its token.
    pub fn logout(&self, principal: &UserRecord) {
        info!(user_id = %principal.id, "user logged out");
    }

    pub fn get_own_details(&self, principal: &UserRecord) -> PublicUser {
        principal.into()
    }

    #[instrument(skip_all, fields(user_id = %principal.id))]
    pub async fn update_own_details(
        &self,
        principal: &UserRecord,
        req: UpdateDetailsRequest,
    ) -> Result<PublicUser, AppError> {
        let changes = profile_changes(req)?;
        let user = self.store.update(principal.id, changes).await?;
        info!("user details updated");
        Ok(user.into())
    }

    #[instrument(skip_all, fields(user_id = %principal.id))]
    pub async fn change_own_password(
        &self,
        principal: &UserRecord,
        req: ChangePasswordRequest,
    ) -> Result<(), AppError> {
        let new_password = req
            .new_password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::required("newPassword"))?;
        let confirm = req
            .confirm_password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::required("confirmPassword"))?;
        if new_password != confirm {
            return Err(AppError::validation("confirmPassword", "Passwords do not match"));
        }
        if !policy::validate(&new_password) {
            return Err(AppError::validation("newPassword", policy::PASSWORD_RULES));
        }

        let hash = self.hash(new_password).await?;
        self.store
            .update(principal.id, UserUpdate::password(hash))
            .await?;
        info!("password changed");
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<PublicUser>, AppError> {
        Ok(self.store.list_all().await?)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<PublicUser, AppError> {
        self.store
            .find_by_id(id)
            .await?
            .map(PublicUser::from)
            .ok_or(AppError::NotFound)
    }

    /// Full replacement of the editable profile: every field is required.
    #[instrument(skip(self, req))]
    pub async fn update_by_id(
        &self,
        id: Uuid,
        req: UpdateDetailsRequest,
    ) -> Result<PublicUser, AppError> {
        for (value, field) in [
            (&req.first_name, "firstName"),
            (&req.last_name, "lastName"),
            (&req.phone, "phone"),
            (&req.gender, "gender"),
            (&req.dob, "dob"),
            (&req.address, "address"),
            (&req.qualification, "qualification"),
        ] {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                return Err(AppError::required(field));
            }
        }
        let changes = profile_changes(req)?;
        let user = self.store.update(id, changes).await?;
        info!("user updated");
        Ok(user.into())
    }

    #[instrument(skip(self))]
    pub async fn delete_by_id(&self, id: Uuid) -> Result<(), AppError> {
        if !self.store.delete(id).await? {
            return Err(AppError::NotFound);
        }
        info!("user deleted");
        Ok(())
    }

    fn issue(&self, user_id: Uuid) -> Result<String, AppError> {
        self.tokens.issue(user_id).map_err(|e| {
            error!(error = %e, "jwt sign failed");
            AppError::Internal(e.into())
        })
    }

    async fn hash(&self, password: String) -> Result<String, AppError> {
        self.hasher.hash_blocking(password).await.map_err(|e| {
            error!(error = %e, "hash_password failed");
            AppError::Internal(e)
        })
    }

    async fn verify(&self, password: String, hash: String) -> Result<bool, AppError> {
        self.hasher.verify_blocking(password, hash).await.map_err(|e| {
            error!(error = %e, "verify_password failed");
            AppError::Internal(e)
        })
    }

    async fn dummy_hash(&self) -> Result<String, AppError> {
        self.dummy_hash
            .get_or_try_init(|| self.hash("timing-equalisation-only".to_string()))
            .await
            .cloned()
    }
}

/// Validates whichever profile fields are present.
fn profile_changes(req: UpdateDetailsRequest) -> Result<UserUpdate, AppError> {
    Ok(UserUpdate {
        first_name: validate::text(req.first_name),
        last_name: validate::text(req.last_name),
        phone: validate::text(req.phone)
            .map(|p| validate::phone(&p))
            .transpose()?,
        gender: validate::text(req.gender)
            .map(|g| validate::gender(&g))
            .transpose()?,
        address: validate::text(req.address),
        dob: validate::text(req.dob)
            .map(|d| validate::dob(&d))
            .transpose()?,
        qualification: validate::text(req.qualification),
        password_hash: None,
    })
}
