use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::error;

/// Argon2id memory cost in KiB.
pub const MEMORY_COST_KIB: u32 = 19 * 1024;
/// Argon2id iteration count.
pub const TIME_COST: u32 = 2;
pub const PARALLELISM: u32 = 1;

/// Salted Argon2id hashing with a fixed cost.
///
/// Both operations are CPU-bound and slow on purpose; async callers run them
/// through `spawn_blocking` and never while holding a store lock.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)
            .expect("static argon2 params are valid");
        Self { params }
    }
}

impl PasswordHasher {
    /// Minimum-cost hasher so tests do not spend seconds per hash.
    #[cfg(test)]
    pub fn fast() -> Self {
        Self {
            params: Params::new(Params::MIN_M_COST, 1, 1, None).expect("min params"),
        }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Verifies against a PHC string; cost parameters are read from the hash.
    pub fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        Ok(self
            .argon2()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }

    pub async fn hash_blocking(&self, plain: String) -> anyhow::Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plain)).await?
    }

    pub async fn verify_blocking(&self, plain: String, hash: String) -> anyhow::Result<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&plain, &hash)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = PasswordHasher::fast();
        let password = "Secur3P@ssw0rd!";
        let hash = hasher.hash(password).expect("hashing should succeed");
        assert!(hasher.verify(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = PasswordHasher::fast();
        let hash = hasher.hash("Abcdef1!").expect("hashing should succeed");
        assert!(!hasher.verify("Abcdef1?", &hash).expect("verify should not error"));
        assert!(!hasher.verify("abcdef1!", &hash).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = PasswordHasher::fast()
            .verify("anything", "not-a-valid-hash")
            .unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn salts_make_hashes_unique() {
        let hasher = PasswordHasher::fast();
        let a = hasher.hash("Abcdef1!").unwrap();
        let b = hasher.hash("Abcdef1!").unwrap();
        assert_ne!(a, b);
        assert!(!a.contains("Abcdef1!"));
    }

    #[test]
    fn production_cost_is_encoded_in_hash() {
        let hash = PasswordHasher::default().hash("Abcdef1!").unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=19456,t=2,p=1$"));
        // a hash made at any cost verifies with any hasher instance
        assert!(PasswordHasher::fast().verify("Abcdef1!", &hash).unwrap());
    }

    #[tokio::test]
    async fn blocking_variants_match_sync_ones() {
        let hasher = PasswordHasher::fast();
        let hash = hasher.hash_blocking("Abcdef1!".into()).await.unwrap();
        assert!(hasher.verify_blocking("Abcdef1!".into(), hash.clone()).await.unwrap());
        assert!(!hasher.verify_blocking("nope".into(), hash).await.unwrap());
    }
}
