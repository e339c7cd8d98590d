use std::sync::Arc;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::Claims;
use crate::{
    clock::{Clock, SystemClock},
    config::JwtConfig,
};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
    #[error("failed to sign token")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Signs and verifies stateless HS256 session tokens.
///
/// The secret is fixed for the life of the process; changing it invalidates
/// every token already handed out.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(config: &JwtConfig, clock: Arc<dyn Clock>) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
        } = config.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            ttl: Duration::minutes(ttl_minutes),
            clock,
        }
    }

    pub fn from_config(config: &JwtConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn issue(&self, subject: Uuid) -> Result<String, TokenError> {
        let now = self.clock.now();
        let exp = now + self.ttl;
        let claims = Claims {
            sub: subject,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(TokenError::Signing)?;
        debug!(user_id = %subject, "jwt signed");
        Ok(token)
    }

    /// Returns the subject of a correctly signed, unexpired token.
    ///
    /// Expiry is checked against our own clock, and only after the signature,
    /// issuer and audience have been validated.
    pub fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            warn!(error = %e, "jwt rejected");
            TokenError::Malformed
        })?;

        if self.clock.now_unix() > data.claims.exp {
            debug!(user_id = %data.claims.sub, "jwt expired");
            return Err(TokenError::Expired);
        }
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;

    pub(crate) fn jwt_config(secret: &str, issuer: &str, audience: &str) -> JwtConfig {
        JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 5,
        }
    }

    fn make_service(secret: &str, issuer: &str, audience: &str) -> (TokenService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(time::OffsetDateTime::now_utc()));
        let svc = TokenService::new(&jwt_config(secret, issuer, audience), clock.clone());
        (svc, clock)
    }

    #[test]
    fn issue_and_verify_token() {
        let (svc, _) = make_service("dev-secret", "test-issuer", "test-aud");
        let user_id = Uuid::new_v4();
        let token = svc.issue(user_id).expect("sign");
        assert_eq!(svc.verify(&token).expect("verify"), user_id);
    }

    #[test]
    fn token_expires_after_ttl() {
        let (svc, clock) = make_service("dev-secret", "iss", "aud");
        let user_id = Uuid::new_v4();
        let token = svc.issue(user_id).unwrap();

        clock.advance(Duration::minutes(5));
        assert_eq!(svc.verify(&token).unwrap(), user_id, "valid up to the expiry instant");

        clock.advance(Duration::seconds(1));
        assert!(matches!(svc.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn wrong_secret_is_malformed() {
        let (good, _) = make_service("secret-a", "iss", "aud");
        let (bad, _) = make_service("secret-b", "iss", "aud");
        let token = bad.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(good.verify(&token), Err(TokenError::Malformed)));
    }

    #[test]
    fn wrong_issuer_or_audience_is_malformed() {
        let (good, _) = make_service("same-secret", "good-iss", "good-aud");
        let (other_iss, _) = make_service("same-secret", "bad-iss", "good-aud");
        let (other_aud, _) = make_service("same-secret", "good-iss", "bad-aud");
        let token = good.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(other_iss.verify(&token), Err(TokenError::Malformed)));
        assert!(matches!(other_aud.verify(&token), Err(TokenError::Malformed)));
    }

    #[test]
    fn tampered_payload_is_malformed() {
        let (svc, _) = make_service("dev-secret", "iss", "aud");
        let token = svc.issue(Uuid::new_v4()).unwrap();
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();

        // swap in a payload for another subject with a far-future expiry
        let (attacker, _) = make_service("attacker", "iss", "aud");
        let forged = attacker.issue(Uuid::new_v4()).unwrap();
        parts[1] = forged.split('.').nth(1).unwrap().to_string();

        assert!(matches!(svc.verify(&parts.join(".")), Err(TokenError::Malformed)));
    }

    #[test]
    fn garbage_is_malformed() {
        let (svc, _) = make_service("dev-secret", "iss", "aud");
        for t in ["", "abc", "a.b.c", "Bearer x"] {
            assert!(matches!(svc.verify(t), Err(TokenError::Malformed)), "{t:?}");
        }
    }

    #[test]
    fn expired_forgery_reports_malformed_not_expired() {
        let (svc, clock) = make_service("dev-secret", "iss", "aud");
        let (attacker, _) = make_service("attacker", "iss", "aud");
        let forged = attacker.issue(Uuid::new_v4()).unwrap();
        clock.advance(Duration::hours(1));
        assert!(matches!(svc.verify(&forged), Err(TokenError::Malformed)));
    }
}
