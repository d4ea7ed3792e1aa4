use std::{sync::Arc, time::Duration};

use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::{config::JwtConfig, db::UserId};

/// The only algorithm tokens are signed with or accepted in.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Source of "now" for token timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// JWT payload used for authentication.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: String, // user ID, string form
    pub iat: i64,    // issued at (unix timestamp)
    pub exp: i64,    // expires at (unix timestamp)
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("bad token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token has no usable subject")]
    MissingSubject,
    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            JwtErrorKind::InvalidSignature
            | JwtErrorKind::InvalidAlgorithm
            | JwtErrorKind::MissingAlgorithm => TokenError::BadSignature,
            JwtErrorKind::ExpiredSignature => TokenError::Expired,
            JwtErrorKind::MissingRequiredClaim(claim) if claim == "sub" => {
                TokenError::MissingSubject
            }
            _ => TokenError::Malformed,
        }
    }
}

/// Issues and verifies HS256 bearer tokens bound to a user id.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self::with_clock(secret, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(secret: &[u8], ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
            clock,
        }
    }

    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self::new(cfg.secret.as_bytes(), cfg.ttl())
    }

    pub fn issue(&self, user_id: &UserId) -> Result<String, TokenError> {
        let now = self.clock.now().unix_timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now.saturating_add(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)),
        };
        let token =
            encode(&Header::new(ALGORITHM), &claims, &self.encoding).map_err(TokenError::Signing)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<UserId, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding, &validation)?.claims;
        if claims.exp <= self.clock.now().unix_timestamp() {
            return Err(TokenError::Expired);
        }

        let sub = claims.sub.trim();
        if sub.is_empty() {
            return Err(TokenError::MissingSubject);
        }
        let user_id = sub.parse::<UserId>().map_err(|_| TokenError::MissingSubject)?;
        debug!(user_id = %user_id, "jwt verified");
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Clock that only moves when told to.
    struct ManualClock(Mutex<OffsetDateTime>);

    impl ManualClock {
        fn new(start: OffsetDateTime) -> Arc<Self> {
            Arc::new(Self(Mutex::new(start)))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> OffsetDateTime {
            *self.0.lock().unwrap()
        }
    }

    const SECRET: &[u8] = b"dev-secret";

    fn start() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn sign_raw(header: Header, claims: &Claims, secret: &[u8]) -> String {
        encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let tokens = TokenService::new(SECRET, Duration::from_secs(3600));
        let token = tokens.issue(&UserId::Serial(42)).expect("sign");
        assert_eq!(tokens.verify(&token).expect("verify"), UserId::Serial(42));

        let oid = UserId::Object("65f0c0ffee0000000000abcd".into());
        let token = tokens.issue(&oid).expect("sign");
        assert_eq!(tokens.verify(&token).expect("verify"), oid);
    }

    #[test]
    fn token_expires_after_ttl() {
        let clock = ManualClock::new(start());
        let tokens =
            TokenService::with_clock(SECRET, Duration::from_secs(24 * 3600), clock.clone());
        let token = tokens.issue(&UserId::Serial(1)).unwrap();

        clock.advance(Duration::from_secs(24 * 3600 - 1));
        assert!(tokens.verify(&token).is_ok());

        clock.advance(Duration::from_secs(1));
        assert!(matches!(tokens.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn huge_ttl_saturates_instead_of_wrapping() {
        let tokens = TokenService::new(SECRET, Duration::from_secs(u64::MAX));
        let token = tokens.issue(&UserId::Serial(7)).expect("sign");
        assert_eq!(tokens.verify(&token).expect("verify"), UserId::Serial(7));
    }

    #[test]
    fn rejects_foreign_secret() {
        let good = TokenService::new(SECRET, Duration::from_secs(60));
        let bad = TokenService::new(b"another-secret", Duration::from_secs(60));
        let token = good.issue(&UserId::Serial(1)).unwrap();
        assert!(matches!(bad.verify(&token), Err(TokenError::BadSignature)));
    }

    #[test]
    fn rejects_other_algorithms() {
        let tokens = TokenService::new(SECRET, Duration::from_secs(60));
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: "1".into(),
            iat: now,
            exp: now + 60,
        };
        let token = sign_raw(Header::new(Algorithm::HS512), &claims, SECRET);
        assert!(matches!(tokens.verify(&token), Err(TokenError::BadSignature)));
    }

    #[test]
    fn rejects_garbage() {
        let tokens = TokenService::new(SECRET, Duration::from_secs(60));
        assert!(matches!(tokens.verify("not.a.jwt"), Err(TokenError::Malformed)));
        assert!(matches!(tokens.verify(""), Err(TokenError::Malformed)));
    }

    #[test]
    fn rejects_empty_or_unparsable_subject() {
        let tokens = TokenService::new(SECRET, Duration::from_secs(60));
        let now = OffsetDateTime::now_utc().unix_timestamp();
        for sub in ["", "  ", "ana@example.com"] {
            let claims = Claims {
                sub: sub.into(),
                iat: now,
                exp: now + 60,
            };
            let token = sign_raw(Header::new(ALGORITHM), &claims, SECRET);
            assert!(
                matches!(tokens.verify(&token), Err(TokenError::MissingSubject)),
                "subject {sub:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_token_without_subject_claim() {
        #[derive(Serialize)]
        struct NoSub {
            iat: i64,
            exp: i64,
        }
        let tokens = TokenService::new(SECRET, Duration::from_secs(60));
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let token = encode(
            &Header::new(ALGORITHM),
            &NoSub { iat: now, exp: now + 60 },
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(matches!(tokens.verify(&token), Err(TokenError::MissingSubject)));
    }
}
