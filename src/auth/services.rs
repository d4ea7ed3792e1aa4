use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RegisterRequest},
        jwt::TokenService,
        password,
    },
    db::{NewUser, StoreError, User, UserId, UserStore},
    error::ApiError,
    state::AppState,
};

pub(crate) fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Argon2 is slow on purpose; keep it off the async workers.
async fn hash_off_thread(plain: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| ApiError::Internal(format!("hash task: {e}")))?
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn verify_off_thread(plain: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| ApiError::Internal(format!("verify task: {e}")))
}

/// Register, login and token authentication on top of a user store.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    tokens: TokenService,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.store.clone(), state.tokens.clone())
    }
}

impl AuthService {
    pub fn new(store: Arc<dyn UserStore>, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    /// Validates, hashes and inserts a new user. The unique index is the final word
    /// on duplicates; the lookup beforehand only saves a hash on the common path.
    pub async fn create_user(&self, req: RegisterRequest) -> Result<User, ApiError> {
        let name = req.name.trim().to_string();
        let email = normalize_email(&req.email);
        if name.is_empty() || email.is_empty() || req.password.is_empty() {
            return Err(ApiError::validation(
                "name, email and password are required",
            ));
        }
        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(ApiError::validation("invalid email"));
        }

        match self.store.find_by_email(&email).await {
            Ok(_) => {
                warn!(email = %email, "email already registered");
                return Err(ApiError::email_in_use());
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let password_hash = hash_off_thread(req.password).await?;
        let new_user = NewUser {
            name,
            email,
            avatar_url: req.avatar_url.unwrap_or_default().trim().to_string(),
            password_hash,
        };

        match self.store.insert(new_user).await {
            Ok(user) => Ok(user),
            Err(StoreError::DuplicateEmail) => {
                warn!("email claimed by a concurrent registration");
                Err(ApiError::email_in_use())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, ApiError> {
        let user = self.create_user(req).await?;
        let token = self.issue(&user)?;
        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(AuthResponse { token, user })
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, ApiError> {
        let email = normalize_email(&req.email);
        if email.is_empty() || req.password.is_empty() {
            return Err(ApiError::validation("email and password are required"));
        }

        let user = match self.store.find_by_email(&email).await {
            Ok(u) => u,
            Err(StoreError::NotFound) => {
                warn!(email = %email, "login unknown email");
                return Err(ApiError::invalid_credentials());
            }
            Err(e) => return Err(e.into()),
        };

        if !verify_off_thread(req.password, user.password_hash.clone()).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(ApiError::invalid_credentials());
        }

        let token = self.issue(&user)?;
        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok(AuthResponse { token, user })
    }

    /// Resolves a bearer token to a live user. Every failure is the same 401.
    pub async fn authenticate(&self, token: &str) -> Result<User, ApiError> {
        let user_id: UserId = self.tokens.verify(token).map_err(|e| {
            warn!(error = %e, "token rejected");
            ApiError::unauthorized()
        })?;

        match self.store.find_by_id(&user_id).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => {
                warn!(user_id = %user_id, "token subject no longer exists");
                Err(ApiError::unauthorized())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn issue(&self, user: &User) -> Result<String, ApiError> {
        self.tokens.issue(&user.id).map_err(|e| {
            error!(error = %e, user_id = %user.id, "jwt sign failed");
            ApiError::Internal(e.to_string())
        })
    }
}
