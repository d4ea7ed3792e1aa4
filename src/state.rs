use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::jwt::TokenService;
use crate::config::AppConfig;
use crate::db::{self, UserStore};

/// Built once at startup and handed to every handler; the store is closed at shutdown.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
    pub tokens: TokenService,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        if config.dev_secret_outside_development() {
            warn!(app_env = %config.app_env, "JWT_SECRET not set; using the insecure development default");
        } else if config.jwt.uses_dev_secret() {
            debug!("using development JWT secret");
        }

        let store = db::connect(&config.store).await?;
        let tokens = TokenService::from_config(&config.jwt);
        Ok(Self::from_parts(config, store, tokens))
    }

    pub fn from_parts(config: Arc<AppConfig>, store: Arc<dyn UserStore>, tokens: TokenService) -> Self {
        Self {
            config,
            store,
            tokens,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{JwtConfig, StoreConfig, StoreKind};
        use crate::db::memory::MemoryUserStore;

        let config = Arc::new(AppConfig {
            app_env: "test".into(),
            store: StoreConfig {
                kind: StoreKind::Memory,
                url: String::new(),
                mongo_db: "test".into(),
                max_connections: 1,
            },
            jwt: JwtConfig {
                secret: "test".into(),
                ttl_hours: 1,
            },
            request_timeout_secs: 5,
        });
        let tokens = TokenService::from_config(&config.jwt);
        Self::from_parts(config, Arc::new(MemoryUserStore::new()), tokens)
    }
}
