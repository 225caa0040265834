use crate::config::AppConfig;
use crate::db;
use crate::users::{repo::UserStore, PgUserStore, UserService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect(&config.db).await?;
        let store = Arc::new(PgUserStore::new(pool)) as Arc<dyn UserStore>;
        Ok(Self::from_parts(store, Arc::new(config)))
    }

    pub fn from_parts(store: Arc<dyn UserStore>, config: Arc<AppConfig>) -> Self {
        Self {
            users: UserService::new(store),
            config,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::users::memory::MemoryUserStore;

        let config = AppConfig::from_lookup(|_| None).expect("default config");
        Self::from_parts(Arc::new(MemoryUserStore::default()), Arc::new(config))
    }
}
