//! Application state: the store, identity directory, progress engine, AI
//! gateway, and tutor prompts, wired together once at startup.
//!
//! Nothing here is a hidden global: `main` builds one `AppState`, wraps it
//! in an `Arc`, and hands it to the router.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::{load_app_config_from_env, Prompts};
use crate::domain::Lesson;
use crate::error::StoreError;
use crate::gateway::Gateway;
use crate::progress::ProgressEngine;
use crate::store::Store;
use crate::users::Directory;

pub struct AppState {
    pub store: Arc<Store>,
    pub directory: Directory,
    pub engine: ProgressEngine,
    pub gateway: Gateway,
    pub prompts: Prompts,
}

impl AppState {
    /// Build state from env: open the data file, load TOML config, seed the
    /// lesson bank into an empty store, build the gateway.
    #[instrument(level = "info", skip_all)]
    pub async fn from_env() -> Result<Self, StoreError> {
        let data_path = std::env::var("EDUDASH_DATA_PATH")
            .unwrap_or_else(|_| "./edudash_data.json".into());
        let store = Arc::new(Store::open(&data_path)?);

        let cfg = load_app_config_from_env().unwrap_or_default();

        // The store starts as a blank slate; the config bank only seeds an
        // empty lessons collection so a restored document always wins.
        if !cfg.lessons.is_empty() && store.list::<Lesson>().await.is_empty() {
            for entry in &cfg.lessons {
                store.create(entry.to_lesson()).await?;
            }
            info!(target: "edudash_backend", seeded = cfg.lessons.len(), "Seeded lesson bank from config");
        }

        let gateway = Gateway::new(&cfg.prompts);

        Ok(Self {
            directory: Directory::new(store.clone()),
            engine: ProgressEngine::new(store.clone()),
            gateway,
            prompts: cfg.prompts,
            store,
        })
    }
}
