use anyhow::Result;
use std::sync::Arc;

use intellilearn::core::config::Config;
use intellilearn::core::io::{NativeStorage, Storage};
use intellilearn::core::library::LibraryStore;
use intellilearn::services::llm::create_backend;
use intellilearn::services::workflow::WorkflowManager;
use intellilearn::ui::App;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    let backend = create_backend(&config)?;
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let library = Arc::new(LibraryStore::load(storage.clone(), config.library_file.clone()).await?);
    let workflow = WorkflowManager::new(&config, backend, library.clone(), storage);

    App::new(config, library, workflow).run().await
}
