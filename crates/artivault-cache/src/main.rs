#![warn(missing_docs)]
//! ArtiVault cache daemon

use anyhow::Result;
use artivault_cache::{CacheCleaner, CacheRepo, ContentStore, OfflineTransport, VirtualRepo};
use artivault_core::ArtiVaultConfig;
use artivault_lock::LockRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("ArtiVault cache daemon starting...");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/artivault/artivault.toml"));
    let config = if config_path.exists() {
        ArtiVaultConfig::from_file(&config_path)?
    } else {
        tracing::warn!("Config file not found, using defaults: {}", config_path.display());
        ArtiVaultConfig::default()
    };

    let registry = Arc::new(LockRegistry::new(&config.lock));
    let store = Arc::new(ContentStore::in_memory());
    let transport = Arc::new(OfflineTransport);

    let mut repos = Vec::with_capacity(config.remote_repos.len());
    for repo_config in &config.remote_repos {
        let repo = CacheRepo::new(repo_config.clone(), registry.clone(), store.clone(), transport.clone())?;
        repos.push(Arc::new(repo));
    }
    let mut virtual_repos = Vec::with_capacity(config.virtual_repos.len());
    for virtual_config in &config.virtual_repos {
        let repo = VirtualRepo::new(virtual_config, &repos)?;
        tracing::info!(repo = repo.key(), members = ?repo.member_keys(), "virtual repository ready");
        virtual_repos.push(repo);
    }

    let cleaner = Arc::new(CacheCleaner::new(repos.clone()));
    let interval = config.cleanup_interval();
    let cleanup_cleaner = cleaner.clone();
    let cleanup_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let cleaner = cleanup_cleaner.clone();
            match tokio::task::spawn_blocking(move || cleaner.run_once()).await {
                Ok(Ok(report)) => match report.to_json() {
                    Ok(json) => tracing::info!(report = %json, "cleanup report"),
                    Err(e) => tracing::warn!(?report, "cleanup report not serializable: {}", e),
                },
                Ok(Err(e)) => tracing::warn!("Cache cleanup did not run: {}", e),
                Err(e) => tracing::error!("Cache cleanup task failed: {}", e),
            }
        }
    });

    tracing::info!(
        remote = repos.len(),
        virtual_repos = virtual_repos.len(),
        cleanup_interval = ?interval,
        "ArtiVault cache daemon ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    cleanup_handle.abort();
    let cleaner_for_stop = cleaner.clone();
    tokio::task::spawn_blocking(move || {
        cleaner_for_stop.request_stop()?;
        cleaner_for_stop.await_idle(Duration::from_secs(30))
    })
    .await??;

    let stats = registry.stats();
    tracing::info!(?stats, held_locks = registry.held_locks(), "ArtiVault cache daemon stopped");
    Ok(())
}
