use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loam_core::Settings;
use loam_knowledge::KnowledgeEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| settings.logging.level.clone().into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let knowledge = settings.knowledge_settings();
    let engine = KnowledgeEngine::open(knowledge.clone()).await?;
    let project = engine
        .register_project(&knowledge.project_name, &knowledge.home)
        .await?;
    engine.set_default_project(&project.name).await?;
    info!(
        "Project '{}' registered at {}",
        project.name,
        project.root.display()
    );

    let report = engine.sync(&project).await?;
    info!(
        "Initial sync: {} new, {} modified, {} deleted, {} moved",
        report.new.len(),
        report.modified.len(),
        report.deleted.len(),
        report.moves.len()
    );
    for failure in report.errors.iter().chain(&report.skipped) {
        warn!("{}: {}", failure.path, failure.reason);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down after the current pass");
            let _ = shutdown_tx.send(true);
        }
    });

    engine.watch(&project, shutdown_rx).await?;
    Ok(())
}
