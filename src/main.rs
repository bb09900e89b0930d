use anyhow::Context;
use draft_store::{run, Backend, ConsoleReporter, DraftConfig, FileSystemHost, MemoryHost};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger (set RUST_LOG=debug to trace each stage)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = DraftConfig::from_env();
    let mut reporter = ConsoleReporter;

    let outcome = match config.backend {
        Backend::Disk => {
            let host = FileSystemHost::from_config(&config);
            log::info!("Using storage sandbox {}", host.sandbox_dir().display());
            run(&host, &mut reporter).await
        }
        Backend::Memory => run(&MemoryHost::from_config(&config), &mut reporter).await,
    }
    .context("draft workflow failed")?;

    log::debug!("Outcome: {}", serde_json::to_string(&outcome)?);
    Ok(())
}
