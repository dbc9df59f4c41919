//! `bizplan check` command: confirm the model backend is reachable.

use anyhow::{Context, Result, bail};

use bizplan_core::model::{self, ModelError, ModelSettings};

pub async fn run_check(settings: &ModelSettings) -> Result<()> {
    let client = model::build_client(settings).context("failed to set up model client")?;

    println!("Checking {} backend...", settings.backend);
    match client.health_check().await {
        Ok(()) => {
            println!("  {} is reachable; model: {}", client.name(), settings.model);
            Ok(())
        }
        Err(ModelError::Unavailable(reason)) => bail!(
            "model runtime unavailable: {reason}\n\
             Install Ollama and make sure it is running, or pick another backend with --backend."
        ),
        Err(e) => bail!("model runtime check failed: {e}"),
    }
}
