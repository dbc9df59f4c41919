//! `bizplan run` command: generate a plan for every record in the input file.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use bizplan_core::batch::{BatchProgress, BatchResult, PlanPipeline, run_batch};
use bizplan_core::model;
use bizplan_core::prompt::PromptTemplate;
use bizplan_core::setup;
use bizplan_core::writer::FsPlanWriter;

use crate::config::BizplanConfig;

/// Run the batch command.
pub async fn run_generate(config: &BizplanConfig, show_progress: bool) -> Result<()> {
    let template = match &config.template_file {
        Some(path) => PromptTemplate::from_file(path)?,
        None => PromptTemplate::default(),
    };

    let prepared = setup::prepare(&config.input, &config.output_dir, &config.error_log)?;
    let mut error_log = prepared.error_log;
    let records = prepared.records.records;
    let skipped = prepared.records.skipped.len();

    let client = model::build_client(&config.model).context("failed to set up model client")?;
    let pipeline = PlanPipeline::new(
        template,
        client,
        Arc::new(FsPlanWriter::new(&config.output_dir)),
    );

    println!("Processing {} businesses...", records.len());
    println!("  Model: {} ({})", config.model.model, config.model.backend);
    println!("  Concurrency: {}", config.batch.concurrency);
    println!("  Output: {}", config.output_dir.display());

    // Set up graceful shutdown: first signal cancels, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nFinishing in-flight plans (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let progress = Arc::new(BatchProgress::new());
    let bar = progress_bar(records.len(), show_progress && std::io::stderr().is_terminal());
    let ticker = spawn_ticker(bar.clone(), Arc::clone(&progress));

    let result = run_batch(
        records,
        &pipeline,
        &config.batch,
        &mut error_log,
        &progress,
        cancel.clone(),
    )
    .await;

    ticker.abort();
    bar.set_position(progress.completed() as u64);
    bar.finish_and_clear();

    print_summary(&result, skipped, &config.output_dir, error_log.path());

    if cancel.is_cancelled() {
        println!("\nRun interrupted; unsent records were logged as cancelled.");
        std::process::exit(130);
    }

    Ok(())
}

fn progress_bar(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar
}

/// Mirror the batch counters onto the bar until aborted.
fn spawn_ticker(bar: ProgressBar, progress: Arc<BatchProgress>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;
            bar.set_position(progress.completed() as u64);
            bar.set_message(format!(
                "{} ok, {} failed",
                progress.succeeded(),
                progress.failed()
            ));
        }
    })
}

fn print_summary(result: &BatchResult, skipped: usize, output_dir: &Path, error_log: &Path) {
    println!("\n=== Summary Report ===");
    println!("Total businesses: {}", result.total);
    println!("Successful plans: {}", result.succeeded);
    println!("Failures:         {}", result.failed);
    println!("Skipped rows:     {skipped}");
    println!("Elapsed:          {:.1}s", result.elapsed.as_secs_f64());

    if result.succeeded > 0 {
        println!("\nPlans written to {}", output_dir.display());
    }
    if result.failed > 0 {
        println!("Check {} for details.", error_log.display());
    }
    if skipped > 0 {
        println!("Malformed input rows were skipped; see the warnings above.");
    }

    println!("\nBusiness plan generation complete!");
}
