mod check_cmd;
mod config;
mod run_cmd;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};

use bizplan_core::model::ModelBackend;

use config::{BizplanConfig, Overrides};

#[derive(Parser)]
#[command(
    name = "bizplan",
    version,
    about = "Draft business plans in bulk with a local LLM"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a business plan for every row of the input CSV
    Run(RunArgs),
    /// Check that the configured model backend is reachable
    Check(ModelArgs),
    /// Write a default config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// Model name passed to Ollama (overrides BIZPLAN_MODEL)
    #[arg(long)]
    model: Option<String>,
    /// Transport: ollama-cli or ollama-http (overrides BIZPLAN_BACKEND)
    #[arg(long)]
    backend: Option<ModelBackend>,
    /// Ollama HTTP base URL (overrides BIZPLAN_OLLAMA_HOST)
    #[arg(long)]
    ollama_host: Option<String>,
    /// Path to the ollama binary
    #[arg(long)]
    ollama_bin: Option<String>,
    /// Timeout per plan in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args)]
struct RunArgs {
    /// CSV with name, problem, solution, landing_page columns (overrides BIZPLAN_INPUT)
    #[arg(long)]
    input: Option<PathBuf>,
    /// Directory for generated plans (overrides BIZPLAN_OUTPUT_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Failure log path [default: <output-dir>/error_log.txt]
    #[arg(long)]
    error_log: Option<PathBuf>,
    /// Maximum plans generated at once (overrides BIZPLAN_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,
    /// Prompt template file with {name}, {problem}, {solution}, {landing_page}
    #[arg(long)]
    template: Option<PathBuf>,
    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
    #[command(flatten)]
    model: ModelArgs,
}

impl ModelArgs {
    fn into_overrides(self) -> Overrides {
        Overrides {
            model: self.model,
            backend: self.backend,
            ollama_host: self.ollama_host,
            ollama_bin: self.ollama_bin,
            timeout_secs: self.timeout,
            ..Overrides::default()
        }
    }
}

impl RunArgs {
    fn into_overrides(self) -> Overrides {
        Overrides {
            input: self.input,
            output_dir: self.output_dir,
            error_log: self.error_log,
            concurrency: self.concurrency,
            template: self.template,
            ..self.model.into_overrides()
        }
    }
}

/// Execute the `bizplan init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::with_defaults();
    config::save_config(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  model.backend = {}", cfg.model.backend.unwrap_or_default());
    println!("  model.name = {}", cfg.model.name.unwrap_or_default());
    println!();
    println!("Next: run `bizplan check` to confirm Ollama is reachable.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let show_progress = !args.no_progress;
            let resolved = BizplanConfig::resolve(&args.into_overrides())?;
            run_cmd::run_generate(&resolved, show_progress).await?;
        }
        Commands::Check(args) => {
            let resolved = BizplanConfig::resolve(&args.into_overrides())?;
            check_cmd::run_check(&resolved.model).await?;
        }
        Commands::Init { force } => {
            cmd_init(force)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "bizplan", &mut std::io::stdout());
        }
    }

    Ok(())
}
