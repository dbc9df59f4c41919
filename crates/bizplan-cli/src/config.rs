//! Configuration file management for bizplan.
//!
//! Provides a TOML-based config file at `~/.config/bizplan/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use bizplan_core::batch::BatchConfig;
use bizplan_core::model::{ModelBackend, ModelSettings, OllamaHttpClient};

pub const DEFAULT_INPUT: &str = "businesses.csv";
pub const DEFAULT_OUTPUT_DIR: &str = "Generated_Business_Plans";
pub const ERROR_LOG_NAME: &str = "error_log.txt";
pub const DEFAULT_MODEL: &str = "mistral";
pub const DEFAULT_OLLAMA_BIN: &str = "ollama";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

/// On-disk config. Every key is optional so a partial file only overrides
/// what it names.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub model: ModelSection,
    pub batch: BatchSection,
    pub paths: PathsSection,
    pub prompt: PromptSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// `ollama-cli` or `ollama-http`.
    pub backend: Option<String>,
    pub name: Option<String>,
    pub host: Option<String>,
    pub ollama_bin: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub concurrency: Option<usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub input: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub error_log: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSection {
    pub template_file: Option<PathBuf>,
}

impl ConfigFile {
    /// The file `bizplan init` writes: every built-in default spelled out.
    pub fn with_defaults() -> Self {
        Self {
            model: ModelSection {
                backend: Some(ModelBackend::default().to_string()),
                name: Some(DEFAULT_MODEL.to_string()),
                host: Some(OllamaHttpClient::DEFAULT_HOST.to_string()),
                ollama_bin: Some(DEFAULT_OLLAMA_BIN.to_string()),
                timeout_secs: Some(BatchConfig::DEFAULT_TASK_TIMEOUT.as_secs()),
            },
            batch: BatchSection {
                concurrency: Some(BatchConfig::default_concurrency()),
            },
            paths: PathsSection {
                input: Some(PathBuf::from(DEFAULT_INPUT)),
                output_dir: Some(PathBuf::from(DEFAULT_OUTPUT_DIR)),
                error_log: None,
            },
            prompt: PromptSection::default(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the bizplan config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/bizplan` or `~/.config/bizplan`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("bizplan");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("bizplan")
}

/// Return the path to the bizplan config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Load the config file if there is one. A file that exists but does not
/// parse is an error.
pub fn load_optional_config(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return Ok(None);
    }
    load_config(path).map(Some)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub input: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub error_log: Option<PathBuf>,
    pub model: Option<String>,
    pub backend: Option<ModelBackend>,
    pub ollama_host: Option<String>,
    pub ollama_bin: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub template: Option<PathBuf>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct BizplanConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub error_log: PathBuf,
    pub template_file: Option<PathBuf>,
    pub model: ModelSettings,
    pub batch: BatchConfig,
}

impl BizplanConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default, reading the config file from [`config_path`].
    pub fn resolve(cli: &Overrides) -> Result<Self> {
        let file = load_optional_config(&config_path())?;
        Self::resolve_with(cli, file.as_ref())
    }

    /// Resolve against an already-loaded config file.
    ///
    /// - Paths: flag > `BIZPLAN_INPUT` / `BIZPLAN_OUTPUT_DIR` > `[paths]` > default.
    ///   The error log has no env var and defaults to `<output_dir>/error_log.txt`.
    /// - Model: flag > `BIZPLAN_MODEL` / `BIZPLAN_BACKEND` / `BIZPLAN_OLLAMA_HOST` > `[model]` > default.
    /// - Concurrency: flag > `BIZPLAN_CONCURRENCY` > `[batch]` > available parallelism.
    pub fn resolve_with(cli: &Overrides, file: Option<&ConfigFile>) -> Result<Self> {
        let empty = ConfigFile::default();
        let file = file.unwrap_or(&empty);

        let input = cli
            .input
            .clone()
            .or_else(|| env_var("BIZPLAN_INPUT").map(PathBuf::from))
            .or_else(|| file.paths.input.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT));

        let output_dir = cli
            .output_dir
            .clone()
            .or_else(|| env_var("BIZPLAN_OUTPUT_DIR").map(PathBuf::from))
            .or_else(|| file.paths.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let error_log = cli
            .error_log
            .clone()
            .or_else(|| file.paths.error_log.clone())
            .unwrap_or_else(|| output_dir.join(ERROR_LOG_NAME));

        let backend = match cli.backend {
            Some(backend) => backend,
            None => match env_var("BIZPLAN_BACKEND").or_else(|| file.model.backend.clone()) {
                Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
                None => ModelBackend::default(),
            },
        };

        let model = cli
            .model
            .clone()
            .or_else(|| env_var("BIZPLAN_MODEL"))
            .or_else(|| file.model.name.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let host = cli
            .ollama_host
            .clone()
            .or_else(|| env_var("BIZPLAN_OLLAMA_HOST"))
            .or_else(|| file.model.host.clone())
            .unwrap_or_else(|| OllamaHttpClient::DEFAULT_HOST.to_string());

        let ollama_bin = cli
            .ollama_bin
            .clone()
            .or_else(|| file.model.ollama_bin.clone())
            .unwrap_or_else(|| DEFAULT_OLLAMA_BIN.to_string());

        let concurrency = match cli.concurrency {
            Some(n) => n,
            None => match env_var("BIZPLAN_CONCURRENCY") {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("BIZPLAN_CONCURRENCY is not a number: {raw:?}"))?,
                None => file
                    .batch
                    .concurrency
                    .unwrap_or_else(BatchConfig::default_concurrency),
            },
        };
        if concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if concurrency > BatchConfig::MAX_CONCURRENCY {
            anyhow::bail!(
                "concurrency must be at most {}",
                BatchConfig::MAX_CONCURRENCY
            );
        }

        let timeout = cli
            .timeout_secs
            .or(file.model.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(BatchConfig::DEFAULT_TASK_TIMEOUT);
        if timeout.is_zero() {
            anyhow::bail!("timeout must be at least 1 second");
        }

        let template_file = cli
            .template
            .clone()
            .or_else(|| file.prompt.template_file.clone());

        Ok(Self {
            input,
            output_dir,
            error_log,
            template_file,
            model: ModelSettings {
                backend,
                model,
                ollama_bin,
                host,
                timeout,
            },
            batch: BatchConfig {
                concurrency,
                task_timeout: timeout,
            },
        })
    }
}

/// A set, non-empty environment variable.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ENV_KEYS: [&str; 6] = [
        "BIZPLAN_INPUT",
        "BIZPLAN_OUTPUT_DIR",
        "BIZPLAN_MODEL",
        "BIZPLAN_BACKEND",
        "BIZPLAN_OLLAMA_HOST",
        "BIZPLAN_CONCURRENCY",
    ];

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        let guard = crate::test_util::lock_env();
        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }
        guard
    }

    fn file_config() -> ConfigFile {
        toml::from_str(
            r#"
            [model]
            backend = "ollama-http"
            name = "llama3"
            host = "http://file:11434"
            timeout_secs = 30

            [batch]
            concurrency = 3

            [paths]
            input = "file.csv"
            output_dir = "file-out"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let _lock = lock_env();

        let config = BizplanConfig::resolve_with(&Overrides::default(), None).unwrap();
        assert_eq!(config.input, PathBuf::from("businesses.csv"));
        assert_eq!(config.output_dir, PathBuf::from("Generated_Business_Plans"));
        assert_eq!(
            config.error_log,
            PathBuf::from("Generated_Business_Plans").join("error_log.txt")
        );
        assert_eq!(config.model.backend, ModelBackend::OllamaCli);
        assert_eq!(config.model.model, "mistral");
        assert_eq!(config.model.host, "http://localhost:11434");
        assert_eq!(config.model.ollama_bin, "ollama");
        assert_eq!(config.batch.task_timeout, Duration::from_secs(600));
        assert!(config.batch.concurrency >= 1);
        assert!(config.template_file.is_none());
    }

    #[test]
    fn config_file_overrides_defaults() {
        let _lock = lock_env();

        let file = file_config();
        let config = BizplanConfig::resolve_with(&Overrides::default(), Some(&file)).unwrap();
        assert_eq!(config.input, PathBuf::from("file.csv"));
        assert_eq!(config.output_dir, PathBuf::from("file-out"));
        assert_eq!(config.error_log, PathBuf::from("file-out/error_log.txt"));
        assert_eq!(config.model.backend, ModelBackend::OllamaHttp);
        assert_eq!(config.model.model, "llama3");
        assert_eq!(config.model.host, "http://file:11434");
        assert_eq!(config.batch.concurrency, 3);
        assert_eq!(config.batch.task_timeout, Duration::from_secs(30));
        assert_eq!(config.model.timeout, Duration::from_secs(30));
    }

    #[test]
    fn env_var_overrides_config_file() {
        let _lock = lock_env();

        unsafe { std::env::set_var("BIZPLAN_MODEL", "env-model") };
        unsafe { std::env::set_var("BIZPLAN_CONCURRENCY", "7") };
        unsafe { std::env::set_var("BIZPLAN_BACKEND", "cli") };
        unsafe { std::env::set_var("BIZPLAN_OUTPUT_DIR", "env-out") };

        let file = file_config();
        let result = BizplanConfig::resolve_with(&Overrides::default(), Some(&file));

        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }

        let config = result.unwrap();
        assert_eq!(config.model.model, "env-model");
        assert_eq!(config.batch.concurrency, 7);
        assert_eq!(config.model.backend, ModelBackend::OllamaCli);
        assert_eq!(config.output_dir, PathBuf::from("env-out"));
        assert_eq!(config.error_log, PathBuf::from("env-out/error_log.txt"));
        // Not overridden by env.
        assert_eq!(config.input, PathBuf::from("file.csv"));
    }

    #[test]
    fn cli_flag_overrides_all() {
        let _lock = lock_env();

        unsafe { std::env::set_var("BIZPLAN_MODEL", "env-model") };
        unsafe { std::env::set_var("BIZPLAN_OLLAMA_HOST", "http://env:1") };

        let cli = Overrides {
            model: Some("cli-model".into()),
            ollama_host: Some("http://cli:2".into()),
            concurrency: Some(1),
            error_log: Some(PathBuf::from("errors.txt")),
            timeout_secs: Some(5),
            ..Overrides::default()
        };
        let file = file_config();
        let result = BizplanConfig::resolve_with(&cli, Some(&file));

        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }

        let config = result.unwrap();
        assert_eq!(config.model.model, "cli-model");
        assert_eq!(config.model.host, "http://cli:2");
        assert_eq!(config.batch.concurrency, 1);
        assert_eq!(config.error_log, PathBuf::from("errors.txt"));
        assert_eq!(config.batch.task_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let _lock = lock_env();

        unsafe { std::env::set_var("BIZPLAN_CONCURRENCY", "lots") };
        let bad_env = BizplanConfig::resolve_with(&Overrides::default(), None);
        unsafe { std::env::remove_var("BIZPLAN_CONCURRENCY") };
        assert!(
            bad_env
                .unwrap_err()
                .to_string()
                .contains("BIZPLAN_CONCURRENCY")
        );

        let zero = Overrides {
            concurrency: Some(0),
            ..Overrides::default()
        };
        assert!(BizplanConfig::resolve_with(&zero, None).is_err());

        let huge = Overrides {
            concurrency: Some(usize::MAX),
            ..Overrides::default()
        };
        let err = BizplanConfig::resolve_with(&huge, None).unwrap_err();
        assert!(err.to_string().contains("at most"), "{err}");

        let file: ConfigFile = toml::from_str("[model]\nbackend = \"carrier-pigeon\"\n").unwrap();
        let err = BizplanConfig::resolve_with(&Overrides::default(), Some(&file)).unwrap_err();
        assert!(err.to_string().contains("unknown model backend"));
    }

    #[test]
    fn partial_config_file_parses() {
        let file: ConfigFile = toml::from_str("[batch]\nconcurrency = 2\n").unwrap();
        assert_eq!(file.batch.concurrency, Some(2));
        assert!(file.model.name.is_none());
        assert!(file.paths.input.is_none());
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bizplan").join("config.toml");

        save_config(&path, &ConfigFile::with_defaults()).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded.model.backend.as_deref(), Some("ollama-cli"));
        assert_eq!(loaded.model.name.as_deref(), Some("mistral"));
        assert_eq!(loaded.model.timeout_secs, Some(600));
        assert_eq!(loaded.paths.input, Some(PathBuf::from("businesses.csv")));
        assert!(loaded.paths.error_log.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        save_config(&path, &ConfigFile::default()).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(
            load_optional_config(&tmp.path().join("nope.toml"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[batch\nconcurrency = ").unwrap();
        let err = load_optional_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("bizplan/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
