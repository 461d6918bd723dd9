//! TOML configuration.
//!
//! Every section is optional except `[providers.primary]`, which only the
//! commands that talk to a model require. See `config/loom.example.toml`.

use anyhow::{bail, Context, Result};
use codeloom_core::host::CompilerSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub compiler: CompilerSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_project_id")]
    pub id: String,
    /// Extra globs skipped by the local store, on top of `.git`,
    /// `node_modules` and `target`.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            id: default_project_id(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_project_id() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_output_tokens: default_max_output_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_max_steps() -> usize {
    10
}
fn default_max_output_tokens() -> u32 {
    4096
}
fn default_system_prompt() -> String {
    "You are a coding assistant working inside the user's project. \
     Use the available tools to inspect symbols, search the code and read or edit files \
     before answering. Keep answers concise and reference files by path."
        .to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub backoff: BackoffKind,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            backoff: BackoffKind::default(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    pub primary: Option<ProviderConfig>,
    pub fallback: Option<ProviderConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub endpoint: String,
    /// Environment variable holding the API key, when the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Defaults for every section, rooted at the current directory.
    ///
    /// Used by commands that can run without a config file (`tools`, `call`).
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Like [`Config::minimal`] but rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::minimal();
        cfg.project.root = root.into();
        cfg
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.orchestrator.max_steps == 0 {
        bail!("orchestrator.max_steps must be >= 1");
    }
    if config.orchestrator.max_output_tokens == 0 {
        bail!("orchestrator.max_output_tokens must be >= 1");
    }
    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if config.project.id.trim().is_empty() {
        bail!("project.id must not be empty");
    }

    for (label, provider) in [
        ("primary", config.providers.primary.as_ref()),
        ("fallback", config.providers.fallback.as_ref()),
    ] {
        let Some(p) = provider else { continue };
        if p.model.trim().is_empty() {
            bail!("providers.{}.model must not be empty", label);
        }
        let endpoint = p.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            bail!(
                "providers.{}.endpoint must start with http:// or https://, got '{}'",
                label,
                p.endpoint
            );
        }
        if p.timeout_secs == 0 {
            bail!("providers.{}.timeout_secs must be > 0", label);
        }
    }

    if config.providers.fallback.is_some() && config.providers.primary.is_none() {
        bail!("providers.fallback requires providers.primary");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeloom_core::host::JsxMode;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.orchestrator.max_steps, 10);
        assert_eq!(cfg.orchestrator.max_output_tokens, 4096);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.backoff, BackoffKind::Exponential);
        assert_eq!(cfg.project.id, "local");
        assert_eq!(cfg.server.bind, "127.0.0.1:7878");
        assert!(cfg.providers.primary.is_none());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
            [project]
            root = "/srv/app"
            id = "app"

            [compiler]
            strict = true
            jsx = "preserve"

            [orchestrator]
            max_steps = 4

            [retry]
            backoff = "fixed"
            delay_ms = 10

            [providers.primary]
            kind = "openai"
            model = "gpt-4o-mini"
            endpoint = "https://api.openai.com"
            api_key_env = "OPENAI_API_KEY"

            [providers.fallback]
            kind = "ollama"
            model = "qwen2.5-coder:14b"
            endpoint = "http://localhost:11434"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.project.root, PathBuf::from("/srv/app"));
        assert!(cfg.compiler.strict);
        assert_eq!(cfg.compiler.jsx, JsxMode::Preserve);
        assert_eq!(cfg.orchestrator.max_steps, 4);
        assert_eq!(cfg.retry.backoff, BackoffKind::Fixed);
        let primary = cfg.providers.primary.unwrap();
        assert_eq!(primary.kind, ProviderKind::OpenAi);
        assert_eq!(primary.timeout_secs, 120);
        assert_eq!(cfg.providers.fallback.unwrap().kind, ProviderKind::Ollama);
    }

    #[test]
    fn test_rejects_zero_steps() {
        let err = parse_config("[orchestrator]\nmax_steps = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_steps"));
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let err = parse_config(
            "[providers.primary]\nkind = \"ollama\"\nmodel = \"m\"\nendpoint = \"localhost:11434\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn test_rejects_unknown_provider_kind() {
        assert!(parse_config(
            "[providers.primary]\nkind = \"bedrock\"\nmodel = \"m\"\nendpoint = \"http://x\"\n"
        )
        .is_err());
    }

    #[test]
    fn test_fallback_needs_primary() {
        let err = parse_config(
            "[providers.fallback]\nkind = \"ollama\"\nmodel = \"m\"\nendpoint = \"http://x\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires providers.primary"));
    }
}
