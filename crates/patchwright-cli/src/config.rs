//! Configuration file management for patchwright.
//!
//! Provides a TOML-based config file at `~/.config/patchwright/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default,
//! mirroring the teacher's database-URL/token-secret resolution but
//! extended to patchwright's full pipeline and collaborator-credential
//! surface.

use std::path::PathBuf;

use anyhow::{Context, Result};
use patchwright_core::collaborators::{CodeHostConfig, LlmClientConfig, MailConfig};
use patchwright_core::PipelineConfig;
use patchwright_db::config::DbConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config file types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub pipeline: PipelineConfig,
    pub llm: LlmSection,
    pub codehost: CodeHostSection,
    pub mail: MailSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeHostSection {
    pub api_base: String,
    pub token: String,
}

impl Default for CodeHostSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSection {
    pub endpoint: String,
    pub api_key: String,
    pub from: String,
    pub recipients: Vec<String>,
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// The patchwright config directory. Always XDG layout:
/// `$XDG_CONFIG_HOME/patchwright` or `~/.config/patchwright`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("patchwright");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("patchwright")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// ---------------------------------------------------------------------------
// Read / write
// ---------------------------------------------------------------------------

pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix, since it may hold API keys.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Generate a random webhook signature secret: 32 random bytes, hex-encoded.
pub fn generate_signature_secret() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

// ---------------------------------------------------------------------------
// Resolved config
// ---------------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct AppConfig {
    pub db_config: DbConfig,
    pub pipeline: PipelineConfig,
    pub llm: LlmClientConfig,
    pub codehost: CodeHostConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// - DB URL: `cli_db_url` > `PATCHWRIGHT_DATABASE_URL` env > config file
    ///   `database.url` > [`DbConfig::DEFAULT_URL`].
    /// - Signature secret: `PATCHWRIGHT_SIGNATURE_SECRET` env > config file
    ///   `pipeline.signature_secret` > empty (signature verification is then
    ///   impossible if `signature_required` is also set -- `serve` refuses
    ///   to start in that case).
    /// - Everything else in `pipeline`/`llm`/`codehost`/`mail` comes from the
    ///   config file, defaulting per [`PipelineConfig::default`] and the
    ///   section `Default` impls above when the file (or a section of it) is
    ///   absent.
    pub fn resolve(cli_db_url: Option<&str>) -> Self {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("PATCHWRIGHT_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            if !cfg.database.url.is_empty() {
                cfg.database.url.clone()
            } else {
                DbConfig::DEFAULT_URL.to_string()
            }
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let mut pipeline = file_config
            .as_ref()
            .map(|cfg| cfg.pipeline.clone())
            .unwrap_or_default();
        if let Ok(secret) = std::env::var("PATCHWRIGHT_SIGNATURE_SECRET") {
            pipeline.signature_secret = secret;
        }

        let (llm, codehost, mail) = match file_config {
            Some(cfg) => (
                LlmClientConfig {
                    endpoint: cfg.llm.endpoint,
                    api_key: cfg.llm.api_key,
                    model: cfg.llm.model,
                },
                CodeHostConfig {
                    api_base: cfg.codehost.api_base,
                    token: cfg.codehost.token,
                },
                MailConfig {
                    endpoint: cfg.mail.endpoint,
                    api_key: cfg.mail.api_key,
                    from: cfg.mail.from,
                    recipients: cfg.mail.recipients,
                },
            ),
            None => (
                LlmClientConfig {
                    endpoint: String::new(),
                    api_key: String::new(),
                    model: String::new(),
                },
                CodeHostConfig {
                    api_base: "https://api.github.com".to_string(),
                    token: String::new(),
                },
                MailConfig {
                    endpoint: String::new(),
                    api_key: String::new(),
                    from: String::new(),
                    recipients: Vec::new(),
                },
            ),
        };

        Self {
            db_config: DbConfig::new(db_url),
            pipeline,
            llm,
            codehost,
            mail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    #[test]
    fn generate_signature_secret_is_64_hex_chars() {
        let secret = generate_signature_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(path.ends_with("patchwright/config.toml"));
    }

    #[test]
    fn resolve_with_cli_flag_overrides_env() {
        let _lock = lock_env();
        unsafe { std::env::set_var("PATCHWRIGHT_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = AppConfig::resolve(Some("postgresql://cli:5432/clidb"));
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        unsafe { std::env::remove_var("PATCHWRIGHT_DATABASE_URL") };
    }

    #[test]
    fn resolve_with_env_var_when_no_cli_flag() {
        let _lock = lock_env();
        unsafe { std::env::set_var("PATCHWRIGHT_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = AppConfig::resolve(None);
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");

        unsafe { std::env::remove_var("PATCHWRIGHT_DATABASE_URL") };
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("PATCHWRIGHT_DATABASE_URL") };
        unsafe { std::env::remove_var("PATCHWRIGHT_SIGNATURE_SECRET") };

        let config = AppConfig::resolve(None);
        // No config file is expected to exist in the test environment, so
        // this should fall through to the hardcoded default.
        if std::path::Path::new(&config_path()).exists() {
            return;
        }
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
    }

    #[test]
    fn resolve_signature_secret_from_env() {
        let _lock = lock_env();
        unsafe { std::env::set_var("PATCHWRIGHT_SIGNATURE_SECRET", "shhh") };

        let config = AppConfig::resolve(None);
        assert_eq!(config.pipeline.signature_secret, "shhh");

        unsafe { std::env::remove_var("PATCHWRIGHT_SIGNATURE_SECRET") };
    }
}
