use anyhow::{Context, Result};
use layer_core::providers::{ProviderSettings, anthropic, google, mask_secret, openai};
use layer_core::GenerationDefaults;
use layer_gateway::ApiKey;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Top-level configuration, read from `~/.layer/config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub defaults: GenerationDefaults,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.layer/layer.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Database path with a leading `~/` replaced by the home directory
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_cache_capacity() -> usize {
    layer_store::cache::DEFAULT_CAPACITY
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<ProviderConfig>,
}

impl ProvidersConfig {
    pub fn openai_settings(&self) -> Option<ProviderSettings> {
        self.openai.as_ref()?.settings(openai::DEFAULT_BASE_URL)
    }

    pub fn anthropic_settings(&self) -> Option<ProviderSettings> {
        self.anthropic.as_ref()?.settings(anthropic::DEFAULT_BASE_URL)
    }

    pub fn google_settings(&self) -> Option<ProviderSettings> {
        self.google.as_ref()?.settings(google::DEFAULT_BASE_URL)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl ProviderConfig {
    /// Adapter settings, or `None` when no API key is configured
    fn settings(&self, default_base_url: &str) -> Option<ProviderSettings> {
        let api_key = self.api_key.trim();
        if api_key.is_empty() {
            return None;
        }
        let base_url = self
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(default_base_url);
        let mut settings = ProviderSettings::new(api_key, base_url);
        settings.timeout_secs = self.timeout_secs;
        Some(settings)
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".layer")
}

pub fn expand_home(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

impl LayerConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        check_permissions(&path)?;

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `layer init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.warn_hardcoded_secrets(&content);
        Ok(config)
    }

    /// Expand allowlisted `${VAR}` references, then parse
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        Ok(toml::from_str(&expanded)?)
    }

    /// Copy with every API key and bearer token masked, for display
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        for provider in [
            &mut masked.providers.openai,
            &mut masked.providers.anthropic,
            &mut masked.providers.google,
        ]
        .into_iter()
        .flatten()
        {
            provider.api_key = mask_nonempty(&provider.api_key);
        }
        for key in &mut masked.auth.api_keys {
            key.token = mask_nonempty(&key.token);
        }
        masked
    }

    /// A secret that appears literally in the raw file did not come from the
    /// environment
    fn warn_hardcoded_secrets(&self, raw: &str) {
        let providers = [
            ("openai", &self.providers.openai, "OPENAI_API_KEY"),
            ("anthropic", &self.providers.anthropic, "ANTHROPIC_API_KEY"),
            ("google", &self.providers.google, "GOOGLE_API_KEY"),
        ];
        for (name, provider, var) in providers {
            if let Some(p) = provider {
                if !p.api_key.is_empty() && raw.contains(p.api_key.as_str()) {
                    warn!(
                        "{} API key is hardcoded in config file. For security, use environment variables: api_key = \"${{{}}}\"",
                        name, var
                    );
                }
            }
        }
        if self
            .auth
            .api_keys
            .iter()
            .any(|k| !k.token.is_empty() && raw.contains(k.token.as_str()))
        {
            warn!(
                "Gateway bearer token is hardcoded in config file. For security, use environment variables: token = \"${{LAYER_API_KEY}}\""
            );
        }
    }
}

fn mask_nonempty(s: &str) -> String {
    if s.is_empty() {
        String::new()
    } else {
        mask_secret(s)
    }
}

/// Refuse a config file that group or other can read (Unix only)
fn check_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                anyhow::bail!(
                    "Config file {:?} has overly permissive permissions ({:o}). \
                     It may contain secrets. Fix with: chmod 600 {:?}",
                    path,
                    mode & 0o777,
                    path
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Environment variables that may be expanded in config files.
/// Anything else is left as written.
const ALLOWED_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GOOGLE_API_KEY",
    "LAYER_API_KEY",
    "LAYER_DATABASE_PATH",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while let Some(start) = result[pos..].find("${") {
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = &result[abs_start + 2..abs_start + end];

        if !ALLOWED_ENV_VARS.contains(&var_name) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(var_name).unwrap_or_default();
        result.replace_range(abs_start..abs_start + end + 1, &value);
        // never rescan the substituted value
        pos = abs_start + value.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = LayerConfig::parse("").unwrap();
        assert_eq!(cfg.server.bind, default_bind());
        assert_eq!(cfg.storage.db_path, "~/.layer/layer.db");
        assert_eq!(cfg.cache.capacity, 1024);
        assert_eq!(cfg.defaults.max_tokens, 4096);
        assert_eq!(cfg.defaults.temperature, 1.0);
        assert!(cfg.providers.openai.is_none());
        assert!(cfg.auth.api_keys.is_empty());
    }

    #[test]
    fn test_default_config_parses() {
        let cfg = LayerConfig::parse(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(cfg.server.bind.port(), 8080);
        assert!(cfg.providers.openai.is_some());
        assert!(cfg.providers.anthropic.is_some());
        assert!(cfg.providers.google.is_some());
        assert_eq!(cfg.auth.api_keys.len(), 1);
        assert_eq!(cfg.auth.api_keys[0].owner, "local");
    }

    #[test]
    fn test_full_config() {
        let cfg = LayerConfig::parse(
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [cache]
            capacity = 16

            [defaults]
            temperature = 0.2
            max_tokens = 512

            [providers.openai]
            api_key = "sk-test-1234567890"
            timeout_secs = 30

            [providers.google]
            api_key = ""

            [[auth.api_keys]]
            token = "tok-alice"
            owner = "alice"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.bind.port(), 9000);
        assert_eq!(cfg.cache.capacity, 16);
        assert_eq!(cfg.defaults.max_tokens, 512);
        // unset fields keep their defaults
        assert_eq!(cfg.defaults.top_p, 1.0);

        let openai = cfg.providers.openai_settings().unwrap();
        assert_eq!(openai.base_url, openai::DEFAULT_BASE_URL);
        assert_eq!(openai.timeout_secs, 30);
        // empty key disables the vendor
        assert!(cfg.providers.google_settings().is_none());
        assert!(cfg.providers.anthropic_settings().is_none());
        assert_eq!(cfg.auth.api_keys[0].owner, "alice");
    }

    #[test]
    fn test_base_url_override() {
        let cfg = LayerConfig::parse(
            r#"
            [providers.anthropic]
            api_key = "sk-ant-xyz-12345678"
            base_url = "http://127.0.0.1:9999"
            "#,
        )
        .unwrap();
        let settings = cfg.providers.anthropic_settings().unwrap();
        assert_eq!(settings.base_url, "http://127.0.0.1:9999");
        assert_eq!(settings.timeout_secs, 120);
    }

    #[test]
    fn test_unlisted_env_var_left_unexpanded() {
        let out = expand_env_vars("key = \"${SOME_PRIVATE_SECRET}\"");
        assert_eq!(out, "key = \"${SOME_PRIVATE_SECRET}\"");
    }

    #[test]
    fn test_allowed_env_var_expanded() {
        let expected = std::env::var("LAYER_DATABASE_PATH").unwrap_or_default();
        let out = expand_env_vars("a${LAYER_DATABASE_PATH}b ${NOPE}");
        assert_eq!(out, format!("a{}b ${{NOPE}}", expected));
    }

    #[test]
    fn test_unterminated_reference_is_kept() {
        assert_eq!(expand_env_vars("x = \"${OPENAI_API_KEY"), "x = \"${OPENAI_API_KEY");
    }

    #[test]
    fn test_masked_hides_secrets() {
        let cfg = LayerConfig::parse(
            r#"
            [providers.openai]
            api_key = "sk-live-abcdefghijklmnop"

            [[auth.api_keys]]
            token = "bearer-token-0123456789"
            owner = "alice"
            "#,
        )
        .unwrap();

        let rendered = toml::to_string_pretty(&cfg.masked()).unwrap();
        assert!(!rendered.contains("sk-live-abcdefghijklmnop"));
        assert!(!rendered.contains("bearer-token-0123456789"));
        assert!(rendered.contains("sk-...mnop"));
        assert!(rendered.contains("alice"));

        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("sk-live-abcdefghijklmnop"));
        assert!(!debug.contains("bearer-token-0123456789"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/db/layer.db"), PathBuf::from("/var/db/layer.db"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x.db"), home.join("x.db"));
        }
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\ncapacity = 7\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }

        let cfg = LayerConfig::load(&Some(path)).unwrap();
        assert_eq!(cfg.cache.capacity, 7);
    }

    #[test]
    fn test_load_missing_file_mentions_init() {
        let dir = tempfile::tempdir().unwrap();
        let err = LayerConfig::load(&Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("layer init"));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_rejects_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = LayerConfig::load(&Some(path)).unwrap_err();
        assert!(err.to_string().contains("overly permissive"));
    }
}
