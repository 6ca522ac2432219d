use serde::{Deserialize, Serialize};

/// Environment fallback consulted when neither the user nor the instance
/// configuration carries a token.
pub const TOKEN_ENV_VAR: &str = "HARDCOVER_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HardcoverConfig {
    /// Instance-wide API token, settable by an administrator.
    pub api_token: Option<String>,
}

/// Token lookup in priority order: per-user setting, then the instance
/// configuration, then the `HARDCOVER_TOKEN` environment variable. The
/// environment is captured at construction so resolution itself touches no
/// global state.
#[derive(Debug, Clone, Default)]
pub struct TokenSources {
    pub user_token: Option<String>,
    pub config_token: Option<String>,
    pub env_token: Option<String>,
}

impl TokenSources {
    pub fn new(user_token: Option<String>, config: &HardcoverConfig) -> Self {
        Self {
            user_token,
            config_token: config.api_token.clone(),
            env_token: std::env::var(TOKEN_ENV_VAR).ok(),
        }
    }

    pub fn resolve(&self) -> Option<String> {
        [&self.user_token, &self.config_token, &self.env_token]
            .into_iter()
            .find_map(|t| t.as_deref().map(str::trim).filter(|t| !t.is_empty()))
            .map(normalize_token)
    }
}

/// Users paste tokens straight from API consoles; tolerate a leading scheme.
fn normalize_token(token: &str) -> String {
    token.trim_start_matches("Bearer ").to_string()
}
