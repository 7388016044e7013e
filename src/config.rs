//! Environment configuration (component J / §4.O).

use std::path::PathBuf;

/// Read once at spy construction. Absence of either variable is not an error; the layerer then
/// runs with zero user layers.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// Ordered list of layer library paths, handed to the layerer (§4.J).
    pub layers: Vec<PathBuf>,
    /// Opaque string forwarded verbatim to every loaded layer's init entry point.
    pub user_config: Option<String>,
}

const LAYERS_VAR: &str = "GAPID2_LAYERS";
const USER_CONFIG_VAR: &str = "GAPID2_USER_CONFIG";

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::var(LAYERS_VAR).ok(), std::env::var(USER_CONFIG_VAR).ok())
    }

    fn from_vars(layers: Option<String>, user_config: Option<String>) -> Self {
        let layers = layers
            .map(|s| s.split(';').filter(|s| !s.is_empty()).map(PathBuf::from).collect())
            .unwrap_or_default();
        Self { layers, user_config }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_vars_yield_empty_config() {
        let config = EnvConfig::from_vars(None, None);
        assert!(config.layers.is_empty());
        assert!(config.user_config.is_none());
    }

    #[test]
    fn layers_var_splits_on_semicolon() {
        let config = EnvConfig::from_vars(Some("/a/libfoo.so;/b/libbar.so".to_string()), None);
        assert_eq!(config.layers, vec![PathBuf::from("/a/libfoo.so"), PathBuf::from("/b/libbar.so")]);
    }

    #[test]
    fn user_config_is_forwarded_verbatim() {
        let config = EnvConfig::from_vars(None, Some("opaque-blob".to_string()));
        assert_eq!(config.user_config.as_deref(), Some("opaque-blob"));
    }
}
