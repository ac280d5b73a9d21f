use serde_derive::Deserialize;
use serde_derive::Serialize;

/// What happens to a live range boundary when content is inserted exactly at
/// its offset. The same policy applies to both ends of every range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stickiness {
    /// The boundary stays attached to the content before it, so inserted
    /// content lands after the boundary.
    Before,

    /// The boundary is pushed past the inserted content. Typing at a caret
    /// leaves the caret after the typed text.
    #[default]
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix marking element attributes that remember caret formatting for
    /// an empty element.
    pub store_prefix: String,

    pub stickiness: Stickiness,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    EmptyStorePrefix,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store_prefix: "stored:".to_string(),
            stickiness: Stickiness::After,
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        /* an empty prefix would make every element attribute look stored */
        if self.store_prefix.is_empty() {
            return Err(ConfigError::EmptyStorePrefix);
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse(message) => write!(f, "failed to parse configuration: {}", message),
            ConfigError::EmptyStorePrefix => write!(f, "store_prefix must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}
