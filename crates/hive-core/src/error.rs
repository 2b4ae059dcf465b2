use thiserror::Error;

#[derive(Debug, Error)]
pub enum HiveError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HiveError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            HiveError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, HiveError>;
