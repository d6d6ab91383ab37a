#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Subscription open failed: {0}")]
    OpenFailed(String),
    #[error("Transport failure: {0}")]
    Transport(String),
}

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Permission query failed: {0}")]
    Permission(String),
    #[error("Presentation failed: {0}")]
    Present(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config read failed for {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Config parse failed: {0}")]
    Parse(#[from] toml::de::Error),
}
