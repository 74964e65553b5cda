use cluster::ConfigError;

/// Error type for server startup and listener errors
#[derive(Debug)]
pub enum ServerError {
    InvalidAddr(String),
    IoError(std::io::Error),
    ConfigError(ConfigError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::InvalidAddr(msg) => write!(f, "Invalid address: {}", msg),
            ServerError::IoError(e) => write!(f, "IO error: {}", e),
            ServerError::ConfigError(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::IoError(err)
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        ServerError::ConfigError(err)
    }
}
