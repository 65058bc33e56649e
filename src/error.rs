use thiserror::Error;

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Debug, Error)]
pub enum PoolError {
  #[error("could not read config file {path}: {source}")]
  ConfigIo {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("config is not valid yaml: {0}")]
  ConfigParse(#[from] serde_yaml::Error),

  #[error("invalid config: {0}")]
  InvalidConfig(String),

  #[error("database error: {0}")]
  Database(#[from] diesel::result::Error),

  #[error("database connection error: {0}")]
  Connection(#[from] diesel::ConnectionError),

  #[error("connection pool error: {0}")]
  Pool(#[from] diesel::r2d2::PoolError),

  #[error("migration failed: {0}")]
  Migration(String),

  #[error("http request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("rpc call {method} failed: {message}")]
  Rpc { method: String, message: String },

  #[error("bootstrap error: {0}")]
  Bootstrap(String),

  #[error("web server error: {0}")]
  Web(String),
}
