use std::time::Duration;

use regex::Regex;

use crate::cache::StatsCache;
use crate::config::*;
use crate::db::*;
use crate::error::{PoolError, Result};

pub struct App {
  pub config: Config,
  pub db: DbAccess,
  pub cache: StatsCache,
  pub address_pattern: Regex,
}

impl App {
  pub fn new(config: Config) -> Result<App> {
    let db = DbAccess::new(&config.database_uri)?;
    App::with_db(config, db)
  }

  pub fn with_db(config: Config, db: DbAccess) -> Result<App> {
    let address_pattern = address_pattern(&config.address_prefix)?;
    Ok(App {
      cache: StatsCache::new(Duration::from_secs(config.cache_timeout)),
      db,
      address_pattern,
      config,
    })
  }

  /// Whether `address` may have a public stats page.
  pub fn is_listed_address(&self, address: &str) -> bool {
    self.address_pattern.is_match(address) && !self.config.is_redacted(address)
  }
}

/// Base58 addresses beginning with the coin's version prefix.
pub fn address_pattern(prefix: &str) -> Result<Regex> {
  Regex::new(&format!(
    "^{}[123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz]{{25,34}}$",
    regex::escape(prefix)
  )).map_err(|err| PoolError::InvalidConfig(format!("address_prefix: {}", err)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::EXAMPLE_CONFIG;

  #[test]
  fn test_address_pattern() {
    let pattern = address_pattern("V").unwrap();
    assert!(pattern.is_match("VkKW1hZ5WwbB4JxNjkR6VZb8FsWxoAQEsN"));
    assert!(!pattern.is_match("LkKW1hZ5WwbB4JxNjkR6VZb8FsWxoAQEsN"));
    // 0, O, I and l are not base58
    assert!(!pattern.is_match("VkKW1hZ5WwbB4JxNjkR6VZb8FsWxoAQEs0"));
    assert!(!pattern.is_match("V'; DROP TABLE payout; --xxxxxxxxxx"));
  }

  #[test]
  fn test_listed_address_excludes_redacted() {
    let config = Config::parse(EXAMPLE_CONFIG).unwrap();
    let app = App::with_db(config, DbAccess::unconnected("postgres://localhost/unused")).unwrap();
    assert!(app.is_listed_address("VkKW1hZ5WwbB4JxNjkR6VZb8FsWxoAQEsN"));
    // Well formed, but on the redaction list
    assert!(app.address_pattern.is_match("VdonationAddressxxxxxxxxxxxxxxxxx"));
    assert!(!app.is_listed_address("VdonationAddressxxxxxxxxxxxxxxxxx"));
    assert!(!app.is_listed_address("favicon.ico"));
  }
}
