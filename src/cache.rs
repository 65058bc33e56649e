use std::sync::Mutex;
use std::time::Duration;

use lru_time_cache::LruCache;

/// Chain and pool values fetched by the refresh loop. Entries expire, so a
/// stalled daemon or monitor shows up as unknown rather than stale.
///
/// Currencies are keyed by the coin symbol for the main chain, or a merge
/// prefix.
pub struct StatsCache {
  block_heights: Mutex<LruCache<String, i64>>,
  difficulties: Mutex<LruCache<String, f64>>,
  worker_count: Mutex<LruCache<(), u64>>,
}

impl StatsCache {
  pub fn new(timeout: Duration) -> StatsCache {
    StatsCache {
      block_heights: Mutex::new(LruCache::with_expiry_duration(timeout)),
      difficulties: Mutex::new(LruCache::with_expiry_duration(timeout)),
      worker_count: Mutex::new(LruCache::with_expiry_duration(timeout)),
    }
  }

  pub fn set_block_height(&self, currency: &str, height: i64) {
    self.block_heights.lock().unwrap().insert(currency.to_owned(), height);
  }

  pub fn block_height(&self, currency: &str) -> Option<i64> {
    self.block_heights.lock().unwrap().get(currency).cloned()
  }

  pub fn set_difficulty(&self, currency: &str, difficulty: f64) {
    self.difficulties.lock().unwrap().insert(currency.to_owned(), difficulty);
  }

  pub fn difficulty(&self, currency: &str) -> Option<f64> {
    self.difficulties.lock().unwrap().get(currency).cloned()
  }

  pub fn set_worker_count(&self, count: u64) {
    self.worker_count.lock().unwrap().insert((), count);
  }

  pub fn worker_count(&self) -> Option<u64> {
    self.worker_count.lock().unwrap().get(&()).cloned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  #[test]
  fn test_values_are_kept_per_currency() {
    let cache = StatsCache::new(Duration::from_secs(60));
    assert_eq!(cache.block_height("VTC"), None);
    cache.set_block_height("VTC", 152_004);
    cache.set_block_height("MON", 9_001);
    cache.set_difficulty("VTC", 12.5);
    cache.set_worker_count(42);
    assert_eq!(cache.block_height("VTC"), Some(152_004));
    assert_eq!(cache.block_height("MON"), Some(9_001));
    assert_eq!(cache.difficulty("VTC"), Some(12.5));
    assert_eq!(cache.difficulty("MON"), None);
    assert_eq!(cache.worker_count(), Some(42));
  }

  #[test]
  fn test_large_heights_are_exact() {
    let cache = StatsCache::new(Duration::from_secs(60));
    let height = (1i64 << 53) + 1;
    cache.set_block_height("VTC", height);
    assert_eq!(cache.block_height("VTC"), Some(height));
  }

  #[test]
  fn test_values_expire() {
    let cache = StatsCache::new(Duration::from_millis(20));
    cache.set_worker_count(3);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(cache.worker_count(), None);
  }
}
