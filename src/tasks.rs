//! Background refresh loop. Owns all outbound network calls so that request
//! handlers only ever read the cache and the database.

use std::sync::Arc;
use std::thread;

use chrono::{NaiveDateTime, Utc};
use schedule_recv::periodic_ms;

use crate::app::App;
use crate::daemon_client::DaemonClient;
use crate::error::Result;
use crate::monitor::MonitorClient;
use crate::slices;

/// Slices are compressed at most this often.
const COMPRESS_INTERVAL_SECS: i64 = 60;

struct Refresher {
  app: Arc<App>,
  daemon: DaemonClient,
  merged: Vec<(String, DaemonClient)>,
  monitor: MonitorClient,
  last_compress: Option<NaiveDateTime>,
}

impl Refresher {
  fn new(app: Arc<App>) -> Result<Refresher> {
    let daemon = DaemonClient::new(&app.config.coinserv)?;
    let mut merged = Vec::new();
    for coin in app.config.merge.iter().filter(|coin| coin.enabled) {
      merged.push((coin.prefix.to_owned(), DaemonClient::new(&coin.coinserv)?));
    }
    let monitor = MonitorClient::new(&app.config.monitor_addrs)?;
    Ok(Refresher {
      app,
      daemon,
      merged,
      monitor,
      last_compress: None,
    })
  }

  fn refresh(&mut self) {
    let now = Utc::now().naive_utc();
    let symbol = self.app.config.coin_symbol.to_owned();
    self.refresh_chain(&symbol, &self.daemon);
    for (prefix, daemon) in &self.merged {
      self.refresh_chain(prefix, daemon);
    }
    self.refresh_workers(now);
    let due = self.last_compress
      .map(|last| (now - last).num_seconds() >= COMPRESS_INTERVAL_SECS)
      .unwrap_or(true);
    if due {
      match slices::compress_all(&self.app.db, now) {
        Ok(folded) => {
          if folded > 0 {
            info!("Compressed {} time slices", folded);
          }
          self.last_compress = Some(now);
        }
        Err(err) => warn!("Failed to compress time slices: {}", err),
      }
    }
  }

  fn refresh_chain(&self, currency: &str, daemon: &DaemonClient) {
    match daemon.get_block_count() {
      Ok(height) => {
        self.app.cache.set_block_height(currency, height);
        if let Err(err) = self.app.db.set_blob_field("blockheight", currency, &height.to_string()) {
          warn!("Failed saving block height for {}: {}", currency, err);
        }
      }
      Err(err) => warn!("Unable to fetch block height for {}: {}", currency, err),
    }
    match daemon.get_difficulty() {
      Ok(difficulty) => {
        self.app.cache.set_difficulty(currency, difficulty);
        if let Err(err) = self.app.db.set_blob_field("difficulty", currency, &difficulty.to_string()) {
          warn!("Failed saving difficulty for {}: {}", currency, err);
        }
      }
      Err(err) => warn!("Unable to fetch difficulty for {}: {}", currency, err),
    }
  }

  fn refresh_workers(&self, now: NaiveDateTime) {
    let count = self.monitor.worker_count();
    self.app.cache.set_worker_count(count);
    if let Err(err) = slices::record_type(&self.app.db, "workers", count as i64, now) {
      warn!("Failed recording worker count: {}", err);
    }
  }
}

/// Starts the refresh loop on its own thread, running once immediately and
/// then every `refresh_interval_ms`.
pub fn spawn(app: Arc<App>) -> Result<thread::JoinHandle<()>> {
  let interval = app.config.refresh_interval_ms;
  let mut refresher = Refresher::new(app)?;
  Ok(thread::spawn(move || {
    let tick = periodic_ms(interval);
    loop {
      refresher.refresh();
      if tick.recv().is_err() {
        warn!("Refresh timer stopped, no longer refreshing pool stats");
        return;
      }
    }
  }))
}

/// Compresses time slices once, outside the refresh loop.
pub fn compress_once(app: &App) -> Result<usize> {
  slices::compress_all(&app.db, Utc::now().naive_utc())
}
