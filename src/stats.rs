//! Everything the stats page and the JSON api display, computed from the pool
//! tables and the values the refresh loop caches.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{json, Value};

use crate::app::App;
use crate::coin_utils::*;
use crate::config::Config;
use crate::db::models::*;
use crate::db::PayoutRecord;
use crate::error::Result;
use crate::slices::{last_day_tables, Resolution, Series};

const RECENT_BLOCKS: i64 = 25;
const RECENT_MERGED_BLOCKS: i64 = 10;
const RECENT_PAYOUTS: i64 = 50;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct BlockRow {
  pub height: i32,
  pub hash: String,
  pub finder: String,
  pub worker: Option<String>,
  pub status: String,
  pub luck: Option<f64>,
  pub value: f64,
  pub difficulty: f64,
  pub duration: String,
  pub found_at: String,
  pub explorer_link: String,
}

impl BlockRow {
  pub fn new(block: &Block, config: &Config, chain_height: Option<i64>) -> BlockRow {
    let link_prefix = match &block.merged_type {
      Some(prefix) => config.merged(prefix)
        .map(|coin| coin.block_link_prefix.as_str())
        .unwrap_or(""),
      None => config.block_link_prefix.as_str(),
    };
    let finder = match &block.user {
      Some(user) if config.is_redacted(user) => "Redacted".to_owned(),
      Some(user) => user.to_owned(),
      None => "Unknown".to_owned(),
    };
    let confirms = block.confirms_remaining(chain_height, config.block_mature_confirms);
    BlockRow {
      height: block.height,
      hash: block.hash.to_owned(),
      finder,
      worker: block.worker.clone(),
      status: block.status(confirms).to_string(),
      luck: block.luck(),
      value: block.total_value_float(),
      difficulty: block.difficulty(),
      duration: format_duration(block.duration_seconds()),
      found_at: block.found_at.format("%Y-%m-%d %H:%M:%S").to_string(),
      explorer_link: block.explorer_link(link_prefix),
    }
  }
}

#[derive(Serialize, Clone, Debug)]
pub struct PoolStats {
  pub worker_count: u64,
  pub accept_total: i64,
  pub reject_total: i64,
  pub efficiency: f64,
  pub pool_luck: f64,
  pub effective_return: f64,
  pub orphan_perc: f64,
  pub round_shares: i64,
  pub block_height: Option<i64>,
  pub difficulty: Option<f64>,
  pub blocks: Vec<BlockRow>,
  /// `(currency, display name, recent blocks)` for each enabled merge mined coin.
  pub merged_blocks: Vec<(String, String, Vec<BlockRow>)>,
}

/// Percentage of submitted shares that were accepted.
pub fn efficiency(accept_total: i64, reject_total: i64) -> f64 {
  let submitted = accept_total + reject_total;
  if submitted <= 0 {
    return 0.0;
  }
  accept_total as f64 / submitted as f64 * 100.0
}

/// Expected over actual work across all non-orphaned blocks with a known
/// share count, as a percentage.
pub fn pool_luck(outcomes: &[(String, Option<i64>, bool)]) -> f64 {
  let mut expected = 0.0;
  let mut actual = 0.0;
  for (bits, shares_to_solve, orphan) in outcomes {
    match (bits_to_difficulty(bits), shares_to_solve) {
      (Some(difficulty), Some(shares)) if !orphan && *shares > 0 => {
        expected += difficulty * SHARE_HASHES;
        actual += *shares as f64;
      }
      _ => {}
    }
  }
  if actual == 0.0 {
    return 0.0;
  }
  expected / actual * 100.0
}

pub fn orphan_perc(outcomes: &[(String, Option<i64>, bool)]) -> f64 {
  if outcomes.is_empty() {
    return 0.0;
  }
  let orphans = outcomes.iter().filter(|(_, _, orphan)| *orphan).count();
  orphans as f64 / outcomes.len() as f64 * 100.0
}

/// Luck discounted by the share of blocks lost to orphaning.
pub fn effective_return(pool_luck: f64, orphan_perc: f64) -> f64 {
  pool_luck * (100.0 - orphan_perc) / 100.0
}

pub fn gather(app: &App, now: NaiveDateTime) -> Result<PoolStats> {
  let config = &app.config;
  let since = now - chrono::Duration::days(1);
  let accept_total = app.db.slice_total(&last_day_tables(Series::Share), since)?;
  let reject_total = app.db.slice_total(&last_day_tables(Series::Reject), since)?;
  let outcomes = app.db.main_block_outcomes()?;
  let luck = pool_luck(&outcomes);
  let orphans = orphan_perc(&outcomes);
  let chain_height = chain_height(app, &config.coin_symbol);
  let blocks = recent_block_rows(app, chain_height)?;
  let mut merged_blocks = Vec::new();
  for coin in config.merge.iter().filter(|coin| coin.enabled) {
    let rows = app.db.recent_blocks(Some(&coin.prefix), RECENT_MERGED_BLOCKS)?.iter()
      .map(|block| BlockRow::new(block, config, None))
      .collect();
    merged_blocks.push((coin.currency_name.to_owned(), coin.name.to_owned(), rows));
  }

  Ok(PoolStats {
    worker_count: app.cache.worker_count().unwrap_or(0),
    accept_total,
    reject_total,
    efficiency: efficiency(accept_total, reject_total),
    pool_luck: luck,
    effective_return: effective_return(luck, orphans),
    orphan_perc: orphans,
    round_shares: app.db.round_shares()?,
    block_height: chain_height,
    difficulty: app.cache.difficulty(&config.coin_symbol),
    blocks,
    merged_blocks,
  })
}

pub fn recent_block_rows(app: &App, chain_height: Option<i64>) -> Result<Vec<BlockRow>> {
  Ok(app.db.recent_blocks(None, RECENT_BLOCKS)?.iter()
    .map(|block| BlockRow::new(block, &app.config, chain_height))
    .collect())
}

/// Chain height from the cache, falling back to the last height any process
/// stored in the database.
pub fn chain_height(app: &App, currency: &str) -> Option<i64> {
  if let Some(height) = app.cache.block_height(currency) {
    return Some(height);
  }
  match app.db.blob_field("blockheight", currency) {
    Ok(stored) => stored.and_then(|height| height.parse().ok()),
    Err(err) => {
      warn!("Failed to read stored block height: {}", err);
      None
    }
  }
}

/// The variables the stats page template renders.
pub fn template_context(stats: &PoolStats, config: &Config) -> Value {
  json!({
    "g": {
      "worker_count": stats.worker_count,
    },
    "accept_total": stats.accept_total,
    "reject_total": stats.reject_total,
    "efficiency": stats.efficiency,
    "pool_luck": stats.pool_luck,
    "effective_return": stats.effective_return,
    "orphan_perc": stats.orphan_perc,
    "round_shares": stats.round_shares,
    "block_height": stats.block_height,
    "blocks": stats.blocks,
    "merged_blocks": stats.merged_blocks,
    "stratums": config.stratums,
    "config": {
      "site_title": config.site_title,
      "coin_name": config.coin_name,
      "coin_symbol": config.coin_symbol,
      "assets_address": config.assets_address,
    },
  })
}

#[derive(Serialize, Debug)]
pub struct TransferRow {
  pub created_at: String,
  pub amount: f64,
  pub status: String,
  pub height: Option<i32>,
  pub merged_type: Option<String>,
  pub transaction_id: Option<String>,
  pub explorer_link: Option<String>,
  pub detail: String,
  pub mined: Option<f64>,
}

#[derive(Serialize, Debug)]
pub struct UserPayouts {
  pub address: String,
  pub donation_perc: f64,
  pub merge_addresses: Vec<MergeAddress>,
  pub payouts: Vec<TransferRow>,
  pub bonuses: Vec<TransferRow>,
}

fn transaction_link(config: &Config, merged_type: &Option<String>, txid: &Option<String>) -> Option<String> {
  let txid = txid.as_ref()?;
  let prefix = match merged_type {
    Some(prefix) => &config.merged(prefix)?.transaction_link_prefix,
    None => &config.transaction_link_prefix,
  };
  Some(format!("{}{}", prefix, txid))
}

fn transfer_row<F>(config: &Config, chain_height: Option<i64>, block: Option<&Block>,
                   transaction: Option<&Transaction>, merged_type: &Option<String>,
                   txid: &Option<String>, fill: F) -> TransferRow
  where F: FnOnce(&mut TransferRow) {
  let confirms = block.and_then(|block| block.confirms_remaining(chain_height, config.block_mature_confirms));
  let mut row = TransferRow {
    created_at: String::new(),
    amount: 0.0,
    status: transfer_status(block, transaction, confirms).to_string(),
    height: block.map(|block| block.height),
    merged_type: merged_type.clone(),
    transaction_id: txid.clone(),
    explorer_link: transaction_link(config, merged_type, txid),
    detail: String::new(),
    mined: None,
  };
  fill(&mut row);
  row
}

pub fn gather_user(app: &App, address: &str) -> Result<UserPayouts> {
  let config = &app.config;
  let chain_height = chain_height(app, &config.coin_symbol);
  let payouts = app.db.payouts_for(address, RECENT_PAYOUTS)?.into_iter()
    .map(|PayoutRecord { transfer, block, transaction }| {
      transfer_row(config, chain_height, block.as_ref(), transaction.as_ref(),
                   &transfer.merged_type, &transfer.transaction_id, |row| {
        row.created_at = transfer.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
        row.amount = to_coins(transfer.amount);
        row.detail = transfer.text_perc_applied();
        row.mined = Some(transfer.mined());
      })
    })
    .collect();
  let bonuses = app.db.bonuses_for(address, RECENT_PAYOUTS)?.into_iter()
    .map(|PayoutRecord { transfer, block, transaction }| {
      transfer_row(config, chain_height, block.as_ref(), transaction.as_ref(),
                   &transfer.merged_type, &transfer.transaction_id, |row| {
        row.created_at = transfer.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
        row.amount = to_coins(transfer.amount);
        row.detail = transfer.description.clone().unwrap_or_default();
      })
    })
    .collect();
  Ok(UserPayouts {
    address: address.to_owned(),
    donation_perc: app.db.donation_perc(address)?.unwrap_or(config.default_perc),
    merge_addresses: app.db.merge_addresses(address)?,
    payouts,
    bonuses,
  })
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct DeviceRow {
  pub device: i32,
  pub hashrate: Option<i64>,
  pub temperature: Option<i64>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct WorkerRow {
  pub worker: String,
  pub last_seen: Option<String>,
  pub stale: bool,
  pub status: Option<Value>,
  pub devices: Vec<DeviceRow>,
}

#[derive(Serialize, Debug)]
pub struct UserWorkers {
  pub address: String,
  pub workers: Vec<WorkerRow>,
}

/// Merges status reports with the latest hashrate and temperature of each
/// device. Slices must be oldest first. A worker that only has slices has no
/// report and counts as stale.
pub fn worker_rows(statuses: &[WorkerStatus], hashrates: &[DeviceSliceRow],
                   temperatures: &[DeviceSliceRow], now: NaiveDateTime) -> Vec<WorkerRow> {
  let mut workers: BTreeMap<String, WorkerRow> = BTreeMap::new();
  for status in statuses {
    workers.insert(status.worker.to_owned(), WorkerRow {
      worker: status.worker.to_owned(),
      last_seen: Some(status.time.format("%Y-%m-%d %H:%M:%S").to_string()),
      stale: status.stale(now),
      status: status.parsed_report(),
      devices: Vec::new(),
    });
  }
  let mut devices: BTreeMap<(String, i32), DeviceRow> = BTreeMap::new();
  for slice in hashrates {
    devices.entry((slice.worker.to_owned(), slice.device))
      .or_insert_with(|| DeviceRow { device: slice.device, ..DeviceRow::default() })
      .hashrate = Some(slice.value);
  }
  for slice in temperatures {
    devices.entry((slice.worker.to_owned(), slice.device))
      .or_insert_with(|| DeviceRow { device: slice.device, ..DeviceRow::default() })
      .temperature = Some(slice.value);
  }
  for ((worker, _), device) in devices {
    workers.entry(worker.to_owned())
      .or_insert_with(|| WorkerRow {
        worker,
        last_seen: None,
        stale: true,
        status: None,
        devices: Vec::new(),
      })
      .devices.push(device);
  }
  workers.into_iter().map(|(_, row)| row).collect()
}

pub fn gather_workers(app: &App, address: &str, now: NaiveDateTime) -> Result<UserWorkers> {
  let since = now - chrono::Duration::minutes(WorkerStatus::STALE_MINUTES);
  let statuses = app.db.worker_statuses(address)?;
  let hashrates = app.db.device_slices(&Series::Hashrate.table(Resolution::OneMinute), address, since)?;
  let temperatures = app.db.device_slices(&Series::Temperature.table(Resolution::OneMinute), address, since)?;
  Ok(UserWorkers {
    address: address.to_owned(),
    workers: worker_rows(&statuses, &hashrates, &temperatures, now),
  })
}
