use std::fmt;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::*;
use serde::Serialize;

use crate::coin_utils::*;
use crate::db::schema::*;

#[derive(Queryable, Selectable, Serialize, Clone, Debug)]
#[diesel(table_name = block)]
pub struct Block {
  pub hash: String,
  pub height: i32,
  pub user: Option<String>,
  pub found_at: NaiveDateTime,
  pub time_started: NaiveDateTime,
  pub orphan: bool,
  pub mature: bool,
  pub shares_to_solve: Option<i64>,
  pub total_value: Option<i64>,
  pub transaction_fees: Option<i64>,
  pub donated: Option<i64>,
  pub bonus_payed: Option<i64>,
  pub bits: String,
  pub difficulty_avg: Option<i32>,
  pub last_share_id: Option<i64>,
  pub processed: bool,
  pub merged_type: Option<String>,
  pub worker: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BlockStatus {
  Mature,
  Orphan,
  ConfirmsRemaining(i64),
  Pending,
}

impl fmt::Display for BlockStatus {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      BlockStatus::Mature => write!(f, "Mature"),
      BlockStatus::Orphan => write!(f, "Orphan"),
      BlockStatus::ConfirmsRemaining(confirms) => write!(f, "{} Confirms Remaining", confirms),
      BlockStatus::Pending => write!(f, "Pending confirmation"),
    }
  }
}

impl Block {
  /// Confirmations still needed before maturity. Unknown for merge mined
  /// blocks, and while the chain height hasn't been fetched.
  pub fn confirms_remaining(&self, chain_height: Option<i64>, mature_confirms: u32) -> Option<i64> {
    if self.merged_type.is_some() {
      return None;
    }
    let chain_height = chain_height?;
    Some((mature_confirms as i64 - (chain_height - self.height as i64)).max(0))
  }

  pub fn status(&self, confirms_remaining: Option<i64>) -> BlockStatus {
    if self.mature {
      BlockStatus::Mature
    } else if self.orphan {
      BlockStatus::Orphan
    } else if let Some(confirms) = confirms_remaining {
      BlockStatus::ConfirmsRemaining(confirms)
    } else {
      BlockStatus::Pending
    }
  }

  pub fn difficulty(&self) -> f64 {
    bits_to_difficulty(&self.bits).unwrap_or(0.0)
  }

  /// Percentage of expected work it took to solve this block; above 100 is
  /// lucky.
  pub fn luck(&self) -> Option<f64> {
    match self.shares_to_solve {
      Some(shares) if shares > 0 => Some(self.difficulty() * SHARE_HASHES / shares as f64 * 100.0),
      _ => None,
    }
  }

  pub fn total_value_float(&self) -> f64 {
    to_coins(self.total_value.unwrap_or(0))
  }

  pub fn duration_seconds(&self) -> i64 {
    (self.found_at - self.time_started).num_seconds()
  }

  pub fn explorer_link(&self, block_link_prefix: &str) -> String {
    format!("{}{}", block_link_prefix, self.hash)
  }
}

#[derive(Queryable, Selectable, Serialize, Clone, Debug)]
#[diesel(table_name = transaction)]
pub struct Transaction {
  pub txid: String,
  pub confirmed: bool,
  pub created_at: NaiveDateTime,
  pub merged_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PayoutStatus {
  TransactionConfirmed,
  TransactionPending,
  BlockOrphaned,
  BlockConfirmsRemaining(i64),
  PendingBlockConfirmation,
  Pending,
}

impl fmt::Display for PayoutStatus {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      PayoutStatus::TransactionConfirmed => write!(f, "Payout Transaction Confirmed"),
      PayoutStatus::TransactionPending => write!(f, "Payout Transaction Pending"),
      PayoutStatus::BlockOrphaned => write!(f, "Block Orphaned"),
      PayoutStatus::BlockConfirmsRemaining(confirms) =>
        write!(f, "{} Block Confirms Remaining", confirms),
      PayoutStatus::PendingBlockConfirmation => write!(f, "Pending Block Confirmation"),
      PayoutStatus::Pending => write!(f, "Payout Pending"),
    }
  }
}

/// Status shared by payouts and bonus payouts. A sent transaction decides it,
/// otherwise the state of the block the transfer was credited from.
pub fn transfer_status(block: Option<&Block>, transaction: Option<&Transaction>,
                       confirms_remaining: Option<i64>) -> PayoutStatus {
  if let Some(transaction) = transaction {
    return if transaction.confirmed {
      PayoutStatus::TransactionConfirmed
    } else {
      PayoutStatus::TransactionPending
    };
  }
  match block {
    Some(block) if block.orphan => PayoutStatus::BlockOrphaned,
    Some(block) if !block.mature => match confirms_remaining {
      Some(confirms) => PayoutStatus::BlockConfirmsRemaining(confirms),
      None => PayoutStatus::PendingBlockConfirmation,
    },
    _ => PayoutStatus::Pending,
  }
}

#[derive(Queryable, Selectable, Serialize, Clone, Debug)]
#[diesel(table_name = payout)]
pub struct Payout {
  pub id: i32,
  pub user: String,
  pub amount: i64,
  pub locked: bool,
  pub created_at: NaiveDateTime,
  pub merged_type: Option<String>,
  pub transaction_id: Option<String>,
  pub blockhash: Option<String>,
  pub shares: Option<i64>,
  pub perc: f64,
  pub perc_applied: i64,
}

impl Payout {
  /// Negative percentages are bonuses paid on top of the miner's share.
  pub fn text_perc_applied(&self) -> String {
    if self.perc < 0.0 {
      format!("bonus of {}", format_sig(to_coins(-self.perc_applied), 3))
    } else {
      format!("donation of {}", format_sig(to_coins(self.perc_applied), 3))
    }
  }

  /// What the miner earned before the donation or bonus was applied.
  pub fn mined(&self) -> f64 {
    to_coins(self.amount + self.perc_applied)
  }
}

#[derive(Queryable, Selectable, Serialize, Clone, Debug)]
#[diesel(table_name = bonus_payout)]
pub struct BonusPayout {
  pub id: i32,
  pub user: String,
  pub amount: i64,
  pub locked: bool,
  pub created_at: NaiveDateTime,
  pub merged_type: Option<String>,
  pub transaction_id: Option<String>,
  pub description: Option<String>,
  pub blockhash: Option<String>,
}

#[derive(Queryable, Selectable, Serialize, Clone, Debug)]
#[diesel(table_name = merge_address)]
pub struct MergeAddress {
  pub user: String,
  pub merged_type: String,
  #[diesel(column_name = address)]
  pub merge_address: Option<String>,
}

/// The last status report a worker's miner sent, as raw json.
#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = status)]
pub struct WorkerStatus {
  pub user: String,
  pub worker: String,
  pub report: Option<String>,
  pub time: NaiveDateTime,
}

impl WorkerStatus {
  /// Minutes without a report before a worker counts as stale.
  pub const STALE_MINUTES: i64 = 10;

  pub fn stale(&self, now: NaiveDateTime) -> bool {
    now - chrono::Duration::minutes(WorkerStatus::STALE_MINUTES) >= self.time
  }

  /// The report parsed as json. Reports that don't parse are dropped.
  pub fn parsed_report(&self) -> Option<serde_json::Value> {
    self.report.as_ref().and_then(|report| serde_json::from_str(report).ok())
  }
}

#[derive(QueryableByName, Debug)]
pub struct SliceTotal {
  #[diesel(sql_type = BigInt)]
  pub total: i64,
}

#[derive(QueryableByName, Debug)]
pub struct BlobField {
  #[diesel(sql_type = Nullable<Text>)]
  pub value: Option<String>,
}

#[derive(QueryableByName, Debug)]
pub struct WorkerSliceRow {
  #[diesel(sql_type = Varchar)]
  pub user: String,
  #[diesel(sql_type = Varchar)]
  pub worker: String,
  #[diesel(sql_type = Timestamp)]
  pub time: NaiveDateTime,
  #[diesel(sql_type = BigInt)]
  pub value: i64,
}

#[derive(QueryableByName, Debug)]
pub struct DeviceSliceRow {
  #[diesel(sql_type = Varchar)]
  pub user: String,
  #[diesel(sql_type = Varchar)]
  pub worker: String,
  #[diesel(sql_type = Integer)]
  pub device: i32,
  #[diesel(sql_type = Timestamp)]
  pub time: NaiveDateTime,
  #[diesel(sql_type = BigInt)]
  pub value: i64,
}

#[derive(QueryableByName, Debug)]
pub struct TypeSliceRow {
  #[diesel(sql_type = Varchar)]
  pub typ: String,
  #[diesel(sql_type = Timestamp)]
  pub time: NaiveDateTime,
  #[diesel(sql_type = BigInt)]
  pub value: i64,
}
