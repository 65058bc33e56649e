//! Time sliced statistics.
//!
//! Per-worker accepted and rejected shares, per-device hashrate and
//! temperature, and pool wide values such as the worker count, are recorded
//! into one minute slices. Slices older than their
//! resolution's window are folded into the next coarser resolution and
//! deleted, so recent history stays fine grained while old history shrinks.

use std::collections::BTreeMap;

use chrono::{Duration, DurationRound, NaiveDateTime};
use diesel::prelude::*;
use diesel::sql_types::*;

use crate::db::models::{DeviceSliceRow, TypeSliceRow, WorkerSliceRow};
use crate::db::DbAccess;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
  OneMinute,
  FiveMinute,
  OneHour,
}

impl Resolution {
  pub fn slice(&self) -> Duration {
    match self {
      Resolution::OneMinute => Duration::minutes(1),
      Resolution::FiveMinute => Duration::minutes(5),
      Resolution::OneHour => Duration::hours(1),
    }
  }

  /// How long slices are kept at this resolution before compression.
  pub fn window(&self) -> Duration {
    match self {
      Resolution::OneMinute => Duration::hours(1),
      Resolution::FiveMinute => Duration::days(1),
      Resolution::OneHour => Duration::days(30),
    }
  }

  pub fn upper(&self) -> Option<Resolution> {
    match self {
      Resolution::OneMinute => Some(Resolution::FiveMinute),
      Resolution::FiveMinute => Some(Resolution::OneHour),
      Resolution::OneHour => None,
    }
  }

  /// Start of the slice `time` falls in.
  pub fn floor(&self, time: NaiveDateTime) -> NaiveDateTime {
    // Only fails for spans beyond the representable range
    time.duration_trunc(self.slice()).unwrap_or(time)
  }

  fn prefix(&self) -> &'static str {
    match self {
      Resolution::OneMinute => "one_minute",
      Resolution::FiveMinute => "five_minute",
      Resolution::OneHour => "one_hour",
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Series {
  Share,
  Reject,
  Hashrate,
  Temperature,
  Type,
}

impl Series {
  pub fn combine(&self) -> Combine {
    match self {
      Series::Share | Series::Reject => Combine::Sum,
      Series::Hashrate | Series::Temperature | Series::Type => Combine::Average,
    }
  }

  pub fn table(&self, resolution: Resolution) -> String {
    let suffix = match self {
      Series::Share => "share",
      Series::Reject => "reject",
      Series::Hashrate => "hashrate",
      Series::Temperature => "temperature",
      Series::Type => "type",
    };
    format!("{}_{}", resolution.prefix(), suffix)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Combine {
  Sum,
  Average,
}

impl Combine {
  /// Combines a non-empty list of slice values.
  pub fn apply(&self, values: &[i64]) -> i64 {
    let total: i64 = values.iter().sum();
    match self {
      Combine::Sum => total,
      Combine::Average => total / values.len().max(1) as i64,
    }
  }

  /// SQL for merging an incoming value into a slice row that already exists.
  pub fn upsert_expression(&self, table: &str) -> String {
    match self {
      Combine::Sum => format!("{}.value + EXCLUDED.value", table),
      Combine::Average => format!("({}.value + EXCLUDED.value) / 2", table),
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SliceRow<K> {
  pub key: K,
  pub time: NaiveDateTime,
  pub value: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerKey {
  pub user: String,
  pub worker: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceKey {
  pub user: String,
  pub worker: String,
  pub device: i32,
}

#[derive(Debug, PartialEq)]
pub struct Compressed<K> {
  /// Rows to merge into the coarser table, one per key and coarse slice.
  pub upper: Vec<SliceRow<K>>,
  /// Rows of the finer table that were folded in and must be deleted.
  pub consumed: Vec<SliceRow<K>>,
}

/// Folds every row older than `resolution`'s window into the next coarser
/// resolution. Returns `None` for the coarsest resolution.
pub fn compress<K: Clone + Ord>(rows: Vec<SliceRow<K>>, resolution: Resolution, combine: Combine,
                                now: NaiveDateTime) -> Option<Compressed<K>> {
  let upper = resolution.upper()?;
  let cutoff = resolution.floor(now) - resolution.window();
  let mut groups: BTreeMap<(NaiveDateTime, K), Vec<i64>> = BTreeMap::new();
  let mut consumed = Vec::new();
  for row in rows.into_iter().filter(|row| row.time < cutoff) {
    groups.entry((upper.floor(row.time), row.key.clone()))
      .or_insert_with(Vec::new)
      .push(row.value);
    consumed.push(row);
  }
  let upper = groups.into_iter()
    .map(|((time, key), values)| SliceRow { key, time, value: combine.apply(&values) })
    .collect();
  Some(Compressed { upper, consumed })
}

/// Compresses the one minute and five minute tables of every series.
pub fn compress_all(db: &DbAccess, now: NaiveDateTime) -> Result<usize> {
  let mut folded = 0;
  for resolution in [Resolution::OneMinute, Resolution::FiveMinute].iter() {
    folded += compress_worker_table(db, Series::Share, *resolution, now)?;
    folded += compress_worker_table(db, Series::Reject, *resolution, now)?;
    folded += compress_device_table(db, Series::Hashrate, *resolution, now)?;
    folded += compress_device_table(db, Series::Temperature, *resolution, now)?;
    folded += compress_type_table(db, *resolution, now)?;
  }
  Ok(folded)
}

fn compress_worker_table(db: &DbAccess, series: Series, resolution: Resolution, now: NaiveDateTime)
                         -> Result<usize> {
  let upper = match resolution.upper() {
    Some(upper) => upper,
    None => return Ok(0),
  };
  let table = series.table(resolution);
  let upper_table = series.table(upper);
  let cutoff = resolution.floor(now) - resolution.window();
  let mut conn = db.conn()?;
  conn.transaction(|conn| {
    let rows: Vec<WorkerSliceRow> = diesel::sql_query(format!(
      "SELECT \"user\", worker, time, value FROM {} WHERE time < $1 FOR UPDATE", table
    ))
      .bind::<Timestamp, _>(cutoff)
      .load(conn)?;
    let rows = rows.into_iter().map(|row| SliceRow {
      key: WorkerKey { user: row.user, worker: row.worker },
      time: row.time,
      value: row.value,
    }).collect();
    let compressed = match compress(rows, resolution, series.combine(), now) {
      Some(compressed) => compressed,
      None => return Ok(0),
    };
    let upsert = format!(
      "INSERT INTO {table} (\"user\", worker, time, value) VALUES ($1, $2, $3, $4) \
       ON CONFLICT (\"user\", worker, time) DO UPDATE SET value = {merge}",
      table = upper_table,
      merge = series.combine().upsert_expression(&upper_table),
    );
    for row in &compressed.upper {
      diesel::sql_query(upsert.as_str())
        .bind::<Varchar, _>(&row.key.user)
        .bind::<Varchar, _>(&row.key.worker)
        .bind::<Timestamp, _>(row.time)
        .bind::<BigInt, _>(row.value)
        .execute(conn)?;
    }
    let delete = format!("DELETE FROM {} WHERE \"user\" = $1 AND worker = $2 AND time = $3", table);
    for row in &compressed.consumed {
      diesel::sql_query(delete.as_str())
        .bind::<Varchar, _>(&row.key.user)
        .bind::<Varchar, _>(&row.key.worker)
        .bind::<Timestamp, _>(row.time)
        .execute(conn)?;
    }
    if !compressed.consumed.is_empty() {
      debug!("Compressed {} rows of {} into {}", compressed.consumed.len(), table, upper_table);
    }
    Ok(compressed.consumed.len())
  })
}

fn compress_device_table(db: &DbAccess, series: Series, resolution: Resolution, now: NaiveDateTime)
                         -> Result<usize> {
  let upper = match resolution.upper() {
    Some(upper) => upper,
    None => return Ok(0),
  };
  let table = series.table(resolution);
  let upper_table = series.table(upper);
  let cutoff = resolution.floor(now) - resolution.window();
  let mut conn = db.conn()?;
  conn.transaction(|conn| {
    let rows: Vec<DeviceSliceRow> = diesel::sql_query(format!(
      "SELECT \"user\", worker, device, time, value FROM {} WHERE time < $1 FOR UPDATE", table
    ))
      .bind::<Timestamp, _>(cutoff)
      .load(conn)?;
    let rows = rows.into_iter().map(|row| SliceRow {
      key: DeviceKey { user: row.user, worker: row.worker, device: row.device },
      time: row.time,
      value: row.value,
    }).collect();
    let compressed = match compress(rows, resolution, series.combine(), now) {
      Some(compressed) => compressed,
      None => return Ok(0),
    };
    let upsert = format!(
      "INSERT INTO {table} (\"user\", worker, device, time, value) VALUES ($1, $2, $3, $4, $5) \
       ON CONFLICT (\"user\", worker, device, time) DO UPDATE SET value = {merge}",
      table = upper_table,
      merge = series.combine().upsert_expression(&upper_table),
    );
    for row in &compressed.upper {
      diesel::sql_query(upsert.as_str())
        .bind::<Varchar, _>(&row.key.user)
        .bind::<Varchar, _>(&row.key.worker)
        .bind::<Integer, _>(row.key.device)
        .bind::<Timestamp, _>(row.time)
        .bind::<BigInt, _>(row.value)
        .execute(conn)?;
    }
    let delete = format!(
      "DELETE FROM {} WHERE \"user\" = $1 AND worker = $2 AND device = $3 AND time = $4", table
    );
    for row in &compressed.consumed {
      diesel::sql_query(delete.as_str())
        .bind::<Varchar, _>(&row.key.user)
        .bind::<Varchar, _>(&row.key.worker)
        .bind::<Integer, _>(row.key.device)
        .bind::<Timestamp, _>(row.time)
        .execute(conn)?;
    }
    Ok(compressed.consumed.len())
  })
}

fn compress_type_table(db: &DbAccess, resolution: Resolution, now: NaiveDateTime) -> Result<usize> {
  let upper = match resolution.upper() {
    Some(upper) => upper,
    None => return Ok(0),
  };
  let table = Series::Type.table(resolution);
  let upper_table = Series::Type.table(upper);
  let cutoff = resolution.floor(now) - resolution.window();
  let mut conn = db.conn()?;
  conn.transaction(|conn| {
    let rows: Vec<TypeSliceRow> = diesel::sql_query(format!(
      "SELECT typ, time, value FROM {} WHERE time < $1 FOR UPDATE", table
    ))
      .bind::<Timestamp, _>(cutoff)
      .load(conn)?;
    let rows = rows.into_iter()
      .map(|row| SliceRow { key: row.typ, time: row.time, value: row.value })
      .collect();
    let compressed = match compress(rows, resolution, Combine::Average, now) {
      Some(compressed) => compressed,
      None => return Ok(0),
    };
    let upsert = format!(
      "INSERT INTO {table} (typ, time, value) VALUES ($1, $2, $3) \
       ON CONFLICT (typ, time) DO UPDATE SET value = {merge}",
      table = upper_table,
      merge = Combine::Average.upsert_expression(&upper_table),
    );
    for row in &compressed.upper {
      diesel::sql_query(upsert.as_str())
        .bind::<Varchar, _>(&row.key)
        .bind::<Timestamp, _>(row.time)
        .bind::<BigInt, _>(row.value)
        .execute(conn)?;
    }
    let delete = format!("DELETE FROM {} WHERE typ = $1 AND time = $2", table);
    for row in &compressed.consumed {
      diesel::sql_query(delete.as_str())
        .bind::<Varchar, _>(&row.key)
        .bind::<Timestamp, _>(row.time)
        .execute(conn)?;
    }
    Ok(compressed.consumed.len())
  })
}

/// Records a pool wide value, such as the worker count, into the current one
/// minute slice. A later value in the same minute replaces the earlier one.
pub fn record_type(db: &DbAccess, typ: &str, value: i64, now: NaiveDateTime) -> Result<()> {
  let mut conn = db.conn()?;
  diesel::sql_query(
    "INSERT INTO one_minute_type (typ, time, value) VALUES ($1, $2, $3) \
     ON CONFLICT (typ, time) DO UPDATE SET value = EXCLUDED.value"
  )
    .bind::<Varchar, _>(typ)
    .bind::<Timestamp, _>(Resolution::OneMinute.floor(now))
    .bind::<BigInt, _>(value)
    .execute(&mut conn)?;
  Ok(())
}

/// Tables that together cover the last day of a series.
pub fn last_day_tables(series: Series) -> Vec<String> {
  vec![series.table(Resolution::OneMinute), series.table(Resolution::FiveMinute)]
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2014, 3, 21).unwrap().and_hms_opt(hour, minute, second).unwrap()
  }

  fn worker(user: &str, time: NaiveDateTime, value: i64) -> SliceRow<WorkerKey> {
    SliceRow {
      key: WorkerKey { user: user.to_owned(), worker: "rig".to_owned() },
      time,
      value,
    }
  }

  #[test]
  fn test_floor() {
    assert_eq!(Resolution::OneMinute.floor(at(16, 32, 59)), at(16, 32, 0));
    assert_eq!(Resolution::FiveMinute.floor(at(16, 34, 10)), at(16, 30, 0));
    assert_eq!(Resolution::OneHour.floor(at(16, 59, 59)), at(16, 0, 0));
    let with_nanos = at(16, 32, 5) + Duration::milliseconds(250);
    assert_eq!(Resolution::OneMinute.floor(with_nanos), at(16, 32, 0));
  }

  #[test]
  fn test_table_names() {
    assert_eq!(Series::Share.table(Resolution::OneMinute), "one_minute_share");
    assert_eq!(Series::Reject.table(Resolution::FiveMinute), "five_minute_reject");
    assert_eq!(Series::Type.table(Resolution::OneHour), "one_hour_type");
    assert_eq!(Series::Hashrate.table(Resolution::OneMinute), "one_minute_hashrate");
    assert_eq!(Series::Temperature.table(Resolution::FiveMinute), "five_minute_temperature");
    assert_eq!(last_day_tables(Series::Share), vec!["one_minute_share", "five_minute_share"]);
  }

  #[test]
  fn test_combine() {
    assert_eq!(Combine::Sum.apply(&[3, 4, 5]), 12);
    assert_eq!(Combine::Average.apply(&[3, 4, 6]), 4);
  }

  #[test]
  fn test_upsert_expression() {
    assert_eq!(Combine::Sum.upsert_expression("five_minute_share"),
               "five_minute_share.value + EXCLUDED.value");
    assert_eq!(Combine::Average.upsert_expression("one_hour_type"),
               "(one_hour_type.value + EXCLUDED.value) / 2");
    assert_eq!(Series::Temperature.combine(), Combine::Average);
    assert_eq!(Series::Reject.combine(), Combine::Sum);
  }

  #[test]
  fn test_compress_averages_per_device() {
    let device = |device: i32, time: NaiveDateTime, value: i64| SliceRow {
      key: DeviceKey { user: "alice".to_owned(), worker: "rig".to_owned(), device },
      time,
      value,
    };
    let rows = vec![
      device(0, at(16, 0, 0), 70),
      device(0, at(16, 1, 0), 74),
      device(1, at(16, 0, 0), 60),
    ];
    let compressed = compress(rows, Resolution::OneMinute, Series::Temperature.combine(), at(18, 0, 0)).unwrap();
    assert_eq!(compressed.upper, vec![
      device(0, at(16, 0, 0), 72),
      device(1, at(16, 0, 0), 60),
    ]);
  }

  #[test]
  fn test_compress_sums_per_key_and_slice() {
    let now = at(18, 0, 30);
    // Cutoff is 17:00; only rows before it are folded
    let rows = vec![
      worker("alice", at(16, 1, 0), 10),
      worker("alice", at(16, 4, 0), 5),
      worker("bob", at(16, 2, 0), 7),
      worker("alice", at(16, 5, 0), 1),
      worker("alice", at(17, 30, 0), 100),
    ];
    let compressed = compress(rows, Resolution::OneMinute, Combine::Sum, now).unwrap();
    assert_eq!(compressed.upper, vec![
      worker("alice", at(16, 0, 0), 15),
      worker("bob", at(16, 0, 0), 7),
      worker("alice", at(16, 5, 0), 1),
    ]);
    assert_eq!(compressed.consumed.len(), 4);
    assert!(compressed.consumed.iter().all(|row| row.time < at(17, 0, 0)));
  }

  #[test]
  fn test_compress_averages_type_values() {
    let now = at(18, 0, 0);
    let rows = vec![
      SliceRow { key: "workers".to_owned(), time: at(16, 0, 0), value: 10 },
      SliceRow { key: "workers".to_owned(), time: at(16, 1, 0), value: 20 },
      SliceRow { key: "workers".to_owned(), time: at(16, 2, 0), value: 31 },
    ];
    let compressed = compress(rows, Resolution::OneMinute, Combine::Average, now).unwrap();
    assert_eq!(compressed.upper, vec![
      SliceRow { key: "workers".to_owned(), time: at(16, 0, 0), value: 20 },
    ]);
  }

  #[test]
  fn test_coarsest_resolution_is_not_compressed() {
    let rows = vec![worker("alice", at(0, 0, 0), 1)];
    assert_eq!(compress(rows, Resolution::OneHour, Combine::Sum, at(23, 0, 0)), None);
  }
}
