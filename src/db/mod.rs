use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::dsl::{max, sum};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_types::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::db::models::*;
use crate::db::schema::*;
use crate::error::{PoolError, Result};

pub mod models;
pub mod schema;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

/// A payout along with the block it was credited from and the transaction
/// that paid it, when those exist.
pub struct PayoutRecord<T> {
  pub transfer: T,
  pub block: Option<Block>,
  pub transaction: Option<Transaction>,
}

pub struct DbAccess {
  conn_pool: Pool<ConnectionManager<PgConnection>>,
}

impl DbAccess {
  pub fn new(database_url: &str) -> Result<DbAccess> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder().build(manager)?;
    Ok(DbAccess {
      conn_pool: pool,
    })
  }

  /// A pool that opens no connection until one is asked for.
  #[cfg(test)]
  pub fn unconnected(database_url: &str) -> DbAccess {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    DbAccess {
      conn_pool: Pool::builder().build_unchecked(manager),
    }
  }

  pub fn conn(&self) -> Result<PgPooled> {
    Ok(self.conn_pool.get()?)
  }

  pub fn run_migrations(&self) -> Result<usize> {
    let mut conn = self.conn()?;
    let applied = conn.run_pending_migrations(MIGRATIONS)
      .map_err(|err| PoolError::Migration(err.to_string()))?;
    Ok(applied.len())
  }

  /// Most recently found blocks of one chain; `None` selects the main chain.
  pub fn recent_blocks(&self, merged_type: Option<&str>, limit: i64) -> Result<Vec<Block>> {
    let mut conn = self.conn()?;
    let query = block::table
      .select(Block::as_select())
      .order(block::found_at.desc())
      .limit(limit)
      .into_boxed();
    let query = match merged_type {
      Some(merged) => query.filter(block::merged_type.eq(merged)),
      None => query.filter(block::merged_type.is_null()),
    };
    Ok(query.load(&mut conn)?)
  }

  /// `(bits, shares_to_solve, orphan)` for every main chain block, enough to
  /// compute luck and orphan rates.
  pub fn main_block_outcomes(&self) -> Result<Vec<(String, Option<i64>, bool)>> {
    let mut conn = self.conn()?;
    Ok(block::table
      .filter(block::merged_type.is_null())
      .select((block::bits, block::shares_to_solve, block::orphan))
      .load(&mut conn)?)
  }

  /// Shares submitted since the last main chain block was entered.
  pub fn round_shares(&self) -> Result<i64> {
    let mut conn = self.conn()?;
    let last_share: Option<i64> = block::table
      .filter(block::merged_type.is_null())
      .select(max(block::last_share_id))
      .first(&mut conn)?;
    let total: Option<i64> = share::table
      .filter(share::id.gt(last_share.unwrap_or(0)))
      .select(sum(share::shares))
      .first(&mut conn)?;
    Ok(total.unwrap_or(0))
  }

  /// Sum of the values in the given slice tables recorded at or after `since`.
  /// Table names come from a fixed set, never from user input.
  pub fn slice_total(&self, tables: &[String], since: NaiveDateTime) -> Result<i64> {
    let mut conn = self.conn()?;
    let unions: Vec<String> = tables.iter()
      .map(|table| format!("SELECT value FROM {} WHERE time >= $1", table))
      .collect();
    let query = format!(
      "SELECT CAST(COALESCE(SUM(value), 0) AS BIGINT) AS total FROM ({}) AS slices",
      unions.join(" UNION ALL ")
    );
    let result: SliceTotal = diesel::sql_query(query)
      .bind::<Timestamp, _>(since)
      .get_result(&mut conn)?;
    Ok(result.total)
  }

  pub fn payouts_for(&self, user: &str, limit: i64) -> Result<Vec<PayoutRecord<Payout>>> {
    let mut conn = self.conn()?;
    let payouts: Vec<Payout> = payout::table
      .filter(payout::user.eq(user))
      .order(payout::created_at.desc())
      .limit(limit)
      .select(Payout::as_select())
      .load(&mut conn)?;
    let links: Vec<(Option<String>, Option<String>)> = payouts.iter()
      .map(|payout| (payout.blockhash.clone(), payout.transaction_id.clone()))
      .collect();
    let (blocks, transactions) = self.load_links(&mut conn, &links)?;
    Ok(payouts.into_iter().map(|payout| PayoutRecord {
      block: payout.blockhash.as_ref().and_then(|hash| blocks.get(hash).cloned()),
      transaction: payout.transaction_id.as_ref().and_then(|txid| transactions.get(txid).cloned()),
      transfer: payout,
    }).collect())
  }

  pub fn bonuses_for(&self, user: &str, limit: i64) -> Result<Vec<PayoutRecord<BonusPayout>>> {
    let mut conn = self.conn()?;
    let bonuses: Vec<BonusPayout> = bonus_payout::table
      .filter(bonus_payout::user.eq(user))
      .order(bonus_payout::created_at.desc())
      .limit(limit)
      .select(BonusPayout::as_select())
      .load(&mut conn)?;
    let links: Vec<(Option<String>, Option<String>)> = bonuses.iter()
      .map(|bonus| (bonus.blockhash.clone(), bonus.transaction_id.clone()))
      .collect();
    let (blocks, transactions) = self.load_links(&mut conn, &links)?;
    Ok(bonuses.into_iter().map(|bonus| PayoutRecord {
      block: bonus.blockhash.as_ref().and_then(|hash| blocks.get(hash).cloned()),
      transaction: bonus.transaction_id.as_ref().and_then(|txid| transactions.get(txid).cloned()),
      transfer: bonus,
    }).collect())
  }

  fn load_links(&self, conn: &mut PgConnection, links: &[(Option<String>, Option<String>)])
                -> Result<(HashMap<String, Block>, HashMap<String, Transaction>)> {
    let hashes: Vec<String> = links.iter().filter_map(|(hash, _)| hash.clone()).collect();
    let txids: Vec<String> = links.iter().filter_map(|(_, txid)| txid.clone()).collect();
    let blocks: Vec<Block> = block::table
      .filter(block::hash.eq_any(hashes))
      .select(Block::as_select())
      .load(conn)?;
    let transactions: Vec<Transaction> = transaction::table
      .filter(transaction::txid.eq_any(txids))
      .select(Transaction::as_select())
      .load(conn)?;
    Ok((
      blocks.into_iter().map(|block| (block.hash.clone(), block)).collect(),
      transactions.into_iter().map(|tx| (tx.txid.clone(), tx)).collect(),
    ))
  }

  pub fn donation_perc(&self, user: &str) -> Result<Option<f64>> {
    let mut conn = self.conn()?;
    Ok(donation_percent::table
      .find(user)
      .select(donation_percent::perc)
      .first(&mut conn)
      .optional()?)
  }

  pub fn merge_addresses(&self, user: &str) -> Result<Vec<MergeAddress>> {
    let mut conn = self.conn()?;
    Ok(merge_address::table
      .filter(merge_address::user.eq(user))
      .select(MergeAddress::as_select())
      .load(&mut conn)?)
  }

  pub fn worker_statuses(&self, user: &str) -> Result<Vec<WorkerStatus>> {
    let mut conn = self.conn()?;
    Ok(status::table
      .filter(status::user.eq(user))
      .order(status::worker.asc())
      .select(WorkerStatus::as_select())
      .load(&mut conn)?)
  }

  /// One minute device slices of a user recorded at or after `since`, oldest
  /// first. `table` comes from `Series::table`.
  pub fn device_slices(&self, table: &str, user: &str, since: NaiveDateTime) -> Result<Vec<DeviceSliceRow>> {
    let mut conn = self.conn()?;
    Ok(diesel::sql_query(format!(
      "SELECT \"user\", worker, device, time, value FROM {} WHERE \"user\" = $1 AND time >= $2 \
       ORDER BY time", table
    ))
      .bind::<Varchar, _>(user)
      .bind::<Timestamp, _>(since)
      .load(&mut conn)?)
  }

  /// Reads one field of an hstore blob, e.g. the last seen chain height.
  pub fn blob_field(&self, key: &str, field: &str) -> Result<Option<String>> {
    let mut conn = self.conn()?;
    let found: Option<BlobField> = diesel::sql_query("SELECT data -> $2 AS value FROM blob WHERE key = $1")
      .bind::<Text, _>(key)
      .bind::<Text, _>(field)
      .get_result(&mut conn)
      .optional()?;
    Ok(found.and_then(|found| found.value))
  }

  /// Sets one field of an hstore blob, creating the blob when missing.
  pub fn set_blob_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
    let mut conn = self.conn()?;
    diesel::sql_query(
      "INSERT INTO blob (key, data) VALUES ($1, hstore($2, $3)) \
       ON CONFLICT (key) DO UPDATE SET data = blob.data || hstore($2, $3)"
    )
      .bind::<Text, _>(key)
      .bind::<Text, _>(field)
      .bind::<Text, _>(value)
      .execute(&mut conn)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bootstrap::{database_url, BootstrapPlan};
  use crate::config::BootstrapConfig;
  use crate::slices::{self, last_day_tables, Resolution, Series};
  use chrono::{Duration, Utc};

  fn insert_share(db: &DbAccess, table: &str, time: NaiveDateTime, value: i64) {
    let mut conn = db.conn().unwrap();
    diesel::sql_query(format!(
      "INSERT INTO {} (\"user\", worker, time, value) VALUES ('alice', 'rig', $1, $2)", table
    ))
      .bind::<Timestamp, _>(time)
      .bind::<BigInt, _>(value)
      .execute(&mut conn)
      .unwrap();
  }

  fn insert_type(db: &DbAccess, table: &str, time: NaiveDateTime, value: i64) {
    let mut conn = db.conn().unwrap();
    diesel::sql_query(format!("INSERT INTO {} (typ, time, value) VALUES ('workers', $1, $2)", table))
      .bind::<Timestamp, _>(time)
      .bind::<BigInt, _>(value)
      .execute(&mut conn)
      .unwrap();
  }

  // Needs a Postgres superuser at SIMPLEVERT_TEST_ADMIN_URI; run with
  // `cargo test -- --ignored`.
  #[test]
  #[ignore]
  fn test_bootstrap_migrate_and_compress() {
    let admin_uri = std::env::var("SIMPLEVERT_TEST_ADMIN_URI")
      .unwrap_or_else(|_| "postgres://postgres@localhost/postgres".to_owned());
    let config = BootstrapConfig {
      admin_uri: admin_uri.clone(),
      role: "simplevert_it".to_owned(),
      password: Some("it$$pa'ss".to_owned()),
      databases: vec!["simplevert_it".to_owned()],
      hstore_database: None,
      guards: true,
    };
    let plan = BootstrapPlan::from_config(&config).unwrap();
    plan.execute(&admin_uri).unwrap();

    let db = DbAccess::new(&database_url(&admin_uri, "simplevert_it").unwrap()).unwrap();
    assert_eq!(db.run_migrations().unwrap(), 2);

    db.set_blob_field("blockheight", "VTC", "1000").unwrap();
    db.set_blob_field("blockheight", "VTC", "1001").unwrap();
    db.set_blob_field("blockheight", "MON", "7").unwrap();
    assert_eq!(db.blob_field("blockheight", "VTC").unwrap().as_deref(), Some("1001"));
    assert_eq!(db.blob_field("blockheight", "MON").unwrap().as_deref(), Some("7"));
    assert_eq!(db.blob_field("difficulty", "VTC").unwrap(), None);

    let now = Utc::now().naive_utc();
    let base = Resolution::FiveMinute.floor(now - Duration::hours(3));
    for (minute, value) in [(0, 10), (1, 20), (2, 30)].iter() {
      insert_share(&db, "one_minute_share", base + Duration::minutes(*minute), *value);
    }
    insert_share(&db, "five_minute_share", base, 5);
    // Outside the last day
    insert_share(&db, "five_minute_share", base - Duration::days(2), 1000);
    for (minute, value) in [(0, 10), (1, 20), (2, 31)].iter() {
      insert_type(&db, "one_minute_type", base + Duration::minutes(*minute), *value);
    }
    insert_type(&db, "five_minute_type", base, 40);

    let since = now - Duration::days(1);
    let shares = last_day_tables(Series::Share);
    assert_eq!(db.slice_total(&shares, since).unwrap(), 65);
    assert!(slices::compress_all(&db, now).unwrap() >= 6);
    assert_eq!(db.slice_total(&shares, since).unwrap(), 65);
    assert_eq!(db.slice_total(&["one_minute_share".to_owned()], since).unwrap(), 0);
    // Existing five minute rows absorb the folded values: sums add, averages halve
    assert_eq!(db.slice_total(&["five_minute_share".to_owned()], since).unwrap(), 65);
    assert_eq!(db.slice_total(&["five_minute_type".to_owned()], since).unwrap(), 30);

    // The guarded plan runs again once nothing holds the database open
    drop(db);
    plan.execute(&admin_uri).unwrap();
  }
}
