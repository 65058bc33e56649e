//! One-time provisioning of the pool's role and databases.
//!
//! A plan is an ordered list of statements, interleaved with switches to
//! another database. It can be printed as a psql script or run directly
//! against a Postgres server with an administrative connection.

use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::Connection;
use regex::Regex;

use crate::config::BootstrapConfig;
use crate::error::{PoolError, Result};

const ORIGINAL_ROLE: &str = "simplevert";
const ORIGINAL_DATABASES: [&str; 2] = ["simplevert", "simplevert_testing"];
/// The historical script switched to this database before enabling hstore,
/// a name that matches none of the databases it created.
const ORIGINAL_HSTORE_DATABASE: &str = "simplecoin";
/// Dollar quote tag around the guarded role creation block.
const GUARD_TAG: &str = "$bootstrap$";

#[derive(Clone, Debug, PartialEq)]
pub enum Step {
  Sql(String),
  Connect(String),
}

#[derive(Debug)]
pub struct BootstrapPlan {
  pub steps: Vec<Step>,
}

impl BootstrapPlan {
  pub fn from_config(config: &BootstrapConfig) -> Result<BootstrapPlan> {
    let password = config.password.as_ref()
      .ok_or_else(|| PoolError::Bootstrap("bootstrap.password is not set".to_owned()))?;
    let databases: Vec<&str> = config.databases.iter().map(|db| db.as_str()).collect();
    build(&config.role, password, &databases, config.hstore_database.as_deref(), config.guards)
  }

  /// The plan exactly as the pool was first provisioned, including the
  /// unguarded role creation and the stray `simplecoin` extension target.
  pub fn original(password: &str) -> BootstrapPlan {
    let mut steps = Vec::new();
    for database in ORIGINAL_DATABASES.iter() {
      steps.push(Step::Sql(format!("DROP DATABASE IF EXISTS {};", database)));
    }
    steps.push(create_role(ORIGINAL_ROLE, password, false));
    for database in ORIGINAL_DATABASES.iter() {
      steps.extend(create_database(database, ORIGINAL_ROLE));
    }
    steps.push(Step::Connect(ORIGINAL_HSTORE_DATABASE.to_owned()));
    steps.push(create_extension(false));
    BootstrapPlan { steps }
  }

  pub fn to_psql(&self) -> String {
    let mut script = String::new();
    for step in &self.steps {
      match step {
        Step::Sql(sql) => script.push_str(sql),
        Step::Connect(database) => {
          script.push_str("\\c ");
          script.push_str(database);
        }
      }
      script.push('\n');
    }
    script
  }

  /// Runs every step, starting on `admin_uri` and reconnecting with the same
  /// credentials whenever the plan switches database. Stops at the first
  /// failing statement.
  pub fn execute(&self, admin_uri: &str) -> Result<()> {
    let mut conn = PgConnection::establish(admin_uri)?;
    for step in &self.steps {
      match step {
        Step::Sql(sql) => {
          debug!("bootstrap: {}", sql);
          conn.batch_execute(sql)?;
        }
        Step::Connect(database) => {
          info!("bootstrap: connecting to {}", database);
          conn = PgConnection::establish(&database_url(admin_uri, database)?)?;
        }
      }
    }
    Ok(())
  }
}

fn build(role: &str, password: &str, databases: &[&str], hstore_database: Option<&str>, guards: bool)
         -> Result<BootstrapPlan> {
  let identifier = identifier_pattern()?;
  check_identifier(&identifier, role)?;
  if databases.is_empty() {
    return Err(PoolError::Bootstrap("no databases to create".to_owned()));
  }
  for database in databases {
    check_identifier(&identifier, database)?;
  }
  if let Some(database) = hstore_database {
    check_identifier(&identifier, database)?;
  }
  if guards && password.contains(GUARD_TAG) {
    return Err(PoolError::Bootstrap(format!("password must not contain {}", GUARD_TAG)));
  }

  let mut steps = Vec::new();
  for database in databases {
    steps.push(Step::Sql(format!("DROP DATABASE IF EXISTS {};", database)));
  }
  steps.push(create_role(role, password, guards));
  for database in databases {
    steps.extend(create_database(database, role));
  }
  match hstore_database {
    Some(database) => {
      steps.push(Step::Connect(database.to_owned()));
      steps.push(create_extension(guards));
    }
    None => {
      for database in databases {
        steps.push(Step::Connect((*database).to_owned()));
        steps.push(create_extension(guards));
      }
    }
  }
  Ok(BootstrapPlan { steps })
}

fn create_role(role: &str, password: &str, guards: bool) -> Step {
  let create = format!("CREATE USER {} WITH PASSWORD '{}';", role, quote_literal(password));
  if guards {
    Step::Sql(format!(
      "DO {tag} BEGIN IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = '{role}') THEN {create} END IF; END {tag};",
      tag = GUARD_TAG,
      role = role,
      create = create
    ))
  } else {
    Step::Sql(create)
  }
}

fn create_database(database: &str, role: &str) -> Vec<Step> {
  vec![
    Step::Sql(format!("CREATE DATABASE {};", database)),
    Step::Sql(format!("GRANT ALL PRIVILEGES ON DATABASE {} TO {};", database, role)),
  ]
}

fn create_extension(guards: bool) -> Step {
  if guards {
    Step::Sql("CREATE EXTENSION IF NOT EXISTS hstore;".to_owned())
  } else {
    Step::Sql("CREATE EXTENSION hstore;".to_owned())
  }
}

fn quote_literal(value: &str) -> String {
  value.replace('\'', "''")
}

// Identifiers are interpolated into DDL, which has no bind parameters, so
// only plain lowercase names are accepted.
fn identifier_pattern() -> Result<Regex> {
  Regex::new("^[a-z_][a-z0-9_]{0,62}$").map_err(|err| PoolError::Bootstrap(err.to_string()))
}

fn check_identifier(pattern: &Regex, name: &str) -> Result<()> {
  if pattern.is_match(name) {
    Ok(())
  } else {
    Err(PoolError::Bootstrap(format!("{:?} is not a plain identifier", name)))
  }
}

/// Swaps the database path of a connection uri, keeping host and credentials.
pub fn database_url(admin_uri: &str, database: &str) -> Result<String> {
  let mut url = reqwest::Url::parse(admin_uri)
    .map_err(|err| PoolError::Bootstrap(format!("bad admin uri: {}", err)))?;
  url.set_path(&format!("/{}", database));
  Ok(url.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sql(plan: &BootstrapPlan) -> Vec<&str> {
    plan.steps.iter().filter_map(|step| match step {
      Step::Sql(sql) => Some(sql.as_str()),
      Step::Connect(_) => None,
    }).collect()
  }

  #[test]
  fn test_original_plan_matches_script() {
    let script = BootstrapPlan::original("testing").to_psql();
    let expected = "DROP DATABASE IF EXISTS simplevert;\n\
                    DROP DATABASE IF EXISTS simplevert_testing;\n\
                    CREATE USER simplevert WITH PASSWORD 'testing';\n\
                    CREATE DATABASE simplevert;\n\
                    GRANT ALL PRIVILEGES ON DATABASE simplevert TO simplevert;\n\
                    CREATE DATABASE simplevert_testing;\n\
                    GRANT ALL PRIVILEGES ON DATABASE simplevert_testing TO simplevert;\n\
                    \\c simplecoin\n\
                    CREATE EXTENSION hstore;\n";
    assert_eq!(script, expected);
  }

  #[test]
  fn test_only_drops_are_guarded_by_default() {
    let config = BootstrapConfig {
      password: Some("testing".to_owned()),
      ..BootstrapConfig::default()
    };
    let plan = BootstrapPlan::from_config(&config).unwrap();
    let statements = sql(&plan);
    // A second run gets past the drops, then fails creating the role again.
    assert!(statements[0].contains("IF EXISTS"));
    assert!(statements[1].contains("IF EXISTS"));
    assert!(statements[2].starts_with("CREATE USER simplevert"));
    assert!(!statements.iter().skip(2).any(|stmt| stmt.contains("IF NOT EXISTS")));
  }

  #[test]
  fn test_default_plan_enables_hstore_on_each_database() {
    let config = BootstrapConfig {
      password: Some("testing".to_owned()),
      ..BootstrapConfig::default()
    };
    let plan = BootstrapPlan::from_config(&config).unwrap();
    let tail: Vec<Step> = plan.steps.iter().rev().take(4).rev().cloned().collect();
    assert_eq!(tail, vec![
      Step::Connect("simplevert".to_owned()),
      Step::Sql("CREATE EXTENSION hstore;".to_owned()),
      Step::Connect("simplevert_testing".to_owned()),
      Step::Sql("CREATE EXTENSION hstore;".to_owned()),
    ]);
  }

  #[test]
  fn test_guarded_plan() {
    let config = BootstrapConfig {
      password: Some("testing".to_owned()),
      hstore_database: Some("simplevert".to_owned()),
      guards: true,
      ..BootstrapConfig::default()
    };
    let script = BootstrapPlan::from_config(&config).unwrap().to_psql();
    assert!(script.contains("IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = 'simplevert')"));
    assert!(script.contains("CREATE EXTENSION IF NOT EXISTS hstore;"));
    assert_eq!(script.matches("\\c ").count(), 1);
  }

  #[test]
  fn test_password_is_quoted() {
    let script = BootstrapPlan::original("it's").to_psql();
    assert!(script.contains("PASSWORD 'it''s'"));
  }

  #[test]
  fn test_rejects_bad_identifiers_and_missing_password() {
    let config = BootstrapConfig {
      password: Some("testing".to_owned()),
      role: "simplevert; DROP TABLE block".to_owned(),
      ..BootstrapConfig::default()
    };
    assert!(BootstrapPlan::from_config(&config).is_err());
    assert!(BootstrapPlan::from_config(&BootstrapConfig::default()).is_err());
  }

  #[test]
  fn test_guarded_role_survives_dollar_quotes_in_password() {
    let config = BootstrapConfig {
      password: Some("pa$$word".to_owned()),
      guards: true,
      ..BootstrapConfig::default()
    };
    let plan = BootstrapPlan::from_config(&config).unwrap();
    let role = sql(&plan)[2];
    assert!(role.starts_with("DO $bootstrap$ BEGIN"), "{}", role);
    assert!(role.ends_with("END $bootstrap$;"), "{}", role);
    assert!(role.contains("PASSWORD 'pa$$word'"));

    let config = BootstrapConfig {
      password: Some("x$bootstrap$y".to_owned()),
      guards: true,
      ..BootstrapConfig::default()
    };
    assert!(BootstrapPlan::from_config(&config).is_err());
  }

  #[test]
  fn test_identifier_pattern() {
    let pattern = identifier_pattern().unwrap();
    assert!(check_identifier(&pattern, "simplevert_testing").is_ok());
    assert!(check_identifier(&pattern, "Simplevert").is_err());
    assert!(check_identifier(&pattern, "1simplevert").is_err());
  }

  #[test]
  fn test_database_url() {
    assert_eq!(
      database_url("postgres://postgres:pw@db.local:5433/postgres", "simplevert").unwrap(),
      "postgres://postgres:pw@db.local:5433/simplevert"
    );
  }
}
