use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};

use crate::config::CoinServ;
use crate::error::{PoolError, Result};

/// JSON-RPC client for a bitcoind style coin daemon.
pub struct DaemonClient {
  url: String,
  username: String,
  password: String,
  client: Client,
}

impl DaemonClient {
  pub fn new(coinserv: &CoinServ) -> Result<DaemonClient> {
    let client = Client::builder()
      .timeout(Duration::from_secs(10))
      .build()?;
    Ok(DaemonClient {
      url: coinserv.url(),
      username: coinserv.username.to_owned(),
      password: coinserv.password.to_owned(),
      client,
    })
  }

  pub fn get_block_count(&self) -> Result<i64> {
    let result = self.call_daemon("getblockcount", json!([]))?;
    result.as_i64().ok_or_else(|| unexpected("getblockcount", &result))
  }

  pub fn get_difficulty(&self) -> Result<f64> {
    let result = self.call_daemon("getdifficulty", json!([]))?;
    // Merge mined daemons report a per-algorithm object
    let difficulty = match result.get("proof-of-work") {
      Some(pow) => pow.as_f64(),
      None => result.as_f64(),
    };
    difficulty.ok_or_else(|| unexpected("getdifficulty", &result))
  }

  fn call_daemon(&self, method: &str, params: Value) -> Result<Value> {
    let request = json!({
      "jsonrpc": "1.0",
      "id": "simplevert",
      "method": method,
      "params": params,
    });
    let response: Value = self.client.post(&self.url)
      .basic_auth(&self.username, Some(&self.password))
      .json(&request)
      .send()?
      .json()?;
    parse_response(method, response)
  }
}

fn unexpected(method: &str, result: &Value) -> PoolError {
  PoolError::Rpc {
    method: method.to_owned(),
    message: format!("unexpected result {}", result),
  }
}

fn parse_response(method: &str, mut response: Value) -> Result<Value> {
  match response.get("error") {
    None | Some(Value::Null) => {}
    Some(error) => {
      let message = error.get("message")
        .and_then(|message| message.as_str())
        .map(|message| message.to_owned())
        .unwrap_or_else(|| error.to_string());
      return Err(PoolError::Rpc { method: method.to_owned(), message });
    }
  }
  match response.get_mut("result") {
    Some(result) => Ok(result.take()),
    None => Err(PoolError::Rpc {
      method: method.to_owned(),
      message: "response has no result".to_owned(),
    }),
  }
}
