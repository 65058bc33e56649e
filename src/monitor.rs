use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::MonitorAddr;
use crate::error::Result;

/// The part of a stratum server's monitor page we use.
#[derive(Deserialize, Debug, PartialEq)]
pub struct MonitorStatus {
  #[serde(alias = "client_count")]
  pub stratum_clients: u64,
}

/// Polls the monitor endpoint of every stratum server the pool runs.
pub struct MonitorClient {
  endpoints: Vec<MonitorAddr>,
  client: Client,
}

impl MonitorClient {
  pub fn new(endpoints: &[MonitorAddr]) -> Result<MonitorClient> {
    let client = Client::builder()
      .timeout(Duration::from_secs(5))
      .build()?;
    Ok(MonitorClient {
      endpoints: endpoints.to_vec(),
      client,
    })
  }

  pub fn status(&self, endpoint: &MonitorAddr) -> Result<MonitorStatus> {
    Ok(self.client.get(&endpoint.mon_address).send()?.error_for_status()?.json()?)
  }

  /// Connected workers summed over all servers. Servers that can't be reached
  /// count as having none.
  pub fn worker_count(&self) -> u64 {
    let statuses: Vec<Option<MonitorStatus>> = self.endpoints.iter().map(|endpoint| {
      match self.status(endpoint) {
        Ok(status) => Some(status),
        Err(err) => {
          warn!("Monitor for {} unreachable at {}: {}", endpoint.stratum, endpoint.mon_address, err);
          None
        }
      }
    }).collect();
    total_clients(&statuses)
  }
}

pub fn total_clients(statuses: &[Option<MonitorStatus>]) -> u64 {
  statuses.iter()
    .map(|status| status.as_ref().map(|status| status.stratum_clients).unwrap_or(0))
    .sum()
}
