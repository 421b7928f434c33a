//! Bid-priced compute capacity: request, wait for fulfillment, tear down.
//!
//! The controller borrows a [`ComputeProvider`] for the length of one build
//! run. It keeps no process-wide state; the fleet it returns is owned by the
//! caller.

use crate::LdaError;
use crate::cancel::CancelToken;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
}

/// One bid for `count` identical instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityRequest {
    pub bid_price: String,
    pub count: usize,
    #[serde(flatten)]
    pub instance: InstanceSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Open,
    PriceTooLow,
    Fulfilled,
    #[serde(alias = "cancelled")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestState {
    pub id: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub instance_id: Option<String>,
}

pub trait ComputeProvider: Send + Sync {
    /// Submit a bid; returns one request id per instance.
    fn request_capacity(&self, request: &CapacityRequest) -> Result<Vec<String>, LdaError>;
    fn poll_requests(&self, request_ids: &[String]) -> Result<Vec<RequestState>, LdaError>;
    fn terminate(&self, instance_ids: &[String]) -> Result<(), LdaError>;
}

/// How often to poll and for how long. The default polls every 15 seconds
/// forever.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Multiplier applied to the interval after each poll; 1.0 keeps it fixed.
    pub backoff: f64,
    pub max_interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            backoff: 1.0,
            max_interval: Duration::from_secs(15),
            deadline: None,
        }
    }
}

impl PollPolicy {
    fn next_interval(&self, current: Duration) -> Duration {
        if self.backoff <= 1.0 {
            return current;
        }
        current.mul_f64(self.backoff).min(self.max_interval.max(self.interval))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFleet {
    instance_ids: Vec<String>,
}

impl NodeFleet {
    pub fn new(instance_ids: Vec<String>) -> Self {
        Self { instance_ids }
    }

    pub fn instance_ids(&self) -> &[String] {
        &self.instance_ids
    }

    pub fn len(&self) -> usize {
        self.instance_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_ids.is_empty()
    }
}

pub struct FleetController<'p> {
    provider: &'p dyn ComputeProvider,
    policy: PollPolicy,
}

impl<'p> FleetController<'p> {
    pub fn new(provider: &'p dyn ComputeProvider, policy: PollPolicy) -> Self {
        Self { provider, policy }
    }

    /// Bid for `count` instances and block until every request is fulfilled.
    ///
    /// Any `price-too-low` request fails the whole batch with
    /// [`LdaError::BidTooLow`]. Partially fulfilled batches keep polling.
    /// Once the bid is submitted, every failure (interrupts included) comes
    /// back wrapped in [`LdaError::Abandoned`] with the request ids, which
    /// are also logged.
    pub fn launch(
        &self,
        count: usize,
        bid_price: &str,
        instance: &InstanceSpec,
        cancel: &CancelToken,
    ) -> Result<NodeFleet, LdaError> {
        if count == 0 {
            return Ok(NodeFleet::default());
        }

        let request = CapacityRequest {
            bid_price: bid_price.to_string(),
            count,
            instance: instance.clone(),
        };
        let request_ids = self.provider.request_capacity(&request)?;
        log::info!(
            "fleet: requested {count} x {} at {bid_price} ({} requests)",
            instance.instance_type,
            request_ids.len()
        );

        let waited = if request_ids.len() == count {
            self.await_fulfillment(count, bid_price, &request_ids, cancel)
        } else {
            Err(LdaError::Fleet(format!(
                "provider returned {} request ids for {count} instances",
                request_ids.len()
            )))
        };
        waited.map_err(|cause| {
            log::warn!(
                "fleet: abandoning {} capacity requests, they may still be open: {}",
                request_ids.len(),
                request_ids.join(" ")
            );
            LdaError::Abandoned {
                request_ids,
                cause: Box::new(cause),
            }
        })
    }

    fn await_fulfillment(
        &self,
        count: usize,
        bid_price: &str,
        request_ids: &[String],
        cancel: &CancelToken,
    ) -> Result<NodeFleet, LdaError> {
        let started = Instant::now();
        let mut interval = self.policy.interval;
        loop {
            cancel.sleep(interval)?;

            let states = self.provider.poll_requests(request_ids)?;
            if states.iter().any(|s| s.status == RequestStatus::PriceTooLow) {
                log::error!("fleet: bid {bid_price} rejected as too low");
                return Err(LdaError::BidTooLow);
            }
            if let Some(closed) = states.iter().find(|s| s.status == RequestStatus::Closed) {
                return Err(LdaError::Fleet(format!(
                    "request {} was closed before fulfillment",
                    closed.id
                )));
            }

            let fulfilled: Vec<&RequestState> = states
                .iter()
                .filter(|s| s.status == RequestStatus::Fulfilled)
                .collect();
            if fulfilled.len() == count {
                let instance_ids: Vec<String> = fulfilled
                    .iter()
                    .filter_map(|s| s.instance_id.clone())
                    .collect();
                log::info!(
                    "fleet: {} instances active after {}s",
                    instance_ids.len(),
                    started.elapsed().as_secs()
                );
                return Ok(NodeFleet::new(instance_ids));
            }
            log::debug!("fleet: {}/{count} requests fulfilled", fulfilled.len());

            if let Some(deadline) = self.policy.deadline
                && started.elapsed() >= deadline
            {
                return Err(LdaError::Fleet(format!(
                    "{}/{count} requests fulfilled after {}s deadline",
                    fulfilled.len(),
                    deadline.as_secs()
                )));
            }
            interval = self.policy.next_interval(interval);
        }
    }

    /// Tear down every tracked instance and clear the fleet. An empty fleet
    /// makes no provider call.
    pub fn terminate(&self, fleet: &mut NodeFleet) -> Result<(), LdaError> {
        if fleet.is_empty() {
            return Ok(());
        }
        self.provider.terminate(&fleet.instance_ids)?;
        log::info!("fleet: terminated {} instances", fleet.len());
        fleet.instance_ids.clear();
        Ok(())
    }
}

/// JSON-over-HTTP adapter for a spot capacity API.
pub struct HttpComputeProvider {
    endpoint: String,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct RequestIds {
    request_ids: Vec<String>,
}

impl HttpComputeProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::config::Config::builder()
                .timeout_global(Some(timeout))
                .build(),
        );
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            agent,
        }
    }
}

impl ComputeProvider for HttpComputeProvider {
    fn request_capacity(&self, request: &CapacityRequest) -> Result<Vec<String>, LdaError> {
        let ids: RequestIds = self
            .agent
            .post(&format!("{}/spot-requests", self.endpoint))
            .send_json(request)?
            .body_mut()
            .read_json()?;
        Ok(ids.request_ids)
    }

    fn poll_requests(&self, request_ids: &[String]) -> Result<Vec<RequestState>, LdaError> {
        let states: Vec<RequestState> = self
            .agent
            .get(&format!("{}/spot-requests", self.endpoint))
            .query("ids", request_ids.join(","))
            .call()?
            .body_mut()
            .read_json()?;
        Ok(states)
    }

    fn terminate(&self, instance_ids: &[String]) -> Result<(), LdaError> {
        self.agent
            .post(&format!("{}/instances/terminate", self.endpoint))
            .send_json(serde_json::json!({ "instance_ids": instance_ids }))?;
        Ok(())
    }
}
