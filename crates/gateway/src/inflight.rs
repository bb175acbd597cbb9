//! Request coalescing: one upstream call per identical in-flight request.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;

use switchyard_core::types::{InferenceRequest, InferenceResponse};

type Flights = Arc<DashMap<String, watch::Receiver<Option<InferenceResponse>>>>;

/// Role of a caller for one coalescing key.
pub enum Flight {
    /// First caller; runs the pipeline and publishes the result.
    Leader(FlightLeader),
    /// Later caller; waits for the leader.
    Follower(FlightFollower),
}

/// Held by the caller doing the upstream work. Dropping it without calling
/// [`FlightLeader::complete`] tells followers to run on their own.
pub struct FlightLeader {
    key: String,
    tx: watch::Sender<Option<InferenceResponse>>,
    flights: Flights,
}

impl FlightLeader {
    /// Publish the leader's response to every follower.
    pub fn complete(self, response: &InferenceResponse) {
        self.tx.send_replace(Some(response.clone()));
    }
}

impl Drop for FlightLeader {
    fn drop(&mut self) {
        self.flights.remove(&self.key);
    }
}

pub struct FlightFollower {
    rx: watch::Receiver<Option<InferenceResponse>>,
}

impl FlightFollower {
    /// The leader's response, or `None` if the leader failed or went away.
    pub async fn wait(mut self) -> Option<InferenceResponse> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(response) => response.clone(),
            Err(_) => None,
        }
    }
}

/// Tracks in-flight requests by coalescing key.
#[derive(Default)]
pub struct InflightRequests {
    flights: Flights,
}

impl InflightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `request`, becoming its leader if there is none.
    pub fn join(&self, request: &InferenceRequest) -> Flight {
        let key = coalescing_key(request);
        match self.flights.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(request_id = %request.request_id, "Coalescing with in-flight request");
                Flight::Follower(FlightFollower {
                    rx: entry.get().clone(),
                })
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                Flight::Leader(FlightLeader {
                    key,
                    tx,
                    flights: self.flights.clone(),
                })
            }
        }
    }

    /// Number of distinct in-flight keys.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

/// Prompt hash plus sorted required capabilities.
fn coalescing_key(request: &InferenceRequest) -> String {
    let mut capabilities: Vec<String> = request
        .requirements
        .capabilities
        .iter()
        .map(|c| format!("{:?}", c))
        .collect();
    capabilities.sort();
    capabilities.dedup();
    format!("{}|{}", request.cache_key(), capabilities.join(","))
}
