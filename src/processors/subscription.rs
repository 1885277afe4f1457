use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::raft::processor::{ProcessorError, StateProcessor, StateProcessorFactory};

pub const SUBSCRIPTION_CATEGORY: &str = "subscription";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SubscriptionRequest {
    Subscribe {
        client_id: String,
        topic_filter: String,
    },
    Unsubscribe {
        client_id: String,
        topic_filter: String,
    },
    List {
        client_id: String,
    },
}

/// Replicated subscription records: client id -> topic filters.
///
/// Clients are sharded across groups by the RPC layer; each shard holds a
/// disjoint slice of the client population.
#[derive(Debug, Default)]
pub struct SubscriptionStateProcessor {
    subscriptions: BTreeMap<String, BTreeSet<String>>,
}

fn decode(request: &[u8]) -> Result<SubscriptionRequest, ProcessorError> {
    serde_json::from_slice(request).map_err(|e| ProcessorError::BadRequest {
        message: format!("decode subscription request: {e}"),
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProcessorError> {
    serde_json::to_vec(value).map_err(|e| ProcessorError::BadRequest {
        message: format!("encode response: {e}"),
    })
}

impl SubscriptionStateProcessor {
    fn list(&self, client_id: &str) -> Result<Vec<u8>, ProcessorError> {
        let filters: Vec<&String> = self
            .subscriptions
            .get(client_id)
            .map(|s| s.iter().collect())
            .unwrap_or_default();
        encode(&serde_json::json!({ "topic_filters": filters }))
    }
}

impl StateProcessor for SubscriptionStateProcessor {
    fn group_category(&self) -> &str {
        SUBSCRIPTION_CATEGORY
    }

    fn apply(&mut self, request: &[u8]) -> Result<Vec<u8>, ProcessorError> {
        match decode(request)? {
            SubscriptionRequest::Subscribe {
                client_id,
                topic_filter,
            } => {
                if topic_filter.is_empty() {
                    return Err(ProcessorError::BadRequest {
                        message: "empty topic filter".to_string(),
                    });
                }
                let added = self
                    .subscriptions
                    .entry(client_id)
                    .or_default()
                    .insert(topic_filter);
                encode(&serde_json::json!({ "added": added }))
            }
            SubscriptionRequest::Unsubscribe {
                client_id,
                topic_filter,
            } => {
                let removed = match self.subscriptions.get_mut(&client_id) {
                    Some(filters) => {
                        let removed = filters.remove(&topic_filter);
                        if filters.is_empty() {
                            self.subscriptions.remove(&client_id);
                        }
                        removed
                    }
                    None => false,
                };
                encode(&serde_json::json!({ "removed": removed }))
            }
            SubscriptionRequest::List { client_id } => self.list(&client_id),
        }
    }

    fn read(&self, request: &[u8]) -> Result<Vec<u8>, ProcessorError> {
        match decode(request)? {
            SubscriptionRequest::List { client_id } => self.list(&client_id),
            _ => Err(ProcessorError::BadRequest {
                message: "subscribe/unsubscribe must go through the write path".to_string(),
            }),
        }
    }

    fn save_snapshot(&self) -> Result<Vec<u8>, ProcessorError> {
        serde_json::to_vec(&self.subscriptions).map_err(|e| ProcessorError::BadSnapshot {
            message: e.to_string(),
        })
    }

    fn restore_snapshot(&mut self, snapshot: &[u8]) -> Result<(), ProcessorError> {
        self.subscriptions =
            serde_json::from_slice(snapshot).map_err(|e| ProcessorError::BadSnapshot {
                message: e.to_string(),
            })?;
        Ok(())
    }
}

pub struct SubscriptionStateProcessorFactory;

impl StateProcessorFactory for SubscriptionStateProcessorFactory {
    fn group_category(&self) -> &str {
        SUBSCRIPTION_CATEGORY
    }

    fn build(&self) -> Box<dyn StateProcessor> {
        Box::new(SubscriptionStateProcessor::default())
    }
}
