use serde::{Deserialize, Serialize};

use crate::raft::processor::{ProcessorError, StateProcessor, StateProcessorFactory};

pub const COUNTER_CATEGORY: &str = "counter";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum CounterRequest {
    Increment { delta: i64 },
    Get,
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterResponse {
    value: i64,
}

/// Replicated signed counter, one independent value per shard.
#[derive(Debug, Default)]
pub struct CounterStateProcessor {
    value: i64,
}

impl CounterStateProcessor {
    fn respond(&self) -> Result<Vec<u8>, ProcessorError> {
        serde_json::to_vec(&CounterResponse { value: self.value }).map_err(|e| {
            ProcessorError::BadRequest {
                message: format!("encode response: {e}"),
            }
        })
    }
}

fn decode(request: &[u8]) -> Result<CounterRequest, ProcessorError> {
    serde_json::from_slice(request).map_err(|e| ProcessorError::BadRequest {
        message: format!("decode counter request: {e}"),
    })
}

impl StateProcessor for CounterStateProcessor {
    fn group_category(&self) -> &str {
        COUNTER_CATEGORY
    }

    fn apply(&mut self, request: &[u8]) -> Result<Vec<u8>, ProcessorError> {
        match decode(request)? {
            CounterRequest::Increment { delta } => {
                self.value = self.value.checked_add(delta).ok_or_else(|| {
                    ProcessorError::BadRequest {
                        message: format!("counter overflow at {} + {delta}", self.value),
                    }
                })?;
                self.respond()
            }
            CounterRequest::Get => self.respond(),
        }
    }

    fn read(&self, request: &[u8]) -> Result<Vec<u8>, ProcessorError> {
        match decode(request)? {
            CounterRequest::Get => self.respond(),
            CounterRequest::Increment { .. } => Err(ProcessorError::BadRequest {
                message: "increment must go through the write path".to_string(),
            }),
        }
    }

    fn save_snapshot(&self) -> Result<Vec<u8>, ProcessorError> {
        serde_json::to_vec(&self.value).map_err(|e| ProcessorError::BadSnapshot {
            message: e.to_string(),
        })
    }

    fn restore_snapshot(&mut self, snapshot: &[u8]) -> Result<(), ProcessorError> {
        self.value = serde_json::from_slice(snapshot).map_err(|e| ProcessorError::BadSnapshot {
            message: e.to_string(),
        })?;
        Ok(())
    }
}

pub struct CounterStateProcessorFactory;

impl StateProcessorFactory for CounterStateProcessorFactory {
    fn group_category(&self) -> &str {
        COUNTER_CATEGORY
    }

    fn build(&self) -> Box<dyn StateProcessor> {
        Box::new(CounterStateProcessor::default())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn increment(delta: i64) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({"op": "increment", "delta": delta})).unwrap()
    }

    fn value_of(payload: &[u8]) -> i64 {
        let resp: serde_json::Value = serde_json::from_slice(payload).unwrap();
        resp["value"].as_i64().unwrap()
    }

    #[test]
    fn increments_accumulate() {
        let mut p = CounterStateProcessor::default();
        assert_eq!(value_of(&p.apply(&increment(2)).unwrap()), 2);
        assert_eq!(value_of(&p.apply(&increment(-5)).unwrap()), -3);
    }

    #[test]
    fn malformed_request_is_rejected_without_mutation() {
        let mut p = CounterStateProcessor::default();
        p.apply(&increment(1)).unwrap();
        let err = p.apply(b"{\"op\":\"detonate\"}").unwrap_err();
        assert!(matches!(err, ProcessorError::BadRequest { .. }));
        let get = serde_json::to_vec(&serde_json::json!({"op": "get"})).unwrap();
        assert_eq!(value_of(&p.read(&get).unwrap()), 1);
    }

    #[test]
    fn overflow_is_a_request_error() {
        let mut p = CounterStateProcessor::default();
        p.apply(&increment(i64::MAX)).unwrap();
        assert!(p.apply(&increment(1)).is_err());
        assert_eq!(value_of(&p.apply(&increment(0)).unwrap()), i64::MAX);
    }

    #[test]
    fn read_rejects_writes() {
        let p = CounterStateProcessor::default();
        assert!(p.read(&increment(1)).is_err());
    }

    #[test]
    fn identical_sequences_produce_identical_snapshots() {
        let sequence: Vec<Vec<u8>> = vec![increment(3), increment(-1), increment(40)];

        let mut a = CounterStateProcessor::default();
        let mut b = CounterStateProcessor::default();
        for req in &sequence {
            a.apply(req).unwrap();
            b.apply(req).unwrap();
        }

        assert_eq!(a.save_snapshot().unwrap(), b.save_snapshot().unwrap());
    }

    #[test]
    fn snapshot_round_trip() {
        let mut p = CounterStateProcessor::default();
        p.apply(&increment(17)).unwrap();
        let blob = p.save_snapshot().unwrap();

        let mut restored = CounterStateProcessor::default();
        restored.restore_snapshot(&blob).unwrap();
        assert_eq!(restored.value, 17);

        assert!(
            restored.restore_snapshot(b"not json").is_err(),
            "corrupt snapshot must be rejected"
        );
    }
}
