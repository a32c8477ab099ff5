//! Bounded call history.

use serde::Serialize;
use shared_types::Timestamp;
use std::collections::VecDeque;
use uuid::Uuid;

/// One attempt within a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt: u32,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    /// Delay slept before the next attempt, if one followed.
    pub backoff_ms: Option<u64>,
}

/// A finished API call.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub call_id: Uuid,
    pub api: String,
    pub started_at: Timestamp,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    pub is_async: bool,
}

/// Ring buffer of the most recent calls.
#[derive(Debug)]
pub struct CallHistory {
    capacity: usize,
    records: VecDeque<CallRecord>,
}

impl CallHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: VecDeque::new(),
        }
    }

    pub fn push(&mut self, record: CallRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// The newest `limit` records, optionally for one API, oldest first.
    pub fn query(&self, limit: Option<usize>, api: Option<&str>) -> Vec<CallRecord> {
        let mut matched: Vec<CallRecord> = self
            .records
            .iter()
            .filter(|r| api.map_or(true, |a| r.api == a))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::now;

    fn record(api: &str, success: bool) -> CallRecord {
        CallRecord {
            call_id: Uuid::new_v4(),
            api: api.to_string(),
            started_at: now(),
            duration_ms: 1,
            success,
            error: None,
            attempts: Vec::new(),
            is_async: false,
        }
    }

    #[test]
    fn test_bounded() {
        let mut history = CallHistory::new(3);
        for i in 0..5 {
            history.push(record(&format!("A.op{i}"), true));
        }
        assert_eq!(history.len(), 3);
        let apis: Vec<String> = history.query(None, None).into_iter().map(|r| r.api).collect();
        assert_eq!(apis, vec!["A.op2", "A.op3", "A.op4"]);
    }

    #[test]
    fn test_query_by_api_and_limit() {
        let mut history = CallHistory::new(10);
        history.push(record("A.x", true));
        history.push(record("B.y", false));
        history.push(record("A.x", false));
        assert_eq!(history.query(None, Some("A.x")).len(), 2);
        let last = history.query(Some(1), Some("A.x"));
        assert_eq!(last.len(), 1);
        assert!(!last[0].success);
    }
}
