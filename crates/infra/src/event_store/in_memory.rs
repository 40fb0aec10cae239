use std::collections::HashMap;
use std::sync::RwLock;

use autoshop_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Default)]
struct Log {
    /// Every committed event, in commit order.
    events: Vec<StoredEvent>,
    /// Positions in `events` for each stream.
    streams: HashMap<AggregateId, Vec<usize>>,
    /// Stream ids in creation order.
    created: Vec<AggregateId>,
}

/// In-memory append-only event store.
///
/// Backs tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::Unavailable("event log lock poisoned".to_string())
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        // All events must target the same aggregate stream.
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let mut log = self.log.write().map_err(|_| Self::poisoned())?;
        let Log {
            events: all,
            streams,
            created,
        } = &mut *log;

        let positions = streams.get(&aggregate_id);
        let current = positions
            .and_then(|p| p.last())
            .map(|&i| all[i].sequence_number)
            .unwrap_or(0);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version}, found {current}"
            )));
        }

        if let Some(&first) = positions.and_then(|p| p.first()) {
            if all[first].aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    all[first].aggregate_type, aggregate_type
                )));
            }
        }

        if current == 0 {
            created.push(aggregate_id);
        }
        let stream = streams.entry(aggregate_id).or_default();

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(all.len());
            all.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| Self::poisoned())?;
        Ok(log
            .streams
            .get(&aggregate_id)
            .map(|positions| positions.iter().map(|&i| log.events[i].clone()).collect())
            .unwrap_or_default())
    }

    fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError> {
        let log = self.log.read().map_err(|_| Self::poisoned())?;
        Ok(log
            .created
            .iter()
            .filter(|id| {
                log.streams
                    .get(id)
                    .and_then(|p| p.first())
                    .is_some_and(|&i| log.events[i].aggregate_type == aggregate_type)
            })
            .copied()
            .collect())
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| Self::poisoned())?;
        Ok(log.events.clone())
    }
}
