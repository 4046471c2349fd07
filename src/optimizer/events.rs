//! Change tracking for optimization passes.
//!
//! Passes record what they did into an [`EventLog`]; the driver collects
//! the per-method logs for diagnostics and statistics.

/// The kind of change a pass performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum EventKind {
    /// A heap load was replaced by a known value.
    LoadEliminated,
    /// A heap store was proven unobservable and removed.
    StoreEliminated,
    /// A non-escaping allocation was removed.
    AllocationEliminated,
    /// A merge (phi) instruction was materialized.
    MergeCreated,
}

/// A single recorded change.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    message: Option<String>,
}

impl Event {
    /// The kind of change.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// The optional human-readable detail.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// An append-only log of pass events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns the number of events of the given kind.
    #[must_use]
    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    /// Iterates over the recorded events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Appends all events from `other`.
    pub fn merge(&mut self, other: EventLog) {
        self.events.extend(other.events);
    }

    /// Records an event, returning a handle for attaching detail.
    pub fn record(&mut self, kind: EventKind) -> EventRecord<'_> {
        self.events.push(Event {
            kind,
            message: None,
        });
        EventRecord {
            event: self.events.last_mut().expect("just pushed"),
        }
    }
}

/// Fluent handle returned by [`EventLog::record`].
pub struct EventRecord<'a> {
    event: &'a mut Event,
}

impl EventRecord<'_> {
    /// Attaches a human-readable message.
    pub fn message(self, text: impl Into<String>) -> Self {
        self.event.message = Some(text.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let mut log = EventLog::new();
        assert!(log.is_empty());

        log.record(EventKind::LoadEliminated)
            .message("load i4 -> constant 1");
        log.record(EventKind::LoadEliminated);
        log.record(EventKind::StoreEliminated);

        assert_eq!(log.len(), 3);
        assert_eq!(log.count_of(EventKind::LoadEliminated), 2);
        assert_eq!(log.count_of(EventKind::AllocationEliminated), 0);
        assert_eq!(
            log.iter().next().and_then(Event::message),
            Some("load i4 -> constant 1")
        );
    }

    #[test]
    fn test_merge_logs() {
        let mut a = EventLog::new();
        let mut b = EventLog::new();
        a.record(EventKind::MergeCreated);
        b.record(EventKind::StoreEliminated);
        a.merge(b);
        assert_eq!(a.len(), 2);
    }
}
