//! Track events: slice begin/end, instants and counter samples.
//!
//! Events are plain values that reference their track by uuid. Nothing here
//! checks that begin/end pairs match or that timestamps move forward; events
//! are encoded exactly as given.

use perfetto_protos::track_event::track_event::Type;

use crate::track::{Counter, Track};

/// A key/value debug annotation. Values are always strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub key: String,
    pub value: String,
}

impl Annotation {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl From<(&str, &str)> for Annotation {
    fn from((key, value): (&str, &str)) -> Self {
        Annotation::new(key, value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventData {
    SliceBegin {
        name: String,
        annotations: Vec<Annotation>,
    },
    SliceEnd,
    Instant {
        name: String,
        annotations: Vec<Annotation>,
    },
    CounterSample {
        name: String,
        value: i64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub timestamp: u64,
    pub track_uuid: u64,
    pub data: EventData,
    /// Correlation ids linking this event to events on other tracks.
    pub flow_ids: Vec<u64>,
}

impl Event {
    fn new(track: &Track, timestamp: u64, data: EventData) -> Self {
        Self {
            timestamp,
            track_uuid: track.uuid(),
            data,
            flow_ids: Vec::new(),
        }
    }

    pub fn instant(track: &Track, timestamp: u64, name: &str) -> Self {
        Self::new(
            track,
            timestamp,
            EventData::Instant {
                name: name.to_string(),
                annotations: Vec::new(),
            },
        )
    }

    pub fn start_slice(
        track: &Track,
        timestamp: u64,
        name: &str,
        annotations: &[Annotation],
    ) -> Self {
        Self::new(
            track,
            timestamp,
            EventData::SliceBegin {
                name: name.to_string(),
                annotations: annotations.to_vec(),
            },
        )
    }

    pub fn start_slice_with_flow(
        track: &Track,
        timestamp: u64,
        name: &str,
        flow_ids: &[u64],
        annotations: &[Annotation],
    ) -> Self {
        let mut event = Self::start_slice(track, timestamp, name, annotations);
        event.flow_ids = flow_ids.to_vec();
        event
    }

    pub fn end_slice(track: &Track, timestamp: u64) -> Self {
        Self::new(track, timestamp, EventData::SliceEnd)
    }

    pub fn end_slice_with_flow(track: &Track, timestamp: u64, flow_ids: &[u64]) -> Self {
        let mut event = Self::end_slice(track, timestamp);
        event.flow_ids = flow_ids.to_vec();
        event
    }

    /// A counter sample carries the counter's name as its event name.
    pub fn counter_sample(counter: &Counter, timestamp: u64, value: i64) -> Self {
        Self {
            timestamp,
            track_uuid: counter.uuid(),
            data: EventData::CounterSample {
                name: counter.name.clone(),
                value,
            },
            flow_ids: Vec::new(),
        }
    }

    /// Append annotations to a slice begin or instant. Other kinds carry no
    /// annotations and are returned unchanged.
    pub fn with_annotations(mut self, extra: &[Annotation]) -> Self {
        match &mut self.data {
            EventData::SliceBegin { annotations, .. } | EventData::Instant { annotations, .. } => {
                annotations.extend_from_slice(extra);
            }
            EventData::SliceEnd | EventData::CounterSample { .. } => {}
        }
        self
    }

    pub fn event_type(&self) -> Type {
        match self.data {
            EventData::SliceBegin { .. } => Type::TYPE_SLICE_BEGIN,
            EventData::SliceEnd => Type::TYPE_SLICE_END,
            EventData::Instant { .. } => Type::TYPE_INSTANT,
            EventData::CounterSample { .. } => Type::TYPE_COUNTER,
        }
    }

    /// The event name, `None` for slice ends.
    pub fn name(&self) -> Option<&str> {
        match &self.data {
            EventData::SliceBegin { name, .. }
            | EventData::Instant { name, .. }
            | EventData::CounterSample { name, .. } => Some(name),
            EventData::SliceEnd => None,
        }
    }

    pub fn value(&self) -> Option<i64> {
        match self.data {
            EventData::CounterSample { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn annotations(&self) -> &[Annotation] {
        match &self.data {
            EventData::SliceBegin { annotations, .. } | EventData::Instant { annotations, .. } => {
                annotations
            }
            EventData::SliceEnd | EventData::CounterSample { .. } => &[],
        }
    }
}
