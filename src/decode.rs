//! Decoding rendered traces back into tracks and events.
//!
//! [`TraceDecoder`] keeps per-sequence interning dictionaries and a
//! timestamp baseline, so every event comes back with its absolute timestamp
//! and literal strings.
//!
//! The baseline follows this crate's encoding model: clock-64 deltas add to
//! it and an absolute timestamp re-seeds it. A Perfetto trace processor only
//! accumulates an incremental clock across packets on that clock, so it does
//! not re-seed on absolute packets.

use std::collections::HashMap;

use perfetto_protos::counter_descriptor::counter_descriptor::Unit;
use perfetto_protos::debug_annotation::DebugAnnotation;
use perfetto_protos::trace_packet::trace_packet::SequenceFlags;
use perfetto_protos::trace_packet::TracePacket;
use perfetto_protos::track_descriptor::TrackDescriptor;
use perfetto_protos::track_event::track_event::Type;
use perfetto_protos::track_event::TrackEvent;
use tracing::trace;

use crate::error::{Result, TraceError};
use crate::event::{Annotation, Event, EventData};
use crate::intern::Namespace;
use crate::perfetto::INCREMENTAL_CLOCK_ID;
use crate::reader::TracePacketIterator;
use crate::track::{Counter, GenericTrack, Process, Thread, Track};

/// Everything recovered from a trace.
#[derive(Debug, Default)]
pub struct DecodedTrace {
    pub tracks: Vec<Track>,
    pub events: Vec<Event>,
}

impl DecodedTrace {
    pub fn track(&self, uuid: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.uuid() == uuid)
    }
}

#[derive(Default)]
struct SequenceState {
    event_names: HashMap<u64, String>,
    annotation_values: HashMap<u64, String>,
    last_timestamp: u64,
}

impl SequenceState {
    fn clear_interned(&mut self) {
        self.event_names.clear();
        self.annotation_values.clear();
    }

    fn merge_interned(&mut self, packet: &TracePacket) {
        let Some(interned) = packet.interned_data.as_ref() else {
            return;
        };
        for event_name in &interned.event_names {
            self.event_names
                .insert(event_name.iid(), event_name.name().to_string());
        }
        for value in &interned.debug_annotation_string_values {
            self.annotation_values.insert(
                value.iid(),
                String::from_utf8_lossy(value.str()).into_owned(),
            );
        }
    }

    fn resolve(&self, namespace: Namespace, iid: u64) -> Result<String> {
        let dict = match namespace {
            Namespace::EventName => &self.event_names,
            Namespace::AnnotationValue => &self.annotation_values,
        };
        dict.get(&iid)
            .cloned()
            .ok_or(TraceError::UnresolvedIid { namespace, iid })
    }

    fn timestamp(&mut self, packet: &TracePacket) -> Result<u64> {
        if packet.has_timestamp_clock_id() && packet.timestamp_clock_id() == INCREMENTAL_CLOCK_ID {
            let base = self.last_timestamp;
            let delta = packet.timestamp();
            self.last_timestamp = base.checked_add(delta).ok_or_else(|| {
                TraceError::MalformedTrace(format!(
                    "timestamp delta {delta} overflows baseline {base}"
                ))
            })?;
        } else {
            self.last_timestamp = packet.timestamp();
        }
        Ok(self.last_timestamp)
    }
}

/// Incremental decoder for a stream of packets.
#[derive(Default)]
pub struct TraceDecoder {
    sequences: HashMap<u32, SequenceState>,
    decoded: DecodedTrace,
}

impl TraceDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: &TracePacket) -> Result<()> {
        if packet.has_track_descriptor() {
            let track = decode_track(packet.track_descriptor());
            self.decoded.tracks.push(track);
            return Ok(());
        }

        let state = self
            .sequences
            .entry(packet.trusted_packet_sequence_id())
            .or_default();

        if packet.has_clock_snapshot() {
            for clock in &packet.clock_snapshot().clocks {
                if clock.clock_id() == INCREMENTAL_CLOCK_ID {
                    state.last_timestamp = clock.timestamp();
                }
            }
            return Ok(());
        }

        if packet.sequence_flags() & SequenceFlags::SEQ_INCREMENTAL_STATE_CLEARED as u32 != 0 {
            trace!(
                sequence = packet.trusted_packet_sequence_id(),
                "incremental state cleared"
            );
            state.clear_interned();
        }
        state.merge_interned(packet);

        if packet.has_track_event() {
            let timestamp = state.timestamp(packet)?;
            let event = decode_event(state, timestamp, packet.track_event())?;
            self.decoded.events.push(event);
        }
        Ok(())
    }

    pub fn finish(self) -> DecodedTrace {
        self.decoded
    }
}

fn decode_track(desc: &TrackDescriptor) -> Track {
    let uuid = desc.uuid();
    if let Some(process) = desc.process.as_ref() {
        return Process::new(uuid, process.pid(), process.process_name().to_string()).into();
    }
    if let Some(thread) = desc.thread.as_ref() {
        return Thread::new(
            uuid,
            thread.pid(),
            thread.tid(),
            thread.thread_name().to_string(),
        )
        .into();
    }
    if let Some(counter) = desc.counter.as_ref() {
        let unit = if counter.has_unit() {
            match counter.unit() {
                Unit::UNIT_COUNT => "count".to_string(),
                Unit::UNIT_TIME_NS => "ns".to_string(),
                Unit::UNIT_SIZE_BYTES => "bytes".to_string(),
                _ => counter.unit_name().to_string(),
            }
        } else {
            counter.unit_name().to_string()
        };
        return Counter::new(uuid, desc.name().to_string(), unit).into();
    }
    GenericTrack::new(uuid, desc.name().to_string()).into()
}

fn event_name(state: &SequenceState, event: &TrackEvent) -> Result<String> {
    if event.has_name_iid() {
        state.resolve(Namespace::EventName, event.name_iid())
    } else {
        Ok(event.name().to_string())
    }
}

fn annotation(state: &SequenceState, ann: &DebugAnnotation) -> Result<Annotation> {
    let value = if ann.has_string_value_iid() {
        state.resolve(Namespace::AnnotationValue, ann.string_value_iid())?
    } else {
        ann.string_value().to_string()
    };
    Ok(Annotation::new(ann.name(), value))
}

fn decode_event(state: &SequenceState, timestamp: u64, event: &TrackEvent) -> Result<Event> {
    let annotations = || {
        event
            .debug_annotations
            .iter()
            .map(|ann| annotation(state, ann))
            .collect::<Result<Vec<_>>>()
    };

    let data = match event.type_() {
        Type::TYPE_SLICE_BEGIN => EventData::SliceBegin {
            name: event_name(state, event)?,
            annotations: annotations()?,
        },
        Type::TYPE_SLICE_END => EventData::SliceEnd,
        Type::TYPE_INSTANT => EventData::Instant {
            name: event_name(state, event)?,
            annotations: annotations()?,
        },
        Type::TYPE_COUNTER => EventData::CounterSample {
            name: event_name(state, event)?,
            value: event.counter_value(),
        },
        other => {
            return Err(TraceError::MalformedTrace(format!(
                "unsupported track event type {other:?}"
            )))
        }
    };

    Ok(Event {
        timestamp,
        track_uuid: event.track_uuid(),
        data,
        flow_ids: event.flow_ids.clone(),
    })
}

/// Decode a complete packet sequence.
pub fn decode_packets<'a, I>(packets: I) -> Result<DecodedTrace>
where
    I: IntoIterator<Item = &'a TracePacket>,
{
    let mut decoder = TraceDecoder::new();
    for packet in packets {
        decoder.push(packet)?;
    }
    Ok(decoder.finish())
}

/// Decode a serialized `Trace`, as produced by `Trace::render`.
pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedTrace> {
    let mut decoder = TraceDecoder::new();
    for packet in TracePacketIterator::new(bytes) {
        decoder.push(&packet?)?;
    }
    Ok(decoder.finish())
}
