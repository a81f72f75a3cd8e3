//! Turns tracks and events into `TracePacket`s.
//!
//! The assembler owns the encoding state of the writer's packet sequence:
//! the interning table, the delta-timestamp baseline and whether the
//! consumer has been told to start accumulating incremental state yet.

use perfetto_protos::builtin_clock::BuiltinClock;
use perfetto_protos::clock_snapshot::clock_snapshot::Clock;
use perfetto_protos::clock_snapshot::ClockSnapshot;
use perfetto_protos::counter_descriptor::counter_descriptor::Unit;
use perfetto_protos::counter_descriptor::CounterDescriptor;
use perfetto_protos::debug_annotation::DebugAnnotation;
use perfetto_protos::interned_data::InternedData;
use perfetto_protos::process_descriptor::ProcessDescriptor;
use perfetto_protos::profile_common::InternedString;
use perfetto_protos::thread_descriptor::ThreadDescriptor;
use perfetto_protos::trace_packet::trace_packet::SequenceFlags;
use perfetto_protos::trace_packet::TracePacket;
use perfetto_protos::track_descriptor::TrackDescriptor;
use perfetto_protos::track_event::{EventName, TrackEvent};
use tracing::{debug, trace};

use crate::event::{Annotation, Event};
use crate::features::Features;
use crate::intern::{InternTable, Namespace};
use crate::perfetto::INCREMENTAL_CLOCK_ID;
use crate::track::Track;

/// Counter units with a dedicated `CounterDescriptor.Unit` value.
pub(crate) fn counter_unit(unit: &str) -> Option<Unit> {
    match unit {
        "count" => Some(Unit::UNIT_COUNT),
        "ns" => Some(Unit::UNIT_TIME_NS),
        "bytes" => Some(Unit::UNIT_SIZE_BYTES),
        _ => None,
    }
}

/// Build the descriptor packet announcing `track`.
///
/// Descriptors carry no timestamp, sequence id or sequence flags.
pub fn track_descriptor_packet(track: &Track) -> TracePacket {
    let mut desc = TrackDescriptor::default();
    desc.set_uuid(track.uuid());

    match track {
        Track::Process(process) => {
            let mut process_desc = ProcessDescriptor::default();
            process_desc.set_pid(process.pid);
            if !process.name.is_empty() {
                process_desc.set_process_name(process.name.clone());
            }
            desc.process = Some(process_desc).into();
        }
        Track::Thread(thread) => {
            let mut thread_desc = ThreadDescriptor::default();
            thread_desc.set_pid(thread.pid);
            thread_desc.set_tid(thread.tid);
            if !thread.name.is_empty() {
                thread_desc.set_thread_name(thread.name.clone());
            }
            desc.thread = Some(thread_desc).into();
        }
        Track::Counter(counter) => {
            if !counter.name.is_empty() {
                desc.set_name(counter.name.clone());
            }
            let mut counter_desc = CounterDescriptor::default();
            match counter_unit(&counter.unit) {
                Some(unit) => counter_desc.set_unit(unit),
                None if counter.unit.is_empty() => {}
                None => counter_desc.set_unit_name(counter.unit.clone()),
            }
            desc.counter = Some(counter_desc).into();
        }
        Track::Generic(generic) => {
            if !generic.name.is_empty() {
                desc.set_name(generic.name.clone());
            }
        }
    }

    let mut packet = TracePacket::default();
    packet.set_track_descriptor(desc);
    packet
}

/// Build the packet defining the incremental clock for `sequence_id`.
///
/// Anchors [`INCREMENTAL_CLOCK_ID`] and BOOTTIME together at 0, so a delta
/// baseline of 0 decodes to the same value on both clocks.
pub fn clock_definition_packet(sequence_id: u32) -> TracePacket {
    let mut snapshot = ClockSnapshot::default();
    snapshot.set_primary_trace_clock(BuiltinClock::BUILTIN_CLOCK_BOOTTIME);

    let mut clock = Clock::default();
    clock.set_clock_id(INCREMENTAL_CLOCK_ID);
    clock.set_timestamp(0);
    clock.set_is_incremental(true);
    snapshot.clocks.push(clock);

    let mut clock = Clock::default();
    clock.set_clock_id(BuiltinClock::BUILTIN_CLOCK_BOOTTIME as u32);
    clock.set_timestamp(0);
    snapshot.clocks.push(clock);

    let mut packet = TracePacket::default();
    packet.set_clock_snapshot(snapshot);
    packet.set_trusted_packet_sequence_id(sequence_id);
    packet
}

pub struct PacketAssembler {
    features: Features,
    sequence_id: u32,
    interner: InternTable,
    last_timestamp: u64,
    incremental_state_emitted: bool,
}

impl PacketAssembler {
    pub fn new(features: Features, sequence_id: u32) -> Self {
        Self {
            features,
            sequence_id,
            interner: InternTable::new(),
            last_timestamp: 0,
            incremental_state_emitted: false,
        }
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn sequence_id(&self) -> u32 {
        self.sequence_id
    }

    pub fn interner(&self) -> &InternTable {
        &self.interner
    }

    /// Baseline the next delta timestamp is computed against.
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    /// Packets that must precede the event stream when it is rendered.
    pub fn prologue(&self) -> Option<TracePacket> {
        self.features
            .incremental_timestamps
            .then(|| clock_definition_packet(self.sequence_id))
    }

    /// Forget all consumer-visible incremental state: interned strings, the
    /// timestamp baseline and the bootstrap latch. iids are not reused.
    pub fn reset(&mut self) {
        debug!(
            interned = self.interner.len(Namespace::EventName)
                + self.interner.len(Namespace::AnnotationValue),
            "resetting incremental state"
        );
        self.interner.clear();
        self.last_timestamp = 0;
        self.incremental_state_emitted = false;
    }

    pub fn event_packet(&mut self, event: &Event) -> TracePacket {
        let mut interned = InternedData::default();

        let mut track_event = TrackEvent::default();
        track_event.set_type(event.event_type());
        track_event.set_track_uuid(event.track_uuid);

        if let Some(name) = event.name() {
            self.set_event_name(&mut track_event, name, &mut interned);
        }
        if let Some(value) = event.value() {
            track_event.set_counter_value(value);
        }
        for annotation in event.annotations() {
            let ann = self.debug_annotation(annotation, &mut interned);
            track_event.debug_annotations.push(ann);
        }
        track_event.flow_ids = event.flow_ids.clone();

        let mut packet = TracePacket::default();
        self.set_timestamp(&mut packet, event.timestamp);
        packet.set_track_event(track_event);
        packet.set_trusted_packet_sequence_id(self.sequence_id);

        let has_new_interned =
            !interned.event_names.is_empty() || !interned.debug_annotation_string_values.is_empty();
        self.set_sequence_flags(&mut packet, has_new_interned);
        if has_new_interned {
            packet.interned_data = Some(interned).into();
        }

        trace!(
            ts = event.timestamp,
            track_uuid = event.track_uuid,
            interned = has_new_interned,
            "assembled event packet"
        );
        packet
    }

    fn set_event_name(&mut self, track_event: &mut TrackEvent, name: &str, interned: &mut InternedData) {
        if !self.features.interning {
            if !name.is_empty() {
                track_event.set_name(name.to_string());
            }
            return;
        }

        if let Some(id) = self.interner.intern(Namespace::EventName, name) {
            track_event.set_name_iid(id.iid);
            if id.is_new {
                let mut event_name = EventName::default();
                event_name.set_iid(id.iid);
                event_name.set_name(name.to_string());
                interned.event_names.push(event_name);
            }
        }
    }

    fn debug_annotation(&mut self, annotation: &Annotation, interned: &mut InternedData) -> DebugAnnotation {
        let mut ann = DebugAnnotation::default();
        ann.set_name(annotation.key.clone());

        let id = if self.features.interning {
            self.interner
                .intern(Namespace::AnnotationValue, &annotation.value)
        } else {
            None
        };

        match id {
            Some(id) => {
                ann.set_string_value_iid(id.iid);
                if id.is_new {
                    let mut value = InternedString::default();
                    value.set_iid(id.iid);
                    value.set_str(annotation.value.as_bytes().to_vec());
                    interned.debug_annotation_string_values.push(value);
                }
            }
            None => ann.set_string_value(annotation.value.clone()),
        }
        ann
    }

    fn set_timestamp(&mut self, packet: &mut TracePacket, ts: u64) {
        if self.features.incremental_timestamps {
            if ts >= self.last_timestamp {
                packet.set_timestamp(ts - self.last_timestamp);
                packet.set_timestamp_clock_id(INCREMENTAL_CLOCK_ID);
            } else {
                // A negative delta is not representable; fall back to the
                // default clock for this packet and re-seed the baseline.
                // Perfetto's trace processor does not re-seed clock 64 from
                // absolute packets, so deltas after a fallback decode
                // correctly only with `TraceDecoder`.
                debug!(
                    ts,
                    baseline = self.last_timestamp,
                    "timestamp precedes baseline, emitting absolute"
                );
                packet.set_timestamp(ts);
            }
        } else {
            packet.set_timestamp(ts);
        }
        self.last_timestamp = ts;
    }

    fn set_sequence_flags(&mut self, packet: &mut TracePacket, has_new_interned: bool) {
        if !self.incremental_state_emitted {
            if has_new_interned {
                packet.set_previous_packet_dropped(true);
                packet.set_sequence_flags(
                    SequenceFlags::SEQ_INCREMENTAL_STATE_CLEARED as u32
                        | SequenceFlags::SEQ_NEEDS_INCREMENTAL_STATE as u32,
                );
                self.incremental_state_emitted = true;
            }
        } else if self.features.is_incremental() {
            packet.set_sequence_flags(SequenceFlags::SEQ_NEEDS_INCREMENTAL_STATE as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perfetto::TRUSTED_PACKET_SEQUENCE_ID;
    use crate::track::{global_track, TrackRegistry};
    use perfetto_protos::track_event::track_event::Type;
    use rand::rngs::mock::StepRng;

    const CLEARED: u32 = SequenceFlags::SEQ_INCREMENTAL_STATE_CLEARED as u32;
    const NEEDS: u32 = SequenceFlags::SEQ_NEEDS_INCREMENTAL_STATE as u32;

    fn assembler(features: Features) -> PacketAssembler {
        PacketAssembler::new(features, TRUSTED_PACKET_SEQUENCE_ID)
    }

    fn thread() -> Track {
        TrackRegistry::with_rng(Box::new(StepRng::new(7, 1)))
            .thread(1, 2, "T")
            .into()
    }

    #[test]
    fn test_process_descriptor() {
        let mut registry = TrackRegistry::with_rng(Box::new(StepRng::new(5, 1)));
        let packet = track_descriptor_packet(&registry.process(1, "P").into());

        let desc = packet.track_descriptor();
        assert_eq!(desc.uuid(), 5);
        assert_eq!(desc.process.pid(), 1);
        assert_eq!(desc.process.process_name(), "P");
        assert!(!packet.has_timestamp());
        assert!(!packet.has_trusted_packet_sequence_id());
        assert!(!packet.has_sequence_flags());
    }

    #[test]
    fn test_thread_descriptor() {
        let packet = track_descriptor_packet(&thread());
        let desc = packet.track_descriptor();
        assert_eq!(desc.uuid(), 7);
        assert_eq!(desc.thread.pid(), 1);
        assert_eq!(desc.thread.tid(), 2);
        assert_eq!(desc.thread.thread_name(), "T");
    }

    #[test]
    fn test_counter_descriptor_units() {
        let mut registry = TrackRegistry::with_rng(Box::new(StepRng::new(1, 1)));

        let packet = track_descriptor_packet(&registry.counter("cpu load", "%").into());
        let desc = packet.track_descriptor();
        assert_eq!(desc.name(), "cpu load");
        assert_eq!(desc.counter.unit_name(), "%");
        assert!(!desc.counter.has_unit());

        let packet = track_descriptor_packet(&registry.counter("rss", "bytes").into());
        let desc = packet.track_descriptor();
        assert_eq!(desc.counter.unit(), Unit::UNIT_SIZE_BYTES);
        assert!(!desc.counter.has_unit_name());

        let packet = track_descriptor_packet(&registry.counter("plain", "").into());
        let desc = packet.track_descriptor();
        assert!(desc.counter.is_some());
        assert!(!desc.counter.has_unit());
        assert!(!desc.counter.has_unit_name());
    }

    #[test]
    fn test_generic_descriptor_empty_name() {
        let mut registry = TrackRegistry::with_rng(Box::new(StepRng::new(1, 1)));
        let packet = track_descriptor_packet(&registry.track("").into());
        assert!(!packet.track_descriptor().has_name());
    }

    #[test]
    fn test_first_interned_packet_bootstraps() {
        let track = thread();
        let mut asm = assembler(Features::default());

        // A slice end interns nothing and must not bootstrap.
        let end = asm.event_packet(&Event::end_slice(&track, 10));
        assert!(!end.has_sequence_flags());
        assert!(!end.has_previous_packet_dropped());

        let begin = asm.event_packet(&Event::start_slice(&track, 20, "f", &[]));
        assert!(begin.previous_packet_dropped());
        assert_eq!(begin.sequence_flags(), CLEARED | NEEDS);
        assert_eq!(begin.track_event().name_iid(), 1);
        assert!(!begin.track_event().has_name());
        let interned = begin.interned_data.as_ref().unwrap();
        assert_eq!(interned.event_names.len(), 1);
        assert_eq!(interned.event_names[0].iid(), 1);
        assert_eq!(interned.event_names[0].name(), "f");

        let again = asm.event_packet(&Event::start_slice(&track, 30, "f", &[]));
        assert_eq!(again.sequence_flags(), NEEDS);
        assert!(!again.has_previous_packet_dropped());
        assert!(again.interned_data.is_none());
        assert_eq!(again.track_event().name_iid(), 1);

        let end = asm.event_packet(&Event::end_slice(&track, 40));
        assert_eq!(end.sequence_flags(), NEEDS);
    }

    #[test]
    fn test_no_interning_embeds_literals() {
        let track = thread();
        let features = Features {
            interning: false,
            incremental_timestamps: true,
        };
        let mut asm = assembler(features);
        let ann = [Annotation::new("k", "v")];

        let packet = asm.event_packet(&Event::start_slice(&track, 100, "f", &ann));
        assert_eq!(packet.track_event().name(), "f");
        assert!(!packet.track_event().has_name_iid());
        assert_eq!(packet.track_event().debug_annotations[0].name(), "k");
        assert_eq!(packet.track_event().debug_annotations[0].string_value(), "v");
        assert!(packet.interned_data.is_none());
        // No interned data ever appears, so the bootstrap never fires.
        assert!(!packet.has_sequence_flags());
        assert!(asm.interner().is_empty());
    }

    #[test]
    fn test_all_features_off_sets_no_flags() {
        let track = thread();
        let mut asm = assembler(Features::PLAIN);
        for i in 0..3 {
            let packet = asm.event_packet(&Event::instant(&track, i * 10, "i"));
            assert!(!packet.has_sequence_flags());
            assert_eq!(packet.timestamp(), i * 10);
            assert!(!packet.has_timestamp_clock_id());
            assert_eq!(packet.trusted_packet_sequence_id(), TRUSTED_PACKET_SEQUENCE_ID);
        }
        assert!(asm.prologue().is_none());
    }

    #[test]
    fn test_annotation_values_interned() {
        let track = thread();
        let mut asm = assembler(Features::default());
        let ann = [
            Annotation::new("k1", "v1"),
            Annotation::new("k2", "v2"),
            Annotation::new("k3", "v1"),
            Annotation::new("k4", ""),
        ];

        let packet = asm.event_packet(&Event::start_slice(&track, 1, "f", &ann));
        let annotations = &packet.track_event().debug_annotations;
        assert_eq!(annotations[0].name(), "k1");
        assert_eq!(annotations[0].string_value_iid(), 1);
        assert_eq!(annotations[1].string_value_iid(), 2);
        assert_eq!(annotations[2].string_value_iid(), 1);
        assert!(annotations[3].has_string_value());
        assert_eq!(annotations[3].string_value(), "");

        let values = &packet.interned_data.debug_annotation_string_values;
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].iid(), 1);
        assert_eq!(values[0].str(), b"v1");
        assert_eq!(values[1].str(), b"v2");

        // Annotation values alone are enough to count as new interned data.
        let mut asm = assembler(Features::default());
        let nameless = asm.event_packet(&Event::instant(&track, 1, "").with_annotations(&ann[..1]));
        assert!(nameless.previous_packet_dropped());
        assert!(nameless.interned_data.event_names.is_empty());
    }

    #[test]
    fn test_delta_timestamps() {
        let track = thread();
        let mut asm = assembler(Features::default());

        let first = asm.event_packet(&Event::start_slice(&track, 100, "f", &[]));
        assert_eq!(first.timestamp(), 100);
        assert_eq!(first.timestamp_clock_id(), INCREMENTAL_CLOCK_ID);

        let second = asm.event_packet(&Event::end_slice(&track, 150));
        assert_eq!(second.timestamp(), 50);
        assert_eq!(second.timestamp_clock_id(), INCREMENTAL_CLOCK_ID);

        // Equal timestamps produce a zero delta.
        let third = asm.event_packet(&Event::instant(&track, 150, "i"));
        assert_eq!(third.timestamp(), 0);
        assert_eq!(third.timestamp_clock_id(), INCREMENTAL_CLOCK_ID);
        assert_eq!(asm.last_timestamp(), 150);
    }

    #[test]
    fn test_non_monotonic_falls_back_to_absolute() {
        let track = thread();
        let mut asm = assembler(Features::default());

        asm.event_packet(&Event::instant(&track, 1000, "a"));
        let back = asm.event_packet(&Event::instant(&track, 400, "b"));
        assert_eq!(back.timestamp(), 400);
        assert!(!back.has_timestamp_clock_id());
        assert_eq!(asm.last_timestamp(), 400);

        let next = asm.event_packet(&Event::instant(&track, 450, "c"));
        assert_eq!(next.timestamp(), 50);
        assert_eq!(next.timestamp_clock_id(), INCREMENTAL_CLOCK_ID);
    }

    #[test]
    fn test_counter_and_flows() {
        let mut registry = TrackRegistry::with_rng(Box::new(StepRng::new(1, 1)));
        let counter = registry.counter("cpu load", "%");
        let track: Track = registry.track("t").into();
        let mut asm = assembler(Features::PLAIN);

        let sample = asm.event_packet(&Event::counter_sample(&counter, 10, 42));
        assert_eq!(sample.track_event().type_(), Type::TYPE_COUNTER);
        assert_eq!(sample.track_event().counter_value(), 42);
        assert_eq!(sample.track_event().name(), "cpu load");
        assert_eq!(sample.track_event().track_uuid(), counter.uuid());

        let end = asm.event_packet(&Event::end_slice_with_flow(&track, 20, &[9, 8]));
        assert_eq!(end.track_event().flow_ids, vec![9, 8]);
        assert!(!end.track_event().has_name());
        assert!(!end.track_event().has_name_iid());
    }

    #[test]
    fn test_global_track_uuid_zero() {
        let mut asm = assembler(Features::PLAIN);
        let packet = asm.event_packet(&Event::instant(&global_track().into(), 1, "g"));
        assert!(packet.track_event().has_track_uuid());
        assert_eq!(packet.track_event().track_uuid(), 0);
    }

    #[test]
    fn test_reset_rebootstraps_without_reusing_iids() {
        let track = thread();
        let mut asm = assembler(Features::default());
        asm.event_packet(&Event::start_slice(&track, 500, "a", &[]));
        asm.event_packet(&Event::start_slice(&track, 600, "b", &[]));

        asm.reset();
        assert_eq!(asm.last_timestamp(), 0);

        let packet = asm.event_packet(&Event::start_slice(&track, 100, "a", &[]));
        assert!(packet.previous_packet_dropped());
        assert_eq!(packet.sequence_flags(), CLEARED | NEEDS);
        assert_eq!(packet.track_event().name_iid(), 3);
        assert_eq!(packet.interned_data.event_names[0].name(), "a");
        assert_eq!(packet.timestamp(), 100);
        assert_eq!(packet.timestamp_clock_id(), INCREMENTAL_CLOCK_ID);
    }

    #[test]
    fn test_clock_definition_packet() {
        let packet = clock_definition_packet(TRUSTED_PACKET_SEQUENCE_ID);
        let snapshot = packet.clock_snapshot();
        assert_eq!(snapshot.clocks.len(), 2);
        assert_eq!(snapshot.clocks[0].clock_id(), INCREMENTAL_CLOCK_ID);
        assert!(snapshot.clocks[0].is_incremental());
        assert_eq!(
            snapshot.clocks[1].clock_id(),
            BuiltinClock::BUILTIN_CLOCK_BOOTTIME as u32
        );
        assert_eq!(packet.trusted_packet_sequence_id(), TRUSTED_PACKET_SEQUENCE_ID);
        assert!(!packet.has_sequence_flags());
    }
}
