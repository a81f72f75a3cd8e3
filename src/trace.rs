//! The trace container: the single mutation surface of a trace.

use std::collections::HashMap;

use perfetto_protos::trace_packet::TracePacket;
use rand::RngCore;
use tracing::debug;

use crate::error::Result;
use crate::event::{Annotation, Event};
use crate::features::Features;
use crate::packet::{track_descriptor_packet, PacketAssembler};
use crate::perfetto::{StreamingTraceWriter, TraceWriter, TRUSTED_PACKET_SEQUENCE_ID};
use crate::track::{self, Counter, GenericTrack, Process, Thread, Track, TrackRegistry};

/// An in-memory trace: registered tracks and events as an ordered sequence
/// of packets ready to be rendered.
///
/// Not synchronized. Callers sharing a trace across threads must wrap it in
/// a lock.
pub struct Trace {
    features: Features,
    registry: TrackRegistry,
    assembler: PacketAssembler,
    packets: Vec<TracePacket>,
    threads: HashMap<i32, Thread>,
    counters: HashMap<String, Counter>,
}

impl Trace {
    pub fn new(features: Features) -> Self {
        Self::with_registry(features, TrackRegistry::new())
    }

    /// A trace drawing track uuids from `rng`.
    pub fn with_rng(features: Features, rng: Box<dyn RngCore + Send>) -> Self {
        Self::with_registry(features, TrackRegistry::with_rng(rng))
    }

    fn with_registry(features: Features, registry: TrackRegistry) -> Self {
        Self {
            features,
            registry,
            assembler: PacketAssembler::new(features, TRUSTED_PACKET_SEQUENCE_ID),
            packets: Vec::new(),
            threads: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    pub fn features(&self) -> Features {
        self.features
    }

    /// The implicit default track. Registers nothing.
    pub fn global_track() -> GenericTrack {
        track::global_track()
    }

    fn push_descriptor(&mut self, track: Track) {
        self.packets.push(track_descriptor_packet(&track));
    }

    pub fn register_process(&mut self, pid: i32, name: &str) -> Process {
        let process = self.registry.process(pid, name);
        self.push_descriptor(Track::from(&process));
        process
    }

    /// Register a thread. A later registration with the same tid replaces
    /// this one in the [`Trace::thread`] lookup.
    pub fn register_thread(&mut self, pid: i32, tid: i32, name: &str) -> Thread {
        let thread = self.registry.thread(pid, tid, name);
        self.push_descriptor(Track::from(&thread));
        self.threads.insert(tid, thread.clone());
        thread
    }

    /// Register a counter. A later registration with the same name replaces
    /// this one in the [`Trace::counter`] lookup.
    pub fn register_counter(&mut self, name: &str, unit: &str) -> Counter {
        let counter = self.registry.counter(name, unit);
        self.push_descriptor(Track::from(&counter));
        self.counters.insert(name.to_string(), counter.clone());
        counter
    }

    pub fn register_track(&mut self, name: &str) -> GenericTrack {
        let track = self.registry.track(name);
        self.push_descriptor(Track::from(&track));
        track
    }

    /// Append an already constructed event.
    pub fn add_event(&mut self, event: &Event) {
        let packet = self.assembler.event_packet(event);
        self.packets.push(packet);
    }

    pub fn instant(&mut self, track: &Track, ts: u64, name: &str) {
        self.add_event(&Event::instant(track, ts, name));
    }

    pub fn instant_with_annotations(
        &mut self,
        track: &Track,
        ts: u64,
        name: &str,
        annotations: &[Annotation],
    ) {
        self.add_event(&Event::instant(track, ts, name).with_annotations(annotations));
    }

    pub fn start_slice(&mut self, track: &Track, ts: u64, name: &str, annotations: &[Annotation]) {
        self.add_event(&Event::start_slice(track, ts, name, annotations));
    }

    pub fn start_slice_with_flow(
        &mut self,
        track: &Track,
        ts: u64,
        name: &str,
        flow_ids: &[u64],
        annotations: &[Annotation],
    ) {
        self.add_event(&Event::start_slice_with_flow(
            track,
            ts,
            name,
            flow_ids,
            annotations,
        ));
    }

    pub fn end_slice(&mut self, track: &Track, ts: u64) {
        self.add_event(&Event::end_slice(track, ts));
    }

    pub fn end_slice_with_flow(&mut self, track: &Track, ts: u64, flow_ids: &[u64]) {
        self.add_event(&Event::end_slice_with_flow(track, ts, flow_ids));
    }

    pub fn counter_sample(&mut self, counter: &Counter, ts: u64, value: i64) {
        self.add_event(&Event::counter_sample(counter, ts, value));
    }

    /// Drop every packet and the incremental encoding state behind them.
    ///
    /// The next rendered trace is self-contained: interned strings are
    /// re-emitted and the bootstrap flags are asserted again. iids and track
    /// uuids handed out before the reset are never reissued.
    pub fn reset(&mut self) {
        debug!(packets = self.packets.len(), "resetting trace");
        self.packets.clear();
        self.threads.clear();
        self.counters.clear();
        self.assembler.reset();
    }

    /// The in-memory packet sequence, in call order.
    pub fn packets(&self) -> &[TracePacket] {
        &self.packets
    }

    pub fn thread(&self, tid: i32) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    pub fn counter(&self, name: &str) -> Option<&Counter> {
        self.counters.get(name)
    }

    pub fn threads(&self) -> &HashMap<i32, Thread> {
        &self.threads
    }

    pub fn counters(&self) -> &HashMap<String, Counter> {
        &self.counters
    }

    /// Stream the rendered trace into `writer`: the clock prologue, if any,
    /// followed by the packet sequence.
    pub fn write_to(&self, writer: &mut dyn TraceWriter) -> Result<()> {
        if let Some(prologue) = self.assembler.prologue() {
            writer.write_packet(&prologue)?;
        }
        for packet in &self.packets {
            writer.write_packet(packet)?;
        }
        writer.flush()
    }

    /// Serialize the trace. On error nothing is returned and the trace is
    /// left untouched.
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut writer = StreamingTraceWriter::new(Vec::new());
        self.write_to(&mut writer)?;
        debug!(packets = writer.packet_count(), "rendered trace");
        Ok(writer.into_inner())
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new(Features::default())
    }
}
