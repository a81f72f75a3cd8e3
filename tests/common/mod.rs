//! Common test utilities for perfetto-builder integration tests.

use perfetto_builder::{Features, Trace};
use perfetto_protos::trace::Trace as TraceProto;
use perfetto_protos::trace_packet::TracePacket;
use protobuf::Message;
use rand::rngs::mock::StepRng;

/// First uuid handed out by [`deterministic_trace`]; later tracks count up.
pub const FIRST_UUID: u64 = 0x1000;

/// A trace whose track uuids are `FIRST_UUID`, `FIRST_UUID + 1`, ...
pub fn deterministic_trace(features: Features) -> Trace {
    Trace::with_rng(features, Box::new(StepRng::new(FIRST_UUID, 1)))
}

/// Every feature combination.
#[allow(dead_code)]
pub fn all_features() -> [Features; 4] {
    [
        Features::default(),
        Features {
            interning: false,
            incremental_timestamps: true,
        },
        Features {
            interning: true,
            incremental_timestamps: false,
        },
        Features::PLAIN,
    ]
}

/// Render `trace` and parse the result as a plain `Trace` message.
#[allow(dead_code)]
pub fn render_packets(trace: &Trace) -> Vec<TracePacket> {
    let bytes = trace.render().expect("render failed");
    TraceProto::parse_from_bytes(&bytes)
        .expect("rendered trace does not parse")
        .packet
}
