//! Perfetto wire constants and packet sinks.

use std::io::Write;

use perfetto_protos::trace_packet::TracePacket;
use protobuf::Message;

use crate::error::Result;

/// `trusted_packet_sequence_id` stamped on every packet this writer emits.
pub const TRUSTED_PACKET_SEQUENCE_ID: u32 = 32;

/// Sequence-scoped clock carrying delta timestamps. Ids 64..=127 are
/// reserved by Perfetto for clocks defined within a single sequence.
pub const INCREMENTAL_CLOCK_ID: u32 = 64;

/// Field 1 (`Trace.packet`), wire type 2 (length-delimited).
pub const TRACE_PACKET_TAG: u8 = (1 << 3) | 2;

/// A destination for trace packets.
pub trait TraceWriter {
    fn write_packet(&mut self, packet: &TracePacket) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Encodes packets straight into a byte sink.
///
/// Each packet is framed as a `Trace.packet` field, so the output is a
/// complete `Trace` message at every packet boundary.
pub struct StreamingTraceWriter<W: Write> {
    writer: W,
    scratch: Vec<u8>,
    packet_count: usize,
}

impl<W: Write> StreamingTraceWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            scratch: Vec::with_capacity(256),
            packet_count: 0,
        }
    }

    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TraceWriter for StreamingTraceWriter<W> {
    fn write_packet(&mut self, packet: &TracePacket) -> Result<()> {
        // Encode fully before touching the sink so a rejected packet leaves
        // no partial frame behind.
        self.scratch.clear();
        self.scratch.push(TRACE_PACKET_TAG);
        packet.write_length_delimited_to_vec(&mut self.scratch)?;
        self.writer.write_all(&self.scratch)?;
        self.packet_count += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects packets in memory.
#[derive(Default)]
pub struct VecTraceWriter {
    pub packets: Vec<TracePacket>,
}

impl VecTraceWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraceWriter for VecTraceWriter {
    fn write_packet(&mut self, packet: &TracePacket) -> Result<()> {
        self.packets.push(packet.clone());
        Ok(())
    }
}
