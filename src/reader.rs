//! Streaming access to the packets of a rendered trace (.pb or .pb.gz).

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use perfetto_protos::trace_packet::TracePacket;
use protobuf::Message;

use crate::error::{Result, TraceError};

const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Iterator over the `Trace.packet` entries of a serialized `Trace`.
///
/// Top-level fields other than `packet` are skipped.
pub struct TracePacketIterator<R: BufRead> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: BufRead> TracePacketIterator<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(4 * 1024),
        }
    }

    fn read_packet(&mut self) -> Result<TracePacket> {
        let length = read_varint(&mut self.reader)?;
        // The buffer grows with the bytes actually present, never with the
        // declared length.
        self.buffer.clear();
        let read = (&mut self.reader)
            .take(length)
            .read_to_end(&mut self.buffer)?;
        if (read as u64) < length {
            return Err(TraceError::MalformedTrace(format!(
                "truncated packet: expected {length} bytes, got {read}"
            )));
        }
        Ok(TracePacket::parse_from_bytes(&self.buffer)?)
    }
}

impl<R: BufRead> Iterator for TracePacketIterator<R> {
    type Item = Result<TracePacket>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let tag = match read_tag(&mut self.reader) {
                Ok(Some(tag)) => tag,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };

            let wire_type = (tag & 0x07) as u8;
            let field_number = tag >> 3;

            if field_number == 1 && wire_type == 2 {
                return Some(self.read_packet());
            }

            if let Err(e) = skip_field(&mut self.reader, wire_type) {
                return Some(Err(e));
            }
        }
    }
}

/// Read a field tag. `None` only if the stream ends before its first byte;
/// an end inside the tag is an error.
fn read_tag<R: Read>(reader: &mut R) -> Result<Option<u64>> {
    let mut byte = [0u8; 1];
    match reader.read_exact(&mut byte) {
        Ok(()) => varint_from(byte[0], reader).map(Some),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read a base-128 varint.
pub fn read_varint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    varint_from(byte[0], reader)
}

fn varint_from<R: Read>(first: u8, reader: &mut R) -> Result<u64> {
    let mut result = (first & 0x7f) as u64;
    let mut last = first;
    let mut shift = 0;
    while last & 0x80 != 0 {
        shift += 7;
        if shift >= 64 {
            return Err(TraceError::MalformedTrace("varint too large".to_string()));
        }
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        result |= ((byte[0] & 0x7f) as u64) << shift;
        last = byte[0];
    }
    Ok(result)
}

/// Skip one field body of the given wire type.
pub fn skip_field<R: Read>(reader: &mut R, wire_type: u8) -> Result<()> {
    match wire_type {
        0 => {
            read_varint(reader)?;
        }
        1 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
        }
        2 => {
            let len = read_varint(reader)?;
            let skipped = std::io::copy(&mut reader.take(len), &mut std::io::sink())?;
            if skipped != len {
                return Err(TraceError::MalformedTrace(format!(
                    "truncated field: expected {len} bytes, got {skipped}"
                )));
            }
        }
        5 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
        }
        _ => {
            return Err(TraceError::MalformedTrace(format!(
                "unknown wire type {wire_type}"
            )))
        }
    }
    Ok(())
}

/// Open a trace file, transparently decompressing `.gz` files.
pub fn open_trace_reader(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    if name.ends_with(".gz") {
        let decoder = GzDecoder::new(reader);
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, decoder)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Read every packet of the trace at `path`.
pub fn read_trace_file(path: &Path) -> Result<Vec<TracePacket>> {
    TracePacketIterator::new(open_trace_reader(path)?).collect()
}
