//! perfetto-builder: build Perfetto traces in memory and render them to the
//! protobuf wire format.
//!
//! Register tracks on a [`Trace`], append events to them, then call
//! [`Trace::render`] to get the bytes of a `Trace` message the Perfetto UI
//! and trace processor can load.
//!
//! # Modules
//!
//! - [`trace`] - the trace container
//! - [`track`] - track kinds and uuid allocation
//! - [`event`] - slice, instant and counter events
//! - [`packet`] - packet assembly, interning and timestamp encoding
//! - [`decode`] - turning rendered traces back into tracks and events
//!
//! # Example
//!
//! ```no_run
//! use perfetto_builder::{Features, Trace, Track};
//!
//! let mut trace = Trace::new(Features::default());
//! trace.register_process(1, "server");
//! let thread: Track = trace.register_thread(1, 2, "worker").into();
//! trace.start_slice(&thread, 100, "handle request", &[("path", "/get").into()]);
//! trace.end_slice(&thread, 150);
//!
//! std::fs::write("trace.pftrace", trace.render().expect("render failed")).unwrap();
//! ```

pub mod decode;
pub mod error;
pub mod event;
pub mod features;
pub mod intern;
pub mod packet;
pub mod perfetto;
pub mod reader;
pub mod trace;
pub mod track;

pub use decode::{decode_bytes, DecodedTrace, TraceDecoder};
pub use error::{Result, TraceError};
pub use event::{Annotation, Event, EventData};
pub use features::Features;
pub use trace::Trace;
pub use track::{global_track, Counter, GenericTrack, Process, Thread, Track};
