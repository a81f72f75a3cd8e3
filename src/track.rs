//! Tracks and the registry that hands out their uuids.
//!
//! A track is the lane events are drawn on. Every registered track gets a
//! random, non-zero uuid that is unique for the life of the trace; uuid 0 is
//! the implicit global track the consumer provides on its own.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// uuid of the consumer's default track. Never emitted as a descriptor.
pub const GLOBAL_TRACK_UUID: u64 = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Process {
    pub pid: i32,
    pub name: String,
    uuid: u64,
}

impl Process {
    pub(crate) fn new(uuid: u64, pid: i32, name: String) -> Self {
        Self { pid, name, uuid }
    }

    pub fn uuid(&self) -> u64 {
        self.uuid
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Thread {
    pub pid: i32,
    pub tid: i32,
    pub name: String,
    uuid: u64,
}

impl Thread {
    pub(crate) fn new(uuid: u64, pid: i32, tid: i32, name: String) -> Self {
        Self {
            pid,
            tid,
            name,
            uuid,
        }
    }

    pub fn uuid(&self) -> u64 {
        self.uuid
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Counter {
    pub name: String,
    /// Free-form unit label, e.g. "%" or "bytes".
    pub unit: String,
    uuid: u64,
}

impl Counter {
    pub(crate) fn new(uuid: u64, name: String, unit: String) -> Self {
        Self { name, unit, uuid }
    }

    pub fn uuid(&self) -> u64 {
        self.uuid
    }
}

/// A named track with no process/thread/counter semantics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericTrack {
    pub name: String,
    uuid: u64,
}

impl GenericTrack {
    pub(crate) fn new(uuid: u64, name: String) -> Self {
        Self { name, uuid }
    }

    pub fn uuid(&self) -> u64 {
        self.uuid
    }

    pub fn is_global(&self) -> bool {
        self.uuid == GLOBAL_TRACK_UUID
    }
}

/// The implicit global track. Events on it need no descriptor.
pub fn global_track() -> GenericTrack {
    GenericTrack::new(GLOBAL_TRACK_UUID, String::new())
}

/// Any track an event can be attached to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Track {
    Process(Process),
    Thread(Thread),
    Counter(Counter),
    Generic(GenericTrack),
}

impl Track {
    pub fn uuid(&self) -> u64 {
        match self {
            Track::Process(p) => p.uuid,
            Track::Thread(t) => t.uuid,
            Track::Counter(c) => c.uuid,
            Track::Generic(g) => g.uuid,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Track::Process(p) => &p.name,
            Track::Thread(t) => &t.name,
            Track::Counter(c) => &c.name,
            Track::Generic(g) => &g.name,
        }
    }
}

macro_rules! impl_track_from {
    ($ty:ident, $variant:ident) => {
        impl From<$ty> for Track {
            fn from(track: $ty) -> Self {
                Track::$variant(track)
            }
        }

        impl From<&$ty> for Track {
            fn from(track: &$ty) -> Self {
                Track::$variant(track.clone())
            }
        }
    };
}

impl_track_from!(Process, Process);
impl_track_from!(Thread, Thread);
impl_track_from!(Counter, Counter);
impl_track_from!(GenericTrack, Generic);

impl From<&Track> for Track {
    fn from(track: &Track) -> Self {
        track.clone()
    }
}

/// Creates tracks and allocates their uuids from a random source.
pub struct TrackRegistry {
    rng: Box<dyn RngCore + Send>,
    issued: HashSet<u64>,
}

impl TrackRegistry {
    /// Registry drawing uuids from an OS-seeded `StdRng`.
    pub fn new() -> Self {
        Self::with_rng(Box::new(StdRng::from_os_rng()))
    }

    pub fn with_rng(rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            rng,
            issued: HashSet::new(),
        }
    }

    /// Draw a uuid that is neither the global sentinel nor already issued.
    fn alloc_uuid(&mut self) -> u64 {
        loop {
            let uuid = self.rng.next_u64();
            if uuid != GLOBAL_TRACK_UUID && self.issued.insert(uuid) {
                return uuid;
            }
        }
    }

    pub fn process(&mut self, pid: i32, name: &str) -> Process {
        Process::new(self.alloc_uuid(), pid, name.to_string())
    }

    pub fn thread(&mut self, pid: i32, tid: i32, name: &str) -> Thread {
        Thread::new(self.alloc_uuid(), pid, tid, name.to_string())
    }

    pub fn counter(&mut self, name: &str, unit: &str) -> Counter {
        Counter::new(self.alloc_uuid(), name.to_string(), unit.to_string())
    }

    pub fn track(&mut self, name: &str) -> GenericTrack {
        GenericTrack::new(self.alloc_uuid(), name.to_string())
    }

    /// Number of uuids handed out so far.
    pub fn issued(&self) -> usize {
        self.issued.len()
    }
}

impl Default for TrackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
