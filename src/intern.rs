//! String interning for event names and annotation values.
//!
//! Each namespace maps strings to iids starting at 1. An iid is handed out
//! once per namespace and never reused for the lifetime of the table, even
//! across [`InternTable::clear`]. iid 0 is reserved for "not interned".

use std::collections::HashMap;
use std::fmt;

/// The two independent iid spaces a trace interns into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// `TrackEvent.name_iid` / `InternedData.event_names`
    EventName,
    /// `DebugAnnotation.string_value_iid` / `InternedData.debug_annotation_string_values`
    AnnotationValue,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::EventName => write!(f, "event name"),
            Namespace::AnnotationValue => write!(f, "annotation value"),
        }
    }
}

/// Result of interning a non-empty string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interned {
    pub iid: u64,
    /// True the first time the string was seen; the caller must emit the
    /// iid -> string mapping alongside the packet that triggered it.
    pub is_new: bool,
}

#[derive(Debug)]
struct StringIds {
    ids: HashMap<String, u64>,
    next_iid: u64,
}

impl StringIds {
    fn new() -> Self {
        Self {
            ids: HashMap::new(),
            next_iid: 1,
        }
    }

    fn get_or_create(&mut self, value: &str) -> Interned {
        if let Some(&iid) = self.ids.get(value) {
            return Interned { iid, is_new: false };
        }

        let iid = self.next_iid;
        self.next_iid += 1;
        self.ids.insert(value.to_string(), iid);
        Interned { iid, is_new: true }
    }
}

#[derive(Debug)]
pub struct InternTable {
    event_names: StringIds,
    annotation_values: StringIds,
}

impl InternTable {
    pub fn new() -> Self {
        Self {
            event_names: StringIds::new(),
            annotation_values: StringIds::new(),
        }
    }

    fn ids(&self, namespace: Namespace) -> &StringIds {
        match namespace {
            Namespace::EventName => &self.event_names,
            Namespace::AnnotationValue => &self.annotation_values,
        }
    }

    fn ids_mut(&mut self, namespace: Namespace) -> &mut StringIds {
        match namespace {
            Namespace::EventName => &mut self.event_names,
            Namespace::AnnotationValue => &mut self.annotation_values,
        }
    }

    /// Intern `value` in `namespace`.
    ///
    /// Empty strings are never interned and return `None`.
    pub fn intern(&mut self, namespace: Namespace, value: &str) -> Option<Interned> {
        if value.is_empty() {
            return None;
        }
        Some(self.ids_mut(namespace).get_or_create(value))
    }

    /// Look up an already interned string without allocating.
    pub fn get(&self, namespace: Namespace, value: &str) -> Option<u64> {
        self.ids(namespace).ids.get(value).copied()
    }

    /// Number of strings currently interned in `namespace`.
    pub fn len(&self, namespace: Namespace) -> usize {
        self.ids(namespace).ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_names.ids.is_empty() && self.annotation_values.ids.is_empty()
    }

    /// Forget every interned string. iid counters keep counting so an iid
    /// handed out before the clear is never assigned to another string.
    pub fn clear(&mut self) {
        self.event_names.ids.clear();
        self.annotation_values.ids.clear();
    }
}

impl Default for InternTable {
    fn default() -> Self {
        Self::new()
    }
}
