//! Data model for parsed event-pipe traces.
//!
//! The parser produces a [`Trace`]: session metadata from the `Trace` object,
//! the table of event-type definitions, and the event list sorted by
//! timestamp. Events share their [`EventMetadata`] by `Arc`, and interned
//! strings (`Arc<str>`) live at least as long as the `Trace`.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

mod guid;
mod payload;
mod typecode;

pub use guid::Guid;
pub use payload::{Payload, PayloadValue};
pub use typecode::TypeCode;

/// Wall-clock capture time, decoded from the eight i16 date components of the
/// `Trace` object (the day-of-week component is discarded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceTime {
    pub year: u16,
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub millisecond: u16,
}

impl fmt::Display for TraceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.millisecond
        )
    }
}

/// Session-wide metadata from the stream's `Trace` object.
///
/// Populated exactly once, never mutated afterwards. `qpc_frequency` is
/// validated to be positive when the object is decoded.
#[derive(Debug, Clone, Serialize)]
pub struct TraceMetadata {
    pub date: TraceTime,
    pub qpc_sync_time: i64,
    pub qpc_frequency: i64,
    pub pointer_size: i32,
    pub process_id: i32,
    pub number_of_processors: i32,
    pub cpu_sampling_rate: i32,
}

impl TraceMetadata {
    /// Convert a raw QPC timestamp to nanoseconds relative to the sync point.
    pub fn qpc_to_ns(&self, qpc: i64) -> u64 {
        let delta = qpc.wrapping_sub(self.qpc_sync_time).max(0) as u128;
        (delta * 1_000_000_000 / self.qpc_frequency as u128) as u64
    }
}

/// One field of an event-type definition.
///
/// `sub_fields` is non-empty exactly when `type_code` is `Object`; V2
/// definitions with `type_code == Array` carry the element type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventFieldDefinition {
    pub name: Arc<str>,
    pub type_code: TypeCode,
    pub array_element_type_code: Option<TypeCode>,
    pub sub_fields: Vec<EventFieldDefinition>,
}

impl EventFieldDefinition {
    pub fn scalar(name: Arc<str>, type_code: TypeCode) -> Self {
        EventFieldDefinition {
            name,
            type_code,
            array_element_type_code: None,
            sub_fields: Vec::new(),
        }
    }
}

/// An event-type definition, keyed by its small positive `metadata_id`.
///
/// Id 0 is reserved on the wire to mark a blob as a definition and never
/// appears as a table key.
#[derive(Debug, Clone, Serialize)]
pub struct EventMetadata {
    pub metadata_id: u32,
    pub provider_name: Arc<str>,
    pub event_id: i32,
    pub event_name: Arc<str>,
    pub keywords: i64,
    pub version: i32,
    pub level: i32,
    pub opcode: Option<u8>,
    pub fields: Vec<EventFieldDefinition>,
}

/// A single parsed event.
///
/// `index` is the insertion order before the final timestamp sort;
/// `stack_index` is the globally-uniquified stack id (0 = no stack), resolved
/// into `stack` once parsing completes.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub index: usize,
    pub sequence_number: u32,
    pub capture_thread_id: i64,
    pub thread_id: i64,
    pub processor_number: i32,
    pub stack_index: u64,
    pub time_stamp_ns: u64,
    pub activity_id: Guid,
    pub related_activity_id: Guid,
    pub payload: Payload,
    pub metadata: Arc<EventMetadata>,
    pub stack: Option<StackTrace>,
}

/// A symbolized method, keyed in the resolver by its address range.
///
/// The range is absent for synthetic descriptions of unknown addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodDescription {
    pub name: Arc<str>,
    pub namespace: Arc<str>,
    pub signature: Option<Arc<str>>,
    pub start_address: Option<u64>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackFrame {
    pub address: u64,
    pub method: Arc<MethodDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackTrace {
    pub frames: Vec<StackFrame>,
}

/// The finished parse result. Events are sorted ascending by
/// `time_stamp_ns`; ties keep stream order.
#[derive(Debug, Serialize)]
pub struct Trace {
    pub metadata: TraceMetadata,
    pub event_metadata: Vec<Arc<EventMetadata>>,
    pub events: Vec<Event>,
}
