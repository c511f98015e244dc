//! Well-known event schemas, hardcoded because the self-description in
//! typical captures is absent or incomplete.
//!
//! A matching (provider, event id, version) triple overrides the wire
//! definition's name, opcode and field list, and routes payload parsing to a
//! hand-written parser. Hand parsers must consume exactly the payload bytes
//! and produce the same map the generic walker would.

use symbolizer::StringPool;
use trace_model::{EventFieldDefinition, Payload, PayloadValue, TypeCode};

use crate::reader::{require, SequenceReader};
use crate::Result;

pub(crate) const RUNDOWN_PROVIDER: &str = "Microsoft-Windows-DotNETRuntimeRundown";
pub(crate) const METHOD_DC_END_ID: i32 = 144;

const TPL_PROVIDER: &str = "System.Threading.Tasks.TplEventSource";
const TASK_WAIT_BEGIN_ID: i32 = 10;

type HandParser = fn(&mut SequenceReader, &mut StringPool) -> Result<Option<Payload>>;

pub(crate) struct KnownEvent {
    pub(crate) name: &'static str,
    pub(crate) opcode: Option<u8>,
    fields: &'static [(&'static str, TypeCode)],
    pub(crate) parse: HandParser,
}

impl KnownEvent {
    pub(crate) fn field_definitions(&self, strings: &mut StringPool) -> Vec<EventFieldDefinition> {
        self.fields
            .iter()
            .map(|(name, type_code)| EventFieldDefinition::scalar(strings.intern(name), *type_code))
            .collect()
    }
}

static TASK_WAIT_BEGIN: KnownEvent = KnownEvent {
    name: "TaskWaitBegin",
    // EventOpcode.Send
    opcode: Some(9),
    fields: &[
        ("OriginatingTaskSchedulerID", TypeCode::Int32),
        ("OriginatingTaskID", TypeCode::Int32),
        ("TaskID", TypeCode::Int32),
        ("Behavior", TypeCode::Int32),
        ("ContinueWithTaskID", TypeCode::Int32),
    ],
    parse: parse_task_wait_begin,
};

static METHOD_DC_END: KnownEvent = KnownEvent {
    name: "MethodDCEnd",
    opcode: None,
    fields: &[
        ("MethodStartAddress", TypeCode::UInt64),
        ("MethodSize", TypeCode::UInt32),
        ("MethodNamespace", TypeCode::String),
        ("MethodName", TypeCode::String),
        ("MethodSignature", TypeCode::String),
    ],
    parse: parse_method_dc_end,
};

pub(crate) fn lookup(provider: &str, event_id: i32, version: i32) -> Option<&'static KnownEvent> {
    match (provider, event_id, version) {
        (TPL_PROVIDER, TASK_WAIT_BEGIN_ID, 3) => Some(&TASK_WAIT_BEGIN),
        // rundown method symbols keep the same layout across versions
        (RUNDOWN_PROVIDER, METHOD_DC_END_ID, _) => Some(&METHOD_DC_END),
        _ => None,
    }
}

fn parse_task_wait_begin(
    reader: &mut SequenceReader,
    strings: &mut StringPool,
) -> Result<Option<Payload>> {
    let mut payload = Payload::with_capacity(5);
    for (name, _) in TASK_WAIT_BEGIN.fields {
        let value = require!(reader.try_i32());
        payload.push(strings.intern(name), PayloadValue::I32(value));
    }
    Ok(Some(payload))
}

fn parse_method_dc_end(
    reader: &mut SequenceReader,
    strings: &mut StringPool,
) -> Result<Option<Payload>> {
    let mut payload = Payload::with_capacity(5);
    payload.push(
        strings.intern("MethodStartAddress"),
        PayloadValue::U64(require!(reader.try_u64())),
    );
    payload.push(
        strings.intern("MethodSize"),
        PayloadValue::U32(require!(reader.try_u32())),
    );
    payload.push(
        strings.intern("MethodNamespace"),
        PayloadValue::String(strings.intern(&require!(reader.try_string_utf16_nul()?))),
    );
    payload.push(
        strings.intern("MethodName"),
        PayloadValue::String(strings.intern(&require!(reader.try_string_utf16_nul()?))),
    );
    payload.push(
        strings.intern("MethodSignature"),
        PayloadValue::String(strings.intern(&require!(reader.try_string_utf16_nul()?))),
    );
    Ok(Some(payload))
}
