//! Delta-compressed event blobs, as found inside metadata and event blocks.
//!
//! Each blob starts with a presence-flag byte; absent fields inherit from
//! the previous blob in the block, varint fields that encode deltas are
//! reconstructed with a wrapping add. A blob whose metadata id is zero is
//! itself an event-type definition; any other id must already be in the
//! metadata table.

use std::sync::Arc;

use symbolizer::StringPool;
use trace_model::{
    Event, EventFieldDefinition, EventMetadata, Guid, Payload, PayloadValue, TypeCode,
};

use crate::known;
use crate::parser::ParseContext;
use crate::reader::{require, SequenceReader};
use crate::{NettraceError, Result};

mod flags {
    pub(super) const METADATA_ID: u8 = 1 << 0;
    pub(super) const SEQ_CAPTURE_PROC: u8 = 1 << 1;
    pub(super) const THREAD_ID: u8 = 1 << 2;
    pub(super) const STACK_ID: u8 = 1 << 3;
    pub(super) const ACTIVITY_ID: u8 = 1 << 4;
    pub(super) const RELATED_ACTIVITY_ID: u8 = 1 << 5;
    #[allow(dead_code)]
    pub(super) const IS_SORTED: u8 = 1 << 6;
    pub(super) const PAYLOAD_SIZE: u8 = 1 << 7;
}

const METADATA_TAG_OPCODE: u8 = 1;
const METADATA_TAG_PARAMETER_PAYLOAD: u8 = 2;

/// Previous-blob state, zeroed at the start of every block.
#[derive(Clone, Default)]
pub(crate) struct BlobState {
    metadata_id: u32,
    sequence_number: u32,
    capture_thread_id: u64,
    processor_number: u32,
    thread_id: u64,
    stack_id: u32,
    time_stamp: u64,
    activity_id: Guid,
    related_activity_id: Guid,
    payload_size: u32,
}

/// Decode one blob, updating `state` and the parse context.
pub(crate) fn decode_blob(
    reader: &mut SequenceReader,
    state: &mut BlobState,
    ctx: &mut ParseContext,
) -> Result<Option<()>> {
    let blob_start = reader.position();
    let flags = require!(reader.try_u8());
    let mut next = state.clone();

    if flags & flags::METADATA_ID != 0 {
        next.metadata_id = require!(reader.try_varint_u32()?);
    }
    if flags & flags::SEQ_CAPTURE_PROC != 0 {
        let delta = require!(reader.try_varint_u32()?);
        next.sequence_number = state.sequence_number.wrapping_add(delta);
        next.capture_thread_id = require!(reader.try_varint_u64()?);
        next.processor_number = require!(reader.try_varint_u32()?);
    }
    if flags & flags::THREAD_ID != 0 {
        next.thread_id = require!(reader.try_varint_u64()?);
    }
    if flags & flags::STACK_ID != 0 {
        next.stack_id = require!(reader.try_varint_u32()?);
    }
    let time_delta = require!(reader.try_varint_u64()?);
    next.time_stamp = state.time_stamp.wrapping_add(time_delta);
    if flags & flags::ACTIVITY_ID != 0 {
        next.activity_id = require!(reader.try_guid());
    }
    if flags & flags::RELATED_ACTIVITY_ID != 0 {
        next.related_activity_id = require!(reader.try_guid());
    }
    if flags & flags::PAYLOAD_SIZE != 0 {
        next.payload_size = require!(reader.try_varint_u32()?);
    }
    // the sequence applies only to real events, not metadata definitions
    if next.metadata_id != 0 {
        next.sequence_number = next.sequence_number.wrapping_add(1);
    }

    let payload_end = reader.position() + next.payload_size as u64;

    if next.metadata_id == 0 {
        let definition = require!(decode_metadata_definition(
            reader,
            payload_end,
            &mut ctx.strings
        )?);
        if let Some(previous) = ctx
            .metadata
            .insert(definition.metadata_id, Arc::new(definition))
        {
            tracing::debug!(
                metadata_id = previous.metadata_id,
                provider = %previous.provider_name,
                "metadata definition replaced"
            );
        }
    } else {
        let metadata = ctx.metadata.get(&next.metadata_id).cloned().ok_or(
            NettraceError::MissingMetadata {
                id: next.metadata_id,
                position: blob_start,
            },
        )?;
        let time_stamp_ns = ctx
            .require_trace(blob_start)?
            .qpc_to_ns(next.time_stamp as i64);

        let payload = match known::lookup(
            metadata.provider_name.as_ref(),
            metadata.event_id,
            metadata.version,
        ) {
            Some(event) => require!((event.parse)(reader, &mut ctx.strings)?),
            None => require!(decode_payload(reader, &metadata.fields, &mut ctx.strings)?),
        };

        if metadata.provider_name.as_ref() == known::RUNDOWN_PROVIDER
            && metadata.event_id == known::METHOD_DC_END_ID
        {
            register_rundown_method(&payload, &mut ctx.resolver.methods);
        }

        let event = Event {
            index: ctx.events.len(),
            sequence_number: next.sequence_number,
            capture_thread_id: next.capture_thread_id as i64,
            thread_id: next.thread_id as i64,
            processor_number: next.processor_number as i32,
            stack_index: ctx.resolver.stacks.event_stack_index(next.stack_id),
            time_stamp_ns,
            activity_id: next.activity_id,
            related_activity_id: next.related_activity_id,
            payload,
            metadata,
            stack: None,
        };
        ctx.events.push(event);
    }

    let pos = reader.position();
    if pos != payload_end {
        return Err(NettraceError::malformed(
            pos,
            format!("blob payload ended at offset {pos}, declared end {payload_end}"),
        ));
    }
    *state = next;
    Ok(Some(()))
}

fn register_rundown_method(payload: &Payload, methods: &mut symbolizer::MethodMap) {
    let method = match (
        payload.get("MethodStartAddress"),
        payload.get("MethodSize"),
        payload.get("MethodNamespace"),
        payload.get("MethodName"),
        payload.get("MethodSignature"),
    ) {
        (
            Some(PayloadValue::U64(start)),
            Some(PayloadValue::U32(size)),
            Some(PayloadValue::String(namespace)),
            Some(PayloadValue::String(name)),
            Some(PayloadValue::String(signature)),
        ) => trace_model::MethodDescription {
            name: name.clone(),
            namespace: namespace.clone(),
            signature: Some(signature.clone()),
            start_address: Some(*start),
            size: Some(*size as u64),
        },
        _ => {
            tracing::warn!("rundown method event with unexpected payload shape");
            return;
        }
    };
    methods.insert(Arc::new(method));
}

fn decode_metadata_definition(
    reader: &mut SequenceReader,
    payload_end: u64,
    strings: &mut StringPool,
) -> Result<Option<EventMetadata>> {
    let start = reader.position();
    let metadata_id = require!(reader.try_i32());
    if metadata_id <= 0 {
        return Err(NettraceError::malformed(
            start,
            format!("non-positive metadata id {metadata_id} in definition"),
        ));
    }
    let provider_name = strings.intern(&require!(reader.try_string_utf16_nul()?));
    let event_id = require!(reader.try_i32());
    let mut event_name = require!(reader.try_string_utf16_nul()?);
    let keywords = require!(reader.try_i64());
    let version = require!(reader.try_i32());
    let level = require!(reader.try_i32());
    let mut fields = require!(decode_field_definitions(reader, FieldVersion::V1, strings)?);
    let mut opcode = None;

    while reader.position() < payload_end {
        let tag_pos = reader.position();
        let tag_len = require!(reader.try_i32());
        let tag = require!(reader.try_u8());
        match tag {
            METADATA_TAG_OPCODE => {
                opcode = Some(require!(reader.try_u8()));
            }
            METADATA_TAG_PARAMETER_PAYLOAD => {
                fields = require!(decode_field_definitions(reader, FieldVersion::V2, strings)?);
            }
            other => {
                if tag_len < 0 {
                    return Err(NettraceError::malformed(
                        tag_pos,
                        format!("negative metadata tag length {tag_len}"),
                    ));
                }
                tracing::debug!(tag = other, len = tag_len, "skipping unknown metadata tag");
                require!(reader.skip(tag_len as usize));
            }
        }
    }

    if let Some(known) = known::lookup(provider_name.as_ref(), event_id, version) {
        event_name = known.name.to_string();
        opcode = known.opcode;
        fields = known.field_definitions(strings);
    }
    if event_name.is_empty() {
        event_name = format!("Event {event_id}");
    }

    Ok(Some(EventMetadata {
        metadata_id: metadata_id as u32,
        provider_name,
        event_id,
        event_name: strings.intern(&event_name),
        keywords,
        version,
        level,
        opcode,
        fields,
    }))
}

#[derive(Clone, Copy, PartialEq)]
pub(crate) enum FieldVersion {
    V1,
    V2,
}

fn decode_field_definitions(
    reader: &mut SequenceReader,
    version: FieldVersion,
    strings: &mut StringPool,
) -> Result<Option<Vec<EventFieldDefinition>>> {
    let start = reader.position();
    let count = require!(reader.try_i32());
    if !(0..=0xffff).contains(&count) {
        return Err(NettraceError::malformed(
            start,
            format!("implausible field count {count}"),
        ));
    }
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let code_pos = reader.position();
        let raw = require!(reader.try_i32());
        let type_code = TypeCode::from_wire(raw).ok_or_else(|| {
            NettraceError::malformed(code_pos, format!("unknown field type code {raw}"))
        })?;
        let array_element_type_code = if version == FieldVersion::V2 && type_code == TypeCode::Array
        {
            let raw = require!(reader.try_i32());
            Some(TypeCode::from_wire(raw).ok_or_else(|| {
                NettraceError::malformed(code_pos, format!("unknown array element type code {raw}"))
            })?)
        } else {
            None
        };
        let sub_fields = if type_code == TypeCode::Object {
            require!(decode_field_definitions(reader, version, strings)?)
        } else {
            Vec::new()
        };
        let name = strings.intern(&require!(reader.try_string_utf16_nul()?));
        fields.push(EventFieldDefinition {
            name,
            type_code,
            array_element_type_code,
            sub_fields,
        });
    }
    Ok(Some(fields))
}

/// Generic payload walker: field definitions in order, name → value.
pub(crate) fn decode_payload(
    reader: &mut SequenceReader,
    fields: &[EventFieldDefinition],
    strings: &mut StringPool,
) -> Result<Option<Payload>> {
    let mut payload = Payload::with_capacity(fields.len());
    for field in fields {
        let value = require!(decode_typed_value(reader, field.type_code, field, strings)?);
        payload.push(field.name.clone(), value);
    }
    Ok(Some(payload))
}

fn decode_typed_value(
    reader: &mut SequenceReader,
    type_code: TypeCode,
    field: &EventFieldDefinition,
    strings: &mut StringPool,
) -> Result<Option<PayloadValue>> {
    let pos = reader.position();
    Ok(Some(match type_code {
        TypeCode::Boolean => PayloadValue::Bool(require!(reader.try_i32()) != 0),
        TypeCode::SByte => PayloadValue::I8(require!(reader.try_u8()) as i8),
        TypeCode::Byte => PayloadValue::U8(require!(reader.try_u8())),
        TypeCode::Int16 => PayloadValue::I16(require!(reader.try_i16())),
        TypeCode::UInt16 => PayloadValue::U16(require!(reader.try_u16())),
        TypeCode::Int32 => PayloadValue::I32(require!(reader.try_i32())),
        TypeCode::UInt32 => PayloadValue::U32(require!(reader.try_u32())),
        TypeCode::Int64 => PayloadValue::I64(require!(reader.try_i64())),
        TypeCode::UInt64 => PayloadValue::U64(require!(reader.try_u64())),
        TypeCode::Single => PayloadValue::F32(require!(reader.try_f32())),
        TypeCode::Double => PayloadValue::F64(require!(reader.try_f64())),
        TypeCode::String => {
            PayloadValue::String(strings.intern(&require!(reader.try_string_utf16_nul()?)))
        }
        TypeCode::Guid => PayloadValue::Guid(require!(reader.try_guid())),
        TypeCode::Object => {
            PayloadValue::Object(require!(decode_payload(reader, &field.sub_fields, strings)?))
        }
        TypeCode::Array => {
            let element = field.array_element_type_code.ok_or_else(|| {
                NettraceError::malformed(pos, "array field without an element type code")
            })?;
            let count = require!(reader.try_i32());
            if count < 0 {
                return Err(NettraceError::malformed(
                    pos,
                    format!("negative array length {count}"),
                ));
            }
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(require!(decode_typed_value(reader, element, field, strings)?));
            }
            PayloadValue::Array(values)
        }
        other => {
            return Err(NettraceError::malformed(
                pos,
                format!("unsupported payload type code {other:?}"),
            ))
        }
    }))
}
