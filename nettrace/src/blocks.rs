//! Per-kind block body decoders, consuming the content inside a
//! size-prefixed envelope.

use trace_model::{TraceMetadata, TraceTime};

use crate::blob::{decode_blob, BlobState};
use crate::parser::ParseContext;
use crate::reader::{require, SequenceReader};
use crate::{NettraceError, Result};

const COMPRESSED_FLAG: i16 = 1;
const EVENT_BLOCK_HEADER_LEN: i16 = 20;

/// The `Trace` object body: no size field, no padding, first real object in
/// the stream.
pub(crate) fn decode_trace_body(reader: &mut SequenceReader) -> Result<Option<TraceMetadata>> {
    let start = reader.position();
    let year = require!(reader.try_i16()) as u16;
    let month = require!(reader.try_i16()) as u16;
    let _day_of_week = require!(reader.try_i16());
    let day = require!(reader.try_i16()) as u16;
    let hour = require!(reader.try_i16()) as u16;
    let minute = require!(reader.try_i16()) as u16;
    let second = require!(reader.try_i16()) as u16;
    let millisecond = require!(reader.try_i16()) as u16;
    let qpc_sync_time = require!(reader.try_i64());
    let qpc_frequency = require!(reader.try_i64());
    let pointer_size = require!(reader.try_i32());
    let process_id = require!(reader.try_i32());
    let number_of_processors = require!(reader.try_i32());
    let cpu_sampling_rate = require!(reader.try_i32());

    if qpc_frequency <= 0 {
        return Err(NettraceError::malformed(
            start,
            format!("qpc frequency must be positive, got {qpc_frequency}"),
        ));
    }
    if pointer_size != 4 && pointer_size != 8 {
        return Err(NettraceError::malformed(
            start,
            format!("unsupported pointer size {pointer_size}"),
        ));
    }

    Ok(Some(TraceMetadata {
        date: TraceTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond,
        },
        qpc_sync_time,
        qpc_frequency,
        pointer_size,
        process_id,
        number_of_processors,
        cpu_sampling_rate,
    }))
}

/// Stack block: `firstId`, `count`, then one address list per stack.
pub(crate) fn decode_stack_block_body(
    reader: &mut SequenceReader,
    ctx: &mut ParseContext,
) -> Result<Option<()>> {
    let start = reader.position();
    let first_id = require!(reader.try_i32());
    let count = require!(reader.try_i32());
    if first_id < 0 || count < 0 {
        return Err(NettraceError::malformed(
            start,
            format!("stack block with firstId {first_id}, count {count}"),
        ));
    }
    let pointer_size = ctx.require_trace(start)?.pointer_size;

    let mut stacks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let size_pos = reader.position();
        let stack_size = require!(reader.try_i32());
        if stack_size < 0 || stack_size % pointer_size != 0 {
            return Err(NettraceError::malformed(
                size_pos,
                format!("stack size {stack_size} is not a multiple of the pointer size"),
            ));
        }
        let depth = (stack_size / pointer_size) as usize;
        let mut addresses = Vec::with_capacity(depth);
        for _ in 0..depth {
            let address = if pointer_size == 8 {
                require!(reader.try_u64())
            } else {
                require!(reader.try_u32()) as u64
            };
            addresses.push(address);
        }
        stacks.push(addresses);
    }
    ctx.resolver.stacks.register_block(first_id as u32, stacks);
    Ok(Some(()))
}

/// Sequence point: per-thread sequence numbers are discarded, the side
/// effect is resetting the stack-id epoch.
pub(crate) fn decode_sequence_point_body(
    reader: &mut SequenceReader,
    ctx: &mut ParseContext,
) -> Result<Option<()>> {
    let start = reader.position();
    let _time_stamp = require!(reader.try_i64());
    let thread_count = require!(reader.try_i32());
    if thread_count < 0 {
        return Err(NettraceError::malformed(
            start,
            format!("negative thread count {thread_count}"),
        ));
    }
    for _ in 0..thread_count {
        let _thread_id = require!(reader.try_i64());
        let _sequence_number = require!(reader.try_i32());
    }
    ctx.resolver.stacks.sequence_point();
    Ok(Some(()))
}

/// Metadata and event blocks share this layout; blobs route themselves on
/// their metadata id, so the block name is not load-bearing.
pub(crate) fn decode_event_block_body(
    reader: &mut SequenceReader,
    body_end: u64,
    ctx: &mut ParseContext,
) -> Result<Option<()>> {
    let start = reader.position();
    let header_size = require!(reader.try_i16());
    let flags = require!(reader.try_i16());
    let _min_timestamp = require!(reader.try_i64());
    let _max_timestamp = require!(reader.try_i64());
    if header_size < EVENT_BLOCK_HEADER_LEN {
        return Err(NettraceError::malformed(
            start,
            format!("event block header of {header_size} bytes is too short"),
        ));
    }
    require!(reader.skip((header_size - EVENT_BLOCK_HEADER_LEN) as usize));

    if flags & COMPRESSED_FLAG == 0 {
        return Err(NettraceError::Unsupported {
            position: start,
            what: "uncompressed event blobs",
        });
    }

    let mut state = BlobState::default();
    while reader.position() < body_end {
        require!(decode_blob(reader, &mut state, ctx)?);
    }
    Ok(Some(()))
}
