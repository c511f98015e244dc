//! Drive loop: byte window in, finished [`Trace`] out.
//!
//! Decoding commits one whole object at a time. A step that runs out of
//! bytes rolls back to the object boundary and reports "need more", so side
//! effects (metadata registration, event append, stack registration) happen
//! exactly once however the input is chunked.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use symbolizer::{StackResolver, StringPool};
use trace_model::{Event, EventMetadata, Trace, TraceMetadata};

use crate::blocks::{
    decode_event_block_body, decode_sequence_point_body, decode_stack_block_body,
    decode_trace_body,
};
use crate::container::{
    align4_padding, decode_object_header, decode_stream_header, expect_tag, ObjectType,
    StreamItem, READER_VERSION, TAG_END_OBJECT,
};
use crate::reader::{require, ByteWindow, SequenceReader};
use crate::{NettraceError, Result};

const PIPE_CAPACITY: usize = 4 << 20;

/// Snapshot passed to the progress sink after every committed object.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    /// Bytes fully decoded and discarded from the window.
    pub bytes_read: u64,
    /// Events appended so far.
    pub events_read: usize,
}

pub(crate) struct ParseContext {
    pub(crate) trace: Option<TraceMetadata>,
    pub(crate) metadata: HashMap<u32, Arc<EventMetadata>>,
    pub(crate) events: Vec<Event>,
    pub(crate) resolver: StackResolver,
    pub(crate) strings: StringPool,
}

impl ParseContext {
    pub(crate) fn require_trace(&self, position: u64) -> Result<&TraceMetadata> {
        self.trace
            .as_ref()
            .ok_or_else(|| NettraceError::malformed(position, "object appears before the Trace object"))
    }
}

enum DecodeState {
    Header,
    Objects,
    Done,
}

/// Incremental push parser for a `.nettrace` stream.
pub struct TraceReader {
    window: ByteWindow,
    state: DecodeState,
    ctx: ParseContext,
    progress: Option<Box<dyn FnMut(Progress) + Send>>,
}

impl TraceReader {
    pub fn new() -> Self {
        TraceReader {
            window: ByteWindow::new(),
            state: DecodeState::Header,
            ctx: ParseContext {
                trace: None,
                metadata: HashMap::new(),
                events: Vec::new(),
                resolver: StackResolver::new(),
                strings: StringPool::new(),
            },
            progress: None,
        }
    }

    /// Install a progress sink, invoked after every committed object.
    pub fn with_progress(mut self, sink: impl FnMut(Progress) + Send + 'static) -> Self {
        self.progress = Some(Box::new(sink));
        self
    }

    /// Append a chunk and decode as far as the buffered bytes allow.
    pub fn feed(&mut self, chunk: Bytes) -> Result<()> {
        self.window.push(chunk);
        self.advance()
    }

    /// Declare end of input and assemble the trace.
    ///
    /// Fails with [`NettraceError::Truncated`] if the terminating
    /// null-reference tag has not been seen.
    pub fn finish(mut self) -> Result<Trace> {
        self.advance()?;
        if !matches!(self.state, DecodeState::Done) {
            return Err(NettraceError::Truncated {
                position: self.window.end_pos(),
            });
        }
        let ParseContext {
            trace,
            metadata,
            mut events,
            mut resolver,
            ..
        } = self.ctx;
        let trace_metadata = trace
            .ok_or_else(|| NettraceError::malformed(0, "stream contains no Trace object"))?;

        // stable: ties keep stream order, so a stop never precedes its start
        events.sort_by_key(|event| event.time_stamp_ns);
        for event in &mut events {
            if event.stack_index != 0 {
                event.stack = resolver.resolve(event.stack_index);
            }
        }

        let mut event_metadata: Vec<_> = metadata.into_values().collect();
        event_metadata.sort_by_key(|m| m.metadata_id);

        tracing::debug!(
            events = events.len(),
            metadata = event_metadata.len(),
            "trace assembled"
        );
        Ok(Trace {
            metadata: trace_metadata,
            event_metadata,
            events,
        })
    }

    /// Pump `source` through a [`bytepipe`] producer thread and parse to
    /// completion.
    pub fn read_from<R>(mut self, source: R) -> Result<Trace>
    where
        R: io::Read + Send + 'static,
    {
        let (producer, mut consumer) = bytepipe::channel(PIPE_CAPACITY);
        let _source_thread = bytepipe::spawn_reader(producer, source);
        loop {
            match consumer.recv() {
                Ok(Some(chunk)) => self.feed(chunk)?,
                Ok(None) => break,
                Err(bytepipe::PipeError::Source(e)) => return Err(NettraceError::Io(e)),
                Err(bytepipe::PipeError::Closed) => break,
            }
        }
        self.finish()
    }

    fn advance(&mut self) -> Result<()> {
        loop {
            if matches!(self.state, DecodeState::Done) {
                return Ok(());
            }
            match step(&self.window, &mut self.state, &mut self.ctx)? {
                Some(end_pos) => {
                    let consumed = (end_pos - self.window.start_pos()) as usize;
                    self.window.consume(consumed);
                    if let Some(sink) = self.progress.as_mut() {
                        sink(Progress {
                            bytes_read: self.window.start_pos(),
                            events_read: self.ctx.events.len(),
                        });
                    }
                }
                None => return Ok(()),
            }
        }
    }
}

impl Default for TraceReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a whole stream from any reader.
pub fn read_stream<R>(source: R) -> Result<Trace>
where
    R: io::Read + Send + 'static,
{
    TraceReader::new().read_from(source)
}

/// Parse a `.nettrace` file.
pub fn read_file(path: impl AsRef<Path>) -> Result<Trace> {
    read_stream(File::open(path)?)
}

/// Decode at most one object; `Some(end)` commits everything up to `end`.
fn step(
    window: &ByteWindow,
    state: &mut DecodeState,
    ctx: &mut ParseContext,
) -> Result<Option<u64>> {
    let mut reader = window.reader();
    match state {
        DecodeState::Header => {
            if decode_stream_header(&mut reader)?.is_none() {
                return Ok(None);
            }
            *state = DecodeState::Objects;
            Ok(Some(reader.position()))
        }
        DecodeState::Objects => {
            let item = match decode_object_header(&mut reader)? {
                Some(item) => item,
                None => return Ok(None),
            };
            match item {
                StreamItem::End => {
                    *state = DecodeState::Done;
                    Ok(Some(reader.position()))
                }
                StreamItem::Object(ty) => {
                    match decode_object_body(window, &mut reader, &ty, ctx)? {
                        Some(()) => Ok(Some(reader.position())),
                        None => Ok(None),
                    }
                }
            }
        }
        DecodeState::Done => Ok(None),
    }
}

fn decode_object_body(
    window: &ByteWindow,
    reader: &mut SequenceReader,
    ty: &ObjectType,
    ctx: &mut ParseContext,
) -> Result<Option<()>> {
    if ty.name == "Trace" {
        if ctx.trace.is_some() {
            return Err(NettraceError::malformed(
                reader.position(),
                "duplicate Trace object",
            ));
        }
        let metadata = require!(decode_trace_body(reader)?);
        require!(expect_tag(reader, TAG_END_OBJECT)?);
        tracing::debug!(
            process_id = metadata.process_id,
            pointer_size = metadata.pointer_size,
            qpc_frequency = metadata.qpc_frequency,
            "trace session header"
        );
        ctx.trace = Some(metadata);
        return Ok(Some(()));
    }

    ctx.require_trace(reader.position())?;

    let size_pos = reader.position();
    let block_size = require!(reader.try_i32());
    if block_size < 0 {
        return Err(NettraceError::malformed(
            size_pos,
            format!("negative block size {block_size}"),
        ));
    }
    let padding = align4_padding(reader.position());

    // the body and its end tag must be fully buffered before any
    // side-effecting decode, so a rolled-back step never replays effects
    let envelope_end = reader.position() + padding as u64 + block_size as u64;
    if window.end_pos() < envelope_end + 1 {
        return Ok(None);
    }

    let pad = require!(reader.try_raw(padding));
    if pad.iter().any(|&byte| byte != 0) {
        tracing::debug!(position = size_pos, "non-zero padding before block body");
    }
    let body_end = reader.position() + block_size as u64;

    if ty.min_reader_version > READER_VERSION {
        tracing::debug!(
            name = %ty.name,
            min_reader_version = ty.min_reader_version,
            "forward-compatible skip"
        );
        require!(reader.skip(block_size as usize));
    } else {
        let decoded = match ty.name.as_str() {
            "StackBlock" => decode_stack_block_body(reader, ctx)?,
            "MetadataBlock" | "EventBlock" => decode_event_block_body(reader, body_end, ctx)?,
            "SPBlock" => decode_sequence_point_body(reader, ctx)?,
            other => {
                tracing::debug!(name = other, "skipping unknown block");
                reader.skip(block_size as usize)
            }
        };
        if decoded.is_none() {
            // the envelope is fully buffered; running dry means the body
            // overran its declared size
            return Err(NettraceError::malformed(
                reader.position(),
                format!("block `{}` overran its declared size", ty.name),
            ));
        }
    }

    if reader.position() != body_end {
        return Err(NettraceError::malformed(
            reader.position(),
            format!(
                "block `{}` body ended at offset {}, expected {}",
                ty.name,
                reader.position(),
                body_end
            ),
        ));
    }
    require!(expect_tag(reader, TAG_END_OBJECT)?);
    Ok(Some(()))
}
