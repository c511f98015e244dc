//! Synthetic `.nettrace` stream builder for the integration tests.

use bytes::Bytes;
use nettrace::TraceReader;
use trace_model::Trace;

/// Builds a stream from the magic onwards; byte offsets in `buf` are
/// absolute stream positions, which is what the block padding rule needs.
pub struct StreamBuilder {
    buf: Vec<u8>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"Nettrace");
        buf.extend_from_slice(&20i32.to_le_bytes());
        buf.extend_from_slice(b"!FastSerialization.1");
        StreamBuilder { buf }
    }

    fn object_type(&mut self, name: &str, version: i32, min_reader: i32) {
        self.buf.push(5); // begin object
        self.buf.push(5); // begin type
        self.buf.push(1); // null reference
        self.buf.extend_from_slice(&version.to_le_bytes());
        self.buf.extend_from_slice(&min_reader.to_le_bytes());
        self.buf.extend_from_slice(&(name.len() as i32).to_le_bytes());
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(6); // end type
    }

    /// A `Trace` object with a 1 GHz QPC clock synced at zero, so raw
    /// timestamps equal nanoseconds.
    pub fn trace_object(&mut self) {
        self.object_type("Trace", 4, 4);
        for component in [2024i16, 1, 1, 15, 12, 0, 0, 0] {
            self.buf.extend_from_slice(&component.to_le_bytes());
        }
        self.buf.extend_from_slice(&0i64.to_le_bytes()); // qpc sync time
        self.buf.extend_from_slice(&1_000_000_000i64.to_le_bytes()); // qpc frequency
        self.buf.extend_from_slice(&8i32.to_le_bytes()); // pointer size
        self.buf.extend_from_slice(&4242i32.to_le_bytes()); // process id
        self.buf.extend_from_slice(&8i32.to_le_bytes()); // processors
        self.buf.extend_from_slice(&1_000_000i32.to_le_bytes()); // sampling rate
        self.buf.push(6);
    }

    pub fn block(&mut self, name: &str, body: &[u8]) {
        self.block_versioned(name, 2, 2, body);
    }

    pub fn block_versioned(&mut self, name: &str, version: i32, min_reader: i32, body: &[u8]) {
        self.object_type(name, version, min_reader);
        self.buf.extend_from_slice(&(body.len() as i32).to_le_bytes());
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
        self.buf.extend_from_slice(body);
        self.buf.push(6);
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buf.push(1); // terminating null reference
        self.buf
    }
}

pub fn varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

pub fn utf16z(s: &str, out: &mut Vec<u8>) {
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
}

/// One compressed blob; `None` fields inherit from the previous blob.
#[derive(Default)]
pub struct Blob {
    pub metadata_id: Option<u32>,
    pub seq_capture_proc: Option<(u32, u64, u32)>,
    pub thread_id: Option<u64>,
    pub stack_id: Option<u32>,
    pub timestamp_delta: u64,
    pub activity_id: Option<[u8; 16]>,
    pub related_activity_id: Option<[u8; 16]>,
    pub payload: Option<Vec<u8>>,
}

impl Blob {
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut flags = 0u8;
        if self.metadata_id.is_some() {
            flags |= 1;
        }
        if self.seq_capture_proc.is_some() {
            flags |= 1 << 1;
        }
        if self.thread_id.is_some() {
            flags |= 1 << 2;
        }
        if self.stack_id.is_some() {
            flags |= 1 << 3;
        }
        if self.activity_id.is_some() {
            flags |= 1 << 4;
        }
        if self.related_activity_id.is_some() {
            flags |= 1 << 5;
        }
        if self.payload.is_some() {
            flags |= 1 << 7;
        }
        out.push(flags);

        if let Some(id) = self.metadata_id {
            varint(id as u64, out);
        }
        if let Some((seq_delta, capture_thread, processor)) = self.seq_capture_proc {
            varint(seq_delta as u64, out);
            varint(capture_thread, out);
            varint(processor as u64, out);
        }
        if let Some(thread_id) = self.thread_id {
            varint(thread_id, out);
        }
        if let Some(stack_id) = self.stack_id {
            varint(stack_id as u64, out);
        }
        varint(self.timestamp_delta, out);
        if let Some(guid) = self.activity_id {
            out.extend_from_slice(&guid);
        }
        if let Some(guid) = self.related_activity_id {
            out.extend_from_slice(&guid);
        }
        if let Some(payload) = &self.payload {
            varint(payload.len() as u64, out);
            out.extend_from_slice(payload);
        }
    }
}

/// Shared body layout of metadata and event blocks: 20-byte header with the
/// compressed flag set, then the given blobs.
pub fn event_block_body(blobs: &[Blob]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&20i16.to_le_bytes());
    body.extend_from_slice(&1i16.to_le_bytes());
    body.extend_from_slice(&0i64.to_le_bytes());
    body.extend_from_slice(&0i64.to_le_bytes());
    for blob in blobs {
        blob.encode(&mut body);
    }
    body
}

pub fn uncompressed_block_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&20i16.to_le_bytes());
    body.extend_from_slice(&0i16.to_le_bytes());
    body.extend_from_slice(&0i64.to_le_bytes());
    body.extend_from_slice(&0i64.to_le_bytes());
    body
}

/// A metadata-definition blob payload.
pub struct MetadataDef {
    pub id: i32,
    pub provider: &'static str,
    pub event_id: i32,
    pub name: &'static str,
    pub keywords: i64,
    pub version: i32,
    pub level: i32,
    pub fields: Vec<(&'static str, i32)>,
    pub opcode: Option<u8>,
    pub v2_fields: Option<Vec<(&'static str, i32)>>,
}

impl MetadataDef {
    pub fn new(id: i32, provider: &'static str, event_id: i32, name: &'static str) -> Self {
        MetadataDef {
            id,
            provider,
            event_id,
            name,
            keywords: 0,
            version: 1,
            level: 4,
            fields: Vec::new(),
            opcode: None,
            v2_fields: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.id.to_le_bytes());
        utf16z(self.provider, &mut out);
        out.extend_from_slice(&self.event_id.to_le_bytes());
        utf16z(self.name, &mut out);
        out.extend_from_slice(&self.keywords.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.level.to_le_bytes());
        encode_fields(&self.fields, &mut out);

        if let Some(opcode) = self.opcode {
            out.extend_from_slice(&1i32.to_le_bytes());
            out.push(1); // opcode tag
            out.push(opcode);
        }
        if let Some(fields) = &self.v2_fields {
            let mut body = Vec::new();
            encode_fields(fields, &mut body);
            out.extend_from_slice(&(body.len() as i32).to_le_bytes());
            out.push(2); // parameter payload tag
            out.extend_from_slice(&body);
        }
        out
    }
}

fn encode_fields(fields: &[(&str, i32)], out: &mut Vec<u8>) {
    out.extend_from_slice(&(fields.len() as i32).to_le_bytes());
    for (name, type_code) in fields {
        out.extend_from_slice(&type_code.to_le_bytes());
        utf16z(name, out);
    }
}

pub fn stack_block_body(first_id: i32, stacks: &[&[u64]]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&first_id.to_le_bytes());
    body.extend_from_slice(&(stacks.len() as i32).to_le_bytes());
    for stack in stacks {
        body.extend_from_slice(&((stack.len() * 8) as i32).to_le_bytes());
        for address in *stack {
            body.extend_from_slice(&address.to_le_bytes());
        }
    }
    body
}

pub fn sequence_point_body(threads: &[(i64, i32)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0i64.to_le_bytes());
    body.extend_from_slice(&(threads.len() as i32).to_le_bytes());
    for (thread_id, sequence_number) in threads {
        body.extend_from_slice(&thread_id.to_le_bytes());
        body.extend_from_slice(&sequence_number.to_le_bytes());
    }
    body
}

pub fn i32s(values: &[i32]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn parse(bytes: &[u8]) -> nettrace::Result<Trace> {
    nettrace::read_stream(std::io::Cursor::new(bytes.to_vec()))
}

/// Feed the stream in fixed-size chunks to exercise the restart path.
pub fn parse_chunked(bytes: &[u8], chunk_size: usize) -> nettrace::Result<Trace> {
    let mut reader = TraceReader::new();
    for chunk in bytes.chunks(chunk_size) {
        reader.feed(Bytes::copy_from_slice(chunk))?;
    }
    reader.finish()
}
