//! Outer FastSerialization framing: magic, signature, tagged object
//! envelopes, end-of-stream marker.

use crate::reader::{require, SequenceReader};
use crate::{NettraceError, Result};

/// Highest `minReaderVersion` this parser accepts; objects demanding more
/// are forward-skipped.
pub const READER_VERSION: i32 = 4;

pub(crate) const TAG_NULL_REFERENCE: u8 = 1;
pub(crate) const TAG_BEGIN_PRIVATE_OBJECT: u8 = 5;
pub(crate) const TAG_END_OBJECT: u8 = 6;

const MAGIC: &[u8; 8] = b"Nettrace";
const SIGNATURE: &str = "!FastSerialization.1";

#[derive(Debug)]
pub(crate) struct ObjectType {
    pub(crate) name: String,
    #[allow(dead_code)]
    pub(crate) version: i32,
    pub(crate) min_reader_version: i32,
}

pub(crate) enum StreamItem {
    /// The terminating null-reference tag.
    End,
    Object(ObjectType),
}

/// Magic plus serializer signature, at the very start of the stream.
pub(crate) fn decode_stream_header(reader: &mut SequenceReader) -> Result<Option<()>> {
    let start = reader.position();
    let magic = require!(reader.try_bytes::<8>());
    if &magic != MAGIC {
        return Err(NettraceError::malformed(
            start,
            format!("bad magic {:02x?}, not a nettrace stream", magic),
        ));
    }
    let signature = require!(reader.try_string_ascii_prefixed()?);
    if signature != SIGNATURE {
        return Err(NettraceError::malformed(
            start + 8,
            format!("unexpected serializer signature {signature:?}"),
        ));
    }
    Ok(Some(()))
}

/// The next object envelope: begin tag plus the embedded serialization-type
/// record naming the block decoder, or the end-of-stream marker.
pub(crate) fn decode_object_header(reader: &mut SequenceReader) -> Result<Option<StreamItem>> {
    let start = reader.position();
    let tag = require!(reader.try_u8());
    match tag {
        TAG_NULL_REFERENCE => Ok(Some(StreamItem::End)),
        TAG_BEGIN_PRIVATE_OBJECT => {
            require!(expect_tag(reader, TAG_BEGIN_PRIVATE_OBJECT)?);
            require!(expect_tag(reader, TAG_NULL_REFERENCE)?);
            let version = require!(reader.try_i32());
            let min_reader_version = require!(reader.try_i32());
            let name = require!(reader.try_string_ascii_prefixed()?);
            require!(expect_tag(reader, TAG_END_OBJECT)?);
            Ok(Some(StreamItem::Object(ObjectType {
                name,
                version,
                min_reader_version,
            })))
        }
        other => Err(NettraceError::malformed(
            start,
            format!("unexpected tag {other} where an object was expected"),
        )),
    }
}

pub(crate) fn expect_tag(reader: &mut SequenceReader, expected: u8) -> Result<Option<()>> {
    let pos = reader.position();
    let tag = require!(reader.try_u8());
    if tag != expected {
        return Err(NettraceError::malformed(
            pos,
            format!("expected tag {expected}, found {tag}"),
        ));
    }
    Ok(Some(()))
}

/// Zero bytes needed to land `pos` on a 4-byte boundary.
pub(crate) fn align4_padding(pos: u64) -> usize {
    ((4 - (pos % 4)) % 4) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ByteWindow;
    use bytes::Bytes;

    fn header_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"Nettrace");
        buf.extend_from_slice(&20i32.to_le_bytes());
        buf.extend_from_slice(b"!FastSerialization.1");
        buf
    }

    #[test]
    fn test_stream_header() {
        let mut window = ByteWindow::new();
        window.push(Bytes::from(header_bytes()));
        let mut reader = window.reader();
        assert!(decode_stream_header(&mut reader).unwrap().is_some());
        assert_eq!(reader.position(), 32);
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let mut window = ByteWindow::new();
        window.push(Bytes::from_static(b"Nottrace........"));
        let mut reader = window.reader();
        assert!(matches!(
            decode_stream_header(&mut reader),
            Err(NettraceError::Malformed { position: 0, .. })
        ));
    }

    #[test]
    fn test_partial_header_restarts() {
        let mut window = ByteWindow::new();
        window.push(Bytes::from_static(b"Nettra"));
        let mut reader = window.reader();
        assert!(decode_stream_header(&mut reader).unwrap().is_none());
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_object_header() {
        let mut buf = vec![
            TAG_BEGIN_PRIVATE_OBJECT,
            TAG_BEGIN_PRIVATE_OBJECT,
            TAG_NULL_REFERENCE,
        ];
        buf.extend_from_slice(&4i32.to_le_bytes());
        buf.extend_from_slice(&4i32.to_le_bytes());
        buf.extend_from_slice(&5i32.to_le_bytes());
        buf.extend_from_slice(b"Trace");
        buf.push(TAG_END_OBJECT);

        let mut window = ByteWindow::new();
        window.push(Bytes::from(buf));
        let mut reader = window.reader();
        match decode_object_header(&mut reader).unwrap() {
            Some(StreamItem::Object(ty)) => {
                assert_eq!(ty.name, "Trace");
                assert_eq!(ty.min_reader_version, 4);
            }
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_end_of_stream_tag() {
        let mut window = ByteWindow::new();
        window.push(Bytes::from_static(&[TAG_NULL_REFERENCE]));
        let mut reader = window.reader();
        assert!(matches!(
            decode_object_header(&mut reader).unwrap(),
            Some(StreamItem::End)
        ));
    }

    #[test]
    fn test_unexpected_tag_is_fatal() {
        let mut window = ByteWindow::new();
        window.push(Bytes::from_static(&[9]));
        let mut reader = window.reader();
        assert!(decode_object_header(&mut reader).is_err());
    }

    #[test]
    fn test_align4() {
        assert_eq!(align4_padding(0), 0);
        assert_eq!(align4_padding(1), 3);
        assert_eq!(align4_padding(2), 2);
        assert_eq!(align4_padding(3), 1);
        assert_eq!(align4_padding(4), 0);
    }
}
