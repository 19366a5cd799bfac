//!
//! `Cell` — the tagged, self-delimiting value codec of `spec.md §6`.
//!
//! Every cell serializes to a leading one-byte type tag followed by a
//! payload whose own length is always recoverable (fixed-width for
//! scalars, a 4-byte big-endian length prefix for variable-length text and
//! blobs), so cells concatenate safely inside composite keys without any
//! outer framing. Fixed-width numeric payloads are big-endian with the
//! sign bit flipped for signed types, so two cells of the same tag compare
//! in value order under plain byte comparison — this is what lets OBJ,
//! QUE and the counter rows use `encode(x)` directly as an ordered key.
//!

use crate::error::UdbError;
use ruc::*;
use time::OffsetDateTime;
use uuid::Uuid;

pub const TAG_NULL: u8 = 0;
pub const TAG_BOOL: u8 = 1;
pub const TAG_UINT8: u8 = 2;
pub const TAG_UINT32: u8 = 3;
pub const TAG_INT32: u8 = 4;
pub const TAG_OID: u8 = 5;
pub const TAG_ATOM: u8 = 6;
pub const TAG_ID32: u8 = 7;
pub const TAG_UUID: u8 = 8;
pub const TAG_DATETIME: u8 = 9;
pub const TAG_LATIN1: u8 = 10;
pub const TAG_ASCII: u8 = 11;
pub const TAG_STRING: u8 = 12;
pub const TAG_HTML: u8 = 13;
pub const TAG_BML: u8 = 14;
pub const TAG_TAG: u8 = 15;
pub const TAG_LOB: u8 = 16;

/// One typed, self-delimiting value.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    UInt8(u8),
    UInt32(u32),
    Int32(i32),
    Oid(u32),
    Atom(u32),
    Id32(u32),
    Uuid(Uuid),
    DateTime(OffsetDateTime),
    Latin1(Vec<u8>),
    Ascii(Vec<u8>),
    String(String),
    Html(String),
    Bml(Vec<u8>),
    Tag([u8; 4]),
    Lob(Vec<u8>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Effective type tag an index field is grouped by: every text variant
    /// collapses to `TAG_STRING` so string-typed fields of different
    /// underlying cell kinds still sort together (`spec.md §4.3`).
    pub fn index_tag(&self) -> u8 {
        match self {
            Cell::Latin1(_) | Cell::Ascii(_) | Cell::String(_) | Cell::Html(_) => TAG_STRING,
            c => c.type_tag(),
        }
    }

    pub fn type_tag(&self) -> u8 {
        match self {
            Cell::Null => TAG_NULL,
            Cell::Bool(_) => TAG_BOOL,
            Cell::UInt8(_) => TAG_UINT8,
            Cell::UInt32(_) => TAG_UINT32,
            Cell::Int32(_) => TAG_INT32,
            Cell::Oid(_) => TAG_OID,
            Cell::Atom(_) => TAG_ATOM,
            Cell::Id32(_) => TAG_ID32,
            Cell::Uuid(_) => TAG_UUID,
            Cell::DateTime(_) => TAG_DATETIME,
            Cell::Latin1(_) => TAG_LATIN1,
            Cell::Ascii(_) => TAG_ASCII,
            Cell::String(_) => TAG_STRING,
            Cell::Html(_) => TAG_HTML,
            Cell::Bml(_) => TAG_BML,
            Cell::Tag(_) => TAG_TAG,
            Cell::Lob(_) => TAG_LOB,
        }
    }

    /// Tag byte followed by the self-delimiting payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.type_tag()];
        self.write_payload(&mut out);
        out
    }

    /// Raw payload only, no leading type tag (`spec.md §4.3`: "for
    /// non-string cells, emit the cell's payload without the type tag").
    pub fn write_cell(&self, without_type: bool, out: &mut Vec<u8>) {
        if !without_type {
            out.push(self.type_tag());
        }
        self.write_payload(out);
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            Cell::Null => {}
            Cell::Bool(b) => out.push(*b as u8),
            Cell::UInt8(v) => out.push(*v),
            Cell::UInt32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Cell::Int32(v) => out.extend_from_slice(&((*v as u32) ^ 0x8000_0000).to_be_bytes()),
            Cell::Oid(v) | Cell::Atom(v) | Cell::Id32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Cell::Uuid(u) => out.extend_from_slice(u.as_bytes()),
            Cell::DateTime(dt) => {
                let secs = dt.unix_timestamp();
                let nanos = dt.nanosecond();
                out.extend_from_slice(&((secs as u64) ^ 0x8000_0000_0000_0000).to_be_bytes());
                out.extend_from_slice(&nanos.to_be_bytes());
            }
            Cell::Latin1(b) | Cell::Ascii(b) | Cell::Bml(b) | Cell::Lob(b) => {
                out.extend_from_slice(&(b.len() as u32).to_be_bytes());
                out.extend_from_slice(b);
            }
            Cell::String(s) | Cell::Html(s) => {
                let b = s.as_bytes();
                out.extend_from_slice(&(b.len() as u32).to_be_bytes());
                out.extend_from_slice(b);
            }
            Cell::Tag(t) => out.extend_from_slice(t),
        }
    }

    /// Decode one cell from the front of `buf`, returning the remaining
    /// bytes so callers can chain decodes over a concatenated key/stream.
    pub fn decode(buf: &[u8]) -> Result<(Cell, &[u8])> {
        let (tag, rest) = take(buf, 1)?;
        let rest = match tag[0] {
            TAG_NULL => return Ok((Cell::Null, rest)),
            TAG_BOOL => {
                let (b, rest) = take(rest, 1)?;
                return Ok((Cell::Bool(b[0] != 0), rest));
            }
            TAG_UINT8 => {
                let (b, rest) = take(rest, 1)?;
                return Ok((Cell::UInt8(b[0]), rest));
            }
            TAG_UINT32 => {
                let (b, rest) = take(rest, 4)?;
                return Ok((Cell::UInt32(be_u32(b)), rest));
            }
            TAG_INT32 => {
                let (b, rest) = take(rest, 4)?;
                return Ok((Cell::Int32((be_u32(b) ^ 0x8000_0000) as i32), rest));
            }
            TAG_OID => {
                let (b, rest) = take(rest, 4)?;
                return Ok((Cell::Oid(be_u32(b)), rest));
            }
            TAG_ATOM => {
                let (b, rest) = take(rest, 4)?;
                return Ok((Cell::Atom(be_u32(b)), rest));
            }
            TAG_ID32 => {
                let (b, rest) = take(rest, 4)?;
                return Ok((Cell::Id32(be_u32(b)), rest));
            }
            TAG_UUID => {
                let (b, rest) = take(rest, 16)?;
                let arr: [u8; 16] = b.try_into().map_err(|_| eg!(UdbError::AccessRecord))?;
                return Ok((Cell::Uuid(Uuid::from_bytes(arr)), rest));
            }
            TAG_DATETIME => {
                let (sb, rest) = take(rest, 8)?;
                let (nb, rest) = take(rest, 4)?;
                let secs_bits = u64::from_be_bytes(sb.try_into().map_err(|_| eg!(UdbError::AccessRecord))?);
                let secs = (secs_bits ^ 0x8000_0000_0000_0000) as i64;
                let nanos = u32::from_be_bytes(nb.try_into().map_err(|_| eg!(UdbError::AccessRecord))?);
                let dt = OffsetDateTime::from_unix_timestamp(secs)
                    .map_err(|_| eg!(UdbError::AccessRecord))?
                    + time::Duration::nanoseconds(nanos as i64);
                return Ok((Cell::DateTime(dt), rest));
            }
            TAG_LATIN1 => {
                let (b, rest) = take_sized(rest)?;
                return Ok((Cell::Latin1(b.to_vec()), rest));
            }
            TAG_ASCII => {
                let (b, rest) = take_sized(rest)?;
                return Ok((Cell::Ascii(b.to_vec()), rest));
            }
            TAG_STRING => {
                let (b, rest) = take_sized(rest)?;
                let s = String::from_utf8(b.to_vec()).map_err(|_| eg!(UdbError::AccessRecord))?;
                return Ok((Cell::String(s), rest));
            }
            TAG_HTML => {
                let (b, rest) = take_sized(rest)?;
                let s = String::from_utf8(b.to_vec()).map_err(|_| eg!(UdbError::AccessRecord))?;
                return Ok((Cell::Html(s), rest));
            }
            TAG_BML => {
                let (b, rest) = take_sized(rest)?;
                return Ok((Cell::Bml(b.to_vec()), rest));
            }
            TAG_TAG => {
                let (b, rest) = take(rest, 4)?;
                let arr: [u8; 4] = b.try_into().map_err(|_| eg!(UdbError::AccessRecord))?;
                return Ok((Cell::Tag(arr), rest));
            }
            TAG_LOB => {
                let (b, rest) = take_sized(rest)?;
                return Ok((Cell::Lob(b.to_vec()), rest));
            }
            _ => return Err(eg!(UdbError::AccessRecord)),
        };
        #[allow(unreachable_code)]
        Ok((Cell::Null, rest))
    }
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes(b.try_into().unwrap())
}

fn take(buf: &[u8], n: usize) -> Result<(&[u8], &[u8])> {
    if buf.len() < n {
        return Err(eg!(UdbError::AccessRecord));
    }
    Ok(buf.split_at(n))
}

fn take_sized(buf: &[u8]) -> Result<(&[u8], &[u8])> {
    let (lb, rest) = take(buf, 4)?;
    let len = be_u32(lb) as usize;
    take(rest, len)
}

// ---------------------------------------------------------------------
// Framed slot streams (BeginFrame/Slot/EndFrame), `spec.md §6`. Used by
// the persisted meta record, index-meta serialization, and the MIME-like
// object-reference format.
// ---------------------------------------------------------------------

const MARK_SLOT: u8 = 0xF1;
const MARK_BEGIN_FRAME: u8 = 0xF0;
const MARK_END_FRAME: u8 = 0xF2;
const KEYKIND_NAME: u8 = 0;
const KEYKIND_TAG: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotKey {
    Name(String),
    Tag([u8; 4]),
}

impl SlotKey {
    pub fn as_name(&self) -> Option<&str> {
        match self {
            SlotKey::Name(s) => Some(s),
            SlotKey::Tag(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    Slot(SlotKey, Cell),
    Frame(SlotKey, Vec<Entry>),
}

/// Find a top-level slot's cell by Latin-1 name.
pub fn find_slot<'a>(entries: &'a [Entry], name: &str) -> Option<&'a Cell> {
    entries.iter().find_map(|e| match e {
        Entry::Slot(SlotKey::Name(n), c) if n == name => Some(c),
        _ => None,
    })
}

/// Every top-level frame named `name`, in stream order.
pub fn find_frames<'a>(entries: &'a [Entry], name: &str) -> Vec<&'a [Entry]> {
    entries
        .iter()
        .filter_map(|e| match e {
            Entry::Frame(SlotKey::Name(n), body) if n == name => Some(body.as_slice()),
            _ => None,
        })
        .collect()
}

#[derive(Default)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        FrameWriter::default()
    }

    pub fn slot(&mut self, name: &str, cell: &Cell) -> &mut Self {
        self.buf.push(MARK_SLOT);
        self.write_key(&SlotKey::Name(name.to_string()));
        self.buf.extend(cell.encode());
        self
    }

    pub fn slot_tag(&mut self, tag: [u8; 4], cell: &Cell) -> &mut Self {
        self.buf.push(MARK_SLOT);
        self.write_key(&SlotKey::Tag(tag));
        self.buf.extend(cell.encode());
        self
    }

    pub fn begin_frame(&mut self, name: &str) -> &mut Self {
        self.buf.push(MARK_BEGIN_FRAME);
        self.write_key(&SlotKey::Name(name.to_string()));
        self
    }

    pub fn end_frame(&mut self) -> &mut Self {
        self.buf.push(MARK_END_FRAME);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_key(&mut self, key: &SlotKey) {
        match key {
            SlotKey::Name(s) => {
                self.buf.push(KEYKIND_NAME);
                let b = s.as_bytes();
                self.buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
                self.buf.extend_from_slice(b);
            }
            SlotKey::Tag(t) => {
                self.buf.push(KEYKIND_TAG);
                self.buf.extend_from_slice(t);
            }
        }
    }
}

/// Parse a whole top-level stream (no enclosing frame) into entries.
pub fn parse_entries(mut buf: &[u8]) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let (mark, rest) = take(buf, 1)?;
        buf = match mark[0] {
            MARK_SLOT => {
                let (key, rest) = read_key(rest)?;
                let (cell, rest) = Cell::decode(rest).c(d!())?;
                out.push(Entry::Slot(key, cell));
                rest
            }
            MARK_BEGIN_FRAME => {
                let (key, rest) = read_key(rest)?;
                let (children, rest) = parse_frame_body(rest)?;
                out.push(Entry::Frame(key, children));
                rest
            }
            _ => return Err(eg!(UdbError::AccessRecord)),
        };
    }
    Ok(out)
}

fn parse_frame_body(mut buf: &[u8]) -> Result<(Vec<Entry>, &[u8])> {
    let mut out = Vec::new();
    loop {
        let (mark, rest) = take(buf, 1)?;
        if mark[0] == MARK_END_FRAME {
            return Ok((out, rest));
        }
        buf = match mark[0] {
            MARK_SLOT => {
                let (key, rest) = read_key(rest)?;
                let (cell, rest) = Cell::decode(rest).c(d!())?;
                out.push(Entry::Slot(key, cell));
                rest
            }
            MARK_BEGIN_FRAME => {
                let (key, rest) = read_key(rest)?;
                let (children, rest) = parse_frame_body(rest)?;
                out.push(Entry::Frame(key, children));
                rest
            }
            _ => return Err(eg!(UdbError::AccessRecord)),
        };
    }
}

fn read_key(buf: &[u8]) -> Result<(SlotKey, &[u8])> {
    let (kind, rest) = take(buf, 1)?;
    match kind[0] {
        KEYKIND_NAME => {
            let (b, rest) = take_sized(rest)?;
            let s = String::from_utf8(b.to_vec()).map_err(|_| eg!(UdbError::AccessRecord))?;
            Ok((SlotKey::Name(s), rest))
        }
        KEYKIND_TAG => {
            let (b, rest) = take(rest, 4)?;
            let arr: [u8; 4] = b.try_into().map_err(|_| eg!(UdbError::AccessRecord))?;
            Ok((SlotKey::Tag(arr), rest))
        }
        _ => Err(eg!(UdbError::AccessRecord)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        for c in [
            Cell::Null,
            Cell::Bool(true),
            Cell::UInt8(7),
            Cell::UInt32(1234),
            Cell::Int32(-99),
            Cell::Oid(42),
            Cell::Atom(42),
            Cell::Id32(3),
            Cell::Uuid(Uuid::from_u128(0x1234_5678)),
            Cell::Latin1(b"hello".to_vec()),
            Cell::Ascii(b"world".to_vec()),
            Cell::String("unicode \u{1F600}".to_string()),
            Cell::Html("<b>x</b>".to_string()),
            Cell::Bml(vec![1, 2, 3]),
            Cell::Tag(*b"TAG1"),
            Cell::Lob(vec![9; 20]),
        ] {
            let enc = c.encode();
            let (dec, rest) = Cell::decode(&enc).unwrap();
            assert!(rest.is_empty());
            assert_eq!(dec, c);
        }
    }

    #[test]
    fn int32_ordering_matches_byte_ordering() {
        let a = Cell::Int32(-5).encode();
        let b = Cell::Int32(3).encode();
        assert!(a < b);
    }

    #[test]
    fn concatenated_cells_are_self_delimiting() {
        let mut buf = Vec::new();
        buf.extend(Cell::Oid(7).encode());
        buf.extend(Cell::String("abc".into()).encode());
        let (c1, rest) = Cell::decode(&buf).unwrap();
        assert_eq!(c1, Cell::Oid(7));
        let (c2, rest) = Cell::decode(rest).unwrap();
        assert_eq!(c2, Cell::String("abc".into()));
        assert!(rest.is_empty());
    }

    #[test]
    fn frame_round_trip() {
        let mut w = FrameWriter::new();
        w.slot("kind", &Cell::UInt8(1));
        w.begin_frame("item");
        w.slot("atom", &Cell::Atom(5));
        w.slot("nc", &Cell::Bool(true));
        w.end_frame();
        let bytes = w.into_bytes();

        let entries = parse_entries(&bytes).unwrap();
        assert_eq!(find_slot(&entries, "kind"), Some(&Cell::UInt8(1)));
        let items = find_frames(&entries, "item");
        assert_eq!(items.len(), 1);
        assert_eq!(find_slot(items[0], "atom"), Some(&Cell::Atom(5)));
    }
}
