//!
//! MIME-like object-reference serialization and the `xoid://` URL scheme,
//! `spec.md §6` / `original_source/Obj.cpp::writeObjectRefs`/`objToUrl`.
//!
//! Pure (de)serialization over already-specified primitives (a database
//! UUID plus an oid list); no persistence surface of its own.
//!

use crate::cell::{self, Cell, Entry, FrameWriter, SlotKey};
use crate::error::UdbError;
use ruc::*;
use uuid::Uuid;

const SLOT_DB: &str = "db";
const SLOT_OID: &str = "oid";

/// Serialize a drag/drop or clipboard payload: the owning database's UUID
/// followed by every referenced oid, in order. Mirrors `writeObjectRefs`'s
/// leading db-uuid slot plus one slot per object.
pub fn serialize_object_refs(db_uuid: Uuid, oids: &[u32]) -> Vec<u8> {
    let mut w = FrameWriter::new();
    w.slot(SLOT_DB, &Cell::Uuid(db_uuid));
    for &oid in oids {
        w.slot(SLOT_OID, &Cell::Oid(oid));
    }
    w.into_bytes()
}

/// Parse a payload built by `serialize_object_refs`. Returns `None` if the
/// embedded db UUID doesn't match `local_db_uuid` — the original's "Objekte
/// leben in anderer Datenbank; kein Move möglich" guard.
pub fn deserialize_object_refs(bytes: &[u8], local_db_uuid: Uuid) -> Result<Option<Vec<u32>>> {
    let entries = cell::parse_entries(bytes).c(d!())?;
    let mut iter = entries.iter();
    let Some(Entry::Slot(SlotKey::Name(n), Cell::Uuid(u))) = iter.next() else {
        return Err(eg!(UdbError::AccessRecord));
    };
    if n != SLOT_DB || *u != local_db_uuid {
        return Ok(None);
    }
    let mut oids = Vec::new();
    for entry in iter {
        if let Entry::Slot(SlotKey::Name(n), Cell::Oid(oid)) = entry {
            if n == SLOT_OID {
                oids.push(*oid);
            }
        }
    }
    Ok(Some(oids))
}

/// `xoid:<oid>@<uuid>` with no query part — `Obj::oidToUrl`.
pub fn oid_to_xoid_url(oid: u32, db_uuid: Uuid) -> String {
    format!("xoid:{oid}@{db_uuid}")
}

/// `xoid:<oid>@<uuid>?k1=v1;k2=v2` — `Obj::objToUrl`. `query` pairs are
/// appended in order, `;`-separated, values written verbatim (the original
/// likewise does no percent-encoding for this internal clipboard format).
pub fn object_to_xoid_url(oid: u32, db_uuid: Uuid, query: &[(String, String)]) -> String {
    let mut url = oid_to_xoid_url(oid, db_uuid);
    if !query.is_empty() {
        url.push('?');
        let parts: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        url.push_str(&parts.join(";"));
    }
    url
}

/// Parse a url built by `oid_to_xoid_url`/`object_to_xoid_url`.
pub fn parse_xoid_url(url: &str) -> Result<(u32, Uuid, Vec<(String, String)>)> {
    let rest = url.strip_prefix("xoid:").ok_or_else(|| eg!(UdbError::AccessRecord))?;
    let (authority, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };
    let (oid_str, uuid_str) = authority.split_once('@').ok_or_else(|| eg!(UdbError::AccessRecord))?;
    let oid: u32 = oid_str.parse().map_err(|_| eg!(UdbError::AccessRecord))?;
    let db_uuid = Uuid::parse_str(uuid_str).map_err(|_| eg!(UdbError::AccessRecord))?;
    let mut items = Vec::new();
    if let Some(q) = query {
        for part in q.split(';') {
            if part.is_empty() {
                continue;
            }
            let (k, v) = part.split_once('=').ok_or_else(|| eg!(UdbError::AccessRecord))?;
            items.push((k.to_string(), v.to_string()));
        }
    }
    Ok((oid, db_uuid, items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xoid_url_round_trips_without_query() {
        let db = Uuid::new_v4();
        let url = oid_to_xoid_url(42, db);
        let (oid, parsed_db, items) = parse_xoid_url(&url).unwrap();
        assert_eq!(oid, 42);
        assert_eq!(parsed_db, db);
        assert!(items.is_empty());
    }

    #[test]
    fn xoid_url_round_trips_with_query() {
        let db = Uuid::new_v4();
        let url = object_to_xoid_url(7, db, &[("id".into(), "MO1425".into()), ("txt".into(), "hello".into())]);
        let (oid, parsed_db, items) = parse_xoid_url(&url).unwrap();
        assert_eq!(oid, 7);
        assert_eq!(parsed_db, db);
        assert_eq!(items, vec![("id".to_string(), "MO1425".to_string()), ("txt".to_string(), "hello".to_string())]);
    }

    #[test]
    fn object_refs_round_trip_for_matching_db() {
        let db = Uuid::new_v4();
        let bytes = serialize_object_refs(db, &[1, 2, 3]);
        let oids = deserialize_object_refs(&bytes, db).unwrap();
        assert_eq!(oids, Some(vec![1, 2, 3]));
    }

    #[test]
    fn object_refs_rejected_for_foreign_db() {
        let bytes = serialize_object_refs(Uuid::new_v4(), &[1]);
        let oids = deserialize_object_refs(&bytes, Uuid::new_v4()).unwrap();
        assert_eq!(oids, None);
    }
}
