//!
//! Error taxonomy, `spec.md §7`.
//!
//! `ruc` accepts any `Display + Debug + Send + Sync + 'static` type as an
//! error via its blanket `RucError` impl, so `UdbError` needs nothing more
//! than that to compose with `eg!`/`.c(d!())` the way the rest of the
//! workspace does.
//!

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UdbError {
    // Store/engine
    OpenDbFile,
    StartTrans,
    CommitTrans,
    AccessMeta,
    CreateBtCursor,
    CreateTable,
    RemoveTable,
    ClearTable,
    AccessCursor,

    // Schema
    DatabaseMeta,
    DatabaseFormat,
    DirectoryFormat,
    DuplicateAtom,
    IndexExists,

    // Object
    AccessDatabase,
    AccessRecord,
    RecordLocked(u32),
    RecordDeleted(u32),
    ReservedName(u32),
    OidOutOfRange,
    NotOpen,
}

impl fmt::Display for UdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UdbError::OpenDbFile => write!(f, "cannot open database file"),
            UdbError::StartTrans => write!(f, "cannot start store transaction"),
            UdbError::CommitTrans => write!(f, "cannot commit store transaction"),
            UdbError::AccessMeta => write!(f, "cannot access meta record"),
            UdbError::CreateBtCursor => write!(f, "cannot create btree cursor"),
            UdbError::CreateTable => write!(f, "cannot create table"),
            UdbError::RemoveTable => write!(f, "cannot remove table"),
            UdbError::ClearTable => write!(f, "cannot clear table"),
            UdbError::AccessCursor => write!(f, "cannot access cursor"),
            UdbError::DatabaseMeta => write!(f, "invalid database meta record"),
            UdbError::DatabaseFormat => write!(f, "unknown or missing database format"),
            UdbError::DirectoryFormat => write!(f, "invalid directory record"),
            UdbError::DuplicateAtom => write!(f, "atom already bound to a different name"),
            UdbError::IndexExists => write!(f, "index already exists"),
            UdbError::AccessDatabase => write!(f, "database is not open"),
            UdbError::AccessRecord => write!(f, "invalid cursor or oid"),
            UdbError::RecordLocked(oid) => write!(f, "record {oid} is locked by another transaction"),
            UdbError::RecordDeleted(oid) => write!(f, "record {oid} was erased in this transaction"),
            UdbError::ReservedName(atom) => write!(f, "atom {atom} is in the reserved range"),
            UdbError::OidOutOfRange => write!(f, "oid counter exhausted"),
            UdbError::NotOpen => write!(f, "transaction is not open"),
        }
    }
}

impl std::error::Error for UdbError {}
