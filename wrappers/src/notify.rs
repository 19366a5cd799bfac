//!
//! `UpdateInfo` notifications, `spec.md §4.4` / `original_source/UpdateInfo.h`.
//!
//! Sixteen kinds, carrying whichever of `id`/`parent`/`name`/`name2`/
//! `before`/`key` apply to that kind — mirrors the teacher's own single
//! flat struct rather than sixteen event types, since downstream observers
//! match on `kind` anyway.
//!

use crate::cell::Cell;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    ObjectCreated,
    ValueChanged,
    TypeChanged,
    Aggregated,
    Deaggregated,
    ObjectErased,
    QueueAdded,
    QueueChanged,
    QueueErased,
    MapChanged,
    OixChanged,
    DbClosing,
    PreCommit,
    PreRollback,
    Commit,
    Rollback,
}

/// One notification. Field meaning depends on `kind` (see `UpdateInfo.h`'s
/// per-variant comments, reproduced on the `Kind` variants documented by
/// the constructors below).
#[derive(Clone, Debug)]
pub struct UpdateInfo {
    pub kind: Kind,
    pub id: u32,
    pub parent_or_name: u32,
    pub before_or_name2: u32,
    pub key: Vec<Cell>,
}

impl UpdateInfo {
    pub fn object_created(oid: u32, type_atom: u32) -> Self {
        UpdateInfo { kind: Kind::ObjectCreated, id: oid, parent_or_name: type_atom, before_or_name2: 0, key: Vec::new() }
    }

    pub fn value_changed(oid: u32, field_atom: u32) -> Self {
        UpdateInfo { kind: Kind::ValueChanged, id: oid, parent_or_name: field_atom, before_or_name2: 0, key: Vec::new() }
    }

    pub fn type_changed(oid: u32, new_type: u32, old_type: u32) -> Self {
        UpdateInfo { kind: Kind::TypeChanged, id: oid, parent_or_name: new_type, before_or_name2: old_type, key: Vec::new() }
    }

    pub fn aggregated(parent: u32, oid: u32, before: u32) -> Self {
        UpdateInfo { kind: Kind::Aggregated, id: parent, parent_or_name: oid, before_or_name2: before, key: Vec::new() }
    }

    pub fn deaggregated(parent: u32, oid: u32, type_atom: u32) -> Self {
        UpdateInfo { kind: Kind::Deaggregated, id: parent, parent_or_name: oid, before_or_name2: type_atom, key: Vec::new() }
    }

    pub fn object_erased(oid: u32, type_atom: u32) -> Self {
        UpdateInfo { kind: Kind::ObjectErased, id: oid, parent_or_name: type_atom, before_or_name2: 0, key: Vec::new() }
    }

    pub fn queue_added(nr: u32, oid: u32) -> Self {
        UpdateInfo { kind: Kind::QueueAdded, id: nr, parent_or_name: oid, before_or_name2: 0, key: Vec::new() }
    }

    pub fn queue_changed(nr: u32, oid: u32) -> Self {
        UpdateInfo { kind: Kind::QueueChanged, id: nr, parent_or_name: oid, before_or_name2: 0, key: Vec::new() }
    }

    pub fn queue_erased(nr: u32, oid: u32) -> Self {
        UpdateInfo { kind: Kind::QueueErased, id: nr, parent_or_name: oid, before_or_name2: 0, key: Vec::new() }
    }

    pub fn map_changed(oid: u32, key: Vec<Cell>) -> Self {
        UpdateInfo { kind: Kind::MapChanged, id: oid, parent_or_name: 0, before_or_name2: 0, key }
    }

    pub fn oix_changed(oid: u32, key: Vec<Cell>) -> Self {
        UpdateInfo { kind: Kind::OixChanged, id: oid, parent_or_name: 0, before_or_name2: 0, key }
    }

    pub fn lifecycle(kind: Kind) -> Self {
        debug_assert!(matches!(
            kind,
            Kind::DbClosing | Kind::PreCommit | Kind::PreRollback | Kind::Commit | Kind::Rollback
        ));
        UpdateInfo { kind, id: 0, parent_or_name: 0, before_or_name2: 0, key: Vec::new() }
    }
}

/// An observer gets every notification posted by a transaction it is
/// subscribed to. Split the way `original_source/Transaction.h` splits
/// `addObserver` (per-event synchronous callbacks) from `addCallback`
/// (a decoupled channel, drained by the subscriber at its own pace).
pub trait Observer: Send + Sync {
    fn on_update(&self, info: &UpdateInfo);
}

pub struct Hub {
    observers: parking_lot::Mutex<Vec<Box<dyn Observer>>>,
    channel: Option<std::sync::mpsc::Sender<UpdateInfo>>,
}

impl Default for Hub {
    fn default() -> Self {
        Hub { observers: parking_lot::Mutex::new(Vec::new()), channel: None }
    }
}

impl Hub {
    pub fn new() -> Self {
        Hub::default()
    }

    pub fn subscribe(&self, observer: Box<dyn Observer>) {
        self.observers.lock().push(observer);
    }

    /// A receiving end for post-commit notifications delivered out of line
    /// from the commit that produced them.
    pub fn channel(&mut self) -> std::sync::mpsc::Receiver<UpdateInfo> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.channel = Some(tx);
        rx
    }

    pub fn post(&self, info: &UpdateInfo) {
        for obs in self.observers.lock().iter() {
            obs.on_update(info);
        }
        if let Some(tx) = &self.channel {
            let _ = tx.send(info.clone());
        }
    }
}
