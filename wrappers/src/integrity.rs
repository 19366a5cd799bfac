//!
//! Integrity scans over the aggregation graph, `spec.md §4.7` /
//! `original_source/Extent.cpp`'s `checkDb`/`eraseOrphans`.
//!
//! The original also rendered a human-readable `ContentObject` digest of
//! every finding (an application-level text type outside this crate); here
//! findings report oid/type instead of rendered text, and `check_db` never
//! mutates — call `erase_orphans` separately to apply repairs.
//!

use crate::extent::Extent;
use crate::object::{FIELD_PARENT, Object};
use crate::txn::Transaction;
use ruc::*;
use std::collections::HashSet;
use udb_core::Engine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// Child's `FieldParent` doesn't name the object whose chain contains it.
    WrongParent { child: u32, expected_parent: u32, actual_parent: u32 },
    /// `FieldFirstObj`/`FieldLastObj` doesn't match the chain's actual ends.
    WrongChainEnd { parent: u32, field_is_first: bool, stored: u32, actual: u32 },
    /// A chain link's prev/next pointer doesn't match its neighbor.
    BrokenLink { object: u32, expected_prev_or_next: u32, actual: u32, is_prev: bool },
    /// Object has a non-null parent but isn't reachable from that parent's chain.
    Orphan { object: u32, claimed_parent: u32 },
    /// No parent, no sibling links, no UUID, no children, no slots and no
    /// map/oix entries — unreachable from anywhere, safe to erase.
    DeadLeaf { object: u32 },
}

/// Every object reachable from `parent`'s first/next chain, in order.
/// Stops at a repeated oid instead of looping forever — a cycle is itself
/// the kind of corruption this scan exists to find.
fn chain_members<E: Engine>(txn: &mut Transaction<E>, parent: u32) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    if parent == 0 {
        return Ok(out);
    }
    let mut cur = Object::new(parent, txn).get_first_obj().c(d!())?;
    while cur != 0 && seen.insert(cur) {
        out.push(cur);
        cur = Object::new(cur, txn).get_next().c(d!())?;
    }
    Ok(out)
}

/// `original_source/Extent.cpp::checkDb`'s `super.getParent().isNull()`
/// branch: an object with no parent is only safe to erase if it also has
/// no prev/next sibling (a corrupt chain could still reference it), no
/// UUID, no children, no queue slots and no map/oix entries.
fn is_dead_leaf<E: Engine>(txn: &mut Transaction<E>, oid: u32) -> Result<bool> {
    let db = txn.db();
    let mut obj = Object::new(oid, txn);
    if obj.get_parent().c(d!())? != 0 {
        return Ok(false);
    }
    if obj.get_prev().c(d!())? != 0 || obj.get_next().c(d!())? != 0 {
        return Ok(false);
    }
    if obj.get_first_obj().c(d!())? != 0 {
        return Ok(false);
    }
    if obj.uuid(false).c(d!())?.is_some() {
        return Ok(false);
    }
    drop(obj);
    if crate::queue::Qit::new(db, oid, 0).first().c(d!())? {
        return Ok(false);
    }
    if crate::map::Mit::new(db, oid).first_key().c(d!())? {
        return Ok(false);
    }
    if crate::map::Xit::new(db, oid).first_key().c(d!())? {
        return Ok(false);
    }
    Ok(true)
}

/// Walk every object in the extent and report aggregation-chain
/// inconsistencies: children whose `FieldParent` disagrees with the chain
/// that actually contains them, chains whose `FieldFirstObj`/
/// `FieldLastObj`/prev/next pointers don't match their real neighbors, and
/// parentless objects that have become entirely unreachable (`DeadLeaf`).
///
/// `check_db` never mutates the database; call `erase_orphans` separately
/// to repair objects this finds as unreachable from their claimed parent,
/// or dead leaves ready for deletion.
pub fn check_db<E: Engine>(txn: &mut Transaction<E>) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    let mut ext = Extent::new(txn.db());
    if !ext.first().c(d!())? {
        return Ok(findings);
    }
    loop {
        let super_oid = ext.oid();
        let children = chain_members(txn, super_oid).c(d!())?;
        let mut prev: u32 = 0;
        for &child in &children {
            let mut obj = Object::new(child, txn);
            let parent = obj.get_parent().c(d!())?;
            if parent != super_oid {
                findings.push(Finding::WrongParent {
                    child,
                    expected_parent: super_oid,
                    actual_parent: parent,
                });
            }
            let stored_prev = obj.get_prev().c(d!())?;
            if stored_prev != prev {
                findings.push(Finding::BrokenLink {
                    object: child,
                    expected_prev_or_next: prev,
                    actual: stored_prev,
                    is_prev: true,
                });
            }
            prev = child;
        }
        if let Some(&first) = children.first() {
            let stored_first = Object::new(super_oid, txn).get_first_obj().c(d!())?;
            if stored_first != first {
                findings.push(Finding::WrongChainEnd {
                    parent: super_oid,
                    field_is_first: true,
                    stored: stored_first,
                    actual: first,
                });
            }
        }
        if let Some(&last) = children.last() {
            let stored_last = Object::new(super_oid, txn).get_last_obj().c(d!())?;
            if stored_last != last {
                findings.push(Finding::WrongChainEnd {
                    parent: super_oid,
                    field_is_first: false,
                    stored: stored_last,
                    actual: last,
                });
            }
            let stored_next = Object::new(last, txn).get_next().c(d!())?;
            if stored_next != 0 {
                findings.push(Finding::BrokenLink {
                    object: last,
                    expected_prev_or_next: 0,
                    actual: stored_next,
                    is_prev: false,
                });
            }
        }
        if is_dead_leaf(txn, super_oid).c(d!())? {
            findings.push(Finding::DeadLeaf { object: super_oid });
        }
        if !ext.next().c(d!())? {
            break;
        }
    }

    let mut ext = Extent::new(txn.db());
    if ext.first().c(d!())? {
        loop {
            let oid = ext.oid();
            let parent = Object::new(oid, txn).get_parent().c(d!())?;
            if parent != 0 && !chain_members(txn, parent).c(d!())?.contains(&oid) {
                findings.push(Finding::Orphan { object: oid, claimed_parent: parent });
            }
            if !ext.next().c(d!())? {
                break;
            }
        }
    }
    Ok(findings)
}

/// Erase every object whose claimed parent's chain doesn't actually
/// contain it, matching `Extent::eraseOrphans`: clear `FieldParent` first
/// (so the erase is observed as a real change) then recursively erase.
/// Also erases every dead leaf `check_db` would report, per `spec.md
/// §4.7`'s third bullet.
pub fn erase_orphans<E: Engine>(txn: &mut Transaction<E>) -> Result<Vec<u32>> {
    let mut erased = Vec::new();
    let mut ext = Extent::new(txn.db());
    if !ext.first().c(d!())? {
        return Ok(erased);
    }
    let mut candidates = Vec::new();
    loop {
        candidates.push(ext.oid());
        if !ext.next().c(d!())? {
            break;
        }
    }
    for oid in candidates {
        let mut obj = Object::new(oid, txn);
        if obj.is_erased() {
            continue;
        }
        let parent = obj.get_parent().c(d!())?;
        if parent != 0 {
            let members = chain_members(txn, parent).c(d!())?;
            if !members.contains(&oid) {
                let mut obj = Object::new(oid, txn);
                obj.clear_value(FIELD_PARENT).c(d!())?;
                obj.erase().c(d!())?;
                erased.push(oid);
            }
            continue;
        }
        if is_dead_leaf(txn, oid).c(d!())? {
            Object::new(oid, txn).erase().c(d!())?;
            erased.push(oid);
        }
    }
    Ok(erased)
}
