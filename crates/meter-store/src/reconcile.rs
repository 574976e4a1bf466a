//! Record reconciliation against an authoritative snapshot.
//!
//! Planning is pure: [`plan`] compares a local collection with the desired
//! one by id and emits inserts, updates and deletes. Applying runs inside one
//! `BEGIN IMMEDIATE` transaction, so either the whole batch is visible or none
//! of it is.

use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use meter_types::{ControllerRecord, ObjectRecord, Record, SensorRecord, TopologySnapshot};

use crate::error::{Error, Result, batch_error};
use crate::store::Store;
use crate::topology::TopologyTable;

/// Operations that bring a local collection into agreement with a desired one.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan<R> {
    /// Desired records with no local counterpart, in desired order.
    pub inserts: Vec<R>,
    /// Desired values for every local record whose id is still wanted,
    /// in local order. Issued even when the values already match.
    pub updates: Vec<R>,
    /// Local records whose id is absent from the desired set, in local order.
    pub deletes: Vec<R>,
    /// How many of `updates` leave the record unchanged.
    pub unchanged: usize,
}

impl<R> ReconcilePlan<R> {
    /// Whether applying the plan would leave the collection as it is.
    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty() && self.updates.len() == self.unchanged
    }

    /// Counts for reporting.
    pub fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            inserted: self.inserts.len(),
            updated: self.updates.len() - self.unchanged,
            unchanged: self.unchanged,
            deleted: self.deletes.len(),
        }
    }
}

/// Plan the reconciliation of `local` towards `desired`.
///
/// Records are matched by id only. If `desired` repeats an id the last
/// occurrence wins; if `local` repeats an id only the first occurrence is
/// considered.
pub fn plan<R: Record>(local: &[R], desired: &[R]) -> ReconcilePlan<R> {
    let wanted: HashMap<i64, usize> = desired
        .iter()
        .enumerate()
        .map(|(idx, record)| (record.id(), idx))
        .collect();

    let mut seen_local = HashSet::new();
    let mut consumed = HashSet::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    let mut unchanged = 0;

    for record in local {
        let id = record.id();
        if !seen_local.insert(id) {
            continue;
        }
        match wanted.get(&id) {
            Some(&idx) => {
                let target = &desired[idx];
                if target == record {
                    unchanged += 1;
                }
                updates.push(target.clone());
                consumed.insert(id);
            }
            None => deletes.push(record.clone()),
        }
    }

    let inserts = desired
        .iter()
        .enumerate()
        .filter(|(idx, record)| {
            let id = record.id();
            wanted.get(&id) == Some(idx) && !consumed.contains(&id)
        })
        .map(|(_, record)| record.clone())
        .collect();

    ReconcilePlan {
        inserts,
        updates,
        deletes,
        unchanged,
    }
}

/// Counts of applied operations for one record kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

/// Result of reconciling a full topology snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TopologyReport {
    pub objects: ReconcileStats,
    pub controllers: ReconcileStats,
    pub sensors: ReconcileStats,
}

fn apply<R: TopologyTable>(conn: &Connection, desired: &[R]) -> Result<ReconcileStats> {
    let local = R::load_all(conn)?;
    let plan = plan(&local, desired);

    for record in &plan.deletes {
        R::delete(conn, record.id()).map_err(batch_error)?;
    }
    for record in &plan.updates {
        let changed = record.overwrite(conn).map_err(batch_error)?;
        if changed != 1 {
            return Err(Error::Conflict(format!(
                "{} {} changed during reconciliation",
                R::KIND,
                record.id()
            )));
        }
    }
    for record in &plan.inserts {
        record.insert(conn).map_err(batch_error)?;
    }

    let stats = plan.stats();
    debug!(
        "Reconciled {}: {} inserted, {} updated, {} unchanged, {} deleted",
        R::TABLE,
        stats.inserted,
        stats.updated,
        stats.unchanged,
        stats.deleted
    );
    Ok(stats)
}

impl Store {
    /// Reconcile one record kind with `desired` in a single transaction.
    pub fn reconcile<R: TopologyTable>(&mut self, desired: &[R]) -> Result<ReconcileStats> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(batch_error)?;
        let stats = apply(&tx, desired)?;
        tx.commit().map_err(batch_error)?;
        Ok(stats)
    }

    /// Reconcile objects, controllers and sensors with a snapshot.
    ///
    /// All three kinds are applied in one transaction that commits once; any
    /// failure rolls back every change. Constraint violations and lock
    /// contention surface as [`Error::Conflict`], and the caller should retry
    /// the whole reconciliation.
    pub fn reconcile_topology(&mut self, snapshot: &TopologySnapshot) -> Result<TopologyReport> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(batch_error)?;

        let report = TopologyReport {
            objects: apply::<ObjectRecord>(&tx, &snapshot.objects)?,
            controllers: apply::<ControllerRecord>(&tx, &snapshot.controllers)?,
            sensors: apply::<SensorRecord>(&tx, &snapshot.sensors)?,
        };

        tx.commit().map_err(batch_error)?;
        info!(
            "Topology reconciled: {} objects, {} controllers, {} sensors",
            snapshot.objects.len(),
            snapshot.controllers.len(),
            snapshot.sensors.len()
        );
        Ok(report)
    }
}
