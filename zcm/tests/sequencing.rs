// SPDX-License-Identifier: GPL-3.0-only

//! Call ordering, compensation and retention behaviour

use zcm::{CloneId, Manager, RetentionLimits, ZcmError};
use zcm_testing::{Call, MemoryZfs, Op};

const ROOT: &str = "tank/app";
const PATH: &str = "/srv/app";

fn id(value: u32) -> CloneId {
    CloneId::new(value)
}

fn dataset(value: u32) -> String {
    format!("{ROOT}/{}", id(value))
}

/// Manager with clones `00000000` (active) up to `count`.
fn with_clones(zfs: &MemoryZfs, count: usize) -> Manager<&MemoryZfs> {
    let mut manager = Manager::bootstrap(zfs, ROOT, PATH, false).unwrap();
    for _ in 0..count {
        manager.clone(RetentionLimits::UNBOUNDED, false).unwrap();
    }
    zfs.clear_calls();
    manager
}

fn positions(calls: &[Call], ops: &[Op]) -> Vec<usize> {
    calls
        .iter()
        .enumerate()
        .filter(|(_, call)| ops.contains(&call.op))
        .map(|(index, _)| index)
        .collect()
}

fn targets(calls: &[Call], op: Op) -> Vec<String> {
    calls
        .iter()
        .filter(|call| call.op == op)
        .map(|call| call.target.clone())
        .collect()
}

#[test]
fn activate_unmounts_then_swaps_then_mounts() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 2);

    manager
        .activate(id(1), RetentionLimits::UNBOUNDED, false)
        .unwrap();

    let calls = zfs.mutations();
    let unmounts = positions(&calls, &[Op::Unmount]);
    let swaps = positions(&calls, &[Op::Set, Op::Inherit]);
    let mounts = positions(&calls, &[Op::Mount]);

    assert_eq!(unmounts.len(), 4);
    assert_eq!(swaps.len(), 2);
    assert_eq!(mounts.len(), 4);
    assert!(unmounts.iter().max() < swaps.iter().min());
    assert!(swaps.iter().max() < mounts.iter().min());

    assert_eq!(
        targets(&calls, Op::Unmount),
        vec![dataset(1), dataset(2), ROOT.to_string(), dataset(0)]
    );
    assert!(calls[swaps[0]].is(Op::Inherit, &dataset(0)));
    assert!(calls[swaps[1]].is(Op::Set, &dataset(1)));
    assert_eq!(calls[swaps[1]].detail.as_deref(), Some("mountpoint=/srv/app"));
    assert_eq!(
        targets(&calls, Op::Mount),
        vec![dataset(1), ROOT.to_string(), dataset(0), dataset(2)]
    );
}

#[test]
fn failed_unmount_remounts_and_keeps_the_active_clone() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 2);
    zfs.fail_next(
        Op::Unmount,
        ROOT,
        "cannot unmount '/srv/app/.clones': pool or dataset is busy",
    );

    let error = manager
        .activate(id(2), RetentionLimits::UNBOUNDED, false)
        .unwrap_err();

    assert!(error.is_storage());
    assert_eq!(manager.active_clone().map(|clone| clone.id), Some(id(0)));
    assert!(manager.clones().iter().all(|clone| clone.mounted));
    assert!(zfs.is_mounted(ROOT));
    assert_eq!(
        zfs.property(&dataset(0), "mountpoint").as_deref(),
        Some(PATH)
    );

    let calls = zfs.mutations();
    assert!(positions(&calls, &[Op::Set, Op::Inherit]).is_empty());
    assert_eq!(
        targets(&calls, Op::Mount),
        vec![dataset(1), dataset(2)]
    );
}

#[test]
fn unmount_and_mount_only_touch_datasets_that_need_it() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 2);
    zfs.force_mounted(&dataset(2), false);
    manager.load().unwrap();
    zfs.clear_calls();

    manager.unmount().unwrap();
    assert_eq!(
        targets(&zfs.calls(), Op::Unmount),
        vec![dataset(1), ROOT.to_string(), dataset(0)]
    );
    assert!(manager.clones().iter().all(|clone| !clone.mounted));

    zfs.clear_calls();
    manager.mount().unwrap();
    assert_eq!(
        targets(&zfs.calls(), Op::Mount),
        vec![dataset(0), ROOT.to_string(), dataset(1), dataset(2)]
    );
    assert!(manager.clones().iter().all(|clone| clone.mounted));

    zfs.clear_calls();
    manager.mount().unwrap();
    assert!(zfs.mutations().is_empty());
}

#[test]
fn removing_the_active_clone_changes_nothing() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 1);
    let before = manager.clones().to_vec();

    assert!(matches!(
        manager.remove(id(0)),
        Err(ZcmError::CannotRemoveActive(_))
    ));
    assert!(matches!(
        manager.remove(id(9)),
        Err(ZcmError::CloneNotFound(_))
    ));
    assert!(zfs.mutations().is_empty());
    assert_eq!(manager.clones(), before.as_slice());
}

#[test]
fn ids_keep_increasing_after_removal() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 2);

    manager.remove(id(2)).unwrap();
    let created = manager.clone(RetentionLimits::UNBOUNDED, false).unwrap();

    assert_eq!(created.id, id(3));
    assert_eq!(manager.next_id(), id(4));
    let ids: Vec<CloneId> = manager.clones().iter().map(|clone| clone.id).collect();
    assert_eq!(ids, vec![id(0), id(1), id(3)]);
}

#[test]
fn clone_records_the_high_water_mark() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 0);

    manager.clone(RetentionLimits::UNBOUNDED, false).unwrap();

    assert_eq!(
        zfs.property(ROOT, "zfs_clone_manager:next_id").as_deref(),
        Some("00000002")
    );
    assert_eq!(
        targets(&zfs.mutations(), Op::Snapshot),
        vec![dataset(0)]
    );
}

#[test]
fn failed_clone_spends_its_id_and_drops_the_snapshot() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 0);
    zfs.fail_next(
        Op::Clone,
        &dataset(1),
        "cannot create 'tank/app/00000001': out of space",
    );

    let error = manager
        .clone(RetentionLimits::UNBOUNDED, false)
        .unwrap_err();
    assert!(error.is_storage());
    assert!(zfs.snapshots_of(&dataset(0)).is_empty());

    manager.load().unwrap();
    assert_eq!(manager.next_id(), id(2));
    let created = manager.clone(RetentionLimits::UNBOUNDED, false).unwrap();
    assert_eq!(created.id, id(2));
    assert_eq!(zfs.snapshots_of(&dataset(0)), vec!["00000002"]);
}

#[test]
fn newer_clones_are_trimmed_closest_first() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 4);

    let removed = manager
        .auto_remove(RetentionLimits::UNBOUNDED.with_max_newer(2))
        .unwrap();

    assert_eq!(removed, vec![id(1), id(2)]);
    let ids: Vec<CloneId> = manager.clones().iter().map(|clone| clone.id).collect();
    assert_eq!(ids, vec![id(0), id(3), id(4)]);
}

#[test]
fn total_limit_removes_older_before_newer() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 2);
    manager
        .activate(id(1), RetentionLimits::UNBOUNDED, false)
        .unwrap();
    let initial = manager.clones().len();

    let removed = manager
        .auto_remove(RetentionLimits::UNBOUNDED.with_max_total(1))
        .unwrap();

    assert_eq!(removed, vec![id(0), id(2)]);
    assert_eq!(initial - manager.clones().len(), removed.len());
    let survivor = &manager.clones()[0];
    assert_eq!(survivor.id, id(1));
    assert_eq!(survivor.origin, None);
    assert_eq!(manager.active_clone(), Some(survivor));
}

#[test]
fn total_limit_below_the_active_clone_is_unsatisfiable() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 1);

    assert!(matches!(
        manager.auto_remove(RetentionLimits::UNBOUNDED.with_max_total(0)),
        Err(ZcmError::PolicyUnsatisfiable { count: 1, max: 0 })
    ));
    assert_eq!(manager.active_clone().map(|clone| clone.id), Some(id(0)));
}

#[test]
fn clone_with_auto_remove_returns_the_created_record() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 0);

    let created = manager
        .clone(RetentionLimits::UNBOUNDED.with_max_newer(0), true)
        .unwrap();

    assert_eq!(created.id, id(1));
    assert!(manager.get(id(1)).is_none());
    assert_eq!(manager.next_id(), id(2));
}

#[test]
fn clone_without_active_clone_fails() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let mut manager = with_clones(&zfs, 1);
    zfs.force_property(&dataset(0), "mountpoint", "/srv/elsewhere");
    manager.load().unwrap();
    zfs.clear_calls();

    assert!(manager.active_clone().is_none());
    assert!(manager.older_clones().is_empty());
    assert!(manager.newer_clones().is_empty());
    assert!(matches!(
        manager.clone(RetentionLimits::UNBOUNDED, false),
        Err(ZcmError::NoActiveClone)
    ));
    assert!(matches!(
        manager.auto_remove(RetentionLimits::UNBOUNDED.with_max_total(1)),
        Err(ZcmError::NoActiveClone)
    ));
    assert!(zfs.mutations().is_empty());
}

#[test]
fn destroy_removes_the_whole_tree() {
    let zfs = MemoryZfs::new().with_pool("tank");
    let manager = with_clones(&zfs, 2);

    manager.destroy().unwrap();

    assert!(!zfs.dataset_exists(ROOT));
    assert!(zfs.dataset_exists("tank"));
    let unmounts = positions(&zfs.mutations(), &[Op::Unmount]);
    let destroys = positions(&zfs.mutations(), &[Op::Destroy]);
    assert_eq!(destroys.len(), 1);
    assert!(unmounts.iter().all(|index| *index < destroys[0]));
}
