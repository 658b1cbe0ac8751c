use std::sync::Arc;

use dfs_lib::wire::{BlockNotification, BlockRemovalNotification, Permission, Permissions};
use dfs_lib::DfsError;
use tempfile::TempDir;

use crate::meta_db::file_is_healthy;
use crate::namespace::NamespaceService;
use crate::security::Principal;

fn open_namespace(dir: &TempDir) -> Arc<NamespaceService> {
    let path = dir.path().join("name.db");
    Arc::new(NamespaceService::open(path.to_str().unwrap()).unwrap())
}

fn open_perms() -> Permissions {
    Permissions::open("root", "root")
}

fn notification(block_id: &str, path: &str, host: &str, sequence: u64) -> BlockNotification {
    BlockNotification {
        host: host.to_string(),
        path: path.to_string(),
        block_id: block_id.to_string(),
        sequence,
        length: 5,
        crc: 1234,
    }
}

#[test]
fn test_root_listing_on_empty_store() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);

    let root = ns.stat(&Principal::Root, "/").unwrap();
    assert!(root.is_dir);
    assert!(root.parent_id.is_none());
    assert!(root.name.is_empty());

    assert!(ns.list(&Principal::Root, "/").unwrap().is_empty());
}

#[test]
fn test_root_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("name.db");
    let first = {
        let ns = NamespaceService::open(path.to_str().unwrap()).unwrap();
        ns.stat(&Principal::Root, "/").unwrap()
    };
    let ns = NamespaceService::open(path.to_str().unwrap()).unwrap();
    assert_eq!(ns.stat(&Principal::Root, "/").unwrap().id, first.id);
}

#[test]
fn test_create_and_delete_file() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    let root = ns.stat(&Principal::Root, "/").unwrap();

    ns.create_file(&Principal::Root, "/hello.txt", open_perms())
        .unwrap();

    let listed = ns.list(&Principal::Root, "/").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "hello.txt");

    let entry = ns.stat(&Principal::Root, "/hello.txt").unwrap();
    assert!(!entry.is_dir);
    assert_eq!(entry.parent_id, Some(root.id));

    ns.delete_file(&Principal::Root, "/hello.txt").unwrap();
    assert!(ns.list(&Principal::Root, "/").unwrap().is_empty());
    assert!(ns
        .stat(&Principal::Root, "/hello.txt")
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_duplicate_name_rejected_across_kinds() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);

    ns.create_file(&Principal::Root, "/a", open_perms()).unwrap();
    assert!(matches!(
        ns.create_dir(&Principal::Root, "/a", open_perms()),
        Err(DfsError::AlreadyExists(_))
    ));
    assert!(matches!(
        ns.create_file(&Principal::Root, "/a", open_perms()),
        Err(DfsError::AlreadyExists(_))
    ));
}

#[test]
fn test_nested_dirs_and_listing_order() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);

    ns.create_dir(&Principal::Root, "/docs", open_perms()).unwrap();
    ns.create_file(&Principal::Root, "/docs/b.txt", open_perms())
        .unwrap();
    ns.create_file(&Principal::Root, "/docs/a.txt", open_perms())
        .unwrap();
    ns.create_dir(&Principal::Root, "/docs/c", open_perms()).unwrap();

    let names: Vec<String> = ns
        .list(&Principal::Root, "/docs")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "c"]);
}

#[test]
fn test_missing_parent_fails() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    assert!(ns
        .create_file(&Principal::Root, "/no/such/parent", open_perms())
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_delete_dir_requires_emptiness() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);

    ns.create_dir(&Principal::Root, "/d", open_perms()).unwrap();
    ns.create_file(&Principal::Root, "/d/f", open_perms()).unwrap();

    assert!(matches!(
        ns.delete_dir(&Principal::Root, "/d"),
        Err(DfsError::NotEmpty(_))
    ));

    ns.delete_file(&Principal::Root, "/d/f").unwrap();
    ns.delete_dir(&Principal::Root, "/d").unwrap();
    assert!(ns.stat(&Principal::Root, "/d").unwrap_err().is_not_found());
}

#[test]
fn test_delete_with_wrong_kind_rejected() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);

    ns.create_dir(&Principal::Root, "/d", open_perms()).unwrap();
    ns.create_file(&Principal::Root, "/f", open_perms()).unwrap();

    assert!(matches!(
        ns.delete_file(&Principal::Root, "/d"),
        Err(DfsError::InvalidParam(_))
    ));
    assert!(matches!(
        ns.delete_dir(&Principal::Root, "/f"),
        Err(DfsError::InvalidParam(_))
    ));
    assert!(matches!(
        ns.delete_dir(&Principal::Root, "/"),
        Err(DfsError::InvalidParam(_))
    ));
}

#[test]
fn test_notify_block_present_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    ns.create_file(&Principal::Root, "/f", open_perms()).unwrap();

    let n = notification("b1", "/f", "h1", 0);
    ns.notify_block_present(&n).unwrap();
    ns.notify_block_present(&n).unwrap();

    let blocks = ns.get_block_infos(&Principal::Root, "/f").unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].locations, vec!["h1".to_string()]);
}

#[test]
fn test_notify_conflict_does_not_mutate() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    ns.create_file(&Principal::Root, "/f", open_perms()).unwrap();

    ns.notify_block_added(&notification("b1", "/f", "h1", 1)).unwrap();

    for mutated in [
        BlockNotification {
            sequence: 2,
            ..notification("b1", "/f", "h2", 1)
        },
        BlockNotification {
            length: 99,
            ..notification("b1", "/f", "h2", 1)
        },
        BlockNotification {
            crc: 1,
            ..notification("b1", "/f", "h2", 1)
        },
    ] {
        let err = ns.notify_block_present(&mutated).unwrap_err();
        assert!(err.is_conflict(), "expected conflict, got {:?}", err);
    }

    let blocks = ns.get_block_infos(&Principal::Root, "/f").unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].sequence, 1);
    assert_eq!(blocks[0].length, 5);
    assert_eq!(blocks[0].crc, 1234);
    assert_eq!(blocks[0].locations, vec!["h1".to_string()]);
}

#[test]
fn test_notify_added_rejects_duplicate_location() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    ns.create_file(&Principal::Root, "/f", open_perms()).unwrap();

    let n = notification("b1", "/f", "h1", 0);
    ns.notify_block_added(&n).unwrap();
    assert!(matches!(
        ns.notify_block_added(&n),
        Err(DfsError::AlreadyExists(_))
    ));
}

#[test]
fn test_notify_for_directory_rejected() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    ns.create_dir(&Principal::Root, "/d", open_perms()).unwrap();

    assert!(matches!(
        ns.notify_block_present(&notification("b1", "/d", "h1", 0)),
        Err(DfsError::InvalidParam(_))
    ));
}

#[test]
fn test_notify_block_removed() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    ns.create_file(&Principal::Root, "/f", open_perms()).unwrap();

    ns.notify_block_added(&notification("b1", "/f", "h1", 0)).unwrap();
    ns.notify_block_added(&notification("b1", "/f", "h2", 0)).unwrap();

    ns.notify_block_removed(&BlockRemovalNotification {
        host: "h1".to_string(),
        path: "/f".to_string(),
        block_id: "b1".to_string(),
    })
    .unwrap();

    let blocks = ns.get_block_infos(&Principal::Root, "/f").unwrap();
    assert_eq!(blocks[0].locations, vec!["h2".to_string()]);

    // Removing an unknown block is a NotFound, a known block from a
    // host that never held it is a no-op.
    assert!(ns
        .notify_block_removed(&BlockRemovalNotification {
            host: "h1".to_string(),
            path: "/f".to_string(),
            block_id: "nope".to_string(),
        })
        .unwrap_err()
        .is_not_found());
    ns.notify_block_removed(&BlockRemovalNotification {
        host: "h9".to_string(),
        path: "/f".to_string(),
        block_id: "b1".to_string(),
    })
    .unwrap();
}

#[test]
fn test_node_removed_drops_every_location_of_the_host() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    ns.create_file(&Principal::Root, "/f", open_perms()).unwrap();
    ns.create_file(&Principal::Root, "/g", open_perms()).unwrap();

    ns.notify_block_added(&notification("b1", "/f", "h1", 0)).unwrap();
    ns.notify_block_added(&notification("b2", "/g", "h1", 0)).unwrap();
    ns.notify_block_added(&notification("b2", "/g", "h2", 0)).unwrap();

    ns.node_removed("h1").unwrap();

    let blocks = ns.get_all_block_infos().unwrap();
    assert_eq!(blocks.len(), 2);
    for block in blocks {
        assert!(!block.locations.contains(&"h1".to_string()));
    }
}

#[test]
fn test_block_infos_sorted_by_sequence_and_health() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    ns.create_file(&Principal::Root, "/f", open_perms()).unwrap();

    ns.notify_block_added(&notification("b2", "/f", "h1", 2)).unwrap();
    ns.notify_block_added(&notification("b0", "/f", "h1", 0)).unwrap();

    let blocks = ns.get_block_infos(&Principal::Root, "/f").unwrap();
    let sequences: Vec<u64> = blocks.iter().map(|b| b.sequence).collect();
    assert_eq!(sequences, vec![0, 2]);
    // Sequence 1 is missing, so the file is not healthy yet.
    assert!(!file_is_healthy(&blocks));

    ns.notify_block_added(&notification("b1", "/f", "h1", 1)).unwrap();
    let blocks = ns.get_block_infos(&Principal::Root, "/f").unwrap();
    assert!(file_is_healthy(&blocks));
}

#[test]
fn test_deleting_file_cascades_blocks_and_locations() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    ns.create_file(&Principal::Root, "/f", open_perms()).unwrap();

    ns.notify_block_added(&notification("b1", "/f", "h1", 0)).unwrap();
    assert_eq!(ns.get_all_block_infos().unwrap().len(), 1);

    ns.delete_file(&Principal::Root, "/f").unwrap();
    assert!(ns.get_all_block_infos().unwrap().is_empty());
}

#[test]
fn test_two_files_may_reuse_sequences_but_not_block_ids() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    ns.create_file(&Principal::Root, "/f", open_perms()).unwrap();
    ns.create_file(&Principal::Root, "/g", open_perms()).unwrap();

    ns.notify_block_added(&notification("b1", "/f", "h1", 0)).unwrap();
    ns.notify_block_added(&notification("b2", "/g", "h1", 0)).unwrap();

    // Same sequence in two different files is fine; a second block with
    // the same sequence in the same file conflicts.
    assert!(ns
        .notify_block_added(&notification("b3", "/f", "h1", 0))
        .unwrap_err()
        .is_conflict());
}

// ---- authorization through the namespace ----

fn locked() -> Permission {
    Permission::default()
}

fn perms(owner: &str, group: &str, o: Permission, g: Permission, x: Permission) -> Permissions {
    Permissions {
        owner: owner.to_string(),
        group: group.to_string(),
        owner_permission: o,
        group_permission: g,
        other_permission: x,
    }
}

fn read_write() -> Permission {
    Permission {
        read: true,
        write: true,
        delete: false,
    }
}

#[test]
fn test_write_denied_without_grant() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);

    let owner_only = perms("root", "root", Permission::all(), locked(), locked());
    let alice = Principal::user("alice", &["staff"]);

    ns.create_dir(&Principal::Root, "/private", owner_only).unwrap();
    // The root grants everyone read, so traversal works...
    assert!(ns.list(&alice, "/private").unwrap().is_empty());
    // ...but nothing along the chain grants alice write.
    assert!(matches!(
        ns.create_file(&alice, "/private/f", open_perms()),
        Err(DfsError::PermissionDenied(_))
    ));
}

#[test]
fn test_any_grant_along_the_chain_suffices() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    let alice = Principal::user("alice", &[]);

    // Only the intermediate dir grants alice anything; the grant still
    // accumulates for deeper targets.
    let granted = perms("alice", "none", read_write(), locked(), locked());
    let silent = perms("root", "root", Permission::all(), locked(), locked());

    ns.create_dir(&Principal::Root, "/top", granted).unwrap();
    ns.create_dir(&Principal::Root, "/top/mid", silent).unwrap();

    ns.create_file(&alice, "/top/mid/f", open_perms()).unwrap();
    assert_eq!(ns.list(&alice, "/top/mid").unwrap().len(), 1);
}

#[test]
fn test_delete_is_a_distinct_privilege() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    let alice = Principal::user("alice", &[]);

    // Alice can read and write but not delete.
    let no_delete = perms("alice", "none", read_write(), locked(), locked());
    ns.create_dir(&Principal::Root, "/area", no_delete.clone()).unwrap();
    ns.create_file(&alice, "/area/f", no_delete).unwrap();

    assert!(matches!(
        ns.delete_file(&alice, "/area/f"),
        Err(DfsError::PermissionDenied(_))
    ));
    ns.delete_file(&Principal::Root, "/area/f").unwrap();
}

#[test]
fn test_group_membership_grants_write() {
    let dir = TempDir::new().unwrap();
    let ns = open_namespace(&dir);
    let bob = Principal::user("bob", &["staff"]);
    let eve = Principal::user("eve", &["guests"]);

    let group_writable = perms("alice", "staff", Permission::all(), read_write(), locked());
    ns.create_dir(&Principal::Root, "/shared", group_writable).unwrap();

    ns.create_file(&bob, "/shared/from-bob", open_perms()).unwrap();
    assert!(matches!(
        ns.create_file(&eve, "/shared/from-eve", open_perms()),
        Err(DfsError::PermissionDenied(_))
    ));
}
