use fospd::core::acl::{AccessControlEntry, AccessControlList, Permission, PermissionSet};
use serde_json::json;

fn entry_with_data(permissions: &[Permission]) -> AccessControlEntry {
    AccessControlEntry {
        data: permissions.iter().copied().collect(),
        ..AccessControlEntry::default()
    }
}

#[test]
fn test_entry_overlay_acts_per_facet() {
    let lower = AccessControlEntry {
        data: [Permission::Read].into_iter().collect(),
        children: [Permission::Write].into_iter().collect(),
        ..AccessControlEntry::default()
    };
    let upper = AccessControlEntry {
        data: [Permission::NotRead].into_iter().collect(),
        ..AccessControlEntry::default()
    };
    let combined = lower.overlay(&upper);
    assert!(combined.data.contains(Permission::NotRead));
    assert!(!combined.data.contains(Permission::Read));
    assert!(combined.children.contains(Permission::Write));
}

#[test]
fn test_list_overlay_union_merges_user_maps() {
    let mut lower = AccessControlList::new();
    lower
        .users
        .insert("alice@a".to_string(), entry_with_data(&[Permission::Read]));
    lower
        .users
        .insert("bob@a".to_string(), entry_with_data(&[Permission::Read]));

    let mut upper = AccessControlList::new();
    upper
        .users
        .insert("bob@a".to_string(), entry_with_data(&[Permission::NotRead]));
    upper
        .users
        .insert("carol@a".to_string(), entry_with_data(&[Permission::Write]));

    let combined = lower.overlay(&upper);
    assert!(combined.users["alice@a"].data.contains(Permission::Read));
    assert!(combined.users["bob@a"].data.contains(Permission::NotRead));
    assert!(!combined.users["bob@a"].data.contains(Permission::Read));
    assert!(combined.users["carol@a"].data.contains(Permission::Write));
}

#[test]
fn test_list_overlay_keeps_lower_owner_when_upper_missing() {
    let mut lower = AccessControlList::new();
    lower.owner = Some(AccessControlEntry::all());
    let combined = lower.overlay(&AccessControlList::new());
    assert!(combined.owner.unwrap().data.contains(Permission::Read));
}

#[test]
fn test_entry_patch_replaces_and_resets() {
    let mut entry = entry_with_data(&[Permission::Read]);
    let patch = json!({"data": ["write", "not-read"], "children": null});
    entry.patch(patch.as_object().unwrap()).unwrap();
    assert!(entry.data.contains(Permission::Write));
    assert!(entry.data.contains(Permission::NotRead));
    assert!(!entry.data.contains(Permission::Read));
    assert!(entry.children.is_empty());
}

#[test]
fn test_entry_patch_rejects_wrong_types() {
    let mut entry = AccessControlEntry::new();
    let patch = json!({"data": "read"});
    assert!(entry.patch(patch.as_object().unwrap()).is_err());
    let patch = json!({"data": [42]});
    assert!(entry.patch(patch.as_object().unwrap()).is_err());
    let patch = json!({"everything": []});
    assert!(entry.patch(patch.as_object().unwrap()).is_err());
}

#[test]
fn test_list_patch_users() {
    let mut acl = AccessControlList::new();
    let patch = json!({"users": {"bob@a": {"data": ["read"]}}});
    acl.patch(patch.as_object().unwrap()).unwrap();
    assert!(acl.users["bob@a"].data.contains(Permission::Read));

    // null removes a single entry
    let patch = json!({"users": {"bob@a": null}});
    acl.patch(patch.as_object().unwrap()).unwrap();
    assert!(acl.users.is_empty());
}

#[test]
fn test_list_patch_null_clears_section() {
    let mut acl = AccessControlList::new();
    acl.owner = Some(AccessControlEntry::all());
    acl.groups
        .insert("friends".to_string(), entry_with_data(&[Permission::Read]));
    let patch = json!({"owner": null, "groups": null});
    acl.patch(patch.as_object().unwrap()).unwrap();
    assert!(acl.owner.is_none());
    assert!(acl.groups.is_empty());
}

#[test]
fn test_list_patch_rejects_wrong_types() {
    let mut acl = AccessControlList::new();
    for patch in [
        json!({"users": ["bob@a"]}),
        json!({"users": {"bob@a": "read"}}),
        json!({"owner": ["read"]}),
        json!({"admins": {}}),
    ] {
        assert!(
            acl.patch(patch.as_object().unwrap()).is_err(),
            "patch {patch} should be rejected"
        );
    }
}

#[test]
fn test_full_entry_grants_everything() {
    let entry = AccessControlEntry::all();
    for set in [&entry.data, &entry.acl, &entry.subscriptions, &entry.children] {
        assert!(set.contains(Permission::Read));
        assert!(set.contains(Permission::Write));
        assert!(set.contains(Permission::Delete));
    }
    assert_eq!(entry.data, PermissionSet::all());
}

#[test]
fn test_serde_skips_empty_sections() {
    let mut acl = AccessControlList::new();
    acl.owner = Some(entry_with_data(&[Permission::Read]));
    let json = serde_json::to_value(&acl).unwrap();
    assert_eq!(json, json!({"owner": {"data": ["read"]}}));
}
