//! Diffs the current inventory against the journal to compute the four
//! ordered work lists. Pure: no I/O, no journal writes.

use std::collections::HashMap;

use crate::journal::JournalData;
use crate::model::{Inventory, RemoteFile};
use crate::name_allocator::strip_trailing_suffix;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedCollection {
    pub collection_id: i64,
    pub new_user_facing_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub renamed_collections: Vec<RenamedCollection>,
    pub removed_file_uids: Vec<String>,
    pub files_to_export: Vec<RemoteFile>,
    pub deleted_exported_collections: Vec<i64>,
    /// `collection_id -> user_facing_name` for the current user's
    /// collections, so the materializer can name a freshly created
    /// collection directory after the collection rather than after
    /// whichever file happens to be exported into it first.
    pub collection_names: HashMap<i64, String>,
}

pub struct Planner;

impl Planner {
    pub fn plan(current_user_id: i64, inventory: &Inventory, journal: &JournalData) -> Plan {
        let renamed_collections = Self::renamed_collections(current_user_id, inventory, journal);
        let removed_file_uids = Self::removed_file_uids(current_user_id, inventory, journal);
        let files_to_export = Self::files_to_export(current_user_id, inventory, journal);
        let deleted_exported_collections =
            Self::deleted_exported_collections(current_user_id, inventory, journal);
        let collection_names = Self::collection_names(current_user_id, inventory);

        Plan {
            renamed_collections,
            removed_file_uids,
            files_to_export,
            deleted_exported_collections,
            collection_names,
        }
    }

    fn collection_names(current_user_id: i64, inventory: &Inventory) -> HashMap<i64, String> {
        inventory
            .collections
            .iter()
            .filter(|c| c.owner_id == current_user_id)
            .map(|c| (c.id, c.user_facing_name.clone()))
            .collect()
    }

    fn renamed_collections(
        current_user_id: i64,
        inventory: &Inventory,
        journal: &JournalData,
    ) -> Vec<RenamedCollection> {
        let mut out = Vec::new();
        for c in &inventory.collections {
            if c.owner_id != current_user_id {
                continue;
            }
            let Some(recorded) = journal.collection_export_names.get(&c.id) else {
                continue;
            };
            if strip_trailing_suffix(recorded) != c.user_facing_name.as_str() {
                out.push(RenamedCollection {
                    collection_id: c.id,
                    new_user_facing_name: c.user_facing_name.clone(),
                });
            }
        }
        out.sort_by_key(|r| r.collection_id);
        out
    }

    fn removed_file_uids(
        current_user_id: i64,
        inventory: &Inventory,
        journal: &JournalData,
    ) -> Vec<String> {
        let current: std::collections::HashSet<String> = inventory
            .personal_files(current_user_id)
            .map(|f| f.uid())
            .collect();
        let mut out: Vec<String> = journal
            .file_export_names
            .keys()
            .filter(|uid| !current.contains(*uid))
            .cloned()
            .collect();
        out.sort();
        out
    }

    fn files_to_export(
        current_user_id: i64,
        inventory: &Inventory,
        journal: &JournalData,
    ) -> Vec<RemoteFile> {
        let mut out: Vec<RemoteFile> = inventory
            .personal_files(current_user_id)
            .filter(|f| !journal.file_export_names.contains_key(&f.uid()))
            .cloned()
            .collect();
        out.sort_by_key(|f| (f.collection_id, f.id));
        out
    }

    fn deleted_exported_collections(
        current_user_id: i64,
        inventory: &Inventory,
        journal: &JournalData,
    ) -> Vec<i64> {
        let present: std::collections::HashSet<i64> = inventory
            .non_empty_personal_collections(current_user_id)
            .into_iter()
            .map(|c| c.id)
            .collect();
        let mut out: Vec<i64> = journal
            .collection_export_names
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileMetadataInfo, FileType, GeoLocation, RemoteCollection};

    fn file(id: i64, collection_id: i64, updation_time: i64, owner: i64) -> RemoteFile {
        RemoteFile {
            id,
            collection_id,
            updation_time,
            owner_id: owner,
            file_type: FileType::Image,
            metadata: FileMetadataInfo {
                title: format!("F{id}"),
                creation_time_us: 0,
                modification_time_us: None,
                location: GeoLocation::default(),
            },
            public_caption: None,
        }
    }

    fn collection(id: i64, owner: i64, name: &str) -> RemoteCollection {
        RemoteCollection {
            id,
            owner_id: owner,
            user_facing_name: name.to_string(),
        }
    }

    #[test]
    fn fresh_inventory_yields_only_files_to_export() {
        let inv = Inventory {
            files: vec![file(1, 100, 1, 1)],
            collections: vec![collection(100, 1, "Vacation")],
        };
        let journal = JournalData::default();
        let plan = Planner::plan(1, &inv, &journal);
        assert_eq!(plan.files_to_export.len(), 1);
        assert!(plan.removed_file_uids.is_empty());
        assert!(plan.renamed_collections.is_empty());
        assert!(plan.deleted_exported_collections.is_empty());
    }

    #[test]
    fn removed_file_detected_when_journal_has_stale_uid() {
        let inv = Inventory {
            files: vec![],
            collections: vec![collection(100, 1, "Vacation")],
        };
        let mut journal = JournalData::default();
        journal
            .file_export_names
            .insert("1_100_1".into(), crate::journal::ExportName::plain("F1.jpg"));
        journal.collection_export_names.insert(100, "Vacation".into());
        let plan = Planner::plan(1, &inv, &journal);
        assert_eq!(plan.removed_file_uids, vec!["1_100_1".to_string()]);
    }

    #[test]
    fn rename_detected_after_stripping_suffix() {
        let inv = Inventory {
            files: vec![file(1, 100, 1, 1)],
            collections: vec![collection(100, 1, "Summer")],
        };
        let mut journal = JournalData::default();
        journal.collection_export_names.insert(100, "Vacation".into());
        let plan = Planner::plan(1, &inv, &journal);
        assert_eq!(plan.renamed_collections.len(), 1);
        assert_eq!(plan.renamed_collections[0].new_user_facing_name, "Summer");
    }

    #[test]
    fn rename_suffix_stability_unchanged_name_with_suffix_is_not_renamed() {
        let inv = Inventory {
            files: vec![file(1, 100, 1, 1)],
            collections: vec![collection(100, 1, "Summer")],
        };
        let mut journal = JournalData::default();
        journal.collection_export_names.insert(100, "Summer(1)".into());
        let plan = Planner::plan(1, &inv, &journal);
        assert!(plan.renamed_collections.is_empty());
    }

    #[test]
    fn emptied_collection_marked_for_deletion() {
        let inv = Inventory {
            files: vec![],
            collections: vec![collection(100, 1, "Vacation")],
        };
        let mut journal = JournalData::default();
        journal.collection_export_names.insert(100, "Vacation".into());
        let plan = Planner::plan(1, &inv, &journal);
        assert_eq!(plan.deleted_exported_collections, vec![100]);
    }

    #[test]
    fn reoccupied_empty_collection_reenters_files_to_export() {
        let inv = Inventory {
            files: vec![file(2, 100, 5, 1)],
            collections: vec![collection(100, 1, "Vacation")],
        };
        let journal = JournalData::default();
        let plan = Planner::plan(1, &inv, &journal);
        assert_eq!(plan.files_to_export.len(), 1);
        assert!(plan.deleted_exported_collections.is_empty());
    }

    #[test]
    fn foreign_files_are_not_personal() {
        let inv = Inventory {
            files: vec![file(1, 100, 1, 2)],
            collections: vec![collection(100, 2, "Shared")],
        };
        let journal = JournalData::default();
        let plan = Planner::plan(1, &inv, &journal);
        assert!(plan.files_to_export.is_empty());
    }

    #[test]
    fn files_to_export_ordered_by_collection_then_id() {
        let inv = Inventory {
            files: vec![file(5, 200, 1, 1), file(1, 100, 1, 1), file(2, 100, 1, 1)],
            collections: vec![collection(100, 1, "A"), collection(200, 1, "B")],
        };
        let journal = JournalData::default();
        let plan = Planner::plan(1, &inv, &journal);
        let ids: Vec<(i64, i64)> = plan
            .files_to_export
            .iter()
            .map(|f| (f.collection_id, f.id))
            .collect();
        assert_eq!(ids, vec![(100, 1), (100, 2), (200, 5)]);
    }
}
