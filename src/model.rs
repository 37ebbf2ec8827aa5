//! Remote data model: files, collections, and the derived identifiers the
//! planner and journal key off of.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Image,
    Video,
    LivePhoto,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadataInfo {
    pub title: String,
    pub creation_time_us: i64,
    #[serde(default)]
    pub modification_time_us: Option<i64>,
    #[serde(default)]
    pub location: GeoLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: i64,
    pub collection_id: i64,
    pub updation_time: i64,
    pub owner_id: i64,
    pub file_type: FileType,
    pub metadata: FileMetadataInfo,
    #[serde(default)]
    pub public_caption: Option<String>,
}

impl RemoteFile {
    /// `"{id}_{collection_id}_{updation_time}"` — any mutation to content or
    /// containment changes this, so the mirror treats it as a new file.
    pub fn uid(&self) -> String {
        file_uid(self.id, self.collection_id, self.updation_time)
    }

    pub fn is_live_photo(&self) -> bool {
        matches!(self.file_type, FileType::LivePhoto)
    }
}

pub fn file_uid(file_id: i64, collection_id: i64, updation_time: i64) -> String {
    format!("{file_id}_{collection_id}_{updation_time}")
}

/// Inverse of [`file_uid`] for the `collection_id` component — used by the
/// UID-roundtrip property test and by callers that only have a UID on hand.
pub fn collection_id_from_file_uid(uid: &str) -> Option<i64> {
    let mut parts = uid.split('_');
    let _file_id = parts.next()?;
    let collection_id = parts.next()?;
    collection_id.parse().ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCollection {
    pub id: i64,
    pub owner_id: i64,
    pub user_facing_name: String,
}

/// An authoritative inventory snapshot taken together, so the planner always
/// diffs a consistent pair.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub files: Vec<RemoteFile>,
    pub collections: Vec<RemoteCollection>,
}

impl Inventory {
    pub fn personal_files<'a>(&'a self, current_user_id: i64) -> impl Iterator<Item = &'a RemoteFile> {
        let collection_owner: std::collections::HashMap<i64, i64> = self
            .collections
            .iter()
            .map(|c| (c.id, c.owner_id))
            .collect();
        self.files.iter().filter(move |f| {
            collection_owner
                .get(&f.collection_id)
                .is_some_and(|owner| *owner == current_user_id)
        })
    }

    /// Personal collections that currently contain at least one personal file.
    pub fn non_empty_personal_collections(&self, current_user_id: i64) -> Vec<&RemoteCollection> {
        let mut ids_with_files = std::collections::HashSet::new();
        for f in self.personal_files(current_user_id) {
            ids_with_files.insert(f.collection_id);
        }
        self.collections
            .iter()
            .filter(|c| c.owner_id == current_user_id && ids_with_files.contains(&c.id))
            .collect()
    }
}
