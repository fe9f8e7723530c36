//! Materialized folder paths.
//!
//! The store only keeps parent links; the `/`-joined path of every folder is
//! rebuilt here after each fetch of the folder slice.

use crate::models::FolderRecord;
use log::warn;
use std::collections::{HashMap, HashSet};

/// Return a copy of `folders` with `folder_path` recomputed for every record.
///
/// Paths are the folder names from the root ancestor down to the folder.
/// A parent id that is not in the set ends the walk, so such a folder is
/// treated as a root. A cycle in the parent links also ends the walk at the
/// first revisited folder. Output order matches input order.
pub fn resolve_folder_paths(folders: &[FolderRecord]) -> Vec<FolderRecord> {
    let by_id: HashMap<i64, &FolderRecord> = folders.iter().map(|f| (f.id, f)).collect();

    folders
        .iter()
        .map(|folder| {
            let mut resolved = folder.clone();
            resolved.folder_path = Some(path_of(folder, &by_id));
            resolved
        })
        .collect()
}

fn path_of(folder: &FolderRecord, by_id: &HashMap<i64, &FolderRecord>) -> String {
    let mut names = vec![folder.folder_name.as_str()];
    let mut visited = HashSet::from([folder.id]);
    let mut current = folder;

    while let Some(parent) = current.parent_folder_id.and_then(|id| by_id.get(&id)) {
        if !visited.insert(parent.id) {
            warn!(
                "Folder {} has a cyclic parent chain; path truncated at {}",
                folder.id, parent.id
            );
            break;
        }
        names.push(parent.folder_name.as_str());
        current = parent;
    }

    names.reverse();
    names.join("/")
}

/// A folder with its resolved children, for tree-style browsing.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderNode {
    pub folder: FolderRecord,
    pub children: Vec<FolderNode>,
}

/// Nest folders under their parents. Folders whose parent is missing become
/// roots; sibling order follows input order.
pub fn build_folder_tree(folders: &[FolderRecord]) -> Vec<FolderNode> {
    let ids: HashSet<i64> = folders.iter().map(|f| f.id).collect();
    let mut children: HashMap<i64, Vec<&FolderRecord>> = HashMap::new();
    let mut roots = Vec::new();

    for folder in folders {
        match folder.parent_folder_id {
            Some(parent) if ids.contains(&parent) && parent != folder.id => {
                children.entry(parent).or_default().push(folder)
            }
            _ => roots.push(folder),
        }
    }

    let mut placed = HashSet::new();
    roots
        .into_iter()
        .map(|root| attach(root, &children, &mut placed))
        .collect()
}

fn attach(
    folder: &FolderRecord,
    children: &HashMap<i64, Vec<&FolderRecord>>,
    placed: &mut HashSet<i64>,
) -> FolderNode {
    placed.insert(folder.id);
    let mut kids = Vec::new();
    for kid in children.get(&folder.id).into_iter().flatten() {
        if placed.contains(&kid.id) {
            continue;
        }
        kids.push(attach(kid, children, placed));
    }

    FolderNode {
        folder: folder.clone(),
        children: kids,
    }
}
