//! Shared fixtures for FerroBackup integration tests

#![deny(missing_docs)]

use ferrobackup_storage::MemoryProvider;
use ferrobackup_types::{CancellationToken, DirectoryEntry, Entry, FileEntry, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Deterministic, poorly compressible content of `size` bytes
pub fn generate_test_data(size: usize, seed: u8) -> Vec<u8> {
    let mut state = u32::from(seed).wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..size)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Relative file paths of a `directories` x `files` tree
pub fn tree_paths(directories: usize, files: usize) -> Vec<String> {
    (0..directories)
        .flat_map(|d| (0..files).map(move |f| format!("dir{}/file{}.bin", d, f)))
        .collect()
}

/// Create a `directories` x `files` tree on disk under `base`
pub fn create_local_tree(base: &Path, directories: usize, files: usize) -> std::io::Result<()> {
    for (index, path) in tree_paths(directories, files).iter().enumerate() {
        let full_path = base.join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full_path, generate_test_data(100 + index * 37, index as u8))?;
    }
    Ok(())
}

/// Create a `directories` x `files` tree in a memory backend
pub fn create_memory_tree(provider: &MemoryProvider, directories: usize, files: usize) {
    for (index, path) in tree_paths(directories, files).iter().enumerate() {
        provider.add_file(path, generate_test_data(100 + index * 37, index as u8));
    }
}

/// Read every file below `directory` into a map keyed by relative path
///
/// Directories appear with a trailing `/` and no content.
pub async fn snapshot(directory: &dyn DirectoryEntry) -> Result<BTreeMap<String, Vec<u8>>> {
    let ct = CancellationToken::new();
    let mut result = BTreeMap::new();
    let mut pending = vec![(String::new(), None::<std::sync::Arc<dyn DirectoryEntry>>)];

    while let Some((prefix, current)) = pending.pop() {
        let children = match &current {
            Some(current) => current.list_children(&ct).await?,
            None => directory.list_children(&ct).await?,
        };
        for child in children {
            let path = format!("{}{}", prefix, child.name());
            match child {
                Entry::File(file) => {
                    let mut content = Vec::new();
                    file.open_read(&ct).await?.read_to_end(&mut content).await?;
                    result.insert(path, content);
                }
                Entry::Directory(child) => {
                    result.insert(format!("{}/", path), Vec::new());
                    pending.push((format!("{}/", path), Some(child)));
                }
            }
        }
    }
    Ok(result)
}
