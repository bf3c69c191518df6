//! Sound asset collaborators.
//!
//! Raw sound bytes are addressed by [`LumpId`]. A missing or unreadable lump
//! reads as empty data, which the loader treats as a decode failure.

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use soundstage_common::LumpId;
use tracing::{debug, warn};

use crate::error::SoundResult;

/// Supplies raw sound data.
pub trait SoundAssets {
    /// Raw bytes of a lump; empty when unavailable.
    fn read_sound(&self, lump: LumpId) -> Vec<u8>;

    /// Look up a lump by name (case-insensitive).
    fn lump_by_name(&self, name: &str) -> Option<LumpId>;
}

/// In-memory lump table.
#[derive(Debug, Default, Clone)]
pub struct MemoryAssets {
    lumps: Vec<(String, Vec<u8>)>,
    by_name: AHashMap<String, LumpId>,
}

impl MemoryAssets {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lump and return its id. A later lump with the same name
    /// shadows earlier ones.
    pub fn add(&mut self, name: &str, data: Vec<u8>) -> LumpId {
        let id = LumpId::new(self.lumps.len() as u32);
        self.lumps.push((name.to_string(), data));
        self.by_name.insert(name.to_ascii_lowercase(), id);
        id
    }

    /// Builder form of [`MemoryAssets::add`].
    #[must_use]
    pub fn with_lump(mut self, name: &str, data: Vec<u8>) -> Self {
        self.add(name, data);
        self
    }

    /// Number of lumps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lumps.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lumps.is_empty()
    }
}

impl SoundAssets for MemoryAssets {
    fn read_sound(&self, lump: LumpId) -> Vec<u8> {
        self.lumps
            .get(lump.raw() as usize)
            .map(|(_, data)| data.clone())
            .unwrap_or_default()
    }

    fn lump_by_name(&self, name: &str) -> Option<LumpId> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }
}

/// Lumps backed by the files of one directory, named by file stem.
#[derive(Debug)]
pub struct DirectoryAssets {
    root: PathBuf,
    files: Vec<PathBuf>,
    by_name: AHashMap<String, LumpId>,
}

impl DirectoryAssets {
    /// Index every regular file in `root`.
    pub fn open(root: impl AsRef<Path>) -> SoundResult<Self> {
        let root = root.as_ref().to_path_buf();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut by_name = AHashMap::new();
        for (i, path) in files.iter().enumerate() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                by_name.insert(stem.to_ascii_lowercase(), LumpId::new(i as u32));
            }
        }
        debug!("Indexed {} sound files in {:?}", files.len(), root);
        Ok(Self {
            root,
            files,
            by_name,
        })
    }

    /// Indexed directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of indexed files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no files were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl SoundAssets for DirectoryAssets {
    fn read_sound(&self, lump: LumpId) -> Vec<u8> {
        let Some(path) = self.files.get(lump.raw() as usize) else {
            return Vec::new();
        };
        std::fs::read(path).unwrap_or_else(|e| {
            warn!("Failed to read sound file {:?}: {}", path, e);
            Vec::new()
        })
    }

    fn lump_by_name(&self, name: &str) -> Option<LumpId> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }
}
