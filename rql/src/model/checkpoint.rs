use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

/// Games with trained weights available in the snapshot directory
const KNOWN_SNAPSHOTS: [(&str, &str); 7] = [
    ("demon_attack", "demon_attack_20.json"),
    ("kangaroo", "kangaroo_50.json"),
    ("star_gunner", "star_gunner_82.json"),
    ("space_invaders", "space_invaders_91.json"),
    ("breakout", "breakout_200.json"),
    ("catcher", "catcher_69.json"),
    ("snake", "snake_59.json"),
];

/// Static lookup `game name -> weight file`.
/// Games without an entry are played with untrained weights.
#[derive(Clone, Debug, Default)]
pub struct CheckpointTable {
    entries: FxHashMap<String, PathBuf>,
}

impl CheckpointTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table of the known game snapshots present in `snapshot_dir`.
    /// Missing snapshot files are skipped, their games play with untrained weights.
    pub fn with_known_snapshots(snapshot_dir: &Path) -> Self {
        let mut table = Self::empty();
        for (game, file) in KNOWN_SNAPSHOTS {
            let path = snapshot_dir.join(file);
            if path.is_file() {
                table.insert(game, path);
            } else {
                log::warn!("No snapshot for '{}' at {}", game, path.display());
            }
        }
        table
    }

    pub fn insert(&mut self, game: &str, path: PathBuf) {
        self.entries.insert(game.to_string(), path);
    }

    pub fn lookup(&self, game: &str) -> Option<&Path> {
        self.entries.get(game).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
