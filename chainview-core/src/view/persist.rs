//! Last visible range per index scheme, saved as JSON across runs.

use super::range::VisibleRange;
use crate::domain::SchemeKind;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeMemory {
    #[serde(default)]
    pub by_date: Option<VisibleRange>,
    #[serde(default)]
    pub by_height: Option<VisibleRange>,
}

impl RangeMemory {
    pub fn get(&self, scheme: SchemeKind) -> Option<VisibleRange> {
        match scheme {
            SchemeKind::ByDate => self.by_date,
            SchemeKind::ByHeight => self.by_height,
        }
    }

    pub fn set(&mut self, scheme: SchemeKind, range: VisibleRange) {
        match scheme {
            SchemeKind::ByDate => self.by_date = Some(range),
            SchemeKind::ByHeight => self.by_height = Some(range),
        }
    }
}

/// Load remembered ranges. Missing or corrupt files yield an empty memory.
pub fn load(path: &Path) -> RangeMemory {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => RangeMemory::default(),
    }
}

/// Save remembered ranges, creating parent directories if needed.
pub fn save(path: &Path, memory: &RangeMemory) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(memory)?;
    std::fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ranges.json");

        let mut memory = RangeMemory::default();
        memory.set(SchemeKind::ByHeight, VisibleRange::new(850_500, 901_200));
        save(&path, &memory).unwrap();

        let loaded = load(&path);
        assert_eq!(loaded.get(SchemeKind::ByHeight), Some(VisibleRange::new(850_500, 901_200)));
        assert_eq!(loaded.get(SchemeKind::ByDate), None);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("absent.json")), RangeMemory::default());
    }

    #[test]
    fn corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranges.json");
        std::fs::write(&path, "not valid json {{{").unwrap();
        assert_eq!(load(&path), RangeMemory::default());
    }
}
