use std::{fs, io::ErrorKind, path::Path};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dimensions::LifeCycle;

/// Position of an interrupted harvest.
///
/// `next_combination` indexes `Catalog::combinations` for `year`; everything
/// before it in that year, and every more recent year, is already on disk.
/// `state_code` and `combination_count` identify the run it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub life_cycle: LifeCycle,
    #[serde(default)]
    pub state_code: String,
    #[serde(default)]
    pub combination_count: usize,
    pub year: i32,
    pub next_combination: usize,
    pub rows_written: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(life_cycle: LifeCycle, state_code: &str, year: i32, combination_count: usize) -> Self {
        Self {
            life_cycle,
            state_code: state_code.to_string(),
            combination_count,
            year,
            next_combination: 0,
            rows_written: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn advance(&mut self, next_combination: usize, rows: u64) {
        self.next_combination = next_combination;
        self.rows_written += rows;
        self.updated_at = Utc::now();
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read checkpoint {}", path.display()));
            }
        };
        let checkpoint = serde_json::from_str(&contents)
            .with_context(|| format!("malformed checkpoint {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    /// Writes next to the target and renames over it, so a crash mid-write
    /// leaves the previous checkpoint intact.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, json).with_context(|| format!("failed to write checkpoint {}", path.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move checkpoint into {}", path.display()))?;
        Ok(())
    }

    pub fn clear(path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove checkpoint {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Checkpoint::load(dir.path().join("none.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn saved_position_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut checkpoint = Checkpoint::new(LifeCycle::Child, "26", 2024, 60);
        checkpoint.advance(7, 185);
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert!(!dir.path().join("checkpoint.json.tmp").exists());

        Checkpoint::clear(&path).unwrap();
        Checkpoint::clear(&path).unwrap();
        assert!(Checkpoint::load(&path).unwrap().is_none());
    }

    #[test]
    fn checkpoints_without_a_run_identity_still_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(
            &path,
            r#"{"life_cycle":"child","year":2024,"next_combination":3,"rows_written":9,
                "updated_at":"2026-01-05T10:00:00Z"}"#,
        )
        .unwrap();
        let loaded = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded.next_combination, 3);
        assert_eq!(loaded.state_code, "");
        assert_eq!(loaded.combination_count, 0);
    }

    #[test]
    fn garbage_is_an_error_not_a_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Checkpoint::load(&path).is_err());
    }
}
