use std::{collections::HashMap, fs::Metadata, os::unix::fs::MetadataExt, path::PathBuf};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A per-archive arena that remembers which device+inode pairs have already
/// been written, so that additional names for the same file can be emitted as
/// hardlink entries instead of duplicating content bytes.
///
/// The walk that feeds an archive is strictly sequential, so a plain map is
/// all the bookkeeping this needs.
#[derive(Debug, Default)]
pub struct HardlinkChecker {
    seen: HashMap<(u64, u64), PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HardlinkChecker {
    /// Creates an empty checker.
    pub fn new() -> Self {
        Self::default()
    }

    /// If a file with the same device and inode was already added, returns
    /// the name it was first seen under.
    pub fn check(&self, meta: &Metadata) -> Option<&PathBuf> {
        if meta.is_file() && meta.nlink() > 1 {
            return self.seen.get(&(meta.dev(), meta.ino()));
        }
        None
    }

    /// Notes the name a file was first seen under.
    pub fn add(&mut self, meta: &Metadata, name: impl Into<PathBuf>) {
        if meta.is_file() && meta.nlink() > 1 {
            self.seen
                .entry((meta.dev(), meta.ino()))
                .or_insert_with(|| name.into());
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_hardlink_checker_finds_second_name() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let first = temp.path().join("first.txt");
        let second = temp.path().join("second.txt");
        fs::write(&first, "shared")?;
        fs::hard_link(&first, &second)?;

        let mut checker = HardlinkChecker::new();
        let first_meta = fs::metadata(&first)?;
        assert!(checker.check(&first_meta).is_none());
        checker.add(&first_meta, "first.txt");

        let second_meta = fs::metadata(&second)?;
        assert_eq!(
            checker.check(&second_meta),
            Some(&PathBuf::from("first.txt"))
        );
        Ok(())
    }

    #[test]
    fn test_hardlink_checker_ignores_singly_linked_files() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let only = temp.path().join("only.txt");
        fs::write(&only, "alone")?;

        let mut checker = HardlinkChecker::new();
        let meta = fs::metadata(&only)?;
        checker.add(&meta, "only.txt");
        assert!(checker.check(&meta).is_none());
        Ok(())
    }
}
