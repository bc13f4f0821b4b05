use std::{collections::BTreeMap, io, path::Path};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Extended attributes travel in PAX records namespaced with this prefix.
pub const XATTR_PAX_PREFIX: &str = "SCHILY.xattr.";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads the extended attributes of `path` without following a final symlink.
///
/// Filesystems without xattr support yield an empty map rather than an error.
pub fn lget_xattrs(path: &Path) -> io::Result<BTreeMap<String, Vec<u8>>> {
    let mut attrs = BTreeMap::new();
    let names = match xattr::list(path) {
        Ok(names) => names,
        Err(err) if unsupported(&err) => return Ok(attrs),
        Err(err) => return Err(err),
    };
    for name in names {
        match xattr::get(path, &name) {
            Ok(Some(value)) => {
                attrs.insert(name.to_string_lossy().into_owned(), value);
            }
            // raced away or unreadable by name: leave it out
            Ok(None) => {}
            Err(err) if unsupported(&err) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(attrs)
}

/// Sets extended attributes on `path` without following a final symlink.
/// Stops at the first failure so the caller can decide whether to tolerate it.
pub fn lset_xattrs(path: &Path, attrs: &BTreeMap<String, Vec<u8>>) -> io::Result<()> {
    for (name, value) in attrs {
        xattr::set(path, name, value)?;
    }
    Ok(())
}

fn unsupported(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOTSUP) || err.raw_os_error() == Some(libc::EOPNOTSUPP)
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
    fn test_xattrs_round_trip_when_supported() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let file = temp.path().join("annotated.txt");
        fs::write(&file, "contents")?;

        let mut attrs = BTreeMap::new();
        attrs.insert("user.ferry-test".to_string(), b"value".to_vec());
        // tmpfs and some CI filesystems reject user xattrs; skip quietly there
        if lset_xattrs(&file, &attrs).is_err() {
            return Ok(());
        }

        let read_back = lget_xattrs(&file)?;
        assert_eq!(read_back.get("user.ferry-test"), Some(&b"value".to_vec()));
        Ok(())
    }

    #[test]
    fn test_xattrs_missing_file_is_an_error() {
        let temp = tempdir().unwrap();
        assert!(lget_xattrs(&temp.path().join("missing")).is_err());
    }
}
