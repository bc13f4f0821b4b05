//! End-to-end tests of the public operations, run in-process so they work
//! without privilege and independently of the test harness binary.

use std::{
    collections::BTreeMap,
    fs,
    io::Read,
    os::unix::fs::{symlink, MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
};

use ferry::{
    ConditionalRemoveOptions, ConditionalRemovePath, Copier, EnsureKind, EnsureOptions,
    EnsurePath, GetOptions, IsolationPolicy, PutOptions, RemoveOptions, StatOptions,
};
use tempfile::tempdir;

fn copier() -> Copier {
    Copier::new(IsolationPolicy::InProcess)
}

/// Put applies the ownership recorded in each entry, so hand-built headers
/// carry the current user to stay runnable without privilege.
fn stamp_owner(header: &mut tar::Header) {
    header.set_uid(u64::from(nix::unistd::getuid().as_raw()));
    header.set_gid(u64::from(nix::unistd::getgid().as_raw()));
}

/// Collects (name, entry type, link name) triples from a tar stream.
fn archive_entries(archive: &[u8]) -> anyhow::Result<Vec<(String, tar::EntryType, Option<String>)>> {
    let mut reader = tar::Archive::new(archive);
    let mut entries = Vec::new();
    for entry in reader.entries()? {
        let entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let kind = entry.header().entry_type();
        let link = entry
            .link_name()?
            .map(|l| l.to_string_lossy().into_owned());
        entries.push((name, kind, link));
    }
    Ok(entries)
}

fn archive_contents(archive: &[u8]) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
    let mut reader = tar::Archive::new(archive);
    let mut contents = BTreeMap::new();
    for entry in reader.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut body = Vec::new();
        entry.read_to_end(&mut body)?;
        contents.insert(name, body);
    }
    Ok(contents)
}

#[test_log::test]
fn test_eval_stays_confined_across_hostile_symlinks() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    fs::create_dir(root.join("etc"))?;
    symlink("/etc", root.join("link"))?;

    // an absolute symlink target is re-rooted under the confinement root
    let evaluated = copier().eval(root, root.join("link"))?;
    assert_eq!(evaluated, root.join("etc"));

    // `..` chains clamp instead of escaping
    let evaluated = copier().eval(root, Path::new("../../../etc"))?;
    assert_eq!(evaluated, root.join("etc"));
    Ok(())
}

#[test_log::test]
fn test_get_put_round_trip_preserves_hardlinks() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let source_root = temp.path().join("source");
    fs::create_dir_all(source_root.join("data"))?;
    fs::write(source_root.join("data/first.txt"), "shared bytes")?;
    fs::hard_link(
        source_root.join("data/first.txt"),
        source_root.join("data/second.txt"),
    )?;

    let mut archive = Vec::new();
    copier().get(
        &source_root,
        &source_root,
        GetOptions::builder().build(),
        &["data".to_string()],
        &mut archive,
    )?;

    let dest_root = temp.path().join("dest");
    fs::create_dir_all(&dest_root)?;
    copier().put(
        &dest_root,
        &dest_root,
        PutOptions::builder().build(),
        archive.as_slice(),
    )?;

    let first = fs::read_to_string(dest_root.join("first.txt"))?;
    let second = fs::read_to_string(dest_root.join("second.txt"))?;
    assert_eq!(first, "shared bytes");
    assert_eq!(second, "shared bytes");
    let first_meta = fs::metadata(dest_root.join("first.txt"))?;
    let second_meta = fs::metadata(dest_root.join("second.txt"))?;
    assert_eq!(first_meta.ino(), second_meta.ino(), "hardlink not restored");
    Ok(())
}

#[test_log::test]
fn test_get_hardlinks_and_symlink_entry_types() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    fs::write(root.join("a.txt"), "payload")?;
    fs::hard_link(root.join("a.txt"), root.join("b.txt"))?;
    fs::hard_link(root.join("a.txt"), root.join("c.txt"))?;
    symlink("a.txt", root.join("link"))?;

    let mut archive = Vec::new();
    copier().get(
        root,
        root,
        GetOptions::builder().no_deref_symlinks(true).build(),
        &["*".to_string()],
        &mut archive,
    )?;

    let entries = archive_entries(&archive)?;
    assert_eq!(
        entries,
        vec![
            ("a.txt".to_string(), tar::EntryType::Regular, None),
            (
                "b.txt".to_string(),
                tar::EntryType::Link,
                Some("a.txt".to_string())
            ),
            (
                "c.txt".to_string(),
                tar::EntryType::Link,
                Some("a.txt".to_string())
            ),
            (
                "link".to_string(),
                tar::EntryType::Symlink,
                Some("a.txt".to_string())
            ),
        ]
    );
    Ok(())
}

#[test_log::test]
fn test_get_exclusion_with_reinclusion() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    fs::create_dir(root.join("a"))?;
    fs::write(root.join("a/keep"), "kept")?;
    fs::write(root.join("a/drop"), "dropped")?;

    let mut archive = Vec::new();
    copier().get(
        root,
        root,
        GetOptions::builder()
            .excludes(vec!["a/*".to_string(), "!a/keep".to_string()])
            .build(),
        &["a".to_string()],
        &mut archive,
    )?;

    let contents = archive_contents(&archive)?;
    assert!(contents.contains_key("keep"));
    assert!(!contents.contains_key("drop"));
    Ok(())
}

#[test_log::test]
fn test_get_descends_excluded_directory_for_reincluded_descendant() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    fs::create_dir_all(root.join("a/sub"))?;
    fs::write(root.join("a/sub/keep"), "kept")?;
    fs::write(root.join("a/other"), "hidden")?;
    fs::write(root.join("top.txt"), "top")?;

    let mut archive = Vec::new();
    copier().get(
        root,
        root,
        GetOptions::builder()
            .excludes(vec!["a".to_string(), "!a/sub/keep".to_string()])
            .build(),
        &["*".to_string()],
        &mut archive,
    )?;

    let contents = archive_contents(&archive)?;
    assert!(
        contents.contains_key("sub/keep"),
        "re-included descendant missing: {:?}",
        contents.keys().collect::<Vec<_>>()
    );
    assert!(!contents.keys().any(|k| k.contains("other")));
    assert!(contents.contains_key("top.txt"));
    Ok(())
}

#[test_log::test]
fn test_get_literal_glob_matching_nothing_fails() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    fs::write(root.join("present.txt"), "x")?;

    let err = copier()
        .get(
            root,
            root,
            GetOptions::builder().build(),
            &["absent.txt".to_string()],
            &mut Vec::new(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("no such file or directory"));
    Ok(())
}

#[test_log::test]
fn test_get_everything_excluded_copies_no_items() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    fs::write(root.join("only.txt"), "x")?;

    let err = copier()
        .get(
            root,
            root,
            GetOptions::builder()
                .excludes(vec!["only.txt".to_string()])
                .build(),
            &["*".to_string()],
            &mut Vec::new(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("copied no items"));
    Ok(())
}

#[test_log::test]
fn test_put_creates_missing_parent_chain() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    let dest = root.join("dest");
    fs::create_dir(&dest)?;

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(5);
    header.set_mode(0o640);
    header.set_mtime(1_600_000_000);
    stamp_owner(&mut header);
    header.set_cksum();
    builder.append_data(&mut header, "a/b/c.txt", "hello".as_bytes())?;
    let archive = builder.into_inner()?;

    copier().put(
        root,
        &dest,
        PutOptions::builder().build(),
        archive.as_slice(),
    )?;

    assert!(dest.join("a").is_dir());
    assert!(dest.join("a/b").is_dir());
    // implicitly-created directories get the default directory mode
    assert_eq!(
        fs::metadata(dest.join("a"))?.permissions().mode() & 0o777,
        0o755
    );
    assert_eq!(
        fs::metadata(dest.join("a/b"))?.permissions().mode() & 0o777,
        0o755
    );
    // the file keeps the entry's own mode
    assert_eq!(
        fs::metadata(dest.join("a/b/c.txt"))?.permissions().mode() & 0o777,
        0o640
    );
    assert_eq!(fs::read_to_string(dest.join("a/b/c.txt"))?, "hello");
    Ok(())
}

#[test_log::test]
fn test_put_restores_directory_mtimes() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let source_root = temp.path().join("source");
    fs::create_dir_all(source_root.join("tree/inner"))?;
    fs::write(source_root.join("tree/inner/file.txt"), "content")?;

    let mut archive = Vec::new();
    copier().get(
        &source_root,
        &source_root,
        GetOptions::builder().keep_directory_names(true).build(),
        &["tree".to_string()],
        &mut archive,
    )?;
    let source_mtime = fs::metadata(source_root.join("tree"))?.modified()?;

    let dest_root = temp.path().join("dest");
    fs::create_dir_all(&dest_root)?;
    copier().put(
        &dest_root,
        &dest_root,
        PutOptions::builder().build(),
        archive.as_slice(),
    )?;

    // directory mtimes come from the archive, not from creation order
    let restored = fs::metadata(dest_root.join("tree"))?.modified()?;
    let skew = restored
        .duration_since(source_mtime)
        .unwrap_or_default()
        .as_secs();
    assert!(skew <= 1, "directory mtime not restored from archive");
    Ok(())
}

#[test_log::test]
fn test_put_no_overwrite_dir_non_dir() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    let dest = root.join("dest");
    fs::create_dir_all(dest.join("collision"))?;

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(3);
    header.set_mode(0o644);
    stamp_owner(&mut header);
    header.set_cksum();
    builder.append_data(&mut header, "collision", "abc".as_bytes())?;
    let archive = builder.into_inner()?;

    // with the policy flag, the collision is an error
    let err = copier()
        .put(
            root,
            &dest,
            PutOptions::builder().no_overwrite_dir_non_dir(true).build(),
            archive.as_slice(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("collision"));
    assert!(dest.join("collision").is_dir());

    // without it, the directory is quietly replaced
    copier().put(
        root,
        &dest,
        PutOptions::builder().build(),
        archive.as_slice(),
    )?;
    assert!(dest.join("collision").is_file());
    assert_eq!(fs::read_to_string(dest.join("collision"))?, "abc");
    Ok(())
}

#[test_log::test]
fn test_put_symlink_and_hardlink_entries() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    let dest = root.join("dest");
    fs::create_dir(&dest)?;

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(4);
    header.set_mode(0o644);
    stamp_owner(&mut header);
    header.set_cksum();
    builder.append_data(&mut header, "target.txt", "data".as_bytes())?;
    let mut link_header = tar::Header::new_gnu();
    link_header.set_entry_type(tar::EntryType::Link);
    link_header.set_size(0);
    link_header.set_mode(0o644);
    stamp_owner(&mut link_header);
    link_header.set_cksum();
    builder.append_link(&mut link_header, "hard.txt", "target.txt")?;
    let mut symlink_header = tar::Header::new_gnu();
    symlink_header.set_entry_type(tar::EntryType::Symlink);
    symlink_header.set_size(0);
    symlink_header.set_mode(0o777);
    stamp_owner(&mut symlink_header);
    symlink_header.set_cksum();
    builder.append_link(&mut symlink_header, "soft.txt", "target.txt")?;
    let archive = builder.into_inner()?;

    copier().put(
        root,
        &dest,
        PutOptions::builder().build(),
        archive.as_slice(),
    )?;

    assert_eq!(
        fs::metadata(dest.join("target.txt"))?.ino(),
        fs::metadata(dest.join("hard.txt"))?.ino()
    );
    assert!(fs::symlink_metadata(dest.join("soft.txt"))?
        .file_type()
        .is_symlink());
    assert_eq!(
        fs::read_link(dest.join("soft.txt"))?,
        PathBuf::from("target.txt")
    );
    Ok(())
}

#[test_log::test]
fn test_ensure_is_idempotent() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();

    let options = || {
        EnsureOptions::builder()
            .paths(vec![EnsurePath::builder()
                .path(PathBuf::from("x/y/stub"))
                .kind(EnsureKind::File)
                .build()])
            .build()
    };

    let (created, noted) = copier().ensure(root, root, options())?;
    assert_eq!(
        created,
        vec![
            PathBuf::from("x"),
            PathBuf::from("x/y"),
            PathBuf::from("x/y/stub")
        ]
    );
    assert!(noted.is_empty());
    assert!(root.join("x/y/stub").is_file());

    // second call: nothing to create, parents reported as merely walked
    let (created, noted) = copier().ensure(root, root, options())?;
    assert!(created.is_empty());
    let noted_paths: Vec<_> = noted.iter().map(|n| n.path.clone()).collect();
    assert_eq!(noted_paths, vec![PathBuf::from("x"), PathBuf::from("x/y")]);
    Ok(())
}

#[test_log::test]
fn test_conditional_remove_is_compare_and_delete() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    fs::write(root.join("stub"), "")?;
    let info = fs::metadata(root.join("stub"))?;

    // stale expected mtime: refuse to delete
    let stale = ConditionalRemoveOptions::builder()
        .paths(vec![ConditionalRemovePath::builder()
            .path(PathBuf::from("stub"))
            .mtime(std::time::UNIX_EPOCH)
            .build()])
        .build();
    let removed = copier().conditional_remove(root, root, stale)?;
    assert!(removed.is_empty());
    assert!(root.join("stub").exists());

    // matching mtime/mode/owner triple: delete
    let matching = ConditionalRemoveOptions::builder()
        .paths(vec![ConditionalRemovePath::builder()
            .path(PathBuf::from("stub"))
            .mtime(info.modified()?)
            .mode(info.permissions().mode() & 0o777)
            .owner(ferry::IdPair {
                uid: info.uid(),
                gid: info.gid(),
            })
            .build()])
        .build();
    let removed = copier().conditional_remove(root, root, matching)?;
    assert_eq!(removed, vec![PathBuf::from("stub")]);
    assert!(!root.join("stub").exists());

    // an already-absent path counts as removed
    let absent = ConditionalRemoveOptions::builder()
        .paths(vec![ConditionalRemovePath::builder()
            .path(PathBuf::from("stub"))
            .build()])
        .build();
    let removed = copier().conditional_remove(root, root, absent)?;
    assert_eq!(removed, vec![PathBuf::from("stub")]);
    Ok(())
}

#[test_log::test]
fn test_conditional_remove_keeps_nonempty_directories() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    fs::create_dir(root.join("dir"))?;
    fs::write(root.join("dir/keepsake"), "x")?;

    let options = ConditionalRemoveOptions::builder()
        .paths(vec![ConditionalRemovePath::builder()
            .path(PathBuf::from("dir"))
            .build()])
        .build();
    let removed = copier().conditional_remove(root, root, options)?;
    // not empty, so not removed, and not an error either
    assert!(removed.is_empty());
    assert!(root.join("dir/keepsake").exists());
    Ok(())
}

#[test_log::test]
fn test_mkdir_and_remove() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();

    copier().mkdir(
        root,
        Path::new("one/two/three"),
        ferry::MkdirOptions::builder().chmod_new(0o750).build(),
    )?;
    assert!(root.join("one/two/three").is_dir());
    assert_eq!(
        fs::metadata(root.join("one/two/three"))?.permissions().mode() & 0o777,
        0o750
    );

    // non-recursive remove refuses a non-empty directory
    assert!(copier()
        .remove(root, Path::new("one"), RemoveOptions::builder().build())
        .is_err());
    copier().remove(root, Path::new("one"), RemoveOptions::builder().all(true).build())?;
    assert!(!root.join("one").exists());
    Ok(())
}

#[test_log::test]
fn test_stat_reports_archives_when_asked() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(2);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "inner.txt", "hi".as_bytes())?;
    fs::write(root.join("layer.tar"), builder.into_inner()?)?;
    fs::write(root.join("notes.txt"), "just text")?;

    let results = copier().stat(
        root,
        root,
        StatOptions::builder().check_for_archives(true).build(),
        &["*".to_string()],
    )?;
    assert_eq!(results.len(), 1);
    assert!(results[0].results["layer.tar"].is_archive);
    assert!(!results[0].results["notes.txt"].is_archive);
    Ok(())
}

#[test_log::test]
fn test_get_parents_emits_ancestors_once() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    fs::create_dir_all(root.join("a/b"))?;
    fs::write(root.join("a/b/one.txt"), "1")?;
    fs::write(root.join("a/b/two.txt"), "2")?;

    let mut archive = Vec::new();
    copier().get(
        root,
        root,
        GetOptions::builder().parents(true).build(),
        &["a/b/one.txt".to_string(), "a/b/two.txt".to_string()],
        &mut archive,
    )?;

    let entries = archive_entries(&archive)?;
    let names: Vec<_> = entries.iter().map(|(name, _, _)| name.clone()).collect();
    assert_eq!(
        names,
        vec![
            "a/".to_string(),
            "a/b/".to_string(),
            "a/b/one.txt".to_string(),
            "a/b/two.txt".to_string()
        ]
    );
    Ok(())
}

#[test_log::test]
fn test_get_expand_archives_inlines_entries() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(6);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "inside/file.txt", "nested".as_bytes())?;
    fs::write(root.join("bundle.tar"), builder.into_inner()?)?;

    let mut archive = Vec::new();
    copier().get(
        root,
        root,
        GetOptions::builder().expand_archives(true).build(),
        &["bundle.tar".to_string()],
        &mut archive,
    )?;

    let contents = archive_contents(&archive)?;
    assert_eq!(
        contents.get("inside/file.txt").map(|b| b.as_slice()),
        Some("nested".as_bytes())
    );
    Ok(())
}

#[test_log::test]
fn test_get_rename_applies_longest_prefix() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let root = temp.path();
    fs::create_dir(root.join("olddir"))?;
    fs::write(root.join("olddir/file.txt"), "x")?;

    let mut rename = std::collections::HashMap::new();
    rename.insert("olddir".to_string(), "newdir".to_string());
    let mut archive = Vec::new();
    copier().get(
        root,
        root,
        GetOptions::builder()
            .keep_directory_names(true)
            .rename(rename)
            .build(),
        &["olddir".to_string()],
        &mut archive,
    )?;

    let contents = archive_contents(&archive)?;
    assert!(contents.contains_key("newdir/"));
    assert!(contents.contains_key("newdir/file.txt"));
    Ok(())
}
