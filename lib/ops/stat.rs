//! The Stat handler: glob expansion, exclusion filtering, and per-item
//! metadata collection. Get runs this first to validate its globs.

use std::{
    collections::BTreeMap,
    fs,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use crate::{
    archive::is_archive_path,
    fsutil::{
        glob::{contains_glob_metachars, extended_glob},
        path::convert_to_rel_subdirectory,
        resolve::{path_is_excluded, resolve_path},
        unix,
    },
    idmap::{IdMappings, IdPair},
    pattern::ExclusionMatcher,
};

use super::{
    options::StatOptions,
    request::ResolvedRequest,
    response::{Payload, Response, StatForItem, StatsForGlob},
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(crate) fn handler_stat(
    req: &ResolvedRequest,
    options: &StatOptions,
    matcher: &ExclusionMatcher,
    idmap: Option<&IdMappings>,
) -> Response {
    let error_response =
        |message: String| Response::error(Payload::Stat { globs: Vec::new() }, message);

    if req.globs().is_empty() {
        return error_response("stat: expected at least one glob pattern, got none".into());
    }

    let mut stats: Vec<StatsForGlob> = Vec::new();
    for (i, glob) in req.globs().iter().enumerate() {
        let mut group = StatsForGlob {
            glob: req.preserved_globs[i].clone(),
            ..Default::default()
        };
        let matched = match extended_glob(Path::new(glob)) {
            Ok(matched) => matched,
            Err(err) => {
                group.error = Some(format!("stat: {err} while matching glob pattern {glob:?}"));
                Vec::new()
            }
        };
        // a wildcard pattern that matched nothing is silently skipped; a
        // literal path that matched nothing still gets a "not found" result
        if matched.is_empty() && contains_glob_metachars(glob) {
            continue;
        }
        for globbed in &matched {
            let (rel, excluded) = match path_is_excluded(req.root(), globbed, Some(matcher)) {
                Ok(pair) => pair,
                Err(err) => return error_response(format!("stat: {err}")),
            };
            if excluded {
                continue;
            }
            let result_name = match result_name(req, i, globbed, &rel) {
                Ok(name) => name,
                Err(message) => return error_response(message),
            };
            let mut result = StatForItem {
                name: result_name.clone(),
                ..Default::default()
            };
            group.globbed.push(result_name.clone());
            match stat_one(req, options, matcher, idmap, globbed, &mut result) {
                Ok(()) => {}
                Err(StatFailure::Item(message)) => result.error = Some(message),
                Err(StatFailure::Fatal(message)) => return error_response(message),
            }
            group.results.insert(result_name, result);
        }
        if group.globbed.is_empty() {
            group.globbed = Vec::new();
            group.results = BTreeMap::new();
            group.error = Some(format!("stat {glob:?}: no such file or directory"));
        }
        stats.push(group);
    }
    if stats.is_empty() {
        stats.push(StatsForGlob {
            error: Some(format!(
                "stat {:?}: no such file or directory",
                req.globs()
            )),
            ..Default::default()
        });
    }
    Response::new(Payload::Stat { globs: stats })
}

//--------------------------------------------------------------------------------------------------
// Types: private
//--------------------------------------------------------------------------------------------------

enum StatFailure {
    /// Recorded on the item; the rest of the glob continues.
    Item(String),
    /// Aborts the whole request.
    Fatal(String),
}

//--------------------------------------------------------------------------------------------------
// Functions: private
//--------------------------------------------------------------------------------------------------

fn result_name(
    req: &ResolvedRequest,
    glob_index: usize,
    globbed: &Path,
    rel: &Path,
) -> Result<String, String> {
    // if the glob was an absolute path, reconstruct the path that we should
    // hand back for the match
    if Path::new(&req.preserved_globs[glob_index]).is_absolute() {
        let rebased = match convert_to_rel_subdirectory(Path::new("/"), globbed) {
            Ok(rebased) => rebased,
            Err(err) => return Err(format!("stat: {err}")),
        };
        return Ok(req
            .root_prefix
            .join(rebased)
            .to_string_lossy()
            .into_owned());
    }
    let rel_result = if req.directory() != req.root() {
        convert_to_rel_subdirectory(req.directory(), globbed).map_err(|err| {
            format!(
                "stat: error making {globbed:?} relative to {:?}: {err}",
                req.directory()
            )
        })?
    } else {
        rel.to_path_buf()
    };
    Ok(rel_result.to_string_lossy().into_owned())
}

fn stat_one(
    req: &ResolvedRequest,
    options: &StatOptions,
    matcher: &ExclusionMatcher,
    idmap: Option<&IdMappings>,
    globbed: &PathBuf,
    result: &mut StatForItem,
) -> Result<(), StatFailure> {
    let linfo = fs::symlink_metadata(globbed)
        .map_err(|err| StatFailure::Item(err.to_string()))?;
    result.size = linfo.len();
    result.mode = linfo.mode();
    result.mtime = linfo
        .modified()
        .map_err(|err| StatFailure::Item(err.to_string()))?;
    let (mut uid, mut gid) = unix::owner(&linfo);
    if let Some(idmap) = idmap {
        let mapped = idmap
            .to_container(IdPair { uid, gid })
            .map_err(|err| {
                StatFailure::Fatal(format!(
                    "stat: mapping host filesystem owner {uid}:{gid} to container filesystem owner: {err}"
                ))
            })?;
        uid = mapped.uid;
        gid = mapped.gid;
    }
    result.uid = uid;
    result.gid = gid;
    result.is_dir = linfo.is_dir();
    result.is_regular = linfo.file_type().is_file();
    result.is_symlink = linfo.file_type().is_symlink();
    let mut check_for_archive = options.check_for_archives;
    if result.is_symlink {
        // record where the link points, both by itself and in the context of
        // the root
        let immediate = fs::read_link(globbed)
            .map_err(|err| StatFailure::Item(err.to_string()))?;
        result.immediate_target = Some(immediate.to_string_lossy().into_owned());
        let resolved = resolve_path(req.root(), globbed, true, Some(matcher))
            .map_err(|err| StatFailure::Fatal(format!("stat: error resolving {globbed:?}: {err}")))?;
        let info = fs::symlink_metadata(&resolved)
            .map_err(|err| StatFailure::Item(err.to_string()))?;
        // describe the target, not the link itself
        if info.file_type().is_file() && options.check_for_archives {
            result.is_archive = is_archive_path(&resolved);
            check_for_archive = false;
        }
        result.is_dir = info.is_dir();
        result.is_regular = info.file_type().is_file();
    }
    if result.is_regular && check_for_archive {
        result.is_archive = is_archive_path(globbed);
    }
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use tempfile::tempdir;

    use crate::ops::request::{Operation, Request};

    use super::*;

    fn stat_request(root: &Path, globs: &[&str], options: StatOptions) -> ResolvedRequest {
        Request {
            root: root.to_path_buf(),
            directory: root.to_path_buf(),
            globs: globs.iter().map(|g| g.to_string()).collect(),
            op: Operation::Stat(options),
        }
        .normalize(false)
        .unwrap()
    }

    fn run(req: &ResolvedRequest, options: &StatOptions) -> Vec<StatsForGlob> {
        let matcher = ExclusionMatcher::new(options.excludes.iter()).unwrap();
        let response = handler_stat(req, options, &matcher, None);
        assert!(response.error.is_none(), "{:?}", response.error);
        match response.payload {
            Payload::Stat { globs } => globs,
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_stat_literal_match_and_metadata() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        fs::write(root.join("file.txt"), "payload")?;

        let options = StatOptions::default();
        let req = stat_request(root, &["file.txt"], options.clone());
        let groups = run(&req, &options);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].globbed, vec!["file.txt"]);
        let item = &groups[0].results["file.txt"];
        assert_eq!(item.size, 7);
        assert!(item.is_regular);
        assert!(!item.is_dir);
        Ok(())
    }

    #[test]
    fn test_stat_zero_match_asymmetry() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        fs::write(root.join("present.txt"), "x")?;

        // wildcard matching nothing: silently dropped
        let options = StatOptions::default();
        let req = stat_request(root, &["*.rs", "present.txt"], options.clone());
        let groups = run(&req, &options);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].glob, "present.txt");

        // literal matching nothing: per-glob not-found result
        let req = stat_request(root, &["missing.txt"], options.clone());
        let groups = run(&req, &options);
        assert_eq!(groups.len(), 1);
        assert!(groups[0]
            .error
            .as_deref()
            .unwrap()
            .contains("no such file or directory"));
        Ok(())
    }

    #[test]
    fn test_stat_symlink_describes_target() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        fs::create_dir(root.join("dir"))?;
        symlink("dir", root.join("link"))?;

        let options = StatOptions::default();
        let req = stat_request(root, &["link"], options.clone());
        let groups = run(&req, &options);
        let item = &groups[0].results["link"];
        assert!(item.is_symlink);
        assert!(item.is_dir);
        assert!(!item.is_regular);
        assert_eq!(item.immediate_target.as_deref(), Some("dir"));
        Ok(())
    }

    #[test]
    fn test_stat_excluded_matches_are_dropped() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        fs::write(root.join("keep.txt"), "x")?;
        fs::write(root.join("drop.txt"), "x")?;

        let options = StatOptions::builder()
            .excludes(vec!["drop.txt".to_string()])
            .build();
        let req = stat_request(root, &["*.txt"], options.clone());
        let groups = run(&req, &options);
        assert_eq!(groups[0].globbed, vec!["keep.txt"]);
        Ok(())
    }
}
