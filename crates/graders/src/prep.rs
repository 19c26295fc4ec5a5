//! Shared sandbox-preparation logic used by every grader: copying referenced
//! File blobs into a fresh scratch directory before any subprocess spawns.

use std::collections::HashSet;
use std::path::Path;

use gradekeep_store::{FileRecord, TestRecord};

use crate::error::{GraderError, GraderResult};

/// Copies every Test file and Submission file into `dir`, rejecting the run
/// before any process is spawned if two files in the same reference set
/// share a non-empty `key`.
pub fn prepare_sandbox(
    dir: &Path,
    test: &TestRecord,
    test_files: &[FileRecord],
    submission_files: &[FileRecord],
) -> GraderResult<()> {
    reject_duplicate_keys(test_files)?;
    reject_duplicate_keys(submission_files)?;

    for file in test_files {
        let dest_name = test_file_dest_name(test, file);
        copy_into(dir, file, &dest_name)?;
    }
    for file in submission_files {
        let dest_name = if file.key.is_empty() {
            "submission".to_string()
        } else {
            file.key.clone()
        };
        copy_into(dir, file, &dest_name)?;
    }
    Ok(())
}

/// `"input"` is exempt: the `io` grader deliberately attaches many Files
/// under that one key (one per input vector), so only the singular keys
/// (`script`, `solution`, `submission`) are required to be unique.
fn reject_duplicate_keys(files: &[FileRecord]) -> GraderResult<()> {
    let mut seen = HashSet::new();
    for file in files {
        if file.key.is_empty() || file.key == "input" {
            continue;
        }
        if !seen.insert(file.key.as_str()) {
            return Err(GraderError::DuplicateKey(file.key.clone()));
        }
    }
    Ok(())
}

fn test_file_dest_name(test: &TestRecord, file: &FileRecord) -> String {
    if !file.key.is_empty() {
        return file.key.clone();
    }
    Path::new(&test.path_script)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(&file.name)
        .to_string()
}

fn copy_into(dir: &Path, file: &FileRecord, dest_name: &str) -> GraderResult<()> {
    let dest = dir.join(dest_name);
    std::fs::copy(&file.path, &dest)?;
    make_executable(&dest)?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Returns the single file in `files` whose `key == key`, erroring if none
/// or more than one match — callers that need "the unique file with this
/// key" (grader scripts, reference solutions, submission programs) all
/// share this ambiguity check.
pub fn find_unique_by_key<'a>(
    files: &'a [FileRecord],
    key: &str,
) -> GraderResult<&'a FileRecord> {
    let mut matches = files.iter().filter(|f| f.key == key);
    let first = matches
        .next()
        .ok_or_else(|| GraderError::Precondition(format!("no file with key {key:?}")))?;
    if matches.next().is_some() {
        return Err(GraderError::Precondition(format!(
            "multiple files with key {key:?}"
        )));
    }
    Ok(first)
}

/// Returns every file in `files` whose `key == key`, sorted by name for a
/// stable iteration order (used for `io` grader input vectors).
pub fn find_all_by_key<'a>(files: &'a [FileRecord], key: &str) -> Vec<&'a FileRecord> {
    let mut matches: Vec<&FileRecord> = files.iter().filter(|f| f.key == key).collect();
    matches.sort_by(|a, b| a.name.cmp(&b.name));
    matches
}
