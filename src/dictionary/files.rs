// Dictionary files — the backing file handed to the segmenter, plus the
// optional directory of static dictionaries loaded alongside it.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// How terms are written to the backing dictionary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryFormat {
    /// One bare term per line.
    Bare,
    /// `term weight` per line; the weight is a segmenter frequency hint.
    Weighted(u64),
}

impl Default for DictionaryFormat {
    fn default() -> Self {
        DictionaryFormat::Weighted(100_000)
    }
}

/// Default backing file location: `<cache dir>/muzzle/userdict.txt`.
pub fn default_user_dict_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("muzzle")
        .join("userdict.txt")
}

/// Truncate and rewrite the backing dictionary file with `values`, one per line.
///
/// The file is created with owner-only permissions on Unix. Values are
/// written in the order given; callers sort them for stable output.
pub fn write_dictionary_file<'a, I>(path: &Path, values: I, format: DictionaryFormat) -> Result<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create directory for dictionary: {}", path.display())
            })?;
        }
    }

    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options
        .open(path)
        .with_context(|| format!("Failed to open dictionary file {}", path.display()))?;

    let mut writer = BufWriter::new(file);
    let mut written = 0;
    for value in values {
        if value.is_empty() {
            continue;
        }
        match format {
            DictionaryFormat::Bare => writeln!(writer, "{value}"),
            DictionaryFormat::Weighted(weight) => writeln!(writer, "{value} {weight}"),
        }
        .with_context(|| format!("Failed to write dictionary file {}", path.display()))?;
        written += 1;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write dictionary file {}", path.display()))?;

    Ok(written)
}

/// Every regular file under `dir`, recursively, in file-name order.
///
/// Symlinks are followed; a link cycle is an error rather than a walk that
/// revisits the same files.
pub fn static_dictionary_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry
            .with_context(|| format!("Failed to read dictionary directory {}", dir.display()))?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_weighted_and_bare() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.txt");

        let n = write_dictionary_file(&path, ["now", "spam"], DictionaryFormat::default()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "now 100000\nspam 100000\n");

        write_dictionary_file(&path, ["spam", ""], DictionaryFormat::Bare).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "spam\n");
    }

    #[test]
    fn test_rewrite_truncates_stale_terms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.txt");
        write_dictionary_file(&path, ["a-long-stale-term", "b"], DictionaryFormat::Bare).unwrap();
        write_dictionary_file(&path, ["c"], DictionaryFormat::Bare).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "c\n");
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("dict.txt");
        write_dictionary_file(&path, ["x"], DictionaryFormat::Bare).unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.txt");
        write_dictionary_file(&path, ["x"], DictionaryFormat::Bare).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_static_dictionary_paths_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.txt"), "b\n").unwrap();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        fs::write(dir.path().join("sub").join("c.txt"), "c\n").unwrap();

        let paths = static_dictionary_paths(dir.path()).unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn test_static_dictionary_paths_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(static_dictionary_paths(&dir.path().join("missing")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_static_dictionary_paths_rejects_symlink_loop() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        std::os::unix::fs::symlink(".", dir.path().join("loop")).unwrap();

        let err = static_dictionary_paths(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read dictionary directory"));
    }

    #[cfg(unix)]
    #[test]
    fn test_static_dictionary_paths_follows_file_links() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("shared.txt"), "x\n").unwrap();
        std::os::unix::fs::symlink(outside.path().join("shared.txt"), dir.path().join("linked.txt"))
            .unwrap();

        let paths = static_dictionary_paths(dir.path()).unwrap();
        assert_eq!(paths, vec![dir.path().join("linked.txt")]);
    }
}
