use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{ScanConfig, ScanError, SourceFile};

/// Display names for the languages the default extension set covers.
const LANGUAGES: &[(&str, &str)] = &[
    ("py", "Python"),
    ("js", "JavaScript"),
    ("jsx", "JavaScript"),
    ("ts", "TypeScript"),
    ("tsx", "TypeScript"),
    ("java", "Java"),
    ("go", "Go"),
    ("rb", "Ruby"),
    ("php", "PHP"),
    ("cs", "C#"),
    ("cpp", "C++"),
    ("c", "C"),
    ("h", "C"),
    ("hpp", "C++"),
    ("rs", "Rust"),
];

pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Walks the input path and yields the files that qualify for scanning.
///
/// A path qualifies iff its extension is allowed, it is a regular file,
/// its size is within the cap, and no path segment matches an exclusion
/// pattern. The result is sorted by relative path so batch contents are
/// reproducible for identical inputs.
pub struct FileSelector<'a> {
    root: PathBuf,
    config: &'a ScanConfig,
}

impl<'a> FileSelector<'a> {
    pub fn new(root: impl Into<PathBuf>, config: &'a ScanConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Directory that selected paths are relative to.
    pub fn content_root(&self) -> PathBuf {
        if self.root.is_file() {
            self.root
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        } else {
            self.root.clone()
        }
    }

    pub fn select(&self) -> Result<Vec<SourceFile>, ScanError> {
        let meta = fs::symlink_metadata(&self.root).map_err(|_| ScanError::InputNotFound {
            path: self.root.clone(),
        })?;

        if meta.is_file() {
            let name = self
                .root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.is_excluded(&name) || !self.has_allowed_extension(&self.root) {
                return Ok(Vec::new());
            }
            if meta.len() > self.config.max_file_size {
                debug!(path = %self.root.display(), size = meta.len(), "skipping oversized file");
                return Ok(Vec::new());
            }
            return Ok(vec![self.source_file(PathBuf::from(name), meta.len())]);
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !self.is_excluded(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "cannot access path, skipping");
                    continue;
                }
            };
            // Symlinks are not followed, so their entries are not regular files.
            if !entry.file_type().is_file() {
                continue;
            }
            if !self.has_allowed_extension(entry.path()) {
                continue;
            }
            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "cannot stat file, skipping");
                    continue;
                }
            };
            if size > self.config.max_file_size {
                debug!(path = %entry.path().display(), size, "skipping oversized file");
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.push(self.source_file(relative, size));
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn source_file(&self, path: PathBuf, size: u64) -> SourceFile {
        let language = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(language_for_extension);
        SourceFile {
            path,
            size,
            language,
        }
    }

    fn has_allowed_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.config
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.config
            .exclude_patterns
            .iter()
            .any(|pattern| matches_pattern(name, pattern))
    }
}

/// Simple wildcard matching: a leading `*` anchors the suffix, a trailing
/// `*` anchors the prefix, anything else matches as a substring or exact
/// name.
fn matches_pattern(name: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        name == pattern || name.contains(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, write};

    fn config() -> ScanConfig {
        ScanConfig::default()
    }

    #[test]
    fn missing_root_is_input_not_found() {
        let config = config();
        let selector = FileSelector::new("/definitely/not/here", &config);
        let err = selector.select().unwrap_err();
        assert!(matches!(err, ScanError::InputNotFound { .. }));
    }

    #[test]
    fn empty_root_yields_no_files_without_error() {
        let temp = tempfile::tempdir().unwrap();
        let config = config();
        let selector = FileSelector::new(temp.path(), &config);
        assert!(selector.select().unwrap().is_empty());
    }

    #[test]
    fn selects_by_extension_in_stable_path_order() {
        let temp = tempfile::tempdir().unwrap();
        create_dir_all(temp.path().join("b")).unwrap();
        write(temp.path().join("b/late.py"), "print()").unwrap();
        write(temp.path().join("app.js"), "let x = 1;").unwrap();
        write(temp.path().join("README.md"), "# docs").unwrap();

        let config = config();
        let selector = FileSelector::new(temp.path(), &config);
        let files = selector.select().unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("app.js"), PathBuf::from("b/late.py")]);
        assert_eq!(files[0].language, Some("JavaScript"));
        assert_eq!(files[1].language, Some("Python"));
    }

    #[test]
    fn excluded_directories_are_pruned() {
        let temp = tempfile::tempdir().unwrap();
        create_dir_all(temp.path().join("node_modules/pkg")).unwrap();
        write(temp.path().join("node_modules/pkg/index.js"), "x").unwrap();
        write(temp.path().join("main.js"), "x").unwrap();

        let config = config();
        let selector = FileSelector::new(temp.path(), &config);
        let files = selector.select().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("main.js"));
    }

    #[test]
    fn minified_assets_match_wildcard_patterns() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path().join("bundle.min.js"), "x").unwrap();
        write(temp.path().join("app.js"), "x").unwrap();

        let config = config();
        let selector = FileSelector::new(temp.path(), &config);
        let files = selector.select().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("app.js"));
    }

    #[test]
    fn files_over_size_cap_are_skipped() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path().join("big.py"), "x".repeat(64)).unwrap();
        write(temp.path().join("small.py"), "x").unwrap();

        let mut config = config();
        config.max_file_size = 16;
        let selector = FileSelector::new(temp.path(), &config);
        let files = selector.select().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("small.py"));
    }

    #[test]
    fn single_file_root_is_supported() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("only.py");
        write(&file, "print('hi')").unwrap();

        let config = config();
        let selector = FileSelector::new(&file, &config);
        let files = selector.select().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("only.py"));
        assert_eq!(selector.content_root(), temp.path());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_selected() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path().join("real.py"), "x").unwrap();
        std::os::unix::fs::symlink(temp.path().join("real.py"), temp.path().join("link.py"))
            .unwrap();

        let config = config();
        let selector = FileSelector::new(temp.path(), &config);
        let files = selector.select().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("real.py"));
    }

    #[test]
    fn pattern_matching_handles_anchors() {
        assert!(matches_pattern("bundle.min.js", "*.min.js"));
        assert!(matches_pattern("venv-311", "venv*"));
        assert!(matches_pattern(".git", ".git"));
        assert!(!matches_pattern("target.rs", "*.min.js"));
    }
}
