//! The `sys_Write` side table. A generated script may fill it with
//! `INSERT INTO sys_Write (path, content) ...`; once the script has run, its
//! rows are written out as files below an output directory.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::text;

pub const SIDE_TABLE: &str = "sys_Write";

static PATH_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-_./a-zA-Z0-9]+$").unwrap());
static DOT_SEGMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/\.+/").unwrap());

#[derive(Debug, Error)]
pub enum SideTableError {
    #[error("empty output path")]
    Empty,

    #[error("invalid characters in output path {path:?}")]
    InvalidCharacters { path: String },

    #[error("output path must be relative: {path:?}")]
    Absolute { path: String },

    #[error("output path leaves the output directory: {path:?}")]
    Escapes { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Statements that (re)create the side table ahead of a generated script.
/// With `attach`, the table lives in that database file under schema `sys`.
pub fn preamble(attach: Option<&str>) -> Vec<String> {
    match attach {
        None => vec![
            format!("DROP TABLE IF EXISTS {SIDE_TABLE};"),
            format!("CREATE TABLE {SIDE_TABLE} ( path UNIQUE, content );"),
        ],
        Some(db) => vec![
            format!("ATTACH DATABASE {} AS sys;", text::quote(db)),
            format!("DROP TABLE IF EXISTS sys.{SIDE_TABLE};"),
            format!("CREATE TABLE sys.{SIDE_TABLE} ( path UNIQUE, content );"),
        ],
    }
}

/// Check a side-table path and return it relative and normalized.
pub fn validate_path(path: &str) -> Result<PathBuf, SideTableError> {
    if path.is_empty() {
        return Err(SideTableError::Empty);
    }
    if !PATH_CHARS.is_match(path) {
        return Err(SideTableError::InvalidCharacters {
            path: path.to_string(),
        });
    }
    if path.starts_with('/') {
        return Err(SideTableError::Absolute {
            path: path.to_string(),
        });
    }
    let escapes = || SideTableError::Escapes {
        path: path.to_string(),
    };
    if DOT_SEGMENT.is_match(path) {
        return Err(escapes());
    }

    let normalized: PathBuf = Path::new(path)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(escapes());
    }
    if normalized.as_os_str().is_empty() {
        return Err(SideTableError::Empty);
    }
    Ok(normalized)
}

/// Write every `(path, content)` row below `prefix`.
///
/// All paths are validated before anything touches the disk. Missing parent
/// directories are created. Returns the written paths in row order.
pub fn materialize(
    prefix: &Path,
    rows: &[(String, String)],
) -> Result<Vec<PathBuf>, SideTableError> {
    let targets = rows
        .iter()
        .map(|(path, content)| Ok((prefix.join(validate_path(path)?), content)))
        .collect::<Result<Vec<_>, SideTableError>>()?;

    let mut written = Vec::with_capacity(targets.len());
    for (target, content) in targets {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        tracing::info!(path = %target.display(), bytes = content.len(), "wrote file");
        written.push(target);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_preamble() {
        assert_eq!(
            preamble(None),
            vec![
                "DROP TABLE IF EXISTS sys_Write;",
                "CREATE TABLE sys_Write ( path UNIQUE, content );",
            ]
        );
    }

    #[test]
    fn test_preamble_attached() {
        assert_eq!(
            preamble(Some("out's.db")),
            vec![
                "ATTACH DATABASE 'out''s.db' AS sys;",
                "DROP TABLE IF EXISTS sys.sys_Write;",
                "CREATE TABLE sys.sys_Write ( path UNIQUE, content );",
            ]
        );
    }

    #[rstest]
    #[case("a.txt", "a.txt")]
    #[case("docs/index.html", "docs/index.html")]
    #[case("./docs/./x", "docs/x")]
    #[case("a-b_c/D.1", "a-b_c/D.1")]
    fn test_validate_path(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(validate_path(path).unwrap(), PathBuf::from(expected));
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("a b")]
    #[case("c:/x")]
    #[case("/etc/passwd")]
    #[case("a/../b")]
    #[case("a/.../b")]
    #[case("../x")]
    #[case("a/..")]
    fn test_validate_path_rejects(#[case] path: &str) {
        assert!(validate_path(path).is_err());
    }

    #[test]
    fn test_validate_path_errors() {
        assert!(matches!(validate_path(""), Err(SideTableError::Empty)));
        assert!(matches!(
            validate_path("a?b"),
            Err(SideTableError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            validate_path("/a"),
            Err(SideTableError::Absolute { .. })
        ));
        assert!(matches!(
            validate_path("../a"),
            Err(SideTableError::Escapes { .. })
        ));
    }

    #[test]
    fn test_materialize() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            ("a.txt".to_string(), "first".to_string()),
            ("sub/dir/b.txt".to_string(), "second".to_string()),
        ];
        let written = materialize(dir.path(), &rows).unwrap();
        assert_eq!(
            written,
            vec![dir.path().join("a.txt"), dir.path().join("sub/dir/b.txt")]
        );
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "first");
        assert_eq!(
            fs::read_to_string(dir.path().join("sub/dir/b.txt")).unwrap(),
            "second"
        );
    }

    #[test]
    fn test_materialize_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            ("ok.txt".to_string(), "x".to_string()),
            ("../escape.txt".to_string(), "y".to_string()),
        ];
        assert!(matches!(
            materialize(dir.path(), &rows),
            Err(SideTableError::Escapes { .. })
        ));
        assert!(!dir.path().join("ok.txt").exists());
    }
}
