//! Whitespace-separated integer files.
//!
//! Two shapes share one codec:
//! - index files: a single line of sample indices (train, test, subsample);
//! - feature-set files: one line per task of 0-based feature indices
//!   (causal features, final selections). An empty line is an empty set.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::FeatureSet;

#[derive(Debug, Error)]
pub enum IndexFileError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse error in {} line {line}: '{token}' is not a non-negative integer", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        token: String,
    },
}

/// Join indices with single spaces.
pub fn format_indices<'a, I>(indices: I) -> String
where
    I: IntoIterator<Item = &'a usize>,
{
    indices
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse one whitespace-separated line. On failure returns the bad token.
pub fn parse_indices(line: &str) -> Result<Vec<usize>, String> {
    line.split_whitespace()
        .map(|tok| tok.parse::<usize>().map_err(|_| tok.to_string()))
        .collect()
}

/// Read the first line of an index file. An empty file is an empty list.
pub fn read_index_file(path: &Path) -> Result<Vec<usize>, IndexFileError> {
    let content = read(path)?;
    let first = content.lines().next().unwrap_or("");
    parse_indices(first).map_err(|token| IndexFileError::Parse {
        path: path.to_path_buf(),
        line: 1,
        token,
    })
}

pub fn write_index_file(path: &Path, indices: &[usize]) -> Result<(), IndexFileError> {
    write(path, format!("{}\n", format_indices(indices)))
}

/// Read one feature set per line.
pub fn read_feature_sets(path: &Path) -> Result<Vec<FeatureSet>, IndexFileError> {
    let content = read(path)?;
    content
        .lines()
        .enumerate()
        .map(|(i, line)| {
            parse_indices(line)
                .map(|v| v.into_iter().collect())
                .map_err(|token| IndexFileError::Parse {
                    path: path.to_path_buf(),
                    line: i + 1,
                    token,
                })
        })
        .collect()
}

pub fn write_feature_sets(path: &Path, sets: &[FeatureSet]) -> Result<(), IndexFileError> {
    let mut out = String::new();
    for set in sets {
        out.push_str(&format_indices(set));
        out.push('\n');
    }
    write(path, out)
}

fn read(path: &Path) -> Result<String, IndexFileError> {
    fs::read_to_string(path).map_err(|source| IndexFileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, content: String) -> Result<(), IndexFileError> {
    let io_err = |source| IndexFileError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, content).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_indices_handles_mixed_whitespace() {
        assert_eq!(parse_indices(" 3\t1  4 \n"), Ok(vec![3, 1, 4]));
        assert_eq!(parse_indices(""), Ok(vec![]));
        assert_eq!(parse_indices("1 -2"), Err("-2".to_string()));
        assert_eq!(parse_indices("1 2.5"), Err("2.5".to_string()));
    }

    #[test]
    fn index_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sim.fold0.trIndices");
        write_index_file(&path, &[0, 2, 5, 9]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0 2 5 9\n");
        assert_eq!(read_index_file(&path).unwrap(), vec![0, 2, 5, 9]);
    }

    #[test]
    fn feature_sets_keep_empty_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selected");
        let sets: Vec<FeatureSet> = vec![
            [4, 1].into_iter().collect(),
            FeatureSet::new(),
            [7].into_iter().collect(),
        ];
        write_feature_sets(&path, &sets).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1 4\n\n7\n");
        assert_eq!(read_feature_sets(&path).unwrap(), sets);
    }

    #[test]
    fn malformed_file_reports_line_and_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("causal");
        fs::write(&path, "1 2 3\n4 five 6\n").unwrap();
        match read_feature_sets(&path).unwrap_err() {
            IndexFileError::Parse { line, token, .. } => {
                assert_eq!(line, 2);
                assert_eq!(token, "five");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_index_file(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, IndexFileError::Io { .. }));
    }
}
