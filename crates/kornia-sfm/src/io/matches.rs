use std::collections::BTreeSet;
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::describer::{DescriberType, DescriberTypeError};
use crate::matching::{IndMatch, PairwiseMatches};
use crate::pairs::Pair;
use crate::scene::ViewId;

/// Error types for the matches files.
#[derive(Debug, thiserror::Error)]
pub enum MatchesError {
    /// Failed to read or write a matches file.
    #[error("Failed to access matches file {path}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A matches file is malformed.
    #[error("Failed to parse {path} at line {line}: {message}")]
    Parse {
        /// Path of the file.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// No matches file exists for the requested geometric model.
    #[error("No matches file for geometric model {model} in {dir}")]
    NotFound {
        /// The searched directory.
        dir: PathBuf,
        /// The requested model.
        model: GeometricModel,
    },

    /// The geometric model tag is not one of `f`, `e` or `h`.
    #[error("Unknown geometric model: {0}")]
    UnknownModel(String),
}

/// The geometric model the stored correspondences were validated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeometricModel {
    /// Fundamental matrix.
    #[default]
    Fundamental,
    /// Essential matrix.
    Essential,
    /// Homography.
    Homography,
}

impl GeometricModel {
    /// The one-letter tag used in file names.
    pub fn tag(&self) -> &'static str {
        match self {
            GeometricModel::Fundamental => "f",
            GeometricModel::Essential => "e",
            GeometricModel::Homography => "h",
        }
    }
}

impl FromStr for GeometricModel {
    type Err = MatchesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f" => Ok(GeometricModel::Fundamental),
            "e" => Ok(GeometricModel::Essential),
            "h" => Ok(GeometricModel::Homography),
            _ => Err(MatchesError::UnknownModel(s.to_string())),
        }
    }
}

impl fmt::Display for GeometricModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The matches files of a directory for a geometric model: `*matches.<model>.txt`, sorted.
pub fn matches_files(
    dir: impl AsRef<Path>,
    model: GeometricModel,
) -> Result<Vec<PathBuf>, MatchesError> {
    let dir = dir.as_ref();
    let suffix = format!("matches.{}.txt", model.tag());
    let io_error = |source| MatchesError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let is_match_file = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(&suffix));
        if is_match_file && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

struct LineReader<'a> {
    path: &'a Path,
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    line: usize,
}

impl<'a> LineReader<'a> {
    fn new(path: &'a Path, content: &'a str) -> Self {
        Self {
            path,
            lines: content.lines().enumerate(),
            line: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> MatchesError {
        MatchesError::Parse {
            path: self.path.to_path_buf(),
            line: self.line,
            message: message.into(),
        }
    }

    // next non-empty line, split on whitespace
    fn next_tokens(&mut self) -> Option<Vec<&'a str>> {
        for (i, line) in self.lines.by_ref() {
            let tokens = line.split_whitespace().collect::<Vec<_>>();
            if !tokens.is_empty() {
                self.line = i + 1;
                return Some(tokens);
            }
        }
        None
    }

    fn expect_tokens(&mut self) -> Result<Vec<&'a str>, MatchesError> {
        self.next_tokens()
            .ok_or_else(|| self.error("unexpected end of file"))
    }

    fn parse<T: FromStr>(&self, token: &str) -> Result<T, MatchesError> {
        token
            .parse()
            .map_err(|_| self.error(format!("invalid value '{token}'")))
    }
}

/// Parse the content of a matches file into `matches`.
///
/// Pairs with a view outside `views` and describer types outside `describers` are skipped.
/// Pairs given as `(j, i)` are stored as `(i, j)` with swapped feature indices.
fn parse_matches(
    path: &Path,
    content: &str,
    views: &BTreeSet<ViewId>,
    describers: &[DescriberType],
    matches: &mut PairwiseMatches,
) -> Result<(), MatchesError> {
    let mut reader = LineReader::new(path, content);

    while let Some(tokens) = reader.next_tokens() {
        let &[a, b] = tokens.as_slice() else {
            return Err(reader.error("expected a view pair"));
        };
        let (a, b): (ViewId, ViewId) = (reader.parse(a)?, reader.parse(b)?);
        let pair = Pair::new(a, b).ok_or_else(|| reader.error("self pair"))?;
        let swapped = a > b;
        let keep_pair = views.contains(&a) && views.contains(&b);

        let tokens = reader.expect_tokens()?;
        let &[num_types] = tokens.as_slice() else {
            return Err(reader.error("expected the number of describer types"));
        };
        let num_types: usize = reader.parse(num_types)?;

        for _ in 0..num_types {
            let tokens = reader.expect_tokens()?;
            let &[name, count] = tokens.as_slice() else {
                return Err(reader.error("expected a describer type and a count"));
            };
            let describer: DescriberType = name
                .parse()
                .map_err(|e: DescriberTypeError| reader.error(e.to_string()))?;
            let count: usize = reader.parse(count)?;
            let keep = keep_pair && describers.contains(&describer);

            let mut correspondences = Vec::with_capacity(if keep { count } else { 0 });
            for _ in 0..count {
                let tokens = reader.expect_tokens()?;
                let &[i, j] = tokens.as_slice() else {
                    return Err(reader.error("expected two feature indices"));
                };
                let (i, j) = (reader.parse(i)?, reader.parse(j)?);
                if keep {
                    correspondences.push(if swapped {
                        IndMatch::new(j, i)
                    } else {
                        IndMatch::new(i, j)
                    });
                }
            }

            if keep && !correspondences.is_empty() {
                matches
                    .entry(pair)
                    .or_default()
                    .entry(describer)
                    .or_default()
                    .extend(correspondences);
            }
        }
    }
    Ok(())
}

/// Read the pairwise correspondences stored in `dir` for a geometric model.
///
/// All the `*matches.<model>.txt` files of the directory are merged. Only pairs of views in
/// `views` and the requested describer types are kept.
pub fn load_matches(
    dir: impl AsRef<Path>,
    views: &BTreeSet<ViewId>,
    describers: &[DescriberType],
    model: GeometricModel,
) -> Result<PairwiseMatches, MatchesError> {
    let dir = dir.as_ref();
    let files = matches_files(dir, model)?;
    if files.is_empty() {
        return Err(MatchesError::NotFound {
            dir: dir.to_path_buf(),
            model,
        });
    }

    let mut matches = PairwiseMatches::new();
    for path in &files {
        let content = std::fs::read_to_string(path).map_err(|source| MatchesError::Io {
            path: path.clone(),
            source,
        })?;
        parse_matches(path, &content, views, describers, &mut matches)?;
    }

    // keep each correspondence once, in a canonical order
    for per_type in matches.values_mut() {
        for correspondences in per_type.values_mut() {
            correspondences.sort();
            correspondences.dedup();
        }
    }

    log::info!(
        "loaded matches of {} pairs from {} files",
        matches.len(),
        files.len()
    );
    Ok(matches)
}

/// Write pairwise correspondences to `<dir>/matches.<model>.txt`.
pub fn save_matches(
    dir: impl AsRef<Path>,
    matches: &PairwiseMatches,
    model: GeometricModel,
) -> Result<PathBuf, MatchesError> {
    let path = dir.as_ref().join(format!("matches.{}.txt", model.tag()));
    let io_error = |source| MatchesError::Io {
        path: path.clone(),
        source,
    };
    let file = std::fs::File::create(&path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);

    for (pair, per_type) in matches {
        writeln!(writer, "{} {}", pair.first(), pair.second()).map_err(io_error)?;
        writeln!(writer, "{}", per_type.len()).map_err(io_error)?;
        for (describer, correspondences) in per_type {
            writeln!(writer, "{} {}", describer, correspondences.len()).map_err(io_error)?;
            for m in correspondences {
                writeln!(writer, "{} {}", m.i, m.j).map_err(io_error)?;
            }
        }
    }
    writer.flush().map_err(io_error)?;
    Ok(path)
}
