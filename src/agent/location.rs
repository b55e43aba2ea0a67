//! Mapping of a logical `path:line[:column]` request to a location in a loaded script.

use crate::agent::breakpoint::SourceLocation;
use indexmap::IndexMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("no loaded script matches `{0}`")]
    NotFound(String),
    #[error("`{path}` matches multiple scripts: {}", candidates.join(", "))]
    Ambiguous {
        path: String,
        candidates: Vec<String>,
    },
    #[error("line {line} is out of range of `{file}` ({line_count} lines)")]
    InvalidLine {
        file: String,
        line: u32,
        line_count: u32,
    },
    #[error("column {column} is out of range at `{file}:{line}`")]
    InvalidColumn { file: String, line: u32, column: u32 },
    #[error("source map of `{0}` has no output position")]
    OutputFileNotFound(String),
}

/// Information about a loaded script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScriptInfo {
    pub line_count: u32,
    /// Script source is wrapped into a module function by the runtime, so the first
    /// source line is prefixed by wrapper code.
    pub module_wrapped: bool,
}

impl ScriptInfo {
    pub fn new(line_count: u32) -> Self {
        Self {
            line_count,
            module_wrapped: false,
        }
    }

    pub fn wrapped(line_count: u32) -> Self {
        Self {
            line_count,
            module_wrapped: true,
        }
    }
}

/// Known scripts, keyed by normalized absolute path.
#[derive(Debug, Default, Clone)]
pub struct ScriptIndex {
    scripts: IndexMap<String, ScriptInfo>,
}

impl ScriptIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, info: ScriptInfo) {
        self.scripts.insert(normalize(path), info);
    }

    pub fn remove(&mut self, path: &str) -> Option<ScriptInfo> {
        self.scripts.shift_remove(&normalize(path))
    }

    pub fn get(&self, path: &str) -> Option<&ScriptInfo> {
        self.scripts.get(&normalize(path))
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Find scripts whose path ends with the trailing components of `path`.
    ///
    /// Candidates are narrowed by a growing suffix: first a bare file name, then the
    /// parent directory and the file name, etc. Search stops as soon as at most one
    /// candidate remains or all components are used.
    pub fn find_scripts(&self, path: &str) -> Vec<&str> {
        let path = normalize(path);
        if let Some((script, _)) = self.scripts.get_key_value(&path) {
            return vec![script.as_str()];
        }

        let components: Vec<&str> = path
            .split('/')
            .filter(|c| !c.is_empty() && *c != "." && *c != "..")
            .collect();
        if components.is_empty() {
            return vec![];
        }

        let mut matches: Vec<&str> = self.scripts.keys().map(String::as_str).collect();
        for i in (0..components.len()).rev() {
            let suffix = components[i..].join("/");
            matches.retain(|script| ends_with_components(script, &suffix));
            if matches.len() <= 1 {
                break;
            }
        }
        matches
    }
}

fn ends_with_components(script: &str, suffix: &str) -> bool {
    script == suffix
        || script
            .strip_suffix(suffix)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

/// Normalize separators and resolve `.` and `..` components.
pub fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = vec![];
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            c => parts.push(c),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Join relative `path` to `base`, absolute paths are returned as is.
pub fn join(base: &str, path: &str) -> String {
    let path = path.replace('\\', "/");
    if path.starts_with('/') || base.is_empty() {
        return normalize(&path);
    }
    normalize(&format!("{base}/{path}"))
}

/// Position inside a generated (transpiled) file. Lines and columns are 0-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedPosition {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Source map lookup, translates positions of original sources into generated files.
pub trait SourceMapper {
    /// True if `path` is an original source described by some source map.
    fn has_mapping(&self, path: &str) -> bool;

    /// Translate 0-based position in an original source into a generated file position.
    fn map(&self, path: &str, line: u32, column: u32) -> Option<MappedPosition>;
}

/// Mapper for deployments without transpiled sources.
pub struct NoSourceMaps;

impl SourceMapper for NoSourceMaps {
    fn has_mapping(&self, _: &str) -> bool {
        false
    }

    fn map(&self, _: &str, _: u32, _: u32) -> Option<MappedPosition> {
        None
    }
}

/// Location in a loaded script. Line and column are 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Display for ResolvedLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

pub struct LocationResolver {
    scripts: ScriptIndex,
    mapper: Box<dyn SourceMapper>,
    working_directory: String,
    wrapper_prefix_len: u32,
}

impl LocationResolver {
    /// Create new resolver.
    ///
    /// # Arguments
    ///
    /// * `scripts`: loaded scripts
    /// * `mapper`: source map lookup
    /// * `working_directory`: base directory for relative paths
    /// * `wrapper_prefix_len`: length of the code the runtime puts in front of the first
    ///   line of a module-wrapped script
    pub fn new(
        scripts: ScriptIndex,
        mapper: Box<dyn SourceMapper>,
        working_directory: &str,
        wrapper_prefix_len: u32,
    ) -> Self {
        Self {
            scripts,
            mapper,
            working_directory: normalize(working_directory),
            wrapper_prefix_len,
        }
    }

    pub fn scripts(&self) -> &ScriptIndex {
        &self.scripts
    }

    pub fn scripts_mut(&mut self) -> &mut ScriptIndex {
        &mut self.scripts
    }

    pub fn working_directory(&self) -> &str {
        &self.working_directory
    }

    /// Resolve a requested location into exactly one loaded script location.
    pub fn resolve(&self, location: &SourceLocation) -> Result<ResolvedLocation, LocationError> {
        let column = location.column.unwrap_or(1).max(1);
        let (path, line, column) = if self.mapper.has_mapping(&location.path) {
            let mapped = self
                .mapper
                .map(&location.path, location.line.saturating_sub(1), column - 1)
                .ok_or_else(|| LocationError::OutputFileNotFound(location.path.clone()))?;
            let position = mapped.line.checked_add(1).zip(mapped.column.checked_add(1));
            let (line, column) =
                position.ok_or_else(|| LocationError::OutputFileNotFound(location.path.clone()))?;
            (mapped.file, line, column)
        } else {
            (location.path.clone(), location.line, column)
        };

        let file = self.find_single_script(&path)?;
        let info = self
            .scripts
            .get(&file)
            .copied()
            .ok_or_else(|| LocationError::NotFound(path.clone()))?;

        if line == 0 || line > info.line_count {
            return Err(LocationError::InvalidLine {
                file,
                line,
                line_count: info.line_count,
            });
        }

        let column = if line == 1 && info.module_wrapped {
            column
                .checked_add(self.wrapper_prefix_len)
                .ok_or_else(|| LocationError::InvalidColumn {
                    file: file.clone(),
                    line,
                    column,
                })?
        } else {
            column
        };

        Ok(ResolvedLocation { file, line, column })
    }

    fn find_single_script(&self, path: &str) -> Result<String, LocationError> {
        let in_working_dir = join(&self.working_directory, path);
        if self.scripts.get(&in_working_dir).is_some() {
            return Ok(in_working_dir);
        }

        let candidates = self.scripts.find_scripts(path);
        match candidates.as_slice() {
            [] => Err(LocationError::NotFound(path.to_string())),
            [script] => Ok(script.to_string()),
            _ => Err(LocationError::Ambiguous {
                path: path.to_string(),
                candidates: candidates.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }
}
