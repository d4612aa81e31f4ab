//! Source units: `Script` and the process-wide `ScriptPool` that scripts are
//! registered into as imports are discovered.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ahash::AHashMap;

/// Identifies a [`Script`] within a [`ScriptPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScriptId(u32);

impl ScriptId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// A placeholder id for a `Location` that has no real source script
    /// behind it (an empty block, a synthesized test body). Never resolved
    /// against a real [`ScriptPool`] entry.
    #[must_use]
    pub fn default_for_empty() -> Self {
        Self(0)
    }
}

/// A single source file, loaded once and never mutated afterwards.
pub struct Script {
    pub id: ScriptId,
    pub absolute_path: PathBuf,
    pub directory: PathBuf,
    pub text: String,
    /// Byte offset of the start of each line; `line_offsets[0] == 0`.
    pub line_offsets: Vec<u32>,
}

impl Script {
    fn new(id: ScriptId, absolute_path: PathBuf, text: String) -> Self {
        let directory = absolute_path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let line_offsets = compute_line_offsets(&text);
        Self { id, absolute_path, directory, text, line_offsets }
    }

    /// Resolves a byte offset to a zero-based `(line, column)` pair.
    #[must_use]
    pub fn line_and_column(&self, offset: u32) -> (usize, usize) {
        let line = match self.line_offsets.binary_search(&offset) {
            Ok(exact) => exact,
            Err(insertion) => insertion.saturating_sub(1),
        };
        let line_start = self.line_offsets.get(line).copied().unwrap_or(0);
        (line, (offset - line_start) as usize)
    }

    /// Returns the text of a single (zero-based) line, without its terminator.
    #[must_use]
    pub fn line_text(&self, line: usize) -> &str {
        let start = self.line_offsets.get(line).copied().unwrap_or(0) as usize;
        let end = self.line_offsets.get(line + 1).map_or(self.text.len(), |&o| o as usize);
        self.text[start..end].trim_end_matches(['\n', '\r'])
    }
}

fn compute_line_offsets(text: &str) -> Vec<u32> {
    let mut offsets = vec![0u32];
    for (index, byte) in text.bytes().enumerate() {
        if byte == b'\n' {
            offsets.push(u32::try_from(index + 1).expect("source file larger than 4 GiB"));
        }
    }
    offsets
}

/// Process-wide, append-only registry of scripts keyed by absolute path.
///
/// Imports add scripts but never replace or remove them; the single mutex
/// guarding the backing vector is the only synchronisation the parallel
/// scanning lanes need, per the concurrency design.
#[derive(Default)]
pub struct ScriptPool {
    inner: Mutex<ScriptPoolInner>,
}

#[derive(Default)]
struct ScriptPoolInner {
    scripts: Vec<Arc<Script>>,
    by_path: AHashMap<PathBuf, ScriptId>,
}

impl ScriptPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and registers `path`, or returns the existing entry.
    ///
    /// Returns `(id, true)` when this call performed the load (the caller
    /// should enqueue the script for scanning), `(id, false)` when another
    /// caller already registered it.
    ///
    /// # Errors
    /// Propagates any I/O error from reading the file.
    pub fn load_or_get(&self, path: &Path) -> std::io::Result<(ScriptId, bool)> {
        let absolute = std::fs::canonicalize(path)?;
        {
            let inner = self.inner.lock().expect("script pool mutex poisoned");
            if let Some(&id) = inner.by_path.get(&absolute) {
                return Ok((id, false));
            }
        }
        let text = std::fs::read_to_string(&absolute)?;
        let mut inner = self.inner.lock().expect("script pool mutex poisoned");
        // Re-check after releasing the lock for the read: another lane may
        // have raced us to the same import.
        if let Some(&id) = inner.by_path.get(&absolute) {
            return Ok((id, false));
        }
        let id = ScriptId(u32::try_from(inner.scripts.len()).expect("too many scripts"));
        let script = Arc::new(Script::new(id, absolute.clone(), text));
        inner.scripts.push(script);
        inner.by_path.insert(absolute, id);
        Ok((id, true))
    }

    #[must_use]
    pub fn get(&self, id: ScriptId) -> Arc<Script> {
        Arc::clone(&self.inner.lock().expect("script pool mutex poisoned").scripts[id.index()])
    }

    /// Snapshot of every script id currently registered, in insertion order.
    #[must_use]
    pub fn all_ids(&self) -> Vec<ScriptId> {
        let inner = self.inner.lock().expect("script pool mutex poisoned");
        (0..inner.scripts.len()).map(|index| ScriptId(u32::try_from(index).expect("too many scripts"))).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("script pool mutex poisoned").scripts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
