use std::fs;
use std::path::{Path, PathBuf};
use crate::error::{Error, Result};




/**
 * Default location of the decomposition dictionary, relative to a case root.
 */
pub const DECOMPOSE_PAR_DICT: &str = "system/decomposeParDict";

/**
 * Location of the run control dictionary, relative to a case root.
 */
pub const CONTROL_DICT: &str = "system/controlDict";




#[derive(Clone, Debug)]


/**
 * A simulation case: a directory holding `system/`, `constant/`, initial
 * conditions in `0/` or `0.orig/`, and whatever runs and decompositions have
 * produced since. The struct only knows its root; every query goes to the
 * filesystem, so a `Case` is never stale.
 */
pub struct Case {
    root: PathBuf,
}




// ============================================================================
impl Case {

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /**
     * Return the path of an entry relative to the case root.
     */
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /**
     * A directory counts as a case if it has a `system/` directory.
     */
    pub fn is_case(&self) -> bool {
        self.path("system").is_dir()
    }

    /**
     * A case is parallel (decomposed) if it has a `processor0/` directory.
     */
    pub fn is_parallel(&self) -> bool {
        self.path("processor0").is_dir()
    }

    /**
     * Return the `processor*` directories of this case, ordered by partition
     * number. Collated layouts like `processors4` sort after the numbered
     * ones.
     */
    pub fn processor_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = self.entries_where(".", |name, is_dir| is_dir && is_processor_name(name))?;
        dirs.sort_by_key(|path| {
            let name = file_name(path);
            (processor_number(&name).unwrap_or(usize::MAX), name)
        });
        Ok(dirs)
    }

    /**
     * Return the top-level entries whose names are non-zero time values.
     */
    pub fn time_entries(&self) -> Result<Vec<PathBuf>> {
        self.entries_where(".", |name, _| is_time_name(name))
    }

    /**
     * Enumerate the entries of a sub-directory (relative to the root) whose
     * name and kind satisfy the predicate. A missing directory has no
     * entries.
     */
    pub fn entries_where<P>(&self, relative: impl AsRef<Path>, predicate: P) -> Result<Vec<PathBuf>>
    where
        P: Fn(&str, bool) -> bool,
    {
        let dir = self.path(relative);
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&dir, e)),
        };
        let mut found = Vec::new();

        for entry in listing {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            if let Some(name) = entry.file_name().to_str() {
                if predicate(name, is_dir) {
                    found.push(entry.path());
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /**
     * Resolve a dictionary argument the way the toolkit scripts do: absolute
     * paths and paths under `system/` are taken as given, otherwise a name
     * that does not exist relative to the case is looked for in `system/`.
     */
    pub fn resolve_dict(&self, dict: impl AsRef<Path>) -> PathBuf {
        let dict = dict.as_ref();

        if dict.is_absolute() || dict.starts_with("system") {
            return self.path(dict);
        }
        let direct = self.path(dict);

        if direct.exists() {
            direct
        } else {
            self.path("system").join(dict)
        }
    }
}




// ============================================================================
fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn processor_number(name: &str) -> Option<usize> {
    name.strip_prefix("processor")?.parse().ok()
}




/**
 * Parse a directory name as a time value. Only plain decimal spellings are
 * accepted (optionally signed, with a fraction or exponent); words that Rust
 * would also parse, like `inf` or `NaN`, are not times.
 */
pub fn parse_time_name(name: &str) -> Option<f64> {
    let digits = name.strip_prefix('-').unwrap_or(name);
    let leading = digits.chars().next()?;

    if !(leading.is_ascii_digit() || leading == '.') {
        return None;
    }
    if !digits.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+')) {
        return None;
    }
    name.parse::<f64>().ok().filter(|t| t.is_finite())
}

/**
 * True for names of time directories other than the initial time: `1`,
 * `0.5`, `-0.001`, `1e-05`, `100`. The initial time `0` (however it is
 * padded) is excluded.
 */
pub fn is_time_name(name: &str) -> bool {
    parse_time_name(name).map_or(false, |t| t != 0.0)
}

/**
 * True for partition directory names: `processor0`, `processor12`, and the
 * collated `processors4` / `processors4_0-1` forms.
 */
pub fn is_processor_name(name: &str) -> bool {
    name.starts_with("processor")
}

/**
 * Match a file name against a pattern with at most one `*`, which may stand
 * for any (possibly empty) run of characters: `log.*`, `*.foam`, `ParaView*`,
 * or an exact name.
 */
pub fn name_matches(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((head, tail)) => {
            name.len() >= head.len() + tail.len() && name.starts_with(head) && name.ends_with(tail)
        }
    }
}
