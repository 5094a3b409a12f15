use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use crate::case::{name_matches, Case};
use crate::error::{Error, Result};




/**
 * Files the toolkit, viewers, and wrappers leave at a case root.
 */
const AUXILIARY: [&str; 12] = [
    "log",
    "log.*",
    "log-*",
    "logSummary.*",
    ".fxLock",
    "*.xml",
    "ParaView*",
    "paraFoam*",
    "*.blockMesh",
    "*.foam",
    "*.OpenFOAM",
    ".setSet",
];

const POST_PROCESSING: [&str; 9] = [
    "Ensight",
    "EnSight",
    "ensightWrite",
    "insitu",
    "VTK",
    "postProcessing",
    "postProcessing-*",
    "cuttingPlane",
    "surfaceSampling",
];

const SAMPLES: [&str; 3] = ["sets", "samples", "sampleSurfaces"];

/**
 * Mesh refinement artifacts written by snappyHexMesh.
 */
const SNAPPY: [&str; 5] = [
    "cellLevel",
    "pointLevel",
    "refinementHistory",
    "level0Edge",
    "surfaceIndex",
];

/**
 * Root entries left behind by parallel and monitored runs.
 */
const RUN_LEFTOVERS: [&str; 8] = [
    "processor*",
    "TDAC",
    "probes*",
    "forces*",
    "graphs*",
    "sets",
    "gdbCommands",
    "mpirun.schema",
];

/**
 * Index files in `constant/` derived from a decomposition.
 */
const DECOMPOSITION_INDEX: [&str; 5] = [
    "cellDecomposition",
    "cellToRegion",
    "cellLevel*",
    "pointLevel*",
    "tetDualMesh",
];




#[derive(Clone, Debug, Default, PartialEq)]


/**
 * What a cleaning operation did: the paths it removed, and the paths it
 * deliberately kept along with the reason.
 */
pub struct Cleaned {
    pub removed: Vec<PathBuf>,
    pub preserved: Vec<(PathBuf, String)>,
}




// ============================================================================
impl Cleaned {

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.preserved.is_empty()
    }

    /**
     * Fold the report of another operation into this one.
     */
    pub fn merge(&mut self, other: Cleaned) {
        self.removed.extend(other.removed);
        self.preserved.extend(other.preserved);
    }

    /**
     * Remove a file, link, or directory tree. A path that is already gone is
     * not recorded and is not an error.
     */
    fn remove(&mut self, path: &Path) -> Result<()> {
        let meta = match path.symlink_metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io(path, e)),
        };
        let result = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        match result {
            Ok(()) => {
                debug!("removed {}", path.display());
                self.removed.push(path.to_path_buf());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn remove_all(&mut self, paths: impl IntoIterator<Item = PathBuf>) -> Result<()> {
        for path in paths {
            self.remove(&path)?;
        }
        Ok(())
    }

    fn preserve(&mut self, path: PathBuf, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Keeping {}: {}", path.display(), reason);
        self.preserved.push((path, reason));
    }
}




// ============================================================================
fn matching(case: &Case, relative: impl AsRef<Path>, patterns: &[&str]) -> Result<Vec<PathBuf>> {
    case.entries_where(relative, |name, _| {
        patterns.iter().any(|pattern| name_matches(pattern, name))
    })
}

fn remove_matching(case: &Case, relative: impl AsRef<Path>, patterns: &[&str]) -> Result<Cleaned> {
    let mut cleaned = Cleaned::default();
    cleaned.remove_all(matching(case, relative, patterns)?)?;
    Ok(cleaned)
}

/**
 * Remove a directory guarded by a definition file: if the directory holds any
 * of the `guards`, it is the mesh source and is kept.
 */
fn remove_unless_defined(case: &Case, relative: &str, guards: &[&str]) -> Result<Cleaned> {
    let mut cleaned = Cleaned::default();
    let dir = case.path(relative);

    if let Some(guard) = guards.iter().find(|g| dir.join(g).exists()) {
        cleaned.preserve(dir, format!("{} holds {}", relative, guard));
    } else {
        cleaned.remove(&dir)?;
    }
    Ok(cleaned)
}




/**
 * Remove every top-level time directory except the initial time `0`.
 */
pub fn clean_time_directories(case: &Case) -> Result<Cleaned> {
    let mut cleaned = Cleaned::default();
    cleaned.remove_all(case.time_entries()?)?;
    Ok(cleaned)
}

/**
 * Remove logs, lock files, and viewer stubs from the case root.
 */
pub fn clean_auxiliary(case: &Case) -> Result<Cleaned> {
    remove_matching(case, ".", &AUXILIARY)
}

/**
 * Remove compiled run-time code, but only from something that is a case.
 */
pub fn clean_dynamic_code(case: &Case) -> Result<Cleaned> {
    remove_in_case(case, "dynamicCode")
}

/**
 * Remove ADIOS output, but only from something that is a case.
 */
pub fn clean_adios_output(case: &Case) -> Result<Cleaned> {
    remove_in_case(case, "adiosData")
}

fn remove_in_case(case: &Case, relative: &str) -> Result<Cleaned> {
    let mut cleaned = Cleaned::default();
    if case.is_case() {
        cleaned.remove(&case.path(relative))?;
    }
    Ok(cleaned)
}

pub fn clean_optimisation(case: &Case) -> Result<Cleaned> {
    let mut cleaned = Cleaned::default();
    cleaned.remove(&case.path("optimisation"))?;
    cleaned.remove(&case.path("constant/controlPoints"))?;
    Ok(cleaned)
}

pub fn clean_post_processing(case: &Case) -> Result<Cleaned> {
    remove_matching(case, ".", &POST_PROCESSING)
}

pub fn clean_samples(case: &Case) -> Result<Cleaned> {
    remove_matching(case, ".", &SAMPLES)
}

/**
 * Remove `constant/faMesh`, unless it holds its own `faMeshDefinition`.
 */
pub fn clean_fa_mesh(case: &Case) -> Result<Cleaned> {
    remove_unless_defined(case, "constant/faMesh", &["faMeshDefinition"])
}

/**
 * Remove `constant/polyMesh`, unless it holds the `blockMeshDict` (or its m4
 * template) that defines it. A `system/blockMeshDict` generated from
 * `system/blockMeshDict.m4` is removed too.
 */
pub fn clean_poly_mesh(case: &Case) -> Result<Cleaned> {
    let mut cleaned = remove_unless_defined(
        case,
        "constant/polyMesh",
        &["blockMeshDict", "blockMeshDict.m4"],
    )?;

    if case.path("system/blockMeshDict.m4").exists() {
        cleaned.remove(&case.path("system/blockMeshDict"))?;
    }
    Ok(cleaned)
}

/**
 * Remove snappyHexMesh refinement data from the mesh, `constant/`, and the
 * initial conditions, in the case and in every partition.
 */
pub fn clean_snappy_files(case: &Case) -> Result<Cleaned> {
    let mut places = vec![
        PathBuf::from("constant/polyMesh"),
        PathBuf::from("constant"),
        PathBuf::from("0"),
    ];

    for partition in case.processor_dirs()? {
        if let Ok(relative) = partition.strip_prefix(case.root()) {
            places.push(relative.join("constant/polyMesh"));
            places.push(relative.join("0"));
        }
    }

    let mut cleaned = Cleaned::default();
    for place in places {
        cleaned.merge(remove_matching(case, place, &SNAPPY)?);
    }
    Ok(cleaned)
}

/**
 * Return a case to its pre-run state: time directories, logs, generated code,
 * post-processing, decompositions, and derived mesh data are removed, while
 * `0/`, `0.orig/`, `system/`, and user-defined meshes are kept.
 */
pub fn clean_case(case: &Case) -> Result<Cleaned> {
    info!("Cleaning case {}", case.root().display());

    let mut cleaned = Cleaned::default();
    cleaned.merge(clean_time_directories(case)?);
    cleaned.merge(clean_auxiliary(case)?);
    cleaned.merge(clean_adios_output(case)?);
    cleaned.merge(clean_dynamic_code(case)?);
    cleaned.merge(clean_optimisation(case)?);
    cleaned.merge(clean_post_processing(case)?);
    cleaned.merge(clean_fa_mesh(case)?);
    cleaned.merge(clean_poly_mesh(case)?);
    cleaned.merge(clean_snappy_files(case)?);
    cleaned.merge(remove_matching(case, ".", &RUN_LEFTOVERS)?);
    cleaned.merge(remove_matching(case, "system", &["machines"])?);
    cleaned.merge(remove_matching(case, "constant", &DECOMPOSITION_INDEX)?);

    info!("Removed {} entries", cleaned.removed.len());
    Ok(cleaned)
}

/**
 * Like [`clean_case`], and remove the initial conditions in `0/` as well.
 */
pub fn clean_case0(case: &Case) -> Result<Cleaned> {
    let mut cleaned = clean_case(case)?;
    cleaned.remove(&case.path("0"))?;
    Ok(cleaned)
}
