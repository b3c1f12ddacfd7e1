//! Report persistence and initial-memory loading.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lemmaloop_types::{Candidate, FinalReport, Lemma, NonEmptyString, ReportEntry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not a lemmaloop report: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("lemma {id} in {} has an empty {field}", path.display())]
    Empty {
        path: PathBuf,
        id: u64,
        field: &'static str,
    },
}

/// Pretty JSON, newline-terminated.
pub fn report_json(report: &FinalReport) -> Result<String, serde_json::Error> {
    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    Ok(json)
}

pub fn write_report(report: &FinalReport, path: &Path) -> io::Result<()> {
    let json = report_json(report).map_err(io::Error::other)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json)
}

/// Read a previous report's lemmas to seed a new run.
///
/// Ids and dependencies are kept; the store validates their order when
/// seeded. Seeded lemmas are marked as accepted in round 0.
pub fn load_memory(path: &Path) -> Result<Vec<Lemma>, MemoryError> {
    let content = fs::read_to_string(path).map_err(|source| MemoryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let report: FinalReport =
        serde_json::from_str(&content).map_err(|source| MemoryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let lemmas = report
        .lemmas
        .into_iter()
        .map(|entry| lemma_from_entry(entry, path))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!(path = %path.display(), lemmas = lemmas.len(), "Loaded initial memory");
    Ok(lemmas)
}

fn lemma_from_entry(entry: ReportEntry, path: &Path) -> Result<Lemma, MemoryError> {
    let empty = |field| MemoryError::Empty {
        path: path.to_path_buf(),
        id: entry.id.value(),
        field,
    };
    let statement = NonEmptyString::new(entry.statement).map_err(|_| empty("statement"))?;
    let proof = NonEmptyString::new(entry.proof).map_err(|_| empty("proof"))?;
    Ok(Lemma::new(
        entry.id,
        Candidate::new(statement, proof, entry.dependencies.iter().copied(), entry.kind),
        0,
    ))
}
