use crate::error::{RecordError, SyncError, io_err};
use crate::importer::{self, MeetingRecord, RecordFailure};
use crate::renderer::{self, MEETING_TYPE};
use crate::utils::{
    ExportConfig, ProcessResult, atomic_write, base_stem, parse_existing_frontmatter,
    transcript_file_name,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Outcome of one cache entry.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub id: String,
    pub title: String,
    /// Artifact file name (relative to the output directory), when one applies.
    pub file_name: Option<String>,
    pub result: ProcessResult,
    /// Transcript artifact written (or that would be written) for this record.
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub dry_run: bool,
    pub outcomes: Vec<RecordOutcome>,
}

impl SyncReport {
    fn count(&self, f: impl Fn(&ProcessResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(&o.result)).count()
    }

    pub fn created(&self) -> usize {
        self.count(|r| *r == ProcessResult::Created)
    }

    pub fn updated(&self) -> usize {
        self.count(|r| *r == ProcessResult::Updated)
    }

    pub fn unchanged(&self) -> usize {
        self.count(|r| *r == ProcessResult::Unchanged)
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, ProcessResult::Skipped(_)))
    }

    pub fn transcripts_saved(&self) -> usize {
        self.outcomes.iter().filter(|o| o.transcript.is_some()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&RecordOutcome, &RecordError)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            ProcessResult::Skipped(e) => Some((o, e)),
            _ => None,
        })
    }

    /// One `{Classification}: {file}` line per record, in processing order.
    pub fn record_lines(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .map(|o| {
                let label = o.result.label(self.dry_run);
                let mut line = match (&o.result, &o.file_name) {
                    (ProcessResult::Skipped(e), _) => format!("{}: {} ({})", label, o.title, e),
                    (_, Some(name)) => format!("{}: {}", label, name),
                    (_, None) => format!("{}: {}", label, o.title),
                };
                if let Some(t) = &o.transcript {
                    let verb = if self.dry_run { "would save" } else { "saved" };
                    line.push_str(&format!(" (transcript {verb}: {t})"));
                }
                line
            })
            .collect()
    }

    pub fn summary_line(&self) -> String {
        let prefix = if self.dry_run { "[DRY RUN] " } else { "" };
        let mut line = format!(
            "{}Sync complete: {} created, {} updated, {} unchanged, {} skipped",
            prefix,
            self.created(),
            self.updated(),
            self.unchanged(),
            self.skipped()
        );
        let transcripts = self.transcripts_saved();
        if transcripts > 0 {
            line.push_str(&format!(", {} transcripts saved", transcripts));
        }
        line
    }
}

// ── Existing artifacts ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PriorArtifact {
    path: PathBuf,
    updated_at: Option<DateTime<Utc>>,
}

/// What the output directory already holds, rebuilt from frontmatter.
#[derive(Debug, Default)]
struct ArtifactIndex {
    /// granola_id → meeting artifact.
    by_id: HashMap<String, PriorArtifact>,
    /// file name → owning granola_id (`None` for foreign files).
    occupants: HashMap<String, Option<String>>,
}

impl ArtifactIndex {
    /// A missing directory is an empty index (dry runs never create it);
    /// any other listing error is fatal, since an incomplete index would
    /// let existing files be overwritten.
    fn scan(output_dir: &Path) -> Result<Self, SyncError> {
        let mut index = ArtifactIndex::default();
        let entries = match fs::read_dir(output_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(io_err(output_dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(output_dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".md") {
                continue;
            }
            let path = entry.path();
            let fm = parse_existing_frontmatter(&path);
            let owner = fm.as_ref().and_then(|f| f.granola_id.clone());
            if let Some(fm) = &fm
                && let Some(id) = &fm.granola_id
                && fm.kind.as_deref().is_none_or(|k| k == MEETING_TYPE)
            {
                let candidate = PriorArtifact {
                    path: path.clone(),
                    updated_at: fm.updated_at(),
                };
                // Two files claiming one id: keep the newest export.
                match index.by_id.get(id) {
                    Some(existing) if existing.updated_at >= candidate.updated_at => {
                        log::warn!(
                            "duplicate export for {id}: keeping {}, ignoring {}",
                            existing.path.display(),
                            path.display()
                        );
                    }
                    _ => {
                        index.by_id.insert(id.clone(), candidate);
                    }
                }
            }
            index.occupants.insert(name, owner);
        }
        Ok(index)
    }

    /// Whether `file_name` is free for `id`: absent, or already owned by it.
    fn available_for(&self, file_name: &str, id: &str) -> bool {
        match self.occupants.get(file_name) {
            None => true,
            Some(owner) => owner.as_deref() == Some(id),
        }
    }
}

// Assign every record its artifact stem for this run.
// The base `{date}_{slug}` is used unless another current record maps to the
// same base or the file is already held by a different id; then the stem gets
// an id prefix of 8, 12, or all characters, the first one that is free. When
// even the full id is taken by someone else's file, a counter is appended.
fn allocate_stems(records: &[MeetingRecord], index: &ArtifactIndex) -> HashMap<String, String> {
    let bases: Vec<String> = records.iter().map(base_stem).collect();
    let mut base_counts: HashMap<&str, usize> = HashMap::new();
    for base in &bases {
        *base_counts.entry(base.as_str()).or_default() += 1;
    }

    let mut claimed: HashSet<String> = HashSet::new();
    let mut stems = HashMap::new();

    for (record, base) in records.iter().zip(&bases) {
        let id = record.id.as_str();
        let free = |stem: &str| {
            !claimed.contains(stem) && index.available_for(&format!("{stem}.md"), id)
        };

        let stem = if base_counts[base.as_str()] == 1 && free(base.as_str()) {
            base.clone()
        } else {
            let prefixes = [8usize, 12, id.len()]
                .into_iter()
                .map(|len| format!("{base}_{}", id.get(..len.min(id.len())).unwrap_or(id)));
            let numbered = (2usize..).map(|n| format!("{base}_{id}_{n}"));
            // The counter is unbounded, so a free name always turns up.
            prefixes
                .chain(numbered)
                .find(|candidate| free(candidate.as_str()))
                .unwrap_or_else(|| format!("{base}_{id}"))
        };

        claimed.insert(stem.clone());
        stems.insert(record.id.clone(), stem);
    }
    stems
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Run one sync pass: load the cache, classify every record against the
/// output directory, and write what changed.
///
/// Fatal errors are returned before any artifact is touched; per-record
/// problems are reported as [`ProcessResult::Skipped`] in the report.
pub fn run(config: &ExportConfig) -> Result<SyncReport, SyncError> {
    log::debug!("loading cache from {}", config.cache_path.display());
    let state = importer::load_cache(&config.cache_path)?;
    let extracted = importer::extract_records(&state);
    log::debug!(
        "{} records, {} invalid entries",
        extracted.records.len(),
        extracted.failures.len()
    );

    if !config.dry_run {
        ensure_writable(&config.output_dir)?;
    }

    let index = ArtifactIndex::scan(&config.output_dir)?;
    let stems = allocate_stems(&extracted.records, &index);

    let mut report = SyncReport {
        dry_run: config.dry_run,
        outcomes: Vec::with_capacity(extracted.records.len() + extracted.failures.len()),
    };

    for record in &extracted.records {
        let stem = &stems[&record.id];
        let outcome = export_record(record, stem, index.by_id.get(&record.id), config);
        if let ProcessResult::Skipped(e) = &outcome.result {
            log::debug!("skipped {} ({}): {}", record.id, record.title, e);
        }
        report.outcomes.push(outcome);
    }

    for failure in extracted.failures {
        report.outcomes.push(failed_outcome(failure));
    }

    Ok(report)
}

fn failed_outcome(failure: RecordFailure) -> RecordOutcome {
    log::debug!("skipped {}: {}", failure.key, failure.error);
    RecordOutcome {
        title: failure.title.unwrap_or_else(|| failure.key.clone()),
        id: failure.key,
        file_name: None,
        result: ProcessResult::Skipped(failure.error),
        transcript: None,
    }
}

/// Create the output directory and prove we can write into it.
fn ensure_writable(output_dir: &Path) -> Result<(), SyncError> {
    let unwritable = |source| SyncError::OutputDirUnwritable {
        path: output_dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(output_dir).map_err(unwritable)?;
    let probe = NamedTempFile::new_in(output_dir).map_err(unwritable)?;
    probe.close().map_err(|e| io_err(output_dir, e))?;
    Ok(())
}

fn classify(
    record: &MeetingRecord,
    prior: Option<&PriorArtifact>,
    force: bool,
) -> ProcessResult {
    match prior {
        None => ProcessResult::Created,
        Some(_) if force => ProcessResult::Updated,
        Some(p) if p.updated_at.is_some_and(|ts| ts >= record.updated_at) => {
            ProcessResult::Unchanged
        }
        Some(_) => ProcessResult::Updated,
    }
}

fn export_record(
    record: &MeetingRecord,
    stem: &str,
    prior: Option<&PriorArtifact>,
    config: &ExportConfig,
) -> RecordOutcome {
    let result = classify(record, prior, config.force);

    // Unchanged artifacts stay where they are, even if the allocated stem moved.
    let (stem, file_name) = match (&result, prior) {
        (ProcessResult::Unchanged, Some(p)) => {
            let name = p
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("{stem}.md"));
            (name.trim_end_matches(".md").to_string(), name)
        }
        _ => (stem.to_string(), format!("{stem}.md")),
    };

    let mut outcome = RecordOutcome {
        id: record.id.clone(),
        title: record.title.clone(),
        file_name: Some(file_name.clone()),
        result,
        transcript: None,
    };

    let dir = &config.output_dir;
    let target = dir.join(&file_name);
    let rewrite = matches!(outcome.result, ProcessResult::Created | ProcessResult::Updated);

    if rewrite && !config.dry_run {
        if let Some(p) = prior
            && p.path != target
        {
            relocate(&p.path, &target);
            let old_stem = p
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            relocate(
                &dir.join(transcript_file_name(&old_stem)),
                &dir.join(transcript_file_name(&stem)),
            );
        }
        if let Err(e) = atomic_write(&target, &renderer::meeting_markdown(record)) {
            outcome.result = ProcessResult::Skipped(RecordError::Write {
                path: target,
                message: e.to_string(),
            });
            return outcome;
        }
    }

    if !record.transcript.is_empty() {
        let name = transcript_file_name(&stem);
        let path = dir.join(&name);
        if rewrite || !path.exists() {
            if !config.dry_run
                && let Err(e) = atomic_write(&path, &renderer::transcript_markdown(record))
            {
                // The meeting artifact is already safe; retried on the next run.
                log::warn!("failed to write transcript {}: {}", path.display(), e);
                return outcome;
            }
            outcome.transcript = Some(name);
        }
    }

    outcome
}

// Move an existing artifact to its new name ahead of a rewrite. Failure is
// not fatal: the old file is left in place and the new one written anyway.
fn relocate(from: &Path, to: &Path) {
    if !from.exists() || to.exists() {
        return;
    }
    match fs::rename(from, to) {
        Ok(()) => log::info!("renamed {} -> {}", from.display(), to.display()),
        Err(e) => log::warn!(
            "could not rename {} -> {}: {}",
            from.display(),
            to.display(),
            e
        ),
    }
}
