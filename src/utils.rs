use crate::error::RecordError;
use crate::importer::MeetingRecord;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Suffix of the per-meeting transcript artifact, appended to the base stem.
pub const TRANSCRIPT_SUFFIX: &str = "_transcript";

const MAX_SLUG_LEN: usize = 80;

/// Configuration required to run the export process.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub cache_path: PathBuf,
    pub output_dir: PathBuf,
    pub force: bool,
    pub dry_run: bool,
    pub verbose: bool,
}

/// Per-record classification of a sync run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    Created,
    Updated,
    Unchanged,
    Skipped(RecordError),
}

impl ProcessResult {
    pub fn label(&self, dry_run: bool) -> &'static str {
        match (self, dry_run) {
            (ProcessResult::Created, false) => "Created",
            (ProcessResult::Created, true) => "Would create",
            (ProcessResult::Updated, false) => "Updated",
            (ProcessResult::Updated, true) => "Would update",
            (ProcessResult::Unchanged, _) => "Unchanged",
            (ProcessResult::Skipped(_), _) => "Skipped",
        }
    }
}

/// The fields of an existing artifact's frontmatter the engine cares about.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileFrontmatter {
    #[serde(default)]
    pub granola_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl FileFrontmatter {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .as_deref()
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Read the YAML frontmatter from an existing .md file.
/// Returns `None` for files without a well-formed leading `---` block.
pub fn parse_existing_frontmatter(path: &Path) -> Option<FileFrontmatter> {
    let file = File::open(path).ok()?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let first = lines.next()?.ok()?;
    if first.trim() != "---" {
        return None;
    }

    let mut block = String::new();
    let mut closed = false;
    for line in lines {
        let line = line.ok()?;
        if line.trim() == "---" {
            closed = true;
            break;
        }
        block.push_str(&line);
        block.push('\n');
    }
    if !closed {
        return None;
    }
    serde_yaml::from_str(&block).ok()
}

/// `{date}_{slug}`: the collision-free stem of a record's artifacts.
pub fn base_stem(record: &MeetingRecord) -> String {
    let raw_slug = slug::slugify(&record.title);
    // slug output is ASCII-only, so byte == char
    let mut slug = raw_slug[..raw_slug.len().min(MAX_SLUG_LEN)]
        .trim_end_matches('-')
        .to_string();
    if slug.is_empty() {
        slug = "untitled".to_string();
    }
    format!("{}_{}", record.start.format("%Y-%m-%d"), slug)
}

pub fn transcript_file_name(stem: &str) -> String {
    format!("{stem}{TRANSCRIPT_SUFFIX}.md")
}

/// Write `content` to `path` through a temporary file in the same directory,
/// so readers only ever see the old file or the complete new one.
pub fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    // Temp files are created 0600; artifacts should read like any other note.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
