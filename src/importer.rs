/// Type definitions for the Granola desktop cache (`cache-v4.json`) and the
/// extraction of meeting records from it.
///
/// File layout:
/// ```json
/// { "cache": "<JSON string or object>" }
/// ```
/// The envelope decodes to `{ "state": { ... } }` where `state` holds:
/// - `documents`             – id → document (title, timestamps, notes, people, calendar event)
/// - `documentPanels`        – document id → panel id → AI-generated panel (summary)
/// - `transcripts`           – document id → list of utterances
/// - `documentLists`         – list id → document ids (the user's folders)
/// - `documentListsMetadata` – list id → `{ "title": ... }`
///
/// Every sub-structure is decoded leniently: a single malformed document is a
/// per-record failure, never a failure of the whole cache.
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{RecordError, SyncError};
use crate::tiptap;

pub const UNTITLED: &str = "Untitled Meeting";

// ---------------------------------------------------------------------------
// Raw cache schema
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CacheFile {
    cache: Value,
}

#[derive(Deserialize)]
struct Envelope {
    state: CacheState,
}

/// The decoded `state` object of the cache.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheState {
    pub documents: HashMap<String, Value>,
    #[serde(rename = "documentPanels")]
    pub document_panels: HashMap<String, Value>,
    pub transcripts: HashMap<String, Value>,
    #[serde(rename = "documentLists")]
    pub document_lists: HashMap<String, Vec<String>>,
    #[serde(rename = "documentListsMetadata")]
    pub document_lists_metadata: HashMap<String, ListMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListMetadata {
    pub title: Option<String>,
}

/// One meeting document as stored by the app.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Document {
    pub id: Option<String>,
    pub title: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub deleted_at: Option<Value>,
    pub was_trashed: Option<bool>,
    pub notes_markdown: Option<String>,
    /// Rich-text tree of the user's notes.
    pub notes: Option<Value>,
    pub google_calendar_event: Option<CalendarEvent>,
    pub people: Option<People>,
}

impl Document {
    pub fn is_deleted(&self) -> bool {
        let deleted = self.deleted_at.as_ref().is_some_and(|v| !v.is_null());
        deleted || self.was_trashed.unwrap_or(false)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CalendarEvent {
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EventTime {
    #[serde(rename = "dateTime")]
    pub date_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct People {
    pub creator: Option<Person>,
    pub attendees: Option<Vec<Person>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Person {
    pub name: Option<String>,
    pub email: Option<String>,
    pub details: Option<PersonDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PersonDetails {
    pub person: Option<PersonProfile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PersonProfile {
    pub name: Option<PersonName>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PersonName {
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
}

impl Person {
    /// Best available display name: explicit name, profile full name, email.
    fn display_name(&self) -> String {
        let full_name = self
            .details
            .as_ref()
            .and_then(|d| d.person.as_ref())
            .and_then(|p| p.name.as_ref())
            .and_then(|n| n.full_name.as_deref());
        [self.name.as_deref(), full_name, self.email.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or("Unknown")
            .to_string()
    }
}

/// An AI-generated panel attached to a document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Panel {
    pub content: Option<Value>,
    pub original_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawUtterance {
    pub source: Option<String>,
    pub text: Option<String>,
    pub start_timestamp: Option<String>,
}

// ---------------------------------------------------------------------------
// Meeting records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendee {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    /// The local microphone, i.e. the user.
    You,
    Other,
}

impl Speaker {
    pub fn label(self) -> &'static str {
        match self {
            Speaker::You => "You",
            Speaker::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    pub at: Option<DateTime<FixedOffset>>,
}

/// A meeting extracted from the cache, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingRecord {
    pub id: String,
    pub title: String,
    /// Start time in the offset it was recorded with.
    pub start: DateTime<FixedOffset>,
    pub duration_minutes: Option<i64>,
    pub attendees: Vec<Attendee>,
    pub folders: Vec<String>,
    pub notes: String,
    pub summary: String,
    pub transcript: Vec<Utterance>,
    pub updated_at: DateTime<Utc>,
}

/// A cache entry that could not be turned into a [`MeetingRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// The document id, or its key in the cache when the id is missing.
    pub key: String,
    pub title: Option<String>,
    pub error: RecordError,
}

/// Records sorted by (start, id), plus the entries that failed extraction.
#[derive(Debug, Default)]
pub struct Extracted {
    pub records: Vec<MeetingRecord>,
    pub failures: Vec<RecordFailure>,
}

/// Load and decode the cache file. Never touches anything but `path`.
pub fn load_cache(path: &Path) -> Result<CacheState, SyncError> {
    let raw = fs::read_to_string(path).map_err(|e| SyncError::cache(path, e))?;
    let file: CacheFile = serde_json::from_str(&raw).map_err(|e| SyncError::cache(path, e))?;

    // Older app versions store the envelope as a JSON-encoded string.
    let envelope = match file.cache {
        Value::String(inner) => {
            serde_json::from_str::<Value>(&inner).map_err(|e| SyncError::cache(path, e))?
        }
        other => other,
    };

    let envelope: Envelope =
        serde_json::from_value(envelope).map_err(|e| SyncError::cache(path, e))?;
    log::debug!(
        "cache loaded: {} documents, {} transcripts",
        envelope.state.documents.len(),
        envelope.state.transcripts.len()
    );
    Ok(envelope.state)
}

/// Extract every live document in the cache as a meeting record.
pub fn extract_records(state: &CacheState) -> Extracted {
    let folders = folder_index(state);
    let mut out = Extracted::default();

    for (key, raw) in &state.documents {
        let doc = match Document::deserialize(raw) {
            Ok(doc) => doc,
            Err(e) => {
                out.failures.push(RecordFailure {
                    key: key.clone(),
                    title: raw.get("title").and_then(Value::as_str).map(str::to_string),
                    error: RecordError::Malformed(e.to_string()),
                });
                continue;
            }
        };

        if doc.is_deleted() {
            log::debug!("skipping deleted document {key}");
            continue;
        }

        match extract_record(&doc, state, &folders) {
            Ok(record) => out.records.push(record),
            Err(error) => out.failures.push(RecordFailure {
                key: doc.id.clone().unwrap_or_else(|| key.clone()),
                title: doc.title.clone(),
                error,
            }),
        }
    }

    out.records.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
    out.failures.sort_by(|a, b| a.key.cmp(&b.key));
    out
}

/// document id → sorted folder names.
fn folder_index(state: &CacheState) -> HashMap<&str, Vec<String>> {
    let mut index: HashMap<&str, Vec<String>> = HashMap::new();
    for (list_id, doc_ids) in &state.document_lists {
        let Some(name) = state
            .document_lists_metadata
            .get(list_id)
            .and_then(|m| m.title.as_deref())
            .filter(|t| !t.is_empty())
        else {
            continue;
        };
        for doc_id in doc_ids {
            index.entry(doc_id.as_str()).or_default().push(name.to_string());
        }
    }
    for names in index.values_mut() {
        names.sort();
    }
    index
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<FixedOffset>, RecordError> {
    DateTime::parse_from_rfc3339(value).map_err(|_| RecordError::BadTimestamp {
        field,
        value: value.to_string(),
    })
}

fn extract_record(
    doc: &Document,
    state: &CacheState,
    folders: &HashMap<&str, Vec<String>>,
) -> Result<MeetingRecord, RecordError> {
    let id = doc
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(RecordError::MissingField("id"))?;

    let title = doc
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED)
        .to_string();

    // Calendar start wins over the document's creation time.
    let event = doc.google_calendar_event.as_ref();
    let event_start = event
        .and_then(|e| e.start.as_ref())
        .and_then(|t| t.date_time.as_deref());
    let event_end = event
        .and_then(|e| e.end.as_ref())
        .and_then(|t| t.date_time.as_deref());

    let (start, duration_minutes) = match event_start {
        Some(raw_start) => {
            let start = parse_timestamp("google_calendar_event.start.dateTime", raw_start)?;
            let duration = event_end
                .and_then(|raw_end| DateTime::parse_from_rfc3339(raw_end).ok())
                .map(|end| (end - start).num_minutes());
            (start, duration)
        }
        None => {
            let created = doc
                .created_at
                .as_deref()
                .ok_or(RecordError::MissingField("created_at"))?;
            (parse_timestamp("created_at", created)?, None)
        }
    };

    let updated_raw = doc
        .updated_at
        .as_deref()
        .ok_or(RecordError::MissingField("updated_at"))?;
    let updated_at = parse_timestamp("updated_at", updated_raw)?.with_timezone(&Utc);

    let mut attendees = Vec::new();
    if let Some(people) = &doc.people {
        let everyone = people
            .creator
            .iter()
            .chain(people.attendees.iter().flatten());
        for person in everyone {
            attendees.push(Attendee {
                name: person.display_name(),
                email: person.email.clone().filter(|e| !e.trim().is_empty()),
            });
        }
    }

    let notes = match doc.notes_markdown.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(md) => md.to_string(),
        None => doc.notes.as_ref().map(tiptap::to_markdown).unwrap_or_default(),
    };

    Ok(MeetingRecord {
        summary: extract_summary(state.document_panels.get(&id)),
        transcript: extract_transcript(state.transcripts.get(&id)),
        folders: folders.get(id.as_str()).cloned().unwrap_or_default(),
        notes: notes.trim().to_string(),
        id,
        title,
        start,
        duration_minutes,
        attendees,
        updated_at,
    })
}

/// The first panel with usable content, in cache order.
fn extract_summary(panels: Option<&Value>) -> String {
    let Some(panels) = panels.and_then(Value::as_object) else {
        return String::new();
    };
    for raw in panels.values() {
        let Ok(panel) = Panel::deserialize(raw) else {
            continue;
        };
        if let Some(content) = panel.content.as_ref().filter(|c| c.is_object()) {
            let md = tiptap::to_markdown(content);
            if !md.trim().is_empty() {
                return md.trim().to_string();
            }
        }
        if let Some(html) = panel.original_content.as_deref().filter(|h| !h.is_empty()) {
            let md = tiptap::html_to_markdown(html);
            if !md.is_empty() {
                return md;
            }
        }
    }
    String::new()
}

fn extract_transcript(raw: Option<&Value>) -> Vec<Utterance> {
    let Some(items) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| RawUtterance::deserialize(item).ok())
        .filter_map(|u| {
            let text = u.text.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
            Some(Utterance {
                speaker: match u.source.as_deref() {
                    Some("microphone") => Speaker::You,
                    _ => Speaker::Other,
                },
                text: text.to_string(),
                at: u
                    .start_timestamp
                    .as_deref()
                    .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok()),
            })
        })
        .collect()
}
