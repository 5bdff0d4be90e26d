use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use granola_export::{ExportConfig, ProcessResult, RecordError, SyncError, run};
use serde_json::{Value, json};
use tempfile::TempDir;

fn standup(updated_at: &str, notes: &str) -> Value {
    json!({
        "id": "abc123",
        "title": "Weekly Standup",
        "created_at": "2025-01-15T08:55:00Z",
        "updated_at": updated_at,
        "google_calendar_event": {
            "start": { "dateTime": "2025-01-15T09:00:00Z" },
            "end": { "dateTime": "2025-01-15T09:30:00Z" }
        },
        "people": {
            "attendees": [{ "name": "Alice Smith", "email": "alice@example.com" }]
        },
        "notes_markdown": notes
    })
}

fn retro() -> Value {
    json!({
        "id": "def456",
        "title": "Sprint Retro",
        "created_at": "2025-01-16T15:00:00+01:00",
        "updated_at": "2025-01-16T16:10:00Z",
        "notes_markdown": "",
    })
}

fn write_cache(dir: &Path, documents: Value, extra: Value) -> PathBuf {
    let mut state = json!({ "documents": documents });
    if let (Some(state), Some(extra)) = (state.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            state.insert(k.clone(), v.clone());
        }
    }
    let path = dir.join("cache-v4.json");
    // The app stores the state double-encoded.
    let file = json!({ "cache": json!({ "state": state }).to_string() });
    fs::write(&path, file.to_string()).unwrap();
    path
}

fn config(cache_path: &Path, output_dir: &Path) -> ExportConfig {
    ExportConfig {
        cache_path: cache_path.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        force: false,
        dry_run: false,
        verbose: false,
    }
}

/// file name → contents of every file in `dir`.
fn snapshot(dir: &Path) -> BTreeMap<String, String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return BTreeMap::new();
    };
    entries
        .flatten()
        .map(|e| {
            (
                e.file_name().to_string_lossy().to_string(),
                fs::read_to_string(e.path()).unwrap(),
            )
        })
        .collect()
}

#[test]
fn first_run_creates_the_documented_artifact() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "Shipped v2.") }),
        json!({}),
    );

    let report = run(&config(&cache, &out)).unwrap();
    assert_eq!(report.created(), 1);
    assert!(report.summary_line().contains("1 created, 0 updated, 0 unchanged"));
    assert_eq!(report.outcomes[0].result, ProcessResult::Created);
    assert_eq!(report.outcomes[0].file_name.as_deref(), Some("2025-01-15_weekly-standup.md"));

    let md = fs::read_to_string(out.join("2025-01-15_weekly-standup.md")).unwrap();
    assert!(md.starts_with(
        "---\ntitle: Weekly Standup\ndate: 2025-01-15\ntime: \"09:00\"\nduration_minutes: 30\n\
         attendees:\n  - name: Alice Smith\n    email: alice@example.com\n\
         type: meeting\ngranola_id: abc123\nupdated_at: \"2025-01-15T09:35:00Z\"\n---\n"
    ));
    assert!(md.contains("## Notes\n\nShipped v2.\n"));
    assert!(md.contains("## Summary\n\n_No summary available._\n"));
}

#[test]
fn second_run_is_idempotent() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "Shipped v2."), "def456": retro() }),
        json!({ "transcripts": { "abc123": [{ "source": "microphone", "text": "Hi" }] } }),
    );

    let first = run(&config(&cache, &out)).unwrap();
    assert_eq!(first.created(), 2);
    assert_eq!(first.transcripts_saved(), 1);
    let before = snapshot(&out);

    let second = run(&config(&cache, &out)).unwrap();
    assert!(second.summary_line().contains("0 created, 0 updated, 2 unchanged"));
    assert_eq!(second.transcripts_saved(), 0);
    assert_eq!(snapshot(&out), before);
}

#[test]
fn output_is_deterministic_across_directories() {
    let work = TempDir::new().unwrap();
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n"), "def456": retro() }),
        json!({}),
    );
    let a = work.path().join("a");
    let b = work.path().join("b");
    run(&config(&cache, &a)).unwrap();
    run(&config(&cache, &b)).unwrap();
    assert_eq!(snapshot(&a), snapshot(&b));
}

#[test]
fn newer_record_is_rewritten_in_place() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "Draft.") }),
        json!({}),
    );
    run(&config(&cache, &out)).unwrap();

    write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T11:00:00Z", "Final notes.") }),
        json!({}),
    );
    let report = run(&config(&cache, &out)).unwrap();
    assert_eq!(report.outcomes[0].result, ProcessResult::Updated);
    assert!(report.summary_line().contains("0 created, 1 updated, 0 unchanged"));

    let files = snapshot(&out);
    assert_eq!(files.len(), 1);
    let md = &files["2025-01-15_weekly-standup.md"];
    assert!(md.contains("Final notes."));
    assert!(md.contains("updated_at: \"2025-01-15T11:00:00Z\""));
}

#[test]
fn records_leaving_the_cache_keep_their_exports() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n"), "def456": retro() }),
        json!({}),
    );
    run(&config(&cache, &out)).unwrap();
    let before = snapshot(&out);

    write_cache(work.path(), json!({ "def456": retro() }), json!({}));
    let report = run(&config(&cache, &out)).unwrap();
    assert_eq!(report.unchanged(), 1);
    assert_eq!(snapshot(&out), before);
}

#[test]
fn force_rewrites_every_record() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n"), "def456": retro() }),
        json!({}),
    );
    run(&config(&cache, &out)).unwrap();
    let before = snapshot(&out);

    let mut forced = config(&cache, &out);
    forced.force = true;
    let report = run(&forced).unwrap();
    assert_eq!(report.updated(), 2);
    assert_eq!(report.unchanged(), 0);
    assert_eq!(snapshot(&out), before, "forced rewrite renders the same bytes");
}

#[test]
fn dry_run_matches_a_real_run_and_writes_nothing() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n"), "def456": retro() }),
        json!({ "transcripts": { "def456": [{ "source": "system", "text": "Hello" }] } }),
    );

    let mut dry = config(&cache, &out);
    dry.dry_run = true;
    let preview = run(&dry).unwrap();
    assert!(!out.exists(), "dry-run must not create the output directory");
    assert!(preview.summary_line().starts_with("[DRY RUN] "));

    let real = run(&config(&cache, &out)).unwrap();
    let classes = |r: &granola_export::SyncReport| {
        r.outcomes
            .iter()
            .map(|o| (o.file_name.clone(), o.result.clone(), o.transcript.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(classes(&preview), classes(&real));

    // Against an existing export too.
    let before = snapshot(&out);
    let preview = run(&dry).unwrap();
    assert_eq!(preview.unchanged(), 2);
    assert_eq!(snapshot(&out), before);
}

#[test]
fn title_change_moves_the_export() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n") }),
        json!({}),
    );
    run(&config(&cache, &out)).unwrap();

    let mut renamed = standup("2025-01-15T10:00:00Z", "n");
    renamed["title"] = json!("Team Sync");
    write_cache(work.path(), json!({ "abc123": renamed }), json!({}));
    let report = run(&config(&cache, &out)).unwrap();

    assert_eq!(report.outcomes[0].result, ProcessResult::Updated);
    let names: Vec<_> = snapshot(&out).into_keys().collect();
    assert_eq!(names, ["2025-01-15_team-sync.md"]);
}

#[test]
fn same_day_title_collisions_are_disambiguated_by_id() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let mut twin = standup("2025-01-15T09:35:00Z", "other room");
    twin["id"] = json!("zzz98765432");
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n"), "zzz98765432": twin }),
        json!({}),
    );

    run(&config(&cache, &out)).unwrap();
    let names: Vec<_> = snapshot(&out).into_keys().collect();
    assert_eq!(
        names,
        ["2025-01-15_weekly-standup_abc123.md", "2025-01-15_weekly-standup_zzz98765.md"]
    );

    let again = run(&config(&cache, &out)).unwrap();
    assert_eq!(again.unchanged(), 2);
}

#[test]
fn foreign_files_are_never_overwritten() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("2025-01-15_weekly-standup.md"), "my own notes\n").unwrap();
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n") }),
        json!({}),
    );

    let report = run(&config(&cache, &out)).unwrap();
    assert_eq!(
        report.outcomes[0].file_name.as_deref(),
        Some("2025-01-15_weekly-standup_abc123.md")
    );
    assert_eq!(
        fs::read_to_string(out.join("2025-01-15_weekly-standup.md")).unwrap(),
        "my own notes\n"
    );
}

#[test]
fn invalid_records_are_skipped_without_aborting() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let cache = write_cache(
        work.path(),
        json!({
            "abc123": standup("2025-01-15T09:35:00Z", "n"),
            "broken": { "id": "broken", "title": "No dates" },
            "gone": { "id": "gone", "created_at": "2025-01-01T00:00:00Z",
                      "updated_at": "2025-01-01T00:00:00Z", "deleted_at": "2025-01-02T00:00:00Z" }
        }),
        json!({}),
    );

    let report = run(&config(&cache, &out)).unwrap();
    assert_eq!(report.created(), 1);
    assert_eq!(report.skipped(), 1);
    let (outcome, error) = report.failures().next().unwrap();
    assert_eq!(outcome.id, "broken");
    assert_eq!(error, &RecordError::MissingField("created_at"));
    assert!(report.summary_line().ends_with("1 skipped"));
    assert_eq!(snapshot(&out).len(), 1);
}

#[test]
fn transcript_is_saved_once_and_kept() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let utterances = json!({ "transcripts": { "abc123": [
        { "source": "microphone", "text": "Morning", "start_timestamp": "2025-01-15T09:00:05Z" },
        { "source": "system", "text": "Hi" }
    ]}});
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n") }),
        utterances,
    );

    let report = run(&config(&cache, &out)).unwrap();
    assert!(report.summary_line().ends_with(", 1 transcripts saved"));
    let path = out.join("2025-01-15_weekly-standup_transcript.md");
    let transcript = fs::read_to_string(&path).unwrap();
    assert!(transcript.contains("type: transcript\ngranola_id: abc123\n"));
    assert!(transcript.contains("**You:** [09:00:05] Morning\n\n**Other:** Hi\n"));

    // The cache evicts transcripts long before notes; the export stays.
    write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n") }),
        json!({}),
    );
    let report = run(&config(&cache, &out)).unwrap();
    assert_eq!(report.unchanged(), 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), transcript);
}

#[test]
fn unreadable_cache_is_fatal_and_touches_nothing() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");

    let missing = work.path().join("missing.json");
    let err = run(&config(&missing, &out)).unwrap_err();
    assert!(matches!(err, SyncError::CacheUnreadable { .. }));

    let garbage = work.path().join("garbage.json");
    fs::write(&garbage, "{\"cache\": \"{oops\"}").unwrap();
    let err = run(&config(&garbage, &out)).unwrap_err();
    assert!(matches!(err, SyncError::CacheUnreadable { .. }));

    assert!(!out.exists());
}

#[test]
fn output_dir_that_is_a_file_is_fatal() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    fs::write(&out, "not a directory").unwrap();
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n") }),
        json!({}),
    );

    let err = run(&config(&cache, &out)).unwrap_err();
    assert!(matches!(err, SyncError::OutputDirUnwritable { .. }));
}

#[test]
fn dry_run_against_an_unlistable_output_dir_is_fatal() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    fs::write(&out, "not a directory").unwrap();
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n") }),
        json!({}),
    );

    let mut dry = config(&cache, &out);
    dry.dry_run = true;
    let err = run(&dry).unwrap_err();
    assert!(matches!(err, SyncError::Io { .. }));
}

#[test]
fn foreign_file_on_the_id_suffix_is_not_overwritten() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("2025-01-15_weekly-standup.md"), "mine A\n").unwrap();
    fs::write(out.join("2025-01-15_weekly-standup_abc123.md"), "mine B\n").unwrap();
    let cache = write_cache(
        work.path(),
        json!({ "abc123": standup("2025-01-15T09:35:00Z", "n") }),
        json!({}),
    );

    let report = run(&config(&cache, &out)).unwrap();
    assert_eq!(
        report.outcomes[0].file_name.as_deref(),
        Some("2025-01-15_weekly-standup_abc123_2.md")
    );
    let files = snapshot(&out);
    assert_eq!(files["2025-01-15_weekly-standup.md"], "mine A\n");
    assert_eq!(files["2025-01-15_weekly-standup_abc123.md"], "mine B\n");

    let again = run(&config(&cache, &out)).unwrap();
    assert_eq!(again.unchanged(), 1);
    assert_eq!(snapshot(&out), files);
}

#[test]
fn control_characters_in_titles_do_not_break_reruns() {
    let work = TempDir::new().unwrap();
    let out = work.path().join("notes");
    let mut doc = standup("2025-01-15T09:35:00Z", "n");
    doc["title"] = json!("Standup\u{b}notes");
    doc["people"]["attendees"][0]["name"] = json!("Alice\u{7}");
    let cache = write_cache(work.path(), json!({ "abc123": doc }), json!({}));

    run(&config(&cache, &out)).unwrap();
    let before = snapshot(&out);
    for _ in 0..3 {
        let report = run(&config(&cache, &out)).unwrap();
        assert_eq!(report.unchanged(), 1);
    }
    assert_eq!(snapshot(&out), before);
    assert_eq!(before.len(), 1);
}
