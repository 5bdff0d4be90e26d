use crate::importer::MeetingRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::Write;

/// Fixed `type:` tag of meeting artifacts. Readers filter on it.
pub const MEETING_TYPE: &str = "meeting";
pub const TRANSCRIPT_TYPE: &str = "transcript";

pub const NOTES_PLACEHOLDER: &str = "_No notes recorded._";
pub const SUMMARY_PLACEHOLDER: &str = "_No summary available._";

const YAML_SPECIAL: &[char] = &[
    ':', '#', '{', '}', '[', ']', '|', '>', '&', '*', '!', '%', '@', '`', '\'', '"', '\\', ',',
];

const YAML_KEYWORDS: &[&str] = &["true", "false", "yes", "no", "on", "off", "null", "~"];

// Characters YAML will not accept raw, or reads as line breaks.
fn needs_escape(c: char) -> bool {
    c.is_control() || matches!(c, '\u{2028}' | '\u{2029}' | '\u{feff}' | '\u{fffe}' | '\u{ffff}')
}

/// Render a string as a YAML scalar, double-quoting only when a plain scalar
/// would not read back as the same string.
///
/// Anything not starting with a letter is quoted, which covers indicators,
/// numbers and dates in one rule.
pub fn yaml_scalar(value: &str) -> String {
    let needs_quotes = !value.starts_with(char::is_alphabetic)
        || value.contains(YAML_SPECIAL)
        || value.contains(needs_escape)
        || value.ends_with(' ')
        || YAML_KEYWORDS.contains(&value.to_ascii_lowercase().as_str())
        || value.parse::<f64>().is_ok();
    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if needs_escape(c) && (c as u32) <= 0xff => {
                out.push_str(&format!("\\x{:02X}", c as u32))
            }
            c if needs_escape(c) => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// Emails are written bare when they are plain addresses, which is what
// downstream readers of older exports expect.
fn email_scalar(email: &str) -> String {
    let plain = email.contains('@')
        && email.starts_with(|c: char| c.is_ascii_alphanumeric())
        && email
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-@".contains(c));
    if plain {
        email.to_string()
    } else {
        yaml_scalar(email)
    }
}

/// `2025-01-15T09:35:00Z`; fractional seconds only when present.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn write_meeting_markdown<W: Write>(
    writer: &mut W,
    record: &MeetingRecord,
) -> std::io::Result<()> {
    writeln!(writer, "---")?;
    writeln!(writer, "title: {}", yaml_scalar(&record.title))?;
    writeln!(writer, "date: {}", record.start.format("%Y-%m-%d"))?;
    writeln!(writer, "time: \"{}\"", record.start.format("%H:%M"))?;
    if let Some(minutes) = record.duration_minutes {
        writeln!(writer, "duration_minutes: {}", minutes)?;
    }
    if !record.attendees.is_empty() {
        writeln!(writer, "attendees:")?;
        for attendee in &record.attendees {
            writeln!(writer, "  - name: {}", yaml_scalar(&attendee.name))?;
            if let Some(email) = &attendee.email {
                writeln!(writer, "    email: {}", email_scalar(email))?;
            }
        }
    }
    if !record.folders.is_empty() {
        writeln!(writer, "folders:")?;
        for folder in &record.folders {
            writeln!(writer, "  - {}", yaml_scalar(folder))?;
        }
    }
    writeln!(writer, "type: {}", MEETING_TYPE)?;
    writeln!(writer, "granola_id: {}", yaml_scalar(&record.id))?;
    writeln!(writer, "updated_at: \"{}\"", format_timestamp(&record.updated_at))?;
    writeln!(writer, "---")?;
    writeln!(writer)?;

    writeln!(writer, "# {}", record.title)?;
    writeln!(writer)?;

    writeln!(writer, "## Notes")?;
    writeln!(writer)?;
    if record.notes.is_empty() {
        writeln!(writer, "{}", NOTES_PLACEHOLDER)?;
    } else {
        writeln!(writer, "{}", record.notes)?;
    }
    writeln!(writer)?;

    writeln!(writer, "## Summary")?;
    writeln!(writer)?;
    if record.summary.is_empty() {
        writeln!(writer, "{}", SUMMARY_PLACEHOLDER)?;
    } else {
        writeln!(writer, "{}", record.summary)?;
    }

    Ok(())
}

/// Utterances are grouped by consecutive speaker; a new speaker starts a new
/// paragraph with a bold label.
pub fn write_transcript_markdown<W: Write>(
    writer: &mut W,
    record: &MeetingRecord,
) -> std::io::Result<()> {
    let title = format!("{} - Transcript", record.title);

    writeln!(writer, "---")?;
    writeln!(writer, "title: {}", yaml_scalar(&title))?;
    writeln!(writer, "date: {}", record.start.format("%Y-%m-%d"))?;
    writeln!(writer, "type: {}", TRANSCRIPT_TYPE)?;
    writeln!(writer, "granola_id: {}", yaml_scalar(&record.id))?;
    writeln!(writer, "---")?;
    writeln!(writer)?;
    writeln!(writer, "# {}", title)?;

    let mut current = None;
    for utterance in &record.transcript {
        let stamp = utterance
            .at
            .map(|at| format!("[{}] ", at.format("%H:%M:%S")))
            .unwrap_or_default();
        if current != Some(utterance.speaker) {
            writeln!(writer)?;
            writeln!(
                writer,
                "**{}:** {}{}",
                utterance.speaker.label(),
                stamp,
                utterance.text
            )?;
            current = Some(utterance.speaker);
        } else {
            writeln!(writer, "{}{}", stamp, utterance.text)?;
        }
    }

    Ok(())
}

pub fn meeting_markdown(record: &MeetingRecord) -> String {
    let mut buf = Vec::new();
    // Writing `&str`s into a Vec cannot fail and always yields UTF-8.
    let _ = write_meeting_markdown(&mut buf, record);
    String::from_utf8(buf).unwrap_or_default()
}

pub fn transcript_markdown(record: &MeetingRecord) -> String {
    let mut buf = Vec::new();
    let _ = write_transcript_markdown(&mut buf, record);
    String::from_utf8(buf).unwrap_or_default()
}
