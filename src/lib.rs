//! # granola-export
//!
//! A CLI tool that exports [Granola](https://granola.ai) meeting notes from the
//! app's local cache to standalone Markdown files.
//!
//! ## What it does
//!
//! Granola keeps recent meetings in a JSON cache (`cache-v4.json`) with a
//! limited retention window. This tool reads that cache and writes each meeting
//! as a Markdown file with YAML frontmatter (title, date, time, duration,
//! attendees, folders) followed by the user's notes and the AI summary. When a
//! transcript is cached it is saved next to the note as `<name>_transcript.md`.
//!
//! The cache is opened **read-only**, and exported files are never deleted: once
//! a meeting leaves the cache, its export is the durable copy.
//!
//! ## Incremental export
//!
//! On repeated runs, existing files are matched to meetings by the `granola_id`
//! in their frontmatter and compared by `updated_at`. Unchanged meetings are
//! skipped; edited meetings are re-exported in place. `--force` re-exports
//! everything, `--dry-run` reports what would happen without writing.
//!
//! ## Usage
//!
//! ```sh
//! # Export to ~/granola-notes from the default cache location
//! granola-export
//!
//! # Preview an export to a custom directory
//! granola-export --output-dir ~/notes/meetings --dry-run --verbose
//!
//! # Register a query server in a desktop assistant's tool registry
//! granola-export register-server --config-file ~/.config/app/config.json \
//!     --name granola --command /usr/local/bin/notes-server --arg ~/granola-notes
//! ```
//!
//! Preferences can be persisted in `~/.config/granola-export/config.toml`.
//!
//! ## Limitations
//!
//! Runs against the same output directory must not overlap; there is no lock.

pub mod error;
pub mod exporter;
pub mod importer;
pub mod renderer;
pub mod server_config;
pub mod tiptap;
pub mod utils;

pub use error::{RecordError, ServerConfigError, SyncError};
pub use exporter::{RecordOutcome, SyncReport, run};
pub use utils::{ExportConfig, ProcessResult};
