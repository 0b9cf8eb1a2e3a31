//! Write hand-edited search results back into the files they came from.
//!
//! `search_apply` works on the flat, text rendering of a multi-file search (a
//! "report"): a header line per file, followed by numbered result lines that
//! mirror lines of that file. A user edits the report in place, and this crate
//! works out which result lines changed and turns them into positioned edits
//! against the original files.
//!
//! ```text
//! src/main.rs:
//!   3:     println!("Hello, world!");
//!   4  }
//! ```
//!
//! Besides plain replacements, the report understands *insertion markers*: a
//! result line whose line number is replaced by `↑` or `↓` is a brand new line
//! to be inserted above the next numbered line, or below the previous one.
//!
//! ## Getting Started
//!
//! The example below resolves the report against a single workspace root and
//! applies the edits to an in-memory [`DocumentStore`].
//!
//! ```rust
//! use search_apply::{
//!     apply_report, ApplyOptions, MemoryDocumentStore, ReportLocation, WorkspaceResolver,
//!     WorkspaceRoot,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 1. The files the report was generated from.
//! let mut store = MemoryDocumentStore::new();
//! store.insert("/ws/src/main.rs", "fn main() {\n    println!(\"Hello, world!\");\n}\n");
//!
//! // 2. The report, after the user changed line 2.
//! let report = "src/main.rs:\n  2:     println!(\"Hello, report!\");\n";
//!
//! // 3. Resolve printed paths against the one open workspace root and apply.
//! let resolver = WorkspaceResolver::new(vec![WorkspaceRoot::new("ws", "/ws")]);
//! let outcome = apply_report(
//!     report,
//!     &ReportLocation::untitled(),
//!     &resolver,
//!     &mut store,
//!     &ApplyOptions::default(),
//! )?;
//!
//! assert!(outcome.applied);
//! assert_eq!(outcome.synthesis.batch.len(), 1);
//! assert_eq!(
//!     store.content("/ws/src/main.rs"),
//!     Some("fn main() {\n    println!(\"Hello, report!\");\n}\n")
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### The Apply Workflow
//!
//! 1.  **Scanning:** [`scan_report`] classifies every report line as a file
//!     header, a result line, or unstructured text. This is pure and in-memory.
//! 2.  **Synthesis:** [`synthesize_edits`] folds the scanned lines into an
//!     [`EditBatch`], loading each target file once through a [`DocumentStore`]
//!     and resolving printed paths through a [`PathResolver`]. Line numbers are
//!     always resolved against the untouched original content.
//! 3.  **Commit:** [`commit_synthesis`] surfaces the long-line warning and hands
//!     the batch to the store, which applies it atomically per file.
//!
//! [`apply_report`] runs all three steps.
//!
//! ### Apply Modes
//!
//! [`ApplyMode::Apply`] honours `↑`/`↓` markers and notifies the store once the
//! report is reconciled. [`ApplyMode::LogOnly`] treats marker lines as inert and
//! records every replacement in a [`ChangeLog`] instead.
//!
//! ### Editing the Report
//!
//! [`insert_marker_above`], [`insert_marker_below`] and [`delete_lines`] are the
//! report-side commands that create marker lines for later re-parsing.
//!
//! ## Feature Flags
//!
//! ### `parallel`
//!
//! - **Enabled by default.**
//! - [`FsDocumentStore`] reads and rewrites every file of a batch in memory
//!   before writing anything. With this feature that preparation runs across
//!   files in parallel using [`rayon`](https://crates.io/crates/rayon).
use log::{debug, info, trace, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use similar::udiff::unified_diff;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

/// Token that marks a new line to insert above the next numbered line.
pub const UP_MARKER: char = '↑';
/// Token that marks a new line to insert below the previous numbered line.
pub const DOWN_MARKER: char = '↓';
/// Original lines longer than this (in characters) are never edited by default.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 200;

// --- Error Types ---

/// A printed path could not be mapped to a file location.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// None of the resolution rules produced a location for the path.
    #[error("Unable to resolve path '{path}'")]
    Unresolvable { path: String },
}

/// Errors raised by a [`DocumentStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested file does not exist.
    #[error("Target file not found: {0}")]
    NotFound(PathBuf),
    /// The user does not have permission to read or write the path.
    #[error("Permission denied for path: {path:?}")]
    PermissionDenied { path: PathBuf },
    /// The target path exists but is a directory.
    #[error("Target path is a directory, not a file: {path:?}")]
    IsDirectory { path: PathBuf },
    /// An edit pointed outside the file's current content, or overlapped an
    /// earlier edit of the same batch.
    #[error("Edit at {position} does not fit the content of {path:?}")]
    InvalidPosition { path: PathBuf, position: Position },
    /// Any other I/O failure.
    #[error("I/O error while processing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort a whole apply operation.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// A `↓` marker was not preceded by a numbered line in its file section.
    /// The position bookkeeping cannot be trusted after this, so nothing is applied.
    #[error("Unable to insert below in {file:?} (report line {report_line}): previous line not found")]
    MalformedInsertion { file: PathBuf, report_line: usize },
    /// The document store failed to apply the batch.
    #[error("Failed to apply edits: {0}")]
    Store(#[from] StoreError),
}

/// An edit position that does not fit the content it is applied to.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Edit position {0} is out of bounds or overlaps a previous edit")]
pub struct InvalidEditPosition(pub Position);

// --- Configuration ---

/// How the report's edits are interpreted and committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Honour `↑`/`↓` insertion markers and notify the store once the report
    /// has been reconciled with its files.
    #[default]
    Apply,
    /// Only numbered lines are considered. Marker lines are ignored, and every
    /// replacement is recorded in a [`ChangeLog`].
    LogOnly,
}

/// Options for configuring how a report is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Which apply behaviour to use.
    pub mode: ApplyMode,
    /// Original lines with more characters than this are never edited.
    pub max_line_length: usize,
    /// The message surfaced once when any line was skipped for its length.
    pub long_line_warning: String,
    /// If `true`, edits are synthesized but not handed to the store.
    pub dry_run: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            mode: ApplyMode::default(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            long_line_warning: default_long_line_warning(DEFAULT_MAX_LINE_LENGTH),
            dry_run: false,
        }
    }
}

impl ApplyOptions {
    /// Creates a new builder for `ApplyOptions`.
    ///
    /// # Example
    ///
    /// ```
    /// # use search_apply::{ApplyMode, ApplyOptions};
    /// let options = ApplyOptions::builder()
    ///     .mode(ApplyMode::LogOnly)
    ///     .max_line_length(120)
    ///     .build();
    ///
    /// assert_eq!(options.mode, ApplyMode::LogOnly);
    /// assert_eq!(
    ///     options.long_line_warning,
    ///     "Changes to lines over 120 characters in length may have been ignored."
    /// );
    /// ```
    pub fn builder() -> ApplyOptionsBuilder {
        ApplyOptionsBuilder::default()
    }
}

/// Default warning text for a given line length threshold.
pub fn default_long_line_warning(max_line_length: usize) -> String {
    format!(
        "Changes to lines over {} characters in length may have been ignored.",
        max_line_length
    )
}

/// A builder for creating `ApplyOptions`.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptionsBuilder {
    mode: Option<ApplyMode>,
    max_line_length: Option<usize>,
    long_line_warning: Option<String>,
    dry_run: Option<bool>,
}

impl ApplyOptionsBuilder {
    /// Selects the apply behaviour.
    pub fn mode(mut self, mode: ApplyMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the length threshold above which original lines are left alone.
    pub fn max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = Some(max_line_length);
        self
    }

    /// Overrides the long-line warning. When unset, the default text is
    /// derived from the configured threshold.
    pub fn long_line_warning(mut self, message: impl Into<String>) -> Self {
        self.long_line_warning = Some(message.into());
        self
    }

    /// If `true`, nothing is handed to the store.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    /// Builds the `ApplyOptions`.
    pub fn build(self) -> ApplyOptions {
        let default = ApplyOptions::default();
        let max_line_length = self.max_line_length.unwrap_or(default.max_line_length);
        ApplyOptions {
            mode: self.mode.unwrap_or(default.mode),
            max_line_length,
            long_line_warning: self
                .long_line_warning
                .unwrap_or_else(|| default_long_line_warning(max_line_length)),
            dry_run: self.dry_run.unwrap_or(default.dry_run),
        }
    }
}

// --- Data Structures ---

/// A 0-based line/character position in a file's original content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    /// Offset in characters (not bytes) from the start of the line.
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line + 1, self.character + 1)
    }
}

/// A half-open range between two [`Position`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextRange {
    pub start: Position,
    pub end: Position,
}

impl TextRange {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// One positioned change against a file's original content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Replace the text covered by `range`.
    Replace { range: TextRange, text: String },
    /// Insert `text` at `position`.
    InsertAt { position: Position, text: String },
}

impl Edit {
    pub fn start(&self) -> Position {
        match self {
            Edit::Replace { range, .. } => range.start,
            Edit::InsertAt { position, .. } => *position,
        }
    }

    pub fn end(&self) -> Position {
        match self {
            Edit::Replace { range, .. } => range.end,
            Edit::InsertAt { position, .. } => *position,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Edit::Replace { text, .. } | Edit::InsertAt { text, .. } => text,
        }
    }
}

/// Edits collected from one scan, keyed by resolved file location.
///
/// Once synthesis finishes, the edits of every file are in ascending document
/// order and never overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditBatch {
    files: BTreeMap<PathBuf, Vec<Edit>>,
}

impl EditBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an edit for `file`.
    pub fn push(&mut self, file: &Path, edit: Edit) {
        trace!("    Queued edit for '{}': {:?}", file.display(), edit);
        self.files.entry(file.to_path_buf()).or_default().push(edit);
    }

    /// The edits queued for `file`, in order.
    pub fn edits_for(&self, file: impl AsRef<Path>) -> &[Edit] {
        self.files
            .get(file.as_ref())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Iterates over every file with at least one edit.
    pub fn files(&self) -> impl Iterator<Item = (&Path, &[Edit])> {
        self.files
            .iter()
            .filter(|(_, edits)| !edits.is_empty())
            .map(|(path, edits)| (path.as_path(), edits.as_slice()))
    }

    /// Total number of edits across all files.
    pub fn len(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorts each file's edits by start position (stable) and drops every edit
    /// that conflicts with one already kept. Returns how many were dropped.
    ///
    /// An edit conflicts when it starts inside the previous kept edit, when it
    /// replaces a line that was already replaced, or when it lands on the same
    /// position right after the replacement of an empty line.
    fn normalize(&mut self) -> usize {
        let mut dropped = 0;
        for (path, edits) in self.files.iter_mut() {
            edits.sort_by_key(Edit::start);
            let mut kept: Vec<Edit> = Vec::with_capacity(edits.len());
            let mut replaced_lines = BTreeSet::new();
            for edit in edits.drain(..) {
                let line_taken = matches!(
                    &edit,
                    Edit::Replace { range, .. } if replaced_lines.contains(&range.start.line)
                );
                let overlaps = kept.last().is_some_and(|previous| {
                    edit.start() < previous.end() || follows_empty_line_replace(previous, &edit)
                });
                if line_taken || overlaps {
                    warn!(
                        "Dropping overlapping edit at {} in '{}'.",
                        edit.start(),
                        path.display()
                    );
                    dropped += 1;
                    continue;
                }
                if let Edit::Replace { range, .. } = &edit {
                    replaced_lines.insert(range.start.line);
                }
                kept.push(edit);
            }
            *edits = kept;
        }
        dropped
    }
}

/// Whether `edit` lands on the position of a preceding empty-line replacement.
fn follows_empty_line_replace(previous: &Edit, edit: &Edit) -> bool {
    match previous {
        Edit::Replace { range, .. } => range.start == range.end && edit.start() == range.start,
        Edit::InsertAt { .. } => false,
    }
}

/// The untouched content of a target file, loaded once per scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginalText {
    /// The file's lines, without line terminators.
    pub lines: Vec<String>,
    /// Whether the last line is followed by a line break.
    pub ends_with_newline: bool,
    /// Whether the file's first line break is `\r\n`. Inserted lines use the
    /// same terminator.
    pub crlf: bool,
}

impl OriginalText {
    /// Splits file content into lines (`\n` and `\r\n` terminators).
    ///
    /// A trailing line break ends the last line; it does not start an empty
    /// one. Content `"a\n"` has one line, so a report line numbered 2 for it
    /// is out of range.
    pub fn from_content(content: &str) -> Self {
        Self {
            lines: content.lines().map(String::from).collect(),
            ends_with_newline: content.ends_with('\n'),
            crlf: content
                .find('\n')
                .is_some_and(|i| content[..i].ends_with('\r')),
        }
    }

    /// The terminator used for lines inserted into this file.
    pub fn line_break(&self) -> &'static str {
        if self.crlf {
            "\r\n"
        } else {
            "\n"
        }
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    /// The position just past the line at `index`, including its line break.
    ///
    /// For a final line without a line break this is the end of that line.
    pub fn line_end_including_break(&self, index: usize) -> Position {
        if index + 1 < self.lines.len() || self.ends_with_newline {
            Position::new(index + 1, 0)
        } else {
            let width = self.line(index).map_or(0, |l| l.chars().count());
            Position::new(index, width)
        }
    }
}

/// The parsed token of a result line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineToken {
    /// A 1-based line number of the original file.
    Number(usize),
    /// `↑`: insert above the next numbered line.
    Above,
    /// `↓`: insert below the previous numbered line.
    Below,
}

/// The fields of a `<indentation><token><separator> <payload>` report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultLine<'a> {
    /// Width of the leading whitespace, in characters.
    pub indent: usize,
    pub token: LineToken,
    /// Width of the token as printed, in characters.
    pub token_width: usize,
    /// `:` for matched lines, a space for context lines and markers.
    pub separator: char,
    pub payload: &'a str,
}

impl ResultLine<'_> {
    /// Indentation plus token width. Marker lines synthesized next to this
    /// line align their marker with the last character of its token.
    pub fn offset(&self) -> usize {
        self.indent + self.token_width
    }
}

/// Classification of a single report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// `<path>:` announcing the file for the following result lines.
    FileHeader { path: &'a str },
    Result(ResultLine<'a>),
    /// Blank lines and anything else.
    Unstructured,
}

/// One classified line of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLine<'a> {
    /// The 1-based line number within the report.
    pub number: usize,
    pub text: &'a str,
    pub kind: LineKind<'a>,
}

/// Where the report itself lives, used as a hint when resolving paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportLocation {
    /// `None` for an unsaved, in-memory report.
    pub path: Option<PathBuf>,
}

impl ReportLocation {
    pub fn saved(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn untitled() -> Self {
        Self { path: None }
    }

    pub fn is_untitled(&self) -> bool {
        self.path.is_none()
    }
}

/// A single replacement recorded in log-only mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedChange {
    /// The 1-based line number in the original file.
    pub line_number: usize,
    pub old_text: String,
    pub new_text: String,
}

/// The replacements recorded for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogFile {
    pub path: PathBuf,
    pub changes: Vec<LoggedChange>,
}

/// A human-readable record of replacements, grouped by file in the order the
/// files were first seen.
///
/// # Example
///
/// ```
/// # use search_apply::ChangeLog;
/// # use std::path::Path;
/// let mut log = ChangeLog::default();
/// log.record(Path::new("src/a.ts"), 3, "old text", "new text");
/// assert_eq!(log.to_string(), "src/a.ts\n  3: old text\n   → new text\n");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLog {
    files: Vec<ChangeLogFile>,
}

impl ChangeLog {
    pub fn record(&mut self, path: &Path, line_number: usize, old_text: &str, new_text: &str) {
        let change = LoggedChange {
            line_number,
            old_text: old_text.to_string(),
            new_text: new_text.to_string(),
        };
        match self.files.iter_mut().find(|f| f.path == path) {
            Some(file) => file.changes.push(change),
            None => self.files.push(ChangeLogFile {
                path: path.to_path_buf(),
                changes: vec![change],
            }),
        }
    }

    pub fn files(&self) -> &[ChangeLogFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl fmt::Display for ChangeLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in &self.files {
            writeln!(f, "{}", file.path.display())?;
            for change in &file.changes {
                let number = change.line_number.to_string();
                writeln!(f, "  {}: {}", number, change.old_text)?;
                writeln!(f, "  {}→ {}", " ".repeat(number.len()), change.new_text)?;
            }
        }
        Ok(())
    }
}

/// Everything a scan produced, before anything is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Synthesis {
    pub batch: EditBatch,
    /// Set when at least one line was skipped for exceeding the length threshold.
    pub long_lines_skipped: bool,
    /// Result lines whose number is past the end of their file.
    pub out_of_range_lines: usize,
    /// Edits dropped because they overlapped an earlier edit of the same file.
    pub conflicts: usize,
    /// Printed paths of file headers that could not be resolved.
    pub unresolved_paths: Vec<String>,
    /// Resolved files whose original content could not be loaded.
    pub unloadable_files: Vec<PathBuf>,
    /// Present in [`ApplyMode::LogOnly`].
    pub change_log: Option<ChangeLog>,
}

/// The result of [`apply_report`] or [`commit_synthesis`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub synthesis: Synthesis,
    /// The long-line warning, at most once per operation.
    pub warning: Option<String>,
    /// `false` in dry-run mode.
    pub applied: bool,
}

// --- Report Scanner ---

/// Classifies a single report line.
///
/// # Example
///
/// ```
/// # use search_apply::{classify_line, LineKind, LineToken};
/// assert_eq!(classify_line("src/a.ts:"), LineKind::FileHeader { path: "src/a.ts" });
///
/// let LineKind::Result(result) = classify_line("  12: let x = 1;") else { panic!() };
/// assert_eq!(result.token, LineToken::Number(12));
/// assert_eq!(result.payload, "let x = 1;");
/// assert_eq!(result.offset(), 4);
///
/// assert_eq!(classify_line(""), LineKind::Unstructured);
/// ```
pub fn classify_line(text: &str) -> LineKind<'_> {
    if let Some(path) = parse_file_header(text) {
        return LineKind::FileHeader { path };
    }
    match parse_result_line(text) {
        Some(result) => LineKind::Result(result),
        None => LineKind::Unstructured,
    }
}

fn parse_file_header(line: &str) -> Option<&str> {
    let path = line.strip_suffix(':')?;
    let first = path.chars().next()?;
    if first.is_whitespace() {
        return None;
    }
    if parse_marker(path).is_some() {
        return None;
    }
    Some(path)
}

fn parse_marker(token: &str) -> Option<LineToken> {
    let mut chars = token.chars();
    let marker = match chars.next()? {
        UP_MARKER => LineToken::Above,
        DOWN_MARKER => LineToken::Below,
        _ => return None,
    };
    chars.next().is_none().then_some(marker)
}

fn parse_result_line(line: &str) -> Option<ResultLine<'_>> {
    let body = line.trim_start();
    let indent_len = line.len() - body.len();
    if indent_len == 0 {
        return None;
    }

    let token_end = body.find(|c: char| c == ':' || c.is_whitespace())?;
    let (token_text, rest) = body.split_at(token_end);
    if token_text.is_empty() {
        return None;
    }

    let separator = rest.chars().next()?;
    if separator != ':' && separator != ' ' {
        return None;
    }
    let payload = rest[separator.len_utf8()..].strip_prefix(' ')?;

    let token = match parse_marker(token_text) {
        Some(marker) => marker,
        None => {
            if !token_text.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            match token_text.parse::<usize>() {
                Ok(number) if number >= 1 => LineToken::Number(number),
                _ => return None,
            }
        }
    };

    Some(ResultLine {
        indent: line[..indent_len].chars().count(),
        token,
        token_width: token_text.chars().count(),
        separator,
        payload,
    })
}

/// A single-pass iterator over the classified lines of a report.
#[derive(Debug)]
pub struct ReportScanner<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> ReportScanner<'a> {
    pub fn new(report: &'a str) -> Self {
        Self {
            lines: report.lines().enumerate(),
        }
    }
}

impl<'a> Iterator for ReportScanner<'a> {
    type Item = ReportLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, text) = self.lines.next()?;
        Some(ReportLine {
            number: index + 1,
            text,
            kind: classify_line(text),
        })
    }
}

/// Starts scanning a report.
pub fn scan_report(report: &str) -> ReportScanner<'_> {
    ReportScanner::new(report)
}

// --- Path Resolver ---

/// Maps a printed path to a concrete file location.
pub trait PathResolver {
    /// Resolves `printed_path`, as it appears in a file header, for a report
    /// living at `report`.
    fn resolve(&self, printed_path: &str, report: &ReportLocation) -> Result<PathBuf, ResolveError>;
}

/// An open workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRoot {
    /// The display name used in `Name • relative/path` headers.
    pub name: String,
    pub path: PathBuf,
}

impl WorkspaceRoot {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// A root named after the last component of its path.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }
}

/// The default resolver, working from the set of open workspace roots.
///
/// Rules, in order:
/// 1. absolute paths are used as-is;
/// 2. `~/...` is expanded against the home directory;
/// 3. `Name • relative/path` is joined under the root called `Name`;
/// 4. with a single root, the path is joined under it;
/// 5. with several roots and a saved report, the path is joined under the one
///    root that contains the report, if exactly one does.
///
/// # Example
///
/// ```
/// # use search_apply::{PathResolver, ReportLocation, WorkspaceResolver, WorkspaceRoot};
/// # use std::path::PathBuf;
/// let resolver = WorkspaceResolver::new(vec![
///     WorkspaceRoot::new("proj", "/home/u/proj"),
///     WorkspaceRoot::new("lib", "/home/u/lib"),
/// ]);
/// let path = resolver.resolve("proj • src/a.ts", &ReportLocation::untitled()).unwrap();
/// assert_eq!(path, PathBuf::from("/home/u/proj/src/a.ts"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceResolver {
    roots: Vec<WorkspaceRoot>,
    home: Option<PathBuf>,
}

impl WorkspaceResolver {
    /// Creates a resolver for `roots`, using the current user's home directory.
    pub fn new(roots: Vec<WorkspaceRoot>) -> Self {
        Self {
            roots,
            home: dirs::home_dir(),
        }
    }

    /// Overrides the home directory used for `~/` paths.
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn roots(&self) -> &[WorkspaceRoot] {
        &self.roots
    }
}

impl PathResolver for WorkspaceResolver {
    fn resolve(&self, printed_path: &str, report: &ReportLocation) -> Result<PathBuf, ResolveError> {
        let unresolvable = || ResolveError::Unresolvable {
            path: printed_path.to_string(),
        };

        let path = Path::new(printed_path);
        if path.is_absolute() {
            return Ok(normalize_path(path));
        }
        if let Some(rest) = printed_path.strip_prefix("~/") {
            return self
                .home
                .as_ref()
                .map(|home| normalize_path(&home.join(rest)))
                .ok_or_else(unresolvable);
        }
        if self.roots.is_empty() {
            return Err(unresolvable());
        }

        if let Some((name, relative)) = printed_path.rsplit_once(" • ") {
            return self
                .roots
                .iter()
                .find(|root| root.name == name)
                .map(|root| normalize_path(&root.path.join(relative)))
                .ok_or_else(unresolvable);
        }

        if let [root] = self.roots.as_slice() {
            return Ok(normalize_path(&root.path.join(printed_path)));
        }

        // Several roots but no root name in the path: likely a report saved
        // from a single-root session. Use the root that contains the report.
        if let Some(report_path) = &report.path {
            let mut containing = self
                .roots
                .iter()
                .filter(|root| report_path.starts_with(&root.path));
            if let (Some(root), None) = (containing.next(), containing.next()) {
                trace!(
                    "  '{}' resolved through the root containing the report ('{}')",
                    printed_path,
                    root.name
                );
                return Ok(normalize_path(&root.path.join(printed_path)));
            }
        }

        Err(unresolvable())
    }
}

/// Lexically removes `.` and `..` components.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

// --- Document Store ---

/// The host that owns the target files.
pub trait DocumentStore {
    /// Loads the current content of `path`.
    fn open_original(&self, path: &Path) -> Result<OriginalText, StoreError>;

    /// Applies every edit in `batch`. Each file's edits are applied as a whole
    /// or not at all.
    fn apply_batch(&mut self, batch: &EditBatch) -> Result<(), StoreError>;

    /// Called after a successful [`ApplyMode::Apply`] run, when the report
    /// matches its files again.
    fn report_reconciled(&mut self, _report: &ReportLocation) {}
}

/// Applies a file's edits to its content.
///
/// Positions refer to `content` as it is; `edits` must be sorted and must not
/// overlap.
///
/// # Example
///
/// ```
/// # use search_apply::{apply_edits_to_content, Edit, Position, TextRange};
/// let edits = vec![
///     Edit::InsertAt { position: Position::new(0, 0), text: "zero\n".to_string() },
///     Edit::Replace {
///         range: TextRange::new(Position::new(1, 0), Position::new(1, 3)),
///         text: "TWO".to_string(),
///     },
/// ];
/// let content = apply_edits_to_content("one\ntwo\n", &edits).unwrap();
/// assert_eq!(content, "zero\none\nTWO\n");
/// ```
pub fn apply_edits_to_content(content: &str, edits: &[Edit]) -> Result<String, InvalidEditPosition> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(content.match_indices('\n').map(|(i, _)| i + 1))
        .collect();

    let mut new_content = String::with_capacity(content.len());
    let mut cursor = 0;
    for edit in edits {
        let start = byte_offset(content, &line_starts, edit.start())
            .ok_or(InvalidEditPosition(edit.start()))?;
        let end = byte_offset(content, &line_starts, edit.end())
            .ok_or(InvalidEditPosition(edit.end()))?;
        if start < cursor || end < start {
            return Err(InvalidEditPosition(edit.start()));
        }
        new_content.push_str(&content[cursor..start]);
        new_content.push_str(edit.text());
        cursor = end;
    }
    new_content.push_str(&content[cursor..]);
    Ok(new_content)
}

fn byte_offset(content: &str, line_starts: &[usize], position: Position) -> Option<usize> {
    let start = *line_starts.get(position.line)?;
    let end = line_starts
        .get(position.line + 1)
        .map_or(content.len(), |next| next - 1);
    let line = &content[start..end];
    let line = line.strip_suffix('\r').unwrap_or(line);
    if position.character == line.chars().count() {
        return Some(start + line.len());
    }
    line.char_indices()
        .nth(position.character)
        .map(|(i, _)| start + i)
}

/// A [`DocumentStore`] over an in-memory map of file contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    files: HashMap<PathBuf, String>,
    reconciled: usize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn content(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.files.get(path.as_ref()).map(String::as_str)
    }

    /// How many times a report was reported as reconciled.
    pub fn reconciled_count(&self) -> usize {
        self.reconciled
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn open_original(&self, path: &Path) -> Result<OriginalText, StoreError> {
        self.files
            .get(path)
            .map(|content| OriginalText::from_content(content))
            .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))
    }

    fn apply_batch(&mut self, batch: &EditBatch) -> Result<(), StoreError> {
        // Compute every file first so a failure leaves all of them untouched.
        let mut updated = Vec::new();
        for (path, edits) in batch.files() {
            let content = self
                .files
                .get(path)
                .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))?;
            let new_content =
                apply_edits_to_content(content, edits).map_err(|e| StoreError::InvalidPosition {
                    path: path.to_path_buf(),
                    position: e.0,
                })?;
            updated.push((path.to_path_buf(), new_content));
        }
        self.files.extend(updated);
        Ok(())
    }

    fn report_reconciled(&mut self, _report: &ReportLocation) {
        self.reconciled += 1;
    }
}

/// A proposed change to one file, rendered as a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePreview {
    pub path: PathBuf,
    pub diff: String,
}

/// A [`DocumentStore`] backed by the local filesystem.
///
/// Every file of a batch is read and rewritten in memory before anything is
/// written. Each file is then replaced atomically by renaming a temporary file
/// from the same directory over it.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDocumentStore;

impl FsDocumentStore {
    pub fn new() -> Self {
        Self
    }

    /// Renders what [`apply_batch`](DocumentStore::apply_batch) would change,
    /// without writing anything.
    pub fn preview_batch(&self, batch: &EditBatch) -> Result<Vec<FilePreview>, StoreError> {
        let previews = prepare_batch(batch)?
            .into_iter()
            .map(|prepared| {
                let old_header = format!("a/{}", prepared.path.display());
                let new_header = format!("b/{}", prepared.path.display());
                let diff = unified_diff(
                    similar::Algorithm::default(),
                    &prepared.old_content,
                    &prepared.new_content,
                    3,
                    Some((old_header.as_str(), new_header.as_str())),
                );
                FilePreview {
                    path: prepared.path,
                    diff,
                }
            })
            .collect();
        Ok(previews)
    }
}

impl DocumentStore for FsDocumentStore {
    fn open_original(&self, path: &Path) -> Result<OriginalText, StoreError> {
        trace!("  Reading target file '{}'", path.display());
        let content = read_file(path)?;
        Ok(OriginalText::from_content(&content))
    }

    fn apply_batch(&mut self, batch: &EditBatch) -> Result<(), StoreError> {
        for prepared in prepare_batch(batch)? {
            write_atomically(&prepared.path, &prepared.new_content)?;
            info!("  Successfully wrote changes to '{}'", prepared.path.display());
        }
        Ok(())
    }

    fn report_reconciled(&mut self, report: &ReportLocation) {
        match &report.path {
            Some(path) => info!("Report '{}' is in sync with its files.", path.display()),
            None => info!("Report is in sync with its files."),
        }
    }
}

struct PreparedFile {
    path: PathBuf,
    old_content: String,
    new_content: String,
}

fn prepare_batch(batch: &EditBatch) -> Result<Vec<PreparedFile>, StoreError> {
    let files: Vec<(&Path, &[Edit])> = batch.files().collect();

    #[cfg(feature = "parallel")]
    let prepared = files
        .par_iter()
        .map(|(path, edits)| prepare_file(path, edits))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let prepared = files
        .iter()
        .map(|(path, edits)| prepare_file(path, edits))
        .collect();

    prepared
}

fn prepare_file(path: &Path, edits: &[Edit]) -> Result<PreparedFile, StoreError> {
    debug!("  Preparing {} edit(s) for '{}'", edits.len(), path.display());
    let old_content = read_file(path)?;
    let new_content =
        apply_edits_to_content(&old_content, edits).map_err(|e| StoreError::InvalidPosition {
            path: path.to_path_buf(),
            position: e.0,
        })?;
    Ok(PreparedFile {
        path: path.to_path_buf(),
        old_content,
        new_content,
    })
}

fn read_file(path: &Path) -> Result<String, StoreError> {
    if path.is_dir() {
        return Err(StoreError::IsDirectory {
            path: path.to_path_buf(),
        });
    }
    fs::read_to_string(path).map_err(|e| map_io_error(path.to_path_buf(), e))
}

fn write_atomically(path: &Path, content: &str) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut temp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| map_io_error(dir.to_path_buf(), e))?;
    temp.write_all(content.as_bytes())
        .map_err(|e| map_io_error(path.to_path_buf(), e))?;
    // Keep the target's permissions rather than the temp file's.
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(temp.path(), metadata.permissions())
            .map_err(|e| map_io_error(path.to_path_buf(), e))?;
    }
    temp.persist(path)
        .map_err(|e| map_io_error(path.to_path_buf(), e.error))?;
    Ok(())
}

/// Converts a `std::io::Error` into a more specific `StoreError`.
fn map_io_error(path: PathBuf, e: std::io::Error) -> StoreError {
    match e.kind() {
        std::io::ErrorKind::NotFound => StoreError::NotFound(path),
        std::io::ErrorKind::PermissionDenied => StoreError::PermissionDenied { path },
        std::io::ErrorKind::IsADirectory => StoreError::IsDirectory { path },
        _ => StoreError::Io { path, source: e },
    }
}

// --- Edit Synthesizer ---

/// The file section currently being scanned.
#[derive(Debug)]
struct Section {
    path: PathBuf,
    snapshot: Rc<OriginalText>,
}

/// Insertion bookkeeping within one file section.
#[derive(Debug, Default)]
struct SectionCursor {
    /// End (including line break) of the last numbered line seen.
    last_line_end: Option<Position>,
    pending_above: Vec<String>,
    pending_below: Vec<String>,
}

impl SectionCursor {
    fn reset(&mut self) {
        let dropped = self.pending_above.len() + self.pending_below.len();
        if dropped > 0 {
            debug!("  Dropping {} pending insertion(s) with no anchor line.", dropped);
        }
        *self = Self::default();
    }
}

/// The accumulator threaded through the scan.
#[derive(Debug, Default)]
struct SynthesisState {
    section: Option<Section>,
    cursor: SectionCursor,
    /// `None` marks a file whose load already failed.
    snapshots: HashMap<PathBuf, Option<Rc<OriginalText>>>,
    synthesis: Synthesis,
}

struct Synthesizer<'a, R: ?Sized, S: ?Sized> {
    report: &'a ReportLocation,
    resolver: &'a R,
    store: &'a S,
    options: &'a ApplyOptions,
}

impl<R, S> Synthesizer<'_, R, S>
where
    R: PathResolver + ?Sized,
    S: DocumentStore + ?Sized,
{
    fn step(
        &self,
        mut state: SynthesisState,
        line: ReportLine<'_>,
    ) -> Result<SynthesisState, ApplyError> {
        match line.kind {
            LineKind::FileHeader { path } => {
                trace!("  Report line {}: file header '{}'", line.number, path);
                state.cursor.reset();
                let section = self.enter_section(&mut state, path, line.number);
                state.section = section;
            }
            LineKind::Result(result) => {
                let SynthesisState {
                    section,
                    cursor,
                    synthesis,
                    ..
                } = &mut state;
                match section {
                    Some(section) => {
                        self.consume_result(section, cursor, synthesis, &result, line.number)?
                    }
                    None => trace!(
                        "  Report line {}: result outside an active file section, ignored",
                        line.number
                    ),
                }
            }
            LineKind::Unstructured => state.cursor.last_line_end = None,
        }
        Ok(state)
    }

    fn enter_section(
        &self,
        state: &mut SynthesisState,
        printed_path: &str,
        report_line: usize,
    ) -> Option<Section> {
        let target = match self.resolver.resolve(printed_path, self.report) {
            Ok(target) => target,
            Err(e) => {
                warn!("{} (report line {}). Skipping its results.", e, report_line);
                state.synthesis.unresolved_paths.push(printed_path.to_string());
                return None;
            }
        };

        if !state.snapshots.contains_key(&target) {
            let loaded = match self.store.open_original(&target) {
                Ok(text) => {
                    debug!("  Loaded {} line(s) from '{}'", text.lines.len(), target.display());
                    Some(Rc::new(text))
                }
                Err(e) => {
                    warn!("Unable to open '{}': {}. Skipping its results.", target.display(), e);
                    state.synthesis.unloadable_files.push(target.clone());
                    None
                }
            };
            state.snapshots.insert(target.clone(), loaded);
        }

        let snapshot = state.snapshots.get(&target).cloned().flatten()?;
        Some(Section {
            path: target,
            snapshot,
        })
    }

    fn consume_result(
        &self,
        section: &Section,
        cursor: &mut SectionCursor,
        synthesis: &mut Synthesis,
        result: &ResultLine<'_>,
        report_line: usize,
    ) -> Result<(), ApplyError> {
        let number = match (result.token, self.options.mode) {
            (LineToken::Above | LineToken::Below, ApplyMode::LogOnly) => {
                trace!("  Report line {}: marker ignored in log-only mode", report_line);
                return Ok(());
            }
            (LineToken::Below, ApplyMode::Apply) => {
                cursor.pending_below.push(result.payload.to_string());
                return Ok(());
            }
            (LineToken::Above, ApplyMode::Apply) => {
                flush_below(section, cursor, synthesis, report_line)?;
                cursor.pending_above.push(result.payload.to_string());
                return Ok(());
            }
            (LineToken::Number(number), _) => number,
        };

        flush_below(section, cursor, synthesis, report_line)?;

        let index = number - 1;
        let Some(original) = section.snapshot.line(index) else {
            warn!(
                "Line {} is past the end of '{}' ({} lines). Skipping report line {}.",
                number,
                section.path.display(),
                section.snapshot.lines.len(),
                report_line
            );
            synthesis.out_of_range_lines += 1;
            cursor.pending_above.clear();
            cursor.last_line_end = None;
            return Ok(());
        };

        let above = join_insertions(&mut cursor.pending_above, section.snapshot.line_break());
        cursor.last_line_end = Some(section.snapshot.line_end_including_break(index));

        let width = original.chars().count();
        if width > self.options.max_line_length {
            debug!(
                "  Line {} of '{}' has {} characters. Leaving it untouched.",
                number,
                section.path.display(),
                width
            );
            synthesis.long_lines_skipped = true;
        } else if original != result.payload {
            if let Some(log) = synthesis.change_log.as_mut() {
                log.record(&section.path, number, original, result.payload);
            }
            let range = TextRange::new(Position::new(index, 0), Position::new(index, width));
            let text = above + result.payload;
            section_edit(synthesis, section, Edit::Replace { range, text });
        } else if !above.is_empty() {
            let position = Position::new(index, 0);
            section_edit(synthesis, section, Edit::InsertAt { position, text: above });
        }
        Ok(())
    }
}

fn section_edit(synthesis: &mut Synthesis, section: &Section, edit: Edit) {
    synthesis.batch.push(&section.path, edit);
}

/// Emits the queued `↓` payloads at the end of the last numbered line.
///
/// Any result line other than another `↓` ends the run, so a `↑` flushes it
/// too.
fn flush_below(
    section: &Section,
    cursor: &mut SectionCursor,
    synthesis: &mut Synthesis,
    report_line: usize,
) -> Result<(), ApplyError> {
    if cursor.pending_below.is_empty() {
        return Ok(());
    }
    let anchor = cursor
        .last_line_end
        .ok_or_else(|| ApplyError::MalformedInsertion {
            file: section.path.clone(),
            report_line,
        })?;
    let line_break = section.snapshot.line_break();
    let mut text = join_insertions(&mut cursor.pending_below, line_break);
    if anchor.character > 0 {
        // The anchor is a final line without a line break.
        text.truncate(text.len() - line_break.len());
        text.insert_str(0, line_break);
    }
    section_edit(synthesis, section, Edit::InsertAt { position: anchor, text });
    Ok(())
}

/// Drains queued payloads into one block of text, one line each.
fn join_insertions(pending: &mut Vec<String>, line_break: &str) -> String {
    pending.drain(..).map(|line| line + line_break).collect()
}

/// Scans a report and computes the edits it implies, without applying them.
///
/// Fails only with [`ApplyError::MalformedInsertion`]. Unresolvable headers,
/// unloadable files, out-of-range and long lines are skipped and reported in
/// the returned [`Synthesis`].
///
/// # Example
///
/// ```
/// # use search_apply::*;
/// let mut store = MemoryDocumentStore::new();
/// store.insert("/ws/a.txt", "one\ntwo\n");
/// let resolver = WorkspaceResolver::new(vec![WorkspaceRoot::from_path("/ws")]);
///
/// let report = "a.txt:\n  1: one\n  ↓  one and a half\n  2: two\n";
/// let synthesis = synthesize_edits(
///     report,
///     &ReportLocation::untitled(),
///     &resolver,
///     &store,
///     &ApplyOptions::default(),
/// ).unwrap();
///
/// assert_eq!(
///     synthesis.batch.edits_for("/ws/a.txt"),
///     &[Edit::InsertAt { position: Position::new(1, 0), text: "one and a half\n".to_string() }]
/// );
/// ```
pub fn synthesize_edits<R, S>(
    report_text: &str,
    report: &ReportLocation,
    resolver: &R,
    store: &S,
    options: &ApplyOptions,
) -> Result<Synthesis, ApplyError>
where
    R: PathResolver + ?Sized,
    S: DocumentStore + ?Sized,
{
    let synthesizer = Synthesizer {
        report,
        resolver,
        store,
        options,
    };
    let initial = SynthesisState {
        synthesis: Synthesis {
            change_log: (options.mode == ApplyMode::LogOnly).then(ChangeLog::default),
            ..Synthesis::default()
        },
        ..SynthesisState::default()
    };

    let mut state = scan_report(report_text)
        .try_fold(initial, |state, line| synthesizer.step(state, line))?;
    state.cursor.reset();

    let mut synthesis = state.synthesis;
    synthesis.conflicts = synthesis.batch.normalize();
    debug!(
        "Synthesized {} edit(s) across {} file(s).",
        synthesis.batch.len(),
        synthesis.batch.files().count()
    );
    Ok(synthesis)
}

/// Surfaces the long-line warning and hands a synthesized batch to `store`.
///
/// Nothing is applied in dry-run mode. In [`ApplyMode::Apply`] the store is
/// told the report is reconciled once the batch has been applied.
pub fn commit_synthesis<S>(
    synthesis: Synthesis,
    report: &ReportLocation,
    store: &mut S,
    options: &ApplyOptions,
) -> Result<ApplyOutcome, ApplyError>
where
    S: DocumentStore + ?Sized,
{
    let warning = synthesis
        .long_lines_skipped
        .then(|| options.long_line_warning.clone());
    if let Some(message) = &warning {
        warn!("{}", message);
    }

    if options.dry_run {
        info!(
            "DRY RUN: {} edit(s) were not applied.",
            synthesis.batch.len()
        );
        return Ok(ApplyOutcome {
            synthesis,
            warning,
            applied: false,
        });
    }

    store.apply_batch(&synthesis.batch)?;
    if options.mode == ApplyMode::Apply {
        store.report_reconciled(report);
    }
    Ok(ApplyOutcome {
        synthesis,
        warning,
        applied: true,
    })
}

/// Scans `report_text`, synthesizes its edits and commits them to `store`.
pub fn apply_report<R, S>(
    report_text: &str,
    report: &ReportLocation,
    resolver: &R,
    store: &mut S,
    options: &ApplyOptions,
) -> Result<ApplyOutcome, ApplyError>
where
    R: PathResolver + ?Sized,
    S: DocumentStore + ?Sized,
{
    let synthesis = synthesize_edits(report_text, report, resolver, &*store, options)?;
    commit_synthesis(synthesis, report, store, options)
}

// --- Report Commands ---

/// The report text after a marker command, plus where the cursors end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerInsertion {
    pub text: String,
    /// 0-based report lines of the cursors, one per inserted marker.
    pub cursors: Vec<usize>,
}

/// Inserts an empty `↑` marker line above each selected result line.
///
/// `selected_lines` are 0-based report lines. Selections that are not result
/// lines are ignored. Each cursor moves onto its new marker line.
///
/// # Example
///
/// ```
/// # use search_apply::insert_marker_above;
/// let report = "a.txt:\n  3: three\n";
/// let inserted = insert_marker_above(report, &[1]);
/// assert_eq!(inserted.text, "a.txt:\n  ↑  \n  3: three\n");
/// assert_eq!(inserted.cursors, vec![1]);
/// ```
pub fn insert_marker_above(report: &str, selected_lines: &[usize]) -> MarkerInsertion {
    let selected: BTreeSet<usize> = selected_lines.iter().copied().collect();
    let mut text = String::with_capacity(report.len());
    let mut cursors = Vec::new();

    for (index, raw) in report.split_inclusive('\n').enumerate() {
        let (content, terminator) = split_terminator(raw);
        if selected.contains(&index) {
            if let Some(offset) = marker_offset(content) {
                text.push_str(&marker_line(offset, UP_MARKER));
                text.push_str(if terminator.is_empty() { "\n" } else { terminator });
                cursors.push(index + cursors.len());
            }
        }
        text.push_str(raw);
    }

    MarkerInsertion { text, cursors }
}

/// Inserts an empty `↓` marker line below each selected result line.
///
/// Cursors stay on their (possibly shifted) original lines.
pub fn insert_marker_below(report: &str, selected_lines: &[usize]) -> MarkerInsertion {
    let selected: BTreeSet<usize> = selected_lines.iter().copied().collect();
    let mut text = String::with_capacity(report.len());
    let mut cursors = Vec::new();

    for (index, raw) in report.split_inclusive('\n').enumerate() {
        let (content, terminator) = split_terminator(raw);
        let offset = selected
            .contains(&index)
            .then(|| marker_offset(content))
            .flatten();
        match offset {
            Some(offset) => {
                cursors.push(index + cursors.len());
                text.push_str(content);
                text.push_str(if terminator.is_empty() { "\n" } else { terminator });
                text.push_str(&marker_line(offset, DOWN_MARKER));
                text.push_str(terminator);
            }
            None => text.push_str(raw),
        }
    }

    MarkerInsertion { text, cursors }
}

/// Removes the selected (0-based) lines from the report.
pub fn delete_lines(report: &str, selected_lines: &[usize]) -> String {
    let selected: BTreeSet<usize> = selected_lines.iter().copied().collect();
    report
        .split_inclusive('\n')
        .enumerate()
        .filter(|(index, _)| !selected.contains(index))
        .map(|(_, raw)| raw)
        .collect()
}

fn marker_offset(line: &str) -> Option<usize> {
    match classify_line(line) {
        LineKind::Result(result) => Some(result.offset()),
        _ => None,
    }
}

/// `offset - 1` spaces, the marker, then the separator and the space that
/// precede an empty payload.
fn marker_line(offset: usize, marker: char) -> String {
    format!("{}{}  ", " ".repeat(offset.saturating_sub(1)), marker)
}

fn split_terminator(raw: &str) -> (&str, &str) {
    if let Some(content) = raw.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = raw.strip_suffix('\n') {
        (content, "\n")
    } else {
        (raw, "")
    }
}

// --- Report Writer ---

/// A line to render under a file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportEntry<'a> {
    /// The 1-based line number in the file.
    pub line_number: usize,
    pub text: &'a str,
    /// Context lines use a space instead of `:` after the number.
    pub is_context: bool,
}

impl<'a> ReportEntry<'a> {
    pub fn matched(line_number: usize, text: &'a str) -> Self {
        Self {
            line_number,
            text,
            is_context: false,
        }
    }

    pub fn context(line_number: usize, text: &'a str) -> Self {
        Self {
            line_number,
            text,
            is_context: true,
        }
    }
}

/// Renders reports in the format [`scan_report`] reads.
///
/// # Example
///
/// ```
/// # use search_apply::{ReportEntry, ReportWriter};
/// let mut writer = ReportWriter::new();
/// writer.section("src/a.ts", [
///     ReportEntry::context(9, "// nine"),
///     ReportEntry::matched(10, "let ten = 10;"),
/// ]);
/// assert_eq!(writer.finish(), "src/a.ts:\n   9  // nine\n  10: let ten = 10;\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReportWriter {
    out: String,
}

impl ReportWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a file section. Sections are separated by a blank line.
    pub fn section<'a>(
        &mut self,
        printed_path: &str,
        entries: impl IntoIterator<Item = ReportEntry<'a>>,
    ) -> &mut Self {
        let entries: Vec<ReportEntry<'a>> = entries.into_iter().collect();
        let width = entries
            .iter()
            .map(|e| e.line_number.to_string().len())
            .max()
            .unwrap_or(1);

        if !self.out.is_empty() {
            self.out.push('\n');
        }
        self.out.push_str(printed_path);
        self.out.push_str(":\n");
        for entry in entries {
            let separator = if entry.is_context { ' ' } else { ':' };
            self.out.push_str(&format!(
                "  {:>width$}{} {}\n",
                entry.line_number,
                separator,
                entry.text,
                width = width
            ));
        }
        self
    }

    pub fn finish(self) -> String {
        self.out
    }
}
