use crate::cache::EntityCache;
use crate::complete;
use crate::config::IdentityConfig;
use crate::csv;
use crate::output::{OutputLine, Segment, SegmentKind};
use crate::redirect::{self, RedirectMode};
use crate::service::{
    field_text, nested_str, short_id, str_field, Clipboard, DataService, EntityKind, FileSink,
    Navigator,
};
use crate::store::StateStore;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Everything the interpreter talks to. The terminal owns these for the
/// lifetime of the session.
pub struct Collaborators {
    pub data: Box<dyn DataService>,
    pub navigator: Box<dyn Navigator>,
    pub clipboard: Box<dyn Clipboard>,
    pub downloads: Box<dyn FileSink>,
}

/// Capture state for one invocation. `Capturing` diverts handler output into
/// a plain-text buffer; the machine returns to `Idle` unconditionally after
/// flush, whatever the handler did.
enum Capture {
    Idle,
    Capturing { lines: Vec<String> },
}

/// The most recently listed entity array, tagged by type, for `| json` and
/// `| csv` exports.
struct Export {
    kind: EntityKind,
    records: Vec<Value>,
}

/// One interpreter session: transcript, history, entity cache and capture
/// state, all owned by this instance. Exactly one command executes at a
/// time; `is_processing` is true for the duration of `execute`.
pub struct Terminal {
    collab: Collaborators,
    state: StateStore,
    identity: IdentityConfig,
    session_started: DateTime<Utc>,
    history: Vec<String>,
    output: Vec<OutputLine>,
    cache: EntityCache,
    capture: Capture,
    export: Option<Export>,
    // Shared so in-flight collaborators can observe the busy state.
    processing: Arc<AtomicBool>,
}

impl Terminal {
    /// Restores history and transcript from the persisted session state.
    pub fn new(collab: Collaborators, state: StateStore, identity: IdentityConfig) -> Self {
        let history = state.load_history();
        let output = state.load_output();
        Self {
            collab,
            state,
            identity,
            session_started: Utc::now(),
            history,
            output,
            cache: EntityCache::new(),
            capture: Capture::Idle,
            export: None,
            processing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn output(&self) -> &[OutputLine] {
        &self.output
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// History entry `offset` commands back (1 is the most recent).
    pub fn history_at(&self, offset: usize) -> Option<&str> {
        self.history
            .len()
            .checked_sub(offset)
            .and_then(|idx| self.history.get(idx))
            .map(String::as_str)
    }

    pub fn completions(&self, input: &str) -> Vec<String> {
        complete::completions(input)
    }

    /// Parse and execute one raw input line. Never fatal: every failure ends
    /// up as an error line, the capture state is flushed and reset, and
    /// `is_processing` returns to false.
    pub fn execute(&mut self, input: &str) {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return;
        }

        // A prior invocation whose flush went wrong must not leak capture
        // state into this one.
        self.capture = Capture::Idle;
        self.export = None;

        let (base, mode) = redirect::parse(trimmed);
        if mode != RedirectMode::None {
            self.capture = Capture::Capturing { lines: Vec::new() };
        }

        self.history.push(trimmed.to_string());
        self.state.save_history(&self.history);

        // The raw command echo always lands in the live transcript, even
        // while the handler's output is being captured.
        self.emit_live(OutputLine::plain(format!("$ {trimmed}"), SegmentKind::Command));

        self.processing.store(true, Ordering::SeqCst);
        if let Err(err) = self.dispatch(&base) {
            self.say(format!("Error: {err}"), SegmentKind::Error);
        }
        self.flush(mode);
        self.processing.store(false, Ordering::SeqCst);
    }

    fn dispatch(&mut self, base: &str) -> Result<()> {
        let mut tokens = base.split_whitespace();
        let Some(first) = tokens.next() else {
            return Ok(());
        };
        let verb = first.to_lowercase();
        let args: Vec<&str> = tokens.collect();

        match verb.as_str() {
            // Single-letter aliases
            "j" => self.list_entities("jobs"),
            "p" => self.list_entities("properties"),
            "so" => self.list_entities("opps"),

            "help" | "?" | "h" => {
                self.show_help();
                Ok(())
            }
            "clear" | "cls" => {
                self.clear_output();
                Ok(())
            }
            "views" | "routes" => {
                self.show_views();
                Ok(())
            }
            "go" | "g" | "nav" | "cd" => {
                match args.first() {
                    Some(view) => self.navigate_to(view),
                    None => self.say("Usage: go <view>", SegmentKind::Error),
                }
                Ok(())
            }
            "list" | "ls" | "show" => match args.first() {
                Some(entity) => self.list_entities(entity),
                None => {
                    self.say("Usage: list <jobs|properties|people|opps>", SegmentKind::Error);
                    Ok(())
                }
            },
            "count" => match args.first() {
                Some(entity) => self.count_entities(entity),
                None => {
                    self.say(
                        "Usage: count <jobs|properties|people|opps|all>",
                        SegmentKind::Error,
                    );
                    Ok(())
                }
            },
            "find" | "search" | "s" => {
                if args.len() >= 2 {
                    self.search_entities(args[0], &args[1..].join(" "))
                } else {
                    self.say("Usage: find <job|property|person|opp> <query>", SegmentKind::Error);
                    Ok(())
                }
            }
            "refresh" | "reload" => self.refresh_all(),
            "history" => {
                self.show_history();
                Ok(())
            }
            "time" | "date" => {
                let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
                self.say(now, SegmentKind::Info);
                Ok(())
            }
            "whoami" => {
                self.say(
                    format!("Power User CLI v{}", env!("CARGO_PKG_VERSION")),
                    SegmentKind::Info,
                );
                self.say("puterm command interface", SegmentKind::Normal);
                Ok(())
            }
            "echo" => {
                self.say(args.join(" "), SegmentKind::Normal);
                Ok(())
            }
            "debug" => {
                self.show_debug();
                Ok(())
            }
            other => {
                // A bare view name is a navigation shortcut.
                if complete::route_path(other).is_some() {
                    self.navigate_to(other);
                } else {
                    self.say(
                        format!("Unknown command: \"{other}\". Type 'help' for available commands."),
                        SegmentKind::Error,
                    );
                }
                Ok(())
            }
        }
    }

    // ---- output sink ----

    /// Capture-aware write: structured lines are flattened into the capture
    /// buffer while a redirect is active, otherwise appended to the
    /// transcript and persisted.
    fn emit(&mut self, line: OutputLine) {
        match &mut self.capture {
            Capture::Capturing { lines, .. } => lines.push(line.flatten()),
            Capture::Idle => {
                self.output.push(line);
                self.persist();
            }
        }
    }

    /// Write to the live transcript regardless of capture state.
    fn emit_live(&mut self, line: OutputLine) {
        self.output.push(line);
        self.persist();
    }

    fn say(&mut self, text: impl Into<String>, kind: SegmentKind) {
        self.emit(OutputLine::plain(text, kind));
    }

    fn persist(&mut self) {
        self.state.save_output(&self.output);
        self.state.save_history(&self.history);
    }

    /// Flush the capture buffer according to the invocation's mode, then
    /// reset capture and export state regardless of outcome. No retries.
    fn flush(&mut self, mode: RedirectMode) {
        let capture = std::mem::replace(&mut self.capture, Capture::Idle);
        let export = self.export.take();
        let lines = match capture {
            Capture::Capturing { lines } => lines,
            Capture::Idle => return,
        };

        match mode {
            RedirectMode::None => {}
            RedirectMode::File(filename) => {
                let content = lines.join("\n");
                self.collab.downloads.deliver(&filename, &content);
                self.emit_live(OutputLine::plain(
                    format!("Downloaded: {filename} ({} bytes)", content.len()),
                    SegmentKind::Success,
                ));
            }
            RedirectMode::ClipboardText => {
                let content = lines.join("\n");
                match self.collab.clipboard.write_text(&content) {
                    Ok(()) => self.emit_live(OutputLine::plain(
                        format!("Copied to clipboard ({} bytes)", content.len()),
                        SegmentKind::Success,
                    )),
                    Err(err) => self.emit_live(OutputLine::plain(
                        format!("Clipboard error: {err}"),
                        SegmentKind::Error,
                    )),
                }
            }
            RedirectMode::ClipboardJson => match export {
                Some(Export { records, .. }) => match serde_json::to_string_pretty(&records) {
                    Ok(content) => match self.collab.clipboard.write_text(&content) {
                        Ok(()) => self.emit_live(OutputLine::plain(
                            format!(
                                "JSON copied to clipboard ({} records, {} bytes)",
                                records.len(),
                                content.len()
                            ),
                            SegmentKind::Success,
                        )),
                        Err(err) => self.emit_live(OutputLine::plain(
                            format!("Clipboard error: {err}"),
                            SegmentKind::Error,
                        )),
                    },
                    Err(err) => self.emit_live(OutputLine::plain(
                        format!("JSON error: {err}"),
                        SegmentKind::Error,
                    )),
                },
                None => self.emit_live(OutputLine::plain(
                    "Nothing to export as JSON. Run a list command first.",
                    SegmentKind::Error,
                )),
            },
            RedirectMode::ClipboardCsv => match export {
                Some(Export { kind, records }) => {
                    let content = csv::to_csv(&records, kind.export_tag());
                    match self.collab.clipboard.write_text(&content) {
                        Ok(()) => self.emit_live(OutputLine::plain(
                            format!("CSV copied to clipboard ({} records)", records.len()),
                            SegmentKind::Success,
                        )),
                        Err(err) => self.emit_live(OutputLine::plain(
                            format!("Clipboard error: {err}"),
                            SegmentKind::Error,
                        )),
                    }
                }
                None => self.emit_live(OutputLine::plain(
                    "Nothing to export as CSV. Run a list command first.",
                    SegmentKind::Error,
                )),
            },
        }
    }

    // ---- builtins ----

    fn show_help(&mut self) {
        const HELP: &[&str] = &[
            "╔══════════════════════════════════════════════════════════════╗",
            "║                    POWER USER CLI - HELP                     ║",
            "╠══════════════════════════════════════════════════════════════╣",
            "║  NAVIGATION                                                  ║",
            "║    go <view>         Navigate to a view                      ║",
            "║    g <view>          Short alias for go                      ║",
            "║    views             List available views                    ║",
            "║                                                              ║",
            "║  DATA COMMANDS                                               ║",
            "║    list jobs         Show recent jobs                        ║",
            "║    list properties   Show properties                         ║",
            "║    list people       Show staff/users                        ║",
            "║    list opps         Show service opportunities              ║",
            "║    count <entity>    Count entities                          ║",
            "║    refresh           Reload all data                         ║",
            "║                                                              ║",
            "║  SEARCH                                                      ║",
            "║    find job <query>        Search jobs                       ║",
            "║    find property <query>   Search properties                 ║",
            "║    find person <query>     Search people                     ║",
            "║    find opp <query>        Search opportunities              ║",
            "║                                                              ║",
            "║  UTILITIES                                                   ║",
            "║    clear / cls       Clear terminal                          ║",
            "║    help / ?          Show this help                          ║",
            "║    history           Show command history                    ║",
            "║    time              Show current time                       ║",
            "║                                                              ║",
            "║  FILE EXPORT                                                 ║",
            "║    <cmd> > file      Download output as file                 ║",
            "║    <cmd> | clipboard Copy output to clipboard                ║",
            "║    <cmd> | json      Copy as JSON to clipboard               ║",
            "║    <cmd> | csv       Copy as CSV to clipboard                ║",
            "║    Example: j | json                                         ║",
            "╚══════════════════════════════════════════════════════════════╝",
        ];
        for line in HELP {
            self.say(*line, SegmentKind::Help);
        }
    }

    /// Wipes the transcript, the history and both persisted keys. The
    /// confirmation line is deliberately not re-persisted so the keys stay
    /// removed.
    pub fn clear_output(&mut self) {
        self.output.clear();
        self.history.clear();
        self.state.clear();
        let line = OutputLine::plain("Terminal cleared.", SegmentKind::System);
        match &mut self.capture {
            Capture::Capturing { lines, .. } => lines.push(line.flatten()),
            Capture::Idle => self.output.push(line),
        }
    }

    fn show_views(&mut self) {
        self.say("Available views:", SegmentKind::Info);
        let mut names: Vec<&str> = complete::ROUTES.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        for name in names {
            if let Some(path) = complete::route_path(name) {
                self.say(format!("  {name:<20} → {path}"), SegmentKind::Normal);
            }
        }
    }

    fn navigate_to(&mut self, view: &str) {
        match complete::route_path(&view.to_lowercase()) {
            Some(path) => {
                self.say(format!("Navigating to {view}..."), SegmentKind::Success);
                self.collab.navigator.navigate(path);
            }
            None => self.say(
                format!("Unknown view: \"{view}\". Type 'views' to see available views."),
                SegmentKind::Error,
            ),
        }
    }

    fn fetch(&self, kind: EntityKind) -> Result<Vec<Value>> {
        self.collab.data.fetch(kind).into_result()
    }

    /// Fan out all four fetches on scoped threads and join them, keeping the
    /// results in `EntityKind::ALL` order.
    fn fetch_all(&self) -> Vec<(EntityKind, Result<Vec<Value>>)> {
        let svc = self.collab.data.as_ref();
        thread::scope(|scope| {
            let handles: Vec<_> = EntityKind::ALL
                .iter()
                .map(|&kind| scope.spawn(move || svc.fetch(kind).into_result()))
                .collect();
            EntityKind::ALL
                .iter()
                .zip(handles)
                .map(|(&kind, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("{kind} fetch worker panicked")));
                    (kind, result)
                })
                .collect()
        })
    }

    /// `list` always re-fetches, replaces the cache whole and overwrites the
    /// export buffer with the freshly fetched array.
    fn list_entities(&mut self, entity: &str) -> Result<()> {
        let Some(kind) = EntityKind::parse(entity) else {
            self.say(
                format!("Unknown entity: \"{entity}\". Try: jobs, properties, people, opps"),
                SegmentKind::Error,
            );
            return Ok(());
        };

        let records = match self.fetch(kind) {
            Ok(records) => records,
            Err(err) => {
                self.say(format!("Error fetching {entity}: {err}"), SegmentKind::Error);
                return Ok(());
            }
        };
        self.cache.replace(kind, records.clone());
        self.export = Some(Export {
            kind,
            records: records.clone(),
        });

        match kind {
            EntityKind::Jobs => {
                self.say(
                    format!("Jobs ({} total, showing first 10):", records.len()),
                    SegmentKind::Info,
                );
                for job in records.iter().take(10) {
                    let status = str_field(job, "status").unwrap_or("unknown");
                    let prop = nested_str(job, &["properties", "name"])
                        .or_else(|| str_field(job, "property_name"))
                        .unwrap_or("No property");
                    let id = field_text(job, "id").unwrap_or_default();
                    self.emit(OutputLine::segments(vec![
                        Segment::link(format!("  #{}...", short_id(job)), format!("/jobs?id={id}")),
                        Segment::new(
                            format!(" [{:<12}] {prop}", status.to_uppercase()),
                            SegmentKind::Normal,
                        ),
                    ]));
                }
            }
            EntityKind::Properties => {
                self.say(
                    format!("Properties ({} total):", records.len()),
                    SegmentKind::Info,
                );
                for prop in records.iter().take(15) {
                    let name = str_field(prop, "name")
                        .or_else(|| str_field(prop, "address"))
                        .unwrap_or("Unnamed");
                    let id = field_text(prop, "id").unwrap_or_default();
                    self.emit(OutputLine::segments(vec![
                        Segment::new("  ", SegmentKind::Normal),
                        Segment::link(name, format!("/properties?id={id}")),
                    ]));
                }
            }
            EntityKind::People => {
                self.say(format!("People ({} total):", records.len()), SegmentKind::Info);
                for person in records.iter().take(15) {
                    let name = person_name(person);
                    let email = str_field(person, "email").unwrap_or("");
                    self.say(format!("  {name:<25} {email}"), SegmentKind::Normal);
                }
            }
            EntityKind::Opportunities => {
                self.say(
                    format!(
                        "Service Opportunities ({} total, showing first 10):",
                        records.len()
                    ),
                    SegmentKind::Info,
                );
                for opp in records.iter().take(10) {
                    let status = str_field(opp, "workflow_status").unwrap_or("?");
                    let prop = str_field(opp, "property_name").unwrap_or("Unknown");
                    let template = str_field(opp, "service_template_name")
                        .or_else(|| str_field(opp, "title"))
                        .unwrap_or("No template");
                    let id = field_text(opp, "id").unwrap_or_default();
                    self.emit(OutputLine::segments(vec![
                        Segment::new("  ", SegmentKind::Normal),
                        Segment::new(format!("{status:<10}"), SegmentKind::Normal),
                        Segment::link(
                            format!("{prop} - {template}"),
                            format!("/service-opportunities?id={id}"),
                        ),
                    ]));
                }
            }
        }
        Ok(())
    }

    /// `count` re-fetches like `list` but leaves the export buffer alone.
    fn count_entities(&mut self, entity: &str) -> Result<()> {
        if entity.eq_ignore_ascii_case("all") {
            let outcomes = self.fetch_all();
            let mut counts = Vec::new();
            let mut first_err: Option<anyhow::Error> = None;
            for (kind, result) in outcomes {
                match result {
                    Ok(records) => {
                        counts.push((kind, records.len()));
                        self.cache.replace(kind, records);
                    }
                    Err(err) => {
                        debug!("count all: {kind} fetch failed: {err}");
                        if first_err.is_none() {
                            first_err = Some(err);
                        }
                    }
                }
            }
            match first_err {
                Some(err) => self.say(format!("Error counting all: {err}"), SegmentKind::Error),
                None => {
                    self.say("Entity counts:", SegmentKind::Info);
                    for (kind, count) in counts {
                        self.say(format!("  {}: {count}", kind.label()), SegmentKind::Normal);
                    }
                }
            }
            return Ok(());
        }

        let Some(kind) = EntityKind::parse(entity) else {
            self.say(
                format!("Unknown entity: \"{entity}\". Try: jobs, properties, people, opps, all"),
                SegmentKind::Error,
            );
            return Ok(());
        };
        match self.fetch(kind) {
            Ok(records) => {
                self.say(
                    format!("{}: {}", kind.label(), records.len()),
                    SegmentKind::Info,
                );
                self.cache.replace(kind, records);
            }
            Err(err) => self.say(format!("Error counting {entity}: {err}"), SegmentKind::Error),
        }
        Ok(())
    }

    /// `find` trusts the cache and only fetches when the relevant cache is
    /// empty. The stale-read policy is deliberate: only `list`/`refresh`
    /// revalidate.
    fn search_entities(&mut self, type_word: &str, query: &str) -> Result<()> {
        let Some(kind) = EntityKind::parse_search(type_word) else {
            self.say(
                format!("Unknown search type: \"{type_word}\". Try: job, property, person, opp"),
                SegmentKind::Error,
            );
            return Ok(());
        };

        if self.cache.is_empty(kind) {
            // Backfill failure is tolerated; the search runs over whatever
            // is cached.
            if let Ok(records) = self.fetch(kind) {
                self.cache.replace(kind, records);
            }
        }

        let query_lower = query.to_lowercase();
        let matches: Vec<Value> = self
            .cache
            .get(kind)
            .iter()
            .filter(|record| record_matches(kind, record, query, &query_lower))
            .cloned()
            .collect();

        match kind {
            EntityKind::Jobs => {
                self.say(
                    format!("Found {} job(s) matching \"{query}\":", matches.len()),
                    SegmentKind::Info,
                );
                for job in matches.iter().take(10) {
                    let status = str_field(job, "status").unwrap_or("?");
                    let prop = nested_str(job, &["properties", "name"])
                        .or_else(|| str_field(job, "property_name"))
                        .unwrap_or("No property");
                    self.say(
                        format!("  #{}... [{status}] {prop}", short_id(job)),
                        SegmentKind::Normal,
                    );
                }
            }
            EntityKind::Properties => {
                self.say(
                    format!(
                        "Found {} property/properties matching \"{query}\":",
                        matches.len()
                    ),
                    SegmentKind::Info,
                );
                for prop in matches.iter().take(10) {
                    let name = str_field(prop, "name")
                        .or_else(|| str_field(prop, "address"))
                        .unwrap_or("Unnamed");
                    self.say(format!("  {name}"), SegmentKind::Normal);
                }
            }
            EntityKind::People => {
                self.say(
                    format!("Found {} person(s) matching \"{query}\":", matches.len()),
                    SegmentKind::Info,
                );
                for person in matches.iter().take(10) {
                    let name = person_name(person);
                    let email = str_field(person, "email").unwrap_or("No email");
                    self.say(format!("  {name} - {email}"), SegmentKind::Normal);
                }
            }
            EntityKind::Opportunities => {
                self.say(
                    format!(
                        "Found {} opportunity/opportunities matching \"{query}\":",
                        matches.len()
                    ),
                    SegmentKind::Info,
                );
                for opp in matches.iter().take(10) {
                    let status = str_field(opp, "workflow_status").unwrap_or("?");
                    let prop = str_field(opp, "property_name").unwrap_or("Unknown");
                    let template = str_field(opp, "service_template_name")
                        .or_else(|| str_field(opp, "title"))
                        .unwrap_or("No template");
                    self.say(format!("  [{status}] {prop} - {template}"), SegmentKind::Normal);
                }
            }
        }
        Ok(())
    }

    /// Force-refresh all four caches concurrently. Failed entity types keep
    /// their previous contents; the first failure is reported as a single
    /// error line.
    fn refresh_all(&mut self) -> Result<()> {
        self.say("Refreshing all data...", SegmentKind::Info);
        debug!("refresh: fanning out {} fetches", EntityKind::ALL.len());

        let outcomes = self.fetch_all();
        let mut first_err: Option<anyhow::Error> = None;
        for (kind, result) in outcomes {
            match result {
                Ok(records) => self.cache.replace(kind, records),
                Err(err) => {
                    debug!("refresh: {kind} fetch failed: {err}");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        match first_err {
            None => self.say("All data refreshed successfully.", SegmentKind::Success),
            Some(err) => self.say(format!("Error refreshing: {err}"), SegmentKind::Error),
        }
        Ok(())
    }

    /// Last 20 entries before the `history` command itself, so a cleared
    /// session really reports empty.
    fn show_history(&mut self) {
        // Owned copy: the emit calls below need the session mutably.
        let prior = self.history[..self.history.len().saturating_sub(1)].to_vec();
        if prior.is_empty() {
            self.say("No command history.", SegmentKind::Info);
            return;
        }
        self.say("Command history:", SegmentKind::Info);
        let shown: Vec<String> = prior
            .iter()
            .rev()
            .take(20)
            .rev()
            .enumerate()
            .map(|(idx, cmd)| format!("  {}. {cmd}", idx + 1))
            .collect();
        for line in shown {
            self.say(line, SegmentKind::Normal);
        }
    }

    fn show_debug(&mut self) {
        self.say("=== Debug Info ===", SegmentKind::Info);
        let user_id = self.identity.user_id.clone().unwrap_or_else(|| "null".into());
        let email = self.identity.email.clone().unwrap_or_else(|| "null".into());
        let tenant = self.identity.tenant_id.clone().unwrap_or_else(|| "null".into());
        self.say(format!("User ID: {user_id}"), SegmentKind::Normal);
        self.say(format!("User Email: {email}"), SegmentKind::Normal);
        self.say(format!("Tenant ID: {tenant}"), SegmentKind::Normal);
        self.say(
            format!(
                "Session started: {}",
                self.session_started.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            SegmentKind::Normal,
        );
    }

    #[cfg(test)]
    fn state(&self) -> &StateStore {
        &self.state
    }

    #[cfg(test)]
    fn processing_flag(&self) -> Arc<AtomicBool> {
        self.processing.clone()
    }

    #[cfg(test)]
    fn cached(&self, kind: EntityKind) -> &[Value] {
        self.cache.get(kind)
    }
}

fn person_name(person: &Value) -> String {
    let name = [
        str_field(person, "first_name"),
        str_field(person, "last_name"),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");
    if name.is_empty() {
        "Unnamed".to_string()
    } else {
        name
    }
}

/// Case-insensitive substring match over the per-type searchable fields.
/// The raw query is used for id matching.
fn record_matches(kind: EntityKind, record: &Value, query: &str, query_lower: &str) -> bool {
    let contains = |field: Option<&str>| {
        field
            .map(|s| s.to_lowercase().contains(query_lower))
            .unwrap_or(false)
    };
    match kind {
        EntityKind::Jobs => {
            contains(nested_str(record, &["properties", "name"]))
                || contains(str_field(record, "property_name"))
                || contains(str_field(record, "status"))
                || field_text(record, "id")
                    .map(|id| id.contains(query))
                    .unwrap_or(false)
        }
        EntityKind::Properties => {
            contains(str_field(record, "name")) || contains(str_field(record, "address"))
        }
        EntityKind::People => {
            contains(str_field(record, "first_name"))
                || contains(str_field(record, "last_name"))
                || contains(str_field(record, "email"))
        }
        EntityKind::Opportunities => {
            contains(str_field(record, "property_name"))
                || contains(str_field(record, "workflow_status"))
                || contains(str_field(record, "service_template_name"))
                || contains(str_field(record, "title"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::FetchOutcome;
    use crate::store::{MemoryKvStore, HISTORY_KEY, OUTPUT_KEY};
    use anyhow::bail;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockData {
        inner: Arc<MockInner>,
    }

    #[derive(Default)]
    struct MockInner {
        data: Mutex<HashMap<EntityKind, Vec<Value>>>,
        fail: Mutex<HashSet<EntityKind>>,
        calls: Mutex<HashMap<EntityKind, usize>>,
        // When set, every fetch records the busy flag it observed.
        watch: Mutex<Option<Arc<AtomicBool>>>,
        observed: Mutex<Vec<bool>>,
    }

    impl MockData {
        fn seed(&self, kind: EntityKind, records: Vec<Value>) {
            self.inner.data.lock().unwrap().insert(kind, records);
        }

        fn fail(&self, kind: EntityKind) {
            self.inner.fail.lock().unwrap().insert(kind);
        }

        fn calls(&self, kind: EntityKind) -> usize {
            *self.inner.calls.lock().unwrap().get(&kind).unwrap_or(&0)
        }
    }

    impl DataService for MockData {
        fn fetch(&self, kind: EntityKind) -> FetchOutcome {
            *self.inner.calls.lock().unwrap().entry(kind).or_insert(0) += 1;
            if let Some(flag) = self.inner.watch.lock().unwrap().as_ref() {
                self.inner
                    .observed
                    .lock()
                    .unwrap()
                    .push(flag.load(Ordering::SeqCst));
            }
            if self.inner.fail.lock().unwrap().contains(&kind) {
                return FetchOutcome::err(format!("{kind} backend unavailable"));
            }
            let records = self
                .inner
                .data
                .lock()
                .unwrap()
                .get(&kind)
                .cloned()
                .unwrap_or_default();
            FetchOutcome::ok(records)
        }
    }

    #[derive(Clone, Default)]
    struct RecClipboard {
        writes: Arc<Mutex<Vec<String>>>,
        fail_with: Arc<Mutex<Option<String>>>,
    }

    impl Clipboard for RecClipboard {
        fn write_text(&self, text: &str) -> Result<()> {
            if let Some(msg) = self.fail_with.lock().unwrap().clone() {
                bail!(msg);
            }
            self.writes.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecFiles {
        files: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl FileSink for RecFiles {
        fn deliver(&self, filename: &str, content: &str) {
            self.files
                .lock()
                .unwrap()
                .push((filename.to_string(), content.to_string()));
        }
    }

    #[derive(Clone, Default)]
    struct RecNav {
        routes: Arc<Mutex<Vec<String>>>,
    }

    impl Navigator for RecNav {
        fn navigate(&self, path: &str) {
            self.routes.lock().unwrap().push(path.to_string());
        }
    }

    struct TestBed {
        term: Terminal,
        data: MockData,
        clipboard: RecClipboard,
        files: RecFiles,
        nav: RecNav,
    }

    fn sample_jobs() -> Vec<Value> {
        vec![
            json!({
                "id": "job-0001-aaaa",
                "status": "scheduled",
                "properties": {"name": "Oak House"},
                "scheduled_date": "2026-09-01"
            }),
            json!({
                "id": "job-0002-bbbb",
                "status": "complete",
                "property_name": "Elm Cottage",
                "scheduled_date": "2026-08-12"
            }),
        ]
    }

    fn sample_properties() -> Vec<Value> {
        vec![
            json!({"id": "prop-1", "name": "Oak House", "address": "1 Oak St", "city": "Bern"}),
            json!({"id": "prop-2", "address": "2 Elm St"}),
        ]
    }

    fn sample_people() -> Vec<Value> {
        vec![json!({
            "id": "person-1",
            "first_name": "Ada",
            "last_name": "Park",
            "email": "ada@example.com"
        })]
    }

    fn sample_opps() -> Vec<Value> {
        vec![json!({
            "id": "opp-1",
            "workflow_status": "open",
            "property_name": "Oak House",
            "service_template_name": "Gutter Clean"
        })]
    }

    fn setup() -> TestBed {
        setup_with_kv(Box::new(MemoryKvStore::new()))
    }

    fn setup_with_kv(kv: Box<dyn crate::store::KvStore>) -> TestBed {
        let data = MockData::default();
        data.seed(EntityKind::Jobs, sample_jobs());
        data.seed(EntityKind::Properties, sample_properties());
        data.seed(EntityKind::People, sample_people());
        data.seed(EntityKind::Opportunities, sample_opps());

        let clipboard = RecClipboard::default();
        let files = RecFiles::default();
        let nav = RecNav::default();

        let collab = Collaborators {
            data: Box::new(data.clone()),
            navigator: Box::new(nav.clone()),
            clipboard: Box::new(clipboard.clone()),
            downloads: Box::new(files.clone()),
        };
        let term = Terminal::new(collab, StateStore::new(kv), IdentityConfig::default());

        TestBed {
            term,
            data,
            clipboard,
            files,
            nav,
        }
    }

    fn last_text(term: &Terminal) -> String {
        term.output().last().map(|l| l.flatten()).unwrap_or_default()
    }

    fn transcript(term: &Terminal) -> Vec<String> {
        term.output().iter().map(|l| l.flatten()).collect()
    }

    #[test]
    fn test_list_refetches_every_time() {
        let mut bed = setup();
        bed.term.execute("list jobs");
        bed.term.execute("count jobs");
        bed.term.execute("list jobs");
        assert_eq!(bed.data.calls(EntityKind::Jobs), 3);
    }

    #[test]
    fn test_search_reuses_cache_from_list() {
        let mut bed = setup();
        bed.term.execute("list jobs");
        assert_eq!(bed.data.calls(EntityKind::Jobs), 1);

        bed.term.execute("search job oak");
        // No additional fetch: the cache populated by list is trusted.
        assert_eq!(bed.data.calls(EntityKind::Jobs), 1);
        let lines = transcript(&bed.term);
        assert!(lines.iter().any(|l| l.contains("Found 1 job(s) matching \"oak\":")));
    }

    #[test]
    fn test_search_backfills_empty_cache_once() {
        let mut bed = setup();
        bed.term.execute("find job oak");
        bed.term.execute("find job elm");
        assert_eq!(bed.data.calls(EntityKind::Jobs), 1);
    }

    #[test]
    fn test_search_matches_id_and_status() {
        let mut bed = setup();
        bed.term.execute("find job job-0002");
        assert!(last_text(&bed.term).contains("#job-0002"));

        bed.term.execute("find job COMPLETE");
        assert!(transcript(&bed.term)
            .iter()
            .any(|l| l.contains("Found 1 job(s) matching \"COMPLETE\":")));
    }

    #[test]
    fn test_json_pipe_round_trips_the_fetched_array() {
        let mut bed = setup();
        bed.term.execute("list jobs | json");

        let writes = bed.clipboard.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        let parsed: Vec<Value> = serde_json::from_str(&writes[0]).unwrap();
        assert_eq!(parsed, sample_jobs());

        assert!(last_text(&bed.term).starts_with("JSON copied to clipboard (2 records,"));
    }

    #[test]
    fn test_csv_pipe_uses_export_projection() {
        let mut bed = setup();
        bed.term.execute("list jobs | csv");

        let writes = bed.clipboard.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert!(writes[0]
            .starts_with("id,status,property_name,template_name,scheduled_date,created_at"));
        // Nested property name is projected into the flat column.
        assert!(writes[0].contains("Oak House"));

        assert_eq!(last_text(&bed.term), "CSV copied to clipboard (2 records)");
    }

    #[test]
    fn test_json_pipe_without_export_is_an_error() {
        let mut bed = setup();
        bed.term.execute("echo hi | json");
        assert_eq!(
            last_text(&bed.term),
            "Nothing to export as JSON. Run a list command first."
        );
        assert!(bed.clipboard.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_count_does_not_set_export_buffer() {
        let mut bed = setup();
        bed.term.execute("count jobs | json");
        assert_eq!(
            last_text(&bed.term),
            "Nothing to export as JSON. Run a list command first."
        );
    }

    #[test]
    fn test_file_redirect_captures_handler_output() {
        let mut bed = setup();
        let before = bed.term.output().len();
        bed.term.execute("list jobs > out.txt");

        let files = bed.files.files.lock().unwrap();
        assert_eq!(files.len(), 1);
        let (name, content) = &files[0];
        assert_eq!(name, "out.txt");
        assert!(content.starts_with("Jobs (2 total, showing first 10):"));

        // Live transcript got exactly the echo and the confirmation; the
        // handler's lines were diverted.
        assert_eq!(bed.term.output().len(), before + 2);
        let lines = transcript(&bed.term);
        assert_eq!(lines[before], "$ list jobs > out.txt");
        assert_eq!(
            lines[before + 1],
            format!("Downloaded: out.txt ({} bytes)", content.len())
        );
    }

    #[test]
    fn test_redirect_order_file_beats_csv() {
        let mut bed = setup();
        bed.term.execute("list jobs > out.csv");
        assert_eq!(bed.files.files.lock().unwrap().len(), 1);
        assert!(bed.clipboard.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clipboard_error_is_surfaced_verbatim() {
        let mut bed = setup();
        *bed.clipboard.fail_with.lock().unwrap() = Some("clipboard is sealed".to_string());
        bed.term.execute("list jobs | clipboard");
        assert_eq!(last_text(&bed.term), "Clipboard error: clipboard is sealed");
    }

    #[test]
    fn test_capture_mode_never_leaks_to_next_command() {
        let mut bed = setup();
        *bed.clipboard.fail_with.lock().unwrap() = Some("nope".to_string());
        bed.term.execute("list jobs | clipboard");
        bed.term.execute("echo visible again");
        assert_eq!(last_text(&bed.term), "visible again");
        assert!(!bed.term.is_processing());
    }

    #[test]
    fn test_clear_empties_logs_and_removes_keys() {
        let mut bed = setup();
        bed.term.execute("echo hello");
        bed.term.execute("clear");

        assert_eq!(bed.term.history().len(), 0);
        let lines = transcript(&bed.term);
        assert_eq!(lines, vec!["Terminal cleared.".to_string()]);
        assert!(bed.term.state().kv().get(HISTORY_KEY).is_none());
        assert!(bed.term.state().kv().get(OUTPUT_KEY).is_none());
    }

    #[test]
    fn test_history_after_clear_reports_empty() {
        let mut bed = setup();
        bed.term.execute("echo a");
        bed.term.execute("clear");
        bed.term.execute("history");
        assert_eq!(last_text(&bed.term), "No command history.");
    }

    #[test]
    fn test_history_lists_prior_commands() {
        let mut bed = setup();
        bed.term.execute("echo a");
        bed.term.execute("echo b");
        bed.term.execute("history");
        let lines = transcript(&bed.term);
        assert!(lines.contains(&"  1. echo a".to_string()));
        assert!(lines.contains(&"  2. echo b".to_string()));
        assert!(!lines.iter().any(|l| l.ends_with(". history")));
    }

    #[test]
    fn test_history_includes_redirect_suffix() {
        let mut bed = setup();
        bed.term.execute("list jobs | json");
        assert_eq!(bed.term.history(), &["list jobs | json".to_string()]);
    }

    #[test]
    fn test_refresh_partial_failure_keeps_other_caches() {
        let mut bed = setup();
        bed.data.fail(EntityKind::Properties);
        bed.term.execute("refresh");

        assert_eq!(bed.term.cached(EntityKind::Jobs).len(), 2);
        assert_eq!(bed.term.cached(EntityKind::People).len(), 1);
        assert_eq!(bed.term.cached(EntityKind::Opportunities).len(), 1);
        assert!(bed.term.cached(EntityKind::Properties).is_empty());
        assert_eq!(
            last_text(&bed.term),
            "Error refreshing: Properties backend unavailable"
        );
        assert!(!bed.term.is_processing());
    }

    #[test]
    fn test_refresh_fetches_each_kind_once() {
        let mut bed = setup();
        bed.term.execute("refresh");
        for kind in EntityKind::ALL {
            assert_eq!(bed.data.calls(kind), 1, "{kind} fetched once");
        }
        assert_eq!(last_text(&bed.term), "All data refreshed successfully.");
    }

    #[test]
    fn test_count_all_summary() {
        let mut bed = setup();
        bed.term.execute("count all");
        let lines = transcript(&bed.term);
        assert!(lines.contains(&"Entity counts:".to_string()));
        assert!(lines.contains(&"  Jobs: 2".to_string()));
        assert!(lines.contains(&"  Properties: 2".to_string()));
        assert!(lines.contains(&"  People: 1".to_string()));
        assert!(lines.contains(&"  Service Opportunities: 1".to_string()));
    }

    #[test]
    fn test_view_name_shortcut_navigates() {
        let mut bed = setup();
        bed.term.execute("jobs");
        assert_eq!(bed.nav.routes.lock().unwrap().as_slice(), &["/jobs"]);
        assert!(transcript(&bed.term)
            .iter()
            .any(|l| l == "Navigating to jobs..."));
    }

    #[test]
    fn test_go_resolves_synonym_routes() {
        let mut bed = setup();
        bed.term.execute("go staff");
        assert_eq!(bed.nav.routes.lock().unwrap().as_slice(), &["/people"]);
    }

    #[test]
    fn test_unknown_view_and_command_errors() {
        let mut bed = setup();
        bed.term.execute("go nowhere");
        assert_eq!(
            last_text(&bed.term),
            "Unknown view: \"nowhere\". Type 'views' to see available views."
        );

        bed.term.execute("frob");
        assert_eq!(
            last_text(&bed.term),
            "Unknown command: \"frob\". Type 'help' for available commands."
        );
        assert!(bed.nav.routes.lock().unwrap().len() == 0);
    }

    #[test]
    fn test_usage_errors_do_not_invoke_handlers() {
        let mut bed = setup();
        bed.term.execute("list");
        assert_eq!(last_text(&bed.term), "Usage: list <jobs|properties|people|opps>");
        bed.term.execute("find job");
        assert_eq!(
            last_text(&bed.term),
            "Usage: find <job|property|person|opp> <query>"
        );
        bed.term.execute("go");
        assert_eq!(last_text(&bed.term), "Usage: go <view>");
        assert_eq!(bed.data.calls(EntityKind::Jobs), 0);
    }

    #[test]
    fn test_fetch_error_leaves_cache_unmodified() {
        let mut bed = setup();
        bed.term.execute("list jobs");
        bed.data.fail(EntityKind::Jobs);
        bed.term.execute("list jobs");
        assert_eq!(
            last_text(&bed.term),
            "Error fetching jobs: Jobs backend unavailable"
        );
        assert_eq!(bed.term.cached(EntityKind::Jobs).len(), 2);
    }

    #[test]
    fn test_processing_flag_is_set_while_a_handler_runs() {
        let mut bed = setup();
        *bed.data.inner.watch.lock().unwrap() = Some(bed.term.processing_flag());
        assert!(!bed.term.is_processing());

        bed.term.execute("refresh");

        // Every fetch saw the session busy, and it is idle again after.
        let observed = bed.data.inner.observed.lock().unwrap();
        assert_eq!(observed.len(), EntityKind::ALL.len());
        assert!(observed.iter().all(|&busy| busy));
        assert!(!bed.term.is_processing());
    }

    #[test]
    fn test_single_letter_aliases() {
        let mut bed = setup();
        bed.term.execute("j");
        assert_eq!(bed.data.calls(EntityKind::Jobs), 1);
        bed.term.execute("p");
        assert_eq!(bed.data.calls(EntityKind::Properties), 1);
        bed.term.execute("so");
        assert_eq!(bed.data.calls(EntityKind::Opportunities), 1);
        bed.term.execute("s person ada");
        assert!(transcript(&bed.term)
            .iter()
            .any(|l| l.contains("Found 1 person(s) matching \"ada\":")));
    }

    #[test]
    fn test_echo_joins_args_and_preserves_case() {
        let mut bed = setup();
        bed.term.execute("ECHO Hello   Power User");
        assert_eq!(last_text(&bed.term), "Hello Power User");
    }

    #[test]
    fn test_state_survives_across_sessions() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut bed = setup_with_kv(Box::new(kv.clone()));
        bed.term.execute("echo persisted");
        let lines_before = bed.term.output().len();

        let restored = setup_with_kv(Box::new(kv));
        assert_eq!(restored.term.history(), &["echo persisted".to_string()]);
        assert_eq!(restored.term.output().len(), lines_before);
    }

    #[test]
    fn test_history_at_offsets() {
        let mut bed = setup();
        bed.term.execute("echo one");
        bed.term.execute("echo two");
        assert_eq!(bed.term.history_at(1), Some("echo two"));
        assert_eq!(bed.term.history_at(2), Some("echo one"));
        assert_eq!(bed.term.history_at(3), None);
    }

    #[test]
    fn test_blank_input_is_ignored() {
        let mut bed = setup();
        bed.term.execute("   ");
        assert!(bed.term.output().is_empty());
        assert!(bed.term.history().is_empty());
    }

    #[test]
    fn test_debug_shows_identity() {
        let data = MockData::default();
        let collab = Collaborators {
            data: Box::new(data),
            navigator: Box::new(RecNav::default()),
            clipboard: Box::new(RecClipboard::default()),
            downloads: Box::new(RecFiles::default()),
        };
        let identity = IdentityConfig {
            user_id: Some("u-1".to_string()),
            email: None,
            tenant_id: Some("t-9".to_string()),
        };
        let mut term = Terminal::new(
            collab,
            StateStore::new(Box::new(MemoryKvStore::new())),
            identity,
        );
        term.execute("debug");
        let lines: Vec<String> = term.output().iter().map(|l| l.flatten()).collect();
        assert!(lines.contains(&"User ID: u-1".to_string()));
        assert!(lines.contains(&"User Email: null".to_string()));
        assert!(lines.contains(&"Tenant ID: t-9".to_string()));
    }
}
