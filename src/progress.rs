//! Progress display for conversions and syncs.
//!
//! Sync and conversion drive a [`ProgressReporter`]; what gets drawn is up to
//! the implementation. Interactive terminals get spinners and a bar, anything
//! else gets one line per finished document.

use std::sync::Arc;

/// Status of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    /// Converting markdown into blocks
    Converting,
    /// Validating and uploading referenced images
    ProcessingImages { current: usize, total: usize },
    /// Writing blocks to the remote page
    Writing,
    /// Reading comments from the remote page
    Fetching,
    /// Unchanged since the last sync
    Skipped,
    Done,
    Failed(String),
}

impl EntryStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Done | Self::Failed(_))
    }
}

/// Phase of the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPhase {
    LoadingState,
    BuildingHierarchy,
    ProcessingDocuments,
    FetchingComments,
    Completed,
    Failed(String),
}

impl BatchPhase {
    fn describe(&self) -> (&'static str, &'static str) {
        match self {
            BatchPhase::LoadingState => ("🗂️ ", "Loading sync state..."),
            BatchPhase::BuildingHierarchy => ("🌳", "Scanning planning directory..."),
            BatchPhase::ProcessingDocuments => ("📄", "Processing documents..."),
            BatchPhase::FetchingComments => ("💬", "Fetching comments..."),
            BatchPhase::Completed => ("✅", "Completed!"),
            BatchPhase::Failed(_) => ("❌", "Failed"),
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn set_phase(&self, phase: BatchPhase);

    /// Register entries to track (call before processing starts).
    fn register_entries(&self, entries: Vec<String>);

    fn update_entry(&self, entry: &str, status: EntryStatus);

    /// Image uploads finished so far out of those needed.
    fn set_upload_progress(&self, current: usize, total: usize);

    fn log_info(&self, message: &str);

    fn log_warn(&self, message: &str);

    fn log_error(&self, message: &str);

    fn finish(&self);
}

pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn set_phase(&self, _phase: BatchPhase) {}
    fn register_entries(&self, _entries: Vec<String>) {}
    fn update_entry(&self, _entry: &str, _status: EntryStatus) {}
    fn set_upload_progress(&self, _current: usize, _total: usize) {}
    fn log_info(&self, _message: &str) {}
    fn log_warn(&self, _message: &str) {}
    fn log_error(&self, _message: &str) {}
    fn finish(&self) {}
}

#[derive(Debug, Default)]
struct Stats {
    total_entries: usize,
    successful_entries: usize,
    skipped_entries: usize,
    failed_entries: usize,
    upload_count: usize,
    start_time: Option<std::time::Instant>,
}

impl Stats {
    fn started() -> Self {
        Self {
            start_time: Some(std::time::Instant::now()),
            ..Default::default()
        }
    }

    fn count(&mut self, status: &EntryStatus) {
        match status {
            EntryStatus::Done => self.successful_entries += 1,
            EntryStatus::Skipped => self.skipped_entries += 1,
            EntryStatus::Failed(_) => self.failed_entries += 1,
            _ => {}
        }
    }

    fn print_summary(&self) {
        let duration = self.start_time.map(|t| t.elapsed()).unwrap_or_default();

        eprintln!();
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("📊 Summary");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("   📄 Documents:  {} total", self.total_entries);
        eprintln!("   ✅ Written:    {}", self.successful_entries);
        if self.skipped_entries > 0 {
            eprintln!("   ⏭️  Unchanged:  {}", self.skipped_entries);
        }
        if self.failed_entries > 0 {
            eprintln!("   ❌ Failed:     {}", self.failed_entries);
        }
        if self.upload_count > 0 {
            eprintln!("   🖼️  Images:     {}", self.upload_count);
        }
        eprintln!("   ⏱️  Duration:   {:.2}s", duration.as_secs_f64());
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}

/// Line-per-event reporter for pipes and CI logs.
pub struct SimpleReporter {
    stats: std::sync::RwLock<Stats>,
}

impl SimpleReporter {
    pub fn new() -> Self {
        Self {
            stats: std::sync::RwLock::new(Stats::started()),
        }
    }
}

impl Default for SimpleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for SimpleReporter {
    fn set_phase(&self, phase: BatchPhase) {
        if let BatchPhase::Failed(ref e) = phase {
            eprintln!("❌ Failed: {e}");
            return;
        }
        let (emoji, msg) = phase.describe();
        eprintln!("{emoji} {msg}");
    }

    fn register_entries(&self, entries: Vec<String>) {
        self.stats.write().unwrap().total_entries = entries.len();
        eprintln!("   Found {} documents", entries.len());
    }

    fn update_entry(&self, entry: &str, status: EntryStatus) {
        self.stats.write().unwrap().count(&status);
        match status {
            EntryStatus::Done => eprintln!("   ✓ {entry}"),
            EntryStatus::Skipped => eprintln!("   - {entry} (unchanged)"),
            EntryStatus::Failed(ref e) => eprintln!("   ✗ {entry}: {e}"),
            _ => {}
        }
    }

    fn set_upload_progress(&self, _current: usize, total: usize) {
        self.stats.write().unwrap().upload_count = total;
    }

    fn log_info(&self, message: &str) {
        eprintln!("ℹ️  {message}");
    }

    fn log_warn(&self, message: &str) {
        eprintln!("⚠️  {message}");
    }

    fn log_error(&self, message: &str) {
        eprintln!("❌ {message}");
    }

    fn finish(&self) {
        self.stats.read().unwrap().print_summary();
    }
}

/// Spinner-per-document reporter for interactive terminals.
pub struct FancyReporter {
    multi: indicatif::MultiProgress,
    phase_bar: indicatif::ProgressBar,
    entries: std::sync::RwLock<std::collections::HashMap<String, Option<indicatif::ProgressBar>>>,
    main_progress: std::sync::RwLock<Option<indicatif::ProgressBar>>,
    stats: std::sync::RwLock<Stats>,
}

impl FancyReporter {
    pub fn new() -> Self {
        let multi = indicatif::MultiProgress::new();
        let phase_bar = multi.add(indicatif::ProgressBar::new_spinner());
        phase_bar.set_style(
            indicatif::ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap(),
        );
        phase_bar.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            multi,
            phase_bar,
            entries: std::sync::RwLock::new(std::collections::HashMap::new()),
            main_progress: std::sync::RwLock::new(None),
            stats: std::sync::RwLock::new(Stats::started()),
        }
    }

    fn status_line(entry: &str, status: &EntryStatus) -> String {
        let (emoji, detail) = match status {
            EntryStatus::Pending => ("⏳", "pending".to_owned()),
            EntryStatus::Converting => ("⚙️ ", "converting".to_owned()),
            EntryStatus::ProcessingImages { current, total } => {
                ("🖼️ ", format!("images ({current}/{total})"))
            }
            EntryStatus::Writing => ("☁️ ", "writing".to_owned()),
            EntryStatus::Fetching => ("💬", "fetching comments".to_owned()),
            EntryStatus::Skipped => ("⏭️ ", "unchanged".to_owned()),
            EntryStatus::Done => ("✅", "done".to_owned()),
            EntryStatus::Failed(e) => ("❌", e.clone()),
        };
        format!("{emoji} {entry}: {detail}")
    }
}

impl Default for FancyReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for FancyReporter {
    fn set_phase(&self, phase: BatchPhase) {
        if let BatchPhase::Failed(ref e) = phase {
            self.phase_bar
                .finish_with_message(format!("❌ Failed: {e}"));
            return;
        }
        let (emoji, msg) = phase.describe();
        let msg = format!("{emoji} {msg}");
        if matches!(phase, BatchPhase::Completed) {
            self.phase_bar.finish_with_message(msg);
        } else {
            self.phase_bar.set_message(msg);
        }
    }

    fn register_entries(&self, entries: Vec<String>) {
        let mut map = self.entries.write().unwrap();
        let total = entries.len();
        self.stats.write().unwrap().total_entries = total;

        let main_pb = self.multi.add(indicatif::ProgressBar::new(total as u64));
        main_pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("   {bar:40.cyan/blue} {pos}/{len} documents")
                .unwrap()
                .progress_chars("█▓▒░  "),
        );
        *self.main_progress.write().unwrap() = Some(main_pb);

        // Bars are created lazily once a document starts.
        for entry in entries {
            map.insert(entry, None);
        }
    }

    fn update_entry(&self, entry: &str, status: EntryStatus) {
        let mut map = self.entries.write().unwrap();

        if status.is_terminal() {
            if let Some(Some(pb)) = map.get(entry) {
                pb.finish_and_clear();
            }
            map.remove(entry);
            if let Some(ref main_pb) = *self.main_progress.read().unwrap() {
                main_pb.inc(1);
            }
            self.stats.write().unwrap().count(&status);
            return;
        }

        if let Some(entry_slot) = map.get_mut(entry) {
            let line = Self::status_line(entry, &status);
            if let Some(pb) = entry_slot {
                pb.set_message(line);
            } else {
                let pb = self.multi.add(indicatif::ProgressBar::new_spinner());
                pb.set_style(
                    indicatif::ProgressStyle::default_spinner()
                        .template("   {msg}")
                        .unwrap(),
                );
                pb.set_message(line);
                pb.enable_steady_tick(std::time::Duration::from_millis(100));
                *entry_slot = Some(pb);
            }
        }
    }

    fn set_upload_progress(&self, current: usize, total: usize) {
        self.phase_bar
            .set_message(format!("🖼️  Uploading images... ({current}/{total})"));
        self.stats.write().unwrap().upload_count = total;
    }

    fn log_info(&self, message: &str) {
        self.multi.println(format!("ℹ️  {message}")).ok();
    }

    fn log_warn(&self, message: &str) {
        self.multi.println(format!("⚠️  {message}")).ok();
    }

    fn log_error(&self, message: &str) {
        self.multi.println(format!("❌ {message}")).ok();
    }

    fn finish(&self) {
        let map = self.entries.read().unwrap();
        for pb in map.values().flatten() {
            pb.finish_and_clear();
        }
        if let Some(ref main_pb) = *self.main_progress.read().unwrap() {
            main_pb.finish_and_clear();
        }
        self.phase_bar.finish_and_clear();
        self.stats.read().unwrap().print_summary();
    }
}

/// Fancy output on a terminal, plain lines otherwise.
pub fn create_reporter() -> Arc<dyn ProgressReporter> {
    if console::Term::stderr().is_term() {
        Arc::new(FancyReporter::new())
    } else {
        Arc::new(SimpleReporter::new())
    }
}
