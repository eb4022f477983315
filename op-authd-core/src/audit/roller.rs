use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;

const FILE_PREFIX: &str = "audit-";
const FILE_SUFFIX: &str = ".log";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Appends audit lines to a per-day file, rotating on calendar date change
/// and pruning files older than the retention window.
pub struct Roller {
    dir: PathBuf,
    max_days: u32,
    state: Mutex<State>,
}

struct State {
    file: Option<File>,
    date: Option<NaiveDate>,
}

impl Roller {
    pub fn new(dir: PathBuf, max_days: u32) -> Self {
        Self {
            dir,
            max_days,
            state: Mutex::new(State {
                file: None,
                date: None,
            }),
        }
    }

    /// Appends one line, opening a fresh file first when the day rolled
    /// over. Rotation also prunes expired files.
    pub fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        let today = Local::now().date_naive();
        if state.date != Some(today) || state.file.is_none() {
            self.rotate(&mut state, today)?;
        }
        let file = state
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("no open audit file"))?;
        file.write_all(line)?;
        file.write_all(b"\n")
    }

    /// Best-effort fsync of the current file.
    pub fn flush(&self) {
        let state = self.state.lock();
        if let Some(file) = &state.file {
            let _ = file.sync_data();
        }
    }

    pub fn current_path(&self) -> PathBuf {
        let date = {
            let state = self.state.lock();
            state.date.unwrap_or_else(|| Local::now().date_naive())
        };
        self.path_for(date)
    }

    /// Removes audit files older than the retention window. A zero
    /// `max_days` keeps everything.
    pub fn prune_expired(&self) {
        if self.max_days == 0 {
            return;
        }
        let cutoff = Local::now().date_naive() - chrono::Days::new(u64::from(self.max_days));
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(date) = parse_file_date(&name.to_string_lossy()) else {
                continue;
            };
            if date < cutoff {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    fn rotate(&self, state: &mut State, today: NaiveDate) -> io::Result<()> {
        state.file = None;
        let path = self.path_for(today);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&path)?;
        state.file = Some(file);
        state.date = Some(today);
        self.prune_expired();
        Ok(())
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format(DATE_FORMAT)))
    }
}

fn parse_file_date(name: &str) -> Option<NaiveDate> {
    let date_part = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(date_part, DATE_FORMAT).ok()
}

/// Lists audit files in `dir`, newest first.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .filter(|entry| parse_file_date(&entry.file_name().to_string_lossy()).is_some())
        .map(|entry| entry.path())
        .collect();
    files.sort();
    files.reverse();
    Ok(files)
}
