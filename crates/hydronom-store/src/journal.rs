//! Append-only journal.
//!
//! Every ingested telemetry snapshot and every operator event is written as a
//! single JSON line to a file chosen by the current UTC calendar day and the
//! record kind:
//!
//! | Kind | File |
//! |---|---|
//! | [`RecordKind::Telemetry`] | `<dir>/telemetry-YYYYMMDD.jsonl` |
//! | [`RecordKind::Event`] | `<dir>/events-YYYYMMDD.jsonl` |
//!
//! An append returns only after the line has been written in full and
//! flushed to the storage device. Appenders of the same kind are serialized
//! by a mutex around one `write_all`, so lines never interleave. A write or
//! flush that fails part-way is cut back to the previous end of file and the
//! partition is reopened on the next append. The journal is write-only:
//! nothing here reads records back.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use hydronom_types::{EventLogRecord, FleetError, Telemetry};
use serde::Serialize;
use tracing::{debug, info, warn};

/// The two independent partitions of the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Telemetry,
    Event,
}

impl RecordKind {
    fn file_prefix(self) -> &'static str {
        match self {
            RecordKind::Telemetry => "telemetry",
            RecordKind::Event => "events",
        }
    }
}

/// Path of the partition holding `kind` records written on `day` (UTC).
pub fn partition_path(dir: &Path, kind: RecordKind, day: NaiveDate) -> PathBuf {
    dir.join(format!("{}-{}.jsonl", kind.file_prefix(), day.format("%Y%m%d")))
}

/// The currently open file of one kind.
#[derive(Debug)]
struct Partition {
    day: NaiveDate,
    file: File,
}

/// Date-partitioned JSONL writer. Share it behind an [`Arc`][std::sync::Arc].
#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    telemetry: Mutex<Option<Partition>>,
    events: Mutex<Option<Partition>>,
}

impl Journal {
    /// Open a journal rooted at `dir`, creating the directory if needed.
    ///
    /// Partition files are opened lazily on the first append of each day.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, FleetError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "journal opened");
        Ok(Self {
            dir,
            telemetry: Mutex::new(None),
            events: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append `snapshot` to today's telemetry partition.
    pub fn append_telemetry(&self, snapshot: &Telemetry) -> Result<(), FleetError> {
        self.append_telemetry_at(snapshot, Utc::now())
    }

    /// Append `record` to today's event partition.
    pub fn append_event(&self, record: &EventLogRecord) -> Result<(), FleetError> {
        self.append_event_at(record, Utc::now())
    }

    /// [`append_telemetry`](Self::append_telemetry) with an explicit clock
    /// reading used for partition selection.
    pub fn append_telemetry_at(
        &self,
        snapshot: &Telemetry,
        now: DateTime<Utc>,
    ) -> Result<(), FleetError> {
        self.append(RecordKind::Telemetry, snapshot, now)
    }

    pub fn append_event_at(
        &self,
        record: &EventLogRecord,
        now: DateTime<Utc>,
    ) -> Result<(), FleetError> {
        self.append(RecordKind::Event, record, now)
    }

    fn slot(&self, kind: RecordKind) -> MutexGuard<'_, Option<Partition>> {
        let slot = match kind {
            RecordKind::Telemetry => &self.telemetry,
            RecordKind::Event => &self.events,
        };
        // A panic mid-append cannot leave a half-written line behind a
        // successful return, so the partition is still usable.
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append<T: Serialize>(
        &self,
        kind: RecordKind,
        record: &T,
        now: DateTime<Utc>,
    ) -> Result<(), FleetError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let day = now.date_naive();
        let mut slot = self.slot(kind);

        let stale = slot.as_ref().is_none_or(|p| p.day != day);
        if stale {
            let path = partition_path(&self.dir, kind, day);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(path = %path.display(), "journal partition opened");
            *slot = Some(Partition { day, file });
        }

        let Some(partition) = slot.as_mut() else {
            return Err(FleetError::Storage(io::Error::other(
                "journal partition unavailable",
            )));
        };
        if let Err(e) = append_line(&mut partition.file, &line) {
            *slot = None;
            return Err(FleetError::Storage(e));
        }
        Ok(())
    }
}

/// The file operations one append needs.
trait LineFile: Write {
    fn end(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LineFile for File {
    fn end(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Write `line` completely or not at all.
fn append_line<F: LineFile>(file: &mut F, line: &[u8]) -> io::Result<()> {
    let end = file.end()?;
    if let Err(e) = file.write_all(line).and_then(|()| file.sync()) {
        if let Err(undo) = file.truncate_to(end) {
            warn!(error = %undo, "torn journal line could not be rolled back");
        }
        return Err(e);
    }
    Ok(())
}
