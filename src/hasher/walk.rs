//! Recursive traversal of file systems and stream hashing.
//!
//! The walk is depth-first pre-order over an explicit work stack; children
//! pop in the order the backend listed them. Every data stream reached by
//! the walk produces exactly one record, in walk order, regardless of how
//! many workers hash in parallel.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::thread;
use std::time::Instant;

use crossbeam_channel as channel;

use crate::backend::{FileEntry, StorageBackend};
use crate::core::abort::AbortSignal;
use crate::core::errors::{LhError, Result};
use crate::hasher::digest::StreamDigester;
use crate::hasher::display::format_display_path;
use crate::hasher::{HashRecord, HashSummary, HasherOptions};
use crate::logger::ActivityLog;
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::output::HashSink;
use crate::pathspec::PathSpec;

/// Queued jobs per worker before the walk blocks.
const JOBS_PER_WORKER: usize = 4;

/// One data stream reached by the walk.
struct Visit {
    display: String,
    entry: FileEntry,
    stream: String,
    ignored: bool,
}

/// Result of reading one stream.
enum Outcome {
    Ignored,
    Hashed(Result<(String, u64)>),
}

/// Hashes every data stream below a set of base path specs.
pub struct RecursiveHasher<'a> {
    backend: &'a dyn StorageBackend,
    log: &'a ActivityLog,
    options: HasherOptions,
    abort: AbortSignal,
}

impl<'a> RecursiveHasher<'a> {
    pub fn new(backend: &'a dyn StorageBackend, log: &'a ActivityLog, options: HasherOptions) -> Self {
        Self {
            backend,
            log,
            options,
            abort: AbortSignal::new(),
        }
    }

    /// Poll `abort` before every stream.
    #[must_use]
    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn options(&self) -> &HasherOptions {
        &self.options
    }

    /// Walk each base path spec in order and write one record per stream.
    ///
    /// Unreadable streams, unlistable directories and unopenable base path
    /// specs are reported and skipped. An abort returns
    /// [`LhError::UserAbort`]; records written before it stay in the sink.
    ///
    /// # Errors
    /// [`LhError::UserAbort`] on abort; any error from the sink.
    pub fn process(&self, base_path_specs: &[PathSpec], sink: &mut dyn HashSink) -> Result<HashSummary> {
        let started = Instant::now();
        let mut summary = HashSummary::default();

        let outcome = if self.options.parallelism > 1 {
            self.process_parallel(base_path_specs, sink, &mut summary)
        } else {
            self.process_sequential(base_path_specs, sink, &mut summary)
        };
        let flushed = sink.flush();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Err(err) = outcome.and(flushed) {
            if matches!(err, LhError::UserAbort) {
                self.log.record(
                    &LogEntry::new(EventType::RunAborted, Severity::Warning)
                        .with_count(summary.records())
                        .with_duration_ms(duration_ms),
                );
            }
            return Err(err);
        }

        self.log.info(
            "HASHER",
            format_args!(
                "{} records ({} unreadable) in {duration_ms} ms",
                summary.records(),
                summary.unreadable_streams
            ),
        );
        self.log.record(
            &LogEntry::new(EventType::HashComplete, Severity::Info)
                .with_count(summary.records())
                .with_duration_ms(duration_ms),
        );
        Ok(summary)
    }

    fn process_sequential(
        &self,
        base_path_specs: &[PathSpec],
        sink: &mut dyn HashSink,
        summary: &mut HashSummary,
    ) -> Result<()> {
        let mut digester = StreamDigester::new(self.options.read_buffer_size);
        self.walk(base_path_specs, summary, |visit, summary| {
            let outcome = if visit.ignored {
                Outcome::Ignored
            } else {
                Outcome::Hashed(hash_stream(self.backend, &mut digester, &visit.entry, &visit.stream))
            };
            let record = self.settle(visit, outcome, summary);
            sink.write_record(&record)
        })
    }

    /// Walk on the calling thread, hash on `parallelism` scoped workers and
    /// re-sequence results before they reach the sink.
    fn process_parallel(
        &self,
        base_path_specs: &[PathSpec],
        sink: &mut dyn HashSink,
        summary: &mut HashSummary,
    ) -> Result<()> {
        let workers = self.options.parallelism;
        let buffer_size = self.options.read_buffer_size;
        let backend = self.backend;

        thread::scope(|scope| {
            let (job_tx, job_rx) = channel::bounded::<(u64, FileEntry, String)>(workers * JOBS_PER_WORKER);
            let (done_tx, done_rx) = channel::unbounded::<(u64, Result<(String, u64)>)>();

            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    let mut digester = StreamDigester::new(buffer_size);
                    for (seq, entry, stream) in job_rx {
                        let hashed = hash_stream(backend, &mut digester, &entry, &stream);
                        if done_tx.send((seq, hashed)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(done_tx);

            let mut reorder = Reorder::default();
            let walked = self.walk(base_path_specs, summary, |visit, summary| {
                let seq = reorder.next_seq();
                if visit.ignored {
                    reorder.park(seq, visit, Some(Outcome::Ignored));
                } else {
                    let job = (seq, visit.entry.clone(), visit.stream.clone());
                    reorder.park(seq, visit, None);
                    job_tx.send(job).map_err(|_| LhError::Runtime {
                        details: "hashing workers exited early".to_string(),
                    })?;
                }
                for (seq, hashed) in done_rx.try_iter() {
                    reorder.complete(seq, hashed);
                }
                reorder.emit_ready(self, sink, summary)
            });

            // Closing the job queue lets the workers drain and exit.
            drop(job_tx);
            if matches!(&walked, Err(err) if !matches!(err, LhError::UserAbort)) {
                // The walk failed; nothing more may reach the sink.
                return walked;
            }
            for (seq, hashed) in &done_rx {
                reorder.complete(seq, hashed);
            }
            let emitted = reorder.emit_ready(self, sink, summary);
            walked.and(emitted)
        })
    }

    /// Depth-first pre-order walk handing every data stream to `visit`.
    fn walk(
        &self,
        base_path_specs: &[PathSpec],
        summary: &mut HashSummary,
        mut visit: impl FnMut(Visit, &mut HashSummary) -> Result<()>,
    ) -> Result<()> {
        for base in base_path_specs {
            summary.base_path_specs += 1;
            let root = match self.open_root(base) {
                Ok(root) => root,
                Err(err) => {
                    summary.skipped_base_path_specs += 1;
                    self.log.warn("HASHER", format_args!("skipping {base}: {err}"));
                    self.log.record(
                        &LogEntry::new(EventType::BasePathSpecSkipped, Severity::Warning)
                            .with_path_spec(base)
                            .with_error(&err),
                    );
                    continue;
                }
            };

            let mut stack: Vec<(FileEntry, Vec<String>)> = vec![(root, Vec::new())];
            while let Some((entry, mut segments)) = stack.pop() {
                segments.push(entry.name.clone());
                // segments[0] is the root entry's own name.
                let below_root = &segments[1..];

                for stream in &entry.data_streams {
                    if self.abort.is_raised() {
                        return Err(LhError::UserAbort);
                    }
                    let ignored = self.options.ignore.contains(below_root, stream);
                    if !ignored && entry.kind.is_special() {
                        continue;
                    }
                    let display = format_display_path(base, &segments, stream);
                    visit(
                        Visit {
                            display,
                            entry: entry.clone(),
                            stream: stream.clone(),
                            ignored,
                        },
                        summary,
                    )?;
                }
                if entry.kind.is_special() {
                    summary.skipped_special_entries += 1;
                }

                let children = self.children_of(&entry, summary);
                stack.extend(children.into_iter().rev().map(|child| (child, segments.clone())));
            }
        }
        Ok(())
    }

    fn open_root(&self, base: &PathSpec) -> Result<FileEntry> {
        let file_system = self.backend.open_file_system(base)?;
        self.log.info(
            "HASHER",
            format_args!("hashing {} file system at {base}", file_system.format),
        );
        self.backend
            .open_file_entry(base)?
            .ok_or_else(|| LhError::Enumeration {
                path_spec: base.to_string(),
                details: "file system root not found".to_string(),
            })
    }

    /// Sub-entries of `entry`; on failure, those listed so far.
    fn children_of(&self, entry: &FileEntry, summary: &mut HashSummary) -> Vec<FileEntry> {
        let entries = match self.backend.sub_entries(entry) {
            Ok(entries) => entries,
            Err(err) => {
                self.abandon(entry, &err, summary);
                return Vec::new();
            }
        };
        let mut children = Vec::new();
        for child in entries {
            match child {
                Ok(child) => children.push(child),
                Err(err) => {
                    self.abandon(entry, &err, summary);
                    break;
                }
            }
        }
        children
    }

    fn abandon(&self, entry: &FileEntry, err: &LhError, summary: &mut HashSummary) {
        summary.abandoned_subtrees += 1;
        self.log.warn(
            "HASHER",
            format_args!("unable to list {}: {err}", entry.path_spec),
        );
        self.log.record(
            &LogEntry::new(EventType::SubtreeAbandoned, Severity::Warning)
                .with_path_spec(&entry.path_spec)
                .with_error(err),
        );
    }

    /// Turn an outcome into its record and update the counters.
    fn settle(&self, visit: Visit, outcome: Outcome, summary: &mut HashSummary) -> HashRecord {
        match outcome {
            Outcome::Ignored => {
                summary.ignored_streams += 1;
                HashRecord::unreadable(visit.display)
            }
            Outcome::Hashed(Ok((digest, bytes))) => {
                summary.hashed_streams += 1;
                summary.bytes_hashed += bytes;
                HashRecord::hashed(visit.display, digest)
            }
            Outcome::Hashed(Err(err)) => {
                summary.unreadable_streams += 1;
                self.log
                    .warn("HASHER", format_args!("unable to read {}: {err}", visit.display));
                self.log.record(
                    &LogEntry::new(EventType::StreamUnreadable, Severity::Warning)
                        .with_path_spec(&visit.entry.path_spec)
                        .with_path(visit.display.clone())
                        .with_stream(visit.stream)
                        .with_error(&err),
                );
                HashRecord::unreadable(visit.display)
            }
        }
    }
}

/// Open and digest one stream. The reader is dropped on every path.
fn hash_stream(
    backend: &dyn StorageBackend,
    digester: &mut StreamDigester,
    entry: &FileEntry,
    stream: &str,
) -> Result<(String, u64)> {
    let mut reader = backend.open_stream(entry, stream)?;
    digester
        .digest(&mut reader)
        .map_err(|source| LhError::StreamIo {
            path_spec: entry.path_spec.to_string(),
            stream: stream.to_string(),
            source,
        })
}

/// Holds visits until every earlier one has an outcome.
#[derive(Default)]
struct Reorder {
    assigned: u64,
    slots: BTreeMap<u64, (Visit, Option<Outcome>)>,
}

impl Reorder {
    fn next_seq(&mut self) -> u64 {
        let seq = self.assigned;
        self.assigned += 1;
        seq
    }

    fn park(&mut self, seq: u64, visit: Visit, outcome: Option<Outcome>) {
        self.slots.insert(seq, (visit, outcome));
    }

    fn complete(&mut self, seq: u64, hashed: Result<(String, u64)>) {
        if let Some((_, outcome)) = self.slots.get_mut(&seq) {
            *outcome = Some(Outcome::Hashed(hashed));
        }
    }

    /// Write the longest completed prefix to the sink.
    fn emit_ready(
        &mut self,
        hasher: &RecursiveHasher<'_>,
        sink: &mut dyn HashSink,
        summary: &mut HashSummary,
    ) -> Result<()> {
        while self
            .slots
            .first_key_value()
            .is_some_and(|(_, (_, outcome))| outcome.is_some())
        {
            let Some((_, (visit, Some(outcome)))) = self.slots.pop_first() else {
                break;
            };
            let record = hasher.settle(visit, outcome, summary);
            sink.write_record(&record)?;
        }
        Ok(())
    }
}
