use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use fault_injection::{annotate, fallible, maybe};
use inline_array::InlineArray;
use parking_lot::Mutex;
use rayon::prelude::*;
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

use super::{Index, Update};

const LOCK_NOTICE: &str = "DO_NOT_EDIT_BUCKET_FILES";
const LOG_SUFFIX: &str = ".log";
const SNAPSHOT_SUFFIX: &str = ".snap";
const PARTIAL_SUFFIX: &str = ".partial";

const HEADER_LEN: usize = 8;
const CRC_LEN: usize = 4;
// keeps the crc of an empty frame non-zero
const CRC_MASK: u32 = 0xAF;

const STORE: u8 = 1;
const REMOVE: u8 = 0;

/// Knobs forwarded from `Config` when a bucket is opened.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogOptions {
    pub buffer_size: usize,
    pub compaction_threshold: u64,
    pub zstd_level: i32,
}

/// Durable home of one bucket: an append-only log of update frames
/// plus a snapshot that periodically absorbs retired logs.
///
/// Each call to `write_batch` produces exactly one crc-protected frame,
/// and recovery applies a frame entirely or not at all.
pub(crate) struct LogStore {
    shared: Shared,
    closed: bool,
}

impl Drop for LogStore {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        if let Err(e) = self.flush() {
            log::error!(
                "flushing bucket log {:?} on close failed: {:?}",
                self.shared.directory,
                e
            );
        }

        self.close();
    }
}

struct Recovered {
    index: Index,
    next_lsn: u64,
    snapshot_len: u64,
}

struct ActiveLog {
    writer: BufWriter<fs::File>,
    lsn: u64,
    written: u64,
}

enum Compaction {
    Retired(u64),
    Stop(Sender<()>),
}

#[derive(Clone)]
struct Shared {
    directory: PathBuf,
    lock: Arc<fs::File>,
    active: Arc<Mutex<ActiveLog>>,
    snapshot_len: Arc<AtomicU64>,
    poisoned: Arc<Mutex<Option<(io::ErrorKind, String)>>>,
    compactor: Sender<Compaction>,
    options: LogOptions,
}

impl Shared {
    fn healthy(&self) -> io::Result<()> {
        match &*self.poisoned.lock() {
            None => Ok(()),
            Some((kind, reason)) => Err(io::Error::new(*kind, reason.clone())),
        }
    }

    fn poison(&self, error: &io::Error) {
        let mut poisoned = self.poisoned.lock();
        if poisoned.is_none() {
            *poisoned = Some((error.kind(), error.to_string()));
        }
    }

    // the first failure seen here poisons every later write
    fn watch<T>(&self, res: io::Result<T>) -> io::Result<T> {
        if let Err(e) = &res {
            self.poison(e);
        }
        res
    }
}

// blocks for one retired log, then drains whatever else is queued
fn next_compaction(
    rx: &Receiver<Compaction>,
) -> Result<BTreeSet<u64>, Option<Sender<()>>> {
    let first = rx.recv().map_err(|e| {
        log::error!("bucket compactor inbox disconnected: {e:?}");
        None
    })?;

    let mut retired = BTreeSet::new();
    for message in std::iter::once(first).chain(rx.try_iter()) {
        match message {
            Compaction::Retired(lsn) => {
                retired.insert(lsn);
            }
            Compaction::Stop(ack) => return Err(Some(ack)),
        }
    }

    Ok(retired)
}

fn compactor(rx: Receiver<Compaction>, mut snapshot_lsn: u64, shared: Shared) {
    loop {
        if let Err(e) = shared.healthy() {
            log::error!("bucket compactor stopping on poisoned log: {:?}", e);
            return;
        }

        let retired = match next_compaction(&rx) {
            Ok(retired) => retired,
            Err(ack) => {
                // release the directory lock before acknowledging
                drop(shared);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                return;
            }
        };

        let compacted = compact(
            &shared.directory,
            retired,
            Some(snapshot_lsn),
            &shared.lock,
            shared.options.zstd_level,
        );

        match compacted {
            Ok(recovered) => {
                shared
                    .snapshot_len
                    .store(recovered.snapshot_len, Ordering::Release);
                snapshot_lsn = recovered.next_lsn - 1;
            }
            Err(e) => {
                log::error!("bucket compaction failed, poisoning log: {:?}", e);
                shared.poison(&e);
                return;
            }
        }
    }
}

impl LogStore {
    fn close(&mut self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.shared.compactor.send(Compaction::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }

        self.shared.poison(&io::Error::new(
            io::ErrorKind::Other,
            "bucket log is closed",
        ));

        self.closed = true;
    }

    /// Locks `directory`, replays its snapshot and logs, and opens a
    /// fresh log for new writes. Returns the writer and the recovered
    /// contents.
    pub fn recover<P: AsRef<Path>>(
        directory: P,
        options: LogOptions,
    ) -> io::Result<(LogStore, Index)> {
        use fs2::FileExt;

        let directory = directory.as_ref();

        fallible!(fs::create_dir_all(directory));
        let _ = fs::File::create(directory.join(LOCK_NOTICE));

        let lock = fallible!(fs::File::open(directory));
        fallible!(lock.try_lock_exclusive());

        let (logs, snapshot) = scan_directory(directory)?;

        log::debug!(
            "recovering bucket log at {:?} from snapshot {:?} and {} logs",
            directory,
            snapshot,
            logs.len()
        );

        let recovered =
            compact(directory, logs, snapshot, &lock, options.zstd_level)?;

        let file =
            fallible!(fs::File::create(log_path(directory, recovered.next_lsn)));
        fallible!(lock.sync_all());

        let active = ActiveLog {
            writer: BufWriter::with_capacity(options.buffer_size, file),
            lsn: recovered.next_lsn,
            written: 0,
        };

        let (compactor_tx, compactor_rx) = unbounded();

        let shared = Shared {
            directory: directory.to_path_buf(),
            lock: Arc::new(lock),
            active: Arc::new(Mutex::new(active)),
            snapshot_len: Arc::new(AtomicU64::new(recovered.snapshot_len)),
            poisoned: Arc::default(),
            compactor: compactor_tx,
            options,
        };

        let snapshot_lsn = recovered.next_lsn - 1;
        let compactor_shared = shared.clone();

        let _detached = std::thread::Builder::new()
            .name("kical_compactor".into())
            .spawn(move || compactor(compactor_rx, snapshot_lsn, compactor_shared))
            .map_err(|e| {
                annotate!(io::Error::new(
                    io::ErrorKind::Other,
                    format!(
                        "unable to spawn compactor for bucket {:?}: {:?}",
                        directory, e
                    ),
                ))
            })?;

        Ok((LogStore { shared, closed: false }, recovered.index))
    }

    /// Appends one frame holding `batch`. Returns the bytes written.
    pub fn write_batch(
        &self,
        batch: &[Update],
        synchronized: bool,
    ) -> io::Result<u64> {
        self.shared.healthy()?;

        let frame = encode_frame(
            batch.iter().map(|u| (&u.key, u.value.as_ref())),
            self.shared.options.zstd_level,
        )?;
        let len = frame.len() as u64;

        let mut active = self.shared.active.lock();
        let start = active.written;

        let appended = maybe!(active.writer.write_all(&frame)).and_then(|()| {
            if synchronized { sync(&mut active.writer) } else { Ok(()) }
        });

        if let Err(e) = appended {
            self.shared.poison(&e);
            if let Err(discard_error) = self.discard_since(&mut active, start) {
                log::error!(
                    "unable to cut rejected frame from log {} of {:?}: {:?}",
                    active.lsn,
                    self.shared.directory,
                    discard_error
                );
            }
            return Err(e);
        }
        active.written += len;

        let threshold = self
            .shared
            .snapshot_len
            .load(Ordering::Acquire)
            .max(self.shared.options.compaction_threshold);

        // the frame is already accepted, so a failed rotation only
        // poisons the writes that follow it
        if active.written > threshold {
            if let Err(e) = self.rotate(&mut active) {
                log::error!(
                    "rotating log {} of {:?} failed: {:?}",
                    active.lsn,
                    self.shared.directory,
                    e
                );
                self.shared.poison(&e);
            }
        }

        Ok(len)
    }

    // Drops buffered bytes and cuts the active log back to `offset` so a
    // frame whose write was reported as failed is never recovered.
    fn discard_since(&self, active: &mut ActiveLog, offset: u64) -> io::Result<()> {
        let file = match active.writer.get_ref().try_clone() {
            Ok(file) => file,
            Err(_) => fallible!(
                fs::OpenOptions::new()
                    .write(true)
                    .open(log_path(&self.shared.directory, active.lsn))
            ),
        };

        let stale = std::mem::replace(
            &mut active.writer,
            BufWriter::with_capacity(self.shared.options.buffer_size, file),
        );
        let (_, _unwritten) = stale.into_parts();

        let file = active.writer.get_mut();
        let keep = fallible!(file.metadata()).len().min(offset);
        fallible!(file.set_len(keep));
        fallible!(file.seek(SeekFrom::Start(keep)));
        fallible!(file.sync_all());

        log::warn!(
            "cut log {} of {:?} back to {} bytes after a failed write",
            active.lsn,
            self.shared.directory,
            keep
        );

        Ok(())
    }

    fn rotate(&self, active: &mut ActiveLog) -> io::Result<()> {
        // the compactor reads the retired log back from disk
        sync(&mut active.writer)?;

        let lsn = active.lsn + 1;
        let file =
            maybe!(fs::File::create(log_path(&self.shared.directory, lsn)))?;
        maybe!(self.shared.lock.sync_all())?;

        let next = ActiveLog {
            writer: BufWriter::with_capacity(self.shared.options.buffer_size, file),
            lsn,
            written: 0,
        };
        let retired = std::mem::replace(active, next);

        log::trace!("retired log {} after {} bytes", retired.lsn, retired.written);

        self.shared.compactor.send(Compaction::Retired(retired.lsn)).map_err(|_| {
            annotate!(io::Error::new(
                io::ErrorKind::Other,
                "bucket compactor is no longer running",
            ))
        })
    }

    /// Makes every previously written frame durable.
    pub fn flush(&self) -> io::Result<()> {
        self.shared.healthy()?;

        let mut active = self.shared.active.lock();
        self.shared.watch(sync(&mut active.writer))
    }
}

fn sync(writer: &mut BufWriter<fs::File>) -> io::Result<()> {
    maybe!(writer.flush())?;
    maybe!(writer.get_ref().sync_all())
}

/// Frame layout:
///
/// ```text
/// [payload len: u64 LE][zstd payload][crc32(len ++ payload) ^ CRC_MASK: u32 LE]
/// ```
///
/// The payload is a run of updates, each `[key len: u64 LE][key]` followed
/// by either `STORE [value len: u64 LE][value]` or `REMOVE`.
fn encode_frame<'a, I>(updates: I, zstd_level: i32) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a InlineArray, Option<&'a InlineArray>)>,
{
    let mut encoder = ZstdEncoder::new(vec![0; HEADER_LEN], zstd_level)?;

    for (key, value) in updates {
        write_bytes(&mut encoder, key)?;
        match value {
            Some(value) => {
                encoder.write_all(&[STORE])?;
                write_bytes(&mut encoder, value)?;
            }
            None => encoder.write_all(&[REMOVE])?,
        }
    }

    let mut frame = encoder.finish()?;

    let payload_len = (frame.len() - HEADER_LEN) as u64;
    frame[..HEADER_LEN].copy_from_slice(&payload_len.to_le_bytes());

    let crc = crc32fast::hash(&frame) ^ CRC_MASK;
    frame.extend_from_slice(&crc.to_le_bytes());

    Ok(frame)
}

fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(&(bytes.len() as u64).to_le_bytes())?;
    writer.write_all(bytes)
}

fn read_len<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_bytes<R: Read>(reader: &mut R) -> io::Result<InlineArray> {
    let len = read_len(reader)?;

    let mut buf = vec![];
    reader.take(len).read_to_end(&mut buf)?;

    if buf.len() as u64 != len {
        return Err(annotate!(io::Error::new(
            io::ErrorKind::InvalidData,
            "update is shorter than its recorded length",
        )));
    }

    Ok(InlineArray::from(&*buf))
}

fn read_frame<R: Read>(
    reader: &mut R,
    file_len: u64,
    buf: &mut Vec<u8>,
) -> io::Result<Vec<Update>> {
    let payload_len = maybe!(read_len(reader))?;
    if payload_len > file_len {
        return Err(annotate!(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame length exceeds file size",
        )));
    }
    let payload_len = payload_len as usize;

    buf.clear();
    buf.extend_from_slice(&(payload_len as u64).to_le_bytes());
    buf.resize(HEADER_LEN + payload_len + CRC_LEN, 0);
    maybe!(reader.read_exact(&mut buf[HEADER_LEN..]))?;

    let (checked, crc) = buf.split_at(HEADER_LEN + payload_len);
    let recorded = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);

    if crc32fast::hash(checked) ^ CRC_MASK != recorded {
        log::warn!("crc mismatch in bucket log frame");
        return Err(annotate!(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame failed its crc check",
        )));
    }

    let mut decoder = ZstdDecoder::new(&checked[HEADER_LEN..])?;
    let mut updates = vec![];

    loop {
        let key = match read_bytes(&mut decoder) {
            Ok(key) => key,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(updates);
            }
            Err(e) => return Err(e),
        };

        let mut kind = [0; 1];
        decoder.read_exact(&mut kind)?;

        let value = match kind[0] {
            STORE => Some(read_bytes(&mut decoder)?),
            REMOVE => None,
            other => {
                return Err(annotate!(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown update kind {other} in a frame that passed its crc check"),
                )));
            }
        };

        updates.push(Update { key, value });
    }
}

// A log may end in a torn frame that was never acknowledged, so reading
// stops there. A snapshot is renamed into place only after it is synced,
// so any bad frame in one is an error.
fn read_frames(path: &Path, strict: bool) -> io::Result<Vec<Vec<Update>>> {
    let file = fallible!(fs::File::open(path));
    let file_len = fallible!(file.metadata()).len();
    let mut reader = BufReader::new(file);

    let mut buf = vec![];
    let mut frames = vec![];

    loop {
        match read_frame(&mut reader, file_len, &mut buf) {
            Ok(frame) => frames.push(frame),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(frames);
            }
            Err(e) if strict => return Err(e),
            Err(e) => {
                log::warn!(
                    "dropping the tail of {:?} after an unreadable frame: {:?}",
                    path,
                    e
                );
                return Ok(frames);
            }
        }
    }
}

fn read_log(directory: &Path, lsn: u64) -> io::Result<Vec<Vec<Update>>> {
    let frames = read_frames(&log_path(directory, lsn), false)?;

    log::trace!("read {} frames from log {lsn}", frames.len());

    Ok(frames)
}

fn read_snapshot(directory: &Path, lsn: u64) -> io::Result<Index> {
    let mut index = Index::new();
    for update in read_frames(&snapshot_path(directory, lsn), true)?
        .into_iter()
        .flatten()
    {
        if let Some(value) = update.value {
            index.insert(update.key, value);
        }
    }

    log::trace!("read {} keys from snapshot {lsn}", index.len());

    Ok(index)
}

fn log_path(directory: &Path, lsn: u64) -> PathBuf {
    directory.join(format!("{lsn:016x}{LOG_SUFFIX}"))
}

fn snapshot_path(directory: &Path, lsn: u64) -> PathBuf {
    directory.join(format!("{lsn:016x}{SNAPSHOT_SUFFIX}"))
}

fn partial_snapshot_path(directory: &Path, lsn: u64) -> PathBuf {
    directory.join(format!("{lsn:016x}{SNAPSHOT_SUFFIX}{PARTIAL_SUFFIX}"))
}

fn parse_lsn(file_name: &str, suffix: &str) -> Option<u64> {
    let hex = file_name.strip_suffix(suffix)?;
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

/// Returns the logs newer than the latest snapshot along with that
/// snapshot, removing leftovers of interrupted compactions.
fn scan_directory(directory: &Path) -> io::Result<(BTreeSet<u64>, Option<u64>)> {
    let mut logs = BTreeSet::new();
    let mut snapshots = BTreeSet::new();

    for entry in fallible!(fs::read_dir(directory)) {
        let entry = fallible!(entry);
        let Ok(name) = entry.file_name().into_string() else {
            log::warn!(
                "ignoring non-unicode file {:?} in bucket directory",
                entry.file_name()
            );
            continue;
        };

        if name.ends_with(PARTIAL_SUFFIX) {
            log::warn!("removing partially written snapshot {name:?}");
            fallible!(fs::remove_file(entry.path()));
        } else if let Some(lsn) = parse_lsn(&name, LOG_SUFFIX) {
            logs.insert(lsn);
        } else if let Some(lsn) = parse_lsn(&name, SNAPSHOT_SUFFIX) {
            snapshots.insert(lsn);
        } else if name != LOCK_NOTICE {
            log::warn!("ignoring unexpected file {name:?} in bucket directory");
        }
    }

    let latest = snapshots.pop_last();
    for stale in snapshots {
        log::warn!("removing snapshot {stale} superseded by {latest:?}");
        fallible!(fs::remove_file(snapshot_path(directory, stale)));
    }

    let covered = latest.unwrap_or(0);
    let folded: Vec<u64> = logs.range(..=covered).copied().collect();
    for lsn in folded {
        log::warn!("removing log {lsn} already folded into snapshot {covered}");
        fallible!(fs::remove_file(log_path(directory, lsn)));
        logs.remove(&lsn);
    }

    Ok((logs, latest))
}

/// Applies `logs` in order over `snapshot` and persists the result as a
/// new snapshot named after the newest input. Inputs are removed once the
/// new snapshot is durable.
fn compact(
    directory: &Path,
    logs: BTreeSet<u64>,
    snapshot: Option<u64>,
    lock: &fs::File,
    zstd_level: i32,
) -> io::Result<Recovered> {
    let lsns: Vec<u64> = logs.into_iter().collect();

    let (base, frames) = rayon::join(
        || match snapshot {
            Some(lsn) => read_snapshot(directory, lsn),
            None => Ok(Index::new()),
        },
        || {
            lsns.par_iter()
                .map(|lsn| read_log(directory, *lsn))
                .collect::<io::Result<Vec<_>>>()
        },
    );

    let mut index = base?;
    for update in frames?.into_iter().flatten().flatten() {
        match update.value {
            Some(value) => {
                index.insert(update.key, value);
            }
            None => {
                index.remove(&update.key);
            }
        }
    }

    let lsn = lsns.last().copied().max(snapshot).unwrap_or(0);

    let frame = encode_frame(index.iter().map(|(k, v)| (k, Some(v))), zstd_level)?;
    let snapshot_len = frame.len() as u64;

    let partial = partial_snapshot_path(directory, lsn);
    let mut file = fallible!(fs::File::create(&partial));
    fallible!(file.write_all(&frame));
    fallible!(file.sync_all());
    drop(file);

    fallible!(fs::rename(&partial, snapshot_path(directory, lsn)));
    fallible!(lock.sync_all());

    log::trace!("wrote snapshot {lsn} holding {} keys", index.len());

    for folded in &lsns {
        fallible!(fs::remove_file(log_path(directory, *folded)));
    }
    if let Some(old) = snapshot.filter(|old| *old != lsn) {
        fallible!(fs::remove_file(snapshot_path(directory, old)));
    }

    Ok(Recovered { index, next_lsn: lsn + 1, snapshot_len })
}
