//! The backup container: a tar stream compressed with zstd.
//!
//! Encoding runs on a worker thread. [`ArchiveWriter`] hands it entry headers and content
//! chunks through a bounded channel, so a slow disk or encoder throttles the network side
//! instead of letting messages pile up in memory.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use tar::{EntryType, Header};

use crate::error::{Result, WriteError};
use crate::types::MessageHeader;

/// Default size of the chunks content is read and queued in.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Default number of chunks that may wait for the encoder.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

const FILE_MODE: u32 = 0o644;
const DIRECTORY_MODE: u32 = 0o755;

/// How the archive is encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// zstd level, 1 (fast) to 22 (small).
    pub compression_level: i32,
    /// Size of content chunks, also used for reading message literals off the wire.
    pub block_size: usize,
    /// Chunks that may be queued for the encoder before the producer blocks.
    pub queue_depth: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            block_size: DEFAULT_BLOCK_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// The header of one file in the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive, `/`-separated.
    pub path: String,
    /// Exact content length in bytes.
    pub len: u64,
    /// Modification time in seconds since the epoch.
    pub mtime: u64,
}

impl ArchiveEntry {
    /// An entry with the given header values.
    pub fn new<P: Into<String>>(path: P, len: u64, mtime: u64) -> Self {
        ArchiveEntry {
            path: path.into(),
            len,
            mtime,
        }
    }

    /// The entry for a message of the mailbox stored under `mailbox_path`: named after its
    /// UID and dated by its internal date (the epoch when the server gave none).
    pub fn message(mailbox_path: &str, header: &MessageHeader) -> Self {
        let mtime = header
            .internal_date
            .map(|date| date.timestamp().max(0) as u64)
            .unwrap_or(0);
        ArchiveEntry::new(
            format!("{}/{}.eml", mailbox_path, header.uid()),
            header.len,
            mtime,
        )
    }
}

enum Job {
    File { path: String, len: u64, mtime: u64 },
    Chunk(Vec<u8>),
    Directory { path: String },
    Finish,
}

/// Feeds the content of the current file from the channel to `tar::Builder::append_data`.
struct ChunkReader<'a> {
    jobs: &'a Receiver<Job>,
    remaining: u64,
    current: Vec<u8>,
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    fn new(jobs: &'a Receiver<Job>, len: u64) -> Self {
        ChunkReader {
            jobs,
            remaining: len,
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChunkReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.current.len() {
            if self.remaining == 0 {
                return Ok(0);
            }
            match self.jobs.recv() {
                Ok(Job::Chunk(chunk)) => {
                    if chunk.len() as u64 > self.remaining {
                        return Err(io::Error::new(
                            ErrorKind::InvalidData,
                            "entry content longer than its header",
                        ));
                    }
                    self.remaining -= chunk.len() as u64;
                    self.current = chunk;
                    self.pos = 0;
                }
                Ok(_) => {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        "entry content shorter than its header",
                    ))
                }
                Err(_) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "archive producer went away mid-entry",
                    ))
                }
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn header(entry_type: EntryType, mode: u32, len: u64, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(len);
    header.set_mtime(mtime);
    header
}

fn encode(file: File, level: i32, jobs: Receiver<Job>) -> io::Result<()> {
    let encoder = zstd::stream::write::Encoder::new(file, level)?;
    let mut builder = tar::Builder::new(encoder);
    loop {
        match jobs.recv() {
            Ok(Job::File { path, len, mtime }) => {
                let mut header = header(EntryType::Regular, FILE_MODE, len, mtime);
                builder.append_data(&mut header, &path, ChunkReader::new(&jobs, len))?;
            }
            Ok(Job::Directory { path }) => {
                let mut header = header(EntryType::Directory, DIRECTORY_MODE, 0, 0);
                builder.append_data(&mut header, &path, io::empty())?;
            }
            Ok(Job::Chunk(_)) => {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    "content chunk outside of an entry",
                ))
            }
            Ok(Job::Finish) => break,
            Err(_) => {
                return Err(io::Error::new(
                    ErrorKind::Other,
                    "archive abandoned before it was finished",
                ))
            }
        }
    }
    let file = builder.into_inner()?.finish()?;
    file.sync_all()
}

/// Streams entries into a `.tar.zst` file.
///
/// Entries appear in the archive in the order they are appended. [`finish`] writes the tar
/// trailer and the end of the zstd frame and syncs the file; if that fails the partial file
/// is removed. Dropping a writer without finishing it does the same.
///
/// [`finish`]: ArchiveWriter::finish
pub struct ArchiveWriter {
    path: PathBuf,
    block_size: usize,
    jobs: Option<SyncSender<Job>>,
    worker: Option<JoinHandle<io::Result<()>>>,
    entries: u64,
    bytes: u64,
    finished: bool,
}

impl ArchiveWriter {
    /// Create (or truncate) the archive at `path` and start the encoder.
    pub fn create<P: AsRef<Path>>(path: P, options: &ArchiveOptions) -> Result<ArchiveWriter> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(WriteError::Io)?;
        let (jobs, queue) = sync_channel(options.queue_depth.max(1));
        let level = options.compression_level;
        let worker = thread::Builder::new()
            .name("archive-encoder".to_string())
            .spawn(move || encode(file, level, queue))
            .map_err(WriteError::Io)?;
        debug!("writing archive to {}", path.display());

        Ok(ArchiveWriter {
            path,
            block_size: options.block_size.max(1),
            jobs: Some(jobs),
            worker: Some(worker),
            entries: 0,
            bytes: 0,
            finished: false,
        })
    }

    /// The file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries appended so far, directories included.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Content bytes appended so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    // the worker only hangs up after an I/O error, which is the one worth reporting
    fn worker_error(&mut self) -> WriteError {
        self.jobs = None;
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(Err(e))) => WriteError::Io(e),
            _ => WriteError::WorkerGone,
        }
    }

    fn send(&mut self, job: Job) -> Result<()> {
        let sent = match self.jobs {
            Some(ref jobs) => jobs.send(job).is_ok(),
            None if self.finished => return Err(WriteError::Finished.into()),
            None => return Err(WriteError::WorkerGone.into()),
        };
        if sent {
            Ok(())
        } else {
            Err(self.worker_error().into())
        }
    }

    /// Append a file whose content is read from `content`.
    ///
    /// Exactly `entry.len` bytes end up in the archive. If `content` runs dry (or fails)
    /// early, the rest is filled with zeroes so the archive stays readable, and
    /// [`WriteError::ShortContent`] (or the read error) is returned.
    pub fn append_entry<R: Read>(&mut self, entry: &ArchiveEntry, content: R) -> Result<()> {
        self.send(Job::File {
            path: entry.path.clone(),
            len: entry.len,
            mtime: entry.mtime,
        })?;
        self.entries += 1;

        let mut content = content.take(entry.len);
        let mut remaining = entry.len;
        let mut failure = None;
        while remaining > 0 {
            let mut chunk = vec![0; remaining.min(self.block_size as u64) as usize];
            let n = match content.read(&mut chunk) {
                Ok(n) => n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(e);
                    0
                }
            };
            if n == 0 {
                break;
            }
            chunk.truncate(n);
            self.send(Job::Chunk(chunk))?;
            remaining -= n as u64;
        }

        let written = entry.len - remaining;
        self.bytes += written;
        if remaining == 0 {
            return Ok(());
        }

        warn!(
            "{} ended after {} of {} bytes, padding",
            entry.path, written, entry.len
        );
        while remaining > 0 {
            let pad = remaining.min(self.block_size as u64);
            self.send(Job::Chunk(vec![0; pad as usize]))?;
            remaining -= pad;
        }
        match failure {
            Some(e) => Err(WriteError::Io(e).into()),
            None => Err(WriteError::ShortContent {
                path: entry.path.clone(),
                expected: entry.len,
                written,
            }
            .into()),
        }
    }

    /// Append a directory entry, standing for a mailbox that has no files of its own.
    pub fn append_directory(&mut self, path: &str) -> Result<()> {
        self.send(Job::Directory {
            path: path.to_string(),
        })?;
        self.entries += 1;
        Ok(())
    }

    /// Append a small text file.
    pub fn append_note(&mut self, path: &str, text: &str) -> Result<()> {
        let entry = ArchiveEntry::new(path, text.len() as u64, 0);
        self.append_entry(&entry, text.as_bytes())
    }

    /// Write the trailers and sync the file to disk.
    pub fn finish(mut self) -> Result<()> {
        self.finalize()
    }

    fn finalize(&mut self) -> Result<()> {
        self.finished = true;
        if let Some(jobs) = self.jobs.take() {
            // a failed send shows up as the worker's error below
            let _ = jobs.send(Job::Finish);
        }
        let outcome = match self.worker.take().map(JoinHandle::join) {
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(WriteError::Io(e)),
            _ => Err(WriteError::WorkerGone),
        };

        match outcome {
            Ok(()) => {
                debug!(
                    "archive {} complete: {} entries, {} bytes",
                    self.path.display(),
                    self.entries,
                    self.bytes
                );
                Ok(())
            }
            Err(e) => {
                warn!("removing unfinished archive {}: {}", self.path.display(), e);
                if let Err(remove) = fs::remove_file(&self.path) {
                    warn!("could not remove {}: {}", self.path.display(), remove);
                }
                Err(e.into())
            }
        }
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finalize() {
                warn!("archive could not be finalized: {}", e);
            }
        }
    }
}
