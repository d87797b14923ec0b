use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Append-only log of swap request events; the durable store behind the engine.
///
/// Frame layout: `[u32 le: len][bincode: Event][u32 le: crc32(payload)]`.
/// A torn or corrupt frame ends the readable log; everything after it is
/// discarded on recovery.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length as of the last successful `flush_sync`.
    committed_len: u64,
    uncommitted_bytes: u64,
    uncommitted_appends: u64,
    /// Set while a rollback is incomplete; the next append retries it.
    needs_rollback: bool,
}

/// Result of scanning a WAL file.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the readable prefix.
    pub valid_len: u64,
}

/// Write one frame, returning its size in bytes.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// The next event and its frame size in bytes. `Ok(None)` at a clean end of
/// file or at the first unreadable frame.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_or_eof(reader, &mut payload)? || !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|event| (event, len as u64 + 8)))
}

/// Fill `buf` completely; false if the file ends first.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

impl Wal {
    /// Open (or create) the WAL at `path` for appending, as is.
    pub fn open(path: &Path) -> io::Result<Self> {
        let writer = open_append(path)?;
        let committed_len = writer.get_ref().metadata()?.len();
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            uncommitted_bytes: 0,
            uncommitted_appends: 0,
            needs_rollback: false,
        })
    }

    /// Replay the WAL, cut off any unreadable tail so new frames land right
    /// after the last good one, and open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Vec<Event>, Self)> {
        let replay = Self::scan(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > replay.valid_len
        {
            warn!(
                path = %path.display(),
                dropped_bytes = meta.len() - replay.valid_len,
                "truncating unreadable WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self::open(path)?;
        Ok((replay.events, wal))
    }

    /// Append and fsync one event. The engine goes through
    /// `append_buffered` + `flush_sync` for group commit instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one frame; durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.needs_rollback {
            self.rollback()?;
        }
        let written = write_frame(&mut self.writer, event);
        self.uncommitted_appends += 1;
        self.appends_since_compact += 1;
        self.uncommitted_bytes += written?;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len += self.uncommitted_bytes;
        self.uncommitted_bytes = 0;
        self.uncommitted_appends = 0;
        Ok(())
    }

    /// Drop every frame written since the last successful `flush_sync`,
    /// whether still buffered or already on disk. After a failed batch this
    /// keeps frames the caller was told failed from being replayed.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.needs_rollback = true;
        let file = self.writer.get_ref().try_clone()?;
        // into_parts hands back the buffer instead of flushing it on drop.
        let _discarded = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        self.appends_since_compact -= self.uncommitted_appends;
        self.uncommitted_appends = 0;
        self.uncommitted_bytes = 0;

        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        self.needs_rollback = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a replacement log next to the WAL and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::tmp_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the replacement over the WAL and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let writer = open_append(&self.path)?;
        self.committed_len = writer.get_ref().metadata()?.len();
        self.writer = writer;
        self.appends_since_compact = 0;
        self.uncommitted_bytes = 0;
        self.uncommitted_appends = 0;
        self.needs_rollback = false;
        Ok(())
    }

    /// Both compaction phases in one call.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every readable event, in order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.events)
    }

    pub fn scan(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        while let Some((event, frame_len)) = read_frame(&mut reader)? {
            replay.valid_len += frame_len;
            replay.events.push(event);
        }
        Ok(replay)
    }
}
