use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode one committed transaction as a frame: `[len][bincode Vec<Event>][crc32]`.
/// Returns the encoded size in bytes.
fn encode_frame(writer: &mut impl Write, events: &[Event]) -> io::Result<u64> {
    let payload =
        bincode::serialize(events).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(8 + u64::from(len))
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn end of file.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of hold transactions.
///
/// Format per frame: `[u32: len][bincode: Vec<Event>][u32: crc32]`
/// - One frame per committed transaction, so a transaction replays entirely or not at all.
/// - A truncated or corrupt trailing frame (crash mid-write) is discarded on replay.
/// - After a failed write or fsync, the file is cut back to the last synced
///   length before anything else is appended.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length covered by the last successful `flush_sync`.
    synced_len: u64,
    /// Bytes handed to `writer` since then.
    unsynced_len: u64,
    synced_appends: u64,
    /// Set while unsynced bytes of a failed write may still be on disk.
    poisoned: bool,
}

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

impl Wal {
    /// Open for appending. A torn or corrupt tail is cut off first so new
    /// frames never land behind bytes that replay would stop at.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Ok(meta) = fs::metadata(path) {
            let (_, valid_len) = Self::scan(path)?;
            if meta.len() > valid_len {
                tracing::warn!(
                    path = %path.display(),
                    dropped_bytes = meta.len() - valid_len,
                    "truncating torn WAL tail"
                );
                OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            synced_len,
            unsynced_len: 0,
            synced_appends: 0,
            poisoned: false,
        })
    }

    /// Append one frame and fsync. Production code batches via
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, events: &[Event]) -> io::Result<()> {
        self.append_buffered(events)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, events: &[Event]) -> io::Result<()> {
        if self.poisoned {
            self.discard_unsynced()?;
        }
        self.unsynced_len += encode_frame(&mut self.writer, events)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.unsynced_len;
        self.unsynced_len = 0;
        self.synced_appends = self.appends_since_compact;
        Ok(())
    }

    /// Drop every frame appended since the last successful `flush_sync`, from
    /// the buffer and from disk. Call after a failed append or flush, before
    /// reporting the failure, so the file only holds acknowledged frames.
    pub fn discard_unsynced(&mut self) -> io::Result<()> {
        self.poisoned = true;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(self.synced_len)?;
        file.sync_all()?;
        // `into_parts` drops the buffered bytes instead of flushing them.
        let (_, _unwritten) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        self.unsynced_len = 0;
        self.appends_since_compact = self.synced_appends;
        self.poisoned = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted event set to a temp file next to the WAL and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_frame(&mut writer, std::slice::from_ref(event))?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the WAL and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.unsynced_len = 0;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.synced_appends = 0;
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning the events of every intact frame in order.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Self::scan(path).map(|(events, _)| events)
    }

    /// Events of every intact frame, plus the byte length they occupy.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                tracing::warn!(path = %path.display(), len, "oversized WAL frame, stopping replay");
                break;
            }

            let mut payload = vec![0u8; len];
            if !read_or_eof(&mut reader, &mut payload)? {
                break;
            }

            let mut crc_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(path = %path.display(), "corrupt WAL frame, stopping replay");
                break;
            }

            match bincode::deserialize::<Vec<Event>>(&payload) {
                Ok(frame) => events.extend(frame),
                Err(_) => break,
            }
            valid_len += 8 + len as u64;
        }

        Ok((events, valid_len))
    }
}
