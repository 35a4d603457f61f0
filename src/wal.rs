use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Append-only journal of booking events.
///
/// Record layout: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` counts the bincode payload only, not the trailing CRC.
/// - A record torn by a crash mid-write fails the length or CRC check on
///   the next open and is dropped along with everything after it.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    records_since_snapshot: u64,
}

impl Journal {
    /// Open (or create) the journal at `path` and replay whatever it holds.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let events = load(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        // Count the replayed records so a journal that grew long before a
        // restart still qualifies for compaction right away.
        let journal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            records_since_snapshot: events.len() as u64,
        };
        Ok((journal, events))
    }

    /// Stage one event in the write buffer without flushing or syncing.
    /// `commit()` after the batch makes every staged record durable at once.
    pub fn buffer(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.records_since_snapshot += 1;
        Ok(())
    }

    /// Flush staged records and fsync the underlying file.
    pub fn commit(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Buffer and commit a single event. Test convenience; production code
    /// batches several `buffer` calls per `commit`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.buffer(event)?;
        self.commit()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_since_snapshot(&self) -> u64 {
        self.records_since_snapshot
    }

    /// Write a snapshot of `events` to a temp file next to the journal and
    /// fsync it. This is the slow I/O phase; it needs no exclusive access.
    pub fn write_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live journal and reopen the write handle.
    /// Fast; runs on the task that owns the journal.
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.records_since_snapshot = 0;
        Ok(())
    }

    /// Both snapshot phases back to back. Used by tests.
    #[cfg(test)]
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_snapshot(&self.path, events)?;
        self.install_snapshot()
    }
}

/// Encode a single record as `[len][bincode][crc32]`.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Decode one record, or `None` at the end of the journal. A torn or
/// corrupt record also yields `None`: nothing after it can be trusted.
fn read_record(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    if !fill(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? {
        return Ok(None);
    }

    let mut crc_buf = [0u8; 4];
    if !fill(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }

    Ok(bincode::deserialize(&payload).ok())
}

/// `read_exact` that reports a clean or mid-buffer EOF as `false`.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn load(path: &Path) -> io::Result<Vec<Event>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    while let Some(event) = read_record(&mut reader)? {
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;
    use rust_decimal_macros::dec;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("reservd_wal_tests");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn created(space_id: Ulid, start: i64, end: i64) -> Event {
        Event::BookingCreated {
            id: Ulid::new(),
            space_id,
            user_id: Ulid::new(),
            span: Span::new(start, end),
            amount: dec!(25.00),
            at: start,
        }
    }

    #[test]
    fn open_replays_appends() {
        let path = tmp_path("open_replays_appends.wal");
        let _ = fs::remove_file(&path);

        let space_id = Ulid::new();
        let first = created(space_id, 1_000, 2_000);
        let second = Event::BookingCanceled {
            id: Ulid::new(),
            space_id,
            at: 1_500,
        };

        {
            let (mut journal, events) = Journal::open(&path).unwrap();
            assert!(events.is_empty());
            journal.append(&first).unwrap();
            journal.append(&second).unwrap();
        }

        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed, vec![first, second]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let _ = fs::remove_file(&path);

        let event = created(Ulid::new(), 5_000, 9_000);
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&event).unwrap();
        }

        // Simulate a crash mid-write: partial length prefix plus a few bytes.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed, vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let good = created(Ulid::new(), 1_000, 2_000);
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&good).unwrap();
        }

        // Hand-write a record whose CRC does not match its payload.
        {
            let bad = created(Ulid::new(), 3_000, 4_000);
            let payload = bincode::serialize(&bad).unwrap();
            let len = payload.len() as u32;
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed, vec![good]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        let _ = fs::remove_file(&path);
        let (_, replayed) = Journal::open(&path).unwrap();
        assert!(replayed.is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn snapshot_shrinks_journal() {
        let path = tmp_path("snapshot_shrinks.wal");
        let _ = fs::remove_file(&path);

        let space_id = Ulid::new();
        let survivor = created(space_id, 100_000, 200_000);

        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&survivor).unwrap();
            // Churn: bookings created and immediately canceled.
            for i in 0..10 {
                let e = created(space_id, 300_000 + i * 10_000, 305_000 + i * 10_000);
                let id = match e {
                    Event::BookingCreated { id, .. } => id,
                    _ => unreachable!(),
                };
                journal.append(&e).unwrap();
                journal
                    .append(&Event::BookingCanceled { id, space_id, at: 0 })
                    .unwrap();
            }
        }

        let before = fs::metadata(&path).unwrap().len();
        assert!(before > 0);

        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.rewrite(std::slice::from_ref(&survivor)).unwrap();
            assert_eq!(journal.records_since_snapshot(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "snapshot should shrink the journal: {after} < {before}");

        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed, vec![survivor]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_after_snapshot() {
        let path = tmp_path("append_after_snapshot.wal");
        let _ = fs::remove_file(&path);

        let space_id = Ulid::new();
        let base = created(space_id, 10_000, 20_000);
        let tail = created(space_id, 30_000, 40_000);

        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&base).unwrap();
            journal.rewrite(std::slice::from_ref(&base)).unwrap();
            journal.append(&tail).unwrap();
        }

        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed, vec![base, tail]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffer_counts_until_commit() {
        let path = tmp_path("buffer_counts.wal");
        let _ = fs::remove_file(&path);

        let events: Vec<Event> = (0..5)
            .map(|i| created(Ulid::new(), 1_000 + i * 10_000, 5_000 + i * 10_000))
            .collect();

        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            for e in &events {
                journal.buffer(e).unwrap();
            }
            assert_eq!(journal.records_since_snapshot(), 5);
            journal.commit().unwrap();
        }

        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }
}
