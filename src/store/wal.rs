use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;
use ulid::Ulid;

use crate::model::Event;

/// Length word before the payload plus CRC word after it.
const FRAME_OVERHEAD: u64 = 8;

/// Largest payload a frame may claim. Real events stay far below this (names
/// and notes are capped), so a bigger length word can only be damage.
const MAX_PAYLOAD: u32 = 64 * 1024;

/// One log frame: `[u32 le payload len][bincode Event][u32 le crc32(payload)]`.
fn frame(event: &Event) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD)
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "event too large for one frame"))?;
    let mut buf = Vec::with_capacity(payload.len() + FRAME_OVERHEAD as usize);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(buf)
}

enum Frame {
    /// A decoded event and the number of bytes its frame used.
    Intact(Event, u64),
    /// Clean end of file.
    End,
    /// Short, oversized or failing its checksum. Nothing after it is trusted.
    Damaged,
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn next_frame(reader: &mut impl BufRead) -> io::Result<Frame> {
    if reader.fill_buf()?.is_empty() {
        return Ok(Frame::End);
    }
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(Frame::Damaged);
    }
    let len = u32::from_le_bytes(word);
    if len > MAX_PAYLOAD {
        return Ok(Frame::Damaged);
    }
    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(Frame::Damaged);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(Frame::Damaged);
    }
    Ok(match bincode::deserialize(&payload) {
        Ok(event) => Frame::Intact(event, u64::from(len) + FRAME_OVERHEAD),
        Err(_) => Frame::Damaged,
    })
}

/// What a pass over the log file recovered.
#[derive(Default)]
struct Scan {
    events: Vec<Event>,
    /// Byte length of the leading run of intact frames.
    intact_len: u64,
    file_len: u64,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Scan::default()),
        Err(e) => return Err(e),
    };
    let mut scan = Scan {
        file_len: file.metadata()?.len(),
        ..Scan::default()
    };
    let mut reader = BufReader::new(file);
    while let Frame::Intact(event, size) = next_frame(&mut reader)? {
        scan.events.push(event);
        scan.intact_len += size;
    }
    Ok(scan)
}

/// Every building must be logged before its rooms, and every room before
/// anything scheduled or booked in it.
fn check_directory_order(events: &[Event]) -> io::Result<()> {
    let mut buildings: HashSet<Ulid> = HashSet::new();
    let mut rooms: HashSet<Ulid> = HashSet::new();
    for (index, event) in events.iter().enumerate() {
        let unknown = match event {
            Event::BuildingCreated { building } => {
                buildings.insert(building.id);
                None
            }
            Event::RoomCreated { room } => {
                rooms.insert(room.id);
                (!buildings.contains(&room.building_id)).then_some(room.building_id)
            }
            other => other.room_ids().into_iter().find(|id| !rooms.contains(id)),
        };
        if let Some(id) = unknown {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("log entry {index} refers to {id} before it was created"),
            ));
        }
    }
    Ok(())
}

fn append_handle(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append-only log of store mutations, one frame per `Event`.
///
/// Frames are buffered by `push` and become durable at the next `sync`, so a
/// writer can commit a whole batch with one fsync. A crash can leave at most a
/// damaged tail, which `recover` cuts off before appending resumes.
pub struct Wal {
    path: PathBuf,
    out: BufWriter<File>,
    appends_since_compact: u64,
}

impl Wal {
    /// Read every intact event at `path`, leaving the file untouched.
    /// A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let scan = scan(path)?;
        check_directory_order(&scan.events)?;
        Ok(scan.events)
    }

    /// Replay `path` and open it for appending. Bytes past the last intact
    /// frame are truncated so new frames are not stranded behind them.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let scan = scan(path)?;
        check_directory_order(&scan.events)?;
        if scan.intact_len < scan.file_len {
            warn!(
                "{}: dropping {} damaged bytes after {} intact events",
                path.display(),
                scan.file_len - scan.intact_len,
                scan.events.len()
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scan.intact_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            path: path.to_path_buf(),
            out: append_handle(path)?,
            appends_since_compact: 0,
        };
        Ok((wal, scan.events))
    }

    /// Buffer one frame. Not durable until `sync`.
    pub fn push(&mut self, event: &Event) -> io::Result<()> {
        self.out.write_all(&frame(event)?)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_data()
    }

    /// Replace the log with `events`, a minimal description of the current state.
    /// The new log is built and synced beside the old one, then renamed over it.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        check_directory_order(events)?;
        self.sync()?;
        let staging = self.path.with_extension("wal.compact");
        {
            let mut out = BufWriter::new(File::create(&staging)?);
            for event in events {
                out.write_all(&frame(event)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        self.out = append_handle(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}
