//! Binary encoding of sorted runs.
//!
//! A run file is a header followed by a sequence of batches and a terminator:
//!
//! ```text
//! file   := b"RUNF" u16(version) batch* u32(0)
//! batch  := u32(tuple_count > 0) tuple*
//! tuple  := u16(field_count) field*
//! field  := u8(tag) payload
//!           0 Null, 1 Int i64, 2 Float f64 bits, 3 String u32 len + utf8
//! ```
//!
//! All integers are little endian. The zero-count terminator is the only way
//! a run ends; a file that stops before it is reported as truncated.
use common::{Batch, Field, QueryError, Tuple};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const RUN_MAGIC: &[u8; 4] = b"RUNF";
pub const RUN_VERSION: u16 = 1;

const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_STRING: u8 = 3;

fn ser_err(path: &Path, msg: &str) -> QueryError {
    QueryError::SerializationError(format!("Run file {}: {}", path.display(), msg))
}

pub fn encode_tuple(tuple: &Tuple, buf: &mut Vec<u8>) -> Result<(), QueryError> {
    let count = u16::try_from(tuple.len()).map_err(|_| {
        QueryError::SerializationError(format!("Tuple with {} fields is too wide", tuple.len()))
    })?;
    buf.extend_from_slice(&count.to_le_bytes());
    for field in tuple.field_vals() {
        match field {
            Field::Null => buf.push(TAG_NULL),
            Field::Int(i) => {
                buf.push(TAG_INT);
                buf.extend_from_slice(&i.to_le_bytes());
            }
            Field::Float(f) => {
                buf.push(TAG_FLOAT);
                buf.extend_from_slice(&f.to_bits().to_le_bytes());
            }
            Field::String(s) => {
                let len = u32::try_from(s.len()).map_err(|_| {
                    QueryError::SerializationError("String field too long".to_string())
                })?;
                buf.push(TAG_STRING);
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
        }
    }
    Ok(())
}

/// Writes one run. The file is only complete once [`RunWriter::finish`]
/// has written the terminator.
pub struct RunWriter {
    path: PathBuf,
    out: BufWriter<File>,
    buf: Vec<u8>,
}

impl RunWriter {
    pub fn create(path: &Path) -> Result<Self, QueryError> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        out.write_all(RUN_MAGIC)?;
        out.write_all(&RUN_VERSION.to_le_bytes())?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
            buf: Vec::new(),
        })
    }

    /// Append a batch. Empty batches are skipped since a zero count marks the
    /// end of the run.
    pub fn write_batch(&mut self, batch: &Batch) -> Result<(), QueryError> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = u32::try_from(batch.len())
            .map_err(|_| ser_err(&self.path, "batch too large"))?;
        self.buf.clear();
        self.buf.extend_from_slice(&count.to_le_bytes());
        for tuple in batch.iter() {
            encode_tuple(tuple, &mut self.buf)?;
        }
        self.out.write_all(&self.buf)?;
        Ok(())
    }

    /// Write the terminator and flush the file.
    pub fn finish(mut self) -> Result<PathBuf, QueryError> {
        self.out.write_all(&0u32.to_le_bytes())?;
        self.out.flush()?;
        Ok(self.path)
    }
}

/// Write `batches` as a complete run at `path`.
///
/// On failure the partial file is removed, so a caller never has to track a
/// half-written run.
pub fn write_run<'a, I>(path: &Path, batches: I) -> Result<(), QueryError>
where
    I: IntoIterator<Item = &'a Batch>,
{
    let res = RunWriter::create(path).and_then(|mut writer| {
        for batch in batches {
            writer.write_batch(batch)?;
        }
        writer.finish()
    });
    if let Err(e) = res {
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

/// Streams the batches of a run file, one page at a time.
pub struct RunReader {
    path: PathBuf,
    input: BufReader<File>,
    page_capacity: usize,
    done: bool,
}

impl RunReader {
    /// Open a run and check its header. `page_capacity` is the largest batch
    /// the reader accepts.
    pub fn open(path: &Path, page_capacity: usize) -> Result<Self, QueryError> {
        let file = File::open(path).map_err(|e| {
            QueryError::IOError(format!("Unable to open run file {}: {}", path.display(), e))
        })?;
        let mut reader = Self {
            path: path.to_path_buf(),
            input: BufReader::new(file),
            page_capacity,
            done: false,
        };
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != RUN_MAGIC {
            return Err(ser_err(path, "bad magic"));
        }
        let version = reader.read_u16()?;
        if version != RUN_VERSION {
            return Err(ser_err(path, &format!("unsupported version {}", version)));
        }
        Ok(reader)
    }

    /// Next batch of the run, or `None` once the terminator was read.
    pub fn next_batch(&mut self) -> Result<Option<Batch>, QueryError> {
        if self.done {
            return Ok(None);
        }
        let count = self.read_u32()? as usize;
        if count == 0 {
            self.done = true;
            return Ok(None);
        }
        if count > self.page_capacity {
            return Err(ser_err(
                &self.path,
                &format!("batch of {} exceeds page of {}", count, self.page_capacity),
            ));
        }
        let mut tuples = Vec::with_capacity(count);
        for _ in 0..count {
            tuples.push(self.read_tuple()?);
        }
        Batch::from_tuples(self.page_capacity, tuples)
            .map(Some)
            .map_err(|e| ser_err(&self.path, &e.to_string()))
    }

    fn read_tuple(&mut self) -> Result<Tuple, QueryError> {
        let count = self.read_u16()? as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let mut tag = [0u8; 1];
            self.read_exact(&mut tag)?;
            let field = match tag[0] {
                TAG_NULL => Field::Null,
                TAG_INT => {
                    let mut bytes = [0u8; 8];
                    self.read_exact(&mut bytes)?;
                    Field::Int(i64::from_le_bytes(bytes))
                }
                TAG_FLOAT => {
                    let mut bytes = [0u8; 8];
                    self.read_exact(&mut bytes)?;
                    Field::Float(f64::from_bits(u64::from_le_bytes(bytes)))
                }
                TAG_STRING => {
                    let len = self.read_u32()? as usize;
                    let mut bytes = vec![0u8; len];
                    self.read_exact(&mut bytes)?;
                    let s = String::from_utf8(bytes)
                        .map_err(|_| ser_err(&self.path, "invalid utf-8 string"))?;
                    Field::String(s)
                }
                other => return Err(ser_err(&self.path, &format!("unknown field tag {}", other))),
            };
            fields.push(field);
        }
        Ok(Tuple::new(fields))
    }

    fn read_u16(&mut self) -> Result<u16, QueryError> {
        let mut bytes = [0u8; 2];
        self.read_exact(&mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_u32(&mut self) -> Result<u32, QueryError> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), QueryError> {
        self.input.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ser_err(&self.path, "truncated"),
            _ => QueryError::from(e),
        })
    }
}
