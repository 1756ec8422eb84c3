//! `nd-flat` - Byte-level persistence boundary for nd-buffer.
//!
//! A buffer is persisted as its `(element type, length, bytes)` record and
//! rebuilt from the same record. Records are framed with a small
//! little-endian header so several can share one stream.

pub mod error;
pub mod record;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nd_buffer::{Buffer, TypedBuffer};

pub use error::{FlatError, Result};
pub use record::{BufferRecord, RECORD_HEADER_LEN, RECORD_MAGIC, RECORD_VERSION};

/// Write `buffers` to `path` as consecutive framed records.
pub fn save_buffers<P: AsRef<Path>>(path: P, buffers: &[&dyn TypedBuffer]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for buffer in buffers {
        BufferRecord::from_buffer(*buffer)?.write_to(&mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read every record in `path` and rebuild the buffers in order.
pub fn load_buffers<P: AsRef<Path>>(path: P) -> Result<Vec<Buffer>> {
    let file = File::open(path)?;
    let total = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut consumed = 0u64;
    let mut buffers = Vec::new();
    while consumed < total {
        let record = BufferRecord::read_from(&mut reader)?;
        consumed += record.encoded_len() as u64;
        buffers.push(record.into_buffer()?);
    }
    Ok(buffers)
}
