//! Capture container writer.
//!
//! A capture file is the 32-byte [`CaptureHeader`](crate::header::CaptureHeader)
//! followed by framed records in arrival order. Records carry no checksum;
//! readers validate by structural consistency only.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::clock::MonotonicClock;
use crate::header::CaptureHeader;
use crate::message::{Message, MAX_SUBJECT_LEN};
use crate::{Error, Result};

/// Write side of a capture backend. The native format lives here; an
/// alternate container plugs in behind this trait.
pub trait ContainerWriter: Send {
    /// Appends one record and returns its on-wire size in bytes.
    fn write(&mut self, msg: &Message) -> Result<u64>;
    /// Forces buffered records to the OS.
    fn flush(&mut self) -> Result<()>;
    fn start_time_ns(&self) -> u64;
}

/// Appends framed records to a capture file through a buffered writer.
#[derive(Debug)]
pub struct CaptureWriter {
    out: BufWriter<File>,
    start_time_ns: u64,
}

impl CaptureWriter {
    /// Creates the file, stamps the capture start from the monotonic clock
    /// and writes the header. The file is valid (if empty) from this point.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| Error::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let start_time_ns = MonotonicClock::new().now_ns();
        let mut out = BufWriter::new(file);
        out.write_all(&CaptureHeader::new(start_time_ns).to_bytes())?;
        Ok(Self { out, start_time_ns })
    }
}

impl ContainerWriter for CaptureWriter {
    fn write(&mut self, msg: &Message) -> Result<u64> {
        if msg.subject.is_empty() {
            return Err(Error::BadArgs("subject must not be empty"));
        }
        if msg.subject.len() > MAX_SUBJECT_LEN {
            return Err(Error::BadArgs("subject too long"));
        }
        let payload_size = u32::try_from(msg.payload.len())
            .map_err(|_| Error::BadArgs("payload too large"))?;
        let subject_len = (msg.subject.len() + 1) as u16;

        self.out.write_all(&msg.sent_ns.to_le_bytes())?;
        self.out.write_all(&msg.received_ns.to_le_bytes())?;
        self.out.write_all(&subject_len.to_le_bytes())?;
        self.out.write_all(&payload_size.to_le_bytes())?;
        self.out.write_all(msg.subject.as_bytes())?;
        self.out.write_all(&[0u8])?;
        self.out.write_all(&msg.payload)?;
        Ok(msg.wire_size())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    fn start_time_ns(&self) -> u64 {
        self.start_time_ns
    }
}
