//! Capture container reader.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::header::{CaptureHeader, HEADER_SIZE, RECORD_HEADER_SIZE};
use crate::message::Message;
use crate::{Error, Result};

/// Read side of a capture backend; see [`ContainerWriter`](crate::writer::ContainerWriter).
pub trait ContainerReader {
    /// Returns the next record, or `None` at clean end-of-file. A record cut
    /// short mid-frame is `Error::BadFormat`, not end-of-file.
    fn next(&mut self) -> Result<Option<Message>>;
    fn start_time_ns(&self) -> u64;
}

/// Streams records sequentially from a capture file.
pub struct CaptureReader {
    input: BufReader<File>,
    header: CaptureHeader,
}

impl CaptureReader {
    /// Opens the file and validates the header, leaving the cursor at the
    /// first record.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let mut input = BufReader::new(file);
        let mut buf = [0u8; HEADER_SIZE];
        input
            .read_exact(&mut buf)
            .map_err(|err| map_eof(err, "truncated header"))?;
        let header = CaptureHeader::from_bytes(&buf)?;
        Ok(Self { input, header })
    }
}

impl ContainerReader for CaptureReader {
    fn next(&mut self) -> Result<Option<Message>> {
        let mut prefix = [0u8; RECORD_HEADER_SIZE];
        if !fill_or_eof(&mut self.input, &mut prefix)? {
            return Ok(None);
        }
        let sent_ns = u64::from_le_bytes(prefix[0..8].try_into().expect("slice length"));
        let received_ns = u64::from_le_bytes(prefix[8..16].try_into().expect("slice length"));
        let subject_len = u16::from_le_bytes(prefix[16..18].try_into().expect("slice length"));
        let payload_size = u32::from_le_bytes(prefix[18..22].try_into().expect("slice length"));

        if subject_len < 2 {
            // At minimum one content byte plus the NUL terminator.
            return Err(Error::BadFormat("empty subject"));
        }

        let mut subject_buf = vec![0u8; subject_len as usize];
        self.input
            .read_exact(&mut subject_buf)
            .map_err(|err| map_eof(err, "truncated record"))?;
        if subject_buf.pop() != Some(0) {
            return Err(Error::BadFormat("subject missing terminator"));
        }
        let subject =
            String::from_utf8(subject_buf).map_err(|_| Error::BadFormat("subject not utf-8"))?;

        let mut payload = vec![0u8; payload_size as usize];
        self.input
            .read_exact(&mut payload)
            .map_err(|err| map_eof(err, "truncated record"))?;

        Ok(Some(Message {
            sent_ns,
            received_ns,
            subject,
            payload,
        }))
    }

    fn start_time_ns(&self) -> u64 {
        self.header.start_time_ns
    }
}

/// Fills `buf` completely, or reports clean end-of-file when no byte of it
/// exists. A partial fill is a truncation error.
fn fill_or_eof(input: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(Error::BadFormat("truncated record")),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(Error::Io(err)),
        }
    }
    Ok(true)
}

fn map_eof(err: io::Error, what: &'static str) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::BadFormat(what)
    } else {
        Error::Io(err)
    }
}
