//! Splitting of a raw dump stream into session records
//!
//! Every record starts with a `session info:` line. The dump is terminated by a
//! `total session N` footer, or records are separated by blank lines when the
//! dump was produced by several commands concatenated together.

use std::io::{self, ErrorKind, Read};
use std::ops::Range;
use tracing::trace;

const MARKER: &[u8] = b"\nsession info:";
const SENTINELS: [&[u8]; 3] = [b"\ntotal session", b"\n\n", b"\n\r\n"];

const READ_CHUNK: usize = 64 * 1024;
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

/// Decision taken for the front of the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Split {
    /// Nothing can be decided yet, read more data
    NeedMore,
    /// Drop this many leading bytes without producing a record
    Skip(usize),
    /// `range` of the buffer is one record; consume `advance` bytes
    Record { advance: usize, range: Range<usize> },
}

/// Decides what to do with the front of `data`.
///
/// The result only depends on the bytes seen, never on where the previous
/// read happened to end.
pub fn split(data: &[u8], at_eof: bool) -> Split {
    let start = match find(data, MARKER) {
        Some(pos) => pos,
        None if data.len() <= MARKER.len() => return Split::NeedMore,
        None => return Split::Skip(data.len() - MARKER.len()),
    };

    if start > 0 {
        return Split::Skip(start);
    }

    match find(&data[1..], MARKER).map(|pos| pos + 1) {
        Some(next) => match first_sentinel(&data[..=next]) {
            // a blank line or footer closes the record before the next one starts
            Some(end) => Split::Record {
                advance: end + 1,
                range: 1..end + 1,
            },
            None => Split::Record {
                advance: next,
                range: 1..next + 1,
            },
        },
        None => match first_sentinel(data) {
            Some(end) => Split::Record {
                advance: end + 1,
                range: 1..end + 1,
            },
            None if at_eof => Split::Record {
                advance: data.len(),
                range: 1..data.len(),
            },
            None => Split::NeedMore,
        },
    }
}

fn first_sentinel(data: &[u8]) -> Option<usize> {
    SENTINELS
        .iter()
        .filter_map(|sentinel| find(&data[1..], sentinel).map(|pos| pos + 1))
        .min()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Iterator over the records of a byte stream
pub struct RecordReader<R> {
    inner: R,
    buf: Vec<u8>,
    start: usize,
    eof: bool,
    failed: bool,
    max_record_bytes: usize,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_record_bytes(inner, DEFAULT_MAX_RECORD_BYTES)
    }

    pub fn with_max_record_bytes(inner: R, max_record_bytes: usize) -> Self {
        RecordReader {
            inner,
            // lets a marker on the very first line be found
            buf: b"\n".to_vec(),
            start: 0,
            eof: false,
            failed: false,
            max_record_bytes,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        self.buf.drain(..self.start);
        self.start = 0;

        let filled = self.buf.len();
        self.buf.resize(filled + READ_CHUNK, 0);
        let read = loop {
            match self.inner.read(&mut self.buf[filled..]) {
                Ok(n) => break Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };

        let read = match read {
            Ok(n) => n,
            Err(e) => {
                self.buf.truncate(filled);
                return Err(e);
            }
        };
        self.buf.truncate(filled + read);
        if read == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let data = &self.buf[self.start..];
            match split(data, self.eof) {
                Split::Record { advance, range } => {
                    let record = data[range].to_vec();
                    self.start += advance;
                    return Some(Ok(record));
                }
                Split::Skip(n) => {
                    trace!("Skipping {} bytes outside of any record", n);
                    self.start += n;
                }
                Split::NeedMore if self.eof => return None,
                Split::NeedMore => {
                    if data.len() > self.max_record_bytes {
                        self.failed = true;
                        return Some(Err(io::Error::new(
                            ErrorKind::InvalidData,
                            format!(
                                "session record exceeds {} bytes",
                                self.max_record_bytes
                            ),
                        )));
                    }
                    if let Err(e) = self.fill() {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}
