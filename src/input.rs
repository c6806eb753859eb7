use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::Result;

const CHUNK_SIZE: usize = 64 * 1024;

/// Buffered file or stdin input that hands out the unconsumed bytes as one
/// contiguous slice, so OBUs split across reads can be retried.
pub struct InputReader {
    reader: Box<dyn Read>,
    is_pipe: bool,
    total_size: Option<u64>,
    buffer: Vec<u8>,
    start: usize,
    eof: bool,
}

impl InputReader {
    /// Use "-" for stdin.
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let is_pipe = input_path.as_ref().to_string_lossy() == "-";

        let (reader, total_size): (Box<dyn Read>, _) = if is_pipe {
            (Box::new(io::stdin().lock()), None)
        } else {
            let file = File::open(input_path)?;
            let size = file.metadata().ok().map(|m| m.len());
            (Box::new(BufReader::new(file)), size)
        };

        Ok(Self {
            reader,
            is_pipe,
            total_size,
            buffer: Vec::new(),
            start: 0,
            eof: false,
        })
    }

    pub fn is_pipe(&self) -> bool {
        self.is_pipe
    }

    /// File size, unknown for pipes.
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Appends the next chunk. Returns false once the input is exhausted.
    pub fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.start = 0;
        }

        let len = self.buffer.len();
        self.buffer.resize(len + CHUNK_SIZE, 0);
        let read = self.reader.read(&mut self.buffer[len..])?;
        self.buffer.truncate(len + read);

        self.eof = read == 0;
        Ok(!self.eof)
    }

    /// Bytes read but not yet consumed.
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.start..]
    }

    pub fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.buffer.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(data: &'static [u8]) -> InputReader {
        InputReader {
            reader: Box::new(data),
            is_pipe: true,
            total_size: None,
            buffer: Vec::new(),
            start: 0,
            eof: false,
        }
    }

    #[test]
    fn unconsumed_bytes_survive_refill() -> Result<()> {
        let mut input = reader(b"abcdef");
        assert!(input.fill()?);
        assert_eq!(input.pending(), b"abcdef");

        input.consume(4);
        assert_eq!(input.pending(), b"ef");

        assert!(!input.fill()?);
        assert!(input.is_eof());
        assert_eq!(input.pending(), b"ef");

        Ok(())
    }
}
