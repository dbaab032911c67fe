//! Append-only byte buffer for recordings with an explicit memory bound.
//!
//! Bytes stay in memory until `spill_threshold` is reached; from then on the
//! whole buffer lives in an anonymous temp file that disappears on drop.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::info;

use crate::error::Result;

pub struct ChunkBuffer {
    memory: Vec<u8>,
    file: Option<File>,
    len: usize,
    chunks: usize,
    spill_threshold: usize,
    spill_dir: Option<PathBuf>,
}

impl ChunkBuffer {
    pub fn new(spill_threshold: usize, spill_dir: Option<PathBuf>) -> Self {
        Self {
            memory: Vec::new(),
            file: None,
            len: 0,
            chunks: 0,
            spill_threshold,
            spill_dir,
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        if self.file.is_none() && self.memory.len() + data.len() > self.spill_threshold {
            self.spill()?;
        }
        match self.file.as_mut() {
            Some(file) => file.write_all(data)?,
            None => self.memory.extend_from_slice(data),
        }
        self.len += data.len();
        self.chunks += 1;
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        let mut file = match &self.spill_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        file.write_all(&self.memory)?;
        info!("recording buffer spilled {} bytes to disk", self.memory.len());
        self.memory = Vec::new();
        self.file = Some(file);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn is_spilled(&self) -> bool {
        self.file.is_some()
    }

    /// Consume the buffer and return everything written, in order.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self.file {
            Some(mut file) => {
                let mut out = Vec::with_capacity(self.len);
                file.seek(SeekFrom::Start(0))?;
                file.read_to_end(&mut out)?;
                Ok(out)
            }
            None => Ok(self.memory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_in_memory_below_threshold() {
        let mut buf = ChunkBuffer::new(16, None);
        buf.push(b"abc").unwrap();
        buf.push(b"def").unwrap();
        assert!(!buf.is_spilled());
        assert_eq!(buf.chunk_count(), 2);
        assert_eq!(buf.into_bytes().unwrap(), b"abcdef");
    }

    #[test]
    fn spills_past_threshold_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = ChunkBuffer::new(4, Some(dir.path().to_path_buf()));
        buf.push(b"abc").unwrap();
        buf.push(b"defg").unwrap();
        buf.push(b"h").unwrap();
        assert!(buf.is_spilled());
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.into_bytes().unwrap(), b"abcdefgh");
    }
}
