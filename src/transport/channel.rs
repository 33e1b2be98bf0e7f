//! Line channel over any async reader.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::LineChannel;

/// Splits an [`AsyncRead`] into lines.
///
/// Invalid UTF-8 is replaced rather than failing the read, so a corrupt
/// record surfaces as a decode error for that line only.
#[derive(Debug)]
pub struct ReaderChannel<R> {
    reader: Option<BufReader<R>>,
    /// Bytes of a line still being read; kept across cancelled reads.
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ReaderChannel<R> {
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> LineChannel for ReaderChannel<R> {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let read = reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 && self.pending.is_empty() {
            return Ok(None);
        }

        let mut bytes = std::mem::take(&mut self.pending);
        while matches!(bytes.last(), Some(b'\n' | b'\r')) {
            bytes.pop();
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.reader = None;
        self.pending.clear();
        Ok(())
    }
}
