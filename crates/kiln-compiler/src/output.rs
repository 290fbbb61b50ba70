//! Compiler output sinks.

use crate::{CompilerError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

enum Sink {
    Membuffer(Vec<u8>),
    File { path: PathBuf, writer: BufWriter<File> },
}

/// Destination for compiler artifacts.
///
/// A file output deletes its file on drop unless [`Output::keep`] was called.
pub struct Output {
    sink: Sink,
    keep: bool,
}

impl Output {
    /// An in-memory output whose contents can be mapped.
    pub fn open_membuffer() -> Self {
        Self {
            sink: Sink::Membuffer(Vec::new()),
            keep: false,
        }
    }

    /// Create (or truncate) a file output.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        tracing::debug!(path = %path.display(), "opened compiler output file");
        Ok(Self {
            sink: Sink::File {
                path,
                writer: BufWriter::new(file),
            },
            keep: false,
        })
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.sink {
            Sink::Membuffer(buffer) => buffer.extend_from_slice(bytes),
            Sink::File { writer, .. } => writer.write_all(bytes)?,
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Sink::File { writer, .. } = &mut self.sink {
            writer.flush()?;
        }
        Ok(())
    }

    /// Retain a file output after the output is dropped.
    pub fn keep(&mut self) {
        self.keep = true;
    }

    /// Path of a file output.
    pub fn path(&self) -> Option<&Path> {
        match &self.sink {
            Sink::File { path, .. } => Some(path),
            Sink::Membuffer(_) => None,
        }
    }

    /// Contents of a membuffer output.
    pub fn map_memory(&self) -> Result<&[u8]> {
        match &self.sink {
            Sink::Membuffer(buffer) => Ok(buffer),
            Sink::File { .. } => Err(CompilerError::NotAMembuffer),
        }
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if let Sink::File { path, writer } = &mut self.sink {
            let _ = writer.flush();
            if !self.keep {
                if let Err(e) = std::fs::remove_file(&*path) {
                    tracing::warn!(path = %path.display(), "failed to remove compiler output: {}", e);
                }
            }
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sink {
            Sink::Membuffer(buffer) => f
                .debug_struct("Output")
                .field("membuffer_len", &buffer.len())
                .finish(),
            Sink::File { path, .. } => f
                .debug_struct("Output")
                .field("path", path)
                .field("keep", &self.keep)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membuffer() {
        let mut output = Output::open_membuffer();
        output.write(b"abc").unwrap();
        output.write(b"de").unwrap();
        assert_eq!(output.map_memory().unwrap(), b"abcde");
        assert!(output.path().is_none());
    }

    #[test]
    fn test_file_removed_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let transient = dir.path().join("a.vmfb");
        let kept = dir.path().join("b.vmfb");

        {
            let mut output = Output::open_file(&transient).unwrap();
            output.write(b"x").unwrap();
            assert!(matches!(
                output.map_memory(),
                Err(CompilerError::NotAMembuffer)
            ));
        }
        assert!(!transient.exists());

        {
            let mut output = Output::open_file(&kept).unwrap();
            output.write(b"y").unwrap();
            output.keep();
        }
        assert_eq!(std::fs::read(&kept).unwrap(), b"y");
    }
}
