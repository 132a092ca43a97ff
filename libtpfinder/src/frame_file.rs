use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use super::constants::SUPERCHUNK_SIZE;
use super::error::FrameFileError;
use super::superchunk::validate_superchunk_size;

/// A raw capture: superchunks written back to back with no extra framing.
#[derive(Debug)]
pub struct FrameFileReader {
    reader: BufReader<File>,
    path: PathBuf,
    size_bytes: u64,
    superchunks_read: u64,
    is_eof: bool,
}

impl FrameFileReader {
    pub fn open(path: &Path) -> Result<Self, FrameFileError> {
        if !path.exists() {
            return Err(FrameFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            size_bytes,
            superchunks_read: 0,
            is_eof: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Number of complete superchunks in the file
    pub fn n_superchunks(&self) -> u64 {
        self.size_bytes / SUPERCHUNK_SIZE as u64
    }

    pub fn superchunks_read(&self) -> u64 {
        self.superchunks_read
    }

    /// Get the next superchunk in the file
    ///
    /// Returns a `Result<Option<Vec<u8>>>`. The Option is None once the file is exhausted;
    /// a trailing partial superchunk is an error.
    pub fn get_next_superchunk(&mut self) -> Result<Option<Vec<u8>>, FrameFileError> {
        if self.is_eof {
            return Ok(None);
        }
        let mut buffer = vec![0u8; SUPERCHUNK_SIZE];
        let mut filled = 0;
        while filled < SUPERCHUNK_SIZE {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FrameFileError::IOError(e)),
            }
        }

        if filled == 0 {
            self.is_eof = true;
            return Ok(None);
        }
        if filled < SUPERCHUNK_SIZE {
            self.is_eof = true;
            return Err(FrameFileError::TruncatedSuperchunk(filled));
        }
        self.superchunks_read += 1;
        Ok(Some(buffer))
    }
}

impl Iterator for FrameFileReader {
    type Item = Result<Vec<u8>, FrameFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_next_superchunk().transpose()
    }
}

/// Writes superchunks back to back, for later replay through [`FrameFileReader`]
#[derive(Debug)]
pub struct FrameFileWriter {
    writer: BufWriter<File>,
    superchunks_written: u64,
}

impl FrameFileWriter {
    pub fn create(path: &Path) -> Result<Self, FrameFileError> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            superchunks_written: 0,
        })
    }

    pub fn write_superchunk(&mut self, buffer: &[u8]) -> Result<(), FrameFileError> {
        validate_superchunk_size(buffer)?;
        self.writer.write_all(buffer)?;
        self.superchunks_written += 1;
        Ok(())
    }

    pub fn superchunks_written(&self) -> u64 {
        self.superchunks_written
    }

    /// Flush everything to disk
    pub fn close(mut self) -> Result<(), FrameFileError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use crate::generator::build_superchunk;
    use crate::wib_frame::LinkId;

    #[test]
    fn test_write_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        let chunks: Vec<Vec<u8>> = (0..3u64)
            .map(|i| {
                build_superchunk(LinkId::default(), i * 300, |ch, _| ch as u16 + i as u16).unwrap()
            })
            .collect();

        let mut writer = FrameFileWriter::create(&path).unwrap();
        for chunk in chunks.iter() {
            writer.write_superchunk(chunk).unwrap();
        }
        assert_eq!(writer.superchunks_written(), 3);
        writer.close().unwrap();

        let reader = FrameFileReader::open(&path).unwrap();
        assert_eq!(reader.n_superchunks(), 3);
        let replayed: Vec<Vec<u8>> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(replayed, chunks);
    }

    #[test]
    fn test_trailing_partial_superchunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.bin");
        let mut bytes = build_superchunk(LinkId::default(), 0, |_, _| 1).unwrap();
        bytes.extend_from_slice(&[0u8; 100]);
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = FrameFileReader::open(&path).unwrap();
        assert!(reader.get_next_superchunk().unwrap().is_some());
        assert!(matches!(
            reader.get_next_superchunk(),
            Err(FrameFileError::TruncatedSuperchunk(100))
        ));
        assert!(reader.get_next_superchunk().unwrap().is_none());
        assert_eq!(reader.superchunks_read(), 1);
    }

    #[test]
    fn test_writer_rejects_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FrameFileWriter::create(&dir.path().join("bad.bin")).unwrap();
        assert!(matches!(
            writer.write_superchunk(&[0u8; 10]),
            Err(FrameFileError::Frame(FrameError::IncorrectSize(10)))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            FrameFileReader::open(Path::new("/no/such/capture.bin")),
            Err(FrameFileError::BadFilePath(_))
        ));
    }
}
