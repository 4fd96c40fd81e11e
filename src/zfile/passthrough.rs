//! The identity codec: a plain file behind the stream API, no framing.

use std::fs::File;
use std::io::{ErrorKind, Read as _, Seek as _, SeekFrom, Write as _};
use std::path::Path;

use crate::zfile::OpenMode;
use crate::{ZcpError, ZcpResult};

pub(crate) struct RawFile {
    file: File,
    mode: OpenMode,
    at_eof: bool,
}

impl RawFile {
    pub(crate) fn open(path: &Path, mode: OpenMode) -> ZcpResult<Self> {
        let file = match mode {
            OpenMode::Read => File::open(path),
            OpenMode::Write => File::create(path),
        }
        .map_err(|e| ZcpError::Open(format!("{}: {e}", path.display())))?;
        Ok(RawFile {
            file,
            mode,
            at_eof: false,
        })
    }

    pub(crate) fn read(&mut self, dst: &mut [u8]) -> ZcpResult<usize> {
        if self.mode != OpenMode::Read {
            return Err(ZcpError::Read(
                "error reading a file opened in write mode".into(),
            ));
        }
        let mut got = 0;
        while got < dst.len() {
            match self.file.read(&mut dst[got..]) {
                Ok(0) => {
                    self.at_eof = true;
                    break;
                }
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ZcpError::Read(format!("error reading data: {e}"))),
            }
        }
        Ok(got)
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> ZcpResult<usize> {
        if self.mode != OpenMode::Write {
            return Err(ZcpError::Write(
                "error writing into a read mode file".into(),
            ));
        }
        self.file
            .write_all(data)
            .map_err(|e| ZcpError::Write(format!("error writing data: {e}")))?;
        Ok(data.len())
    }

    pub(crate) fn close(&mut self) -> ZcpResult<()> {
        if self.mode == OpenMode::Write {
            self.file
                .flush()
                .map_err(|e| ZcpError::Write(format!("error flushing data: {e}")))?;
        }
        Ok(())
    }

    /// Uncompressed and raw offsets coincide for the identity codec.
    pub(crate) fn seek(&mut self, pos: SeekFrom) -> ZcpResult<()> {
        if self.mode != OpenMode::Read {
            return Err(ZcpError::Seek(
                "seek unhandled for write mode files".into(),
            ));
        }
        self.file
            .seek(pos)
            .map_err(|e| ZcpError::Seek(format!("error seeking file: {e}")))?;
        self.at_eof = false;
        Ok(())
    }

    pub(crate) fn eof(&self) -> bool {
        self.at_eof
    }

    pub(crate) fn ratio(&self) -> f64 {
        100.0
    }
}
