//! Zip bundling of staged files.

use std::fs::File;
use std::io::{self, Cursor};
use std::path::PathBuf;

use bytes::Bytes;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{StorageError, StudyError};

/// Bundles an ordered list of `(path, entry name)` pairs into a zip archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveEncoder {
    compression: CompressionMethod,
}

impl ArchiveEncoder {
    pub fn new() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }

    /// Store entries without compression.
    ///
    /// JPEG previews do not shrink under deflate.
    pub fn stored() -> Self {
        Self {
            compression: CompressionMethod::Stored,
        }
    }

    /// Write every entry into an in-memory archive, in order.
    pub fn bundle(&self, entries: &[(PathBuf, String)]) -> Result<Bytes, StudyError> {
        let options = SimpleFileOptions::default()
            .compression_method(self.compression)
            .unix_permissions(0o644);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for (path, name) in entries {
            let mut source = File::open(path).map_err(|e| StorageError::new(path, e))?;
            writer
                .start_file(name.as_str(), options)
                .map_err(StudyError::encode)?;
            io::copy(&mut source, &mut writer).map_err(|e| StorageError::new(path, e))?;
        }

        let cursor = writer.finish().map_err(StudyError::encode)?;
        Ok(Bytes::from(cursor.into_inner()))
    }
}

impl Default for ArchiveEncoder {
    fn default() -> Self {
        Self::new()
    }
}
