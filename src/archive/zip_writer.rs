//! Zip bundle writer
//!
//! Builds a fresh zip container member by member. The zip format needs a
//! seekable sink to patch local headers, so output goes to an anonymous temp
//! file that disappears once the last handle is dropped.

use crate::archive::map_zip_error;
use crate::error::{AppError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

pub struct ZipBundleWriter {
    zip: ZipWriter<File>,
    options: SimpleFileOptions,
    entries: usize,
}

impl ZipBundleWriter {
    /// Create a writer spooling into `spool_dir` (system temp dir if `None`)
    pub fn new(spool_dir: Option<&Path>) -> Result<Self> {
        let sink = match spool_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
        .map_err(|e| {
            AppError::io_error(
                format!("Failed to create archive output file: {}", e),
                spool_dir.map(Path::to_path_buf),
            )
        })?;

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        Ok(Self {
            zip: ZipWriter::new(sink),
            options,
            entries: 0,
        })
    }

    /// Add a directory entry. `name` keeps its trailing slash.
    pub fn add_directory(&mut self, name: &str) -> Result<()> {
        self.zip
            .add_directory(name, self.options)
            .map_err(|e| map_zip_error(e, &format!("Failed to add directory {}", name), None))?;
        self.entries += 1;
        Ok(())
    }

    /// Add a file entry named exactly `name`, copying `content` to its end.
    ///
    /// `len` is the content length when known up front. Unknown or oversized
    /// content gets zip64 headers.
    pub fn add_file<R: Read>(&mut self, name: &str, content: &mut R, len: Option<u64>) -> Result<u64> {
        let options = self.options.large_file(needs_zip64(len));
        self.zip
            .start_file(name, options)
            .map_err(|e| map_zip_error(e, &format!("Failed to start entry {}", name), None))?;
        let written = std::io::copy(content, &mut self.zip)?;
        self.entries += 1;
        Ok(written)
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Write the central directory and return the archive rewound to its start
    pub fn finish(self) -> Result<File> {
        let mut file = self
            .zip
            .finish()
            .map_err(|e| map_zip_error(e, "Failed to finalize archive", None))?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}

/// Entries past the 32-bit size fields must be written as zip64
pub(crate) fn needs_zip64(len: Option<u64>) -> bool {
    len.map_or(true, |len| len >= ZIP64_THRESHOLD)
}
