use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::MediaError;
use crate::models::stream_spec::StreamSpec;
use crate::processing::wav_format::{self, WavHeader, WAV_HEADER_SIZE};

/// Streaming writer for capture output files.
///
/// ## File Format
///
/// **WAV framed:**
/// ```text
/// [44-byte WAV header, sizes patched on finalize]
/// [raw payload bytes...]
/// ```
///
/// **Raw:**
/// ```text
/// [raw payload bytes...]
/// ```
pub struct CaptureFileWriter {
    file_path: PathBuf,
    framed: Option<StreamSpec>,
    file: Option<BufWriter<File>>,
    data_size: u64,
}

impl CaptureFileWriter {
    /// Writer that emits a WAV header for `spec` ahead of the payload.
    pub fn wav(file_path: PathBuf, spec: StreamSpec) -> Self {
        Self {
            file_path,
            framed: Some(spec),
            file: None,
            data_size: 0,
        }
    }

    /// Writer that dumps payload bytes with no framing.
    pub fn raw(file_path: PathBuf) -> Self {
        Self {
            file_path,
            framed: None,
            file: None,
            data_size: 0,
        }
    }

    /// Create the file (and its directory). WAV framing writes a header
    /// with a zero data size as a placeholder.
    pub fn open(&mut self) -> Result<(), MediaError> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| MediaError::Io(format!("failed to create directory: {}", e)))?;
            }
        }

        let file = File::create(&self.file_path)
            .map_err(|e| MediaError::Io(format!("failed to create {}: {}", self.file_path.display(), e)))?;
        let mut file = BufWriter::new(file);

        if let Some(spec) = &self.framed {
            let header = WavHeader::new(spec);
            file.write_all(&header.to_bytes())
                .map_err(|e| MediaError::Io(format!("write failed: {}", e)))?;
        }

        self.file = Some(file);
        self.data_size = 0;
        Ok(())
    }

    /// Append payload bytes.
    pub fn write(&mut self, data: &[u8]) -> Result<(), MediaError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| MediaError::InvalidState("file is not open for writing".into()))?;
        file.write_all(data)
            .map_err(|e| MediaError::Io(format!("write failed: {}", e)))?;
        self.data_size += data.len() as u64;
        Ok(())
    }

    /// Flush, patch the header sizes for WAV framing, and close the file.
    ///
    /// Returns the payload size in bytes.
    pub fn finalize(&mut self) -> Result<u64, MediaError> {
        let file = self
            .file
            .take()
            .ok_or_else(|| MediaError::InvalidState("file is not open".into()))?;
        let mut file = file
            .into_inner()
            .map_err(|e| MediaError::Io(format!("flush failed: {}", e.error())))?;

        if self.framed.is_some() {
            wav_format::patch_sizes(&mut file, self.data_size)?;
        }
        file.flush()?;
        file.sync_all().ok();
        Ok(self.data_size)
    }

    /// Payload bytes written so far (excludes the header).
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Total bytes on disk so far.
    pub fn bytes_written(&self) -> u64 {
        match self.framed {
            Some(_) => self.data_size + WAV_HEADER_SIZE as u64,
            None => self.data_size,
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

/// SHA-256 hex digest of a file, streamed in 64 KiB blocks.
pub fn sha256_file(path: &Path) -> Result<String, MediaError> {
    let mut file = File::open(path)
        .map_err(|e| MediaError::Io(format!("failed to read file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
