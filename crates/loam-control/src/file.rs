use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::payload::Payload;

/// Control files must fit in one page so the rewrite is a single atomic
/// write. Overflow is an error, never a truncation.
pub const CONTROL_PAGE: usize = 4096;

fn read_payload(path: &Path) -> ControlResult<Payload> {
    let data = std::fs::read(path)?;
    Payload::of_bin_string(&data)
}

fn write_image(path: &Path, payload: &Payload) -> ControlResult<()> {
    let image = payload.to_bin_string();
    if image.len() > CONTROL_PAGE {
        return Err(ControlError::PayloadTooLarge {
            size: image.len(),
            page: CONTROL_PAGE,
        });
    }
    // Single-buffer write to a temp file, then an atomic rename: readers see
    // either the old image or the new one.
    let tmp = path.with_extension("control.tmp");
    std::fs::write(&tmp, &image)?;
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = image.len(), "control file written");
    Ok(())
}

/// Read-write handle on a control file. Holding one implies the caller owns
/// the store's writer lock.
#[derive(Debug)]
pub struct ControlFile {
    path: PathBuf,
    payload: Payload,
}

impl ControlFile {
    /// Create the file with an initial payload.
    pub fn create(path: &Path, payload: Payload) -> ControlResult<Self> {
        write_image(path, &payload)?;
        Ok(Self {
            path: path.to_path_buf(),
            payload,
        })
    }

    /// Open an existing file, upgrading legacy payloads in memory.
    pub fn open_rw(path: &Path) -> ControlResult<Self> {
        let payload = read_payload(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            payload,
        })
    }

    /// The current in-memory payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Replace the payload and rewrite the file atomically.
    pub fn set_payload(&mut self, payload: Payload) -> ControlResult<()> {
        write_image(&self.path, &payload)?;
        self.payload = payload;
        Ok(())
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read-only handle: no `set_payload`, but `reload` picks up rewrites made
/// by the writer.
#[derive(Debug)]
pub struct ControlFileRo {
    path: PathBuf,
    payload: Payload,
}

impl ControlFileRo {
    /// Open an existing file read-only.
    pub fn open_ro(path: &Path) -> ControlResult<Self> {
        let payload = read_payload(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            payload,
        })
    }

    /// Open accepting only V5 images. Legacy versions are reported as
    /// `UnknownMajorPackVersion` instead of upgrading.
    pub fn open_strict_v5(path: &Path) -> ControlResult<Self> {
        let data = std::fs::read(path)?;
        let payload = Payload::of_bin_string_v5_only(&data)?;
        Ok(Self {
            path: path.to_path_buf(),
            payload,
        })
    }

    /// The current in-memory payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Re-read the file, replacing the in-memory payload.
    pub fn reload(&mut self) -> ControlResult<()> {
        self.payload = read_payload(&self.path)?;
        Ok(())
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
