//! [`PlyWriter`] – streaming, append-only PLY file output.
//!
//! The vertex count is only known at the end of a run, so points are
//! streamed into a `<out>.partial` sidecar.  [`PlyWriter::finish`] writes the
//! header and body into `<out>.tmp`, syncs it and renames it over `<out>`.
//!
//! A writer dropped without a successful `finish` (fatal error, panic,
//! aborted run) deletes both sidecars, so `<out>` only ever exists as a
//! complete document.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use strata_types::{PerceptualSample, StrataError};
use tracing::{debug, info, warn};

use crate::SampleSink;
use crate::ply::{AppendGuard, CloudSchema, PlyFormat, write_header, write_point};

/// Result of a finished encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSummary {
    pub path: PathBuf,
    pub points: u64,
    pub format: PlyFormat,
    pub layers: Vec<String>,
}

/// Streaming PLY writer for one run.
#[derive(Debug)]
pub struct PlyWriter {
    path: PathBuf,
    body_path: PathBuf,
    staging_path: PathBuf,
    format: PlyFormat,
    guard: AppendGuard,
    body: Option<BufWriter<File>>,
    finished: bool,
}

impl PlyWriter {
    /// Start a new cloud at `path` with the given schema.
    ///
    /// A stale file already at `path` is removed first so that a failed run
    /// cannot leave an earlier, valid-looking cloud behind.
    pub fn create(
        path: impl AsRef<Path>,
        schema: CloudSchema,
        format: PlyFormat,
    ) -> Result<Self, StrataError> {
        let path = path.as_ref().to_path_buf();
        let body_path = sidecar(&path, ".partial");
        let staging_path = sidecar(&path, ".tmp");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| encoding(parent, e))?;
        }
        match fs::remove_file(&path) {
            Ok(()) => warn!(path = %path.display(), "removed stale point cloud"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(encoding(&path, e)),
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&body_path)
            .map_err(|e| encoding(&body_path, e))?;

        debug!(path = %path.display(), %format, layers = schema.layers().len(), "point cloud opened");
        Ok(Self {
            path,
            body_path,
            staging_path,
            format,
            guard: AppendGuard::new(schema),
            body: Some(BufWriter::new(file)),
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Points appended so far.
    pub fn points(&self) -> u64 {
        self.guard.points()
    }

    /// Write header and body to the final path.
    pub fn finish(mut self) -> Result<CloudSummary, StrataError> {
        let body = self
            .body
            .take()
            .ok_or_else(|| encoding(&self.body_path, io::Error::other("writer already closed")))?;
        let body_file = body
            .into_inner()
            .map_err(|e| encoding(&self.body_path, e.into_error()))?;
        drop(body_file);

        let staging = File::create(&self.staging_path).map_err(|e| encoding(&self.staging_path, e))?;
        let mut out = BufWriter::new(staging);
        write_header(&mut out, self.guard.schema(), self.format, self.guard.points())
            .map_err(|e| encoding(&self.staging_path, e))?;
        let mut body = File::open(&self.body_path).map_err(|e| encoding(&self.body_path, e))?;
        io::copy(&mut body, &mut out).map_err(|e| encoding(&self.staging_path, e))?;
        let staging = out
            .into_inner()
            .map_err(|e| encoding(&self.staging_path, e.into_error()))?;
        staging.sync_all().map_err(|e| encoding(&self.staging_path, e))?;
        drop(staging);

        fs::rename(&self.staging_path, &self.path).map_err(|e| encoding(&self.path, e))?;
        self.finished = true;
        if let Err(e) = fs::remove_file(&self.body_path) {
            warn!(path = %self.body_path.display(), error = %e, "could not remove point-cloud sidecar");
        }

        info!(path = %self.path.display(), points = self.guard.points(), format = %self.format, "point cloud written");
        Ok(CloudSummary {
            path: self.path.clone(),
            points: self.guard.points(),
            format: self.format,
            layers: self.guard.schema().layers().to_vec(),
        })
    }
}

impl SampleSink for PlyWriter {
    fn append(&mut self, sample: &PerceptualSample) -> Result<(), StrataError> {
        let body = self
            .body
            .as_mut()
            .ok_or_else(|| encoding(&self.body_path, io::Error::other("writer already closed")))?;
        self.guard.admit(sample)?;
        write_point(body, self.format, sample).map_err(|e| encoding(&self.body_path, e))
    }
}

impl Drop for PlyWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.body.take();
        for path in [&self.body_path, &self.staging_path] {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed incomplete point cloud"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove incomplete point cloud"),
            }
        }
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn encoding(path: &Path, source: io::Error) -> StrataError {
    StrataError::Encoding {
        path: path.to_path_buf(),
        source,
    }
}
