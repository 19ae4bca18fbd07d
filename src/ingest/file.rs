//! Image-directory frame source.
//!
//! Replays a directory of JPEG stills as a frame sequence, in filename order.
//! Useful for regression runs over recorded drives without a camera attached.
//! The source exhausts (returns `None`) after the last image.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::frame::CameraFrame;
use crate::ingest::FrameSource;
use crate::now_s;

pub struct ImageDirSource {
    files: Vec<PathBuf>,
    next_index: usize,
    frame_count: u64,
    last_error: Option<String>,
}

impl ImageDirSource {
    /// Scan `dir` for `.jpg`/`.jpeg` files and prepare them for replay in
    /// filename order. Fails when the directory cannot be read (startup
    /// SourceUnavailable); an empty directory yields an immediately exhausted
    /// source.
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("failed to read frame directory {}", dir.display()))?
        {
            let path = entry?.path();
            let is_jpeg = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
            if is_jpeg {
                files.push(path);
            }
        }
        files.sort();
        log::info!(
            "ImageDirSource: {} frames queued from {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            files,
            next_index: 0,
            frame_count: 0,
            last_error: None,
        })
    }

    pub fn frames_remaining(&self) -> usize {
        self.files.len() - self.next_index
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<CameraFrame>> {
        let Some(path) = self.files.get(self.next_index) else {
            return Ok(None);
        };
        self.next_index += 1;

        let img = image::open(path)
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                err
            })
            .with_context(|| format!("failed to decode {}", path.display()))?
            .into_rgb8();

        self.frame_count += 1;
        let (width, height) = img.dimensions();
        let frame = CameraFrame::new(img.into_raw(), width, height, self.frame_count, now_s()?)?;
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }
}
