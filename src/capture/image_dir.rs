//! Directory of still images replayed as a video

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use super::{CaptureError, Frame, FrameSource, PixelFormat};

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub struct ImageSequence {
    pending: VecDeque<PathBuf>,
    sequence: u64,
}

impl ImageSequence {
    /// Collect every supported image in `dir`, ordered by file name
    #[instrument]
    pub fn open(dir: &Path) -> Result<Self, CaptureError> {
        let entries =
            std::fs::read_dir(dir).map_err(|e| CaptureError::unavailable(dir.display(), e))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CaptureError::unavailable(
                dir.display(),
                "directory contains no png/jpg images",
            ));
        }

        info!("Replaying {} images from {}", paths.len(), dir.display());
        Ok(Self {
            pending: paths.into(),
            sequence: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ImageSequence {
    fn read_next(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };

        let image = image::open(&path)
            .map_err(|e| CaptureError::Decode(format!("{}: {}", path.display(), e)))?
            .into_rgb8();
        let (width, height) = image.dimensions();

        let frame = Frame::new(
            self.sequence,
            width,
            height,
            PixelFormat::Rgb24,
            image.into_raw(),
        )?;
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("houndwatch-seq-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn replays_images_in_name_order() {
        let dir = scratch_dir();
        for (name, width) in [("b.png", 3), ("a.png", 2), ("notes.txt", 0)] {
            if width == 0 {
                std::fs::write(dir.join(name), "skip me").unwrap();
            } else {
                RgbImage::new(width, 2).save(dir.join(name)).unwrap();
            }
        }

        let mut source = ImageSequence::open(&dir).unwrap();
        assert_eq!(source.remaining(), 2);

        let first = source.read_next().unwrap().unwrap();
        let second = source.read_next().unwrap().unwrap();
        assert_eq!((first.sequence(), first.dimensions()), (0, (2, 2)));
        assert_eq!((second.sequence(), second.dimensions()), (1, (3, 2)));
        assert!(source.read_next().unwrap().is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_directory_is_unavailable() {
        let dir = scratch_dir();
        let err = ImageSequence::open(&dir).err().unwrap();
        assert!(matches!(err, CaptureError::SourceUnavailable { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }
}
