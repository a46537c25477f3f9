//! MJPEG sources: multipart HTTP streams and raw concatenated `.mjpeg` files

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::decoder::decode_jpeg;
use super::{CaptureError, Frame, FrameSource};

const CHUNK_SIZE: usize = 64 * 1024;
/// Consecutive undecodable images tolerated before the stream counts as failed
const MAX_CORRUPT_FRAMES: u32 = 30;

/// Larger partial images are discarded so a stream without EOI can't grow the buffer forever
pub const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Splits a byte stream into JPEG images on SOI/EOI markers and decodes them
pub struct MjpegSource {
    reader: Option<Box<dyn Read + Send>>,
    label: String,
    buffer: Vec<u8>,
    chunk: Box<[u8]>,
    sequence: u64,
    corrupt_run: u32,
}

impl MjpegSource {
    pub fn new(reader: Box<dyn Read + Send>, label: impl Into<String>) -> Self {
        Self {
            reader: Some(reader),
            label: label.into(),
            buffer: Vec::with_capacity(CHUNK_SIZE * 2),
            chunk: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            sequence: 0,
            corrupt_run: 0,
        }
    }

    #[instrument]
    pub fn open_file(path: &Path) -> Result<Self, CaptureError> {
        let file = File::open(path).map_err(|e| CaptureError::unavailable(path.display(), e))?;
        info!("Opened MJPEG file {}", path.display());
        Ok(Self::new(Box::new(file), path.display().to_string()))
    }

    /// Connect to an HTTP MJPEG stream. A body read that sees no bytes for
    /// `stall_timeout` fails, ending the run instead of hanging on a dead peer.
    #[instrument]
    pub fn connect(url: &str, stall_timeout: Duration) -> Result<Self, CaptureError> {
        // Blocking reqwest applies this per operation, so it bounds each body read
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(stall_timeout)
            .build()
            .map_err(|e| CaptureError::unavailable(url, e))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| CaptureError::unavailable(url, e))?;

        if !response.status().is_success() {
            return Err(CaptureError::unavailable(
                url,
                format!("responded with status {}", response.status()),
            ));
        }

        info!("Connected to MJPEG stream {}", url);
        Ok(Self::new(Box::new(response), url))
    }

    fn next_image(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        loop {
            if let Some(image) = extract_frame(&mut self.buffer, MAX_IMAGE_BYTES) {
                return Ok(Some(image));
            }

            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };

            match reader.read(&mut self.chunk) {
                Ok(0) => {
                    debug!("MJPEG source {} reached end of stream", self.label);
                    self.reader = None;
                    return Ok(None);
                }
                Ok(n) => self.buffer.extend_from_slice(&self.chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("MJPEG source {} read failed: {}", self.label, e);
                    return Err(CaptureError::Read(e.to_string()));
                }
            }
        }
    }
}

impl FrameSource for MjpegSource {
    fn read_next(&mut self) -> Result<Option<Frame>, CaptureError> {
        while let Some(image) = self.next_image()? {
            match decode_jpeg(&image, self.sequence) {
                Ok(frame) => {
                    self.sequence += 1;
                    self.corrupt_run = 0;
                    return Ok(Some(frame));
                }
                Err(e) => {
                    self.corrupt_run += 1;
                    warn!(
                        "Skipping undecodable MJPEG image ({} bytes) from {}: {}",
                        image.len(),
                        self.label,
                        e
                    );
                    metrics::counter!("capture_corrupt_images_total").increment(1);
                    if self.corrupt_run >= MAX_CORRUPT_FRAMES {
                        return Err(e);
                    }
                }
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.reader = None;
        self.buffer.clear();
    }
}

fn extract_frame(buffer: &mut Vec<u8>, max_image_bytes: usize) -> Option<Vec<u8>> {
    loop {
        let Some(start) = find_marker(buffer, &SOI) else {
            // Keep a trailing 0xFF in case the marker straddles two reads
            let keep = usize::from(buffer.last() == Some(&0xFF));
            let len = buffer.len();
            buffer.drain(..len - keep);
            return None;
        };

        if start > 0 {
            buffer.drain(..start);
        }

        match image_end(buffer) {
            Some(end) => {
                let frame = buffer[..end].to_vec();
                buffer.drain(..end);
                return Some(frame);
            }
            None if buffer.len() > max_image_bytes => {
                warn!(
                    "Discarding {} bytes of MJPEG data without an end of image",
                    buffer.len()
                );
                metrics::counter!("capture_oversized_images_total").increment(1);
                // Resync on the next SOI; entropy-coded data never contains one
                buffer.drain(..SOI.len());
            }
            None => return None,
        }
    }
}

/// Length of the complete JPEG at the start of `data` (which begins with SOI),
/// or `None` if more bytes are needed.
///
/// Segments are skipped by their length field, so an EOI inside an embedded
/// EXIF thumbnail does not end the image.
fn image_end(data: &[u8]) -> Option<usize> {
    let mut pos = SOI.len();

    'segments: loop {
        if pos + 2 > data.len() {
            return None;
        }
        if data[pos] != 0xFF {
            // Not a marker where one belongs; fall back to the next EOI
            return find_marker(&data[pos..], &EOI).map(|i| pos + i + EOI.len());
        }

        match data[pos + 1] {
            0xFF => pos += 1,
            0xD9 => return Some(pos + 2),
            0x01 | 0xD0..=0xD7 => pos += 2,
            marker => {
                if pos + 4 > data.len() {
                    return None;
                }
                let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                pos += 2 + len;

                if marker != 0xDA {
                    continue;
                }
                // Scan the entropy-coded data that follows SOS
                let mut i = pos;
                while i + 1 < data.len() {
                    if data[i] != 0xFF {
                        i += 1;
                        continue;
                    }
                    match data[i + 1] {
                        0x00 | 0xD0..=0xD7 => i += 2,
                        0xFF => i += 1,
                        _ => {
                            pos = i;
                            continue 'segments;
                        }
                    }
                }
                return None;
            }
        }
    }
}

fn find_marker(buffer: &[u8], marker: &[u8]) -> Option<usize> {
    buffer
        .windows(marker.len())
        .position(|window| window == marker)
}
