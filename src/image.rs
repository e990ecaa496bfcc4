// src/image.rs
//
// The image model the pipeline mutates: an ordered list of frames, each
// an RGBA8 buffer with a display duration. Codec work (decode/encode)
// and resampling kernels are delegated to the image crate; this module
// owns the frame list and the shared geometric helpers the operations
// build on.

use crate::error::BatchError;
use crate::policy::{EdgeMode, ResampleFilter};
use image::codecs::gif::GifDecoder;
use image::{imageops, AnimationDecoder, RgbaImage};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Default display duration for a frame, in milliseconds.
pub const DEFAULT_FRAME_DURATION_MS: f32 = 33.0;

/// One pixel buffer within a (possibly animated/multi-page) image.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: RgbaImage,
    pub duration_ms: f32,
}

impl Frame {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            duration_ms: DEFAULT_FRAME_DURATION_MS,
        }
    }

    pub fn with_duration(pixels: RgbaImage, duration_ms: f32) -> Self {
        Self {
            pixels,
            duration_ms,
        }
    }
}

/// An image in the batch: a name, the directory it came from (extract
/// output is relative to it) and its frames. All frames share dimensions.
#[derive(Clone, Debug)]
pub struct BatchImage {
    pub name: String,
    pub dir: PathBuf,
    pub frames: Vec<Frame>,
}

impl BatchImage {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, frames: Vec<Frame>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            frames,
        }
    }

    /// Single-frame image from a raw buffer. Handy in tests and the CLI.
    pub fn from_pixels(name: impl Into<String>, pixels: RgbaImage) -> Self {
        Self::new(name, PathBuf::from("."), vec![Frame::new(pixels)])
    }

    /// Load from a file. GIFs decode every frame with their delays;
    /// everything else decodes as a single frame.
    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let is_gif = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("gif"))
            .unwrap_or(false);

        if is_gif {
            let file = File::open(path)
                .map_err(|e| BatchError::file_write_failed(path.to_path_buf(), e))?;
            let decoder = GifDecoder::new(BufReader::new(file))
                .map_err(|e| BatchError::encode_failed("gif", e.to_string()))?;
            let mut frames = Vec::new();
            for frame in decoder.into_frames() {
                let frame = frame.map_err(|e| BatchError::encode_failed("gif", e.to_string()))?;
                let (numer, denom) = frame.delay().numer_denom_ms();
                let ms = if denom == 0 {
                    DEFAULT_FRAME_DURATION_MS
                } else {
                    numer as f32 / denom as f32
                };
                frames.push(Frame::with_duration(frame.into_buffer(), ms));
            }
            if frames.is_empty() {
                return Err(BatchError::encode_failed("gif", "no frames decoded"));
            }
            Ok(Self::new(name, dir, frames))
        } else {
            let img = image::open(path)
                .map_err(|e| BatchError::encode_failed("image", e.to_string()))?;
            Ok(Self::new(name, dir, vec![Frame::new(img.into_rgba8())]))
        }
    }

    pub fn width(&self) -> u32 {
        self.frames.first().map(|f| f.pixels.width()).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.frames.first().map(|f| f.pixels.height()).unwrap_or(0)
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Replace every frame buffer via `f`, keeping durations. The whole
    /// replacement set is computed before committing, so a mid-way
    /// failure leaves the image untouched.
    pub fn try_map_frames<F>(&mut self, mut f: F) -> Result<(), BatchError>
    where
        F: FnMut(&RgbaImage) -> Result<RgbaImage, BatchError>,
    {
        let mut replaced = Vec::with_capacity(self.frames.len());
        for frame in &self.frames {
            replaced.push(f(&frame.pixels)?);
        }
        for (frame, pixels) in self.frames.iter_mut().zip(replaced) {
            frame.pixels = pixels;
        }
        Ok(())
    }

    /// Infallible variant of [`try_map_frames`](Self::try_map_frames).
    pub fn map_frames<F>(&mut self, mut f: F)
    where
        F: FnMut(&RgbaImage) -> RgbaImage,
    {
        for frame in &mut self.frames {
            frame.pixels = f(&frame.pixels);
        }
    }
}

/// Re-canvas `src` into a `width` x `height` buffer, blitting the content
/// at `(off_x, off_y)` (top-left origin, may be negative) and filling the
/// uncovered area. Shrinking crops; growing pads. This one helper backs
/// canvas, crop-with-fill, letterbox and the rotate fill mode.
pub fn recanvas(
    src: &RgbaImage,
    width: u32,
    height: u32,
    off_x: i64,
    off_y: i64,
    fill: image::Rgba<u8>,
) -> RgbaImage {
    let mut out = RgbaImage::from_pixel(width, height, fill);
    for (x, y, px) in src.enumerate_pixels() {
        let tx = x as i64 + off_x;
        let ty = y as i64 + off_y;
        if tx >= 0 && ty >= 0 && (tx as u32) < width && (ty as u32) < height {
            out.put_pixel(tx as u32, ty as u32, *px);
        }
    }
    out
}

/// In-bounds crop. Callers guarantee the rectangle fits.
pub fn crop_rect(src: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> RgbaImage {
    imageops::crop_imm(src, x, y, width, height).to_image()
}

/// Scale `src` to exactly `width` x `height` with the given kernel.
/// Wrap edge mode pads each side with wrapped content before the kernel
/// pass and crops the scaled margin back off, so kernels sample across
/// the tile seam instead of clamping.
pub fn resample(
    src: &RgbaImage,
    width: u32,
    height: u32,
    filter: ResampleFilter,
    edge: EdgeMode,
) -> RgbaImage {
    match edge {
        EdgeMode::Clamp => imageops::resize(src, width, height, filter.kernel()),
        EdgeMode::Wrap => {
            let (sw, sh) = src.dimensions();
            let mx = wrap_margin(sw);
            let my = wrap_margin(sh);
            if mx == 0 || my == 0 {
                return imageops::resize(src, width, height, filter.kernel());
            }
            let padded = RgbaImage::from_fn(sw + 2 * mx, sh + 2 * my, |x, y| {
                let sx = (x as i64 - mx as i64).rem_euclid(sw as i64) as u32;
                let sy = (y as i64 - my as i64).rem_euclid(sh as i64) as u32;
                *src.get_pixel(sx, sy)
            });
            // Scale the margin with the image so the crop lands exactly
            // on the content.
            let scale_x = width as f64 / sw as f64;
            let scale_y = height as f64 / sh as f64;
            let smx = (mx as f64 * scale_x).round() as u32;
            let smy = (my as f64 * scale_y).round() as u32;
            let scaled = imageops::resize(
                &padded,
                width + 2 * smx,
                height + 2 * smy,
                filter.kernel(),
            );
            crop_rect(&scaled, smx, smy, width, height)
        }
    }
}

fn wrap_margin(extent: u32) -> u32 {
    // A modest margin is enough for every kernel the ops expose.
    (extent / 4).min(16)
}

/// Write a single frame as PNG. Parent directories are the caller's
/// responsibility (the output registry creates them under its lock).
pub fn write_png(pixels: &RgbaImage, path: &Path) -> Result<(), BatchError> {
    pixels
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| match e {
            image::ImageError::IoError(io) => BatchError::file_write_failed(path.to_path_buf(), io),
            other => BatchError::encode_failed("png", other.to_string()),
        })
}
