// src/postops.rs
//
// Post-operations consume the whole processed image set, after every
// per-image pipeline has finished: combine flattens all frames into one
// animated image, contact builds a thumbnail grid sheet.

use crate::color::Color;
use crate::error::BatchError;
use crate::image::{recanvas, write_png, BatchImage, DEFAULT_FRAME_DURATION_MS};
use crate::interval::Interval;
use crate::pipeline::BatchContext;
use crate::policy::Anchor;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Rgba};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

/// A validated whole-set operation.
#[derive(Clone, Debug)]
pub enum PostOperation {
    Combine(CombineOp),
    Contact(ContactOp),
}

impl PostOperation {
    pub fn parse(name: &str, args: &str) -> Result<Self, BatchError> {
        match name.to_lowercase().as_str() {
            "combine" => CombineOp::parse(args).map(Self::Combine),
            "contact" => ContactOp::parse(args).map(Self::Contact),
            other => Err(BatchError::unknown_operation(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Combine(_) => "combine",
            Self::Contact(_) => "contact",
        }
    }

    /// Consume the image set and write one output artifact. Returns the
    /// path written.
    pub fn apply(
        &self,
        images: &[&BatchImage],
        ctx: &BatchContext,
    ) -> Result<PathBuf, BatchError> {
        if images.is_empty() {
            return Err(BatchError::no_images(self.name()));
        }
        tracing::debug!(post = self.name(), images = images.len(), "running post-operation");
        match self {
            Self::Combine(op) => op.apply(images, ctx),
            Self::Contact(op) => op.apply(images, ctx),
        }
    }
}

/// One duration override: output frames whose absolute position falls in
/// the interval display for `duration_ms` instead of the default.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntervalDuration {
    pub frames: Interval,
    pub duration_ms: f32,
}

/// combine[durations, sub-folder, basename] - flatten every frame of
/// every image, in input order, into one animated GIF. Durations are
/// `interval:ms` pairs joined by '+' (e.g. `0-4:100+5:33`).
#[derive(Clone, Debug)]
pub struct CombineOp {
    pub durations: Vec<IntervalDuration>,
    pub sub_folder: String,
    pub base_name: String,
}

impl CombineOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut tokens = args
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty());

        let durations = match tokens.next() {
            Some(tok) if tok != "*" => parse_durations(tok)?,
            _ => Vec::new(),
        };
        let sub_folder = match tokens.next() {
            Some(tok) if tok != "*" => tok.to_string(),
            _ => "Combined".to_string(),
        };
        let base_name = match tokens.next() {
            Some(tok) if tok != "*" => tok.to_string(),
            _ => "combined".to_string(),
        };
        Ok(Self {
            durations,
            sub_folder,
            base_name,
        })
    }

    /// Display duration for the output frame at `frame_num`. With
    /// overlapping override intervals the last matching pair in the
    /// argument list wins.
    pub fn frame_duration(&self, frame_num: usize) -> f32 {
        self.durations
            .iter()
            .rev()
            .find(|pair| pair.frames.contains(frame_num))
            .map(|pair| pair.duration_ms)
            .unwrap_or(DEFAULT_FRAME_DURATION_MS)
    }

    fn apply(&self, images: &[&BatchImage], ctx: &BatchContext) -> Result<PathBuf, BatchError> {
        let path = ctx
            .out_root()
            .join(&self.sub_folder)
            .join(format!("{}.gif", self.base_name));
        ctx.claim_output(&path)?;

        let file =
            File::create(&path).map_err(|e| BatchError::file_write_failed(path.clone(), e))?;
        let mut encoder = GifEncoder::new(BufWriter::new(file));
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| BatchError::encode_failed("gif", e.to_string()))?;

        let mut frame_num = 0usize;
        for image in images {
            for frame in &image.frames {
                let ms = self.frame_duration(frame_num).max(0.0) as u32;
                let gif_frame = image::Frame::from_parts(
                    frame.pixels.clone(),
                    0,
                    0,
                    Delay::from_numer_denom_ms(ms, 1),
                );
                encoder
                    .encode_frame(gif_frame)
                    .map_err(|e| BatchError::encode_failed("gif", e.to_string()))?;
                frame_num += 1;
            }
        }
        tracing::info!(path = %path.display(), frames = frame_num, "combined animated image");
        Ok(path)
    }
}

fn parse_durations(token: &str) -> Result<Vec<IntervalDuration>, BatchError> {
    let mut pairs = Vec::new();
    for part in token.split('+') {
        let (frames, ms) = part.split_once(':').ok_or_else(|| {
            BatchError::parse("combine", "durations", format!("bad pair '{part}'"))
        })?;
        let frames = Interval::from_token(frames).ok_or_else(|| {
            BatchError::parse("combine", "durations", format!("bad interval '{frames}'"))
        })?;
        let duration_ms: f32 = ms.trim().parse().map_err(|_| {
            BatchError::parse("combine", "durations", format!("bad duration '{ms}'"))
        })?;
        if duration_ms < 0.0 {
            return Err(BatchError::parse(
                "combine",
                "durations",
                "duration must be >= 0",
            ));
        }
        pairs.push(IntervalDuration {
            frames,
            duration_ms,
        });
    }
    Ok(pairs)
}

/// contact[columns, rows, fill, sub-folder, basename] - arrange frame 0
/// of each image into a columns x rows grid. Zero means auto-compute
/// from the image count; spare cells get the fill colour.
#[derive(Clone, Debug)]
pub struct ContactOp {
    pub columns: u32,
    pub rows: u32,
    pub fill: Color,
    pub sub_folder: String,
    pub base_name: String,
}

impl ContactOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut tokens = args
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty());

        let mut next_or = |default: &str| match tokens.next() {
            Some(tok) if tok != "*" => tok.to_string(),
            _ => default.to_string(),
        };
        let columns: i64 = next_or("0").parse().unwrap_or(0);
        let rows: i64 = next_or("0").parse().unwrap_or(0);
        let max = u32::MAX as i64;
        if !(0..=max).contains(&columns) || !(0..=max).contains(&rows) {
            return Err(BatchError::parse(
                "contact",
                "columns/rows",
                "must fit 0..=u32::MAX",
            ));
        }
        let fill = Color::from_token(&next_or("trans")).unwrap_or(Color::TRANSPARENT);
        let sub_folder = next_or("Contact");
        let base_name = next_or("contact");
        Ok(Self {
            columns: columns as u32,
            rows: rows as u32,
            fill,
            sub_folder,
            base_name,
        })
    }

    /// Resolve the grid for `count` images: auto-compute whichever of
    /// columns/rows is zero.
    pub fn grid(&self, count: usize) -> Result<(u32, u32), BatchError> {
        let count = count as u32;
        let (cols, rows) = match (self.columns, self.rows) {
            (0, 0) => {
                let cols = (count as f64).sqrt().ceil() as u32;
                (cols, count.div_ceil(cols.max(1)))
            }
            (c, 0) => (c, count.div_ceil(c)),
            (0, r) => (count.div_ceil(r), r),
            (c, r) => (c, r),
        };
        if cols * rows < count {
            return Err(BatchError::geometry(
                "contact",
                format!("{cols}x{rows} grid cannot hold {count} images"),
            ));
        }
        Ok((cols, rows))
    }

    fn apply(&self, images: &[&BatchImage], ctx: &BatchContext) -> Result<PathBuf, BatchError> {
        let (cols, rows) = self.grid(images.len())?;
        let cell_w = images.iter().map(|i| i.width()).max().unwrap_or(0);
        let cell_h = images.iter().map(|i| i.height()).max().unwrap_or(0);
        if cell_w == 0 || cell_h == 0 {
            return Err(BatchError::geometry("contact", "images have no area"));
        }

        let fill: Rgba<u8> = self.fill.into();
        let mut sheet =
            image::RgbaImage::from_pixel(cols * cell_w, rows * cell_h, fill);
        for (index, image) in images.iter().enumerate() {
            let col = index as u32 % cols;
            let row = index as u32 / cols;
            let frame = &image.frames[0].pixels;
            // Top-left anchored within its cell; smaller images leave
            // fill showing.
            let off = Anchor::TopLeft.offset((cell_w, cell_h), frame.dimensions());
            let cell = recanvas(frame, cell_w, cell_h, off.0, off.1, fill);
            image::imageops::replace(
                &mut sheet,
                &cell,
                (col * cell_w) as i64,
                (row * cell_h) as i64,
            );
        }

        let path = ctx
            .out_root()
            .join(&self.sub_folder)
            .join(format!("{}.png", self.base_name));
        ctx.claim_output(&path)?;
        write_png(&sheet, &path)?;
        tracing::info!(path = %path.display(), grid = format!("{cols}x{rows}"), "contact sheet written");
        Ok(path)
    }
}
