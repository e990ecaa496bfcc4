// src/ops.rs
//
// The per-image operations. Each variant is a parameter struct that
// parses its own flat argument string at construction time and exposes
// one apply entry point. Construction failures mean the operation never
// enters a pipeline.
//
// Argument grammar (all variants): tokens split on commas/whitespace,
// mapped positionally. '*' keeps a field's default. Required fields must
// parse or construction fails; optional fields fall back to their default
// on a missing, '*' or unparsable token (including unrecognized enum
// names - field-level tolerance).

use crate::color::{AdjustChannels, Channel, ChannelMask, Color, SwizzleSource};
use crate::error::BatchError;
use crate::image::{crop_rect, recanvas, resample, write_png, BatchImage};
use crate::interval::IntervalSet;
use crate::pipeline::BatchContext;
use crate::policy::{
    Anchor, AspectMode, ChannelOpMode, CropMode, EdgeMode, ExactRotation, FlipMode,
    QuantizeMethod, ResampleFilter, RotateMode,
};
use crate::quantize::{self, QuantizeParams};
use image::{Rgba, RgbaImage};
use std::f32::consts::PI;

/// Tolerance for "this angle is exactly axis-aligned", in radians.
const EXACT_ANGLE_EPS: f32 = 1e-4;

/// Positional token cursor over one operation's argument string.
struct Args<'a> {
    op: &'static str,
    tokens: Vec<&'a str>,
    pos: usize,
}

impl<'a> Args<'a> {
    fn new(op: &'static str, raw: &'a str) -> Self {
        let tokens = raw
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();
        Self { op, tokens, pos: 0 }
    }

    fn next(&mut self) -> Option<&'a str> {
        let tok = self.tokens.get(self.pos).copied();
        self.pos += 1;
        tok
    }

    /// Required field: token must be present (and not '*') and parse.
    fn required<T>(
        &mut self,
        arg: &'static str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, BatchError> {
        match self.next() {
            Some(tok) if tok != "*" => {
                parse(tok).ok_or_else(|| BatchError::parse(self.op, arg, format!("bad token '{tok}'")))
            }
            _ => Err(BatchError::parse(self.op, arg, "missing required argument")),
        }
    }

    /// Optional field: default on a missing, '*' or unparsable token.
    fn optional<T>(&mut self, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
        match self.next() {
            Some(tok) if tok != "*" => parse(tok).unwrap_or(default),
            _ => default,
        }
    }

    fn required_i64(&mut self, arg: &'static str) -> Result<i64, BatchError> {
        self.required(arg, |t| t.parse().ok())
    }

    fn required_f32(&mut self, arg: &'static str) -> Result<f32, BatchError> {
        self.required(arg, |t| t.parse().ok())
    }

    fn optional_i64(&mut self, default: i64) -> i64 {
        self.optional(default, |t| t.parse().ok())
    }

    fn optional_f32(&mut self, default: f32) -> f32 {
        self.optional(default, |t| t.parse().ok())
    }

    fn optional_bool(&mut self, default: bool) -> bool {
        self.optional(default, parse_bool)
    }

    fn optional_colour(&mut self, default: Color) -> Color {
        self.optional(default, Color::from_token)
    }

    fn optional_string(&mut self, default: &str) -> String {
        match self.next() {
            Some(tok) if tok != "*" => tok.to_string(),
            _ => default.to_string(),
        }
    }
}

fn parse_bool(token: &str) -> Option<bool> {
    match token.to_lowercase().as_str() {
        "true" | "t" | "yes" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// A validated per-image operation. Parsing and validation happen in
/// [`Operation::parse`]; a value of this type is always applicable.
#[derive(Clone, Debug)]
pub enum Operation {
    Pixel(PixelOp),
    Resize(ResizeOp),
    Canvas(CanvasOp),
    Aspect(AspectOp),
    Deborder(DeborderOp),
    Crop(CropOp),
    Flip(FlipOp),
    Rotate(RotateOp),
    Levels(LevelsOp),
    Contrast(ContrastOp),
    Brightness(BrightnessOp),
    Quantize(QuantizeOp),
    Channel(ChannelOp),
    Swizzle(SwizzleOp),
    Extract(ExtractOp),
}

impl Operation {
    /// Construct from an operation name and its flat argument string.
    pub fn parse(name: &str, args: &str) -> Result<Self, BatchError> {
        match name.to_lowercase().as_str() {
            "pixel" => PixelOp::parse(args).map(Self::Pixel),
            "resize" => ResizeOp::parse(args).map(Self::Resize),
            "canvas" => CanvasOp::parse(args).map(Self::Canvas),
            "aspect" => AspectOp::parse(args).map(Self::Aspect),
            "deborder" => DeborderOp::parse(args).map(Self::Deborder),
            "crop" => CropOp::parse(args).map(Self::Crop),
            "flip" => FlipOp::parse(args).map(Self::Flip),
            "rotate" => RotateOp::parse(args).map(Self::Rotate),
            "levels" => LevelsOp::parse(args).map(Self::Levels),
            "contrast" => ContrastOp::parse(args).map(Self::Contrast),
            "brightness" => BrightnessOp::parse(args).map(Self::Brightness),
            "quantize" => QuantizeOp::parse(args).map(Self::Quantize),
            "channel" => ChannelOp::parse(args).map(Self::Channel),
            "swizzle" => SwizzleOp::parse(args).map(Self::Swizzle),
            "extract" => ExtractOp::parse(args).map(Self::Extract),
            other => Err(BatchError::unknown_operation(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pixel(_) => "pixel",
            Self::Resize(_) => "resize",
            Self::Canvas(_) => "canvas",
            Self::Aspect(_) => "aspect",
            Self::Deborder(_) => "deborder",
            Self::Crop(_) => "crop",
            Self::Flip(_) => "flip",
            Self::Rotate(_) => "rotate",
            Self::Levels(_) => "levels",
            Self::Contrast(_) => "contrast",
            Self::Brightness(_) => "brightness",
            Self::Quantize(_) => "quantize",
            Self::Channel(_) => "channel",
            Self::Swizzle(_) => "swizzle",
            Self::Extract(_) => "extract",
        }
    }

    /// Mutate the image in place. On failure the image keeps its
    /// pre-operation state.
    pub fn apply(&self, image: &mut BatchImage, ctx: &BatchContext) -> Result<(), BatchError> {
        tracing::debug!(op = self.name(), image = %image.name, "applying operation");
        match self {
            Self::Pixel(op) => op.apply(image),
            Self::Resize(op) => op.apply(image),
            Self::Canvas(op) => op.apply(image),
            Self::Aspect(op) => op.apply(image),
            Self::Deborder(op) => op.apply(image),
            Self::Crop(op) => op.apply(image),
            Self::Flip(op) => op.apply(image),
            Self::Rotate(op) => op.apply(image),
            Self::Levels(op) => op.apply(image),
            Self::Contrast(op) => op.apply(image),
            Self::Brightness(op) => op.apply(image),
            Self::Quantize(op) => op.apply(image),
            Self::Channel(op) => op.apply(image),
            Self::Swizzle(op) => op.apply(image),
            Self::Extract(op) => op.apply(image, ctx),
        }
    }
}

// ---------------------------------------------------------------------------
// Point fix

/// pixel[x, y, colour, channels] - write one pixel's selected channels.
#[derive(Clone, Debug)]
pub struct PixelOp {
    pub x: u32,
    pub y: u32,
    pub colour: Color,
    pub channels: ChannelMask,
}

impl PixelOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("pixel", args);
        let x = args.required_i64("x")?;
        let y = args.required_i64("y")?;
        if x < 0 || y < 0 {
            return Err(BatchError::parse("pixel", "x/y", "coordinates must be >= 0"));
        }
        let colour = args.optional_colour(Color::BLACK);
        let channels = args.optional(ChannelMask::RGBA, ChannelMask::from_token);
        Ok(Self {
            x: x as u32,
            y: y as u32,
            colour,
            channels,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        if self.x >= image.width() || self.y >= image.height() {
            return Err(BatchError::geometry(
                "pixel",
                format!(
                    "({}, {}) outside {}x{}",
                    self.x,
                    self.y,
                    image.width(),
                    image.height()
                ),
            ));
        }
        for frame in &mut image.frames {
            let px = frame.pixels.get_pixel_mut(self.x, self.y);
            write_masked(px, self.colour, self.channels);
        }
        Ok(())
    }
}

fn write_masked(px: &mut Rgba<u8>, colour: Color, mask: ChannelMask) {
    if mask.contains(ChannelMask::R) {
        px.0[0] = colour.r;
    }
    if mask.contains(ChannelMask::G) {
        px.0[1] = colour.g;
    }
    if mask.contains(ChannelMask::B) {
        px.0[2] = colour.b;
    }
    if mask.contains(ChannelMask::A) {
        px.0[3] = colour.a;
    }
}

// ---------------------------------------------------------------------------
// Geometry

/// resize[w, h, filter, edge] - scale every frame to exactly w x h.
#[derive(Clone, Debug)]
pub struct ResizeOp {
    pub width: u32,
    pub height: u32,
    pub filter: ResampleFilter,
    pub edge: EdgeMode,
}

impl ResizeOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("resize", args);
        let width = args.required_i64("width")?;
        let height = args.required_i64("height")?;
        if width < 4 || height < 4 {
            return Err(BatchError::parse(
                "resize",
                "width/height",
                "dimensions must be >= 4",
            ));
        }
        let filter = args.optional(ResampleFilter::Bilinear, ResampleFilter::from_token);
        let edge = args.optional(EdgeMode::Clamp, EdgeMode::from_token);
        Ok(Self {
            width: width as u32,
            height: height as u32,
            filter,
            edge,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        if image.width() == self.width && image.height() == self.height {
            return Ok(());
        }
        let (w, h, filter, edge) = (self.width, self.height, self.filter, self.edge);
        image.map_frames(|f| resample(f, w, h, filter, edge));
        Ok(())
    }
}

/// canvas[w, h, anchor, fill, anchor-x, anchor-y] - re-canvas without
/// scaling. Explicit anchor coordinates (both >= 0) override the anchor
/// point; they give the content's top-left offset in the new canvas.
#[derive(Clone, Debug)]
pub struct CanvasOp {
    pub width: u32,
    pub height: u32,
    pub anchor: Anchor,
    pub fill: Color,
    pub anchor_x: i64,
    pub anchor_y: i64,
}

impl CanvasOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("canvas", args);
        let width = args.required_i64("width")?;
        let height = args.required_i64("height")?;
        if width < 4 || height < 4 {
            return Err(BatchError::parse(
                "canvas",
                "width/height",
                "dimensions must be >= 4",
            ));
        }
        let anchor = args.optional(Anchor::MiddleMiddle, Anchor::from_token);
        let fill = args.optional_colour(Color::BLACK);
        let anchor_x = args.optional_i64(-1);
        let anchor_y = args.optional_i64(-1);
        Ok(Self {
            width: width as u32,
            height: height as u32,
            anchor,
            fill,
            anchor_x,
            anchor_y,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        let content = (image.width(), image.height());
        let offset = if self.anchor_x >= 0 && self.anchor_y >= 0 {
            (self.anchor_x, self.anchor_y)
        } else {
            self.anchor.offset((self.width, self.height), content)
        };
        let (w, h, fill) = (self.width, self.height, self.fill.into());
        image.map_frames(|f| recanvas(f, w, h, offset.0, offset.1, fill));
        Ok(())
    }
}

/// aspect[num:den, mode, anchor, fill] - convert to a target aspect
/// ratio by cropping or letterboxing. A ratio already matching within
/// tolerance is left alone.
#[derive(Clone, Debug)]
pub struct AspectOp {
    pub num: u32,
    pub den: u32,
    pub mode: AspectMode,
    pub anchor: Anchor,
    pub fill: Color,
}

impl AspectOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("aspect", args);
        let (num, den) = args.required("ratio", |t| {
            let (n, d) = t.split_once(':')?;
            let n: u32 = n.trim().parse().ok()?;
            let d: u32 = d.trim().parse().ok()?;
            if n == 0 || d == 0 {
                return None;
            }
            Some((n, d))
        })?;
        let mode = args.optional(AspectMode::Crop, AspectMode::from_token);
        let anchor = args.optional(Anchor::MiddleMiddle, Anchor::from_token);
        let fill = args.optional_colour(Color::BLACK);
        Ok(Self {
            num,
            den,
            mode,
            anchor,
            fill,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        let (w, h) = (image.width(), image.height());
        if w == 0 || h == 0 {
            return Err(BatchError::geometry("aspect", "empty image"));
        }
        let current = w as f64 / h as f64;
        let target = self.num as f64 / self.den as f64;
        if (current - target).abs() < 1e-6 {
            return Ok(());
        }

        let wider = current > target;
        let (new_w, new_h) = match (self.mode, wider) {
            // Crop the over-long dimension down to the target ratio.
            (AspectMode::Crop, true) => (((h as f64 * target).round() as u32).max(1), h),
            (AspectMode::Crop, false) => (w, ((w as f64 / target).round() as u32).max(1)),
            // Pad the under-long dimension up to the target ratio.
            (AspectMode::Letterbox, true) => (w, ((w as f64 / target).round() as u32).max(1)),
            (AspectMode::Letterbox, false) => (((h as f64 * target).round() as u32).max(1), h),
        };
        if (new_w, new_h) == (w, h) {
            return Ok(());
        }

        let offset = self.anchor.offset((new_w, new_h), (w, h));
        let fill = self.fill.into();
        image.map_frames(|f| recanvas(f, new_w, new_h, offset.0, offset.1, fill));
        Ok(())
    }
}

/// deborder[colour, channels] - scan inward from each edge and crop off
/// the matching border. With no explicit colour the test colour is
/// sampled from pixel (0,0). Borders are measured on frame 0 and every
/// frame is cropped identically.
#[derive(Clone, Debug)]
pub struct DeborderOp {
    pub test_colour: Option<Color>,
    pub channels: ChannelMask,
}

impl DeborderOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("deborder", args);
        let test_colour = match args.next() {
            Some(tok) if tok != "*" => Color::from_token(tok),
            _ => None,
        };
        let channels = args.optional(ChannelMask::RGBA, ChannelMask::from_token);
        Ok(Self {
            test_colour,
            channels,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        let (w, h) = (image.width(), image.height());
        if w == 0 || h == 0 {
            return Err(BatchError::geometry("deborder", "empty image"));
        }
        let probe = &image.frames[0].pixels;
        let test = self
            .test_colour
            .unwrap_or_else(|| Color::from(*probe.get_pixel(0, 0)));

        let matches = |px: &Rgba<u8>| {
            (!self.channels.contains(ChannelMask::R) || px.0[0] == test.r)
                && (!self.channels.contains(ChannelMask::G) || px.0[1] == test.g)
                && (!self.channels.contains(ChannelMask::B) || px.0[2] == test.b)
                && (!self.channels.contains(ChannelMask::A) || px.0[3] == test.a)
        };

        let col_matches = |x: u32| (0..h).all(|y| matches(probe.get_pixel(x, y)));
        let row_matches = |y: u32| (0..w).all(|x| matches(probe.get_pixel(x, y)));

        let left = (0..w).take_while(|&x| col_matches(x)).count() as u32;
        if left == w {
            return Err(BatchError::geometry(
                "deborder",
                "scan consumed the whole image",
            ));
        }
        let right = (0..w).rev().take_while(|&x| col_matches(x)).count() as u32;
        let top = (0..h).take_while(|&y| row_matches(y)).count() as u32;
        let bottom = (0..h).rev().take_while(|&y| row_matches(y)).count() as u32;

        let new_w = w - left - right;
        let new_h = h - top - bottom;
        if new_w == 0 || new_h == 0 {
            return Err(BatchError::geometry(
                "deborder",
                "scan consumed the whole image",
            ));
        }
        if (new_w, new_h) == (w, h) {
            return Ok(());
        }
        image.map_frames(|f| crop_rect(f, left, top, new_w, new_h));
        Ok(())
    }
}

/// crop[mode, x, y, w|xmax, h|ymax, fill] - viewport crop. Absolute mode
/// takes a size, relative mode a max corner (size = max - origin).
/// Viewport area outside the source is filled.
#[derive(Clone, Debug)]
pub struct CropOp {
    pub mode: CropMode,
    pub origin_x: i64,
    pub origin_y: i64,
    pub w_or_max_x: i64,
    pub h_or_max_y: i64,
    pub fill: Color,
}

impl CropOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("crop", args);
        let mode = args.optional(CropMode::Absolute, CropMode::from_token);
        let origin_x = args.required_i64("x")?;
        let origin_y = args.required_i64("y")?;
        let w_or_max_x = args.required_i64("w|xmax")?;
        let h_or_max_y = args.required_i64("h|ymax")?;
        if w_or_max_x < 0 || h_or_max_y < 0 {
            return Err(BatchError::parse("crop", "w|xmax", "must be >= 0"));
        }
        let fill = args.optional_colour(Color::TRANSPARENT);
        Ok(Self {
            mode,
            origin_x,
            origin_y,
            w_or_max_x,
            h_or_max_y,
            fill,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        let (vw, vh) = match self.mode {
            CropMode::Absolute => (self.w_or_max_x, self.h_or_max_y),
            CropMode::Relative => (
                self.w_or_max_x - self.origin_x,
                self.h_or_max_y - self.origin_y,
            ),
        };
        if vw <= 0 || vh <= 0 {
            return Err(BatchError::geometry(
                "crop",
                format!("viewport degenerates to {vw}x{vh}"),
            ));
        }
        let (ox, oy, fill) = (self.origin_x, self.origin_y, self.fill.into());
        image.map_frames(|f| recanvas(f, vw as u32, vh as u32, -ox, -oy, fill));
        Ok(())
    }
}

/// flip[mode] - mirror each frame horizontally or vertically.
#[derive(Clone, Debug)]
pub struct FlipOp {
    pub mode: FlipMode,
}

impl FlipOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("flip", args);
        let mode = args.optional(FlipMode::Horizontal, FlipMode::from_token);
        Ok(Self { mode })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        match self.mode {
            FlipMode::Horizontal => image.map_frames(image::imageops::flip_horizontal),
            FlipMode::Vertical => image.map_frames(image::imageops::flip_vertical),
        }
        Ok(())
    }
}

/// rotate[angle, mode, filter-up, filter-down, fill] - rotate about the
/// centre. The angle is given in degrees (positive = anticlockwise) or
/// as one of the exact words acw/ccw, cw, 180; axis-aligned angles take
/// the lossless re-indexing fast path.
#[derive(Clone, Debug)]
pub struct RotateOp {
    /// Radians, normalized to (-pi, pi].
    pub angle: f32,
    pub exact: ExactRotation,
    pub mode: RotateMode,
    pub filter_up: ResampleFilter,
    pub filter_down: ResampleFilter,
    pub fill: Color,
}

impl RotateOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("rotate", args);
        let angle = args.required("angle", |t| match t.to_lowercase().as_str() {
            "acw" | "ccw" | "90" => Some(90.0f32),
            "cw" | "-90" => Some(-90.0),
            "180" => Some(180.0),
            other => other.parse().ok(),
        })?;
        let angle = normalize_degrees(angle).to_radians();
        let exact = classify_exact(angle);
        let mode = args.optional(RotateMode::Crop, RotateMode::from_token);
        let filter_up = args.optional(ResampleFilter::Bilinear, ResampleFilter::from_token);
        let filter_down = args.optional(ResampleFilter::None, ResampleFilter::from_token);
        let fill = args.optional_colour(Color::BLACK);
        Ok(Self {
            angle,
            exact,
            mode,
            filter_up,
            filter_down,
            fill,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        match self.exact {
            ExactRotation::Zero => return Ok(()),
            ExactRotation::Acw90 => {
                image.map_frames(image::imageops::rotate270);
                return Ok(());
            }
            ExactRotation::Cw90 => {
                image.map_frames(image::imageops::rotate90);
                return Ok(());
            }
            ExactRotation::R180 => {
                image.map_frames(image::imageops::rotate180);
                return Ok(());
            }
            ExactRotation::Off => {}
        }

        let (w, h) = (image.width(), image.height());
        let fill: Rgba<u8> = self.fill.into();

        // Post-rotation canvas policy is resolved once, from the source
        // geometry, so every frame lands on the same canvas.
        let final_dims = match self.mode {
            RotateMode::Fill => Some((w, h)),
            RotateMode::Crop => {
                let (cw, ch) = largest_interior_rect(w, h, self.angle);
                if cw == 0 || ch == 0 {
                    return Err(BatchError::geometry(
                        "rotate",
                        "crop of rotated content is empty",
                    ));
                }
                Some((cw, ch))
            }
            RotateMode::Resize => None,
        };

        image.try_map_frames(|src| {
            let rotated = match (self.filter_up, self.filter_down) {
                // No up/down scaling: nearest neighbour, colour-preserving.
                (ResampleFilter::None, _) => rotate_nearest(src, self.angle, fill),
                // Up and down filters: scale up, rotate nearest, scale back.
                (up, down) if down != ResampleFilter::None => {
                    let up_img =
                        resample(src, src.width() * 2, src.height() * 2, up, EdgeMode::Clamp);
                    let rot = rotate_nearest(&up_img, self.angle, fill);
                    resample(
                        &rot,
                        (rot.width() / 2).max(1),
                        (rot.height() / 2).max(1),
                        down,
                        EdgeMode::Clamp,
                    )
                }
                // Up filter only: the sharper path - pad to even and halve.
                (up, _) => {
                    let up_img =
                        resample(src, src.width() * 2, src.height() * 2, up, EdgeMode::Clamp);
                    let rot = rotate_nearest(&up_img, self.angle, fill);
                    let (rw, rh) = (rot.width(), rot.height());
                    let padded = if rw % 2 != 0 || rh % 2 != 0 {
                        recanvas(&rot, rw + rw % 2, rh + rh % 2, 0, 0, fill)
                    } else {
                        rot
                    };
                    resample(
                        &padded,
                        padded.width() / 2,
                        padded.height() / 2,
                        ResampleFilter::Box,
                        EdgeMode::Clamp,
                    )
                }
            };

            Ok(match final_dims {
                None => rotated,
                Some((fw, fh)) => {
                    let off = Anchor::MiddleMiddle
                        .offset((fw, fh), (rotated.width(), rotated.height()));
                    recanvas(&rotated, fw, fh, off.0, off.1, fill)
                }
            })
        })
    }
}

fn normalize_degrees(angle: f32) -> f32 {
    let mut a = angle % 360.0;
    if a <= -180.0 {
        a += 360.0;
    } else if a > 180.0 {
        a -= 360.0;
    }
    a
}

fn classify_exact(angle_rad: f32) -> ExactRotation {
    if angle_rad.abs() < EXACT_ANGLE_EPS {
        ExactRotation::Zero
    } else if (angle_rad - PI / 2.0).abs() < EXACT_ANGLE_EPS {
        ExactRotation::Acw90
    } else if (angle_rad + PI / 2.0).abs() < EXACT_ANGLE_EPS {
        ExactRotation::Cw90
    } else if (angle_rad.abs() - PI).abs() < EXACT_ANGLE_EPS {
        ExactRotation::R180
    } else {
        ExactRotation::Off
    }
}

/// Rotate with nearest-neighbour sampling into a canvas sized to the
/// rotated bounds. Pure inverse mapping; colours are preserved exactly.
fn rotate_nearest(src: &RgbaImage, angle: f32, fill: Rgba<u8>) -> RgbaImage {
    let (w, h) = (src.width() as f32, src.height() as f32);
    let (sin, cos) = angle.sin_cos();
    let (sin_a, cos_a) = (sin.abs(), cos.abs());
    let out_w = (w * cos_a + h * sin_a).ceil().max(1.0) as u32;
    let out_h = (w * sin_a + h * cos_a).ceil().max(1.0) as u32;

    let (cx, cy) = (w / 2.0, h / 2.0);
    let (ocx, ocy) = (out_w as f32 / 2.0, out_h as f32 / 2.0);

    RgbaImage::from_fn(out_w, out_h, |x, y| {
        let dx = x as f32 + 0.5 - ocx;
        let dy = y as f32 + 0.5 - ocy;
        // Screen y grows downward, so the inverse rotation flips sign.
        let sx = dx * cos - dy * sin + cx;
        let sy = dx * sin + dy * cos + cy;
        if sx >= 0.0 && sy >= 0.0 && sx < w && sy < h {
            *src.get_pixel(sx as u32, sy as u32)
        } else {
            fill
        }
    })
}

/// Largest axis-aligned rectangle fully inside a w x h rectangle rotated
/// by `angle`.
fn largest_interior_rect(w: u32, h: u32, angle: f32) -> (u32, u32) {
    let (w, h) = (w as f64, h as f64);
    let a = (angle as f64).abs() % std::f64::consts::PI;
    let a = if a > std::f64::consts::FRAC_PI_2 {
        std::f64::consts::PI - a
    } else {
        a
    };
    let (sin_a, cos_a) = (a.sin(), a.cos());
    let (side_long, side_short) = if w >= h { (w, h) } else { (h, w) };

    let (rw, rh) = if side_short <= 2.0 * sin_a * cos_a * side_long || (sin_a - cos_a).abs() < 1e-10
    {
        // Half-constrained: two opposite corners touch the long sides.
        let x = 0.5 * side_short;
        if w >= h {
            (x / sin_a, x / cos_a)
        } else {
            (x / cos_a, x / sin_a)
        }
    } else {
        let cos_2a = cos_a * cos_a - sin_a * sin_a;
        ((w * cos_a - h * sin_a) / cos_2a, (h * cos_a - w * sin_a) / cos_2a)
    };
    (rw.floor().max(0.0) as u32, rh.floor().max(0.0) as u32)
}

// ---------------------------------------------------------------------------
// Tonal adjustments

/// Apply `f` to the selected channels of the selected frames (frame -1 =
/// every frame), with values normalized to [0,1].
fn adjust_frames(
    op: &'static str,
    image: &mut BatchImage,
    frame_number: i64,
    channels: AdjustChannels,
    f: impl Fn(f32) -> f32,
) -> Result<(), BatchError> {
    let num_frames = image.num_frames() as i64;
    if frame_number >= num_frames {
        return Err(BatchError::geometry(
            op,
            format!("frame {frame_number} out of range ({num_frames} frames)"),
        ));
    }
    let indices = channels.indices();
    for (i, frame) in image.frames.iter_mut().enumerate() {
        if frame_number >= 0 && i as i64 != frame_number {
            continue;
        }
        for px in frame.pixels.pixels_mut() {
            for &c in indices {
                let v = px.0[c] as f32 / 255.0;
                px.0[c] = (f(v).clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    }
    Ok(())
}

/// levels[black, mid, white, out-black, out-white, frame, channels,
/// power-mid] - remap the input range with a midpoint gamma curve.
/// mid = -1 selects the midpoint automatically.
#[derive(Clone, Debug)]
pub struct LevelsOp {
    pub black: f32,
    pub mid: f32,
    pub white: f32,
    pub out_black: f32,
    pub out_white: f32,
    pub frame_number: i64,
    pub channels: AdjustChannels,
    pub power_mid_gamma: bool,
}

impl LevelsOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("levels", args);
        let black = args.required_f32("black-point")?;
        let mid = args.required_f32("mid-point")?;
        let white = args.required_f32("white-point")?;
        if !(0.0..=1.0).contains(&black) || !(0.0..=1.0).contains(&white) || black > white {
            return Err(BatchError::parse(
                "levels",
                "black/white",
                "need 0 <= black <= white <= 1",
            ));
        }
        if mid != -1.0 && !(black..=white).contains(&mid) {
            return Err(BatchError::parse(
                "levels",
                "mid-point",
                "need black <= mid <= white, or -1 for auto",
            ));
        }
        let out_black = args.optional_f32(0.0).clamp(0.0, 1.0);
        let out_white = args.optional_f32(1.0).clamp(0.0, 1.0);
        let frame_number = args.optional_i64(-1);
        let channels = args.optional(AdjustChannels::Rgb, AdjustChannels::from_token);
        let power_mid_gamma = args.optional_bool(true);
        Ok(Self {
            black,
            mid,
            white,
            out_black,
            out_white,
            frame_number,
            channels,
            power_mid_gamma,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        let (black, white) = (self.black, self.white);
        let mid = if self.mid < 0.0 {
            (black + white) / 2.0
        } else {
            self.mid
        };
        let range = (white - black).max(f32::EPSILON);
        // Relative midpoint, kept off the degenerate ends.
        let m = ((mid - black) / range).clamp(1e-4, 1.0 - 1e-4);
        let gamma = 0.5f32.ln() / m.ln();
        let (out_black, out_white) = (self.out_black, self.out_white);
        let power = self.power_mid_gamma;

        adjust_frames("levels", image, self.frame_number, self.channels, move |v| {
            let t = ((v - black) / range).clamp(0.0, 1.0);
            let t = if power {
                t.powf(gamma)
            } else if t <= m {
                0.5 * t / m
            } else {
                0.5 + 0.5 * (t - m) / (1.0 - m)
            };
            out_black + t * (out_white - out_black)
        })
    }
}

/// contrast[contrast, frame, channels] - scalar contrast about 0.5.
#[derive(Clone, Debug)]
pub struct ContrastOp {
    pub contrast: f32,
    pub frame_number: i64,
    pub channels: AdjustChannels,
}

impl ContrastOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("contrast", args);
        let contrast = args.required_f32("contrast")?;
        if !(0.0..=1.0).contains(&contrast) {
            return Err(BatchError::parse("contrast", "contrast", "need 0 <= c <= 1"));
        }
        let frame_number = args.optional_i64(-1);
        let channels = args.optional(AdjustChannels::Rgb, AdjustChannels::from_token);
        Ok(Self {
            contrast,
            frame_number,
            channels,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        // Slope 1 at the neutral 0.5; saturates toward a step function.
        let slope = (self.contrast.min(0.9999) * PI / 2.0).tan();
        adjust_frames("contrast", image, self.frame_number, self.channels, move |v| {
            (v - 0.5) * slope + 0.5
        })
    }
}

/// brightness[brightness, frame, channels] - scalar offset about 0.5.
#[derive(Clone, Debug)]
pub struct BrightnessOp {
    pub brightness: f32,
    pub frame_number: i64,
    pub channels: AdjustChannels,
}

impl BrightnessOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("brightness", args);
        let brightness = args.required_f32("brightness")?;
        if !(0.0..=1.0).contains(&brightness) {
            return Err(BatchError::parse(
                "brightness",
                "brightness",
                "need 0 <= b <= 1",
            ));
        }
        let frame_number = args.optional_i64(-1);
        let channels = args.optional(AdjustChannels::Rgb, AdjustChannels::from_token);
        Ok(Self {
            brightness,
            frame_number,
            channels,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        let offset = 2.0 * self.brightness - 1.0;
        adjust_frames(
            "brightness",
            image,
            self.frame_number,
            self.channels,
            move |v| v + offset,
        )
    }
}

// ---------------------------------------------------------------------------
// Palette

/// quantize[method, colours, check-exact, samp-filt, dither] - reduce
/// the palette to at most `colours` distinct colours.
#[derive(Clone, Debug)]
pub struct QuantizeOp {
    pub method: QuantizeMethod,
    pub num_colours: usize,
    pub check_exact: bool,
    pub samp_filt: ResampleFilter,
    pub dither: f64,
}

impl QuantizeOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("quantize", args);
        let method = args.required("method", QuantizeMethod::from_token)?;
        let num_colours = args.required_i64("colours")?;
        if !(2..=256).contains(&num_colours) {
            return Err(BatchError::parse(
                "quantize",
                "colours",
                "need 2 <= colours <= 256",
            ));
        }
        let check_exact = args.optional_bool(true);
        // Sample filter ids: 1=nearest 2=box 3=bilinear 4=bicubic
        // 5=lanczos. 0 is reserved-invalid.
        let samp_filt = match args.next() {
            Some(tok) if tok != "*" => match tok.parse::<u32>() {
                Ok(0) => {
                    return Err(BatchError::parse(
                        "quantize",
                        "samp-filt",
                        "sample filter id 0 is invalid",
                    ))
                }
                Ok(1) => ResampleFilter::Nearest,
                Ok(2) => ResampleFilter::Box,
                Ok(3) => ResampleFilter::Bilinear,
                Ok(4) => ResampleFilter::Bicubic,
                Ok(5) => ResampleFilter::Lanczos,
                _ => ResampleFilter::Nearest,
            },
            _ => ResampleFilter::Nearest,
        };
        let dither = args.next().and_then(|t| if t == "*" { None } else { t.parse().ok() });
        let dither: f64 = dither.unwrap_or(0.0);
        if dither < 0.0 {
            return Err(BatchError::parse("quantize", "dither", "must be >= 0"));
        }
        Ok(Self {
            method,
            num_colours: num_colours as usize,
            check_exact,
            samp_filt,
            dither,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        let params = QuantizeParams {
            method: self.method,
            num_colours: self.num_colours,
            check_exact: self.check_exact,
            samp_filt: self.samp_filt,
            dither: self.dither,
        };
        quantize::quantize_frames(&mut image.frames, &params)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Channels

/// channel[mode, channels, colour] - per-channel manipulation.
#[derive(Clone, Debug)]
pub struct ChannelOp {
    pub mode: ChannelOpMode,
    pub channels: ChannelMask,
    pub colour: Color,
}

impl ChannelOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("channel", args);
        let mode = args.optional(ChannelOpMode::Blend, ChannelOpMode::from_token);
        let default_mask = match mode {
            ChannelOpMode::Set => ChannelMask::RGB,
            ChannelOpMode::Blend => ChannelMask::RGBA,
            ChannelOpMode::Spread => ChannelMask::R,
            ChannelOpMode::Intensity => ChannelMask::RGB,
        };
        let channels = args.optional(default_mask, ChannelMask::from_token);
        if mode == ChannelOpMode::Spread && channels.single().is_none() {
            return Err(BatchError::parse(
                "channel",
                "channels",
                "spread needs exactly one source channel",
            ));
        }
        let colour = args.optional_colour(Color::BLACK);
        Ok(Self {
            mode,
            channels,
            colour,
        })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        let (mode, mask, colour) = (self.mode, self.channels, self.colour);
        for frame in &mut image.frames {
            for px in frame.pixels.pixels_mut() {
                match mode {
                    ChannelOpMode::Set => write_masked(px, colour, mask),
                    ChannelOpMode::Blend => {
                        let alpha = px.0[3] as f32 / 255.0;
                        for c in 0..3 {
                            let bit = [ChannelMask::R, ChannelMask::G, ChannelMask::B][c];
                            if mask.contains(bit) {
                                let fg = px.0[c] as f32;
                                let bg = colour.component(channel_at(c)) as f32;
                                px.0[c] = (fg * alpha + bg * (1.0 - alpha)).round() as u8;
                            }
                        }
                        if mask.contains(ChannelMask::A) {
                            px.0[3] = colour.a;
                        }
                    }
                    ChannelOpMode::Spread => {
                        // parse guarantees a single source channel
                        let src = mask.single().unwrap_or(Channel::R);
                        let v = px.0[src.index()];
                        px.0[0] = v;
                        px.0[1] = v;
                        px.0[2] = v;
                    }
                    ChannelOpMode::Intensity => {
                        let y = Color::from(*px).intensity();
                        let c = Color::new(y, y, y, y);
                        write_masked(px, c, mask);
                    }
                }
            }
        }
        Ok(())
    }
}

fn channel_at(index: usize) -> Channel {
    match index {
        0 => Channel::R,
        1 => Channel::G,
        2 => Channel::B,
        _ => Channel::A,
    }
}

/// swizzle[r, g, b, a] - per-output-channel source assignment, all four
/// evaluated against the original pixel simultaneously.
#[derive(Clone, Debug)]
pub struct SwizzleOp {
    pub r: SwizzleSource,
    pub g: SwizzleSource,
    pub b: SwizzleSource,
    pub a: SwizzleSource,
}

impl SwizzleOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("swizzle", args);
        let r = args.optional(SwizzleSource::Component(Channel::R), SwizzleSource::from_token);
        let g = args.optional(SwizzleSource::Component(Channel::G), SwizzleSource::from_token);
        let b = args.optional(SwizzleSource::Component(Channel::B), SwizzleSource::from_token);
        let a = args.optional(SwizzleSource::Component(Channel::A), SwizzleSource::from_token);
        Ok(Self { r, g, b, a })
    }

    fn apply(&self, image: &mut BatchImage) -> Result<(), BatchError> {
        for frame in &mut image.frames {
            for px in frame.pixels.pixels_mut() {
                let original = *px;
                px.0[0] = self.r.sample(original);
                px.0[1] = self.g.sample(original);
                px.0[2] = self.b.sample(original);
                px.0[3] = self.a.sample(original);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Frame extraction

/// extract[frames, sub-folder, basename] - write selected frames as
/// individual PNGs under the image's directory. Indices beyond the
/// actual frame count are silently skipped.
#[derive(Clone, Debug)]
pub struct ExtractOp {
    /// None selects every frame.
    pub frames: Option<IntervalSet>,
    pub sub_folder: String,
    pub base_name: Option<String>,
}

impl ExtractOp {
    fn parse(args: &str) -> Result<Self, BatchError> {
        let mut args = Args::new("extract", args);
        let frames = match args.next() {
            Some(tok) if tok != "*" => {
                let set = IntervalSet::from_token(tok);
                if set.is_empty() {
                    return Err(BatchError::parse(
                        "extract",
                        "frames",
                        format!("'{tok}' selects no frames"),
                    ));
                }
                Some(set)
            }
            _ => None,
        };
        let sub_folder = args.optional_string("Extracted");
        let base_name = match args.next() {
            Some(tok) if tok != "*" => Some(tok.to_string()),
            _ => None,
        };
        Ok(Self {
            frames,
            sub_folder,
            base_name,
        })
    }

    fn apply(&self, image: &mut BatchImage, ctx: &BatchContext) -> Result<(), BatchError> {
        let num_frames = image.num_frames();
        let indices: Vec<usize> = match &self.frames {
            None => (0..num_frames).collect(),
            Some(set) => set.indices_below(num_frames),
        };
        let base = self.base_name.clone().unwrap_or_else(|| image.name.clone());
        let dir = image.dir.join(&self.sub_folder);
        for index in indices {
            let path = dir.join(format!("{base}_{index:03}.png"));
            ctx.claim_output(&path)?;
            write_png(&image.frames[index].pixels, &path)?;
            tracing::debug!(path = %path.display(), "extracted frame");
        }
        Ok(())
    }
}
