// src/policy.rs
//
// Shared policy vocabulary: anchor points, resample filters, edge modes
// and the per-operation mode enums. Every enum parses a case-insensitive
// short name; optional-field tolerance (keep the default on a bad name)
// is handled by the argument cursor in ops.rs.

use image::imageops::FilterType;

/// One of 9 fixed reference points used to place content within a canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Anchor {
    TopLeft,
    TopMiddle,
    TopRight,
    MiddleLeft,
    MiddleMiddle,
    MiddleRight,
    BottomLeft,
    BottomMiddle,
    BottomRight,
}

impl Anchor {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "tl" => Some(Self::TopLeft),
            "tm" | "tc" => Some(Self::TopMiddle),
            "tr" => Some(Self::TopRight),
            "ml" => Some(Self::MiddleLeft),
            "mm" | "c" | "center" | "centre" => Some(Self::MiddleMiddle),
            "mr" => Some(Self::MiddleRight),
            "bl" => Some(Self::BottomLeft),
            "bm" | "bc" => Some(Self::BottomMiddle),
            "br" => Some(Self::BottomRight),
            _ => None,
        }
    }

    /// Offset of `content` placed inside `container` (top-left origin).
    /// Negative when the content is larger than the container.
    pub fn offset(&self, container: (u32, u32), content: (u32, u32)) -> (i64, i64) {
        let dx = container.0 as i64 - content.0 as i64;
        let dy = container.1 as i64 - content.1 as i64;
        let col = match self {
            Self::TopLeft | Self::MiddleLeft | Self::BottomLeft => 0,
            Self::TopMiddle | Self::MiddleMiddle | Self::BottomMiddle => dx / 2,
            Self::TopRight | Self::MiddleRight | Self::BottomRight => dx,
        };
        let row = match self {
            Self::TopLeft | Self::TopMiddle | Self::TopRight => 0,
            Self::MiddleLeft | Self::MiddleMiddle | Self::MiddleRight => dy / 2,
            Self::BottomLeft | Self::BottomMiddle | Self::BottomRight => dy,
        };
        (col, row)
    }
}

/// Resample kernel selection. `None` disables resampling (nearest-only
/// fast paths); the rest map onto the image crate's filter kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResampleFilter {
    None,
    Nearest,
    Box,
    Bilinear,
    Bicubic,
    Lanczos,
}

impl ResampleFilter {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "none" => Some(Self::None),
            "nearest" => Some(Self::Nearest),
            "box" => Some(Self::Box),
            "bilinear" => Some(Self::Bilinear),
            "bicubic" => Some(Self::Bicubic),
            "lanczos" => Some(Self::Lanczos),
            _ => None,
        }
    }

    /// The image-crate kernel; `None` falls back to nearest. The image
    /// crate ships no box kernel, so `Box` shares `Triangle` with
    /// `Bilinear`.
    pub fn kernel(&self) -> FilterType {
        match self {
            Self::None | Self::Nearest => FilterType::Nearest,
            Self::Box => FilterType::Triangle,
            Self::Bilinear => FilterType::Triangle,
            Self::Bicubic => FilterType::CatmullRom,
            Self::Lanczos => FilterType::Lanczos3,
        }
    }
}

/// Out-of-bounds sample behaviour for resampling. Wrap supports
/// tileable textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeMode {
    Clamp,
    Wrap,
}

impl EdgeMode {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "clamp" => Some(Self::Clamp),
            "wrap" => Some(Self::Wrap),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlipMode {
    Horizontal,
    Vertical,
}

impl FlipMode {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "h" | "horizontal" => Some(Self::Horizontal),
            "v" | "vertical" => Some(Self::Vertical),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CropMode {
    Absolute,
    Relative,
}

impl CropMode {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "abs" | "absolute" => Some(Self::Absolute),
            "rel" | "relative" => Some(Self::Relative),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AspectMode {
    Crop,
    Letterbox,
}

impl AspectMode {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "crop" => Some(Self::Crop),
            "letter" | "letterbox" => Some(Self::Letterbox),
            _ => None,
        }
    }
}

/// Post-rotation canvas handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotateMode {
    /// Keep the original canvas size; exposed corners get the fill colour.
    Fill,
    /// Trim to the largest rectangle fully inside the rotated content.
    Crop,
    /// Grow the canvas to exactly contain the rotated content.
    Resize,
}

impl RotateMode {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "fill" => Some(Self::Fill),
            "crop" => Some(Self::Crop),
            "resize" => Some(Self::Resize),
            _ => None,
        }
    }
}

/// Lossless rotation fast paths. Pure re-indexing, no resampling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExactRotation {
    Off,
    Zero,
    Acw90,
    Cw90,
    R180,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOpMode {
    Set,
    Blend,
    Spread,
    Intensity,
}

impl ChannelOpMode {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "set" => Some(Self::Set),
            "blend" => Some(Self::Blend),
            "spread" => Some(Self::Spread),
            "intensity" | "intens" => Some(Self::Intensity),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantizeMethod {
    /// Uniform fixed palette (colour-count-derived RGB levels).
    Fixed,
    /// NeuQuant over a filter-downsampled sample set.
    Spatial,
    /// NeuQuant over the full image.
    Neu,
}

impl QuantizeMethod {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "fixed" | "fix" => Some(Self::Fixed),
            "spatial" | "spat" => Some(Self::Spatial),
            "neu" => Some(Self::Neu),
            _ => None,
        }
    }
}
