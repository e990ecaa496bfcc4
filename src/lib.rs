// lib.rs
//
// batch-image: a batch image-operation pipeline.
//
// Two stages: an ordered list of per-image operations (resize, crop,
// rotate, levels, quantize, ...) applied to each image independently,
// then post-operations (combine, contact) that consume the whole
// processed set. Operations parse and validate their argument strings at
// construction; codec and kernel math is delegated to the image crate.

pub mod color;
pub mod error;
pub mod image;
pub mod interval;
pub mod ops;
pub mod pipeline;
pub mod policy;
pub mod postops;
pub mod quantize;

pub use crate::image::{BatchImage, Frame, DEFAULT_FRAME_DURATION_MS};
pub use color::{AdjustChannels, Channel, ChannelMask, Color, SwizzleSource};
pub use error::BatchError;
pub use interval::{Interval, IntervalSet};
pub use ops::Operation;
pub use pipeline::{Batch, BatchContext, BatchReport, Pipeline};
pub use postops::PostOperation;
