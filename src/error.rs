// src/error.rs
//
// Unified error handling for batch-image
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - ParseError: bad/missing argument token, caught at construction
// - GeometryError: degenerate geometry at apply time (per-image failure)
// - QuantizeError: invalid sample filter / degenerate palette
// - OutputCollision: two writers claimed the same output path
// - File/encode errors: surfaced from the image collaborator

use std::borrow::Cow;
use std::path::PathBuf;
use thiserror::Error;

/// batch-image error types
///
/// Parse errors invalidate an operation at construction time; it never
/// enters a pipeline. Apply-time errors fail one operation on one image
/// and leave the image in its pre-operation state.
#[derive(Debug, Error)]
pub enum BatchError {
    // Construction errors
    #[error("Invalid argument for '{op}' ({arg}): {reason}")]
    ParseError {
        op: Cow<'static, str>,
        arg: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("Unknown operation: '{name}'")]
    UnknownOperation { name: Cow<'static, str> },

    // Apply-time errors
    #[error("Geometry failure in '{op}': {reason}")]
    GeometryError {
        op: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("Quantize failure: {reason}")]
    QuantizeError { reason: Cow<'static, str> },

    #[error("Output path already claimed: {path}")]
    OutputCollision { path: PathBuf },

    #[error("Post-operation '{post}' skipped: no images to process")]
    NoImages { post: Cow<'static, str> },

    // I/O delegated to the image collaborator
    #[error("Failed to write file '{path}': {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },
}

impl BatchError {
    pub fn parse(
        op: impl Into<Cow<'static, str>>,
        arg: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ParseError {
            op: op.into(),
            arg: arg.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_operation(name: impl Into<Cow<'static, str>>) -> Self {
        Self::UnknownOperation { name: name.into() }
    }

    pub fn geometry(
        op: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::GeometryError {
            op: op.into(),
            reason: reason.into(),
        }
    }

    pub fn quantize(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::QuantizeError {
            reason: reason.into(),
        }
    }

    pub fn output_collision(path: impl Into<PathBuf>) -> Self {
        Self::OutputCollision { path: path.into() }
    }

    pub fn no_images(post: impl Into<Cow<'static, str>>) -> Self {
        Self::NoImages { post: post.into() }
    }

    pub fn file_write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            source,
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    /// True for errors raised while constructing an operation (the
    /// operation never entered a pipeline).
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::ParseError { .. } | Self::UnknownOperation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_message_names_op_and_arg() {
        let err = BatchError::parse("resize", "width", "expected an integer >= 4");
        let msg = err.to_string();
        assert!(msg.contains("resize"));
        assert!(msg.contains("width"));
        assert!(err.is_parse_error());
    }

    #[test]
    fn geometry_error_is_not_parse_error() {
        let err = BatchError::geometry("deborder", "scan consumed the whole image");
        assert!(!err.is_parse_error());
    }
}
