use thiserror::Error;

/// Errors raised by the patch embedding layer itself.
///
/// Everything else (wrong channel count, wrong rank, device mismatches)
/// propagates unmodified as `candle_core::Error` from the underlying
/// tensor primitives.
#[derive(Debug, Error)]
pub enum PatchEmbedError {
    #[error("input image size ({actual_h}x{actual_w}) doesn't match model ({expected_h}x{expected_w})")]
    ShapeMismatch {
        expected_h: usize,
        expected_w: usize,
        actual_h: usize,
        actual_w: usize,
    },
}
