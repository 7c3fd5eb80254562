use thiserror::Error;

/// Errors surfaced by the entropy-coding core.
///
/// Every error is local to one code-block session; callers decide whether a
/// failed block degrades to zero output or aborts the image.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingError {
    #[error("Invalid code-block width")]
    InvalidWidth,
    #[error("Invalid code-block height")]
    InvalidHeight,
    #[error("Invalid coefficient bit depth")]
    InvalidBitDepth,
    #[error("Invalid ROI shift")]
    InvalidRoiShift,
    #[error("Coefficient count does not match code-block dimensions")]
    DataSizeMismatch,
    #[error("Pass length table is empty or not monotonically non-decreasing")]
    InvalidPassLengths,
    #[error("Compressed stream ends before a non-final pass completes")]
    TruncatedStream,
}
