//! Error taxonomy for the rendering core.
//!
//! Configuration mutators are transactional: when one of these errors is
//! returned the previously installed fonts and metrics remain valid.

use thiserror::Error;

/// Errors surfaced by the public configuration and rendering operations.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The sprite atlas has no free slots left under the installed limits.
    ///
    /// Raised by any cache-miss allocation once the layer cursor has run past
    /// the final layer. Callers typically reconfigure with larger limits.
    #[error("out of texture space for sprites")]
    AtlasExhausted,

    /// A font face could not be opened, sized, or measured.
    #[error("font face operation failed: {0:#}")]
    FaceLoad(anyhow::Error),

    /// The medium face produced a zero advance for every ASCII codepoint.
    #[error("failed to calculate cell width for the specified font")]
    ZeroCellWidth,

    /// Cell metrics fell outside the supported range after the user's
    /// line-height adjustments were applied.
    #[error("bad cell metrics: {0}")]
    BadMetrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RenderError::AtlasExhausted.to_string(),
            "out of texture space for sprites"
        );
        assert!(RenderError::BadMetrics("line height too small after adjustment".into())
            .to_string()
            .contains("too small"));
    }
}
