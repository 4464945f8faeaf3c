//! # dj-inference
//!
//! Fitted and normalized derivation steps of the correlation pipeline:
//!
//! - mixed-event normalization and pair-acceptance correction ([`mixing`])
//! - Fourier fit of the long-range background in Δφ ([`background`])
//! - polynomial seagull correction of the Δη pedestal ([`seagull`])
//! - the bounded L-BFGS minimizer both are built on ([`optimizer`])
//!
//! Every step takes distributions by reference and returns new ones.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Long-range background model, fit and subtraction.
pub mod background;
/// Mixed-event normalization.
pub mod mixing;
/// Bounded L-BFGS minimizer (argmin backend).
pub mod optimizer;
/// Seagull correction.
pub mod seagull;

pub use background::{BackgroundConfig, BackgroundFit, BackgroundModel, FitReport, FourierBackground};
pub use mixing::{MixedEventNormalizer, MixingConfig, MixingMode, NormalizedMixedEvent, OffPeakWindow};
pub use optimizer::{LbfgsbMinimizer, Minimum, MinimizerConfig, Objective};
pub use seagull::{SeagullConfig, SeagullCorrection, SeagullFit};
