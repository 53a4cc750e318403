//! Inference layer for medpath: regression fitters, effect decomposition,
//! and the mediation / moderation entry points.
//!
//! The pipeline behind each entry point is the same: screen the data,
//! build design matrices, fit the models, decompose the effects, and
//! bootstrap the indirect effect.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod effects;
pub mod formula;
pub mod lmm;
pub mod mediation;
pub mod mle;
pub mod moderation;
pub mod multilevel;
pub mod ols;
pub mod optimizer;
pub mod screen;

pub use bootstrap::{BootstrapCi, CiMethod};
pub use effects::{SobelTest, SobelVariant};
pub use formula::{DesignBuilder, Term};
pub use lmm::{fit_lmm, LmmFit, LmmModel, RandomEffects};
pub use mediation::{mediate, AnalysisOptions, IndirectEffect, MediationResult, MediationSpec};
pub use mle::MaximumLikelihoodEstimator;
pub use moderation::{moderate, ModerationResult, ModerationSpec, SimpleSlope};
pub use multilevel::{
    mediate_multilevel, MultilevelMediationResult, MultilevelMediationSpec, RandomSpec,
};
pub use ols::{fit_ols, OlsFit};
pub use screen::{screen, OutlierPolicy, ScreeningReport};
