//! Generalized Linear Model fitting for negative binomial data

mod design;
mod fitting;
pub(crate) mod linalg;
mod negative_binomial;

pub use design::{build_design, check_full_rank, create_design_matrix, DesignInfo};
pub use fitting::{fit_gene, fit_model, GeneFit, GlmFitParams, ModelFit};
pub(crate) use fitting::xtwx;
pub use negative_binomial::{nb_log_likelihood, nb_mean, nb_variance, nb_weight, MAX_LFC_BETA, MIN_MU};
