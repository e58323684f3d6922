//! Data structures for expression analysis

mod count_matrix;
mod dataset;
mod metadata;

pub use count_matrix::CountMatrix;
pub use dataset::ExpressionDataSet;
pub use metadata::{SampleMetadata, SURROGATE_PREFIX};
