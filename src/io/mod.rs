//! Input/Output: delimited tables and JSON snapshots

mod csv;
mod snapshot;

pub use self::csv::{
    open_delimited, read_contrast_result, read_count_matrix, read_metadata, sniff_delimiter, write_contrast_result,
    write_count_matrix, write_normalized_counts, write_records,
};
pub use snapshot::{nullable_f64, nullable_f64_vec, read_json, write_json};
