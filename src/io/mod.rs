pub mod overlap_source;
pub mod sequence_source;

pub use overlap_source::{create_overlap_source, OverlapSource};
pub use sequence_source::{create_sequence_source, SequenceSource};
