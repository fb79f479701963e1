pub mod amounts;
pub mod engine;
pub mod line_matcher;
pub mod shipments;
pub mod variance;

pub use engine::{derive_status, match_invoice, MatchEngine, MatchSettings};
pub use line_matcher::{amount_similarity, description_similarity, LineMatch, LineMatcher};
pub use shipments::{aggregate_receipt_lines, analyze_shipments, multi_shipment_confidence};
pub use variance::{ReferenceSide, VarianceAnalyzer};
