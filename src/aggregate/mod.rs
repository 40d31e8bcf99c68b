pub mod aggregator;
pub mod export;

pub use aggregator::{aggregate, duplicate_currencies, AggregationPolicy, ExportMetadata};
pub use export::{render_yaml, JsonExport, RowSummary};
