pub mod scheduler;

pub use scheduler::{AnalysisContext, CancelToken, ExportScheduler, ExportState};
