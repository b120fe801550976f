pub mod batch_writer;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod row_source;
pub mod schema;
pub mod table_importers;

pub use error::ImportError;
pub use orchestrator::{FeedImporter, ImportOptions, ImportReport};
pub use progress::{ProgressSink, SilentProgress, TerminalProgress};
pub use table_importers::FeedTable;
