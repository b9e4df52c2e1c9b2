pub mod catalog;
pub mod command;
pub mod error;
pub mod events;
pub mod exporter;
pub mod job;
pub mod request;

pub use catalog::{CatalogArchive, ClearReport, FetchedFile, FileCategory, OutputCatalog, OutputFile};
pub use command::LaunchSpec;
pub use error::{CatalogError, ExporterError, RequestError};
pub use events::{Delivery, EventRelay, LogLine, LogStream, RelayEvent, RelayPayload, Subscription};
pub use exporter::{ConfigValue, ConfigWriter, ExporterConfig, materialize};
pub use job::{Job, JobState};
pub use request::{GenerationRequest, OutputFormat};
