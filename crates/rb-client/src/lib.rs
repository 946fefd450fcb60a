//! Client for exporting and uploading annotation tasks.
//!
//! ## Component Overview
//!
//! - `pagination`: cursor-paginated queries as one lazy item sequence
//! - `executor`: bounded-concurrency execution that never cancels on failure
//! - `service`: the [`AnnotationService`] seam and its GraphQL implementation
//! - `export`: paged task export through the flat/series converters
//! - `upload`: bulk datapoint creation returning the failed entries
//! - `masks`: mask directory manifests for mask-based uploads
//!
//! Format conversion itself lives in the `rb-format` crate.

pub mod config;
pub mod error;
pub mod executor;
pub mod export;
pub mod graphql;
pub mod masks;
pub mod pagination;
pub mod records;
pub mod service;
pub mod upload;

pub use config::ClientConfig;
pub use error::{ClientError, Result, UploadError};
pub use executor::BoundedExecutor;
pub use export::{Export, ExportMode, ExportResult};
pub use graphql::GraphQlService;
pub use masks::{ClassMap, MaskPolygonizer, MaskRegion};
pub use pagination::{Page, PaginationIterator};
pub use records::RawTaskRecord;
pub use service::{AnnotationService, OutputInfo};
pub use upload::{DatapointEntry, FailedEntry, Upload};
