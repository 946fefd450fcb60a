//! Annotation task formats.
//!
//! This crate converts annotation tasks between the two layouts the
//! annotation service and its consumers exchange:
//!
//! - the **flat** layout ([`Task`]): every label of a task in one list, with
//!   per-annotator copies attached as `consensusTasks` when the task is
//!   reviewed by several annotators;
//! - the **series** layout ([`StructuredTask`]): labels distributed into
//!   per-volume buckets (landmarks, bounding boxes, measurements, ...).
//!
//! ## Component Overview
//!
//! - `label`: the lossless flat label record and its shape dispatch
//! - `raw`: per-annotator records as returned for the current stage
//! - `flatten`: raw fields to [`Task`] ([`flat_rb_format`])
//! - `consensus`: multi-annotator detection and per-entry structuring
//! - `series`: label distribution into volumes ([`dicom_rb_series`])
//! - `structure`: [`Task`] to series or legacy output ([`dicom_rb_format`])
//!
//! Nothing here performs I/O.

use serde::{Deserialize, Deserializer};

pub mod consensus;
pub mod flatten;
pub mod label;
pub mod raw;
pub mod series;
pub mod structure;
pub mod task;

pub use consensus::{Consensus, StructuredConsensusEntry, aggregate};
pub use flatten::{TaskFields, flat_rb_format};
pub use label::{Category, Label, LabelShape};
pub use raw::RawSubTask;
pub use series::{Series, SeriesBundle, dicom_rb_series};
pub use structure::{FormatOptions, FormattedTask, LegacyTask, StructuredTask, dicom_rb_format};
pub use task::{ConsensusEntry, LabelMapEntry, Score, SeriesInfo, Task};

/// Treat an explicit `null` like a missing key.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
