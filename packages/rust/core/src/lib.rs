//! Run orchestration for the statute scraper.
//!
//! This crate ties together catalog traversal, document assembly, and
//! subsidiary expansion into one run, and owns the destination folder
//! (confirmation policy, `{shorthand}.html` files).

pub mod destination;
pub mod pipeline;

pub use destination::{
    AutoAccept, AutoReject, CallbackPolicy, ConfirmationPolicy, DestinationPrompt, DirectorySink,
    DocumentSink, prepare_destination,
};
pub use pipeline::{FailedItem, ProgressReporter, RunSummary, Runner, SilentProgress};
