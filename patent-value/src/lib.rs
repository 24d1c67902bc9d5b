//! Patent Value Library
//!
//! Estimates the economic value of patents from the stock-market reaction to
//! their grant, using a truncated-normal signal model, and spreads each
//! firm-day's value evenly over the patents granted that day.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   ┌─────────────────────┐   ┌─────────────────────────┐
//! │  EventTable   │──▶│ Valuation Transform │──▶│  Allocator/Aggregator   │──▶ FirmDayTable
//! │ (one patent)  │   │   (row-wise, pure)  │   │ (group by firm, date)   │   (one firm-day)
//! └───────────────┘   └─────────────────────┘   └─────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Informativeness
//! - `delta = 1 - exp(-gamma)`: share of the event-window return variance
//!   attributable to the patent signal
//!
//! ## Standardized surprise
//! - `a = -sqrt(delta) * R / v`: truncation point of a standard normal
//! - The inverse Mills ratio at `a` gives the expected excess signal
//!
//! ## Firm-day allocation
//! - All patents granted to one firm on one day share its value equally

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod allocation;
pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod transform;

pub use allocation::{allocate_firm_days, AggregationDiagnostics, Allocator};
pub use error::{ErrorKind, Result, ValuationError};
pub use pipeline::{Pipeline, PipelineOptions, PipelineRun};
pub use record::{
    AggregatedRecord, AllocatedRecord, AllocatedTable, EventRecord, EventTable, FirmDayTable,
    Passthrough, ValuedRecord, ValuedTable,
};
pub use transform::{value_events, TransformDiagnostics, ValuationModel};
