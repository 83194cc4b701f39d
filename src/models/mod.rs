//! Data models for harvestlake.

mod domain;
mod product;
mod record;
mod report;
mod run;

pub use domain::Domain;
pub use product::{derive_sku, NewProduct, PricePoint, Product, MAX_RATING, UNKNOWN_CATEGORY};
pub use record::{
    number_cell, Availability, BookRecord, CleanRecord, CommerceRecord, PartnerRecord, QuoteRecord,
    CLEANED_AT_COLUMN,
};
pub use report::{RunReport, RunState, Step, StepFailure, StepResult, StepStatus};
pub use run::{RunCounts, RunLogEntry, RunStatus};
