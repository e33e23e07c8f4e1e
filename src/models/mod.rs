//! Domain models.

mod document;
mod step;

pub use document::{Document, DocumentStatus};
pub use step::{ProcessingStep, Stage, StepStatus};
