//! Domain models for drug safety verification.

mod allergy;
mod audit;
mod check;
mod concept;
mod conflict;
mod interaction;

pub use allergy::*;
pub use audit::*;
pub use check::*;
pub use concept::*;
pub use conflict::*;
pub use interaction::*;
