// Serial-section reconstruction and attribution
//
// A serial section is a maximal interval during which one lock is held by one
// cpu at nesting depth 0, or a single access made while no lock is held at all.
// LockManager turns the interleaved lock/access stream into completed sections;
// SerialSections folds them into per-(lock or address, object) statistics with
// per-call-site and per-thread breakdowns.
//
// Sections whose acquiring and releasing cpu differ are counted as mismatches
// and never charged to a cpu's cycle budget.

mod lock_manager;
mod section;
mod sections;
mod stat;
mod summary;

pub use lock_manager::{AccessOutcome, LockManager};
pub use section::SerialSection;
pub use sections::SerialSections;
pub use stat::{SectionKind, SerialSectionKey, SerialSectionStat};
pub use summary::SerialSectionSummary;

#[cfg(test)]
mod tests;
