//! Request routing and response arbitration
//!
//! - [`SmartRouter`]: inverted-index lexical matcher with a
//!   health-aware tiebreaker over agent descriptors.
//! - [`Arbiter`]: first-committer-wins election for one response
//!   round.

pub mod arbiter;
pub mod router;

pub use arbiter::Arbiter;
pub use router::SmartRouter;
