//! Ad break insertion
//!
//! Two halves: [`placement`] is the pure planning step that turns
//! configured spots into a filtered, time-ascending mid-roll queue, and
//! [`scheduler`] is the runtime state machine that activates breaks
//! against the ad media element and hands control back to the main
//! content. All shared state lives in the player store; the scheduler
//! never mutates anything the engine manager or coordinator owns.

pub mod placement;
pub mod scheduler;

pub use placement::{materialize, plan_mid_rolls};
pub use scheduler::AdScheduler;
