//! Session driving: the seam to the interactive target and the steps run against it.
//!
//! - [`Surface`]: what a backend must implement (probe, click, type, inspect)
//! - [`Session`]: one exclusive surface, opened per job and released after it
//! - [`StepExecutor`]: the form steps, with bounded waits, locator fallback
//!   and idempotent toggles
//! - [`DispatchTable`]: maps schema parameters to step handlers

pub mod dispatch;
pub mod session;
pub mod steps;
pub mod surface;
pub mod wait;

pub use dispatch::{DispatchTable, ParameterStep, StepHandler};
pub use session::{Session, SessionFactory};
pub use steps::{artifact_path, StepExecutor};
pub use surface::{Anchor, ControlKind, ElementHandle, Group, Locator, Strategy, Surface};
pub use wait::Waiter;
