//! Session factories.
//!
//! - [`simulated`]: an in-memory portal used for dry runs and tests
//! - `chromium`: a real browser over CDP, behind the `chromium` feature

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod simulated;

#[cfg(feature = "chromium")]
pub use chromium::ChromiumFactory;
pub use simulated::{
    Fault, FaultRule, PortalModel, SectionModel, SessionView, SimulatedPortal,
    SimulatedPortalFactory,
};
