// SPDX-License-Identifier: MIT

//! Supervision of the long-lived analysis server process.

pub mod process;
pub mod registry;

pub use process::ServerHandle;
pub use registry::{global, install_global, ServerLease, ServerRegistry};
