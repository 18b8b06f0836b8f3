// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Common library functions for bootkeeper
//!
//! Two supervision roles built from the same pieces:
//!   - [`supervisor::ServiceSupervisor`] keeps an ordered set of services running, guarded by
//!     locked pid files, and tears them down in reverse order
//!   - [`watchdog::ReadinessWatchdog`] launches one daemon and kills it if it never becomes ready

pub mod config;
mod error;
pub mod fork;
pub mod logging;
pub mod marker;
pub mod pipe;
pub mod procs;
pub mod readiness;
pub mod retry;
pub mod service;
pub mod signals;
pub mod supervisor;
pub mod watchdog;

pub use error::{Error, ErrorKind};
