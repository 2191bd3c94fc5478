// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Docflow — Core types, configuration, errors and capability traits shared
// across all crates.

pub mod capability;
pub mod config;
pub mod error;
pub mod human_errors;
pub mod integrity;
pub mod language;
pub mod types;

pub use config::ServiceConfig;
pub use error::{CapabilityError, DocflowError};
pub use types::*;
