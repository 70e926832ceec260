// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bildwerk — Core types, option blocks and error definitions shared by the
// image engine crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AxisPair, DpiPolicy, EngineConfig, ImageOptions, PlaceOptions};
pub use error::{BildwerkError, Result};
pub use types::*;
