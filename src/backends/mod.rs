// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for video capture
//!
//! # Modules
//!
//! - [`camera`]: Device model, capture sessions and native backends

pub mod camera;
