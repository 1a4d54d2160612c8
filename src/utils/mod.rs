// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Utility modules
//!
//! Terminal helpers for the trainflow CLI.

pub mod spinner;

pub use spinner::*;
