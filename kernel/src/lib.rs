// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Shared kernel pieces for the USB device PHY.
//!
//! The kernel crate holds the Hardware Interface Layer (HIL) definitions that
//! the upper USB device stack is written against, together with the error
//! type, debug output macros and compile-time configuration used by every
//! chip implementation of those HILs.

#![no_std]

#[macro_use]
pub mod debug;
pub mod config;
pub mod errorcode;
pub mod hil;
pub mod utilities;

pub use crate::errorcode::ErrorCode;
pub use tock_registers::{register_bitfields, LocalRegisterCopy};
