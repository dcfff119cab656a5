// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Data structure for storing compile-time configuration options.
//!
//! Configuration is a `const` object rather than scattered `#[cfg]`
//! attributes: every code path stays type-checked even when an option is
//! disabled, and the compiler folds the constant so a disabled option costs
//! nothing in the resulting binary.

/// Data structure holding compile-time configuration options.
///
/// To change the configuration, enable the matching cargo feature of this
/// crate from the board crate.
pub struct Config {
    /// Whether the USB PHY should log every hardware event it drains in
    /// `process()`.
    ///
    /// Useful when bringing up enumeration on a new board, far too chatty
    /// otherwise: a full-speed bus produces an SOF event every millisecond.
    pub trace_usb_events: bool,

    /// Whether the USB PHY should log the cause each time it stalls
    /// endpoint 0.
    ///
    /// Stalls are the normal answer to unsupported requests, so this is
    /// cheap, but boards that are tight on flash can drop the format strings.
    pub debug_usb_stalls: bool,
}

/// The unique instance of `Config` where compile-time configuration options
/// are defined. This is the only place in the kernel crate where `cfg!` is
/// used to read cargo features.
pub const CONFIG: Config = Config {
    trace_usb_events: cfg!(feature = "trace_usb_events"),
    debug_usb_stalls: !cfg!(feature = "no_debug_usb_stalls"),
};
