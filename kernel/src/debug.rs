// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Support for in-kernel debugging.
//!
//! Chip drivers report what they are doing with the `debug!` macro, which
//! takes the same arguments as `format!`:
//!
//! ```ignore
//! debug!("ep0 stalled: {:?}", cause);
//! ```
//!
//! `debug_verbose!` additionally prefixes the message with the file and line
//! it was emitted from.
//!
//! Output goes through the `log` facade under the `"usbphy"` target. A board
//! that wants to see it installs a `log::Log` implementation (for example one
//! that forwards to its console UART); without one the macros compile down to
//! a level check.

use core::fmt::Arguments;

/// Target name attached to every record emitted by `debug!`.
pub const DEBUG_TARGET: &str = "usbphy";

#[doc(hidden)]
pub fn debug_println(args: Arguments) {
    log::debug!(target: DEBUG_TARGET, "{}", args);
}

#[doc(hidden)]
pub fn debug_verbose_println(args: Arguments, file_line: &(&'static str, u32)) {
    let (file, line) = *file_line;
    log::trace!(target: DEBUG_TARGET, "{}:{}: {}", file, line, args);
}

/// In-kernel `println()` debugging.
#[macro_export]
macro_rules! debug {
    () => ({
        // Allow an empty debug!() to print the location when hit
        $crate::debug!("")
    });
    ($msg:expr $(,)?) => ({
        $crate::debug::debug_println(format_args!("{}", $msg))
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::debug::debug_println(format_args!($fmt, $($arg)+))
    });
}

/// In-kernel `println()` debugging that includes the caller's location.
#[macro_export]
macro_rules! debug_verbose {
    () => ({
        $crate::debug_verbose!("")
    });
    ($msg:expr $(,)?) => ({
        $crate::debug::debug_verbose_println(format_args!("{}", $msg), {
            static _FILE_LINE: (&'static str, u32) = (file!(), line!());
            &_FILE_LINE
        })
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::debug::debug_verbose_println(format_args!($fmt, $($arg)+), {
            static _FILE_LINE: (&'static str, u32) = (file!(), line!());
            &_FILE_LINE
        })
    });
}
