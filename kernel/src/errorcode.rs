// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Standard error enum for invoking operations

use core::convert::TryFrom;

/// Standard errors.
///
/// Every fallible HIL operation reports failure with one of these. The USB
/// PHY uses them as follows:
///
/// - `ALREADY`: the endpoint is already configured.
/// - `BUSY`: a transfer is armed and has not completed yet.
/// - `CANCEL`: the transfer was aborted or its endpoint stalled.
/// - `FAIL`: the hardware reported an error for the transfer.
/// - `INVAL`: the operation is not legal for this endpoint or stage.
/// - `NOSUPPORT`: no hardware endpoint supports the requested type.
/// - `OFF`: the endpoint is halted.
/// - `RESERVE`: the endpoint has not been configured.
/// - `SIZE`: the data exceeds what the host asked for or the hardware
///   allows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = 0,
    /// Underlying system is busy; retry
    BUSY = 1,
    /// The state requested is already set
    ALREADY = 2,
    /// The component is powered down
    OFF = 3,
    /// Reservation required before use
    RESERVE = 4,
    /// An invalid parameter was passed
    INVAL = 5,
    /// Parameter passed was too large
    SIZE = 6,
    /// Operation canceled by a call
    CANCEL = 7,
    /// Operation or command is unsupported
    NOSUPPORT = 9,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}

impl TryFrom<usize> for ErrorCode {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::FAIL),
            1 => Ok(ErrorCode::BUSY),
            2 => Ok(ErrorCode::ALREADY),
            3 => Ok(ErrorCode::OFF),
            4 => Ok(ErrorCode::RESERVE),
            5 => Ok(ErrorCode::INVAL),
            6 => Ok(ErrorCode::SIZE),
            7 => Ok(ErrorCode::CANCEL),
            9 => Ok(ErrorCode::NOSUPPORT),
            _ => Err(()),
        }
    }
}
