// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! USB device PHY for the nRF52840.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod usbd;
