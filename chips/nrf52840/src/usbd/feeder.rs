// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Chunking of an endpoint 0 IN response into max-packet pieces.

/// One piece of the response, ready to hand to the hardware.
#[derive(Debug, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub data: &'a [u8],
    /// Nothing follows this chunk.
    pub is_last: bool,
}

/// Walks a response buffer front to back. Once exhausted it stays
/// exhausted; a new transaction needs a new feeder.
#[derive(Debug)]
pub struct TransferFeeder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> TransferFeeder<'a> {
    pub fn new(data: &'a [u8]) -> TransferFeeder<'a> {
        TransferFeeder { data, offset: 0 }
    }

    /// Produce up to `requested` further bytes. Requesting zero bytes
    /// gives up on the rest of the response.
    pub fn next(&mut self, requested: usize) -> Option<Chunk<'a>> {
        if self.is_exhausted() {
            return None;
        }
        if requested == 0 {
            self.offset = self.data.len();
            return Some(Chunk {
                data: &[],
                is_last: true,
            });
        }

        let end = self.offset + requested.min(self.remaining());
        let response = self.data;
        let data = &response[self.offset..end];
        self.offset = end;
        Some(Chunk {
            data,
            is_last: self.is_exhausted(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset == self.data.len()
    }
}
