// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Utility types shared by chip drivers.

/// Interior-mutable holders for clients and lent buffers, re-exported from
/// the `tock-cells` crate, e.g. `use kernel::utilities::cells::TakeCell;`.
pub mod cells {
    pub use tock_cells::map_cell::MapCell;
    pub use tock_cells::optional_cell::OptionalCell;
    pub use tock_cells::take_cell::TakeCell;
}
