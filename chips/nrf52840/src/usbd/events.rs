// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Handoff of hardware notifications from interrupt context to `process()`.
//!
//! There is one slot per event class. Posting into an occupied slot
//! overwrites the undrained event, so between two drains at most one
//! data-path and one power event exist. The interrupt handler masks the
//! peripheral interrupts right after posting and `process()` unmasks them
//! once it has handled what it drained, so in practice the hardware holds
//! back further events until the slot is free again.

use kernel::utilities::cells::OptionalCell;

use super::driver::{PowerEvent, UsbdEp, UsbdEvent};

/// A notification waiting to be processed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PendingEvent {
    DataPath(UsbdEvent),
    Power(PowerEvent),
}

pub struct EventDispatcher {
    data_path: OptionalCell<UsbdEvent>,
    power: OptionalCell<PowerEvent>,
}

impl EventDispatcher {
    pub const fn new() -> EventDispatcher {
        EventDispatcher {
            data_path: OptionalCell::empty(),
            power: OptionalCell::empty(),
        }
    }

    /// Record `event`, returning the undrained event of the same class it
    /// replaced. Interrupt context only.
    pub fn post(&self, event: PendingEvent) -> Option<PendingEvent> {
        match event {
            PendingEvent::DataPath(ev) => self.data_path.replace(ev).map(PendingEvent::DataPath),
            PendingEvent::Power(ev) => self.power.replace(ev).map(PendingEvent::Power),
        }
    }

    /// Take every pending event. Must run with the peripheral interrupts
    /// masked.
    pub fn drain(&self) -> Drain {
        Drain {
            data_path: self.data_path.take(),
            power: self.power.take(),
        }
    }

    /// Forget an undrained completion for `ep`. Used when the transfer it
    /// belongs to is aborted, so it cannot complete the next one.
    pub fn discard_transfer(&self, ep: UsbdEp) -> bool {
        let matches = self.data_path.map_or(false, |event| {
            matches!(event, UsbdEvent::EpTransfer { ep: pending, .. } if *pending == ep)
        });
        if matches {
            self.data_path.clear();
        }
        matches
    }
}

/// Events taken by one [`EventDispatcher::drain`], data path first.
#[derive(Debug)]
pub struct Drain {
    data_path: Option<UsbdEvent>,
    power: Option<PowerEvent>,
}

impl Iterator for Drain {
    type Item = PendingEvent;

    fn next(&mut self) -> Option<PendingEvent> {
        if let Some(ev) = self.data_path.take() {
            return Some(PendingEvent::DataPath(ev));
        }
        self.power.take().map(PendingEvent::Power)
    }
}
