// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Per-endpoint configuration and transfer bookkeeping.
//!
//! Each hardware endpoint owns one fixed slot. A transfer moves through the
//! slot in three steps: the processing context arms it (handing the buffer
//! to the slot and the pointer to EasyDMA), a drained completion marks it
//! complete or failed, and the processing context collects the result,
//! which returns the slot to idle and the buffer to the caller.

use core::cell::Cell;

use kernel::debug;
use kernel::hil::usb::{Endpoint, EndpointTableInfo, ReadResult, TransferDirection, TransferType};
use kernel::utilities::cells::{OptionalCell, TakeCell};
use kernel::ErrorCode;

use super::driver::{Transfer, TransferStatus, UsbdDriver, UsbdEp, NUM_ENDPOINTS};

const NUM_SLOTS: usize = 2 * NUM_ENDPOINTS;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub transfer_type: TransferType,
    pub max_packet: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferState {
    /// No transfer armed and no result waiting.
    Idle,
    /// Submitted to the hardware.
    Armed,
    /// Finished; the byte count waits to be collected.
    Complete(usize),
    /// Finished unsuccessfully; the error waits to be collected.
    Failed(ErrorCode),
}

struct Slot<'a> {
    config: OptionalCell<EndpointConfig>,
    stalled: Cell<bool>,
    state: Cell<TransferState>,
    /// Size of the armed transfer.
    len: Cell<usize>,
    /// Receive buffer, held from arming until collection.
    rx: TakeCell<'a, [u8]>,
}

impl Slot<'_> {
    fn new() -> Self {
        Slot {
            config: OptionalCell::empty(),
            stalled: Cell::new(false),
            state: Cell::new(TransferState::Idle),
            len: Cell::new(0),
            rx: TakeCell::empty(),
        }
    }
}

pub struct EndpointTable<'a, D: UsbdDriver<'a>> {
    driver: &'a D,
    info: &'static EndpointTableInfo,
    slots: [Slot<'a>; NUM_SLOTS],
}

impl<'a, D: UsbdDriver<'a>> EndpointTable<'a, D> {
    pub fn new(driver: &'a D, info: &'static EndpointTableInfo) -> Self {
        EndpointTable {
            driver,
            info,
            slots: core::array::from_fn(|_| Slot::new()),
        }
    }

    fn slot(&self, ep: UsbdEp) -> &Slot<'a> {
        &self.slots[ep.index()]
    }

    /// Configure both halves of endpoint 0 as the control endpoint.
    pub fn init_ep0(&self, max_packet: u16) {
        for ep in [UsbdEp::EPOUT0, UsbdEp::EPIN0] {
            self.abort(ep);
            let slot = self.slot(ep);
            slot.config.set(EndpointConfig {
                transfer_type: TransferType::Control,
                max_packet,
            });
            slot.stalled.set(false);
            self.driver.ep_max_packet_size_set(ep, max_packet);
        }
    }

    pub fn add(
        &self,
        ep: UsbdEp,
        max_packet: u32,
        transfer_type: TransferType,
    ) -> Result<(), ErrorCode> {
        if ep.number() == 0 {
            return Err(ErrorCode::ALREADY);
        }
        let capability = self
            .info
            .capability(ep.number())
            .ok_or(ErrorCode::NOSUPPORT)?;
        if transfer_type == TransferType::Control || !capability.supports(transfer_type) {
            return Err(ErrorCode::NOSUPPORT);
        }
        if max_packet == 0 || max_packet > capability.max_packet as u32 {
            return Err(ErrorCode::SIZE);
        }
        let slot = self.slot(ep);
        if slot.config.is_some() {
            return Err(ErrorCode::ALREADY);
        }

        let max_packet = max_packet as u16;
        slot.config.set(EndpointConfig {
            transfer_type,
            max_packet,
        });
        slot.stalled.set(false);
        slot.state.set(TransferState::Idle);
        self.driver.ep_max_packet_size_set(ep, max_packet);
        self.driver.ep_enable(ep);
        Ok(())
    }

    /// Deconfigure `ep`, dropping whatever transfer it had. Removing an
    /// endpoint that is not configured does nothing.
    pub fn remove(&self, ep: UsbdEp) {
        if ep.number() == 0 {
            debug!("usbd: endpoint 0 cannot be removed");
            return;
        }
        let slot = self.slot(ep);
        if slot.config.is_none() {
            return;
        }
        self.abort(ep);
        self.driver.ep_disable(ep);
        slot.config.clear();
        slot.stalled.set(false);
        slot.len.set(0);
    }

    /// Remove every endpoint except endpoint 0.
    pub fn remove_all(&self) {
        for number in 1..NUM_ENDPOINTS as u8 {
            for dir in [TransferDirection::In, TransferDirection::Out] {
                if let Some(ep) = UsbdEp::from_endpoint(Endpoint::new(number, dir)) {
                    self.remove(ep);
                }
            }
        }
    }

    fn check_ready(&self, ep: UsbdEp) -> Result<(), ErrorCode> {
        if !self.is_configured(ep) {
            Err(ErrorCode::RESERVE)
        } else if self.slot(ep).stalled.get() {
            Err(ErrorCode::OFF)
        } else {
            Ok(())
        }
    }

    pub fn read(&self, ep: UsbdEp, buffer: &'a mut [u8]) -> Result<(), (ErrorCode, &'a mut [u8])> {
        if ep.is_in() {
            return Err((ErrorCode::INVAL, buffer));
        }
        if let Err(e) = self.check_ready(ep) {
            return Err((e, buffer));
        }
        let slot = self.slot(ep);
        if slot.state.get() != TransferState::Idle {
            return Err((ErrorCode::BUSY, buffer));
        }

        let transfer = Transfer::rx(buffer);
        if let Err(e) = self.driver.ep_transfer(ep, transfer) {
            debug!("usbd: {:?} receive not accepted: {:?}", ep, e);
            return Err((e, buffer));
        }
        slot.len.set(transfer.size);
        slot.rx.put(Some(buffer));
        slot.state.set(TransferState::Armed);
        Ok(())
    }

    /// Collect a finished receive. `Err((BUSY, None))` while it is still in
    /// flight.
    pub fn read_result(&self, ep: UsbdEp) -> ReadResult<'a> {
        let slot = self.slot(ep);
        match slot.state.get() {
            TransferState::Idle => Err((ErrorCode::INVAL, None)),
            TransferState::Armed => Err((ErrorCode::BUSY, None)),
            TransferState::Complete(amount) => {
                slot.state.set(TransferState::Idle);
                match slot.rx.take() {
                    Some(buffer) => Ok((buffer, amount)),
                    None => {
                        debug_assert!(false, "completed receive without a buffer");
                        Err((ErrorCode::FAIL, None))
                    }
                }
            }
            TransferState::Failed(e) => {
                slot.state.set(TransferState::Idle);
                Err((e, slot.rx.take()))
            }
        }
    }

    /// Submit one packet. EasyDMA moves at most one max-packet per
    /// transfer, so longer data is refused with `SIZE`.
    pub fn write(&self, ep: UsbdEp, data: &'a [u8]) -> Result<(), ErrorCode> {
        if !ep.is_in() {
            return Err(ErrorCode::INVAL);
        }
        self.check_ready(ep)?;
        let slot = self.slot(ep);
        if slot.state.get() == TransferState::Armed {
            return Err(ErrorCode::BUSY);
        }
        if data.len() > slot.config.map_or(0, |config| config.max_packet as usize) {
            return Err(ErrorCode::SIZE);
        }

        self.driver
            .ep_transfer(ep, Transfer::tx(data))
            .map_err(|e| {
                debug!("usbd: {:?} transmit not accepted: {:?}", ep, e);
                e
            })?;
        slot.len.set(data.len());
        slot.state.set(TransferState::Armed);
        Ok(())
    }

    /// Collect a finished transmit: the number of bytes sent.
    pub fn write_result(&self, ep: UsbdEp) -> Result<usize, ErrorCode> {
        let slot = self.slot(ep);
        match slot.state.get() {
            TransferState::Idle => Err(ErrorCode::INVAL),
            TransferState::Armed => Err(ErrorCode::BUSY),
            TransferState::Complete(amount) => {
                slot.state.set(TransferState::Idle);
                Ok(amount)
            }
            TransferState::Failed(e) => {
                slot.state.set(TransferState::Idle);
                Err(e)
            }
        }
    }

    /// Drop the transfer on `ep`, whatever its state, and hand back the
    /// receive buffer if it held one. The slot is idle afterwards.
    pub fn abort(&self, ep: UsbdEp) -> Option<&'a mut [u8]> {
        let slot = self.slot(ep);
        if slot.state.get() == TransferState::Armed {
            self.driver.ep_abort(ep);
        }
        slot.state.set(TransferState::Idle);
        slot.rx.take()
    }

    /// Abort an armed transfer but keep its buffer; collecting it reports
    /// `CANCEL`.
    pub fn cancel(&self, ep: UsbdEp) {
        let slot = self.slot(ep);
        if slot.state.get() == TransferState::Armed {
            self.driver.ep_abort(ep);
            slot.state.set(TransferState::Failed(ErrorCode::CANCEL));
        }
    }

    /// Halt `ep`. An armed transfer is aborted and reported as cancelled.
    /// Isochronous endpoints have no halt feature and are left running.
    pub fn stall(&self, ep: UsbdEp) {
        let slot = self.slot(ep);
        match slot.config.map(|config| config.transfer_type) {
            None => return,
            Some(TransferType::Isochronous) => {
                debug!("usbd: {:?} is isochronous and cannot be stalled", ep);
                return;
            }
            Some(_) => {}
        }
        self.cancel(ep);
        slot.stalled.set(true);
        self.driver.ep_stall(ep);
    }

    pub fn unstall(&self, ep: UsbdEp) {
        let slot = self.slot(ep);
        if slot.config.is_none() {
            return;
        }
        slot.stalled.set(false);
        self.driver.ep_stall_clear(ep);
        self.driver.ep_dtoggle_clear(ep);
    }

    /// Apply a drained completion. Returns whether it finished the transfer
    /// currently armed on `ep`. `Aborted` only follows an `ep_abort`, which
    /// already released the slot, so it never finishes the armed transfer.
    pub fn complete(&self, ep: UsbdEp, status: TransferStatus) -> bool {
        let slot = self.slot(ep);
        if slot.state.get() != TransferState::Armed || status == TransferStatus::Aborted {
            return false;
        }
        let state = match status {
            TransferStatus::Ok if ep.is_in() => TransferState::Complete(slot.len.get()),
            TransferStatus::Ok => {
                let received = self.driver.epout_size_get(ep);
                debug_assert!(received <= slot.len.get());
                TransferState::Complete(received.min(slot.len.get()))
            }
            TransferStatus::Aborted | TransferStatus::Overload | TransferStatus::Error => {
                debug!("usbd: {:?} transfer failed: {:?}", ep, status);
                TransferState::Failed(ErrorCode::FAIL)
            }
        };
        slot.state.set(state);
        true
    }

    pub fn state(&self, ep: UsbdEp) -> TransferState {
        self.slot(ep).state.get()
    }

    /// Byte count of a completed, not yet collected, transfer.
    pub fn completed_amount(&self, ep: UsbdEp) -> Option<usize> {
        match self.slot(ep).state.get() {
            TransferState::Complete(amount) => Some(amount),
            _ => None,
        }
    }

    pub fn is_configured(&self, ep: UsbdEp) -> bool {
        self.slot(ep).config.is_some()
    }
}
