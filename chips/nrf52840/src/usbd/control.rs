// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Control transfers on endpoint 0.
//!
//! ```text
//!                 Setup (length > 0)                   last packet
//!   SetupStage ───────────────────────► DataStage ───────────────────┐
//!       ▲  │                                                          ▼
//!       │  └─────────────────────────────────────────────────► StatusStage
//!       │               Setup (length == 0)                           │
//!       └─────────────────────── status handshake done ───────────────┘
//! ```
//!
//! A Setup packet restarts the machine from any state. Requests the stack
//! cannot serve are rejected by stalling endpoint 0; the hardware clears
//! the stall when the next Setup packet arrives.

use core::cell::Cell;

use kernel::config::CONFIG;
use kernel::hil::usb::{ReadResult, SetupPacket, TransferDirection};
use kernel::utilities::cells::{MapCell, TakeCell};
use kernel::ErrorCode;
use kernel::{debug, debug_verbose};

use super::driver::{TransferStatus, UsbdDriver, UsbdEp};
use super::endpoints::{EndpointTable, TransferState};
use super::feeder::TransferFeeder;

/// Endpoint 0 packet size. Fixed by the nRF52840 hardware.
pub const EP0_MAX_PACKET: u16 = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransactionState {
    /// Waiting for a Setup packet.
    SetupStage,
    /// Moving data in the direction the Setup packet chose.
    DataStage,
    /// Waiting for the stack to allow, then the host to finish, the
    /// zero-length handshake.
    StatusStage,
}

/// Which upstream notification a step of the state machine produced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ep0Notify {
    None,
    /// `ep0_setup()`
    Setup,
    /// `ep0_in()`
    DataIn,
    /// `ep0_out()`
    DataOut,
}

pub struct ControlEndpoint<'a, D: UsbdDriver<'a>> {
    driver: &'a D,
    state: Cell<TransactionState>,
    setup: Cell<SetupPacket>,
    /// OUT data-stage bytes the host has yet to send.
    remaining: Cell<usize>,
    feeder: MapCell<TransferFeeder<'a>>,
    /// Receive buffer of an OUT data stage that was cut short, waiting to
    /// be handed back by `read_result` together with `interrupted_cause`.
    interrupted: TakeCell<'a, [u8]>,
    interrupted_cause: Cell<ErrorCode>,
    /// A zero-length packet still has to follow the packet in flight.
    zlp_pending: Cell<bool>,
    /// The IN packet in flight ends the data stage.
    final_sent: Cell<bool>,
}

impl<'a, D: UsbdDriver<'a>> ControlEndpoint<'a, D> {
    pub fn new(driver: &'a D) -> Self {
        ControlEndpoint {
            driver,
            state: Cell::new(TransactionState::SetupStage),
            setup: Cell::new(SetupPacket::empty()),
            remaining: Cell::new(0),
            feeder: MapCell::empty(),
            interrupted: TakeCell::empty(),
            interrupted_cause: Cell::new(ErrorCode::CANCEL),
            zlp_pending: Cell::new(false),
            final_sent: Cell::new(false),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    pub fn setup_packet(&self) -> SetupPacket {
        self.setup.get()
    }

    fn set_state(&self, state: TransactionState) {
        if CONFIG.trace_usb_events && self.state.get() != state {
            debug!("usbd: ep0 {:?} -> {:?}", self.state.get(), state);
        }
        self.state.set(state);
    }

    /// Free EPOUT0 for the next receive, keeping the buffer it held.
    fn reclaim_out(&self, table: &EndpointTable<'a, D>, cause: ErrorCode) {
        let cause = match table.state(UsbdEp::EPOUT0) {
            TransferState::Failed(e) => e,
            _ => cause,
        };
        if let Some(buffer) = table.abort(UsbdEp::EPOUT0) {
            self.interrupted.replace(buffer);
            self.interrupted_cause.set(cause);
        }
    }

    fn clear_data_stage(&self, table: &EndpointTable<'a, D>) {
        self.reclaim_out(table, ErrorCode::CANCEL);
        table.abort(UsbdEp::EPIN0);
        self.feeder.take();
        self.zlp_pending.set(false);
        self.final_sent.set(false);
    }

    /// Drop the current transaction and wait for the next Setup packet.
    pub fn reset(&self, table: &EndpointTable<'a, D>) {
        self.clear_data_stage(table);
        self.remaining.set(0);
        self.set_state(TransactionState::SetupStage);
    }

    /// The hardware only supports one endpoint 0 packet size, whatever the
    /// stack asks for.
    pub fn set_max_packet(&self, _requested: u32) -> u32 {
        EP0_MAX_PACKET as u32
    }

    /// A Setup packet arrived. Whatever was in flight for the previous
    /// transaction is cancelled first.
    pub fn setup_received(&self, table: &EndpointTable<'a, D>) -> Ep0Notify {
        self.reset(table);

        let setup = SetupPacket::parse(&self.driver.setup_get());
        self.setup.set(setup);
        self.remaining.set(setup.length as usize);
        if setup.has_data_stage() {
            self.set_state(TransactionState::DataStage);
        } else {
            self.set_state(TransactionState::StatusStage);
        }
        Ep0Notify::Setup
    }

    /// Copy the captured Setup packet into `buffer`.
    pub fn read_setup(&self, buffer: &mut [u8]) -> usize {
        let bytes = self.setup.get().to_bytes();
        let len = buffer.len().min(bytes.len());
        buffer[..len].copy_from_slice(&bytes[..len]);
        len
    }

    /// Reject the current request.
    pub fn stall(&self, table: &EndpointTable<'a, D>, cause: &str) {
        if CONFIG.debug_usb_stalls {
            debug_verbose!("usbd: ep0 stall in {:?}: {}", self.state.get(), cause);
        }
        self.driver.setup_stall();
        self.clear_data_stage(table);
    }

    /// Arm one OUT data-stage packet, or with an empty buffer allow the
    /// status stage of an IN request.
    pub fn read(
        &self,
        table: &EndpointTable<'a, D>,
        buffer: &'a mut [u8],
    ) -> Result<(), (ErrorCode, &'a mut [u8])> {
        let setup = self.setup.get();
        match self.state.get() {
            TransactionState::StatusStage
                if buffer.is_empty() && setup.status_direction() == TransferDirection::Out =>
            {
                self.driver.setup_clear();
                Ok(())
            }
            TransactionState::DataStage
                if !buffer.is_empty() && setup.direction() == TransferDirection::Out =>
            {
                table.read(UsbdEp::EPOUT0, buffer)?;
                self.driver.setup_data_clear();
                Ok(())
            }
            _ => {
                self.stall(table, "read out of sequence");
                Err((ErrorCode::INVAL, buffer))
            }
        }
    }

    /// Collect the endpoint 0 receive. With nothing armed, a buffer from an
    /// interrupted data stage is returned with the reason it was cut short.
    pub fn read_result(&self, table: &EndpointTable<'a, D>) -> ReadResult<'a> {
        if table.state(UsbdEp::EPOUT0) == TransferState::Idle {
            if let Some(buffer) = self.interrupted.take() {
                return Err((self.interrupted_cause.get(), Some(buffer)));
            }
        }
        table.read_result(UsbdEp::EPOUT0)
    }

    /// Send the whole IN data stage, or with an empty buffer allow the
    /// status stage of an OUT or no-data request.
    pub fn write(&self, table: &EndpointTable<'a, D>, data: &'a [u8]) -> Result<(), ErrorCode> {
        let setup = self.setup.get();
        match self.state.get() {
            TransactionState::StatusStage
                if data.is_empty() && setup.status_direction() == TransferDirection::In =>
            {
                self.driver.setup_clear();
                Ok(())
            }
            TransactionState::DataStage if setup.direction() == TransferDirection::In => {
                if table.state(UsbdEp::EPIN0) == TransferState::Armed {
                    return Err(ErrorCode::BUSY);
                }
                if data.len() > setup.length as usize {
                    self.stall(table, "response longer than wLength");
                    return Err(ErrorCode::SIZE);
                }
                if data.is_empty() {
                    self.zlp_pending.set(true);
                } else {
                    self.feeder.put(TransferFeeder::new(data));
                }
                self.feed(table).map_err(|e| {
                    self.stall(table, "data stage submission failed");
                    e
                })
            }
            _ => {
                self.stall(table, "write out of sequence");
                Err(ErrorCode::INVAL)
            }
        }
    }

    /// Submit the next IN packet of the data stage.
    fn feed(&self, table: &EndpointTable<'a, D>) -> Result<(), ErrorCode> {
        if self.zlp_pending.replace(false) {
            table.write(UsbdEp::EPIN0, &[])?;
            self.final_sent.set(true);
            return Ok(());
        }

        let mut feeder = self.feeder.take().ok_or(ErrorCode::FAIL)?;
        let max_packet = EP0_MAX_PACKET as usize;
        if let Some(chunk) = feeder.next(max_packet) {
            table.write(UsbdEp::EPIN0, chunk.data)?;
            if chunk.is_last {
                if chunk.data.len() == max_packet {
                    self.zlp_pending.set(true);
                } else {
                    self.final_sent.set(true);
                }
            }
        }
        self.feeder.put(feeder);
        Ok(())
    }

    /// An endpoint 0 IN transfer finished.
    pub fn in_complete(&self, table: &EndpointTable<'a, D>, status: TransferStatus) -> Ep0Notify {
        let setup = self.setup.get();
        match self.state.get() {
            TransactionState::DataStage if setup.direction() == TransferDirection::In => {
                if !table.complete(UsbdEp::EPIN0, status) {
                    return Ep0Notify::None;
                }
                if let Err(e) = table.write_result(UsbdEp::EPIN0) {
                    debug!("usbd: ep0 IN packet failed: {:?}", e);
                    self.stall(table, "IN data packet failed");
                    return Ep0Notify::None;
                }
                if self.final_sent.get() {
                    self.feeder.take();
                    self.final_sent.set(false);
                    self.set_state(TransactionState::StatusStage);
                    return Ep0Notify::DataIn;
                }
                if self.feed(table).is_err() {
                    self.stall(table, "data stage submission failed");
                }
                Ep0Notify::None
            }
            TransactionState::StatusStage if setup.status_direction() == TransferDirection::In => {
                if status == TransferStatus::Aborted {
                    return Ep0Notify::None;
                }
                if status != TransferStatus::Ok {
                    debug!("usbd: ep0 status stage ended with {:?}", status);
                }
                self.set_state(TransactionState::SetupStage);
                Ep0Notify::DataIn
            }
            state => {
                debug!("usbd: stray ep0 IN completion in {:?}", state);
                Ep0Notify::None
            }
        }
    }

    /// An endpoint 0 OUT transfer finished.
    pub fn out_complete(&self, table: &EndpointTable<'a, D>, status: TransferStatus) -> Ep0Notify {
        let setup = self.setup.get();
        match self.state.get() {
            TransactionState::DataStage if setup.direction() == TransferDirection::Out => {
                if !table.complete(UsbdEp::EPOUT0, status) {
                    return Ep0Notify::None;
                }
                let received = match table.completed_amount(UsbdEp::EPOUT0) {
                    Some(received) => received,
                    None => {
                        self.stall(table, "OUT data packet failed");
                        return Ep0Notify::DataOut;
                    }
                };
                let remaining = self.remaining.get();
                if received > remaining {
                    self.reclaim_out(table, ErrorCode::SIZE);
                    self.stall(table, "host sent more than wLength");
                    return Ep0Notify::DataOut;
                }
                self.remaining.set(remaining - received);
                if received == remaining || received < EP0_MAX_PACKET as usize {
                    self.set_state(TransactionState::StatusStage);
                }
                Ep0Notify::DataOut
            }
            TransactionState::StatusStage if setup.status_direction() == TransferDirection::Out => {
                if status == TransferStatus::Aborted {
                    return Ep0Notify::None;
                }
                if status != TransferStatus::Ok {
                    debug!("usbd: ep0 status stage ended with {:?}", status);
                }
                self.set_state(TransactionState::SetupStage);
                Ep0Notify::DataOut
            }
            state => {
                debug!("usbd: stray ep0 OUT completion in {:?}", state);
                Ep0Notify::None
            }
        }
    }
}
