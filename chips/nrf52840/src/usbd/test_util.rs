// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Stand-ins for the vendor driver and the USB device stack.

use core::cell::{Cell, RefCell};
use std::vec::Vec;

use kernel::hil::usb::{Endpoint, UsbPhyEvents};
use kernel::utilities::cells::OptionalCell;
use kernel::ErrorCode;

use super::driver::{
    PowerEvent, Transfer, TransferData, TransferStatus, UsbStatus, UsbdClient, UsbdDriver, UsbdEp,
    UsbdEvent, NUM_ENDPOINTS,
};

/// A vendor driver primitive the PHY invoked.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Init,
    Uninit,
    Enable,
    Disable,
    Start(bool),
    Stop,
    EnableInterrupts,
    DisableInterrupts,
    WakeupRequest,
    EpEnable(UsbdEp),
    EpDisable(UsbdEp),
    EpMaxPacketSizeSet(UsbdEp, u16),
    EpTransfer(UsbdEp, usize),
    EpAbort(UsbdEp),
    EpStall(UsbdEp),
    EpStallClear(UsbdEp),
    EpDtoggleClear(UsbdEp),
    SetupClear,
    SetupDataClear,
    SetupStall,
}

/// Records every call and plays the hardware's part of a transfer: OUT
/// data is copied into the armed buffer by [`MockDriver::receive`].
pub struct MockDriver<'a> {
    client: OptionalCell<&'a dyn UsbdClient>,
    calls: RefCell<Vec<Call>>,
    enabled: Cell<bool>,
    started: Cell<bool>,
    status: Cell<UsbStatus>,
    wakeup_allowed: Cell<bool>,
    transfer_error: OptionalCell<ErrorCode>,
    setup: Cell<[u8; 8]>,
    rx: [Cell<Option<(*mut u8, usize)>>; NUM_ENDPOINTS],
    received: [Cell<usize>; NUM_ENDPOINTS],
}

impl<'a> MockDriver<'a> {
    pub fn new() -> Self {
        MockDriver {
            client: OptionalCell::empty(),
            calls: RefCell::new(Vec::new()),
            enabled: Cell::new(false),
            started: Cell::new(false),
            status: Cell::new(UsbStatus::Disconnected),
            wakeup_allowed: Cell::new(true),
            transfer_error: OptionalCell::empty(),
            setup: Cell::new([0; 8]),
            rx: Default::default(),
            received: Default::default(),
        }
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    pub fn set_status(&self, status: UsbStatus) {
        self.status.set(status);
    }

    pub fn allow_wakeup(&self, allowed: bool) {
        self.wakeup_allowed.set(allowed);
    }

    /// Make every following `ep_transfer` fail with `error`.
    pub fn fail_transfers(&self, error: Option<ErrorCode>) {
        self.transfer_error.insert(error);
    }

    pub fn set_setup(&self, packet: [u8; 8]) {
        self.setup.set(packet);
    }

    /// Deliver `data` into the receive armed on `ep`.
    pub fn receive(&self, ep: UsbdEp, data: &[u8]) {
        let (ptr, size) = self.rx[ep.number() as usize]
            .take()
            .expect("no receive armed");
        assert!(data.len() <= size);
        // SAFETY: the PHY keeps the buffer behind `ptr` borrowed until the
        // transfer is collected, and nothing else accesses it meanwhile.
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
        self.received[ep.number() as usize].set(data.len());
    }

    /// Raise a USBD interrupt.
    pub fn fire(&self, event: UsbdEvent) {
        self.client
            .map(|client| client.usbd_event(event))
            .expect("no client registered");
    }

    /// Raise a POWER interrupt.
    pub fn fire_power(&self, event: PowerEvent) {
        self.client
            .map(|client| client.power_event(event))
            .expect("no client registered");
    }

    /// Raise the completion of the transfer on `ep`.
    pub fn finish(&self, ep: UsbdEp, status: TransferStatus) {
        self.fire(UsbdEvent::EpTransfer { ep, status });
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn called(&self, call: Call) -> bool {
        self.calls.borrow().contains(&call)
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    pub fn last_call(&self) -> Option<Call> {
        self.calls.borrow().last().copied()
    }

    /// Sizes of every transfer submitted on `ep`, in order.
    pub fn in_packet_sizes(&self, ep: UsbdEp) -> Vec<usize> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::EpTransfer(e, size) if *e == ep => Some(*size),
                _ => None,
            })
            .collect()
    }
}

impl<'a> UsbdDriver<'a> for MockDriver<'a> {
    fn set_client(&self, client: &'a dyn UsbdClient) {
        self.client.set(client);
    }

    fn init(&self) -> Result<(), ErrorCode> {
        self.record(Call::Init);
        Ok(())
    }

    fn uninit(&self) {
        self.record(Call::Uninit);
    }

    fn enable(&self) {
        self.record(Call::Enable);
        self.enabled.set(true);
    }

    fn disable(&self) {
        self.record(Call::Disable);
        self.enabled.set(false);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn start(&self, sof: bool) {
        self.record(Call::Start(sof));
        self.started.set(true);
    }

    fn stop(&self) {
        self.record(Call::Stop);
        self.started.set(false);
    }

    fn is_started(&self) -> bool {
        self.started.get()
    }

    fn usb_status(&self) -> UsbStatus {
        self.status.get()
    }

    fn enable_interrupts(&self) {
        self.record(Call::EnableInterrupts);
    }

    fn disable_interrupts(&self) {
        self.record(Call::DisableInterrupts);
    }

    fn wakeup_request(&self) -> bool {
        self.record(Call::WakeupRequest);
        self.wakeup_allowed.get()
    }

    fn ep_enable(&self, ep: UsbdEp) {
        self.record(Call::EpEnable(ep));
    }

    fn ep_disable(&self, ep: UsbdEp) {
        self.record(Call::EpDisable(ep));
    }

    fn ep_max_packet_size_set(&self, ep: UsbdEp, size: u16) {
        self.record(Call::EpMaxPacketSizeSet(ep, size));
    }

    fn ep_transfer(&self, ep: UsbdEp, transfer: Transfer) -> Result<(), ErrorCode> {
        self.transfer_error.map_or(Ok(()), |e| Err(*e))?;
        self.record(Call::EpTransfer(ep, transfer.size));
        if let TransferData::Rx(ptr) = transfer.data {
            self.rx[ep.number() as usize].set(Some((ptr, transfer.size)));
        }
        Ok(())
    }

    fn ep_abort(&self, ep: UsbdEp) {
        self.record(Call::EpAbort(ep));
        if !ep.is_in() {
            self.rx[ep.number() as usize].set(None);
        }
    }

    fn epout_size_get(&self, ep: UsbdEp) -> usize {
        self.received[ep.number() as usize].get()
    }

    fn ep_stall(&self, ep: UsbdEp) {
        self.record(Call::EpStall(ep));
    }

    fn ep_stall_clear(&self, ep: UsbdEp) {
        self.record(Call::EpStallClear(ep));
    }

    fn ep_dtoggle_clear(&self, ep: UsbdEp) {
        self.record(Call::EpDtoggleClear(ep));
    }

    fn setup_get(&self) -> [u8; 8] {
        self.setup.get()
    }

    fn setup_clear(&self) {
        self.record(Call::SetupClear);
    }

    fn setup_data_clear(&self) {
        self.record(Call::SetupDataClear);
    }

    fn setup_stall(&self) {
        self.record(Call::SetupStall);
    }
}

/// An upstream notification the PHY raised.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Power(bool),
    Suspend(bool),
    Sof(u16),
    Reset,
    Ep0Setup,
    Ep0Out,
    Ep0In,
    OutComplete(Endpoint),
    InComplete(Endpoint),
    StartProcess,
}

/// Event sink that only remembers what it was told.
pub struct RecordingEvents {
    log: RefCell<Vec<Notification>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        RecordingEvents {
            log: RefCell::new(Vec::new()),
        }
    }

    /// Everything recorded since the last call.
    pub fn take(&self) -> Vec<Notification> {
        self.log.take()
    }

    fn record(&self, notification: Notification) {
        self.log.borrow_mut().push(notification);
    }
}

impl UsbPhyEvents for RecordingEvents {
    fn power(&self, powered: bool) {
        self.record(Notification::Power(powered));
    }

    fn suspend(&self, suspended: bool) {
        self.record(Notification::Suspend(suspended));
    }

    fn sof(&self, frame: u16) {
        self.record(Notification::Sof(frame));
    }

    fn reset(&self) {
        self.record(Notification::Reset);
    }

    fn ep0_setup(&self) {
        self.record(Notification::Ep0Setup);
    }

    fn ep0_out(&self) {
        self.record(Notification::Ep0Out);
    }

    fn ep0_in(&self) {
        self.record(Notification::Ep0In);
    }

    fn out_complete(&self, endpoint: Endpoint) {
        self.record(Notification::OutComplete(endpoint));
    }

    fn in_complete(&self, endpoint: Endpoint) {
        self.record(Notification::InComplete(endpoint));
    }

    fn start_process(&self) {
        self.record(Notification::StartProcess);
    }
}
