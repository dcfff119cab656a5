// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! USB device PHY for the nRF52840 USBD peripheral.
//!
//! The vendor driver reports USBD and POWER interrupts through
//! [`UsbdClient`]. The handler only queues the event, masks both interrupt
//! lines and asks the stack to schedule [`UsbPhy::process`]; everything else
//! happens in `process()`, which unmasks the lines once the queue is empty.
//!
//! Usage
//! -----
//!
//! ```rust,ignore
//! let usbd: &'static Usbd<'static, VendorUsbd> = board_alloc(Usbd::new(&VENDOR_USBD));
//! usbd.init(usb_device_stack)?;
//! usbd.connect();
//! ```

use core::cell::Cell;

use kernel::config::CONFIG;
use kernel::debug;
use kernel::hil::usb::{
    Endpoint, EndpointCapability, EndpointTableInfo, ReadResult, TransferType, UsbPhy,
    UsbPhyEvents,
};
use kernel::utilities::cells::OptionalCell;
use kernel::ErrorCode;

pub mod control;
pub mod driver;
pub mod endpoints;
pub mod events;
pub mod feeder;

#[cfg(test)]
pub(crate) mod test_util;

use self::control::{ControlEndpoint, Ep0Notify, EP0_MAX_PACKET};
use self::driver::{PowerEvent, UsbStatus, UsbdClient, UsbdDriver, UsbdEp, UsbdEvent};
use self::endpoints::EndpointTable;
use self::events::{EventDispatcher, PendingEvent};

const BULK_MAX_PACKET: u16 = 64;
const ISO_MAX_PACKET: u16 = 1023;

const CONTROL: EndpointCapability = EndpointCapability {
    control: true,
    bulk: false,
    interrupt: false,
    isochronous: false,
    max_packet: EP0_MAX_PACKET,
};

const BULK_OR_INTERRUPT: EndpointCapability = EndpointCapability {
    control: false,
    bulk: true,
    interrupt: true,
    isochronous: false,
    max_packet: BULK_MAX_PACKET,
};

const ISOCHRONOUS: EndpointCapability = EndpointCapability {
    control: false,
    bulk: false,
    interrupt: false,
    isochronous: true,
    max_packet: ISO_MAX_PACKET,
};

/// Endpoints 1-7 are bulk/interrupt, endpoint 8 is the isochronous one.
pub static NRF52840_ENDPOINT_TABLE: EndpointTableInfo = EndpointTableInfo {
    endpoints: &[
        CONTROL,
        BULK_OR_INTERRUPT,
        BULK_OR_INTERRUPT,
        BULK_OR_INTERRUPT,
        BULK_OR_INTERRUPT,
        BULK_OR_INTERRUPT,
        BULK_OR_INTERRUPT,
        BULK_OR_INTERRUPT,
        ISOCHRONOUS,
    ],
};

pub struct Usbd<'a, D: UsbdDriver<'a>> {
    driver: &'a D,
    events: OptionalCell<&'a dyn UsbPhyEvents>,
    dispatcher: EventDispatcher,
    endpoints: EndpointTable<'a, D>,
    control: ControlEndpoint<'a, D>,
    sof_enabled: Cell<bool>,
    connect_requested: Cell<bool>,
    /// Nesting depth of `masked` sections.
    mask_depth: Cell<usize>,
    /// The interrupt handler masked the lines; only `process()` may unmask.
    held: Cell<bool>,
}

impl<'a, D: UsbdDriver<'a>> Usbd<'a, D> {
    pub fn new(driver: &'a D) -> Self {
        Usbd {
            driver,
            events: OptionalCell::empty(),
            dispatcher: EventDispatcher::new(),
            endpoints: EndpointTable::new(driver, &NRF52840_ENDPOINT_TABLE),
            control: ControlEndpoint::new(driver),
            sof_enabled: Cell::new(false),
            connect_requested: Cell::new(false),
            mask_depth: Cell::new(0),
            held: Cell::new(false),
        }
    }

    /// Run `f` with the USBD and POWER interrupts masked.
    fn masked<R>(&self, f: impl FnOnce() -> R) -> R {
        let depth = self.mask_depth.get();
        if depth == 0 {
            self.driver.disable_interrupts();
        }
        self.mask_depth.set(depth + 1);
        let result = f();
        self.mask_depth.set(depth);
        if depth == 0 && !self.held.get() {
            self.driver.enable_interrupts();
        }
        result
    }

    fn post(&self, event: PendingEvent) {
        if let Some(lost) = self.dispatcher.post(event) {
            debug!("usbd: {:?} dropped before processing", lost);
        }
        self.driver.disable_interrupts();
        self.held.set(true);
        self.events.map(|events| events.start_process());
    }

    fn hw_endpoint(endpoint: Endpoint) -> Result<UsbdEp, ErrorCode> {
        match UsbdEp::from_endpoint(endpoint) {
            Some(ep) if ep.number() != 0 => Ok(ep),
            _ => Err(ErrorCode::INVAL),
        }
    }

    fn start_if_ready(&self) {
        if self.connect_requested.get()
            && self.driver.is_enabled()
            && self.driver.usb_status() == UsbStatus::Ready
            && !self.driver.is_started()
        {
            // SOF events are filtered in `process()`.
            self.driver.start(true);
        }
    }

    /// Forget every transfer and all endpoints except endpoint 0.
    fn reset_endpoints(&self) {
        self.endpoints.remove_all();
        self.control.reset(&self.endpoints);
    }

    fn notify_ep0(&self, events: &dyn UsbPhyEvents, notify: Ep0Notify) {
        match notify {
            Ep0Notify::None => {}
            Ep0Notify::Setup => events.ep0_setup(),
            Ep0Notify::DataIn => events.ep0_in(),
            Ep0Notify::DataOut => events.ep0_out(),
        }
    }

    fn handle_usbd_event(&self, events: &dyn UsbPhyEvents, event: UsbdEvent) {
        match event {
            UsbdEvent::Sof { frame } => {
                if self.sof_enabled.get() {
                    events.sof(frame);
                }
            }
            UsbdEvent::Reset => {
                self.reset_endpoints();
                events.reset();
            }
            UsbdEvent::Suspend => events.suspend(true),
            UsbdEvent::Resume => events.suspend(false),
            // Resume signalling we asked for in `remote_wakeup()`; the host
            // answers with a Resume event.
            UsbdEvent::WakeupRequest => {}
            UsbdEvent::Setup => {
                let notify = self.control.setup_received(&self.endpoints);
                if CONFIG.trace_usb_events {
                    debug!("usbd: {:?}", self.control.setup_packet());
                }
                self.notify_ep0(events, notify);
            }
            UsbdEvent::EpTransfer { ep, status } if ep == UsbdEp::EPIN0 => {
                let notify = self.control.in_complete(&self.endpoints, status);
                self.notify_ep0(events, notify);
            }
            UsbdEvent::EpTransfer { ep, status } if ep == UsbdEp::EPOUT0 => {
                let notify = self.control.out_complete(&self.endpoints, status);
                self.notify_ep0(events, notify);
            }
            UsbdEvent::EpTransfer { ep, status } => {
                if !self.endpoints.complete(ep, status) {
                    debug!("usbd: {:?} completion without a transfer: {:?}", ep, status);
                } else if ep.is_in() {
                    events.in_complete(ep.endpoint());
                } else {
                    events.out_complete(ep.endpoint());
                }
            }
        }
    }

    fn handle_power_event(&self, events: &dyn UsbPhyEvents, event: PowerEvent) {
        match event {
            PowerEvent::Detected => {
                if !self.driver.is_enabled() {
                    self.driver.enable();
                }
                events.power(true);
            }
            PowerEvent::Ready => {
                // `Detected` may have been overwritten before it was
                // processed.
                if !self.driver.is_enabled() {
                    self.driver.enable();
                    events.power(true);
                }
                self.start_if_ready();
            }
            PowerEvent::Removed => {
                if self.driver.is_started() {
                    self.driver.stop();
                }
                if self.driver.is_enabled() {
                    self.driver.disable();
                }
                self.reset_endpoints();
                events.power(false);
            }
        }
    }
}

impl<'a, D: UsbdDriver<'a>> UsbdClient for Usbd<'a, D> {
    fn usbd_event(&self, event: UsbdEvent) {
        self.post(PendingEvent::DataPath(event));
    }

    fn power_event(&self, event: PowerEvent) {
        self.post(PendingEvent::Power(event));
    }
}

impl<'a, D: UsbdDriver<'a>> UsbPhy<'a> for Usbd<'a, D> {
    fn init(&'a self, events: &'a dyn UsbPhyEvents) -> Result<(), ErrorCode> {
        self.events.set(events);
        self.driver.set_client(self);
        self.driver.init()?;

        self.masked(|| {
            self.endpoints.init_ep0(EP0_MAX_PACKET);
            self.control.reset(&self.endpoints);
            if self.driver.usb_status() != UsbStatus::Disconnected {
                self.driver.enable();
            }
        });
        Ok(())
    }

    fn deinit(&self) {
        self.masked(|| {
            self.connect_requested.set(false);
            if self.driver.is_started() {
                self.driver.stop();
            }
            if self.driver.is_enabled() {
                self.driver.disable();
            }
            self.reset_endpoints();
            self.dispatcher.drain().for_each(drop);
            self.held.set(false);
        });
        self.driver.disable_interrupts();
        self.driver.uninit();
        self.events.clear();
    }

    fn powered(&self) -> bool {
        self.driver.usb_status() != UsbStatus::Disconnected
    }

    fn connect(&self) {
        self.masked(|| {
            self.connect_requested.set(true);
            self.start_if_ready();
        });
    }

    fn disconnect(&self) {
        self.masked(|| {
            self.connect_requested.set(false);
            if self.driver.is_started() {
                self.driver.stop();
            }
        });
    }

    fn configure(&self) {
        // Endpoints are enabled one by one in `endpoint_add`.
    }

    fn unconfigure(&self) {
        self.masked(|| self.endpoints.remove_all());
    }

    fn sof_enable(&self) {
        self.sof_enabled.set(true);
    }

    fn sof_disable(&self) {
        self.sof_enabled.set(false);
    }

    fn set_address(&self, address: u8) {
        debug!("usbd: address {} is applied by the hardware", address);
    }

    fn remote_wakeup(&self) {
        self.masked(|| {
            if !self.driver.wakeup_request() {
                debug!("usbd: remote wakeup not allowed by the host");
            }
        });
    }

    fn endpoint_table(&self) -> &'static EndpointTableInfo {
        &NRF52840_ENDPOINT_TABLE
    }

    fn ep0_set_max_packet(&self, max_packet: u32) -> u32 {
        self.control.set_max_packet(max_packet)
    }

    fn ep0_setup_read_result(&self, buffer: &mut [u8]) -> usize {
        self.control.read_setup(buffer)
    }

    fn ep0_read(&self, buffer: &'a mut [u8]) -> Result<(), (ErrorCode, &'a mut [u8])> {
        self.masked(|| self.control.read(&self.endpoints, buffer))
    }

    fn ep0_read_result(&self) -> ReadResult<'a> {
        self.masked(|| self.control.read_result(&self.endpoints))
    }

    fn ep0_write(&self, buffer: &'a [u8]) -> Result<(), ErrorCode> {
        self.masked(|| self.control.write(&self.endpoints, buffer))
    }

    fn ep0_stall(&self) {
        self.masked(|| self.control.stall(&self.endpoints, "rejected by the stack"));
    }

    fn endpoint_add(
        &self,
        endpoint: Endpoint,
        max_packet: u32,
        transfer_type: TransferType,
    ) -> Result<(), ErrorCode> {
        let ep = UsbdEp::from_endpoint(endpoint).ok_or(ErrorCode::NOSUPPORT)?;
        self.masked(|| self.endpoints.add(ep, max_packet, transfer_type))
    }

    fn endpoint_remove(&self, endpoint: Endpoint) {
        if let Ok(ep) = Self::hw_endpoint(endpoint) {
            self.masked(|| {
                self.endpoints.remove(ep);
                self.dispatcher.discard_transfer(ep);
            });
        }
    }

    fn endpoint_stall(&self, endpoint: Endpoint) {
        if let Ok(ep) = Self::hw_endpoint(endpoint) {
            self.masked(|| {
                self.endpoints.stall(ep);
                self.dispatcher.discard_transfer(ep);
            });
        }
    }

    fn endpoint_unstall(&self, endpoint: Endpoint) {
        if let Ok(ep) = Self::hw_endpoint(endpoint) {
            self.masked(|| self.endpoints.unstall(ep));
        }
    }

    fn endpoint_read(
        &self,
        endpoint: Endpoint,
        buffer: &'a mut [u8],
    ) -> Result<(), (ErrorCode, &'a mut [u8])> {
        match Self::hw_endpoint(endpoint) {
            Ok(ep) => self.masked(|| self.endpoints.read(ep, buffer)),
            Err(e) => Err((e, buffer)),
        }
    }

    fn endpoint_read_result(&self, endpoint: Endpoint) -> ReadResult<'a> {
        match Self::hw_endpoint(endpoint) {
            Ok(ep) => self.masked(|| self.endpoints.read_result(ep)),
            Err(e) => Err((e, None)),
        }
    }

    fn endpoint_write(&self, endpoint: Endpoint, buffer: &'a [u8]) -> Result<(), ErrorCode> {
        let ep = Self::hw_endpoint(endpoint)?;
        self.masked(|| self.endpoints.write(ep, buffer))
    }

    fn endpoint_write_result(&self, endpoint: Endpoint) -> Result<usize, ErrorCode> {
        let ep = Self::hw_endpoint(endpoint)?;
        self.masked(|| self.endpoints.write_result(ep))
    }

    fn endpoint_abort(&self, endpoint: Endpoint) -> Option<&'a mut [u8]> {
        let ep = Self::hw_endpoint(endpoint).ok()?;
        self.masked(|| {
            let buffer = self.endpoints.abort(ep);
            self.dispatcher.discard_transfer(ep);
            buffer
        })
    }

    fn process(&self) {
        self.masked(|| {
            self.held.set(false);
            self.events.map_or_else(
                || self.dispatcher.drain().for_each(drop),
                |events| {
                    for event in self.dispatcher.drain() {
                        if CONFIG.trace_usb_events {
                            debug!("usbd: {:?}", event);
                        }
                        match event {
                            PendingEvent::DataPath(event) => self.handle_usbd_event(*events, event),
                            PendingEvent::Power(event) => self.handle_power_event(*events, event),
                        }
                    }
                },
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::control::TransactionState;
    use super::driver::TransferStatus;
    use super::test_util::{Call, MockDriver, Notification, RecordingEvents};
    use super::*;
    use kernel::hil::usb::TransferDirection;

    const GET_DESCRIPTOR_128: [u8; 8] = [0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 0x80, 0x00];
    const SET_ADDRESS: [u8; 8] = [0x00, 0x05, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00];
    const SET_REPORT_8: [u8; 8] = [0x21, 0x09, 0x00, 0x02, 0x00, 0x00, 0x08, 0x00];

    const BULK_OUT: Endpoint = Endpoint::new(1, TransferDirection::Out);
    const BULK_IN: Endpoint = Endpoint::new(1, TransferDirection::In);

    fn hw(endpoint: Endpoint) -> UsbdEp {
        UsbdEp::from_endpoint(endpoint).unwrap()
    }

    #[test]
    fn init_registers_with_the_driver() {
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        driver.set_status(UsbStatus::Ready);

        usbd.init(&events).unwrap();
        assert!(driver.has_client());
        assert!(driver.called(Call::Init));
        assert!(driver.called(Call::Enable));
        assert!(driver.called(Call::EpMaxPacketSizeSet(UsbdEp::EPIN0, 64)));
        assert_eq!(driver.last_call(), Some(Call::EnableInterrupts));
        assert!(usbd.powered());
        assert_eq!(usbd.ep0_set_max_packet(8), 64);
        assert_eq!(usbd.endpoint_table().endpoints.len(), 9);
    }

    #[test]
    fn interrupt_handler_only_queues() {
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();
        driver.clear_calls();

        driver.set_setup(SET_ADDRESS);
        driver.fire(UsbdEvent::Setup);
        assert_eq!(events.take(), [Notification::StartProcess]);
        assert_eq!(driver.last_call(), Some(Call::DisableInterrupts));

        // Other operations before processing must not unmask.
        assert_eq!(usbd.endpoint_add(BULK_IN, 64, TransferType::Bulk), Ok(()));
        assert!(!driver.called(Call::EnableInterrupts));

        usbd.process();
        assert_eq!(events.take(), [Notification::Ep0Setup]);
        assert_eq!(driver.last_call(), Some(Call::EnableInterrupts));
    }

    #[test]
    fn get_descriptor_enumeration_flow() {
        let response = [0x12u8; 128];
        let mut status: [u8; 0] = [];
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();

        driver.set_setup(GET_DESCRIPTOR_128);
        driver.fire(UsbdEvent::Setup);
        usbd.process();
        assert_eq!(events.take(), [Notification::StartProcess, Notification::Ep0Setup]);

        let mut packet = [0u8; 8];
        assert_eq!(usbd.ep0_setup_read_result(&mut packet), 8);
        assert_eq!(packet, GET_DESCRIPTOR_128);
        usbd.ep0_write(&response).unwrap();

        for _ in 0..3 {
            driver.finish(UsbdEp::EPIN0, TransferStatus::Ok);
            usbd.process();
        }
        assert_eq!(driver.in_packet_sizes(UsbdEp::EPIN0), [64, 64, 0]);
        let notifications = events.take();
        assert_eq!(
            notifications.iter().filter(|n| **n == Notification::Ep0In).count(),
            1
        );
        assert_eq!(notifications.last(), Some(&Notification::Ep0In));
        assert_eq!(usbd.control.state(), TransactionState::StatusStage);

        usbd.ep0_read(&mut status).unwrap();
        driver.finish(UsbdEp::EPOUT0, TransferStatus::Ok);
        usbd.process();
        assert_eq!(events.take(), [Notification::StartProcess, Notification::Ep0Out]);
        assert_eq!(usbd.control.state(), TransactionState::SetupStage);
    }

    #[test]
    fn interrupted_out_request_does_not_block_ep0() {
        let mut first = [0u8; 64];
        let mut second = [0u8; 64];
        let mut third = [0u8; 64];
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();

        driver.set_setup(SET_REPORT_8);
        driver.fire(UsbdEvent::Setup);
        usbd.process();
        usbd.ep0_read(&mut first).unwrap();

        // The host gives up and sends another request.
        driver.fire(UsbdEvent::Setup);
        usbd.process();
        assert!(driver.called(Call::EpAbort(UsbdEp::EPOUT0)));
        usbd.ep0_read(&mut second).unwrap();

        // The stack rejects it; the host retries once more.
        usbd.ep0_stall();
        driver.fire(UsbdEvent::Setup);
        usbd.process();
        usbd.ep0_read(&mut third).unwrap();

        driver.receive(UsbdEp::EPOUT0, &[9; 8]);
        driver.finish(UsbdEp::EPOUT0, TransferStatus::Ok);
        usbd.process();
        assert_eq!(events.take().last(), Some(&Notification::Ep0Out));
        let (data, len) = usbd.ep0_read_result().unwrap();
        assert_eq!(&data[..len], &[9; 8]);
        assert_eq!(usbd.control.state(), TransactionState::StatusStage);

        // The buffer of the stalled attempt is handed back last.
        let (e, back) = usbd.ep0_read_result().unwrap_err();
        assert_eq!(e, ErrorCode::CANCEL);
        assert!(back.is_some());
    }

    #[test]
    fn data_path_is_processed_before_power() {
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();

        driver.fire_power(PowerEvent::Removed);
        driver.fire(UsbdEvent::Suspend);
        events.take();
        usbd.process();
        assert_eq!(
            events.take(),
            [Notification::Suspend(true), Notification::Power(false)]
        );
    }

    #[test]
    fn power_events_drive_the_connection() {
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();
        assert!(!driver.called(Call::Enable));
        usbd.connect();
        assert!(!driver.is_started());

        driver.set_status(UsbStatus::Connected);
        driver.fire_power(PowerEvent::Detected);
        usbd.process();
        assert!(driver.is_enabled());
        assert!(!driver.is_started());

        driver.set_status(UsbStatus::Ready);
        driver.fire_power(PowerEvent::Ready);
        usbd.process();
        assert!(driver.called(Call::Start(true)));

        driver.set_status(UsbStatus::Disconnected);
        driver.fire_power(PowerEvent::Removed);
        usbd.process();
        assert!(!driver.is_started());
        assert!(!driver.is_enabled());
        let notifications = events.take();
        assert!(notifications.contains(&Notification::Power(true)));
        assert_eq!(notifications.last(), Some(&Notification::Power(false)));
    }

    #[test]
    fn ready_without_detected_still_enables() {
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();
        usbd.connect();

        driver.set_status(UsbStatus::Ready);
        driver.fire_power(PowerEvent::Detected);
        driver.fire_power(PowerEvent::Ready);
        usbd.process();
        assert!(driver.is_enabled());
        assert!(driver.is_started());
        assert!(events.take().contains(&Notification::Power(true)));

        usbd.disconnect();
        assert!(!driver.is_started());
    }

    #[test]
    fn bulk_transfers_complete_to_the_stack() {
        let mut rx = [0u8; 64];
        let tx = [0x5au8; 20];
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();
        usbd.endpoint_add(BULK_OUT, 64, TransferType::Bulk).unwrap();
        usbd.endpoint_add(BULK_IN, 64, TransferType::Bulk).unwrap();

        usbd.endpoint_read(BULK_OUT, &mut rx).unwrap();
        usbd.endpoint_write(BULK_IN, &tx).unwrap();
        assert_eq!(usbd.endpoint_read_result(BULK_OUT).unwrap_err().0, ErrorCode::BUSY);

        driver.receive(hw(BULK_OUT), b"hello");
        driver.finish(hw(BULK_OUT), TransferStatus::Ok);
        usbd.process();
        driver.finish(hw(BULK_IN), TransferStatus::Ok);
        usbd.process();
        assert_eq!(
            events.take(),
            [
                Notification::StartProcess,
                Notification::OutComplete(BULK_OUT),
                Notification::StartProcess,
                Notification::InComplete(BULK_IN),
            ]
        );

        let (data, len) = usbd.endpoint_read_result(BULK_OUT).unwrap();
        assert_eq!(&data[..len], b"hello");
        assert_eq!(usbd.endpoint_write_result(BULK_IN), Ok(20));
    }

    #[test]
    fn abort_discards_the_pending_completion() {
        let mut first = [0u8; 64];
        let mut second = [0u8; 64];
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();
        usbd.endpoint_add(BULK_OUT, 64, TransferType::Bulk).unwrap();

        usbd.endpoint_read(BULK_OUT, &mut first).unwrap();
        driver.receive(hw(BULK_OUT), &[1, 2, 3]);
        driver.finish(hw(BULK_OUT), TransferStatus::Ok);

        assert!(usbd.endpoint_abort(BULK_OUT).is_some());
        usbd.endpoint_read(BULK_OUT, &mut second).unwrap();
        events.take();
        usbd.process();
        assert!(events.take().is_empty());
        assert_eq!(usbd.endpoint_read_result(BULK_OUT).unwrap_err().0, ErrorCode::BUSY);
    }

    #[test]
    fn endpoint_zero_is_only_reachable_through_ep0_operations() {
        let mut buffer = [0u8; 8];
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();

        let (e, _) = usbd.endpoint_read(Endpoint::EP0_OUT, &mut buffer).unwrap_err();
        assert_eq!(e, ErrorCode::INVAL);
        assert_eq!(usbd.endpoint_write(Endpoint::EP0_IN, &[1]), Err(ErrorCode::INVAL));
        assert_eq!(
            usbd.endpoint_add(Endpoint::EP0_IN, 64, TransferType::Control),
            Err(ErrorCode::ALREADY)
        );
        assert_eq!(
            usbd.endpoint_add(Endpoint::new(9, TransferDirection::In), 64, TransferType::Bulk),
            Err(ErrorCode::NOSUPPORT)
        );
    }

    #[test]
    fn bus_reset_restarts_endpoint_zero() {
        let response = [0u8; 128];
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();
        usbd.endpoint_add(BULK_IN, 64, TransferType::Bulk).unwrap();

        driver.set_setup(GET_DESCRIPTOR_128);
        driver.fire(UsbdEvent::Setup);
        usbd.process();
        usbd.ep0_write(&response).unwrap();

        driver.fire(UsbdEvent::Reset);
        usbd.process();
        assert_eq!(events.take().last(), Some(&Notification::Reset));
        assert_eq!(usbd.control.state(), TransactionState::SetupStage);
        assert!(driver.called(Call::EpAbort(UsbdEp::EPIN0)));
        assert!(!usbd.endpoints.is_configured(hw(BULK_IN)));
        assert_eq!(usbd.endpoint_add(BULK_IN, 64, TransferType::Bulk), Ok(()));
    }

    #[test]
    fn sof_is_reported_only_when_enabled() {
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();

        driver.fire(UsbdEvent::Sof { frame: 1 });
        usbd.process();
        usbd.sof_enable();
        driver.fire(UsbdEvent::Sof { frame: 2 });
        usbd.process();
        usbd.sof_disable();
        driver.fire(UsbdEvent::Sof { frame: 3 });
        usbd.process();

        let sofs: std::vec::Vec<_> = events
            .take()
            .into_iter()
            .filter(|n| matches!(n, Notification::Sof(_)))
            .collect();
        assert_eq!(sofs, [Notification::Sof(2)]);
    }

    #[test]
    fn stall_and_unstall_reach_the_hardware() {
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();
        usbd.endpoint_add(BULK_IN, 64, TransferType::Bulk).unwrap();

        usbd.endpoint_stall(BULK_IN);
        assert_eq!(usbd.endpoint_write(BULK_IN, &[0]), Err(ErrorCode::OFF));
        usbd.endpoint_unstall(BULK_IN);
        assert!(driver.called(Call::EpStall(hw(BULK_IN))));
        assert!(driver.called(Call::EpDtoggleClear(hw(BULK_IN))));
        assert_eq!(usbd.endpoint_write(BULK_IN, &[0]), Ok(()));

        usbd.ep0_stall();
        assert!(driver.called(Call::SetupStall));
    }

    #[test]
    fn unconfigure_and_deinit_drop_endpoints() {
        let events = RecordingEvents::new();
        let driver = MockDriver::new();
        let usbd = Usbd::new(&driver);
        usbd.init(&events).unwrap();
        usbd.endpoint_add(BULK_IN, 64, TransferType::Interrupt).unwrap();
        usbd.endpoint_add(BULK_OUT, 64, TransferType::Interrupt).unwrap();

        usbd.unconfigure();
        assert!(driver.called(Call::EpDisable(hw(BULK_IN))));
        assert!(driver.called(Call::EpDisable(hw(BULK_OUT))));
        assert_eq!(usbd.endpoint_add(BULK_IN, 64, TransferType::Bulk), Ok(()));

        driver.allow_wakeup(false);
        usbd.remote_wakeup();
        assert!(driver.called(Call::WakeupRequest));

        usbd.deinit();
        assert!(driver.called(Call::Uninit));
        assert!(!usbd.endpoints.is_configured(hw(BULK_IN)));
    }
}
