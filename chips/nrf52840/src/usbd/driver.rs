// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Interface to the vendor USBD/POWER driver.
//!
//! The vendor driver owns the registers, EasyDMA and the NVIC lines. The PHY
//! only decides when its primitives run and feeds their results into the
//! control-transfer state machine.

use core::fmt;

use kernel::hil::usb::{Endpoint, TransferDirection};
use kernel::ErrorCode;

/// Number of endpoint numbers per direction, including the isochronous
/// endpoint 8.
pub const NUM_ENDPOINTS: usize = 9;

/// An endpoint as the USBD driver numbers it. Uses the USB address encoding:
/// `0x80 | n` for EPIN\[n\], `n` for EPOUT\[n\].
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct UsbdEp(u8);

impl UsbdEp {
    pub const EPOUT0: UsbdEp = UsbdEp(0x00);
    pub const EPIN0: UsbdEp = UsbdEp(0x80);

    /// Map a USB endpoint address onto the hardware, if the hardware has it.
    pub fn from_endpoint(endpoint: Endpoint) -> Option<UsbdEp> {
        if (endpoint.number() as usize) < NUM_ENDPOINTS {
            Some(UsbdEp(endpoint.address()))
        } else {
            None
        }
    }

    pub fn endpoint(self) -> Endpoint {
        Endpoint::from_address(self.0)
    }

    pub fn number(self) -> u8 {
        self.0 & 0x0f
    }

    pub fn is_in(self) -> bool {
        self.0 & 0x80 != 0
    }

    pub fn direction(self) -> TransferDirection {
        self.endpoint().direction()
    }

    /// Position of this endpoint's transfer slot: EPIN0..EPIN8 first, then
    /// EPOUT0..EPOUT8.
    pub(crate) fn index(self) -> usize {
        if self.is_in() {
            self.number() as usize
        } else {
            NUM_ENDPOINTS + self.number() as usize
        }
    }
}

impl fmt::Debug for UsbdEp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dir = if self.is_in() { "IN" } else { "OUT" };
        write!(f, "EP{}{}", dir, self.number())
    }
}

/// Where a transfer's data lives.
///
/// The pointer is handed to EasyDMA; the PHY keeps the borrow that backs it
/// alive until the transfer completes or is aborted.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TransferData {
    Rx(*mut u8),
    Tx(*const u8),
}

/// One buffer submission on one endpoint.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transfer {
    pub data: TransferData,
    pub size: usize,
}

impl Transfer {
    pub fn rx(buffer: &mut [u8]) -> Transfer {
        Transfer {
            data: TransferData::Rx(buffer.as_mut_ptr()),
            size: buffer.len(),
        }
    }

    pub fn tx(buffer: &[u8]) -> Transfer {
        Transfer {
            data: TransferData::Tx(buffer.as_ptr()),
            size: buffer.len(),
        }
    }
}

/// How a transfer ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Ok,
    /// The transfer was cancelled by `ep_abort`.
    Aborted,
    /// The host sent more data than the buffer could take.
    Overload,
    /// Any other hardware-reported failure.
    Error,
}

/// Data-path notifications from the USBD interrupt.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UsbdEvent {
    Sof { frame: u16 },
    Reset,
    Suspend,
    Resume,
    WakeupRequest,
    /// A Setup packet was received on endpoint 0; fetch it with
    /// [`UsbdDriver::setup_get`].
    Setup,
    /// A transfer finished. Status handshakes on endpoint 0 are reported
    /// here too, on the endpoint of the status direction.
    EpTransfer { ep: UsbdEp, status: TransferStatus },
}

/// VBUS notifications from the POWER interrupt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PowerEvent {
    Detected,
    Ready,
    Removed,
}

/// VBUS state as reported by the POWER peripheral.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UsbStatus {
    Disconnected,
    /// VBUS detected, USB regulator not settled yet.
    Connected,
    /// VBUS detected and the USB regulator is ready.
    Ready,
}

/// Receiver of the vendor driver's interrupt-context callbacks.
pub trait UsbdClient {
    fn usbd_event(&self, event: UsbdEvent);
    fn power_event(&self, event: PowerEvent);
}

/// Primitives of the vendor USBD and POWER driver.
///
/// After `ep_abort(ep)` returns the driver must not report a successful
/// completion for the aborted transfer; at most it reports
/// `TransferStatus::Aborted`.
pub trait UsbdDriver<'a> {
    fn set_client(&self, client: &'a dyn UsbdClient);

    fn init(&self) -> Result<(), ErrorCode>;
    fn uninit(&self);

    fn enable(&self);
    fn disable(&self);
    fn is_enabled(&self) -> bool;

    /// Attach to the bus (pull-up on). `sof` enables SOF events.
    fn start(&self, sof: bool);
    fn stop(&self);
    fn is_started(&self) -> bool;

    fn usb_status(&self) -> UsbStatus;

    /// Unmask the USBD and POWER interrupt lines.
    fn enable_interrupts(&self);
    /// Mask the USBD and POWER interrupt lines.
    fn disable_interrupts(&self);

    /// Drive resume signalling; `false` if the host has not allowed it.
    fn wakeup_request(&self) -> bool;

    fn ep_enable(&self, ep: UsbdEp);
    fn ep_disable(&self, ep: UsbdEp);
    fn ep_max_packet_size_set(&self, ep: UsbdEp, size: u16);
    fn ep_transfer(&self, ep: UsbdEp, transfer: Transfer) -> Result<(), ErrorCode>;
    fn ep_abort(&self, ep: UsbdEp);
    /// Bytes received by the last OUT transfer on `ep`.
    fn epout_size_get(&self, ep: UsbdEp) -> usize;
    fn ep_stall(&self, ep: UsbdEp);
    fn ep_stall_clear(&self, ep: UsbdEp);
    fn ep_dtoggle_clear(&self, ep: UsbdEp);

    /// The 8 bytes of the last Setup packet.
    fn setup_get(&self) -> [u8; 8];
    /// Allow the status stage on endpoint 0.
    fn setup_clear(&self);
    /// Allow the next OUT data-stage packet on endpoint 0.
    fn setup_data_clear(&self);
    /// Stall the data and status stages on endpoint 0.
    fn setup_stall(&self);
}
