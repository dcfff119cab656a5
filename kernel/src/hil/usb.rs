// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Interface to USB device-side PHY hardware.
//!
//! A generic USB device stack drives the controller through [`UsbPhy`] and
//! receives notifications through [`UsbPhyEvents`]. The PHY owns all
//! endpoint and control-transfer state; the stack never touches it directly.
//!
//! Hardware notifications arrive in interrupt context and are only queued
//! there. The PHY then asks the stack to schedule processing with
//! [`UsbPhyEvents::start_process`], and the stack calls [`UsbPhy::process`]
//! from its own (cooperative) context. Every other [`UsbPhyEvents`] method
//! is only ever invoked from inside `process()`.
//!
//! Endpoint 0 follows the standard three-stage control transfer:
//!
//! ```text
//!   ep0_setup() ──► data stage (ep0_read / ep0_write) ──► status stage
//! ```
//!
//! The status stage of a device-to-host (IN) request is allowed by calling
//! `ep0_read` with an empty buffer; the status stage of a host-to-device
//! (OUT) or no-data request is allowed by calling `ep0_write` with an empty
//! buffer.

use crate::ErrorCode;
use tock_registers::{register_bitfields, LocalRegisterCopy};

register_bitfields![u8,
    /// `bmRequestType` byte of a Setup packet.
    pub RequestType [
        RECIPIENT OFFSET(0) NUMBITS(5) [
            Device = 0,
            Interface = 1,
            Endpoint = 2,
            Other = 3
        ],
        TYPE OFFSET(5) NUMBITS(2) [
            Standard = 0,
            Class = 1,
            Vendor = 2
        ],
        DIRECTION OFFSET(7) NUMBITS(1) [
            HostToDevice = 0,
            DeviceToHost = 1
        ]
    ]
];

/// Direction of a transfer, from the host's point of view.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

impl TransferDirection {
    pub const fn opposite(self) -> TransferDirection {
        match self {
            TransferDirection::In => TransferDirection::Out,
            TransferDirection::Out => TransferDirection::In,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Bulk,
    Interrupt,
    Isochronous,
}

/// A USB endpoint address: bit 7 set for IN endpoints, endpoint number in
/// the low four bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Endpoint(u8);

impl Endpoint {
    pub const EP0_OUT: Endpoint = Endpoint(0x00);
    pub const EP0_IN: Endpoint = Endpoint(0x80);

    const DIR_IN: u8 = 0x80;
    const NUMBER_MASK: u8 = 0x0f;

    pub const fn new(number: u8, direction: TransferDirection) -> Endpoint {
        let number = number & Endpoint::NUMBER_MASK;
        match direction {
            TransferDirection::In => Endpoint(number | Endpoint::DIR_IN),
            TransferDirection::Out => Endpoint(number),
        }
    }

    /// Interpret a raw endpoint address. Reserved bits are ignored.
    pub const fn from_address(address: u8) -> Endpoint {
        Endpoint(address & (Endpoint::DIR_IN | Endpoint::NUMBER_MASK))
    }

    pub const fn address(self) -> u8 {
        self.0
    }

    pub const fn number(self) -> u8 {
        self.0 & Endpoint::NUMBER_MASK
    }

    pub const fn is_in(self) -> bool {
        self.0 & Endpoint::DIR_IN != 0
    }

    pub const fn direction(self) -> TransferDirection {
        if self.is_in() {
            TransferDirection::In
        } else {
            TransferDirection::Out
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}

/// `bRequest` codes of the standard device requests.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus = 0,
    ClearFeature = 1,
    SetFeature = 3,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
    GetInterface = 10,
    SetInterface = 11,
    SynchFrame = 12,
}

impl TryFrom<u8> for StandardRequest {
    type Error = ErrorCode;

    fn try_from(request: u8) -> Result<Self, Self::Error> {
        match request {
            0 => Ok(StandardRequest::GetStatus),
            1 => Ok(StandardRequest::ClearFeature),
            3 => Ok(StandardRequest::SetFeature),
            5 => Ok(StandardRequest::SetAddress),
            6 => Ok(StandardRequest::GetDescriptor),
            7 => Ok(StandardRequest::SetDescriptor),
            8 => Ok(StandardRequest::GetConfiguration),
            9 => Ok(StandardRequest::SetConfiguration),
            10 => Ok(StandardRequest::GetInterface),
            11 => Ok(StandardRequest::SetInterface),
            12 => Ok(StandardRequest::SynchFrame),
            _ => Err(ErrorCode::NOSUPPORT),
        }
    }
}

/// The 8-byte packet that opens every control transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub const SIZE: usize = 8;

    pub const fn empty() -> SetupPacket {
        SetupPacket {
            request_type: 0,
            request: 0,
            value: 0,
            index: 0,
            length: 0,
        }
    }

    /// Decode a Setup packet as it appears on the wire (multi-byte fields
    /// little-endian).
    pub fn parse(bytes: &[u8; SetupPacket::SIZE]) -> SetupPacket {
        SetupPacket {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; SetupPacket::SIZE] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    fn bm_request_type(&self) -> LocalRegisterCopy<u8, RequestType::Register> {
        LocalRegisterCopy::new(self.request_type)
    }

    /// Direction of the data stage. Fixed for the whole transaction.
    pub fn direction(&self) -> TransferDirection {
        if self.bm_request_type().is_set(RequestType::DIRECTION) {
            TransferDirection::In
        } else {
            TransferDirection::Out
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self.bm_request_type().read_as_enum(RequestType::TYPE) {
            Some(RequestType::TYPE::Value::Standard) => RequestKind::Standard,
            Some(RequestType::TYPE::Value::Class) => RequestKind::Class,
            Some(RequestType::TYPE::Value::Vendor) => RequestKind::Vendor,
            None => RequestKind::Reserved,
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self.bm_request_type().read_as_enum(RequestType::RECIPIENT) {
            Some(RequestType::RECIPIENT::Value::Device) => Recipient::Device,
            Some(RequestType::RECIPIENT::Value::Interface) => Recipient::Interface,
            Some(RequestType::RECIPIENT::Value::Endpoint) => Recipient::Endpoint,
            Some(RequestType::RECIPIENT::Value::Other) => Recipient::Other,
            None => Recipient::Reserved,
        }
    }

    /// The standard request this packet carries, if it is one.
    pub fn standard_request(&self) -> Option<StandardRequest> {
        match self.kind() {
            RequestKind::Standard => StandardRequest::try_from(self.request).ok(),
            _ => None,
        }
    }

    pub fn has_data_stage(&self) -> bool {
        self.length != 0
    }

    /// Direction of the zero-length status packet that closes the transfer.
    pub fn status_direction(&self) -> TransferDirection {
        if self.has_data_stage() {
            self.direction().opposite()
        } else {
            TransferDirection::In
        }
    }
}

/// What one hardware endpoint number can be configured as.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EndpointCapability {
    pub control: bool,
    pub bulk: bool,
    pub interrupt: bool,
    pub isochronous: bool,
    pub max_packet: u16,
}

impl EndpointCapability {
    pub fn supports(&self, transfer_type: TransferType) -> bool {
        match transfer_type {
            TransferType::Control => self.control,
            TransferType::Bulk => self.bulk,
            TransferType::Interrupt => self.interrupt,
            TransferType::Isochronous => self.isochronous,
        }
    }
}

/// Static description of the endpoints a controller provides, indexed by
/// endpoint number. The stack uses it to lay out its configuration
/// descriptors.
#[derive(Debug)]
pub struct EndpointTableInfo {
    pub endpoints: &'static [EndpointCapability],
}

impl EndpointTableInfo {
    pub fn capability(&self, number: u8) -> Option<&EndpointCapability> {
        self.endpoints.get(number as usize)
    }
}

/// Outcome of collecting a receive.
///
/// On success the buffer comes back with the number of bytes received. On
/// failure the buffer comes back too unless the transfer is still in flight
/// (`BUSY`) or there was no transfer to collect.
pub type ReadResult<'a> = Result<(&'a mut [u8], usize), (ErrorCode, Option<&'a mut [u8]>)>;

/// Notifications from the PHY to the USB device stack.
pub trait UsbPhyEvents {
    /// VBUS appeared (`true`) or went away (`false`).
    fn power(&self, powered: bool);

    /// The bus was suspended (`true`) or resumed (`false`).
    fn suspend(&self, suspended: bool);

    /// Start of frame, only while SOF reporting is enabled.
    fn sof(&self, frame: u16);

    /// The host reset the bus. All endpoints other than endpoint 0 are gone
    /// and endpoint 0 waits for a Setup packet.
    fn reset(&self);

    /// A Setup packet was captured; read it with
    /// [`UsbPhy::ep0_setup_read_result`].
    fn ep0_setup(&self);

    /// An endpoint 0 OUT packet completed: either a data-stage packet
    /// (collect it with [`UsbPhy::ep0_read_result`]) or the status handshake
    /// of an IN request.
    fn ep0_out(&self);

    /// An endpoint 0 IN transfer completed: either the whole data stage of
    /// an IN request or the status handshake of an OUT/no-data request.
    fn ep0_in(&self);

    /// A receive armed with [`UsbPhy::endpoint_read`] finished.
    fn out_complete(&self, endpoint: Endpoint);

    /// A transmit armed with [`UsbPhy::endpoint_write`] finished.
    fn in_complete(&self, endpoint: Endpoint);

    /// Called from interrupt context: the stack should arrange for
    /// [`UsbPhy::process`] to be called soon.
    fn start_process(&self);
}

/// USB device-side PHY.
pub trait UsbPhy<'a> {
    /// Bring up the controller and register the stack's event sink.
    fn init(&'a self, events: &'a dyn UsbPhyEvents) -> Result<(), ErrorCode>;

    /// Power down the controller and forget every endpoint.
    fn deinit(&self);

    /// Whether VBUS is present.
    fn powered(&self) -> bool;

    /// Attach to the bus as soon as VBUS allows it.
    fn connect(&self);

    fn disconnect(&self);

    /// The host selected a configuration.
    fn configure(&self);

    /// The configuration was cleared; all non-control endpoints are removed.
    fn unconfigure(&self);

    fn sof_enable(&self);

    fn sof_disable(&self);

    fn set_address(&self, address: u8);

    fn remote_wakeup(&self);

    fn endpoint_table(&self) -> &'static EndpointTableInfo;

    /// Request a max packet size for endpoint 0; returns the size in effect.
    fn ep0_set_max_packet(&self, max_packet: u32) -> u32;

    /// Copy the last Setup packet into `buffer`; returns the bytes copied.
    fn ep0_setup_read_result(&self, buffer: &mut [u8]) -> usize;

    /// Arm reception of one data-stage packet, or, with an empty buffer,
    /// allow the status stage of an IN request.
    fn ep0_read(&self, buffer: &'a mut [u8]) -> Result<(), (ErrorCode, &'a mut [u8])>;

    fn ep0_read_result(&self) -> ReadResult<'a>;

    /// Send the complete data stage of an IN request, or, with an empty
    /// buffer, allow the status stage of an OUT/no-data request.
    fn ep0_write(&self, buffer: &'a [u8]) -> Result<(), ErrorCode>;

    /// Reject the current control request. Cleared by the next Setup packet.
    fn ep0_stall(&self);

    fn endpoint_add(
        &self,
        endpoint: Endpoint,
        max_packet: u32,
        transfer_type: TransferType,
    ) -> Result<(), ErrorCode>;

    /// Idempotent; aborts any transfer in flight.
    fn endpoint_remove(&self, endpoint: Endpoint);

    fn endpoint_stall(&self, endpoint: Endpoint);

    fn endpoint_unstall(&self, endpoint: Endpoint);

    fn endpoint_read(
        &self,
        endpoint: Endpoint,
        buffer: &'a mut [u8],
    ) -> Result<(), (ErrorCode, &'a mut [u8])>;

    /// `Err((BUSY, None))` while the receive has not completed.
    fn endpoint_read_result(&self, endpoint: Endpoint) -> ReadResult<'a>;

    fn endpoint_write(&self, endpoint: Endpoint, buffer: &'a [u8]) -> Result<(), ErrorCode>;

    /// Number of bytes sent by the last completed transmit.
    fn endpoint_write_result(&self, endpoint: Endpoint) -> Result<usize, ErrorCode>;

    /// Drop the transfer in flight, handing back a receive buffer if there
    /// was one. A new transfer may be armed immediately afterwards.
    fn endpoint_abort(&self, endpoint: Endpoint) -> Option<&'a mut [u8]>;

    /// Handle every hardware event queued since the last call.
    fn process(&self);
}
