//! Bus-level transport abstraction and the device negotiation sequence.

use bitflags::bitflags;

use crate::endian::Endianness;
use crate::error::{VirtIoError, VirtIoResult};
use crate::hal::VirtIoDeviceIo;
use crate::PhysAddr;

pub mod mmio;

bitflags! {
    /// The device status field. Writing 0 into this field resets the device.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct DeviceStatus: u32 {
        /// The guest has found the device and recognized it as valid virtio.
        const ACKNOWLEDGE = 1;
        /// The guest knows how to drive the device.
        const DRIVER = 2;
        /// The driver is set up and ready to drive the device.
        const DRIVER_OK = 4;
        /// Feature negotiation is complete.
        const FEATURES_OK = 8;
        /// The device has experienced an unrecoverable error.
        const DEVICE_NEEDS_RESET = 64;
        /// The guest has given up on the device.
        const FAILED = 128;
    }
}

bitflags! {
    /// Contents of the interrupt status register.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct InterruptStatus: u32 {
        /// The device added an entry to a used ring.
        const USED_RING_UPDATE = 1 << 0;
        /// The device configuration space changed.
        const CONFIGURATION_CHANGE = 1 << 1;
    }
}

/// Device classes this crate can drive, by subsystem device id.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceType {
    Network = 1,
    Block = 2,
}

/// Transport generation, fixed per device instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Version {
    /// Pre-1.0 interface, guest-native byte order, PFN queue programming.
    Legacy = 1,
    /// VERSION_1 interface, little-endian, split queue address registers.
    Modern = 2,
}

/// One bus attachment of one device.
///
/// The required methods are register-level primitives; on top of them the
/// provided methods drive the status handshake that every device class runs
/// before touching a queue:
///
/// ```text
/// reset -> ACKNOWLEDGE -> DRIVER -> features -> [FEATURES_OK] -> DRIVER_OK
/// ```
///
/// with FAILED as the terminal sink on any error.
pub trait Transport {
    fn device_type(&self) -> DeviceType;
    fn version(&self) -> Version;

    /// Feature bits offered by the device, both 32-bit windows.
    fn read_device_features(&mut self) -> VirtIoResult<u64>;
    /// Feature bits activated by the driver.
    fn write_driver_features(&mut self, features: u64) -> VirtIoResult<()>;

    /// Largest queue size the device accepts for `queue`, 0 if absent.
    fn max_queue_size(&mut self, queue: u16) -> VirtIoResult<u16>;
    /// Publish the physical ring addresses of `queue` and mark it ready.
    fn queue_set(
        &mut self,
        queue: u16,
        size: u16,
        desc_pa: PhysAddr,
        avail_pa: PhysAddr,
        used_pa: PhysAddr,
    ) -> VirtIoResult<()>;
    /// Withdraw `queue` from the device.
    fn queue_unset(&mut self, queue: u16) -> VirtIoResult<()>;
    /// Tell the device to examine `queue`.
    fn notify(&mut self, queue: u16) -> VirtIoResult<()>;

    fn get_status(&self) -> VirtIoResult<DeviceStatus>;
    /// Write the cumulative status value. Callers only ever add bits.
    fn set_status(&mut self, status: DeviceStatus) -> VirtIoResult<()>;
    /// Write zero status and wait until the device observes the reset.
    fn reset(&mut self) -> VirtIoResult<()>;

    /// The register window holding the device-specific configuration region.
    fn io_region(&self) -> &dyn VirtIoDeviceIo;
    /// Configuration atomicity counter; constant 0 on legacy devices.
    fn config_generation(&self) -> VirtIoResult<u32>;

    fn interrupt_status(&self) -> VirtIoResult<InterruptStatus>;
    /// Read and acknowledge the pending interrupt causes.
    fn ack_interrupt(&mut self) -> VirtIoResult<InterruptStatus>;

    /// Byte-order convention implied by the transport generation.
    fn endianness(&self) -> Endianness {
        match self.version() {
            Version::Legacy => Endianness::Legacy,
            Version::Modern => Endianness::Little,
        }
    }

    /// Run the handshake up to feature agreement and return the negotiated
    /// set. Queues are programmed after this, and [`Transport::finish_init`]
    /// completes the sequence.
    fn begin_init(&mut self, supported: u64) -> VirtIoResult<u64> {
        self.reset()?;
        let mut status = DeviceStatus::ACKNOWLEDGE;
        self.set_status(status)?;
        status |= DeviceStatus::DRIVER;
        self.set_status(status)?;

        let offered = self.read_device_features()?;
        let negotiated = offered & supported;
        self.write_driver_features(negotiated)?;

        // Legacy devices predate FEATURES_OK; only the modern handshake has
        // the accept/reject round-trip.
        if self.version() == Version::Modern {
            status |= DeviceStatus::FEATURES_OK;
            self.set_status(status)?;
            if !self.get_status()?.contains(DeviceStatus::FEATURES_OK) {
                return Err(VirtIoError::NegotiationFailed);
            }
        }
        Ok(negotiated)
    }

    /// Set DRIVER_OK. The device may start servicing queues afterwards.
    fn finish_init(&mut self) -> VirtIoResult<()> {
        let status = self.get_status()? | DeviceStatus::DRIVER_OK;
        self.set_status(status)
    }

    /// OR FAILED into the status register. Terminal until the next reset.
    fn fail(&mut self) -> VirtIoResult<()> {
        let status = self.get_status()? | DeviceStatus::FAILED;
        self.set_status(status)
    }
}
