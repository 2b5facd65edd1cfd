//! Memory-mapped transport, both the legacy and the modern register layout.

use alloc::boxed::Box;

use log::debug;

use crate::error::{VirtIoError, VirtIoResult};
use crate::hal::VirtIoDeviceIo;
use crate::transport::{DeviceStatus, DeviceType, InterruptStatus, Transport, Version};
use crate::volatile::{ReadOnly, ReadVolatile, ReadWrite, WriteOnly, WriteVolatile};
use crate::{PhysAddr, PAGE_SIZE};

/// `virt` in little-endian, the first register of every mmio device.
pub const MAGIC: u32 = 0x_7472_6976;
/// Start of the device-specific configuration region.
pub const CONFIG_OFFSET: usize = 0x100;

/// MMIO device register interface.
///
/// Ref: 4.2.2 MMIO Device Register Layout and 4.2.4 Legacy interface
#[derive(Default)]
pub struct VirtIOHeader {
    /// Magic value, `virt`.
    magic: ReadOnly<0x00>,

    /// Device version number; legacy devices return 0x1.
    version: ReadOnly<0x04>,

    /// Virtio subsystem device id; zero means no device.
    device_id: ReadOnly<0x08>,

    /// Virtio subsystem vendor id.
    vendor_id: ReadOnly<0x0c>,

    /// Features the device supports, windowed by `device_features_sel`.
    device_features: ReadOnly<0x10>,

    /// Device (host) features word selection.
    device_features_sel: WriteOnly<0x14>,

    /// Features understood and activated by the driver, windowed by
    /// `driver_features_sel`.
    driver_features: WriteOnly<0x20>,

    /// Activated (guest) features word selection.
    driver_features_sel: WriteOnly<0x24>,

    /// Guest page size, written before any queue is used. Legacy only; the
    /// device multiplies QueuePFN by this value.
    legacy_guest_page_size: WriteOnly<0x28>,

    /// Queue index selecting which queue the following registers address.
    queue_sel: WriteOnly<0x30>,

    /// Maximum queue size the device is ready to process, or zero if the
    /// selected queue does not exist.
    queue_num_max: ReadOnly<0x34>,

    /// Queue size the driver will use for the selected queue.
    queue_num: WriteOnly<0x38>,

    /// Alignment boundary of the used ring, in bytes. Legacy only.
    legacy_queue_align: WriteOnly<0x3c>,

    /// Guest physical page number of the selected queue. Writing zero
    /// releases the queue. Legacy only.
    legacy_queue_pfn: ReadWrite<0x40>,

    /// Selected queue is live. Modern only.
    queue_ready: ReadWrite<0x44>,

    /// Queue notifier.
    queue_notify: WriteOnly<0x50>,

    /// Interrupt status.
    interrupt_status: ReadOnly<0x60>,

    /// Interrupt acknowledge; write back the bits to clear.
    interrupt_ack: WriteOnly<0x64>,

    /// Device status. Writing zero triggers a device reset.
    status: ReadWrite<0x70>,

    // Modern interface only from here: 64-bit ring addresses, split low/high.
    queue_desc_low: WriteOnly<0x80>,
    queue_desc_high: WriteOnly<0x84>,
    queue_driver_low: WriteOnly<0x90>,
    queue_driver_high: WriteOnly<0x94>,
    queue_device_low: WriteOnly<0xa0>,
    queue_device_high: WriteOnly<0xa4>,

    /// Configuration atomicity value. Modern only.
    config_generation: ReadOnly<0xfc>,
}

/// A device attached through a virtio-mmio register window.
pub struct MmioTransport {
    io_region: Box<dyn VirtIoDeviceIo>,
    header: VirtIOHeader,
    version: Version,
    device_type: DeviceType,
}

impl MmioTransport {
    /// Probe the register window and bind it as `expected`.
    ///
    /// Fails with [`VirtIoError::TransportFault`] when the window does not
    /// hold a virtio device, and [`VirtIoError::InvalidParam`] when it holds
    /// one of a different class.
    pub fn new(io_region: Box<dyn VirtIoDeviceIo>, expected: DeviceType) -> VirtIoResult<Self> {
        let header = VirtIOHeader::default();
        let io = io_region.as_ref();
        if header.magic.read(io)? != MAGIC {
            return Err(VirtIoError::TransportFault);
        }
        let version = match header.version.read(io)? {
            1 => Version::Legacy,
            2 => Version::Modern,
            _ => return Err(VirtIoError::TransportFault),
        };
        let device_id = header.device_id.read(io)?;
        if device_id == 0 {
            return Err(VirtIoError::TransportFault);
        }
        if device_id != expected as u32 {
            return Err(VirtIoError::InvalidParam);
        }
        debug!(
            "virtio-mmio: device id {} ({:?}), vendor {:#x}",
            device_id,
            version,
            header.vendor_id.read(io)?
        );
        Ok(MmioTransport {
            io_region,
            header,
            version,
            device_type: expected,
        })
    }
}

impl Transport for MmioTransport {
    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn version(&self) -> Version {
        self.version
    }

    fn read_device_features(&mut self) -> VirtIoResult<u64> {
        let io = self.io_region.as_ref();
        self.header.device_features_sel.write(0, io)?;
        let low = self.header.device_features.read(io)? as u64;
        let high = match self.version {
            Version::Legacy => 0,
            Version::Modern => {
                self.header.device_features_sel.write(1, io)?;
                self.header.device_features.read(io)? as u64
            }
        };
        Ok(high << 32 | low)
    }

    fn write_driver_features(&mut self, features: u64) -> VirtIoResult<()> {
        let io = self.io_region.as_ref();
        self.header.driver_features_sel.write(0, io)?;
        self.header.driver_features.write(features as u32, io)?;
        if self.version == Version::Modern {
            self.header.driver_features_sel.write(1, io)?;
            self.header.driver_features.write((features >> 32) as u32, io)?;
        }
        Ok(())
    }

    fn max_queue_size(&mut self, queue: u16) -> VirtIoResult<u16> {
        let io = self.io_region.as_ref();
        self.header.queue_sel.write(queue as u32, io)?;
        let max = self.header.queue_num_max.read(io)?;
        Ok(max.min(u16::MAX as u32) as u16)
    }

    fn queue_set(
        &mut self,
        queue: u16,
        size: u16,
        desc_pa: PhysAddr,
        avail_pa: PhysAddr,
        used_pa: PhysAddr,
    ) -> VirtIoResult<()> {
        let io = self.io_region.as_ref();
        self.header.queue_sel.write(queue as u32, io)?;
        self.header.queue_num.write(size as u32, io)?;
        match self.version {
            Version::Legacy => {
                // The legacy device derives all three addresses from the PFN
                // and the fixed split layout, so the layout the queue chose
                // has to be exactly the one the device will assume.
                let q = size as usize;
                let expected_avail = desc_pa + 16 * q;
                let expected_used =
                    (expected_avail + 6 + 2 * q + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
                if desc_pa % PAGE_SIZE != 0
                    || avail_pa != expected_avail
                    || used_pa != expected_used
                {
                    return Err(VirtIoError::QueueInitFailed);
                }
                self.header
                    .legacy_guest_page_size
                    .write(PAGE_SIZE as u32, io)?;
                self.header.legacy_queue_align.write(PAGE_SIZE as u32, io)?;
                self.header
                    .legacy_queue_pfn
                    .write((desc_pa / PAGE_SIZE) as u32, io)
            }
            Version::Modern => {
                self.header.queue_desc_low.write(desc_pa as u32, io)?;
                self.header
                    .queue_desc_high
                    .write((desc_pa as u64 >> 32) as u32, io)?;
                self.header.queue_driver_low.write(avail_pa as u32, io)?;
                self.header
                    .queue_driver_high
                    .write((avail_pa as u64 >> 32) as u32, io)?;
                self.header.queue_device_low.write(used_pa as u32, io)?;
                self.header
                    .queue_device_high
                    .write((used_pa as u64 >> 32) as u32, io)?;
                self.header.queue_ready.write(1, io)
            }
        }
    }

    fn queue_unset(&mut self, queue: u16) -> VirtIoResult<()> {
        let io = self.io_region.as_ref();
        self.header.queue_sel.write(queue as u32, io)?;
        match self.version {
            Version::Legacy => self.header.legacy_queue_pfn.write(0, io),
            Version::Modern => self.header.queue_ready.write(0, io),
        }
    }

    fn notify(&mut self, queue: u16) -> VirtIoResult<()> {
        self.header
            .queue_notify
            .write(queue as u32, self.io_region.as_ref())
    }

    fn get_status(&self) -> VirtIoResult<DeviceStatus> {
        let bits = self.header.status.read(self.io_region.as_ref())?;
        Ok(DeviceStatus::from_bits_truncate(bits))
    }

    fn set_status(&mut self, status: DeviceStatus) -> VirtIoResult<()> {
        self.header
            .status
            .write(status.bits(), self.io_region.as_ref())
    }

    fn reset(&mut self) -> VirtIoResult<()> {
        let io = self.io_region.as_ref();
        self.header.status.write(0, io)?;
        while self.header.status.read(io)? != 0 {
            core::hint::spin_loop();
        }
        Ok(())
    }

    fn io_region(&self) -> &dyn VirtIoDeviceIo {
        self.io_region.as_ref()
    }

    fn config_generation(&self) -> VirtIoResult<u32> {
        match self.version {
            Version::Legacy => Ok(0),
            Version::Modern => self.header.config_generation.read(self.io_region.as_ref()),
        }
    }

    fn interrupt_status(&self) -> VirtIoResult<InterruptStatus> {
        let bits = self.header.interrupt_status.read(self.io_region.as_ref())?;
        Ok(InterruptStatus::from_bits_truncate(bits))
    }

    fn ack_interrupt(&mut self) -> VirtIoResult<InterruptStatus> {
        let io = self.io_region.as_ref();
        let bits = self.header.interrupt_status.read(io)?;
        if bits != 0 {
            self.header.interrupt_ack.write(bits, io)?;
        }
        Ok(InterruptStatus::from_bits_truncate(bits))
    }
}
