use bitflags::bitflags;

use crate::endian::Endianness;
use crate::hal::DmaPage;
use crate::transport::mmio::CONFIG_OFFSET;
use crate::volatile::ReadOnly;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct NetFeature: u64 {
        /// Device handles packets with partial checksum.
        const CSUM = 1 << 0;
        /// Driver handles packets with partial checksum.
        const GUEST_CSUM = 1 << 1;
        /// Device reports its maximum MTU.
        const MTU = 1 << 3;
        /// Device has a given MAC address.
        const MAC = 1 << 5;
        /// Driver can merge receive buffers.
        const MRG_RXBUF = 1 << 15;
        /// Configuration status field is available.
        const STATUS = 1 << 16;
        /// Control channel is available.
        const CTRL_VQ = 1 << 17;
        /// Device supports multiqueue with automatic receive steering.
        const MQ = 1 << 22;

        // device independent
        const RING_INDIRECT_DESC = 1 << 28;
        const RING_EVENT_IDX = 1 << 29;
        const VERSION_1 = 1 << 32;
    }
}

bitflags! {
    /// Link state reported in the configuration region.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct NetStatus: u16 {
        const LINK_UP = 1;
        const ANNOUNCE = 2;
    }
}

pub type EthernetAddress = [u8; 6];

/// Packet header the device expects in front of every frame, in both
/// directions. Legacy devices use the first 10 bytes; VERSION_1 devices
/// append a `num_buffers` word.
#[derive(Copy, Clone, Debug, Default)]
pub struct VirtioNetHdr {
    pub flags: u8,
    pub gso_type: u8,
    pub hdr_len: u16,
    pub gso_size: u16,
    pub csum_start: u16,
    pub csum_offset: u16,
}

pub const NET_HDR_SIZE_LEGACY: usize = 10;
pub const NET_HDR_SIZE_MODERN: usize = 12;

impl VirtioNetHdr {
    /// Encode `hdr_size` bytes of header into a DMA region at `off`.
    pub fn write_to(&self, page: &mut dyn DmaPage, off: usize, endian: Endianness, hdr_size: usize) {
        page.write_u8_at(off, self.flags);
        page.write_u8_at(off + 1, self.gso_type);
        page.write_u16_at(off + 2, endian.to_dev16(self.hdr_len));
        page.write_u16_at(off + 4, endian.to_dev16(self.gso_size));
        page.write_u16_at(off + 6, endian.to_dev16(self.csum_start));
        page.write_u16_at(off + 8, endian.to_dev16(self.csum_offset));
        if hdr_size == NET_HDR_SIZE_MODERN {
            // num_buffers is driver-written zero outside MRG_RXBUF.
            page.write_u16_at(off + 10, 0);
        }
    }
}

/// Device configuration region layout.
#[derive(Debug, Default)]
pub(super) struct NetConfig {
    pub(super) mac: ReadOnly<CONFIG_OFFSET, EthernetAddress>,
    pub(super) status: ReadOnly<{ CONFIG_OFFSET + 6 }, u16>,
}
