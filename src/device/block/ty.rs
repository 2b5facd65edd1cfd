use bitflags::bitflags;

use crate::endian::Endianness;
use crate::error::{VirtIoError, VirtIoResult};
use crate::hal::DmaPage;
use crate::transport::mmio::CONFIG_OFFSET;
use crate::volatile::ReadOnly;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct BlkFeature: u64 {
        /// Maximum size of any single segment is in `size_max`.
        const SIZE_MAX      = 1 << 1;
        /// Maximum number of segments in a request is in `seg_max`.
        const SEG_MAX       = 1 << 2;
        /// Disk-style geometry specified in `geometry`.
        const GEOMETRY      = 1 << 4;
        /// Device is read-only.
        const RO            = 1 << 5;
        /// Block size of disk is in `blk_size`.
        const BLK_SIZE      = 1 << 6;
        /// Cache flush command support.
        const FLUSH         = 1 << 9;
        /// Device exports information on optimal I/O alignment.
        const TOPOLOGY      = 1 << 10;
        /// Device can toggle between writeback and writethrough caching.
        const CONFIG_WCE    = 1 << 11;

        // device independent
        const RING_INDIRECT_DESC = 1 << 28;
        const RING_EVENT_IDX     = 1 << 29;
        const VERSION_1          = 1 << 32;
    }
}

/// Request type discriminants on the wire.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlkReqType {
    /// Read sectors into the data buffer.
    In = 0,
    /// Write the data buffer to sectors.
    Out = 1,
    /// Flush the device write cache.
    Flush = 4,
}

/// The 16-byte header leading every block request chain.
#[derive(Copy, Clone, Debug)]
pub struct BlkReqHeader {
    type_: BlkReqType,
    sector: u64,
}

impl BlkReqHeader {
    pub fn new(type_: BlkReqType, sector: u64) -> Self {
        Self { type_, sector }
    }

    /// Encode into a DMA region at `off`: type, reserved word, sector.
    pub fn write_to(&self, page: &mut dyn DmaPage, off: usize, endian: Endianness) {
        page.write_u32_at(off, endian.to_dev32(self.type_ as u32));
        page.write_u32_at(off + 4, 0);
        page.write_u64_at(off + 8, endian.to_dev64(self.sector));
    }
}

/// The one-byte status trailer the device fills in on completion.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlkRespStatus(pub u8);

impl BlkRespStatus {
    pub const OK: BlkRespStatus = BlkRespStatus(0);
    pub const IO_ERR: BlkRespStatus = BlkRespStatus(1);
    pub const UNSUPPORTED: BlkRespStatus = BlkRespStatus(2);
    /// Sentinel the driver pre-writes so a stale zero can never be mistaken
    /// for success.
    pub const NOT_READY: BlkRespStatus = BlkRespStatus(3);

    pub fn into_result(self) -> VirtIoResult<()> {
        match self {
            Self::OK => Ok(()),
            Self::UNSUPPORTED => Err(VirtIoError::Unsupported),
            _ => Err(VirtIoError::IoError),
        }
    }
}

/// Device configuration region layout. Only the fields the driver consumes
/// are declared; `size_max`, `seg_max` and the geometry tuple follow the
/// capacity at offsets 8, 12 and 16.
#[derive(Debug, Default)]
pub(super) struct BlkConfig {
    pub(super) capacity_low: ReadOnly<CONFIG_OFFSET, u32>,
    pub(super) capacity_high: ReadOnly<{ CONFIG_OFFSET + 0x4 }, u32>,
    pub(super) blk_size: ReadOnly<{ CONFIG_OFFSET + 0x14 }, u32>,
}
