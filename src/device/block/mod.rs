//! Driver for virtio block devices.
//!
//! Each request is a three-descriptor chain: a 16-byte header, the data
//! buffer and a one-byte status trailer the device fills in. The header and
//! trailer live in a driver-owned DMA page; the data buffer belongs to the
//! caller and is mapped for the duration of the request. Requests are
//! submitted and drained one at a time, so chain heads are derived from the
//! available-index shadow instead of a free list.

use alloc::boxed::Box;
use core::hint::spin_loop;
use core::marker::PhantomData;

use log::{info, warn};

use crate::endian::Endianness;
use crate::error::{VirtIoError, VirtIoResult};
use crate::hal::{DmaPage, Hal};
use crate::queue::{DescFlags, VirtQueue};
use crate::transport::{DeviceType, Transport};
use crate::volatile::ReadVolatile;
use crate::PhysAddr;

mod ty;

pub use ty::{BlkFeature, BlkReqType, BlkRespStatus};
use ty::{BlkConfig, BlkReqHeader};

/// Capacity is always reported in units of 512 bytes, whatever the logical
/// block size.
pub const SECTOR_SIZE: usize = 512;

const QUEUE_SIZE: usize = 16;
const QUEUE_REQUEST: u16 = 0;
/// Descriptors per read/write chain: header, data, status.
const CHAIN_LEN: u16 = 3;
/// Wire size of the request header.
const REQ_HDR_LEN: usize = 16;
/// Offset of the status trailer inside the request page.
const REQ_STATUS_OFFSET: usize = REQ_HDR_LEN;

const SUPPORTED_FEATURES: BlkFeature = BlkFeature::VERSION_1
    .union(BlkFeature::BLK_SIZE)
    .union(BlkFeature::FLUSH);

/// One request in flight, between submit and completion.
#[derive(Copy, Clone, Debug)]
struct Inflight {
    head: u16,
    descs: u16,
    bytes: usize,
}

/// Driver for one virtio block device.
pub struct VirtIOBlk<H: Hal, T: Transport> {
    transport: T,
    queue: VirtQueue<QUEUE_SIZE>,
    /// Holds the request header at offset 0 and the status trailer after it.
    req_page: Box<dyn DmaPage>,
    endian: Endianness,
    features: BlkFeature,
    /// Device capacity in 512-byte sectors.
    capacity: u64,
    /// Logical block size, a multiple of [`SECTOR_SIZE`].
    block_size: u32,
    inflight: Option<Inflight>,
    failed: bool,
    _hal: PhantomData<H>,
}

impl<H: Hal, T: Transport> VirtIOBlk<H, T> {
    /// Negotiate with the device, bring up the request queue and read the
    /// geometry. On failure the device is left with FAILED set.
    pub fn new(mut transport: T) -> VirtIoResult<Self> {
        match Self::setup(&mut transport) {
            Ok((queue, req_page, features, capacity, block_size)) => {
                let endian = transport.endianness();
                Ok(VirtIOBlk {
                    transport,
                    queue,
                    req_page,
                    endian,
                    features,
                    capacity,
                    block_size,
                    inflight: None,
                    failed: false,
                    _hal: PhantomData,
                })
            }
            Err(e) => {
                let _ = transport.fail();
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn setup(
        transport: &mut T,
    ) -> VirtIoResult<(VirtQueue<QUEUE_SIZE>, Box<dyn DmaPage>, BlkFeature, u64, u32)> {
        if transport.device_type() != DeviceType::Block {
            return Err(VirtIoError::InvalidParam);
        }
        let features =
            BlkFeature::from_bits_truncate(transport.begin_init(SUPPORTED_FEATURES.bits())?);
        let endian = transport.endianness();

        let config = BlkConfig::default();
        let io = transport.io_region();
        let capacity = (endian.from_dev32(config.capacity_high.read(io)?) as u64) << 32
            | endian.from_dev32(config.capacity_low.read(io)?) as u64;
        let block_size = if features.contains(BlkFeature::BLK_SIZE) {
            endian.from_dev32(config.blk_size.read(io)?)
        } else {
            SECTOR_SIZE as u32
        };
        if block_size == 0 || block_size as usize % SECTOR_SIZE != 0 {
            return Err(VirtIoError::InvalidParam);
        }

        let queue = VirtQueue::new::<H, T>(transport, QUEUE_REQUEST)?;
        let req_page = H::dma_alloc(1)?;
        transport.finish_init()?;
        info!(
            "virtio-blk: {} sectors, block size {}, features {:?}",
            capacity, block_size, features
        );
        Ok((queue, req_page, features, capacity, block_size))
    }

    fn ensure_ready(&self) -> VirtIoResult<()> {
        if self.failed {
            Err(VirtIoError::DeviceFailed)
        } else {
            Ok(())
        }
    }

    /// Device capacity in 512-byte sectors.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Logical block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    fn capacity_blocks(&self) -> u64 {
        self.capacity / (self.block_size as u64 / SECTOR_SIZE as u64)
    }

    /// Submit one read or write without waiting for completion.
    ///
    /// `buf_pa` is the mapped address of the caller's buffer, which stays
    /// owned by the device until [`Self::transfer_complete`] returns for the
    /// token this hands back. `len` must be a whole number of blocks.
    pub fn transfer_begin(
        &mut self,
        op: BlkReqType,
        start_block: u64,
        buf_pa: PhysAddr,
        len: usize,
    ) -> VirtIoResult<u16> {
        self.ensure_ready()?;
        if op == BlkReqType::Flush {
            return Err(VirtIoError::Unsupported);
        }
        if self.inflight.is_some() {
            return Err(VirtIoError::QueueFull);
        }
        if len == 0 || len % self.block_size as usize != 0 {
            return Err(VirtIoError::InvalidParam);
        }
        let count = (len / self.block_size as usize) as u64;
        if start_block + count > self.capacity_blocks() {
            warn!(
                "virtio-blk: request [{}, {}) exceeds capacity {}",
                start_block,
                start_block + count,
                self.capacity_blocks()
            );
            return Err(VirtIoError::OutOfRange);
        }

        let sector = start_block * (self.block_size as u64 / SECTOR_SIZE as u64);
        BlkReqHeader::new(op, sector).write_to(self.req_page.as_mut(), 0, self.endian);
        self.req_page
            .write_u8_at(REQ_STATUS_OFFSET, BlkRespStatus::NOT_READY.0);

        let head = self.queue.avail_idx().wrapping_mul(CHAIN_LEN) % QUEUE_SIZE as u16;
        let data = (head + 1) % QUEUE_SIZE as u16;
        let status = (head + 2) % QUEUE_SIZE as u16;
        let data_flags = match op {
            BlkReqType::In => DescFlags::NEXT | DescFlags::WRITE,
            _ => DescFlags::NEXT,
        };
        self.queue
            .fill_desc(head, self.req_page.paddr(), REQ_HDR_LEN as u32, DescFlags::NEXT, data);
        self.queue.fill_desc(data, buf_pa, len as u32, data_flags, status);
        self.queue.fill_desc(
            status,
            self.req_page.paddr() + REQ_STATUS_OFFSET,
            1,
            DescFlags::WRITE,
            0,
        );
        self.queue.submit(head);
        self.transport.notify(QUEUE_REQUEST)?;
        self.inflight = Some(Inflight {
            head,
            descs: CHAIN_LEN,
            bytes: len,
        });
        Ok(head)
    }

    /// Whether the request identified by `token` has completed.
    pub fn peek_complete(&self, token: u16) -> bool {
        matches!(self.queue.peek_used(), Some((id, _)) if id == token)
    }

    /// Reap a completed request and decode its status trailer. Returns the
    /// transferred byte count, or [`VirtIoError::NotReady`] while the device
    /// still owns the chain.
    pub fn transfer_complete(&mut self, token: u16) -> VirtIoResult<usize> {
        self.ensure_ready()?;
        let inflight = match self.inflight {
            Some(inflight) if inflight.head == token => inflight,
            _ => return Err(VirtIoError::InvalidParam),
        };
        let (id, _len) = self.queue.poll_used().ok_or(VirtIoError::NotReady)?;
        self.inflight = None;
        if id != inflight.head {
            // The device completed a chain that was never submitted; nothing
            // about the rings can be trusted any more.
            self.failed = true;
            let _ = self.transport.fail();
            return Err(VirtIoError::TransportFault);
        }
        for k in 0..inflight.descs {
            self.queue
                .free_desc((inflight.head + k) % QUEUE_SIZE as u16);
        }
        let status = BlkRespStatus(self.req_page.read_u8_at(REQ_STATUS_OFFSET));
        status.into_result().map(|()| inflight.bytes)
    }

    fn wait_complete(&mut self, token: u16) -> VirtIoResult<usize> {
        loop {
            match self.transfer_complete(token) {
                Err(VirtIoError::NotReady) => spin_loop(),
                done => return done,
            }
        }
    }

    /// Read whole blocks starting at `start_block`, blocking on completion.
    /// `buf.len()` must be a multiple of the block size.
    pub fn read_blocks(&mut self, start_block: u64, buf: &mut [u8]) -> VirtIoResult<usize> {
        let pa = H::dma_map_in(buf, true);
        let token = self.transfer_begin(BlkReqType::In, start_block, pa, buf.len())?;
        let bytes = self.wait_complete(token)?;
        H::dma_map_out(pa, buf, true);
        Ok(bytes)
    }

    /// Write whole blocks starting at `start_block`, blocking on completion.
    /// `buf.len()` must be a multiple of the block size.
    pub fn write_blocks(&mut self, start_block: u64, buf: &[u8]) -> VirtIoResult<usize> {
        let pa = H::dma_map_in(buf, true);
        let token = self.transfer_begin(BlkReqType::Out, start_block, pa, buf.len())?;
        self.wait_complete(token)
    }

    /// Flush the device write cache and wait for it to land.
    pub fn flush(&mut self) -> VirtIoResult<()> {
        self.ensure_ready()?;
        if !self.features.contains(BlkFeature::FLUSH) {
            return Err(VirtIoError::Unsupported);
        }
        if self.inflight.is_some() {
            return Err(VirtIoError::QueueFull);
        }
        BlkReqHeader::new(BlkReqType::Flush, 0).write_to(self.req_page.as_mut(), 0, self.endian);
        self.req_page
            .write_u8_at(REQ_STATUS_OFFSET, BlkRespStatus::NOT_READY.0);

        // A flush carries no data, so the chain is header plus status only.
        let head = self.queue.avail_idx().wrapping_mul(CHAIN_LEN) % QUEUE_SIZE as u16;
        let status = (head + 1) % QUEUE_SIZE as u16;
        self.queue
            .fill_desc(head, self.req_page.paddr(), REQ_HDR_LEN as u32, DescFlags::NEXT, status);
        self.queue.fill_desc(
            status,
            self.req_page.paddr() + REQ_STATUS_OFFSET,
            1,
            DescFlags::WRITE,
            0,
        );
        self.queue.submit(head);
        self.transport.notify(QUEUE_REQUEST)?;
        self.inflight = Some(Inflight {
            head,
            descs: 2,
            bytes: 0,
        });
        self.wait_complete(head).map(|_| ())
    }

    /// Abandon the device: mark it FAILED, withdraw the queue and reset.
    /// Outstanding buffers are void afterwards.
    pub fn shutdown(&mut self) -> VirtIoResult<()> {
        if self.failed {
            return Ok(());
        }
        self.failed = true;
        self.inflight = None;
        self.transport.fail()?;
        self.transport.queue_unset(QUEUE_REQUEST)?;
        self.transport.reset()
    }
}
