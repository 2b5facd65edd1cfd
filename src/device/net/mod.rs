//! Driver for virtio network devices.
//!
//! Queue 0 receives, queue 1 transmits. Each direction owns half of its
//! queue's descriptor table as fixed two-descriptor slots (net header plus
//! frame) backed by a contiguous buffer pool, so frames are copied once
//! between caller memory and DMA memory and descriptors are never
//! dynamically allocated. All receive slots are posted at open and re-posted
//! as frames are drained.

use alloc::boxed::Box;
use core::marker::PhantomData;

use log::{debug, info, warn};

use crate::endian::Endianness;
use crate::error::{VirtIoError, VirtIoResult};
use crate::hal::{DmaPage, Hal};
use crate::queue::{DescFlags, VirtQueue};
use crate::transport::{DeviceType, InterruptStatus, Transport, Version};
use crate::volatile::ReadVolatile;
use crate::pages;

mod ty;

pub use ty::{EthernetAddress, NetFeature, NetStatus};
use ty::{NetConfig, VirtioNetHdr, NET_HDR_SIZE_LEGACY, NET_HDR_SIZE_MODERN};

const QUEUE_RECEIVE: u16 = 0;
const QUEUE_TRANSMIT: u16 = 1;

/// Frame capacity of one slot: an Ethernet MTU frame with margin for the
/// 14-byte link header, a VLAN tag and the FCS.
pub const BUFFER_ENTRY_SIZE: usize = 1526;

const SUPPORTED_FEATURES: NetFeature = NetFeature::MAC
    .union(NetFeature::STATUS)
    .union(NetFeature::VERSION_1);

/// Driver for one virtio network device.
///
/// `QUEUE_SIZE` must be an even power of two; each direction carries
/// `QUEUE_SIZE / 2` frames in flight at most.
pub struct VirtIONet<H: Hal, T: Transport, const QUEUE_SIZE: usize> {
    transport: T,
    endian: Endianness,
    mac: EthernetAddress,
    /// Net header size on the wire, fixed at negotiation.
    hdr_size: usize,
    recv_queue: VirtQueue<QUEUE_SIZE>,
    send_queue: VirtQueue<QUEUE_SIZE>,
    rx_pool: Box<dyn DmaPage>,
    tx_pool: Box<dyn DmaPage>,
    running: bool,
    _hal: PhantomData<H>,
}

impl<H: Hal, T: Transport, const QUEUE_SIZE: usize> VirtIONet<H, T, QUEUE_SIZE> {
    const SLOTS: usize = QUEUE_SIZE / 2;

    /// Negotiate, bring up both queues, pre-post every receive slot and
    /// read the MAC. On failure the device is left with FAILED set.
    pub fn new(mut transport: T) -> VirtIoResult<Self> {
        match Self::setup(&mut transport) {
            Ok((recv_queue, send_queue, rx_pool, tx_pool, hdr_size, mac)) => {
                let endian = transport.endianness();
                Ok(VirtIONet {
                    transport,
                    endian,
                    mac,
                    hdr_size,
                    recv_queue,
                    send_queue,
                    rx_pool,
                    tx_pool,
                    running: true,
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
    ) -> VirtIoResult<(
        VirtQueue<QUEUE_SIZE>,
        VirtQueue<QUEUE_SIZE>,
        Box<dyn DmaPage>,
        Box<dyn DmaPage>,
        usize,
        EthernetAddress,
    )> {
        if QUEUE_SIZE == 0 || QUEUE_SIZE % 2 != 0 {
            return Err(VirtIoError::InvalidParam);
        }
        if transport.device_type() != DeviceType::Network {
            return Err(VirtIoError::InvalidParam);
        }
        let features =
            NetFeature::from_bits_truncate(transport.begin_init(SUPPORTED_FEATURES.bits())?);
        let endian = transport.endianness();
        let hdr_size = match transport.version() {
            Version::Legacy => NET_HDR_SIZE_LEGACY,
            Version::Modern => NET_HDR_SIZE_MODERN,
        };

        let mut recv_queue = VirtQueue::new::<H, T>(transport, QUEUE_RECEIVE)?;
        let mut send_queue = VirtQueue::new::<H, T>(transport, QUEUE_TRANSMIT)?;

        let stride = hdr_size + BUFFER_ENTRY_SIZE;
        let rx_pool = H::dma_alloc(pages(stride * Self::SLOTS))?;
        let tx_pool = H::dma_alloc(pages(stride * Self::SLOTS))?;

        for slot in 0..Self::SLOTS {
            let id = (2 * slot) as u16;
            let base = rx_pool.paddr() + slot * stride;
            recv_queue.fill_desc(
                id,
                base,
                hdr_size as u32,
                DescFlags::WRITE | DescFlags::NEXT,
                id + 1,
            );
            recv_queue.fill_desc(id + 1, base + hdr_size, BUFFER_ENTRY_SIZE as u32, DescFlags::WRITE, 0);
            recv_queue.submit(id);
        }

        send_queue.suppress_used_interrupt(true);

        transport.finish_init()?;
        transport.notify(QUEUE_RECEIVE)?;

        // Config reads are only stable within one generation window.
        let config = NetConfig::default();
        let mac = loop {
            let generation = transport.config_generation()?;
            let mac = config.mac.read(transport.io_region())?;
            if transport.config_generation()? == generation {
                break mac;
            }
        };
        if features.contains(NetFeature::STATUS) {
            let status = NetStatus::from_bits_truncate(
                endian.from_dev16(config.status.read(transport.io_region())?),
            );
            debug!("virtio-net: link status {:?}", status);
        }
        info!(
            "virtio-net: MAC {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}, {} slots per direction",
            mac[0],
            mac[1],
            mac[2],
            mac[3],
            mac[4],
            mac[5],
            Self::SLOTS
        );
        Ok((recv_queue, send_queue, rx_pool, tx_pool, hdr_size, mac))
    }

    fn ensure_running(&self) -> VirtIoResult<()> {
        if self.running {
            Ok(())
        } else {
            Err(VirtIoError::DeviceFailed)
        }
    }

    /// MAC address read from the configuration region at open.
    pub fn mac_address(&self) -> EthernetAddress {
        self.mac
    }

    /// Whether a transmit slot is free, as of the last reclaim.
    pub fn can_send(&self) -> bool {
        self.running && (self.send_queue.pending() as usize) < Self::SLOTS
    }

    fn slot_stride(&self) -> usize {
        self.hdr_size + BUFFER_ENTRY_SIZE
    }

    /// Queue one Ethernet frame for transmission and return its length.
    pub fn transmit(&mut self, frame: &[u8]) -> VirtIoResult<usize> {
        self.ensure_running()?;
        if frame.len() > BUFFER_ENTRY_SIZE {
            warn!(
                "virtio-net: transmit of {} bytes exceeds slot size {}",
                frame.len(),
                BUFFER_ENTRY_SIZE
            );
            return Err(VirtIoError::OversizedPayload);
        }
        // Reclaim slots the device has finished with.
        while self.send_queue.poll_used().is_some() {}
        if self.send_queue.pending() as usize >= Self::SLOTS {
            return Err(VirtIoError::QueueFull);
        }

        let id = self.send_queue.avail_idx().wrapping_mul(2) % QUEUE_SIZE as u16;
        let base = (id as usize / 2) * self.slot_stride();
        VirtioNetHdr::default().write_to(self.tx_pool.as_mut(), base, self.endian, self.hdr_size);
        self.tx_pool.copy_in(base + self.hdr_size, frame);

        let pa = self.tx_pool.paddr() + base;
        self.send_queue
            .fill_desc(id, pa, self.hdr_size as u32, DescFlags::NEXT, id + 1);
        self.send_queue
            .fill_desc(id + 1, pa + self.hdr_size, frame.len() as u32, DescFlags::empty(), 0);
        self.send_queue.submit(id);
        if self.send_queue.should_notify() {
            self.transport.notify(QUEUE_TRANSMIT)?;
        }
        Ok(frame.len())
    }

    /// Bytes pending in the next received buffer, including the net header,
    /// or 0 when nothing has arrived.
    pub fn receive_check(&self) -> usize {
        if !self.running {
            return 0;
        }
        match self.recv_queue.peek_used() {
            Some((_, len)) => len as usize,
            None => 0,
        }
    }

    /// Copy the next received frame into `buf` and re-post its slot.
    ///
    /// Returns 0 when nothing is pending. A frame longer than `buf` is
    /// truncated to fit and the copied length returned.
    pub fn receive(&mut self, buf: &mut [u8]) -> VirtIoResult<usize> {
        self.ensure_running()?;
        let (id, len) = match self.recv_queue.poll_used() {
            Some(entry) => entry,
            None => return Ok(0),
        };
        let payload = (len as usize)
            .checked_sub(self.hdr_size)
            .ok_or(VirtIoError::IoError)?;
        if id as usize >= QUEUE_SIZE || id % 2 != 0 {
            // Only even chain heads were ever posted; the ring is corrupt.
            self.running = false;
            let _ = self.transport.fail();
            return Err(VirtIoError::TransportFault);
        }

        // The chain was posted as header at `id`, frame at `id + 1`. Narrow
        // the address the device handed back to the receive pool before
        // touching it.
        let data_pa = self.recv_queue.desc_addr(id + 1);
        let pool = self.rx_pool.paddr();
        if data_pa < pool || data_pa + BUFFER_ENTRY_SIZE > pool + self.rx_pool.size() {
            self.running = false;
            let _ = self.transport.fail();
            return Err(VirtIoError::TransportFault);
        }
        let copied = payload.min(buf.len());
        if copied < payload {
            debug!(
                "virtio-net: truncating {}-byte frame to {}-byte buffer",
                payload,
                buf.len()
            );
        }
        self.rx_pool.copy_out(data_pa - pool, &mut buf[..copied]);

        // Hand the slot straight back to the device.
        self.recv_queue.submit(id);
        if self.recv_queue.should_notify() {
            self.transport.notify(QUEUE_RECEIVE)?;
        }
        Ok(copied)
    }

    /// Read and acknowledge the pending interrupt causes.
    pub fn handle_interrupt(&mut self) -> VirtIoResult<InterruptStatus> {
        self.ensure_running()?;
        self.transport.ack_interrupt()
    }

    /// Abandon the device: mark it FAILED, withdraw both queues and reset.
    /// The buffer pools are released when the instance drops.
    pub fn close(&mut self) -> VirtIoResult<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        self.transport.fail()?;
        self.transport.queue_unset(QUEUE_RECEIVE)?;
        self.transport.queue_unset(QUEUE_TRANSMIT)?;
        self.transport.reset()
    }
}
