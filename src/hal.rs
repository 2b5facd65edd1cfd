//! Platform collaborator traits.
//!
//! The driver core never dereferences raw memory itself. Register windows
//! and DMA regions are reached through these traits, and the implementations
//! own whatever volatile or cache-maintenance machinery the platform needs.
//! Identity-mapped platforms can implement the DMA mapping hooks as casts.

use alloc::boxed::Box;

use crate::error::VirtIoResult;
use crate::PhysAddr;

/// Volatile access to a device register window.
pub trait VirtIoDeviceIo: Send + Sync {
    fn read_volatile_u32_at(&self, off: usize) -> VirtIoResult<u32>;
    fn write_volatile_u32_at(&self, off: usize, data: u32) -> VirtIoResult<()>;
    fn read_volatile_u16_at(&self, off: usize) -> VirtIoResult<u16>;
    fn read_volatile_u8_at(&self, off: usize) -> VirtIoResult<u8>;
}

/// One aligned, physically-contiguous DMA allocation.
///
/// The rings and the packet/request buffer pools live in these regions. The
/// device writes them concurrently, so every access must be volatile; the
/// offset-based accessors keep the one place that knows how to do that in
/// the platform layer. Offsets are byte offsets from the start of the
/// region, and callers keep them naturally aligned for the access width.
pub trait DmaPage: Send + Sync {
    /// Physical address of the start of the region, as the device sees it.
    fn paddr(&self) -> PhysAddr;
    /// Length of the region in bytes.
    fn size(&self) -> usize;

    fn read_u8_at(&self, off: usize) -> u8;
    fn read_u16_at(&self, off: usize) -> u16;
    fn read_u32_at(&self, off: usize) -> u32;
    fn read_u64_at(&self, off: usize) -> u64;
    fn write_u8_at(&mut self, off: usize, data: u8);
    fn write_u16_at(&mut self, off: usize, data: u16);
    fn write_u32_at(&mut self, off: usize, data: u32);
    fn write_u64_at(&mut self, off: usize, data: u64);

    /// Copy `src` into the region starting at `off`.
    fn copy_in(&mut self, off: usize, src: &[u8]);
    /// Copy out of the region starting at `off` into `dst`.
    fn copy_out(&self, off: usize, dst: &mut [u8]);
}

/// Aligned allocation and buffer mapping, supplied by the platform.
pub trait Hal {
    /// Allocate `pages` zeroed, page-aligned, physically-contiguous pages.
    fn dma_alloc(pages: usize) -> VirtIoResult<Box<dyn DmaPage>>;

    /// Make a caller-owned buffer visible to the device and return the
    /// physical address to place into a descriptor. The buffer stays
    /// borrowed by the device until the request completes. `cacheable`
    /// tells a non-coherent platform whether the buffer is in cached
    /// memory and therefore needs a flush before the device reads it.
    fn dma_map_in(buffer: &[u8], cacheable: bool) -> PhysAddr;

    /// Tear down a mapping established by [`Hal::dma_map_in`], copying any
    /// device-written bytes back into `buffer` on bounce-buffer platforms
    /// and invalidating stale cache lines when `cacheable`.
    fn dma_map_out(paddr: PhysAddr, buffer: &mut [u8], cacheable: bool);
}
