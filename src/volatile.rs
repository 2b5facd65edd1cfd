//! Typed register accessors with compile-time offsets.
//!
//! A register map is declared as a struct of zero-sized markers, one per
//! register, each carrying its byte offset and access width in the type.
//! Reads and writes go through a [`VirtIoDeviceIo`] region, so a marker can
//! never be used with the wrong direction or width.

use core::marker::PhantomData;

use crate::error::VirtIoResult;
use crate::hal::VirtIoDeviceIo;

#[derive(Debug)]
pub struct ReadOnly<const OFFSET: usize, T: Copy = u32> {
    _marker: PhantomData<T>,
}

#[derive(Debug)]
pub struct WriteOnly<const OFFSET: usize, T: Copy = u32> {
    _marker: PhantomData<T>,
}

#[derive(Debug)]
pub struct ReadWrite<const OFFSET: usize, T: Copy = u32> {
    _marker: PhantomData<T>,
}

impl<const OFFSET: usize, T: Copy> Default for ReadOnly<OFFSET, T> {
    fn default() -> Self {
        Self { _marker: PhantomData }
    }
}
impl<const OFFSET: usize, T: Copy> Default for WriteOnly<OFFSET, T> {
    fn default() -> Self {
        Self { _marker: PhantomData }
    }
}
impl<const OFFSET: usize, T: Copy> Default for ReadWrite<OFFSET, T> {
    fn default() -> Self {
        Self { _marker: PhantomData }
    }
}

pub trait ReadVolatile {
    type T;
    fn read(&self, io_region: &dyn VirtIoDeviceIo) -> VirtIoResult<Self::T>;
}

pub trait WriteVolatile {
    type T;
    fn write(&self, data: Self::T, io_region: &dyn VirtIoDeviceIo) -> VirtIoResult<()>;
}

impl<const OFFSET: usize> ReadVolatile for ReadOnly<OFFSET, u32> {
    type T = u32;
    #[inline]
    fn read(&self, io_region: &dyn VirtIoDeviceIo) -> VirtIoResult<u32> {
        io_region.read_volatile_u32_at(OFFSET)
    }
}

impl<const OFFSET: usize> ReadVolatile for ReadOnly<OFFSET, u16> {
    type T = u16;
    #[inline]
    fn read(&self, io_region: &dyn VirtIoDeviceIo) -> VirtIoResult<u16> {
        io_region.read_volatile_u16_at(OFFSET)
    }
}

impl<const OFFSET: usize> ReadVolatile for ReadOnly<OFFSET, u8> {
    type T = u8;
    #[inline]
    fn read(&self, io_region: &dyn VirtIoDeviceIo) -> VirtIoResult<u8> {
        io_region.read_volatile_u8_at(OFFSET)
    }
}

impl<const OFFSET: usize, const SIZE: usize> ReadVolatile for ReadOnly<OFFSET, [u8; SIZE]> {
    type T = [u8; SIZE];
    #[inline]
    fn read(&self, io_region: &dyn VirtIoDeviceIo) -> VirtIoResult<[u8; SIZE]> {
        let mut out = [0; SIZE];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = io_region.read_volatile_u8_at(OFFSET + i)?;
        }
        Ok(out)
    }
}

impl<const OFFSET: usize> WriteVolatile for WriteOnly<OFFSET, u32> {
    type T = u32;
    #[inline]
    fn write(&self, data: u32, io_region: &dyn VirtIoDeviceIo) -> VirtIoResult<()> {
        io_region.write_volatile_u32_at(OFFSET, data)
    }
}

impl<const OFFSET: usize> ReadVolatile for ReadWrite<OFFSET, u32> {
    type T = u32;
    #[inline]
    fn read(&self, io_region: &dyn VirtIoDeviceIo) -> VirtIoResult<u32> {
        io_region.read_volatile_u32_at(OFFSET)
    }
}

impl<const OFFSET: usize> WriteVolatile for ReadWrite<OFFSET, u32> {
    type T = u32;
    #[inline]
    fn write(&self, data: u32, io_region: &dyn VirtIoDeviceIo) -> VirtIoResult<()> {
        io_region.write_volatile_u32_at(OFFSET, data)
    }
}
