mod common;

use common::{FakeDevice, TestHal, FEAT_BLK_FLUSH, FEAT_BLK_SIZE, FEAT_VERSION_1, LEGACY, MODERN};
use virtio_guest::device::block::VirtIOBlk;
use virtio_guest::error::VirtIoError;
use virtio_guest::transport::mmio::MmioTransport;
use virtio_guest::transport::DeviceType;

type Blk = VirtIOBlk<TestHal, MmioTransport>;

fn open(dev: &FakeDevice) -> Result<Blk, VirtIoError> {
    let transport = MmioTransport::new(dev.io(), DeviceType::Block)?;
    VirtIOBlk::new(transport)
}

#[test]
fn legacy_init_with_default_sector_size() {
    let dev = FakeDevice::disk(LEGACY, 0, 2048, None);
    let blk = open(&dev).unwrap();
    assert_eq!(blk.block_size(), 512);
    assert_eq!(blk.capacity(), 2048);
    assert_eq!(dev.status_writes(), [0, 1, 3, 7]);
}

#[test]
fn modern_init_reads_block_size() {
    let dev = FakeDevice::disk(MODERN, FEAT_VERSION_1 | FEAT_BLK_SIZE, 2048, Some(4096));
    let blk = open(&dev).unwrap();
    assert_eq!(blk.block_size(), 4096);
    assert_eq!(dev.status_writes(), [0, 1, 3, 11, 15]);
}

#[test]
fn out_of_range_request_is_rejected_without_side_effects() {
    let dev = FakeDevice::disk(LEGACY, 0, 10, None);
    let mut blk = open(&dev).unwrap();
    let mut buf = vec![0u8; 5 * 512];
    assert_eq!(
        blk.read_blocks(8, &mut buf),
        Err(VirtIoError::OutOfRange)
    );
    assert!(dev.notifies().is_empty());
    // The device is intact and a valid request still goes through.
    assert_eq!(blk.read_blocks(8, &mut buf[..2 * 512]), Ok(1024));
}

#[test]
fn write_then_read_round_trips() {
    let dev = FakeDevice::disk(LEGACY, 0, 2048, None);
    let mut blk = open(&dev).unwrap();
    let data: Vec<u8> = (0..3 * 512).map(|i| (i % 251) as u8).collect();
    assert_eq!(blk.write_blocks(7, &data), Ok(data.len()));
    let mut back = vec![0u8; data.len()];
    assert_eq!(blk.read_blocks(7, &mut back), Ok(back.len()));
    assert_eq!(back, data);
}

#[test]
fn modern_four_kib_blocks_round_trip() {
    let dev = FakeDevice::disk(MODERN, FEAT_VERSION_1 | FEAT_BLK_SIZE, 2048, Some(4096));
    let mut blk = open(&dev).unwrap();
    let data: Vec<u8> = (0..4096).map(|i| (i % 13) as u8).collect();
    assert_eq!(blk.write_blocks(3, &data), Ok(4096));
    let mut back = vec![0u8; 4096];
    assert_eq!(blk.read_blocks(3, &mut back), Ok(4096));
    assert_eq!(back, data);
}

#[test]
fn partial_block_is_an_invalid_parameter() {
    let dev = FakeDevice::disk(LEGACY, 0, 64, None);
    let mut blk = open(&dev).unwrap();
    let mut buf = vec![0u8; 100];
    assert_eq!(
        blk.read_blocks(0, &mut buf),
        Err(VirtIoError::InvalidParam)
    );
}

#[test]
fn flush_reaches_the_device() {
    let dev = FakeDevice::disk(LEGACY, FEAT_BLK_FLUSH, 64, None);
    let mut blk = open(&dev).unwrap();
    blk.flush().unwrap();
    assert_eq!(dev.flushes(), 1);
}

#[test]
fn flush_without_the_feature_is_unsupported() {
    let dev = FakeDevice::disk(LEGACY, 0, 64, None);
    let mut blk = open(&dev).unwrap();
    assert_eq!(blk.flush(), Err(VirtIoError::Unsupported));
    assert_eq!(dev.flushes(), 0);
}

#[test]
fn host_clearing_features_ok_fails_negotiation() {
    let dev = FakeDevice::disk(MODERN, FEAT_VERSION_1, 64, None);
    dev.set_reject_features_ok();
    assert_eq!(open(&dev).err(), Some(VirtIoError::NegotiationFailed));
    let last = *dev.status_writes().last().unwrap();
    assert_ne!(last & 128, 0);
}

#[test]
fn unaligned_block_size_fails_init() {
    let dev = FakeDevice::disk(MODERN, FEAT_VERSION_1 | FEAT_BLK_SIZE, 64, Some(520));
    assert_eq!(open(&dev).err(), Some(VirtIoError::InvalidParam));
    let last = *dev.status_writes().last().unwrap();
    assert_ne!(last & 128, 0);
}

#[test]
fn shutdown_fails_the_device_then_resets() {
    let dev = FakeDevice::disk(LEGACY, 0, 64, None);
    let mut blk = open(&dev).unwrap();
    blk.shutdown().unwrap();
    let writes = dev.status_writes();
    assert_ne!(writes[writes.len() - 2] & 128, 0);
    assert_eq!(*writes.last().unwrap(), 0);
    let mut buf = vec![0u8; 512];
    assert_eq!(
        blk.read_blocks(0, &mut buf),
        Err(VirtIoError::DeviceFailed)
    );
}
