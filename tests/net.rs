mod common;

use common::{FakeDevice, TestHal, FEAT_NET_MAC, FEAT_NET_STATUS, FEAT_VERSION_1, LEGACY, MODERN};
use virtio_guest::device::net::{VirtIONet, BUFFER_ENTRY_SIZE};
use virtio_guest::error::VirtIoError;
use virtio_guest::transport::mmio::MmioTransport;
use virtio_guest::transport::{DeviceType, InterruptStatus};

const QUEUE_SIZE: usize = 16;
const MAC: [u8; 6] = [0x02, 0xca, 0xfe, 0xba, 0xbe, 0x01];

type Net = VirtIONet<TestHal, MmioTransport, QUEUE_SIZE>;

fn open(dev: &FakeDevice) -> Result<Net, VirtIoError> {
    let transport = MmioTransport::new(dev.io(), DeviceType::Network)?;
    VirtIONet::new(transport)
}

fn legacy_dev(loopback: bool) -> FakeDevice {
    FakeDevice::net(LEGACY, FEAT_NET_MAC | FEAT_NET_STATUS, MAC, loopback)
}

fn modern_dev(loopback: bool) -> FakeDevice {
    FakeDevice::net(
        MODERN,
        FEAT_VERSION_1 | FEAT_NET_MAC | FEAT_NET_STATUS,
        MAC,
        loopback,
    )
}

#[test]
fn open_exposes_mac_and_pre_posts_receive_slots() {
    let dev = legacy_dev(false);
    let net = open(&dev).unwrap();
    assert_eq!(net.mac_address(), MAC);
    assert_eq!(dev.avail_idx(0), (QUEUE_SIZE / 2) as u16);
    assert_eq!(dev.notifies(), [0]);
    assert!(net.can_send());
}

#[test]
fn transmit_prepends_a_legacy_header() {
    let dev = legacy_dev(false);
    let mut net = open(&dev).unwrap();
    let frame: Vec<u8> = (0..1500).map(|i| (i % 256) as u8).collect();
    assert_eq!(net.transmit(&frame), Ok(1500));
    assert_eq!(dev.avail_idx(1), 1);
    assert!(dev.notifies().contains(&1));
    assert_eq!(dev.tx_hdr_lens(), [10]);
    assert_eq!(dev.tx_frames(), [frame]);
}

#[test]
fn transmit_prepends_a_modern_header() {
    let dev = modern_dev(false);
    let mut net = open(&dev).unwrap();
    let frame = [0xabu8; 64];
    assert_eq!(net.transmit(&frame), Ok(64));
    assert_eq!(dev.tx_hdr_lens(), [12]);
    assert_eq!(dev.tx_frames(), [frame.to_vec()]);
}

#[test]
fn receive_strips_the_header_and_reposts_the_slot() {
    let dev = legacy_dev(false);
    let mut net = open(&dev).unwrap();
    let frame: Vec<u8> = (0..64).map(|i| i as u8 ^ 0x5a).collect();
    dev.inject_rx(&frame);
    assert_eq!(net.receive_check(), 10 + 64);
    let mut buf = [0u8; 2048];
    assert_eq!(net.receive(&mut buf), Ok(64));
    assert_eq!(&buf[..64], frame.as_slice());
    // The drained slot goes straight back on the available ring.
    assert_eq!(dev.avail_idx(0), (QUEUE_SIZE / 2) as u16 + 1);
    assert_eq!(dev.notifies(), [0, 0]);
}

#[test]
fn receive_returns_zero_when_idle() {
    let dev = legacy_dev(false);
    let mut net = open(&dev).unwrap();
    assert_eq!(net.receive_check(), 0);
    let mut buf = [0u8; 128];
    assert_eq!(net.receive(&mut buf), Ok(0));
}

#[test]
fn oversized_frame_is_truncated_to_the_caller_buffer() {
    let dev = legacy_dev(false);
    let mut net = open(&dev).unwrap();
    let frame: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
    dev.inject_rx(&frame);
    let mut buf = [0u8; 100];
    assert_eq!(net.receive(&mut buf), Ok(100));
    assert_eq!(buf[..], frame[..100]);
}

#[test]
fn loopback_round_trips_a_frame() {
    let dev = modern_dev(true);
    let mut net = open(&dev).unwrap();
    let frame: Vec<u8> = (0..257).map(|i| (i * 7 % 256) as u8).collect();
    assert_eq!(net.transmit(&frame), Ok(frame.len()));
    let mut buf = [0u8; 2048];
    assert_eq!(net.receive(&mut buf), Ok(frame.len()));
    assert_eq!(&buf[..frame.len()], frame.as_slice());
}

#[test]
fn loopback_preserves_frame_order_across_many_slots() {
    let dev = legacy_dev(true);
    let mut net = open(&dev).unwrap();
    for round in 0..3 * QUEUE_SIZE {
        let frame = vec![round as u8; 60 + round % 32];
        assert_eq!(net.transmit(&frame), Ok(frame.len()));
        let mut buf = [0u8; 2048];
        assert_eq!(net.receive(&mut buf), Ok(frame.len()));
        assert_eq!(&buf[..frame.len()], frame.as_slice());
    }
}

#[test]
fn transmit_larger_than_a_slot_is_rejected() {
    let dev = legacy_dev(false);
    let mut net = open(&dev).unwrap();
    let frame = vec![0u8; BUFFER_ENTRY_SIZE + 1];
    assert_eq!(net.transmit(&frame), Err(VirtIoError::OversizedPayload));
    assert_eq!(dev.avail_idx(1), 0);
}

#[test]
fn used_ring_interrupt_is_acknowledged() {
    let dev = legacy_dev(false);
    let mut net = open(&dev).unwrap();
    dev.inject_rx(&[0u8; 60]);
    let cause = net.handle_interrupt().unwrap();
    assert!(cause.contains(InterruptStatus::USED_RING_UPDATE));
    assert_eq!(net.handle_interrupt().unwrap(), InterruptStatus::empty());
}

#[test]
fn close_fails_the_device_and_stops_io() {
    let dev = legacy_dev(false);
    let mut net = open(&dev).unwrap();
    net.close().unwrap();
    let writes = dev.status_writes();
    assert_ne!(writes[writes.len() - 2] & 128, 0);
    assert_eq!(*writes.last().unwrap(), 0);
    assert_eq!(net.transmit(&[0u8; 60]), Err(VirtIoError::DeviceFailed));
    let mut buf = [0u8; 64];
    assert_eq!(net.receive(&mut buf), Err(VirtIoError::DeviceFailed));
    assert!(!net.can_send());
    // Closing twice is harmless.
    net.close().unwrap();
}
