//! Integration tests for plume-gpu.

use plume_gpu::{AtomicBuffer, ComputeBuffer, CpuDevice, DeviceBackend};
use plume_types::PlumeError;

// ─── Buffer Tests ─────────────────────────────────────────────

#[test]
fn buffer_zeros() {
    let buf = ComputeBuffer::zeros(100);
    assert_eq!(buf.len(), 100);
    assert!(!buf.is_tracked());
    assert!(buf.as_slice().iter().all(|&x| x == 0.0));
}

#[test]
fn buffer_copy_requires_exact_length() {
    let mut buf = ComputeBuffer::zeros(3);
    buf.copy_from_slice(&[7.0, 8.0, 9.0]).unwrap();
    assert_eq!(buf.as_slice(), &[7.0, 8.0, 9.0]);
    assert!(matches!(
        buf.copy_from_slice(&[1.0]),
        Err(PlumeError::ShapeMismatch(_))
    ));
}

#[test]
fn buffer_counts_non_finite() {
    let buf = ComputeBuffer::from_data(vec![1.0, f32::NAN, f32::INFINITY, 0.0]);
    assert_eq!(buf.count_non_finite(), 2);
}

// ─── CpuDevice Tests ─────────────────────────────────────────

#[test]
fn cpu_device_identity() {
    let device = CpuDevice::new();
    assert_eq!(device.name(), "cpu");
    assert!(!device.is_gpu());
}

#[test]
fn allocation_is_charged_and_released() {
    let device = CpuDevice::with_budget(1024);
    let buf = device.allocate(64).unwrap();
    assert!(buf.is_tracked());
    assert_eq!(device.memory().in_use, 256);
    assert_eq!(device.memory().live_allocations, 1);
    drop(buf);
    assert_eq!(device.memory().in_use, 0);
    assert_eq!(device.memory().live_allocations, 0);
}

#[test]
fn allocation_over_budget_fails() {
    let device = CpuDevice::with_budget(100);
    let err = device.allocate(1000).unwrap_err();
    match err {
        PlumeError::DeviceAllocation { requested, available } => {
            assert_eq!(requested, 4000);
            assert_eq!(available, 100);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(device.memory().in_use, 0);
}

#[test]
fn upload_round_trip() {
    let device = CpuDevice::new();
    let buf = device.upload(&[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(buf.to_vec(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn atomic_buffer_keeps_reservation() {
    let device = CpuDevice::with_budget(1024);
    let acc = device.allocate_atomic(8).unwrap();
    acc.add(3, 2.5);
    acc.add(3, 0.5);
    let buf = acc.into_buffer();
    assert_eq!(buf.as_slice()[3], 3.0);
    assert_eq!(device.memory().in_use, 32);
    drop(buf);
    assert_eq!(device.memory().in_use, 0);
}

#[test]
fn atomic_buffer_untracked() {
    let acc = AtomicBuffer::zeros(2);
    acc.add(0, 1.0);
    assert_eq!(acc.load(0), 1.0);
    assert_eq!(acc.load(1), 0.0);
}

#[test]
fn cpu_axpy() {
    let device = CpuDevice::new();
    let a = ComputeBuffer::from_data(vec![1.0, 2.0, 3.0]);
    let b = ComputeBuffer::from_data(vec![4.0, 5.0, 6.0]);
    let mut out = ComputeBuffer::zeros(3);

    device.axpy(&a, &b, 2.0, &mut out).unwrap();
    assert_eq!(out.as_slice(), &[9.0, 12.0, 15.0]);
}

#[test]
fn cpu_axpy_length_mismatch() {
    let device = CpuDevice::new();
    let a = ComputeBuffer::from_data(vec![1.0, 2.0]);
    let b = ComputeBuffer::from_data(vec![4.0, 5.0, 6.0]);
    let mut out = ComputeBuffer::zeros(3);

    assert!(device.axpy(&a, &b, 1.0, &mut out).is_err());
}

#[test]
fn cpu_dot() {
    let device = CpuDevice::new();
    let a = ComputeBuffer::from_data(vec![1.0, 2.0, 3.0]);
    let b = ComputeBuffer::from_data(vec![4.0, 5.0, 6.0]);
    let result = device.dot(&a, &b).unwrap();
    assert!((result - 32.0).abs() < 1e-10);
}

#[test]
fn cpu_fill() {
    let device = CpuDevice::new();
    let mut buf = ComputeBuffer::zeros(5);
    device.fill(&mut buf, 3.5);
    assert!(buf.as_slice().iter().all(|&x| x == 3.5));
}
