//! Integration tests for plume-grid.

use glam::Vec3;
use plume_gpu::{CpuDevice, DeviceBackend};
use plume_grid::{
    BoundaryPolicy, DensityField, FieldKind, GradientAccumulator, GradientBuffer, GridShape,
    VelocityField, VelocityLayout,
};
use plume_types::PlumeError;

// ─── Shape Tests ──────────────────────────────────────────────

#[test]
fn shape_rejects_degenerate() {
    assert!(GridShape::new(0, 4, 4, 1.0).is_err());
    assert!(GridShape::new(4, 4, 4, 0.0).is_err());
    assert!(GridShape::new(4, 4, 4, f32::NAN).is_err());
}

#[test]
fn shape_index_round_trip() {
    let shape = GridShape::new(3, 4, 5, 0.1).unwrap();
    for n in 0..shape.cell_count() {
        let [i, j, k] = shape.coords(n);
        assert_eq!(shape.index(i, j, k), n);
    }
}

#[test]
fn shape_mismatch_detected() {
    let a = GridShape::cubic(8, 1.0).unwrap();
    let b = GridShape::cubic(8, 0.5).unwrap();
    let c = GridShape::new(8, 8, 4, 1.0).unwrap();
    assert!(a.ensure_matches(&a, "self").is_ok());
    assert!(matches!(a.ensure_matches(&b, "spacing"), Err(PlumeError::ShapeMismatch(_))));
    assert!(matches!(a.ensure_matches(&c, "dims"), Err(PlumeError::ShapeMismatch(_))));
}

#[test]
fn staggered_lattices_have_extra_face() {
    let shape = GridShape::new(2, 3, 4, 1.0).unwrap();
    let kind = FieldKind::Velocity(VelocityLayout::Staggered);
    let lattices = kind.lattices(&shape);
    assert_eq!(lattices[0].dims, [3, 3, 4]);
    assert_eq!(lattices[1].dims, [2, 4, 4]);
    assert_eq!(lattices[2].dims, [2, 3, 5]);
    assert_eq!(kind.element_count(&shape), 36 + 32 + 30);
}

#[test]
fn centered_lattices_share_cell_offsets() {
    let shape = GridShape::new(2, 3, 4, 1.0).unwrap();
    let lattices = FieldKind::Velocity(VelocityLayout::Centered).lattices(&shape);
    assert_eq!(lattices.len(), 3);
    assert_eq!(lattices[0], lattices[1]);
    assert_eq!(lattices[1], lattices[2]);
    assert_eq!(lattices[0], FieldKind::Density.lattices(&shape)[0]);
    let staggered = FieldKind::Velocity(VelocityLayout::Staggered).lattices(&shape);
    assert_ne!(staggered[0], lattices[0]);
}

// ─── Field Tests ─────────────────────────────────────────────

#[test]
fn density_rejects_negative_values() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(2, 1.0).unwrap();
    let mut host = vec![0.5; 8];
    host[3] = -0.1;
    assert!(matches!(
        DensityField::from_host(&device, shape, &host),
        Err(PlumeError::InvalidField(_))
    ));
}

#[test]
fn density_rejects_wrong_length() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(2, 1.0).unwrap();
    assert!(matches!(
        DensityField::from_host(&device, shape, &[1.0; 7]),
        Err(PlumeError::ShapeMismatch(_))
    ));
}

#[test]
fn density_sample_at_cell_center_is_exact() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(3, 0.1).unwrap();
    let host: Vec<f32> = (0..27).map(|n| n as f32 * 0.25).collect();
    let field = DensityField::from_host(&device, shape, &host).unwrap();
    let q = Vec3::new(1.5, 2.5, 0.5);
    assert_eq!(field.sample(q, BoundaryPolicy::Clamp), field.at(1, 2, 0));
}

#[test]
fn density_mass() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(2, 0.5).unwrap();
    let field = DensityField::from_host(&device, shape, &[1.0; 8]).unwrap();
    assert!((field.total_mass() - 1.0).abs() < 1e-9);
}

#[test]
fn uniform_velocity_samples_everywhere() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(4, 1.0).unwrap();
    let v = Vec3::new(1.0, -2.0, 0.5);
    for layout in [VelocityLayout::Centered, VelocityLayout::Staggered] {
        let field = VelocityField::uniform(&device, shape, layout, v).unwrap();
        for q in [Vec3::new(0.1, 3.9, 2.0), Vec3::new(-1.0, 5.0, 2.2)] {
            assert!((field.sample(q, BoundaryPolicy::Clamp) - v).length() < 1e-6);
        }
    }
}

#[test]
fn staggered_velocity_reads_faces() {
    let device = CpuDevice::new();
    let shape = GridShape::new(2, 1, 1, 1.0).unwrap();
    // u on 3 x-faces, v on 4 y-faces, w on 4 z-faces.
    let mut host = vec![0.0; 3 + 4 + 4];
    host[..3].copy_from_slice(&[0.0, 1.0, 2.0]);
    let field =
        VelocityField::from_host(&device, shape, VelocityLayout::Staggered, &host).unwrap();
    // Cell 0 center lies between faces 0 and 1.
    let u = field.sample(Vec3::new(0.5, 0.5, 0.5), BoundaryPolicy::Clamp).x;
    assert!((u - 0.5).abs() < 1e-6);
    assert_eq!(field.to_host(), host);
}

#[test]
fn velocity_rejects_non_finite() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(2, 1.0).unwrap();
    let mut host = vec![0.0; 24];
    host[5] = f32::NAN;
    assert!(VelocityField::from_host(&device, shape, VelocityLayout::Centered, &host).is_err());
}

// ─── Gradient Tests ──────────────────────────────────────────

#[test]
fn gradient_shape_matches_field() {
    let device = CpuDevice::new();
    let shape = GridShape::new(2, 3, 4, 1.0).unwrap();
    let kind = FieldKind::Velocity(VelocityLayout::Staggered);
    let grad = GradientBuffer::zeros(&device, shape, kind).unwrap();
    assert_eq!(grad.len(), kind.element_count(&shape));
    assert_eq!(grad.part_count(), 3);
}

#[test]
fn gradient_accumulates() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(2, 1.0).unwrap();
    let acc = GradientAccumulator::new(&device, shape, FieldKind::Density).unwrap();
    acc.part(0).add(1, 2.0);
    let other = acc.finish();
    let mut total = GradientBuffer::zeros(&device, shape, FieldKind::Density).unwrap();
    total.accumulate(&device, &other).unwrap();
    total.accumulate(&device, &other).unwrap();
    assert_eq!(total.to_host()[1], 4.0);
}

#[test]
fn gradient_kind_mismatch_rejected() {
    let device = CpuDevice::new();
    let shape = GridShape::cubic(2, 1.0).unwrap();
    let mut d = GradientBuffer::zeros(&device, shape, FieldKind::Density).unwrap();
    let v = GradientBuffer::zeros(&device, shape, FieldKind::Velocity(VelocityLayout::Centered))
        .unwrap();
    assert!(d.accumulate(&device, &v).is_err());
}

#[test]
fn gradients_release_device_memory() {
    let device = CpuDevice::with_budget(4096);
    let shape = GridShape::cubic(4, 1.0).unwrap();
    {
        let _g = GradientBuffer::zeros(&device, shape, FieldKind::Density).unwrap();
        assert_eq!(device.memory().in_use, 64 * 4);
    }
    assert_eq!(device.memory().in_use, 0);
}
