//! # plume-render
//!
//! Differentiable ray-marching volume renderer.
//!
//! A [`Camera`] shoots one ray per pixel through a density grid. The
//! [`RayMarcher`] integrates emission and absorption along each ray and
//! produces a [`RenderedImage`] (RGB radiance plus transmittance). Its
//! adjoint, [`RayMarcher::render_backward`], maps an [`ImageGradient`]
//! back onto the density grid.
//!
//! Emission comes from a uniform light color or from a per-voxel
//! [`LightGrid`]. The renderer only reads density; velocity never enters
//! the image.

pub mod camera;
pub mod config;
pub mod image;
pub mod light;
pub mod raymarch;

pub use camera::{Camera, Projection, Ray};
pub use config::{BlendMode, RenderConfig, Tonemap};
pub use image::{ImageGradient, RenderedImage};
pub use light::LightGrid;
pub use raymarch::RayMarcher;
