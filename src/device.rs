//! Backend selection for the binaries.
//!
//! The CPU backend is the default; the GPU device is created once and
//! shared, since a second WGPU client on the same device fails.

use burn::backend::{NdArray, Wgpu, ndarray::NdArrayDevice, wgpu::WgpuDevice};
use std::sync::OnceLock;

static GPU_DEVICE: OnceLock<WgpuDevice> = OnceLock::new();

/// CPU backend used by tests and the default CLI path.
pub type CpuBackend = NdArray<f32>;

/// GPU backend.
pub type GpuBackend = Wgpu<f32, i32>;

pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// Shared WGPU device, initialized on first use.
pub fn gpu_device() -> WgpuDevice {
    GPU_DEVICE
        .get_or_init(|| {
            let device = WgpuDevice::default();
            log::info!("initialized WGPU device {device:?}");
            device
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;

    #[test]
    fn cpu_device_runs_tensor_ops() {
        let device = cpu_device();
        let x = Tensor::<CpuBackend, 1>::from_data([1.0, 2.0, 3.0], &device);
        let total: f32 = (x.clone() + x).sum().into_scalar();
        assert_eq!(total, 12.0);
    }
}
