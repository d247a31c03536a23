//! Device residency and host-to-device transfer helpers.

use burn::{
    prelude::*,
    tensor::{BasicOps, Float},
};

use crate::error::{FewShotError, FewShotResult};

/// Classifies a backend device as host or accelerator.
pub trait DeviceKind {
    /// Whether tensors on this device live in accelerator memory.
    fn is_accelerator(&self) -> bool;
}

#[cfg(feature = "ndarray")]
impl DeviceKind for burn::backend::ndarray::NdArrayDevice {
    fn is_accelerator(&self) -> bool {
        false
    }
}

#[cfg(feature = "wgpu")]
impl DeviceKind for burn::backend::wgpu::WgpuDevice {
    fn is_accelerator(&self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

#[cfg(feature = "cuda")]
impl DeviceKind for burn::backend::cuda::CudaDevice {
    fn is_accelerator(&self) -> bool {
        true
    }
}

/// A tensor, or a host array, that can be placed on a device as a `D`-dimensional tensor.
pub trait DeviceTransfer<B: Backend, const D: usize, K: BasicOps<B> = Float> {
    /// Moves `self` to `device`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTensorShape` if a host array does not have rank `D`.
    fn transfer(self, device: &Device<B>) -> FewShotResult<Tensor<B, D, K>>;
}

impl<B: Backend, const D: usize, K: BasicOps<B>> DeviceTransfer<B, D, K> for Tensor<B, D, K> {
    fn transfer(self, device: &Device<B>) -> FewShotResult<Tensor<B, D, K>> {
        if self.device() == *device {
            return Ok(self);
        }
        Ok(self.to_device(device))
    }
}

impl<B: Backend, const D: usize> DeviceTransfer<B, D, Float> for TensorData {
    fn transfer(self, device: &Device<B>) -> FewShotResult<Tensor<B, D>> {
        if self.shape.len() != D {
            return Err(FewShotError::shape(
                "device transfer",
                format!("rank {D}"),
                &self.shape,
            ));
        }
        Ok(Tensor::from_data(self.convert::<f32>(), device))
    }
}

/// Places a tensor or a host array on `device`. Tensors already resident there are returned
/// untouched; host arrays are converted to float.
///
/// # Errors
///
/// Returns `InvalidTensorShape` if a host array does not have rank `D`.
pub fn to_device<B, const D: usize, K, T>(
    input: T,
    device: &Device<B>,
) -> FewShotResult<Tensor<B, D, K>>
where
    B: Backend,
    K: BasicOps<B>,
    T: DeviceTransfer<B, D, K>,
{
    input.transfer(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;
    use burn::backend::ndarray::NdArrayDevice;

    #[test]
    fn test_ndarray_is_not_accelerator() {
        assert!(!NdArrayDevice::default().is_accelerator());
    }

    #[test]
    fn test_resident_tensor_is_unchanged() {
        let device = NdArrayDevice::default();
        let tensor = Tensor::<TestBackend, 2>::ones([2, 3], &device);

        let moved: Tensor<TestBackend, 2> = to_device(tensor.clone(), &device).unwrap();
        assert_eq!(moved.device(), device);
        moved.into_data().assert_eq(&tensor.into_data(), true);
    }

    #[test]
    fn test_int_tensor_transfer() {
        let device = NdArrayDevice::default();
        let labels = Tensor::<TestBackend, 3, Int>::zeros([1, 4, 4], &device);

        let moved: Tensor<TestBackend, 3, Int> = to_device(labels, &device).unwrap();
        assert_eq!(moved.dims(), [1, 4, 4]);
    }

    #[test]
    fn test_host_array_becomes_float_tensor() {
        let device = NdArrayDevice::default();
        let data = TensorData::new(vec![0i64, 1, 2, 3], [1, 1, 2, 2]);

        let tensor: Tensor<TestBackend, 4> = to_device(data, &device).unwrap();
        assert_eq!(tensor.dims(), [1, 1, 2, 2]);
        assert_eq!(tensor.sum().into_scalar(), 6.0);
    }

    #[test]
    fn test_host_array_rank_mismatch() {
        let device = NdArrayDevice::default();
        let data = TensorData::new(vec![0.0f32; 4], [2, 2]);

        let result: FewShotResult<Tensor<TestBackend, 4>> = to_device(data, &device);
        assert!(matches!(
            result,
            Err(FewShotError::InvalidTensorShape {
                operation: "device transfer",
                ..
            })
        ));
    }
}
