//! Host-side binary segmentation produced by `predict`.

use burn::{prelude::*, tensor::Bool};

use crate::error::{FewShotError, FewShotResult};

/// A boolean foreground mask read back from the device, with singleton dimensions removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    shape: Vec<usize>,
    values: Vec<bool>,
}

impl SegmentationMask {
    /// Reads `mask` back to the host and drops every dimension of size 1.
    ///
    /// # Errors
    ///
    /// Returns `TensorOperationFailed` if the tensor data cannot be read as booleans.
    pub fn from_tensor<B: Backend, const D: usize>(
        mask: Tensor<B, D, Bool>,
    ) -> FewShotResult<Self> {
        let shape = mask.dims().into_iter().filter(|dim| *dim != 1).collect();
        let values = mask
            .into_data()
            .to_vec::<bool>()
            .map_err(|e| FewShotError::TensorOperationFailed {
                operation: format!("reading segmentation mask: {e:?}"),
            })?;

        Ok(Self { shape, values })
    }

    /// Shape after removing singleton dimensions; empty for a single pixel.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major mask values.
    pub fn values(&self) -> &[bool] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of foreground pixels.
    pub fn foreground_count(&self) -> usize {
        self.values.iter().filter(|v| **v).count()
    }

    /// Share of foreground pixels, 0 for an empty mask.
    pub fn foreground_fraction(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.foreground_count() as f64 / self.values.len() as f64
    }
}
