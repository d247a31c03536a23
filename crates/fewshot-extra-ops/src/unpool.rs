//! # Max Unpooling
//!
//! Partial inverse of 2-D max-pooling. Every pooled value is written back to the spatial
//! position it was selected from; all other positions are zero.
//!
//! Backends do not agree on how `max_pool2d_with_indices` encodes a position as a flat index,
//! so the indices are never decoded here. Instead each window offset is laid out with a
//! transposed convolution and compared against the codes the backend itself reports for
//! every position of the output map. Only differentiable operations touch the values.

use burn::{
    prelude::*,
    tensor::{
        module::{conv_transpose2d, max_pool2d_with_indices},
        ops::ConvTransposeOptions,
    },
};

/// Writes `x` into a zero map of `output_size` at the positions recorded in `indices`.
///
/// `indices`, `kernel_size` and `stride` must come from the `max_pool2d_with_indices` call
/// (without padding or dilation) that pooled a map of `output_size`. When overlapping
/// windows select the same position the contributions are summed.
///
/// # Shapes
/// - x: `[batch_size, channels, height, width]`
/// - indices: `[batch_size, channels, height, width]`
/// - output: `[batch_size, channels, output_size[0], output_size[1]]`
///
/// # Panics
/// If `indices` and `x` do not have the same shape, or if the pooling windows do not tile
/// `output_size` exactly.
pub fn max_unpool2d<B: Backend>(
    x: Tensor<B, 4>,
    indices: Tensor<B, 4, Int>,
    kernel_size: [usize; 2],
    stride: [usize; 2],
    output_size: [usize; 2],
) -> Tensor<B, 4> {
    let [batch_size, channels, height, width] = x.dims();
    assert_eq!(
        indices.dims(),
        [batch_size, channels, height, width],
        "max_unpool2d: indices must match the pooled tensor shape"
    );
    let [kernel_h, kernel_w] = kernel_size;
    let [out_h, out_w] = output_size;
    assert!(
        height > 0
            && width > 0
            && (height - 1) * stride[0] + kernel_h == out_h
            && (width - 1) * stride[1] + kernel_w == out_w,
        "max_unpool2d: output_size {output_size:?} is not tiled by {height}x{width} windows of \
         {kernel_size:?} with stride {stride:?}"
    );

    let device = x.device();
    let maps = batch_size * channels;
    let values = x.reshape([maps, 1, height, width]);
    // Shifted by one so that positions no window reaches (left at zero) never match.
    let indices = indices
        .float()
        .add_scalar(1.0)
        .reshape([maps, 1, height, width]);
    let positions = position_codes::<B>(output_size, &device)
        .add_scalar(1.0)
        .repeat_dim(0, maps);
    let options = ConvTransposeOptions::new(stride, [0, 0], [0, 0], [1, 1], 1);

    let mut output = Tensor::<B, 4>::zeros([maps, 1, out_h, out_w], &device);
    for offset in 0..kernel_h * kernel_w {
        let kernel = one_hot_kernel::<B>(kernel_size, offset, &device);
        let placed_values = conv_transpose2d(values.clone(), kernel.clone(), None, options.clone());
        let placed_indices = conv_transpose2d(indices.clone(), kernel, None, options.clone());

        let selected = placed_indices.equal(positions.clone()).float();
        output = output + placed_values * selected;
    }

    output.reshape([batch_size, channels, out_h, out_w])
}

/// The index `max_pool2d_with_indices` reports for each position of a `size` map.
///
/// Codes may repeat across the map on some backends, but never inside one pooling window
/// as long as the map is at least as large as the window.
fn position_codes<B: Backend>(size: [usize; 2], device: &B::Device) -> Tensor<B, 4> {
    let [height, width] = size;
    let (_, codes) = max_pool2d_with_indices(
        Tensor::<B, 4>::zeros([1, 1, height, width], device),
        [1, 1],
        [1, 1],
        [0, 0],
        [1, 1],
    );
    codes.float()
}

/// `[1, 1, kernel_h, kernel_w]` kernel with a single one at the flat `offset`.
fn one_hot_kernel<B: Backend>(
    kernel_size: [usize; 2],
    offset: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    let [kernel_h, kernel_w] = kernel_size;
    let weights: Vec<f32> = (0..kernel_h * kernel_w)
        .map(|i| if i == offset { 1.0 } else { 0.0 })
        .collect();
    Tensor::from_data(TensorData::new(weights, [1, 1, kernel_h, kernel_w]), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
        tensor::Distribution,
    };

    type TestBackend = NdArray;
    type TestDevice = NdArrayDevice;

    fn arange_map(height: usize, width: usize) -> Tensor<TestBackend, 4> {
        let device = TestDevice::default();
        Tensor::<TestBackend, 1, Int>::arange(1..(height * width) as i64 + 1, &device)
            .float()
            .reshape([1, 1, height, width])
    }

    fn pool_and_unpool(x: Tensor<TestBackend, 4>, pool: usize, stride: usize) -> TensorData {
        let [_, _, height, width] = x.dims();
        let (pooled, indices) =
            max_pool2d_with_indices(x, [pool, pool], [stride, stride], [0, 0], [1, 1]);
        max_unpool2d(pooled, indices, [pool, pool], [stride, stride], [height, width]).into_data()
    }

    #[test]
    fn test_unpool_restores_maxima_positions() {
        let expected = TensorData::from([[[
            [0.0f32, 0.0, 0.0, 0.0],
            [0.0, 6.0, 0.0, 8.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 14.0, 0.0, 16.0],
        ]]]);
        pool_and_unpool(arange_map(4, 4), 2, 2).assert_eq(&expected, false);
    }

    #[test]
    fn test_unpool_wide_map() {
        let expected = TensorData::from([[[[0.0f32, 0.0, 0.0, 0.0], [0.0, 6.0, 0.0, 8.0]]]]);
        pool_and_unpool(arange_map(2, 4), 2, 2).assert_eq(&expected, false);
    }

    #[test]
    fn test_unpool_tall_map() {
        let expected =
            TensorData::from([[[[0.0f32, 0.0], [0.0, 4.0], [0.0, 0.0], [0.0, 8.0]]]]);
        pool_and_unpool(arange_map(4, 2), 2, 2).assert_eq(&expected, false);
    }

    #[test]
    fn test_unpool_overlapping_windows() {
        let expected = TensorData::from([[[
            [0.0f32, 0.0, 0.0],
            [0.0, 5.0, 6.0],
            [0.0, 8.0, 9.0],
        ]]]);
        pool_and_unpool(arange_map(3, 3), 2, 1).assert_eq(&expected, false);
    }

    #[test]
    fn test_unpool_sums_repeated_selections() {
        let device = TestDevice::default();
        let x = Tensor::<TestBackend, 4>::from_data(
            TensorData::from([[[[0.0f32, 0.0, 0.0], [0.0, 9.0, 0.0], [0.0, 0.0, 0.0]]]]),
            &device,
        );
        let expected = TensorData::from([[[
            [0.0f32, 0.0, 0.0],
            [0.0, 36.0, 0.0],
            [0.0, 0.0, 0.0],
        ]]]);
        pool_and_unpool(x, 2, 1).assert_eq(&expected, false);
    }

    #[test]
    fn test_unpool_preserves_pooled_mass() {
        let device = TestDevice::default();
        let x = Tensor::<TestBackend, 4>::random([2, 3, 8, 6], Distribution::Default, &device);

        let (pooled, indices) = max_pool2d_with_indices(x, [2, 2], [2, 2], [0, 0], [1, 1]);
        let pooled_sum = pooled.clone().sum().into_scalar();
        let output = max_unpool2d(pooled, indices, [2, 2], [2, 2], [8, 6]);

        assert_eq!(output.dims(), [2, 3, 8, 6]);
        let diff = (output.sum().into_scalar() - pooled_sum).abs();
        assert!(diff < 1e-4, "unpooling must not create or lose values");
    }

    #[test]
    fn test_unpool_backward_routes_gradient_to_values() {
        type AdBackend = Autodiff<NdArray>;
        let device = TestDevice::default();
        let x = Tensor::<AdBackend, 1, Int>::arange(0..24, &device)
            .float()
            .reshape([1, 1, 6, 4]);
        let (_, indices) = max_pool2d_with_indices(x, [2, 2], [2, 2], [0, 0], [1, 1]);

        let pooled = Tensor::<AdBackend, 4>::ones([1, 1, 3, 2], &device).require_grad();
        let output = max_unpool2d(pooled.clone(), indices, [2, 2], [2, 2], [6, 4]);
        assert_eq!(output.clone().sum().into_scalar(), 6.0);

        let grads = output.sum().backward();
        let grad = pooled.grad(&grads).expect("pooled values receive a gradient");
        grad.into_data()
            .assert_eq(&TensorData::from([[[[1.0f32, 1.0], [1.0, 1.0], [1.0, 1.0]]]]), false);
    }

    #[test]
    #[should_panic(expected = "indices must match")]
    fn test_unpool_rejects_mismatched_indices() {
        let device = TestDevice::default();
        let pooled = Tensor::<TestBackend, 4>::ones([1, 2, 2, 2], &device);
        let indices = Tensor::<TestBackend, 4, Int>::zeros([1, 1, 2, 2], &device);
        let _ = max_unpool2d(pooled, indices, [2, 2], [2, 2], [4, 4]);
    }

    #[test]
    #[should_panic(expected = "is not tiled")]
    fn test_unpool_rejects_untiled_output_size() {
        let device = TestDevice::default();
        let pooled = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let indices = Tensor::<TestBackend, 4, Int>::zeros([1, 1, 2, 2], &device);
        let _ = max_unpool2d(pooled, indices, [2, 2], [2, 2], [5, 4]);
    }
}
