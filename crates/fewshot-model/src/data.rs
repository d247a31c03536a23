//! Splitting a labelled volume into a support set and a query set.

use burn::prelude::*;

use crate::error::{FewShotError, FewShotResult};

/// Inputs of one few-shot prediction, derived from a labelled volume.
#[derive(Debug, Clone)]
pub struct SupportQuerySplit<B: Backend> {
    /// Support slices stacked with their binary mask: `[support, channels + 1, height, width]`.
    pub support: Tensor<B, 4>,
    /// Query slices: `[query, channels, height, width]`.
    pub query: Tensor<B, 4>,
    /// Binary ground truth of the query slices: `[query, height, width]`.
    pub query_labels: Tensor<B, 3, Int>,
}

/// Partitions a volume and its label map into support and query inputs for one class.
pub trait VolumeSplitter<B: Backend> {
    /// # Errors
    ///
    /// Returns `InvalidTensorShape` if the volume and labels cannot be split.
    fn split(
        &self,
        volume: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
        query_label: i64,
    ) -> FewShotResult<SupportQuerySplit<B>>;
}

/// Uses the first half of the slices as support and the second half as query.
///
/// With an odd slice count the query half gets the extra slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalfSplit;

impl<B: Backend> VolumeSplitter<B> for HalfSplit {
    fn split(
        &self,
        volume: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
        query_label: i64,
    ) -> FewShotResult<SupportQuerySplit<B>> {
        let [slices, _, height, width] = volume.dims();
        let label_dims = labels.dims();
        if label_dims != [slices, height, width] {
            return Err(FewShotError::shape(
                "volume split",
                format!("labels [{slices}, {height}, {width}]"),
                label_dims,
            ));
        }

        let support_len = slices / 2;
        if support_len == 0 {
            return Err(FewShotError::shape(
                "volume split",
                "at least 2 slices",
                volume.dims(),
            ));
        }

        let support_images = volume.clone().slice([0..support_len]);
        let query = volume.slice([support_len..slices]);

        let support_mask = labels
            .clone()
            .slice([0..support_len])
            .equal_elem(query_label)
            .float()
            .unsqueeze_dim::<4>(1);
        let support = Tensor::cat(vec![support_images, support_mask], 1);

        let query_labels = labels
            .slice([support_len..slices])
            .equal_elem(query_label)
            .int();

        Ok(SupportQuerySplit {
            support,
            query,
            query_labels,
        })
    }
}
