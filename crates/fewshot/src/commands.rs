//! Implementations of the `fewshot` subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use burn::{prelude::*, tensor::Distribution};
use fewshot_model::{BranchPlan, DeviceKind, FewShotSegmentor, FewShotSegmentorConfig};
use serde::Serialize;

/// Loads a model configuration from a JSON file, or the default configuration.
pub fn load_config(path: Option<&Path>) -> Result<FewShotSegmentorConfig> {
    let Some(path) = path else {
        return Ok(FewShotSegmentorConfig::new());
    };
    let config = FewShotSegmentorConfig::load(path)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Builds a freshly initialized model and snapshots it to `output`.
pub fn run_init<B: Backend>(
    config: &FewShotSegmentorConfig,
    output: &Path,
    device: &Device<B>,
) -> Result<()> {
    let model = config.init::<B>(device)?;
    tracing::info!(parameters = model.num_params(), "model initialized");

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create output directory: {}", parent.display())
        })?;
    }
    model.save(output)?;
    Ok(())
}

/// One encoder, bottleneck or decoder block of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub in_channels: usize,
    pub out_channels: usize,
    pub skip_channels: Option<usize>,
}

/// Architecture and placement of a loaded model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub parameters: usize,
    pub on_accelerator: bool,
    pub weight_len: usize,
    pub conditioner: Vec<StageSummary>,
    pub segmentor: Vec<StageSummary>,
}

fn stage_summaries(plan: &BranchPlan) -> Vec<StageSummary> {
    let encoders = plan.encoders.iter().enumerate().map(|(i, stage)| StageSummary {
        name: format!("encode{}", i + 1),
        in_channels: stage.block.in_channels,
        out_channels: stage.block.out_channels,
        skip_channels: None,
    });
    let bottleneck = std::iter::once(StageSummary {
        name: "bottleneck".to_owned(),
        in_channels: plan.bottleneck.in_channels,
        out_channels: plan.bottleneck.out_channels,
        skip_channels: None,
    });
    // Listed in execution order: stage 4 first.
    let decoders = plan.decoders.iter().enumerate().rev().map(|(i, stage)| StageSummary {
        name: format!("decode{}", i + 1),
        in_channels: stage.block.in_channels,
        out_channels: stage.block.out_channels,
        skip_channels: stage.skip_channels,
    });

    encoders.chain(bottleneck).chain(decoders).collect()
}

/// Summarizes a model.
pub fn describe<B: Backend>(model: &FewShotSegmentor<B>) -> ModelSummary
where
    Device<B>: DeviceKind,
{
    let config = model.config();
    ModelSummary {
        parameters: model.num_params(),
        on_accelerator: model.is_on_accelerator(),
        weight_len: config.weight_len(),
        conditioner: stage_summaries(&config.conditioner_plan()),
        segmentor: stage_summaries(&config.segmentor_plan()),
    }
}

/// Loads the snapshot at `path` and prints its summary.
pub fn run_describe<B: Backend>(path: &Path, device: &Device<B>, json: bool) -> Result<()>
where
    Device<B>: DeviceKind,
{
    let model = FewShotSegmentor::<B>::load(path, device)
        .with_context(|| format!("Failed to load model: {}", path.display()))?;
    let summary = describe(&model);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Parameters:     {}", summary.parameters);
    println!("On accelerator: {}", summary.on_accelerator);
    println!("Kernel length:  {}", summary.weight_len);
    for (branch, stages) in [
        ("Conditioner", &summary.conditioner),
        ("Segmentor", &summary.segmentor),
    ] {
        println!("{branch}:");
        for stage in stages {
            match stage.skip_channels {
                Some(skip) => println!(
                    "  {:<10} {:>4} -> {:<4} (skip {skip})",
                    stage.name, stage.in_channels, stage.out_channels
                ),
                None => println!(
                    "  {:<10} {:>4} -> {:<4}",
                    stage.name, stage.in_channels, stage.out_channels
                ),
            }
        }
    }
    Ok(())
}

/// A volume of `slices` noisy `size`x`size` slices, each with a bright centred square
/// labelled `query_label`.
pub fn synthetic_volume<B: Backend>(
    slices: usize,
    size: usize,
    query_label: i64,
    device: &Device<B>,
) -> (Tensor<B, 4>, Tensor<B, 3, Int>) {
    let (low, high) = (size / 4, size - size / 4);
    let labels: Vec<i64> = (0..slices * size * size)
        .map(|i| {
            let (row, col) = ((i / size) % size, i % size);
            if (low..high).contains(&row) && (low..high).contains(&col) {
                query_label
            } else {
                0
            }
        })
        .collect();
    let labels =
        Tensor::<B, 3, Int>::from_data(TensorData::new(labels, [slices, size, size]), device);

    let square = labels
        .clone()
        .equal_elem(query_label)
        .float()
        .unsqueeze_dim::<4>(1);
    let noise = Tensor::<B, 4>::random([slices, 1, size, size], Distribution::Default, device);
    let volume = noise * 0.2 + square * 0.8;

    (volume, labels)
}

/// Result of a smoke-test prediction.
#[derive(Debug, Clone, Serialize)]
pub struct SmokeReport {
    pub shape: Vec<usize>,
    pub foreground_fraction: f64,
    pub dropout: bool,
}

/// Runs `predict` on a synthetic volume.
pub fn smoke<B: Backend>(
    model: &FewShotSegmentor<B>,
    slices: usize,
    size: usize,
    query_label: i64,
    dropout: bool,
    device: &Device<B>,
) -> Result<SmokeReport> {
    let (volume, labels) = synthetic_volume::<B>(slices, size, query_label, device);
    let mask = model.predict(volume, labels, query_label, device, dropout)?;

    Ok(SmokeReport {
        shape: mask.shape().to_vec(),
        foreground_fraction: mask.foreground_fraction(),
        dropout,
    })
}

/// Loads the snapshot at `path` and prints a smoke-test report.
pub fn run_smoke<B: Backend>(
    path: &Path,
    slices: usize,
    size: usize,
    query_label: i64,
    dropout: bool,
    device: &Device<B>,
) -> Result<()> {
    let model = FewShotSegmentor::<B>::load(path, device)
        .with_context(|| format!("Failed to load model: {}", path.display()))?;
    tracing::info!(slices, size, query_label, dropout, "running smoke prediction");

    let report = smoke(&model, slices, size, query_label, dropout, device)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArray;
    use fewshot_model::ModelParams;

    use super::*;

    type TestBackend = NdArray<f32>;

    fn small_config() -> FewShotSegmentorConfig {
        FewShotSegmentorConfig::new()
            .with_params(
                ModelParams::new()
                    .with_num_filters(4)
                    .with_kernel_h(3)
                    .with_kernel_w(3),
            )
            .with_conditioner_filters(2)
    }

    #[test]
    fn test_default_config_when_no_file_given() {
        let config = load_config(None).unwrap();
        assert_eq!(config, FewShotSegmentorConfig::new());
    }

    #[test]
    fn test_config_file_round_trip() {
        let path = std::env::temp_dir().join(format!("fewshot-cli-{}.json", std::process::id()));
        small_config().save(&path).unwrap();

        assert_eq!(load_config(Some(&path)).unwrap(), small_config());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/fewshot.json"))).is_err());
    }

    #[test]
    fn test_synthetic_volume_has_centred_square() {
        let device = Default::default();
        let (volume, labels) = synthetic_volume::<TestBackend>(2, 8, 3, &device);

        assert_eq!(volume.dims(), [2, 1, 8, 8]);
        let labelled = labels.equal_elem(3).int().sum().into_scalar();
        assert_eq!(labelled, 2 * 4 * 4);
    }

    #[test]
    fn test_summary_lists_stages_in_execution_order() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();
        let summary = describe(&model);

        assert!(!summary.on_accelerator);
        assert_eq!(summary.weight_len, 4);
        let names: Vec<_> = summary.segmentor.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "encode1",
                "encode2",
                "encode3",
                "encode4",
                "bottleneck",
                "decode4",
                "decode3",
                "decode2",
                "decode1"
            ]
        );
        assert_eq!(summary.segmentor[5].skip_channels, Some(4));
        assert_eq!(summary.conditioner[0].in_channels, 2);
    }

    #[test]
    fn test_init_then_smoke() {
        let device = Default::default();
        let path =
            std::env::temp_dir().join(format!("fewshot-cli-{}-smoke.model", std::process::id()));
        run_init::<TestBackend>(&small_config(), &path, &device).unwrap();

        let model = FewShotSegmentor::<TestBackend>::load(&path, &device).unwrap();
        let report = smoke(&model, 4, 16, 1, false, &device).unwrap();
        assert_eq!(report.shape, vec![2, 16, 16]);
        assert!((0.0..=1.0).contains(&report.foreground_fraction));
    }
}
