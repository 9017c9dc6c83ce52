//! Inference engine config artifact.
//!
//! The detection engine reads its model settings from a plain key=value text
//! file. The daemon generates a standard one on first run if the file is
//! absent and otherwise leaves it untouched; operators tune it by hand.

use anyhow::{anyhow, Result};
use std::path::Path;

const DEFAULT_MODEL_CONFIG: &str = "\
[property]
gpu-id=0
net-scale-factor=0.0039215697906911373
model-color-format=0
onnx-file=yolov8s.onnx
model-engine-file=yolov8s.onnx_b1_gpu0_fp32.engine
labelfile-path=labels.txt
batch-size=1
network-mode=2
num-detected-classes=80
interval=0
gie-unique-id=1
process-mode=1
network-type=0
cluster-mode=2
maintain-aspect-ratio=1
symmetric-padding=1
parse-bbox-func-name=NvDsInferParseYolo
custom-lib-path=./libnvdsinfer_custom_impl_Yolo.so
engine-create-func-name=NvDsInferYoloCudaEngineGet

[class-attrs-all]
nms-iou-threshold=0.45
pre-cluster-threshold=0.25
topk=300
";

/// Ensure the model config file exists. Returns true when a fresh one was
/// generated, false when an existing file was left alone.
pub fn ensure_model_config(path: &Path) -> Result<bool> {
    if path.exists() {
        log::debug!("model config {} already exists", path.display());
        return Ok(false);
    }
    std::fs::write(path, DEFAULT_MODEL_CONFIG)
        .map_err(|e| anyhow!("failed to write model config {}: {}", path.display(), e))?;
    log::info!("generated model config {}", path.display());
    Ok(true)
}
