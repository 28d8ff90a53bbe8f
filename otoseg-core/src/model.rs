use std::{fmt, path::Path};

use anyhow::{Context, Result};
use log::{debug, warn};
use ndarray::Array3;
use tract_onnx::prelude::{
    Framework, Graph, InferenceModelExt, IntoTensor, SimplePlan, Tensor, TypedFact, TypedOp, tvec,
};

use crate::postprocess::{MaskPrototypes, RawCandidate, RawPrediction};

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// The external segmentation detector, consumed as a black box.
///
/// Implementations must be safe for concurrent invocation; the pipeline holds
/// one long-lived handle and never mutates it after construction. The input is
/// the letterboxed `[1, 3, H, W]` tensor produced by preprocessing.
pub trait SegmentationBackend: Send + Sync + fmt::Debug {
    /// Run one forward pass and return the typed raw output.
    fn predict(&self, input: &Tensor) -> Result<RawPrediction>;
}

/// YOLO-seg ONNX model executed with `tract-onnx`.
///
/// The graph is expected to produce a candidate matrix `[1, n, 5 + nc + nm]`
/// and, for segmentation exports, a prototype tensor `[1, nm, ph, pw]`.
pub struct OnnxSegmentationModel {
    runnable: RunnableModel,
}

impl fmt::Debug for OnnxSegmentationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxSegmentationModel").finish()
    }
}

impl OnnxSegmentationModel {
    /// Load and optimize the ONNX graph.
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();
        anyhow::ensure!(path.exists(), "model file not found: {}", path.display());

        let runnable = match load_runnable_model(path, true) {
            Ok(model) => {
                debug!("segmentation model {} optimized successfully", path.display());
                model
            }
            Err(opt_err) => {
                warn!(
                    "segmentation model {} failed optimized load ({opt_err:#}); \
                     falling back to decluttered graph",
                    path.display()
                );
                load_runnable_model(path, false).with_context(|| {
                    format!(
                        "fallback to decluttered graph failed after optimize error: {opt_err:#}"
                    )
                })?
            }
        };

        Ok(Self { runnable })
    }
}

impl SegmentationBackend for OnnxSegmentationModel {
    fn predict(&self, input: &Tensor) -> Result<RawPrediction> {
        let outputs = self
            .runnable
            .run(tvec![input.clone().into()])
            .map_err(|e| anyhow::anyhow!("segmentation model execution failed: {e}"))?;

        let tensors: Vec<Tensor> = outputs
            .into_iter()
            .map(|value| value.into_tensor())
            .collect();

        let mut candidates: Option<&Tensor> = None;
        let mut prototypes: Option<&Tensor> = None;
        for tensor in &tensors {
            match tensor.shape().len() {
                2 | 3 => candidates = candidates.or(Some(tensor)),
                4 => prototypes = prototypes.or(Some(tensor)),
                _ => {}
            }
        }
        let candidates =
            candidates.ok_or_else(|| anyhow::anyhow!("model produced no candidate tensor"))?;

        decode_raw_outputs(candidates, prototypes)
    }
}

fn load_runnable_model(path: &Path, optimized: bool) -> Result<RunnableModel> {
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to parse ONNX graph from {}", path.display()))?;

    if optimized {
        model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("unable to optimize segmentation graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make segmentation graph runnable: {e}"))
    } else {
        model
            .into_typed()
            .map_err(|e| anyhow::anyhow!("unable to type-check segmentation graph: {e}"))?
            .into_decluttered()
            .map_err(|e| anyhow::anyhow!("unable to declutter segmentation graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make segmentation graph runnable: {e}"))
    }
}

/// Split the model's raw tensors into typed candidates and prototypes.
///
/// The candidate matrix may be `[n, cols]` or `[1, n, cols]` with
/// `cols = 5 + nc + nm`; `nm` is taken from the prototype tensor (zero when
/// the export carries none).
pub(crate) fn decode_raw_outputs(
    candidates: &Tensor,
    prototypes: Option<&Tensor>,
) -> Result<RawPrediction> {
    let shape = candidates.shape();
    let (rows, cols) = match shape {
        [rows, cols] => (*rows, *cols),
        [1, rows, cols] => (*rows, *cols),
        other => anyhow::bail!(
            "candidate tensor must have shape [n, cols] or [1, n, cols] (got {other:?})"
        ),
    };
    anyhow::ensure!(
        cols >= 5,
        "candidate tensor needs at least 5 columns, got {cols}"
    );

    let proto = match prototypes {
        Some(tensor) => {
            let pshape = tensor.shape();
            anyhow::ensure!(
                pshape.len() == 4 && pshape[0] == 1,
                "prototype tensor must have shape [1, nm, h, w] (got {pshape:?})"
            );
            let (nm, ph, pw) = (pshape[1], pshape[2], pshape[3]);
            let slice = tensor
                .as_slice::<f32>()
                .map_err(|e| anyhow::anyhow!("prototype tensor is not f32: {e}"))?;
            let data = Array3::from_shape_vec((nm, ph, pw), slice.to_vec())
                .map_err(|e| anyhow::anyhow!("prototype tensor is not contiguous: {e}"))?;
            Some(MaskPrototypes::new(data))
        }
        None => None,
    };

    let nm = proto.as_ref().map_or(0, |p| p.count());
    anyhow::ensure!(
        cols >= 5 + nm,
        "candidate tensor has {cols} columns, too few for {nm} mask coefficients"
    );
    let nc = cols - 5 - nm;

    let slice = candidates
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("candidate tensor is not f32: {e}"))?;

    let mut parsed = Vec::with_capacity(rows);
    for row in 0..rows {
        let data = &slice[row * cols..(row + 1) * cols];
        parsed.push(RawCandidate {
            bbox_cxcywh: [data[0], data[1], data[2], data[3]],
            objectness: data[4],
            class_scores: data[5..5 + nc].to_vec(),
            mask_coeffs: data[5 + nc..].to_vec(),
        });
    }

    Ok(RawPrediction {
        candidates: parsed,
        prototypes: proto,
    })
}
