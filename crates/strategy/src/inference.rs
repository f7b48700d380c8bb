use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};
use tract_onnx::prelude::*;

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

#[derive(Error, Debug)]
#[error("inference failed: {0}")]
pub struct InferenceError(String);

impl From<TractError> for InferenceError {
    fn from(err: TractError) -> Self {
        Self(err.to_string())
    }
}

/// ONNX classifier scoring order-flow features.
///
/// Without a model file the engine runs in simulation mode and `predict`
/// returns `None`, leaving callers to their own heuristic.
#[derive(Clone)]
pub struct InferenceEngine {
    model: Option<Arc<RunnableModel>>,
}

impl InferenceEngine {
    pub fn new(model_path: &str) -> Self {
        let path = Path::new(model_path);
        let model = if path.exists() {
            info!("Loading ONNX model from {:?}", path);
            match Self::load_model(model_path) {
                Ok(plan) => Some(Arc::new(plan)),
                Err(e) => {
                    error!("Failed to load model: {}", e);
                    None
                }
            }
        } else {
            warn!(
                "ONNX model not found at {:?}. Order flow confidence falls back to the depth heuristic.",
                path
            );
            None
        };

        Self { model }
    }

    pub fn simulated() -> Self {
        Self { model: None }
    }

    pub fn is_simulated(&self) -> bool {
        self.model.is_none()
    }

    fn load_model(path: &str) -> TractResult<RunnableModel> {
        tract_onnx::onnx()
            .model_for_path(path)?
            .into_optimized()?
            .into_runnable()
    }

    /// Probability in [0, 1] from the model's first output, if a model is loaded.
    pub fn predict(&self, features: &[f32]) -> Result<Option<f32>, InferenceError> {
        let Some(model) = &self.model else {
            return Ok(None);
        };

        let tensor = tract_ndarray::Array::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(|e| InferenceError(e.to_string()))?
            .into_tensor();
        let result = model.run(tvec!(tensor.into()))?;

        let output = result[0].to_array_view::<f32>()?;
        let probability = output.iter().next().copied().unwrap_or(0.5);
        Ok(Some(probability.clamp(0.0, 1.0)))
    }
}
