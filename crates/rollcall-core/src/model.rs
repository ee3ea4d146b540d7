//! ONNX Runtime session plumbing shared by the embedding and classifier models.

use crate::preprocess::InputTensor;
use ort::session::Session;
use ort::value::{DynValue, TensorRef};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}; place the bundled model asset in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Open an ONNX session for a bundled model asset.
///
/// Fails fast with [`ModelError::ModelNotFound`] when the file is missing,
/// before ONNX Runtime is touched.
pub(crate) fn load_session(model_path: &Path, kind: &str) -> Result<Session, ModelError> {
    if !model_path.exists() {
        return Err(ModelError::ModelNotFound(model_path.display().to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = %model_path.display(),
        kind,
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );

    Ok(session)
}

/// Run a single-input model and return its first output flattened to `f32`.
pub(crate) fn run_first_output(
    session: &mut Session,
    input: &InputTensor,
) -> Result<Vec<f32>, ModelError> {
    let outputs = match input {
        InputTensor::Float(t) => session.run(ort::inputs![TensorRef::from_array_view(t.view())?])?,
        InputTensor::Quantized(t) => {
            session.run(ort::inputs![TensorRef::from_array_view(t.view())?])?
        }
    };

    read_as_f32(&outputs[0])
}

/// Float models emit `f32`; quantized models may emit `u8`, which is widened.
fn read_as_f32(value: &DynValue) -> Result<Vec<f32>, ModelError> {
    if let Ok((_, data)) = value.try_extract_tensor::<f32>() {
        return Ok(data.to_vec());
    }
    let (_, data) = value
        .try_extract_tensor::<u8>()
        .map_err(|e| ModelError::InferenceFailed(format!("unsupported output tensor: {e}")))?;
    Ok(data.iter().map(|&b| b as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file_is_reported_by_path() {
        let path = Path::new("/nonexistent/rollcall/facenet.onnx");
        match load_session(path, "embedding") {
            Err(ModelError::ModelNotFound(p)) => assert!(p.ends_with("facenet.onnx")),
            other => panic!("expected ModelNotFound, got {:?}", other.map(|_| ())),
        }
    }
}
