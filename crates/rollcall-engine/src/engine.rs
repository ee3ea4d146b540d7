use crate::config::Config;
use crate::gate::InferenceGate;
use image::RgbImage;
use rollcall_core::classifier::ClassifierError;
use rollcall_core::embedder::ExtractionError;
use rollcall_core::model::ModelError;
use rollcall_core::{
    ranking, Classification, CosineMatcher, Embedding, EmbeddingModel, FaceEmbedder,
    ImageClassifier, PhotoClassifier, PhotoFilter, ProcessedImage, RecognitionResult, RegisteredFace,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{model} model unavailable: {reason}")]
    ModelUnavailable { model: &'static str, reason: String },
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// Missing or corrupt model assets: fatal to the feature, not retryable.
    pub fn is_resource_error(&self) -> bool {
        matches!(self, EngineError::ModelUnavailable { .. })
    }
}

/// Deferred model construction, run on the engine thread at first use.
pub type ModelLoader<M> = Box<dyn FnOnce() -> Result<M, ModelError> + Send>;

/// Loaders for the two models the engine owns.
pub struct EngineModels {
    pub embedder: ModelLoader<Box<dyn EmbeddingModel>>,
    pub classifier: ModelLoader<Box<dyn ImageClassifier>>,
}

impl EngineModels {
    /// ONNX models at the configured paths.
    pub fn from_config(config: &Config) -> Self {
        let variant = config.model_variant;
        let embedder_path = config.embedding_model_path();
        let classifier_path = config.classifier_model_path();
        let labels_path = config.classifier_labels_path();

        Self {
            embedder: Box::new(move || {
                let model = FaceEmbedder::load(&embedder_path, variant)?;
                Ok(Box::new(model) as Box<dyn EmbeddingModel>)
            }),
            classifier: Box::new(move || {
                let mut model = PhotoClassifier::load(&classifier_path, variant)?;
                match PhotoClassifier::read_labels(&labels_path) {
                    Ok(labels) => model = model.with_labels(labels),
                    Err(e) => tracing::warn!(
                        path = %labels_path.display(),
                        error = %e,
                        "classifier labels unavailable; reporting class indices only"
                    ),
                }
                Ok(Box::new(model) as Box<dyn ImageClassifier>)
            }),
        }
    }
}

/// A model that is loaded on first use and then held until the engine exits.
///
/// A failed load is remembered: the model stays unavailable instead of being
/// retried on every request.
enum ModelSlot<M> {
    Pending(ModelLoader<M>),
    Ready(M),
    Unavailable(String),
}

impl<M> ModelSlot<M> {
    fn get(&mut self, model: &'static str) -> Result<&mut M, EngineError> {
        let slot = std::mem::replace(self, ModelSlot::Unavailable(String::new()));
        *self = match slot {
            ModelSlot::Pending(loader) => match loader() {
                Ok(m) => {
                    tracing::info!(model, "model loaded");
                    ModelSlot::Ready(m)
                }
                Err(e) => {
                    tracing::error!(model, error = %e, "model load failed; feature unavailable");
                    ModelSlot::Unavailable(e.to_string())
                }
            },
            other => other,
        };

        match self {
            ModelSlot::Ready(m) => Ok(m),
            ModelSlot::Unavailable(reason) => Err(EngineError::ModelUnavailable {
                model,
                reason: reason.clone(),
            }),
            ModelSlot::Pending(_) => Err(EngineError::ModelUnavailable {
                model,
                reason: "model not loaded".to_string(),
            }),
        }
    }
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Embed {
        face: RgbImage,
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
    Rank {
        image: Arc<ProcessedImage>,
        registry: Arc<Vec<RegisteredFace>>,
        threshold: f32,
        reply: oneshot::Sender<Result<Vec<RecognitionResult>, EngineError>>,
    },
    Classify {
        image: RgbImage,
        reply: oneshot::Sender<Result<Vec<Classification>, EngineError>>,
    },
}

impl EngineRequest {
    /// The caller gave up (timed out or was dropped) before the request ran.
    fn is_abandoned(&self) -> bool {
        match self {
            EngineRequest::Embed { reply, .. } => reply.is_closed(),
            EngineRequest::Rank { reply, .. } => reply.is_closed(),
            EngineRequest::Classify { reply, .. } => reply.is_closed(),
        }
    }
}

/// Clone-safe handle to the engine thread.
///
/// All clones share one [`InferenceGate`], so the single-permit discipline
/// applies across every call site that uses this engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    gate: Arc<InferenceGate>,
    timeout: Duration,
}

impl EngineHandle {
    pub fn gate(&self) -> &InferenceGate {
        &self.gate
    }

    /// Extract an embedding from a face crop.
    pub async fn embed(&self, face: RgbImage) -> Result<Embedding, EngineError> {
        self.request(|reply| EngineRequest::Embed { face, reply })
            .await
    }

    /// Extract the probe embedding of `image` and rank it against `registry`.
    pub async fn rank(
        &self,
        image: Arc<ProcessedImage>,
        registry: Arc<Vec<RegisteredFace>>,
        threshold: f32,
    ) -> Result<Vec<RecognitionResult>, EngineError> {
        self.request(|reply| EngineRequest::Rank {
            image,
            registry,
            threshold,
            reply,
        })
        .await
    }

    /// Classify a whole photo with the pre-filter model.
    pub async fn classify(&self, image: RgbImage) -> Result<Vec<Classification>, EngineError> {
        self.request(|reply| EngineRequest::Classify { image, reply })
            .await
    }

    /// Whether `image` looks like a usable photo according to `filter`.
    ///
    /// Waits for the inference gate, so it never overlaps a recognition pass.
    pub async fn check_photo(
        &self,
        image: RgbImage,
        filter: &PhotoFilter,
    ) -> Result<bool, EngineError> {
        let _permit = self.gate.enter().await;
        let ranked = self.classify(image).await?;
        let sensible = filter.is_sensible(&ranked);
        tracing::debug!(
            top = ?ranked.first().map(|c| (c.index, c.score)),
            sensible,
            "photo pre-filter"
        );
        Ok(sensible)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        // The deadline covers queueing as well as inference.
        let exchange = async {
            self.tx
                .send(build(reply_tx))
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "engine request timed out");
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Models are not loaded here: each is loaded on the engine thread the first
/// time a request needs it, and held until every handle is dropped.
pub fn spawn_engine(
    models: EngineModels,
    queue_depth: usize,
    timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    let mut embedder = ModelSlot::Pending(models.embedder);
    let mut classifier = ModelSlot::Pending(models.classifier);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                if req.is_abandoned() {
                    tracing::debug!("skipping abandoned engine request");
                    continue;
                }
                match req {
                    EngineRequest::Embed { face, reply } => {
                        let result = run_embed(&mut embedder, &face);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Rank {
                        image,
                        registry,
                        threshold,
                        reply,
                    } => {
                        let result = run_rank(&mut embedder, &image, &registry, threshold);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Classify { image, reply } => {
                        let result = run_classify(&mut classifier, &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        gate: Arc::new(InferenceGate::new()),
        timeout,
    })
}

/// Spawn the engine with the ONNX models and limits from `config`.
pub fn spawn_from_config(config: &Config) -> Result<EngineHandle, EngineError> {
    spawn_engine(
        EngineModels::from_config(config),
        config.engine_queue_depth,
        config.inference_timeout(),
    )
}

fn run_embed(
    slot: &mut ModelSlot<Box<dyn EmbeddingModel>>,
    face: &RgbImage,
) -> Result<Embedding, EngineError> {
    let model = slot.get("face-embedding")?;
    Ok(model.extract(face)?)
}

fn run_rank(
    slot: &mut ModelSlot<Box<dyn EmbeddingModel>>,
    image: &ProcessedImage,
    registry: &[RegisteredFace],
    threshold: f32,
) -> Result<Vec<RecognitionResult>, EngineError> {
    // Nothing to compare: answer without loading the model.
    if registry.is_empty() || !image.has_face() {
        return Ok(Vec::new());
    }
    let model = slot.get("face-embedding")?;
    let results = ranking::recognize(image, registry, model, &CosineMatcher, threshold)?;
    Ok(results)
}

fn run_classify(
    slot: &mut ModelSlot<Box<dyn ImageClassifier>>,
    image: &RgbImage,
) -> Result<Vec<Classification>, EngineError> {
    let model = slot.get("image-classifier")?;
    Ok(model.classify(image)?)
}
