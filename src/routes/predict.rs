use crate::{
    model_service::{ModelError, ModelService},
    prediction::{classify, decode_image, to_batch, ClassifyError, DecodeError, Prediction},
    server::SharedState,
    state::State as _,
};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("No `file` field in upload")]
    MissingFile,
    #[error("Invalid image: {0}")]
    Decode(#[from] DecodeError),
    #[error("Model failed: {0}")]
    Model(#[from] ModelError),
    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifyError),
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = match &self {
            PredictError::Multipart(e) => e.status(),
            PredictError::MissingFile | PredictError::Decode(_) => StatusCode::BAD_REQUEST,
            PredictError::Model(_) | PredictError::Classify(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("Prediction failed: {}", self);
        } else {
            tracing::debug!("Rejected upload: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

/// Takes the `file` field, or the first field carrying a filename.
async fn read_upload(multipart: &mut Multipart) -> Result<Bytes, PredictError> {
    let mut fallback = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            return Ok(field.bytes().await?);
        }
        if fallback.is_none() && field.file_name().is_some() {
            fallback = Some(field.bytes().await?);
        }
    }
    fallback.ok_or(PredictError::MissingFile)
}

#[instrument(skip(state, multipart))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    mut multipart: Multipart,
) -> Result<Json<Prediction>, PredictError> {
    state.metrics.record_request("/predict");

    let image_data = read_upload(&mut multipart).await?;
    let pixels = decode_image(&image_data, state.max_decoded_bytes)?;
    tracing::debug!(shape = ?pixels.shape(), "Decoded {} byte upload", image_data.len());

    let started = Instant::now();
    let scores = state.model_service.infer(to_batch(pixels)).await?;
    state
        .metrics
        .record_inference_duration(started.elapsed().as_millis() as u64);

    let first_row = scores.outer_iter().next().ok_or(ClassifyError::NoScores)?;
    let prediction = classify(first_row, state.service_state.get_labels())?;

    tracing::debug!(
        "Predicted class={}, confidence={:.3}",
        prediction.class,
        prediction.confidence
    );
    state.metrics.record_prediction(&prediction.class);

    Ok(Json(prediction))
}
