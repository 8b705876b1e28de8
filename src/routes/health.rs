use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};

pub const LIVENESS: &str = "Hello, I am alive";

pub async fn ping<M: ModelService>(State(state): State<SharedState<M>>) -> Json<&'static str> {
    state.metrics.record_request("/ping");
    Json(LIVENESS)
}
