use actix_web::{HttpResponse, Responder, post, web};

use super::ErrorResponse;
use crate::engine::{CodeSubmission, ExecutionEngine};

/// Runs one submission and answers with its `ExecutionResult`
///
/// Bad languages, compile errors and crashing programs all come back as
/// `200` with a failing status. Only a panicked or cancelled execution task
/// produces a `500`.
#[post("/execute")]
pub async fn execute_handler(
    engine: web::Data<ExecutionEngine>,
    body: web::Json<CodeSubmission>,
) -> impl Responder {
    let submission = body.into_inner();
    log::debug!(
        "Received {} submission ({} bytes)",
        submission.language,
        submission.source_code.len()
    );

    let engine = engine.into_inner();
    let handle = tokio::spawn(async move { engine.execute_code(submission).await });

    match handle.await {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => {
            if e.is_panic() {
                log::error!("Execution task panicked: {e:?}");
            } else {
                log::error!("Execution task was cancelled: {e:?}");
            }
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
    }
}
