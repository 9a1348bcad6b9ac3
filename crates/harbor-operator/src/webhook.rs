//! Admission and conversion webhooks
//!
//! Served over TLS by the API server callbacks registered on the CRDs:
//!
//! - `POST /validate` rejects specs that violate cross-field rules
//! - `POST /mutate` fills defaults and answers with a JSON patch
//! - `POST /convert` converts objects between `v1alpha3` and `v1beta1`

use crate::api::{conversion, defaults, validation, CONVERSION_PATH};
use crate::error::{OperatorError, Result};
use axum::{routing::post, Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::conversion::{ConversionRequest, ConversionResponse, ConversionReview};
use kube::core::Status;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Path of the validating webhook
pub const VALIDATE_PATH: &str = "/validate";
/// Path of the mutating webhook
pub const MUTATE_PATH: &str = "/mutate";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Listener settings of the webhook server
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub addr: SocketAddr,
    /// PEM certificate chain presented to the API server
    pub cert_path: PathBuf,
    /// PEM private key of `cert_path`
    pub key_path: PathBuf,
}

/// All webhook routes
pub fn router() -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate_handler))
        .route(MUTATE_PATH, post(mutate_handler))
        .route(CONVERSION_PATH, post(convert_handler))
        .layer(TraceLayer::new_for_http())
}

/// Serve the webhooks until `cancel` fires
pub async fn serve(config: WebhookConfig, cancel: CancellationToken) -> Result<()> {
    let tls = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .map_err(|e| {
            OperatorError::InvalidConfig(format!(
                "webhook certificate {}: {}",
                config.cert_path.display(),
                e
            ))
        })?;

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    info!(addr = %config.addr, "Starting webhook server");
    axum_server::bind_rustls(config.addr, tls)
        .handle(handle)
        .serve(router().into_make_service())
        .await
        .map_err(|e| OperatorError::Internal(format!("webhook server: {}", e)))
}

fn record(endpoint: &'static str, result: &'static str) {
    metrics::counter!(
        "harbor_operator_webhook_requests_total",
        "endpoint" => endpoint,
        "result" => result
    )
    .increment(1);
}

fn admission_request(
    body: AdmissionReview<DynamicObject>,
) -> std::result::Result<AdmissionRequest<DynamicObject>, AdmissionResponse> {
    body.try_into().map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
        error!(error = %e, "Failed to parse admission request");
        AdmissionResponse::invalid(e.to_string())
    })
}

fn object_values(req: &AdmissionRequest<DynamicObject>) -> serde_json::Result<(Value, Option<Value>)> {
    let object = serde_json::to_value(&req.object)?;
    let old = match &req.old_object {
        Some(old) => Some(serde_json::to_value(old)?),
        None => None,
    };
    Ok((object, old))
}

/// Validating admission: deny with the summarized field errors
pub async fn validate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req = match admission_request(body) {
        Ok(req) => req,
        Err(response) => return Json(response.into_review()),
    };
    Json(validate(&req).into_review())
}

fn validate(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);
    if req.object.is_none() {
        // deletions carry only the old object
        record("validate", "allowed");
        return response;
    }

    let (object, old) = match object_values(req) {
        Ok(values) => values,
        Err(e) => {
            record("validate", "error");
            return response.deny(format!("cannot decode object: {}", e));
        }
    };

    let errors = validation::validate_object(&object, old.as_ref());
    if errors.is_empty() {
        record("validate", "allowed");
        return response;
    }

    let message = validation::summarize(&errors);
    debug!(
        kind = %req.kind.kind,
        name = %req.name,
        message = %message,
        "Denied admission"
    );
    record("validate", "denied");
    response.deny(message)
}

/// Mutating admission: patch in defaults for unset fields
pub async fn mutate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req = match admission_request(body) {
        Ok(req) => req,
        Err(response) => return Json(response.into_review()),
    };
    Json(mutate(&req).into_review())
}

fn mutate(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);
    let Some(object) = &req.object else {
        return response;
    };

    let original = match serde_json::to_value(object) {
        Ok(value) => value,
        Err(e) => {
            record("mutate", "error");
            return response.deny(format!("cannot decode object: {}", e));
        }
    };
    let mut defaulted = original.clone();
    if !defaults::apply(&mut defaulted) {
        record("mutate", "unchanged");
        return response;
    }

    let patch = json_patch::diff(&original, &defaulted);
    match response.clone().with_patch(patch) {
        Ok(patched) => {
            record("mutate", "patched");
            patched
        }
        Err(e) => {
            warn!(error = %e, "Failed to serialize defaulting patch");
            record("mutate", "error");
            response.deny(format!("cannot serialize patch: {}", e))
        }
    }
}

/// CRD conversion through the `v1beta1` hub
pub async fn convert_handler(Json(review): Json<ConversionReview>) -> Json<ConversionReview> {
    let request = match ConversionRequest::from_review(review) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse conversion request");
            record("convert", "error");
            return Json(
                ConversionResponse::invalid(Status::failure(&e.to_string(), "InvalidRequest"))
                    .into_review(),
            );
        }
    };
    Json(convert(request).into_review())
}

fn convert(mut request: ConversionRequest) -> ConversionResponse {
    let desired = request.desired_api_version.clone();
    let objects = std::mem::take(&mut request.objects);
    let count = objects.len();
    let response = ConversionResponse::for_request(request);

    match conversion::registry().convert_all(objects, &desired) {
        Ok(converted) => {
            debug!(desired = %desired, count, "Converted objects");
            record("convert", "converted");
            response.success(converted)
        }
        Err(e) => {
            warn!(desired = %desired, error = %e, "Conversion failed");
            record("convert", "failed");
            response.failure(Status::failure(&e.to_string(), "ConversionFailed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn admission(object: Value, old: Option<Value>) -> AdmissionReview<DynamicObject> {
        let kind = object["kind"].as_str().unwrap_or_default().to_string();
        let version = object["apiVersion"]
            .as_str()
            .and_then(|v| v.split('/').nth(1))
            .unwrap_or_default()
            .to_string();
        let operation = if old.is_some() { "UPDATE" } else { "CREATE" };
        serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "review-uid",
                "kind": {"group": "goharbor.io", "version": version, "kind": kind},
                "resource": {"group": "goharbor.io", "version": version, "resource": "resources"},
                "name": "sample",
                "namespace": "registry",
                "operation": operation,
                "userInfo": {},
                "object": object,
                "oldObject": old,
                "dryRun": false
            }
        }))
        .unwrap()
    }

    fn response_of(review: AdmissionReview<DynamicObject>) -> Value {
        serde_json::to_value(&review).unwrap()["response"].clone()
    }

    #[tokio::test]
    async fn test_invalid_harbor_cluster_is_denied() {
        let cluster = json!({
            "apiVersion": "goharbor.io/v1alpha3",
            "kind": "HarborCluster",
            "metadata": {"name": "sample", "namespace": "registry"},
            "spec": {}
        });
        let Json(review) = validate_handler(Json(admission(cluster, None))).await;
        let response = response_of(review);
        assert_eq!(response["uid"], "review-uid");
        assert_eq!(response["allowed"], false);
        let message = response["status"]["message"].as_str().unwrap_or_default();
        assert!(message.contains("spec.redis"), "{}", message);
    }

    #[tokio::test]
    async fn test_deletion_is_allowed() {
        let mut review = admission(
            json!({
                "apiVersion": "goharbor.io/v1beta1",
                "kind": "HarborCluster",
                "metadata": {"name": "sample", "namespace": "registry"},
                "spec": {}
            }),
            None,
        );
        if let Some(request) = review.request.as_mut() {
            request.old_object = request.object.take();
        }
        let Json(review) = validate_handler(Json(review)).await;
        assert_eq!(response_of(review)["allowed"], true);
    }

    #[tokio::test]
    async fn test_defaults_are_patched() {
        let core = json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "Core",
            "metadata": {"name": "sample-core", "namespace": "registry"},
            "spec": {}
        });
        let Json(review) = mutate_handler(Json(admission(core, None))).await;
        let response = response_of(review);
        assert_eq!(response["allowed"], true);
        assert_eq!(response["patchType"], "JSONPatch");
        assert!(response["patch"].is_string());
    }

    #[tokio::test]
    async fn test_conversion_to_v1alpha3() {
        let review: ConversionReview = serde_json::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "ConversionReview",
            "request": {
                "uid": "conversion-uid",
                "desiredAPIVersion": "goharbor.io/v1alpha3",
                "objects": [{
                    "apiVersion": "goharbor.io/v1beta1",
                    "kind": "Portal",
                    "metadata": {"name": "sample-portal", "namespace": "registry"},
                    "spec": {}
                }]
            }
        }))
        .unwrap();

        let Json(review) = convert_handler(Json(review)).await;
        let response = serde_json::to_value(&review).unwrap()["response"].clone();
        assert_eq!(response["uid"], "conversion-uid");
        assert_eq!(response["result"]["status"], "Success");
        assert_eq!(
            response["convertedObjects"][0]["apiVersion"],
            "goharbor.io/v1alpha3"
        );
    }

    #[tokio::test]
    async fn test_conversion_of_unknown_kind_fails() {
        let review: ConversionReview = serde_json::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "ConversionReview",
            "request": {
                "uid": "conversion-uid",
                "desiredAPIVersion": "goharbor.io/v1alpha3",
                "objects": [{
                    "apiVersion": "goharbor.io/v1beta1",
                    "kind": "Unknown",
                    "metadata": {"name": "x"}
                }]
            }
        }))
        .unwrap();

        let Json(review) = convert_handler(Json(review)).await;
        let response = serde_json::to_value(&review).unwrap()["response"].clone();
        assert_eq!(response["result"]["status"], "Failure");
    }
}
