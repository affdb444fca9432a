//! HTTP risk predictor.
//!
//! POSTs the metric set as a flat JSON record and expects
//! `{"contract_version": 1, "score": 72.5}` or
//! `{"contract_version": 1, "label": "High"}` back.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::CapabilityError;
use crate::metrics::MetricSet;

use super::classifier::RiskPredictor;
use super::{Prediction, PredictionOutput, RiskLevel};

#[derive(Debug, Clone)]
pub struct HttpPredictor {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct PredictResponse {
    contract_version: u32,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    label: Option<String>,
}

impl HttpPredictor {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RiskPredictor for HttpPredictor {
    fn name(&self) -> &str {
        "http"
    }

    async fn predict(&self, metrics: &MetricSet) -> Result<Prediction, CapabilityError> {
        let mut request = self.client.post(&self.endpoint).json(metrics.as_map());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CapabilityError::Unreachable(format!("prediction request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Unreachable(format!(
                "prediction service returned {status}: {body}"
            )));
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(format!("prediction JSON parse error: {e}")))?;

        debug!(
            endpoint = %self.endpoint,
            contract_version = body.contract_version,
            "prediction received"
        );

        let output = match (body.score, body.label) {
            (Some(score), _) => PredictionOutput::Score(score),
            (None, Some(label)) => PredictionOutput::Label(
                label
                    .parse::<RiskLevel>()
                    .map_err(|e| CapabilityError::Malformed(e.to_string()))?,
            ),
            (None, None) => {
                return Err(CapabilityError::Malformed(
                    "prediction has neither score nor label".to_string(),
                ));
            }
        };

        Ok(Prediction {
            contract_version: body.contract_version,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{IndicatorSpec, MetricValidator, RawMetrics};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metrics() -> MetricSet {
        MetricValidator::new(vec![
            IndicatorSpec::new("attendance", "Attendance", 0.0, 100.0),
            IndicatorSpec::new("avg_score", "Average score", 0.0, 100.0),
        ])
        .validate(&RawMetrics::new().with("attendance", 40).with("avg_score", 35))
        .unwrap()
    }

    #[tokio::test]
    async fn posts_flat_record_and_reads_score() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(serde_json::json!({"attendance": 40.0, "avg_score": 35.0})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"contract_version": 1, "score": 81.5})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let predictor =
            HttpPredictor::new(format!("{}/predict", server.uri()), Some("secret".to_string()));
        let prediction = predictor.predict(&metrics()).await.unwrap();
        assert_eq!(prediction.output, PredictionOutput::Score(81.5));
    }

    #[tokio::test]
    async fn reads_label() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"contract_version": 1, "label": "High"})),
            )
            .mount(&server)
            .await;

        let predictor = HttpPredictor::new(server.uri(), None);
        let prediction = predictor.predict(&metrics()).await.unwrap();
        assert_eq!(prediction.output, PredictionOutput::Label(RiskLevel::High));
    }

    #[tokio::test]
    async fn server_error_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = HttpPredictor::new(server.uri(), None)
            .predict(&metrics())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Unreachable(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn unknown_label_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"contract_version": 1, "label": "severe"})),
            )
            .mount(&server)
            .await;

        let err = HttpPredictor::new(server.uri(), None)
            .predict(&metrics())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }

    #[tokio::test]
    async fn empty_answer_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"contract_version": 1})),
            )
            .mount(&server)
            .await;

        let err = HttpPredictor::new(server.uri(), None)
            .predict(&metrics())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        // Nothing listens on port 9 (discard) in the test environment.
        let err = HttpPredictor::new("http://127.0.0.1:9/predict", None)
            .predict(&metrics())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Unreachable(_)));
    }
}
