//! HTTP offer/answer signaling.
//!
//! The local SDP offer is POSTed as JSON to the configured endpoint; the
//! peer replies with an SDP answer and a connection-correlation id that is
//! echoed back on every renegotiation of the same logical connection.

use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use url::Url;

/// Offer body sent to the signaling endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    /// Local SDP offer.
    pub sdp: String,
    /// Always `"offer"`.
    #[serde(rename = "type")]
    pub sdp_type: String,
    /// Correlation id from a previous answer, if renegotiating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pc_id: Option<String>,
    /// Ask the peer to tear down and rebuild its end of the connection.
    pub restart_pc: bool,
}

impl OfferRequest {
    /// Build an offer body.
    pub fn new(sdp: String, pc_id: Option<String>, restart_pc: bool) -> Self {
        Self { sdp, sdp_type: "offer".to_string(), pc_id, restart_pc }
    }
}

/// Answer body returned by the signaling endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// Remote SDP answer.
    pub sdp: String,
    /// Always `"answer"`.
    #[serde(rename = "type")]
    pub sdp_type: String,
    /// Correlation id to echo on future renegotiations.
    #[serde(default)]
    pub pc_id: Option<String>,
}

/// Thin client for the offer/answer POST.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl SignalingClient {
    /// Create a client for the given endpoint.
    pub fn new(endpoint: Url) -> Self {
        Self { http: reqwest::Client::new(), endpoint }
    }

    /// POST the offer and parse the answer.
    ///
    /// A non-2xx response fails with the status code and the response body
    /// embedded in the error.
    pub async fn exchange(&self, offer: OfferRequest) -> Result<AnswerResponse> {
        tracing::debug!(
            endpoint = %self.endpoint,
            pc_id = ?offer.pc_id,
            restart = offer.restart_pc,
            "posting SDP offer"
        );

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&offer)
            .send()
            .await
            .map_err(|e| TransportError::connection(format!("signaling request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Negotiation { status: status.as_u16(), body });
        }

        let answer: AnswerResponse = response
            .json()
            .await
            .map_err(|e| TransportError::protocol(format!("invalid signaling answer: {e}")))?;
        tracing::debug!(pc_id = ?answer.pc_id, "received SDP answer");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_body_shape() {
        let offer = OfferRequest::new("v=0".to_string(), Some("pc-1".to_string()), true);
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "sdp": "v=0",
                "type": "offer",
                "pc_id": "pc-1",
                "restart_pc": true
            })
        );
    }

    #[test]
    fn first_offer_omits_pc_id() {
        let offer = OfferRequest::new("v=0".to_string(), None, false);
        let json = serde_json::to_string(&offer).unwrap();
        assert!(!json.contains("pc_id"));
    }

    #[test]
    fn answer_without_pc_id_parses() {
        let answer: AnswerResponse =
            serde_json::from_str(r#"{"sdp": "v=0", "type": "answer"}"#).unwrap();
        assert!(answer.pc_id.is_none());
    }
}
