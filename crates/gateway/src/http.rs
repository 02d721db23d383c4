//! HTTP-backed gateway client.
//!
//! Talks to a provider-style JSON API: `POST /v1/charges` to issue a charge,
//! `GET /v1/charges/{id}` to re-query its status. Transport failures map to
//! `GatewayError::Unavailable` so callers leave the order pending.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use coursemart_core::{ChargeId, PaymentMethod};

use crate::charge::{CardOutcome, ChargeRequest, ChargeResponse};
use crate::client::{GatewayError, PaymentGateway};
use crate::outcome::GatewayOutcome;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpGateway {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Protocol(format!("client setup: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    fn charge_body(request: &ChargeRequest) -> Value {
        let mut body = serde_json::json!({
            "reference": request.order_id.to_string(),
            "amount": request.amount.minor_units(),
            "method": request.method.as_str(),
            "payer": {
                "name": request.payer.name,
                "email": request.payer.email,
                "tax_document": request.payer.tax_document,
            },
        });
        if let Some(card) = &request.card {
            body["card"] = serde_json::json!({
                "token": card.token,
                "installments": card.installments,
            });
        }
        body
    }

    fn parse_charge_response(
        method: PaymentMethod,
        body: Value,
    ) -> Result<ChargeResponse, GatewayError> {
        let charge_id = ChargeId::new(str_field(&body, "id")?);
        match method {
            PaymentMethod::CreditCard => {
                let status = str_field(&body, "status")?;
                let outcome = match GatewayOutcome::from_provider_status(&status) {
                    Some(GatewayOutcome::Paid) => CardOutcome::Confirmed,
                    Some(GatewayOutcome::Pending) => CardOutcome::Processing,
                    Some(GatewayOutcome::Declined) => CardOutcome::Declined {
                        reason: body
                            .get("decline_reason")
                            .and_then(Value::as_str)
                            .unwrap_or("declined by issuer")
                            .to_string(),
                    },
                    other => {
                        return Err(GatewayError::Protocol(format!(
                            "unexpected card charge status '{status}' ({other:?})"
                        )))
                    }
                };
                Ok(ChargeResponse::CreditCard {
                    charge_id,
                    outcome,
                    raw: body,
                })
            }
            PaymentMethod::Pix => {
                let pix = body
                    .get("pix")
                    .ok_or_else(|| GatewayError::Protocol("missing pix payload".to_string()))?;
                Ok(ChargeResponse::Pix {
                    charge_id,
                    qr_code: str_field(pix, "qr_code")?,
                    qr_code_image: pix
                        .get("qr_code_image")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    expires_at: time_field(pix, "expires_at")?,
                })
            }
            PaymentMethod::Boleto => {
                let boleto = body
                    .get("boleto")
                    .ok_or_else(|| GatewayError::Protocol("missing boleto payload".to_string()))?;
                Ok(ChargeResponse::Boleto {
                    charge_id,
                    url: str_field(boleto, "url")?,
                    digitable_line: str_field(boleto, "digitable_line")?,
                    due_date: time_field(boleto, "due_date")?,
                })
            }
        }
    }
}

fn str_field(value: &Value, field: &str) -> Result<String, GatewayError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Protocol(format!("missing field '{field}'")))
}

fn time_field(value: &Value, field: &str) -> Result<DateTime<Utc>, GatewayError> {
    let raw = str_field(value, field)?;
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| GatewayError::Protocol(format!("bad timestamp in '{field}': {e}")))
}

fn map_transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() || e.is_connect() {
        GatewayError::Unavailable(e.to_string())
    } else {
        GatewayError::Protocol(e.to_string())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), GatewayError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() {
        Err(GatewayError::Unavailable(format!("provider returned {status}")))
    } else {
        Err(GatewayError::Protocol(format!("provider returned {status}")))
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_charge(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/charges", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Self::charge_body(request))
            .send()
            .await
            .map_err(map_transport)?;

        check_status(response.status())?;
        let body: Value = response.json().await.map_err(map_transport)?;
        Self::parse_charge_response(request.method, body)
    }

    async fn charge_status(
        &self,
        charge_id: &ChargeId,
    ) -> Result<GatewayOutcome, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/charges/{}", self.base_url, charge_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(map_transport)?;

        check_status(response.status())?;
        let body: Value = response.json().await.map_err(map_transport)?;
        let status = str_field(&body, "status")?;
        GatewayOutcome::from_provider_status(&status)
            .ok_or_else(|| GatewayError::Protocol(format!("unknown charge status '{status}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursemart_core::{Money, OrderId, PayerDetails};

    fn pix_request() -> ChargeRequest {
        ChargeRequest {
            order_id: OrderId::new(),
            amount: Money::from_minor_units(19900),
            method: PaymentMethod::Pix,
            payer: PayerDetails {
                name: "Ana Souza".to_string(),
                email: "ana@example.com".to_string(),
                tax_document: None,
            },
            card: None,
        }
    }

    #[test]
    fn charge_body_carries_amount_and_method() {
        let body = HttpGateway::charge_body(&pix_request());
        assert_eq!(body["amount"], 19900);
        assert_eq!(body["method"], "pix");
        assert!(body.get("card").is_none());
    }

    #[test]
    fn parses_pix_charge_response() {
        let body = serde_json::json!({
            "id": "ch_123",
            "status": "pending",
            "pix": {
                "qr_code": "00020126330014br.gov.bcb.pix",
                "qr_code_image": "aW1hZ2U=",
                "expires_at": "2026-03-01T12:00:00Z",
            },
        });
        let parsed = HttpGateway::parse_charge_response(PaymentMethod::Pix, body).unwrap();
        match parsed {
            ChargeResponse::Pix { charge_id, qr_code, .. } => {
                assert_eq!(charge_id.as_str(), "ch_123");
                assert!(qr_code.starts_with("0002"));
            }
            other => panic!("expected pix response, got {other:?}"),
        }
    }

    #[test]
    fn parses_declined_card_response_with_reason() {
        let body = serde_json::json!({
            "id": "ch_9",
            "status": "declined",
            "decline_reason": "insufficient funds",
        });
        let parsed =
            HttpGateway::parse_charge_response(PaymentMethod::CreditCard, body).unwrap();
        match parsed {
            ChargeResponse::CreditCard { outcome, .. } => {
                assert_eq!(
                    outcome,
                    CardOutcome::Declined {
                        reason: "insufficient funds".to_string()
                    }
                );
            }
            other => panic!("expected card response, got {other:?}"),
        }
    }

    #[test]
    fn missing_payload_is_protocol_error() {
        let body = serde_json::json!({"id": "ch_1", "status": "pending"});
        let err = HttpGateway::parse_charge_response(PaymentMethod::Boleto, body).unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)));
    }
}
