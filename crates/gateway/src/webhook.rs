//! Inbound webhook verification and per-rail payload decoding.
//!
//! Payment confirmations are money-moving events: nothing is parsed before
//! the HMAC signature over the raw body checks out against the rail's
//! shared secret. Payload shapes differ per rail, so decoding is a tagged
//! dispatch over small [`RailCodec`] strategies — the state machine behind
//! the adapter stays rail-agnostic.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use coursemart_core::{ChargeId, PaymentMethod};

use crate::outcome::{GatewayNotification, GatewayOutcome};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unknown rail '{0}'")]
    UnknownRail(String),

    #[error("missing signature header")]
    MissingSignature,

    #[error("signature verification failed")]
    BadSignature,

    #[error("no signing secret configured for rail '{0}'")]
    MissingSecret(&'static str),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Resolve the `:rail` path segment of the webhook endpoint.
pub fn rail_from_path(segment: &str) -> Option<PaymentMethod> {
    match segment {
        "credit-card" | "credit_card" => Some(PaymentMethod::CreditCard),
        "pix" => Some(PaymentMethod::Pix),
        "boleto" => Some(PaymentMethod::Boleto),
        _ => None,
    }
}

/// Shared-secret HMAC verification, one secret per rail.
#[derive(Debug, Default, Clone)]
pub struct WebhookVerifier {
    secrets: HashMap<PaymentMethod, String>,
}

impl WebhookVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, rail: PaymentMethod, secret: impl Into<String>) -> Self {
        self.secrets.insert(rail, secret.into());
        self
    }

    /// Verify `signature` (hex HMAC-SHA256 of the raw body) for `rail`.
    ///
    /// Comparison happens inside the MAC (constant time); any decoding or
    /// mismatch problem collapses to `BadSignature` so callers cannot leak
    /// which step failed.
    pub fn verify(
        &self,
        rail: PaymentMethod,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), WebhookError> {
        let secret = self
            .secrets
            .get(&rail)
            .ok_or(WebhookError::MissingSecret(rail.as_str()))?;
        let signature = signature.ok_or(WebhookError::MissingSignature)?;

        let expected = hex::decode(signature.trim()).map_err(|_| WebhookError::BadSignature)?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| WebhookError::BadSignature)?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| WebhookError::BadSignature)
    }
}

/// Per-rail payload decoder.
trait RailCodec: Send + Sync {
    fn rail(&self) -> PaymentMethod;

    fn decode(&self, body: &Value) -> Result<GatewayNotification, WebhookError>;
}

/// Card rail: `{"event": "charge.status_changed", "charge": {"id", "status"}}`.
struct CardCodec;

impl RailCodec for CardCodec {
    fn rail(&self) -> PaymentMethod {
        PaymentMethod::CreditCard
    }

    fn decode(&self, body: &Value) -> Result<GatewayNotification, WebhookError> {
        let charge = body
            .get("charge")
            .ok_or_else(|| WebhookError::Malformed("missing 'charge'".to_string()))?;
        let id = required_str(charge, "id")?;
        let status = required_str(charge, "status")?;
        let outcome = GatewayOutcome::from_provider_status(&status)
            .ok_or_else(|| WebhookError::Malformed(format!("unknown card status '{status}'")))?;
        Ok(GatewayNotification {
            charge_id: ChargeId::new(id),
            outcome,
            raw: body.clone(),
        })
    }
}

/// PIX rail: `{"event": "PIX_CONFIRMED" | "PIX_EXPIRED" | ..., "txid": "..."}`.
struct PixCodec;

impl RailCodec for PixCodec {
    fn rail(&self) -> PaymentMethod {
        PaymentMethod::Pix
    }

    fn decode(&self, body: &Value) -> Result<GatewayNotification, WebhookError> {
        let event = required_str(body, "event")?;
        let txid = required_str(body, "txid")?;
        let outcome = match event.as_str() {
            "PIX_CONFIRMED" | "PIX_RECEIVED" => GatewayOutcome::Paid,
            "PIX_EXPIRED" => GatewayOutcome::Expired,
            "PIX_REFUNDED" => GatewayOutcome::Refunded,
            other => {
                return Err(WebhookError::Malformed(format!(
                    "unknown pix event '{other}'"
                )))
            }
        };
        Ok(GatewayNotification {
            charge_id: ChargeId::new(txid),
            outcome,
            raw: body.clone(),
        })
    }
}

/// Boleto rail: `{"event": "boleto.settled" | ..., "boleto": {"charge_id"}}`.
struct BoletoCodec;

impl RailCodec for BoletoCodec {
    fn rail(&self) -> PaymentMethod {
        PaymentMethod::Boleto
    }

    fn decode(&self, body: &Value) -> Result<GatewayNotification, WebhookError> {
        let event = required_str(body, "event")?;
        let boleto = body
            .get("boleto")
            .ok_or_else(|| WebhookError::Malformed("missing 'boleto'".to_string()))?;
        let charge_id = required_str(boleto, "charge_id")?;
        let outcome = match event.as_str() {
            "boleto.settled" => GatewayOutcome::Paid,
            "boleto.expired" => GatewayOutcome::Expired,
            "boleto.canceled" => GatewayOutcome::Canceled,
            "boleto.refunded" => GatewayOutcome::Refunded,
            other => {
                return Err(WebhookError::Malformed(format!(
                    "unknown boleto event '{other}'"
                )))
            }
        };
        Ok(GatewayNotification {
            charge_id: ChargeId::new(charge_id),
            outcome,
            raw: body.clone(),
        })
    }
}

fn required_str(value: &Value, field: &str) -> Result<String, WebhookError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WebhookError::Malformed(format!("missing field '{field}'")))
}

/// Verification + decoding front door for the webhook endpoint.
pub struct WebhookAdapter {
    verifier: WebhookVerifier,
    codecs: Vec<Box<dyn RailCodec>>,
}

impl WebhookAdapter {
    pub fn new(verifier: WebhookVerifier) -> Self {
        Self {
            verifier,
            codecs: vec![Box::new(CardCodec), Box::new(PixCodec), Box::new(BoletoCodec)],
        }
    }

    /// Verify and decode one inbound delivery.
    ///
    /// The signature is checked against the raw bytes before any JSON
    /// parsing happens; an unverifiable payload never reaches a codec.
    pub fn decode(
        &self,
        rail_segment: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<GatewayNotification, WebhookError> {
        let rail = rail_from_path(rail_segment)
            .ok_or_else(|| WebhookError::UnknownRail(rail_segment.to_string()))?;

        self.verifier.verify(rail, body, signature)?;

        let value: Value = serde_json::from_slice(body)
            .map_err(|e| WebhookError::Malformed(e.to_string()))?;

        let codec = self
            .codecs
            .iter()
            .find(|c| c.rail() == rail)
            .ok_or_else(|| WebhookError::UnknownRail(rail_segment.to_string()))?;
        codec.decode(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn adapter() -> WebhookAdapter {
        WebhookAdapter::new(
            WebhookVerifier::new()
                .with_secret(PaymentMethod::Pix, "pix-secret")
                .with_secret(PaymentMethod::Boleto, "boleto-secret")
                .with_secret(PaymentMethod::CreditCard, "card-secret"),
        )
    }

    #[test]
    fn valid_signature_is_accepted_and_decoded() {
        let body = serde_json::to_vec(&serde_json::json!({
            "event": "PIX_CONFIRMED",
            "txid": "tx_42",
        }))
        .unwrap();
        let sig = sign("pix-secret", &body);

        let n = adapter().decode("pix", Some(&sig), &body).unwrap();
        assert_eq!(n.charge_id, ChargeId::new("tx_42"));
        assert_eq!(n.outcome, GatewayOutcome::Paid);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = br#"{"event":"PIX_CONFIRMED","txid":"tx_42"}"#;
        let sig = sign("not-the-secret", body);
        let err = adapter().decode("pix", Some(&sig), body).unwrap_err();
        assert!(matches!(err, WebhookError::BadSignature));
    }

    #[test]
    fn modified_payload_is_rejected() {
        let body = br#"{"event":"PIX_CONFIRMED","txid":"tx_42"}"#;
        let sig = sign("pix-secret", body);
        let tampered = br#"{"event":"PIX_CONFIRMED","txid":"tx_43"}"#;
        let err = adapter().decode("pix", Some(&sig), tampered).unwrap_err();
        assert!(matches!(err, WebhookError::BadSignature));
    }

    #[test]
    fn missing_signature_is_distinct_from_bad_signature() {
        let body = br#"{"event":"PIX_CONFIRMED","txid":"tx_42"}"#;
        let err = adapter().decode("pix", None, body).unwrap_err();
        assert!(matches!(err, WebhookError::MissingSignature));
    }

    #[test]
    fn unknown_rail_is_refused_before_verification() {
        let err = adapter().decode("paypal", None, b"{}").unwrap_err();
        assert!(matches!(err, WebhookError::UnknownRail(_)));
    }

    #[test]
    fn boleto_settlement_decodes_to_paid() {
        let body = serde_json::to_vec(&serde_json::json!({
            "event": "boleto.settled",
            "boleto": {"charge_id": "bol_7", "our_number": "0001"},
        }))
        .unwrap();
        let sig = sign("boleto-secret", &body);

        let n = adapter().decode("boleto", Some(&sig), &body).unwrap();
        assert_eq!(n.charge_id, ChargeId::new("bol_7"));
        assert_eq!(n.outcome, GatewayOutcome::Paid);
        assert_eq!(n.raw["boleto"]["our_number"], "0001");
    }

    #[test]
    fn card_status_change_decodes() {
        let body = serde_json::to_vec(&serde_json::json!({
            "event": "charge.status_changed",
            "charge": {"id": "ch_1", "status": "refunded"},
        }))
        .unwrap();
        let sig = sign("card-secret", &body);

        let n = adapter().decode("credit-card", Some(&sig), &body).unwrap();
        assert_eq!(n.outcome, GatewayOutcome::Refunded);
    }

    #[test]
    fn malformed_json_fails_after_verification() {
        let body = b"not json";
        let sig = sign("pix-secret", body);
        let err = adapter().decode("pix", Some(&sig), body).unwrap_err();
        assert!(matches!(err, WebhookError::Malformed(_)));
    }
}
