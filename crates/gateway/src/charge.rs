//! Charge issuance types, discriminated by rail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursemart_core::{ChargeId, Money, OrderId, PayerDetails, PaymentMethod};

/// Card data forwarded to the gateway. Only a vaulted token ever reaches
/// this system; raw card numbers do not enter the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub token: String,
    pub installments: u8,
}

/// Request to issue one charge for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub payer: PayerDetails,
    pub card: Option<CardDetails>,
}

/// Synchronous result of a card charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "result")]
pub enum CardOutcome {
    Confirmed,
    Processing,
    Declined { reason: String },
}

/// Gateway response to a charge request; fields are populated only for the
/// rail that was charged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeResponse {
    /// Card charges resolve synchronously: the outcome is final (or at
    /// worst still processing) when this returns.
    CreditCard {
        charge_id: ChargeId,
        outcome: CardOutcome,
        raw: serde_json::Value,
    },
    /// PIX returns a payload for the client to display; settlement arrives
    /// later by webhook or poll.
    Pix {
        charge_id: ChargeId,
        /// Copy-and-paste PIX code.
        qr_code: String,
        /// Base64 QR image, when the provider renders one.
        qr_code_image: Option<String>,
        expires_at: DateTime<Utc>,
    },
    /// Boleto returns printable payment instructions; bank settlement can
    /// take days.
    Boleto {
        charge_id: ChargeId,
        url: String,
        digitable_line: String,
        due_date: DateTime<Utc>,
    },
}

impl ChargeResponse {
    pub fn charge_id(&self) -> &ChargeId {
        match self {
            ChargeResponse::CreditCard { charge_id, .. }
            | ChargeResponse::Pix { charge_id, .. }
            | ChargeResponse::Boleto { charge_id, .. } => charge_id,
        }
    }

    pub fn method(&self) -> PaymentMethod {
        match self {
            ChargeResponse::CreditCard { .. } => PaymentMethod::CreditCard,
            ChargeResponse::Pix { .. } => PaymentMethod::Pix,
            ChargeResponse::Boleto { .. } => PaymentMethod::Boleto,
        }
    }
}
