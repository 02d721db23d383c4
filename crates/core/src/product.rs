//! Product references and buyer-facing payment vocabulary.

use serde::{Deserialize, Serialize};

use crate::id::ProductId;

/// What kind of product a reference points at. The kind decides which
/// entitlement a paid order unlocks (enrollment vs. download permission).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Course,
    Paper,
    Ebook,
}

/// Reference to a purchasable product.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductRef {
    pub kind: ProductKind,
    pub id: ProductId,
}

impl ProductRef {
    pub fn new(kind: ProductKind, id: ProductId) -> Self {
        Self { kind, id }
    }
}

/// Payment rail selected at checkout.
///
/// Credit card resolves synchronously; PIX and boleto confirm asynchronously
/// via webhook or reconciliation poll.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    Pix,
    Boleto,
}

impl PaymentMethod {
    /// Stable name used in webhook routes and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::Pix => "pix",
            PaymentMethod::Boleto => "boleto",
        }
    }

    /// Whether confirmation arrives out-of-band (webhook/poll) rather than in
    /// the charge response.
    pub fn is_asynchronous(&self) -> bool {
        matches!(self, PaymentMethod::Pix | PaymentMethod::Boleto)
    }
}

impl core::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing details captured at checkout and snapshotted on the order so a
/// charge can be re-issued without the original request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerDetails {
    pub name: String,
    pub email: String,
    /// Tax document (CPF/CNPJ) required by boleto issuance.
    pub tax_document: Option<String>,
}
