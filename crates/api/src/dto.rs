//! Request/response DTOs and mapping to/from domain types.

use serde::Deserialize;
use uuid::Uuid;

use coursemart_checkout::{CheckoutOutcome, CheckoutRequest, Customer, IdentityOutcome, PaymentInstructions};
use coursemart_core::{PayerDetails, PaymentMethod, ProductId, ProductKind, ProductRef};
use coursemart_gateway::{CardDetails, CardOutcome};

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub items: Vec<ItemBody>,
    pub payment_method: PaymentMethod,
    pub customer: CustomerBody,
    pub payer: PayerBody,
    pub card: Option<CardBody>,
}

#[derive(Debug, Deserialize)]
pub struct ItemBody {
    pub kind: ProductKind,
    pub product_id: Uuid,
}

/// Either an authenticated user id or guest credentials for inline account
/// creation.
#[derive(Debug, Deserialize)]
pub struct CustomerBody {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PayerBody {
    pub name: String,
    pub email: String,
    pub tax_document: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CardBody {
    pub token: String,
    #[serde(default = "default_installments")]
    pub installments: u8,
}

fn default_installments() -> u8 {
    1
}

impl CheckoutBody {
    pub fn into_request(self) -> Result<CheckoutRequest, String> {
        let customer = match (self.customer.user_id, self.customer.email, self.customer.password) {
            (Some(user_id), _, _) => Customer::Known(user_id.into()),
            (None, Some(email), Some(password)) => Customer::Guest { email, password },
            _ => {
                return Err(
                    "customer requires either user_id or email + password".to_string()
                )
            }
        };

        Ok(CheckoutRequest {
            customer,
            items: self
                .items
                .into_iter()
                .map(|i| ProductRef::new(i.kind, ProductId::from_uuid(i.product_id)))
                .collect(),
            payment_method: self.payment_method,
            payer: PayerDetails {
                name: self.payer.name,
                email: self.payer.email,
                tax_document: self.payer.tax_document,
            },
            card: self.card.map(|c| CardDetails {
                token: c.token,
                installments: c.installments,
            }),
        })
    }
}

/// Serialize a checkout outcome as the method-discriminated response body.
pub fn outcome_to_json(outcome: &CheckoutOutcome) -> serde_json::Value {
    let payment = match &outcome.payment {
        PaymentInstructions::CreditCard { outcome } => match outcome {
            CardOutcome::Confirmed => serde_json::json!({
                "type": "credit_card", "result": "confirmed",
            }),
            CardOutcome::Processing => serde_json::json!({
                "type": "credit_card", "result": "processing",
            }),
            CardOutcome::Declined { reason } => serde_json::json!({
                "type": "credit_card", "result": "declined", "reason": reason,
            }),
        },
        PaymentInstructions::Pix {
            qr_code,
            qr_code_image,
            expires_at,
        } => serde_json::json!({
            "type": "pix",
            "qr_code": qr_code,
            "qr_code_image": qr_code_image,
            "expires_at": expires_at,
        }),
        PaymentInstructions::Boleto {
            url,
            digitable_line,
            due_date,
        } => serde_json::json!({
            "type": "boleto",
            "url": url,
            "digitable_line": digitable_line,
            "due_date": due_date,
        }),
        PaymentInstructions::AwaitingRetry => serde_json::json!({
            "type": "awaiting_retry",
        }),
        PaymentInstructions::AlreadyIssued => serde_json::json!({
            "type": "already_issued",
        }),
    };

    let identity = match &outcome.identity {
        IdentityOutcome::NotRequired => serde_json::Value::Null,
        IdentityOutcome::Attached { user_id, session } => serde_json::json!({
            "user_id": user_id.to_string(),
            "session": session.as_ref().map(|s| s.0.clone()),
        }),
        IdentityOutcome::Failed { reason } => serde_json::json!({
            "error": reason,
        }),
    };

    serde_json::json!({
        "order_id": outcome.order_id.to_string(),
        "status": outcome.status.as_str(),
        "payment_status": outcome.payment_status.as_str(),
        "payment": payment,
        "identity": identity,
    })
}
