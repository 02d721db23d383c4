//! Scriptable gateway for tests and local development.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use coursemart_core::{ChargeId, PaymentMethod};

use crate::charge::{CardOutcome, ChargeRequest, ChargeResponse};
use crate::client::{GatewayError, PaymentGateway};
use crate::outcome::GatewayOutcome;

/// In-process [`PaymentGateway`].
///
/// Scripted responses are consumed in order; with nothing scripted it
/// fabricates a plausible success per rail, which keeps dev wiring and the
/// happy-path tests short. Every request is recorded for assertions.
#[derive(Debug, Default)]
pub struct MockGateway {
    scripted: Mutex<VecDeque<Result<ChargeResponse, GatewayError>>>,
    statuses: Mutex<HashMap<ChargeId, GatewayOutcome>>,
    requests: Mutex<Vec<ChargeRequest>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next `create_charge` result.
    pub fn script_charge(&self, response: Result<ChargeResponse, GatewayError>) {
        self.scripted.lock().unwrap().push_back(response);
    }

    /// Set what `charge_status` reports for a charge.
    pub fn set_status(&self, charge_id: ChargeId, outcome: GatewayOutcome) {
        self.statuses.lock().unwrap().insert(charge_id, outcome);
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn charge_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn default_response(request: &ChargeRequest) -> ChargeResponse {
        let charge_id = ChargeId::new(format!("ch_{}", Uuid::now_v7().simple()));
        match request.method {
            PaymentMethod::CreditCard => ChargeResponse::CreditCard {
                charge_id,
                outcome: CardOutcome::Confirmed,
                raw: serde_json::json!({"status": "confirmed"}),
            },
            PaymentMethod::Pix => ChargeResponse::Pix {
                charge_id,
                qr_code: "00020126330014br.gov.bcb.pix0114test".to_string(),
                qr_code_image: None,
                expires_at: Utc::now() + Duration::minutes(30),
            },
            PaymentMethod::Boleto => ChargeResponse::Boleto {
                charge_id,
                url: "https://boletos.example.com/print/test".to_string(),
                digitable_line: "34191.79001 01043.510047 91020.150008 6 00000000019900"
                    .to_string(),
                due_date: Utc::now() + Duration::days(3),
            },
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_charge(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeResponse, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.scripted.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(Self::default_response(request)),
        }
    }

    async fn charge_status(
        &self,
        charge_id: &ChargeId,
    ) -> Result<GatewayOutcome, GatewayError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(charge_id)
            .copied()
            .unwrap_or(GatewayOutcome::Pending))
    }
}
