//! Boundary classification and normalization of inbound alert payloads.
//!
//! Upstream hands the router either an already-canonical alert or raw
//! transaction data in one of a few known shapes. The shape is decided
//! exactly once, here; downstream code only ever sees [`Alert`].

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::alert::{Alert, AlertType, ImmediateDetails, IntelligenceDetails, VerificationDetails};
use crate::error::DispatchError;

/// Top-level sections whose joint presence marks a payload as canonical.
const CANONICAL_SECTIONS: [&str; 4] = ["alertType", "immediate", "verification", "intelligence"];

/// An inbound payload, classified at the boundary.
#[derive(Debug, Clone)]
pub enum RawAlertInput {
    Canonical(Alert),
    Transaction(RawTransaction),
}

impl RawAlertInput {
    /// Classifies and parses an inbound payload. This is the only fallible
    /// read of raw input: a non-object payload, or a payload whose fields
    /// cannot be deserialized, is a format error.
    pub fn classify(value: Value) -> Result<Self, DispatchError> {
        let Some(map) = value.as_object() else {
            return Err(DispatchError::Format(
                "alert payload must be a JSON object".to_string(),
            ));
        };
        if CANONICAL_SECTIONS.iter().all(|key| map.contains_key(*key)) {
            let alert = serde_json::from_value::<Alert>(value)
                .map_err(|err| DispatchError::Format(err.to_string()))?;
            return Ok(RawAlertInput::Canonical(alert));
        }
        let raw = serde_json::from_value::<RawTransaction>(value)
            .map_err(|err| DispatchError::Format(err.to_string()))?;
        Ok(RawAlertInput::Transaction(raw))
    }

    /// Produces the canonical alert. Pure: canonical input passes through
    /// untouched, raw input resolves every missing field to its documented
    /// default. `fallback_card_token` fills in when the raw data carries no
    /// card token of its own.
    pub fn into_alert(self, fallback_card_token: &str) -> Alert {
        match self {
            RawAlertInput::Canonical(alert) => alert,
            RawAlertInput::Transaction(raw) => raw.into_alert(fallback_card_token),
        }
    }
}

/// Raw upstream transaction data. Every field is optional; unknown fields
/// are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawTransaction {
    pub alert_type: Option<AlertType>,
    pub transaction_id: Option<String>,
    pub card_token: Option<String>,
    /// Flat amount field: a number or a numeric string.
    pub amount: Option<Value>,
    pub amounts: Option<RawAmounts>,
    pub network_event: Option<RawNetworkEvent>,
    pub merchant: Option<RawMerchant>,
    pub status: Option<String>,
    pub state: Option<String>,
    pub result: Option<String>,
    pub network: Option<String>,
    pub network_transaction_id: Option<String>,
    pub authorization_code: Option<String>,
    pub retrieval_reference: Option<String>,
    pub risk_score: Option<f64>,
    pub is_first_transaction: Option<bool>,
    pub merchant_history: Option<String>,
    pub geographic_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawAmounts {
    pub cardholder: Option<RawAmount>,
    pub merchant: Option<RawAmount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawAmount {
    pub amount: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawNetworkEvent {
    pub amounts: Option<RawAmounts>,
}

/// Merchant data arrives either as a bare descriptor string or as a detail
/// object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawMerchant {
    Name(String),
    Details(RawMerchantDetails),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawMerchantDetails {
    pub descriptor: Option<String>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub mcc: Option<String>,
    pub merchant_type: Option<String>,
    pub merchant_category: Option<String>,
}

impl RawTransaction {
    pub fn into_alert(self, fallback_card_token: &str) -> Alert {
        let amount = self.resolve_amount();
        let merchant = self.resolve_merchant();
        let location = self.resolve_location();
        let status = self.resolve_status();
        let (mcc_code, merchant_type, merchant_category) = match self.merchant_details() {
            Some(details) => (
                details.mcc.clone().unwrap_or_default(),
                details.merchant_type.clone().unwrap_or_default(),
                details.merchant_category.clone().unwrap_or_default(),
            ),
            None => Default::default(),
        };

        Alert {
            alert_type: self.alert_type.unwrap_or(AlertType::NewTransaction),
            timestamp: Utc::now(),
            transaction_id: self.transaction_id.unwrap_or_default(),
            card_token: self
                .card_token
                .filter(|token| !token.is_empty())
                .unwrap_or_else(|| fallback_card_token.to_string()),
            immediate: ImmediateDetails {
                amount,
                merchant,
                location,
                status,
                network: self.network.unwrap_or_default(),
                network_transaction_id: self.network_transaction_id.unwrap_or_default(),
            },
            verification: VerificationDetails {
                mcc_code,
                merchant_type,
                merchant_category,
                authorization_code: self.authorization_code.unwrap_or_default(),
                retrieval_reference: self.retrieval_reference.unwrap_or_default(),
            },
            intelligence: IntelligenceDetails {
                is_first_transaction: self.is_first_transaction.unwrap_or(false),
                merchant_history: self.merchant_history.unwrap_or_default(),
                geographic_pattern: self.geographic_pattern.unwrap_or_default(),
            },
            risk_score: self.risk_score,
        }
    }

    /// First numeric hit wins, in a fixed priority order: parsed cardholder
    /// amount, parsed merchant amount, the flat field, then the nested
    /// network-event amounts.
    fn resolve_amount(&self) -> String {
        let parsed = self.amounts.as_ref();
        let network = self.network_event.as_ref().and_then(|e| e.amounts.as_ref());
        let candidates = [
            parsed.and_then(|a| a.cardholder.as_ref()).and_then(|a| a.amount.as_ref()),
            parsed.and_then(|a| a.merchant.as_ref()).and_then(|a| a.amount.as_ref()),
            self.amount.as_ref(),
            network.and_then(|a| a.cardholder.as_ref()).and_then(|a| a.amount.as_ref()),
            network.and_then(|a| a.merchant.as_ref()).and_then(|a| a.amount.as_ref()),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(value) = numeric(candidate) {
                return format!("${value:.2}");
            }
        }
        "$0.00".to_string()
    }

    fn merchant_details(&self) -> Option<&RawMerchantDetails> {
        match self.merchant.as_ref()? {
            RawMerchant::Details(details) => Some(details),
            RawMerchant::Name(_) => None,
        }
    }

    fn resolve_merchant(&self) -> String {
        let resolved = match self.merchant.as_ref() {
            Some(RawMerchant::Name(name)) => Some(name.clone()),
            Some(RawMerchant::Details(details)) => {
                details.descriptor.clone().or_else(|| details.name.clone())
            }
            None => None,
        };
        resolved
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "Unknown Merchant".to_string())
    }

    fn resolve_location(&self) -> String {
        let Some(details) = self.merchant_details() else {
            return "Unknown Location".to_string();
        };
        let parts: Vec<&str> = [
            details.city.as_deref(),
            details.state.as_deref(),
            details.country.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect();
        if parts.is_empty() {
            "Unknown Location".to_string()
        } else {
            parts.join(", ")
        }
    }

    fn resolve_status(&self) -> String {
        [&self.status, &self.state, &self.result]
            .into_iter()
            .flatten()
            .find(|status| !status.is_empty())
            .cloned()
            .unwrap_or_else(|| "PENDING".to_string())
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_start_matches('$').parse().ok(),
        _ => None,
    }
}
