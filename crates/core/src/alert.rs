use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert categories emitted by the upstream fraud detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    NewTransaction,
    FraudDetected,
    HighRiskTransaction,
    UnusualPattern,
    MerchantAlert,
    VelocityBreach,
}

/// Canonical fraud alert. Immutable once constructed: routing and queueing
/// attach their own bookkeeping in wrappers, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub alert_type: AlertType,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub card_token: String,
    pub immediate: ImmediateDetails,
    pub verification: VerificationDetails,
    pub intelligence: IntelligenceDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
}

/// What happened, formatted for immediate display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImmediateDetails {
    pub amount: String,
    pub merchant: String,
    pub location: String,
    pub status: String,
    pub network: String,
    pub network_transaction_id: String,
}

/// Reference fields an agent can use to verify the transaction upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationDetails {
    pub mcc_code: String,
    pub merchant_type: String,
    pub merchant_category: String,
    pub authorization_code: String,
    pub retrieval_reference: String,
}

/// Context signals derived by the detectors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntelligenceDetails {
    pub is_first_transaction: bool,
    pub merchant_history: String,
    pub geographic_pattern: String,
}
