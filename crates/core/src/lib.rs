pub mod alert;
pub mod config;
pub mod error;
pub mod normalize;
pub mod ttl;

pub use alert::{Alert, AlertType, ImmediateDetails, IntelligenceDetails, VerificationDetails};
pub use config::Settings;
pub use error::{DeliveryFailure, DispatchError};
pub use normalize::{RawAlertInput, RawTransaction};
