pub mod kyc_state;
pub mod liveness_state;
