pub mod kyc_handler;
pub mod liveness_handler;
