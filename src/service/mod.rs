pub mod liveness_service;
pub mod verification_service;
