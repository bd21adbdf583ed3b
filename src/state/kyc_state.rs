use crate::service::verification_service::VerificationService;

#[derive(Clone)]
pub struct KycState {
    pub verification_service: VerificationService,
    pub max_upload_bytes: usize,
}

impl KycState {
    pub fn new(verification_service: VerificationService, max_upload_bytes: usize) -> Self {
        Self { verification_service, max_upload_bytes }
    }
}
