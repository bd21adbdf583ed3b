use crate::service::liveness_service::LivenessService;

#[derive(Clone)]
pub struct LivenessState {
    pub liveness_service: LivenessService,
}

impl LivenessState {
    pub fn new(liveness_service: LivenessService) -> Self {
        Self { liveness_service }
    }
}
