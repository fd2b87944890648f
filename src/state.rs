use crate::config::Config;
use crate::services::billing::BillingService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    pub config: Arc<Config>,
}
