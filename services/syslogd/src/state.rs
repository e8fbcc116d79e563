use std::sync::Arc;

use syslogd_core::{Counters, RingCache};

#[derive(Clone)]
pub struct AppState {
    pub ring: Arc<RingCache>,
    pub counters: Arc<Counters>,
}
