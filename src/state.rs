use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;
use crate::events::EventBus;
use crate::geo::GeoService;
use crate::notify::{NotificationSender, WebhookSender};
use crate::observability::metrics::Metrics;
use crate::store::Store;

pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub events: EventBus,
    pub geo: GeoService,
    pub notifier: Arc<dyn NotificationSender>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let geo = GeoService::new(&config)?;
        let notifier = Arc::new(WebhookSender::new(config.provider_timeout())?);
        Ok(Self::with_parts(config, geo, notifier))
    }

    pub fn with_parts(
        config: Config,
        geo: GeoService,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        let events = EventBus::new(config.event_buffer_size);

        Self {
            config,
            store: Store::new(),
            events,
            geo,
            notifier,
            metrics: Metrics::new(),
        }
    }
}
