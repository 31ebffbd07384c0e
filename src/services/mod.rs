//! External collaborators: market data and notification delivery.

pub mod market_data;
pub mod notification;
pub mod tradier;

pub use market_data::{MarketDataError, MarketDataGateway, StaticMarketData};
pub use notification::{
    LogNotificationSink, NotificationError, NotificationSink, WebhookNotificationSink,
};
pub use tradier::TradierMarketData;
