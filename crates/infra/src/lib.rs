//! Infrastructure for the shop: the order store and its event log, the
//! query/search index, refresh notifications, station adapters and
//! configuration.

pub mod command_dispatcher;
pub mod config;
pub mod error;
pub mod event_store;
pub mod notifications;
pub mod order_store;
pub mod projections;
pub mod stations;
pub mod workers;


pub use config::{ConfigError, ShopConfig};
pub use error::{ShopError, ShopResult};
pub use notifications::{Notifier, RefreshSignal, StationView};
pub use order_store::OrderStore;
pub use projections::{MaintenanceDue, OrderIndex, OrderSummary, SearchScope, StageCounts};
pub use stations::{
    Cashier, Dashboard, DiagnosisBay, OrderDetail, ReceptionDesk, Shop, ShopEventStore,
    ShopOrderStore, Workshop,
};
