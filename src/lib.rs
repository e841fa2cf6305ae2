pub mod api_client;
pub mod config;
pub mod logging;
pub mod table_display;

pub use api_client::{connect, ActionRequest, Connector, ConnectorError, Properties, Row};
