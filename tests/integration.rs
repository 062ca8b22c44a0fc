#[path = "integration/common.rs"]
mod common;
#[path = "integration/config.rs"]
mod config;
#[path = "integration/dispatcher.rs"]
mod dispatcher;
#[path = "integration/lifecycle.rs"]
mod lifecycle;
#[path = "integration/properties.rs"]
mod properties;
#[path = "integration/scenarios.rs"]
mod scenarios;
