//! WeRead Connectors
//!
//! Adapters for the services a reading session talks to.
//! Implements the execution layer ports over HTTP.
//!
//! - **weread_rest**: reading endpoint, cookie renewal, synckey repair
//! - **notify**: push notification channels and the fan-out hub
//! - **curl**: request template extraction from a copied curl command

#![warn(clippy::all)]

// Public modules
pub mod curl;
pub mod notify;
pub mod weread_rest;

// Re-exports
pub use curl::{parse_cookie_string, parse_curl, CurlError};
pub use notify::{
    Channel, ChannelConfig, ChannelRequest, DingTalkFormat, FeishuFormat, NotificationConfig,
    NotificationHub, NotifyError, RequestBody, WeWorkFormat, DEFAULT_BARK_SERVER,
    DEFAULT_NTFY_SERVER,
};
pub use weread_rest::{
    classify_response, cookie_header, extract_session_key, ReadVerdict, WereadClient, WereadError,
};
