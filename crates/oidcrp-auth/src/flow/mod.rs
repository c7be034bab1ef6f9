//! Authorization code flow orchestration.
//!
//! - [`state`] - Per-session flow state and its store
//! - [`handler`] - The callback state machine
//! - [`controller`] - Handler registry and the callback entry point
//! - [`data_client`] - Consumers of completed flows
//! - [`urls`] - Callback and error-page URLs

pub mod controller;
pub mod data_client;
pub mod handler;
pub mod state;
pub mod urls;

pub use controller::{FlowController, HandlerRegistry};
pub use data_client::{
    CallbackOutcome, DataClient, DataClientRegistry, DataContext, UserInfoDataClient,
    error_page_redirect, fetch_data, fetch_jwt_data,
};
pub use handler::{
    CallbackHandler, CallbackRequest, FlowFailure, FlowResponse, FlowServices, FlowStep,
};
pub use state::{FlowState, FlowStateStore, InMemoryFlowStateStore, flow_key, random_token};
pub use urls::{CallbackUrls, with_round_trip_parameters};
