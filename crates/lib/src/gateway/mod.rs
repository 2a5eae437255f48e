//! Gateway: the webhook HTTP server and service wiring.

mod server;

pub use server::{build_dispatcher, router, run_gateway, AppState, Services, GREETING};
