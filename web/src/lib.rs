// Browser front end for the car manual chat:
// - HTTP routes and the SSE answer stream
// - Per-browser chat sessions with an idle timeout

pub mod http_server;
pub use http_server::{create_app, run_server, AppState};

pub mod session;
