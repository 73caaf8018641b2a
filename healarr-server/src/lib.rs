pub mod app_state;
pub mod background;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod router;

pub use app_state::AppState;
pub use router::build_router;
