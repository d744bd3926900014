pub mod cache;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod tunnels;

pub use routes::create_router;
