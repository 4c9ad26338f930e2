mod handlers;
pub mod response;
mod routes;

pub use handlers::USER_ID_HEADER;
pub use routes::create_router;
