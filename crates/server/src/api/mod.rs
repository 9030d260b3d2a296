mod handlers;
mod routes;
mod tasks;
mod verify;

pub use routes::create_router;
