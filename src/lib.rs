mod acme;
mod client_hello;
pub mod config;
mod droppable_handle;
mod entrypoint;
mod error;
mod forward;
#[doc(hidden)]
pub mod handler;
#[doc(hidden)]
pub mod relay;
mod sniff;
mod stealth;
mod upstream;

pub use config::ApplicationConfig;
pub use entrypoint::entrypoint;
