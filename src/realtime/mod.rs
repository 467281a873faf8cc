pub mod channel;
pub mod events;
pub mod fallback;
pub mod hub;
