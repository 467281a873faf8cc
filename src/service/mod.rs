pub mod chat_service;
pub mod error;
pub mod match_service;
pub mod permissions;
