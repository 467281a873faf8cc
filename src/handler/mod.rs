pub mod chat;
pub mod matching;
