pub mod chatdb;
pub mod db;
pub mod matchdb;
pub mod userdb;

#[cfg(test)]
pub mod testutil;
