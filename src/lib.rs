pub mod config;
pub mod db;
pub mod events;
pub mod indexer;
pub mod watch;

#[cfg(test)]
pub mod testing;
