pub mod backups;
pub mod config;
pub mod health;
pub mod recovery;
