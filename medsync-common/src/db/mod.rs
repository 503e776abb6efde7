//! Database module for MedSync
//!
//! Table creation is idempotent; every engine start runs through
//! `init::init_database` which creates missing tables and applies pragmas.

pub mod init;
