//! Credential-management core: user registration with Argon2 password
//! hashes, login, and signed expiring bearer tokens.

pub mod app;
pub mod auth;
pub mod config;
pub mod state;
