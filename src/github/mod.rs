//! GitHub App integration.
//!
//! This module provides:
//! - JWT token generation for GitHub App authentication
//! - Installation access token minting and caching

pub mod token_manager;

pub use token_manager::{
    generate_app_jwt, Clock, GitHubTokenMinter, InstallationToken, SystemClock, TokenCache,
    TokenMinter,
};
