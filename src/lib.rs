pub mod auth;
pub mod autodownload;
pub mod cache;
pub mod config;
pub mod humanize;
pub mod jobs;
pub mod metastore;
pub mod mirror;
pub mod objectstore;
pub mod observability;
pub mod pipeline;
pub mod rewriter;
pub mod upstream;
pub mod verifier;
