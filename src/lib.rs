pub mod auth;
pub mod bus;
pub mod config;
pub mod cursor;
pub mod domain;
pub mod error;
pub mod http;
pub mod ingress;
pub mod outbox;
pub mod services;
pub mod session;
pub mod state;
pub mod storage;
