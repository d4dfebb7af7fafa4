pub mod api;
pub mod config;
pub mod orm;
pub mod token;
pub mod url_repo;
pub mod url_service;
