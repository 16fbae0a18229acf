pub mod access_policy;
pub mod blob_store;
pub mod file_repository;
pub mod file_service;
