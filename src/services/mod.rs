pub mod hasher;
pub mod ingest;
pub mod memory_store;
pub mod metadata_store;
pub mod multipart;
pub mod object_store;
pub mod resolver;
pub mod s3_store;
pub mod strategy;
