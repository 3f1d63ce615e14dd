//! Postgres persistence (`repositories::Database`) and the content-addressed
//! artifact storage operators (`storage_operator`). `docflow-engine` and
//! `docflow-api` depend on this crate for every durable read/write.

pub mod models;
pub mod repositories;
pub mod s3_client;
pub mod storage_operator;

pub use repositories::{Database, RunGroupCounts};
pub use s3_client::AwsS3Client;
pub use storage_operator::{
    get_storage_operator, DbStorageOperator, FileStorageOperator, ObjectStoreClient, S3StorageOperator,
    StorageOperator,
};
