//! Zero Common Library
//!
//! Shared backend building blocks for application services.
//!
//! # Features
//!
//! - **Pluggable uploads**: one [`Uploader`](upload::Uploader) interface over
//!   a local directory or any S3-compatible object store (Aliyun OSS, MinIO,
//!   AWS)
//! - **Chunked uploads**: multipart sessions on both backends, plus resumable
//!   partial records on local disk
//! - **Helpers**: JWT minting, pagination arithmetic, mobile number
//!   validation, captcha answer storage, database DSN formatting
//!
//! # Example
//!
//! ```no_run
//! use zero_common::{config::AppConfig, upload::build_uploader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load("config.yaml")?;
//!     let uploader = build_uploader(&config.storage).await?;
//!
//!     let mut body: &[u8] = b"hello";
//!     uploader.upload_file("docs/hello.txt", &mut body).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod captcha;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pagination;
pub mod store;
pub mod upload;
pub mod validate;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::CodeError;
pub use upload::{build_uploader, Uploader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
