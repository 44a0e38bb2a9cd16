//! End-to-end tests for ossfs against MinIO
//!
//! MinIO stands in for OSS: both speak the S3-compatible API that ossfs
//! talks. Every test gets its own bucket on one shared server.
//!
//! All tests run on one shared runtime through [`run`]. The harness keeps its
//! own SDK client (for checking buckets directly) in the shared server
//! handle, and that client must not outlive the runtime that opened its
//! connections, so per-test runtimes (`#[tokio::test]`) are not used here.
//! ossfs itself drives its clients on an internal runtime and has no such
//! restriction.
//!
//! ```ignore
//! use ossfs_e2e::{minio, run};
//!
//! #[test]
//! fn my_test() -> anyhow::Result<()> {
//!     run(async {
//!         let server = minio().await;
//!         let bucket = server.create_bucket("my-test").await?;
//!         // ... test using server.oss_config() and bucket.path("...") ...
//!         bucket.cleanup().await
//!     })
//! }
//! ```

pub mod minio;

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::Runtime;
use tokio::sync::OnceCell;
use tracing_subscriber::EnvFilter;

pub use minio::{MinioServer, TestBucket};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static MINIO: OnceCell<MinioServer> = OnceCell::const_new();

/// Initialize logging for tests (repeated calls are no-ops)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Run a test body on the shared runtime
pub fn run<F: Future>(future: F) -> F::Output {
    init_logging();
    RUNTIME
        .get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .expect("Failed to build e2e runtime")
        })
        .block_on(future)
}

/// The shared MinIO server, started on first use
pub async fn minio() -> &'static MinioServer {
    MINIO
        .get_or_init(|| async {
            MinioServer::start()
                .await
                .expect("Failed to start MinIO")
        })
        .await
}

/// `size` random bytes
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut data = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut data);
    data
}
