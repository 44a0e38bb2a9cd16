//! Many threads constructing and using filesystems at once
//!
//! Uses the blocking API from plain threads, the way a thread pool of
//! synchronous workers would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use ossfs::blocking::OssFileSystem;
use ossfs_e2e::{minio, run};

const WORKERS: usize = 20;
const TASKS: usize = 40;

#[test]
fn test_connect_many() -> Result<()> {
    let (config, bucket) = run(async {
        let server = minio().await;
        let bucket = server.create_bucket("ossfs-connect-many").await?;
        Ok::<_, anyhow::Error>((server.oss_config(), bucket))
    })?;

    let dir = bucket.path("tmp/test");
    OssFileSystem::new(config.clone())?.touch(&bucket.path("tmp/test/a"))?;

    let next = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let (config, dir, next) = (config.clone(), dir.clone(), next.clone());
            thread::spawn(move || -> ossfs::Result<usize> {
                let mut done = 0;
                while next.fetch_add(1, Ordering::SeqCst) < TASKS {
                    let fs = OssFileSystem::new(config.clone())?;
                    let before = fs.ls(&dir)?;
                    thread::sleep(Duration::from_secs(1));
                    assert_eq!(fs.ls(&dir)?, before);
                    done += 1;
                }
                Ok(done)
            })
        })
        .collect();

    let mut completed = 0;
    for worker in workers {
        completed += worker.join().expect("worker panicked")?;
    }
    assert_eq!(completed, TASKS);

    run(bucket.cleanup())
}
