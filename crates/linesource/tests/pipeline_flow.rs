//! End-to-end pipeline behavior over real transports.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use linesource::{DrainOutcome, ParsePipeline, PipeLineSource};

#[cfg(unix)]
use linesource::{LineSource, SocketLineSource};

fn collector(seen: Arc<Mutex<Vec<String>>>) -> impl FnMut(&str) + Send + 'static {
    move |line: &str| seen.lock().unwrap().push(line.to_string())
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn socket_transport_end_to_end() {
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e2e.sock");

    let mut source = SocketLineSource::bind(&path).unwrap();
    // The listener must be accepting before the writer exists.
    source.ready().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle = ParsePipeline::new().spawn(source, collector(Arc::clone(&seen)));
    let stats = handle.stats();

    let mut stream = UnixStream::connect(&path).await.unwrap();
    for block in 0..100 {
        let payload = format!(
            "frame={block}\ntotal_size={}\nprogress=continue\n",
            block * 1000
        );
        stream.write_all(payload.as_bytes()).await.unwrap();
    }
    stream.flush().await.unwrap();
    drop(stream);

    let outcome = handle.drain(Duration::from_secs(5)).await;
    assert_eq!(outcome, DrainOutcome::Clean);

    // 3 lines per block, nothing lost at this throughput.
    assert_eq!(seen.lock().unwrap().len(), 300);
    let snap = stats.snapshot();
    assert_eq!(snap.lines_read, 300);
    assert_eq!(snap.lines_parsed + snap.lines_dropped, 300);
    assert!(!path.exists(), "socket file cleaned up after EOF");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_hundred_pipelines_terminate_cleanly() {
    let mut handles = Vec::new();
    for i in 0..100 {
        let data = format!("line-a-{i}\nline-b-{i}\n").into_bytes();
        let source = PipeLineSource::new(std::io::Cursor::new(data));
        handles.push(ParsePipeline::new().spawn(source, |_line: &str| {}));
    }

    for handle in handles {
        let stats = handle.stats();
        let outcome = handle.drain(Duration::from_secs(5)).await;
        assert_eq!(outcome, DrainOutcome::Clean);

        let snap = stats.snapshot();
        assert_eq!(snap.lines_read, 2);
        assert_eq!(snap.lines_parsed + snap.lines_dropped, snap.lines_read);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn attach_after_spawn_loses_nothing() {
    let (source, attach) = PipeLineSource::detached();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle = ParsePipeline::new().spawn(source, collector(Arc::clone(&seen)));

    // The child materializes strictly after the pipeline is running.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        attach.attach(std::io::Cursor::new(b"one\ntwo\nthree\n".to_vec()));
    });

    let outcome = handle.drain(Duration::from_secs(5)).await;
    assert_eq!(outcome, DrainOutcome::Clean);
    assert_eq!(*seen.lock().unwrap(), vec!["one", "two", "three"]);
}
