//! End-to-end tests of worker job sessions over real sockets

use distort_core::checkpoint::{DistortionJobEntry, JobKey, JobStateStore, JobStatus};
use distort_core::client::JobClient;
use distort_core::protocol::frame::INVALID;
use distort_core::protocol::payload::parse_offset;
use distort_core::protocol::{
    FrameTransport, FrameType, JobRequest, WireFrame, WireProfile, WorkerClass, WorkerEndpoint,
    JOB_PROFILE,
};
use distort_core::runtime::ShutdownSignal;
use distort_core::storage::{Digest, StrideDistorter, DIGEST_ERROR};
use distort_core::worker::{WorkerConfig, WorkerServer};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Deterministic 32-hex digest that needs no external tool
struct HashDigest;

fn hash_hex(data: &[u8]) -> String {
    let mut halves = [0u64; 2];
    for (salt, half) in halves.iter_mut().enumerate() {
        let mut hasher = DefaultHasher::new();
        salt.hash(&mut hasher);
        data.hash(&mut hasher);
        *half = hasher.finish();
    }
    format!("{:016x}{:016x}", halves[0], halves[1])
}

impl Digest for HashDigest {
    fn digest(&self, path: &Path) -> String {
        match std::fs::read(path) {
            Ok(data) => hash_hex(&data),
            Err(_) => DIGEST_ERROR.to_string(),
        }
    }
}

struct Worker {
    dir: TempDir,
    store_path: PathBuf,
    endpoint: WorkerEndpoint,
    server: Arc<WorkerServer>,
    shutdown: ShutdownSignal,
    handle: JoinHandle<distort_core::Result<()>>,
}

impl Worker {
    /// Start a standalone worker; `seed` runs against the store first
    async fn start(seed: impl FnOnce(&Path, &JobStateStore)) -> Self {
        let dir = TempDir::new().unwrap();
        let store_path = dir.path().join("jobs.tbl");
        let store = JobStateStore::open(&store_path, 16).unwrap();
        seed(dir.path(), &store);

        let config = WorkerConfig {
            class: WorkerClass::Text,
            listen_addr: "127.0.0.1:0".into(),
            advertise_ip: "127.0.0.1".into(),
            registrar_addr: None,
            directory: dir.path().to_path_buf(),
            profile: WireProfile::Binary,
            queue_capacity: 32,
            store_path: store_path.clone(),
            store_capacity: 16,
        };
        let server = Arc::new(
            WorkerServer::bind(config, Arc::new(HashDigest), Arc::new(StrideDistorter))
                .await
                .unwrap(),
        );
        let endpoint = WorkerEndpoint {
            ip: "127.0.0.1".into(),
            port: server.local_addr().unwrap().port(),
        };

        let shutdown = ShutdownSignal::new();
        let handle = {
            let server = server.clone();
            let signal = shutdown.clone();
            tokio::spawn(async move { server.run(signal).await })
        };

        Self {
            dir,
            store_path,
            endpoint,
            server,
            shutdown,
            handle,
        }
    }

    fn input(&self, name: &str, data: &[u8]) -> PathBuf {
        let inputs = self.dir.path().join("inputs");
        std::fs::create_dir_all(&inputs).unwrap();
        let path = inputs.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn raw(&self) -> FrameTransport<TcpStream> {
        FrameTransport::connect(&self.endpoint.socket_addr(), JOB_PROFILE)
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();
    }
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}

#[tokio::test]
async fn e2e_job_round_trip() {
    let worker = Worker::start(|_, _| {}).await;
    // more chunks than fit in one upload window
    let data = sample(20 * 247 + 100);
    let input = worker.input("notes.txt", &data);
    let output = worker.dir.path().join("out.txt");

    let mut client = JobClient::connect(&worker.endpoint, Arc::new(HashDigest))
        .await
        .unwrap();
    let outcome = client.submit("alice", &input, 3, &output).await.unwrap();
    client.disconnect().await.unwrap();

    let expected: Vec<u8> = data.iter().step_by(3).copied().collect();
    assert!(outcome.valid);
    assert_eq!(outcome.resumed_from, 0);
    assert_eq!(outcome.file_size, expected.len() as u64);
    assert_eq!(std::fs::read(&output).unwrap(), expected);

    let store = JobStateStore::open(&worker.store_path, 16).unwrap();
    let entry = store
        .get(&JobKey::new("notes.txt", "alice"))
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, JobStatus::Done);
    assert_eq!(entry.current_byte, data.len() as u64);
    assert_eq!(worker.server.state().jobs_completed(), 1);
    assert!(worker.dir.path().join("alice").join("notes.txt.distorted").exists());

    worker.stop().await;
}

#[tokio::test]
async fn e2e_upload_resumes_from_recorded_progress() {
    let data = sample(3_000);
    let md5 = hash_hex(&data);
    let seeded = data.clone();

    let worker = Worker::start(move |dir, store| {
        std::fs::create_dir_all(dir.join("bob")).unwrap();
        std::fs::write(dir.join("bob").join("story.txt.part"), &seeded[..1_000]).unwrap();
        store
            .upsert(DistortionJobEntry {
                file_name: "story.txt".into(),
                user_name: "bob".into(),
                md5: md5.clone(),
                current_byte: 1_000,
                factor: 2,
                client: 1,
                status: JobStatus::InProgress,
            })
            .unwrap();
    })
    .await;

    let input = worker.input("story.txt", &data);
    let output = worker.dir.path().join("story.out");
    let mut client = JobClient::connect(&worker.endpoint, Arc::new(HashDigest))
        .await
        .unwrap();
    let outcome = client.submit("bob", &input, 2, &output).await.unwrap();

    assert_eq!(outcome.resumed_from, 1_000);
    assert!(outcome.valid);
    let expected: Vec<u8> = data.iter().step_by(2).copied().collect();
    assert_eq!(std::fs::read(&output).unwrap(), expected);

    // a finished job starts over
    let outcome = client.submit("bob", &input, 4, &output).await.unwrap();
    assert_eq!(outcome.resumed_from, 0);
    client.disconnect().await.unwrap();

    worker.stop().await;
}

#[tokio::test]
async fn e2e_digest_mismatch_resets_job() {
    let worker = Worker::start(|_, _| {}).await;
    let data = sample(600);
    let mut transport = worker.raw().await;

    let request = JobRequest {
        user_name: "carol".into(),
        file_name: "bad.txt".into(),
        file_size: data.len() as u64,
        md5: "0123456789abcdef0123456789abcdef".into(),
        factor: 2,
    };
    let reply = transport
        .request(&WireFrame::new(FrameType::JobRequest, request.to_payload().unwrap()))
        .await
        .unwrap();
    assert_eq!(parse_offset(&reply.payload).unwrap(), 0);

    let mut last = 0;
    for chunk in data.chunks(247) {
        let ack = transport
            .request(&WireFrame::new(FrameType::JobData, chunk.to_vec()))
            .await
            .unwrap();
        assert!(ack.is(FrameType::JobRequest));
        last = parse_offset(&ack.payload).unwrap();
    }
    assert_eq!(last, data.len() as u64);

    let verdict = transport.receive_frame().await.unwrap().unwrap();
    assert!(verdict.is(FrameType::JobValidation));
    assert!(verdict.carries(INVALID));

    let store = JobStateStore::open(&worker.store_path, 16).unwrap();
    let entry = store.get(&JobKey::new("bad.txt", "carol")).unwrap().unwrap();
    assert_eq!(entry.current_byte, 0);
    assert_eq!(entry.status, JobStatus::Pending);
    assert!(!worker.dir.path().join("carol").join("bad.txt.part").exists());

    drop(transport);
    worker.stop().await;
}

/// Send a job request and return the offset the worker continues from
async fn open_job(transport: &mut FrameTransport<TcpStream>, request: &JobRequest) -> u64 {
    let reply = transport
        .request(&WireFrame::new(FrameType::JobRequest, request.to_payload().unwrap()))
        .await
        .unwrap();
    assert!(reply.is(FrameType::JobRequest));
    parse_offset(&reply.payload).unwrap()
}

async fn send_chunks(transport: &mut FrameTransport<TcpStream>, data: &[u8]) -> u64 {
    let mut last = 0;
    for chunk in data.chunks(200) {
        let ack = transport
            .request(&WireFrame::new(FrameType::JobData, chunk.to_vec()))
            .await
            .unwrap();
        assert!(ack.is(FrameType::JobRequest));
        last = parse_offset(&ack.payload).unwrap();
    }
    last
}

#[tokio::test]
async fn e2e_jobs_with_similar_names_keep_separate_files() {
    let worker = Worker::start(|_, _| {}).await;
    let first_data = sample(600);
    let second_data: Vec<u8> = sample(500).into_iter().rev().collect();

    // "a_b" + "c.txt" and "a" + "b_c.txt" share a joined name
    let first = JobRequest {
        user_name: "a_b".into(),
        file_name: "c.txt".into(),
        file_size: first_data.len() as u64,
        md5: hash_hex(&first_data),
        factor: 1,
    };
    let second = JobRequest {
        user_name: "a".into(),
        file_name: "b_c.txt".into(),
        file_size: second_data.len() as u64,
        md5: hash_hex(&second_data),
        factor: 1,
    };

    let mut first_conn = worker.raw().await;
    assert_eq!(open_job(&mut first_conn, &first).await, 0);
    assert_eq!(send_chunks(&mut first_conn, &first_data[..400]).await, 400);

    let mut second_conn = worker.raw().await;
    assert_eq!(open_job(&mut second_conn, &second).await, 0);
    assert_eq!(send_chunks(&mut second_conn, &second_data[..200]).await, 200);

    assert_eq!(send_chunks(&mut first_conn, &first_data[400..]).await, 600);
    let metadata = first_conn.receive_frame().await.unwrap().unwrap();
    assert!(metadata.is(FrameType::JobMetadata), "got {:?}", metadata);

    assert!(worker.dir.path().join("a_b").join("c.txt.distorted").exists());
    assert_eq!(
        std::fs::read(worker.dir.path().join("a").join("b_c.txt.part")).unwrap(),
        &second_data[..200]
    );

    drop(first_conn);
    drop(second_conn);
    worker.stop().await;
}

#[tokio::test]
async fn e2e_corrupted_chunk_desyncs_until_rerequest() {
    let worker = Worker::start(|_, _| {}).await;
    let data = sample(900);
    let mut transport = worker.raw().await;

    let request = JobRequest {
        user_name: "dave".into(),
        file_name: "log.txt".into(),
        file_size: data.len() as u64,
        md5: hash_hex(&data),
        factor: 1,
    };
    let job_request = WireFrame::new(FrameType::JobRequest, request.to_payload().unwrap());
    transport.request(&job_request).await.unwrap();

    let ack = transport
        .request(&WireFrame::new(FrameType::JobData, data[..300].to_vec()))
        .await
        .unwrap();
    assert_eq!(parse_offset(&ack.payload).unwrap(), 300);

    let mut corrupted = WireFrame::new(FrameType::JobData, data[300..600].to_vec());
    corrupted.checksum = corrupted.checksum.wrapping_add(1);
    let reply = transport.request(&corrupted).await.unwrap();
    assert!(reply.is(FrameType::Error));

    // later data is refused while desynced
    let reply = transport
        .request(&WireFrame::new(FrameType::JobData, data[600..].to_vec()))
        .await
        .unwrap();
    assert!(reply.is(FrameType::Error));

    let reply = transport.request(&job_request).await.unwrap();
    assert_eq!(parse_offset(&reply.payload).unwrap(), 300);

    drop(transport);
    worker.stop().await;
}

#[tokio::test]
async fn e2e_path_escaping_names_are_refused() {
    let worker = Worker::start(|_, _| {}).await;
    let mut transport = worker.raw().await;

    let request = JobRequest {
        user_name: "..".into(),
        file_name: "passwd.txt".into(),
        file_size: 1,
        md5: "0123456789abcdef0123456789abcdef".into(),
        factor: 1,
    };
    let reply = transport
        .request(&WireFrame::new(FrameType::JobRequest, request.to_payload().unwrap()))
        .await
        .unwrap();
    assert!(reply.is(FrameType::Error));

    let status = transport
        .request(&WireFrame::empty(FrameType::CheckStatus))
        .await
        .unwrap();
    assert!(status.is(FrameType::CheckStatus));

    drop(transport);
    worker.stop().await;
}
