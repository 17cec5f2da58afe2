fn main() {
    println!("Run `cargo test -p end-to-end` to execute the client/server integration tests.");
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use chunkferry_client::{
        ChunkTransport, ClientError, SchedulerConfig, TransportFuture, UploadScheduler,
    };
    use chunkferry_protocol::{
        CHUNK_SIZE, FinalizeRequest, FinalizeResponse, InitUploadRequest, InitUploadResponse,
        UploadChunkRequest, UploadChunkResponse,
    };
    use chunkferry_server::{ChunkOutcome, MemoryLedger, UploadService};
    use chunkferry_transfer::ChunkReader;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    // -----------------------------------------------------------------------
    // In-process transport
    // -----------------------------------------------------------------------

    /// Transport that calls the service directly, with optional injected
    /// failures for the first N chunk requests.
    struct Loopback {
        service: Arc<UploadService>,
        fail_first: Mutex<u32>,
        chunk_calls: Mutex<Vec<u32>>,
    }

    impl Loopback {
        fn new(service: Arc<UploadService>) -> Self {
            Self {
                service,
                fail_first: Mutex::new(0),
                chunk_calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_first(service: Arc<UploadService>, failures: u32) -> Self {
            let transport = Self::new(service);
            *transport.fail_first.lock().unwrap() = failures;
            transport
        }

        fn calls_for(&self, index: u32) -> usize {
            self.chunk_calls
                .lock()
                .unwrap()
                .iter()
                .filter(|&&i| i == index)
                .count()
        }
    }

    impl ChunkTransport for Loopback {
        fn init(&self, req: &InitUploadRequest) -> TransportFuture<'_, InitUploadResponse> {
            let req = req.clone();
            Box::pin(async move {
                self.service
                    .init(&req)
                    .await
                    .map_err(|e| ClientError::Rejected(e.to_string()))
            })
        }

        fn upload_chunk(
            &self,
            req: &UploadChunkRequest,
            data: &[u8],
        ) -> TransportFuture<'_, UploadChunkResponse> {
            let req = req.clone();
            let data = data.to_vec();
            Box::pin(async move {
                self.chunk_calls.lock().unwrap().push(req.chunk_index);

                {
                    let mut remaining = self.fail_first.lock().unwrap();
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(ClientError::Transport("injected network failure".into()));
                    }
                }

                let outcome = self
                    .service
                    .upload_chunk(&req.upload_id, req.chunk_index, &data, &req.checksum)
                    .await
                    .map_err(|e| ClientError::Rejected(e.to_string()))?;
                Ok(UploadChunkResponse {
                    already_received: outcome == ChunkOutcome::AlreadyReceived,
                })
            })
        }

        fn finalize(&self, req: &FinalizeRequest) -> TransportFuture<'_, FinalizeResponse> {
            let req = req.clone();
            Box::pin(async move {
                self.service
                    .finalize(&req.upload_id)
                    .await
                    .map_err(|e| ClientError::Rejected(e.to_string()))
            })
        }
    }

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    /// Builds a stored (uncompressed) container with the given entries.
    fn stored_container(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for (name, data) in entries {
            let local_offset = out.len() as u32;
            out.extend_from_slice(&[0x50, 0x4B, 0x03, 0x04]);
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&[0u8; 8]); // flags, method, time, date
            out.extend_from_slice(&0u32.to_le_bytes()); // crc32
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(data);

            central.extend_from_slice(&[0x50, 0x4B, 0x01, 0x02]);
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&[0u8; 8]); // flags, method, time, date
            central.extend_from_slice(&0u32.to_le_bytes()); // crc32
            central.extend_from_slice(&(data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&[0u8; 8]); // extra, comment, disk, attrs
            central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            central.extend_from_slice(&local_offset.to_le_bytes());
            central.extend_from_slice(name.as_bytes());
        }

        let cd_offset = out.len() as u32;
        let cd_size = central.len() as u32;
        out.extend_from_slice(&central);

        out.extend_from_slice(&[0x50, 0x4B, 0x05, 0x06]);
        out.extend_from_slice(&[0u8; 4]); // disk numbers
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment len

        out
    }

    /// Container with a single entry padded so the whole file is exactly
    /// `total_size` bytes.
    fn container_of_size(entry_name: &str, total_size: usize) -> Vec<u8> {
        let overhead = stored_container(&[(entry_name, b"")]).len();
        let payload = vec![0xA5u8; total_size - overhead];
        let data = stored_container(&[(entry_name, &payload)]);
        assert_eq!(data.len(), total_size);
        data
    }

    fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    struct Harness {
        _dir: TempDir,
        service: Arc<UploadService>,
        source: PathBuf,
        data: Vec<u8>,
        chunk_size: u64,
    }

    fn harness(data: Vec<u8>, chunk_size: u64) -> Harness {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir(&uploads).unwrap();
        let service = Arc::new(UploadService::new(
            Arc::new(MemoryLedger::new()),
            uploads,
            chunk_size,
        ));
        let source = write_source(dir.path(), "source.zip", &data);
        Harness {
            _dir: dir,
            service,
            source,
            data,
            chunk_size,
        }
    }

    fn scheduler(h: &Harness, transport: Arc<Loopback>, config: SchedulerConfig) -> UploadScheduler {
        let reader = Arc::new(ChunkReader::new(&h.source, h.chunk_size).unwrap());
        UploadScheduler::new(transport, reader, "source.zip", config)
    }

    fn config(chunk_size: u64) -> SchedulerConfig {
        SchedulerConfig {
            chunk_size,
            max_concurrent: 3,
            max_retries: 3,
            base_delay: std::time::Duration::from_millis(5),
        }
    }

    // -----------------------------------------------------------------------
    // Service-level properties
    // -----------------------------------------------------------------------

    /// 12 MB file, 5 MB chunks -> 3 chunks (5 MB, 5 MB, 2 MB) uploaded in
    /// the order 2, 0, 1.
    #[tokio::test]
    async fn twelve_megabyte_out_of_order_scenario() {
        let total = 12 * 1024 * 1024;
        let data = container_of_size("payload.bin", total);
        let h = harness(data, CHUNK_SIZE);

        let init = h
            .service
            .init(&InitUploadRequest {
                filename: "source.zip".into(),
                total_size: total as u64,
                total_chunks: 3,
            })
            .await
            .unwrap();

        for index in [2u32, 0, 1] {
            let start = index as usize * CHUNK_SIZE as usize;
            let end = (start + CHUNK_SIZE as usize).min(total);
            h.service
                .upload_chunk(&init.upload_id, index, &h.data[start..end], "")
                .await
                .unwrap();
        }

        let resp = h.service.finalize(&init.upload_id).await.unwrap();
        assert_eq!(resp.hash, sha256_hex(&h.data));
        assert_eq!(resp.entries, vec!["payload.bin"]);

        let assembled = std::fs::read(h.service.destination_path(&init.upload_id)).unwrap();
        assert_eq!(assembled, h.data);
    }

    #[tokio::test]
    async fn concurrent_finalize_has_a_single_winner() {
        let data = stored_container(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        let h = harness(data.clone(), 16);

        let total_chunks = (data.len() as u64).div_ceil(16) as u32;
        let init = h
            .service
            .init(&InitUploadRequest {
                filename: "source.zip".into(),
                total_size: data.len() as u64,
                total_chunks,
            })
            .await
            .unwrap();

        for (index, chunk) in data.chunks(16).enumerate() {
            h.service
                .upload_chunk(&init.upload_id, index as u32, chunk, "")
                .await
                .unwrap();
        }

        let first = {
            let service = Arc::clone(&h.service);
            let id = init.upload_id.clone();
            tokio::spawn(async move { service.finalize(&id).await.unwrap() })
        };
        let second = {
            let service = Arc::clone(&h.service);
            let id = init.upload_id.clone();
            tokio::spawn(async move { service.finalize(&id).await.unwrap() })
        };

        let (a, b) = (first.await.unwrap(), second.await.unwrap());
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash, sha256_hex(&data));
    }

    // -----------------------------------------------------------------------
    // Scheduler-over-wire properties
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn scheduler_uploads_and_finalizes_over_loopback() {
        let inner = vec![0x5Au8; 100_000];
        let data = stored_container(&[("blob.bin", &inner)]);
        let h = harness(data.clone(), 16 * 1024);

        let transport = Arc::new(Loopback::new(Arc::clone(&h.service)));
        let sched = scheduler(&h, Arc::clone(&transport), config(16 * 1024));

        let init = sched.init().await.unwrap();
        sched.submit().await.unwrap();
        sched.drain().await;
        assert!(sched.is_complete());

        let resp = sched.finalize().await.unwrap();
        assert_eq!(resp.hash, sha256_hex(&data));
        assert_eq!(resp.entries, vec!["blob.bin"]);

        let assembled = std::fs::read(h.service.destination_path(&init.upload_id)).unwrap();
        assert_eq!(assembled, data);
    }

    #[tokio::test]
    async fn second_init_reflects_interleaved_progress() {
        let data = stored_container(&[("x", b"0123456789abcdef")]);
        let h = harness(data.clone(), 16);
        let transport = Loopback::new(Arc::clone(&h.service));

        let req = InitUploadRequest {
            filename: "source.zip".into(),
            total_size: data.len() as u64,
            total_chunks: (data.len() as u64).div_ceil(16) as u32,
        };
        let first = transport.init(&req).await.unwrap();
        assert!(first.uploaded_chunks.is_empty());

        transport
            .upload_chunk(
                &UploadChunkRequest {
                    upload_id: first.upload_id.clone(),
                    chunk_index: 2,
                    checksum: String::new(),
                },
                &data[32..48],
            )
            .await
            .unwrap();

        let second = transport.init(&req).await.unwrap();
        assert_eq!(second.upload_id, first.upload_id);
        assert_eq!(second.uploaded_chunks, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn flaky_transport_recovers_with_retries() {
        let data = stored_container(&[("f", &[7u8; 2000])]);
        let h = harness(data.clone(), 256);

        // First three chunk requests fail at the network layer.
        let transport = Arc::new(Loopback::failing_first(Arc::clone(&h.service), 3));
        let sched = scheduler(&h, Arc::clone(&transport), config(256));

        sched.init().await.unwrap();
        sched.submit().await.unwrap();
        sched.drain().await;
        assert!(sched.is_complete());

        let resp = sched.finalize().await.unwrap();
        assert_eq!(resp.hash, sha256_hex(&data));
    }

    /// A fresh client (new scheduler over the same session) resumes from the
    /// server's receipt set and only transfers the missing chunks.
    #[tokio::test]
    async fn restarted_client_resumes_without_resending() {
        let data = stored_container(&[("big", &[3u8; 4000])]);
        let h = harness(data.clone(), 512);
        let total_chunks = (data.len() as u64).div_ceil(512) as u32;

        // First client run: upload only a prefix of the chunks directly.
        let init = h
            .service
            .init(&InitUploadRequest {
                filename: "source.zip".into(),
                total_size: data.len() as u64,
                total_chunks,
            })
            .await
            .unwrap();
        for index in [0u32, 3] {
            let start = index as usize * 512;
            let end = (start + 512).min(data.len());
            h.service
                .upload_chunk(&init.upload_id, index, &data[start..end], "")
                .await
                .unwrap();
        }

        // Second client run.
        let transport = Arc::new(Loopback::new(Arc::clone(&h.service)));
        let sched = scheduler(&h, Arc::clone(&transport), config(512));
        let resumed = sched.init().await.unwrap();
        assert_eq!(resumed.upload_id, init.upload_id);
        assert_eq!(resumed.uploaded_chunks, vec![0, 3]);

        sched.submit().await.unwrap();
        sched.drain().await;
        assert!(sched.is_complete());

        // The already-received indices never went over the wire again.
        assert_eq!(transport.calls_for(0), 0);
        assert_eq!(transport.calls_for(3), 0);

        let resp = sched.finalize().await.unwrap();
        assert_eq!(resp.hash, sha256_hex(&data));
        let assembled = std::fs::read(h.service.destination_path(&init.upload_id)).unwrap();
        assert_eq!(assembled, data);
    }

    #[tokio::test]
    async fn non_container_upload_rejected_at_finalize() {
        let data = vec![0x42u8; 1000]; // no recognizable signature
        let h = harness(data.clone(), 256);

        let transport = Arc::new(Loopback::new(Arc::clone(&h.service)));
        let sched = scheduler(&h, transport, config(256));

        sched.init().await.unwrap();
        sched.submit().await.unwrap();
        sched.drain().await;
        assert!(sched.is_complete());

        let err = sched.finalize().await.unwrap_err();
        match err {
            ClientError::Rejected(msg) => assert!(msg.contains("invalid container")),
            other => panic!("unexpected error: {other}"),
        }

        // The session survives the failed finalize.
        let err = sched.finalize().await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(_)));
    }
}
