use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use pressa_core::{
    CancelToken, Engine, EngineError, ErrorCode, JobControl, JobId, ProgressSink, Request,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::protocol::{Incoming, Outgoing, ProgressEvent, Reply, parse_line};

/// Forwards job progress to the output stream, tagged with the request id.
struct ChannelProgress {
    id: u64,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl ProgressSink for ChannelProgress {
    fn on_progress(&self, _job: JobId, done: u64, total: u64) {
        let _ = self
            .tx
            .send(Outgoing::Progress(ProgressEvent::new(self.id, done, total)));
    }
}

pub struct Bridge {
    engine: Arc<Engine>,
    inflight: Arc<DashMap<u64, CancelToken>>,
}

impl Bridge {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Serve requests until `input` closes or fails, then wait for in-flight
    /// work and flush every reply. A read error is returned after the drain.
    pub async fn serve<R, W>(&self, input: R, output: W) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(output, rx));
        let mut tasks = JoinSet::new();

        let mut input = BufReader::new(input);
        let mut raw = Vec::new();
        let read = loop {
            raw.clear();
            match input.read_until(b'\n', &mut raw).await {
                Ok(0) => break Ok(()),
                Ok(_) => self.accept(&raw, &tx, &mut tasks),
                Err(e) => break Err(e),
            }
        };
        if let Err(e) = &read {
            tracing::error!(error = %e, "request stream failed");
        }

        tracing::debug!(pending = tasks.len(), "input closed, draining");
        while tasks.join_next().await.is_some() {}
        drop(tx);
        let written = writer.await.map_err(io::Error::other)?;
        read.and(written)
    }

    /// Handle one raw input line: reply to it directly or start its job.
    fn accept(
        &self,
        raw: &[u8],
        tx: &mpsc::UnboundedSender<Outgoing>,
        tasks: &mut JoinSet<()>,
    ) {
        let Ok(line) = std::str::from_utf8(raw) else {
            let e = EngineError::invalid_request("request line is not valid UTF-8");
            let _ = tx.send(Outgoing::Reply(Reply::err(None, e)));
            return;
        };
        if line.trim().is_empty() {
            return;
        }
        match parse_line(line) {
            Err(reply) => {
                tracing::debug!(id = ?reply.id, "rejected request line");
                let _ = tx.send(Outgoing::Reply(reply));
            }
            Ok(Incoming::Cancel { id, target }) => {
                let found = self.cancel(target);
                let result = serde_json::json!({ "target": target, "cancelled": found });
                let _ = tx.send(Outgoing::Reply(Reply::ok(id, result)));
            }
            Ok(Incoming::Call {
                id,
                request,
                progress,
            }) => {
                let token = match self.inflight.entry(id) {
                    Entry::Occupied(_) => {
                        let e = EngineError::invalid_request(format!("request {id} is already in flight"));
                        let _ = tx.send(Outgoing::Reply(Reply::err(Some(id), e)));
                        return;
                    }
                    Entry::Vacant(v) => v.insert(CancelToken::new()).clone(),
                };
                let progress: Option<Arc<dyn ProgressSink>> = if progress {
                    Some(Arc::new(ChannelProgress { id, tx: tx.clone() }))
                } else {
                    None
                };
                let ctl = JobControl {
                    cancel: token,
                    progress,
                };
                tasks.spawn(dispatch(
                    Arc::clone(&self.engine),
                    Arc::clone(&self.inflight),
                    tx.clone(),
                    id,
                    request,
                    ctl,
                ));
            }
        }
    }

    /// Flag the request `target` as cancelled; false when it is not running.
    pub fn cancel(&self, target: u64) -> bool {
        match self.inflight.get(&target) {
            Some(token) => {
                token.cancel();
                tracing::info!(target, "cancel requested");
                true
            }
            None => false,
        }
    }
}

async fn dispatch(
    engine: Arc<Engine>,
    inflight: Arc<DashMap<u64, CancelToken>>,
    tx: mpsc::UnboundedSender<Outgoing>,
    id: u64,
    request: Request,
    ctl: JobControl,
) {
    let command = request.name();
    let joined = tokio::task::spawn_blocking(move || engine.handle_with(request, &ctl)).await;
    inflight.remove(&id);

    let reply = match joined {
        Ok(Ok(resp)) => match serde_json::to_value(&resp) {
            Ok(v) => Reply::ok(id, v),
            Err(e) => Reply::err(Some(id), EngineError::new(ErrorCode::Internal, e.to_string())),
        },
        Ok(Err(e)) => {
            tracing::debug!(id, command, code = %e.code, "request failed");
            Reply::err(Some(id), e)
        }
        Err(e) => {
            tracing::error!(id, command, error = %e, "request task panicked");
            Reply::err(Some(id), EngineError::new(ErrorCode::Internal, "request task failed"))
        }
    };
    let _ = tx.send(Outgoing::Reply(reply));
}

async fn write_loop<W>(mut out: W, mut rx: mpsc::UnboundedReceiver<Outgoing>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let mut line = serde_json::to_vec(&msg).map_err(io::Error::other)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
    }
    out.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressa_core::EngineConfig;
    use serde_json::{Value, json};
    use tokio::io::{DuplexStream, Lines};

    struct Client {
        input: DuplexStream,
        output: Lines<BufReader<DuplexStream>>,
        server: tokio::task::JoinHandle<io::Result<()>>,
    }

    impl Client {
        fn start(root: &std::path::Path) -> Self {
            let mut cfg = EngineConfig::with_root(root.join("store"));
            cfg.block_size = 4 * 1024;
            let bridge = Bridge::new(Arc::new(Engine::open(cfg).unwrap()));
            let (input, server_in) = tokio::io::duplex(64 * 1024);
            let (server_out, output) = tokio::io::duplex(64 * 1024);
            let server = tokio::spawn(async move { bridge.serve(server_in, server_out).await });
            Self {
                input,
                output: BufReader::new(output).lines(),
                server,
            }
        }

        async fn send(&mut self, msg: Value) {
            let mut line = serde_json::to_vec(&msg).unwrap();
            line.push(b'\n');
            self.input.write_all(&line).await.unwrap();
        }

        async fn next(&mut self) -> Value {
            let line = self.output.next_line().await.unwrap().expect("reply line");
            serde_json::from_str(&line).unwrap()
        }

        async fn call(&mut self, msg: Value) -> Value {
            self.send(msg).await;
            self.next().await
        }

        async fn close(mut self) {
            self.input.shutdown().await.unwrap();
            drop(self.input);
            while self.output.next_line().await.unwrap().is_some() {}
            self.server.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn save_compress_decompress_over_the_wire() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("notes.txt");
        std::fs::write(&src, "bridge payload ".repeat(2000)).unwrap();
        let mut c = Client::start(dir.path());

        let saved = c
            .call(json!({"id": 1, "command": "save_file_inside_db", "file": src}))
            .await;
        assert_eq!(saved["id"], 1);
        assert_eq!(saved["ok"], true);
        assert_eq!(saved["result"]["kind"], "saved");
        let file_id = saved["result"]["file_id"].as_str().unwrap().to_string();

        let compressed = c.call(json!({"id": 2, "command": "compress"})).await;
        assert_eq!(compressed["result"]["file_id"], file_id.as_str());
        assert!(compressed["result"]["bytes_saved"].as_i64().unwrap() > 0);

        let analysis = c
            .call(json!({"id": 3, "command": "analyze", "file_id": file_id}))
            .await;
        assert_eq!(analysis["result"]["mime_type"], "text/plain");

        let restored = c
            .call(json!({"id": 4, "command": "decompress", "file_id": file_id}))
            .await;
        assert_eq!(restored["ok"], true);
        assert_eq!(restored["result"]["kind"], "decompressed");

        let stats = c.call(json!({"id": 5, "command": "stats"})).await;
        assert_eq!(stats["result"]["records"], 1);
        assert_eq!(stats["result"]["bytes_saved"], 0);
        c.close().await;
    }

    #[tokio::test]
    async fn errors_carry_codes_and_keep_the_stream_alive() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = Client::start(dir.path());

        c.send(json!("not an object")).await;
        let bad = c.next().await;
        assert_eq!(bad["id"], Value::Null);
        assert_eq!(bad["error"]["code"], "INVALID_REQUEST");

        let missing = c
            .call(json!({"id": 2, "command": "decompress", "file_id": "00000000000000000000000000000000"}))
            .await;
        assert_eq!(missing["ok"], false);
        assert_eq!(missing["error"]["code"], "UNKNOWN_RECORD");

        let none = c.call(json!({"id": 3, "command": "compress"})).await;
        assert_eq!(none["error"]["code"], "UNKNOWN_RECORD");

        let gone = dir.path().join("never-existed");
        let io = c
            .call(json!({"id": 4, "command": "save_file", "file": gone}))
            .await;
        assert_eq!(io["error"]["code"], "IO_ERROR");
        assert!(!io["error"]["message"].as_str().unwrap().contains("never-existed"));

        let cancel = c
            .call(json!({"id": 5, "command": "cancel", "target": 99}))
            .await;
        assert_eq!(cancel["result"]["cancelled"], false);

        let codecs = c.call(json!({"id": 6, "command": "codecs"})).await;
        assert_eq!(codecs["result"]["codecs"].as_array().unwrap().len(), 4);
        c.close().await;
    }

    #[tokio::test]
    async fn progress_events_precede_the_reply() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("big.txt");
        std::fs::write(&src, "progress ".repeat(20_000)).unwrap();
        let mut c = Client::start(dir.path());

        let saved = c
            .call(json!({"id": 1, "command": "save_file", "file": src}))
            .await;
        let file_id = saved["result"]["file_id"].as_str().unwrap().to_string();

        c.send(json!({"id": 2, "command": "compress", "file_id": file_id, "progress": true}))
            .await;
        let mut events = 0;
        let reply = loop {
            let msg = c.next().await;
            if msg["event"] == "progress" {
                assert_eq!(msg["id"], 2);
                events += 1;
            } else {
                break msg;
            }
        };
        assert!(events > 0);
        assert_eq!(reply["ok"], true);
        c.close().await;
    }

    #[tokio::test]
    async fn non_utf8_line_is_rejected_and_serving_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = Client::start(dir.path());

        c.input.write_all(b"{\"id\":1,\"command\":\"st\xffats\"}\n").await.unwrap();
        let bad = c.next().await;
        assert_eq!(bad["id"], Value::Null);
        assert_eq!(bad["ok"], false);
        assert_eq!(bad["error"]["code"], "INVALID_REQUEST");

        let stats = c.call(json!({"id": 2, "command": "stats"})).await;
        assert_eq!(stats["ok"], true);
        c.close().await;
    }

    /// Yields its bytes once, then fails every read.
    struct BrokenInput(Option<Vec<u8>>);

    impl AsyncRead for BrokenInput {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(match self.0.take() {
                Some(bytes) => {
                    buf.put_slice(&bytes);
                    Ok(())
                }
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin went away")),
            })
        }
    }

    #[tokio::test]
    async fn read_error_still_flushes_in_flight_replies() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::new(Arc::new(
            Engine::open(EngineConfig::with_root(dir.path().join("store"))).unwrap(),
        ));
        let input = BrokenInput(Some(b"{\"id\":1,\"command\":\"stats\"}\n".to_vec()));
        let (server_out, output) = tokio::io::duplex(64 * 1024);

        let err = bridge.serve(input, server_out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let mut lines = BufReader::new(output).lines();
        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["ok"], true);
    }

    #[tokio::test]
    async fn cancel_flags_running_request() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::with_root(dir.path().join("store"));
        let bridge = Bridge::new(Arc::new(Engine::open(cfg).unwrap()));
        let token = CancelToken::new();
        bridge.inflight.insert(11, token.clone());

        assert!(bridge.cancel(11));
        assert!(token.is_cancelled());
        assert!(!bridge.cancel(12));
    }
}
