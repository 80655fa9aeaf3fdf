//! One live MCP server subprocess and its initialized connection.
//!
//! `Session::open` spawns the server, performs the `initialize` handshake and
//! records what the server declared. `Session::close` must run on every exit
//! path; the child is also spawned with `kill_on_drop` so a dropped session
//! never outlives its owner.

use std::process::Stdio;
use std::time::Duration;

use rust_mcp_schema::{
    ClientCapabilities, Implementation, InitializeRequestParams, LATEST_PROTOCOL_VERSION,
    PaginatedRequestParams, ServerCapabilities,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use super::enumerator::{DefinitionSource, Page};
use super::jsonrpc::Connection;
use super::types::{Capabilities, Category, LaunchSpec, ServerInfo};
use crate::error::{ConnectionError, RpcFailure};

pub const CLIENT_NAME: &str = "mcp-tokenmeter";

/// Timeouts governing a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    /// How long `close` waits for a voluntary exit before killing.
    pub shutdown_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

pub struct Session {
    conn: Connection,
    child: Option<Child>,
    stderr_task: Option<JoinHandle<()>>,
    server: ServerInfo,
    capabilities: Capabilities,
    protocol_version: String,
    options: SessionOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeReply {
    #[serde(default)]
    protocol_version: Option<String>,
    #[serde(default)]
    capabilities: Value,
    #[serde(default)]
    server_info: Option<ReplyServerInfo>,
}

#[derive(Debug, Deserialize)]
struct ReplyServerInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: Option<String>,
}

struct Handshake {
    server: ServerInfo,
    capabilities: Capabilities,
    protocol_version: String,
}

impl Session {
    /// Spawn `spec` and complete the handshake. On failure the child has
    /// already been terminated.
    pub async fn open(spec: &LaunchSpec, options: &SessionOptions) -> Result<Self, ConnectionError> {
        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConnectionError::Spawn {
                command: spec.command.clone(),
                source,
            })?;
        tracing::info!("spawned `{}` (pid {:?})", spec.display(), child.id());

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            (None, _) => {
                terminate(&mut child, Duration::ZERO).await;
                return Err(ConnectionError::MissingPipe("stdin"));
            }
            (_, None) => {
                terminate(&mut child, Duration::ZERO).await;
                return Err(ConnectionError::MissingPipe("stdout"));
            }
        };
        let stderr_task = child.stderr.take().map(forward_stderr);

        let mut conn = Connection::new(stdout, stdin);
        match handshake(&mut conn, options).await {
            Ok(done) => Ok(Self::assemble(conn, Some(child), stderr_task, done, options)),
            Err(err) => {
                drop(conn);
                terminate(&mut child, Duration::ZERO).await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                Err(err)
            }
        }
    }

    /// Handshake over an already connected stream pair. Nothing is spawned
    /// and `close` only drops the streams.
    pub async fn over<R, W>(
        reader: R,
        writer: W,
        options: &SessionOptions,
    ) -> Result<Self, ConnectionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut conn = Connection::new(reader, writer);
        let done = handshake(&mut conn, options).await?;
        Ok(Self::assemble(conn, None, None, done, options))
    }

    fn assemble(
        conn: Connection,
        child: Option<Child>,
        stderr_task: Option<JoinHandle<()>>,
        done: Handshake,
        options: &SessionOptions,
    ) -> Self {
        tracing::info!(
            "connected to {} {} (protocol {})",
            done.server.name,
            done.server.version.as_deref().unwrap_or("(no version)"),
            done.protocol_version
        );
        Self {
            conn,
            child,
            stderr_task,
            server: done.server,
            capabilities: done.capabilities,
            protocol_version: done.protocol_version,
            options: options.clone(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Close stdin, give the server a moment to exit, then kill it.
    pub async fn close(self) {
        let Session {
            conn,
            child,
            stderr_task,
            options,
            ..
        } = self;
        drop(conn);
        if let Some(mut child) = child {
            terminate(&mut child, options.shutdown_grace).await;
        }
        if let Some(task) = stderr_task {
            // stderr hits EOF once the child is gone
            if tokio::time::timeout(options.shutdown_grace, task).await.is_err() {
                tracing::debug!("stderr forwarder still running after shutdown");
            }
        }
    }
}

#[async_trait::async_trait]
impl DefinitionSource for Session {
    async fn list_page(
        &mut self,
        category: Category,
        cursor: Option<&str>,
    ) -> Result<Page, RpcFailure> {
        let params = PaginatedRequestParams {
            cursor: cursor.map(str::to_string),
            meta: None,
        };
        let result = self
            .conn
            .request(category.list_method(), &params, self.options.request_timeout)
            .await?;
        Page::from_result(category, result)
    }
}

fn client_identity() -> Implementation {
    Implementation {
        name: CLIENT_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        title: None,
        description: None,
        icons: Vec::new(),
        website_url: None,
    }
}

async fn handshake(
    conn: &mut Connection,
    options: &SessionOptions,
) -> Result<Handshake, ConnectionError> {
    let params = InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: client_identity(),
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    };
    let raw = conn
        .request("initialize", &params, options.handshake_timeout)
        .await
        .map_err(ConnectionError::Handshake)?;
    let reply: InitializeReply =
        serde_json::from_value(raw).map_err(|e| ConnectionError::Malformed(e.to_string()))?;

    let capabilities = if reply.capabilities.is_null() {
        Capabilities::NONE
    } else {
        match serde_json::from_value::<ServerCapabilities>(reply.capabilities.clone()) {
            Ok(typed) => Capabilities::from(&typed),
            Err(e) => {
                tracing::warn!(
                    "server capabilities do not match the schema ({}); reading keys only",
                    e
                );
                Capabilities::from_raw(&reply.capabilities)
            }
        }
    };
    let server = reply
        .server_info
        .map(|info| ServerInfo {
            name: info.name,
            version: info.version.filter(|v| !v.is_empty()),
        })
        .unwrap_or_default();
    let protocol_version = reply.protocol_version.unwrap_or_default();
    if protocol_version != LATEST_PROTOCOL_VERSION {
        tracing::debug!(
            "server negotiated protocol {} (requested {})",
            protocol_version,
            LATEST_PROTOCOL_VERSION
        );
    }

    conn.notify("notifications/initialized")
        .await
        .map_err(ConnectionError::Handshake)?;

    Ok(Handshake {
        server,
        capabilities,
        protocol_version,
    })
}

fn forward_stderr(stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "server_stderr", "{}", line);
        }
    })
}

async fn terminate(child: &mut Child, grace: Duration) {
    if !grace.is_zero() {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("server exited with {}", status);
                return;
            }
            Ok(Err(e)) => tracing::warn!("waiting for server failed: {}", e),
            Err(_) => tracing::debug!("server still running after {}ms; killing", grace.as_millis()),
        }
    }
    if let Err(e) = child.kill().await {
        tracing::warn!("failed to kill server: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::enumerator::collect_definitions;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, duplex};

    /// In-process server end of a duplex pipe, driven line by line.
    struct FakeServer {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        fn pair() -> (FakeServer, ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) {
            let (client_io, server_io) = duplex(64 * 1024);
            let (client_r, client_w) = tokio::io::split(client_io);
            let (server_r, server_w) = tokio::io::split(server_io);
            (
                FakeServer {
                    reader: BufReader::new(server_r),
                    writer: server_w,
                },
                client_r,
                client_w,
            )
        }

        async fn recv(&mut self) -> Option<Value> {
            let mut line = String::new();
            match self.reader.read_line(&mut line).await {
                Ok(0) | Err(_) => None,
                Ok(_) => serde_json::from_str(&line).ok(),
            }
        }

        async fn reply(&mut self, id: &Value, body: Value) {
            let msg = json!({"jsonrpc": "2.0", "id": id, "result": body});
            let _ = self
                .writer
                .write_all(format!("{}\n", msg).as_bytes())
                .await;
        }

        async fn fail(&mut self, id: &Value, code: i64, message: &str) {
            let msg = json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}});
            let _ = self
                .writer
                .write_all(format!("{}\n", msg).as_bytes())
                .await;
        }

        /// Answer `initialize` and swallow the `initialized` notification.
        async fn accept(&mut self, init_result: Value) -> Value {
            let init = self.recv().await.expect("initialize request");
            assert_eq!(init["method"], "initialize");
            self.reply(&init["id"], init_result).await;
            let note = self.recv().await.expect("initialized notification");
            assert_eq!(note["method"], "notifications/initialized");
            init
        }
    }

    #[tokio::test]
    async fn handshake_reads_identity_and_capabilities() {
        let (mut server, r, w) = FakeServer::pair();
        let script = tokio::spawn(async move {
            let init = server
                .accept(json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {"tools": {"listChanged": true}, "resources": {}},
                    "serverInfo": {"name": "demo", "version": "1.2.3"}
                }))
                .await;
            assert_eq!(init["params"]["clientInfo"]["name"], CLIENT_NAME);
            assert_eq!(init["params"]["protocolVersion"], LATEST_PROTOCOL_VERSION);
        });

        let session = Session::over(r, w, &SessionOptions::default())
            .await
            .expect("handshake");
        script.await.expect("script");
        assert_eq!(session.server_info().name, "demo");
        assert_eq!(session.server_info().version.as_deref(), Some("1.2.3"));
        assert_eq!(session.protocol_version(), "2025-06-18");
        assert!(session.capabilities().admits(Category::Tool));
        assert!(session.capabilities().admits(Category::Template));
        assert!(!session.capabilities().admits(Category::Prompt));
        session.close().await;
    }

    #[tokio::test]
    async fn empty_version_is_absent() {
        let (mut server, r, w) = FakeServer::pair();
        tokio::spawn(async move {
            server
                .accept(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "serverInfo": {"name": "bare", "version": ""}
                }))
                .await;
        });
        let session = Session::over(r, w, &SessionOptions::default())
            .await
            .expect("handshake");
        assert_eq!(session.server_info().version, None);
        assert_eq!(session.capabilities(), Capabilities::NONE);
    }

    #[tokio::test]
    async fn handshake_error_is_a_connection_error() {
        let (mut server, r, w) = FakeServer::pair();
        tokio::spawn(async move {
            let init = server.recv().await.expect("initialize");
            server.fail(&init["id"], -32602, "unsupported").await;
        });
        let err = Session::over(r, w, &SessionOptions::default())
            .await
            .err()
            .expect("handshake should fail");
        assert!(matches!(
            err,
            ConnectionError::Handshake(RpcFailure::Remote { code: -32602, .. })
        ));
    }

    #[tokio::test]
    async fn non_object_reply_is_malformed() {
        let (mut server, r, w) = FakeServer::pair();
        tokio::spawn(async move {
            let init = server.recv().await.expect("initialize");
            server.reply(&init["id"], json!("hello")).await;
        });
        let err = Session::over(r, w, &SessionOptions::default())
            .await
            .err()
            .expect("handshake should fail");
        assert!(matches!(err, ConnectionError::Malformed(_)));
    }

    #[tokio::test]
    async fn list_pages_follow_cursor_over_the_wire() {
        let (mut server, r, w) = FakeServer::pair();
        let script = tokio::spawn(async move {
            server
                .accept(json!({"capabilities": {"tools": {}}, "serverInfo": {"name": "paged"}}))
                .await;
            let first = server.recv().await.expect("first page");
            assert_eq!(first["method"], "tools/list");
            server
                .reply(
                    &first["id"],
                    json!({"tools": [{"name": "a", "inputSchema": {"type": "object"}}], "nextCursor": "2"}),
                )
                .await;
            let second = server.recv().await.expect("second page");
            assert_eq!(second["params"]["cursor"], "2");
            server
                .reply(&second["id"], json!({"tools": [{"name": "b", "inputSchema": {"type": "object"}}]}))
                .await;
        });

        let mut session = Session::over(r, w, &SessionOptions::default())
            .await
            .expect("handshake");
        let capabilities = session.capabilities();
        let server_info = session.server_info().clone();
        let result = collect_definitions(&mut session, capabilities, server_info)
            .await
            .expect("collect");
        script.await.expect("script");
        let names: Vec<_> = result.tools.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(result.server.name, "paged");
        assert!(result.warnings.is_empty());
        session.close().await;
    }

    #[tokio::test]
    async fn missing_command_fails_to_spawn() {
        let spec = LaunchSpec::new("/nonexistent/mcp-tokenmeter-test-server", Vec::new());
        let err = Session::open(&spec, &SessionOptions::default())
            .await
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, ConnectionError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_exiting_early_fails_handshake() {
        let spec = LaunchSpec::new("true", Vec::new());
        let err = Session::open(&spec, &SessionOptions::default())
            .await
            .err()
            .expect("handshake should fail");
        assert!(matches!(err, ConnectionError::Handshake(_)));
    }
}
