//! Test server management.
//!
//! Spawns parleyd instances as child processes for black-box testing.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use tokio::time::sleep;

/// Knobs the spawn helpers fill into the generated config.
#[derive(Default)]
pub struct TestOptions {
    /// Site URL; a non-empty value turns on the websocket origin check.
    pub site_url: String,
    /// Serve the admin socket from the data directory.
    pub admin_socket: bool,
    /// Serve /metrics and /healthz on this port.
    pub metrics_port: Option<u16>,
}

/// A parleyd process under test.
pub struct TestServer {
    child: Child,
    port: u16,
    data_dir: PathBuf,
}

impl TestServer {
    pub async fn spawn(port: u16) -> anyhow::Result<Self> {
        Self::spawn_with(port, TestOptions::default()).await
    }

    /// Spawns a server with a config generated from `options`. Every test
    /// gets its own port so the files land in distinct directories.
    pub async fn spawn_with(port: u16, options: TestOptions) -> anyhow::Result<Self> {
        let data_dir = std::env::temp_dir().join(format!("parleyd-test-{port}"));
        let _ = std::fs::remove_dir_all(&data_dir);
        std::fs::create_dir_all(data_dir.join("files"))?;

        let mut config_content = format!(
            r#"[service]
listen_address = "127.0.0.1:{port}"
site_url = "{site_url}"
"#,
            port = port,
            site_url = options.site_url,
        );
        if options.admin_socket {
            config_content.push_str(&format!(
                "unix_socket = \"{}\"\n",
                data_dir.join("admin.sock").display()
            ));
        }
        config_content.push_str(&format!(
            r#"
[sql]
data_source = ":memory:"

[file]
directory = "{files}"

[log]
level = "warn"

[jobs]
run_jobs = false
"#,
            files = data_dir.join("files").display(),
        ));
        if let Some(metrics_port) = options.metrics_port {
            config_content.push_str(&format!(
                "\n[metrics]\nenable = true\nlisten_address = \"127.0.0.1:{metrics_port}\"\n"
            ));
        }

        let config_path = data_dir.join("config.toml");
        std::fs::write(&config_path, config_content)?;

        let child = Command::new(env!("CARGO_BIN_EXE_parleyd"))
            .arg(&config_path)
            .spawn()?;

        let server = Self {
            child,
            port,
            data_dir,
        };
        wait_for_port(server.port).await?;
        Ok(server)
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn admin_socket_path(&self) -> PathBuf {
        self.data_dir.join("admin.sock")
    }

    /// Opens a websocket client against this server.
    pub async fn connect(&self) -> anyhow::Result<super::client::TestClient> {
        super::client::TestClient::connect(&self.address()).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

/// Polls until something is listening on `port`.
pub async fn wait_for_port(port: u16) -> anyhow::Result<()> {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_ok()
        {
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("port {port} did not open within 5 seconds")
}
