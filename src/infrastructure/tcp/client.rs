use crate::domain::error::{MuxError, MuxResult};
use crossterm::terminal;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Ctrl+]
pub const DETACH_BYTE: u8 = 0x1d;

const BUFFER_SIZE: usize = 1024;

/// Why an interactive session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// The user pressed the detach key
    Escape,
    /// The local input reached end of file
    InputClosed,
    /// The server closed the connection
    ServerClosed,
}

/// Terminal attachment to a running mux server.
pub struct MuxClient {
    stream: Option<TcpStream>,
    host: String,
    port: u16,
    raw_mode: bool,
}

impl MuxClient {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> MuxResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| MuxError::InvalidInput(format!("Connection timeout to {}:{}", host, port)))?
            .map_err(|e| {
                MuxError::Network(std::io::Error::new(
                    e.kind(),
                    format!("Failed to connect to {}:{}: {}", host, port, e),
                ))
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        info!("Connected to {}:{}", host, port);
        eprintln!("MUX > Connected to {}:{}", host, port);

        Ok(Self {
            stream: Some(stream),
            host: host.to_string(),
            port,
            raw_mode: false,
        })
    }

    /// Attach the controlling terminal until the user detaches or the server goes away.
    pub async fn interact(&mut self) -> MuxResult<Detach> {
        eprintln!("MUX > Use ctrl+] to stop...\r\n");

        terminal::enable_raw_mode()?;
        self.raw_mode = true;

        self.pump(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Copy `input` to the server and the server to `output`.
    ///
    /// Input is forwarded up to, but not including, the first [`DETACH_BYTE`].
    pub async fn pump<R, W>(&mut self, mut input: R, mut output: W) -> MuxResult<Detach>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MuxError::InvalidInput("client is closed".to_string()))?;
        let (mut socket_rx, mut socket_tx) = stream.split();

        let mut input_buffer = [0u8; BUFFER_SIZE];
        let mut socket_buffer = [0u8; BUFFER_SIZE];

        loop {
            tokio::select! {
                read = input.read(&mut input_buffer) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(Detach::InputClosed);
                    }
                    let chunk = &input_buffer[..n];
                    if let Some(pos) = chunk.iter().position(|&b| b == DETACH_BYTE) {
                        socket_tx.write_all(&chunk[..pos]).await?;
                        return Ok(Detach::Escape);
                    }
                    socket_tx.write_all(chunk).await?;
                    debug!("Sent {} bytes to {}:{}", n, self.host, self.port);
                }
                read = socket_rx.read(&mut socket_buffer) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(Detach::ServerClosed);
                    }
                    output.write_all(&socket_buffer[..n]).await?;
                    output.flush().await?;
                }
            }
        }
    }

    /// Restore the terminal and close the connection.
    pub async fn close(mut self) -> MuxResult<()> {
        eprintln!("\r\nMUX > Closing...");

        if self.raw_mode {
            terminal::disable_raw_mode()?;
            self.raw_mode = false;
        }

        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("Failed to shutdown TCP stream: {}", e);
            }
        }

        eprintln!("MUX > Done! =)");
        Ok(())
    }

    pub fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Drop for MuxClient {
    fn drop(&mut self) {
        if self.raw_mode {
            let _ = terminal::disable_raw_mode();
        }
    }
}
