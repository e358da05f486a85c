//! Serial adapter for the FTDI virtual COM port inside each T-Cube.

use super::Adapter;
use async_trait::async_trait;
use bytes::Bytes;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// APT link speed.
pub const APT_BAUD_RATE: u32 = 115_200;

/// Serial adapter for the APT link
///
/// Wraps the `serialport` crate and runs the blocking port I/O on Tokio's
/// blocking pool. A read collects bytes until the line goes quiet for one poll
/// interval, so a response split across USB packets is returned whole.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Overall read deadline
    timeout: Duration,

    /// Per-read port timeout, also the quiet gap that ends a response
    poll_interval: Duration,

    /// The open port (behind Arc<Mutex> so it can move into blocking tasks)
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Open `port_name` at `baud_rate`, 8 data bits, 1 stop bit, no parity and
    /// no flow control.
    ///
    /// # Errors
    /// Returns an I/O error if the port cannot be opened.
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        timeout: Duration,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(poll_interval)
            .open()
            .map_err(io::Error::from)?;
        port.clear(serialport::ClearBuffer::All)
            .map_err(io::Error::from)?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);

        Ok(Self {
            port_name: port_name.to_string(),
            timeout,
            poll_interval,
            port: Some(Arc::new(Mutex::new(port))),
        })
    }

    /// Port path this adapter was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn port(&self) -> io::Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.clone().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "serial port closed")
        })
    }
}

fn read_until_quiet(port: &mut dyn SerialPort, timeout: Duration) -> io::Result<Bytes> {
    let start = Instant::now();
    let mut response = Vec::with_capacity(128);
    let mut buf = [0u8; 256];

    loop {
        match port.read(&mut buf) {
            Ok(0) if response.is_empty() => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial port returned no data",
                ));
            }
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                if !response.is_empty() {
                    // line went quiet after data: response complete
                    break;
                }
                if start.elapsed() > timeout {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no serial data within {timeout:?}"),
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Bytes::from(response))
}

#[async_trait]
impl Adapter for SerialAdapter {
    fn name(&self) -> &str {
        "serial"
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        let data = bytes.to_vec();

        // Execute blocking serial I/O on dedicated thread
        tokio::task::spawn_blocking(move || {
            let mut guard = port.blocking_lock();
            guard.write_all(&data)?;
            guard.flush()
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("serial task failed: {e}")))?
    }

    async fn read(&mut self) -> io::Result<Bytes> {
        let port = self.port()?;
        let timeout = self.timeout.max(self.poll_interval);

        tokio::task::spawn_blocking(move || {
            let mut guard = port.blocking_lock();
            read_until_quiet(&mut **guard, timeout)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("serial task failed: {e}")))?
    }

    async fn drain(&mut self) -> io::Result<()> {
        let port = self.port()?;

        // Waits out a read abandoned by a caller's timeout before clearing
        tokio::task::spawn_blocking(move || {
            let guard = port.blocking_lock();
            guard
                .clear(serialport::ClearBuffer::Input)
                .map_err(io::Error::from)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("serial task failed: {e}")))?
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }
}
