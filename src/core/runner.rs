use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::core::error::TransportError;
use crate::core::job::ChannelSelector;
use crate::core::transport::Carrier;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

const WAIT_STEP: Duration = Duration::from_millis(50);

fn resolve_channel(channels: &[String], channel: ChannelSelector) -> Option<String> {
    let slot = (channel.0 as usize).checked_sub(1)?;
    channels.get(slot).cloned()
}

/// Sends through an external program, one process per message:
///
/// `<program...> [--channel <id>] <address> <part>...`
///
/// Exit status 0 means the message was accepted. Channels are the ids given
/// on the command line, selector `n` picking the `n`-th one.
#[derive(Debug, Clone)]
pub struct CommandCarrier {
    program: Vec<String>,
    channels: Vec<String>,
    timeout: Duration,
}

impl CommandCarrier {
    pub fn new(
        command_line: &str,
        channels: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let program = shell_words::split(command_line).map_err(|err| {
            TransportError::InvalidCommand {
                message: err.to_string(),
            }
        })?;
        if program.is_empty() {
            return Err(TransportError::InvalidCommand {
                message: "sender command is empty".to_string(),
            });
        }
        Ok(Self {
            program,
            channels,
            timeout,
        })
    }

    pub fn to_args(&self, handle: &Option<String>, address: &str, parts: &[String]) -> Vec<String> {
        let mut args: Vec<String> = self.program[1..].to_vec();
        if let Some(channel) = handle {
            args.push("--channel".to_string());
            args.push(channel.clone());
        }
        args.push(address.to_string());
        args.extend(parts.iter().cloned());
        args
    }

    fn wait_with_deadline(&self, child: &mut Child) -> Result<std::process::ExitStatus, TransportError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let polled = child.try_wait().map_err(|e| TransportError::ProcessFailed {
                exit_code: None,
                stderr: e.to_string(),
            })?;
            if let Some(status) = polled {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransportError::TimedOut {
                    secs: self.timeout.as_secs(),
                });
            }
            thread::sleep(WAIT_STEP);
        }
    }
}

impl Carrier for CommandCarrier {
    type Handle = Option<String>;

    fn default_handle(&self) -> Self::Handle {
        None
    }

    fn resolve(&self, channel: ChannelSelector) -> Option<Self::Handle> {
        resolve_channel(&self.channels, channel).map(Some)
    }

    fn submit(
        &self,
        handle: &Self::Handle,
        address: &str,
        parts: &[String],
    ) -> Result<(), TransportError> {
        let program = &self.program[0];
        let mut cmd = Command::new(program);
        cmd.args(self.to_args(handle, address, parts))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransportError::BinaryNotFound {
                    program: program.clone(),
                }
            } else {
                TransportError::ProcessFailed {
                    exit_code: None,
                    stderr: e.to_string(),
                }
            }
        })?;

        let stderr_buffer = Arc::new(Mutex::new(String::new()));
        let reader_handle = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_collector(stderr, Arc::clone(&stderr_buffer)));

        let status = self.wait_with_deadline(&mut child);
        if let Some(handle) = reader_handle {
            let _ = handle.join();
        }
        let status = status?;

        if status.success() {
            debug!(address, parts = parts.len(), "sender accepted message");
            Ok(())
        } else {
            let stderr = stderr_buffer
                .lock()
                .map(|buffer| buffer.trim().to_string())
                .unwrap_or_else(|_| "failed to read stderr buffer".to_string());
            Err(TransportError::ProcessFailed {
                exit_code: status.code(),
                stderr,
            })
        }
    }
}

fn spawn_stderr_collector<R: Read + Send + 'static>(
    reader: R,
    buffer: Arc<Mutex<String>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(reader);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let line = line.trim_matches(&['\r', '\n'][..]);
            if line.is_empty() {
                continue;
            }
            if let Ok(mut buffer) = buffer.lock() {
                buffer.push_str(line);
                buffer.push('\n');
            }
        }
    })
}

/// Dry-run carrier: logs each message and reports success.
#[derive(Debug, Clone, Default)]
pub struct LogCarrier {
    channels: Vec<String>,
}

impl LogCarrier {
    pub fn new(channels: Vec<String>) -> Self {
        Self { channels }
    }
}

impl Carrier for LogCarrier {
    type Handle = Option<String>;

    fn default_handle(&self) -> Self::Handle {
        None
    }

    fn resolve(&self, channel: ChannelSelector) -> Option<Self::Handle> {
        resolve_channel(&self.channels, channel).map(Some)
    }

    fn submit(
        &self,
        handle: &Self::Handle,
        address: &str,
        parts: &[String],
    ) -> Result<(), TransportError> {
        info!(
            address,
            channel = handle.as_deref().unwrap_or("default"),
            parts = parts.len(),
            "dry-run send"
        );
        Ok(())
    }
}
