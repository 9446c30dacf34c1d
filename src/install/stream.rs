//! Line-oriented reading of child process output
//!
//! A reader thread pushes lines into a channel; the consumer waits on the
//! channel in short slices so a timeout or the interrupt flag can end the
//! wait even while the child is silent.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use log::debug;

use crate::error::StreamError;

/// How often a blocked reader re-checks the cancellation flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lines read from a child's output, one at a time
pub struct LineStream {
    lines: Receiver<String>,
    cancel: Arc<AtomicBool>,
}

impl LineStream {
    /// Start reading `reader` on a background thread
    pub fn spawn<R: Read + Send + 'static>(reader: R, cancel: Arc<AtomicBool>) -> Self {
        let (sender, lines) = mpsc::channel();

        thread::spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer) {
                    Ok(0) => break,
                    Ok(_) => {
                        if sender.send(decode_line(&buffer)).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    // A pty master reports EIO once the child side is closed
                    Err(err) => {
                        debug!("Output stream ended: {}", err);
                        break;
                    }
                }
            }
        });

        Self { lines, cancel }
    }

    /// Wait for the next line.
    ///
    /// `Ok(None)` is end of stream. With no timeout the wait is unbounded
    /// except for cancellation.
    pub fn next_line(&self, timeout: Option<Duration>) -> Result<Option<String>, StreamError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(StreamError::Cancelled);
            }

            let mut wait = POLL_INTERVAL;
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(StreamError::TimedOut(timeout));
                }
                wait = wait.min(remaining);
            }

            match self.lines.recv_timeout(wait) {
                Ok(line) => return Ok(Some(line)),
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
    }
}

/// Lossy UTF-8 with the line terminator (`\n`, `\r\n`, or a stray `\r`) removed
fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(&['\n', '\r'][..]).to_string()
}
