use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ChannelError, Result};
use crate::pool::RequestPool;
use crate::traits::{Channel, Direction};

/// Outcome of one queued bulk-IN transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkIn {
    /// The queued request completed with this many bytes filled.
    Read(usize),
    /// A completion arrived that does not belong to the queued request.
    Mismatched,
}

/// Low-level access to one USB device: a claimed interface with a bulk
/// IN/OUT endpoint pair.
///
/// Implementations block until the transfer completes. Errors returned here
/// are hard failures; retryable conditions are reported through [`BulkIn`].
pub trait UsbBackend: Send + Sync {
    /// Queue a single bulk-IN transfer sized to `buf` and wait for it.
    fn bulk_in(&self, buf: &mut [u8]) -> Result<BulkIn>;

    /// Issue a bulk-OUT transfer; returns the number of bytes the device
    /// accepted (possibly fewer than `buf.len()`).
    fn bulk_out(&self, buf: &[u8]) -> Result<usize>;

    /// Release the claimed interface and close the device handle.
    fn close_device(&self);
}

/// Retry policy for spurious and empty bulk-IN completions.
///
/// `delay` maps the attempt number (1-based) to a pause before re-queueing,
/// so tests can run the retry loop with zero delay.
#[derive(Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub delay: fn(u32) -> Duration,
}

impl BackoffPolicy {
    pub fn new(max_retries: u32, delay: fn(u32) -> Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Same retry bound as the default, but without any pause.
    pub fn none() -> Self {
        Self::new(Self::default().max_retries, |_| Duration::ZERO)
    }

    fn pause(&self, attempt: u32) {
        let delay = (self.delay)(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, |_| Duration::from_millis(100))
    }
}

/// USB bulk-endpoint transport.
///
/// Bulk-IN requests are pooled and re-queued one at a time, sized to the
/// bytes still needed. Outgoing buffers are copied into a scratch buffer
/// before transfer; the device may consume them in partial completions.
pub struct UsbChannel<B> {
    backend: B,
    in_pool: RequestPool,
    scratch: Mutex<Vec<u8>>,
    backoff: BackoffPolicy,
}

impl<B: UsbBackend> UsbChannel<B> {
    pub fn new(backend: B) -> Self {
        Self::with_backoff(backend, BackoffPolicy::default())
    }

    pub fn with_backoff(backend: B, backoff: BackoffPolicy) -> Self {
        Self {
            backend,
            in_pool: RequestPool::new(Direction::In),
            scratch: Mutex::new(Vec::new()),
            backoff,
        }
    }

    /// The backing device access, e.g. for diagnostics.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn fail_hard(&self, err: ChannelError) -> ChannelError {
        warn!(error = %err, "usb channel failing, closing device");
        self.backend.close_device();
        err
    }
}

impl<B: UsbBackend> Channel for UsbChannel<B> {
    fn readx(&self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        let mut retries = 0u32;

        while filled < buf.len() {
            let remaining = buf.len() - filled;
            let mut request = self.in_pool.acquire(remaining);

            let outcome = match self.backend.bulk_in(request.buffer_mut()) {
                Ok(outcome) => outcome,
                Err(err) => return Err(self.fail_hard(err)),
            };

            match outcome {
                BulkIn::Read(n) if n > 0 => {
                    buf[filled..filled + n].copy_from_slice(&request.buffer()[..n]);
                    filled += n;
                    retries = 0;
                }
                BulkIn::Read(_) | BulkIn::Mismatched => {
                    retries += 1;
                    if retries > self.backoff.max_retries {
                        return Err(self.fail_hard(ChannelError::Glitch { attempts: retries }));
                    }
                    debug!(retries, remaining, "spurious bulk-in completion, retrying");
                    self.backoff.pause(retries);
                }
            }
        }
        Ok(())
    }

    fn writex(&self, buf: &[u8]) -> Result<()> {
        let mut scratch = self.scratch.lock().expect("usb scratch poisoned");
        scratch.clear();
        scratch.extend_from_slice(buf);

        let mut offset = 0;
        while offset < scratch.len() {
            match self.backend.bulk_out(&scratch[offset..]) {
                Ok(0) => return Err(self.fail_hard(ChannelError::Closed)),
                Ok(n) => offset += n,
                Err(err) => return Err(self.fail_hard(err)),
            }
        }
        Ok(())
    }

    fn close(&self) {
        debug!("closing usb channel");
        self.backend.close_device();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// One scripted bulk-IN completion.
    enum Completion {
        Data(Vec<u8>),
        Empty,
        Mismatch,
        Fail,
    }

    #[derive(Default)]
    struct MockBackend {
        completions: Mutex<VecDeque<Completion>>,
        written: Mutex<Vec<Vec<u8>>>,
        /// Max bytes accepted per bulk-OUT call; 0 means everything.
        out_chunk: usize,
        closed: AtomicBool,
    }

    impl MockBackend {
        fn scripted(completions: Vec<Completion>) -> Self {
            Self {
                completions: Mutex::new(completions.into()),
                ..Self::default()
            }
        }

        fn closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl UsbBackend for MockBackend {
        fn bulk_in(&self, buf: &mut [u8]) -> Result<BulkIn> {
            let completion = self
                .completions
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            match completion {
                Completion::Data(data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(BulkIn::Read(n))
                }
                Completion::Empty => Ok(BulkIn::Read(0)),
                Completion::Mismatch => Ok(BulkIn::Mismatched),
                Completion::Fail => Err(ChannelError::Transfer("stall".into())),
            }
        }

        fn bulk_out(&self, buf: &[u8]) -> Result<usize> {
            let n = if self.out_chunk == 0 {
                buf.len()
            } else {
                buf.len().min(self.out_chunk)
            };
            self.written.lock().unwrap().push(buf[..n].to_vec());
            Ok(n)
        }

        fn close_device(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn channel(backend: MockBackend) -> UsbChannel<MockBackend> {
        UsbChannel::with_backoff(backend, BackoffPolicy::none())
    }

    #[test]
    fn readx_assembles_partial_completions() {
        let channel = channel(MockBackend::scripted(vec![
            Completion::Data(b"abc".to_vec()),
            Completion::Data(b"de".to_vec()),
        ]));

        let mut buf = [0u8; 5];
        channel.readx(&mut buf).unwrap();
        assert_eq!(&buf, b"abcde");
    }

    #[test]
    fn readx_survives_three_empty_completions() {
        let channel = channel(MockBackend::scripted(vec![
            Completion::Empty,
            Completion::Empty,
            Completion::Empty,
            Completion::Data(b"okay".to_vec()),
        ]));

        let mut buf = [0u8; 4];
        channel.readx(&mut buf).unwrap();
        assert_eq!(&buf, b"okay");
        assert!(!channel.backend().closed());
    }

    #[test]
    fn readx_fails_after_fourth_consecutive_glitch() {
        let channel = channel(MockBackend::scripted(vec![
            Completion::Empty,
            Completion::Empty,
            Completion::Empty,
            Completion::Empty,
        ]));

        let mut buf = [0u8; 4];
        let err = channel.readx(&mut buf).unwrap_err();
        assert!(matches!(err, ChannelError::Glitch { attempts: 4 }));
        assert!(channel.backend().closed(), "hard failure must close device");
    }

    #[test]
    fn readx_retry_counter_resets_on_progress() {
        // Three glitches, one byte of progress, three more glitches: the
        // second burst must not inherit the first burst's count.
        let channel = channel(MockBackend::scripted(vec![
            Completion::Empty,
            Completion::Mismatch,
            Completion::Empty,
            Completion::Data(b"x".to_vec()),
            Completion::Empty,
            Completion::Mismatch,
            Completion::Empty,
            Completion::Data(b"y".to_vec()),
        ]));

        let mut buf = [0u8; 2];
        channel.readx(&mut buf).unwrap();
        assert_eq!(&buf, b"xy");
    }

    #[test]
    fn readx_retries_mismatched_completions() {
        let channel = channel(MockBackend::scripted(vec![
            Completion::Mismatch,
            Completion::Data(b"data".to_vec()),
        ]));

        let mut buf = [0u8; 4];
        channel.readx(&mut buf).unwrap();
        assert_eq!(&buf, b"data");
    }

    #[test]
    fn readx_backend_failure_closes_device() {
        let channel = channel(MockBackend::scripted(vec![Completion::Fail]));

        let mut buf = [0u8; 4];
        let err = channel.readx(&mut buf).unwrap_err();
        assert!(matches!(err, ChannelError::Transfer(_)));
        assert!(channel.backend().closed());
    }

    #[test]
    fn readx_requests_are_returned_to_the_pool() {
        let channel = channel(MockBackend::scripted(vec![
            Completion::Data(b"ab".to_vec()),
            Completion::Data(b"cd".to_vec()),
        ]));

        let mut buf = [0u8; 4];
        channel.readx(&mut buf).unwrap();
        assert_eq!(channel.in_pool.idle(), 1, "requests recycle, not accumulate");
    }

    #[test]
    fn writex_loops_over_partial_transfers() {
        let backend = MockBackend {
            out_chunk: 5,
            ..MockBackend::default()
        };
        let channel = channel(backend);

        channel.writex(b"hello world!").unwrap();

        let written = channel.backend().written.lock().unwrap().clone();
        assert_eq!(written.len(), 3);
        assert_eq!(written.concat(), b"hello world!");
    }

    #[test]
    fn writex_does_not_mutate_caller_buffer() {
        let backend = MockBackend {
            out_chunk: 3,
            ..MockBackend::default()
        };
        let channel = channel(backend);

        let payload = b"immutable".to_vec();
        channel.writex(&payload).unwrap();
        assert_eq!(payload, b"immutable");
    }

    #[test]
    fn close_closes_the_device() {
        let channel = channel(MockBackend::default());
        channel.close();
        assert!(channel.backend().closed());
    }
}
