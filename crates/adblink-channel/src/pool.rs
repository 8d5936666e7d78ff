use std::sync::Mutex;

use crate::traits::Direction;

/// A reusable bulk-transfer request: a buffer sized per use and recycled
/// between transfers to avoid per-call allocation churn.
#[derive(Debug, Default)]
pub struct TransferRequest {
    buf: Vec<u8>,
}

impl TransferRequest {
    fn prepare(&mut self, len: usize) {
        self.buf.clear();
        self.buf.resize(len, 0);
    }

    /// The transfer buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// The transfer buffer, mutable.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// Pool of reusable transfer requests for one endpoint direction.
///
/// Requests are created lazily on first acquire and returned to the pool when
/// the guard drops, on every exit path.
pub struct RequestPool {
    direction: Direction,
    slots: Mutex<Vec<TransferRequest>>,
}

impl RequestPool {
    /// Create an empty pool for the given direction.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Acquire a request with a buffer of exactly `len` bytes.
    pub fn acquire(&self, len: usize) -> PooledRequest<'_> {
        let mut slots = self.slots.lock().expect("request pool poisoned");
        let mut request = slots.pop().unwrap_or_default();
        request.prepare(len);
        PooledRequest {
            pool: self,
            request: Some(request),
        }
    }

    /// Number of idle requests currently pooled.
    pub fn idle(&self) -> usize {
        self.slots.lock().expect("request pool poisoned").len()
    }

    /// The direction this pool serves.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn release(&self, request: TransferRequest) {
        let mut slots = self.slots.lock().expect("request pool poisoned");
        slots.push(request);
    }
}

/// Scoped handle to a pooled request. Returns the request to its pool when
/// dropped, including on error paths.
pub struct PooledRequest<'a> {
    pool: &'a RequestPool,
    request: Option<TransferRequest>,
}

impl PooledRequest<'_> {
    /// The transfer buffer.
    pub fn buffer(&self) -> &[u8] {
        self.request.as_ref().expect("request taken").buffer()
    }

    /// The transfer buffer, mutable.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.request.as_mut().expect("request taken").buffer_mut()
    }
}

impl Drop for PooledRequest<'_> {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            self.pool.release(request);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_creates_lazily_and_release_recycles() {
        let pool = RequestPool::new(Direction::In);
        assert_eq!(pool.idle(), 0);

        {
            let mut request = pool.acquire(16);
            assert_eq!(request.buffer().len(), 16);
            request.buffer_mut()[0] = 0xAA;
        }
        assert_eq!(pool.idle(), 1);

        // A recycled request is re-sized and zeroed for the new transfer.
        let request = pool.acquire(8);
        assert_eq!(request.buffer().len(), 8);
        assert_eq!(request.buffer()[0], 0);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn concurrent_acquires_get_distinct_requests() {
        let pool = RequestPool::new(Direction::In);
        let first = pool.acquire(4);
        let second = pool.acquire(4);
        assert_eq!(first.buffer().len(), 4);
        assert_eq!(second.buffer().len(), 4);
        drop(first);
        drop(second);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn direction_is_recorded() {
        assert_eq!(RequestPool::new(Direction::Out).direction(), Direction::Out);
        assert_eq!(Direction::In.name(), "in");
    }
}
