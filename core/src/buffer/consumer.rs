//! Consumer-side subbuffer protocol.
//!
//! A reader claims the oldest fully-committed subbuffer with
//! [`ProducerBuffer::consumer_get`], maps it read-only through the backing
//! pages, then releases it with [`ProducerBuffer::consumer_put`]. The put
//! re-validates the consumed count against the writer: in overwrite mode a
//! writer may have pushed past the reader mid-read, in which case the data
//! just read is corrupted and must be discarded.

use core::sync::atomic::Ordering;

use crate::error::ReadError;

use super::ProducerBuffer;

// ============================================================================
// READINESS
// ============================================================================

/// Readiness of a producer buffer from the consumer's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// No fully-committed subbuffer available
    Empty,
    /// At least one subbuffer is readable
    Readable,
    /// Every subbuffer is full: urgent drain required
    Full,
    /// Buffer finalized and drained: no more data will ever arrive
    Finished,
}

impl ProducerBuffer {
    /// Probe readiness without claiming anything
    pub fn poll(&self) -> Poll {
        if self.active_readers.load(Ordering::Acquire) != 0 {
            return Poll::Empty;
        }
        let geo = &self.geometry;
        let produced = geo.subbuf_trunc(self.write_offset.load(Ordering::Acquire));
        let consumed = geo.subbuf_trunc(self.consumed.load(Ordering::Acquire));
        if produced == consumed {
            if self.is_finalized() {
                Poll::Finished
            } else {
                Poll::Empty
            }
        } else if produced - consumed >= geo.buf_size() {
            Poll::Full
        } else {
            Poll::Readable
        }
    }

    /// Claim the next readable subbuffer.
    ///
    /// Returns the consumed offset identifying it; the subbuffer's bytes
    /// start at `geometry().buffer_offset(offset)` in [`Self::pages`]. The
    /// claim must be released with [`Self::consumer_put`].
    pub fn consumer_get(&self) -> Result<u64, ReadError> {
        // One reader at a time.
        if self
            .active_readers
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ReadError::Contended);
        }

        let geo = &self.geometry;
        let consumed_old = self.consumed.load(Ordering::Acquire);
        let consumed_idx = geo.subbuf_index(consumed_old);

        // A subbuffer with commit parity off is still being written.
        let committed = self.commit_count[consumed_idx].load(Ordering::Acquire);
        if geo.subbuf_offset(committed) != 0 {
            self.active_readers.fetch_sub(1, Ordering::Release);
            return Err(ReadError::NotReady);
        }
        if geo.subbuf_trunc(self.write_offset.load(Ordering::Acquire))
            == geo.subbuf_trunc(consumed_old)
        {
            self.active_readers.fetch_sub(1, Ordering::Release);
            return Err(ReadError::NotReady);
        }

        // The commit counter was read before the data will be: the Acquire
        // loads above order the subsequent page reads.
        Ok(consumed_old)
    }

    /// Release a subbuffer claimed by [`Self::consumer_get`].
    ///
    /// Fails with [`ReadError::Corrupted`] when the writer pushed the
    /// consumed count mid-read: the bytes just read must be discarded.
    pub fn consumer_put(&self, consumed_old: u64) -> Result<(), ReadError> {
        let _guard = self.put_lock.lock();
        let consumed_new = self.geometry.subbuf_align(consumed_old);

        let result = if self
            .consumed
            .compare_exchange(
                consumed_old,
                consumed_new,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Pushed by the writer: the subbuffer we just read was
            // recycled under us.
            Err(ReadError::Corrupted)
        } else {
            Ok(())
        };

        self.active_readers.fetch_sub(1, Ordering::Release);
        result
    }
}
