//! Owns the output stream and coordinates per-thread encoders (component K).

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

use crate::sink::StreamSink;
use crate::wire::{flags, Encoder, MAX_PAYLOAD_BYTES};

thread_local! {
    static DEPTH: Cell<u32> = Cell::new(0);
    static ENCODER: RefCell<Encoder> = RefCell::new(Encoder::new());
}

/// Coordinates recording across threads: hands out a thread-local [`Encoder`] per call, commits
/// its payload to the sink as a `{length, payload}` record, and enforces the three toggles the
/// spec's recording lifecycle needs (`enable`/`enable_with_mec`/`disable`).
pub struct SpySerializer {
    sink: Arc<dyn StreamSink>,
    enabled: AtomicBool,
    /// Set by `enable_with_mec`: while this holds a thread id, only that thread's calls are
    /// serialized, so the MEC prologue is written without interleaving from other app threads.
    mec_thread: Mutex<Option<ThreadId>>,
    /// Held for the whole call by `get_locked_encoder`; held only long enough to flush by the
    /// default `get_encoder` commit path.
    commit_lock: Mutex<()>,
}

impl SpySerializer {
    pub fn new(sink: Arc<dyn StreamSink>) -> Self {
        Self { sink, enabled: AtomicBool::new(false), mec_thread: Mutex::new(None), commit_lock: Mutex::new(()) }
    }

    pub fn enable(&self) {
        *self.mec_thread.lock().unwrap() = None;
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn enable_with_mec(&self) {
        *self.mec_thread.lock().unwrap() = Some(std::thread::current().id());
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        *self.mec_thread.lock().unwrap() = None;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// `MID_EXECUTION` while pinned to a MEC-generating thread (`enable_with_mec`), `NORMAL`
    /// otherwise. Every record this serializer writes carries this flag, so the replayer can
    /// tell a MEC prologue record from a normally-recorded one (component L).
    fn current_flags(&self) -> u32 {
        if self.mec_thread.lock().unwrap().is_some() {
            flags::MID_EXECUTION
        } else {
            flags::NORMAL
        }
    }

    fn may_record_on_this_thread(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match *self.mec_thread.lock().unwrap() {
            Some(pinned) => pinned == std::thread::current().id(),
            None => true,
        }
    }

    /// Returns a guard over this thread's encoder for `opcode`. Writes `opcode` as the payload's
    /// first field. Commits to the sink on drop, taking `commit_lock` only for the duration of
    /// that write. A no-op if recording is disabled, pinned to a different thread (MEC), or this
    /// call is re-entrant (a driver/layer call made from inside another call already being
    /// recorded on this thread).
    pub fn get_encoder(self: &Arc<Self>, opcode: u32) -> EncoderGuard<'_> {
        self.make_guard(opcode, false)
    }

    /// Same as [`Self::get_encoder`] but holds `commit_lock` for the guard's entire lifetime, so
    /// no other thread's record can interleave with this one. Used for operations that must be
    /// atomic with respect to other threads' encoders (e.g. a memory-update record immediately
    /// followed by the `vkQueueSubmit` record it belongs with).
    pub fn get_locked_encoder(self: &Arc<Self>, opcode: u32) -> EncoderGuard<'_> {
        self.make_guard(opcode, true)
    }

    fn make_guard(self: &Arc<Self>, opcode: u32, lock_for_lifetime: bool) -> EncoderGuard<'_> {
        let this: &SpySerializer = self.as_ref();
        if !this.may_record_on_this_thread() {
            return EncoderGuard { serializer: this, active: false, held_lock: None };
        }
        let reentrant = DEPTH.with(|d| {
            let depth = d.get();
            d.set(depth + 1);
            depth > 0
        });
        if reentrant {
            return EncoderGuard { serializer: this, active: false, held_lock: None };
        }
        let held_lock = if lock_for_lifetime { Some(this.commit_lock.lock().unwrap()) } else { None };
        ENCODER.with(|e| e.borrow_mut().write_u32(opcode));
        EncoderGuard { serializer: this, active: true, held_lock }
    }

    /// Writes one extra `{length, payload}` record directly to the sink, without taking
    /// `commit_lock` itself. Callers must already hold it -- in practice by calling this while a
    /// [`EncoderGuard`] obtained from [`Self::get_locked_encoder`] on the same thread is still
    /// alive -- otherwise a concurrent thread's record can interleave. Used to emit the
    /// coherent-memory update records that must precede a `vkQueueSubmit` record with nothing
    /// else from another thread in between (component K).
    pub fn write_auxiliary_record(&self, opcode: u32, build: impl FnOnce(&mut Encoder)) {
        let mut enc = Encoder::new();
        enc.write_u32(opcode);
        build(&mut enc);
        enc.check_limit(MAX_PAYLOAD_BYTES).expect("serialized auxiliary record exceeded the payload size ceiling");
        let payload = enc.into_bytes();
        write_record(self.sink.as_ref(), self.current_flags(), &payload);
    }

    fn commit(&self, already_locked: bool) {
        let payload = ENCODER.with(|e| {
            let mut enc = e.borrow_mut();
            enc.check_limit(MAX_PAYLOAD_BYTES).expect("serialized call exceeded the payload size ceiling");
            std::mem::take(&mut *enc).into_bytes()
        });
        let record_flags = self.current_flags();

        if already_locked {
            write_record(self.sink.as_ref(), record_flags, &payload);
        } else {
            let _guard = self.commit_lock.lock().unwrap();
            write_record(self.sink.as_ref(), record_flags, &payload);
        }
    }
}

/// Writes one `{length: u64, flags: u32, payload}` record. `length` covers only `payload`.
fn write_record(sink: &dyn StreamSink, record_flags: u32, payload: &[u8]) {
    let _ = sink.write(&(payload.len() as u64).to_le_bytes());
    let _ = sink.write(&record_flags.to_le_bytes());
    let _ = sink.write(payload);
}

/// RAII handle over the calling thread's encoder for one in-flight call.
pub struct EncoderGuard<'a> {
    serializer: &'a SpySerializer,
    active: bool,
    held_lock: Option<MutexGuard<'a, ()>>,
}

impl EncoderGuard<'_> {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Runs `write` against this call's encoder if recording is actually active; a no-op
    /// otherwise, so callers don't need to branch on [`Self::is_active`] themselves.
    pub fn write(&self, mut write: impl FnMut(&mut Encoder)) {
        if self.active {
            ENCODER.with(|e| write(&mut e.borrow_mut()));
        }
    }
}

impl Drop for EncoderGuard<'_> {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
        if !self.active {
            return;
        }
        let already_locked = self.held_lock.is_some();
        self.held_lock.take();
        self.serializer.commit(already_locked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn decode_records(bytes: &[u8]) -> Vec<Vec<u8>> {
        crate::wire::read_records(bytes).unwrap().into_iter().map(|r| r.payload).collect()
    }

    #[test]
    fn disabled_serializer_records_nothing() {
        let sink = Arc::new(MemorySink::new());
        let serializer = Arc::new(SpySerializer::new(sink.clone()));
        {
            let guard = serializer.get_encoder(1);
            guard.write(|e| e.write_u64(42));
        }
        assert!(sink.bytes().is_empty());
    }

    #[test]
    fn enabled_serializer_commits_one_record_per_guard() {
        let sink = Arc::new(MemorySink::new());
        let serializer = Arc::new(SpySerializer::new(sink.clone()));
        serializer.enable();
        {
            let guard = serializer.get_encoder(7);
            guard.write(|e| e.write_u64(42));
        }
        let records = decode_records(&sink.bytes());
        assert_eq!(records.len(), 1);
        let mut dec = crate::wire::Decoder::new(records[0].clone());
        assert_eq!(dec.read_u32().unwrap(), 7);
        assert_eq!(dec.read_u64().unwrap(), 42);
    }

    #[test]
    fn reentrant_call_on_same_thread_is_not_recorded() {
        let sink = Arc::new(MemorySink::new());
        let serializer = Arc::new(SpySerializer::new(sink.clone()));
        serializer.enable();
        let outer = serializer.get_encoder(1);
        assert!(outer.is_active());
        let inner = serializer.get_encoder(2);
        assert!(!inner.is_active());
        drop(inner);
        drop(outer);
        assert_eq!(decode_records(&sink.bytes()).len(), 1);
    }

    #[test]
    fn mec_pin_blocks_other_threads() {
        let sink = Arc::new(MemorySink::new());
        let serializer = Arc::new(SpySerializer::new(sink.clone()));
        serializer.enable_with_mec();
        let same_thread = serializer.get_encoder(1);
        assert!(same_thread.is_active());
        drop(same_thread);

        let serializer_clone = serializer.clone();
        let joined = std::thread::spawn(move || serializer_clone.get_encoder(2).is_active()).join().unwrap();
        assert!(!joined);
    }
}
