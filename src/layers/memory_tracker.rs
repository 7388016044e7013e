//! Page-fault-based write watcher over host-mapped, host-coherent device memory
//! (component G).
//!
//! Tracked ranges are added on `vkMapMemory` and removed on `vkUnmapMemory`/`vkFreeMemory`.
//! Each tracked range owns a shadow allocation the same size as the mapped range; the
//! application is handed the shadow pointer, not the real mapping, and shadow pages start
//! read-only so the first touch of each page faults and is classified as a read or a write.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle;

use crate::transform::Transform;

const PAGE_SIZE: usize = 4096;

fn page_align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

fn page_align_up(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

struct TrackedRange {
    /// The driver's real mapped pointer, as returned by `vkMapMemory`.
    driver_ptr: *mut u8,
    /// Our shadow allocation, the pointer actually handed back to the application.
    shadow_ptr: *mut u8,
    size: usize,
    memory: u64,
}

// SAFETY: these are raw pointers into mmap'd/driver-mapped memory that outlive the tracked
// range's lifetime in the map; access is always behind `MemoryTracker::mut_state`'s mutex.
unsafe impl Send for TrackedRange {}

struct State {
    /// Keyed by the shadow range's base address, for page-address lookups from the fault
    /// handler.
    ranges: BTreeMap<usize, TrackedRange>,
    by_memory: HashMap<u64, usize>,
    dirty_pages: BTreeSet<usize>,
}

/// Implements `for_dirty_in_mem`/`AddGPUWrite`/the fault handler described in the component's
/// contract. A process holds at most one of these; the fault handler reaches it through a
/// static atomic pointer set at construction (§9 "Global mutable state").
pub struct MemoryTracker {
    next: Arc<dyn Transform>,
    state: Mutex<State>,
}

static ACTIVE_TRACKER: AtomicPtr<MemoryTracker> = AtomicPtr::new(std::ptr::null_mut());

impl MemoryTracker {
    /// Installs the process-wide `SIGSEGV` handler and registers this tracker as the one it
    /// dispatches to. Only one tracker may be installed at a time.
    pub fn install(self: &Arc<Self>) {
        ACTIVE_TRACKER.store(Arc::as_ptr(self) as *mut MemoryTracker, Ordering::SeqCst);
        unsafe { install_signal_handler() };
    }

    pub fn uninstall() {
        ACTIVE_TRACKER.store(std::ptr::null_mut(), Ordering::SeqCst);
    }

    pub fn new(next: Arc<dyn Transform>) -> Self {
        Self { next, state: Mutex::new(State { ranges: BTreeMap::new(), by_memory: HashMap::new(), dirty_pages: BTreeSet::new() }) }
    }

    fn add_tracked_range(&self, memory: u64, driver_ptr: *mut c_void, size: u64) -> *mut c_void {
        let size = page_align_up(size as usize);
        let shadow = unsafe {
            libc::mmap(std::ptr::null_mut(), size, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1, 0)
        };
        assert_ne!(shadow, libc::MAP_FAILED, "mmap failed for shadow range");
        unsafe { std::ptr::copy_nonoverlapping(driver_ptr as *const u8, shadow as *mut u8, size) };
        let rc = unsafe { libc::mprotect(shadow, size, libc::PROT_READ) };
        assert_eq!(rc, 0, "mprotect(PROT_READ) failed");

        let mut state = self.state.lock().unwrap();
        state.ranges.insert(
            shadow as usize,
            TrackedRange { driver_ptr: driver_ptr as *mut u8, shadow_ptr: shadow as *mut u8, size, memory },
        );
        state.by_memory.insert(memory, shadow as usize);
        shadow
    }

    fn remove_tracked_range(&self, memory: u64) {
        let mut state = self.state.lock().unwrap();
        let Some(base) = state.by_memory.remove(&memory) else { return };
        if let Some(range) = state.ranges.remove(&base) {
            unsafe {
                libc::mprotect(range.shadow_ptr as *mut c_void, range.size, libc::PROT_READ | libc::PROT_WRITE);
                std::ptr::copy_nonoverlapping(range.shadow_ptr as *const u8, range.driver_ptr, range.size);
                libc::munmap(range.shadow_ptr as *mut c_void, range.size);
            }
            state.dirty_pages.retain(|p| *p < base || *p >= base + range.size);
        }
    }

    /// Invoked from the signal handler (or directly by tests) with the faulting page-aligned
    /// address. Returns `true` if the fault was inside a tracked range and has been resolved.
    fn handle_fault(&self, fault_page: usize, is_write: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some((&base, _)) = state.ranges.range(..=fault_page).next_back() else { return false };
        let (size, driver_ptr, shadow_ptr) = {
            let range = &state.ranges[&base];
            (range.size, range.driver_ptr, range.shadow_ptr)
        };
        if fault_page >= base + size {
            return false;
        }
        let offset = fault_page - base;
        unsafe {
            libc::mprotect(fault_page as *mut c_void, PAGE_SIZE, libc::PROT_READ | libc::PROT_WRITE);
            std::ptr::copy_nonoverlapping(driver_ptr.add(offset), shadow_ptr.add(offset), PAGE_SIZE.min(size - offset));
        }
        if is_write {
            state.dirty_pages.insert(fault_page);
        }
        true
    }

    /// Iterates every dirty page belonging to `memory`, copies shadow->driver, reprotects the
    /// page read-only, and calls `callback(offset_in_range, shadow_ptr, len)`.
    pub fn for_dirty_in_mem(&self, memory: u64, mut callback: impl FnMut(usize, *const u8, usize)) {
        let mut state = self.state.lock().unwrap();
        let Some(&base) = state.by_memory.get(&memory) else { return };
        let (size, driver_ptr, shadow_ptr) = {
            let range = &state.ranges[&base];
            (range.size, range.driver_ptr, range.shadow_ptr)
        };
        let dirty: Vec<usize> = state.dirty_pages.range(base..base + size).copied().collect();
        for page in dirty {
            let offset = page - base;
            let len = PAGE_SIZE.min(size - offset);
            unsafe {
                std::ptr::copy_nonoverlapping(shadow_ptr.add(offset), driver_ptr.add(offset), len);
                libc::mprotect(page as *mut c_void, PAGE_SIZE, libc::PROT_READ);
            }
            state.dirty_pages.remove(&page);
            callback(offset, unsafe { shadow_ptr.add(offset) }, len);
        }
    }

    /// Marks the pages covering `[offset, offset+size)` of `memory` as access-protected so the
    /// next CPU read faults and is refreshed from the driver-side mapping.
    pub fn add_gpu_write(&self, memory: u64, offset: u64, size: u64) {
        let state = self.state.lock().unwrap();
        let Some(&base) = state.by_memory.get(&memory) else { return };
        let start = page_align_down(base + offset as usize);
        let end = page_align_up(base + offset as usize + size as usize);
        unsafe { libc::mprotect(start as *mut c_void, end - start, libc::PROT_NONE) };
    }
}

unsafe fn install_signal_handler() {
    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = signal_handler as usize;
    action.sa_flags = libc::SA_SIGINFO;
    libc::sigemptyset(&mut action.sa_mask);
    libc::sigaction(libc::SIGSEGV, &action, std::ptr::null_mut());
}

/// Distinguishing a read fault from a write fault needs the hardware error code carried in the
/// signal context; on other platforms every fault is conservatively treated as a write, which
/// is always correct (it just occasionally marks a page dirty that was only read).
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
unsafe fn was_write_fault(ctx: *mut libc::ucontext_t) -> bool {
    let mcontext = &(*ctx).uc_mcontext;
    (mcontext.gregs[libc::REG_ERR as usize] & 0x2) != 0
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
unsafe fn was_write_fault(_ctx: *mut libc::c_void) -> bool {
    true
}

extern "C" fn signal_handler(_sig: libc::c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    let tracker = ACTIVE_TRACKER.load(Ordering::SeqCst);
    if tracker.is_null() {
        unsafe { libc::raise(libc::SIGSEGV) };
        return;
    }
    let fault_addr = unsafe { (*info).si_addr() } as usize;
    let page = page_align_down(fault_addr);
    let is_write = unsafe { was_write_fault(ctx as *mut _) };
    let resolved = unsafe { (*tracker).handle_fault(page, is_write) };
    if !resolved {
        unsafe { libc::raise(libc::SIGSEGV) };
    }
}

impl Transform for MemoryTracker {
    fn next(&self) -> &dyn Transform {
        self.next.as_ref()
    }

    fn map_memory(&self, device: vk::Device, memory: vk::DeviceMemory, offset: u64, size: u64) -> anyhow::Result<*mut c_void> {
        let driver_ptr = self.next().map_memory(device, memory, offset, size)?;
        Ok(self.add_tracked_range(memory.as_raw(), driver_ptr, size))
    }

    fn unmap_memory(&self, device: vk::Device, memory: vk::DeviceMemory) -> anyhow::Result<()> {
        self.remove_tracked_range(memory.as_raw());
        self.next().unmap_memory(device, memory)
    }

    fn free_memory(&self, device: vk::Device, memory: vk::DeviceMemory) -> anyhow::Result<()> {
        self.remove_tracked_range(memory.as_raw());
        self.next().free_memory(device, memory)
    }

    fn flush_mapped_memory_ranges(&self, device: vk::Device, ranges: &[vk::MappedMemoryRange]) -> anyhow::Result<()> {
        self.next().flush_mapped_memory_ranges(device, ranges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Unreachable;

    struct NoopNext;
    impl Transform for NoopNext {
        fn next(&self) -> &dyn Transform {
            static UNREACHABLE: Unreachable = Unreachable;
            &UNREACHABLE
        }
    }

    fn tracker() -> MemoryTracker {
        MemoryTracker::new(Arc::new(NoopNext))
    }

    #[test]
    fn fault_outside_any_range_is_not_resolved() {
        let tracker = tracker();
        assert!(!tracker.handle_fault(0x1000, true));
    }

    #[test]
    fn tracked_range_write_fault_marks_page_dirty() {
        let tracker = tracker();
        let mut backing = vec![0u8; PAGE_SIZE * 2];
        let shadow = tracker.add_tracked_range(1, backing.as_mut_ptr() as *mut c_void, (PAGE_SIZE * 2) as u64);
        let base = shadow as usize;

        assert!(tracker.handle_fault(base, true));
        let mut seen = Vec::new();
        tracker.for_dirty_in_mem(1, |_offset, ptr, len| seen.push((ptr as usize, len)));
        assert_eq!(seen, vec![(shadow as usize, PAGE_SIZE)]);

        tracker.remove_tracked_range(1);
    }

    #[test]
    fn gpu_write_reprotects_pages_for_next_read() {
        let tracker = tracker();
        let mut backing = vec![0u8; PAGE_SIZE];
        let _shadow = tracker.add_tracked_range(2, backing.as_mut_ptr() as *mut c_void, PAGE_SIZE as u64);
        tracker.add_gpu_write(2, 0, PAGE_SIZE as u64);
        tracker.remove_tracked_range(2);
    }
}
