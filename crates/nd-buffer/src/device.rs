//! Device-resident buffers with a host mirror.
//!
//! A [`DeviceBuffer`] pairs a host region with a device allocation of the
//! same byte length and tracks which side is current in a [`SyncState`]:
//!
//! - host writes leave the buffer `HostDirty`; the next device operation
//!   flushes first.
//! - kernel launches leave it `DeviceDirty`; the next host read pulls first.
//!
//! Transfers and either-side mutation of one buffer are serialized by the
//! mirror's state lock. Views share the mirror, and therefore its state.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::array::NumericArray;
use crate::buffer::TypedBuffer;
use crate::dtype::ElementType;
use crate::element::{decode_slice, Element};
use crate::error::{BufferError, Result};
use crate::host::HostBuffer;
use crate::region::next_allocation_id;
use crate::tracker::{MemoryKind, MemoryTracker};

/// Opaque address of a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(u64);

impl DevicePtr {
    pub fn from_raw(addr: u64) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A memory space that buffers can mirror into (GPU, accelerator, ...).
///
/// Offsets and lengths are in bytes, relative to the start of the allocation
/// behind `ptr`.
pub trait Device: Send + Sync + fmt::Debug {
    /// Returns the name of this device (e.g., "simulated", "cuda:0").
    fn name(&self) -> &str;

    fn allocate(&self, bytes: usize) -> Result<DevicePtr>;

    fn release(&self, ptr: DevicePtr) -> Result<()>;

    /// Copy host bytes into device memory.
    fn upload(&self, ptr: DevicePtr, offset: usize, data: &[u8]) -> Result<()>;

    /// Copy device memory into host bytes.
    fn download(&self, ptr: DevicePtr, offset: usize, out: &mut [u8]) -> Result<()>;

    /// Run a kernel directly over `len` bytes of device memory.
    fn with_memory(
        &self,
        ptr: DevicePtr,
        offset: usize,
        len: usize,
        kernel: &mut dyn FnMut(&mut [u8]),
    ) -> Result<()>;
}

type Allocation = Arc<Mutex<Vec<u8>>>;

#[derive(Default)]
struct DeviceState {
    allocations: HashMap<u64, Allocation>,
    used: usize,
    uploads: u64,
    downloads: u64,
}

/// The `[offset, offset + len)` window of one allocation's bytes.
fn window(memory: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8]> {
    let capacity = memory.len();
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(&mut memory[offset..end]),
        _ => Err(BufferError::ViewOutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

/// Device memory backed by host allocations.
///
/// Behaves like a discrete device for the purposes of the sync contract:
/// its memory is only reachable through the [`Device`] operations, and it
/// counts transfers so callers can observe when bytes actually move.
///
/// The allocation table lock is only held for lookups and bookkeeping.
/// Each allocation has its own lock, so a kernel running over one buffer
/// may read or write any other buffer on the same device.
pub struct SimulatedDevice {
    capacity: Option<usize>,
    tracker: Option<Arc<MemoryTracker>>,
    state: Mutex<DeviceState>,
}

impl SimulatedDevice {
    /// A device without a memory limit.
    pub fn new() -> Self {
        Self {
            capacity: None,
            tracker: None,
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// A device that refuses allocations beyond `bytes` in total.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::new()
        }
    }

    /// Record every device allocation in `tracker`.
    pub fn with_tracker(mut self, tracker: Arc<MemoryTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn used_bytes(&self) -> usize {
        self.state.lock().used
    }

    pub fn allocation_count(&self) -> usize {
        self.state.lock().allocations.len()
    }

    /// Host to device copies performed so far.
    pub fn uploads(&self) -> u64 {
        self.state.lock().uploads
    }

    /// Device to host copies performed so far.
    pub fn downloads(&self) -> u64 {
        self.state.lock().downloads
    }

    fn allocation(&self, ptr: DevicePtr) -> Result<Allocation> {
        self.state
            .lock()
            .allocations
            .get(&ptr.0)
            .cloned()
            .ok_or(BufferError::UnknownDevicePointer(ptr.0))
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedDevice")
            .field("capacity", &self.capacity)
            .field("used", &state.used)
            .field("allocations", &state.allocations.len())
            .finish()
    }
}

impl Device for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    fn allocate(&self, bytes: usize) -> Result<DevicePtr> {
        let mut state = self.state.lock();
        if let Some(capacity) = self.capacity {
            let available = capacity.saturating_sub(state.used);
            if bytes > available {
                return Err(BufferError::DeviceOutOfMemory {
                    requested: bytes,
                    available,
                });
            }
        }
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(bytes)
            .map_err(|_| BufferError::AllocationFailed { bytes })?;
        memory.resize(bytes, 0);

        let id = next_allocation_id();
        state.allocations.insert(id, Arc::new(Mutex::new(memory)));
        state.used += bytes;
        if let Some(tracker) = &self.tracker {
            tracker.count_in(MemoryKind::Device, id, bytes);
        }
        debug!(ptr = %DevicePtr(id), bytes, "device allocation");
        Ok(DevicePtr(id))
    }

    fn release(&self, ptr: DevicePtr) -> Result<()> {
        let memory = self
            .state
            .lock()
            .allocations
            .remove(&ptr.0)
            .ok_or(BufferError::UnknownDevicePointer(ptr.0))?;
        let bytes = memory.lock().len();
        self.state.lock().used -= bytes;
        if let Some(tracker) = &self.tracker {
            tracker.count_out(ptr.0)?;
        }
        debug!(%ptr, bytes, "device release");
        Ok(())
    }

    fn upload(&self, ptr: DevicePtr, offset: usize, data: &[u8]) -> Result<()> {
        let allocation = self.allocation(ptr)?;
        window(&mut allocation.lock(), offset, data.len())?.copy_from_slice(data);
        self.state.lock().uploads += 1;
        Ok(())
    }

    fn download(&self, ptr: DevicePtr, offset: usize, out: &mut [u8]) -> Result<()> {
        let allocation = self.allocation(ptr)?;
        out.copy_from_slice(window(&mut allocation.lock(), offset, out.len())?);
        self.state.lock().downloads += 1;
        Ok(())
    }

    fn with_memory(
        &self,
        ptr: DevicePtr,
        offset: usize,
        len: usize,
        kernel: &mut dyn FnMut(&mut [u8]),
    ) -> Result<()> {
        let allocation = self.allocation(ptr)?;
        let mut memory = allocation.lock();
        kernel(window(&mut memory, offset, len)?);
        Ok(())
    }
}

/// Which side of a device buffer holds the current contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    /// Host edits not yet pushed to the device.
    HostDirty,
    /// Device writes not yet pulled into the host mirror.
    DeviceDirty,
}

#[derive(Debug)]
struct Mirror<T: Element> {
    host: HostBuffer<T>,
    device: Arc<dyn Device>,
    device_ptr: DevicePtr,
    device_offset: usize,
    owns_device: bool,
    state: Mutex<SyncState>,
}

impl<T: Element> Mirror<T> {
    fn flush_locked(&self, state: &mut SyncState) -> Result<()> {
        if *state != SyncState::HostDirty {
            return Ok(());
        }
        let (device, ptr, offset) = (&self.device, self.device_ptr, self.device_offset);
        self.host
            .as_data()
            .region()
            .read(|bytes| device.upload(ptr, offset, bytes))??;
        trace!(
            device = device.name(),
            %ptr,
            bytes = self.host.as_data().region().len(),
            "host -> device flush"
        );
        *state = SyncState::Synced;
        Ok(())
    }

    fn pull_locked(&self, state: &mut SyncState) -> Result<()> {
        if *state != SyncState::DeviceDirty {
            return Ok(());
        }
        let (device, ptr, offset) = (&self.device, self.device_ptr, self.device_offset);
        self.host
            .as_data()
            .region()
            .write(|bytes| device.download(ptr, offset, bytes))??;
        trace!(
            device = device.name(),
            %ptr,
            bytes = self.host.as_data().region().len(),
            "device -> host pull"
        );
        *state = SyncState::Synced;
        Ok(())
    }
}

impl<T: Element> Drop for Mirror<T> {
    fn drop(&mut self) {
        if !self.owns_device {
            return;
        }
        if let Err(e) = self.device.release(self.device_ptr) {
            warn!(ptr = %self.device_ptr, error = %e, "device release failed");
        }
    }
}

#[derive(Debug)]
enum MirrorRef<T: Element> {
    Owner(Arc<Mirror<T>>),
    View(Weak<Mirror<T>>),
}

/// A fixed-width buffer mirrored between host memory and a [`Device`].
#[derive(Debug)]
pub struct DeviceBuffer<T: Element> {
    mirror: MirrorRef<T>,
    offset: usize,
    length: usize,
}

impl<T: Element> DeviceBuffer<T> {
    fn with_mirror(
        device: Arc<dyn Device>,
        host: HostBuffer<T>,
        state: SyncState,
    ) -> Result<Self> {
        let bytes = host.as_data().region().len();
        let device_ptr = device.allocate(bytes)?;
        debug!(
            device = device.name(),
            ptr = %device_ptr,
            bytes,
            element_type = %T::ELEMENT_TYPE,
            "device buffer allocated"
        );
        let length = host.len();
        let mirror = Mirror {
            host,
            device,
            device_ptr,
            device_offset: 0,
            owns_device: true,
            state: Mutex::new(state),
        };
        Ok(Self {
            mirror: MirrorRef::Owner(Arc::new(mirror)),
            offset: 0,
            length,
        })
    }

    /// Allocate `length` zeroed elements on the host and on `device`.
    ///
    /// The device copy is written on first use.
    pub fn new(device: Arc<dyn Device>, length: usize) -> Result<Self> {
        let host = HostBuffer::with_length(length, true)?;
        Self::with_mirror(device, host, SyncState::HostDirty)
    }

    /// Convert `array` element-wise into `T` and push it to `device`.
    pub fn from_array(device: Arc<dyn Device>, array: NumericArray) -> Result<Self> {
        let buffer = Self::with_mirror(device, HostBuffer::from_array(array)?, SyncState::HostDirty)?;
        buffer.flush()?;
        Ok(buffer)
    }

    /// Copy `values` to the host and push them to `device`.
    pub fn from_slice(device: Arc<dyn Device>, values: &[T]) -> Result<Self> {
        let buffer = Self::with_mirror(device, HostBuffer::from_slice(values)?, SyncState::HostDirty)?;
        buffer.flush()?;
        Ok(buffer)
    }

    /// Pair an existing host buffer with an existing device allocation.
    ///
    /// Neither side is allocated or owned: the host side is viewed and the
    /// device memory is not released on drop. `state` declares which side is
    /// current.
    pub fn wrap(
        device: Arc<dyn Device>,
        host: &HostBuffer<T>,
        device_ptr: DevicePtr,
        device_offset: usize,
        state: SyncState,
    ) -> Result<Self> {
        if !host.as_data().indexer().is_contiguous() {
            return Err(BufferError::InvalidArgument(
                "device mirrors need a contiguous host buffer".to_string(),
            ));
        }
        let length = host.len();
        let mirror = Mirror {
            host: host.view(0, length)?,
            device,
            device_ptr,
            device_offset,
            owns_device: false,
            state: Mutex::new(state),
        };
        trace!(ptr = %device_ptr, device_offset, length, "device buffer wrapped");
        Ok(Self {
            mirror: MirrorRef::Owner(Arc::new(mirror)),
            offset: 0,
            length,
        })
    }

    /// Adopt `length` elements of an existing device allocation, starting
    /// `device_offset` bytes in.
    ///
    /// A fresh host mirror is allocated and the buffer starts `DeviceDirty`,
    /// so the first host read pulls. The device memory is not released on
    /// drop.
    pub fn wrap_device(
        device: Arc<dyn Device>,
        device_ptr: DevicePtr,
        device_offset: usize,
        length: usize,
    ) -> Result<Self> {
        let host = HostBuffer::with_length(length, false)?;
        let mirror = Mirror {
            host,
            device,
            device_ptr,
            device_offset,
            owns_device: false,
            state: Mutex::new(SyncState::DeviceDirty),
        };
        trace!(ptr = %device_ptr, device_offset, length, "device memory wrapped");
        Ok(Self {
            mirror: MirrorRef::Owner(Arc::new(mirror)),
            offset: 0,
            length,
        })
    }

    fn mirror(&self) -> Result<Arc<Mirror<T>>> {
        match &self.mirror {
            MirrorRef::Owner(m) => Ok(Arc::clone(m)),
            MirrorRef::View(w) => w.upgrade().ok_or(BufferError::SourceReleased),
        }
    }

    /// A view over elements `[offset, offset + length)`, sharing both
    /// regions and the sync state.
    pub fn view(&self, offset: usize, length: usize) -> Result<Self> {
        if length == 0 {
            return Err(BufferError::InvalidLength(length));
        }
        if offset.checked_add(length).map_or(true, |end| end > self.length) {
            return Err(BufferError::RangeOutOfBounds {
                offset,
                stride: 1,
                count: length,
                len: self.length,
            });
        }
        let weak = match &self.mirror {
            MirrorRef::Owner(m) => Arc::downgrade(m),
            MirrorRef::View(w) => w.clone(),
        };
        Ok(Self {
            mirror: MirrorRef::View(weak),
            offset: self.offset + offset,
            length,
        })
    }

    pub fn device(&self) -> Result<Arc<dyn Device>> {
        Ok(Arc::clone(&self.mirror()?.device))
    }

    pub fn device_ptr(&self) -> Result<DevicePtr> {
        Ok(self.mirror()?.device_ptr)
    }

    pub fn sync_state(&self) -> Result<SyncState> {
        Ok(*self.mirror()?.state.lock())
    }

    /// Push host edits to the device. A no-op unless the host side is dirty.
    pub fn flush(&self) -> Result<()> {
        let mirror = self.mirror()?;
        let mut state = mirror.state.lock();
        mirror.flush_locked(&mut state)
    }

    /// Pull device writes into the host mirror. A no-op unless the device
    /// side is dirty.
    pub fn pull(&self) -> Result<()> {
        let mirror = self.mirror()?;
        let mut state = mirror.state.lock();
        mirror.pull_locked(&mut state)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.length {
            return Err(BufferError::IndexOutOfRange {
                index,
                len: self.length,
            });
        }
        Ok(())
    }

    /// Run `f` against a current host mirror.
    fn with_host<R>(&self, f: impl FnOnce(&HostBuffer<T>) -> Result<R>) -> Result<R> {
        let mirror = self.mirror()?;
        let mut state = mirror.state.lock();
        mirror.pull_locked(&mut state)?;
        f(&mirror.host)
    }

    /// Run `f` against a current host mirror and mark the host side dirty.
    fn with_host_mut(&self, f: impl FnOnce(&HostBuffer<T>) -> Result<()>) -> Result<()> {
        let mirror = self.mirror()?;
        let mut state = mirror.state.lock();
        mirror.pull_locked(&mut state)?;
        f(&mirror.host)?;
        *state = SyncState::HostDirty;
        Ok(())
    }

    fn native(&self) -> Result<NumericArray> {
        self.with_host(|host| host.as_data().get_range(self.offset, 1, self.length))
    }

    pub fn get(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        self.with_host(|host| host.get(self.offset + index))
    }

    pub fn set(&self, index: usize, value: T) -> Result<()> {
        self.check_index(index)?;
        self.with_host_mut(|host| host.set(self.offset + index, value))
    }

    /// Overwrite every element from `values`.
    pub fn copy_from_slice(&self, values: &[T]) -> Result<()> {
        if values.len() != self.length {
            return Err(BufferError::InvalidArgument(format!(
                "cannot copy {} values into a buffer of length {}",
                values.len(),
                self.length
            )));
        }
        self.with_host_mut(|host| {
            for (i, v) in values.iter().enumerate() {
                host.set(self.offset + i, *v)?;
            }
            Ok(())
        })
    }

    /// The stored element widened to `f64`.
    pub fn get_f64(&self, index: usize) -> Result<f64> {
        self.check_index(index)?;
        self.with_host(|host| host.get_f64(self.offset + index))
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        Ok(self.native()?.to_vec())
    }

    pub fn as_f32(&self) -> Result<Vec<f32>> {
        Ok(self.native()?.to_vec())
    }

    pub fn as_f64(&self) -> Result<Vec<f64>> {
        Ok(self.native()?.to_vec())
    }

    pub fn as_i32(&self) -> Result<Vec<i32>> {
        Ok(self.native()?.to_vec())
    }

    fn device_range(&self, mirror: &Mirror<T>) -> (usize, usize) {
        (
            mirror.device_offset + self.offset * T::WIDTH,
            self.length * T::WIDTH,
        )
    }

    /// Run a kernel over this buffer's device bytes.
    ///
    /// Pending host edits are flushed first; afterwards the device side is
    /// the current one.
    pub fn launch(&self, kernel: impl FnOnce(&mut [u8])) -> Result<()> {
        let mirror = self.mirror()?;
        let mut state = mirror.state.lock();
        mirror.flush_locked(&mut state)?;
        let (offset, len) = self.device_range(&mirror);
        let mut kernel = Some(kernel);
        mirror.device.with_memory(mirror.device_ptr, offset, len, &mut |memory: &mut [u8]| {
            if let Some(kernel) = kernel.take() {
                kernel(memory);
            }
        })?;
        *state = SyncState::DeviceDirty;
        trace!(ptr = %mirror.device_ptr, offset, len, "kernel launched");
        Ok(())
    }

    /// Element-wise kernel: replace every device element `x` with `f(x)`.
    pub fn launch_map(&self, f: impl Fn(T) -> T) -> Result<()> {
        self.launch(|memory| {
            for chunk in memory.chunks_exact_mut(T::WIDTH) {
                f(T::read_le(chunk)).write_le(chunk);
            }
        })
    }

    /// What a device-side consumer would read right now.
    ///
    /// Host edits are flushed first, so a host write is never invisible to
    /// the device.
    pub fn read_device(&self) -> Result<Vec<T>> {
        let mirror = self.mirror()?;
        let mut state = mirror.state.lock();
        mirror.flush_locked(&mut state)?;
        let (offset, len) = self.device_range(&mirror);
        let mut bytes = vec![0u8; len];
        mirror.device.download(mirror.device_ptr, offset, &mut bytes)?;
        Ok(decode_slice(&bytes))
    }
}

impl<T: Element> TypedBuffer for DeviceBuffer<T> {
    fn element_type(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    fn len(&self) -> usize {
        self.length
    }

    fn owns_memory(&self) -> bool {
        match &self.mirror {
            MirrorRef::Owner(m) => m.owns_device && m.host.owns_memory(),
            MirrorRef::View(_) => false,
        }
    }

    fn is_attached(&self) -> bool {
        self.mirror().is_ok_and(|m| m.host.is_attached())
    }

    fn as_type(&self, target: ElementType) -> Result<NumericArray> {
        let native = self.native()?;
        if native.element_type() == target {
            return Ok(native);
        }
        native.cast(target)
    }

    fn to_le_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.native()?.to_le_bytes())
    }

    /// Deep copy onto the same device.
    fn duplicate(&self) -> Result<Self> {
        let values = self.to_vec()?;
        Self::from_slice(self.device()?, &values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Arc<SimulatedDevice> {
        Arc::new(SimulatedDevice::new())
    }

    #[test]
    fn test_host_write_visible_after_flush() {
        let dev = device();
        let b = DeviceBuffer::<f32>::new(dev.clone(), 3).unwrap();
        b.set(1, 4.5).unwrap();
        assert_eq!(b.sync_state().unwrap(), SyncState::HostDirty);
        b.flush().unwrap();
        assert_eq!(b.sync_state().unwrap(), SyncState::Synced);
        assert_eq!(b.read_device().unwrap(), vec![0.0, 4.5, 0.0]);
    }

    #[test]
    fn test_device_read_flushes_pending_edits() {
        let dev = device();
        let b = DeviceBuffer::<i32>::from_slice(dev.clone(), &[1, 2]).unwrap();
        b.set(0, 10).unwrap();
        assert_eq!(b.read_device().unwrap(), vec![10, 2]);
        assert_eq!(b.sync_state().unwrap(), SyncState::Synced);
    }

    #[test]
    fn test_kernel_result_pulled_before_host_read() {
        let dev = device();
        let b = DeviceBuffer::<i16>::from_slice(dev.clone(), &[1, 2, 3]).unwrap();
        b.set(2, 30).unwrap();
        b.launch_map(|x| x * 2).unwrap();
        assert_eq!(b.sync_state().unwrap(), SyncState::DeviceDirty);
        assert_eq!(b.to_vec().unwrap(), vec![2, 4, 60]);
        assert_eq!(b.sync_state().unwrap(), SyncState::Synced);
    }

    #[test]
    fn test_set_after_kernel_keeps_device_results() {
        let dev = device();
        let b = DeviceBuffer::<u32>::from_slice(dev.clone(), &[1, 1]).unwrap();
        b.launch_map(|x| x + 1).unwrap();
        b.set(0, 9).unwrap();
        assert_eq!(b.read_device().unwrap(), vec![9, 2]);
    }

    #[test]
    fn test_from_array_narrows_then_pushes() {
        let dev = device();
        let b = DeviceBuffer::<i16>::from_array(
            dev.clone(),
            NumericArray::Float(vec![1.0, 2.5, -3.7]),
        )
        .unwrap();
        assert_eq!(dev.uploads(), 1);
        assert_eq!(b.sync_state().unwrap(), SyncState::Synced);
        assert_eq!(b.read_device().unwrap(), vec![1, 2, -3]);
        assert_eq!(b.get_f64(2).unwrap(), -3.0);
        assert_eq!(b.as_f64().unwrap(), vec![1.0, 2.0, -3.0]);
    }

    #[test]
    fn test_transfers_are_lazy() {
        let dev = device();
        let b = DeviceBuffer::<f64>::from_slice(dev.clone(), &[1.0]).unwrap();
        b.flush().unwrap();
        b.pull().unwrap();
        b.get(0).unwrap();
        assert_eq!(dev.uploads(), 1);
        assert_eq!(dev.downloads(), 0);
    }

    #[test]
    fn test_views_share_mirror() {
        let dev = device();
        let b = DeviceBuffer::<i64>::from_slice(dev.clone(), &[0, 1, 2, 3]).unwrap();
        let v = b.view(1, 2).unwrap();
        assert!(!v.owns_memory());
        assert!(b.owns_memory());
        v.set(0, 100).unwrap();
        assert_eq!(b.sync_state().unwrap(), SyncState::HostDirty);
        assert_eq!(b.read_device().unwrap(), vec![0, 100, 2, 3]);

        v.launch_map(|x| -x).unwrap();
        assert_eq!(b.to_vec().unwrap(), vec![0, -100, -2, 3]);
        assert!(v.view(1, 2).is_err());
        drop(b);
        assert!(matches!(v.get(0), Err(BufferError::SourceReleased)));
        assert_eq!(dev.allocation_count(), 0);
    }

    #[test]
    fn test_drop_releases_device_memory() {
        let tracker = Arc::new(MemoryTracker::new());
        let dev = Arc::new(SimulatedDevice::new().with_tracker(tracker.clone()));
        {
            let _b = DeviceBuffer::<f32>::new(dev.clone(), 16).unwrap();
            assert_eq!(dev.used_bytes(), 64);
            assert_eq!(tracker.live_bytes(MemoryKind::Device), 64);
        }
        assert_eq!(dev.used_bytes(), 0);
        assert!(tracker.summarize().is_ok());
    }

    #[test]
    fn test_device_capacity() {
        let dev = Arc::new(SimulatedDevice::with_capacity(16));
        let _a = DeviceBuffer::<f32>::new(dev.clone(), 2).unwrap();
        assert!(matches!(
            DeviceBuffer::<f32>::new(dev.clone(), 3),
            Err(BufferError::DeviceOutOfMemory {
                requested: 12,
                available: 8
            })
        ));
    }

    #[test]
    fn test_wrap_owns_neither_side() {
        let dev = device();
        let ptr = dev.allocate(8).unwrap();
        dev.upload(ptr, 0, &[7, 0, 0, 0, 9, 0, 0, 0]).unwrap();
        let host = HostBuffer::<u32>::with_length(2, true).unwrap();
        {
            let b = DeviceBuffer::wrap(dev.clone(), &host, ptr, 0, SyncState::DeviceDirty).unwrap();
            assert!(!b.owns_memory());
            assert_eq!(b.to_vec().unwrap(), vec![7, 9]);
        }
        assert_eq!(host.to_vec().unwrap(), vec![7, 9]);
        assert_eq!(dev.allocation_count(), 1);
        dev.release(ptr).unwrap();
        assert!(matches!(
            dev.release(ptr),
            Err(BufferError::UnknownDevicePointer(_))
        ));
    }

    #[test]
    fn test_wrap_device_pulls_on_first_read() {
        let dev = device();
        let ptr = dev.allocate(12).unwrap();
        dev.upload(ptr, 4, &[5, 0, 6, 0, 7, 0, 8, 0]).unwrap();
        {
            let b = DeviceBuffer::<i16>::wrap_device(dev.clone(), ptr, 4, 4).unwrap();
            assert_eq!(b.sync_state().unwrap(), SyncState::DeviceDirty);
            assert!(!b.owns_memory());
            assert_eq!(b.to_vec().unwrap(), vec![5, 6, 7, 8]);
            b.set(0, -1).unwrap();
            b.flush().unwrap();
        }
        let mut out = [0u8; 2];
        dev.download(ptr, 4, &mut out).unwrap();
        assert_eq!(i16::from_le_bytes(out), -1);
        assert_eq!(dev.allocation_count(), 1);

        let short = DeviceBuffer::<i16>::wrap_device(dev.clone(), ptr, 8, 4).unwrap();
        assert!(matches!(
            short.get(0),
            Err(BufferError::ViewOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_duplicate_is_independent() {
        let dev = device();
        let b = DeviceBuffer::<u8>::from_slice(dev.clone(), &[1, 2, 3]).unwrap();
        b.launch_map(|x| x + 1).unwrap();
        let d = b.duplicate().unwrap();
        assert_eq!(d.read_device().unwrap(), vec![2, 3, 4]);
        d.set(0, 0).unwrap();
        assert_eq!(b.get(0).unwrap(), 2);
        assert_ne!(d.device_ptr().unwrap(), b.device_ptr().unwrap());
    }

    #[test]
    fn test_as_type_and_bytes() {
        let dev = device();
        let b = DeviceBuffer::<half::f16>::from_array(dev, NumericArray::Double(vec![0.5, 2.0]))
            .unwrap();
        assert_eq!(b.element_size(), 2);
        assert_eq!(
            b.as_type(ElementType::Int32).unwrap(),
            NumericArray::Int32(vec![0, 2])
        );
        assert_eq!(b.to_le_bytes().unwrap().len(), 4);
    }

    #[test]
    fn test_concurrent_writers() {
        let dev = device();
        let b = DeviceBuffer::<i32>::new(dev, 8).unwrap();
        std::thread::scope(|s| {
            for i in 0..8 {
                let b = &b;
                s.spawn(move || b.set(i, i as i32 * 10).unwrap());
            }
        });
        assert_eq!(b.read_device().unwrap(), vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[test]
    fn test_kernel_reads_other_buffer_on_same_device() {
        let dev = device();
        let a = DeviceBuffer::<i32>::from_slice(dev.clone(), &[1, 2, 3]).unwrap();
        let b = DeviceBuffer::<i32>::from_slice(dev.clone(), &[10, 20, 30]).unwrap();
        b.set(0, 100).unwrap();

        a.launch(|memory| {
            let other = b.read_device().unwrap();
            for (chunk, y) in memory.chunks_exact_mut(4).zip(other) {
                let sum = i32::read_le(chunk) + y;
                sum.write_le(chunk);
            }
        })
        .unwrap();
        assert_eq!(a.to_vec().unwrap(), vec![101, 22, 33]);
        assert_eq!(b.sync_state().unwrap(), SyncState::Synced);

        a.launch(|_| b.launch_map(|y| y + 1).unwrap()).unwrap();
        assert_eq!(b.to_vec().unwrap(), vec![101, 21, 31]);
    }

    #[test]
    fn test_bounds() {
        let b = DeviceBuffer::<f32>::new(device(), 2).unwrap();
        assert!(matches!(
            b.get(2),
            Err(BufferError::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert!(b.copy_from_slice(&[1.0]).is_err());
        b.copy_from_slice(&[1.0, 2.0]).unwrap();
        assert_eq!(b.as_i32().unwrap(), vec![1, 2]);
        assert!(DeviceBuffer::<f32>::new(device(), 0).is_err());
    }
}
