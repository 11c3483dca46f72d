//! The function contract table
//!
//! [`Library`] owns every VM behind a generational handle arena. Each
//! operation resolves the handle, borrows the VM, and reports failures
//! through [`crate::log`] at the error's severity instead of returning
//! them, so a misbehaving host or script never takes the process down.
//!
//! Each VM sits behind a `ReentrantMutex<RefCell<_>>`. Other threads
//! block on the mutex only while an operation touches the VM; events are
//! dispatched after both the borrow and the lock are released, so
//! callbacks may call into any handle, including other VMs driven on
//! other threads. Re-entry while the VM is still borrowed (a host
//! function calling back in) is reported as [`TopiError::Busy`].

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use topi_bytecode::Container;
use topi_value::{Deallocator, EnumDomain, TaggedValue, ValueBuffer};
use tracing::debug;

use crate::callbacks::Callbacks;
use crate::error::{TopiError, TopiResult};
use crate::function::ExternFunction;
use crate::handle::VmHandle;
use crate::log::{self, Severity};
use crate::snapshot::Snapshot;
use crate::vm::{Vm, VmEvent, VmState};

struct Instance {
    vm: ReentrantMutex<RefCell<Vm>>,
    // Thread currently delivering this VM's events
    dispatching: Mutex<Option<ThreadId>>,
    callbacks: Arc<dyn Callbacks>,
}

impl Instance {
    fn dispatching_here(&self) -> bool {
        *self.dispatching.lock() == Some(thread::current().id())
    }
}

#[derive(Default)]
struct ArenaSlot {
    generation: u32,
    instance: Option<Arc<Instance>>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    fn insert(&mut self, instance: Arc<Instance>) -> VmHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(ArenaSlot::default());
                self.slots.len() as u32 - 1
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.instance = Some(instance);
        self.live += 1;
        VmHandle::new(index, slot.generation)
    }

    fn get(&self, handle: VmHandle) -> Option<Arc<Instance>> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.instance.clone())
    }

    fn remove(&mut self, handle: VmHandle) -> Option<Arc<Instance>> {
        let slot = self
            .slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())?;
        let instance = slot.instance.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index());
        self.live -= 1;
        Some(instance)
    }
}

/// Counts value buffers handed out and not yet returned
#[derive(Debug, Default)]
struct BufferPool {
    outstanding: AtomicUsize,
}

impl Deallocator for BufferPool {
    fn release(&self, bytes: Box<[u8]>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        drop(bytes);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle-based VM table
pub struct Library {
    arena: RwLock<Arena>,
    buffers: Arc<BufferPool>,
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl Library {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
            buffers: Arc::new(BufferPool::default()),
        }
    }

    /// Parse `bytes` and create a VM over them
    ///
    /// The bytes are moved into a heap allocation owned by the VM and freed
    /// only when the handle is destroyed.
    pub fn create(
        &self,
        bytes: impl Into<Box<[u8]>>,
        callbacks: Arc<dyn Callbacks>,
    ) -> TopiResult<VmHandle> {
        let container = Container::parse(bytes).inspect_err(|err| {
            log::report(Severity::Error, &format!("Failed to create VM: {err}"));
        })?;
        Ok(self.create_from(container, callbacks))
    }

    /// Create a VM over an already parsed container
    pub fn create_from(&self, container: Container, callbacks: Arc<dyn Callbacks>) -> VmHandle {
        let instance = Arc::new(Instance {
            vm: ReentrantMutex::new(RefCell::new(Vm::new(container))),
            dispatching: Mutex::new(None),
            callbacks,
        });
        let handle = self.arena.write().insert(instance);
        debug!(%handle, "created VM");
        handle
    }

    /// Release a VM; stale handles are a logged no-op
    pub fn destroy(&self, handle: VmHandle) -> bool {
        let removed = self.arena.write().remove(handle);
        match removed {
            Some(_) => {
                debug!(%handle, "destroyed VM");
                true
            }
            None => {
                log::report(
                    Severity::Debug,
                    &format!("Ignoring destroy of stale handle {handle}"),
                );
                false
            }
        }
    }

    /// Check whether a handle resolves
    pub fn is_alive(&self, handle: VmHandle) -> bool {
        self.arena.read().get(handle).is_some()
    }

    /// Number of live VMs
    pub fn len(&self) -> usize {
        self.arena.read().live
    }

    /// Check if no VM is alive
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value buffers handed out and not yet released
    pub fn outstanding_buffers(&self) -> usize {
        self.buffers.outstanding.load(Ordering::Acquire)
    }

    /// Set the process-wide log threshold
    pub fn set_log_severity(&self, severity: Severity) {
        log::set_log_severity(severity);
    }

    fn instance(&self, handle: VmHandle) -> TopiResult<Arc<Instance>> {
        self.arena
            .read()
            .get(handle)
            .ok_or(TopiError::InvalidHandle(handle))
    }

    fn report<T>(result: TopiResult<T>) -> Option<T> {
        result.inspect_err(log::report_error).ok()
    }

    // Borrow the VM for one operation, then flush whatever it queued
    fn with_vm<T>(&self, handle: VmHandle, f: impl FnOnce(&mut Vm) -> TopiResult<T>) -> TopiResult<T> {
        let instance = self.instance(handle)?;
        let result = {
            let guard = instance.vm.lock();
            let mut vm = guard.try_borrow_mut().map_err(|_| TopiError::Busy(handle))?;
            f(&mut vm)
        };
        Self::flush(handle, &instance);
        result
    }

    fn query<T>(&self, handle: VmHandle, f: impl FnOnce(&Vm) -> T) -> TopiResult<T> {
        let instance = self.instance(handle)?;
        let guard = instance.vm.lock();
        let vm = guard.try_borrow().map_err(|_| TopiError::Busy(handle))?;
        Ok(f(&vm))
    }

    // Report diagnostics and deliver events with the VM unlocked
    fn flush(handle: VmHandle, instance: &Instance) {
        // Events raised by a callback are picked up by the outer loop
        let nested = instance.dispatching_here();
        loop {
            let (diagnostics, events) = {
                let guard = instance.vm.lock();
                let Ok(mut vm) = guard.try_borrow_mut() else {
                    return;
                };
                let events = if nested { Vec::new() } else { vm.take_events() };
                (vm.take_diagnostics(), events)
            };

            for diagnostic in &diagnostics {
                log::report_error(diagnostic);
            }
            if events.is_empty() {
                return;
            }

            let current = thread::current().id();
            *instance.dispatching.lock() = Some(current);
            let reset = scopeguard::guard(&instance.dispatching, |flag| {
                let mut flag = flag.lock();
                if *flag == Some(current) {
                    *flag = None;
                }
            });
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                for event in &events {
                    match event {
                        VmEvent::Line(line) => instance.callbacks.on_line(handle, line),
                        VmEvent::Choices(choices) => instance.callbacks.on_choices(handle, choices),
                        VmEvent::ValueChanged { name, value } => {
                            instance.callbacks.on_value_changed(handle, name, value)
                        }
                    }
                }
            }));
            drop(reset);

            if let Err(payload) = outcome {
                let guard = instance.vm.lock();
                if let Ok(mut vm) = guard.try_borrow_mut() {
                    vm.fault();
                }
                drop(guard);
                log::report(
                    Severity::Error,
                    &format!("Callback for {handle} panicked: {}", panic_message(&*payload)),
                );
                return;
            }
        }
    }

    fn try_drive(
        &self,
        handle: VmHandle,
        operation: &'static str,
        f: impl FnOnce(&mut Vm) -> TopiResult<()>,
    ) -> TopiResult<()> {
        let instance = self.instance(handle)?;
        if instance.dispatching_here() {
            return Err(TopiError::Reentrant(operation));
        }
        let guard = instance.vm.lock();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut vm = guard.try_borrow_mut().map_err(|_| TopiError::Busy(handle))?;
            f(&mut vm)
        }));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let ip = match guard.try_borrow_mut() {
                    Ok(mut vm) => {
                        vm.fault();
                        vm.ip()
                    }
                    Err(_) => 0,
                };
                Err(TopiError::RuntimeFault {
                    ip,
                    message: format!("host panic: {}", panic_message(&*payload)),
                })
            }
        };
        drop(guard);
        Self::flush(handle, &instance);
        result
    }

    /// Begin executing `bough`; returns whether it started
    pub fn start(&self, handle: VmHandle, bough: &str) -> bool {
        Self::report(self.try_drive(handle, "start", |vm| vm.start(bough))).is_some()
    }

    /// Execute until the script waits, ends or faults
    ///
    /// Events are delivered to the callbacks before this returns. Returns
    /// false when the call was rejected or the VM faulted.
    pub fn run(&self, handle: VmHandle) -> bool {
        Self::report(self.try_drive(handle, "run", Vm::run)).is_some()
    }

    /// Current execution state
    pub fn state(&self, handle: VmHandle) -> Option<VmState> {
        Self::report(self.query(handle, Vm::state))
    }

    /// True until the VM finishes or faults; false for invalid handles
    pub fn can_continue(&self, handle: VmHandle) -> bool {
        Self::report(self.query(handle, Vm::can_continue)).unwrap_or(false)
    }

    /// True while suspended on a line or a choice set
    pub fn is_waiting(&self, handle: VmHandle) -> bool {
        Self::report(self.query(handle, Vm::is_waiting)).unwrap_or(false)
    }

    /// Resume after a line
    pub fn select_continue(&self, handle: VmHandle) -> bool {
        Self::report(self.with_vm(handle, Vm::select_continue)).is_some()
    }

    /// Resume at the chosen option; out-of-range indices are ignored
    pub fn select_choice(&self, handle: VmHandle, index: usize) -> bool {
        Self::report(self.with_vm(handle, |vm| vm.select_choice(index))).is_some()
    }

    /// Observe script changes to `name`
    pub fn subscribe(&self, handle: VmHandle, name: &str) -> bool {
        Self::report(self.with_vm(handle, |vm| vm.subscribe(name))).is_some()
    }

    /// Stop observing `name`; returns whether a subscription existed
    pub fn unsubscribe(&self, handle: VmHandle, name: &str) -> bool {
        Self::report(self.with_vm(handle, |vm| Ok(vm.unsubscribe(name)))).unwrap_or(false)
    }

    /// Assign an extern variable
    pub fn set_extern(&self, handle: VmHandle, name: &str, value: TaggedValue) -> bool {
        Self::report(self.with_vm(handle, |vm| vm.set_extern(name, value))).is_some()
    }

    /// Bind a host function to an extern
    pub fn set_extern_func(&self, handle: VmHandle, name: &str, function: ExternFunction) -> bool {
        Self::report(self.with_vm(handle, |vm| vm.set_extern_func(name, function))).is_some()
    }

    /// Read a global, handing the value off as a buffer owned by this library
    pub fn get_value(&self, handle: VmHandle, name: &str) -> Option<ValueBuffer> {
        let value = Self::report(self.query(handle, |vm| vm.value(name).cloned()).and_then(|r| r))?;
        self.buffers.outstanding.fetch_add(1, Ordering::AcqRel);
        let owner: Arc<dyn Deallocator> = self.buffers.clone();
        Some(ValueBuffer::encode(&value, owner))
    }

    /// Register an enum domain
    pub fn declare_enum(&self, handle: VmHandle, domain: EnumDomain) -> bool {
        Self::report(self.with_vm(handle, |vm| {
            vm.declare_enum(domain);
            Ok(())
        }))
        .is_some()
    }

    /// Capture the VM's globals
    pub fn save(&self, handle: VmHandle) -> Option<Snapshot> {
        Self::report(self.with_vm(handle, |vm| Ok(vm.save())))
    }

    /// Prime globals from a snapshot; returns how many entries applied
    pub fn load(&self, handle: VmHandle, snapshot: &Snapshot) -> usize {
        Self::report(self.with_vm(handle, |vm| Ok(vm.load(snapshot)))).unwrap_or(0)
    }

    /// Extern names declared by the VM's container
    pub fn externs(&self, handle: VmHandle) -> Option<BTreeSet<String>> {
        Self::report(self.query(handle, |vm| vm.container().externs()))
    }

    /// Bough names declared by the VM's container
    pub fn bough_names(&self, handle: VmHandle) -> Option<Vec<String>> {
        Self::report(self.query(handle, |vm| {
            vm.container()
                .bough_names()
                .into_iter()
                .map(str::to_string)
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{Choice, Line};
    use parking_lot::Mutex;
    use serial_test::serial;
    use topi_bytecode::ContainerBuilder;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<Line>>,
        choices: Mutex<Vec<Vec<Choice>>>,
    }

    impl Callbacks for Recorder {
        fn on_line(&self, _handle: VmHandle, line: &Line) {
            self.lines.lock().push(line.clone());
        }

        fn on_choices(&self, _handle: VmHandle, choices: &[Choice]) {
            self.choices.lock().push(choices.to_vec());
        }
    }

    fn bytes() -> Vec<u8> {
        let mut b = ContainerBuilder::new();
        b.variable("coins");
        b.bough("main").line("A", "hello", &[]).end();
        b.build().unwrap()
    }

    #[test]
    fn test_stale_handle_after_destroy() {
        let library = Library::new();
        let recorder = Arc::new(Recorder::default());
        let first = library.create(bytes(), recorder.clone()).unwrap();
        assert!(library.destroy(first));
        assert!(!library.destroy(first));

        // The slot is reused with a new generation
        let second = library.create(bytes(), recorder).unwrap();
        assert_eq!(second.index(), first.index());
        assert_ne!(second, first);
        assert!(!library.is_alive(first));
        assert!(!library.start(first, "main"));
        assert!(library.start(second, "main"));
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn test_malformed_bytes_rejected() {
        let library = Library::new();
        let err = library
            .create(vec![1, 2, 3], Arc::new(Recorder::default()))
            .unwrap_err();
        assert!(matches!(err, TopiError::Format(_)));
        assert!(library.is_empty());
    }

    #[test]
    fn test_value_buffers_return_to_library() {
        let library = Library::new();
        let handle = library.create(bytes(), Arc::new(Recorder::default())).unwrap();
        assert!(library.get_value(handle, "missing").is_none());

        let first = library.get_value(handle, "coins").unwrap();
        let mut second = library.get_value(handle, "coins").unwrap();
        assert_eq!(library.outstanding_buffers(), 2);
        assert!(first.decode().unwrap().is_nil());

        second.release();
        drop(second);
        assert_eq!(library.outstanding_buffers(), 1);
        drop(first);
        assert_eq!(library.outstanding_buffers(), 0);
    }

    #[test]
    #[serial]
    fn test_errors_reported_through_log_channel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        log::set_log_handler(move |severity, message| sink.lock().push((severity, message.to_string())));
        log::set_log_severity(Severity::Debug);

        let library = Library::new();
        let handle = library.create(bytes(), Arc::new(Recorder::default())).unwrap();
        assert!(!library.set_extern(handle, "coins", 3.into()));
        assert!(!library.subscribe(handle, "nothing"));

        log::set_log_severity(Severity::default());
        log::reset_log_handler();

        let seen = seen.lock();
        assert!(seen.iter().any(|(s, m)| *s == Severity::Error && m.contains("not extern")));
        assert!(seen.iter().any(|(s, m)| *s == Severity::Warn && m.contains("nothing")));
    }
}
