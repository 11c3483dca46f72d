//! Driving VMs through the contract table

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serial_test::serial;
use topi_bytecode::ContainerBuilder;
use topi_value::{EnumDomain, TaggedValue};
use topi_vm::log::{reset_log_handler, set_log_handler};
use topi_vm::{
    Callbacks, Choice, ExternFunction, Library, Line, Severity, Snapshot, VmHandle, VmState,
    set_log_severity,
};

#[derive(Default)]
struct Recorder {
    lines: Mutex<Vec<Line>>,
    choices: Mutex<Vec<Vec<Choice>>>,
    changes: Mutex<Vec<(String, TaggedValue)>>,
}

impl Callbacks for Recorder {
    fn on_line(&self, _handle: VmHandle, line: &Line) {
        self.lines.lock().push(line.clone());
    }

    fn on_choices(&self, _handle: VmHandle, choices: &[Choice]) {
        self.choices.lock().push(choices.to_vec());
    }

    fn on_value_changed(&self, _handle: VmHandle, name: &str, value: &TaggedValue) {
        self.changes.lock().push((name.to_string(), value.clone()));
    }
}

fn line_then_choice() -> Vec<u8> {
    let mut b = ContainerBuilder::new();
    let yes = b.label();
    let no = b.label();
    b.bough("main")
        .line("Mara", "Shall we?", &[])
        .choices(&[("Yes", yes), ("No", no)]);
    b.bind(yes).end();
    b.bind(no).end();
    b.build().unwrap()
}

fn drive(library: &Library, handle: VmHandle) {
    while library.can_continue(handle) {
        assert!(library.run(handle));
        match library.state(handle) {
            Some(VmState::Waiting(topi_vm::WaitKind::Continue)) => {
                library.select_continue(handle);
            }
            Some(VmState::Waiting(topi_vm::WaitKind::Choice)) => {
                library.select_choice(handle, 0);
            }
            _ => {}
        }
    }
}

#[test]
fn test_line_then_choice_end_to_end() {
    let library = Library::new();
    let recorder = Arc::new(Recorder::default());
    let handle = library.create(line_then_choice(), recorder.clone()).unwrap();

    assert!(library.start(handle, "main"));
    drive(&library, handle);

    assert_eq!(recorder.lines.lock().len(), 1);
    assert_eq!(recorder.choices.lock().len(), 1);
    assert_eq!(recorder.choices.lock()[0].len(), 2);
    assert!(!library.can_continue(handle));
    assert!(!library.is_waiting(handle));
    assert!(library.destroy(handle));
}

/// Answers from inside the callbacks, the way a UI-less host would
struct AutoAnswer {
    library: OnceLock<Arc<Library>>,
    rejected_run: Mutex<Option<bool>>,
    lines: Mutex<usize>,
}

impl Callbacks for AutoAnswer {
    fn on_line(&self, handle: VmHandle, _line: &Line) {
        *self.lines.lock() += 1;
        if let Some(library) = self.library.get() {
            *self.rejected_run.lock() = Some(!library.run(handle));
            library.select_continue(handle);
        }
    }

    fn on_choices(&self, handle: VmHandle, choices: &[Choice]) {
        if let Some(library) = self.library.get() {
            library.select_choice(handle, choices.len() - 1);
        }
    }
}

#[test]
fn test_callbacks_may_answer_but_not_run() {
    let library = Arc::new(Library::new());
    let callbacks = Arc::new(AutoAnswer {
        library: OnceLock::new(),
        rejected_run: Mutex::new(None),
        lines: Mutex::new(0),
    });
    let _ = callbacks.library.set(library.clone());

    let handle = library.create(line_then_choice(), callbacks.clone()).unwrap();
    library.start(handle, "main");
    library.run(handle);
    assert_eq!(library.state(handle), Some(VmState::Running));
    library.run(handle);
    assert_eq!(library.state(handle), Some(VmState::Running));
    library.run(handle);

    assert_eq!(library.state(handle), Some(VmState::Finished));
    assert_eq!(*callbacks.lines.lock(), 1);
    assert_eq!(*callbacks.rejected_run.lock(), Some(true));
    library.destroy(handle);
}

#[test]
fn test_host_panic_is_contained() {
    let mut b = ContainerBuilder::new();
    let explode = b.extern_variable("explode");
    b.bough("main").call(explode, vec![], None).end();

    let library = Library::new();
    let handle = library
        .create(b.build().unwrap(), Arc::new(Recorder::default()))
        .unwrap();
    library.set_extern_func(handle, "explode", ExternFunction::new(0, |_| panic!("boom")));
    library.start(handle, "main");

    assert!(!library.run(handle));
    assert_eq!(library.state(handle), Some(VmState::Faulted));
    assert!(!library.can_continue(handle));
    assert!(!library.run(handle));
    assert!(library.destroy(handle));
}

#[test]
fn test_arity_mismatch_aborts_only_that_call() {
    let mut b = ContainerBuilder::new();
    let twice = b.extern_variable("twice");
    let a = b.variable("a");
    let c = b.variable("c");
    b.bough("main")
        .call(twice, vec![1.into(), 2.into()], Some(a))
        .call(twice, vec![4.into()], Some(c))
        .end();

    let library = Library::new();
    let handle = library
        .create(b.build().unwrap(), Arc::new(Recorder::default()))
        .unwrap();
    library.set_extern_func(
        handle,
        "twice",
        ExternFunction::new(1, |args| (args[0].as_number().unwrap_or(0.0) * 2.0).into()),
    );
    library.start(handle, "main");
    assert!(library.run(handle));

    assert_eq!(library.state(handle), Some(VmState::Finished));
    let a = library.get_value(handle, "a").unwrap().decode().unwrap();
    let c = library.get_value(handle, "c").unwrap().decode().unwrap();
    assert!(a.is_nil());
    assert_eq!(c, TaggedValue::from(8));
    assert_eq!(library.outstanding_buffers(), 0);
}

/// Host function that reads the VM calling it
struct Nested {
    library: OnceLock<Arc<Library>>,
    handle: OnceLock<VmHandle>,
}

#[test]
fn test_reentry_from_host_function_is_busy() {
    let mut b = ContainerBuilder::new();
    let peek = b.extern_variable("peek");
    let seen = b.variable("seen");
    b.bough("main").call(peek, vec![], Some(seen)).end();

    let library = Arc::new(Library::new());
    let handle = library
        .create(b.build().unwrap(), Arc::new(Recorder::default()))
        .unwrap();
    let nested = Arc::new(Nested {
        library: OnceLock::new(),
        handle: OnceLock::new(),
    });
    let _ = nested.library.set(library.clone());
    let _ = nested.handle.set(handle);

    let inner = nested.clone();
    library.set_extern_func(
        handle,
        "peek",
        ExternFunction::new(0, move |_| {
            let (Some(library), Some(&handle)) = (inner.library.get(), inner.handle.get()) else {
                return TaggedValue::Nil;
            };
            library.can_continue(handle).into()
        }),
    );
    library.start(handle, "main");
    assert!(library.run(handle));

    // The nested query could not borrow the VM and reported false
    let seen = library.get_value(handle, "seen").unwrap().decode().unwrap();
    assert_eq!(seen, TaggedValue::Bool(false));
}

#[test]
fn test_subscriptions() {
    let mut b = ContainerBuilder::new();
    let mood = b.variable("mood");
    let quiet = b.variable("quiet");
    b.extern_variable("name");
    b.bough("main")
        .set(mood, "happy")
        .set(quiet, true)
        .set(mood, "happy")
        .end();

    let library = Library::new();
    let recorder = Arc::new(Recorder::default());
    let handle = library.create(b.build().unwrap(), recorder.clone()).unwrap();

    assert!(library.subscribe(handle, "mood"));
    assert!(library.subscribe(handle, "mood"));
    assert!(!library.subscribe(handle, "missing"));
    assert!(!library.unsubscribe(handle, "quiet"));
    assert!(!library.unsubscribe(handle, "quiet"));
    assert!(library.subscribe(handle, "name"));
    assert!(library.set_extern(handle, "name", "Ada".into()));

    library.start(handle, "main");
    library.run(handle);

    let changes = recorder.changes.lock();
    assert_eq!(*changes, [("mood".to_string(), TaggedValue::from("happy"))]);
}

#[test]
fn test_snapshot_across_containers() {
    let mut first = ContainerBuilder::new();
    let coins = first.variable("coins");
    let met = first.variable("met");
    first.bough("main").set(coins, 10).set(met, true).end();

    let mut second = ContainerBuilder::new();
    second.variable("coins");
    second.bough("main").end();

    let library = Library::new();
    let recorder = Arc::new(Recorder::default());
    let a = library.create(first.build().unwrap(), recorder.clone()).unwrap();
    let b = library.create(second.build().unwrap(), recorder).unwrap();

    library.start(a, "main");
    library.run(a);
    let mut aggregate = Snapshot::new();
    aggregate.amend(&library.save(a).unwrap());

    // `met` is not a global of the second container and is ignored
    assert_eq!(library.load(b, &aggregate), 1);
    let coins = library.get_value(b, "coins").unwrap().decode().unwrap();
    assert_eq!(coins, TaggedValue::from(10));
}

#[test]
#[serial]
fn test_sequential_enum_violation_reported() {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    set_log_handler(move |severity, message| sink.lock().push((severity, message.to_string())));

    let mut b = ContainerBuilder::new();
    b.extern_variable("act");
    b.bough("main").end();
    let library = Library::new();
    let handle = library
        .create(b.build().unwrap(), Arc::new(Recorder::default()))
        .unwrap();
    library.declare_enum(handle, EnumDomain::sequential("Act", ["intro", "middle", "end"]));

    assert!(library.set_extern(handle, "act", TaggedValue::enumeration("Act", "middle")));
    assert!(!library.set_extern(handle, "act", TaggedValue::enumeration("Act", "intro")));
    assert!(library.set_extern(handle, "act", TaggedValue::enumeration("Act", "end")));

    set_log_severity(Severity::Error);
    reset_log_handler();

    let value = library.get_value(handle, "act").unwrap().decode().unwrap();
    assert_eq!(value, TaggedValue::enumeration("Act", "end"));
    assert!(
        messages
            .lock()
            .iter()
            .any(|(severity, message)| *severity == Severity::Error && message.contains("intro"))
    );
}

#[test]
fn test_out_of_range_choice_is_ignored() {
    let library = Library::new();
    let handle = library
        .create(line_then_choice(), Arc::new(Recorder::default()))
        .unwrap();
    library.start(handle, "main");
    library.run(handle);
    library.select_continue(handle);
    library.run(handle);

    assert!(!library.select_choice(handle, 2));
    assert!(library.is_waiting(handle));
    assert!(library.select_choice(handle, 1));
}
