//! Execution step engine
//!
//! A [`Vm`] owns a parsed [`Container`] and its global slots and runs the
//! code section until the script needs the host: a line waits for
//! continue, a choice set waits for a selection, an end finishes.
//!
//! Output is queued as [`VmEvent`]s and non-fatal problems as diagnostics;
//! the [`crate::Library`] drains both after releasing the VM so callbacks
//! can call back in.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use topi_bytecode::{Container, Instruction};
use topi_value::{EnumDomain, EnumDomains, TaggedValue, json};

use crate::callbacks::{Choice, Line};
use crate::error::{TopiError, TopiResult};
use crate::function::ExternFunction;
use crate::snapshot::Snapshot;

static NIL: TaggedValue = TaggedValue::Nil;

/// What a waiting VM needs from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// `select_continue` after a line
    Continue,
    /// `select_choice` after a choice set
    Choice,
}

/// Execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Created, no bough started
    Ready,
    /// Executing instructions
    Running,
    /// Suspended until the host answers
    Waiting(WaitKind),
    /// Bough ended
    Finished,
    /// Stopped by a runtime fault
    Faulted,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Waiting(WaitKind::Continue) => "waiting for continue",
            Self::Waiting(WaitKind::Choice) => "waiting for a choice",
            Self::Finished => "finished",
            Self::Faulted => "faulted",
        })
    }
}

/// Output queued during execution
#[derive(Debug, Clone, PartialEq)]
pub enum VmEvent {
    /// A line was emitted
    Line(Line),
    /// A choice set was emitted
    Choices(Vec<Choice>),
    /// A subscribed global changed
    ValueChanged {
        /// Global name
        name: String,
        /// New value
        value: TaggedValue,
    },
}

#[derive(Debug, Clone)]
enum Slot {
    Value(TaggedValue),
    Function(ExternFunction),
}

#[derive(Debug)]
struct Global {
    name: String,
    is_extern: bool,
    is_mutable: bool,
    slot: Slot,
}

impl Global {
    fn value(&self) -> &TaggedValue {
        match &self.slot {
            Slot::Value(value) => value,
            Slot::Function(_) => &NIL,
        }
    }
}

fn fault(ip: u32, message: impl Into<String>) -> TopiError {
    TopiError::RuntimeFault {
        ip,
        message: message.into(),
    }
}

/// A single VM instance
#[derive(Debug)]
pub struct Vm {
    container: Container,
    globals: FxHashMap<u32, Global>,
    state: VmState,
    ip: u32,
    choices: Vec<Choice>,
    visits: FxHashMap<u32, u32>,
    subscriptions: FxHashSet<u32>,
    domains: EnumDomains,
    events: Vec<VmEvent>,
    diagnostics: Vec<TopiError>,
}

impl Vm {
    /// Create a VM over a parsed container
    pub fn new(container: Container) -> Self {
        let globals = container
            .globals()
            .iter()
            .map(|symbol| {
                let global = Global {
                    name: symbol.name.clone(),
                    is_extern: symbol.is_extern,
                    is_mutable: symbol.is_mutable,
                    slot: Slot::Value(TaggedValue::Nil),
                };
                (symbol.index, global)
            })
            .collect();

        Self {
            container,
            globals,
            state: VmState::Ready,
            ip: 0,
            choices: Vec::new(),
            visits: FxHashMap::default(),
            subscriptions: FxHashSet::default(),
            domains: EnumDomains::new(),
            events: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// The container being executed
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Current state
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Offset of the next instruction
    pub fn ip(&self) -> u32 {
        self.ip
    }

    /// True until the VM finishes or faults
    pub fn can_continue(&self) -> bool {
        !matches!(self.state, VmState::Finished | VmState::Faulted)
    }

    /// True while suspended on a line or a choice set
    pub fn is_waiting(&self) -> bool {
        matches!(self.state, VmState::Waiting(_))
    }

    /// Options of the choice set being waited on
    pub fn pending_choices(&self) -> &[Choice] {
        &self.choices
    }

    /// Begin executing `bough`
    pub fn start(&mut self, bough: &str) -> TopiResult<()> {
        match self.state {
            VmState::Ready | VmState::Finished => {}
            state => {
                return Err(TopiError::InvalidState {
                    operation: "start",
                    state,
                });
            }
        }
        let entry = self
            .container
            .bough(bough)
            .ok_or_else(|| TopiError::UnknownBough(bough.to_string()))?
            .entry;
        self.ip = entry;
        self.choices.clear();
        self.state = VmState::Running;
        Ok(())
    }

    /// Execute until the script waits, ends or faults
    ///
    /// A no-op while waiting. On a fault the VM is left [`VmState::Faulted`].
    pub fn run(&mut self) -> TopiResult<()> {
        match self.state {
            VmState::Running => {}
            VmState::Waiting(_) => return Ok(()),
            state => {
                return Err(TopiError::InvalidState {
                    operation: "run",
                    state,
                });
            }
        }
        while self.state == VmState::Running {
            if let Err(err) = self.step() {
                self.fault();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stop the VM for good
    pub fn fault(&mut self) {
        self.state = VmState::Faulted;
        self.choices.clear();
    }

    fn step(&mut self) -> TopiResult<()> {
        let at = self.ip;
        let code_len = self.container.code().len();
        if at as usize >= code_len {
            self.state = VmState::Finished;
            return Ok(());
        }
        let (instruction, next) = self
            .container
            .instruction_at(at)
            .map_err(|err| fault(at, err.to_string()))?;
        self.ip = next;

        match instruction {
            Instruction::End => self.state = VmState::Finished,
            Instruction::Line {
                speaker,
                content,
                tags,
            } => {
                self.events.push(VmEvent::Line(Line {
                    speaker,
                    content,
                    tags,
                }));
                self.state = VmState::Waiting(WaitKind::Continue);
            }
            Instruction::Choices { options } => {
                if options.is_empty() {
                    return Err(fault(at, "empty choice set"));
                }
                let mut choices = Vec::with_capacity(options.len());
                for option in options {
                    self.check_target(at, option.target)?;
                    choices.push(Choice {
                        visit_count: self.visits.get(&option.target).copied().unwrap_or(0),
                        content: option.content,
                        tags: option.tags,
                        ip: option.target,
                    });
                }
                self.events.push(VmEvent::Choices(choices.clone()));
                self.choices = choices;
                self.state = VmState::Waiting(WaitKind::Choice);
            }
            Instruction::Jump { target } => {
                self.check_target(at, target)?;
                self.ip = target;
            }
            Instruction::JumpIfFalse { global, target } => {
                self.check_target(at, target)?;
                let value = self
                    .globals
                    .get(&global)
                    .ok_or_else(|| fault(at, format!("unknown global index {global}")))?;
                let truthy = match &value.slot {
                    Slot::Value(value) => value.is_truthy(),
                    Slot::Function(_) => true,
                };
                if !truthy {
                    self.ip = target;
                }
            }
            Instruction::Set { global, value } => self.assign(at, global, value)?,
            Instruction::Call {
                function,
                args,
                dest,
            } => {
                let result = self.call(at, function, &args)?;
                if let Some(dest) = dest {
                    self.assign(at, dest, result)?;
                }
            }
        }
        Ok(())
    }

    fn check_target(&self, at: u32, target: u32) -> TopiResult<()> {
        if target as usize > self.container.code().len() {
            return Err(fault(at, format!("jump target {target} outside the code section")));
        }
        Ok(())
    }

    fn call(&mut self, at: u32, function: u32, args: &[TaggedValue]) -> TopiResult<TaggedValue> {
        let global = self
            .globals
            .get(&function)
            .ok_or_else(|| fault(at, format!("unknown global index {function}")))?;
        let outcome = match &global.slot {
            Slot::Function(f) => f.call(&global.name, args),
            Slot::Value(_) => Err(TopiError::UnboundFunction(global.name.clone())),
        };
        Ok(outcome.unwrap_or_else(|err| {
            self.diagnostics.push(err);
            TaggedValue::Nil
        }))
    }

    // Script-side assignment: enforces immutability, notifies subscribers
    fn assign(&mut self, at: u32, index: u32, value: TaggedValue) -> TopiResult<()> {
        let global = self
            .globals
            .get_mut(&index)
            .ok_or_else(|| fault(at, format!("unknown global index {index}")))?;
        let current = global.value();

        if !global.is_mutable && !current.is_nil() {
            return Err(fault(
                at,
                format!("assignment to immutable global `{}`", global.name),
            ));
        }
        if let Err(source) = self.domains.check_assignment(current, &value) {
            self.diagnostics.push(TopiError::Value {
                name: global.name.clone(),
                source,
            });
            return Ok(());
        }
        if *current == value {
            return Ok(());
        }
        if self.subscriptions.contains(&index) {
            self.events.push(VmEvent::ValueChanged {
                name: global.name.clone(),
                value: value.clone(),
            });
        }
        global.slot = Slot::Value(value);
        Ok(())
    }

    fn global(&self, name: &str) -> TopiResult<(u32, &Global)> {
        self.container
            .global(name)
            .and_then(|symbol| self.globals.get(&symbol.index).map(|g| (symbol.index, g)))
            .ok_or_else(|| TopiError::UnknownVariable(name.to_string()))
    }

    fn extern_global(&mut self, name: &str) -> TopiResult<&mut Global> {
        let (index, global) = self.global(name)?;
        if !global.is_extern {
            return Err(TopiError::NotExtern(name.to_string()));
        }
        self.globals
            .get_mut(&index)
            .ok_or_else(|| TopiError::UnknownVariable(name.to_string()))
    }

    /// Host assignment of an extern variable; subscribers are not notified
    pub fn set_extern(&mut self, name: &str, value: TaggedValue) -> TopiResult<()> {
        let (index, global) = self.global(name)?;
        if !global.is_extern {
            return Err(TopiError::NotExtern(name.to_string()));
        }
        if let Err(source) = self.domains.check_assignment(global.value(), &value) {
            return Err(TopiError::Value {
                name: name.to_string(),
                source,
            });
        }
        if let Some(global) = self.globals.get_mut(&index) {
            global.slot = Slot::Value(value);
        }
        Ok(())
    }

    /// Bind a host function to an extern global
    pub fn set_extern_func(&mut self, name: &str, function: ExternFunction) -> TopiResult<()> {
        let global = self.extern_global(name)?;
        global.slot = Slot::Function(function);
        if let Some(symbol) = self.container.global(name) {
            self.subscriptions.remove(&symbol.index);
        }
        Ok(())
    }

    /// Observe script changes to a global
    pub fn subscribe(&mut self, name: &str) -> TopiResult<()> {
        let (index, global) = self.global(name)?;
        if matches!(global.slot, Slot::Function(_)) {
            return Err(TopiError::NotObservable(name.to_string()));
        }
        self.subscriptions.insert(index);
        Ok(())
    }

    /// Stop observing a global; returns whether a subscription existed
    pub fn unsubscribe(&mut self, name: &str) -> bool {
        match self.container.global(name) {
            Some(symbol) => self.subscriptions.remove(&symbol.index),
            None => false,
        }
    }

    /// Check whether a global is observed
    pub fn is_subscribed(&self, name: &str) -> bool {
        self.container
            .global(name)
            .is_some_and(|symbol| self.subscriptions.contains(&symbol.index))
    }

    /// Current value of a global
    pub fn value(&self, name: &str) -> TopiResult<&TaggedValue> {
        let (_, global) = self.global(name)?;
        match &global.slot {
            Slot::Value(value) => Ok(value),
            Slot::Function(_) => Err(TopiError::NotObservable(name.to_string())),
        }
    }

    /// Register an enum domain for assignment checks
    pub fn declare_enum(&mut self, domain: EnumDomain) {
        self.domains.declare(domain);
    }

    /// Capture every global, nil included; function bindings are left out
    pub fn save(&mut self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for symbol in self.container.globals() {
            let Some(Global {
                slot: Slot::Value(value),
                ..
            }) = self.globals.get(&symbol.index)
            else {
                continue;
            };
            if let Err(source) = snapshot.insert(symbol.name.clone(), value) {
                self.diagnostics.push(TopiError::SnapshotEntry {
                    name: symbol.name.clone(),
                    source,
                });
            }
        }
        snapshot
    }

    /// Prime globals from a snapshot, returning how many were applied
    ///
    /// Keys that name no global of this container are ignored. Entries that
    /// fail conversion or domain checks are skipped and reported.
    pub fn load(&mut self, snapshot: &Snapshot) -> usize {
        let mut applied = 0;
        for (name, json) in snapshot.iter() {
            let Some(symbol) = self.container.global(name) else {
                continue;
            };
            let Some(global) = self.globals.get_mut(&symbol.index) else {
                continue;
            };
            if matches!(global.slot, Slot::Function(_)) {
                continue;
            }
            let checked = json::from_json(json).and_then(|value| {
                self.domains
                    .check_assignment(global.value(), &value)
                    .map(|()| value)
            });
            match checked {
                Ok(value) => {
                    global.slot = Slot::Value(value);
                    applied += 1;
                }
                Err(source) => self.diagnostics.push(TopiError::SnapshotEntry {
                    name: name.clone(),
                    source,
                }),
            }
        }
        applied
    }

    /// Resume after a line
    pub fn select_continue(&mut self) -> TopiResult<()> {
        match self.state {
            VmState::Waiting(WaitKind::Continue) => {
                self.state = VmState::Running;
                Ok(())
            }
            state => Err(TopiError::InvalidState {
                operation: "continue",
                state,
            }),
        }
    }

    /// Resume at the chosen option
    ///
    /// An out-of-range index is rejected and the VM keeps waiting.
    pub fn select_choice(&mut self, index: usize) -> TopiResult<()> {
        if self.state != VmState::Waiting(WaitKind::Choice) {
            return Err(TopiError::InvalidState {
                operation: "select a choice",
                state: self.state,
            });
        }
        let target = self
            .choices
            .get(index)
            .ok_or(TopiError::ChoiceIndexOutOfRange {
                index,
                count: self.choices.len(),
            })?
            .ip;
        *self.visits.entry(target).or_insert(0) += 1;
        self.choices.clear();
        self.ip = target;
        self.state = VmState::Running;
        Ok(())
    }

    /// Drain queued output
    pub fn take_events(&mut self) -> Vec<VmEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drain queued non-fatal problems
    pub fn take_diagnostics(&mut self) -> Vec<TopiError> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topi_bytecode::ContainerBuilder;

    fn vm(build: impl FnOnce(&mut ContainerBuilder)) -> Vm {
        let mut builder = ContainerBuilder::new();
        build(&mut builder);
        Vm::new(Container::parse(builder.build().unwrap()).unwrap())
    }

    #[test]
    fn test_line_then_choice_then_end() {
        let mut vm = vm(|b| {
            let yes = b.label();
            let no = b.label();
            b.bough("main")
                .line("Mara", "Ready?", &["ask"])
                .choices(&[("Yes", yes), ("No", no)]);
            b.bind(yes).end();
            b.bind(no).end();
        });

        vm.start("main").unwrap();
        vm.run().unwrap();
        assert_eq!(vm.state(), VmState::Waiting(WaitKind::Continue));
        let events = vm.take_events();
        assert!(matches!(&events[..], [VmEvent::Line(line)] if line.tags == ["ask"]));

        vm.run().unwrap();
        assert!(vm.take_events().is_empty(), "run while waiting is a no-op");

        vm.select_continue().unwrap();
        vm.run().unwrap();
        assert_eq!(vm.state(), VmState::Waiting(WaitKind::Choice));
        assert_eq!(vm.pending_choices().len(), 2);

        vm.select_choice(1).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.state(), VmState::Finished);
        assert!(!vm.can_continue());
    }

    #[test]
    fn test_out_of_range_choice_keeps_waiting() {
        let mut vm = vm(|b| {
            let only = b.label();
            b.bough("main").choices(&[("Only", only)]);
            b.bind(only).end();
        });
        vm.start("main").unwrap();
        vm.run().unwrap();
        assert!(matches!(
            vm.select_choice(5),
            Err(TopiError::ChoiceIndexOutOfRange { index: 5, count: 1 })
        ));
        assert!(vm.is_waiting());
        vm.select_choice(0).unwrap();
    }

    #[test]
    fn test_visit_counts() {
        let mut vm = vm(|b| {
            let top = b.label();
            let again = b.label();
            b.bough("main").bind(top).choices(&[("Again", again)]);
            b.bind(again).jump(top);
        });
        vm.start("main").unwrap();
        for expected in 0..3 {
            vm.run().unwrap();
            assert_eq!(vm.pending_choices()[0].visit_count, expected);
            vm.select_choice(0).unwrap();
        }
    }

    #[test]
    fn test_unknown_bough_leaves_state() {
        let mut vm = vm(|b| {
            b.bough("main").end();
        });
        assert!(matches!(vm.start("nope"), Err(TopiError::UnknownBough(_))));
        assert_eq!(vm.state(), VmState::Ready);
    }

    #[test]
    fn test_run_before_start() {
        let mut vm = vm(|b| {
            b.bough("main").end();
        });
        assert!(matches!(vm.run(), Err(TopiError::InvalidState { .. })));
    }

    #[test]
    fn test_falls_off_end() {
        let mut vm = vm(|b| {
            let x = b.variable("x");
            b.bough("main").set(x, 1);
        });
        vm.start("main").unwrap();
        vm.run().unwrap();
        assert_eq!(vm.state(), VmState::Finished);
        assert_eq!(vm.value("x").unwrap(), &TaggedValue::from(1));
    }

    #[test]
    fn test_script_changes_notify_subscribers() {
        let mut vm = vm(|b| {
            let coins = b.variable("coins");
            b.bough("main").set(coins, 1).set(coins, 1.00001).set(coins, 2).end();
        });
        vm.subscribe("coins").unwrap();
        vm.start("main").unwrap();
        vm.run().unwrap();
        let changes: Vec<_> = vm
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                VmEvent::ValueChanged { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(changes, [TaggedValue::from(1), TaggedValue::from(2)]);
    }

    #[test]
    fn test_host_assignment_does_not_notify() {
        let mut vm = vm(|b| {
            b.extern_variable("name");
            b.bough("main").end();
        });
        vm.subscribe("name").unwrap();
        vm.set_extern("name", "Ada".into()).unwrap();
        assert!(vm.take_events().is_empty());
        assert_eq!(vm.value("name").unwrap(), &TaggedValue::from("Ada"));
    }

    #[test]
    fn test_extern_checks() {
        let mut vm = vm(|b| {
            b.variable("local");
            b.extern_variable("greet");
            b.bough("main").end();
        });
        assert!(matches!(
            vm.set_extern("missing", 1.into()),
            Err(TopiError::UnknownVariable(_))
        ));
        assert!(matches!(
            vm.set_extern("local", 1.into()),
            Err(TopiError::NotExtern(_))
        ));

        vm.set_extern_func("greet", ExternFunction::new(0, |_| "hi".into()))
            .unwrap();
        assert!(matches!(
            vm.subscribe("greet"),
            Err(TopiError::NotObservable(_))
        ));
        assert!(!vm.unsubscribe("greet"));
        assert!(!vm.unsubscribe("missing"));
    }

    #[test]
    fn test_call_results_and_arity() {
        let mut vm = vm(|b| {
            let add = b.extern_variable("add");
            let sum = b.variable("sum");
            let bad = b.variable("bad");
            b.bough("main")
                .call(add, vec![2.into(), 3.into()], Some(sum))
                .call(add, vec![1.into()], Some(bad))
                .end();
        });
        vm.set_extern_func(
            "add",
            ExternFunction::new(2, |args| {
                let a = args[0].as_number().unwrap_or(0.0);
                let b = args[1].as_number().unwrap_or(0.0);
                (a + b).into()
            }),
        )
        .unwrap();
        vm.start("main").unwrap();
        vm.run().unwrap();

        assert_eq!(vm.state(), VmState::Finished);
        assert_eq!(vm.value("sum").unwrap(), &TaggedValue::from(5));
        assert!(vm.value("bad").unwrap().is_nil());
        assert!(matches!(
            &vm.take_diagnostics()[..],
            [TopiError::ArityMismatch { expected: 2, actual: 1, .. }]
        ));
    }

    #[test]
    fn test_unbound_function_yields_nil() {
        let mut vm = vm(|b| {
            let f = b.extern_variable("f");
            b.bough("main").call(f, vec![], None).end();
        });
        vm.start("main").unwrap();
        vm.run().unwrap();
        assert_eq!(vm.state(), VmState::Finished);
        assert!(matches!(
            &vm.take_diagnostics()[..],
            [TopiError::UnboundFunction(_)]
        ));
    }

    #[test]
    fn test_immutable_reassignment_faults() {
        let mut vm = vm(|b| {
            let k = b.constant("k");
            b.bough("main").set(k, 1).set(k, 2).end();
        });
        vm.start("main").unwrap();
        assert!(vm.run().unwrap_err().is_fault());
        assert_eq!(vm.state(), VmState::Faulted);
        assert!(!vm.can_continue());
        assert!(matches!(vm.run(), Err(TopiError::InvalidState { .. })));
    }

    #[test]
    fn test_unknown_global_index_faults() {
        let mut vm = vm(|b| {
            b.bough("main").set(42, 1).end();
        });
        vm.start("main").unwrap();
        assert!(vm.run().unwrap_err().is_fault());
    }

    #[test]
    fn test_sequential_enum_guard() {
        let mut vm = vm(|b| {
            let act = b.extern_variable("act");
            b.bough("main")
                .set(act, TaggedValue::enumeration("Act", "intro"))
                .end();
        });
        vm.declare_enum(EnumDomain::sequential("Act", ["intro", "middle", "end"]));
        vm.set_extern("act", TaggedValue::enumeration("Act", "middle"))
            .unwrap();
        assert!(matches!(
            vm.set_extern("act", TaggedValue::enumeration("Act", "bogus")),
            Err(TopiError::Value { .. })
        ));

        vm.start("main").unwrap();
        vm.run().unwrap();
        assert_eq!(
            vm.value("act").unwrap(),
            &TaggedValue::enumeration("Act", "middle")
        );
        assert!(matches!(
            &vm.take_diagnostics()[..],
            [TopiError::Value { .. }]
        ));
    }

    #[test]
    fn test_save_and_load() {
        let build = |b: &mut ContainerBuilder| {
            let coins = b.variable("coins");
            b.variable("unset");
            b.extern_variable("f");
            b.bough("main").set(coins, 7).end();
        };
        let mut first = vm(build);
        first
            .set_extern_func("f", ExternFunction::new(0, |_| TaggedValue::Nil))
            .unwrap();
        first.start("main").unwrap();
        first.run().unwrap();
        let snapshot = first.save();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("unset"), Some(&serde_json::Value::Null));
        assert!(snapshot.get("f").is_none());

        let mut extra = snapshot.clone();
        extra.insert("other_session", &true.into()).unwrap();
        let mut second = vm(build);
        assert_eq!(second.load(&extra), 2);
        assert_eq!(second.value("coins").unwrap(), &TaggedValue::from(7));
    }

    #[test]
    fn test_save_keeps_cleared_global() {
        let mut vm = vm(|b| {
            let coins = b.variable("coins");
            b.bough("main").set(coins, 5).set(coins, TaggedValue::Nil).end();
        });
        vm.start("main").unwrap();
        vm.run().unwrap();
        assert!(vm.value("coins").unwrap().is_nil());

        let mut aggregate = Snapshot::new();
        aggregate.insert("coins", &5.into()).unwrap();
        aggregate.amend(&vm.save());
        assert_eq!(aggregate.value("coins").unwrap().unwrap(), TaggedValue::Nil);
    }
}
