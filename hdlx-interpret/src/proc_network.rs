#![forbid(unsafe_code)]

//! Simulation driver: instantiates a proc tree and ticks it round-robin.

use std::sync::Arc;

use hdlx_ast::{FunctionTag, ItemId};
use hdlx_core::{ChannelHandle, ConcreteType, ImportData, InterpValue, ParametricEnv};
use tracing::{debug, instrument, trace, warn};

use crate::bytecode::BytecodeFunction;
use crate::cache::BytecodeCache;
use crate::channels::Channels;
use crate::error::SimulationError;
use crate::interpreter::{ExecContext, ExecState, Interpreter, InterpreterOptions, SpawnRequest};

#[derive(Clone, Debug)]
pub struct ProcNetworkOptions {
    pub max_ticks: u64,
    /// Bound on instantiated procs, guarding runaway spawn trees.
    pub max_procs: usize,
    pub interpreter: InterpreterOptions,
}

impl Default for ProcNetworkOptions {
    fn default() -> Self {
        Self {
            max_ticks: 100_000,
            max_procs: 4096,
            interpreter: InterpreterOptions::default(),
        }
    }
}

struct ProcState {
    name: String,
    next: Arc<BytecodeFunction>,
    members: Vec<InterpValue>,
    state: InterpValue,
    next_params: usize,
    /// A `next` invocation blocked on a channel.
    running: Option<Interpreter>,
}

impl ProcState {
    fn next_args(&self) -> Vec<InterpValue> {
        let mut args = self.members.clone();
        if self.next_params == 2 {
            args.push(InterpValue::Token);
        }
        if self.next_params >= 1 {
            args.push(self.state.clone());
        }
        args
    }
}

pub struct ProcNetwork<'d> {
    data: &'d ImportData,
    options: ProcNetworkOptions,
    cache: BytecodeCache,
    channels: Channels,
    procs: Vec<ProcState>,
    ticks: u64,
    blocked: Vec<String>,
    trace: Vec<String>,
}

impl<'d> ProcNetwork<'d> {
    pub fn new(data: &'d ImportData, options: ProcNetworkOptions) -> Self {
        Self {
            data,
            options,
            cache: BytecodeCache::new(),
            channels: Channels::new(),
            procs: Vec::new(),
            ticks: 0,
            blocked: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// A channel owned by the driver, e.g. a test terminator.
    pub fn create_channel(&mut self, name: &str, payload: ConcreteType, depth: Option<u64>) -> ChannelHandle {
        self.channels.create(name, payload, depth)
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut Channels {
        &mut self.channels
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// `trace_fmt!` output of every proc, in execution order.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn proc_names(&self) -> impl Iterator<Item = &str> {
        self.procs.iter().map(|p| p.name.as_str())
    }

    /// Runs `config` and `init` of the proc, then instantiates everything
    /// its config spawned.
    #[instrument(skip_all, fields(%module, %env))]
    pub fn instantiate(
        &mut self,
        module: &str,
        item: ItemId,
        env: &ParametricEnv,
        config_args: Vec<InterpValue>,
    ) -> Result<(), SimulationError> {
        let data = self.data;
        let info = data
            .module(module)
            .ok_or_else(|| SimulationError::Setup(format!("module '{module}' has not been typechecked")))?;
        let m = info.module.clone();
        let p = m
            .proc(item)
            .ok_or_else(|| SimulationError::Setup(format!("'{}' is not a proc", m.member(item).name())))?;
        let instance = data.proc_instance(module, item, env).ok_or_else(|| {
            SimulationError::Setup(format!("proc '{}' has not been typechecked for {env}", p.name.node))
        })?;
        if self.procs.len() >= self.options.max_procs {
            return Err(SimulationError::Setup(format!(
                "more than {} procs instantiated while spawning '{}'",
                self.options.max_procs, p.name.node
            )));
        }
        let ti = instance.type_info;
        let name = p.name.node.as_str();

        let config = self
            .cache
            .proc_function(data, module, item, FunctionTag::ProcConfig, env, ti)?;
        let (members, spawns) = self.run_to_completion(name, config, config_args)?;
        let members = match members {
            InterpValue::Tuple(items) => items,
            other => vec![other],
        };
        let init = self.cache.proc_function(data, module, item, FunctionTag::ProcInit, env, ti)?;
        let (state, _) = self.run_to_completion(name, init, Vec::new())?;
        let next = self.cache.proc_function(data, module, item, FunctionTag::ProcNext, env, ti)?;

        debug!(proc = name, members = members.len(), spawns = spawns.len(), %state, "instantiated proc");
        self.procs.push(ProcState {
            name: name.to_string(),
            next,
            members,
            state,
            next_params: p.next.params.len(),
            running: None,
        });
        for SpawnRequest { proc_ref, env, args, .. } in spawns {
            self.instantiate(&proc_ref.module, proc_ref.item, &env, args)?;
        }
        Ok(())
    }

    fn run_to_completion(
        &mut self,
        proc_name: &str,
        function: Arc<BytecodeFunction>,
        args: Vec<InterpValue>,
    ) -> Result<(InterpValue, Vec<SpawnRequest>), SimulationError> {
        let mut spawns = Vec::new();
        let mut interp = Interpreter::new(function, args, self.options.interpreter.clone());
        let state = interp.run(&mut ExecContext {
            data: self.data,
            cache: &mut self.cache,
            channels: &mut self.channels,
            spawns: &mut spawns,
        });
        self.trace.extend(interp.take_trace());
        match state {
            ExecState::Completed(v) => Ok((v, spawns)),
            ExecState::Suspended { channel } => Err(SimulationError::Setup(format!(
                "'{proc_name}' blocked on {} during setup",
                self.channels.name(channel)
            ))),
            ExecState::Failed(failure) => Err(SimulationError::Failed {
                proc_name: proc_name.to_string(),
                failure,
            }),
        }
    }

    /// Runs or resumes `next` of every proc once. Returns whether anything
    /// happened: a `next` completed or a channel was used.
    pub fn tick(&mut self) -> Result<bool, SimulationError> {
        let activity = self.channels.activity();
        let mut completed = 0usize;
        self.blocked.clear();
        for i in 0..self.procs.len() {
            let mut interp = match self.procs[i].running.take() {
                Some(interp) => interp,
                None => Interpreter::new(
                    self.procs[i].next.clone(),
                    self.procs[i].next_args(),
                    self.options.interpreter.clone(),
                ),
            };
            let mut spawns = Vec::new();
            let state = interp.run(&mut ExecContext {
                data: self.data,
                cache: &mut self.cache,
                channels: &mut self.channels,
                spawns: &mut spawns,
            });
            self.trace.extend(interp.take_trace());
            let proc = &mut self.procs[i];
            if !spawns.is_empty() {
                return Err(SimulationError::Setup(format!("'{}' spawned outside of config", proc.name)));
            }
            match state {
                ExecState::Completed(v) => {
                    if proc.next_params > 0 {
                        proc.state = v;
                    }
                    completed += 1;
                }
                ExecState::Suspended { channel } => {
                    self.blocked.push(format!("{} on {}", proc.name, self.channels.name(channel)));
                    proc.running = Some(interp);
                }
                ExecState::Failed(failure) => {
                    return Err(SimulationError::Failed {
                        proc_name: proc.name.clone(),
                        failure,
                    });
                }
            }
        }
        self.ticks += 1;
        let progress = completed > 0 || self.channels.activity() != activity;
        trace!(tick = self.ticks, completed, blocked = self.blocked.len(), progress, "tick");
        Ok(progress)
    }

    /// Ticks until `done` holds. Fails on a tick without progress or when
    /// `max_ticks` is reached.
    pub fn run_until(&mut self, mut done: impl FnMut(&Channels) -> bool) -> Result<u64, SimulationError> {
        while !done(&self.channels) {
            if self.ticks >= self.options.max_ticks {
                warn!(max_ticks = self.options.max_ticks, "tick limit reached");
                return Err(SimulationError::TickLimit {
                    max_ticks: self.options.max_ticks,
                });
            }
            if !self.tick()? {
                return Err(self.deadlock());
            }
        }
        Ok(self.ticks)
    }

    /// Ticks until a tick makes no progress.
    pub fn run_to_quiescence(&mut self) -> Result<u64, SimulationError> {
        while self.tick()? {
            if self.ticks >= self.options.max_ticks {
                return Err(SimulationError::TickLimit {
                    max_ticks: self.options.max_ticks,
                });
            }
        }
        Ok(self.ticks)
    }

    fn deadlock(&self) -> SimulationError {
        let blocked = if self.blocked.is_empty() {
            "nothing".to_string()
        } else {
            self.blocked.join(", ")
        };
        warn!(ticks = self.ticks, %blocked, "deadlock");
        SimulationError::Deadlock {
            ticks: self.ticks,
            blocked,
        }
    }
}
