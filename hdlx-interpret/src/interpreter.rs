#![forbid(unsafe_code)]

//! Resumable stack machine over emitted bytecode.

use std::sync::Arc;

use hdlx_ast::{BinOp, Builtin, SourceFile, Span};
use hdlx_core::{
    Callee, ChannelHandle, ConcreteType, FunctionRef, ImportData, InterpValue, ParametricEnv, TypeInfoId,
    ValueError, apply_builtin, cast, range,
};
use tracing::{debug, info, trace};

use crate::bytecode::{Bytecode, BytecodeData, BytecodeFunction, ChannelDesc, InvocationDesc, MatchArmItem, Op};
use crate::cache::BytecodeCache;
use crate::channels::Channels;
use crate::error::RuntimeFailure;

#[derive(Clone, Debug)]
pub struct InterpreterOptions {
    /// Maximum number of nested call frames.
    pub max_stack_depth: usize,
    /// Log every user-function call at `debug` level.
    pub trace_calls: bool,
    /// Keep `trace_fmt!` output in [`Interpreter::trace`].
    pub collect_trace: bool,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_stack_depth: 1024,
            trace_calls: false,
            collect_trace: true,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ExecState {
    Completed(InterpValue),
    /// Blocked on `channel`; calling [`Interpreter::run`] again retries the
    /// same instruction.
    Suspended { channel: ChannelHandle },
    Failed(RuntimeFailure),
}

/// A `spawn` executed by a config function, instantiated by the driver.
#[derive(Clone, Debug)]
pub struct SpawnRequest {
    pub proc_ref: Callee,
    pub name: String,
    pub env: ParametricEnv,
    pub type_info: TypeInfoId,
    pub args: Vec<InterpValue>,
}

/// Shared state an interpreter reads and mutates while running.
pub struct ExecContext<'a> {
    pub data: &'a ImportData,
    pub cache: &'a mut BytecodeCache,
    pub channels: &'a mut Channels,
    pub spawns: &'a mut Vec<SpawnRequest>,
}

struct Frame {
    function: Arc<BytecodeFunction>,
    pc: usize,
    slots: Vec<Option<InterpValue>>,
}

impl Frame {
    fn new(function: Arc<BytecodeFunction>, args: Vec<InterpValue>) -> Self {
        let size = (function.slot_count as usize).max(args.len());
        let mut slots: Vec<Option<InterpValue>> = args.into_iter().map(Some).collect();
        slots.resize(size, None);
        Self { function, pc: 0, slots }
    }
}

enum Action {
    Next,
    Jump(i64),
    Suspend(ChannelHandle),
    Call(Frame),
}

enum Flow {
    Continue,
    Suspend(ChannelHandle),
    Done(InterpValue),
}

pub struct Interpreter {
    frames: Vec<Frame>,
    stack: Vec<InterpValue>,
    options: InterpreterOptions,
    finished: Option<ExecState>,
    trace: Vec<String>,
}

fn malformed(bc: &Bytecode) -> ValueError {
    ValueError::new(format!("malformed instruction: {bc}"))
}

impl Interpreter {
    pub fn new(function: Arc<BytecodeFunction>, args: Vec<InterpValue>, options: InterpreterOptions) -> Self {
        Self {
            frames: vec![Frame::new(function, args)],
            stack: Vec::new(),
            options,
            finished: None,
            trace: Vec::new(),
        }
    }

    /// `trace_fmt!` lines produced so far.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn take_trace(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Runs until the outermost function returns, a channel operation
    /// blocks, or the program fails.
    pub fn run(&mut self, ctx: &mut ExecContext<'_>) -> ExecState {
        if let Some(done) = &self.finished {
            return done.clone();
        }
        loop {
            let state = match self.step(ctx) {
                Ok(Flow::Continue) => continue,
                Ok(Flow::Suspend(channel)) => {
                    trace!(channel = channel.0, "suspended");
                    return ExecState::Suspended { channel };
                }
                Ok(Flow::Done(v)) => ExecState::Completed(v),
                Err(failure) => {
                    debug!(%failure, "failed");
                    ExecState::Failed(failure)
                }
            };
            self.finished = Some(state.clone());
            return state;
        }
    }

    fn step(&mut self, ctx: &mut ExecContext<'_>) -> Result<Flow, RuntimeFailure> {
        let Some(frame) = self.frames.last() else {
            return Err(RuntimeFailure::new(
                "error",
                "no active frame",
                hdlx_ast::span(0, 0),
                &SourceFile::new("<vm>", ""),
            ));
        };
        let function = frame.function.clone();
        let Some(bc) = function.bytecodes.get(frame.pc) else {
            return self.return_from_frame(&function);
        };
        let action = self.execute(ctx, bc, &function.source)?;
        let Some(frame) = self.frames.last_mut() else {
            return Ok(Flow::Continue);
        };
        match action {
            Action::Next => frame.pc += 1,
            Action::Jump(offset) => {
                let target = frame.pc as i64 + offset;
                if target < 0 || target as usize > function.bytecodes.len() {
                    let msg = format!("jump to {target} is outside '{}'", function.name);
                    return Err(RuntimeFailure::new("error", msg, bc.span, &function.source));
                }
                frame.pc = target as usize;
            }
            Action::Suspend(channel) => return Ok(Flow::Suspend(channel)),
            Action::Call(callee) => {
                frame.pc += 1;
                if self.frames.len() >= self.options.max_stack_depth {
                    let msg = format!("call depth limit of {} exceeded", self.options.max_stack_depth);
                    return Err(RuntimeFailure::new("error", msg, bc.span, &function.source));
                }
                self.frames.push(callee);
            }
        }
        Ok(Flow::Continue)
    }

    fn return_from_frame(&mut self, function: &BytecodeFunction) -> Result<Flow, RuntimeFailure> {
        self.frames.pop();
        let result = self.stack.pop().ok_or_else(|| {
            let span = function.bytecodes.last().map(|b| b.span).unwrap_or(hdlx_ast::span(0, 0));
            RuntimeFailure::new("error", format!("'{}' returned no value", function.name), span, &function.source)
        })?;
        if self.frames.is_empty() {
            return Ok(Flow::Done(result));
        }
        self.stack.push(result);
        Ok(Flow::Continue)
    }

    fn pop(&mut self) -> Result<InterpValue, ValueError> {
        self.stack.pop().ok_or_else(|| ValueError::new("value stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<InterpValue>, ValueError> {
        if self.stack.len() < n {
            return Err(ValueError::new("value stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    /// Value `depth` entries below the top.
    fn peek(&self, depth: usize) -> Result<&InterpValue, ValueError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.stack.get(i))
            .ok_or_else(|| ValueError::new("value stack underflow"))
    }

    fn slot(&self, slot: u32) -> Result<&InterpValue, ValueError> {
        self.frames
            .last()
            .and_then(|f| f.slots.get(slot as usize))
            .and_then(|s| s.as_ref())
            .ok_or_else(|| ValueError::new(format!("slot {slot} read before it was written")))
    }

    fn set_slot(&mut self, slot: u32, value: InterpValue) -> Result<(), ValueError> {
        let frame = self.frames.last_mut().ok_or_else(|| ValueError::new("no active frame"))?;
        let i = slot as usize;
        if frame.slots.len() <= i {
            frame.slots.resize(i + 1, None);
        }
        frame.slots[i] = Some(value);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>, bc: &Bytecode, source: &SourceFile) -> Result<Action, RuntimeFailure> {
        let span = bc.span;
        let fail = |e: ValueError| RuntimeFailure::new("error", e.0, span, source);
        if let Some(op) = bc.op.binop() {
            let rhs = self.pop().map_err(fail)?;
            let lhs = self.pop().map_err(fail)?;
            self.stack.push(InterpValue::binop(op, &lhs, &rhs).map_err(fail)?);
            return Ok(Action::Next);
        }
        if let Some(op) = bc.op.unop() {
            let v = self.pop().map_err(fail)?;
            self.stack.push(InterpValue::unop(op, &v).map_err(fail)?);
            return Ok(Action::Next);
        }
        match (bc.op, &bc.data) {
            (Op::Literal, Some(BytecodeData::Value(v))) => self.stack.push(v.clone()),
            (Op::Load, Some(BytecodeData::Slot(s))) => {
                let v = self.slot(*s).map_err(fail)?.clone();
                self.stack.push(v);
            }
            (Op::Store, Some(BytecodeData::Slot(s))) => {
                let v = self.pop().map_err(fail)?;
                self.set_slot(*s, v).map_err(fail)?;
            }
            (Op::Dup, None) => {
                let v = self.peek(0).map_err(fail)?.clone();
                self.stack.push(v);
            }
            (Op::Pop, None) => {
                self.pop().map_err(fail)?;
            }
            (Op::Swap, None) => {
                let top = self.pop().map_err(fail)?;
                let below = self.pop().map_err(fail)?;
                self.stack.push(top);
                self.stack.push(below);
            }
            (Op::Cast, Some(BytecodeData::Type(t))) => {
                let v = self.pop().map_err(fail)?;
                self.stack.push(cast(&v, t).map_err(fail)?);
            }
            (Op::CheckedCast | Op::WideningCast, Some(BytecodeData::Type(t))) => {
                let v = self.pop().map_err(fail)?;
                let b = if bc.op == Op::CheckedCast { Builtin::CheckedCast } else { Builtin::WideningCast };
                let out = apply_builtin(b, &[v], Some(t)).map_err(|e| RuntimeFailure::new(b.name(), e.0, span, source))?;
                self.stack.push(out);
            }
            (Op::CreateTuple, Some(BytecodeData::Count(n))) => {
                let items = self.pop_n(*n).map_err(fail)?;
                self.stack.push(InterpValue::Tuple(items));
            }
            (Op::CreateArray, Some(BytecodeData::Count(n))) => {
                let items = self.pop_n(*n).map_err(fail)?;
                self.stack.push(InterpValue::Array(items));
            }
            (Op::ExpandTuple, None) => {
                let v = self.pop().map_err(fail)?;
                let items = v.elements().map_err(fail)?;
                self.stack.extend(items.iter().rev().cloned());
            }
            (Op::Index, None) => {
                let index = self.pop().map_err(fail)?;
                let array = self.pop().map_err(fail)?;
                self.stack.push(array.index(&index).map_err(fail)?);
            }
            (Op::TupleIndex, None) => {
                let index = self.pop().map_err(fail)?.as_u64().map_err(fail)?;
                let v = self.pop().map_err(fail)?;
                self.stack.push(v.tuple_index(index).map_err(fail)?);
            }
            (Op::Slice, None) => {
                let limit = self.pop().map_err(fail)?.as_u64().map_err(fail)?;
                let start = self.pop().map_err(fail)?.as_u64().map_err(fail)?;
                let v = self.pop().map_err(fail)?;
                let width = limit.saturating_sub(start) as u32;
                self.stack.push(v.slice(start as u128, width).map_err(fail)?);
            }
            (Op::WidthSlice, Some(BytecodeData::Type(t))) => {
                let (_, _, start) = self.pop().map_err(fail)?.as_bits().map_err(fail)?;
                let v = self.pop().map_err(fail)?;
                let (signed, width) = t.bits_info().ok_or_else(|| fail(malformed(bc)))?;
                let out = v
                    .slice(start, width as u32)
                    .and_then(|s| s.cast_bits(signed, width as u32))
                    .map_err(fail)?;
                self.stack.push(out);
            }
            (Op::Call, Some(BytecodeData::Invocation(desc))) => return self.call(ctx, desc, span, source),
            (Op::JumpRel, Some(BytecodeData::Offset(o))) => return Ok(Action::Jump(*o)),
            (Op::JumpRelIf, Some(BytecodeData::Offset(o))) => {
                if self.pop().map_err(fail)?.is_true().map_err(fail)? {
                    return Ok(Action::Jump(*o));
                }
            }
            (Op::JumpDest, None) => {}
            (Op::MatchArm, Some(BytecodeData::MatchArm(item))) => {
                let v = self.pop().map_err(fail)?;
                let matched = self.match_item(item, &v).map_err(fail)?;
                self.stack.push(InterpValue::bool(matched));
            }
            (Op::Fail, Some(BytecodeData::Fail(d))) => {
                let args = self.pop_n(d.trace.argc).map_err(fail)?;
                return Err(RuntimeFailure::new(d.label.clone(), d.trace.render(&args), span, source));
            }
            (Op::Trace, Some(BytecodeData::Trace(d))) => {
                let args = self.pop_n(d.argc).map_err(fail)?;
                let line = d.render(&args);
                info!(target: "hdlx::trace", "{line}");
                if self.options.collect_trace {
                    self.trace.push(line);
                }
                self.stack.push(InterpValue::Token);
            }
            (Op::Range, None) => {
                let end = self.pop().map_err(fail)?;
                let start = self.pop().map_err(fail)?;
                self.stack.push(range(&start, &end).map_err(fail)?);
            }
            (Op::Recv, data) => return self.recv(ctx, data.is_some()).map_err(fail),
            (Op::RecvNonBlocking, data) => {
                self.recv_non_blocking(ctx, data.is_some()).map_err(fail)?;
            }
            (Op::Send, data) => return self.send(ctx, data.is_some()).map_err(fail),
            (Op::Join, Some(BytecodeData::Count(n))) => {
                self.pop_n(*n).map_err(fail)?;
                self.stack.push(InterpValue::Token);
            }
            (Op::Spawn, Some(BytecodeData::Spawn(desc))) => {
                let args = self.pop_n(desc.argc).map_err(fail)?;
                trace!(proc = %desc.name, env = %desc.env, "spawn requested");
                ctx.spawns.push(SpawnRequest {
                    proc_ref: desc.proc_ref.clone(),
                    name: desc.name.clone(),
                    env: desc.env.clone(),
                    type_info: desc.type_info,
                    args,
                });
                self.stack.push(InterpValue::unit());
            }
            (Op::CreateChannel, Some(BytecodeData::Channel(desc))) => {
                let owner = self.frames.last().map(|f| f.function.name.clone()).unwrap_or_default();
                let end = create_channels(ctx.channels, &owner, desc);
                self.stack.push(InterpValue::Tuple(vec![end.clone(), end]));
            }
            _ => return Err(fail(malformed(bc))),
        }
        Ok(Action::Next)
    }

    fn call(
        &mut self,
        ctx: &mut ExecContext<'_>,
        desc: &InvocationDesc,
        span: Span,
        source: &SourceFile,
    ) -> Result<Action, RuntimeFailure> {
        let fail = |e: ValueError| RuntimeFailure::new("error", e.0, span, source);
        if let FunctionRef::Builtin(b) = &desc.callee {
            // Builtin calls are preceded by a literal naming the callee.
            let callee = self.pop().map_err(fail)?;
            if callee != InterpValue::Function(FunctionRef::Builtin(*b)) {
                return Err(fail(ValueError::new(format!("expected builtin {b} on the stack; got {callee}"))));
            }
        }
        let args = self.pop_n(desc.argc).map_err(fail)?;
        match &desc.callee {
            FunctionRef::Builtin(b) => {
                let out = call_builtin(*b, &args, desc.result_type.as_ref(), span, source)?;
                self.stack.push(out);
                Ok(Action::Next)
            }
            FunctionRef::User { module, item, name } => {
                let type_info = desc
                    .type_info
                    .ok_or_else(|| fail(ValueError::new(format!("call to '{name}' has no type table"))))?;
                let function = ctx.cache.function(ctx.data, module, *item, &desc.env, type_info)?;
                if self.options.trace_calls {
                    debug!(callee = %desc.callee, env = %desc.env, "call");
                }
                Ok(Action::Call(Frame::new(function, args)))
            }
        }
    }

    fn match_item(&mut self, item: &MatchArmItem, value: &InterpValue) -> Result<bool, ValueError> {
        Ok(match item {
            MatchArmItem::Value(v) => v == value,
            MatchArmItem::Load(slot) => self.slot(*slot)? == value,
            MatchArmItem::Store(slot) => {
                self.set_slot(*slot, value.clone())?;
                true
            }
            MatchArmItem::Wildcard => true,
            MatchArmItem::Tuple(items) => {
                let values = value.elements()?;
                if values.len() != items.len() {
                    return Ok(false);
                }
                for (i, v) in items.iter().zip(values) {
                    if !self.match_item(i, v)? {
                        return Ok(false);
                    }
                }
                true
            }
        })
    }

    /// `recv(tok, ch)` or `recv_if(tok, ch, pred, default)`.
    fn recv(&mut self, ctx: &mut ExecContext<'_>, predicated: bool) -> Result<Action, ValueError> {
        let (ch, pred) = if predicated {
            (self.peek(2)?.channel()?, self.peek(1)?.is_true()?)
        } else {
            (self.peek(0)?.channel()?, true)
        };
        if pred && ctx.channels.is_empty(ch) {
            return Ok(Action::Suspend(ch));
        }
        let value = if predicated {
            let mut operands = self.pop_n(4)?;
            let default = operands.pop().unwrap_or_else(InterpValue::unit);
            if pred { ctx.channels.pop(ch)?.unwrap_or(default) } else { default }
        } else {
            self.pop_n(2)?;
            ctx.channels
                .pop(ch)?
                .ok_or_else(|| ValueError::new(format!("channel#{} is empty", ch.0)))?
        };
        self.stack.push(InterpValue::Tuple(vec![InterpValue::Token, value]));
        Ok(Action::Next)
    }

    /// `recv_non_blocking(tok, ch, default)` or
    /// `recv_if_non_blocking(tok, ch, pred, default)`.
    fn recv_non_blocking(&mut self, ctx: &mut ExecContext<'_>, predicated: bool) -> Result<(), ValueError> {
        let mut operands = self.pop_n(if predicated { 4 } else { 3 })?;
        let default = operands.pop().unwrap_or_else(InterpValue::unit);
        let pred = if predicated {
            operands.pop().map(|p| p.is_true()).transpose()?.unwrap_or(false)
        } else {
            true
        };
        let ch = operands
            .get(1)
            .ok_or_else(|| ValueError::new("value stack underflow"))?
            .channel()?;
        let received = if pred { ctx.channels.pop(ch)? } else { None };
        let valid = received.is_some();
        let value = received.unwrap_or(default);
        self.stack
            .push(InterpValue::Tuple(vec![InterpValue::Token, value, InterpValue::bool(valid)]));
        Ok(())
    }

    /// `send(tok, ch, v)` or `send_if(tok, ch, pred, v)`.
    fn send(&mut self, ctx: &mut ExecContext<'_>, predicated: bool) -> Result<Action, ValueError> {
        let (ch, pred) = if predicated {
            (self.peek(2)?.channel()?, self.peek(1)?.is_true()?)
        } else {
            (self.peek(1)?.channel()?, true)
        };
        if pred && !ctx.channels.has_room(ch)? {
            return Ok(Action::Suspend(ch));
        }
        let value = self.pop()?;
        self.pop_n(if predicated { 3 } else { 2 })?;
        if pred {
            trace!(channel = ch.0, %value, "send");
            ctx.channels.send(ch, value)?;
        }
        self.stack.push(InterpValue::Token);
        Ok(Action::Next)
    }
}

fn call_builtin(
    builtin: Builtin,
    args: &[InterpValue],
    result_type: Option<&ConcreteType>,
    span: Span,
    source: &SourceFile,
) -> Result<InterpValue, RuntimeFailure> {
    let failure = |message: String| RuntimeFailure::new(builtin.name(), message, span, source);
    match (builtin, args) {
        (Builtin::AssertEq, [lhs, rhs]) => {
            if lhs != rhs {
                return Err(failure(format!("lhs: {lhs} was not equal to rhs: {rhs}")));
            }
            Ok(InterpValue::unit())
        }
        (Builtin::AssertLt, [lhs, rhs]) => {
            let lt = InterpValue::binop(BinOp::Lt, lhs, rhs)
                .and_then(|v| v.is_true())
                .map_err(|e| failure(e.0))?;
            if !lt {
                return Err(failure(format!("lhs: {lhs} was not less than rhs: {rhs}")));
            }
            Ok(InterpValue::unit())
        }
        (Builtin::Cover, _) => Ok(InterpValue::unit()),
        _ => apply_builtin(builtin, args, result_type).map_err(|e| failure(e.0)),
    }
}

/// Creates one channel per element of `desc.dims` and returns the nested
/// array of handles (or the lone handle).
fn create_channels(channels: &mut Channels, owner: &str, desc: &ChannelDesc) -> InterpValue {
    fn build(dims: &[u64], next: &mut dyn FnMut() -> InterpValue) -> InterpValue {
        match dims.split_last() {
            None => next(),
            Some((&outer, inner)) => InterpValue::Array((0..outer).map(|_| build(inner, &mut *next)).collect()),
        }
    }
    let mut next = || {
        let name = format!("{owner}#{}", channels.count());
        InterpValue::Channel(channels.create(name, desc.payload.clone(), desc.depth))
    };
    build(&desc.dims, &mut next)
}
