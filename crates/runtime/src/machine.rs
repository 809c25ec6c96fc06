//! Stack-machine interpreter for host method bodies.
//!
//! Runs bodies straight out of a [`Host`], so a patched host executes its spliced hook code
//! exactly as installed. Methods without a body must be bound to a [`Native`] before they
//! are called. Host exceptions unwind through `catch` and `finally` regions; anything else
//! that goes wrong stops execution with a [`Trap`].

use crate::heap::Heap;
use hookwright_core::{
    HandlerKind, Host, Instruction, Label, MethodBody, MethodId, ObjectId, Opcode, Operand,
    TypeId, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Default bound on executed instructions per top-level call.
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;
/// Default bound on nested calls.
pub const MAX_CALL_DEPTH: usize = 256;

/// Implementation of a method in Rust. Receives the arguments, `this` first for instance
/// methods, and returns the result for non-void methods.
pub type Native = Arc<dyn Fn(&mut Heap, &[Value]) -> Result<Option<Value>, Trap> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    #[error("{method} has neither a body nor a native binding")]
    NoImplementation { method: String },

    #[error("{method} takes {expected} argument(s), {found} given")]
    Arity {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("{method}[{at}]: {msg}")]
    Fault {
        method: String,
        at: usize,
        msg: String,
    },

    #[error("{method}[{at}]: null reference")]
    NullReference { method: String, at: usize },

    #[error("{method}[{at}]: division by zero")]
    DivideByZero { method: String, at: usize },

    #[error("unknown object {0:?}")]
    UnknownObject(ObjectId),

    #[error("control ran past the end of {method}")]
    FellOffEnd { method: String },

    #[error("unhandled exception {value} thrown out of {method}")]
    Unhandled { method: String, value: Value },

    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),

    #[error("call depth limit of {0} exceeded")]
    CallDepth(usize),

    /// Raised by native code.
    #[error("native {method}: {msg}")]
    Native { method: String, msg: String },
}

/// How a call ended.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Outcome {
    Returned(Option<Value>),
    Threw(Value),
}

/// What to do once the running `finally` handler reaches `endfinally`.
#[derive(Clone, Debug)]
enum Pending {
    /// Finish a `leave`, running the remaining handlers first.
    Leave { target: usize, rest: Vec<usize> },
    /// Keep unwinding through the remaining regions.
    Throw { value: Value, rest: Vec<usize> },
}

enum Control {
    Next,
    Return(Option<Value>),
    /// A new exception at the current instruction.
    Throw(Value),
    /// An exception that has already unwound every region of this frame.
    Escape(Value),
}

struct Frame {
    args: Vec<Value>,
    locals: Vec<Value>,
    stack: Vec<Value>,
    pc: usize,
    pending: Vec<Pending>,
}

/// Interpreter over one host image.
pub struct Machine<'h> {
    host: &'h Host,
    natives: HashMap<MethodId, Native>,
    heap: Heap,
    step_limit: u64,
    max_depth: usize,
    steps: u64,
}

impl<'h> Machine<'h> {
    pub fn new(host: &'h Host) -> Self {
        Self {
            host,
            natives: HashMap::new(),
            heap: Heap::new(),
            step_limit: DEFAULT_STEP_LIMIT,
            max_depth: MAX_CALL_DEPTH,
            steps: 0,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn host(&self) -> &'h Host {
        self.host
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Instructions executed by the last top-level call.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Binds `method` to native code. A native binding takes precedence over a body.
    pub fn bind<F>(&mut self, method: MethodId, native: F)
    where
        F: Fn(&mut Heap, &[Value]) -> Result<Option<Value>, Trap> + Send + Sync + 'static,
    {
        self.natives.insert(method, Arc::new(native));
    }

    pub fn bind_named<F>(&mut self, identity: &str, native: F) -> Result<MethodId, Trap>
    where
        F: Fn(&mut Heap, &[Value]) -> Result<Option<Value>, Trap> + Send + Sync + 'static,
    {
        let method = self
            .host
            .symbols
            .method_id(identity)
            .ok_or_else(|| Trap::UnknownMethod(identity.to_string()))?;
        self.bind(method, native);
        Ok(method)
    }

    /// Calls `method` and returns its result, `None` for void methods.
    pub fn call(&mut self, method: MethodId, args: Vec<Value>) -> Result<Option<Value>, Trap> {
        self.steps = 0;
        match self.invoke(method, args, 0)? {
            Outcome::Returned(value) => Ok(value),
            Outcome::Threw(value) => Err(Trap::Unhandled {
                method: self.host.method_name(method),
                value,
            }),
        }
    }

    pub fn call_named(&mut self, identity: &str, args: Vec<Value>) -> Result<Option<Value>, Trap> {
        let method = self
            .host
            .symbols
            .method_id(identity)
            .ok_or_else(|| Trap::UnknownMethod(identity.to_string()))?;
        self.call(method, args)
    }

    fn invoke(&mut self, method: MethodId, args: Vec<Value>, depth: usize) -> Result<Outcome, Trap> {
        if depth >= self.max_depth {
            return Err(Trap::CallDepth(self.max_depth));
        }
        let host = self.host;
        let def = host
            .symbols
            .method(method)
            .map_err(|_| Trap::UnknownMethod(format!("{method:?}")))?;
        if args.len() != def.arg_count() {
            return Err(Trap::Arity {
                method: host.method_name(method),
                expected: def.arg_count(),
                found: args.len(),
            });
        }
        trace!("call {} ({} args, depth {})", host.method_name(method), args.len(), depth);
        if let Some(native) = self.natives.get(&method).cloned() {
            return native(&mut self.heap, &args).map(Outcome::Returned);
        }
        let body = host.body(method).ok_or_else(|| Trap::NoImplementation {
            method: host.method_name(method),
        })?;
        self.execute(body, args, depth)
    }

    fn execute(&mut self, body: &'h MethodBody, args: Vec<Value>, depth: usize) -> Result<Outcome, Trap> {
        let labels = body.label_positions().map_err(|err| Trap::Fault {
            method: self.host.method_name(body.method),
            at: 0,
            msg: err.to_string(),
        })?;
        let locals = body.locals.iter().map(|ty| self.default_value(*ty)).collect();
        let mut frame = Frame {
            args,
            locals,
            stack: Vec::new(),
            pc: 0,
            pending: Vec::new(),
        };
        loop {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(Trap::StepLimit(self.step_limit));
            }
            let at = frame.pc;
            let Some(ins) = body.instructions.get(at) else {
                return Err(Trap::FellOffEnd {
                    method: self.host.method_name(body.method),
                });
            };
            frame.pc += 1;
            match self.step(body, &labels, &mut frame, ins, at, depth)? {
                Control::Next => {}
                Control::Return(value) => return Ok(Outcome::Returned(value)),
                Control::Throw(value) => {
                    let candidates = innermost_first(body, |r| body.regions[r].protects(at));
                    if let Some(value) = self.throw_through(body, &mut frame, value, candidates) {
                        return Ok(Outcome::Threw(value));
                    }
                }
                Control::Escape(value) => return Ok(Outcome::Threw(value)),
            }
        }
    }

    fn step(
        &mut self,
        body: &'h MethodBody,
        labels: &HashMap<Label, usize>,
        frame: &mut Frame,
        ins: &Instruction,
        at: usize,
        depth: usize,
    ) -> Result<Control, Trap> {
        let host = self.host;
        let fault = |msg: String| Trap::Fault {
            method: host.method_name(body.method),
            at,
            msg,
        };
        let pop = |frame: &mut Frame| {
            frame
                .stack
                .pop()
                .ok_or_else(|| fault("evaluation stack underflow".into()))
        };
        let int = |value: Value| {
            value
                .as_int()
                .ok_or_else(|| fault(format!("expected an int, found {value}")))
        };
        let target = |ins: &Instruction| {
            ins.branch_target()
                .and_then(|label| labels.get(&label).copied())
                .ok_or_else(|| fault("branch target is not in the body".into()))
        };

        match (ins.opcode, &ins.operand) {
            (Opcode::Nop, _) => {}
            (Opcode::Ldarg, Operand::Arg(i)) => {
                let value = frame
                    .args
                    .get(usize::from(*i))
                    .cloned()
                    .ok_or_else(|| fault(format!("no argument {i}")))?;
                frame.stack.push(value);
            }
            (Opcode::Starg, Operand::Arg(i)) => {
                let value = pop(frame)?;
                let slot = frame
                    .args
                    .get_mut(usize::from(*i))
                    .ok_or_else(|| fault(format!("no argument {i}")))?;
                *slot = value;
            }
            (Opcode::Ldloc, Operand::Local(i)) => {
                let value = frame
                    .locals
                    .get(usize::from(*i))
                    .cloned()
                    .ok_or_else(|| fault(format!("no local {i}")))?;
                frame.stack.push(value);
            }
            (Opcode::Stloc, Operand::Local(i)) => {
                let value = pop(frame)?;
                let slot = frame
                    .locals
                    .get_mut(usize::from(*i))
                    .ok_or_else(|| fault(format!("no local {i}")))?;
                *slot = value;
            }
            (Opcode::Ldc, Operand::Int(v)) => frame.stack.push(Value::Int(*v)),
            (Opcode::Ldstr, Operand::Str(s)) => frame.stack.push(Value::from(s.as_str())),
            (Opcode::Ldnull, _) => frame.stack.push(Value::Null),
            (Opcode::Dup, _) => {
                let value = pop(frame)?;
                frame.stack.push(value.clone());
                frame.stack.push(value);
            }
            (Opcode::Pop, _) => {
                pop(frame)?;
            }
            (
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Rem
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Cgt
                | Opcode::Clt,
                _,
            ) => {
                let b = int(pop(frame)?)?;
                let a = int(pop(frame)?)?;
                let divide_by_zero = || Trap::DivideByZero {
                    method: host.method_name(body.method),
                    at,
                };
                let result = match ins.opcode {
                    Opcode::Add => a.wrapping_add(b),
                    Opcode::Sub => a.wrapping_sub(b),
                    Opcode::Mul => a.wrapping_mul(b),
                    Opcode::Div if b == 0 => return Err(divide_by_zero()),
                    Opcode::Div => a.wrapping_div(b),
                    Opcode::Rem if b == 0 => return Err(divide_by_zero()),
                    Opcode::Rem => a.wrapping_rem(b),
                    Opcode::And => a & b,
                    Opcode::Or => a | b,
                    Opcode::Xor => a ^ b,
                    Opcode::Cgt => i64::from(a > b),
                    _ => i64::from(a < b),
                };
                frame.stack.push(Value::Int(result));
            }
            (Opcode::Neg, _) => {
                let a = int(pop(frame)?)?;
                frame.stack.push(Value::Int(a.wrapping_neg()));
            }
            (Opcode::Not, _) => {
                let a = int(pop(frame)?)?;
                frame.stack.push(Value::Int(!a));
            }
            (Opcode::Ceq, _) => {
                let b = pop(frame)?;
                let a = pop(frame)?;
                frame.stack.push(Value::from_bool(a == b));
            }
            (Opcode::Br, _) => frame.pc = target(ins)?,
            (Opcode::Brtrue | Opcode::Brfalse, _) => {
                let truthy = pop(frame)?.is_truthy();
                if truthy == (ins.opcode == Opcode::Brtrue) {
                    frame.pc = target(ins)?;
                }
            }
            (Opcode::Beq | Opcode::Bne, _) => {
                let b = pop(frame)?;
                let a = pop(frame)?;
                if (a == b) == (ins.opcode == Opcode::Beq) {
                    frame.pc = target(ins)?;
                }
            }
            (Opcode::Bgt | Opcode::Blt, _) => {
                let b = int(pop(frame)?)?;
                let a = int(pop(frame)?)?;
                let taken = if ins.opcode == Opcode::Bgt { a > b } else { a < b };
                if taken {
                    frame.pc = target(ins)?;
                }
            }
            (Opcode::Call | Opcode::Callvirt, Operand::Method(method)) => {
                let def = host
                    .symbols
                    .method(*method)
                    .map_err(|err| fault(err.to_string()))?;
                let args = pop_n(frame, def.arg_count()).ok_or_else(|| fault("evaluation stack underflow".into()))?;
                if ins.opcode == Opcode::Callvirt && args.first() == Some(&Value::Null) {
                    return Err(Trap::NullReference {
                        method: host.method_name(body.method),
                        at,
                    });
                }
                match self.invoke(*method, args, depth + 1)? {
                    Outcome::Returned(Some(value)) => frame.stack.push(value),
                    Outcome::Returned(None) => {}
                    Outcome::Threw(value) => return Ok(Control::Throw(value)),
                }
            }
            (Opcode::Newobj, Operand::Method(ctor)) => {
                let def = host
                    .symbols
                    .method(*ctor)
                    .map_err(|err| fault(err.to_string()))?;
                let mut args = pop_n(frame, def.params.len())
                    .ok_or_else(|| fault("evaluation stack underflow".into()))?;
                let object = self.heap.alloc(def.owner);
                args.insert(0, Value::Ref(object));
                match self.invoke(*ctor, args, depth + 1)? {
                    Outcome::Threw(value) => return Ok(Control::Throw(value)),
                    Outcome::Returned(_) => frame.stack.push(Value::Ref(object)),
                }
            }
            (Opcode::Ldfld, Operand::Field(field)) => {
                let object = self.object(pop(frame)?, body, at)?;
                let value = self.heap.load_field(object, *field)?;
                frame.stack.push(value);
            }
            (Opcode::Stfld, Operand::Field(field)) => {
                let value = pop(frame)?;
                let object = self.object(pop(frame)?, body, at)?;
                self.heap.store_field(object, *field, value)?;
            }
            (Opcode::Ldsfld, Operand::Field(field)) => {
                frame.stack.push(self.heap.load_static(*field));
            }
            (Opcode::Stsfld, Operand::Field(field)) => {
                let value = pop(frame)?;
                self.heap.store_static(*field, value);
            }
            (Opcode::Isinst, Operand::Type(ty)) => {
                let value = pop(frame)?;
                let result = if self.is_instance(&value, *ty) {
                    value
                } else {
                    Value::Null
                };
                frame.stack.push(result);
            }
            (Opcode::Ret, _) => {
                let def = host
                    .symbols
                    .method(body.method)
                    .map_err(|err| fault(err.to_string()))?;
                let value = match def.ret {
                    Some(_) => Some(pop(frame)?),
                    None => None,
                };
                return Ok(Control::Return(value));
            }
            (Opcode::Throw, _) => {
                let value = pop(frame)?;
                if value == Value::Null {
                    return Err(Trap::NullReference {
                        method: host.method_name(body.method),
                        at,
                    });
                }
                return Ok(Control::Throw(value));
            }
            (Opcode::Leave, _) => {
                let target = target(ins)?;
                let exited = innermost_first(body, |r| {
                    let region = &body.regions[r];
                    region.kind == HandlerKind::Finally
                        && region.protects(at)
                        && !region.protects(target)
                });
                continue_leave(body, frame, target, exited);
            }
            (Opcode::Endfinally, _) => match frame.pending.pop() {
                Some(Pending::Leave { target, rest }) => continue_leave(body, frame, target, rest),
                Some(Pending::Throw { value, rest }) => {
                    if let Some(value) = self.throw_through(body, frame, value, rest) {
                        return Ok(Control::Escape(value));
                    }
                }
                None => return Err(fault("endfinally outside a finally handler".into())),
            },
            (opcode, operand) => {
                return Err(fault(format!("{opcode} cannot take operand {operand:?}")));
            }
        }
        Ok(Control::Next)
    }

    /// Hands `value` to the first matching region in `candidates`. Returns the value back
    /// when no region of this frame takes it.
    fn throw_through(
        &self,
        body: &MethodBody,
        frame: &mut Frame,
        value: Value,
        candidates: Vec<usize>,
    ) -> Option<Value> {
        for (i, &r) in candidates.iter().enumerate() {
            let region = &body.regions[r];
            match region.kind {
                HandlerKind::Catch(ty) if self.is_instance(&value, ty) => {
                    debug!(
                        "{}: exception {} caught by region {}",
                        self.host.method_name(body.method),
                        value,
                        r
                    );
                    frame.stack.clear();
                    frame.stack.push(value);
                    frame.pc = region.handler_start;
                    return None;
                }
                HandlerKind::Catch(_) => {}
                HandlerKind::Finally => {
                    frame.stack.clear();
                    frame.pending.push(Pending::Throw {
                        value,
                        rest: candidates[i + 1..].to_vec(),
                    });
                    frame.pc = region.handler_start;
                    return None;
                }
            }
        }
        Some(value)
    }

    fn object(&self, value: Value, body: &MethodBody, at: usize) -> Result<ObjectId, Trap> {
        match value {
            Value::Ref(id) => Ok(id),
            Value::Null => Err(Trap::NullReference {
                method: self.host.method_name(body.method),
                at,
            }),
            other => Err(Trap::Fault {
                method: self.host.method_name(body.method),
                at,
                msg: format!("expected an object, found {other}"),
            }),
        }
    }

    fn is_instance(&self, value: &Value, ty: TypeId) -> bool {
        let name = self.host.symbols.type_name(ty);
        match value {
            Value::Null => false,
            Value::Int(_) => matches!(name, "int" | "bool" | "object"),
            Value::Str(_) => matches!(name, "string" | "object"),
            Value::Ref(id) => name == "object" || self.heap.get(*id).is_ok_and(|o| o.ty == ty),
        }
    }

    fn default_value(&self, ty: TypeId) -> Value {
        match self.host.symbols.type_name(ty) {
            "int" | "bool" => Value::Int(0),
            _ => Value::Null,
        }
    }
}

/// Indices of the regions satisfying `keep`, smallest protected range first.
fn innermost_first(body: &MethodBody, keep: impl Fn(usize) -> bool) -> Vec<usize> {
    let mut regions: Vec<usize> = (0..body.regions.len()).filter(|&r| keep(r)).collect();
    regions.sort_by_key(|&r| body.regions[r].span());
    regions
}

fn continue_leave(body: &MethodBody, frame: &mut Frame, target: usize, exited: Vec<usize>) {
    frame.stack.clear();
    match exited.split_first() {
        None => frame.pc = target,
        Some((&r, rest)) => {
            frame.pending.push(Pending::Leave {
                target,
                rest: rest.to_vec(),
            });
            frame.pc = body.regions[r].handler_start;
        }
    }
}

/// Pops `n` values, returned in push order.
fn pop_n(frame: &mut Frame, n: usize) -> Option<Vec<Value>> {
    let split = frame.stack.len().checked_sub(n)?;
    Some(frame.stack.split_off(split))
}
