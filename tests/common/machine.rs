//! A small stack machine that runs compiled units, enough of the runtime
//! contract to observe what the generated code computes.
//!
//! Stack entries are shared cells so a closure capturing a local keeps
//! seeing writes through the slot, and keeps the cell alive after the
//! slot is popped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use strandc::bytecode::{CompiledModule, Constant, FunctionUnit, Op, UpvalueDescriptor};

const FUEL: usize = 1_000_000;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Iter(Rc<RefCell<(Vec<Value>, usize)>>),
    Closure(Rc<Closure>),
    Native(&'static str),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn ints(items: &[i64]) -> Self {
        Value::list(items.iter().map(|&i| Value::Int(i)).collect())
    }

    fn truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => *a.borrow() == *b.borrow(),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                let items: Vec<String> = items.borrow().iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Iter(_) => write!(f, "<iterator>"),
            Value::Closure(closure) => write!(f, "<fn {}>", closure.unit.name),
            Value::Native(name) => write!(f, "<native {}>", name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

enum Capture {
    Cell(Rc<RefCell<Value>>),
    Global(String),
}

pub struct Closure {
    unit: Rc<FunctionUnit>,
    captures: Vec<Capture>,
    defaults: Vec<Value>,
}

type Cell = Rc<RefCell<Value>>;

fn cell(value: Value) -> Cell {
    Rc::new(RefCell::new(value))
}

pub struct Machine {
    globals: HashMap<String, Value>,
    pub output: Vec<String>,
    fuel: usize,
}

impl Machine {
    pub fn new() -> Self {
        let mut globals = HashMap::new();
        globals.insert("print".to_string(), Value::Native("print"));
        Self {
            globals,
            output: Vec::new(),
            fuel: FUEL,
        }
    }

    /// Run the module body and return its value.
    pub fn run(&mut self, module: &CompiledModule) -> Result<Value, String> {
        let main = Rc::new(Closure {
            unit: module.main.clone(),
            captures: Vec::new(),
            defaults: Vec::new(),
        });
        self.execute(main, Vec::new())
    }

    pub fn global(&self, name: &str) -> Value {
        self.globals.get(name).cloned().unwrap_or(Value::Null)
    }

    fn call(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, String> {
        match callee {
            Value::Closure(closure) => self.execute(closure, args),
            Value::Native("print") => {
                let parts: Vec<String> = args.iter().map(|v| v.to_string()).collect();
                self.output.push(parts.join(" "));
                Ok(Value::Null)
            }
            other => Err(format!("cannot call {}", other)),
        }
    }

    fn execute(&mut self, closure: Rc<Closure>, mut args: Vec<Value>) -> Result<Value, String> {
        let unit = closure.unit.clone();
        let declared = usize::from(unit.arity) + usize::from(unit.default_count);
        if args.len() < usize::from(unit.arity) || args.len() > declared {
            return Err(format!(
                "{} expects {} argument(s), got {}",
                unit.name,
                unit.arity,
                args.len()
            ));
        }
        while args.len() < declared {
            let default = args.len() - usize::from(unit.arity);
            args.push(closure.defaults[default].clone());
        }

        let chunk = &unit.chunk;
        let mut stack: Vec<Cell> = Vec::with_capacity(16);
        stack.push(cell(Value::Closure(closure.clone())));
        stack.extend(args.into_iter().map(cell));
        let mut accumulators: Vec<Vec<Value>> = Vec::new();

        let name_at = |idx: u16| match &chunk.constants[idx as usize] {
            Constant::Str(name) => Ok(name.clone()),
            other => Err(format!("expected a name constant, found {:?}", other)),
        };

        let mut ip = 0;
        loop {
            self.fuel = self.fuel.checked_sub(1).ok_or("out of fuel")?;
            let offset = ip;
            let op = *chunk.code.get(offset).ok_or("ran off the end of the unit")?;
            ip += 1;

            match op {
                Op::Constant(idx) => {
                    let value = match &chunk.constants[idx as usize] {
                        Constant::Int(i) => Value::Int(*i),
                        Constant::Float(f) => Value::Float(*f),
                        Constant::Str(s) => Value::Str(s.clone()),
                        other => return Err(format!("unsupported constant {:?}", other)),
                    };
                    stack.push(cell(value));
                }
                Op::Null => stack.push(cell(Value::Null)),
                Op::True => stack.push(cell(Value::Bool(true))),
                Op::False => stack.push(cell(Value::Bool(false))),
                Op::Pop => {
                    pop(&mut stack)?;
                }
                Op::PopUnder => {
                    let top = stack.pop().ok_or("stack underflow")?;
                    stack.pop().ok_or("stack underflow")?;
                    stack.push(top);
                }
                Op::Dup => {
                    let top = peek(&stack)?;
                    stack.push(cell(top));
                }
                Op::Swap => {
                    let len = stack.len();
                    stack.swap(len - 1, len - 2);
                }
                Op::Copy => {
                    let copied = match pop(&mut stack)? {
                        Value::List(items) => Value::list(items.borrow().clone()),
                        other => other,
                    };
                    stack.push(cell(copied));
                }
                Op::GetLocal(slot) => {
                    let value = stack[slot as usize].borrow().clone();
                    stack.push(cell(value));
                }
                Op::SetLocal(slot) => {
                    let value = peek(&stack)?;
                    *stack[slot as usize].borrow_mut() = value;
                }
                Op::DropLocal(slot) => *stack[slot as usize].borrow_mut() = Value::Null,
                Op::GetUpvalue(index) => {
                    let value = match &closure.captures[index as usize] {
                        Capture::Cell(c) => c.borrow().clone(),
                        Capture::Global(name) => self.read_global(name)?,
                    };
                    stack.push(cell(value));
                }
                Op::SetUpvalue(index) => {
                    let value = peek(&stack)?;
                    match &closure.captures[index as usize] {
                        Capture::Cell(c) => *c.borrow_mut() = value,
                        Capture::Global(name) => {
                            self.globals.insert(name.clone(), value);
                        }
                    }
                }
                Op::GetGlobal(idx) => {
                    let value = self.read_global(&name_at(idx)?)?;
                    stack.push(cell(value));
                }
                Op::SetGlobal(idx) => {
                    let name = name_at(idx)?;
                    if !self.globals.contains_key(&name) {
                        return Err(format!("assignment to undefined global {}", name));
                    }
                    let value = peek(&stack)?;
                    self.globals.insert(name, value);
                }
                Op::DefineGlobal(idx) => {
                    let value = pop(&mut stack)?;
                    self.globals.insert(name_at(idx)?, value);
                }
                Op::DropGlobal(idx) => {
                    self.globals.remove(&name_at(idx)?);
                }
                Op::GetIndex => {
                    let index = pop(&mut stack)?;
                    let object = pop(&mut stack)?;
                    stack.push(cell(index_list(&object, &index)?));
                }
                Op::SetIndex => {
                    let value = pop(&mut stack)?;
                    let index = pop(&mut stack)?;
                    let object = pop(&mut stack)?;
                    match (&object, &index) {
                        (Value::List(items), Value::Int(i)) => {
                            let mut items = items.borrow_mut();
                            let slot = items.get_mut(*i as usize).ok_or("index out of range")?;
                            *slot = value.clone();
                        }
                        _ => return Err(format!("cannot index {} with {}", object, index)),
                    }
                    stack.push(cell(value));
                }
                Op::Add
                | Op::Subtract
                | Op::Multiply
                | Op::Divide
                | Op::Modulo
                | Op::Power
                | Op::Less
                | Op::LessEqual
                | Op::Greater
                | Op::GreaterEqual
                | Op::BitAnd
                | Op::BitOr
                | Op::BitXor
                | Op::ShiftLeft
                | Op::ShiftRight => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    stack.push(cell(binary(op, &left, &right)?));
                }
                Op::Equal | Op::NotEqual => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    stack.push(cell(Value::Bool((left == right) == (op == Op::Equal))));
                }
                Op::Negate => {
                    let value = match pop(&mut stack)? {
                        Value::Int(i) => Value::Int(-i),
                        Value::Float(f) => Value::Float(-f),
                        other => return Err(format!("cannot negate {}", other)),
                    };
                    stack.push(cell(value));
                }
                Op::Not => {
                    let value = pop(&mut stack)?;
                    stack.push(cell(Value::Bool(!value.truthy())));
                }
                Op::BitNot => match pop(&mut stack)? {
                    Value::Int(i) => stack.push(cell(Value::Int(!i))),
                    other => return Err(format!("cannot invert {}", other)),
                },
                Op::Jump(_) | Op::Loop(_) => ip = jump(&unit, offset)?,
                Op::JumpIfFalse(_) => {
                    if !peek(&stack)?.truthy() {
                        ip = jump(&unit, offset)?;
                    }
                }
                Op::JumpIfTrue(_) => {
                    if peek(&stack)?.truthy() {
                        ip = jump(&unit, offset)?;
                    }
                }
                Op::Closure(idx, defaults) => {
                    let Constant::Function(nested) = &chunk.constants[idx as usize] else {
                        return Err("closure over a non-function constant".to_string());
                    };
                    let split = stack.len() - usize::from(defaults);
                    let defaults = stack.split_off(split).iter().map(|c| c.borrow().clone()).collect();
                    let captures = nested
                        .upvalues
                        .iter()
                        .map(|descriptor| match descriptor {
                            UpvalueDescriptor::Local(slot) => Capture::Cell(stack[*slot as usize].clone()),
                            UpvalueDescriptor::Upvalue(index) => match &closure.captures[*index as usize] {
                                Capture::Cell(c) => Capture::Cell(c.clone()),
                                Capture::Global(name) => Capture::Global(name.clone()),
                            },
                            UpvalueDescriptor::Global(name) => Capture::Global(name.clone()),
                        })
                        .collect();
                    stack.push(cell(Value::Closure(Rc::new(Closure {
                        unit: nested.clone(),
                        captures,
                        defaults,
                    }))));
                }
                Op::Call(positional, keyword) => {
                    if keyword > 0 {
                        return Err("keyword arguments are not supported here".to_string());
                    }
                    let split = stack.len() - usize::from(positional);
                    let args = stack.split_off(split).iter().map(|c| c.borrow().clone()).collect();
                    let callee = pop(&mut stack)?;
                    let result = self.call(callee, args)?;
                    stack.push(cell(result));
                }
                Op::Return => return pop(&mut stack),
                Op::Array(n) | Op::Tuple(n) => {
                    let split = stack.len() - usize::from(n);
                    let items = stack.split_off(split).iter().map(|c| c.borrow().clone()).collect();
                    stack.push(cell(Value::list(items)));
                }
                Op::BuildString(n) => {
                    let split = stack.len() - usize::from(n);
                    let text: String = stack.split_off(split).iter().map(|c| c.borrow().to_string()).collect();
                    stack.push(cell(Value::Str(text)));
                }
                Op::AccStart => accumulators.push(Vec::new()),
                Op::AccCollect => {
                    let value = pop(&mut stack)?;
                    if !matches!(value, Value::Null) {
                        accumulators.last_mut().ok_or("no open accumulator")?.push(value);
                    }
                }
                Op::AccFlush => {
                    let items = accumulators.pop().ok_or("no open accumulator")?;
                    stack.push(cell(Value::list(items)));
                }
                Op::GetIter => match pop(&mut stack)? {
                    Value::List(items) => {
                        let items = items.borrow().clone();
                        stack.push(cell(Value::Iter(Rc::new(RefCell::new((items, 0))))));
                    }
                    other => return Err(format!("cannot iterate {}", other)),
                },
                Op::ForIter(_) => {
                    let Value::Iter(iter) = peek(&stack)? else {
                        return Err("ForIter without an iterator".to_string());
                    };
                    let next = {
                        let mut iter = iter.borrow_mut();
                        let item = iter.0.get(iter.1).cloned();
                        iter.1 += 1;
                        item
                    };
                    match next {
                        Some(item) => stack.push(cell(item)),
                        None => ip = jump(&unit, offset)?,
                    }
                }
                Op::InferStep => {
                    let end = pop(&mut stack)?;
                    let start = pop(&mut stack)?;
                    let step = if compare(&start, &end)? <= 0.0 { 1 } else { -1 };
                    stack.push(cell(Value::Int(step)));
                }
                Op::RangeCheck(slot) => {
                    let slot = slot as usize;
                    let counter = stack[slot].borrow().clone();
                    let end = stack[slot + 1].borrow().clone();
                    let step = stack[slot + 2].borrow().clone();
                    let ordering = compare(&counter, &end)?;
                    let inside = if step.as_f64().unwrap_or(0.0) > 0.0 {
                        ordering < 0.0
                    } else {
                        ordering > 0.0
                    };
                    stack.push(cell(Value::Bool(inside)));
                }
                Op::Throw => return Err(format!("thrown: {}", pop(&mut stack)?)),
                Op::Assert => {
                    let message = pop(&mut stack)?;
                    let condition = pop(&mut stack)?;
                    if !condition.truthy() {
                        return Err(format!("assertion failed: {}", message));
                    }
                }
                Op::Directive(..) => {}
                other => return Err(format!("unsupported instruction {:?}", other)),
            }
        }
    }

    fn read_global(&self, name: &str) -> Result<Value, String> {
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| format!("undefined global {}", name))
    }
}

fn pop(stack: &mut Vec<Cell>) -> Result<Value, String> {
    let top = stack.pop().ok_or("stack underflow")?;
    let value = top.borrow().clone();
    Ok(value)
}

fn peek(stack: &[Cell]) -> Result<Value, String> {
    let top = stack.last().ok_or("stack underflow")?;
    let value = top.borrow().clone();
    Ok(value)
}

fn jump(unit: &FunctionUnit, offset: usize) -> Result<usize, String> {
    unit.chunk
        .jump_target(offset)
        .ok_or_else(|| format!("bad jump at {}", offset))
}

fn compare(left: &Value, right: &Value) -> Result<f64, String> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b) as i32 as f64),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(a - b),
            _ => Err(format!("cannot compare {} and {}", left, right)),
        },
    }
}

fn index_list(object: &Value, index: &Value) -> Result<Value, String> {
    match (object, index) {
        (Value::List(items), Value::Int(i)) => items
            .borrow()
            .get(*i as usize)
            .cloned()
            .ok_or_else(|| "index out of range".to_string()),
        _ => Err(format!("cannot index {} with {}", object, index)),
    }
}

fn binary(op: Op, left: &Value, right: &Value) -> Result<Value, String> {
    use Value::{Float, Int};

    let value = match (op, left, right) {
        (Op::Less, ..) => Value::Bool(compare(left, right)? < 0.0),
        (Op::LessEqual, ..) => Value::Bool(compare(left, right)? <= 0.0),
        (Op::Greater, ..) => Value::Bool(compare(left, right)? > 0.0),
        (Op::GreaterEqual, ..) => Value::Bool(compare(left, right)? >= 0.0),
        (Op::Add, Value::Str(a), Value::Str(b)) => Value::Str(format!("{}{}", a, b)),
        (Op::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Value::list(items)
        }
        (Op::Add, Int(a), Int(b)) => Int(a.wrapping_add(*b)),
        (Op::Subtract, Int(a), Int(b)) => Int(a.wrapping_sub(*b)),
        (Op::Multiply, Int(a), Int(b)) => Int(a.wrapping_mul(*b)),
        (Op::Divide, Int(_), Int(0)) | (Op::Modulo, Int(_), Int(0)) => {
            return Err("division by zero".to_string())
        }
        (Op::Divide, Int(a), Int(b)) => Int(a / b),
        (Op::Modulo, Int(a), Int(b)) => Int(a % b),
        (Op::Power, Int(a), Int(b)) => Int(a.pow(*b as u32)),
        (Op::BitAnd, Int(a), Int(b)) => Int(a & b),
        (Op::BitOr, Int(a), Int(b)) => Int(a | b),
        (Op::BitXor, Int(a), Int(b)) => Int(a ^ b),
        (Op::ShiftLeft, Int(a), Int(b)) => Int(a << b),
        (Op::ShiftRight, Int(a), Int(b)) => Int(a >> b),
        _ => {
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Err(format!("cannot apply {:?} to {} and {}", op, left, right));
            };
            match op {
                Op::Add => Float(a + b),
                Op::Subtract => Float(a - b),
                Op::Multiply => Float(a * b),
                Op::Divide => Float(a / b),
                Op::Modulo => Float(a % b),
                Op::Power => Float(a.powf(b)),
                _ => return Err(format!("cannot apply {:?} to {} and {}", op, left, right)),
            }
        }
    };
    Ok(value)
}
