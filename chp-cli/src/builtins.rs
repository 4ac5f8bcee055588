//! The I/O builtin registry (`BuiltinRegistry` collaborator). Self-registers
//! via `inventory`, the same pattern `phosphor-machines` uses to collect
//! its machine table.

use chp_core::collab::BuiltinRegistry;
use chp_core::error::{CoreError, CoreResult};
use chp_core::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::rc::Rc;

pub struct BuiltinDef {
    pub name: &'static str,
    pub handler: fn(&FileRegistry, &[Value]) -> CoreResult<Value>,
}

impl BuiltinDef {
    pub const fn new(name: &'static str, handler: fn(&FileRegistry, &[Value]) -> CoreResult<Value>) -> Self {
        Self { name, handler }
    }
}

inventory::collect!(BuiltinDef);

/// Open file handles, keyed by the `i64` handle value returned to the
/// CHP program by `open`. Readers are line-buffered; writers go straight
/// through rather than batching per dispatch, since a builtin call commits
/// on the same statement dispatch that issued it.
pub struct FileRegistry {
    readers: RefCell<HashMap<i64, RefCell<BufReader<File>>>>,
    writers: RefCell<HashMap<i64, RefCell<File>>>,
    next_handle: Cell<i64>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self { readers: RefCell::new(HashMap::new()), writers: RefCell::new(HashMap::new()), next_handle: Cell::new(1) }
    }

    fn alloc_handle(&self) -> i64 {
        let h = self.next_handle.get();
        self.next_handle.set(h + 1);
        h
    }
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinRegistry for FileRegistry {
    fn call(&self, name: &str, args: &[Value]) -> CoreResult<Value> {
        let def = inventory::iter::<BuiltinDef>
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| CoreError::Instantiation(format!("unknown builtin {name}")))?;
        (def.handler)(self, args)
    }

    fn contains(&self, name: &str) -> bool {
        inventory::iter::<BuiltinDef>.into_iter().any(|d| d.name == name)
    }
}

fn want_string(args: &[Value], idx: usize) -> CoreResult<Rc<str>> {
    match args.get(idx) {
        Some(Value::Symbol(s)) => Ok(s.clone()),
        _ => Err(CoreError::Instantiation(format!("builtin argument {idx} must be a symbol/string"))),
    }
}

fn want_handle(args: &[Value], idx: usize) -> CoreResult<i64> {
    match args.get(idx) {
        Some(Value::MachineInt(i)) => Ok(*i),
        _ => Err(CoreError::Instantiation(format!("builtin argument {idx} must be an integer file handle"))),
    }
}

/// Renders a value the way `print` shows it: plain for scalars, `{:?}` for
/// anything with no natural textual form.
fn describe_value(v: &Value) -> String {
    match v {
        Value::Unassigned => "?".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::MachineInt(i) => i.to_string(),
        Value::BigInt(b) => b.to_string(),
        Value::Symbol(s) => s.to_string(),
        other => format!("{other:?}"),
    }
}

inventory::submit! {
    BuiltinDef::new("print", builtin_print)
}

fn builtin_print(_files: &FileRegistry, args: &[Value]) -> CoreResult<Value> {
    let rendered: Vec<String> = args.iter().map(describe_value).collect();
    println!("{}", rendered.join(" "));
    Ok(Value::Unassigned)
}

inventory::submit! {
    BuiltinDef::new("open", builtin_open)
}

fn builtin_open(files: &FileRegistry, args: &[Value]) -> CoreResult<Value> {
    let path = want_string(args, 0)?;
    let mode = want_string(args, 1)?;
    let handle = files.alloc_handle();
    match mode.as_ref() {
        "r" => {
            let f = File::open(path.as_ref()).map_err(|e| CoreError::Instantiation(format!("open {path}: {e}")))?;
            files.readers.borrow_mut().insert(handle, RefCell::new(BufReader::new(f)));
        }
        "w" | "a" => {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true);
            if mode.as_ref() == "a" {
                opts.append(true);
            } else {
                opts.truncate(true);
            }
            let f = opts.open(path.as_ref()).map_err(|e| CoreError::Instantiation(format!("open {path}: {e}")))?;
            files.writers.borrow_mut().insert(handle, RefCell::new(f));
        }
        other => return Err(CoreError::Instantiation(format!("unknown open mode {other}"))),
    }
    Ok(Value::MachineInt(handle))
}

inventory::submit! {
    BuiltinDef::new("read_line", builtin_read_line)
}

fn builtin_read_line(files: &FileRegistry, args: &[Value]) -> CoreResult<Value> {
    let handle = want_handle(args, 0)?;
    let readers = files.readers.borrow();
    let reader = readers.get(&handle).ok_or_else(|| CoreError::Instantiation(format!("no open reader for handle {handle}")))?;
    let mut line = String::new();
    let n = reader.borrow_mut().read_line(&mut line).map_err(|e| CoreError::Instantiation(format!("read_line: {e}")))?;
    if n == 0 {
        return Ok(Value::Unassigned);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Value::Symbol(Rc::from(line.as_str())))
}

inventory::submit! {
    BuiltinDef::new("write_line", builtin_write_line)
}

fn builtin_write_line(files: &FileRegistry, args: &[Value]) -> CoreResult<Value> {
    let handle = want_handle(args, 0)?;
    let text = want_string(args, 1)?;
    let writers = files.writers.borrow();
    let writer = writers.get(&handle).ok_or_else(|| CoreError::Instantiation(format!("no open writer for handle {handle}")))?;
    writeln!(writer.borrow_mut(), "{text}").map_err(|e| CoreError::Instantiation(format!("write_line: {e}")))?;
    Ok(Value::Unassigned)
}

inventory::submit! {
    BuiltinDef::new("close", builtin_close)
}

fn builtin_close(files: &FileRegistry, args: &[Value]) -> CoreResult<Value> {
    let handle = want_handle(args, 0)?;
    let closed_reader = files.readers.borrow_mut().remove(&handle).is_some();
    let closed_writer = files.writers.borrow_mut().remove(&handle).is_some();
    if !closed_reader && !closed_writer {
        return Err(CoreError::Instantiation(format!("no open handle {handle}")));
    }
    Ok(Value::Unassigned)
}
