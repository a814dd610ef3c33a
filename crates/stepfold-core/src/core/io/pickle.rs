//! A decoder for the Python pickle stream format.
//!
//! The decoder runs the pickle virtual machine over protocols 0 through 5 (in-band data only)
//! without executing anything: calls (`REDUCE`, `NEWOBJ`, `INST`, `OBJ`) are recorded as
//! [`Object`] nodes and only a small set of known constructors (numpy arrays and scalars,
//! `collections.OrderedDict`, `set`) are interpreted after the stream has been read.
//!
//! Objects live in an arena so that memo references (`GET`) share one node, exactly like
//! the Python unpickler shares one object. Mutations applied after memoization (`SETITEMS`,
//! `BUILD`) are therefore visible through every reference.
//!
//! Byte payloads stay borrowed from the input until they are resolved, and resolution moves
//! nodes out of the arena once their last reference has been visited. Before anything is
//! resolved the expanded size of the requested subtree is measured against a fixed budget,
//! so a memo-shared graph that would explode when flattened is rejected up front.

use super::numpy;
use super::traits::BundleDecoder;
use super::value::{Object, Value};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::HashMap;
use std::io;
use thiserror::Error;
use tracing::trace;

const MAX_NESTING_DEPTH: usize = 256;
const MAX_RESOLVED_NODES: u64 = 1 << 24;
const MAX_RESOLVED_BYTES: u64 = 1 << 32;
const HIGHEST_PROTOCOL: u8 = 5;

mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const PERSID: u8 = b'P';
    pub const BINPERSID: u8 = b'Q';
    pub const REDUCE: u8 = b'R';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const INST: u8 = b'i';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const OBJ: u8 = b'o';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';

    pub const PROTO: u8 = 0x80;
    pub const NEWOBJ: u8 = 0x81;
    pub const EXT1: u8 = 0x82;
    pub const EXT2: u8 = 0x83;
    pub const EXT4: u8 = 0x84;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;

    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';

    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;
    pub const NEWOBJ_EX: u8 = 0x92;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;

    pub const BYTEARRAY8: u8 = 0x96;
    pub const NEXT_BUFFER: u8 = 0x97;
    pub const READONLY_BUFFER: u8 = 0x98;
}

#[derive(Debug, Error)]
pub enum PickleError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Unexpected end of pickle data at offset {offset}")]
    Truncated { offset: usize },
    #[error("Unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("Pickle stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },
    #[error("No MARK on the stack at offset {offset}")]
    MissingMark { offset: usize },
    #[error("Memo entry {index} is referenced before it is defined")]
    InvalidMemo { index: usize },
    #[error("Invalid {what} literal at offset {offset}")]
    InvalidLiteral { what: &'static str, offset: usize },
    #[error("Invalid operand for {opcode} at offset {offset}")]
    InvalidOperand { opcode: &'static str, offset: usize },
    #[error("Unsupported pickle feature: {0}")]
    Unsupported(&'static str),
    #[error("Object graph is nested deeper than {0} levels or contains a cycle")]
    RecursionLimit(usize),
    #[error("Object graph expands to at least {nodes} values holding {bytes} bytes")]
    TooLarge { nodes: u64, bytes: u64 },
}

/// Decoder for Python pickle streams.
pub struct PickleFile;

impl BundleDecoder for PickleFile {
    type Error = PickleError;

    fn decode(bytes: &[u8]) -> Result<Value, Self::Error> {
        let mut machine = Machine::new(bytes);
        let root = machine.run()?;
        let mut resolver = Resolver::new(machine.nodes);
        resolver.check_budget(&[root])?;
        resolver.resolve(root, 0)
    }

    /// Resolves only the requested entries of a top-level mapping. Every other entry is
    /// parsed but never materialized, so large unused arrays cost nothing beyond the input.
    fn decode_fields(bytes: &[u8], fields: &[&str]) -> Result<Value, Self::Error> {
        let mut machine = Machine::new(bytes);
        let root = machine.run()?;
        let mut resolver = Resolver::new(machine.nodes);
        let Some(entries) = resolver.select(root, fields) else {
            resolver.check_budget(&[root])?;
            return resolver.resolve(root, 0);
        };

        let keys: Vec<NodeKey> = entries.iter().flat_map(|&(k, v)| [k, v]).collect();
        resolver.check_budget(&keys)?;
        let pairs: Vec<(Value, Value)> = entries
            .into_iter()
            .map(|(k, v)| Ok((resolver.resolve(k, 1)?, resolver.resolve(v, 1)?)))
            .collect::<Result<_, PickleError>>()?;
        Ok(Value::Dict(pairs))
    }
}

new_key_type! {
    struct NodeKey;
}

#[derive(Debug, Clone)]
enum Node<'a> {
    Atom(Value),
    /// A byte payload still borrowed from the input.
    Blob(&'a [u8]),
    List(Vec<NodeKey>),
    Tuple(Vec<NodeKey>),
    Set(Vec<NodeKey>),
    Dict(Vec<(NodeKey, NodeKey)>),
    Object {
        callable: NodeKey,
        args: NodeKey,
        state: Option<NodeKey>,
        list_items: Vec<NodeKey>,
        dict_items: Vec<(NodeKey, NodeKey)>,
    },
}

impl Node<'_> {
    fn children(&self) -> Vec<NodeKey> {
        match self {
            Node::Atom(_) | Node::Blob(_) => Vec::new(),
            Node::List(items) | Node::Tuple(items) | Node::Set(items) => items.clone(),
            Node::Dict(pairs) => pairs.iter().flat_map(|&(k, v)| [k, v]).collect(),
            Node::Object {
                callable,
                args,
                state,
                list_items,
                dict_items,
            } => {
                let mut keys = vec![*callable, *args];
                keys.extend(*state);
                keys.extend(list_items);
                keys.extend(dict_items.iter().flat_map(|&(k, v)| [k, v]));
                keys
            }
        }
    }

    fn payload_len(&self) -> u64 {
        match self {
            Node::Blob(bytes) => bytes.len() as u64,
            Node::Atom(Value::Bytes(bytes)) => bytes.len() as u64,
            Node::Atom(Value::String(text)) => text.len() as u64,
            _ => 0,
        }
    }

    fn is_key(&self, fields: &[&str]) -> bool {
        match self {
            Node::Atom(Value::String(s)) => fields.contains(&s.as_str()),
            Node::Atom(Value::Bytes(b)) => fields.iter().any(|f| f.as_bytes() == b.as_slice()),
            Node::Blob(b) => fields.iter().any(|f| f.as_bytes() == *b),
            _ => false,
        }
    }
}

struct Machine<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: SlotMap<NodeKey, Node<'a>>,
    stack: Vec<NodeKey>,
    marks: Vec<usize>,
    memo: HashMap<usize, NodeKey>,
}

impl<'a> Machine<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            nodes: SlotMap::with_key(),
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(&mut self) -> Result<NodeKey, PickleError> {
        loop {
            let offset = self.pos;
            let opcode = self.read_u8()?;
            match opcode {
                op::PROTO => {
                    let protocol = self.read_u8()?;
                    if protocol > HIGHEST_PROTOCOL {
                        return Err(PickleError::Unsupported("pickle protocol newer than 5"));
                    }
                    trace!(protocol, "Pickle protocol header.");
                }
                op::FRAME => {
                    self.read_bytes(8)?;
                }
                op::STOP => return self.pop(),
                op::MARK => self.marks.push(self.stack.len()),
                op::POP => {
                    let base = self.marks.last().copied().unwrap_or(0);
                    if self.stack.len() > base {
                        self.stack.pop();
                    } else {
                        self.pop_mark()?;
                    }
                }
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let top = self.top()?;
                    self.stack.push(top);
                }

                op::NONE => self.push_atom(Value::None),
                op::NEWTRUE => self.push_atom(Value::Bool(true)),
                op::NEWFALSE => self.push_atom(Value::Bool(false)),
                op::INT => {
                    let line = self.read_text_line("INT")?;
                    let value = match line.as_str() {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        text => Value::Int(parse_literal(text, "INT", offset)?),
                    };
                    self.push_atom(value);
                }
                op::LONG => {
                    let line = self.read_text_line("LONG")?;
                    let text = line.strip_suffix('L').unwrap_or(&line);
                    self.push_atom(Value::Int(parse_literal(text, "LONG", offset)?));
                }
                op::BININT => {
                    let v = i32::from_le_bytes(self.read_array()?);
                    self.push_atom(Value::Int(i64::from(v)));
                }
                op::BININT1 => {
                    let v = self.read_u8()?;
                    self.push_atom(Value::Int(i64::from(v)));
                }
                op::BININT2 => {
                    let v = u16::from_le_bytes(self.read_array()?);
                    self.push_atom(Value::Int(i64::from(v)));
                }
                op::LONG1 => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?;
                    self.push_atom(Value::Int(decode_long(bytes)?));
                }
                op::LONG4 => {
                    let len = self.read_len_u32()?;
                    let bytes = self.read_bytes(len)?;
                    self.push_atom(Value::Int(decode_long(bytes)?));
                }
                op::FLOAT => {
                    let line = self.read_text_line("FLOAT")?;
                    self.push_atom(Value::Float(parse_literal(&line, "FLOAT", offset)?));
                }
                op::BINFLOAT => {
                    let v = f64::from_be_bytes(self.read_array()?);
                    self.push_atom(Value::Float(v));
                }

                op::STRING => {
                    let line = self.read_line()?;
                    let inner = strip_quotes(line).ok_or(PickleError::InvalidLiteral {
                        what: "STRING",
                        offset,
                    })?;
                    self.push_atom(bytes_or_string(inner));
                }
                op::BINSTRING => {
                    let len = self.read_len_i32(offset)?;
                    let bytes = self.read_bytes(len)?;
                    self.push_atom(bytes_or_string(bytes));
                }
                op::SHORT_BINSTRING => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?;
                    self.push_atom(bytes_or_string(bytes));
                }
                op::UNICODE => {
                    let line = self.read_line()?;
                    self.push_atom(Value::String(decode_raw_unicode_escape(line)));
                }
                op::BINUNICODE => {
                    let len = self.read_len_u32()?;
                    self.push_utf8(len)?;
                }
                op::SHORT_BINUNICODE => {
                    let len = usize::from(self.read_u8()?);
                    self.push_utf8(len)?;
                }
                op::BINUNICODE8 => {
                    let len = self.read_len_u64(offset)?;
                    self.push_utf8(len)?;
                }
                op::BINBYTES => {
                    let len = self.read_len_u32()?;
                    self.push_bytes(len)?;
                }
                op::SHORT_BINBYTES => {
                    let len = usize::from(self.read_u8()?);
                    self.push_bytes(len)?;
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let len = self.read_len_u64(offset)?;
                    self.push_bytes(len)?;
                }

                op::EMPTY_LIST => self.push_node(Node::List(Vec::new())),
                op::EMPTY_TUPLE => self.push_node(Node::Tuple(Vec::new())),
                op::EMPTY_DICT => self.push_node(Node::Dict(Vec::new())),
                op::EMPTY_SET => self.push_node(Node::Set(Vec::new())),
                op::LIST => {
                    let items = self.pop_mark()?;
                    self.push_node(Node::List(items));
                }
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    self.push_node(Node::Tuple(items));
                }
                op::FROZENSET => {
                    let items = self.pop_mark()?;
                    self.push_node(Node::Set(items));
                }
                op::DICT => {
                    let items = self.pop_mark()?;
                    let pairs = into_pairs(items, "DICT", offset)?;
                    self.push_node(Node::Dict(pairs));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = usize::from(opcode - op::TUPLE1 + 1);
                    if self.stack.len() < n {
                        return Err(PickleError::StackUnderflow { offset });
                    }
                    let items = self.stack.split_off(self.stack.len() - n);
                    self.push_node(Node::Tuple(items));
                }

                op::APPEND => {
                    let value = self.pop()?;
                    self.extend_list(vec![value], "APPEND", offset)?;
                }
                op::APPENDS => {
                    let items = self.pop_mark()?;
                    self.extend_list(items, "APPENDS", offset)?;
                }
                op::ADDITEMS => {
                    let items = self.pop_mark()?;
                    let target = self.top()?;
                    match &mut self.nodes[target] {
                        Node::Set(set) => set.extend(items),
                        _ => {
                            return Err(PickleError::InvalidOperand {
                                opcode: "ADDITEMS",
                                offset,
                            });
                        }
                    }
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.extend_dict(vec![(key, value)], "SETITEM", offset)?;
                }
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    let pairs = into_pairs(items, "SETITEMS", offset)?;
                    self.extend_dict(pairs, "SETITEMS", offset)?;
                }

                op::GLOBAL => {
                    let module = self.read_text_line("GLOBAL")?;
                    let name = self.read_text_line("GLOBAL")?;
                    self.push_atom(Value::Global { module, name });
                }
                op::STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    let (Some(module), Some(name)) = (self.atom_str(module), self.atom_str(name))
                    else {
                        return Err(PickleError::InvalidOperand {
                            opcode: "STACK_GLOBAL",
                            offset,
                        });
                    };
                    self.push_atom(Value::Global { module, name });
                }
                op::REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    self.push_object(callable, args);
                }
                op::NEWOBJ => {
                    let args = self.pop()?;
                    let class = self.pop()?;
                    self.push_object(class, args);
                }
                op::NEWOBJ_EX => {
                    let _kwargs = self.pop()?;
                    let args = self.pop()?;
                    let class = self.pop()?;
                    self.push_object(class, args);
                }
                op::INST => {
                    let module = self.read_text_line("INST")?;
                    let name = self.read_text_line("INST")?;
                    let items = self.pop_mark()?;
                    let class = self.insert_atom(Value::Global { module, name });
                    let args = self.nodes.insert(Node::Tuple(items));
                    self.push_object(class, args);
                }
                op::OBJ => {
                    let mut items = self.pop_mark()?;
                    if items.is_empty() {
                        return Err(PickleError::StackUnderflow { offset });
                    }
                    let class = items.remove(0);
                    let args = self.nodes.insert(Node::Tuple(items));
                    self.push_object(class, args);
                }
                op::BUILD => {
                    let state_key = self.pop()?;
                    let target = self.top()?;
                    match &mut self.nodes[target] {
                        Node::Object { state, .. } => *state = Some(state_key),
                        _ => trace!(offset, "Ignoring BUILD on a non-object node."),
                    }
                }

                op::PUT => {
                    let index = self.read_index_line(offset)?;
                    self.memoize(index)?;
                }
                op::BINPUT => {
                    let index = usize::from(self.read_u8()?);
                    self.memoize(index)?;
                }
                op::LONG_BINPUT => {
                    let index = self.read_len_u32()?;
                    self.memoize(index)?;
                }
                op::MEMOIZE => {
                    let index = self.memo.len();
                    self.memoize(index)?;
                }
                op::GET => {
                    let index = self.read_index_line(offset)?;
                    self.push_memo(index)?;
                }
                op::BINGET => {
                    let index = usize::from(self.read_u8()?);
                    self.push_memo(index)?;
                }
                op::LONG_BINGET => {
                    let index = self.read_len_u32()?;
                    self.push_memo(index)?;
                }

                op::READONLY_BUFFER => {}
                op::NEXT_BUFFER => return Err(PickleError::Unsupported("out-of-band buffers")),
                op::PERSID | op::BINPERSID => {
                    return Err(PickleError::Unsupported("persistent object ids"));
                }
                op::EXT1 | op::EXT2 | op::EXT4 => {
                    return Err(PickleError::Unsupported("extension registry codes"));
                }
                _ => return Err(PickleError::UnknownOpcode { opcode, offset }),
            }
        }
    }

    fn push_node(&mut self, node: Node<'a>) {
        let key = self.nodes.insert(node);
        self.stack.push(key);
    }

    fn insert_atom(&mut self, value: Value) -> NodeKey {
        self.nodes.insert(Node::Atom(value))
    }

    fn push_atom(&mut self, value: Value) {
        self.push_node(Node::Atom(value));
    }

    fn push_object(&mut self, callable: NodeKey, args: NodeKey) {
        self.push_node(Node::Object {
            callable,
            args,
            state: None,
            list_items: Vec::new(),
            dict_items: Vec::new(),
        });
    }

    fn push_utf8(&mut self, len: usize) -> Result<(), PickleError> {
        let bytes = self.read_bytes(len)?;
        let text = String::from_utf8_lossy(bytes).into_owned();
        self.push_atom(Value::String(text));
        Ok(())
    }

    fn push_bytes(&mut self, len: usize) -> Result<(), PickleError> {
        let bytes = self.read_bytes(len)?;
        self.push_node(Node::Blob(bytes));
        Ok(())
    }

    fn atom_str(&self, key: NodeKey) -> Option<String> {
        match &self.nodes[key] {
            Node::Atom(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn extend_list(
        &mut self,
        items: Vec<NodeKey>,
        opcode: &'static str,
        offset: usize,
    ) -> Result<(), PickleError> {
        let target = self.top()?;
        match &mut self.nodes[target] {
            Node::List(list) => list.extend(items),
            Node::Object { list_items, .. } => list_items.extend(items),
            _ => return Err(PickleError::InvalidOperand { opcode, offset }),
        }
        Ok(())
    }

    fn extend_dict(
        &mut self,
        pairs: Vec<(NodeKey, NodeKey)>,
        opcode: &'static str,
        offset: usize,
    ) -> Result<(), PickleError> {
        let target = self.top()?;
        match &mut self.nodes[target] {
            Node::Dict(dict) => dict.extend(pairs),
            Node::Object { dict_items, .. } => dict_items.extend(pairs),
            _ => return Err(PickleError::InvalidOperand { opcode, offset }),
        }
        Ok(())
    }

    fn memoize(&mut self, index: usize) -> Result<(), PickleError> {
        let top = self.top()?;
        self.memo.insert(index, top);
        Ok(())
    }

    fn push_memo(&mut self, index: usize) -> Result<(), PickleError> {
        let key = *self
            .memo
            .get(&index)
            .ok_or(PickleError::InvalidMemo { index })?;
        self.stack.push(key);
        Ok(())
    }

    fn pop(&mut self) -> Result<NodeKey, PickleError> {
        let base = self.marks.last().copied().unwrap_or(0);
        if self.stack.len() <= base {
            return Err(PickleError::StackUnderflow { offset: self.pos });
        }
        self.stack
            .pop()
            .ok_or(PickleError::StackUnderflow { offset: self.pos })
    }

    fn top(&self) -> Result<NodeKey, PickleError> {
        self.stack
            .last()
            .copied()
            .ok_or(PickleError::StackUnderflow { offset: self.pos })
    }

    fn pop_mark(&mut self) -> Result<Vec<NodeKey>, PickleError> {
        let mark = self
            .marks
            .pop()
            .ok_or(PickleError::MissingMark { offset: self.pos })?;
        Ok(self.stack.split_off(mark))
    }

    fn read_u8(&mut self) -> Result<u8, PickleError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PickleError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_len_u32(&mut self) -> Result<usize, PickleError> {
        Ok(u32::from_le_bytes(self.read_array()?) as usize)
    }

    fn read_len_i32(&mut self, offset: usize) -> Result<usize, PickleError> {
        let len = i32::from_le_bytes(self.read_array()?);
        usize::try_from(len).map_err(|_| PickleError::InvalidOperand {
            opcode: "BINSTRING",
            offset,
        })
    }

    fn read_len_u64(&mut self, offset: usize) -> Result<usize, PickleError> {
        let len = u64::from_le_bytes(self.read_array()?);
        usize::try_from(len).map_err(|_| PickleError::InvalidOperand {
            opcode: "8-byte length",
            offset,
        })
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PickleError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or(PickleError::Truncated { offset: self.pos })?;
        let input = self.input;
        let bytes = &input[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_line(&mut self) -> Result<&'a [u8], PickleError> {
        let input = self.input;
        let rest = &input[self.pos..];
        let newline = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(PickleError::Truncated {
                offset: self.input.len(),
            })?;
        let line = &rest[..newline];
        self.pos += newline + 1;
        Ok(line.strip_suffix(b"\r").unwrap_or(line))
    }

    fn read_text_line(&mut self, what: &'static str) -> Result<String, PickleError> {
        let offset = self.pos;
        let line = self.read_line()?;
        std::str::from_utf8(line)
            .map(|s| s.to_string())
            .map_err(|_| PickleError::InvalidLiteral { what, offset })
    }

    fn read_index_line(&mut self, offset: usize) -> Result<usize, PickleError> {
        let line = self.read_text_line("memo index")?;
        parse_literal(&line, "memo index", offset)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Footprint {
    nodes: u64,
    bytes: u64,
}

impl Footprint {
    fn add(self, other: Footprint) -> Footprint {
        Footprint {
            nodes: self.nodes.saturating_add(other.nodes),
            bytes: self.bytes.saturating_add(other.bytes),
        }
    }

    fn check(self) -> Result<Footprint, PickleError> {
        if self.nodes > MAX_RESOLVED_NODES || self.bytes > MAX_RESOLVED_BYTES {
            return Err(PickleError::TooLarge {
                nodes: self.nodes,
                bytes: self.bytes,
            });
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy)]
enum Visit {
    InProgress,
    Done(Footprint),
}

/// Freezes arena nodes into [`Value`] trees.
///
/// Every node is built once and removed from the arena. A node with several parent edges
/// keeps its built value in `shared` until the last of those edges has been visited; earlier
/// visits receive clones, the last one receives the value itself.
struct Resolver<'a> {
    nodes: SlotMap<NodeKey, Node<'a>>,
    /// Parent edges not yet visited.
    refs: SecondaryMap<NodeKey, usize>,
    shared: SecondaryMap<NodeKey, Value>,
}

impl<'a> Resolver<'a> {
    fn new(nodes: SlotMap<NodeKey, Node<'a>>) -> Self {
        let mut refs: SecondaryMap<NodeKey, usize> = SecondaryMap::with_capacity(nodes.len());
        for node in nodes.values() {
            for child in node.children() {
                match refs.get_mut(child) {
                    Some(count) => *count += 1,
                    None => {
                        refs.insert(child, 1);
                    }
                }
            }
        }
        Self {
            nodes,
            refs,
            shared: SecondaryMap::new(),
        }
    }

    /// Entries of the mapping at `root` whose keys are listed in `fields`, or `None` when
    /// `root` is not a mapping.
    fn select(&self, root: NodeKey, fields: &[&str]) -> Option<Vec<(NodeKey, NodeKey)>> {
        let pairs = match self.nodes.get(root)? {
            Node::Dict(pairs) => pairs,
            Node::Object { dict_items, .. } if !dict_items.is_empty() => dict_items,
            _ => return None,
        };
        Some(
            pairs
                .iter()
                .copied()
                .filter(|&(k, _)| self.nodes.get(k).is_some_and(|n| n.is_key(fields)))
                .collect(),
        )
    }

    /// Fails when flattening `roots` would produce more values or bytes than the budget allows.
    fn check_budget(&self, roots: &[NodeKey]) -> Result<(), PickleError> {
        let mut visits = SecondaryMap::new();
        let mut total = Footprint::default();
        for &root in roots {
            total = total.add(self.measure(root, 0, &mut visits)?).check()?;
        }
        trace!(nodes = total.nodes, bytes = total.bytes, "Object graph is within budget.");
        Ok(())
    }

    /// Expanded size of the subtree at `key`, memoized per node so shared subgraphs are
    /// measured once.
    fn measure(
        &self,
        key: NodeKey,
        depth: usize,
        visits: &mut SecondaryMap<NodeKey, Visit>,
    ) -> Result<Footprint, PickleError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(PickleError::RecursionLimit(MAX_NESTING_DEPTH));
        }
        match visits.get(key) {
            Some(Visit::Done(footprint)) => return Ok(*footprint),
            Some(Visit::InProgress) => return Err(PickleError::RecursionLimit(MAX_NESTING_DEPTH)),
            None => {}
        }
        let node = self
            .nodes
            .get(key)
            .ok_or(PickleError::RecursionLimit(MAX_NESTING_DEPTH))?;
        visits.insert(key, Visit::InProgress);

        let mut footprint = Footprint {
            nodes: 1,
            bytes: node.payload_len(),
        };
        for child in node.children() {
            footprint = footprint.add(self.measure(child, depth + 1, visits)?).check()?;
        }
        visits.insert(key, Visit::Done(footprint));
        Ok(footprint)
    }

    fn resolve(&mut self, key: NodeKey, depth: usize) -> Result<Value, PickleError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(PickleError::RecursionLimit(MAX_NESTING_DEPTH));
        }
        if let Some(value) = self.reuse(key) {
            return Ok(value);
        }
        let node = self
            .nodes
            .remove(key)
            .ok_or(PickleError::RecursionLimit(MAX_NESTING_DEPTH))?;
        let value = self.build(node, depth + 1)?;
        Ok(self.remember(key, value))
    }

    fn reuse(&mut self, key: NodeKey) -> Option<Value> {
        if !self.shared.contains_key(key) {
            return None;
        }
        match self.refs.get_mut(key) {
            Some(remaining) if *remaining > 1 => {
                *remaining -= 1;
                self.shared.get(key).cloned()
            }
            _ => self.shared.remove(key),
        }
    }

    fn remember(&mut self, key: NodeKey, value: Value) -> Value {
        match self.refs.get_mut(key) {
            Some(remaining) if *remaining > 1 => {
                *remaining -= 1;
                self.shared.insert(key, value.clone());
                value
            }
            _ => value,
        }
    }

    fn build(&mut self, node: Node<'a>, next: usize) -> Result<Value, PickleError> {
        let value = match node {
            Node::Atom(value) => value,
            Node::Blob(bytes) => Value::Bytes(bytes.to_vec()),
            Node::List(items) => Value::List(self.resolve_all(items, next)?),
            Node::Tuple(items) => Value::Tuple(self.resolve_all(items, next)?),
            Node::Set(items) => Value::Set(self.resolve_all(items, next)?),
            Node::Dict(pairs) => Value::Dict(self.resolve_pairs(pairs, next)?),
            Node::Object {
                callable,
                args,
                state,
                list_items,
                dict_items,
            } => {
                let object = Object {
                    callable: self.resolve(callable, next)?,
                    args: self.resolve(args, next)?,
                    state: state.map(|s| self.resolve(s, next)).transpose()?,
                    list_items: self.resolve_all(list_items, next)?,
                    dict_items: self.resolve_pairs(dict_items, next)?,
                };
                interpret_object(object)
            }
        };
        Ok(value)
    }

    fn resolve_all(&mut self, keys: Vec<NodeKey>, depth: usize) -> Result<Vec<Value>, PickleError> {
        keys.into_iter().map(|k| self.resolve(k, depth)).collect()
    }

    fn resolve_pairs(
        &mut self,
        pairs: Vec<(NodeKey, NodeKey)>,
        depth: usize,
    ) -> Result<Vec<(Value, Value)>, PickleError> {
        pairs
            .into_iter()
            .map(|(k, v)| Ok((self.resolve(k, depth)?, self.resolve(v, depth)?)))
            .collect()
    }
}

/// Turns the recorded constructor calls this decoder understands into plain values.
fn interpret_object(object: Object) -> Value {
    if let Some(value) = numpy::reconstruct(&object) {
        return value;
    }
    let callable = &object.callable;
    if callable.is_global(&["collections"], "OrderedDict")
        || callable.is_global(&["collections"], "defaultdict")
    {
        return Value::Dict(object.dict_items);
    }
    if callable.is_global(&["builtins", "__builtin__"], "set")
        || callable.is_global(&["builtins", "__builtin__"], "frozenset")
    {
        if let Value::Tuple(args) = &object.args {
            if let Some(Value::List(items)) = args.first() {
                return Value::Set(items.clone());
            }
        }
    }
    Value::Object(Box::new(object))
}

fn into_pairs(
    items: Vec<NodeKey>,
    opcode: &'static str,
    offset: usize,
) -> Result<Vec<(NodeKey, NodeKey)>, PickleError> {
    if items.len() % 2 != 0 {
        return Err(PickleError::InvalidOperand { opcode, offset });
    }
    Ok(items.chunks_exact(2).map(|kv| (kv[0], kv[1])).collect())
}

fn parse_literal<T: std::str::FromStr>(
    text: &str,
    what: &'static str,
    offset: usize,
) -> Result<T, PickleError> {
    text.trim()
        .parse()
        .map_err(|_| PickleError::InvalidLiteral { what, offset })
}

/// Two's complement little-endian integer, as written by `LONG1`/`LONG4`.
fn decode_long(bytes: &[u8]) -> Result<i64, PickleError> {
    if bytes.len() > 8 {
        return Err(PickleError::Unsupported("integers wider than 64 bits"));
    }
    let negative = bytes.last().is_some_and(|&b| b & 0x80 != 0);
    let mut buf = if negative { [0xff; 8] } else { [0; 8] };
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}

/// Python 2 `str` payloads are text when they decode as UTF-8 and raw bytes otherwise.
fn bytes_or_string(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::Bytes(bytes.to_vec()),
    }
}

fn strip_quotes(line: &[u8]) -> Option<&[u8]> {
    match line {
        [b'\'', inner @ .., b'\''] | [b'"', inner @ .., b'"'] => Some(inner),
        _ => None,
    }
}

fn decode_raw_unicode_escape(line: &[u8]) -> String {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        if line[i] == b'\\' && i + 1 < line.len() {
            let width = match line[i + 1] {
                b'u' => 4,
                b'U' => 8,
                _ => 0,
            };
            if width > 0 && i + 2 + width <= line.len() {
                let hex = std::str::from_utf8(&line[i + 2..i + 2 + width]).ok();
                if let Some(c) = hex
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                    .and_then(char::from_u32)
                {
                    out.push(c);
                    i += 2 + width;
                    continue;
                }
            }
        }
        out.push(char::from(line[i]));
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PickleWriter;

    fn decode(bytes: &[u8]) -> Value {
        PickleFile::decode(bytes).expect("valid pickle")
    }

    #[test]
    fn decodes_protocol_2_dict_written_by_python() {
        // pickle.dumps({'a': 1.5}, protocol=2)
        let bytes = b"\x80\x02}q\x00X\x01\x00\x00\x00aq\x01G?\xf8\x00\x00\x00\x00\x00\x00s.";
        let value = decode(bytes);
        assert_eq!(value.get("a"), Some(&Value::Float(1.5)));
    }

    #[test]
    fn decodes_protocol_4_framed_list() {
        // pickle.dumps({'a': [1, 2]}, protocol=4)
        let bytes = b"\x80\x04\x95\x10\x00\x00\x00\x00\x00\x00\x00}\x94\x8c\x01a\x94]\x94(K\x01K\x02es.";
        let value = decode(bytes);
        assert_eq!(
            value.get("a"),
            Some(&Value::List(vec![Value::Int(1), Value::Int(2)]))
        );
    }

    #[test]
    fn decodes_protocol_0_text_opcodes() {
        // pickle.dumps({'n': 7, 'x': 0.25, 'ok': True}, protocol=0)
        let bytes = b"(dp0\nVn\np1\nI7\nsVx\np2\nF0.25\nsVok\np3\nI01\ns.";
        let value = decode(bytes);
        assert_eq!(value.get("n"), Some(&Value::Int(7)));
        assert_eq!(value.get("x"), Some(&Value::Float(0.25)));
        assert_eq!(value.get("ok"), Some(&Value::Bool(true)));
    }

    #[test]
    fn memo_references_share_mutations() {
        let mut w = PickleWriter::new(2);
        w.empty_list();
        w.put(0);
        w.empty_dict();
        w.string("first");
        w.get(0);
        w.setitem();
        w.get(0);
        w.int(5);
        w.append();
        w.pop();
        let value = decode(&w.finish());
        assert_eq!(
            value.get("first"),
            Some(&Value::List(vec![Value::Int(5)]))
        );
    }

    #[test]
    fn decodes_numpy_arrays_and_scalars_across_protocols() {
        for protocol in [2, 4] {
            let mut w = PickleWriter::new(protocol);
            w.empty_dict();
            w.mark();
            w.string("matrix");
            w.ndarray(&[2, 2], "f4", &[1.0, 2.0, 3.0, 4.0], false);
            w.string("fortran");
            w.ndarray(&[2, 3], "f8", &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0], true);
            w.string("score");
            w.numpy_scalar("f8", 0.8125);
            w.setitems();
            let value = decode(&w.finish());

            let Some(Value::Array(matrix)) = value.get("matrix") else {
                panic!("protocol {protocol}: matrix missing");
            };
            assert_eq!(matrix.shape(), &[2, 2]);
            assert_eq!(matrix.data(), &[1.0, 2.0, 3.0, 4.0]);

            let Some(Value::Array(fortran)) = value.get("fortran") else {
                panic!("protocol {protocol}: fortran array missing");
            };
            assert_eq!(fortran.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

            assert_eq!(value.get("score"), Some(&Value::Float(0.8125)));
        }
    }

    #[test]
    fn ordered_dict_becomes_mapping() {
        let mut w = PickleWriter::new(2);
        w.global("collections", "OrderedDict");
        w.empty_tuple();
        w.reduce();
        w.mark();
        w.string("k");
        w.int(1);
        w.setitems();
        let value = decode(&w.finish());
        assert_eq!(value.get("k"), Some(&Value::Int(1)));
    }

    #[test]
    fn unknown_objects_are_preserved() {
        let mut w = PickleWriter::new(2);
        w.empty_dict();
        w.mark();
        w.string("opaque");
        w.global("haiku._src.data_structures", "FlatMap");
        w.empty_tuple();
        w.reduce();
        w.setitems();
        let value = decode(&w.finish());
        assert!(matches!(value.get("opaque"), Some(Value::Object(_))));
    }

    #[test]
    fn decode_long_handles_sign() {
        assert_eq!(decode_long(&[]).unwrap(), 0);
        assert_eq!(decode_long(&[0xff]).unwrap(), -1);
        assert_eq!(decode_long(&[0x00, 0x01]).unwrap(), 256);
        assert_eq!(decode_long(&[0x00, 0x80]).unwrap(), -32768);
        assert!(decode_long(&[0; 9]).is_err());
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let err = PickleFile::decode(b"\x80\x02}q\x00X\x05\x00\x00\x00ab").unwrap_err();
        assert!(matches!(err, PickleError::Truncated { .. }));
    }

    #[test]
    fn missing_stop_is_an_error() {
        let err = PickleFile::decode(b"\x80\x02}").unwrap_err();
        assert!(matches!(err, PickleError::Truncated { .. }));
    }

    #[test]
    fn unknown_opcode_is_reported_with_offset() {
        let err = PickleFile::decode(b"\x80\x02\xff").unwrap_err();
        assert!(matches!(
            err,
            PickleError::UnknownOpcode {
                opcode: 0xff,
                offset: 2
            }
        ));
    }

    #[test]
    fn out_of_band_buffers_are_rejected() {
        let err = PickleFile::decode(b"\x80\x05\x97.").unwrap_err();
        assert!(matches!(err, PickleError::Unsupported(_)));
    }

    #[test]
    fn invalid_memo_reference_is_rejected() {
        let err = PickleFile::decode(b"\x80\x02h\x03.").unwrap_err();
        assert!(matches!(err, PickleError::InvalidMemo { index: 3 }));
    }

    #[test]
    fn self_referencing_list_hits_recursion_limit() {
        let mut w = PickleWriter::new(2);
        w.empty_list();
        w.put(0);
        w.get(0);
        w.append();
        let err = PickleFile::decode(&w.finish()).unwrap_err();
        assert!(matches!(err, PickleError::RecursionLimit(_)));
    }

    #[test]
    fn shared_graph_expanding_past_budget_is_rejected() {
        let mut w = PickleWriter::new(2);
        w.empty_dict();
        w.mark();
        w.string("big");
        w.doubling_lists(26);
        w.string("ranking_confidence");
        w.float(0.5);
        w.setitems();
        let bytes = w.finish();
        assert!(bytes.len() < 512);

        let err = PickleFile::decode(&bytes).unwrap_err();
        assert!(matches!(err, PickleError::TooLarge { .. }));
        let err = PickleFile::decode_fields(&bytes, &["big"]).unwrap_err();
        assert!(matches!(err, PickleError::TooLarge { nodes, .. } if nodes > MAX_RESOLVED_NODES));

        let value = PickleFile::decode_fields(&bytes, &["ranking_confidence"]).unwrap();
        assert_eq!(
            value,
            Value::Dict(vec![(
                Value::String("ranking_confidence".into()),
                Value::Float(0.5)
            )])
        );
    }

    #[test]
    fn shared_graph_within_budget_is_flattened() {
        let mut w = PickleWriter::new(2);
        w.doubling_lists(3);
        let value = decode(&w.finish());

        fn leaves(v: &Value) -> usize {
            match v {
                Value::List(items) if items.is_empty() => 1,
                Value::List(items) => items.iter().map(leaves).sum(),
                _ => 0,
            }
        }
        assert_eq!(leaves(&value), 8);
    }

    #[test]
    fn shared_payload_resolves_at_every_reference() {
        let mut w = PickleWriter::new(4);
        w.empty_dict();
        w.mark();
        w.string("a");
        w.bytes(b"payload");
        w.put(0);
        w.string("b");
        w.get(0);
        w.string("c");
        w.empty_list();
        w.mark();
        w.get(0);
        w.get(0);
        w.appends();
        w.setitems();
        let bytes = w.finish();

        let payload = Value::Bytes(b"payload".to_vec());
        let value = decode(&bytes);
        assert_eq!(value.get("a"), Some(&payload));
        assert_eq!(value.get("b"), Some(&payload));
        assert_eq!(
            value.get("c"),
            Some(&Value::List(vec![payload.clone(), payload.clone()]))
        );

        let selected = PickleFile::decode_fields(&bytes, &["c", "missing"]).unwrap();
        assert_eq!(selected.get("a"), None);
        assert_eq!(
            selected.get("c"),
            Some(&Value::List(vec![payload.clone(), payload]))
        );
    }

    #[test]
    fn field_selection_on_non_mapping_returns_whole_value() {
        let mut w = PickleWriter::new(2);
        w.float_list(&[1.0, 2.0]);
        let value = PickleFile::decode_fields(&w.finish(), &["plddt"]).unwrap();
        assert_eq!(value, Value::List(vec![Value::Float(1.0), Value::Float(2.0)]));
    }

    #[test]
    fn raw_unicode_escape_decodes_escapes() {
        assert_eq!(decode_raw_unicode_escape(b"a\\u00e9b"), "a\u{e9}b");
        assert_eq!(decode_raw_unicode_escape(b"plain"), "plain");
        assert_eq!(decode_raw_unicode_escape(b"bad\\uzz"), "bad\\uzz");
    }
}
