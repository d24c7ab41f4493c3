//! In-process managed engine
//!
//! `HostEngine` implements `ManagedEngine` on top of a small object model:
//! strings, arrays, classes (including Struct and Data classes), struct
//! instances and exceptions, plus the symbol table, `$VERBOSE`, warning
//! categories, a block stack for `yield` and errinfo. Embedders use it to run
//! native code without a full engine; the bridge's own tests run against it.
//!
//! The host engine never collects: handles stay valid until the engine is
//! dropped, so memory grows with every object created.
//!
//! All state sits behind one mutex. The lock is never held while calling out
//! (blocks run unlocked), so native code called from a block can re-enter.

mod dispatch;
mod objects;
mod symbols;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::runtime::abi::{Id, Value};
use crate::runtime::encoding::Encoding;
use crate::runtime::engine::{ErrorKind, Exception, ManagedEngine, RawBytes, WarningCategory};
use crate::runtime::string::Coderange;

pub use objects::ClassKind;
use objects::{HandleTable, HostClass, HostObject, HostString};
use symbols::SymbolTable;

/// A block callable through `rb_yield_values`.
pub type Block = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

struct Builtins {
    object: Value,
    class: Value,
    string: Value,
    symbol: Value,
    array: Value,
    integer: Value,
    nil: Value,
    true_class: Value,
    false_class: Value,
    struct_class: Value,
    data: Value,
    exception: Value,
    standard_error: Value,
    type_error: Value,
    argument_error: Value,
    range_error: Value,
    local_jump_error: Value,
    no_memory_error: Value,
    fatal: Value,
}

impl Builtins {
    fn create(handles: &mut HandleTable) -> Self {
        let mut define = |name: &str, superclass: Option<Value>, kind: ClassKind| {
            handles.wrap(HostObject::Class(HostClass::new(
                Some(name.to_string()),
                superclass,
                kind,
            )))
        };
        let object = define("Object", None, ClassKind::Plain);
        let class = define("Class", Some(object), ClassKind::Plain);
        let string = define("String", Some(object), ClassKind::Plain);
        let symbol = define("Symbol", Some(object), ClassKind::Plain);
        let array = define("Array", Some(object), ClassKind::Plain);
        let integer = define("Integer", Some(object), ClassKind::Plain);
        let nil = define("NilClass", Some(object), ClassKind::Plain);
        let true_class = define("TrueClass", Some(object), ClassKind::Plain);
        let false_class = define("FalseClass", Some(object), ClassKind::Plain);
        let struct_class = define("Struct", Some(object), ClassKind::Plain);
        let data = define("Data", Some(object), ClassKind::Plain);
        let exception = define("Exception", Some(object), ClassKind::Exception);
        let standard_error = define("StandardError", Some(exception), ClassKind::Exception);
        let type_error = define("TypeError", Some(standard_error), ClassKind::Exception);
        let argument_error = define("ArgumentError", Some(standard_error), ClassKind::Exception);
        let range_error = define("RangeError", Some(standard_error), ClassKind::Exception);
        let local_jump_error = define("LocalJumpError", Some(standard_error), ClassKind::Exception);
        let no_memory_error = define("NoMemoryError", Some(exception), ClassKind::Exception);
        let fatal = define("fatal", Some(exception), ClassKind::Exception);
        Self {
            object,
            class,
            string,
            symbol,
            array,
            integer,
            nil,
            true_class,
            false_class,
            struct_class,
            data,
            exception,
            standard_error,
            type_error,
            argument_error,
            range_error,
            local_jump_error,
            no_memory_error,
            fatal,
        }
    }

    fn for_kind(&self, kind: ErrorKind) -> Value {
        match kind {
            ErrorKind::StandardError => self.standard_error,
            ErrorKind::TypeError => self.type_error,
            ErrorKind::ArgumentError => self.argument_error,
            ErrorKind::RangeError => self.range_error,
            ErrorKind::LocalJumpError => self.local_jump_error,
            ErrorKind::NoMemoryError => self.no_memory_error,
            ErrorKind::Fatal => self.fatal,
        }
    }

    fn kind_of_class(&self, class: Value) -> Option<ErrorKind> {
        [
            ErrorKind::StandardError,
            ErrorKind::TypeError,
            ErrorKind::ArgumentError,
            ErrorKind::RangeError,
            ErrorKind::LocalJumpError,
            ErrorKind::NoMemoryError,
            ErrorKind::Fatal,
        ]
        .into_iter()
        .find(|k| self.for_kind(*k) == class)
    }
}

struct HostState {
    handles: HandleTable,
    symbols: SymbolTable,
    builtins: Builtins,
    verbose: Value,
    categories: [bool; 4],
    warnings: Vec<String>,
    blocks: Vec<Block>,
    errinfo: Value,
    operations: Vec<String>,
    nomem: Exception,
}

impl HostState {
    fn new() -> Self {
        let mut handles = HandleTable::default();
        let builtins = Builtins::create(&mut handles);
        // Raised on allocation failure, so it must exist before memory runs out.
        let nomem = Exception::new(handles.wrap(HostObject::Exception {
            class: builtins.no_memory_error,
            message: b"failed to allocate memory".to_vec(),
        }));
        let mut categories = [false; 4];
        categories[WarningCategory::None as usize] = true;
        categories[WarningCategory::Experimental as usize] = true;
        Self {
            handles,
            symbols: SymbolTable::default(),
            builtins,
            verbose: Value::FALSE,
            categories,
            warnings: Vec::new(),
            blocks: Vec::new(),
            errinfo: Value::NIL,
            operations: Vec::new(),
            nomem,
        }
    }

    fn new_string(&mut self, bytes: &[u8], encoding: Encoding) -> Value {
        self.handles
            .wrap(HostObject::String(HostString::new(bytes, encoding)))
    }

    fn exception(&mut self, kind: ErrorKind, message: &[u8]) -> Exception {
        if kind == ErrorKind::NoMemoryError {
            return self.nomem;
        }
        let class = self.builtins.for_kind(kind);
        Exception::new(self.handles.wrap(HostObject::Exception {
            class,
            message: message.to_vec(),
        }))
    }

    fn type_error(&mut self, message: impl AsRef<[u8]>) -> Exception {
        self.exception(ErrorKind::TypeError, message.as_ref())
    }

    fn argument_error(&mut self, message: impl AsRef<[u8]>) -> Exception {
        self.exception(ErrorKind::ArgumentError, message.as_ref())
    }

    fn class_of(&self, value: Value) -> Value {
        let b = &self.builtins;
        if value.is_fixnum() {
            return b.integer;
        }
        if value.is_static_symbol() {
            return b.symbol;
        }
        match value {
            Value::NIL => return b.nil,
            Value::TRUE => return b.true_class,
            Value::FALSE => return b.false_class,
            _ => {}
        }
        match self.handles.unwrap(value) {
            Some(HostObject::String(_)) => b.string,
            Some(HostObject::Array(_)) => b.array,
            Some(HostObject::Class(_)) => b.class,
            Some(HostObject::Struct { class, .. }) => *class,
            Some(HostObject::Exception { class, .. }) => *class,
            None => b.object,
        }
    }

    fn is_kind_of(&self, value: Value, class: Value) -> bool {
        let mut current = Some(self.class_of(value));
        while let Some(c) = current {
            if c == class {
                return true;
            }
            current = self.handles.class(c).and_then(|c| c.superclass);
        }
        false
    }

    fn symbol_id(&self, value: Value) -> Option<Id> {
        value
            .static_symbol_id()
            .filter(|id| self.symbols.entry(*id).is_some())
    }

    fn symbol_name(&self, id: Id) -> Option<&[u8]> {
        self.symbols.entry(id).map(|e| e.name.as_slice())
    }
}

/// The in-process engine.
pub struct HostEngine {
    state: Mutex<HostState>,
}

impl HostEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HostState::new()),
        })
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with `block` as the current block for `yield`.
    pub fn with_block<T>(
        &self,
        block: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
        f: impl FnOnce() -> T,
    ) -> T {
        struct PopBlock<'a>(&'a HostEngine);
        impl Drop for PopBlock<'_> {
            fn drop(&mut self) {
                self.0.state().blocks.pop();
            }
        }

        self.state().blocks.push(Arc::new(block));
        let _pop = PopBlock(self);
        f()
    }

    // =========================================================================
    // State knobs
    // =========================================================================

    /// Set `$VERBOSE` (nil, false or true).
    pub fn set_verbose(&self, verbose: Value) {
        self.state().verbose = verbose;
    }

    pub fn set_warning_category(&self, category: WarningCategory, enabled: bool) {
        self.state().categories[category as usize] = enabled;
    }

    /// Warnings emitted so far, oldest first.
    pub fn warnings(&self) -> Vec<String> {
        self.state().warnings.clone()
    }

    /// Names of operations invoked so far, oldest first.
    pub fn operations(&self) -> Vec<String> {
        self.state().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.state().operations.clear();
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn class_value(&self, kind: ErrorKind) -> Value {
        self.state().builtins.for_kind(kind)
    }

    pub fn struct_class(&self) -> Value {
        self.state().builtins.struct_class
    }

    pub fn data_class(&self) -> Value {
        self.state().builtins.data
    }

    pub fn object_class(&self) -> Value {
        self.state().builtins.object
    }

    pub fn exception_kind(&self, exc: Exception) -> Option<ErrorKind> {
        let st = self.state();
        match st.handles.unwrap(exc.value())? {
            HostObject::Exception { class, .. } => st.builtins.kind_of_class(*class),
            _ => None,
        }
    }

    pub fn exception_message(&self, exc: Exception) -> Option<String> {
        match self.state().handles.unwrap(exc.value())? {
            HostObject::Exception { message, .. } => {
                Some(String::from_utf8_lossy(message).into_owned())
            }
            _ => None,
        }
    }

    pub fn string_bytes(&self, value: Value) -> Option<Vec<u8>> {
        self.state().handles.string(value).map(|s| s.bytes().to_vec())
    }

    pub fn string_encoding(&self, value: Value) -> Option<Encoding> {
        self.state().handles.string(value).map(|s| s.encoding)
    }

    /// The coderange cached on a string, without computing it.
    pub fn cached_coderange(&self, value: Value) -> Option<Coderange> {
        self.state().handles.string(value).map(|s| s.coderange)
    }

    pub fn is_frozen(&self, value: Value) -> bool {
        self.state()
            .handles
            .string(value)
            .is_some_and(|s| s.frozen)
    }

    /// Append to a string; fails on frozen strings.
    pub fn append_bytes(&self, value: Value, bytes: &[u8]) -> bool {
        let mut st = self.state();
        let Some(s) = st.handles.string_mut(value) else {
            return false;
        };
        if s.frozen {
            return false;
        }
        let mut content = s.bytes().to_vec();
        content.extend_from_slice(bytes);
        *s = HostString::new(&content, s.encoding);
        true
    }

    pub fn array_elements(&self, value: Value) -> Option<Vec<Value>> {
        match self.state().handles.unwrap(value)? {
            HostObject::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    pub fn class_name(&self, class: Value) -> Option<String> {
        self.state().handles.class(class)?.name.clone()
    }

    pub fn superclass(&self, class: Value) -> Option<Value> {
        self.state().handles.class(class)?.superclass
    }

    pub fn class_kind(&self, class: Value) -> Option<ClassKind> {
        self.state().handles.class(class).map(|c| c.kind)
    }

    pub fn constant(&self, namespace: Value, name: &str) -> Option<Value> {
        let st = self.state();
        st.handles
            .class(namespace)?
            .constants
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn members(&self, class: Value) -> Option<Vec<String>> {
        let st = self.state();
        let class = st.handles.class(class)?;
        Some(
            class
                .members
                .iter()
                .filter_map(|id| st.symbol_name(*id))
                .map(|n| String::from_utf8_lossy(n).into_owned())
                .collect(),
        )
    }

    pub fn struct_fields(&self, instance: Value) -> Option<Vec<Value>> {
        match self.state().handles.unwrap(instance)? {
            HostObject::Struct { fields, .. } => Some(fields.clone()),
            _ => None,
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.state().symbols.len()
    }

    /// Number of objects ever wrapped; never shrinks.
    pub fn handle_count(&self) -> usize {
        self.state().handles.len()
    }

    /// Define a plain class (for namespaces in tests and embedders).
    pub fn define_class(&self, name: &str, superclass: Option<Value>) -> Value {
        let mut st = self.state();
        let superclass = superclass.unwrap_or(st.builtins.object);
        let class = st.handles.wrap(HostObject::Class(HostClass::new(
            Some(name.to_string()),
            Some(superclass),
            ClassKind::Plain,
        )));
        let object = st.builtins.object;
        if let Some(object) = st.handles.class_mut(object) {
            object.set_constant(name, class);
        }
        class
    }
}

impl ManagedEngine for HostEngine {
    fn invoke(&self, op: &str, args: &[Value]) -> Result<Value, Exception> {
        self.state().operations.push(op.to_string());
        self.dispatch(op, args)
    }

    fn invoke_predicate(&self, op: &str, args: &[Value]) -> Result<bool, Exception> {
        self.state().operations.push(op.to_string());
        self.dispatch_predicate(op, args)
    }

    fn new_string(&self, bytes: &[u8], encoding: Encoding) -> Result<Value, Exception> {
        Ok(self.state().new_string(bytes, encoding))
    }

    fn string_contents(&self, string: Value) -> Result<RawBytes, Exception> {
        let mut st = self.state();
        match st.handles.string(string) {
            Some(s) => Ok(RawBytes {
                ptr: s.as_ptr(),
                len: s.bytes().len(),
            }),
            None => Err(st.type_error("wrong argument type (expected String)")),
        }
    }

    fn new_exception(&self, kind: ErrorKind, message: &[u8]) -> Exception {
        self.state().exception(kind, message)
    }
}
