//! Process image and interceptor
//!
//! A call through [`ProcessImage::call`] runs every attached listener's
//! `on_enter`, then the replacement if one is installed or the original
//! otherwise, then every `on_leave`. Listener panics are caught and logged.
//! A panicking replacement is logged and the original runs in its place.

use crate::hooks::challenge::{AuthChallenge, CompletionBlock};
use crate::{HookError, Result, TargetSymbol};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Writable memory shared between caller and hooks
#[derive(Debug, Clone, Default)]
pub struct MemoryRef(Arc<Mutex<Vec<u8>>>);

impl MemoryRef {
    /// Memory initialised with `bytes`
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(Mutex::new(bytes.into())))
    }

    /// Zeroed memory of `len` bytes
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    /// Copy of the contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether the memory is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Little-endian `u32` at `offset`
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let end = offset.checked_add(4)?;
        let bytes = self.0.lock();
        let slice = bytes.get(offset..end)?;
        Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    /// Write a little-endian `u32` at `offset`; false if out of bounds
    pub fn write_u32(&self, offset: usize, value: u32) -> bool {
        let Some(end) = offset.checked_add(4) else {
            return false;
        };
        let mut bytes = self.0.lock();
        match bytes.get_mut(offset..end) {
            Some(slice) => {
                slice.copy_from_slice(&value.to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Zero every byte
    pub fn clear(&self) {
        self.0.lock().iter_mut().for_each(|b| *b = 0);
    }

    /// Run `f` over the contents in place
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.0.lock())
    }
}

/// Argument or return value of an intercepted call
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// No value
    #[default]
    Void,
    /// Null pointer
    Null,
    /// Integer or status code
    Int(i64),
    /// Boolean
    Bool(bool),
    /// Opaque object handle
    Handle(u64),
    /// String
    Str(String),
    /// Pointer to writable memory
    Memory(MemoryRef),
    /// Authentication challenge object
    Challenge(AuthChallenge),
    /// Completion block
    Block(CompletionBlock),
}

impl Value {
    /// Memory behind a pointer argument
    pub fn as_memory(&self) -> Option<&MemoryRef> {
        match self {
            Value::Memory(memory) => Some(memory),
            _ => None,
        }
    }
}

/// Implementation of an export
pub type Implementation = Arc<dyn Fn(&mut [Value]) -> Value + Send + Sync>;

/// Observes calls to an export
pub trait InvocationListener: Send + Sync {
    /// Before the implementation runs; arguments may be rewritten
    fn on_enter(&self, _symbol: &TargetSymbol, _args: &mut [Value]) {}

    /// After the implementation returns; the return value may be rewritten
    fn on_leave(&self, _symbol: &TargetSymbol, _retval: &mut Value) {}
}

/// Identifies one attached listener or replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(pub u64);

struct Export {
    original: Implementation,
    replacement: Option<(HookId, Implementation)>,
    listeners: Vec<(HookId, Arc<dyn InvocationListener>)>,
}

/// Exports of a process and the hooks attached to them
#[derive(Default)]
pub struct ProcessImage {
    exports: RwLock<HashMap<TargetSymbol, Export>>,
}

impl ProcessImage {
    /// Empty image
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or redefine an export's original implementation
    pub fn define<F>(&self, symbol: TargetSymbol, original: F)
    where
        F: Fn(&mut [Value]) -> Value + Send + Sync + 'static,
    {
        let mut exports = self.exports.write();
        match exports.get_mut(&symbol) {
            Some(export) => export.original = Arc::new(original),
            None => {
                exports.insert(
                    symbol,
                    Export {
                        original: Arc::new(original),
                        replacement: None,
                        listeners: Vec::new(),
                    },
                );
            }
        }
    }

    /// Whether `symbol` is exported
    pub fn contains(&self, symbol: &TargetSymbol) -> bool {
        self.exports.read().contains_key(symbol)
    }

    /// Call `symbol` with hooks applied
    pub fn call(&self, symbol: &TargetSymbol, args: &mut [Value]) -> Result<Value> {
        let (original, replacement, listeners) = {
            let exports = self.exports.read();
            let export = exports.get(symbol).ok_or_else(|| not_found(symbol))?;
            let replacement = export.replacement.as_ref().map(|(_, r)| r.clone());
            let listeners: Vec<_> = export.listeners.iter().map(|(_, l)| l.clone()).collect();
            (export.original.clone(), replacement, listeners)
        };

        for listener in &listeners {
            let entered = catch_unwind(AssertUnwindSafe(|| listener.on_enter(symbol, args)));
            if entered.is_err() {
                warn!(%symbol, "Listener panicked in on_enter");
            }
        }
        let mut retval = match replacement {
            Some(replacement) => match catch_unwind(AssertUnwindSafe(|| replacement(args))) {
                Ok(retval) => retval,
                Err(_) => {
                    warn!(%symbol, "Replacement panicked, running original");
                    original(args)
                }
            },
            None => original(args),
        };
        for listener in &listeners {
            let left = catch_unwind(AssertUnwindSafe(|| listener.on_leave(symbol, &mut retval)));
            if left.is_err() {
                warn!(%symbol, "Listener panicked in on_leave");
            }
        }
        Ok(retval)
    }

    /// Call the original implementation, bypassing every hook
    pub fn call_original(&self, symbol: &TargetSymbol, args: &mut [Value]) -> Result<Value> {
        let original = self
            .exports
            .read()
            .get(symbol)
            .map(|e| e.original.clone())
            .ok_or_else(|| not_found(symbol))?;
        Ok(original(args))
    }

    /// Listeners currently attached to `symbol`
    pub fn listener_count(&self, symbol: &TargetSymbol) -> usize {
        self.exports
            .read()
            .get(symbol)
            .map_or(0, |e| e.listeners.len())
    }

    /// Whether `symbol` carries a replacement
    pub fn is_replaced(&self, symbol: &TargetSymbol) -> bool {
        self.exports
            .read()
            .get(symbol)
            .is_some_and(|e| e.replacement.is_some())
    }
}

fn not_found(symbol: &TargetSymbol) -> HookError {
    HookError::SymbolNotFound {
        module: symbol.module.to_string(),
        name: symbol.name.to_string(),
    }
}

/// Attaches and reverts hooks on a process image
pub struct Interceptor {
    image: Arc<ProcessImage>,
    next_id: AtomicU64,
    hooks: Mutex<HashMap<HookId, TargetSymbol>>,
}

impl Interceptor {
    /// Interceptor over `image`
    pub fn new(image: Arc<ProcessImage>) -> Self {
        Self {
            image,
            next_id: AtomicU64::new(1),
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// Image hooks are installed into
    pub fn image(&self) -> &Arc<ProcessImage> {
        &self.image
    }

    fn allocate(&self, symbol: TargetSymbol) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks.lock().insert(id, symbol);
        id
    }

    /// Observe every call to `symbol`
    pub fn attach(&self, symbol: TargetSymbol, listener: Arc<dyn InvocationListener>) -> Result<HookId> {
        let mut exports = self.image.exports.write();
        let export = exports.get_mut(&symbol).ok_or_else(|| not_found(&symbol))?;
        let id = self.allocate(symbol);
        export.listeners.push((id, listener));
        debug!(%symbol, hook = id.0, "Listener attached");
        Ok(id)
    }

    /// Run `implementation` instead of the original on every call
    pub fn replace(&self, symbol: TargetSymbol, implementation: Implementation) -> Result<HookId> {
        let mut exports = self.image.exports.write();
        let export = exports.get_mut(&symbol).ok_or_else(|| not_found(&symbol))?;
        if export.replacement.is_some() {
            return Err(HookError::AlreadyReplaced(symbol.to_string()));
        }
        let id = self.allocate(symbol);
        export.replacement = Some((id, implementation));
        debug!(%symbol, hook = id.0, "Implementation replaced");
        Ok(id)
    }

    /// Remove one listener or replacement
    pub fn revert(&self, id: HookId) -> Result<()> {
        let symbol = self
            .hooks
            .lock()
            .remove(&id)
            .ok_or(HookError::UnknownHook(id.0))?;
        let mut exports = self.image.exports.write();
        if let Some(export) = exports.get_mut(&symbol) {
            export.listeners.retain(|(hook, _)| *hook != id);
            if export.replacement.as_ref().is_some_and(|(hook, _)| *hook == id) {
                export.replacement = None;
            }
        }
        debug!(%symbol, hook = id.0, "Hook reverted");
        Ok(())
    }

    /// Remove every hook this interceptor installed
    pub fn revert_all(&self) {
        let ids: Vec<HookId> = self.hooks.lock().keys().copied().collect();
        for id in ids {
            let _ = self.revert(id);
        }
    }
}
