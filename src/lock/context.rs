//! The lock context tree: a hierarchy of [`LockContext`] nodes mirroring the
//! resource hierarchy, layered on top of the flat [`crate::lock::LockManager`]
//! to provide multigranularity-aware acquire/release/promote/escalate.
//!
//! Grounded on the teacher's tree-shaped collaborator types in
//! `transaction::types` (parent/child bookkeeping) generalized to arbitrary
//! depth, and on `transaction::lock_manager`'s acquire/release pairing for
//! the monitor-call pattern. Per §9's design note on cyclic context/manager
//! references, the parent link is a `Weak` back-reference rather than a
//! second strong owner, so the tree has exactly one owning direction (root
//! -> children) and no reference cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::common::TransactionId;
use crate::lock::error::{LockError, LockResult};
use crate::lock::manager::SharedLockManager;
use crate::lock::mode::LockMode;
use crate::lock::resource_name::ResourceName;

/// A node in the lock context tree. Cheap to clone (`Arc`); always accessed
/// through `Arc<LockContext>` so children can hold a `Weak` reference back.
pub struct LockContext {
    name: ResourceName,
    parent: Option<Weak<LockContext>>,
    lock_man: SharedLockManager,
    children: Mutex<HashMap<String, Arc<LockContext>>>,
    num_child_locks: Mutex<HashMap<TransactionId, usize>>,
    readonly: bool,
    child_locks_disabled: AtomicBool,
}

impl LockContext {
    /// A fresh root context (depth 0) backed by `lock_man`.
    pub fn new_root(lock_man: SharedLockManager, name: ResourceName) -> Arc<LockContext> {
        Arc::new(LockContext {
            name,
            parent: None,
            lock_man,
            children: Mutex::new(HashMap::new()),
            num_child_locks: Mutex::new(HashMap::new()),
            readonly: false,
            child_locks_disabled: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<LockContext>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Mark this context's children as forbidden from holding finer-grained
    /// locks than this context does (§3 — used for indexes and temporary
    /// tables). Affects only children created from this point forward.
    pub fn disable_child_locks(&self) {
        self.child_locks_disabled.store(true, Ordering::SeqCst);
    }

    /// The child context named `name`, lazily created on first access.
    /// Inherits `readonly = self.child_locks_disabled || self.readonly`
    /// (§4.2).
    pub fn child_context(self: &Arc<Self>, name: impl Into<String>) -> Arc<LockContext> {
        let name = name.into();
        let mut children = self.children.lock();
        if let Some(existing) = children.get(&name) {
            return Arc::clone(existing);
        }
        let readonly = self.child_locks_disabled.load(Ordering::SeqCst) || self.readonly;
        let child = Arc::new(LockContext {
            name: self.name.child(name.clone()),
            parent: Some(Arc::downgrade(self)),
            lock_man: Arc::clone(&self.lock_man),
            children: Mutex::new(HashMap::new()),
            num_child_locks: Mutex::new(HashMap::new()),
            readonly,
            child_locks_disabled: AtomicBool::new(false),
        });
        children.insert(name, Arc::clone(&child));
        child
    }

    fn num_child_locks(&self, txn: TransactionId) -> usize {
        self.num_child_locks.lock().get(&txn).copied().unwrap_or(0)
    }

    fn bump_num_child_locks(&self, txn: TransactionId, delta: i64) {
        let mut map = self.num_child_locks.lock();
        let entry = map.entry(txn).or_insert(0);
        *entry = (*entry as i64 + delta).max(0) as usize;
        if *entry == 0 {
            map.remove(&txn);
        }
    }

    fn reset_num_child_locks(&self, txn: TransactionId) {
        self.num_child_locks.lock().remove(&txn);
    }

    /// The transaction's lock held directly on this resource, or `NL`.
    pub fn get_explicit_lock_type(&self, txn: TransactionId) -> LockMode {
        self.lock_man.get_lock_type(txn, &self.name)
    }

    /// The transaction's *effective* lock at this resource: the explicit
    /// lock if non-`NL`, else the nearest non-`NL` ancestor's mode projected
    /// downward (§4.2).
    pub fn get_effective_lock_type(&self, txn: TransactionId) -> LockMode {
        let explicit = self.get_explicit_lock_type(txn);
        if explicit != LockMode::NL {
            return explicit;
        }
        match self.parent() {
            None => LockMode::NL,
            Some(parent) => match parent.get_effective_lock_type(txn) {
                mode @ (LockMode::S | LockMode::X) => mode,
                LockMode::SIX => LockMode::S,
                LockMode::IS | LockMode::IX | LockMode::NL => LockMode::NL,
            },
        }
    }

    /// Acquire `mode` on this resource for `txn`. `InvalidLock` if the
    /// parent's explicit lock does not permit `mode` as a child (§4.2).
    pub fn acquire(&self, txn: TransactionId, mode: LockMode) -> LockResult<()> {
        if self.readonly {
            return Err(LockError::unsupported(self.name.clone(), "context is readonly"));
        }
        if let Some(parent) = self.parent() {
            let parent_mode = parent.get_explicit_lock_type(txn);
            if !parent_mode.permits_child(mode) {
                return Err(LockError::invalid(
                    self.name.clone(),
                    format!("parent lock {parent_mode} does not permit child lock {mode}"),
                ));
            }
        }
        self.lock_man.acquire(txn, &self.name, mode)?;
        if let Some(parent) = self.parent() {
            parent.bump_num_child_locks(txn, 1);
        }
        Ok(())
    }

    /// Release this resource's lock. `InvalidLock` if `numChildLocks[t] > 0`
    /// (would orphan descendant locks, §4.2).
    pub fn release(&self, txn: TransactionId) -> LockResult<()> {
        if self.readonly {
            return Err(LockError::unsupported(self.name.clone(), "context is readonly"));
        }
        if self.num_child_locks(txn) > 0 {
            return Err(LockError::invalid(
                self.name.clone(),
                "cannot release while descendant locks are held",
            ));
        }
        self.lock_man.release(txn, &self.name)?;
        if let Some(parent) = self.parent() {
            parent.bump_num_child_locks(txn, -1);
        }
        Ok(())
    }

    /// Promote this resource's explicit lock to `new_mode`. Handles the SIX
    /// special case (§4.2): promoting to `SIX` from `IS`/`IX`/`S` atomically
    /// releases every S/IS lock the transaction holds on strict descendants,
    /// since SIX already implies them.
    pub fn promote(self: &Arc<Self>, txn: TransactionId, new_mode: LockMode) -> LockResult<()> {
        if self.readonly {
            return Err(LockError::unsupported(self.name.clone(), "context is readonly"));
        }
        let current = self.get_explicit_lock_type(txn);
        if current == LockMode::NL {
            return Err(LockError::no_lock_held(txn, self.name.clone()));
        }
        if current == new_mode {
            return Err(LockError::duplicate(txn, self.name.clone()));
        }

        if new_mode == LockMode::SIX && matches!(current, LockMode::IS | LockMode::IX | LockMode::S) {
            let mut ancestor = self.parent();
            while let Some(a) = ancestor {
                if a.get_explicit_lock_type(txn) == LockMode::SIX {
                    return Err(LockError::invalid(
                        self.name.clone(),
                        "an ancestor already holds SIX; promotion would be redundant",
                    ));
                }
                ancestor = a.parent();
            }
            let redundant = self.collect_descendant_locks(txn, |m| matches!(m, LockMode::S | LockMode::IS));
            let mut release_names: Vec<ResourceName> = redundant.iter().map(|(_, n)| n.clone()).collect();
            // self already holds a lock on its own resource -- include it so
            // `acquire_and_release` treats this as an in-place replacement
            // rather than a fresh grant.
            release_names.push(self.name.clone());
            self.lock_man
                .acquire_and_release(txn, &self.name, new_mode, &release_names)?;
            for (ctx, _) in &redundant {
                if let Some(parent) = ctx.parent() {
                    parent.bump_num_child_locks(txn, -1);
                }
            }
            return Ok(());
        }

        if !new_mode.substitutes_for(current) {
            return Err(LockError::invalid(
                self.name.clone(),
                format!("{new_mode} does not substitute for held mode {current}"),
            ));
        }
        self.lock_man.promote(txn, &self.name, new_mode)
    }

    /// Collapse every lock `txn` holds on `self` or its strict descendants
    /// into a single lock at `self` (§4.2). Idempotent: escalating twice in
    /// a row with nothing new acquired in between is a no-op the second
    /// time.
    pub fn escalate(self: &Arc<Self>, txn: TransactionId) -> LockResult<()> {
        if self.readonly {
            return Err(LockError::unsupported(self.name.clone(), "context is readonly"));
        }
        let current = self.get_explicit_lock_type(txn);
        if current == LockMode::NL {
            return Err(LockError::no_lock_held(txn, self.name.clone()));
        }

        let descendants = self.collect_descendant_locks(txn, |_| true);
        let any_exclusive_leaning = descendants
            .iter()
            .any(|(ctx, _)| matches!(ctx.get_explicit_lock_type(txn), LockMode::X | LockMode::IX | LockMode::SIX))
            || matches!(current, LockMode::X | LockMode::IX | LockMode::SIX);
        let target = if any_exclusive_leaning { LockMode::X } else { LockMode::S };

        if target == current && descendants.is_empty() {
            return Ok(());
        }

        let mut release_names: Vec<ResourceName> = descendants.iter().map(|(_, n)| n.clone()).collect();
        release_names.push(self.name.clone());
        self.lock_man
            .acquire_and_release(txn, &self.name, target, &release_names)?;

        self.reset_num_child_locks(txn);
        for (ctx, _) in &descendants {
            ctx.reset_num_child_locks(txn);
        }
        Ok(())
    }

    /// Recursively gather `(context, resource)` for every already-created
    /// descendant context where `txn` holds an explicit lock matching
    /// `filter`. Only instantiated children are visited: a transaction
    /// cannot hold a lock on a context that was never created.
    fn collect_descendant_locks(
        self: &Arc<Self>,
        txn: TransactionId,
        filter: impl Fn(LockMode) -> bool + Copy,
    ) -> Vec<(Arc<LockContext>, ResourceName)> {
        let mut out = Vec::new();
        let children: Vec<Arc<LockContext>> = self.children.lock().values().cloned().collect();
        for child in children {
            let mode = child.get_explicit_lock_type(txn);
            if mode != LockMode::NL && filter(mode) {
                out.push((Arc::clone(&child), child.name.clone()));
            }
            out.extend(child.collect_descendant_locks(txn, filter));
        }
        out
    }

    /// A recursive text dump of every lock held under this context, for
    /// diagnosing stuck queues (supplemented introspection, not part of the
    /// mutating API).
    pub fn debug_subtree(&self, txn: TransactionId) -> String {
        let mut out = String::new();
        self.debug_subtree_into(txn, 0, &mut out);
        out
    }

    fn debug_subtree_into(&self, txn: TransactionId, depth: usize, out: &mut String) {
        let mode = self.get_explicit_lock_type(txn);
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{} : {}\n", self.name, mode));
        for child in self.children.lock().values() {
            child.debug_subtree_into(txn, depth + 1, out);
        }
    }
}
