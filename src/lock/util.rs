//! The declarative lock utility: given a desired effective mode, acquire,
//! promote, or escalate whatever is necessary to reach it, top-down.
//!
//! Grounded on the teacher's higher-level `transaction` helpers that wrap
//! raw lock calls with "do whatever it takes" convenience methods, but this
//! is a direct, careful transcription of §4.3's algorithm rather than a
//! generalization of any single teacher function — the teacher has no
//! multigranularity tree to walk.

use std::sync::Arc;

use crate::common::TransactionId;
use crate::lock::context::LockContext;
use crate::lock::error::LockResult;
use crate::lock::mode::LockMode;

/// Ensure `txn`'s effective lock type at `ctx` substitutes for `req`
/// (`req` must be one of `NL`, `S`, `X`), acquiring/promoting/escalating
/// ancestors and `ctx` itself to the least-permissive sufficient set
/// (§4.3).
pub fn ensure_sufficient_lock_held(ctx: &Arc<LockContext>, txn: TransactionId, req: LockMode) -> LockResult<()> {
    if req == LockMode::NL {
        return Ok(());
    }
    debug_assert!(matches!(req, LockMode::S | LockMode::X), "req must be NL, S, or X");

    let required_intent = if req == LockMode::S { LockMode::IS } else { LockMode::IX };

    for ancestor in ancestors_root_first(ctx) {
        let p = ancestor.get_effective_lock_type(txn);
        if p == required_intent {
            continue;
        }
        if p == LockMode::NL {
            ancestor.acquire(txn, required_intent)?;
        } else if p.substitutes_for(required_intent) {
            continue;
        } else if p == LockMode::S && required_intent == LockMode::IX {
            ancestor.promote(txn, LockMode::SIX)?;
        } else {
            ancestor.promote(txn, required_intent)?;
        }
    }

    loop {
        let e = ctx.get_explicit_lock_type(txn);
        let f = ctx.get_effective_lock_type(txn);
        if f.substitutes_for(req) {
            return Ok(());
        }
        if e == LockMode::IX && req == LockMode::S {
            ctx.promote(txn, LockMode::SIX)?;
            return Ok(());
        }
        if e.is_intent() {
            ctx.escalate(txn)?;
            continue;
        }
        if e == LockMode::NL {
            ctx.acquire(txn, req)?;
            return Ok(());
        }
        ctx.promote(txn, req)?;
        return Ok(());
    }
}

/// Ancestors of `ctx`, root first (does not include `ctx` itself).
fn ancestors_root_first(ctx: &Arc<LockContext>) -> Vec<Arc<LockContext>> {
    let mut chain = Vec::new();
    let mut cur = ctx.parent();
    while let Some(a) = cur {
        cur = a.parent();
        chain.push(a);
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::manager::LockManager;
    use crate::lock::resource_name::ResourceName;

    fn tree() -> (Arc<LockContext>, Arc<LockContext>, Arc<LockContext>) {
        let lm = Arc::new(LockManager::new());
        let db = LockContext::new_root(lm, ResourceName::root("db"));
        let table = db.child_context("orders");
        let page = table.child_context("page3");
        (db, table, page)
    }

    #[test]
    fn acquires_intent_locks_on_ancestors_for_s() {
        let (db, table, page) = tree();
        ensure_sufficient_lock_held(&page, 1, LockMode::S).unwrap();
        assert_eq!(db.get_explicit_lock_type(1), LockMode::IS);
        assert_eq!(table.get_explicit_lock_type(1), LockMode::IS);
        assert_eq!(page.get_explicit_lock_type(1), LockMode::S);
    }

    #[test]
    fn acquires_intent_locks_on_ancestors_for_x() {
        let (db, table, page) = tree();
        ensure_sufficient_lock_held(&page, 1, LockMode::X).unwrap();
        assert_eq!(db.get_explicit_lock_type(1), LockMode::IX);
        assert_eq!(table.get_explicit_lock_type(1), LockMode::IX);
        assert_eq!(page.get_explicit_lock_type(1), LockMode::X);
    }

    #[test]
    fn upgrades_existing_intent_to_six_when_s_then_x_needed_higher_up() {
        let (db, table, page) = tree();
        // First acquire S directly on the table (not via this utility), then
        // ask for X on the page -- table's S must become SIX so its own S
        // readers are preserved alongside the IX needed for the page.
        db.acquire(1, LockMode::IS).unwrap();
        table.acquire(1, LockMode::S).unwrap();
        ensure_sufficient_lock_held(&page, 1, LockMode::X).unwrap();
        assert_eq!(table.get_explicit_lock_type(1), LockMode::SIX);
        assert_eq!(page.get_explicit_lock_type(1), LockMode::X);
    }

    #[test]
    fn escalates_when_ctx_holds_only_intent_but_needs_s() {
        let (db, table, page) = tree();
        ensure_sufficient_lock_held(&page, 1, LockMode::S).unwrap();
        // table now holds IS; asking for S directly on table should
        // escalate (since IS alone doesn't substitute for S).
        ensure_sufficient_lock_held(&table, 1, LockMode::S).unwrap();
        assert!(table.get_explicit_lock_type(1).substitutes_for(LockMode::S));
        assert_eq!(db.get_explicit_lock_type(1), LockMode::IS);
    }

    #[test]
    fn noop_when_already_sufficient() {
        let (db, _table, page) = tree();
        ensure_sufficient_lock_held(&page, 1, LockMode::X).unwrap();
        // Requesting S again, now that X is held, must not mutate anything.
        ensure_sufficient_lock_held(&page, 1, LockMode::S).unwrap();
        assert_eq!(page.get_explicit_lock_type(1), LockMode::X);
        assert_eq!(db.get_explicit_lock_type(1), LockMode::IX);
    }
}
