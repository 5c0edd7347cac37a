//! The six-element lock mode lattice and its algebra.
//!
//! Grounded on the teacher's `transaction::types::LockMode` (compatibility
//! matrix, `Display`) but reworked as a closed multigranularity lattice: the
//! teacher's flat `LockMode` has no `NL` variant and folds `Update` in for
//! upgrade-deadlock avoidance, which this crate's spec does not use (deadlock
//! avoidance/detection is a non-goal; blocking is indefinite and FIFO).

use std::fmt;

/// A lock mode in the standard multigranularity lattice: no lock, the two
/// intent modes, shared, shared-with-intent-exclusive, and exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LockMode {
    /// No lock held.
    NL,
    /// Intent Shared: descendants will be locked S or weaker.
    IS,
    /// Intent Exclusive: descendants may be locked X.
    IX,
    /// Shared.
    S,
    /// Shared + Intent Exclusive.
    SIX,
    /// Exclusive.
    X,
}

impl LockMode {
    /// All modes, in increasing approximate strength order (used by tests
    /// and by [`LockMode::all`] consumers that want to enumerate the
    /// lattice).
    pub const ALL: [LockMode; 6] = [
        LockMode::NL,
        LockMode::IS,
        LockMode::IX,
        LockMode::S,
        LockMode::SIX,
        LockMode::X,
    ];

    /// Symmetric compatibility: can `self` and `other` be held simultaneously
    /// by two different transactions on the same resource? (§3)
    pub fn compatible(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (NL, _) | (_, NL) => true,
            (X, _) | (_, X) => false,
            (S, S) | (S, IS) | (IS, S) => true,
            (S, IX) | (IX, S) => false,
            (S, SIX) | (SIX, S) => false,
            (IS, IS) | (IS, IX) | (IX, IS) | (IS, SIX) | (SIX, IS) => true,
            (IX, IX) => true,
            (IX, SIX) | (SIX, IX) => false,
            (SIX, SIX) => false,
        }
    }

    /// Does holding `self` give at least every right that holding `other`
    /// would give? I.e. can `self` substitute for `other`.
    ///
    /// Note this is *not* symmetric and not simply "stronger in the
    /// compatibility lattice": SIX substitutes for S, IX, and IS, but S does
    /// not substitute for IX (S doesn't convey the intent-to-write-children
    /// that IX does), matching §3 exactly.
    pub fn substitutes_for(self, other: LockMode) -> bool {
        use LockMode::*;
        if other == NL {
            return true;
        }
        if self == other {
            return true;
        }
        matches!(
            (self, other),
            (X, S) | (X, IX) | (X, SIX) | (X, IS)
                | (SIX, S) | (SIX, IX) | (SIX, IS)
                | (S, IS)
                | (IX, IS)
        )
    }

    /// Parent legality: may a transaction hold `child` on a resource whose
    /// parent lock (held by the same transaction) is `self`? (§3: to hold
    /// `S`/`IS` as a child the parent must hold `IS` or `IX`; to hold
    /// `X`/`IX`/`SIX` as a child the parent must hold `IX` or `SIX`.)
    pub fn permits_child(self, child: LockMode) -> bool {
        use LockMode::*;
        if child == NL {
            return true;
        }
        match self {
            IS => matches!(child, IS | S),
            IX => true,
            SIX => matches!(child, IX | SIX | X),
            S | X | NL => false,
        }
    }

    /// True for the two intent-only modes, which never grant read/write
    /// rights on the resource they're held on (only on descendants).
    pub fn is_intent(self) -> bool {
        matches!(self, LockMode::IS | LockMode::IX)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockMode::NL => "NL",
            LockMode::IS => "IS",
            LockMode::IX => "IX",
            LockMode::S => "S",
            LockMode::SIX => "SIX",
            LockMode::X => "X",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LockMode::*;

    #[test]
    fn nl_compatible_with_everything() {
        for m in LockMode::ALL {
            assert!(NL.compatible(m));
            assert!(m.compatible(NL));
        }
    }

    #[test]
    fn x_compatible_with_nothing_else() {
        for m in LockMode::ALL {
            if m != NL {
                assert!(!X.compatible(m), "X should conflict with {m}");
            }
        }
    }

    #[test]
    fn is_is_compatible_with_almost_everything() {
        assert!(IS.compatible(IS));
        assert!(IS.compatible(IX));
        assert!(IS.compatible(S));
        assert!(IS.compatible(SIX));
        assert!(!IS.compatible(X));
    }

    #[test]
    fn ix_only_compatible_with_is_and_ix() {
        assert!(IX.compatible(IS));
        assert!(IX.compatible(IX));
        assert!(!IX.compatible(S));
        assert!(!IX.compatible(SIX));
        assert!(!IX.compatible(X));
    }

    #[test]
    fn six_only_compatible_with_is() {
        assert!(SIX.compatible(IS));
        assert!(!SIX.compatible(IX));
        assert!(!SIX.compatible(S));
        assert!(!SIX.compatible(SIX));
    }

    #[test]
    fn substitutability_matches_spec() {
        assert!(X.substitutes_for(S));
        assert!(X.substitutes_for(IX));
        assert!(X.substitutes_for(SIX));
        assert!(X.substitutes_for(IS));
        assert!(X.substitutes_for(NL));

        assert!(SIX.substitutes_for(S));
        assert!(SIX.substitutes_for(IX));
        assert!(SIX.substitutes_for(IS));
        assert!(SIX.substitutes_for(NL));

        assert!(S.substitutes_for(IS));
        assert!(S.substitutes_for(NL));
        assert!(!S.substitutes_for(IX), "S must not substitute for IX");

        assert!(IX.substitutes_for(IS));
        assert!(!IX.substitutes_for(S));

        assert!(IS.substitutes_for(NL));
        assert!(!IS.substitutes_for(S));

        assert!(NL.substitutes_for(NL));
        assert!(!NL.substitutes_for(IS));
    }

    #[test]
    fn parent_legality_matches_spec() {
        assert!(IS.permits_child(IS));
        assert!(IS.permits_child(S));
        assert!(!IS.permits_child(IX));
        assert!(!IS.permits_child(SIX));
        assert!(!IS.permits_child(X));

        assert!(IX.permits_child(IS));
        assert!(IX.permits_child(IX));
        assert!(IX.permits_child(S));
        assert!(IX.permits_child(SIX));
        assert!(IX.permits_child(X));

        assert!(!S.permits_child(IS));
        assert!(!S.permits_child(S));

        assert!(SIX.permits_child(IX));
        assert!(SIX.permits_child(SIX));
        assert!(SIX.permits_child(X));
        assert!(!SIX.permits_child(IS));
        assert!(!SIX.permits_child(S));

        assert!(!X.permits_child(IX));
        assert!(!X.permits_child(X));

        for m in LockMode::ALL {
            assert!(m.permits_child(NL));
        }
    }

    #[test]
    fn intent_modes() {
        assert!(IS.is_intent());
        assert!(IX.is_intent());
        assert!(!S.is_intent());
        assert!(!X.is_intent());
        assert!(!NL.is_intent());
        assert!(!SIX.is_intent());
    }
}
