//! Side-effect descriptors.
//!
//! Each instruction kind carries a summary of how it interacts with the
//! world outside its operands: whether it may read or write heap memory,
//! whether it may throw, and whether it captures interpreter state for
//! deoptimization. The load-store elimination driver consults these flags
//! to decide which heap facts survive an instruction.

use bitflags::bitflags;

bitflags! {
    /// What an instruction may do beyond producing its result value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SideEffects: u8 {
        /// May read heap memory (fields, array elements, statics).
        const DOES_READ = 0x01;
        /// May write heap memory.
        const DOES_WRITE = 0x02;
        /// May throw an exception.
        const MAY_THROW = 0x04;
        /// Captures an environment (interpreter state) for deoptimization.
        const NEEDS_ENV = 0x08;
    }
}

impl SideEffects {
    /// Descriptor for a call whose behavior is statically unknown.
    ///
    /// Unknown callees must be assumed to read and write anything, throw,
    /// and deoptimize.
    #[must_use]
    pub const fn all_effects() -> Self {
        Self::all()
    }

    /// Returns `true` if the instruction may read heap memory.
    #[must_use]
    pub const fn does_any_read(self) -> bool {
        self.contains(Self::DOES_READ)
    }

    /// Returns `true` if the instruction may write heap memory.
    #[must_use]
    pub const fn does_any_write(self) -> bool {
        self.contains(Self::DOES_WRITE)
    }

    /// Returns `true` if the instruction may throw.
    #[must_use]
    pub const fn may_throw(self) -> bool {
        self.contains(Self::MAY_THROW)
    }

    /// Returns `true` if the instruction captures an environment.
    #[must_use]
    pub const fn needs_environment(self) -> bool {
        self.contains(Self::NEEDS_ENV)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_call_effects() {
        let effects = SideEffects::all_effects();
        assert!(effects.does_any_read());
        assert!(effects.does_any_write());
        assert!(effects.may_throw());
        assert!(effects.needs_environment());
    }

    #[test]
    fn test_pure_effects() {
        let effects = SideEffects::empty();
        assert!(!effects.does_any_read());
        assert!(!effects.does_any_write());
    }
}
