//! Named field tables for foreign structures the engine patches.
//!
//! Patches are expressed as "zero field X of structure Y at address A",
//! never as bare offsets at the call site. A layout change means editing
//! one table here.

/// One field of a foreign structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: u64,
    pub width: usize,
}

impl Field {
    pub const fn new(name: &'static str, offset: u64, width: usize) -> Self {
        Self { name, offset, width }
    }

    /// Address of this field inside a structure based at `base`.
    #[inline]
    pub const fn at(&self, base: u64) -> u64 {
        base.wrapping_add(self.offset)
    }
}

/// x64 `CONTEXT` (0x4D0 bytes).
pub mod context {
    use super::Field;

    pub const SIZE: usize = 0x4D0;

    pub const DR0: Field = Field::new("Dr0", 0x48, 8);
    pub const DR1: Field = Field::new("Dr1", 0x50, 8);
    pub const DR2: Field = Field::new("Dr2", 0x58, 8);
    pub const DR3: Field = Field::new("Dr3", 0x60, 8);
    pub const DR6: Field = Field::new("Dr6", 0x68, 8);
    pub const DR7: Field = Field::new("Dr7", 0x70, 8);

    pub const LAST_BRANCH_TO_RIP: Field = Field::new("LastBranchToRip", 0x4B0, 8);
    pub const LAST_BRANCH_FROM_RIP: Field = Field::new("LastBranchFromRip", 0x4B8, 8);
    pub const LAST_EXCEPTION_TO_RIP: Field = Field::new("LastExceptionToRip", 0x4C0, 8);
    pub const LAST_EXCEPTION_FROM_RIP: Field = Field::new("LastExceptionFromRip", 0x4C8, 8);

    pub const DEBUG_REGISTERS: [Field; 6] = [DR0, DR1, DR2, DR3, DR6, DR7];

    pub const BRANCH_TRACE: [Field; 4] = [
        LAST_BRANCH_TO_RIP,
        LAST_BRANCH_FROM_RIP,
        LAST_EXCEPTION_TO_RIP,
        LAST_EXCEPTION_FROM_RIP,
    ];
}

/// `WOW64_CONTEXT` (0x2CC bytes). Debug registers are 32-bit here.
pub mod wow64_context {
    use super::Field;

    pub const SIZE: usize = 0x2CC;

    pub const DR0: Field = Field::new("Dr0", 0x04, 4);
    pub const DR1: Field = Field::new("Dr1", 0x08, 4);
    pub const DR2: Field = Field::new("Dr2", 0x0C, 4);
    pub const DR3: Field = Field::new("Dr3", 0x10, 4);
    pub const DR6: Field = Field::new("Dr6", 0x14, 4);
    pub const DR7: Field = Field::new("Dr7", 0x18, 4);

    pub const DEBUG_REGISTERS: [Field; 6] = [DR0, DR1, DR2, DR3, DR6, DR7];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_disjoint(fields: &[Field], size: usize) {
        for (i, a) in fields.iter().enumerate() {
            assert!(a.offset as usize + a.width <= size, "{} past end", a.name);
            for b in &fields[i + 1..] {
                let a_end = a.offset + a.width as u64;
                let b_end = b.offset + b.width as u64;
                assert!(a_end <= b.offset || b_end <= a.offset, "{} overlaps {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn context_fields_fit_and_do_not_overlap() {
        let mut all = context::DEBUG_REGISTERS.to_vec();
        all.extend_from_slice(&context::BRANCH_TRACE);
        assert_disjoint(&all, context::SIZE);
    }

    #[test]
    fn wow64_fields_fit_and_do_not_overlap() {
        assert_disjoint(&wow64_context::DEBUG_REGISTERS, wow64_context::SIZE);
        // FloatSave starts right after Dr7.
        assert_eq!(wow64_context::DR7.offset + wow64_context::DR7.width as u64, 0x1C);
    }

    #[test]
    fn field_address() {
        assert_eq!(context::DR7.at(0x1000), 0x1070);
        assert_eq!(context::LAST_EXCEPTION_FROM_RIP.at(0), 0x4C8);
    }
}
