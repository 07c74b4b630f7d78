/// Structural checks on raw code strings
///
/// A code string is a sequence of two-byte instructions, `(opcode, oparg)`.
/// `EXTENDED_ARG` prefixes widen the operand of the instruction that follows
/// them.
use std::fmt;

pub const STORE_FAST: u8 = 125;
pub const EXTENDED_ARG: u8 = 144;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BytecodeViolation {
    /// A local store addresses a slot the code object does not allocate
    LocalOutOfRange { offset: usize, index: u64, nlocals: i64 },
    /// The code string ends in the middle of an instruction
    TruncatedInstruction { offset: usize },
}

impl fmt::Display for BytecodeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytecodeViolation::LocalOutOfRange { index, nlocals, .. } => write!(
                f,
                "code stores to local {} but only allocates {}",
                index, nlocals
            ),
            BytecodeViolation::TruncatedInstruction { offset } => {
                write!(f, "code ends inside the instruction at offset {}", offset)
            }
        }
    }
}

/// Check that every `STORE_FAST` targets a slot below `nlocals`.
///
/// Returns the first violation found.
pub fn validate_local_stores(
    code: &[u8],
    nlocals: i64,
) -> std::result::Result<(), BytecodeViolation> {
    let mut extended: u64 = 0;
    for (n, pair) in code.chunks(2).enumerate() {
        let offset = n * 2;
        let &[opcode, oparg] = pair else {
            return Err(BytecodeViolation::TruncatedInstruction { offset });
        };
        let index = (extended << 8) | u64::from(oparg);
        if opcode == EXTENDED_ARG {
            extended = index;
            continue;
        }
        extended = 0;
        if opcode == STORE_FAST && (nlocals < 0 || index >= nlocals as u64) {
            return Err(BytecodeViolation::LocalOutOfRange {
                offset,
                index,
                nlocals,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stores_within_bounds_pass() {
        let code = [100, 0, STORE_FAST, 0, 100, 1, STORE_FAST, 1];
        assert_eq!(validate_local_stores(&code, 2), Ok(()));
        assert_eq!(validate_local_stores(&[], 0), Ok(()));
    }

    #[test]
    fn test_store_past_last_local_fails() {
        // `|\x00}` stores into slot 0 with no locals allocated
        let err = validate_local_stores(b"|\x00}\x00", 0).unwrap_err();
        assert_eq!(
            err,
            BytecodeViolation::LocalOutOfRange {
                offset: 2,
                index: 0,
                nlocals: 0
            }
        );
        assert_eq!(err.to_string(), "code stores to local 0 but only allocates 0");
    }

    #[test]
    fn test_index_equal_to_nlocals_is_out_of_range() {
        let code = [STORE_FAST, 3];
        assert!(validate_local_stores(&code, 3).is_err());
        assert!(validate_local_stores(&code, 4).is_ok());
    }

    #[test]
    fn test_extended_arg_widens_operand() {
        let code = [EXTENDED_ARG, 1, STORE_FAST, 0];
        let err = validate_local_stores(&code, 200).unwrap_err();
        assert!(matches!(err, BytecodeViolation::LocalOutOfRange { index: 256, .. }));
        assert!(validate_local_stores(&code, 257).is_ok());
    }

    #[test]
    fn test_other_opcodes_with_large_operands_are_ignored() {
        let code = [100, 250, 83, 0];
        assert!(validate_local_stores(&code, 0).is_ok());
    }

    #[test]
    fn test_truncated_instruction_fails() {
        let err = validate_local_stores(&[100, 0, STORE_FAST], 5).unwrap_err();
        assert_eq!(err, BytecodeViolation::TruncatedInstruction { offset: 2 });
    }
}
