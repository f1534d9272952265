//! x86_64 helpers: absolute jumps and prologue relocation.

use std::mem;
use std::slice;

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Code, Decoder, DecoderOptions, IcedError, Instruction,
    InstructionBlock,
};
use thiserror::Error;

/// Length in bytes of the encoding produced by [`jmp_abs`].
pub const JMP_ABS_LEN: usize = 14;

/// Longest possible x86 instruction.
pub const MAX_INSTR_LEN: usize = 15;

#[repr(C, packed)]
#[allow(dead_code)]
/// Struct helper for generating an absolute jump
struct JmpAbs {
    /// Absolute jmp instruction (`jmp [rip + 0]`)
    jmp: [u8; 6],
    /// Absolute address to jump to
    target: u64,
}

const _: () = assert!(mem::size_of::<JmpAbs>() == JMP_ABS_LEN);

/// Generates an absolute jump to the specified address and returns its bytecode
pub fn jmp_abs(target: usize) -> [u8; JMP_ABS_LEN] {
    unsafe {
        mem::transmute(JmpAbs {
            jmp: [0xff, 0x25, 0x00, 0x00, 0x00, 0x00],
            target: target as u64,
        })
    }
}

/// Errors while relocating a function prologue
#[derive(Debug, Error)]
pub enum RelocateError {
    /// The bytes at the target do not decode to valid instructions
    #[error("undecodable instruction at {0:#x}")]
    InvalidInstruction(u64),
    /// The re-encoded prologue does not fit the trampoline buffer
    #[error("relocated prologue does not fit the trampoline buffer ({needed} > {available})")]
    BufferTooSmall {
        /// Bytes the relocated code requires
        needed: usize,
        /// Bytes the buffer provides
        available: usize,
    },
    /// Error while re-encoding the displaced instructions
    #[error(transparent)]
    Encode(#[from] IcedError),
}

/// Decodes whole instructions at `target` until at least `min_len` bytes are
/// covered. Returns the instructions and the number of bytes they span.
///
/// # Safety
///
/// `target` must be valid for reads of `min_len + MAX_INSTR_LEN - 1` bytes
/// (enough to finish decoding an instruction whose first byte sits at
/// `min_len - 1`).
pub unsafe fn displaced_instructions(
    target: *const u8,
    min_len: usize,
) -> Result<(Vec<Instruction>, usize), RelocateError> {
    let window = slice::from_raw_parts(target, min_len + MAX_INSTR_LEN - 1);
    let mut decoder = Decoder::with_ip(64, window, target as u64, DecoderOptions::NONE);

    let mut instructions = Vec::new();
    let mut covered = 0usize;
    while covered < min_len {
        let instruction = decoder.decode();
        if instruction.code() == Code::INVALID {
            return Err(RelocateError::InvalidInstruction(instruction.ip()));
        }
        covered += instruction.len();
        instructions.push(instruction);
    }

    Ok((instructions, covered))
}

/// Re-encodes `instructions` for execution at `new_ip`, fixing RIP-relative
/// operands and branch displacements.
pub fn encode_at(instructions: &[Instruction], new_ip: u64) -> Result<Vec<u8>, RelocateError> {
    let block = InstructionBlock::new(instructions, new_ip);
    let result = BlockEncoder::encode(64, block, BlockEncoderOptions::NONE)?;
    Ok(result.code_buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jmp_abs_layout() {
        let code = jmp_abs(0x1122_3344_5566_7788);
        assert_eq!(&code[..6], &[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&code[6..], &0x1122_3344_5566_7788u64.to_le_bytes());
    }

    #[test]
    fn displaces_whole_instructions() {
        // 20 single-byte nops; covering 14 bytes takes exactly 14 of them
        let code = [0x90u8; 32];
        let (instructions, covered) =
            unsafe { displaced_instructions(code.as_ptr(), JMP_ABS_LEN).unwrap() };
        assert_eq!(covered, JMP_ABS_LEN);
        assert_eq!(instructions.len(), JMP_ABS_LEN);
    }

    #[test]
    fn expands_to_instruction_boundary() {
        // mov rax, imm64 is 10 bytes; two of them cover 14 bytes only at 20
        let mut code = Vec::new();
        code.extend_from_slice(&[0x48, 0xb8, 1, 0, 0, 0, 0, 0, 0, 0]);
        code.extend_from_slice(&[0x48, 0xb8, 2, 0, 0, 0, 0, 0, 0, 0]);
        code.extend_from_slice(&[0x90; 16]);
        let (instructions, covered) =
            unsafe { displaced_instructions(code.as_ptr(), JMP_ABS_LEN).unwrap() };
        assert_eq!(covered, 20);
        assert_eq!(instructions.len(), 2);
    }

    #[test]
    fn rejects_undecodable_prologue() {
        // 0x06 (push es) is invalid in 64-bit mode
        let code = [0x06u8; 32];
        let result = unsafe { displaced_instructions(code.as_ptr(), JMP_ABS_LEN) };
        assert!(matches!(result, Err(RelocateError::InvalidInstruction(_))));
    }

    #[test]
    fn reencodes_at_new_ip() {
        let code = [0x90u8; 32];
        let (instructions, _) =
            unsafe { displaced_instructions(code.as_ptr(), JMP_ABS_LEN).unwrap() };
        let encoded = encode_at(&instructions, 0x7000_0000).unwrap();
        assert_eq!(encoded, vec![0x90u8; JMP_ABS_LEN]);
    }
}
