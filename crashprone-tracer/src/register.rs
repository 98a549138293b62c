//! Full-width register identities
//!
//! The engine only reasons about architectural registers at full width: a
//! write to `eax` defines `rax`, a read of `xmm3` uses `ymm3`. Every
//! sub-register spelling the instrumentation layer may hand us is folded into
//! one [`Register`] variant on parsing, so the shadow table can be a plain
//! array indexed by register.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a register name is not part of the register model
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown register name: {0:?}")]
pub struct UnknownRegister(pub String);

/// Architectural x86-64 register, normalized to its widest form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[repr(u8)]
pub enum Register {
    Rax = 0,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Rflags,
    Ymm0,
    Ymm1,
    Ymm2,
    Ymm3,
    Ymm4,
    Ymm5,
    Ymm6,
    Ymm7,
    Ymm8,
    Ymm9,
    Ymm10,
    Ymm11,
    Ymm12,
    Ymm13,
    Ymm14,
    Ymm15,
}

impl Register {
    /// Number of registers in the model (size of a shadow table)
    pub const COUNT: usize = 34;

    /// Every register, in index order
    pub const ALL: [Register; Register::COUNT] = [
        Register::Rax,
        Register::Rbx,
        Register::Rcx,
        Register::Rdx,
        Register::Rsi,
        Register::Rdi,
        Register::Rbp,
        Register::Rsp,
        Register::R8,
        Register::R9,
        Register::R10,
        Register::R11,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
        Register::Rip,
        Register::Rflags,
        Register::Ymm0,
        Register::Ymm1,
        Register::Ymm2,
        Register::Ymm3,
        Register::Ymm4,
        Register::Ymm5,
        Register::Ymm6,
        Register::Ymm7,
        Register::Ymm8,
        Register::Ymm9,
        Register::Ymm10,
        Register::Ymm11,
        Register::Ymm12,
        Register::Ymm13,
        Register::Ymm14,
        Register::Ymm15,
    ];

    const GPR_EXTENDED: [Register; 8] = [
        Register::R8,
        Register::R9,
        Register::R10,
        Register::R11,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
    ];

    /// Position of this register in a shadow table
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name of the full-width register
    pub fn name(self) -> &'static str {
        match self {
            Register::Rax => "rax",
            Register::Rbx => "rbx",
            Register::Rcx => "rcx",
            Register::Rdx => "rdx",
            Register::Rsi => "rsi",
            Register::Rdi => "rdi",
            Register::Rbp => "rbp",
            Register::Rsp => "rsp",
            Register::R8 => "r8",
            Register::R9 => "r9",
            Register::R10 => "r10",
            Register::R11 => "r11",
            Register::R12 => "r12",
            Register::R13 => "r13",
            Register::R14 => "r14",
            Register::R15 => "r15",
            Register::Rip => "rip",
            Register::Rflags => "rflags",
            Register::Ymm0 => "ymm0",
            Register::Ymm1 => "ymm1",
            Register::Ymm2 => "ymm2",
            Register::Ymm3 => "ymm3",
            Register::Ymm4 => "ymm4",
            Register::Ymm5 => "ymm5",
            Register::Ymm6 => "ymm6",
            Register::Ymm7 => "ymm7",
            Register::Ymm8 => "ymm8",
            Register::Ymm9 => "ymm9",
            Register::Ymm10 => "ymm10",
            Register::Ymm11 => "ymm11",
            Register::Ymm12 => "ymm12",
            Register::Ymm13 => "ymm13",
            Register::Ymm14 => "ymm14",
            Register::Ymm15 => "ymm15",
        }
    }

    /// Vector register `n` (0-15)
    pub fn vector(n: u8) -> Option<Register> {
        if n < 16 {
            Some(Register::ALL[Register::Ymm0.index() + n as usize])
        } else {
            None
        }
    }

    /// Whether data flow through this register is tracked.
    ///
    /// Flags, the instruction pointer and the stack pointer change on nearly
    /// every instruction and never carry a value worth tracing.
    pub fn is_tracked(self) -> bool {
        !matches!(self, Register::Rsp | Register::Rip | Register::Rflags)
    }

    /// Stack or frame pointer; excluded when used as an addressing base
    pub fn is_stack_or_frame(self) -> bool {
        matches!(self, Register::Rsp | Register::Rbp)
    }

    fn parse_legacy(name: &str) -> Option<Register> {
        let reg = match name {
            "rax" | "eax" | "ax" | "al" | "ah" => Register::Rax,
            "rbx" | "ebx" | "bx" | "bl" | "bh" => Register::Rbx,
            "rcx" | "ecx" | "cx" | "cl" | "ch" => Register::Rcx,
            "rdx" | "edx" | "dx" | "dl" | "dh" => Register::Rdx,
            "rsi" | "esi" | "si" | "sil" => Register::Rsi,
            "rdi" | "edi" | "di" | "dil" => Register::Rdi,
            "rbp" | "ebp" | "bp" | "bpl" => Register::Rbp,
            "rsp" | "esp" | "sp" | "spl" => Register::Rsp,
            "rip" | "eip" | "ip" => Register::Rip,
            "rflags" | "eflags" | "flags" => Register::Rflags,
            _ => return None,
        };
        Some(reg)
    }

    // r8..r15 with optional d/w/b/l width suffix
    fn parse_extended(name: &str) -> Option<Register> {
        let rest = name.strip_prefix('r')?;
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (digits, suffix) = rest.split_at(digits_end);
        if !matches!(suffix, "" | "d" | "w" | "b" | "l") {
            return None;
        }
        let n: usize = digits.parse().ok()?;
        Register::GPR_EXTENDED.get(n.checked_sub(8)?).copied()
    }

    fn parse_vector(name: &str) -> Option<Register> {
        let digits = name
            .strip_prefix("xmm")
            .or_else(|| name.strip_prefix("ymm"))
            .or_else(|| name.strip_prefix("zmm"))?;
        let n: u8 = digits.parse().ok()?;
        Register::vector(n)
    }
}

impl FromStr for Register {
    type Err = UnknownRegister;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Register::parse_legacy(&name)
            .or_else(|| Register::parse_extended(&name))
            .or_else(|| Register::parse_vector(&name))
            .ok_or_else(|| UnknownRegister(s.to_string()))
    }
}

impl TryFrom<String> for Register {
    type Error = UnknownRegister;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Register> for String {
    fn from(reg: Register) -> Self {
        reg.name().to_string()
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-capacity list of registers, stored inline
///
/// Used for per-record read/write lists and per-instruction risk registers,
/// where the capacity is a small compile-time bound. Pushing past capacity
/// is a no-op that reports `false`.
#[derive(Clone, Copy)]
pub struct RegisterList<const N: usize> {
    regs: [Register; N],
    len: u8,
}

impl<const N: usize> RegisterList<N> {
    /// Create an empty list
    pub const fn new() -> Self {
        Self {
            regs: [Register::Rax; N],
            len: 0,
        }
    }

    /// Append a register; returns `false` when the list is full
    pub fn push(&mut self, reg: Register) -> bool {
        let len = self.len as usize;
        if len >= N {
            return false;
        }
        self.regs[len] = reg;
        self.len += 1;
        true
    }

    /// Append a register unless it is already present
    pub fn push_unique(&mut self, reg: Register) -> bool {
        !self.contains(reg) && self.push(reg)
    }

    pub fn contains(&self, reg: Register) -> bool {
        self.as_slice().contains(&reg)
    }

    pub fn as_slice(&self) -> &[Register] {
        &self.regs[..self.len as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = Register> + '_ {
        self.as_slice().iter().copied()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for RegisterList<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PartialEq for RegisterList<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<const N: usize> Eq for RegisterList<N> {}

impl<const N: usize> fmt::Debug for RegisterList<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_registers_fold_to_full_width() {
        for name in ["rax", "eax", "ax", "al", "ah", "EAX"] {
            assert_eq!(name.parse::<Register>().unwrap(), Register::Rax, "{}", name);
        }
        assert_eq!("r8d".parse::<Register>().unwrap(), Register::R8);
        assert_eq!("r15b".parse::<Register>().unwrap(), Register::R15);
        assert_eq!("r11w".parse::<Register>().unwrap(), Register::R11);
        assert_eq!("sil".parse::<Register>().unwrap(), Register::Rsi);
        assert_eq!("xmm3".parse::<Register>().unwrap(), Register::Ymm3);
        assert_eq!("zmm15".parse::<Register>().unwrap(), Register::Ymm15);
        assert_eq!("eflags".parse::<Register>().unwrap(), Register::Rflags);
    }

    #[test]
    fn test_unknown_names_rejected() {
        for name in ["r7", "r16", "r8q", "xmm16", "cr0", "", "rr8"] {
            assert!(name.parse::<Register>().is_err(), "{} should not parse", name);
        }
    }

    #[test]
    fn test_index_matches_all_table() {
        for (i, reg) in Register::ALL.iter().enumerate() {
            assert_eq!(reg.index(), i);
            assert_eq!(reg.name().parse::<Register>().unwrap(), *reg);
        }
    }

    #[test]
    fn test_tracking_rules() {
        assert!(Register::Rax.is_tracked());
        assert!(Register::Rbp.is_tracked());
        assert!(Register::Ymm0.is_tracked());
        assert!(!Register::Rsp.is_tracked());
        assert!(!Register::Rip.is_tracked());
        assert!(!Register::Rflags.is_tracked());
    }

    #[test]
    fn test_string_conversions_use_names() {
        assert_eq!(String::from(Register::R12), "r12");
        assert_eq!(Register::Ymm4.to_string(), "ymm4");
        let back = Register::try_from("r12d".to_string()).unwrap();
        assert_eq!(back, Register::R12);
    }

    #[test]
    fn test_register_list_bounds_and_uniqueness() {
        let mut list = RegisterList::<2>::new();
        assert!(list.push_unique(Register::Rax));
        assert!(!list.push_unique(Register::Rax));
        assert!(list.push(Register::Rbx));
        assert!(!list.push(Register::Rcx));
        assert_eq!(list.as_slice(), &[Register::Rax, Register::Rbx]);
    }
}
