//! The 22 opcodes of the Architecture, represented as a tagged variant
//! with arity-aware decoding rather than scattered numeric literals.

/// Whether a decoded operand at a given position must be a store target
/// (register only) or may be any value (literal or register contents).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Store,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Halt,
    Set,
    Push,
    Pop,
    Eq,
    Gt,
    Jmp,
    Jt,
    Jf,
    Add,
    Mult,
    Mod,
    And,
    Or,
    Not,
    RMem,
    WMem,
    Call,
    Ret,
    Out,
    In,
    Noop,
}

impl Opcode {
    /// Decode the numeric opcode found at an instruction's first word.
    pub fn decode(word: u16) -> Option<Opcode> {
        use Opcode::*;
        Some(match word {
            0 => Halt,
            1 => Set,
            2 => Push,
            3 => Pop,
            4 => Eq,
            5 => Gt,
            6 => Jmp,
            7 => Jt,
            8 => Jf,
            9 => Add,
            10 => Mult,
            11 => Mod,
            12 => And,
            13 => Or,
            14 => Not,
            15 => RMem,
            16 => WMem,
            17 => Call,
            18 => Ret,
            19 => Out,
            20 => In,
            21 => Noop,
            _ => return None,
        })
    }

    /// Inverse of `decode`, for code that needs to write an opcode word
    /// back into memory (the Teleporter patch neutralises a call by
    /// overwriting it with `noop`).
    pub fn encode(&self) -> u16 {
        use Opcode::*;
        match self {
            Halt => 0,
            Set => 1,
            Push => 2,
            Pop => 3,
            Eq => 4,
            Gt => 5,
            Jmp => 6,
            Jt => 7,
            Jf => 8,
            Add => 9,
            Mult => 10,
            Mod => 11,
            And => 12,
            Or => 13,
            Not => 14,
            RMem => 15,
            WMem => 16,
            Call => 17,
            Ret => 18,
            Out => 19,
            In => 20,
            Noop => 21,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        use Opcode::*;
        match self {
            Halt => "halt",
            Set => "set",
            Push => "push",
            Pop => "pop",
            Eq => "eq",
            Gt => "gt",
            Jmp => "jmp",
            Jt => "jt",
            Jf => "jf",
            Add => "add",
            Mult => "mult",
            Mod => "mod",
            And => "and",
            Or => "or",
            Not => "not",
            RMem => "rmem",
            WMem => "wmem",
            Call => "call",
            Ret => "ret",
            Out => "out",
            In => "in",
            Noop => "noop",
        }
    }

    /// Operand roles in declaration order. Note `wmem` deviates from the
    /// usual "first operand is the store target" shape: `memory[a] <- b`
    /// treats *both* operands as values, the first used as an address
    /// rather than a register destination.
    pub fn operand_kinds(&self) -> &'static [OperandKind] {
        use OperandKind::*;
        use Opcode::*;
        match self {
            Halt | Ret | Noop => &[],
            Push | Jmp | Call | Out => &[Value],
            Pop | In => &[Store],
            Jt | Jf | WMem => &[Value, Value],
            Set | Not | RMem => &[Store, Value],
            Eq | Gt | Add | Mult | Mod | And | Or => &[Store, Value, Value],
        }
    }

    pub fn arity(&self) -> usize {
        self.operand_kinds().len()
    }

    /// Total instruction length in words (opcode word + operands).
    pub fn len(&self) -> u16 {
        1 + self.arity() as u16
    }
}
