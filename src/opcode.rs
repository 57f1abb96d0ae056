use crate::AmlError;

/// A decoded AML operation. Values do not map directly to encoding bytes:
/// two-byte opcodes behind the `0x5b` extension prefix are folded in, and a
/// handful of internal opcodes exist only to track in-flight operations.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Opcode {
    Zero,
    One,
    Alias,
    Name,
    BytePrefix,
    WordPrefix,
    DWordPrefix,
    StringPrefix,
    QWordPrefix,
    Scope,
    Buffer,
    Package,
    VarPackage,
    Method,
    External,
    DualNamePrefix,
    MultiNamePrefix,
    Digit(u8),
    NameChar(u8),
    Mutex,
    Event,
    CondRefOf,
    CreateField,
    LoadTable,
    Load,
    Stall,
    Sleep,
    Acquire,
    Signal,
    Wait,
    Reset,
    Release,
    FromBCD,
    ToBCD,
    Revision,
    Debug,
    Fatal,
    Timer,
    OpRegion,
    Field,
    Device,
    Processor,
    PowerRes,
    ThermalZone,
    IndexField,
    BankField,
    DataRegion,
    RootChar,
    ParentPrefixChar,
    Local(u8),
    Arg(u8),
    Store,
    RefOf,
    Add,
    Concat,
    Subtract,
    Increment,
    Decrement,
    Multiply,
    Divide,
    ShiftLeft,
    ShiftRight,
    And,
    Nand,
    Or,
    Nor,
    Xor,
    Not,
    FindSetLeftBit,
    FindSetRightBit,
    DerefOf,
    ConcatRes,
    Mod,
    Notify,
    SizeOf,
    Index,
    Match,
    CreateDWordField,
    CreateWordField,
    CreateByteField,
    CreateBitField,
    ObjectType,
    CreateQWordField,
    LAnd,
    LOr,
    LNot,
    LNotEqual,
    LLessEqual,
    LGreaterEqual,
    LEqual,
    LGreater,
    LLess,
    ToBuffer,
    ToDecimalString,
    ToHexString,
    ToInteger,
    ToString,
    CopyObject,
    Mid,
    Continue,
    If,
    Else,
    While,
    Noop,
    Return,
    Break,
    Breakpoint,
    Ones,

    /*
     * Internal opcodes are not produced from the bytecode, but are used to
     * track special in-flight ops.
     */
    InternalMethodCall,
    InternalNativeMethodCall,
}

impl Opcode {
    /// Decode a (possibly `0x5b`-extended) opcode value. The `0x92` negation
    /// fusion (`LNotEqual` etc.) needs lookahead and is handled by the
    /// stream cursor, not here.
    pub fn from_code(opcode: u16) -> Result<Opcode, AmlError> {
        Ok(match opcode {
            0x00 => Opcode::Zero,
            0x01 => Opcode::One,
            0x06 => Opcode::Alias,
            0x08 => Opcode::Name,
            0x0a => Opcode::BytePrefix,
            0x0b => Opcode::WordPrefix,
            0x0c => Opcode::DWordPrefix,
            0x0d => Opcode::StringPrefix,
            0x0e => Opcode::QWordPrefix,
            0x10 => Opcode::Scope,
            0x11 => Opcode::Buffer,
            0x12 => Opcode::Package,
            0x13 => Opcode::VarPackage,
            0x14 => Opcode::Method,
            0x15 => Opcode::External,
            0x2e => Opcode::DualNamePrefix,
            0x2f => Opcode::MultiNamePrefix,
            0x30..=0x39 => Opcode::Digit(opcode as u8),    // b'0'..=b'9'
            0x41..=0x5a => Opcode::NameChar(opcode as u8), // b'A'..=b'Z'
            0x5b01 => Opcode::Mutex,
            0x5b02 => Opcode::Event,
            0x5b12 => Opcode::CondRefOf,
            0x5b13 => Opcode::CreateField,
            0x5b1f => Opcode::LoadTable,
            0x5b20 => Opcode::Load,
            0x5b21 => Opcode::Stall,
            0x5b22 => Opcode::Sleep,
            0x5b23 => Opcode::Acquire,
            0x5b24 => Opcode::Signal,
            0x5b25 => Opcode::Wait,
            0x5b26 => Opcode::Reset,
            0x5b27 => Opcode::Release,
            0x5b28 => Opcode::FromBCD,
            0x5b29 => Opcode::ToBCD,
            0x5b30 => Opcode::Revision,
            0x5b31 => Opcode::Debug,
            0x5b32 => Opcode::Fatal,
            0x5b33 => Opcode::Timer,
            0x5b80 => Opcode::OpRegion,
            0x5b81 => Opcode::Field,
            0x5b82 => Opcode::Device,
            0x5b83 => Opcode::Processor,
            0x5b84 => Opcode::PowerRes,
            0x5b85 => Opcode::ThermalZone,
            0x5b86 => Opcode::IndexField,
            0x5b87 => Opcode::BankField,
            0x5b88 => Opcode::DataRegion,
            0x5c => Opcode::RootChar,
            0x5e => Opcode::ParentPrefixChar,
            0x5f => Opcode::NameChar(b'_'),
            0x60..=0x67 => Opcode::Local(opcode as u8 - 0x60),
            0x68..=0x6e => Opcode::Arg(opcode as u8 - 0x68),
            0x70 => Opcode::Store,
            0x71 => Opcode::RefOf,
            0x72 => Opcode::Add,
            0x73 => Opcode::Concat,
            0x74 => Opcode::Subtract,
            0x75 => Opcode::Increment,
            0x76 => Opcode::Decrement,
            0x77 => Opcode::Multiply,
            0x78 => Opcode::Divide,
            0x79 => Opcode::ShiftLeft,
            0x7a => Opcode::ShiftRight,
            0x7b => Opcode::And,
            0x7c => Opcode::Nand,
            0x7d => Opcode::Or,
            0x7e => Opcode::Nor,
            0x7f => Opcode::Xor,
            0x80 => Opcode::Not,
            0x81 => Opcode::FindSetLeftBit,
            0x82 => Opcode::FindSetRightBit,
            0x83 => Opcode::DerefOf,
            0x84 => Opcode::ConcatRes,
            0x85 => Opcode::Mod,
            0x86 => Opcode::Notify,
            0x87 => Opcode::SizeOf,
            0x88 => Opcode::Index,
            0x89 => Opcode::Match,
            0x8a => Opcode::CreateDWordField,
            0x8b => Opcode::CreateWordField,
            0x8c => Opcode::CreateByteField,
            0x8d => Opcode::CreateBitField,
            0x8e => Opcode::ObjectType,
            0x8f => Opcode::CreateQWordField,
            0x90 => Opcode::LAnd,
            0x91 => Opcode::LOr,
            0x92 => Opcode::LNot,
            0x93 => Opcode::LEqual,
            0x94 => Opcode::LGreater,
            0x95 => Opcode::LLess,
            0x96 => Opcode::ToBuffer,
            0x97 => Opcode::ToDecimalString,
            0x98 => Opcode::ToHexString,
            0x99 => Opcode::ToInteger,
            0x9c => Opcode::ToString,
            0x9d => Opcode::CopyObject,
            0x9e => Opcode::Mid,
            0x9f => Opcode::Continue,
            0xa0 => Opcode::If,
            0xa1 => Opcode::Else,
            0xa2 => Opcode::While,
            0xa3 => Opcode::Noop,
            0xa4 => Opcode::Return,
            0xa5 => Opcode::Break,
            0xcc => Opcode::Breakpoint,
            0xff => Opcode::Ones,

            _ => Err(AmlError::IllegalOpcode(opcode))?,
        })
    }
}

/// The kind of operand an operation expects in each position. The interpreter
/// consults this when it resolves a name operand: names in `Target` or
/// `SuperName` position must not invoke methods, and are wrapped with their
/// resolved path so stores and `CopyObject` can find the destination node.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum OperandKind {
    TermArg,
    SuperName,
    Target,
}

/// Operand schemas for operations that gather their operands through
/// in-flight records. Operations absent from this table take only `TermArg`s
/// (or handle their raw stream data themselves).
pub fn operand_schema(op: Opcode) -> Option<&'static [OperandKind]> {
    use OperandKind::*;

    Some(match op {
        Opcode::Store => &[TermArg, SuperName],
        Opcode::CopyObject => &[TermArg, SuperName],
        Opcode::RefOf => &[SuperName],
        Opcode::CondRefOf => &[SuperName, Target],
        Opcode::Increment | Opcode::Decrement => &[SuperName],
        Opcode::SizeOf => &[SuperName],
        Opcode::ObjectType => &[SuperName],
        Opcode::Notify => &[SuperName, TermArg],
        Opcode::Acquire => &[SuperName],
        Opcode::Release | Opcode::Signal | Opcode::Reset => &[SuperName],
        Opcode::Wait => &[SuperName, TermArg],
        Opcode::Load => &[SuperName, Target],

        Opcode::Add
        | Opcode::Subtract
        | Opcode::Multiply
        | Opcode::ShiftLeft
        | Opcode::ShiftRight
        | Opcode::Mod
        | Opcode::Nand
        | Opcode::And
        | Opcode::Or
        | Opcode::Nor
        | Opcode::Xor
        | Opcode::Concat
        | Opcode::ConcatRes => &[TermArg, TermArg, Target],
        Opcode::Divide => &[TermArg, TermArg, Target, Target],
        Opcode::Not
        | Opcode::FindSetLeftBit
        | Opcode::FindSetRightBit
        | Opcode::FromBCD
        | Opcode::ToBCD
        | Opcode::ToBuffer
        | Opcode::ToDecimalString
        | Opcode::ToHexString
        | Opcode::ToInteger => &[TermArg, Target],
        Opcode::ToString => &[TermArg, TermArg, Target],
        Opcode::Mid => &[TermArg, TermArg, TermArg, Target],
        Opcode::Index => &[TermArg, TermArg, Target],

        _ => return None,
    })
}

/// Whether a name operand arriving for `op` at `index` is a store-style
/// destination rather than a value.
pub(crate) fn is_name_target_position(op: Opcode, index: usize) -> bool {
    matches!(
        operand_schema(op).and_then(|schema| schema.get(index)),
        Some(OperandKind::SuperName | OperandKind::Target)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_opcodes_decode() {
        assert_eq!(Opcode::from_code(0x5b80), Ok(Opcode::OpRegion));
        assert_eq!(Opcode::from_code(0x5b23), Ok(Opcode::Acquire));
        assert_eq!(Opcode::from_code(0x70), Ok(Opcode::Store));
        assert_eq!(Opcode::from_code(0x16), Err(AmlError::IllegalOpcode(0x16)));
    }

    #[test]
    fn target_positions() {
        assert!(!is_name_target_position(Opcode::Store, 0));
        assert!(is_name_target_position(Opcode::Store, 1));
        assert!(is_name_target_position(Opcode::Add, 2));
        assert!(!is_name_target_position(Opcode::Add, 1));
        assert!(is_name_target_position(Opcode::Increment, 0));
        assert!(!is_name_target_position(Opcode::Package, 0));
    }
}
