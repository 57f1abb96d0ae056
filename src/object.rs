use crate::{
    AmlError,
    Operation,
    namespace::AmlName,
    op_region::OpRegion,
    sync::{AmlEvent, AmlMutex},
};
use alloc::{borrow::Cow, format, string::String, sync::Arc, vec::Vec};
use bit_field::BitField;
use core::fmt;

/// Objects are handed around the interpreter, the namespace, and API clients as
/// `Arc`s. The strong count of the `Arc` is the object's refcount: owning
/// references (namespace nodes, package elements, local/arg slots, in-flight
/// operands) each hold one.
pub type WrappedObject = Arc<Object>;

/// Maximum depth of reference chains and nested packages the interpreter will
/// chase. Chains deeper than this are assumed to be adversarial.
pub const MAX_REFERENCE_DEPTH: usize = 32;

#[derive(Clone, Debug)]
pub enum Object {
    Uninitialized,
    Buffer(Vec<u8>),
    BufferField { buffer: WrappedObject, offset: usize, length: usize },
    Debug,
    Device,
    Event(Arc<AmlEvent>),
    FieldUnit(FieldUnit),
    Integer(u64),
    Method { code: Vec<u8>, flags: MethodFlags, serialize_mutex: Option<Arc<AmlMutex>> },
    NativeMethod(NativeMethod),
    Mutex { mutex: Arc<AmlMutex>, sync_level: u8 },
    OpRegion(OpRegion),
    Package(Vec<WrappedObject>),
    PowerResource { system_level: u8, resource_order: u16 },
    Processor { proc_id: u8, pblk_address: u32, pblk_length: u8 },
    Reference { kind: ReferenceKind, inner: WrappedObject },
    String(String),
    ThermalZone,
}

/// A namespace object backed by a Rust closure instead of AML bytecode. Used
/// for `\_OSI` and anything else the host wants to answer natively.
#[derive(Clone)]
pub struct NativeMethod {
    arg_count: usize,
    function: Arc<dyn Fn(&[WrappedObject]) -> Result<WrappedObject, AmlError> + Send + Sync>,
}

impl NativeMethod {
    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    pub fn invoke(&self, args: &[WrappedObject]) -> Result<WrappedObject, AmlError> {
        (self.function)(args)
    }
}

impl fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeMethod {{ arg_count: {} }}", self.arg_count)
    }
}

impl Object {
    pub fn wrap(self) -> WrappedObject {
        Arc::new(self)
    }

    pub fn native_method<F>(arg_count: usize, function: F) -> Object
    where
        F: Fn(&[WrappedObject]) -> Result<WrappedObject, AmlError> + Send + Sync + 'static,
    {
        Object::NativeMethod(NativeMethod { arg_count, function: Arc::new(function) })
    }

    /*
     * In-place mutation of shared objects. All callers must hold the
     * interpreter's store lock; aliasing writes are serialized by it, and
     * the namespace hands out objects only behind `Arc`s, so the object
     * cannot be freed underneath us.
     */
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn gain_mut(&self) -> &mut Self {
        #[allow(invalid_reference_casting)]
        unsafe {
            &mut *(self as *const Self as *mut Self)
        }
    }

    pub fn as_integer(&self) -> Result<u64, AmlError> {
        if let Object::Integer(value) = self {
            Ok(*value)
        } else {
            Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Integer, got: self.typ() })
        }
    }

    pub fn as_string(&self) -> Result<Cow<'_, str>, AmlError> {
        if let Object::String(value) = self {
            Ok(Cow::from(value))
        } else {
            Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::String, got: self.typ() })
        }
    }

    pub fn as_buffer(&self) -> Result<&[u8], AmlError> {
        if let Object::Buffer(bytes) = self {
            Ok(bytes)
        } else {
            Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Buffer, got: self.typ() })
        }
    }

    /// Implicit conversion to an integer, as applied when an operand needs an
    /// integer value. `allowed_bytes` is the integer width of the current
    /// table revision. Strings are parsed as hexadecimal with an optional
    /// `0x` prefix; buffers are read little-endian.
    pub fn to_integer(&self, allowed_bytes: usize) -> Result<u64, AmlError> {
        match self {
            Object::Integer(value) => Ok(*value),
            Object::Buffer(value) => {
                let length = usize::min(usize::min(value.len(), allowed_bytes), 8);
                let mut bytes = [0u8; 8];
                bytes[0..length].copy_from_slice(&value[0..length]);
                Ok(u64::from_le_bytes(bytes))
            }
            Object::String(value) => Ok(parse_integer_implicit(value)),
            _ => Err(AmlError::InvalidOperationOnObject { op: Operation::ConvertToInteger, typ: self.typ() }),
        }
    }

    /// Implicit conversion to a byte image, as applied when an operand needs
    /// buffer-like data. Integers produce `allowed_bytes` little-endian bytes.
    pub fn to_buffer(&self, allowed_bytes: usize) -> Result<Vec<u8>, AmlError> {
        match self {
            Object::Buffer(bytes) => Ok(bytes.clone()),
            Object::Integer(value) => match allowed_bytes {
                4 => Ok((*value as u32).to_le_bytes().to_vec()),
                8 => Ok(value.to_le_bytes().to_vec()),
                _ => Err(AmlError::InvalidArgument),
            },
            Object::String(value) => Ok(value.as_bytes().to_vec()),
            _ => Err(AmlError::InvalidOperationOnObject { op: Operation::ConvertToBuffer, typ: self.typ() }),
        }
    }

    pub fn read_buffer_field(&self, dst: &mut [u8]) -> Result<(), AmlError> {
        if let Self::BufferField { buffer, offset, length } = self {
            let buffer = match **buffer {
                Object::Buffer(ref buffer) => buffer.as_slice(),
                Object::String(ref string) => string.as_bytes(),
                _ => {
                    return Err(AmlError::InvalidOperationOnObject {
                        op: Operation::ReadBufferField,
                        typ: buffer.typ(),
                    });
                }
            };
            if offset + length > buffer.len() * 8 {
                return Err(AmlError::IndexOutOfBounds);
            }
            copy_bits(buffer, *offset, dst, 0, *length);
            Ok(())
        } else {
            Err(AmlError::InvalidOperationOnObject { op: Operation::ReadBufferField, typ: self.typ() })
        }
    }

    /// Write `value` into the bit range described by this buffer field. The
    /// caller must hold the store lock.
    pub fn write_buffer_field(&self, value: &[u8]) -> Result<(), AmlError> {
        if let Self::BufferField { buffer, offset, length } = self {
            let buffer = match buffer.gain_mut() {
                Object::Buffer(buffer) => buffer.as_mut_slice(),
                // AML is trusted to keep strings as valid UTF-8, like the NT
                // interpreter, which treats them as plain byte arrays.
                Object::String(string) => unsafe { string.as_bytes_mut() },
                _ => {
                    return Err(AmlError::InvalidOperationOnObject {
                        op: Operation::WriteBufferField,
                        typ: buffer.typ(),
                    });
                }
            };
            if offset + length > buffer.len() * 8 {
                return Err(AmlError::IndexOutOfBounds);
            }
            copy_bits(value, 0, buffer, *offset, *length);
            Ok(())
        } else {
            Err(AmlError::InvalidOperationOnObject { op: Operation::WriteBufferField, typ: self.typ() })
        }
    }

    /// Returns the `ObjectType` of this object, reporting the type of the
    /// final referent for references.
    pub fn typ(&self) -> ObjectType {
        match self {
            Object::Uninitialized => ObjectType::Uninitialized,
            Object::Buffer(_) => ObjectType::Buffer,
            Object::BufferField { .. } => ObjectType::BufferField,
            Object::Debug => ObjectType::Debug,
            Object::Device => ObjectType::Device,
            Object::Event(_) => ObjectType::Event,
            Object::FieldUnit(_) => ObjectType::FieldUnit,
            Object::Integer(_) => ObjectType::Integer,
            Object::Method { .. } => ObjectType::Method,
            Object::NativeMethod(_) => ObjectType::Method,
            Object::Mutex { .. } => ObjectType::Mutex,
            Object::OpRegion(_) => ObjectType::OpRegion,
            Object::Package(_) => ObjectType::Package,
            Object::PowerResource { .. } => ObjectType::PowerResource,
            Object::Processor { .. } => ObjectType::Processor,
            Object::Reference { inner, .. } => inner.typ(),
            Object::String(_) => ObjectType::String,
            Object::ThermalZone => ObjectType::ThermalZone,
        }
    }

    /// Chase a reference chain to its final non-reference target. Iterative,
    /// and capped to defeat bytecode that builds reference cycles through
    /// packages.
    pub fn unwrap_reference(self: WrappedObject) -> Result<WrappedObject, AmlError> {
        let mut object = self;
        for _ in 0..MAX_REFERENCE_DEPTH {
            if let Object::Reference { ref inner, .. } = *object {
                object = inner.clone();
            } else {
                return Ok(object);
            }
        }
        Err(AmlError::ReferenceTooDeep)
    }

    /// Unwraps 'transparent' references (local/arg slots and resolved-name
    /// wrappers), but keeps references deliberately created by AML via
    /// `RefOf`/`Index`.
    pub fn unwrap_transparent_reference(self: WrappedObject) -> WrappedObject {
        let mut object = self;
        for _ in 0..MAX_REFERENCE_DEPTH {
            let next = if let Object::Reference { ref kind, ref inner } = *object {
                match kind {
                    ReferenceKind::Local(_) | ReferenceKind::Arg(_) | ReferenceKind::NamedObject(_) => {
                        inner.clone()
                    }
                    ReferenceKind::RefOf | ReferenceKind::Index | ReferenceKind::Unresolved(_) => break,
                }
            } else {
                break;
            };
            object = next;
        }
        object
    }

    /// Deep copy with the variant-specific rules used by `CopyObject`:
    /// data types are cloned by value (packages recursively), references by
    /// target identity, and synchronization objects share their primitive.
    pub fn deep_clone(&self, depth: usize) -> Result<Object, AmlError> {
        if depth > MAX_REFERENCE_DEPTH {
            return Err(AmlError::ReferenceTooDeep);
        }
        Ok(match self {
            Object::Package(elements) => {
                let mut copied = Vec::with_capacity(elements.len());
                for element in elements {
                    copied.push(element.deep_clone(depth + 1)?.wrap());
                }
                Object::Package(copied)
            }
            other => other.clone(),
        })
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum ReferenceKind {
    /// Created by `RefOf` and by `Index` into a string or buffer.
    RefOf,
    /// Created by `Index` into a package; stores through this reference
    /// replace the package element rather than coercing into it.
    Index,
    /// A local slot appearing as an operand. Stores targeting this rebind
    /// the slot.
    Local(u8),
    /// An argument slot appearing as an operand.
    Arg(u8),
    /// A name resolved in target position; carries the resolved path so that
    /// stores can apply named-destination conversion rules and `CopyObject`
    /// can swap the node's object.
    NamedObject(AmlName),
    /// A name that did not resolve. Only permitted where forward references
    /// are legal (`CondRefOf`, package elements).
    Unresolved(AmlName),
}

#[derive(Clone, Debug)]
pub struct FieldUnit {
    pub kind: FieldUnitKind,
    pub flags: FieldFlags,
    pub bit_index: usize,
    pub bit_length: usize,
    /// Access attribute byte from an `AccessAs` entry; selects the protocol
    /// for BufferAcc spaces (e.g. the SMBus command).
    pub access_attrib: u8,
    /// Connection resource for GeneralPurposeIo / GenericSerialBus fields.
    pub connection: Option<WrappedObject>,
}

#[derive(Clone, Debug)]
pub enum FieldUnitKind {
    Normal { region: WrappedObject },
    Bank { region: WrappedObject, bank: WrappedObject, bank_value: u64 },
    Index { index: WrappedObject, data: WrappedObject },
}

#[derive(Clone, Copy, Debug)]
pub struct FieldFlags(pub u8);

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum FieldAccessType {
    Any,
    Byte,
    Word,
    DWord,
    QWord,
    Buffer,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum FieldUpdateRule {
    Preserve,
    WriteAsOnes,
    WriteAsZeros,
}

impl FieldFlags {
    pub fn access_type(&self) -> Result<FieldAccessType, AmlError> {
        match self.0.get_bits(0..4) {
            0 => Ok(FieldAccessType::Any),
            1 => Ok(FieldAccessType::Byte),
            2 => Ok(FieldAccessType::Word),
            3 => Ok(FieldAccessType::DWord),
            4 => Ok(FieldAccessType::QWord),
            5 => Ok(FieldAccessType::Buffer),
            _ => Err(AmlError::InvalidFieldFlags),
        }
    }

    pub fn access_type_bytes(&self) -> Result<usize, AmlError> {
        match self.access_type()? {
            FieldAccessType::Any => Ok(1),
            FieldAccessType::Byte | FieldAccessType::Buffer => Ok(1),
            FieldAccessType::Word => Ok(2),
            FieldAccessType::DWord => Ok(4),
            FieldAccessType::QWord => Ok(8),
        }
    }

    pub fn lock_rule(&self) -> bool {
        self.0.get_bit(4)
    }

    pub fn update_rule(&self) -> FieldUpdateRule {
        match self.0.get_bits(5..7) {
            0 => FieldUpdateRule::Preserve,
            1 => FieldUpdateRule::WriteAsOnes,
            2 => FieldUpdateRule::WriteAsZeros,
            _ => FieldUpdateRule::Preserve,
        }
    }

    /// Replace the access-type nibble, as an `AccessAs` entry in a field
    /// list does for the fields that follow it.
    pub fn with_access_type(&self, access_type: u8) -> FieldFlags {
        FieldFlags((self.0 & 0xf0) | (access_type & 0x0f))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MethodFlags(pub u8);

impl MethodFlags {
    pub fn arg_count(&self) -> usize {
        self.0.get_bits(0..3) as usize
    }

    pub fn serialize(&self) -> bool {
        self.0.get_bit(3)
    }

    pub fn sync_level(&self) -> u8 {
        self.0.get_bits(4..8)
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ObjectType {
    Uninitialized,
    Buffer,
    BufferField,
    Debug,
    Device,
    Event,
    FieldUnit,
    Integer,
    Method,
    Mutex,
    OpRegion,
    Package,
    PowerResource,
    Processor,
    Reference,
    String,
    ThermalZone,
}

impl ObjectType {
    /// The code the `ObjectType` operator hands back to AML.
    pub fn aml_type_code(&self) -> u64 {
        match self {
            ObjectType::Uninitialized => 0,
            ObjectType::Integer => 1,
            ObjectType::String => 2,
            ObjectType::Buffer => 3,
            ObjectType::Package => 4,
            ObjectType::FieldUnit => 5,
            ObjectType::Device => 6,
            ObjectType::Event => 7,
            ObjectType::Method => 8,
            ObjectType::Mutex => 9,
            ObjectType::OpRegion => 10,
            ObjectType::PowerResource => 11,
            ObjectType::Processor => 12,
            ObjectType::ThermalZone => 13,
            ObjectType::BufferField => 14,
            // 15 is reserved
            ObjectType::Debug => 16,
            ObjectType::Reference => 0,
        }
    }
}

/// Helper type for decoding the result of `_STA` objects.
#[derive(Debug)]
pub struct DeviceStatus(pub u64);

impl DeviceStatus {
    pub fn present(&self) -> bool {
        self.0.get_bit(0)
    }

    pub fn enabled(&self) -> bool {
        self.0.get_bit(1)
    }

    pub fn show_in_ui(&self) -> bool {
        self.0.get_bit(2)
    }

    pub fn functioning(&self) -> bool {
        self.0.get_bit(3)
    }

    /// This flag is only used for Battery devices (PNP0C0A), and indicates
    /// if the battery is present.
    pub fn battery_present(&self) -> bool {
        self.0.get_bit(4)
    }
}

/// Parse the hexadecimal prefix of a string, as the implicit String→Integer
/// conversion does. An optional `0x`/`0X` prefix is accepted; parsing stops
/// at the first non-hex character.
pub(crate) fn parse_integer_implicit(s: &str) -> u64 {
    let s = s.trim_start();
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);

    let mut value: u64 = 0;
    for c in digits.chars() {
        match c.to_digit(16) {
            Some(digit) => value = value.wrapping_shl(4) | digit as u64,
            None => break,
        }
    }
    value
}

/// Parse a string for the explicit `ToInteger` operator: decimal unless
/// prefixed with `0x`.
pub(crate) fn parse_integer_explicit(s: &str) -> u64 {
    let s = s.trim_start();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let mut value: u64 = 0;
        for c in hex.chars() {
            match c.to_digit(16) {
                Some(digit) => value = value.wrapping_shl(4) | digit as u64,
                None => break,
            }
        }
        value
    } else {
        let mut value: u64 = 0;
        for c in s.chars() {
            match c.to_digit(10) {
                Some(digit) => value = value.wrapping_mul(10).wrapping_add(digit as u64),
                None => break,
            }
        }
        value
    }
}

/// Format an integer the way `ToHexString` and hex-producing conversions do:
/// zero-padded uppercase, sized to the revision's integer width.
pub(crate) fn integer_to_hex_string(value: u64, int_bytes: usize) -> String {
    format!("{:0width$X}", value, width = int_bytes * 2)
}

pub(crate) fn integer_to_decimal_string(value: u64) -> String {
    format!("{}", value)
}

/// Copy an arbitrary bit range of `src` to an arbitrary bit range of `dst`.
/// This is used for buffer fields and field-unit marshalling. Data is
/// zero-extended if `src` does not cover `length` bits, matching the expected
/// behaviour for buffer fields.
pub(crate) fn copy_bits(
    src: &[u8],
    mut src_index: usize,
    dst: &mut [u8],
    mut dst_index: usize,
    mut length: usize,
) {
    while length > 0 {
        let src_shift = src_index & 7;
        let mut src_bits = src.get(src_index / 8).unwrap_or(&0x00) >> src_shift;
        if src_shift > 0 && length > (8 - src_shift) {
            src_bits |= src.get(src_index / 8 + 1).unwrap_or(&0x00) << (8 - src_shift);
        }

        if length < 8 {
            src_bits &= (1 << length) - 1;
        }

        let dst_shift = dst_index & 7;
        let mut dst_mask: u16 = if length < 8 { ((1 << length) - 1) as u16 } else { 0xff as u16 } << dst_shift;
        dst[dst_index / 8] =
            (dst[dst_index / 8] & !(dst_mask as u8)) | ((src_bits << dst_shift) & (dst_mask as u8));

        if dst_shift > 0 && length > (8 - dst_shift) {
            dst_mask >>= 8;
            dst[dst_index / 8 + 1] &= !(dst_mask as u8);
            dst[dst_index / 8 + 1] |= (src_bits >> (8 - dst_shift)) & (dst_mask as u8);
        }

        if length < 8 {
            length = 0;
        } else {
            length -= 8;
            src_index += 8;
            dst_index += 8;
        }
    }
}

#[inline]
pub(crate) fn align_down(value: usize, align: usize) -> usize {
    assert!(align == 0 || align.is_power_of_two());

    if align == 0 { value } else { value & !(align - 1) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_bits() {
        let src = [0b1011_1111, 0b1111_0111, 0b1111_1111, 0b1111_1111, 0b1111_1111];
        let mut dst = [0b1110_0001, 0, 0, 0, 0];

        copy_bits(&src, 0, &mut dst, 2, 15);
        assert_eq!(dst, [0b1111_1101, 0b1101_1110, 0b0000_0001, 0b0000_0000, 0b0000_0000]);
    }

    #[test]
    fn integer_parsing() {
        assert_eq!(parse_integer_implicit("BAD"), 0xbad);
        assert_eq!(parse_integer_implicit("0x10"), 0x10);
        assert_eq!(parse_integer_implicit("10"), 0x10);
        assert_eq!(parse_integer_implicit("FOO"), 0xf);
        assert_eq!(parse_integer_implicit(""), 0);

        assert_eq!(parse_integer_explicit("10"), 10);
        assert_eq!(parse_integer_explicit("0x10"), 0x10);
        assert_eq!(parse_integer_explicit("42abc"), 42);
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(integer_to_hex_string(0xdead, 8), "000000000000DEAD");
        assert_eq!(integer_to_hex_string(0xdead, 4), "0000DEAD");
        assert_eq!(integer_to_decimal_string(1234), "1234");
    }

    #[test]
    fn reference_unwrapping() {
        let inner = Object::Integer(42).wrap();
        let reference =
            Object::Reference { kind: ReferenceKind::RefOf, inner: inner.clone() }.wrap();
        let double = Object::Reference { kind: ReferenceKind::RefOf, inner: reference }.wrap();

        let unwrapped = double.unwrap_reference().unwrap();
        assert_eq!(unwrapped.as_integer().unwrap(), 42);

        let transparent =
            Object::Reference { kind: ReferenceKind::Local(3), inner: inner.clone() }.wrap();
        assert_eq!(transparent.unwrap_transparent_reference().as_integer().unwrap(), 42);
    }

    #[test]
    fn deep_clone_packages() {
        let package = Object::Package(alloc::vec![
            Object::Integer(1).wrap(),
            Object::Package(alloc::vec![Object::String(alloc::string::String::from("hi")).wrap()]).wrap(),
        ]);
        let cloned = package.deep_clone(0).unwrap();
        let Object::Package(ref elements) = cloned else { panic!() };
        let Object::Package(ref nested) = *elements[1] else { panic!() };
        assert_eq!(nested[0].as_string().unwrap(), "hi");
    }
}
