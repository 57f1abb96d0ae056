use crate::{
    AmlError,
    Handler,
    Interpreter,
    Operation,
    namespace::AmlName,
    object::{
        self,
        FieldAccessType,
        FieldUnit,
        FieldUnitKind,
        FieldUpdateRule,
        Object,
        ObjectType,
        WrappedObject,
    },
    sync::TIMEOUT_FOREVER,
};
use alloc::{str::FromStr, sync::Arc, vec, vec::Vec};
use bit_field::BitField;
use log::trace;
use pci_types::PciAddress;

#[derive(Clone, Debug)]
pub struct OpRegion {
    pub space: RegionSpace,
    pub base: u64,
    pub length: u64,
    /// The scope the region was declared in; PCI config regions find their
    /// device's `_SEG`/`_BBN`/`_ADR` through it.
    pub parent_device_path: AmlName,
    /// Backing bytes for `DataTableRegion`s, which window a loaded table
    /// instead of an address space.
    pub table_data: Option<Arc<[u8]>>,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum RegionSpace {
    SystemMemory,
    SystemIO,
    PciConfig,
    EmbeddedControl,
    SmBus,
    SystemCmos,
    PciBarTarget,
    Ipmi,
    GeneralPurposeIo,
    GenericSerialBus,
    Pcc,
    Prm,
    FixedHardware,
    /// The pseudo-space used by `DataTableRegion`s. Not encodable in AML's
    /// region-space byte.
    DataTable,
    Oem(u8),
}

impl From<u8> for RegionSpace {
    fn from(value: u8) -> Self {
        match value {
            0 => RegionSpace::SystemMemory,
            1 => RegionSpace::SystemIO,
            2 => RegionSpace::PciConfig,
            3 => RegionSpace::EmbeddedControl,
            4 => RegionSpace::SmBus,
            5 => RegionSpace::SystemCmos,
            6 => RegionSpace::PciBarTarget,
            7 => RegionSpace::Ipmi,
            8 => RegionSpace::GeneralPurposeIo,
            9 => RegionSpace::GenericSerialBus,
            10 => RegionSpace::Pcc,
            11 => RegionSpace::Prm,
            0x7f => RegionSpace::FixedHardware,
            _ => RegionSpace::Oem(value),
        }
    }
}

impl RegionSpace {
    /// Spaces whose fields transfer a structured buffer rather than a
    /// scalar value.
    pub fn is_buffer_acc(&self) -> bool {
        matches!(self, RegionSpace::SmBus | RegionSpace::GenericSerialBus | RegionSpace::Ipmi)
    }
}

/// An address-space handler installed by the client for spaces the
/// interpreter has no builtin accessor for. One handler serves every region
/// of its space.
pub trait RegionHandler: Send + Sync {
    /// Called when a region of this handler's space becomes usable: either
    /// when the region is created with the handler already installed, or
    /// when the handler is installed over existing regions.
    fn attach(&self, region: &OpRegion) -> Result<(), AmlError> {
        let _ = region;
        Ok(())
    }

    /// Called when the handler is uninstalled, once per attached region.
    fn detach(&self, region: &OpRegion) -> Result<(), AmlError> {
        let _ = region;
        Ok(())
    }

    /// Scalar read of `width_bits` bits at byte `offset` within the region.
    fn read(&self, region: &OpRegion, offset: u64, width_bits: usize) -> Result<u64, AmlError>;

    /// Scalar write of `width_bits` bits at byte `offset` within the region.
    fn write(&self, region: &OpRegion, offset: u64, width_bits: usize, value: u64) -> Result<(), AmlError>;

    /// Bidirectional transfer for BufferAcc fields. `command` is the field's
    /// byte offset within the region (the protocol command for SMBus-like
    /// spaces), `access_attrib` the field's `AccessAs` attribute. The handler
    /// reads and/or fills `data` in place.
    fn transfer(
        &self,
        region: &OpRegion,
        command: u64,
        access_attrib: u8,
        data: &mut [u8],
    ) -> Result<(), AmlError> {
        let (_, _, _, _) = (region, command, access_attrib, data);
        Err(AmlError::NoRegionHandler(region.space))
    }
}

/// Size of the marshalling buffer for a BufferAcc transfer: a 2-byte
/// status/length prologue plus the protocol's data area.
pub(crate) fn buffer_acc_size(space: RegionSpace) -> usize {
    match space {
        // IPMI messages carry up to 64 bytes of data
        RegionSpace::Ipmi => 2 + 64,
        // SMBus and GenericSerialBus block transfers carry up to 32
        _ => 2 + 32,
    }
}

impl<H> Interpreter<H>
where
    H: Handler,
{
    /// Read from a field by performing one or more well-formed accesses to
    /// the underlying operation region, shifting and masking the result as
    /// appropriate. Returns either an `Integer` or a `Buffer`, guided by the
    /// size of the field and the revision's integer width.
    pub(crate) fn do_field_read(&self, field: &FieldUnit) -> Result<WrappedObject, AmlError> {
        self.field_read_inner(field, 0)
    }

    /// Write a value into a field. Values wider than the field are
    /// truncated; narrower values are zero-extended. Partially-covered
    /// native chunks honor the field's update rule.
    pub(crate) fn do_field_write(&self, field: &FieldUnit, value: &Object) -> Result<(), AmlError> {
        self.field_write_inner(field, value, 0)
    }

    fn field_read_inner(&self, field: &FieldUnit, depth: usize) -> Result<WrappedObject, AmlError> {
        if depth > object::MAX_REFERENCE_DEPTH {
            return Err(AmlError::ReferenceTooDeep);
        }

        trace!("AML field read. Field = {:?}", field);

        let locked = field.flags.lock_rule();
        if locked {
            self.global_lock.acquire(&self.handler, TIMEOUT_FOREVER);
        }
        let result = self.field_read_locked(field, depth);
        if locked {
            self.release_global_lock()?;
        }
        result
    }

    fn field_read_locked(&self, field: &FieldUnit, depth: usize) -> Result<WrappedObject, AmlError> {
        match field.kind {
            FieldUnitKind::Normal { ref region } => {
                let Object::OpRegion(ref region) = **region else {
                    return Err(AmlError::InvalidOperationOnObject {
                        op: Operation::FieldAccess,
                        typ: region.typ(),
                    });
                };

                if region.space.is_buffer_acc() || field.flags.access_type()? == FieldAccessType::Buffer {
                    return self.buffer_acc_transfer(region, field, None);
                }

                let access_width_bits = field.flags.access_type_bytes()? * 8;
                let needs_buffer = field.bit_length > self.integer_width_bytes() * 8;

                enum Output {
                    Integer([u8; 8]),
                    Buffer(Vec<u8>),
                }
                let mut output = if needs_buffer {
                    Output::Buffer(vec![0; field.bit_length.div_ceil(8)])
                } else {
                    Output::Integer([0; 8])
                };
                let output_bytes = match &mut output {
                    Output::Buffer(bytes) => bytes.as_mut_slice(),
                    Output::Integer(value) => value,
                };

                /*
                 * Break the field read into native reads that respect the
                 * field's access width, copying each potentially-unaligned
                 * part into the destination's bit range.
                 */
                let native_accesses_needed = (field.bit_length + (field.bit_index % access_width_bits))
                    .div_ceil(access_width_bits);
                let mut read_so_far = 0;
                for i in 0..native_accesses_needed {
                    let aligned_offset =
                        object::align_down(field.bit_index + i * access_width_bits, access_width_bits);
                    let raw = self.do_native_region_read(region, aligned_offset / 8, access_width_bits / 8)?;
                    let src_index = if i == 0 { field.bit_index % access_width_bits } else { 0 };
                    let remaining_length = field.bit_length - read_so_far;
                    let length = if i == 0 {
                        usize::min(remaining_length, access_width_bits - (field.bit_index % access_width_bits))
                    } else {
                        usize::min(remaining_length, access_width_bits)
                    };

                    object::copy_bits(&raw.to_le_bytes(), src_index, output_bytes, read_so_far, length);
                    read_so_far += length;
                }

                match output {
                    Output::Buffer(bytes) => Ok(Object::Buffer(bytes).wrap()),
                    Output::Integer(value) => Ok(Object::Integer(u64::from_le_bytes(value)).wrap()),
                }
            }
            FieldUnitKind::Bank { ref region, ref bank, bank_value } => {
                self.select_bank(bank, bank_value, depth)?;
                let normal = FieldUnit {
                    kind: FieldUnitKind::Normal { region: region.clone() },
                    flags: field.flags,
                    bit_index: field.bit_index,
                    bit_length: field.bit_length,
                    access_attrib: field.access_attrib,
                    connection: field.connection.clone(),
                };
                self.field_read_locked(&normal, depth + 1)
            }
            FieldUnitKind::Index { ref index, ref data } => {
                let (index_field, data_field) = index_pair(index, data)?;

                let access_width_bits = data_field.flags.access_type_bytes()? * 8;
                let needs_buffer = field.bit_length > self.integer_width_bytes() * 8;
                let mut output = vec![0; usize::max(field.bit_length.div_ceil(8), 8)];

                let native_accesses = (field.bit_length + (field.bit_index % access_width_bits))
                    .div_ceil(access_width_bits);
                let mut read_so_far = 0;
                for i in 0..native_accesses {
                    let aligned_offset =
                        object::align_down(field.bit_index + i * access_width_bits, access_width_bits);

                    // Select the chunk through the index field, then read the data field
                    self.field_write_inner(
                        index_field,
                        &Object::Integer((aligned_offset / 8) as u64),
                        depth + 1,
                    )?;
                    let raw = self.field_read_inner(data_field, depth + 1)?;
                    let raw = raw.to_integer(self.integer_width_bytes())?;

                    let src_index = if i == 0 { field.bit_index % access_width_bits } else { 0 };
                    let remaining_length = field.bit_length - read_so_far;
                    let length = if i == 0 {
                        usize::min(remaining_length, access_width_bits - (field.bit_index % access_width_bits))
                    } else {
                        usize::min(remaining_length, access_width_bits)
                    };
                    object::copy_bits(&raw.to_le_bytes(), src_index, &mut output, read_so_far, length);
                    read_so_far += length;
                }

                if needs_buffer {
                    output.truncate(field.bit_length.div_ceil(8));
                    Ok(Object::Buffer(output).wrap())
                } else {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&output[0..8]);
                    Ok(Object::Integer(u64::from_le_bytes(bytes)).wrap())
                }
            }
        }
    }

    fn field_write_inner(&self, field: &FieldUnit, value: &Object, depth: usize) -> Result<(), AmlError> {
        if depth > object::MAX_REFERENCE_DEPTH {
            return Err(AmlError::ReferenceTooDeep);
        }

        trace!("AML field write. Field = {:?}, value = {:?}", field, value);

        let locked = field.flags.lock_rule();
        if locked {
            self.global_lock.acquire(&self.handler, TIMEOUT_FOREVER);
        }
        let result = self.field_write_locked(field, value, depth);
        if locked {
            self.release_global_lock()?;
        }
        result
    }

    fn field_write_locked(&self, field: &FieldUnit, value: &Object, depth: usize) -> Result<(), AmlError> {
        let source_bytes = match value {
            Object::Integer(value) => value.to_le_bytes().to_vec(),
            Object::Buffer(bytes) => bytes.clone(),
            Object::String(string) => string.as_bytes().to_vec(),
            _ => value.to_integer(self.integer_width_bytes())?.to_le_bytes().to_vec(),
        };

        match field.kind {
            FieldUnitKind::Normal { ref region } => {
                let Object::OpRegion(ref region) = **region else {
                    return Err(AmlError::InvalidOperationOnObject {
                        op: Operation::FieldAccess,
                        typ: region.typ(),
                    });
                };

                if region.space.is_buffer_acc() || field.flags.access_type()? == FieldAccessType::Buffer {
                    return self.buffer_acc_transfer(region, field, Some(&source_bytes)).map(|_| ());
                }

                let access_width_bits = field.flags.access_type_bytes()? * 8;
                let native_accesses_needed = (field.bit_length + (field.bit_index % access_width_bits))
                    .div_ceil(access_width_bits);

                let mut written_so_far = 0;
                for i in 0..native_accesses_needed {
                    let aligned_offset =
                        object::align_down(field.bit_index + i * access_width_bits, access_width_bits);
                    let dst_index = if i == 0 { field.bit_index % access_width_bits } else { 0 };
                    let remaining_length = field.bit_length - written_so_far;
                    let length = if i == 0 {
                        usize::min(remaining_length, access_width_bits - dst_index)
                    } else {
                        usize::min(remaining_length, access_width_bits)
                    };

                    /*
                     * Chunks the field only partially covers are filled per
                     * the update rule. Fully-covered chunks skip the read.
                     */
                    let background = if dst_index == 0 && length == access_width_bits {
                        0
                    } else {
                        match field.flags.update_rule() {
                            FieldUpdateRule::Preserve => {
                                self.do_native_region_read(region, aligned_offset / 8, access_width_bits / 8)?
                            }
                            FieldUpdateRule::WriteAsOnes => u64::MAX,
                            FieldUpdateRule::WriteAsZeros => 0,
                        }
                    };

                    let mut chunk = background.to_le_bytes();
                    object::copy_bits(&source_bytes, written_so_far, &mut chunk, dst_index, length);
                    self.do_native_region_write(
                        region,
                        aligned_offset / 8,
                        access_width_bits / 8,
                        u64::from_le_bytes(chunk),
                    )?;

                    written_so_far += length;
                }

                Ok(())
            }
            FieldUnitKind::Bank { ref region, ref bank, bank_value } => {
                self.select_bank(bank, bank_value, depth)?;
                let normal = FieldUnit {
                    kind: FieldUnitKind::Normal { region: region.clone() },
                    flags: field.flags,
                    bit_index: field.bit_index,
                    bit_length: field.bit_length,
                    access_attrib: field.access_attrib,
                    connection: field.connection.clone(),
                };
                self.field_write_locked(&normal, value, depth + 1)
            }
            FieldUnitKind::Index { ref index, ref data } => {
                let (index_field, data_field) = index_pair(index, data)?;

                let access_width_bits = data_field.flags.access_type_bytes()? * 8;
                let native_accesses = (field.bit_length + (field.bit_index % access_width_bits))
                    .div_ceil(access_width_bits);

                let mut written_so_far = 0;
                for i in 0..native_accesses {
                    let aligned_offset =
                        object::align_down(field.bit_index + i * access_width_bits, access_width_bits);
                    let dst_index = if i == 0 { field.bit_index % access_width_bits } else { 0 };
                    let remaining_length = field.bit_length - written_so_far;
                    let length = if i == 0 {
                        usize::min(remaining_length, access_width_bits - dst_index)
                    } else {
                        usize::min(remaining_length, access_width_bits)
                    };

                    self.field_write_inner(
                        index_field,
                        &Object::Integer((aligned_offset / 8) as u64),
                        depth + 1,
                    )?;

                    let background = if dst_index == 0 && length == access_width_bits {
                        0
                    } else {
                        match field.flags.update_rule() {
                            FieldUpdateRule::Preserve => {
                                let read = self.field_read_inner(data_field, depth + 1)?;
                                read.to_integer(self.integer_width_bytes())?
                            }
                            FieldUpdateRule::WriteAsOnes => u64::MAX,
                            FieldUpdateRule::WriteAsZeros => 0,
                        }
                    };

                    let mut chunk = background.to_le_bytes();
                    object::copy_bits(&source_bytes, written_so_far, &mut chunk, dst_index, length);
                    self.field_write_inner(
                        data_field,
                        &Object::Integer(u64::from_le_bytes(chunk)),
                        depth + 1,
                    )?;

                    written_so_far += length;
                }

                Ok(())
            }
        }
    }

    fn select_bank(&self, bank: &WrappedObject, bank_value: u64, depth: usize) -> Result<(), AmlError> {
        let Object::FieldUnit(ref bank_field) = **bank else {
            return Err(AmlError::InvalidOperationOnObject { op: Operation::FieldAccess, typ: bank.typ() });
        };
        self.field_write_inner(bank_field, &Object::Integer(bank_value), depth + 1)
    }

    /// Marshal a BufferAcc access through the region's handler. For reads,
    /// `write_data` is `None` and the handler fills the transfer buffer; for
    /// writes the source bytes are copied in first. Returns the transfer
    /// buffer, which BufferAcc semantics also hand back to the writer.
    fn buffer_acc_transfer(
        &self,
        region: &OpRegion,
        field: &FieldUnit,
        write_data: Option<&[u8]>,
    ) -> Result<WrappedObject, AmlError> {
        let handlers = self.region_handlers.lock();
        let Some(handler) = handlers.get(&region.space) else {
            return Err(AmlError::NoRegionHandler(region.space));
        };

        let mut data = vec![0; buffer_acc_size(region.space)];
        if let Some(source) = write_data {
            let length = usize::min(source.len(), data.len());
            data[0..length].copy_from_slice(&source[0..length]);
        }

        let command = (field.bit_index / 8) as u64;
        handler.transfer(region, command, field.access_attrib, &mut data)?;
        Ok(Object::Buffer(data).wrap())
    }

    /// Performs an actual read from an operation region. `offset` and
    /// `length` must respect the access requirements of the field being
    /// read, and are supplied in **bytes**. This may evaluate AML methods
    /// (for PCI config regions) and may invoke client-installed handlers.
    pub(crate) fn do_native_region_read(
        &self,
        region: &OpRegion,
        offset: usize,
        length: usize,
    ) -> Result<u64, AmlError> {
        trace!("Native field read. Region = {:?}, offset = {:#x}, length = {:#x}", region, offset, length);

        if (offset + length) as u64 > region.length && region.space != RegionSpace::DataTable {
            // Tolerate firmware that sizes regions too small, but log it
            log::warn!(
                "AML read beyond region bounds: region = {:?}, offset = {:#x}, length = {:#x}",
                region,
                offset,
                length
            );
        }

        match region.space {
            RegionSpace::SystemMemory => Ok({
                let address = region.base as usize + offset;
                match length {
                    1 => self.handler.read_u8(address) as u64,
                    2 => self.handler.read_u16(address) as u64,
                    4 => self.handler.read_u32(address) as u64,
                    8 => self.handler.read_u64(address),
                    _ => return Err(AmlError::InvalidFieldFlags),
                }
            }),
            RegionSpace::SystemIO => Ok({
                let port = (region.base as usize + offset) as u16;
                match length {
                    1 => self.handler.read_io_u8(port) as u64,
                    2 => self.handler.read_io_u16(port) as u64,
                    4 => self.handler.read_io_u32(port) as u64,
                    _ => return Err(AmlError::InvalidFieldFlags),
                }
            }),
            RegionSpace::PciConfig => {
                let address = self.pci_address_for_region(region)?;
                let offset = (region.base as usize + offset) as u16;
                match length {
                    1 => Ok(self.handler.read_pci_u8(address, offset) as u64),
                    2 => Ok(self.handler.read_pci_u16(address, offset) as u64),
                    4 => Ok(self.handler.read_pci_u32(address, offset) as u64),
                    _ => Err(AmlError::InvalidFieldFlags),
                }
            }
            RegionSpace::DataTable => {
                let Some(ref data) = region.table_data else {
                    return Err(AmlError::InvalidOperationOnObject {
                        op: Operation::FieldAccess,
                        typ: ObjectType::OpRegion,
                    });
                };
                let mut bytes = [0u8; 8];
                for i in 0..length {
                    bytes[i] = *data.get(offset + i).unwrap_or(&0);
                }
                Ok(u64::from_le_bytes(bytes))
            }
            _ => {
                let handlers = self.region_handlers.lock();
                match handlers.get(&region.space) {
                    Some(handler) => handler.read(region, offset as u64, length * 8),
                    None => Err(AmlError::NoRegionHandler(region.space)),
                }
            }
        }
    }

    pub(crate) fn do_native_region_write(
        &self,
        region: &OpRegion,
        offset: usize,
        length: usize,
        value: u64,
    ) -> Result<(), AmlError> {
        trace!(
            "Native field write. Region = {:?}, offset = {:#x}, length = {:#x}, value = {:#x}",
            region,
            offset,
            length,
            value
        );

        match region.space {
            RegionSpace::SystemMemory => {
                let address = region.base as usize + offset;
                match length {
                    1 => self.handler.write_u8(address, value as u8),
                    2 => self.handler.write_u16(address, value as u16),
                    4 => self.handler.write_u32(address, value as u32),
                    8 => self.handler.write_u64(address, value),
                    _ => return Err(AmlError::InvalidFieldFlags),
                }
                Ok(())
            }
            RegionSpace::SystemIO => {
                let port = (region.base as usize + offset) as u16;
                match length {
                    1 => self.handler.write_io_u8(port, value as u8),
                    2 => self.handler.write_io_u16(port, value as u16),
                    4 => self.handler.write_io_u32(port, value as u32),
                    _ => return Err(AmlError::InvalidFieldFlags),
                }
                Ok(())
            }
            RegionSpace::PciConfig => {
                let address = self.pci_address_for_region(region)?;
                let offset = (region.base as usize + offset) as u16;
                match length {
                    1 => self.handler.write_pci_u8(address, offset, value as u8),
                    2 => self.handler.write_pci_u16(address, offset, value as u16),
                    4 => self.handler.write_pci_u32(address, offset, value as u32),
                    _ => return Err(AmlError::InvalidFieldFlags),
                }
                Ok(())
            }
            RegionSpace::DataTable => {
                // Loaded tables are read-only windows
                Err(AmlError::InvalidOperationOnObject { op: Operation::FieldAccess, typ: ObjectType::OpRegion })
            }
            _ => {
                let handlers = self.region_handlers.lock();
                match handlers.get(&region.space) {
                    Some(handler) => handler.write(region, offset as u64, length * 8, value),
                    None => Err(AmlError::NoRegionHandler(region.space)),
                }
            }
        }
    }

    /// Work out the PCI address a config region sits behind by evaluating
    /// `_SEG`, `_BBN`, and `_ADR` on the region's parent device. All of them
    /// are optional, with defaults lining up with legacy single-segment,
    /// single-root systems.
    fn pci_address_for_region(&self, region: &OpRegion) -> Result<PciAddress, AmlError> {
        let seg = match self.invoke_method_if_present(
            AmlName::from_str("_SEG").unwrap().resolve(&region.parent_device_path)?,
            vec![],
        )? {
            Some(value) => value.to_integer(self.integer_width_bytes())?,
            None => 0,
        };
        let bus = match self.invoke_method_if_present(
            AmlName::from_str("_BBN").unwrap().resolve(&region.parent_device_path)?,
            vec![],
        )? {
            Some(value) => value.to_integer(self.integer_width_bytes())?,
            None => 0,
        };
        let (device, function) = {
            let adr = self.invoke_method_if_present(
                AmlName::from_str("_ADR").unwrap().resolve(&region.parent_device_path)?,
                vec![],
            )?;
            let adr = match adr {
                Some(adr) => adr.to_integer(self.integer_width_bytes())?,
                None => 0,
            };
            (adr.get_bits(16..32), adr.get_bits(0..16))
        };

        Ok(PciAddress::new(seg as u16, bus as u8, device as u8, function as u8))
    }
}

fn index_pair<'a>(
    index: &'a WrappedObject,
    data: &'a WrappedObject,
) -> Result<(&'a FieldUnit, &'a FieldUnit), AmlError> {
    let Object::FieldUnit(ref index_field) = **index else {
        return Err(AmlError::InvalidOperationOnObject { op: Operation::FieldAccess, typ: index.typ() });
    };
    let Object::FieldUnit(ref data_field) = **data else {
        return Err(AmlError::InvalidOperationOnObject { op: Operation::FieldAccess, typ: data.typ() });
    };
    Ok((index_field, data_field))
}
