use crate::AmlError;
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{str, sync::atomic::AtomicU32};
use log::{info, trace};
use spinning_top::Spinlock;

/// The size of the header common to every System Description Table.
pub const SDT_HEADER_LENGTH: usize = 36;

/// The header every System Description Table starts with. Parsed out of the
/// raw bytes rather than overlaid, so unaligned or short input cannot bite
/// us.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct SdtHeader {
    pub signature: [u8; 4],
    pub length: u32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32,
    pub creator_id: u32,
    pub creator_revision: u32,
}

impl SdtHeader {
    pub fn parse(bytes: &[u8]) -> Result<SdtHeader, AmlError> {
        if bytes.len() < SDT_HEADER_LENGTH {
            return Err(AmlError::InvalidTable);
        }

        Ok(SdtHeader {
            signature: bytes[0..4].try_into().unwrap(),
            length: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            revision: bytes[8],
            checksum: bytes[9],
            oem_id: bytes[10..16].try_into().unwrap(),
            oem_table_id: bytes[16..24].try_into().unwrap(),
            oem_revision: u32::from_le_bytes(bytes[24..28].try_into().unwrap()),
            creator_id: u32::from_le_bytes(bytes[28..32].try_into().unwrap()),
            creator_revision: u32::from_le_bytes(bytes[32..36].try_into().unwrap()),
        })
    }

    pub fn signature_str(&self) -> &str {
        str::from_utf8(&self.signature).unwrap_or("????")
    }
}

/// The Firmware ACPI Control Structure. The host maps it and hands the
/// mapping to `initialize_events`; the interpreter only touches the
/// global-lock dword, which the firmware concurrently updates, hence the
/// atomic.
#[repr(C)]
pub struct Facs {
    pub signature: [u8; 4],
    pub length: u32,
    pub hardware_signature: u32,
    pub firmware_waking_vector: u32,
    pub global_lock: AtomicU32,
    pub flags: u32,
    pub x_firmware_waking_vector: u64,
    pub version: u8,
    _reserved0: [u8; 3],
    pub ospm_flags: u32,
    _reserved1: [u8; 24],
}

impl Facs {
    /// A zeroed FACS, for hosts that synthesize one (and for tests).
    pub const fn new() -> Facs {
        Facs {
            signature: *b"FACS",
            length: 64,
            hardware_signature: 0,
            firmware_waking_vector: 0,
            global_lock: AtomicU32::new(0),
            flags: 0,
            x_firmware_waking_vector: 0,
            version: 2,
            _reserved0: [0; 3],
            ospm_flags: 0,
            _reserved1: [0; 24],
        }
    }
}

impl Default for Facs {
    fn default() -> Self {
        Facs::new()
    }
}

/// A stable reference to an installed table. Handles are never reused, so a
/// stale handle can dangle but never alias a different table.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TableHandle(pub(crate) u32);

/// What an installation handler decided about a table the host or AML is
/// trying to install.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum TableDisposition {
    Allow,
    Deny,
}

pub type TableInstallationHandler = dyn Fn(&SdtHeader) -> TableDisposition + Send + Sync;

struct TableSlot {
    handle: TableHandle,
    header: SdtHeader,
    data: Arc<[u8]>,
    refs: usize,
}

/// Keeps the tables the runtime knows about: those installed by the host
/// during early boot, and those installed dynamically by AML `Load`. Table
/// bytes are copied out of the host mapping at installation, so `ref`/`unref`
/// pin the copy rather than the mapping.
pub struct TableManager {
    tables: Spinlock<Vec<TableSlot>>,
    next_handle: AtomicU32,
    installation_handler: Spinlock<Option<Box<TableInstallationHandler>>>,
}

impl TableManager {
    pub fn new() -> TableManager {
        TableManager {
            tables: Spinlock::new(Vec::new()),
            next_handle: AtomicU32::new(0),
            installation_handler: Spinlock::new(None),
        }
    }

    /// Install a handler that can veto table installations. Only one may be
    /// installed at a time.
    pub fn set_installation_handler(
        &self,
        handler: Box<TableInstallationHandler>,
    ) -> Result<(), AmlError> {
        let mut slot = self.installation_handler.lock();
        if slot.is_some() {
            return Err(AmlError::AlreadyExists);
        }
        *slot = Some(handler);
        Ok(())
    }

    pub fn clear_installation_handler(&self) -> Result<(), AmlError> {
        let mut slot = self.installation_handler.lock();
        if slot.take().is_none() {
            return Err(AmlError::HandlerNotInstalled);
        }
        Ok(())
    }

    /// Install a table from memory. The bytes are validated against the
    /// header's length, offered to the installation handler, and copied.
    pub fn install(&self, bytes: &[u8]) -> Result<TableHandle, AmlError> {
        let header = SdtHeader::parse(bytes)?;
        if (header.length as usize) < SDT_HEADER_LENGTH || header.length as usize > bytes.len() {
            return Err(AmlError::InvalidTable);
        }

        if let Some(ref handler) = *self.installation_handler.lock() {
            if handler(&header) == TableDisposition::Deny {
                trace!("Table installation handler denied table {}", header.signature_str());
                return Err(AmlError::Denied);
            }
        }

        let data: Arc<[u8]> = Arc::from(&bytes[0..header.length as usize]);
        let handle = TableHandle(self.next_handle.fetch_add(1, core::sync::atomic::Ordering::Relaxed));

        info!(
            "Installed table {} (OEM {}), revision {}, {} bytes",
            header.signature_str(),
            str::from_utf8(&header.oem_table_id).unwrap_or("????????").trim_end(),
            header.revision,
            header.length
        );

        self.tables.lock().push(TableSlot { handle, header, data, refs: 0 });
        Ok(handle)
    }

    pub fn find_by_signature(&self, signature: [u8; 4]) -> Result<TableHandle, AmlError> {
        self.tables
            .lock()
            .iter()
            .find(|slot| slot.header.signature == signature)
            .map(|slot| slot.handle)
            .ok_or(AmlError::TableNotFound(signature))
    }

    /// Find the next table with the same signature as `handle`'s table, for
    /// walking duplicated signatures (multiple SSDTs).
    pub fn find_next_with_same_signature(&self, handle: TableHandle) -> Result<TableHandle, AmlError> {
        let tables = self.tables.lock();
        let position = tables
            .iter()
            .position(|slot| slot.handle == handle)
            .ok_or(AmlError::TableNotFound(*b"????"))?;
        let signature = tables[position].header.signature;

        tables[position + 1..]
            .iter()
            .find(|slot| slot.header.signature == signature)
            .map(|slot| slot.handle)
            .ok_or(AmlError::TableNotFound(signature))
    }

    /// Find a table by signature and, when non-empty, OEM id and OEM table
    /// id. This is the lookup `LoadTable` performs.
    pub fn find(
        &self,
        signature: [u8; 4],
        oem_id: &[u8],
        oem_table_id: &[u8],
    ) -> Result<TableHandle, AmlError> {
        self.tables
            .lock()
            .iter()
            .find(|slot| {
                slot.header.signature == signature
                    && (oem_id.is_empty() || slot.header.oem_id.starts_with(oem_id))
                    && (oem_table_id.is_empty() || slot.header.oem_table_id.starts_with(oem_table_id))
            })
            .map(|slot| slot.handle)
            .ok_or(AmlError::TableNotFound(signature))
    }

    pub fn header(&self, handle: TableHandle) -> Result<SdtHeader, AmlError> {
        self.tables
            .lock()
            .iter()
            .find(|slot| slot.handle == handle)
            .map(|slot| slot.header)
            .ok_or(AmlError::TableNotFound(*b"????"))
    }

    /// Get the table's bytes. The returned `Arc` keeps the data alive for as
    /// long as the caller holds it, independently of the ref count.
    pub fn data(&self, handle: TableHandle) -> Result<Arc<[u8]>, AmlError> {
        self.tables
            .lock()
            .iter()
            .find(|slot| slot.handle == handle)
            .map(|slot| slot.data.clone())
            .ok_or(AmlError::TableNotFound(*b"????"))
    }

    pub fn ref_table(&self, handle: TableHandle) -> Result<(), AmlError> {
        let mut tables = self.tables.lock();
        let slot = tables
            .iter_mut()
            .find(|slot| slot.handle == handle)
            .ok_or(AmlError::TableNotFound(*b"????"))?;
        slot.refs += 1;
        Ok(())
    }

    pub fn unref_table(&self, handle: TableHandle) -> Result<(), AmlError> {
        let mut tables = self.tables.lock();
        let slot = tables
            .iter_mut()
            .find(|slot| slot.handle == handle)
            .ok_or(AmlError::TableNotFound(*b"????"))?;
        if slot.refs == 0 {
            return Err(AmlError::InvalidArgument);
        }
        slot.refs -= 1;
        Ok(())
    }

    /// All handles with the given signature, in installation order. Used to
    /// load every SSDT during namespace initialization.
    pub fn handles_with_signature(&self, signature: [u8; 4]) -> Vec<TableHandle> {
        self.tables
            .lock()
            .iter()
            .filter(|slot| slot.header.signature == signature)
            .map(|slot| slot.handle)
            .collect()
    }
}

impl Default for TableManager {
    fn default() -> Self {
        TableManager::new()
    }
}

#[cfg(test)]
pub(crate) fn make_test_table(signature: &[u8; 4], aml: &[u8]) -> Vec<u8> {
    let length = (SDT_HEADER_LENGTH + aml.len()) as u32;
    let mut table = Vec::with_capacity(length as usize);
    table.extend_from_slice(signature);
    table.extend_from_slice(&length.to_le_bytes());
    table.push(2); // revision
    table.push(0); // checksum (validation is the host's job)
    table.extend_from_slice(b"OEMID ");
    table.extend_from_slice(b"OEMTBLID");
    table.extend_from_slice(&1u32.to_le_bytes());
    table.extend_from_slice(b"RUST");
    table.extend_from_slice(&1u32.to_le_bytes());
    table.extend_from_slice(aml);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_and_find() {
        let tables = TableManager::new();
        let ssdt1 = tables.install(&make_test_table(b"SSDT", &[0xa3])).unwrap();
        let ssdt2 = tables.install(&make_test_table(b"SSDT", &[0xa3, 0xa3])).unwrap();

        assert_eq!(tables.find_by_signature(*b"SSDT"), Ok(ssdt1));
        assert_eq!(tables.find_next_with_same_signature(ssdt1), Ok(ssdt2));
        assert_eq!(tables.find_next_with_same_signature(ssdt2), Err(AmlError::TableNotFound(*b"SSDT")));
        assert_eq!(tables.find_by_signature(*b"DSDT"), Err(AmlError::TableNotFound(*b"DSDT")));

        assert_eq!(tables.data(ssdt2).unwrap().len(), SDT_HEADER_LENGTH + 2);
        assert_eq!(tables.handles_with_signature(*b"SSDT"), alloc::vec![ssdt1, ssdt2]);
    }

    #[test]
    fn bad_tables_are_rejected() {
        let tables = TableManager::new();
        assert_eq!(tables.install(&[0; 12]), Err(AmlError::InvalidTable));

        // A header whose length exceeds the supplied bytes
        let mut table = make_test_table(b"SSDT", &[0xa3]);
        table[4..8].copy_from_slice(&1024u32.to_le_bytes());
        assert_eq!(tables.install(&table), Err(AmlError::InvalidTable));
    }

    #[test]
    fn installation_handler_can_deny() {
        let tables = TableManager::new();
        tables
            .set_installation_handler(alloc::boxed::Box::new(|header: &SdtHeader| {
                if &header.signature == b"BLCK" { TableDisposition::Deny } else { TableDisposition::Allow }
            }))
            .unwrap();

        assert_eq!(tables.install(&make_test_table(b"BLCK", &[0xa3])), Err(AmlError::Denied));
        assert!(tables.install(&make_test_table(b"SSDT", &[0xa3])).is_ok());

        tables.clear_installation_handler().unwrap();
        assert_eq!(tables.clear_installation_handler(), Err(AmlError::HandlerNotInstalled));
    }

    #[test]
    fn ref_counting() {
        let tables = TableManager::new();
        let handle = tables.install(&make_test_table(b"SSDT", &[0xa3])).unwrap();

        tables.ref_table(handle).unwrap();
        tables.ref_table(handle).unwrap();
        tables.unref_table(handle).unwrap();
        tables.unref_table(handle).unwrap();
        assert_eq!(tables.unref_table(handle), Err(AmlError::InvalidArgument));
    }
}
