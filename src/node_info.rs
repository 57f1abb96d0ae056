use crate::{
    AmlError,
    Handler,
    Interpreter,
    namespace::{AmlName, NameComponent},
    object::{DeviceStatus, Object, ObjectType, WrappedObject},
};
use alloc::{format, string::String, vec, vec::Vec};
use core::str::FromStr;

/// The identification and power-management info clients usually want about a
/// device node, gathered by evaluating the standard child objects.
#[derive(Debug)]
pub struct NodeInfo {
    pub typ: ObjectType,
    pub adr: Option<u64>,
    pub hid: Option<String>,
    pub cid: Vec<String>,
    pub uid: Option<String>,
    pub cls: Option<String>,
    pub status: Option<DeviceStatus>,
    /// Highest D-state supported in sleep states S1-S4 (`_S1D`..`_S4D`).
    pub sxd: [Option<u8>; 4],
    /// Deepest D-state the device can wake the system from in S0-S4
    /// (`_S0W`..`_S4W`).
    pub sxw: [Option<u8>; 5],
}

impl<H> Interpreter<H>
where
    H: Handler,
{
    /// Visit every named descendant of `path`, depth-first. The callback
    /// runs outside the namespace lock, so it may evaluate methods.
    pub fn for_each_child<F>(&self, path: &AmlName, mut f: F) -> Result<(), AmlError>
    where
        F: FnMut(&AmlName, &WrappedObject) -> Result<(), AmlError>,
    {
        let mut children: Vec<(AmlName, WrappedObject)> = Vec::new();
        {
            let namespace = self.namespace.lock();
            namespace.traverse(|level_name, level| {
                let on_spine = is_name_prefix(level_name, path);
                let in_subtree = is_name_prefix(path, level_name);
                if !on_spine && !in_subtree {
                    return Ok(false);
                }

                if in_subtree {
                    for (seg, (_, object)) in level.values.iter() {
                        let child = AmlName::from_name_seg(*seg).resolve(level_name)?;
                        if child != *path {
                            children.push((child, object.clone()));
                        }
                    }
                }
                Ok(true)
            })?;
        }

        for (name, object) in children {
            f(&name, &object)?;
        }
        Ok(())
    }

    /// Generate the canonical absolute path string for a name, e.g.
    /// `\_SB.PCI0._PRT`.
    pub fn generate_absolute_path(&self, name: &AmlName) -> Result<String, AmlError> {
        Ok(name.clone().normalize()?.as_string())
    }

    /// Collect identification info for a node by evaluating its standard
    /// children (`_ADR`, `_HID`, `_CID`, `_UID`, `_CLS`, `_STA`, `_SxD`,
    /// `_SxW`). Missing children simply leave their fields empty.
    pub fn get_node_info(&self, path: &AmlName) -> Result<NodeInfo, AmlError> {
        let object = self.namespace.lock().get(path.clone())?;
        let typ = object.typ();

        let adr = match self.evaluate_child(path, "_ADR")? {
            Some(value) => Some(value.to_integer(self.integer_width_bytes())?),
            None => None,
        };
        let hid = match self.evaluate_child(path, "_HID")? {
            Some(value) => Some(device_id_to_string(&value)?),
            None => None,
        };
        let cid = match self.evaluate_child(path, "_CID")? {
            Some(value) => match &*value {
                Object::Package(ids) => {
                    let mut decoded = Vec::with_capacity(ids.len());
                    for id in ids {
                        decoded.push(device_id_to_string(id)?);
                    }
                    decoded
                }
                _ => vec![device_id_to_string(&value)?],
            },
            None => Vec::new(),
        };
        let uid = match self.evaluate_child(path, "_UID")? {
            Some(value) => match &*value {
                Object::String(uid) => Some(uid.clone()),
                Object::Integer(uid) => Some(format!("{}", uid)),
                _ => None,
            },
            None => None,
        };
        let cls = match self.evaluate_child(path, "_CLS")? {
            Some(value) => match &*value {
                // A package of class, subclass, and programming interface
                Object::Package(elements) if elements.len() == 3 => {
                    let class = elements[0].to_integer(1)?;
                    let subclass = elements[1].to_integer(1)?;
                    let prog_if = elements[2].to_integer(1)?;
                    Some(format!("{:02X}{:02X}{:02X}", class, subclass, prog_if))
                }
                _ => None,
            },
            None => None,
        };
        let status = match self.evaluate_child(path, "_STA")? {
            Some(value) => Some(DeviceStatus(value.to_integer(self.integer_width_bytes())?)),
            None => None,
        };

        let mut sxd = [None; 4];
        for (i, slot) in sxd.iter_mut().enumerate() {
            let name = format!("_S{}D", i + 1);
            *slot = match self.evaluate_child(path, &name)? {
                Some(value) => Some(value.to_integer(1)? as u8),
                None => None,
            };
        }
        let mut sxw = [None; 5];
        for (i, slot) in sxw.iter_mut().enumerate() {
            let name = format!("_S{}W", i);
            *slot = match self.evaluate_child(path, &name)? {
                Some(value) => Some(value.to_integer(1)? as u8),
                None => None,
            };
        }

        Ok(NodeInfo { typ, adr, hid, cid, uid, cls, status, sxd, sxw })
    }

    fn evaluate_child(&self, path: &AmlName, child: &str) -> Result<Option<WrappedObject>, AmlError> {
        self.invoke_method_if_present(AmlName::from_str(child)?.resolve(path)?, Vec::new())
    }
}

/// `_HID`/`_CID` values are either strings or compressed EISA identifiers.
fn device_id_to_string(object: &Object) -> Result<String, AmlError> {
    match object {
        Object::String(id) => Ok(id.clone()),
        Object::Integer(id) => Ok(decode_eisa_id(*id as u32)),
        _ => Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::String, got: object.typ() }),
    }
}

/// Expand a compressed EISA ID (e.g. `0x0ad0cd41` → `"PNP0C0A"`): three
/// packed 5-bit characters followed by a 16-bit hex product number.
fn decode_eisa_id(id: u32) -> String {
    let id = id.swap_bytes();
    let c1 = (((id >> 26) & 0x1f) as u8 + 0x40) as char;
    let c2 = (((id >> 21) & 0x1f) as u8 + 0x40) as char;
    let c3 = (((id >> 16) & 0x1f) as u8 + 0x40) as char;
    format!("{}{}{}{:04X}", c1, c2, c3, id & 0xffff)
}

/// Whether `prefix` is a (non-strict) path prefix of `name`. Both must be
/// normalized absolute names.
fn is_name_prefix(prefix: &AmlName, name: &AmlName) -> bool {
    let prefix: &[NameComponent] = &prefix.0;
    let name: &[NameComponent] = &name.0;
    name.len() >= prefix.len() && &name[0..prefix.len()] == prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eisa_ids_decode() {
        assert_eq!(decode_eisa_id(0x0a0cd041), "PNP0C0A");
        assert_eq!(decode_eisa_id(0x030ad041), "PNP0A03");
    }

    #[test]
    fn name_prefixes() {
        let root = AmlName::root();
        let sb = AmlName::from_str("\\_SB").unwrap();
        let dev = AmlName::from_str("\\_SB.PCI0").unwrap();
        assert!(is_name_prefix(&root, &dev));
        assert!(is_name_prefix(&sb, &dev));
        assert!(is_name_prefix(&dev, &dev));
        assert!(!is_name_prefix(&dev, &sb));
    }
}
