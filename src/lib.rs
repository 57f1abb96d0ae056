//! An embeddable ACPI runtime core: the AML interpreter, the object system
//! and namespace it executes against, operation-region dispatch, and the
//! event subsystem (GPEs, fixed events, Notify).
//!
//! The interpreter is fully iterative - nested terms become explicit
//! in-flight operation records, and method calls and dynamic `Load`s push
//! heap-allocated frames - so host stack usage stays constant regardless of
//! how deeply firmware nests. All state is owned by an [`Interpreter`];
//! nothing is global. The host supplies hardware and OS services through the
//! [`Handler`] trait.

#![no_std]

extern crate alloc;

pub mod event;
pub mod namespace;
pub mod node_info;
pub mod object;
pub mod op_region;
pub mod opcode;
pub mod sync;
pub mod table;

pub use pci_types::PciAddress;

use alloc::{
    boxed::Box,
    collections::btree_map::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};
use bit_field::BitField;
use core::{
    mem,
    str::FromStr,
    sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
};
use event::Events;
use log::{info, trace, warn};
use namespace::{AmlName, Namespace, NamespaceLevelKind};
use object::{
    FieldFlags,
    FieldUnit,
    FieldUnitKind,
    MethodFlags,
    Object,
    ObjectType,
    ReferenceKind,
    WrappedObject,
};
use op_region::{OpRegion, RegionHandler, RegionSpace};
use opcode::Opcode;
use spinning_top::Spinlock;
use sync::{AmlEvent, AmlMutex, GlobalLock, TIMEOUT_FOREVER};
use table::{SDT_HEADER_LENGTH, TableHandle, TableInstallationHandler, TableManager};

/// The value returned by the `Revision` opcode.
const INTERPRETER_REVISION: u64 = 2;

/// Default wall-clock budget for a single AML `While` loop.
const DEFAULT_LOOP_TIMEOUT_MS: u64 = 3_000;

pub struct Interpreter<H>
where
    H: Handler,
{
    pub(crate) handler: H,
    pub namespace: Spinlock<Namespace>,
    pub tables: TableManager,
    dsdt_revision: AtomicU8,
    loop_timeout_ms: AtomicU64,
    namespace_loaded: AtomicBool,
    pub(crate) events: Events,
    pub(crate) region_handlers: Spinlock<BTreeMap<RegionSpace, Arc<dyn RegionHandler>>>,
    pub(crate) global_lock: GlobalLock,
    /// The mutex object installed as `\_GL`. Acquiring it from AML runs the
    /// firmware handshake instead of the plain mutex path; it is recognized
    /// by pointer identity.
    global_lock_mutex: Arc<AmlMutex>,
    osi_interfaces: Arc<Spinlock<Vec<String>>>,
    /// Serializes in-place mutation of shared objects (see
    /// `Object::gain_mut`). Never held across a region access or a
    /// suspension point.
    store_lock: Spinlock<()>,
}

impl<H> Interpreter<H>
where
    H: Handler,
{
    /// Create an interpreter executing against a fresh namespace.
    /// `dsdt_revision` selects integer semantics: tables with revision < 2
    /// compute with 32-bit integers. `initialize_namespace` re-reads the
    /// revision from the installed DSDT's header.
    pub fn new(handler: H, dsdt_revision: u8) -> Interpreter<H> {
        info!("Initializing AML interpreter v{}", env!("CARGO_PKG_VERSION"));

        let interpreter = Interpreter {
            handler,
            namespace: Spinlock::new(Namespace::new()),
            tables: TableManager::new(),
            dsdt_revision: AtomicU8::new(dsdt_revision),
            loop_timeout_ms: AtomicU64::new(DEFAULT_LOOP_TIMEOUT_MS),
            namespace_loaded: AtomicBool::new(false),
            events: Events::new(),
            region_handlers: Spinlock::new(BTreeMap::new()),
            global_lock: GlobalLock::new(),
            global_lock_mutex: Arc::new(AmlMutex::new()),
            osi_interfaces: Arc::new(Spinlock::new(default_osi_interfaces())),
            store_lock: Spinlock::new(()),
        };

        {
            let mut namespace = interpreter.namespace.lock();
            let interfaces = interpreter.osi_interfaces.clone();
            namespace
                .insert(
                    AmlName::from_str("\\_OSI").unwrap(),
                    Object::native_method(1, move |args| {
                        let feature = args.first().ok_or(AmlError::MethodArgCountIncorrect)?;
                        let Object::String(ref feature) = **feature else {
                            return Err(AmlError::ObjectNotOfExpectedType {
                                expected: ObjectType::String,
                                got: feature.typ(),
                            });
                        };

                        if feature.as_str() == "Linux" {
                            warn!("ACPI evaluated `_OSI(\"Linux\")`. This is a bug. Reporting no support.");
                        }
                        let supported = interfaces.lock().iter().any(|i| i == feature);
                        Ok(Object::Integer(if supported { u64::MAX } else { 0 }).wrap())
                    })
                    .wrap(),
                )
                .unwrap();
            namespace
                .insert(
                    AmlName::from_str("\\_GL").unwrap(),
                    Object::Mutex { mutex: interpreter.global_lock_mutex.clone(), sync_level: 0 }.wrap(),
                )
                .unwrap();
        }

        interpreter
    }

    /// Set the global maximum level of the `log` facade. Firmware can be
    /// extremely chatty at `Trace`.
    pub fn set_log_level(&self, level: log::LevelFilter) {
        log::set_max_level(level);
    }

    /// Set the wall-clock budget for AML `While` loops. A loop that exceeds
    /// it aborts its method with `AmlError::Timeout`.
    pub fn set_loop_timeout(&self, timeout_ms: u64) {
        self.loop_timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    /// Advertise an interface through `\_OSI`.
    pub fn install_interface(&self, name: &str) -> Result<(), AmlError> {
        let mut interfaces = self.osi_interfaces.lock();
        if interfaces.iter().any(|i| i.as_str() == name) {
            return Err(AmlError::AlreadyExists);
        }
        interfaces.push(name.to_string());
        Ok(())
    }

    pub fn uninstall_interface(&self, name: &str) -> Result<(), AmlError> {
        let mut interfaces = self.osi_interfaces.lock();
        match interfaces.iter().position(|i| i.as_str() == name) {
            Some(index) => {
                interfaces.remove(index);
                Ok(())
            }
            None => Err(AmlError::HandlerNotInstalled),
        }
    }

    /// Install a table from memory (see [`TableManager::install`]).
    pub fn install_table(&self, bytes: &[u8]) -> Result<TableHandle, AmlError> {
        self.tables.install(bytes)
    }

    /// Install a handler consulted before any table is installed, including
    /// tables AML loads dynamically.
    pub fn set_table_installation_handler(
        &self,
        handler: Box<TableInstallationHandler>,
    ) -> Result<(), AmlError> {
        self.tables.set_installation_handler(handler)
    }

    /// Load the installed DSDT and every installed SSDT, populating the
    /// namespace. Integer semantics follow the DSDT header's revision.
    pub fn initialize_namespace(&self) -> Result<(), AmlError> {
        let dsdt = self.tables.find_by_signature(*b"DSDT")?;
        self.dsdt_revision.store(self.tables.header(dsdt)?.revision, Ordering::Relaxed);
        self.load_installed_table(dsdt)?;

        for ssdt in self.tables.handles_with_signature(*b"SSDT") {
            // A bad SSDT should not stop the rest of the firmware loading
            if let Err(err) = self.load_installed_table(ssdt) {
                warn!("Failed to load SSDT: {:?}", err);
            }
        }

        Ok(())
    }

    /// Run the top-level AML of an installed table against the namespace.
    pub fn load_installed_table(&self, handle: TableHandle) -> Result<(), AmlError> {
        let data = self.tables.data(handle)?;
        let context = MethodContext::new_from_table_data(data, AmlName::root(), None)?;
        self.do_execute_method(context)?;
        self.namespace_loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Run a bare AML stream (no table header) against the namespace. This
    /// is the path table loading bottoms out in; the stream only needs to
    /// outlive the call.
    pub fn load_table(&self, stream: &[u8]) -> Result<(), AmlError> {
        let context = unsafe { MethodContext::new_from_table(stream) };
        self.do_execute_method(context)?;
        self.namespace_loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Invoke a method by its name, with the given set of arguments. If the
    /// referenced object is not a method, the object itself is returned -
    /// this is useful for objects that can either be defined directly, or
    /// through a method (e.g. a `_CRS` object).
    pub fn invoke_method(&self, path: AmlName, args: Vec<WrappedObject>) -> Result<WrappedObject, AmlError> {
        trace!("Invoking AML method: {}", path);

        let (resolved, object) = self.namespace.lock().search(&path, &AmlName::root())?;
        match *object {
            Object::Method { ref serialize_mutex, .. } => {
                if let Some(ref mutex) = serialize_mutex {
                    mutex.acquire(&self.handler, TIMEOUT_FOREVER);
                }
                let serialize_mutex = serialize_mutex.clone();
                self.namespace.lock().add_level(resolved.clone(), NamespaceLevelKind::MethodLocals)?;
                let context = MethodContext::new_from_method(object.clone(), args, resolved, serialize_mutex)?;
                self.do_execute_method(context)
            }
            Object::NativeMethod(ref native) => native.invoke(&args),
            _ => Ok(object),
        }
    }

    /// Like `invoke_method`, but a missing final path segment is reported as
    /// `Ok(None)` rather than an error.
    pub fn invoke_method_if_present(
        &self,
        path: AmlName,
        args: Vec<WrappedObject>,
    ) -> Result<Option<WrappedObject>, AmlError> {
        match self.invoke_method(path.clone(), args) {
            Ok(result) => Ok(Some(result)),
            Err(AmlError::ObjectDoesNotExist(not_present)) => {
                if path == not_present { Ok(None) } else { Err(AmlError::ObjectDoesNotExist(not_present)) }
            }
            Err(other) => Err(other),
        }
    }

    /// Invoke a method and check that the returned object has the expected
    /// type, for callers that cannot tolerate firmware surprises.
    pub fn invoke_method_typed(
        &self,
        path: AmlName,
        args: Vec<WrappedObject>,
        expected: ObjectType,
    ) -> Result<WrappedObject, AmlError> {
        let result = self.invoke_method(path, args)?;
        if result.typ() == expected {
            Ok(result)
        } else {
            Err(AmlError::ObjectNotOfExpectedType { expected, got: result.typ() })
        }
    }

    /// Install an address-space handler. Regions of that space that already
    /// exist are attached immediately; regions created later attach on
    /// creation.
    pub fn install_region_handler<RH>(&self, space: RegionSpace, handler: RH) -> Result<(), AmlError>
    where
        RH: RegionHandler + 'static,
    {
        let handler: Arc<dyn RegionHandler> = Arc::new(handler);
        {
            let mut handlers = self.region_handlers.lock();
            if handlers.contains_key(&space) {
                return Err(AmlError::AlreadyExists);
            }
            handlers.insert(space, handler.clone());
        }

        for region in self.regions_of_space(space)? {
            handler.attach(&region)?;
        }
        Ok(())
    }

    pub fn uninstall_region_handler(&self, space: RegionSpace) -> Result<(), AmlError> {
        let handler = {
            let mut handlers = self.region_handlers.lock();
            handlers.remove(&space).ok_or(AmlError::HandlerNotInstalled)?
        };

        for region in self.regions_of_space(space)? {
            handler.detach(&region)?;
        }
        Ok(())
    }

    fn regions_of_space(&self, space: RegionSpace) -> Result<Vec<OpRegion>, AmlError> {
        let mut regions = Vec::new();
        self.namespace.lock().traverse(|_, level| {
            for (_, (_, object)) in level.values.iter() {
                if let Object::OpRegion(ref region) = **object {
                    if region.space == space {
                        regions.push(region.clone());
                    }
                }
            }
            Ok(true)
        })?;
        Ok(regions)
    }

    /// Tear the runtime back down to its freshly-constructed state, dropping
    /// the loaded namespace and handler registries. Installed tables are
    /// kept; the host decides their lifetime.
    pub fn shutdown(&self) {
        *self.namespace.lock() = Namespace::new();
        self.region_handlers.lock().clear();
        self.namespace_loaded.store(false, Ordering::Release);
        info!("AML interpreter shut down");
    }

    pub(crate) fn require_namespace_loaded(&self) -> Result<(), AmlError> {
        if self.namespace_loaded.load(Ordering::Acquire) { Ok(()) } else { Err(AmlError::NotReady) }
    }

    pub(crate) fn integer_width_bytes(&self) -> usize {
        if self.dsdt_revision.load(Ordering::Relaxed) >= 2 { 8 } else { 4 }
    }

    fn integer_mask(&self) -> u64 {
        if self.dsdt_revision.load(Ordering::Relaxed) >= 2 { u64::MAX } else { u32::MAX as u64 }
    }

    fn do_execute_method(&self, context: MethodContext) -> Result<WrappedObject, AmlError> {
        let mut context = context;
        let mut context_stack: Vec<MethodContext> = Vec::new();

        let result = self.execution_loop(&mut context, &mut context_stack);

        if result.is_err() {
            /*
             * Evaluation failed: unwind every frame this evaluation owns,
             * dropping method-local namespace levels and releasing
             * serialization mutexes. Side effects already performed stay.
             */
            self.teardown_context(&context);
            while let Some(context) = context_stack.pop() {
                self.teardown_context(&context);
            }
        }

        result
    }

    fn teardown_context(&self, context: &MethodContext) {
        if let Some(ref mutex) = context.serialize_mutex {
            let _ = mutex.release(self.handler.current_thread_id());
        }

        let method_scope = core::iter::once(&context.current_block)
            .chain(context.block_stack.iter())
            .find_map(|block| match block.kind {
                BlockKind::Method { ref method_scope } => Some(method_scope.clone()),
                _ => None,
            });
        if let Some(scope) = method_scope {
            let _ = self.namespace.lock().remove_level(scope);
        }
    }
}

fn default_osi_interfaces() -> Vec<String> {
    [
        "Windows 2000",       // 2000
        "Windows 2001",       // XP
        "Windows 2001 SP1",   // XP SP1
        "Windows 2001 SP2",   // XP SP2
        "Windows 2001.1",     // Server 2003
        "Windows 2001.1 SP1", // Server 2003 SP1
        "Windows 2006",       // Vista
        "Windows 2006 SP1",   // Vista SP1
        "Windows 2006 SP2",   // Vista SP2
        "Windows 2006.1",     // Server 2008
        "Windows 2009",       // 7 and Server 2008 R2
        "Windows 2012",       // 8 and Server 2012
        "Windows 2013",       // 8.1 and Server 2012 R2
        "Windows 2015",       // 10
        "Windows 2016",       // 10 version 1607
        "Windows 2017",       // 10 version 1703
        "Windows 2017.2",     // 10 version 1709
        "Windows 2018",       // 10 version 1803
        "Windows 2018.2",     // 10 version 1809
        "Windows 2019",       // 10 version 1903
        "Windows 2020",       // 10 version 20H1
        "Windows 2021",       // 11
        "Windows 2022",       // 11 version 22H2
        "Extended Address Space Descriptor",
        "Module Device",
        "3.0 Thermal Model",
        "3.0 _SCP Extensions",
        "Processor Aggregator Device",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// `pkg_length` arithmetic on attacker-controlled streams must not wrap.
fn remaining_length(pkg_length: usize, consumed: usize) -> Result<usize, AmlError> {
    pkg_length.checked_sub(consumed).ok_or(AmlError::BadBytecode)
}

impl<H> Interpreter<H>
where
    H: Handler,
{
    /// The main loop that executes ops. Every op is handled at the top level
    /// to prevent pathological stack depths: the first stage retires
    /// in-flight operations that have gathered all their operands (which can
    /// cascade), and the second stage moves forward in the stream, either
    /// starting new in-flight operations or contributing operands to pending
    /// ones.
    fn execution_loop(
        &self,
        context: &mut MethodContext,
        context_stack: &mut Vec<MethodContext>,
    ) -> Result<WrappedObject, AmlError> {
        loop {
            /*
             * First, see if we've gathered enough arguments to complete some
             * in-flight operations.
             */
            while let Some(op) = context.in_flight.pop_if(|op| op.arguments.len() == op.expected_arguments) {
                match op.op {
                    Opcode::Add
                    | Opcode::Subtract
                    | Opcode::Multiply
                    | Opcode::Divide
                    | Opcode::ShiftLeft
                    | Opcode::ShiftRight
                    | Opcode::Mod
                    | Opcode::Nand
                    | Opcode::And
                    | Opcode::Or
                    | Opcode::Nor
                    | Opcode::Xor => self.do_binary_maths(context, op)?,
                    Opcode::Not | Opcode::FindSetLeftBit | Opcode::FindSetRightBit => {
                        self.do_unary_maths(context, op)?
                    }
                    Opcode::Increment | Opcode::Decrement => self.do_increment(context, op)?,
                    Opcode::LAnd
                    | Opcode::LOr
                    | Opcode::LNot
                    | Opcode::LNotEqual
                    | Opcode::LLessEqual
                    | Opcode::LGreaterEqual
                    | Opcode::LEqual
                    | Opcode::LGreater
                    | Opcode::LLess => self.do_logical_op(context, op)?,
                    Opcode::Mid => self.do_mid(context, op)?,
                    Opcode::Concat => self.do_concat(context, op)?,
                    Opcode::ConcatRes => {
                        let [Argument::Object(source1), Argument::Object(source2), target] = &op.arguments[..]
                        else {
                            return Err(AmlError::BadBytecode);
                        };
                        let source1 = source1.clone().unwrap_transparent_reference();
                        let source2 = source2.clone().unwrap_transparent_reference();
                        let result = {
                            let mut buffer = Vec::from(source1.as_buffer()?);
                            buffer.extend_from_slice(source2.as_buffer()?);
                            // Add a new end tag; a checksum byte of 0 asks for no validation
                            buffer.push(0x79);
                            buffer.push(0x00);
                            Object::Buffer(buffer).wrap()
                        };
                        let result = self.do_store(context, target, result)?;
                        context.contribute_arg(Argument::Object(result));
                    }
                    Opcode::FromBCD => self.do_from_bcd(context, op)?,
                    Opcode::ToBCD => self.do_to_bcd(context, op)?,
                    Opcode::ToBuffer
                    | Opcode::ToDecimalString
                    | Opcode::ToHexString
                    | Opcode::ToInteger
                    | Opcode::ToString => self.do_conversion(context, op)?,
                    Opcode::Name => {
                        let [Argument::Namestring(name), Argument::Object(object)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };

                        let name = name.resolve(&context.current_scope)?;
                        let object = object.clone().unwrap_transparent_reference();
                        self.namespace.lock().insert(name, object)?;
                    }
                    Opcode::Fatal => {
                        let [Argument::ByteData(typ), Argument::DWordData(code), Argument::Object(arg)] =
                            &op.arguments[..]
                        else {
                            return Err(AmlError::BadBytecode);
                        };
                        let arg =
                            arg.clone().unwrap_transparent_reference().to_integer(self.integer_width_bytes())?;
                        self.handler.handle_fatal_error(*typ, *code, arg);
                    }
                    Opcode::OpRegion => {
                        let [
                            Argument::Namestring(name),
                            Argument::ByteData(region_space),
                            Argument::Object(region_offset),
                            Argument::Object(region_length),
                        ] = &op.arguments[..]
                        else {
                            return Err(AmlError::BadBytecode);
                        };

                        let space = RegionSpace::from(*region_space);
                        let region = OpRegion {
                            space,
                            base: region_offset.clone().unwrap_transparent_reference().to_integer(8)?,
                            length: region_length.clone().unwrap_transparent_reference().to_integer(8)?,
                            parent_device_path: context.current_scope.clone(),
                            table_data: None,
                        };

                        if let Some(handler) = self.region_handlers.lock().get(&space) {
                            handler.attach(&region)?;
                        }
                        self.namespace
                            .lock()
                            .insert(name.resolve(&context.current_scope)?, Object::OpRegion(region).wrap())?;
                    }
                    Opcode::DataRegion => {
                        let [
                            Argument::Namestring(name),
                            Argument::Object(signature),
                            Argument::Object(oem_id),
                            Argument::Object(oem_table_id),
                        ] = &op.arguments[..]
                        else {
                            return Err(AmlError::BadBytecode);
                        };

                        let signature = signature.clone().unwrap_transparent_reference();
                        let signature = signature.as_string()?;
                        let mut sig_bytes = [b' '; 4];
                        for (i, b) in signature.bytes().take(4).enumerate() {
                            sig_bytes[i] = b;
                        }
                        let oem_id = oem_id.clone().unwrap_transparent_reference();
                        let oem_table_id = oem_table_id.clone().unwrap_transparent_reference();

                        let handle = self.tables.find(
                            sig_bytes,
                            oem_id.as_string()?.as_bytes(),
                            oem_table_id.as_string()?.as_bytes(),
                        )?;
                        let data = self.tables.data(handle)?;
                        let region = OpRegion {
                            space: RegionSpace::DataTable,
                            base: 0,
                            length: data.len() as u64,
                            parent_device_path: context.current_scope.clone(),
                            table_data: Some(data),
                        };
                        self.namespace
                            .lock()
                            .insert(name.resolve(&context.current_scope)?, Object::OpRegion(region).wrap())?;
                    }
                    Opcode::Buffer => {
                        let [
                            Argument::TrackedPc(start_pc),
                            Argument::PkgLength(pkg_length),
                            Argument::Object(buffer_size),
                        ] = &op.arguments[..]
                        else {
                            return Err(AmlError::BadBytecode);
                        };
                        let buffer_size = buffer_size
                            .clone()
                            .unwrap_transparent_reference()
                            .to_integer(self.integer_width_bytes())?;

                        let buffer_len = remaining_length(*pkg_length, context.current_block.pc - start_pc)?;
                        if context.current_block.pc + buffer_len > context.current_block.stream().len() {
                            return Err(AmlError::RunOutOfStream);
                        }

                        let mut buffer = vec![0; usize::max(buffer_size as usize, buffer_len)];
                        buffer[0..buffer_len].copy_from_slice(
                            &context.current_block.stream()
                                [context.current_block.pc..(context.current_block.pc + buffer_len)],
                        );
                        context.current_block.pc += buffer_len;

                        context.contribute_arg(Argument::Object(Object::Buffer(buffer).wrap()));
                    }
                    Opcode::VarPackage => {
                        let [
                            Argument::TrackedPc(start_pc),
                            Argument::PkgLength(pkg_length),
                            Argument::Object(num_elements),
                        ] = &op.arguments[..]
                        else {
                            return Err(AmlError::BadBytecode);
                        };
                        let num_elements =
                            num_elements.clone().unwrap_transparent_reference().to_integer(1)? as usize;

                        let remaining = remaining_length(*pkg_length, context.current_block.pc - start_pc)?;
                        context.start_in_flight_op(OpInFlight::new(Opcode::Package, num_elements));
                        context.start_new_block(BlockKind::Package, remaining)?;
                    }
                    Opcode::Package => {
                        let mut elements = Vec::with_capacity(op.expected_arguments);
                        for arg in &op.arguments {
                            let Argument::Object(object) = arg else {
                                return Err(AmlError::BadBytecode);
                            };
                            elements.push(object.clone().unwrap_transparent_reference());
                        }

                        /*
                         * We can end up completing a package's in-flight op in
                         * two circumstances: if the correct number of elements
                         * are supplied, we end up here first, and the block's
                         * finishing logic runs later; if fewer elements are
                         * supplied, the block finishes first, pads with
                         * `Uninitialized`s, and comes round again to here. To
                         * make these consistent, we always remove the block
                         * here, making sure we've finished it as a sanity
                         * check.
                         */
                        if context.current_block.kind != BlockKind::Package {
                            return Err(AmlError::BadBytecode);
                        }
                        let Some(block) = context.block_stack.pop() else {
                            return Err(AmlError::BadBytecode);
                        };
                        context.current_block = block;
                        context.contribute_arg(Argument::Object(Object::Package(elements).wrap()));
                    }
                    Opcode::If => {
                        let [
                            Argument::TrackedPc(start_pc),
                            Argument::PkgLength(then_length),
                            Argument::Object(predicate),
                        ] = &op.arguments[..]
                        else {
                            return Err(AmlError::BadBytecode);
                        };

                        let predicate = predicate
                            .clone()
                            .unwrap_transparent_reference()
                            .to_integer(self.integer_width_bytes())?;
                        let remaining_then_length =
                            remaining_length(*then_length, context.current_block.pc - start_pc)?;

                        if predicate > 0 {
                            context.start_new_block(BlockKind::IfThenBranch, remaining_then_length)?;
                        } else {
                            context.current_block.pc += remaining_then_length;
                            // Skip over the prolog to the else branch if present
                            const DEF_ELSE_OP: u8 = 0xa1;
                            match context.peek() {
                                Ok(DEF_ELSE_OP) => {
                                    context.next()?;
                                    let _else_length = context.pkglength()?;
                                }
                                Ok(_) | Err(AmlError::RunOutOfStream) => (),
                                Err(other) => return Err(other),
                            }
                        }
                    }
                    opcode @ Opcode::CreateBitField
                    | opcode @ Opcode::CreateByteField
                    | opcode @ Opcode::CreateWordField
                    | opcode @ Opcode::CreateDWordField
                    | opcode @ Opcode::CreateQWordField => {
                        let [Argument::Object(buffer), Argument::Object(index)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let buffer = buffer.clone().unwrap_transparent_reference();
                        let index = index
                            .clone()
                            .unwrap_transparent_reference()
                            .to_integer(self.integer_width_bytes())? as usize;
                        let name = context.namestring()?;
                        let (offset, length) = match opcode {
                            Opcode::CreateBitField => (index, 1),
                            Opcode::CreateByteField => (index * 8, 8),
                            Opcode::CreateWordField => (index * 8, 16),
                            Opcode::CreateDWordField => (index * 8, 32),
                            Opcode::CreateQWordField => (index * 8, 64),
                            _ => unreachable!(),
                        };
                        self.namespace.lock().insert(
                            name.resolve(&context.current_scope)?,
                            Object::BufferField { buffer, offset, length }.wrap(),
                        )?;
                    }
                    Opcode::CreateField => {
                        let [Argument::Object(buffer), Argument::Object(bit_index), Argument::Object(num_bits)] =
                            &op.arguments[..]
                        else {
                            return Err(AmlError::BadBytecode);
                        };
                        let buffer = buffer.clone().unwrap_transparent_reference();
                        let bit_index = bit_index
                            .clone()
                            .unwrap_transparent_reference()
                            .to_integer(self.integer_width_bytes())?;
                        let num_bits = num_bits
                            .clone()
                            .unwrap_transparent_reference()
                            .to_integer(self.integer_width_bytes())?;
                        let name = context.namestring()?;

                        self.namespace.lock().insert(
                            name.resolve(&context.current_scope)?,
                            Object::BufferField { buffer, offset: bit_index as usize, length: num_bits as usize }
                                .wrap(),
                        )?;
                    }
                    Opcode::Store => {
                        let [Argument::Object(object), target] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let result = self.do_store(context, target, object.clone())?;
                        context.contribute_arg(Argument::Object(result));
                    }
                    Opcode::CopyObject => self.do_copy_object(context, op)?,
                    Opcode::RefOf => {
                        let [Argument::Object(object)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let inner = match **object {
                            Object::Reference { kind: ReferenceKind::Unresolved(ref name), .. } => {
                                return Err(AmlError::UnresolvedReference(name.clone()));
                            }
                            Object::Reference {
                                kind: ReferenceKind::Local(_) | ReferenceKind::Arg(_) | ReferenceKind::NamedObject(_),
                                ref inner,
                            } => inner.clone(),
                            _ => object.clone(),
                        };
                        let reference = Object::Reference { kind: ReferenceKind::RefOf, inner }.wrap();
                        context.contribute_arg(Argument::Object(reference));
                    }
                    Opcode::CondRefOf => {
                        let [Argument::Object(object), target] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let result = if let Object::Reference { kind: ReferenceKind::Unresolved(_), .. } = **object
                        {
                            Object::Integer(0)
                        } else {
                            let inner = match **object {
                                Object::Reference {
                                    kind:
                                        ReferenceKind::Local(_)
                                        | ReferenceKind::Arg(_)
                                        | ReferenceKind::NamedObject(_),
                                    ref inner,
                                } => inner.clone(),
                                _ => object.clone(),
                            };
                            let reference = Object::Reference { kind: ReferenceKind::RefOf, inner }.wrap();
                            self.do_store(context, target, reference)?;
                            Object::Integer(u64::MAX)
                        };
                        context.contribute_arg(Argument::Object(result.wrap()));
                    }
                    Opcode::DerefOf => self.do_deref_of(context, op)?,
                    Opcode::SizeOf => self.do_size_of(context, op)?,
                    Opcode::Index => self.do_index(context, op)?,
                    Opcode::Match => self.do_match(context, op)?,
                    Opcode::ObjectType => {
                        let [Argument::Object(object)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        // `typ()` chases references, so `ObjectType` of a
                        // reference reports the final referent's type
                        let typ = object.typ().aml_type_code();
                        context.contribute_arg(Argument::Object(Object::Integer(typ).wrap()));
                    }
                    Opcode::Sleep => {
                        let [Argument::Object(msec)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let msec =
                            msec.clone().unwrap_transparent_reference().to_integer(self.integer_width_bytes())?;
                        self.handler.sleep(msec);
                    }
                    Opcode::Stall => {
                        let [Argument::Object(usec)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let usec =
                            usec.clone().unwrap_transparent_reference().to_integer(self.integer_width_bytes())?;
                        self.handler.stall(usec);
                    }
                    Opcode::Acquire => {
                        let [Argument::Object(mutex)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        // The timeout word trails the mutex operand in the stream
                        let timeout = context.next_u16()?;
                        let mutex = mutex.clone().unwrap_transparent_reference();
                        let Object::Mutex { ref mutex, .. } = *mutex else {
                            return Err(AmlError::InvalidOperationOnObject {
                                op: Operation::Acquire,
                                typ: mutex.typ(),
                            });
                        };

                        let acquired = if Arc::ptr_eq(mutex, &self.global_lock_mutex) {
                            self.global_lock.acquire(&self.handler, timeout)
                        } else {
                            mutex.acquire(&self.handler, timeout)
                        };
                        // `Acquire` returns true on *timeout*
                        let result = if acquired { 0 } else { u64::MAX };
                        context.contribute_arg(Argument::Object(Object::Integer(result).wrap()));
                    }
                    Opcode::Release => {
                        let [Argument::Object(mutex)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let mutex = mutex.clone().unwrap_transparent_reference();
                        let Object::Mutex { ref mutex, .. } = *mutex else {
                            return Err(AmlError::InvalidOperationOnObject {
                                op: Operation::Release,
                                typ: mutex.typ(),
                            });
                        };
                        if Arc::ptr_eq(mutex, &self.global_lock_mutex) {
                            self.release_global_lock()?;
                        } else {
                            mutex.release(self.handler.current_thread_id())?;
                        }
                    }
                    Opcode::Signal | Opcode::Reset => {
                        let [Argument::Object(event)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let event = event.clone().unwrap_transparent_reference();
                        let Object::Event(ref event) = *event else {
                            return Err(AmlError::InvalidOperationOnObject {
                                op: Operation::Signal,
                                typ: event.typ(),
                            });
                        };
                        match op.op {
                            Opcode::Signal => event.signal(),
                            Opcode::Reset => event.reset(),
                            _ => unreachable!(),
                        }
                    }
                    Opcode::Wait => {
                        let [Argument::Object(event), Argument::Object(timeout)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let timeout = timeout
                            .clone()
                            .unwrap_transparent_reference()
                            .to_integer(self.integer_width_bytes())?;
                        let event = event.clone().unwrap_transparent_reference();
                        let Object::Event(ref event) = *event else {
                            return Err(AmlError::InvalidOperationOnObject {
                                op: Operation::Wait,
                                typ: event.typ(),
                            });
                        };
                        let signalled = event.wait(&self.handler, timeout);
                        // Like `Acquire`, `Wait` returns true on timeout
                        let result = if signalled { 0 } else { u64::MAX };
                        context.contribute_arg(Argument::Object(Object::Integer(result).wrap()));
                    }
                    Opcode::Notify => {
                        let [Argument::Object(target), Argument::Object(value)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let value =
                            value.clone().unwrap_transparent_reference().to_integer(self.integer_width_bytes())?;
                        let Object::Reference { kind: ReferenceKind::NamedObject(ref path), .. } = **target else {
                            return Err(AmlError::InvalidOperationOnObject {
                                op: Operation::Notify,
                                typ: target.typ(),
                            });
                        };

                        trace!("AML Notify({}, {:#x})", path, value);
                        self.events.queue_notify(path.clone(), value);
                        self.handler.schedule_deferred_work();
                    }
                    Opcode::Load => self.do_load(context, context_stack, op)?,
                    Opcode::LoadTable => self.do_load_table(context, context_stack, op)?,
                    Opcode::InternalMethodCall => {
                        let [Argument::Object(method), Argument::Namestring(method_scope)] = &op.arguments[0..2]
                        else {
                            return Err(AmlError::BadBytecode);
                        };

                        let args: Vec<WrappedObject> = op.arguments[2..]
                            .iter()
                            .map(|arg| {
                                if let Argument::Object(arg) = arg {
                                    arg.clone().unwrap_transparent_reference()
                                } else {
                                    Object::Uninitialized.wrap()
                                }
                            })
                            .collect();

                        let serialize_mutex = match **method {
                            Object::Method { ref serialize_mutex, .. } => {
                                if let Some(ref mutex) = serialize_mutex {
                                    mutex.acquire(&self.handler, TIMEOUT_FOREVER);
                                }
                                serialize_mutex.clone()
                            }
                            _ => None,
                        };

                        self.namespace.lock().add_level(method_scope.clone(), NamespaceLevelKind::MethodLocals)?;

                        let new_context = MethodContext::new_from_method(
                            method.clone(),
                            args,
                            method_scope.clone(),
                            serialize_mutex,
                        )?;
                        let old_context = mem::replace(context, new_context);
                        context_stack.push(old_context);
                    }
                    Opcode::InternalNativeMethodCall => {
                        let [Argument::Object(method)] = &op.arguments[0..1] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let Object::NativeMethod(ref native) = **method else {
                            return Err(AmlError::BadBytecode);
                        };

                        let args: Vec<WrappedObject> = op.arguments[1..]
                            .iter()
                            .map(|arg| {
                                if let Argument::Object(arg) = arg {
                                    arg.clone().unwrap_transparent_reference()
                                } else {
                                    Object::Uninitialized.wrap()
                                }
                            })
                            .collect();
                        let result = native.invoke(&args)?;
                        context.contribute_arg(Argument::Object(result));
                    }
                    Opcode::Return => {
                        let [Argument::Object(object)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let object = object.clone().unwrap_transparent_reference();

                        if let Some(last) = context_stack.pop() {
                            let finished = mem::replace(context, last);
                            self.teardown_context(&finished);
                            context.contribute_arg(Argument::Object(object));
                        } else {
                            /*
                             * A `Return` from the top-most context - the
                             * result of the whole evaluation.
                             */
                            self.teardown_context(context);
                            return Ok(object);
                        }
                    }
                    Opcode::BankField => {
                        let [
                            Argument::TrackedPc(start_pc),
                            Argument::PkgLength(pkg_length),
                            Argument::Namestring(region_name),
                            Argument::Namestring(bank_name),
                            Argument::Object(bank_value),
                        ] = &op.arguments[..]
                        else {
                            return Err(AmlError::BadBytecode);
                        };
                        let bank_value = bank_value
                            .clone()
                            .unwrap_transparent_reference()
                            .to_integer(self.integer_width_bytes())?;
                        let field_flags = context.next()?;

                        let (region, bank) = {
                            let namespace = self.namespace.lock();
                            let (_, region) = namespace.search(region_name, &context.current_scope)?;
                            let (_, bank) = namespace.search(bank_name, &context.current_scope)?;
                            (region, bank)
                        };

                        let kind = FieldUnitKind::Bank { region, bank, bank_value };
                        self.parse_field_list(context, kind, *start_pc, *pkg_length, field_flags)?;
                    }
                    Opcode::While => {
                        /*
                         * We've just evaluated the predicate for an iteration
                         * of a while loop. If false, skip over the rest of the
                         * loop, otherwise carry on.
                         */
                        let [Argument::Object(predicate)] = &op.arguments[..] else {
                            return Err(AmlError::BadBytecode);
                        };
                        let predicate = predicate
                            .clone()
                            .unwrap_transparent_reference()
                            .to_integer(self.integer_width_bytes())?;

                        if predicate == 0 {
                            // Exit from the while loop by skipping out of the current block
                            let Some(block) = context.block_stack.pop() else {
                                return Err(AmlError::BadBytecode);
                            };
                            context.current_block = block;
                        }
                    }
                    _ => return Err(AmlError::BadBytecode),
                }
            }

            /*
             * Now that we've retired as many in-flight operations as we have
             * arguments for, move forward in the AML stream.
             */
            let opcode = match context.opcode() {
                Ok(opcode) => opcode,
                Err(AmlError::RunOutOfStream) => {
                    /*
                     * We've reached the end of the current block. What we
                     * should do about this depends on what type of block it
                     * was.
                     */
                    match context.current_block.kind.clone() {
                        BlockKind::Table => {
                            match context.on_table_complete.take() {
                                Some(completion) => {
                                    /*
                                     * This block was a table brought in by a
                                     * dynamic `Load`; surface its result into
                                     * the frame that performed the load.
                                     */
                                    let last = context_stack.pop().ok_or(AmlError::BadBytecode)?;
                                    let _finished = mem::replace(context, last);

                                    if let Some((param_path, param_value)) = completion.parameter {
                                        let (_, param_object) =
                                            self.namespace.lock().search(&param_path, &AmlName::root())?;
                                        self.store_with_implicit_cast(&param_object, param_value)?;
                                    }
                                    if let Some(ref target) = completion.target {
                                        self.do_store(context, target, Object::Integer(completion.handle).wrap())?;
                                    }
                                    if completion.contribute {
                                        context.contribute_arg(Argument::Object(
                                            Object::Integer(completion.handle).wrap(),
                                        ));
                                    }
                                    continue;
                                }
                                None => break Ok(Object::Uninitialized.wrap()),
                            }
                        }
                        BlockKind::Method { .. } => {
                            if let Some(prev_context) = context_stack.pop() {
                                let finished = mem::replace(context, prev_context);
                                self.teardown_context(&finished);
                                /*
                                 * The method fell off its end without an
                                 * explicit `Return`; its result is undefined.
                                 */
                                context.contribute_arg(Argument::Object(Object::Uninitialized.wrap()));
                                continue;
                            } else {
                                self.teardown_context(context);
                                return Ok(Object::Uninitialized.wrap());
                            }
                        }
                        BlockKind::Scope { old_scope } => {
                            let Some(block) = context.block_stack.pop() else {
                                return Err(AmlError::BadBytecode);
                            };
                            context.current_block = block;
                            context.current_scope = old_scope;
                            // Go round the loop again to get the next opcode for the new block
                            continue;
                        }
                        BlockKind::Package => {
                            /*
                             * We've reached the end of the package. The
                             * in-flight op may already have been completed if
                             * the package specified all of its elements; if
                             * not, fill in the rest with *distinct*
                             * uninitialized objects, and go round again to
                             * complete the in-flight op.
                             */
                            if context.block_stack.is_empty() {
                                return Err(AmlError::BadBytecode);
                            }

                            if let Some(package_op) = context.in_flight.last_mut() {
                                if package_op.op == Opcode::Package {
                                    let num_elements_left =
                                        package_op.expected_arguments - package_op.arguments.len();
                                    for _ in 0..num_elements_left {
                                        package_op
                                            .arguments
                                            .push(Argument::Object(Object::Uninitialized.wrap()));
                                    }
                                }
                            }

                            // Don't remove the package's block; see the completion of package ops
                            continue;
                        }
                        BlockKind::IfThenBranch => {
                            let Some(block) = context.block_stack.pop() else {
                                return Err(AmlError::BadBytecode);
                            };
                            context.current_block = block;

                            // Check for an else-branch, and skip over it
                            const DEF_ELSE_OP: u8 = 0xa1;
                            match context.peek() {
                                Ok(DEF_ELSE_OP) => {
                                    context.next()?;
                                    let start_pc = context.current_block.pc;
                                    let else_length = context.pkglength()?;
                                    context.current_block.pc +=
                                        remaining_length(else_length, context.current_block.pc - start_pc)?;
                                }
                                Ok(_) | Err(AmlError::RunOutOfStream) => (),
                                Err(other) => return Err(other),
                            }

                            continue;
                        }
                        BlockKind::While { start_pc, deadline } => {
                            if self.handler.nanos_since_boot() >= deadline {
                                return Err(AmlError::Timeout);
                            }
                            /*
                             * Go round again, and create a new in-flight op to
                             * evaluate the predicate.
                             */
                            context.current_block.pc = start_pc;
                            context.start_in_flight_op(OpInFlight::new(Opcode::While, 1));
                            continue;
                        }
                    }
                }
                Err(other_err) => return Err(other_err),
            };

            match opcode {
                Opcode::Zero => {
                    context.contribute_arg(Argument::Object(Object::Integer(0).wrap()));
                }
                Opcode::One => {
                    context.contribute_arg(Argument::Object(Object::Integer(1).wrap()));
                }
                Opcode::Ones => {
                    context.contribute_arg(Argument::Object(Object::Integer(self.integer_mask()).wrap()));
                }
                Opcode::Alias => {
                    let source = context.namestring()?;
                    let alias = context.namestring()?;

                    let mut namespace = self.namespace.lock();
                    let (_, object) = namespace.search(&source, &context.current_scope)?;
                    let alias = alias.resolve(&context.current_scope)?;
                    namespace.create_alias(alias, object)?;
                }
                Opcode::Name => {
                    let name = context.namestring()?;
                    context.start_in_flight_op(OpInFlight::new_with(
                        Opcode::Name,
                        vec![Argument::Namestring(name)],
                        1,
                    ));
                }
                Opcode::BytePrefix => {
                    let value = context.next()?;
                    context.contribute_arg(Argument::Object(Object::Integer(value as u64).wrap()));
                }
                Opcode::WordPrefix => {
                    let value = context.next_u16()?;
                    context.contribute_arg(Argument::Object(Object::Integer(value as u64).wrap()));
                }
                Opcode::DWordPrefix => {
                    let value = context.next_u32()?;
                    context.contribute_arg(Argument::Object(Object::Integer(value as u64).wrap()));
                }
                Opcode::QWordPrefix => {
                    let value = context.next_u64()?;
                    context.contribute_arg(Argument::Object(Object::Integer(value).wrap()));
                }
                Opcode::StringPrefix => {
                    let str_start = context.current_block.pc;
                    while context.next()? != b'\0' {}
                    let bytes = &context.current_block.stream()[str_start..(context.current_block.pc - 1)];
                    let string = String::from_utf8_lossy(bytes).into_owned();
                    context.contribute_arg(Argument::Object(Object::String(string).wrap()));
                }
                Opcode::Scope => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    let name = context.namestring()?;

                    let remaining = remaining_length(pkg_length, context.current_block.pc - start_pc)?;

                    let new_scope = name.resolve(&context.current_scope)?;
                    self.namespace.lock().add_level(new_scope.clone(), NamespaceLevelKind::Scope)?;

                    let old_scope = mem::replace(&mut context.current_scope, new_scope);
                    context.start_new_block(BlockKind::Scope { old_scope }, remaining)?;
                }
                Opcode::Buffer => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    context.start_in_flight_op(OpInFlight::new_with(
                        Opcode::Buffer,
                        vec![Argument::TrackedPc(start_pc), Argument::PkgLength(pkg_length)],
                        1,
                    ));
                }
                Opcode::Package => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    let num_elements = context.next()?;

                    let remaining = remaining_length(pkg_length, context.current_block.pc - start_pc)?;

                    /*
                     * We now need to interpret an arbitrary number of package
                     * elements, bounded by the remaining pkglength. This may
                     * be less than `num_elements` - the remaining elements of
                     * the package are uninitialized. We utilise a combination
                     * of a block to manage the pkglength, plus an in-flight op
                     * to collect interpreted elements.
                     */
                    context.start_in_flight_op(OpInFlight::new(Opcode::Package, num_elements as usize));
                    context.start_new_block(BlockKind::Package, remaining)?;
                }
                Opcode::VarPackage => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    context.start_in_flight_op(OpInFlight::new_with(
                        Opcode::VarPackage,
                        vec![Argument::TrackedPc(start_pc), Argument::PkgLength(pkg_length)],
                        1,
                    ));
                }
                Opcode::Method => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    let name = context.namestring()?;
                    let flags = MethodFlags(context.next()?);

                    let code_len = remaining_length(pkg_length, context.current_block.pc - start_pc)?;
                    if context.current_block.pc + code_len > context.current_block.stream().len() {
                        return Err(AmlError::RunOutOfStream);
                    }
                    let code = context.current_block.stream()
                        [context.current_block.pc..(context.current_block.pc + code_len)]
                        .to_vec();
                    context.current_block.pc += code_len;

                    let serialize_mutex = if flags.serialize() { Some(Arc::new(AmlMutex::new())) } else { None };
                    let name = name.resolve(&context.current_scope)?;
                    self.namespace.lock().insert(name, Object::Method { code, flags, serialize_mutex }.wrap())?;
                }
                Opcode::External => {
                    let _name = context.namestring()?;
                    let _object_type = context.next()?;
                    let _arg_count = context.next()?;
                }
                Opcode::Mutex => {
                    let name = context.namestring()?;
                    let sync_level = context.next()?;

                    let name = name.resolve(&context.current_scope)?;
                    self.namespace
                        .lock()
                        .insert(name, Object::Mutex { mutex: Arc::new(AmlMutex::new()), sync_level }.wrap())?;
                }
                Opcode::Event => {
                    let name = context.namestring()?;

                    let name = name.resolve(&context.current_scope)?;
                    self.namespace.lock().insert(name, Object::Event(Arc::new(AmlEvent::new())).wrap())?;
                }
                Opcode::Load => context.start_in_flight_op(OpInFlight::new(Opcode::Load, 2)),
                Opcode::LoadTable => context.start_in_flight_op(OpInFlight::new(Opcode::LoadTable, 6)),
                Opcode::Stall => context.start_in_flight_op(OpInFlight::new(Opcode::Stall, 1)),
                Opcode::Sleep => context.start_in_flight_op(OpInFlight::new(Opcode::Sleep, 1)),
                Opcode::Acquire => context.start_in_flight_op(OpInFlight::new(Opcode::Acquire, 1)),
                Opcode::Release => context.start_in_flight_op(OpInFlight::new(Opcode::Release, 1)),
                Opcode::Signal => context.start_in_flight_op(OpInFlight::new(Opcode::Signal, 1)),
                Opcode::Reset => context.start_in_flight_op(OpInFlight::new(Opcode::Reset, 1)),
                Opcode::Wait => context.start_in_flight_op(OpInFlight::new(Opcode::Wait, 2)),
                Opcode::FromBCD | Opcode::ToBCD => context.start_in_flight_op(OpInFlight::new(opcode, 2)),
                Opcode::Revision => {
                    context.contribute_arg(Argument::Object(Object::Integer(INTERPRETER_REVISION).wrap()));
                }
                Opcode::Debug => {
                    context.contribute_arg(Argument::Object(Object::Debug.wrap()));
                }
                Opcode::Fatal => {
                    let typ = context.next()?;
                    let code = context.next_u32()?;
                    context.start_in_flight_op(OpInFlight::new_with(
                        Opcode::Fatal,
                        vec![Argument::ByteData(typ), Argument::DWordData(code)],
                        1,
                    ));
                }
                Opcode::Timer => {
                    // Time has to be monotonically-increasing, in 100ns units
                    let time = self.handler.nanos_since_boot() / 100;
                    context.contribute_arg(Argument::Object(Object::Integer(time).wrap()));
                }
                Opcode::OpRegion => {
                    let name = context.namestring()?;
                    let region_space = context.next()?;
                    context.start_in_flight_op(OpInFlight::new_with(
                        Opcode::OpRegion,
                        vec![Argument::Namestring(name), Argument::ByteData(region_space)],
                        2,
                    ));
                }
                Opcode::DataRegion => {
                    let name = context.namestring()?;
                    context.start_in_flight_op(OpInFlight::new_with(
                        Opcode::DataRegion,
                        vec![Argument::Namestring(name)],
                        3,
                    ));
                }
                Opcode::Field => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    let region_name = context.namestring()?;
                    let field_flags = context.next()?;

                    let (_, region) = self.namespace.lock().search(&region_name, &context.current_scope)?;
                    let kind = FieldUnitKind::Normal { region };
                    self.parse_field_list(context, kind, start_pc, pkg_length, field_flags)?;
                }
                Opcode::BankField => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    let region_name = context.namestring()?;
                    let bank_name = context.namestring()?;

                    context.start_in_flight_op(OpInFlight::new_with(
                        Opcode::BankField,
                        vec![
                            Argument::TrackedPc(start_pc),
                            Argument::PkgLength(pkg_length),
                            Argument::Namestring(region_name),
                            Argument::Namestring(bank_name),
                        ],
                        1,
                    ));
                }
                Opcode::IndexField => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    let index_name = context.namestring()?;
                    let data_name = context.namestring()?;
                    let field_flags = context.next()?;

                    let (index, data) = {
                        let namespace = self.namespace.lock();
                        let (_, index) = namespace.search(&index_name, &context.current_scope)?;
                        let (_, data) = namespace.search(&data_name, &context.current_scope)?;
                        (index, data)
                    };
                    let kind = FieldUnitKind::Index { index, data };
                    self.parse_field_list(context, kind, start_pc, pkg_length, field_flags)?;
                }
                Opcode::Device | Opcode::ThermalZone => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    let name = context.namestring()?;

                    let remaining = remaining_length(pkg_length, context.current_block.pc - start_pc)?;

                    let new_scope = name.resolve(&context.current_scope)?;
                    let (kind, object) = match opcode {
                        Opcode::Device => (NamespaceLevelKind::Device, Object::Device),
                        Opcode::ThermalZone => (NamespaceLevelKind::ThermalZone, Object::ThermalZone),
                        _ => unreachable!(),
                    };
                    {
                        let mut namespace = self.namespace.lock();
                        namespace.add_level(new_scope.clone(), kind)?;
                        namespace.insert(new_scope.clone(), object.wrap())?;
                    }

                    let old_scope = mem::replace(&mut context.current_scope, new_scope);
                    context.start_new_block(BlockKind::Scope { old_scope }, remaining)?;
                }
                Opcode::Processor => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    let name = context.namestring()?;
                    let proc_id = context.next()?;
                    let pblk_address = context.next_u32()?;
                    let pblk_length = context.next()?;

                    let remaining = remaining_length(pkg_length, context.current_block.pc - start_pc)?;

                    let new_scope = name.resolve(&context.current_scope)?;
                    let object = Object::Processor { proc_id, pblk_address, pblk_length };
                    {
                        let mut namespace = self.namespace.lock();
                        namespace.add_level(new_scope.clone(), NamespaceLevelKind::Processor)?;
                        namespace.insert(new_scope.clone(), object.wrap())?;
                    }

                    let old_scope = mem::replace(&mut context.current_scope, new_scope);
                    context.start_new_block(BlockKind::Scope { old_scope }, remaining)?;
                }
                Opcode::PowerRes => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    let name = context.namestring()?;
                    let system_level = context.next()?;
                    let resource_order = context.next_u16()?;

                    let remaining = remaining_length(pkg_length, context.current_block.pc - start_pc)?;

                    let new_scope = name.resolve(&context.current_scope)?;
                    let object = Object::PowerResource { system_level, resource_order };
                    {
                        let mut namespace = self.namespace.lock();
                        namespace.add_level(new_scope.clone(), NamespaceLevelKind::PowerResource)?;
                        namespace.insert(new_scope.clone(), object.wrap())?;
                    }

                    let old_scope = mem::replace(&mut context.current_scope, new_scope);
                    context.start_new_block(BlockKind::Scope { old_scope }, remaining)?;
                }
                Opcode::Local(local) => {
                    let object = context.locals[local as usize].clone();
                    context.contribute_arg(Argument::Object(
                        Object::Reference { kind: ReferenceKind::Local(local), inner: object }.wrap(),
                    ));
                }
                Opcode::Arg(arg) => {
                    let object = context.args[arg as usize].clone();
                    context.contribute_arg(Argument::Object(
                        Object::Reference { kind: ReferenceKind::Arg(arg), inner: object }.wrap(),
                    ));
                }
                Opcode::Store => context.start_in_flight_op(OpInFlight::new(Opcode::Store, 2)),
                Opcode::CopyObject => context.start_in_flight_op(OpInFlight::new(Opcode::CopyObject, 2)),
                Opcode::RefOf => context.start_in_flight_op(OpInFlight::new(Opcode::RefOf, 1)),
                Opcode::CondRefOf => context.start_in_flight_op(OpInFlight::new(Opcode::CondRefOf, 2)),
                Opcode::DerefOf => context.start_in_flight_op(OpInFlight::new(Opcode::DerefOf, 1)),
                Opcode::Notify => context.start_in_flight_op(OpInFlight::new(Opcode::Notify, 2)),

                Opcode::DualNamePrefix
                | Opcode::MultiNamePrefix
                | Opcode::Digit(_)
                | Opcode::NameChar(_)
                | Opcode::RootChar
                | Opcode::ParentPrefixChar => {
                    context.current_block.pc -= 1;
                    let name = context.namestring()?;

                    if name.is_null() {
                        // An omitted target; stores into it are dropped
                        context.contribute_arg(Argument::Object(Object::Uninitialized.wrap()));
                        continue;
                    }

                    let target_position = context
                        .in_flight
                        .last()
                        .map(|op| opcode::is_name_target_position(op.op, op.arguments.len()))
                        .unwrap_or(false);

                    let search_result = self.namespace.lock().search(&name, &context.current_scope);
                    match search_result {
                        Ok((resolved_name, object)) => {
                            if target_position {
                                /*
                                 * Names in target position must not invoke
                                 * methods, and carry their resolved path so
                                 * stores can find the destination node.
                                 */
                                context.contribute_arg(Argument::Object(
                                    Object::Reference {
                                        kind: ReferenceKind::NamedObject(resolved_name),
                                        inner: object,
                                    }
                                    .wrap(),
                                ));
                            } else if let Object::Method { flags, .. } = *object {
                                context.start_in_flight_op(OpInFlight::new_with(
                                    Opcode::InternalMethodCall,
                                    vec![Argument::Object(object), Argument::Namestring(resolved_name)],
                                    flags.arg_count(),
                                ));
                            } else if let Object::NativeMethod(ref native) = *object {
                                let arg_count = native.arg_count();
                                context.start_in_flight_op(OpInFlight::new_with(
                                    Opcode::InternalNativeMethodCall,
                                    vec![Argument::Object(object.clone())],
                                    arg_count,
                                ));
                            } else if let Object::FieldUnit(ref field) = *object {
                                // Named field units read their value when used as a term
                                let value = self.do_field_read(field)?;
                                context.contribute_arg(Argument::Object(value));
                            } else {
                                context.contribute_arg(Argument::Object(object));
                            }
                        }
                        Err(AmlError::ObjectDoesNotExist(_)) => {
                            /*
                             * Unresolved names are only allowed where forward
                             * references are legal: package elements, and the
                             * operand of `CondRefOf`.
                             */
                            let allow_unresolved = context.current_block.kind == BlockKind::Package
                                || context.in_flight.last().map(|op| op.op == Opcode::CondRefOf).unwrap_or(false);
                            if allow_unresolved {
                                let reference = Object::Reference {
                                    kind: ReferenceKind::Unresolved(name),
                                    inner: Object::Uninitialized.wrap(),
                                };
                                context.contribute_arg(Argument::Object(reference.wrap()));
                            } else {
                                return Err(AmlError::ObjectDoesNotExist(name));
                            }
                        }
                        Err(other) => return Err(other),
                    }
                }

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
                | Opcode::Concat => {
                    context.start_in_flight_op(OpInFlight::new(opcode, 3));
                }
                Opcode::Divide => context.start_in_flight_op(OpInFlight::new(Opcode::Divide, 4)),
                Opcode::Increment | Opcode::Decrement => {
                    context.start_in_flight_op(OpInFlight::new(opcode, 1))
                }
                Opcode::Not => context.start_in_flight_op(OpInFlight::new(Opcode::Not, 2)),
                Opcode::FindSetLeftBit | Opcode::FindSetRightBit => {
                    context.start_in_flight_op(OpInFlight::new(opcode, 2))
                }
                Opcode::ConcatRes => context.start_in_flight_op(OpInFlight::new(opcode, 3)),
                Opcode::SizeOf => context.start_in_flight_op(OpInFlight::new(opcode, 1)),
                Opcode::Index => context.start_in_flight_op(OpInFlight::new(opcode, 3)),
                Opcode::Match => context.start_in_flight_op(OpInFlight::new(Opcode::Match, 1)),

                Opcode::CreateBitField
                | Opcode::CreateByteField
                | Opcode::CreateWordField
                | Opcode::CreateDWordField
                | Opcode::CreateQWordField => context.start_in_flight_op(OpInFlight::new(opcode, 2)),
                Opcode::CreateField => context.start_in_flight_op(OpInFlight::new(Opcode::CreateField, 3)),

                Opcode::LAnd
                | Opcode::LOr
                | Opcode::LNotEqual
                | Opcode::LLessEqual
                | Opcode::LGreaterEqual
                | Opcode::LEqual
                | Opcode::LGreater
                | Opcode::LLess => {
                    context.start_in_flight_op(OpInFlight::new(opcode, 2));
                }
                Opcode::LNot => context.start_in_flight_op(OpInFlight::new(Opcode::LNot, 1)),

                Opcode::ToBuffer | Opcode::ToDecimalString | Opcode::ToHexString | Opcode::ToInteger => {
                    context.start_in_flight_op(OpInFlight::new(opcode, 2))
                }
                Opcode::ToString => context.start_in_flight_op(OpInFlight::new(Opcode::ToString, 3)),

                Opcode::ObjectType => context.start_in_flight_op(OpInFlight::new(opcode, 1)),
                Opcode::Mid => context.start_in_flight_op(OpInFlight::new(Opcode::Mid, 4)),
                Opcode::If => {
                    let start_pc = context.current_block.pc;
                    let then_length = context.pkglength()?;
                    context.start_in_flight_op(OpInFlight::new_with(
                        Opcode::If,
                        vec![Argument::TrackedPc(start_pc), Argument::PkgLength(then_length)],
                        1,
                    ));
                }
                Opcode::Else => return Err(AmlError::ElseFoundWithoutCorrespondingIf),
                Opcode::While => {
                    let start_pc = context.current_block.pc;
                    let pkg_length = context.pkglength()?;
                    let remaining = remaining_length(pkg_length, context.current_block.pc - start_pc)?;
                    let deadline = self
                        .handler
                        .nanos_since_boot()
                        .wrapping_add(self.loop_timeout_ms.load(Ordering::Relaxed) * 1_000_000);
                    context.start_new_block(
                        BlockKind::While { start_pc: context.current_block.pc, deadline },
                        remaining,
                    )?;
                    context.start_in_flight_op(OpInFlight::new(Opcode::While, 1));
                }
                Opcode::Continue => {
                    loop {
                        if let BlockKind::While { start_pc, deadline } = context.current_block.kind {
                            if self.handler.nanos_since_boot() >= deadline {
                                return Err(AmlError::Timeout);
                            }
                            context.current_block.pc = start_pc;
                            break;
                        }
                        let block = context.block_stack.pop().ok_or(AmlError::ContinueOutsideOfWhile)?;
                        context.current_block = block;
                    }
                    context.start_in_flight_op(OpInFlight::new(Opcode::While, 1));
                }
                Opcode::Break => loop {
                    let is_while = matches!(context.current_block.kind, BlockKind::While { .. });
                    let block = context.block_stack.pop().ok_or(AmlError::BreakOutsideOfWhile)?;
                    context.current_block = block;
                    if is_while {
                        break;
                    }
                },
                Opcode::Return => context.start_in_flight_op(OpInFlight::new(Opcode::Return, 1)),
                Opcode::Noop => {}
                Opcode::Breakpoint => {
                    self.handler.breakpoint();
                }

                Opcode::InternalMethodCall | Opcode::InternalNativeMethodCall => {
                    return Err(AmlError::BadBytecode);
                }
            }
        }
    }
}

impl<H> Interpreter<H>
where
    H: Handler,
{
    fn do_binary_maths(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(left), Argument::Object(right), target] = &op.arguments[0..3] else {
            return Err(AmlError::BadBytecode);
        };
        let target2 = if op.op == Opcode::Divide { Some(&op.arguments[3]) } else { None };

        let width = self.integer_width_bytes();
        let left = left.clone().unwrap_transparent_reference().to_integer(width)?;
        let right = right.clone().unwrap_transparent_reference().to_integer(width)?;

        let result = match op.op {
            Opcode::Add => left.wrapping_add(right),
            Opcode::Subtract => left.wrapping_sub(right),
            Opcode::Multiply => left.wrapping_mul(right),
            Opcode::Divide => {
                if right == 0 {
                    return Err(AmlError::DivideByZero);
                }
                if let Some(remainder) = target2 {
                    self.do_store(context, remainder, Object::Integer(left % right).wrap())?;
                }
                left / right
            }
            Opcode::ShiftLeft => {
                if right >= 64 { 0 } else { left << right }
            }
            Opcode::ShiftRight => {
                if right >= 64 { 0 } else { left >> right }
            }
            Opcode::Mod => {
                if right == 0 {
                    return Err(AmlError::DivideByZero);
                }
                left % right
            }
            Opcode::Nand => !(left & right),
            Opcode::And => left & right,
            Opcode::Or => left | right,
            Opcode::Nor => !(left | right),
            Opcode::Xor => left ^ right,
            _ => return Err(AmlError::BadBytecode),
        };

        let result = Object::Integer(result & self.integer_mask()).wrap();
        let result = self.do_store(context, target, result)?;
        context.contribute_arg(Argument::Object(result));
        Ok(())
    }

    fn do_unary_maths(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(operand), target] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let width = self.integer_width_bytes();
        let operand = operand.clone().unwrap_transparent_reference().to_integer(width)? & self.integer_mask();

        let result = match op.op {
            Opcode::FindSetLeftBit => {
                // One-based bit position of the most-significant set bit
                if operand == 0 { 0 } else { 64 - operand.leading_zeros() as u64 }
            }
            Opcode::FindSetRightBit => {
                if operand == 0 { 0 } else { operand.trailing_zeros() as u64 + 1 }
            }
            Opcode::Not => !operand & self.integer_mask(),
            _ => return Err(AmlError::BadBytecode),
        };

        let result = self.do_store(context, target, Object::Integer(result).wrap())?;
        context.contribute_arg(Argument::Object(result));
        Ok(())
    }

    /// `Increment`/`Decrement` write through references to their referent -
    /// the documented exception to the store-rebinds-slots rule.
    fn do_increment(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(operand)] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let target = operand.clone().unwrap_transparent_reference().unwrap_reference()?;
        let width = self.integer_width_bytes();

        let new_value = match *target {
            Object::Integer(value) => {
                let new_value = match op.op {
                    Opcode::Increment => value.wrapping_add(1),
                    Opcode::Decrement => value.wrapping_sub(1),
                    _ => return Err(AmlError::BadBytecode),
                } & self.integer_mask();

                let _guard = self.store_lock.lock();
                let Object::Integer(slot) = target.gain_mut() else {
                    return Err(AmlError::InvalidOperationOnObject {
                        op: Operation::Increment,
                        typ: target.typ(),
                    });
                };
                *slot = new_value;
                new_value
            }
            Object::FieldUnit(ref field) => {
                let value = self.do_field_read(field)?.to_integer(width)?;
                let new_value = match op.op {
                    Opcode::Increment => value.wrapping_add(1),
                    Opcode::Decrement => value.wrapping_sub(1),
                    _ => return Err(AmlError::BadBytecode),
                } & self.integer_mask();
                self.do_field_write(field, &Object::Integer(new_value))?;
                new_value
            }
            Object::BufferField { .. } => {
                let mut bytes = [0u8; 8];
                target.read_buffer_field(&mut bytes)?;
                let value = u64::from_le_bytes(bytes);
                let new_value = match op.op {
                    Opcode::Increment => value.wrapping_add(1),
                    Opcode::Decrement => value.wrapping_sub(1),
                    _ => return Err(AmlError::BadBytecode),
                } & self.integer_mask();
                let _guard = self.store_lock.lock();
                target.write_buffer_field(&new_value.to_le_bytes())?;
                new_value
            }
            _ => {
                return Err(AmlError::InvalidOperationOnObject {
                    op: Operation::Increment,
                    typ: target.typ(),
                });
            }
        };

        context.contribute_arg(Argument::Object(Object::Integer(new_value).wrap()));
        Ok(())
    }

    fn do_logical_op(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let width = self.integer_width_bytes();

        if op.op == Opcode::LNot {
            let [Argument::Object(operand)] = &op.arguments[..] else {
                return Err(AmlError::BadBytecode);
            };
            let operand = operand.clone().unwrap_transparent_reference().to_integer(width)?;
            let result = if operand == 0 { self.integer_mask() } else { 0 };
            context.contribute_arg(Argument::Object(Object::Integer(result).wrap()));
            return Ok(());
        }

        let [Argument::Object(left), Argument::Object(right)] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let left = left.clone().unwrap_transparent_reference();
        let right = right.clone().unwrap_transparent_reference();

        let result = match op.op {
            Opcode::LAnd => (left.to_integer(width)? > 0) && (right.to_integer(width)? > 0),
            Opcode::LOr => (left.to_integer(width)? > 0) || (right.to_integer(width)? > 0),
            _ => {
                /*
                 * The comparison ops compare like types: strings and buffers
                 * lexicographically, everything else as integers.
                 */
                let ordering = match *left {
                    Object::String(ref left_str) => {
                        let right_str = right.as_string()?;
                        left_str.as_str().cmp(&right_str)
                    }
                    Object::Buffer(ref left_buf) => {
                        let right_buf = right.as_buffer()?;
                        left_buf.as_slice().cmp(right_buf)
                    }
                    _ => left.to_integer(width)?.cmp(&right.to_integer(width)?),
                };

                match op.op {
                    Opcode::LEqual => ordering.is_eq(),
                    Opcode::LNotEqual => ordering.is_ne(),
                    Opcode::LLess => ordering.is_lt(),
                    Opcode::LLessEqual => ordering.is_le(),
                    Opcode::LGreater => ordering.is_gt(),
                    Opcode::LGreaterEqual => ordering.is_ge(),
                    _ => return Err(AmlError::BadBytecode),
                }
            }
        };

        let result = if result { self.integer_mask() } else { 0 };
        context.contribute_arg(Argument::Object(Object::Integer(result).wrap()));
        Ok(())
    }

    fn do_mid(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(source), Argument::Object(index), Argument::Object(length), target] =
            &op.arguments[..]
        else {
            return Err(AmlError::BadBytecode);
        };
        let width = self.integer_width_bytes();
        let source = source.clone().unwrap_transparent_reference();
        let index = index.clone().unwrap_transparent_reference().to_integer(width)? as usize;
        let length = length.clone().unwrap_transparent_reference().to_integer(width)? as usize;

        let result = match *source {
            Object::String(ref string) => {
                let bytes = string.as_bytes();
                if index >= bytes.len() {
                    Object::String(String::new())
                } else {
                    let upper = usize::min(bytes.len(), index.saturating_add(length));
                    Object::String(String::from_utf8_lossy(&bytes[index..upper]).into_owned())
                }
            }
            Object::Buffer(ref buffer) => {
                if index >= buffer.len() {
                    Object::Buffer(Vec::new())
                } else {
                    let upper = usize::min(buffer.len(), index.saturating_add(length));
                    Object::Buffer(buffer[index..upper].to_vec())
                }
            }
            _ => {
                return Err(AmlError::InvalidOperationOnObject { op: Operation::Mid, typ: source.typ() });
            }
        }
        .wrap();

        let result = self.do_store(context, target, result)?;
        context.contribute_arg(Argument::Object(result));
        Ok(())
    }

    fn do_concat(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(source1), Argument::Object(source2), target] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let source1 = source1.clone().unwrap_transparent_reference();
        let source2 = source2.clone().unwrap_transparent_reference();
        let width = self.integer_width_bytes();

        fn resolve_as_string(object: &Object) -> String {
            match object {
                Object::Uninitialized => "[Uninitialized Object]".to_string(),
                Object::Buffer(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                Object::BufferField { .. } => "[Buffer Field]".to_string(),
                Object::Debug => "[Debug Object]".to_string(),
                Object::Device => "[Device]".to_string(),
                Object::Event(_) => "[Event]".to_string(),
                Object::FieldUnit(_) => "[Field]".to_string(),
                Object::Integer(value) => value.to_string(),
                Object::Method { .. } => "[Control Method]".to_string(),
                Object::NativeMethod(_) => "[Control Method]".to_string(),
                Object::Mutex { .. } => "[Mutex]".to_string(),
                Object::OpRegion(_) => "[Operation Region]".to_string(),
                Object::Package(_) => "[Package]".to_string(),
                Object::PowerResource { .. } => "[Power Resource]".to_string(),
                Object::Processor { .. } => "[Processor]".to_string(),
                Object::Reference { inner, .. } => resolve_as_string(inner),
                Object::String(value) => value.clone(),
                Object::ThermalZone => "[Thermal Zone]".to_string(),
            }
        }

        let result = match source1.typ() {
            ObjectType::Integer => {
                let source1 = source1.to_integer(width)?;
                let source2 = source2.to_integer(width)?;
                let mut buffer = Vec::new();
                if width == 8 {
                    buffer.extend_from_slice(&source1.to_le_bytes());
                    buffer.extend_from_slice(&source2.to_le_bytes());
                } else {
                    buffer.extend_from_slice(&(source1 as u32).to_le_bytes());
                    buffer.extend_from_slice(&(source2 as u32).to_le_bytes());
                }
                Object::Buffer(buffer).wrap()
            }
            ObjectType::Buffer => {
                let mut buffer = source1.as_buffer()?.to_vec();
                buffer.extend(source2.to_buffer(width)?);
                Object::Buffer(buffer).wrap()
            }
            _ => {
                let source1 = resolve_as_string(&source1);
                let source2 = resolve_as_string(&source2);
                Object::String(source1 + &source2).wrap()
            }
        };

        let result = self.do_store(context, target, result)?;
        context.contribute_arg(Argument::Object(result));
        Ok(())
    }

    fn do_from_bcd(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(value), target] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let mut value = value.clone().unwrap_transparent_reference().to_integer(self.integer_width_bytes())?;

        let mut result = 0;
        let mut i = 1;
        while value > 0 {
            result += (value & 0x0f) * i;
            i *= 10;
            value >>= 4;
        }

        let result = self.do_store(context, target, Object::Integer(result).wrap())?;
        context.contribute_arg(Argument::Object(result));
        Ok(())
    }

    fn do_to_bcd(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(value), target] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let mut value = value.clone().unwrap_transparent_reference().to_integer(self.integer_width_bytes())?;

        let mut result = 0;
        let mut i = 0;
        while value > 0 {
            result |= (value % 10) << (4 * i);
            value /= 10;
            i += 1;
        }

        let result = self.do_store(context, target, Object::Integer(result).wrap())?;
        context.contribute_arg(Argument::Object(result));
        Ok(())
    }

    /// The explicit conversion operators: `ToBuffer`, `ToDecimalString`,
    /// `ToHexString`, `ToInteger`, and `ToString`.
    fn do_conversion(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let width = self.integer_width_bytes();

        let (source, target) = match op.op {
            Opcode::ToString => {
                let [Argument::Object(source), Argument::Object(length), target] = &op.arguments[..] else {
                    return Err(AmlError::BadBytecode);
                };
                let source = source.clone().unwrap_transparent_reference();
                let length = length.clone().unwrap_transparent_reference().to_integer(width)? as usize;

                let bytes = source.as_buffer()?;
                let taken: Vec<u8> =
                    bytes.iter().copied().take_while(|&b| b != 0).take(length).collect();
                let result = Object::String(String::from_utf8_lossy(&taken).into_owned()).wrap();
                let result = self.do_store(context, target, result)?;
                context.contribute_arg(Argument::Object(result));
                return Ok(());
            }
            _ => {
                let [Argument::Object(source), target] = &op.arguments[..] else {
                    return Err(AmlError::BadBytecode);
                };
                (source.clone().unwrap_transparent_reference(), target)
            }
        };

        let result = match op.op {
            Opcode::ToBuffer => match *source {
                Object::Buffer(ref bytes) => Object::Buffer(bytes.clone()),
                Object::String(ref string) => {
                    // The trailing NUL comes along
                    let mut bytes = string.as_bytes().to_vec();
                    bytes.push(0);
                    Object::Buffer(bytes)
                }
                Object::Integer(value) => {
                    if width == 8 {
                        Object::Buffer(value.to_le_bytes().to_vec())
                    } else {
                        Object::Buffer((value as u32).to_le_bytes().to_vec())
                    }
                }
                _ => {
                    return Err(AmlError::InvalidOperationOnObject {
                        op: Operation::ConvertToBuffer,
                        typ: source.typ(),
                    });
                }
            },
            Opcode::ToInteger => match *source {
                Object::Integer(value) => Object::Integer(value),
                Object::Buffer(_) => Object::Integer(source.to_integer(8)?),
                Object::String(ref string) => Object::Integer(object::parse_integer_explicit(string)),
                _ => {
                    return Err(AmlError::InvalidOperationOnObject {
                        op: Operation::ConvertToInteger,
                        typ: source.typ(),
                    });
                }
            },
            Opcode::ToDecimalString => match *source {
                Object::Integer(value) => Object::String(object::integer_to_decimal_string(value)),
                Object::String(ref string) => Object::String(string.clone()),
                Object::Buffer(ref bytes) => {
                    let mut string = String::new();
                    for (i, byte) in bytes.iter().enumerate() {
                        if i > 0 {
                            string.push(',');
                        }
                        string.push_str(&object::integer_to_decimal_string(*byte as u64));
                    }
                    Object::String(string)
                }
                _ => {
                    return Err(AmlError::InvalidOperationOnObject {
                        op: Operation::ToString,
                        typ: source.typ(),
                    });
                }
            },
            Opcode::ToHexString => match *source {
                Object::Integer(value) => Object::String(object::integer_to_hex_string(value, width)),
                Object::String(ref string) => Object::String(string.clone()),
                Object::Buffer(ref bytes) => {
                    let mut string = String::new();
                    for (i, byte) in bytes.iter().enumerate() {
                        if i > 0 {
                            string.push(',');
                        }
                        string.push_str("0x");
                        string.push_str(&object::integer_to_hex_string(*byte as u64, 1));
                    }
                    Object::String(string)
                }
                _ => {
                    return Err(AmlError::InvalidOperationOnObject {
                        op: Operation::ToString,
                        typ: source.typ(),
                    });
                }
            },
            _ => return Err(AmlError::BadBytecode),
        };

        let result = self.do_store(context, target, result.wrap())?;
        context.contribute_arg(Argument::Object(result));
        Ok(())
    }

    fn do_size_of(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(object)] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let object = object.clone().unwrap_transparent_reference().unwrap_reference()?;

        let result = match *object {
            Object::Buffer(ref buffer) => buffer.len(),
            Object::String(ref str) => str.len(),
            Object::Package(ref package) => package.len(),
            _ => {
                return Err(AmlError::InvalidOperationOnObject { op: Operation::SizeOf, typ: object.typ() });
            }
        };

        context.contribute_arg(Argument::Object(Object::Integer(result as u64).wrap()));
        Ok(())
    }

    fn do_index(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(object), Argument::Object(index_value), target] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let object = object.clone().unwrap_transparent_reference();
        let index_value =
            index_value.clone().unwrap_transparent_reference().to_integer(self.integer_width_bytes())? as usize;

        let result = match *object {
            Object::Buffer(ref buffer) => {
                if index_value >= buffer.len() {
                    return Err(AmlError::IndexOutOfBounds);
                }
                Object::Reference {
                    kind: ReferenceKind::RefOf,
                    inner: Object::BufferField { buffer: object.clone(), offset: index_value * 8, length: 8 }
                        .wrap(),
                }
            }
            Object::String(ref string) => {
                if index_value >= string.len() {
                    return Err(AmlError::IndexOutOfBounds);
                }
                Object::Reference {
                    kind: ReferenceKind::RefOf,
                    inner: Object::BufferField { buffer: object.clone(), offset: index_value * 8, length: 8 }
                        .wrap(),
                }
            }
            Object::Package(ref package) => {
                let Some(element) = package.get(index_value) else {
                    return Err(AmlError::IndexOutOfBounds);
                };
                /*
                 * An index reference into a package shares ownership of the
                 * element; stores through it replace the element in place.
                 */
                Object::Reference { kind: ReferenceKind::Index, inner: element.clone() }
            }
            _ => {
                return Err(AmlError::InvalidOperationOnObject { op: Operation::Index, typ: object.typ() });
            }
        }
        .wrap();

        let result = self.do_store(context, target, result)?;
        context.contribute_arg(Argument::Object(result));
        Ok(())
    }

    fn do_deref_of(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(object)] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let object = object.clone().unwrap_transparent_reference();

        let result = match *object {
            Object::Reference { kind: ReferenceKind::Unresolved(ref name), .. } => {
                return Err(AmlError::UnresolvedReference(name.clone()));
            }
            Object::Reference { .. } => {
                /*
                 * Chains collapse to the ultimate target, however deep. A
                 * reference into a buffer reads the addressed byte out.
                 */
                let target = object.unwrap_reference()?;
                match *target {
                    Object::BufferField { .. } => {
                        let mut bytes = [0u8; 8];
                        target.read_buffer_field(&mut bytes)?;
                        Object::Integer(u64::from_le_bytes(bytes)).wrap()
                    }
                    Object::FieldUnit(ref field) => self.do_field_read(field)?,
                    _ => target.clone(),
                }
            }
            // The legacy form: `DerefOf` of a string containing a name path
            Object::String(ref path) => {
                let name = AmlName::from_str(path)?;
                let (_, object) = self.namespace.lock().search(&name, &context.current_scope)?;
                object
            }
            _ => {
                return Err(AmlError::InvalidOperationOnObject { op: Operation::DerefOf, typ: object.typ() });
            }
        };

        context.contribute_arg(Argument::Object(result));
        Ok(())
    }

    /// `Match` interleaves raw match-opcode bytes with its term operands, so
    /// the in-flight op is grown in stages as the stream supplies them.
    fn do_match(&self, context: &mut MethodContext, mut op: OpInFlight) -> Result<(), AmlError> {
        match op.arguments.len() {
            // The search package has arrived; read the first match opcode
            1 => {
                let match_op = context.next()?;
                op.arguments.push(Argument::ByteData(match_op));
                op.expected_arguments = 3;
                context.in_flight.push(op);
                Ok(())
            }
            // The first operand has arrived; read the second match opcode
            3 => {
                let match_op = context.next()?;
                op.arguments.push(Argument::ByteData(match_op));
                op.expected_arguments = 6;
                context.in_flight.push(op);
                Ok(())
            }
            6 => {
                let [
                    Argument::Object(search),
                    Argument::ByteData(match_op1),
                    Argument::Object(operand1),
                    Argument::ByteData(match_op2),
                    Argument::Object(operand2),
                    Argument::Object(start_index),
                ] = &op.arguments[..]
                else {
                    return Err(AmlError::BadBytecode);
                };

                let width = self.integer_width_bytes();
                let search = search.clone().unwrap_transparent_reference();
                let Object::Package(ref elements) = *search else {
                    return Err(AmlError::ObjectNotOfExpectedType {
                        expected: ObjectType::Package,
                        got: search.typ(),
                    });
                };
                let operand1 = operand1.clone().unwrap_transparent_reference();
                let operand2 = operand2.clone().unwrap_transparent_reference();
                let start_index =
                    start_index.clone().unwrap_transparent_reference().to_integer(width)? as usize;

                let mut found = self.integer_mask();
                for (i, element) in elements.iter().enumerate().skip(start_index) {
                    let element = element.clone().unwrap_transparent_reference();
                    if match_one(*match_op1, &element, &operand1, width)?
                        && match_one(*match_op2, &element, &operand2, width)?
                    {
                        found = i as u64;
                        break;
                    }
                }

                context.contribute_arg(Argument::Object(Object::Integer(found).wrap()));
                Ok(())
            }
            _ => Err(AmlError::BadBytecode),
        }
    }

    fn do_copy_object(&self, context: &mut MethodContext, op: OpInFlight) -> Result<(), AmlError> {
        let [Argument::Object(source), target] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let source = source.clone().unwrap_transparent_reference();
        let copied = source.deep_clone(0)?.wrap();

        let Argument::Object(target) = target else {
            return Err(AmlError::BadBytecode);
        };
        match **target {
            Object::Reference { kind: ReferenceKind::Local(slot), .. } => {
                context.locals[slot as usize] = copied.clone();
            }
            Object::Reference { kind: ReferenceKind::Arg(slot), .. } => {
                context.args[slot as usize] = copied.clone();
            }
            Object::Reference { kind: ReferenceKind::NamedObject(ref path), .. } => {
                /*
                 * Swap the node's object. An in-flight evaluation of the old
                 * object (including the node's own method, for `CopyObject`
                 * into the running method) holds its own `Arc` and continues
                 * undisturbed; new lookups see the new object.
                 */
                self.namespace.lock().insert(path.clone(), copied.clone())?;
            }
            Object::Reference { kind: ReferenceKind::RefOf | ReferenceKind::Index, .. } => {
                let referent = target.clone().unwrap_reference()?;
                let _guard = self.store_lock.lock();
                *referent.gain_mut() = source.deep_clone(0)?;
            }
            Object::Reference { kind: ReferenceKind::Unresolved(ref name), .. } => {
                return Err(AmlError::UnresolvedReference(name.clone()));
            }
            Object::Debug => self.handler.handle_debug(&copied),
            // A null target: the copy is dropped
            _ => (),
        }

        context.contribute_arg(Argument::Object(copied));
        Ok(())
    }

    /// `Load` runs a table supplied by AML itself. Rather than recursively
    /// invoking the interpreter, the loaded table's top level is pushed as a
    /// new frame on this evaluation's context stack, so host stack use stays
    /// flat no matter how deeply tables chain loads.
    fn do_load(
        &self,
        context: &mut MethodContext,
        context_stack: &mut Vec<MethodContext>,
        op: OpInFlight,
    ) -> Result<(), AmlError> {
        let [Argument::Object(source), target] = &op.arguments[..] else {
            return Err(AmlError::BadBytecode);
        };
        let source = source.clone().unwrap_transparent_reference();

        let bytes: Result<Vec<u8>, AmlError> = match *source {
            Object::OpRegion(ref region) if region.space == RegionSpace::SystemMemory => {
                let base = region.base as usize;
                let mut header = [0u8; SDT_HEADER_LENGTH];
                for (i, byte) in header.iter_mut().enumerate() {
                    *byte = self.handler.read_u8(base + i);
                }
                let length = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
                if length < SDT_HEADER_LENGTH || (region.length > 0 && length as u64 > region.length) {
                    Err(AmlError::InvalidTable)
                } else {
                    let mut bytes = Vec::with_capacity(length);
                    for i in 0..length {
                        bytes.push(self.handler.read_u8(base + i));
                    }
                    Ok(bytes)
                }
            }
            Object::FieldUnit(ref field) => {
                let value = self.do_field_read(field)?;
                match *value {
                    Object::Buffer(ref bytes) => Ok(bytes.clone()),
                    _ => Err(AmlError::InvalidTable),
                }
            }
            Object::Buffer(ref bytes) => Ok(bytes.clone()),
            _ => {
                return Err(AmlError::InvalidOperationOnObject { op: Operation::Load, typ: source.typ() });
            }
        };

        let installed = bytes.and_then(|bytes| self.tables.install(&bytes));
        match installed {
            Err(err) => {
                /*
                 * A table we can't load is survivable firmware misbehaviour:
                 * report failure in-band and carry on.
                 */
                warn!("AML Load failed: {:?}", err);
                self.do_store(context, target, Object::Integer(0).wrap())?;
                Ok(())
            }
            Ok(handle) => {
                let data = self.tables.data(handle)?;
                let completion = TableCompletion {
                    target: Some(target.clone()),
                    contribute: false,
                    handle: handle.0 as u64 + 1,
                    parameter: None,
                };
                let new_context =
                    MethodContext::new_from_table_data(data, AmlName::root(), Some(completion))?;
                let old_context = mem::replace(context, new_context);
                context_stack.push(old_context);
                Ok(())
            }
        }
    }

    fn do_load_table(
        &self,
        context: &mut MethodContext,
        context_stack: &mut Vec<MethodContext>,
        op: OpInFlight,
    ) -> Result<(), AmlError> {
        let [
            Argument::Object(signature),
            Argument::Object(oem_id),
            Argument::Object(oem_table_id),
            Argument::Object(root_path),
            Argument::Object(param_path),
            Argument::Object(param_data),
        ] = &op.arguments[..]
        else {
            return Err(AmlError::BadBytecode);
        };

        let signature = signature.clone().unwrap_transparent_reference();
        let signature = signature.as_string()?;
        let mut sig_bytes = [b' '; 4];
        for (i, b) in signature.bytes().take(4).enumerate() {
            sig_bytes[i] = b;
        }
        let oem_id = oem_id.clone().unwrap_transparent_reference();
        let oem_table_id = oem_table_id.clone().unwrap_transparent_reference();

        let handle =
            self.tables.find(sig_bytes, oem_id.as_string()?.as_bytes(), oem_table_id.as_string()?.as_bytes());
        let Ok(handle) = handle else {
            // No matching table: `LoadTable` evaluates to zero
            context.contribute_arg(Argument::Object(Object::Integer(0).wrap()));
            return Ok(());
        };

        let root_path = root_path.clone().unwrap_transparent_reference();
        let root_path = root_path.as_string()?;
        let load_scope =
            if root_path.is_empty() { AmlName::root() } else { AmlName::from_str(&root_path)? };

        let param_path = param_path.clone().unwrap_transparent_reference();
        let param_path = param_path.as_string()?;
        let parameter = if param_path.is_empty() {
            None
        } else {
            let param_name = AmlName::from_str(&param_path)?.resolve(&load_scope)?;
            Some((param_name, param_data.clone().unwrap_transparent_reference()))
        };

        let data = self.tables.data(handle)?;
        let completion = TableCompletion {
            target: None,
            contribute: true,
            handle: handle.0 as u64 + 1,
            parameter,
        };
        let new_context = MethodContext::new_from_table_data(data, load_scope, Some(completion))?;
        let old_context = mem::replace(context, new_context);
        context_stack.push(old_context);
        Ok(())
    }

    /// Store an object into a target, applying AML's implicit-conversion
    /// rules. Returns the object as converted by the destination, which the
    /// enclosing expression evaluates to.
    fn do_store(
        &self,
        context: &mut MethodContext,
        target: &Argument,
        object: WrappedObject,
    ) -> Result<WrappedObject, AmlError> {
        let object = object.unwrap_transparent_reference();

        let Argument::Object(target) = target else {
            return Err(AmlError::InvalidArgument);
        };

        match **target {
            Object::Reference { kind: ReferenceKind::Local(slot), .. } => {
                /*
                 * Slots are rebindable: the slot's previous object is
                 * released, and the source is stored by reference without
                 * coercion. In particular, a slot holding a reference is
                 * *replaced*, not written through.
                 */
                context.locals[slot as usize] = object.clone();
                Ok(object)
            }
            Object::Reference { kind: ReferenceKind::Arg(slot), .. } => {
                context.args[slot as usize] = object.clone();
                Ok(object)
            }
            Object::Reference { kind: ReferenceKind::NamedObject(_), ref inner } => {
                self.store_with_implicit_cast(inner, object)
            }
            Object::Reference { kind: ReferenceKind::RefOf, .. } => {
                let referent = target.clone().unwrap_reference()?;
                self.store_with_implicit_cast(&referent, object)
            }
            Object::Reference { kind: ReferenceKind::Index, ref inner } => {
                /*
                 * Stores through an index reference replace the package
                 * element in place; every holder of the element sees the new
                 * value.
                 */
                let new_value = object.deep_clone(0)?;
                let _guard = self.store_lock.lock();
                *inner.gain_mut() = new_value;
                Ok(object)
            }
            Object::Reference { kind: ReferenceKind::Unresolved(ref name), .. } => {
                Err(AmlError::UnresolvedReference(name.clone()))
            }
            Object::Debug => {
                self.handler.handle_debug(&object);
                Ok(object)
            }
            /*
             * A bare data object in target position is an omitted target
             * (`NullName`, or a constant): the store result is simply
             * discarded.
             */
            _ => Ok(object),
        }
    }

    /// The named-destination half of the store rules: coerce `value` to the
    /// destination's current type and write it into the destination object
    /// in place. Destinations keep their identity (and, for strings and
    /// buffers, their length).
    fn store_with_implicit_cast(
        &self,
        dest: &WrappedObject,
        value: WrappedObject,
    ) -> Result<WrappedObject, AmlError> {
        let value = value.unwrap_transparent_reference();

        match **dest {
            Object::Integer(_) => {
                let new_value = value.to_integer(self.integer_width_bytes())? & self.integer_mask();
                let _guard = self.store_lock.lock();
                if let Object::Integer(slot) = dest.gain_mut() {
                    *slot = new_value;
                }
                Ok(Object::Integer(new_value).wrap())
            }
            Object::String(_) | Object::Buffer(_) => {
                /*
                 * The destination's length is never altered: the source's
                 * byte image is truncated or zero-padded to fit. An integer
                 * source contributes its little-endian bytes.
                 */
                let image: Vec<u8> = match *value {
                    Object::Integer(value) => value.to_le_bytes().to_vec(),
                    Object::String(ref string) => string.as_bytes().to_vec(),
                    Object::Buffer(ref bytes) => bytes.clone(),
                    _ => {
                        return Err(AmlError::ObjectNotOfExpectedType {
                            expected: dest.typ(),
                            got: value.typ(),
                        });
                    }
                };

                let _guard = self.store_lock.lock();
                match dest.gain_mut() {
                    Object::String(string) => {
                        let bytes = unsafe { string.as_bytes_mut() };
                        for (i, slot) in bytes.iter_mut().enumerate() {
                            *slot = image.get(i).copied().unwrap_or(0);
                        }
                    }
                    Object::Buffer(buffer) => {
                        for (i, slot) in buffer.iter_mut().enumerate() {
                            *slot = image.get(i).copied().unwrap_or(0);
                        }
                    }
                    _ => (),
                }
                Ok(dest.clone())
            }
            Object::FieldUnit(ref field) => {
                self.do_field_write(field, &value)?;
                Ok(value)
            }
            Object::BufferField { .. } => {
                let image: Vec<u8> = match *value {
                    Object::Integer(value) => value.to_le_bytes().to_vec(),
                    Object::String(ref string) => string.as_bytes().to_vec(),
                    Object::Buffer(ref bytes) => bytes.clone(),
                    _ => {
                        return Err(AmlError::ObjectNotOfExpectedType {
                            expected: ObjectType::Integer,
                            got: value.typ(),
                        });
                    }
                };
                let _guard = self.store_lock.lock();
                dest.write_buffer_field(&image)?;
                Ok(value)
            }
            Object::Package(_) => {
                if let Object::Package(_) = *value {
                    let new_value = value.deep_clone(0)?;
                    let _guard = self.store_lock.lock();
                    *dest.gain_mut() = new_value;
                    Ok(dest.clone())
                } else {
                    Err(AmlError::ObjectNotOfExpectedType {
                        expected: ObjectType::Package,
                        got: value.typ(),
                    })
                }
            }
            Object::Uninitialized => {
                let new_value = value.deep_clone(0)?;
                let _guard = self.store_lock.lock();
                *dest.gain_mut() = new_value;
                Ok(dest.clone())
            }
            Object::Debug => {
                self.handler.handle_debug(&value);
                Ok(value)
            }
            _ => Err(AmlError::InvalidOperationOnObject { op: Operation::Store, typ: dest.typ() }),
        }
    }

    fn parse_field_list(
        &self,
        context: &mut MethodContext,
        kind: FieldUnitKind,
        start_pc: usize,
        pkg_length: usize,
        flags: u8,
    ) -> Result<(), AmlError> {
        const RESERVED_FIELD: u8 = 0x00;
        const ACCESS_FIELD: u8 = 0x01;
        const CONNECT_FIELD: u8 = 0x02;
        const EXTENDED_ACCESS_FIELD: u8 = 0x03;

        const BUFFER_OP: u8 = 0x11;

        let mut field_offset = 0;
        let mut flags = FieldFlags(flags);
        let mut access_attrib = 0;
        let mut connection: Option<WrappedObject> = None;

        while context.current_block.pc < (start_pc + pkg_length) {
            match context.next()? {
                RESERVED_FIELD => {
                    let length = context.pkglength()?;
                    field_offset += length;
                }
                ACCESS_FIELD => {
                    // Applies to all fields that follow, until the next one
                    let access_type = context.next()?;
                    access_attrib = context.next()?;
                    flags = flags.with_access_type(access_type);
                }
                EXTENDED_ACCESS_FIELD => {
                    let access_type = context.next()?;
                    access_attrib = context.next()?;
                    let _access_length = context.next()?;
                    flags = flags.with_access_type(access_type);
                }
                CONNECT_FIELD => {
                    if context.peek()? == BUFFER_OP {
                        /*
                         * A connection resource expressed as a buffer. The
                         * initializer is kept raw; the GPIO/serial-bus
                         * handler it is handed to decodes the descriptor.
                         */
                        context.next()?;
                        let buffer_start = context.current_block.pc;
                        let buffer_pkg = context.pkglength()?;
                        let content_len =
                            remaining_length(buffer_pkg, context.current_block.pc - buffer_start)?;
                        if context.current_block.pc + content_len > context.current_block.stream().len() {
                            return Err(AmlError::RunOutOfStream);
                        }
                        let bytes = context.current_block.stream()
                            [context.current_block.pc..(context.current_block.pc + content_len)]
                            .to_vec();
                        context.current_block.pc += content_len;
                        connection = Some(Object::Buffer(bytes).wrap());
                    } else {
                        let name = context.namestring()?;
                        let (_, object) = self.namespace.lock().search(&name, &context.current_scope)?;
                        connection = Some(object);
                    }
                }
                _ => {
                    context.current_block.pc -= 1;
                    let field_name = context.namestring()?;
                    let field_length = context.pkglength()?;

                    let field = Object::FieldUnit(FieldUnit {
                        kind: kind.clone(),
                        flags,
                        bit_index: field_offset,
                        bit_length: field_length,
                        access_attrib,
                        connection: connection.clone(),
                    });
                    self.namespace
                        .lock()
                        .insert(field_name.resolve(&context.current_scope)?, field.wrap())?;

                    field_offset += field_length;
                }
            }
        }

        Ok(())
    }
}

/// Evaluate one half of a `Match` pair. Comparisons across mismatched types
/// simply don't match, like the reference interpreter.
fn match_one(match_op: u8, element: &Object, operand: &Object, width: usize) -> Result<bool, AmlError> {
    const MTR: u8 = 0;
    const MEQ: u8 = 1;
    const MLE: u8 = 2;
    const MLT: u8 = 3;
    const MGE: u8 = 4;
    const MGT: u8 = 5;

    if match_op == MTR {
        return Ok(true);
    }

    let ordering = match (element, operand) {
        (Object::Integer(element), _) => element.cmp(&operand.to_integer(width)?),
        (Object::String(element), Object::String(operand)) => element.cmp(operand),
        (Object::Buffer(element), Object::Buffer(operand)) => element.cmp(operand),
        _ => return Ok(false),
    };

    Ok(match match_op {
        MEQ => ordering.is_eq(),
        MLE => ordering.is_le(),
        MLT => ordering.is_lt(),
        MGE => ordering.is_ge(),
        MGT => ordering.is_gt(),
        _ => return Err(AmlError::BadBytecode),
    })
}

/// A `MethodContext` represents a piece of running AML code - either a real
/// method, or the top level of an AML table (loaded at boot, or brought in
/// by a dynamic `Load`).
///
/// ### Safety
/// `MethodContext` does not keep the lifetime of the underlying AML stream,
/// because the interpreter needs to preempt method contexts that execute
/// other methods, and these contexts may have disparate lifetimes. This is
/// made safe for methods and installed tables by the context holding an
/// `Arc` of the method object or table data; `load_table` executes a
/// borrowed stream, but completes before it returns.
struct MethodContext {
    current_block: Block,
    block_stack: Vec<Block>,
    in_flight: Vec<OpInFlight>,
    args: [WrappedObject; 8],
    locals: [WrappedObject; 8],
    current_scope: AmlName,
    /// Held for `Serialized` methods, released when the frame is torn down.
    serialize_mutex: Option<Arc<AmlMutex>>,
    /// For table frames pushed by `Load`/`LoadTable`: what to do when the
    /// table's top level finishes.
    on_table_complete: Option<TableCompletion>,

    _method: Option<WrappedObject>,
    _table: Option<Arc<[u8]>>,
}

struct TableCompletion {
    target: Option<Argument>,
    contribute: bool,
    handle: u64,
    parameter: Option<(AmlName, WrappedObject)>,
}

#[derive(Clone, Debug)]
struct OpInFlight {
    op: Opcode,
    expected_arguments: usize,
    arguments: Vec<Argument>,
}

#[derive(Clone, Debug)]
enum Argument {
    Object(WrappedObject),
    Namestring(AmlName),
    ByteData(u8),
    DWordData(u32),
    TrackedPc(usize),
    PkgLength(usize),
}

struct Block {
    stream: *const [u8],
    pc: usize,
    kind: BlockKind,
}

impl Block {
    fn stream(&self) -> &[u8] {
        unsafe { &*self.stream }
    }
}

#[derive(Clone, PartialEq, Debug)]
enum BlockKind {
    Table,
    Method {
        method_scope: AmlName,
    },
    Scope {
        old_scope: AmlName,
    },
    Package,
    /// Used for executing the then-branch of an `DefIfElse`. After
    /// finishing, it will check for and skip over an else-branch, if
    /// present.
    IfThenBranch,
    While {
        start_pc: usize,
        /// When `nanos_since_boot` passes this, the loop has exceeded its
        /// wall-clock budget and the evaluation aborts.
        deadline: u64,
    },
}

impl OpInFlight {
    fn new(op: Opcode, expected_arguments: usize) -> OpInFlight {
        OpInFlight { op, expected_arguments, arguments: Vec::new() }
    }

    fn new_with(op: Opcode, arguments: Vec<Argument>, more: usize) -> OpInFlight {
        OpInFlight { op, expected_arguments: arguments.len() + more, arguments }
    }
}

impl MethodContext {
    unsafe fn new_from_table(stream: &[u8]) -> MethodContext {
        let block = Block { stream: stream as *const [u8], pc: 0, kind: BlockKind::Table };
        MethodContext {
            current_block: block,
            block_stack: Vec::new(),
            in_flight: Vec::new(),
            args: core::array::from_fn(|_| Object::Uninitialized.wrap()),
            locals: core::array::from_fn(|_| Object::Uninitialized.wrap()),
            current_scope: AmlName::root(),
            serialize_mutex: None,
            on_table_complete: None,
            _method: None,
            _table: None,
        }
    }

    /// Make a context for an installed table's AML, skipping its header.
    /// The context owns an `Arc` of the data, so the raw stream pointer
    /// stays valid however long the frame is preempted for.
    fn new_from_table_data(
        data: Arc<[u8]>,
        scope: AmlName,
        on_table_complete: Option<TableCompletion>,
    ) -> Result<MethodContext, AmlError> {
        if data.len() < SDT_HEADER_LENGTH {
            return Err(AmlError::InvalidTable);
        }
        let block =
            Block { stream: &data[SDT_HEADER_LENGTH..] as *const [u8], pc: 0, kind: BlockKind::Table };
        Ok(MethodContext {
            current_block: block,
            block_stack: Vec::new(),
            in_flight: Vec::new(),
            args: core::array::from_fn(|_| Object::Uninitialized.wrap()),
            locals: core::array::from_fn(|_| Object::Uninitialized.wrap()),
            current_scope: scope,
            serialize_mutex: None,
            on_table_complete,
            _method: None,
            _table: Some(data),
        })
    }

    fn new_from_method(
        method: WrappedObject,
        args: Vec<WrappedObject>,
        scope: AmlName,
        serialize_mutex: Option<Arc<AmlMutex>>,
    ) -> Result<MethodContext, AmlError> {
        if let Object::Method { ref code, flags, .. } = *method {
            if args.len() != flags.arg_count() {
                return Err(AmlError::MethodArgCountIncorrect);
            }
            let block = Block {
                stream: code as &[u8] as *const [u8],
                pc: 0,
                kind: BlockKind::Method { method_scope: scope.clone() },
            };
            let args = core::array::from_fn(|i| {
                if let Some(arg) = args.get(i) { arg.clone() } else { Object::Uninitialized.wrap() }
            });
            let context = MethodContext {
                current_block: block,
                block_stack: Vec::new(),
                in_flight: Vec::new(),
                args,
                locals: core::array::from_fn(|_| Object::Uninitialized.wrap()),
                current_scope: scope,
                serialize_mutex,
                on_table_complete: None,
                _method: Some(method.clone()),
                _table: None,
            };
            Ok(context)
        } else {
            Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Method, got: method.typ() })
        }
    }

    fn contribute_arg(&mut self, arg: Argument) {
        if let Some(in_flight) = self.in_flight.last_mut() {
            if in_flight.arguments.len() < in_flight.expected_arguments {
                in_flight.arguments.push(arg);
            }
        }
    }

    fn start_in_flight_op(&mut self, op: OpInFlight) {
        self.in_flight.push(op);
    }

    fn start_new_block(&mut self, kind: BlockKind, length: usize) -> Result<(), AmlError> {
        if self.pc_past_end(length) {
            return Err(AmlError::RunOutOfStream);
        }
        let block = Block {
            stream: &self.current_block.stream()[..(self.current_block.pc + length)] as *const [u8],
            pc: self.current_block.pc,
            kind,
        };
        self.current_block.pc += length;
        self.block_stack.push(mem::replace(&mut self.current_block, block));
        Ok(())
    }

    fn pc_past_end(&self, length: usize) -> bool {
        self.current_block.pc + length > self.current_block.stream().len()
    }

    fn opcode(&mut self) -> Result<Opcode, AmlError> {
        let opcode: u16 = match self.next()? {
            0x5b => {
                let ext = self.next()?;
                (0x5b << 8) as u16 | ext as u16
            }
            /*
             * `0x92` is a bit strange. It can be an opcode in its own right
             * (`LNotOp`), but when followed by `0x93..=0x95`, it instead
             * serves as a negating prefix to encode `LNotEqualOp`,
             * `LLessEqualOp`, and `LGreaterEqualOp`.
             */
            0x92 => {
                return Ok(match self.peek() {
                    Ok(0x93) => {
                        self.current_block.pc += 1;
                        Opcode::LNotEqual
                    }
                    Ok(0x94) => {
                        self.current_block.pc += 1;
                        Opcode::LLessEqual
                    }
                    Ok(0x95) => {
                        self.current_block.pc += 1;
                        Opcode::LGreaterEqual
                    }
                    _ => Opcode::LNot,
                });
            }
            other => other as u16,
        };

        Opcode::from_code(opcode)
    }

    fn pkglength(&mut self) -> Result<usize, AmlError> {
        let lead_byte = self.next()?;
        let byte_count = lead_byte.get_bits(6..8);

        if byte_count == 0 {
            Ok(lead_byte.get_bits(0..6) as usize)
        } else {
            let mut length = lead_byte.get_bits(0..4) as usize;
            for i in 0..byte_count {
                length |= (self.next()? as usize) << (4 + i * 8);
            }
            Ok(length)
        }
    }

    fn namestring(&mut self) -> Result<AmlName, AmlError> {
        use namespace::{NameComponent, NameSeg};

        /*
         * The NameString grammar is actually a little finicky and annoying.
         *
         * NameString := <RootChar NamePath> | <PrefixPath NamePath>
         * PrefixPath := Nothing | <'^' PrefixPath>
         * NamePath := NameSeg | DualNamePath | MultiNamePath | NullName
         * DualNamePath := DualNamePrefix NameSeg NameSeg
         * MultiNamePath := MultiNamePrefix SegCount NameSeg(SegCount)
         */
        const NULL_NAME: u8 = 0x00;
        const DUAL_NAME_PREFIX: u8 = 0x2e;
        const MULTI_NAME_PREFIX: u8 = 0x2f;

        let mut components = vec![];

        match self.peek()? {
            b'\\' => {
                self.next()?;
                components.push(NameComponent::Root);
            }
            b'^' => {
                components.push(NameComponent::Prefix);
                self.next()?;
                while self.peek()? == b'^' {
                    self.next()?;
                    components.push(NameComponent::Prefix);
                }
            }
            _ => (),
        }

        let next = self.next()?;
        match next {
            NULL_NAME => {}
            DUAL_NAME_PREFIX => {
                for _ in 0..2 {
                    let name_seg = [self.next()?, self.next()?, self.next()?, self.next()?];
                    components.push(NameComponent::Segment(NameSeg::from_bytes(name_seg)?));
                }
            }
            MULTI_NAME_PREFIX => {
                let count = self.next()?;
                for _ in 0..count {
                    let name_seg = [self.next()?, self.next()?, self.next()?, self.next()?];
                    components.push(NameComponent::Segment(NameSeg::from_bytes(name_seg)?));
                }
            }
            first_char => {
                if !namespace::is_lead_name_char(first_char) {
                    self.current_block.pc -= 1;
                }
                let name_seg = [first_char, self.next()?, self.next()?, self.next()?];
                components.push(NameComponent::Segment(NameSeg::from_bytes(name_seg)?));
            }
        }

        Ok(AmlName::from_components(components))
    }

    fn next(&mut self) -> Result<u8, AmlError> {
        if self.current_block.pc >= self.current_block.stream().len() {
            return Err(AmlError::RunOutOfStream);
        }

        let byte = self.current_block.stream()[self.current_block.pc];
        self.current_block.pc += 1;

        Ok(byte)
    }

    fn next_u16(&mut self) -> Result<u16, AmlError> {
        Ok(u16::from_le_bytes([self.next()?, self.next()?]))
    }

    fn next_u32(&mut self) -> Result<u32, AmlError> {
        Ok(u32::from_le_bytes([self.next()?, self.next()?, self.next()?, self.next()?]))
    }

    fn next_u64(&mut self) -> Result<u64, AmlError> {
        Ok(u64::from_le_bytes([
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ]))
    }

    fn peek(&self) -> Result<u8, AmlError> {
        if self.current_block.pc >= self.current_block.stream().len() {
            return Err(AmlError::RunOutOfStream);
        }

        Ok(self.current_block.stream()[self.current_block.pc])
    }
}

/// The operation the interpreter was carrying out when an object of the
/// wrong type got in the way; carried by
/// `AmlError::InvalidOperationOnObject` for diagnostics.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Operation {
    Acquire,
    Release,
    Signal,
    Wait,
    Notify,
    Mid,
    SizeOf,
    DerefOf,
    Index,
    Store,
    Increment,
    Load,
    FieldAccess,
    ConvertToInteger,
    ConvertToBuffer,
    ToString,
    ReadBufferField,
    WriteBufferField,
}

#[derive(Clone, PartialEq, Debug)]
pub enum AmlError {
    RunOutOfStream,
    IllegalOpcode(u16),
    /// The opcode stream was structurally malformed in a way that is not
    /// worth diagnosing further; the evaluation is abandoned.
    BadBytecode,
    InvalidFieldFlags,

    InvalidNameSeg([u8; 4]),
    InvalidNormalizedName(AmlName),
    RootHasNoParent,
    EmptyNamesAreInvalid,
    LevelDoesNotExist(AmlName),
    NameCollision(AmlName),
    ObjectDoesNotExist(AmlName),

    ElseFoundWithoutCorrespondingIf,
    ContinueOutsideOfWhile,
    BreakOutsideOfWhile,

    MethodArgCountIncorrect,

    InvalidOperationOnObject { op: Operation, typ: ObjectType },
    IndexOutOfBounds,
    ObjectNotOfExpectedType { expected: ObjectType, got: ObjectType },
    DivideByZero,
    /// A reference chain exceeded the configured depth (probably a cycle
    /// built through packages).
    ReferenceTooDeep,
    UnresolvedReference(AmlName),

    /// A `While` loop exceeded its wall-clock budget, or a wait timed out
    /// at the API level.
    Timeout,
    MutexNotOwned,

    InvalidTable,
    TableNotFound([u8; 4]),
    /// A table-installation handler refused the table.
    Denied,

    NoRegionHandler(op_region::RegionSpace),
    NoGpeHandler(u16),
    NoSuchGpe(u16),
    HandlerNotInstalled,
    AlreadyExists,

    /// The operation needs a part of the runtime that has not been
    /// initialized yet (e.g. events before the namespace is loaded).
    NotReady,
    InvalidArgument,
    /// Surfaced by hosts and region handlers when an allocation fails.
    OutOfMemory,
    /// Surfaced by region handlers when the hardware behind a region stops
    /// responding.
    HardwareTimeout,
}

/// The interface from the interpreter to the hosting kernel, covering
/// hardware access, time, and the few OS services the runtime needs. All
/// AML-visible hardware goes through this - nothing is touched directly.
///
/// ### Implementation notes
/// Reads and writes to PCI devices must succeed for devices that are not
/// detected during enumeration of the PCI bus / do not exist.
pub trait Handler: Send + Sync {
    fn read_u8(&self, address: usize) -> u8;
    fn read_u16(&self, address: usize) -> u16;
    fn read_u32(&self, address: usize) -> u32;
    fn read_u64(&self, address: usize) -> u64;

    fn write_u8(&self, address: usize, value: u8);
    fn write_u16(&self, address: usize, value: u16);
    fn write_u32(&self, address: usize, value: u32);
    fn write_u64(&self, address: usize, value: u64);

    fn read_io_u8(&self, port: u16) -> u8;
    fn read_io_u16(&self, port: u16) -> u16;
    fn read_io_u32(&self, port: u16) -> u32;

    fn write_io_u8(&self, port: u16, value: u8);
    fn write_io_u16(&self, port: u16, value: u16);
    fn write_io_u32(&self, port: u16, value: u32);

    fn read_pci_u8(&self, address: PciAddress, offset: u16) -> u8;
    fn read_pci_u16(&self, address: PciAddress, offset: u16) -> u16;
    fn read_pci_u32(&self, address: PciAddress, offset: u16) -> u32;

    fn write_pci_u8(&self, address: PciAddress, offset: u16, value: u8);
    fn write_pci_u16(&self, address: PciAddress, offset: u16, value: u16);
    fn write_pci_u32(&self, address: PciAddress, offset: u16, value: u32);

    /// Returns a monotonically-increasing value of nanoseconds.
    fn nanos_since_boot(&self) -> u64;

    /// Stall for at least the given number of **microseconds**. An
    /// implementation should not relinquish control of the processor during
    /// the stall, and for this reason, firmwares should not stall for
    /// periods of more than 100 microseconds.
    fn stall(&self, microseconds: u64);

    /// Sleep for at least the given number of **milliseconds**. An
    /// implementation may round to the closest sleep time supported, and
    /// should relinquish the processor.
    fn sleep(&self, milliseconds: u64);

    /// A stable identifier for the calling thread, used for recursive mutex
    /// ownership and method serialization.
    fn current_thread_id(&self) -> u64;

    /// Deferred work is pending (queued GPE handling or Notify delivery).
    /// The host should arrange for `Interpreter::complete_pending_events` to
    /// run from a worker thread soon. The default does nothing, which suits
    /// hosts that poll.
    fn schedule_deferred_work(&self) {}

    fn breakpoint(&self) {}

    fn handle_debug(&self, _object: &Object) {}

    fn handle_fatal_error(&self, fatal_type: u8, fatal_code: u32, fatal_arg: u64) {
        panic!(
            "Fatal error while executing AML (encountered DefFatalOp). fatal_type = {}, fatal_code = {}, fatal_arg = {}",
            fatal_type, fatal_code, fatal_arg
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};

    /// A `Handler` over in-memory maps, with a clock that ticks forward on
    /// every query so timeout paths make progress.
    pub(crate) struct TestHandler {
        pub(crate) memory: Spinlock<BTreeMap<usize, u8>>,
        pub(crate) io: Spinlock<BTreeMap<u16, u8>>,
        pub(crate) pci: Spinlock<BTreeMap<(u32, u16), u8>>,
        time: AtomicU64,
    }

    impl TestHandler {
        pub(crate) fn new() -> TestHandler {
            TestHandler {
                memory: Spinlock::new(BTreeMap::new()),
                io: Spinlock::new(BTreeMap::new()),
                pci: Spinlock::new(BTreeMap::new()),
                time: AtomicU64::new(0),
            }
        }

        pub(crate) fn load_memory(&self, address: usize, bytes: &[u8]) {
            let mut memory = self.memory.lock();
            for (i, byte) in bytes.iter().enumerate() {
                memory.insert(address + i, *byte);
            }
        }

        fn pci_key(address: PciAddress, offset: u16) -> (u32, u16) {
            let encoded = ((address.segment() as u32) << 16)
                | ((address.bus() as u32) << 8)
                | ((address.device() as u32) << 3)
                | (address.function() as u32);
            (encoded, offset)
        }
    }

    impl Handler for TestHandler {
        fn read_u8(&self, address: usize) -> u8 {
            *self.memory.lock().get(&address).unwrap_or(&0)
        }
        fn read_u16(&self, address: usize) -> u16 {
            u16::from_le_bytes([self.read_u8(address), self.read_u8(address + 1)])
        }
        fn read_u32(&self, address: usize) -> u32 {
            u32::from_le_bytes([
                self.read_u8(address),
                self.read_u8(address + 1),
                self.read_u8(address + 2),
                self.read_u8(address + 3),
            ])
        }
        fn read_u64(&self, address: usize) -> u64 {
            (self.read_u32(address) as u64) | ((self.read_u32(address + 4) as u64) << 32)
        }

        fn write_u8(&self, address: usize, value: u8) {
            self.memory.lock().insert(address, value);
        }
        fn write_u16(&self, address: usize, value: u16) {
            for (i, byte) in value.to_le_bytes().iter().enumerate() {
                self.write_u8(address + i, *byte);
            }
        }
        fn write_u32(&self, address: usize, value: u32) {
            for (i, byte) in value.to_le_bytes().iter().enumerate() {
                self.write_u8(address + i, *byte);
            }
        }
        fn write_u64(&self, address: usize, value: u64) {
            for (i, byte) in value.to_le_bytes().iter().enumerate() {
                self.write_u8(address + i, *byte);
            }
        }

        fn read_io_u8(&self, port: u16) -> u8 {
            *self.io.lock().get(&port).unwrap_or(&0)
        }
        fn read_io_u16(&self, port: u16) -> u16 {
            u16::from_le_bytes([self.read_io_u8(port), self.read_io_u8(port + 1)])
        }
        fn read_io_u32(&self, port: u16) -> u32 {
            u32::from_le_bytes([
                self.read_io_u8(port),
                self.read_io_u8(port + 1),
                self.read_io_u8(port + 2),
                self.read_io_u8(port + 3),
            ])
        }

        fn write_io_u8(&self, port: u16, value: u8) {
            self.io.lock().insert(port, value);
        }
        fn write_io_u16(&self, port: u16, value: u16) {
            for (i, byte) in value.to_le_bytes().iter().enumerate() {
                self.write_io_u8(port + i as u16, *byte);
            }
        }
        fn write_io_u32(&self, port: u16, value: u32) {
            for (i, byte) in value.to_le_bytes().iter().enumerate() {
                self.write_io_u8(port + i as u16, *byte);
            }
        }

        fn read_pci_u8(&self, address: PciAddress, offset: u16) -> u8 {
            *self.pci.lock().get(&Self::pci_key(address, offset)).unwrap_or(&0)
        }
        fn read_pci_u16(&self, address: PciAddress, offset: u16) -> u16 {
            u16::from_le_bytes([self.read_pci_u8(address, offset), self.read_pci_u8(address, offset + 1)])
        }
        fn read_pci_u32(&self, address: PciAddress, offset: u16) -> u32 {
            u32::from_le_bytes([
                self.read_pci_u8(address, offset),
                self.read_pci_u8(address, offset + 1),
                self.read_pci_u8(address, offset + 2),
                self.read_pci_u8(address, offset + 3),
            ])
        }

        fn write_pci_u8(&self, address: PciAddress, offset: u16, value: u8) {
            self.pci.lock().insert(Self::pci_key(address, offset), value);
        }
        fn write_pci_u16(&self, address: PciAddress, offset: u16, value: u16) {
            for (i, byte) in value.to_le_bytes().iter().enumerate() {
                self.write_pci_u8(address, offset + i as u16, *byte);
            }
        }
        fn write_pci_u32(&self, address: PciAddress, offset: u16, value: u32) {
            for (i, byte) in value.to_le_bytes().iter().enumerate() {
                self.write_pci_u8(address, offset + i as u16, *byte);
            }
        }

        fn nanos_since_boot(&self) -> u64 {
            // Tick 1us per query so polls and deadlines make progress
            self.time.fetch_add(1_000, Ordering::Relaxed)
        }
        fn stall(&self, microseconds: u64) {
            self.time.fetch_add(microseconds * 1_000, Ordering::Relaxed);
        }
        fn sleep(&self, milliseconds: u64) {
            self.time.fetch_add(milliseconds * 1_000_000, Ordering::Relaxed);
        }

        fn current_thread_id(&self) -> u64 {
            1
        }

        fn handle_fatal_error(&self, fatal_type: u8, fatal_code: u32, fatal_arg: u64) {
            let (_, _, _) = (fatal_type, fatal_code, fatal_arg);
        }
    }

    /// Hand-assembly of AML byte streams for tests.
    pub(crate) mod asm {
        use alloc::vec;
        use alloc::vec::Vec;

        /// Prefix `content` with its `PkgLength` encoding (which counts
        /// itself).
        pub(crate) fn pkg_of(content: &[u8]) -> Vec<u8> {
            let mut out = Vec::new();
            for encoding_size in 1..=4usize {
                let total = content.len() + encoding_size;
                let fits = match encoding_size {
                    1 => total <= 0x3f,
                    2 => total <= 0xfff,
                    3 => total <= 0xf_ffff,
                    _ => true,
                };
                if !fits {
                    continue;
                }
                if encoding_size == 1 {
                    out.push(total as u8);
                } else {
                    out.push((((encoding_size - 1) as u8) << 6) | ((total & 0xf) as u8));
                    let mut rest = total >> 4;
                    for _ in 0..(encoding_size - 1) {
                        out.push((rest & 0xff) as u8);
                        rest >>= 8;
                    }
                }
                break;
            }
            out.extend_from_slice(content);
            out
        }

        pub(crate) fn name_seg(name: &str) -> Vec<u8> {
            let mut seg = [b'_'; 4];
            for (i, b) in name.bytes().take(4).enumerate() {
                seg[i] = b;
            }
            seg.to_vec()
        }

        /// A root-anchored single-segment name, e.g. `\_OSI`.
        pub(crate) fn root_name(name: &str) -> Vec<u8> {
            let mut out = vec![0x5c];
            out.extend(name_seg(name));
            out
        }

        pub(crate) fn method(name: &str, flags: u8, body: &[u8]) -> Vec<u8> {
            let mut content = name_seg(name);
            content.push(flags);
            content.extend_from_slice(body);
            let mut out = vec![0x14];
            out.extend(pkg_of(&content));
            out
        }

        pub(crate) fn device(name: &str, body: &[u8]) -> Vec<u8> {
            let mut content = name_seg(name);
            content.extend_from_slice(body);
            let mut out = vec![0x5b, 0x82];
            out.extend(pkg_of(&content));
            out
        }

        pub(crate) fn scope_block(path: &[u8], body: &[u8]) -> Vec<u8> {
            let mut content = path.to_vec();
            content.extend_from_slice(body);
            let mut out = vec![0x10];
            out.extend(pkg_of(&content));
            out
        }

        pub(crate) fn name_def(name: &str, data: &[u8]) -> Vec<u8> {
            let mut out = vec![0x08];
            out.extend(name_seg(name));
            out.extend_from_slice(data);
            out
        }

        pub(crate) fn byte_const(value: u8) -> Vec<u8> {
            vec![0x0a, value]
        }

        pub(crate) fn dword_const(value: u32) -> Vec<u8> {
            let mut out = vec![0x0c];
            out.extend_from_slice(&value.to_le_bytes());
            out
        }

        pub(crate) fn qword_const(value: u64) -> Vec<u8> {
            let mut out = vec![0x0e];
            out.extend_from_slice(&value.to_le_bytes());
            out
        }

        pub(crate) fn string_const(value: &str) -> Vec<u8> {
            let mut out = vec![0x0d];
            out.extend_from_slice(value.as_bytes());
            out.push(0);
            out
        }

        pub(crate) fn buffer(bytes: &[u8]) -> Vec<u8> {
            let mut content = byte_const(bytes.len() as u8);
            content.extend_from_slice(bytes);
            let mut out = vec![0x11];
            out.extend(pkg_of(&content));
            out
        }

        pub(crate) fn package(elements: &[&[u8]]) -> Vec<u8> {
            let mut content = vec![elements.len() as u8];
            for element in elements {
                content.extend_from_slice(element);
            }
            let mut out = vec![0x12];
            out.extend(pkg_of(&content));
            out
        }

        pub(crate) fn op_region(name: &str, space: u8, base: u32, length: u32) -> Vec<u8> {
            let mut out = vec![0x5b, 0x80];
            out.extend(name_seg(name));
            out.push(space);
            out.extend(dword_const(base));
            out.extend(dword_const(length));
            out
        }

        pub(crate) fn field(region: &str, flags: u8, entries: &[(&str, u8)]) -> Vec<u8> {
            let mut content = name_seg(region);
            content.push(flags);
            for (name, bits) in entries {
                content.extend(name_seg(name));
                content.push(*bits);
            }
            let mut out = vec![0x5b, 0x81];
            out.extend(pkg_of(&content));
            out
        }

        pub(crate) fn mutex_def(name: &str, sync_level: u8) -> Vec<u8> {
            let mut out = vec![0x5b, 0x01];
            out.extend(name_seg(name));
            out.push(sync_level);
            out
        }

        pub(crate) fn event_def(name: &str) -> Vec<u8> {
            let mut out = vec![0x5b, 0x02];
            out.extend(name_seg(name));
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event::{EventConfig, FixedEvent, GpeBlockConfig, InterruptDisposition, Pm1BlockConfig, RegisterSpace};
    use test_support::{TestHandler, asm::*};

    fn interpreter_with(stream: &[u8]) -> Interpreter<TestHandler> {
        let interpreter = Interpreter::new(TestHandler::new(), 2);
        interpreter.load_table(stream).unwrap();
        interpreter
    }

    fn eval(interpreter: &Interpreter<TestHandler>, path: &str) -> WrappedObject {
        interpreter.invoke_method(AmlName::from_str(path).unwrap(), vec![]).unwrap()
    }

    #[test]
    fn add_op() {
        let interpreter = Interpreter::new(TestHandler::new(), 2);
        // AddOp 0x0e 0x06 => Local2
        interpreter.load_table(&[0x72, 0x0b, 0x0e, 0x00, 0x0a, 0x06, 0x62]).unwrap();
        // AddOp 0x0e (AddOp 0x01 0x03 => Local1) => Local1
        interpreter.load_table(&[0x72, 0x0a, 0x0e, 0x72, 0x0a, 0x01, 0x0a, 0x03, 0x61, 0x61]).unwrap();
    }

    #[test]
    fn names() {
        assert_eq!(
            unsafe { MethodContext::new_from_table(b"\\\x2eABC_DEF_\0") }.namestring(),
            Ok(AmlName::from_str("\\ABC.DEF").unwrap())
        );
    }

    #[test]
    fn packages_hold_evaluated_elements() {
        // Local0 = 10; Local1 = Package { Local0 * 5 }; Return(DerefOf(Local1[0]))
        let mut body = vec![0x70, 0x0a, 0x0a, 0x60];
        body.extend([0x70, 0x12]);
        let package_content = {
            let mut content = vec![1u8];
            content.extend([0x77, 0x60, 0x0a, 0x05, 0x00]);
            content
        };
        body.extend(pkg_of(&package_content));
        body.push(0x61);
        body.extend([0xa4, 0x83, 0x88, 0x61, 0x00, 0x00]);

        let interpreter = interpreter_with(&method("MAIN", 0, &body));
        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(50));
    }

    #[test]
    fn stores_preserve_named_string_length() {
        let mut table = name_def("TST1", &string_const("BAR"));
        table.extend(name_def("TST2", &string_const("")));
        table.extend(name_def("TST3", &string_const("XXXX")));

        let mut body = vec![0x70];
        body.extend(dword_const(0x4f4f46));
        body.extend(name_seg("TST1"));
        body.push(0x70);
        body.extend(string_const("FOO"));
        body.extend(name_seg("TST2"));
        body.push(0x70);
        body.extend(string_const("LONGSTRING"));
        body.extend(name_seg("TST3"));
        table.extend(method("MAIN", 0, &body));

        let interpreter = interpreter_with(&table);
        eval(&interpreter, "\\MAIN");

        assert_eq!(eval(&interpreter, "\\TST1").as_string().unwrap(), "FOO");
        assert_eq!(eval(&interpreter, "\\TST2").as_string().unwrap(), "");
        assert_eq!(eval(&interpreter, "\\TST3").as_string().unwrap(), "LONG");
    }

    #[test]
    fn stores_to_locals_holding_references_rebind() {
        // Local0 = 123; Local1 = RefOf(Local0); Local1 = 321; Return(Local0)
        let body = {
            let mut body = vec![0x70, 0x0a, 0x7b, 0x60];
            body.extend([0x70, 0x71, 0x60, 0x61]);
            body.extend([0x70, 0x0b, 0x41, 0x01, 0x61]);
            body.extend([0xa4, 0x60]);
            body
        };
        let interpreter = interpreter_with(&method("MAIN", 0, &body));
        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(123));
    }

    #[test]
    fn increment_writes_through_references() {
        // Local0 = 123; Local1 = RefOf(Local0); Local1++; Return(Local0)
        let body = {
            let mut body = vec![0x70, 0x0a, 0x7b, 0x60];
            body.extend([0x70, 0x71, 0x60, 0x61]);
            body.extend([0x75, 0x61]);
            body.extend([0xa4, 0x60]);
            body
        };
        let interpreter = interpreter_with(&method("MAIN", 0, &body));
        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(124));
    }

    #[test]
    fn returning_a_reference_to_a_local() {
        // INNR: Local0 = 55; Return(RefOf(Local0)). MAIN: Return(DerefOf(INNR()))
        let mut table = method("INNR", 0, &[0x70, 0x0a, 0x37, 0x60, 0xa4, 0x71, 0x60]);
        let mut main_body = vec![0xa4, 0x83];
        main_body.extend(name_seg("INNR"));
        table.extend(method("MAIN", 0, &main_body));

        let interpreter = interpreter_with(&table);
        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(55));
    }

    #[test]
    fn copy_object_into_the_running_method() {
        // Method TEST { CopyObject(123, TEST); Return(One) }
        let mut body = vec![0x9d, 0x0a, 0x7b];
        body.extend(name_seg("TEST"));
        body.extend([0xa4, 0x01]);
        let interpreter = interpreter_with(&method("TEST", 0, &body));

        // The in-flight invocation completes normally...
        assert_eq!(eval(&interpreter, "\\TEST").as_integer(), Ok(1));
        // ...and the node now holds the copied integer
        assert_eq!(eval(&interpreter, "\\TEST").as_integer(), Ok(123));
    }

    #[test]
    fn while_loops_time_out() {
        // Method MAIN { While (One) {} }
        let mut body = vec![0xa2];
        body.extend(pkg_of(&[0x01]));
        let interpreter = interpreter_with(&method("MAIN", 0, &body));
        interpreter.set_loop_timeout(1);

        let result = interpreter.invoke_method(AmlName::from_str("\\MAIN").unwrap(), vec![]);
        assert!(matches!(result, Err(AmlError::Timeout)));
    }

    #[test]
    fn recursion_uses_heap_frames() {
        // Method RECR(Arg0) { If (Arg0 < 200) { RECR(Arg0 + 1) } }
        let mut if_content = vec![0x95, 0x68, 0x0a, 0xc8];
        if_content.extend(name_seg("RECR"));
        if_content.extend([0x72, 0x68, 0x01, 0x00]);
        let mut body = vec![0xa0];
        body.extend(pkg_of(&if_content));

        let interpreter = interpreter_with(&method("RECR", 1, &body));
        let result = interpreter
            .invoke_method(AmlName::from_str("\\RECR").unwrap(), vec![Object::Integer(0).wrap()]);
        assert!(result.is_ok());
    }

    #[test]
    fn dynamic_load_pushes_a_frame() {
        let handler = TestHandler::new();
        let ssdt = table::make_test_table(b"SSDT", &name_def("LODD", &byte_const(42)));
        handler.load_memory(0x1000, &ssdt);

        let interpreter = Interpreter::new(handler, 2);
        let mut stream = op_region("TBLR", 0, 0x1000, ssdt.len() as u32);
        let mut body = vec![0x5b, 0x20];
        body.extend(name_seg("TBLR"));
        body.push(0x60);
        body.push(0xa4);
        body.extend(name_seg("LODD"));
        stream.extend(method("MAIN", 0, &body));
        interpreter.load_table(&stream).unwrap();

        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(42));
        assert!(interpreter.tables.find_by_signature(*b"SSDT").is_ok());
    }

    #[test]
    fn integers_mask_to_the_table_revision() {
        let mut table = name_def("VAL_", &dword_const(1));
        let mut body = vec![0x70];
        body.extend(qword_const(0x1_0000_0001));
        body.extend(name_seg("VAL_"));
        body.push(0xa4);
        body.extend(name_seg("VAL_"));
        table.extend(method("MAIN", 0, &body));

        let interpreter = Interpreter::new(TestHandler::new(), 1);
        interpreter.load_table(&table).unwrap();
        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(1));
    }

    #[test]
    fn serialized_methods_reenter_on_the_same_thread() {
        // Serialized method that calls itself
        let mut if_content = vec![0x95, 0x68, 0x0a, 0x03];
        if_content.extend(name_seg("SERR"));
        if_content.extend([0x72, 0x68, 0x01, 0x00]);
        let mut body = vec![0xa0];
        body.extend(pkg_of(&if_content));

        let interpreter = interpreter_with(&method("SERR", 0b0000_1001, &body));
        let result = interpreter
            .invoke_method(AmlName::from_str("\\SERR").unwrap(), vec![Object::Integer(0).wrap()]);
        assert!(result.is_ok());
        // The serialization mutex was released on return
        let result = interpreter
            .invoke_method(AmlName::from_str("\\SERR").unwrap(), vec![Object::Integer(0).wrap()]);
        assert!(result.is_ok());
    }

    #[test]
    fn mutex_and_event_ops() {
        let mut table = mutex_def("MUTX", 0);
        table.extend(event_def("EVNT"));

        let mut body = vec![0x70, 0x5b, 0x23];
        body.extend(name_seg("MUTX"));
        body.extend([0xff, 0xff, 0x60]);
        body.extend([0x5b, 0x27]);
        body.extend(name_seg("MUTX"));
        body.extend([0x5b, 0x24]);
        body.extend(name_seg("EVNT"));
        body.extend([0x70, 0x5b, 0x25]);
        body.extend(name_seg("EVNT"));
        body.extend([0x00, 0x61]);
        body.extend([0xa4, 0x72, 0x60, 0x61, 0x00]);
        table.extend(method("MAIN", 0, &body));

        let interpreter = interpreter_with(&table);
        // Both the acquire and the wait succeeded (neither timed out)
        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(0));
    }

    #[test]
    fn notify_delivery_is_fifo_per_target() {
        let mut table = device("DEVX", &[]);
        let mut body = vec![0x86];
        body.extend(name_seg("DEVX"));
        body.extend(byte_const(1));
        body.push(0x86);
        body.extend(name_seg("DEVX"));
        body.extend(byte_const(2));
        table.extend(method("NTFY", 0, &body));

        let interpreter = interpreter_with(&table);

        let order = Arc::new(Spinlock::new(Vec::new()));
        let captured = order.clone();
        interpreter
            .install_notify_handler(AmlName::from_str("\\DEVX").unwrap(), move |_, value| {
                captured.lock().push(value)
            })
            .unwrap();
        assert_eq!(
            interpreter.install_notify_handler(AmlName::from_str("\\DEVX").unwrap(), |_, _| ()),
            Err(AmlError::AlreadyExists)
        );

        eval(&interpreter, "\\NTFY");
        interpreter.complete_pending_events();
        assert_eq!(*order.lock(), vec![1, 2]);

        interpreter.uninstall_notify_handler(AmlName::from_str("\\DEVX").unwrap()).unwrap();
        assert_eq!(
            interpreter.uninstall_notify_handler(AmlName::from_str("\\DEVX").unwrap()),
            Err(AmlError::HandlerNotInstalled)
        );
    }

    #[test]
    fn field_accesses_hit_the_region() {
        let mut table = op_region("SIOR", 1, 0x600, 4);
        table.extend(field("SIOR", 0x01, &[("FLD1", 8), ("FLD2", 8)]));
        let mut body = vec![0x70, 0x0a, 0xab];
        body.extend(name_seg("FLD2"));
        body.push(0xa4);
        body.extend(name_seg("FLD2"));
        table.extend(method("MAIN", 0, &body));

        let interpreter = interpreter_with(&table);
        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(0xab));
        // FLD2 starts 8 bits in, so the write landed on the second port
        assert_eq!(interpreter.handler.io.lock().get(&0x601), Some(&0xab));
    }

    #[test]
    fn cond_ref_of_handles_missing_names() {
        let mut body = vec![0x70, 0x5b, 0x12];
        body.extend(name_seg("MISS"));
        body.extend([0x60, 0x61]);
        body.extend([0x70, 0x5b, 0x12]);
        body.extend(root_name("_REV"));
        body.extend([0x62, 0x63]);
        // Return(Local1 + DerefOf(Local2))
        body.extend([0xa4, 0x72, 0x61, 0x83, 0x62, 0x00]);

        let interpreter = interpreter_with(&method("MAIN", 0, &body));
        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(2));
    }

    #[test]
    fn indexing_into_buffers_reads_bytes() {
        let mut table = name_def("BUFF", &buffer(&[1, 2, 3, 4]));
        let mut body = vec![0xa4, 0x83, 0x88];
        body.extend(name_seg("BUFF"));
        body.extend([0x0a, 0x02, 0x00]);
        table.extend(method("MAIN", 0, &body));

        let interpreter = interpreter_with(&table);
        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(3));
    }

    #[test]
    fn explicit_conversions() {
        let mut int_body = vec![0xa4, 0x99];
        int_body.extend(string_const("0x42"));
        int_body.push(0x00);
        let hex_body = vec![0xa4, 0x98, 0x0a, 0xab, 0x00];
        let mut concat_body = vec![0xa4, 0x73];
        concat_body.extend(string_const("AB"));
        concat_body.extend(string_const("CD"));
        concat_body.push(0x00);

        let mut table = method("TOIN", 0, &int_body);
        table.extend(method("TOHX", 0, &hex_body));
        table.extend(method("CCAT", 0, &concat_body));

        let interpreter = interpreter_with(&table);
        assert_eq!(eval(&interpreter, "\\TOIN").as_integer(), Ok(0x42));
        assert_eq!(eval(&interpreter, "\\TOHX").as_string().unwrap(), "00000000000000AB");
        assert_eq!(eval(&interpreter, "\\CCAT").as_string().unwrap(), "ABCD");
    }

    #[test]
    fn size_of_and_object_type() {
        let mut table = name_def("STRR", &string_const("HELLO"));
        let mut size_body = vec![0xa4, 0x87];
        size_body.extend(name_seg("STRR"));
        let mut type_body = vec![0xa4, 0x8e];
        type_body.extend(name_seg("STRR"));
        table.extend(method("SIZE", 0, &size_body));
        table.extend(method("TYPE", 0, &type_body));

        let interpreter = interpreter_with(&table);
        assert_eq!(eval(&interpreter, "\\SIZE").as_integer(), Ok(5));
        assert_eq!(eval(&interpreter, "\\TYPE").as_integer(), Ok(2));
    }

    #[test]
    fn match_searches_packages() {
        let one = byte_const(1);
        let five = byte_const(5);
        let nine = byte_const(9);
        let mut table = name_def("PKGG", &package(&[&one, &five, &nine]));
        let mut body = vec![0xa4, 0x89];
        body.extend(name_seg("PKGG"));
        // MEQ 5, MTR, starting from index 0
        body.extend([0x01, 0x0a, 0x05, 0x00, 0x00, 0x00]);
        table.extend(method("MAIN", 0, &body));

        let interpreter = interpreter_with(&table);
        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(1));
    }

    #[test]
    fn typed_evaluation_checks_the_result() {
        let table = name_def("STRR", &string_const("HELLO"));
        let interpreter = interpreter_with(&table);

        assert!(
            interpreter
                .invoke_method_typed(AmlName::from_str("\\STRR").unwrap(), vec![], ObjectType::String)
                .is_ok()
        );
        assert!(matches!(
            interpreter.invoke_method_typed(AmlName::from_str("\\STRR").unwrap(), vec![], ObjectType::Integer),
            Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Integer, got: ObjectType::String })
        ));
    }

    #[test]
    fn osi_answers_from_the_interface_list() {
        let mut windows_body = vec![0xa4];
        windows_body.extend(root_name("_OSI"));
        windows_body.extend(string_const("Windows 2015"));
        let mut custom_body = vec![0xa4];
        custom_body.extend(root_name("_OSI"));
        custom_body.extend(string_const("FooBarOS"));

        let mut table = method("MWIN", 0, &windows_body);
        table.extend(method("MCUS", 0, &custom_body));
        let interpreter = interpreter_with(&table);

        assert_eq!(eval(&interpreter, "\\MWIN").as_integer(), Ok(u64::MAX));
        assert_eq!(eval(&interpreter, "\\MCUS").as_integer(), Ok(0));

        interpreter.install_interface("FooBarOS").unwrap();
        assert_eq!(eval(&interpreter, "\\MCUS").as_integer(), Ok(u64::MAX));

        interpreter.uninstall_interface("FooBarOS").unwrap();
        assert_eq!(eval(&interpreter, "\\MCUS").as_integer(), Ok(0));
    }

    #[test]
    fn node_info_collects_ids() {
        let mut device_body = name_def("_HID", &dword_const(0x0a0cd041));
        device_body.extend(name_def("_UID", &byte_const(7)));
        device_body.extend(name_def("_ADR", &dword_const(0x1f0002)));
        let table = device("DEVX", &device_body);

        let interpreter = interpreter_with(&table);
        let info = interpreter.get_node_info(&AmlName::from_str("\\DEVX").unwrap()).unwrap();
        assert_eq!(info.typ, ObjectType::Device);
        assert_eq!(info.hid.as_deref(), Some("PNP0C0A"));
        assert_eq!(info.uid.as_deref(), Some("7"));
        assert_eq!(info.adr, Some(0x1f0002));

        let mut children = Vec::new();
        interpreter
            .for_each_child(&AmlName::from_str("\\DEVX").unwrap(), |name, _| {
                children.push(name.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn namespace_loads_from_installed_tables() {
        let mut aml = name_def("ANSW", &byte_const(42));
        let mut body = vec![0xa4];
        body.extend(name_seg("ANSW"));
        aml.extend(method("MAIN", 0, &body));

        let interpreter = Interpreter::new(TestHandler::new(), 2);
        assert_eq!(interpreter.initialize_namespace(), Err(AmlError::TableNotFound(*b"DSDT")));

        interpreter.install_table(&table::make_test_table(b"DSDT", &aml)).unwrap();
        interpreter.install_table(&table::make_test_table(b"SSDT", &name_def("EXTR", &byte_const(7)))).unwrap();
        interpreter.initialize_namespace().unwrap();

        assert_eq!(eval(&interpreter, "\\MAIN").as_integer(), Ok(42));
        assert_eq!(eval(&interpreter, "\\EXTR").as_integer(), Ok(7));
    }

    #[test]
    fn gpe_methods_dispatch() {
        let mut table = name_def("GPED", &byte_const(0));
        let mut gpe_body = vec![0x70, 0x01];
        gpe_body.extend(name_seg("GPED"));
        table.extend(scope_block(&root_name("_GPE"), &method("_L02", 0, &gpe_body)));

        let interpreter = interpreter_with(&table);
        let config = EventConfig {
            gpe0: Some(GpeBlockConfig {
                register_base: 0x700,
                space: RegisterSpace::SystemIo,
                register_count: 1,
                base_number: 0,
            }),
            ..Default::default()
        };
        interpreter.initialize_events(config).unwrap();
        interpreter.enable_gpe(2).unwrap();

        // No handler was ever wired for GPE 3
        assert_eq!(interpreter.enable_gpe(3), Err(AmlError::NoGpeHandler(3)));

        // Raise the status bit for GPE 2 and take the interrupt
        interpreter.handler.io.lock().insert(0x700, 0x04);
        assert!(interpreter.gpe_irq().contains(InterruptDisposition::HANDLED));
        interpreter.complete_pending_events();

        let value = interpreter.namespace.lock().get(AmlName::from_str("\\GPED").unwrap()).unwrap();
        assert_eq!(value.as_integer(), Ok(1));
    }

    #[test]
    fn fixed_events_dispatch() {
        let interpreter = interpreter_with(&[]);
        let config = EventConfig {
            pm1a_event: Some(Pm1BlockConfig { address: 0x800, space: RegisterSpace::SystemIo, byte_length: 4 }),
            ..Default::default()
        };
        interpreter.initialize_events(config).unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let observed = fired.clone();
        interpreter
            .install_fixed_event_handler(FixedEvent::PowerButton, move || {
                observed.store(true, Ordering::Relaxed)
            })
            .unwrap();

        // Power-button status is bit 8 of the PM1 status register
        interpreter.handler.io.lock().insert(0x801, 0x01);
        assert!(interpreter.fixed_event_irq().contains(InterruptDisposition::HANDLED));
        interpreter.complete_pending_events();
        assert!(fired.load(Ordering::Relaxed));

        interpreter.uninstall_fixed_event_handler(FixedEvent::PowerButton).unwrap();
        assert_eq!(
            interpreter.uninstall_fixed_event_handler(FixedEvent::PowerButton),
            Err(AmlError::HandlerNotInstalled)
        );
    }
}
