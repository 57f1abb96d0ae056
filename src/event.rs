use crate::{
    AmlError,
    Handler,
    Interpreter,
    namespace::{AmlName, NameSeg},
    object::Object,
    table::Facs,
};
use alloc::{
    boxed::Box,
    collections::{btree_map::BTreeMap, vec_deque::VecDeque},
    sync::Arc,
    vec,
    vec::Vec,
};
use bit_field::BitField;
use bitflags::bitflags;
use core::str::FromStr;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{info, trace, warn};
use spinning_top::Spinlock;

bitflags! {
    /// Returned by the interrupt-edge entry points and by native GPE
    /// handlers.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct InterruptDisposition: u32 {
        const HANDLED = 1 << 0;
        /// A native GPE handler sets this to request that its (level-
        /// triggered) GPE is re-enabled once it returns.
        const REENABLE_GPE = 1 << 1;
    }
}

bitflags! {
    /// Bit image of the PM1 event status/enable registers.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Pm1Event: u16 {
        const TIMER = 1 << 0;
        const GLOBAL_LOCK = 1 << 5;
        const POWER_BUTTON = 1 << 8;
        const SLEEP_BUTTON = 1 << 9;
        const RTC_ALARM = 1 << 10;
        const PCIE_WAKE = 1 << 14;
        const WAKE = 1 << 15;
    }
}

/// Bit 2 of PM1 control: raised to tell the firmware we released the global
/// lock while it was pending.
const PM1_CONTROL_GLOBAL_LOCK_RELEASE: u16 = 1 << 2;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum FixedEvent {
    PowerButton,
    SleepButton,
    RtcAlarm,
    /// The firmware released the global lock we were pending on. Largely
    /// handled internally, but a client handler can observe it too.
    GlobalLockRelease,
}

impl FixedEvent {
    fn bit(&self) -> Pm1Event {
        match self {
            FixedEvent::PowerButton => Pm1Event::POWER_BUTTON,
            FixedEvent::SleepButton => Pm1Event::SLEEP_BUTTON,
            FixedEvent::RtcAlarm => Pm1Event::RTC_ALARM,
            FixedEvent::GlobalLockRelease => Pm1Event::GLOBAL_LOCK,
        }
    }

    const ALL: [FixedEvent; 4] =
        [FixedEvent::PowerButton, FixedEvent::SleepButton, FixedEvent::RtcAlarm, FixedEvent::GlobalLockRelease];
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum GpeTriggering {
    Edge,
    Level,
}

/// Where a raw event register lives. GPE and PM1 blocks can be in either
/// space, per their FADT descriptors.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum RegisterSpace {
    SystemMemory,
    SystemIo,
}

#[derive(Clone, Copy, Debug)]
pub struct GpeBlockConfig {
    /// Address of the first status register. Enable registers follow the
    /// status bank, per the ACPI GPE block layout.
    pub register_base: u64,
    pub space: RegisterSpace,
    /// Number of status/enable register *pairs*; each register covers 8
    /// GPEs.
    pub register_count: usize,
    /// The GPE number of this block's first event.
    pub base_number: u16,
}

#[derive(Clone, Copy, Debug)]
pub struct Pm1BlockConfig {
    pub address: u64,
    pub space: RegisterSpace,
    /// Total byte length of the block; the first half is status, the second
    /// enable.
    pub byte_length: usize,
}

/// Everything `initialize_events` needs from the FADT and FACS. Decoding the
/// tables themselves is the host's business.
#[derive(Default)]
pub struct EventConfig {
    pub gpe0: Option<GpeBlockConfig>,
    pub gpe1: Option<GpeBlockConfig>,
    pub pm1a_event: Option<Pm1BlockConfig>,
    pub pm1b_event: Option<Pm1BlockConfig>,
    pub pm1a_control: Option<(u64, RegisterSpace)>,
    pub pm1b_control: Option<(u64, RegisterSpace)>,
    pub facs: Option<&'static Facs>,
}

/// Per-GPE state machine: disabled until a client enables the event for
/// runtime or wake, and maskable for events that misbehave.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum GpeState {
    Disabled,
    Runtime,
    Wake,
    Masked,
}

pub type GpeHandlerFn = dyn Fn(u16) -> InterruptDisposition + Send + Sync;
pub type FixedEventHandlerFn = dyn Fn() + Send + Sync;
pub type NotifyHandlerFn = dyn Fn(&AmlName, u64) + Send + Sync;

#[derive(Clone)]
enum GpeKind {
    None,
    AmlMethod {
        method: AmlName,
        triggering: GpeTriggering,
    },
    Native {
        triggering: GpeTriggering,
        handler: Arc<GpeHandlerFn>,
        /// The AML method the native handler displaced, restored on
        /// uninstall.
        previous: Option<(AmlName, GpeTriggering)>,
    },
    /// No method and no handler, but devices asked to be notified when this
    /// GPE fires (typically wake GPEs).
    ImplicitNotify {
        targets: Vec<AmlName>,
    },
}

struct Gpe {
    state: GpeState,
    kind: GpeKind,
    /// Whether a `_Wxx` method exists for this GPE.
    has_wake_method: bool,
}

struct GpeBlock {
    config: GpeBlockConfig,
    gpes: Vec<Gpe>,
}

impl GpeBlock {
    fn new(config: GpeBlockConfig) -> GpeBlock {
        let gpes = (0..config.register_count * 8)
            .map(|_| Gpe { state: GpeState::Disabled, kind: GpeKind::None, has_wake_method: false })
            .collect();
        GpeBlock { config, gpes }
    }

    fn contains(&self, number: u16) -> bool {
        number >= self.config.base_number
            && (number as usize) < self.config.base_number as usize + self.config.register_count * 8
    }
}

enum DeferredEvent {
    Notify { target: AmlName, value: u64 },
    Gpe { block: usize, index: usize },
    Fixed(FixedEvent),
}

struct NotifyRegistry {
    per_node: BTreeMap<AmlName, Arc<NotifyHandlerFn>>,
    root: Option<Arc<NotifyHandlerFn>>,
}

/// The event subsystem's state, owned by the `Interpreter`.
pub(crate) struct Events {
    gpe_blocks: Spinlock<Vec<GpeBlock>>,
    fixed_handlers: Spinlock<BTreeMap<FixedEvent, Box<FixedEventHandlerFn>>>,
    notify: Spinlock<NotifyRegistry>,
    pending: Spinlock<VecDeque<DeferredEvent>>,
    /// Taken while draining the pending queue so concurrent drains cannot
    /// reorder per-target Notify delivery.
    drain: Spinlock<()>,
    pm1a_event: Spinlock<Option<Pm1BlockConfig>>,
    pm1b_event: Spinlock<Option<Pm1BlockConfig>>,
    pm1a_control: Spinlock<Option<(u64, RegisterSpace)>>,
    pm1b_control: Spinlock<Option<(u64, RegisterSpace)>>,
    initialized: AtomicBool,
}

impl Events {
    pub(crate) fn new() -> Events {
        Events {
            gpe_blocks: Spinlock::new(Vec::new()),
            fixed_handlers: Spinlock::new(BTreeMap::new()),
            notify: Spinlock::new(NotifyRegistry { per_node: BTreeMap::new(), root: None }),
            pending: Spinlock::new(VecDeque::new()),
            drain: Spinlock::new(()),
            pm1a_event: Spinlock::new(None),
            pm1b_event: Spinlock::new(None),
            pm1a_control: Spinlock::new(None),
            pm1b_control: Spinlock::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    pub(crate) fn queue_notify(&self, target: AmlName, value: u64) {
        self.pending.lock().push_back(DeferredEvent::Notify { target, value });
    }

    fn require_initialized(&self) -> Result<(), AmlError> {
        if self.initialized.load(Ordering::Acquire) { Ok(()) } else { Err(AmlError::NotReady) }
    }
}

impl<H> Interpreter<H>
where
    H: Handler,
{
    /// Bring up the event subsystem: build the GPE blocks, wire `_Lxx`/
    /// `_Exx`/`_Wxx` methods found under `\_GPE`, and remember the fixed-
    /// event registers. Must run after the namespace is loaded.
    pub fn initialize_events(&self, config: EventConfig) -> Result<(), AmlError> {
        self.require_namespace_loaded()?;

        if let Some(facs) = config.facs {
            self.global_lock.set_facs(facs);
        }
        *self.events.pm1a_event.lock() = config.pm1a_event;
        *self.events.pm1b_event.lock() = config.pm1b_event;
        *self.events.pm1a_control.lock() = config.pm1a_control;
        *self.events.pm1b_control.lock() = config.pm1b_control;

        let mut blocks = Vec::new();
        if let Some(gpe0) = config.gpe0 {
            blocks.push(GpeBlock::new(gpe0));
        }
        if let Some(gpe1) = config.gpe1 {
            blocks.push(GpeBlock::new(gpe1));
        }

        /*
         * Scan `\_GPE` for event methods. `_L`/`_E` pick the triggering
         * mode; `_W` marks the event as wake-capable.
         */
        let gpe_scope = AmlName::from_str("\\_GPE").unwrap();
        let mut methods: Vec<(NameSeg, AmlName)> = Vec::new();
        self.namespace.lock().traverse(|name, level| {
            if *name == gpe_scope {
                for (seg, (_, object)) in level.values.iter() {
                    if matches!(**object, Object::Method { .. }) {
                        methods.push((*seg, AmlName::from_name_seg(*seg).resolve(name)?));
                    }
                }
            }
            Ok(*name == AmlName::root() || *name == gpe_scope)
        })?;

        for (seg, path) in methods {
            let bytes = seg.0;
            let Some(number) = parse_gpe_method_name(bytes) else { continue };
            let (kind_char, number) = number;

            let Some(block) = blocks.iter_mut().find(|block| block.contains(number)) else {
                warn!("GPE method {} refers to GPE outside any block", path);
                continue;
            };
            let index = (number - block.config.base_number) as usize;
            match kind_char {
                b'L' | b'E' => {
                    let triggering = if kind_char == b'L' { GpeTriggering::Level } else { GpeTriggering::Edge };
                    block.gpes[index].kind = GpeKind::AmlMethod { method: path, triggering };
                }
                b'W' => block.gpes[index].has_wake_method = true,
                _ => unreachable!(),
            }
        }

        *self.events.gpe_blocks.lock() = blocks;
        self.events.initialized.store(true, Ordering::Release);
        info!("Event subsystem initialized");
        Ok(())
    }

    /// Enable a GPE for runtime use. The event must have an AML method, a
    /// native handler, or implicit-notify targets.
    pub fn enable_gpe(&self, number: u16) -> Result<(), AmlError> {
        self.events.require_initialized()?;
        let mut blocks = self.events.gpe_blocks.lock();
        let (block, index) = find_gpe(&mut blocks, number)?;
        if matches!(block.gpes[index].kind, GpeKind::None) {
            return Err(AmlError::NoGpeHandler(number));
        }
        if block.gpes[index].state == GpeState::Masked {
            return Err(AmlError::InvalidArgument);
        }

        block.gpes[index].state = GpeState::Runtime;
        let config = block.config;
        drop(blocks);
        self.write_gpe_enable(&config, number, true);
        Ok(())
    }

    pub fn disable_gpe(&self, number: u16) -> Result<(), AmlError> {
        self.events.require_initialized()?;
        let mut blocks = self.events.gpe_blocks.lock();
        let (block, index) = find_gpe(&mut blocks, number)?;
        if block.gpes[index].state == GpeState::Runtime || block.gpes[index].state == GpeState::Wake {
            block.gpes[index].state = GpeState::Disabled;
        }
        let config = block.config;
        drop(blocks);
        self.write_gpe_enable(&config, number, false);
        Ok(())
    }

    /// Mark a GPE as wake-capable. Wake GPEs are armed by the sleep path
    /// rather than enabled immediately.
    pub fn enable_gpe_for_wake(&self, number: u16) -> Result<(), AmlError> {
        self.events.require_initialized()?;
        let mut blocks = self.events.gpe_blocks.lock();
        let (block, index) = find_gpe(&mut blocks, number)?;
        block.gpes[index].state = GpeState::Wake;
        Ok(())
    }

    /// Mask a GPE: disable it and refuse re-enabling until unmasked. Used to
    /// quiesce an event that fires pathologically.
    pub fn mask_gpe(&self, number: u16) -> Result<(), AmlError> {
        self.events.require_initialized()?;
        let mut blocks = self.events.gpe_blocks.lock();
        let (block, index) = find_gpe(&mut blocks, number)?;
        block.gpes[index].state = GpeState::Masked;
        let config = block.config;
        drop(blocks);
        self.write_gpe_enable(&config, number, false);
        Ok(())
    }

    pub fn unmask_gpe(&self, number: u16) -> Result<(), AmlError> {
        self.events.require_initialized()?;
        let mut blocks = self.events.gpe_blocks.lock();
        let (block, index) = find_gpe(&mut blocks, number)?;
        if block.gpes[index].state == GpeState::Masked {
            block.gpes[index].state = GpeState::Disabled;
        }
        Ok(())
    }

    /// Install a native handler for a GPE, displacing any `_Lxx`/`_Exx`
    /// method until it is uninstalled.
    pub fn install_gpe_handler<F>(&self, number: u16, triggering: GpeTriggering, handler: F) -> Result<(), AmlError>
    where
        F: Fn(u16) -> InterruptDisposition + Send + Sync + 'static,
    {
        self.events.require_initialized()?;
        let mut blocks = self.events.gpe_blocks.lock();
        let (block, index) = find_gpe(&mut blocks, number)?;

        let previous = match block.gpes[index].kind {
            GpeKind::None | GpeKind::ImplicitNotify { .. } => None,
            GpeKind::AmlMethod { ref method, triggering } => Some((method.clone(), triggering)),
            GpeKind::Native { .. } => return Err(AmlError::AlreadyExists),
        };
        block.gpes[index].kind = GpeKind::Native { triggering, handler: Arc::new(handler), previous };
        Ok(())
    }

    pub fn uninstall_gpe_handler(&self, number: u16) -> Result<(), AmlError> {
        self.events.require_initialized()?;
        let mut blocks = self.events.gpe_blocks.lock();
        let (block, index) = find_gpe(&mut blocks, number)?;

        let previous = match block.gpes[index].kind {
            GpeKind::Native { ref previous, .. } => previous.clone(),
            _ => return Err(AmlError::HandlerNotInstalled),
        };
        block.gpes[index].kind = match previous {
            Some((method, triggering)) => GpeKind::AmlMethod { method, triggering },
            None => GpeKind::None,
        };
        Ok(())
    }

    /// Ask for `device` to receive a `Notify(2)` when the GPE fires without
    /// an AML method to run - the implicit-notify fallback for shared wake
    /// GPEs.
    pub fn add_gpe_implicit_notify(&self, number: u16, device: AmlName) -> Result<(), AmlError> {
        self.events.require_initialized()?;
        let mut blocks = self.events.gpe_blocks.lock();
        let (block, index) = find_gpe(&mut blocks, number)?;

        match block.gpes[index].kind {
            GpeKind::None => {
                block.gpes[index].kind = GpeKind::ImplicitNotify { targets: vec![device] };
                Ok(())
            }
            GpeKind::ImplicitNotify { ref mut targets } => {
                if targets.contains(&device) {
                    return Err(AmlError::AlreadyExists);
                }
                targets.push(device);
                Ok(())
            }
            _ => Err(AmlError::AlreadyExists),
        }
    }

    /// Clear a level-triggered GPE's status and re-enable it, after the
    /// client finished dealing with the event.
    pub fn finish_handling_gpe(&self, number: u16) -> Result<(), AmlError> {
        self.events.require_initialized()?;
        let mut blocks = self.events.gpe_blocks.lock();
        let (block, index) = find_gpe(&mut blocks, number)?;
        let config = block.config;
        let reenable = block.gpes[index].state == GpeState::Runtime;
        drop(blocks);

        self.write_gpe_status_clear(&config, number);
        if reenable {
            self.write_gpe_enable(&config, number, true);
        }
        Ok(())
    }

    pub fn install_fixed_event_handler<F>(&self, event: FixedEvent, handler: F) -> Result<(), AmlError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.require_initialized()?;
        let mut handlers = self.events.fixed_handlers.lock();
        if handlers.contains_key(&event) {
            return Err(AmlError::AlreadyExists);
        }
        handlers.insert(event, Box::new(handler));
        drop(handlers);

        self.write_pm1_enable(event.bit(), true);
        Ok(())
    }

    pub fn uninstall_fixed_event_handler(&self, event: FixedEvent) -> Result<(), AmlError> {
        self.events.require_initialized()?;
        let mut handlers = self.events.fixed_handlers.lock();
        if handlers.remove(&event).is_none() {
            return Err(AmlError::HandlerNotInstalled);
        }
        drop(handlers);

        self.write_pm1_enable(event.bit(), false);
        Ok(())
    }

    /// Install a Notify handler for a node, or for every node when `path` is
    /// the namespace root.
    pub fn install_notify_handler<F>(&self, path: AmlName, handler: F) -> Result<(), AmlError>
    where
        F: Fn(&AmlName, u64) + Send + Sync + 'static,
    {
        let mut notify = self.events.notify.lock();
        if path == AmlName::root() {
            if notify.root.is_some() {
                return Err(AmlError::AlreadyExists);
            }
            notify.root = Some(Arc::new(handler));
        } else {
            if notify.per_node.contains_key(&path) {
                return Err(AmlError::AlreadyExists);
            }
            notify.per_node.insert(path, Arc::new(handler));
        }
        Ok(())
    }

    pub fn uninstall_notify_handler(&self, path: AmlName) -> Result<(), AmlError> {
        let mut notify = self.events.notify.lock();
        if path == AmlName::root() {
            if notify.root.take().is_none() {
                return Err(AmlError::HandlerNotInstalled);
            }
        } else if notify.per_node.remove(&path).is_none() {
            return Err(AmlError::HandlerNotInstalled);
        }
        Ok(())
    }

    /// The GPE half of the SCI handler. Scans every block for active,
    /// enabled events; acks and disables them; and queues their handling for
    /// `complete_pending_events`.
    pub fn gpe_irq(&self) -> InterruptDisposition {
        let mut handled = false;

        let mut work = Vec::new();
        {
            let blocks = self.events.gpe_blocks.lock();
            for (block_index, block) in blocks.iter().enumerate() {
                for register in 0..block.config.register_count {
                    let status = self.read_gpe_register(&block.config, register);
                    let enable = self.read_gpe_register(&block.config, block.config.register_count + register);
                    let mut active = status & enable;
                    while active != 0 {
                        let bit = active.trailing_zeros() as usize;
                        active &= !(1 << bit);

                        let index = register * 8 + bit;
                        let number = block.config.base_number + index as u16;
                        work.push((block_index, index, number, block.config));
                        handled = true;
                    }
                }
            }
        }

        for (block_index, index, number, config) in work {
            trace!("GPE {:#x} fired", number);

            // Keep the event from re-triggering until handling completes
            self.write_gpe_enable(&config, number, false);

            let edge = {
                let blocks = self.events.gpe_blocks.lock();
                match blocks[block_index].gpes[index].kind {
                    GpeKind::AmlMethod { triggering, .. } | GpeKind::Native { triggering, .. } => {
                        triggering == GpeTriggering::Edge
                    }
                    GpeKind::ImplicitNotify { .. } => false,
                    GpeKind::None => {
                        warn!("Spurious GPE {:#x} with no handler; leaving disabled", number);
                        self.write_gpe_status_clear(&config, number);
                        continue;
                    }
                }
            };

            // Edge events are acked before dispatch, level events after
            if edge {
                self.write_gpe_status_clear(&config, number);
            }

            self.events.pending.lock().push_back(DeferredEvent::Gpe { block: block_index, index });
        }

        if handled {
            self.handler.schedule_deferred_work();
            InterruptDisposition::HANDLED
        } else {
            InterruptDisposition::empty()
        }
    }

    /// The fixed-event half of the SCI handler.
    pub fn fixed_event_irq(&self) -> InterruptDisposition {
        let status = Pm1Event::from_bits_truncate(self.read_pm1_status());
        let enable = Pm1Event::from_bits_truncate(self.read_pm1_enable());
        let active = status & enable;

        let mut handled = false;
        for event in FixedEvent::ALL {
            if active.contains(event.bit()) {
                trace!("Fixed event {:?} fired", event);
                self.write_pm1_status_clear(event.bit());
                self.events.pending.lock().push_back(DeferredEvent::Fixed(event));
                handled = true;
            }
        }

        if handled {
            self.handler.schedule_deferred_work();
            InterruptDisposition::HANDLED
        } else {
            InterruptDisposition::empty()
        }
    }

    /// Drain the deferred-event queue: run GPE methods and native handlers,
    /// deliver Notify events, and call fixed-event handlers. The host calls
    /// this from a worker thread after a `schedule_deferred_work` poke.
    pub fn complete_pending_events(&self) {
        // One drainer at a time, so per-target Notify order is preserved
        let Some(_guard) = self.events.drain.try_lock() else { return };

        loop {
            let event = self.events.pending.lock().pop_front();
            let Some(event) = event else { break };

            match event {
                DeferredEvent::Notify { target, value } => {
                    let handler = {
                        let notify = self.events.notify.lock();
                        notify.per_node.get(&target).cloned().or_else(|| notify.root.clone())
                    };
                    match handler {
                        Some(handler) => handler(&target, value),
                        None => trace!("Dropping Notify({}, {:#x}): no handler", target, value),
                    }
                }
                DeferredEvent::Fixed(event) => {
                    if event == FixedEvent::GlobalLockRelease {
                        trace!("Firmware released the global lock");
                    }
                    let handlers = self.events.fixed_handlers.lock();
                    if let Some(handler) = handlers.get(&event) {
                        handler();
                    }
                }
                DeferredEvent::Gpe { block, index } => self.complete_gpe(block, index),
            }
        }
    }

    fn complete_gpe(&self, block_index: usize, index: usize) {
        let (kind, state, config, number) = {
            let blocks = self.events.gpe_blocks.lock();
            let block = &blocks[block_index];
            (
                block.gpes[index].kind.clone(),
                block.gpes[index].state,
                block.config,
                block.config.base_number + index as u16,
            )
        };

        match kind {
            GpeKind::AmlMethod { method, triggering } => {
                match self.invoke_method_if_present(method.clone(), vec![]) {
                    Ok(_) => (),
                    Err(err) => {
                        // A handler we cannot run must not storm; leave the
                        // GPE disabled.
                        warn!("GPE method {} failed: {:?}. GPE {:#x} stays disabled.", method, err, number);
                        return;
                    }
                }
                if triggering == GpeTriggering::Level {
                    self.write_gpe_status_clear(&config, number);
                }
                if state == GpeState::Runtime {
                    self.write_gpe_enable(&config, number, true);
                }
            }
            GpeKind::Native { triggering, handler, .. } => {
                let disposition = handler(number);
                match triggering {
                    GpeTriggering::Edge => {
                        if state == GpeState::Runtime {
                            self.write_gpe_enable(&config, number, true);
                        }
                    }
                    GpeTriggering::Level => {
                        if disposition.contains(InterruptDisposition::REENABLE_GPE) {
                            self.write_gpe_status_clear(&config, number);
                            if state == GpeState::Runtime {
                                self.write_gpe_enable(&config, number, true);
                            }
                        }
                    }
                }
            }
            GpeKind::ImplicitNotify { targets } => {
                /*
                 * The hardware signalled a wake GPE shared between devices;
                 * tell each of them it may have woken the system.
                 */
                const NOTIFY_DEVICE_WAKE: u64 = 0x2;
                for target in targets {
                    self.events.queue_notify(target, NOTIFY_DEVICE_WAKE);
                }
                self.write_gpe_status_clear(&config, number);
                if state == GpeState::Runtime {
                    self.write_gpe_enable(&config, number, true);
                }
            }
            GpeKind::None => (),
        }
    }

    /// Release the global lock, signalling the firmware if it was waiting
    /// for it.
    pub(crate) fn release_global_lock(&self) -> Result<(), AmlError> {
        if self.global_lock.release(&self.handler)? {
            self.signal_global_lock_release();
        }
        Ok(())
    }

    fn signal_global_lock_release(&self) {
        for control in [*self.events.pm1a_control.lock(), *self.events.pm1b_control.lock()].iter().flatten() {
            let (address, space) = *control;
            let value = self.read_raw_u16(address, space) | PM1_CONTROL_GLOBAL_LOCK_RELEASE;
            self.write_raw_u16(address, space, value);
        }
    }

    fn read_gpe_register(&self, config: &GpeBlockConfig, register: usize) -> u8 {
        let address = config.register_base + register as u64;
        match config.space {
            RegisterSpace::SystemIo => self.handler.read_io_u8(address as u16),
            RegisterSpace::SystemMemory => self.handler.read_u8(address as usize),
        }
    }

    fn write_gpe_register(&self, config: &GpeBlockConfig, register: usize, value: u8) {
        let address = config.register_base + register as u64;
        match config.space {
            RegisterSpace::SystemIo => self.handler.write_io_u8(address as u16, value),
            RegisterSpace::SystemMemory => self.handler.write_u8(address as usize, value),
        }
    }

    fn write_gpe_status_clear(&self, config: &GpeBlockConfig, number: u16) {
        let index = (number - config.base_number) as usize;
        // Status bits are write-one-to-clear
        self.write_gpe_register(config, index / 8, 1 << (index % 8));
    }

    fn write_gpe_enable(&self, config: &GpeBlockConfig, number: u16, enabled: bool) {
        let index = (number - config.base_number) as usize;
        let register = config.register_count + index / 8;
        let mut value = self.read_gpe_register(config, register);
        value.set_bit(index % 8, enabled);
        self.write_gpe_register(config, register, value);
    }

    fn read_raw_u16(&self, address: u64, space: RegisterSpace) -> u16 {
        match space {
            RegisterSpace::SystemIo => self.handler.read_io_u16(address as u16),
            RegisterSpace::SystemMemory => self.handler.read_u16(address as usize),
        }
    }

    fn write_raw_u16(&self, address: u64, space: RegisterSpace, value: u16) {
        match space {
            RegisterSpace::SystemIo => self.handler.write_io_u16(address as u16, value),
            RegisterSpace::SystemMemory => self.handler.write_u16(address as usize, value),
        }
    }

    /// Reads of the PM1 grouping OR the `a` and `b` blocks together.
    fn read_pm1_status(&self) -> u16 {
        let mut value = 0;
        for block in [*self.events.pm1a_event.lock(), *self.events.pm1b_event.lock()].iter().flatten() {
            value |= self.read_raw_u16(block.address, block.space);
        }
        value
    }

    fn read_pm1_enable(&self) -> u16 {
        let mut value = 0;
        for block in [*self.events.pm1a_event.lock(), *self.events.pm1b_event.lock()].iter().flatten() {
            let enable_offset = (block.byte_length / 2) as u64;
            value |= self.read_raw_u16(block.address + enable_offset, block.space);
        }
        value
    }

    fn write_pm1_status_clear(&self, bit: Pm1Event) {
        // Write-one-to-clear, mirrored to both blocks
        for block in [*self.events.pm1a_event.lock(), *self.events.pm1b_event.lock()].iter().flatten() {
            self.write_raw_u16(block.address, block.space, bit.bits());
        }
    }

    fn write_pm1_enable(&self, bit: Pm1Event, enabled: bool) {
        for block in [*self.events.pm1a_event.lock(), *self.events.pm1b_event.lock()].iter().flatten() {
            let enable_offset = (block.byte_length / 2) as u64;
            let mut value = self.read_raw_u16(block.address + enable_offset, block.space);
            if enabled {
                value |= bit.bits();
            } else {
                value &= !bit.bits();
            }
            self.write_raw_u16(block.address + enable_offset, block.space, value);
        }
    }
}

fn find_gpe(blocks: &mut [GpeBlock], number: u16) -> Result<(&mut GpeBlock, usize), AmlError> {
    let block = blocks.iter_mut().find(|block| block.contains(number)).ok_or(AmlError::NoSuchGpe(number))?;
    let index = (number - block.config.base_number) as usize;
    Ok((block, index))
}

/// Parse a `_Lxx`/`_Exx`/`_Wxx` GPE method name, returning the kind
/// character and the GPE number.
fn parse_gpe_method_name(bytes: [u8; 4]) -> Option<(u8, u16)> {
    if bytes[0] != b'_' {
        return None;
    }
    if !matches!(bytes[1], b'L' | b'E' | b'W') {
        return None;
    }
    let high = (bytes[2] as char).to_digit(16)?;
    let low = (bytes[3] as char).to_digit(16)?;
    Some((bytes[1], (high * 16 + low) as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpe_method_names() {
        assert_eq!(parse_gpe_method_name(*b"_L02"), Some((b'L', 0x02)));
        assert_eq!(parse_gpe_method_name(*b"_E1F"), Some((b'E', 0x1f)));
        assert_eq!(parse_gpe_method_name(*b"_W0A"), Some((b'W', 0x0a)));
        assert_eq!(parse_gpe_method_name(*b"_CRS"), None);
        assert_eq!(parse_gpe_method_name(*b"XL02"), None);
    }
}
