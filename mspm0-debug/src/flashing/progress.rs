use std::time::Duration;

/// A structure to manage the erase procedure progress reporting.
///
/// This struct stores a handler closure which will be called everytime an event happens
/// during a mass erase.
///
/// # Example
///
/// ```
/// use mspm0_debug::flashing::FlashProgress;
///
/// // Print events
/// let progress = FlashProgress::new(|event| println!("Event: {:#?}", event));
/// ```
pub struct FlashProgress {
    handler: Box<dyn Fn(ProgressEvent)>,
}

impl FlashProgress {
    /// Create a new `FlashProgress` structure with a given `handler` to be called on events.
    pub fn new(handler: impl Fn(ProgressEvent) + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }

    /// A progress handler that drops every event.
    pub fn empty() -> Self {
        Self::new(|_| {})
    }

    /// Emit a progress event.
    fn emit(&self, event: ProgressEvent) {
        (self.handler)(event);
    }

    pub(super) fn started_mass_erase(&self) {
        self.emit(ProgressEvent::StartedMassErase);
    }

    pub(super) fn bank_started(&self, address: u64, size: u32) {
        self.emit(ProgressEvent::BankStarted { address, size });
    }

    /// Signalize that the status register was polled once while waiting for a bank erase.
    pub(super) fn polled(&self) {
        self.emit(ProgressEvent::Polled);
    }

    pub(super) fn bank_finished(&self, address: u64, size: u32, passed: bool, time: Duration) {
        self.emit(ProgressEvent::BankFinished {
            address,
            size,
            passed,
            time,
        });
    }

    pub(super) fn finished_mass_erase(&self) {
        self.emit(ProgressEvent::FinishedMassErase);
    }

    pub(super) fn failed_mass_erase(&self) {
        self.emit(ProgressEvent::FailedMassErase);
    }
}

/// Possible events during a mass erase.
///
/// If erasing works without problems, the events will arrive in the following order:
///
/// * `StartedMassErase`
/// * For every bank: `BankStarted`, `Polled` for every status poll, `BankFinished`
/// * `FinishedMassErase`
///
/// If a bank fails, the remaining banks of the same region are still erased and the
/// sequence ends with `FailedMassErase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The mass erase has started.
    StartedMassErase,
    /// A bank erase command is about to be issued.
    BankStarted {
        /// Start address of the bank.
        address: u64,
        /// Size of the bank in bytes.
        size: u32,
    },
    /// The status register was polled while a bank erase was running.
    Polled,
    /// A bank erase has completed.
    BankFinished {
        /// Start address of the bank.
        address: u64,
        /// Size of the bank in bytes.
        size: u32,
        /// Whether the controller reported success.
        passed: bool,
        /// The time the bank erase took.
        time: Duration,
    },
    /// All regions were erased successfully.
    FinishedMassErase,
    /// At least one bank failed to erase.
    FailedMassErase,
}
