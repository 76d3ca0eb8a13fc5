//! The signal bus: a one-way typed event channel from any stage to an
//! external observer (a monitoring sidecar, a CLI status line, a log
//! shipper). Every significant state change in the pipeline emits one of
//! these, carrying a human-readable message alongside its kind.

use std::sync::mpsc::{self, Receiver, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    InputSignalLocked,
    NoInputSignal,
    Scte35Start,
    Scte35End,
    Scte35Triggered,
    Scte35DropMessage,
    FrameVideoFiller,
    FrameAudioFiller,
    FrameRepeat,
    InsertSilence,
    DropAudio,
    DropVideoFrame,
    HighCpu,
    DecodeError,
    ParseEncodeError,
    ErrorAvSync,
    ErrorNalPool,
    ErrorMsgPool,
    ErrorRawPool,
    ErrorCpu,
    ErrorIp,
    ErrorUnknown,
    ServiceRestart,
    MalformedData,
}

impl SignalKind {
    /// Whether this kind represents a fatal, process-terminating condition.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            SignalKind::ErrorAvSync
                | SignalKind::ErrorNalPool
                | SignalKind::ErrorMsgPool
                | SignalKind::ErrorRawPool
                | SignalKind::ErrorCpu
                | SignalKind::ErrorIp
                | SignalKind::ErrorUnknown
        )
    }

    /// Whether this kind represents a soft, subsystem-level restart.
    pub fn is_soft_restart(self) -> bool {
        matches!(self, SignalKind::ServiceRestart)
    }
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub kind: SignalKind,
    pub message: String,
}

impl Signal {
    pub fn new(kind: SignalKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Emit at the severity the kind implies: `warn` for recoverable
    /// conditions, `error` for soft restarts and fatal conditions.
    pub fn log(&self) {
        if self.kind.is_fatal() {
            tracing::error!(kind = ?self.kind, message = %self.message, "fatal signal");
        } else if self.kind.is_soft_restart() {
            tracing::error!(kind = ?self.kind, message = %self.message, "soft restart");
        } else {
            tracing::warn!(kind = ?self.kind, message = %self.message, "signal");
        }
    }
}

/// The writer half, cloned into every stage.
#[derive(Clone)]
pub struct SignalBus {
    tx: Sender<Signal>,
}

impl SignalBus {
    pub fn channel() -> (SignalBus, SignalReceiver) {
        let (tx, rx) = mpsc::channel();
        (SignalBus { tx }, SignalReceiver { rx })
    }

    /// Emit a signal. Also logs it at the severity its kind implies. Never
    /// blocks; a disconnected receiver (observer shut down) is silently
    /// dropped rather than propagated, since losing the observer must never
    /// take down a pipeline stage.
    pub fn emit(&self, kind: SignalKind, message: impl Into<String>) {
        let signal = Signal::new(kind, message);
        signal.log();
        let _ = self.tx.send(signal);
    }
}

pub struct SignalReceiver {
    rx: Receiver<Signal>,
}

impl SignalReceiver {
    pub fn try_recv(&self) -> Option<Signal> {
        self.rx.try_recv().ok()
    }

    pub fn recv(&self) -> Option<Signal> {
        self.rx.recv().ok()
    }
}
