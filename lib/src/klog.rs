//! Kernel logging subsystem.
//!
//! All kernel log output funnels through a single **backend** function pointer.
//! Until the console driver registers itself, records are forwarded to the
//! [`log`] facade so hosted builds and unit tests see them through whatever
//! logger the harness installed.
//!
//! # Backend contract
//!
//! The backend receives the level and the pre-formatted arguments for a
//! **single log line** and must write it without interleaving with other
//! lines.  It appends its own trailing newline.
//!
//! # Registration
//!
//! ```ignore
//! kestrel_lib::klog::klog_register_backend(my_backend_fn);
//! ```

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

// ---------------------------------------------------------------------------
// Log levels
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl KlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => KlogLevel::Error,
            1 => KlogLevel::Warn,
            2 => KlogLevel::Info,
            3 => KlogLevel::Debug,
            _ => KlogLevel::Trace,
        }
    }

    const fn as_log_level(self) -> log::Level {
        match self {
            KlogLevel::Error => log::Level::Error,
            KlogLevel::Warn => log::Level::Warn,
            KlogLevel::Info => log::Level::Info,
            KlogLevel::Debug => log::Level::Debug,
            KlogLevel::Trace => log::Level::Trace,
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);

#[inline(always)]
fn is_enabled(level: KlogLevel) -> bool {
    level as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Backend dispatch
// ---------------------------------------------------------------------------

/// Signature of a klog backend.
pub type KlogBackend = fn(KlogLevel, fmt::Arguments<'_>);

/// Stored as a raw pointer; `null` means "forward to the `log` facade".
static BACKEND: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

fn facade_backend(level: KlogLevel, args: fmt::Arguments<'_>) {
    log::log!(target: "kestrel", level.as_log_level(), "{}", args);
}

#[inline]
fn dispatch(level: KlogLevel, args: fmt::Arguments<'_>) {
    let ptr = BACKEND.load(Ordering::Acquire);
    if ptr.is_null() {
        facade_backend(level, args);
    } else {
        // SAFETY: `klog_register_backend` only stores valid `KlogBackend` fn
        // pointers, which have the same size as `*mut ()`.
        let backend: KlogBackend = unsafe { core::mem::transmute::<*mut (), KlogBackend>(ptr) };
        backend(level, args);
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Register a backend that replaces the `log` facade forwarding.
pub fn klog_register_backend(backend: KlogBackend) {
    BACKEND.store(backend as *mut (), Ordering::Release);
}

pub fn klog_set_level(level: KlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn klog_get_level() -> KlogLevel {
    KlogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

pub fn klog_is_enabled(level: KlogLevel) -> bool {
    is_enabled(level)
}

/// Emit a formatted log line at the given level.
///
/// Callers should **not** include a trailing newline.
pub fn log_args(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !is_enabled(level) {
        return;
    }
    dispatch(level, args);
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::klog::log_args($level, ::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Error, $($arg)*) };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Info, $($arg)*) };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Trace, $($arg)*) };
}
