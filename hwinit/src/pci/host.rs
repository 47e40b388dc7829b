//! Boot-flow entry: the platform ECAM window and the one-shot walk.
//!
//! The boot sequence registers the ECAM base once, then calls
//! [`enumerate_host`] during hardware bring-up. After that returns, BAR and
//! bridge-window values in configuration space are stable; this layer never
//! touches them again.

use spin::Once;

use super::access::EcamAccess;
use super::alloc::{EnumError, HostWindows, Result};
use super::scan::{enumerate, EnumSummary};

static HOST_ECAM: Once<EcamAccess> = Once::new();

/// Register the platform's ECAM window. Later calls are ignored.
///
/// # Safety
///
/// Same contract as [`EcamAccess::new`]: `base` must map the full ECAM
/// region for every bus that will be walked.
pub unsafe fn init_host_ecam(base: *mut u8) {
    HOST_ECAM.call_once(|| unsafe { EcamAccess::new(base) });
}

/// The registered ECAM accessor, if any.
pub fn host_ecam() -> Option<&'static EcamAccess> {
    HOST_ECAM.get()
}

/// Walk the hierarchy behind the registered ECAM window with the default
/// host windows. Invoked once during bring-up.
pub fn enumerate_host() -> Result<EnumSummary> {
    let access = HOST_ECAM.get().ok_or(EnumError::NoHostAccess)?;
    enumerate(access, &HostWindows::default())
}
