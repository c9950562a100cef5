use windows::Win32::Foundation::S_FALSE;
use windows::Win32::System::Com::{CO_MTA_USAGE_COOKIE, CoDecrementMTAUsage, CoIncrementMTAUsage};
use windows::Win32::System::WinRT::{RO_INIT_MULTITHREADED, RoInitialize, RoUninitialize};

use super::Error;

/// Keeps the process MTA alive while held.
struct WinMTACookie {
    cookie: CO_MTA_USAGE_COOKIE,
}

impl WinMTACookie {
    fn new() -> Result<Self, Error> {
        Ok(Self { cookie: unsafe { CoIncrementMTAUsage() }? })
    }
}

impl Drop for WinMTACookie {
    fn drop(&mut self) {
        let _ = unsafe { CoDecrementMTAUsage(self.cookie) };
    }
}

/// WinRT initialization for the current thread, undone on drop.
///
/// Every thread that drives transcoding holds one, since the encode may run on a thread
/// the crate spawned.
pub struct WinRT {
    _cookie: WinMTACookie,
}

impl WinRT {
    /// Initializes WinRT APIs on the current thread in the multithreaded apartment.
    ///
    /// # Errors
    ///
    /// Fails when the thread is already initialized into an incompatible apartment.
    pub fn new() -> Result<Self, Error> {
        let cookie = WinMTACookie::new()?;

        if let Err(e) = unsafe { RoInitialize(RO_INIT_MULTITHREADED) }
            && e.code() != S_FALSE
        {
            return Err(e.into());
        }

        Ok(Self { _cookie: cookie })
    }
}

impl Drop for WinRT {
    fn drop(&mut self) {
        unsafe { RoUninitialize() };
    }
}
