//! Capture items for monitors and windows.

use windows::Graphics::Capture::GraphicsCaptureItem;
use windows::Win32::Foundation::{HWND, POINT};
use windows::Win32::Graphics::Gdi::{HMONITOR, MONITOR_DEFAULTTOPRIMARY, MonitorFromPoint};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::UI::WindowsAndMessaging::GetForegroundWindow;

use super::Error;

/// # Errors
///
/// Fails when the monitor handle is invalid or capture is unavailable.
pub fn item_for_monitor(monitor: HMONITOR) -> Result<GraphicsCaptureItem, Error> {
    let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()?;
    Ok(unsafe { interop.CreateForMonitor(monitor)? })
}

/// # Errors
///
/// Fails when the window handle is invalid or the window can't be captured.
pub fn item_for_window(window: HWND) -> Result<GraphicsCaptureItem, Error> {
    let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()?;
    Ok(unsafe { interop.CreateForWindow(window)? })
}

/// The monitor that contains the origin of the virtual desktop.
///
/// # Errors
///
/// Fails when capture is unavailable.
pub fn primary_monitor() -> Result<GraphicsCaptureItem, Error> {
    let monitor = unsafe { MonitorFromPoint(POINT { x: 0, y: 0 }, MONITOR_DEFAULTTOPRIMARY) };
    item_for_monitor(monitor)
}

/// The window that currently has focus.
///
/// # Errors
///
/// Returns [`Error::NoForegroundWindow`] when no window has focus.
pub fn foreground_window() -> Result<GraphicsCaptureItem, Error> {
    let window = unsafe { GetForegroundWindow() };
    if window.is_invalid() {
        return Err(Error::NoForegroundWindow);
    }

    item_for_window(window)
}
