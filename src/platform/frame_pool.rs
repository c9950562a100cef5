//! Video frames from a free-threaded Graphics Capture frame pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, trace};
use parking_lot::{Condvar, Mutex};
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{
    Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::{IDirect3DDevice, IDirect3DSurface};
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_BOX, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_DEFAULT, ID3D11Device, ID3D11DeviceContext,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::core::IInspectable;

use super::Error;
use super::d3d11::{SendDirectX, d3d_device_of, surface_of, texture_of};
use crate::clock;
use crate::frame::{MediaFrame, VideoFrameSource};
use crate::time::MediaTime;

const BUFFER_COUNT: i32 = 2;

/// A captured frame, copied out of the frame pool into its own surface.
pub struct CapturedFrame {
    surface: SendDirectX<IDirect3DSurface>,
    timestamp: MediaTime,
    content_size: SizeInt32,
}

impl CapturedFrame {
    /// Size of the captured content, which may differ from the surface size.
    #[must_use]
    #[inline]
    pub const fn content_size(&self) -> SizeInt32 {
        self.content_size
    }
}

impl MediaFrame for CapturedFrame {
    type Data = SendDirectX<IDirect3DSurface>;

    fn timestamp(&self) -> MediaTime {
        self.timestamp
    }

    fn duration(&self) -> MediaTime {
        MediaTime::ZERO
    }

    fn data(&self) -> Self::Data {
        SendDirectX::new(self.surface.0.clone())
    }
}

struct Slot {
    // Latest frame not yet pulled. Older ones are returned to the pool unread.
    frame: Option<SendDirectX<Direct3D11CaptureFrame>>,
    closed: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    condvar: Condvar,
}

impl Shared {
    fn close(&self) {
        let stale = {
            let mut slot = self.slot.lock();
            slot.closed = true;
            slot.frame.take()
        };
        if let Some(frame) = stale {
            let _ = frame.0.Close();
        }
        self.condvar.notify_all();
    }
}

// Copies pool surfaces into fresh textures of the target size.
struct SurfaceCopier {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    target_size: SizeInt32,
}

impl SurfaceCopier {
    fn copy(&self, source: &IDirect3DSurface, content_size: SizeInt32) -> Result<IDirect3DSurface, Error> {
        let width = u32::try_from(self.target_size.Width).unwrap_or(0);
        let height = u32::try_from(self.target_size.Height).unwrap_or(0);

        let texture_desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };

        let mut texture = None;
        unsafe { self.device.CreateTexture2D(&texture_desc, None, Some(&mut texture))? };
        let texture = texture.ok_or(Error::NoDevice)?;

        // Content smaller than the target leaves black borders.
        let mut render_target = None;
        unsafe { self.device.CreateRenderTargetView(&texture, None, Some(&mut render_target))? };
        if let Some(render_target) = render_target {
            unsafe { self.context.ClearRenderTargetView(&render_target, &[0.0, 0.0, 0.0, 1.0]) };
        }

        let region = D3D11_BOX {
            left: 0,
            top: 0,
            front: 0,
            right: u32::try_from(content_size.Width).unwrap_or(0).min(width),
            bottom: u32::try_from(content_size.Height).unwrap_or(0).min(height),
            back: 1,
        };
        let source = texture_of(source)?;
        unsafe {
            self.context.CopySubresourceRegion(&texture, 0, 0, 0, 0, &source, 0, Some(&region));
        }

        surface_of(&texture)
    }
}

/// [`VideoFrameSource`] over `Direct3D11CaptureFramePool`.
///
/// Frames are stamped with their `SystemRelativeTime` placed on the process clock.
/// Frames arriving faster than they're pulled are dropped, only the newest is kept.
pub struct FramePoolSource {
    shared: Arc<Shared>,
    copier: Mutex<SendDirectX<SurfaceCopier>>,
    frame_pool: SendDirectX<Direct3D11CaptureFramePool>,
    session: SendDirectX<GraphicsCaptureSession>,
    item: SendDirectX<GraphicsCaptureItem>,
    frame_arrived: i64,
    item_closed: i64,
    closed: AtomicBool,
}

// The capture objects are agile and only touched by `close`, which runs once. The
// device context is only reached through `copier`.
unsafe impl Sync for FramePoolSource {}

impl FramePoolSource {
    /// Creates the frame pool for `item` and starts capturing.
    ///
    /// # Errors
    ///
    /// Fails when the device isn't DXGI backed or the frame pool can't be created.
    pub fn new(device: &IDirect3DDevice, item: &GraphicsCaptureItem, target_size: SizeInt32) -> Result<Self, Error> {
        let d3d_device = d3d_device_of(device)?;
        let context = unsafe { d3d_device.GetImmediateContext()? };

        let item_size = item.Size()?;
        trace!("Creating frame pool for {}x{} content", item_size.Width, item_size.Height);
        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            device,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            BUFFER_COUNT,
            item_size,
        )?;
        let session = frame_pool.CreateCaptureSession(item)?;

        let shared = Arc::new(Shared { slot: Mutex::new(Slot { frame: None, closed: false }), condvar: Condvar::new() });

        let item_closed = item.Closed(&TypedEventHandler::<GraphicsCaptureItem, IInspectable>::new({
            let shared = shared.clone();
            move |_, _| {
                info!("Capture item closed");
                shared.close();
                Ok(())
            }
        }))?;

        let frame_arrived = frame_pool.FrameArrived(&TypedEventHandler::<Direct3D11CaptureFramePool, IInspectable>::new({
            let shared = shared.clone();
            let device = SendDirectX::new(device.clone());
            let last_size = Mutex::new(item_size);
            move |frame_pool, _| {
                let Some(frame_pool) = frame_pool.as_ref() else {
                    return Ok(());
                };
                let frame = frame_pool.TryGetNextFrame()?;

                let content_size = frame.ContentSize()?;
                {
                    let mut last_size = last_size.lock();
                    if content_size != *last_size {
                        info!(
                            "Size changed from {}x{} to {}x{}, recreating frame pool",
                            last_size.Width, last_size.Height, content_size.Width, content_size.Height,
                        );
                        frame_pool.Recreate(
                            &device.0,
                            DirectXPixelFormat::B8G8R8A8UIntNormalized,
                            BUFFER_COUNT,
                            content_size,
                        )?;
                        *last_size = content_size;
                    }
                }

                let stale = {
                    let mut slot = shared.slot.lock();
                    if slot.closed {
                        Some(SendDirectX::new(frame))
                    } else {
                        slot.frame.replace(SendDirectX::new(frame))
                    }
                };
                if let Some(stale) = stale {
                    trace!("Dropping an unread capture frame");
                    let _ = stale.0.Close();
                }
                shared.condvar.notify_one();

                Ok(())
            }
        }))?;

        session.StartCapture()?;
        debug!("Capture started");

        Ok(Self {
            shared,
            copier: Mutex::new(SendDirectX::new(SurfaceCopier { device: d3d_device, context, target_size })),
            frame_pool: SendDirectX::new(frame_pool),
            session: SendDirectX::new(session),
            item: SendDirectX::new(item.clone()),
            frame_arrived,
            item_closed,
            closed: AtomicBool::new(false),
        })
    }

    fn copy_frame(&self, frame: &Direct3D11CaptureFrame) -> Result<CapturedFrame, Error> {
        let timestamp = clock::from_system_relative(frame.SystemRelativeTime()?.Duration);
        let content_size = frame.ContentSize()?;
        let surface = self.copier.lock().0.copy(&frame.Surface()?, content_size)?;

        Ok(CapturedFrame { surface: SendDirectX::new(surface), timestamp, content_size })
    }
}

impl VideoFrameSource for FramePoolSource {
    type Frame = CapturedFrame;
    type Error = Error;

    fn wait_for_next_frame(&self) -> Result<Option<CapturedFrame>, Error> {
        let frame = {
            let mut slot = self.shared.slot.lock();
            loop {
                if slot.closed {
                    return Ok(None);
                }
                if let Some(frame) = slot.frame.take() {
                    break frame.0;
                }
                self.shared.condvar.wait(&mut slot);
            }
        };

        // The pool buffer goes back before any error is reported.
        let copied = self.copy_frame(&frame);
        let _ = frame.Close();

        copied.map(Some)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Closing capture session");
        self.shared.close();
        let _ = self.frame_pool.0.RemoveFrameArrived(self.frame_arrived);
        let _ = self.item.0.RemoveClosed(self.item_closed);
        let _ = self.session.0.Close();
        let _ = self.frame_pool.0.Close();
    }
}

impl Drop for FramePoolSource {
    fn drop(&mut self) {
        self.close();
    }
}
