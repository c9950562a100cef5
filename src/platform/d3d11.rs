use windows::Graphics::DirectX::Direct3D11::{IDirect3DDevice, IDirect3DSurface};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_9_1, D3D_FEATURE_LEVEL_9_2,
    D3D_FEATURE_LEVEL_9_3, D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0,
    D3D_FEATURE_LEVEL_11_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION, D3D11CreateDevice, ID3D11Device,
    ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::{IDXGIDevice, IDXGISurface};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, CreateDirect3D11SurfaceFromDXGISurface,
    IDirect3DDxgiInterfaceAccess,
};
use windows::core::Interface;

use super::Error;

/// To share DirectX structs between threads.
pub struct SendDirectX<T>(pub T);

impl<T> SendDirectX<T> {
    #[must_use]
    #[inline]
    pub const fn new(device: T) -> Self {
        Self(device)
    }
}

#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl<T> Send for SendDirectX<T> {}

/// Creates an `ID3D11Device` and its immediate context.
///
/// # Errors
///
/// Returns [`Error::FeatureLevelNotSatisfied`] when the hardware device doesn't reach
/// feature level 11.1.
pub fn create_d3d_device() -> Result<(ID3D11Device, ID3D11DeviceContext), Error> {
    let feature_flags = [
        D3D_FEATURE_LEVEL_11_1,
        D3D_FEATURE_LEVEL_11_0,
        D3D_FEATURE_LEVEL_10_1,
        D3D_FEATURE_LEVEL_10_0,
        D3D_FEATURE_LEVEL_9_3,
        D3D_FEATURE_LEVEL_9_2,
        D3D_FEATURE_LEVEL_9_1,
    ];

    let mut d3d_device = None;
    let mut feature_level = D3D_FEATURE_LEVEL::default();
    let mut d3d_device_context = None;
    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            HMODULE::default(),
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&feature_flags),
            D3D11_SDK_VERSION,
            Some(&mut d3d_device),
            Some(&mut feature_level),
            Some(&mut d3d_device_context),
        )?;
    };

    if feature_level != D3D_FEATURE_LEVEL_11_1 {
        return Err(Error::FeatureLevelNotSatisfied);
    }

    Ok((d3d_device.ok_or(Error::NoDevice)?, d3d_device_context.ok_or(Error::NoDevice)?))
}

/// Wraps an `ID3D11Device` as the WinRT `IDirect3DDevice` capture APIs take.
///
/// # Errors
///
/// Fails when the device isn't backed by DXGI.
pub fn create_direct3d_device(d3d_device: &ID3D11Device) -> Result<IDirect3DDevice, Error> {
    let dxgi_device: IDXGIDevice = d3d_device.cast()?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device)? };
    let device: IDirect3DDevice = inspectable.cast()?;

    Ok(device)
}

/// The `ID3D11Device` behind a WinRT `IDirect3DDevice`.
pub(crate) fn d3d_device_of(device: &IDirect3DDevice) -> Result<ID3D11Device, Error> {
    let access: IDirect3DDxgiInterfaceAccess = device.cast()?;
    Ok(unsafe { access.GetInterface::<ID3D11Device>()? })
}

/// The texture behind a WinRT `IDirect3DSurface`.
pub(crate) fn texture_of(surface: &IDirect3DSurface) -> Result<ID3D11Texture2D, Error> {
    let access: IDirect3DDxgiInterfaceAccess = surface.cast()?;
    Ok(unsafe { access.GetInterface::<ID3D11Texture2D>()? })
}

/// Wraps a texture as a WinRT `IDirect3DSurface`.
pub(crate) fn surface_of(texture: &ID3D11Texture2D) -> Result<IDirect3DSurface, Error> {
    let dxgi_surface: IDXGISurface = texture.cast()?;
    let inspectable = unsafe { CreateDirect3D11SurfaceFromDXGISurface(&dxgi_surface)? };
    Ok(inspectable.cast()?)
}
