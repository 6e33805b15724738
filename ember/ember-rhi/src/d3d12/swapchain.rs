//! DXGI swapchain.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use windows::core::Interface;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::ID3D12Resource;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::{
    Format, Image, ImageInfo, ImageUsage, ResourceId, ResourceState, RhiError, RhiResult,
    Semaphore, StateCell, Swapchain, SwapchainInfo,
};

use super::{format_to_dxgi, win_err, D3d12Device, DescriptorArena};

/// Clones of the device handles the swapchain needs after creation.
struct DeviceHandles {
    device: windows::Win32::Graphics::Direct3D12::ID3D12Device,
    queue: windows::Win32::Graphics::Direct3D12::ID3D12CommandQueue,
    rtv_arena: Arc<DescriptorArena>,
    fence: windows::Win32::Graphics::Direct3D12::ID3D12Fence,
    next_value: AtomicU64,
}

impl DeviceHandles {
    fn new(device: &D3d12Device) -> RhiResult<Self> {
        let fence = unsafe {
            device
                .device
                .CreateFence(0, windows::Win32::Graphics::Direct3D12::D3D12_FENCE_FLAG_NONE)
                .map_err(win_err)?
        };
        Ok(DeviceHandles {
            device: device.device.clone(),
            queue: device.queue.clone(),
            rtv_arena: Arc::clone(&device.rtv_arena),
            fence,
            next_value: AtomicU64::new(1),
        })
    }

    fn wait_idle(&self) -> RhiResult<()> {
        use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};
        let value = self.next_value.fetch_add(1, Ordering::Relaxed);
        unsafe {
            self.queue.Signal(&self.fence, value).map_err(win_err)?;
            if self.fence.GetCompletedValue() < value {
                let event = CreateEventW(None, false, false, None).map_err(win_err)?;
                self.fence
                    .SetEventOnCompletion(value, event)
                    .map_err(win_err)?;
                WaitForSingleObject(event, INFINITE);
                let _ = windows::Win32::Foundation::CloseHandle(event);
            }
        }
        Ok(())
    }
}

pub struct D3d12SwapchainImage {
    pub(crate) resource: ID3D12Resource,
    pub(crate) rtv_index: u32,
    info: ImageInfo,
    state: StateCell,
    id: ResourceId,
}

unsafe impl Send for D3d12SwapchainImage {}
unsafe impl Sync for D3d12SwapchainImage {}

impl std::fmt::Debug for D3d12SwapchainImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12SwapchainImage")
            .field("id", &self.id)
            .finish()
    }
}

impl Image for D3d12SwapchainImage {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn resource_state(&self) -> ResourceState {
        self.state.get()
    }

    fn set_resource_state(&self, state: ResourceState) {
        self.state.set(state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d12Swapchain {
    device: DeviceHandles,
    swapchain: IDXGISwapChain3,
    images: Vec<Arc<D3d12SwapchainImage>>,
    extent: (u32, u32),
    format: Format,
    vsync: bool,
    next_image_id: AtomicU64,
}

unsafe impl Send for D3d12Swapchain {}
unsafe impl Sync for D3d12Swapchain {}

pub(crate) fn create_swapchain(
    device: &D3d12Device,
    info: &SwapchainInfo,
) -> RhiResult<Box<dyn Swapchain>> {
    let hwnd = device
        .hwnd
        .ok_or_else(|| RhiError::invalid_argument("device was created without a window"))?;
    let desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: info.width,
        Height: info.height,
        Format: format_to_dxgi(non_srgb(info.format)),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: info.min_image_count.max(2),
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
        ..Default::default()
    };
    let swapchain1 = unsafe {
        device
            .factory
            .CreateSwapChainForHwnd(&device.queue, HWND(hwnd as _), &desc, None, None)
            .map_err(win_err)?
    };
    let swapchain: IDXGISwapChain3 = swapchain1.cast().map_err(win_err)?;

    let mut result = D3d12Swapchain {
        device: DeviceHandles::new(device)?,
        swapchain,
        images: Vec::new(),
        extent: (info.width, info.height),
        format: info.format,
        vsync: info.vsync,
        next_image_id: AtomicU64::new(1 << 32),
    };
    result.rebuild_views(desc.BufferCount)?;
    Ok(Box::new(result))
}

/// The swapchain itself is created non-sRGB; the RTV applies the sRGB view.
fn non_srgb(format: Format) -> Format {
    match format {
        Format::B8G8R8A8Srgb => Format::B8G8R8A8Unorm,
        Format::R8G8B8A8Srgb => Format::R8G8B8A8Unorm,
        other => other,
    }
}

impl D3d12Swapchain {
    fn rebuild_views(&mut self, count: u32) -> RhiResult<()> {
        self.images.clear();
        for i in 0..count {
            let resource: ID3D12Resource =
                unsafe { self.swapchain.GetBuffer(i) }.map_err(win_err)?;
            let rtv_index = self.device.rtv_arena.allocate(1)?;
            unsafe {
                self.device.device.CreateRenderTargetView(
                    &resource,
                    None,
                    self.device.rtv_arena.cpu_at(rtv_index),
                );
            }
            self.images.push(Arc::new(D3d12SwapchainImage {
                resource,
                rtv_index,
                info: ImageInfo {
                    label: Some("swapchain image"),
                    width: self.extent.0,
                    height: self.extent.1,
                    format: self.format,
                    usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_DST,
                    ..Default::default()
                },
                state: StateCell::new(ResourceState::Undefined),
                id: self.next_image_id.fetch_add(1, Ordering::Relaxed),
            }));
        }
        Ok(())
    }

    pub(crate) fn present(&self) -> RhiResult<()> {
        let interval = if self.vsync { 1 } else { 0 };
        let result = unsafe { self.swapchain.Present(interval, DXGI_PRESENT(0)) };
        if result == DXGI_ERROR_DEVICE_REMOVED || result == DXGI_ERROR_DEVICE_RESET {
            return Err(RhiError::DeviceLost);
        }
        if result.is_err() {
            return Err(RhiError::Backend(format!("{result:?}")));
        }
        Ok(())
    }
}

impl std::fmt::Debug for D3d12Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Swapchain")
            .field("extent", &self.extent)
            .field("image_count", &self.images.len())
            .finish()
    }
}

impl Swapchain for D3d12Swapchain {
    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn format(&self) -> Format {
        self.format
    }

    fn image(&self, index: u32) -> Arc<dyn Image> {
        Arc::clone(&self.images[index as usize]) as Arc<dyn Image>
    }

    fn acquire_next_image(&mut self, _signal_semaphore: &dyn Semaphore) -> RhiResult<u32> {
        Ok(unsafe { self.swapchain.GetCurrentBackBufferIndex() })
    }

    fn resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        self.device.wait_idle()?;
        let count = self.images.len() as u32;
        self.images.clear();
        unsafe {
            self.swapchain
                .ResizeBuffers(
                    count,
                    width,
                    height,
                    format_to_dxgi(non_srgb(self.format)),
                    DXGI_SWAP_CHAIN_FLAG(0),
                )
                .map_err(win_err)?;
        }
        self.extent = (width, height);
        self.rebuild_views(count)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
