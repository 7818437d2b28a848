//! The process-lifetime device registry (spec.md §4.2): enumerates
//! Feitian devices across both transports, and owns at most one open
//! handle at a time. The "at most one open" invariant lives in this
//! type's `&mut self` methods, not in caller discipline — `open` refuses
//! a second device outright and `close` is the only way back to `None`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Feitian Technologies' USB vendor id.
pub const FEITIAN_VENDOR_ID: u16 = 0x096E;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum TransportKind {
    Hid,
    Ccid,
}

/// An opaque, platform-specific path identifying a device to its own
/// transport's open call — a HID device path on HID entries, a PC/SC
/// reader name on CCID entries.
#[derive(Clone, Debug)]
pub enum DevicePath {
    Hid(std::ffi::CString),
    Ccid(String),
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceDescriptor {
    pub id: String,
    #[serde(rename = "deviceType")]
    pub device_type: TransportKind,
    #[serde(rename = "vendorId")]
    pub vendor_id: u16,
    #[serde(rename = "productId")]
    pub product_id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip)]
    pub path: DevicePath,
}

pub enum OpenHandle {
    Hid(sk_transport_hid::HidTransport),
    Ccid(sk_transport_ccid::CcidTransport),
}

impl OpenHandle {
    pub fn as_hid(&self) -> Result<&sk_transport_hid::HidTransport, AgentError> {
        match self {
            OpenHandle::Hid(hid) => Ok(hid),
            OpenHandle::Ccid(_) => Err(AgentError::DeviceTypeMismatch("HID")),
        }
    }

    pub fn as_ccid_mut(&mut self) -> Result<&mut sk_transport_ccid::CcidTransport, AgentError> {
        match self {
            OpenHandle::Ccid(card) => Ok(card),
            OpenHandle::Hid(_) => Err(AgentError::DeviceTypeMismatch("CCID")),
        }
    }
}

/// Holds the HID API and PC/SC context for the life of the process, plus
/// at most one open device at a time.
pub struct DeviceRegistry {
    hid_api: Option<hidapi::HidApi>,
    pcsc_context: Option<pcsc::Context>,
    open: Option<(String, OpenHandle)>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let hid_api = match hidapi::HidApi::new() {
            Ok(api) => Some(api),
            Err(e) => {
                warn!("HID subsystem unavailable: {e}");
                None
            }
        };
        let pcsc_context = match pcsc::Context::establish(pcsc::Scope::User) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                warn!("PC/SC subsystem unavailable: {e}");
                None
            }
        };
        Self {
            hid_api,
            pcsc_context,
            open: None,
        }
    }

    pub fn has_any_subsystem(&self) -> bool {
        self.hid_api.is_some() || self.pcsc_context.is_some()
    }

    /// `listDevices`: union of HID devices and PC/SC readers filtered to
    /// the Feitian vendor id, each assigned a stable id for this
    /// enumeration (spec.md §4.2 — sorted by path hash / reader name,
    /// then index, so repeat calls agree as long as nothing reconnects).
    pub fn list(&mut self) -> Vec<DeviceDescriptor> {
        let mut hid_entries = Vec::new();
        if let Some(api) = &mut self.hid_api {
            if api.refresh_devices().is_err() {
                warn!("failed to refresh HID device list");
            }
            for info in sk_transport_hid::enumerate(api, FEITIAN_VENDOR_ID) {
                hid_entries.push(info);
            }
        }
        hid_entries.sort_by_key(|d| path_sort_key(&d.path.to_string_lossy()));

        let mut descriptors: Vec<DeviceDescriptor> = hid_entries
            .into_iter()
            .enumerate()
            .map(|(i, info)| DeviceDescriptor {
                id: format!("hid_{}", i + 1),
                device_type: TransportKind::Hid,
                vendor_id: info.vendor_id,
                product_id: info.product_id,
                manufacturer: info.manufacturer,
                product: info.product,
                serial: info.serial,
                path: DevicePath::Hid(info.path),
            })
            .collect();

        if let Some(ctx) = &self.pcsc_context {
            let mut readers: Vec<_> = sk_transport_ccid::enumerate(ctx)
                .into_iter()
                .map(|r| r.reader_name)
                .collect();
            readers.sort();
            for (i, reader_name) in readers.into_iter().enumerate() {
                descriptors.push(DeviceDescriptor {
                    id: format!("ccid_{}", i + 1),
                    device_type: TransportKind::Ccid,
                    vendor_id: FEITIAN_VENDOR_ID,
                    product_id: 0,
                    manufacturer: None,
                    product: Some(reader_name.clone()),
                    serial: None,
                    path: DevicePath::Ccid(reader_name),
                });
            }
        }

        descriptors
    }

    /// `openDevice`. Idempotent if `device_id` is already the open one;
    /// `BUSY` if a *different* device is open; leaves no handle
    /// registered on a failed open.
    pub fn open(&mut self, device_id: &str) -> Result<(), AgentError> {
        if let Some((open_id, _)) = &self.open {
            if open_id == device_id {
                return Ok(());
            }
            return Err(AgentError::Busy);
        }

        let descriptor = self
            .list()
            .into_iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| AgentError::NotFound(device_id.to_string()))?;

        let handle = match &descriptor.path {
            DevicePath::Hid(path) => {
                let api = self
                    .hid_api
                    .as_ref()
                    .ok_or_else(|| AgentError::IoError("HID subsystem unavailable".into()))?;
                OpenHandle::Hid(sk_transport_hid::HidTransport::open(api, path.as_c_str())?)
            }
            DevicePath::Ccid(reader_name) => {
                let ctx = self
                    .pcsc_context
                    .as_ref()
                    .ok_or_else(|| AgentError::IoError("PC/SC subsystem unavailable".into()))?;
                OpenHandle::Ccid(sk_transport_ccid::CcidTransport::connect(ctx, reader_name)?)
            }
        };

        info!("opened device {device_id}");
        self.open = Some((device_id.to_string(), handle));
        Ok(())
    }

    /// `closeDevice`. Idempotent in the sense that closing a *different*
    /// id than the one open is `NOT_OPEN`, matching spec.md §4.2 — this
    /// registry holds only one slot, so "closing a non-open id" and
    /// "nothing is open" are the same condition.
    pub fn close(&mut self, device_id: &str) -> Result<(), AgentError> {
        match self.open.take() {
            Some((open_id, handle)) if open_id == device_id => {
                if let OpenHandle::Ccid(card) = handle {
                    card.disconnect();
                }
                info!("closed device {device_id}");
                Ok(())
            }
            Some(other) => {
                self.open = Some(other);
                Err(AgentError::NotOpen)
            }
            None => Err(AgentError::NotOpen),
        }
    }

    pub fn open_handle_mut(&mut self) -> Result<&mut OpenHandle, AgentError> {
        self.open.as_mut().map(|(_, h)| h).ok_or(AgentError::NotOpen)
    }

    /// Disconnects/releases whatever is open, for shutdown (spec.md §5).
    pub fn shutdown(&mut self) {
        if let Some((id, handle)) = self.open.take() {
            info!("shutting down, releasing device {id}");
            if let OpenHandle::Ccid(card) = handle {
                card.disconnect();
            }
        }
    }
}

fn path_sort_key(path: &str) -> (u64, String) {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    (hasher.finish(), path.to_string())
}
