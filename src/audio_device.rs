use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, HostId};
use tracing::warn;

fn get_host_from_id(host_id: HostId) -> Result<Host> {
    cpal::host_from_id(host_id).map_err(|e| anyhow::anyhow!("Failed to get audio host: {}", e))
}

/// Resolves the configured host by name, falling back to the platform
/// default when it is absent or unknown.
pub fn select_host(name: Option<&str>) -> HostId {
    if let Some(name) = name {
        if let Some(id) = cpal::available_hosts()
            .into_iter()
            .find(|id| id.name() == name)
        {
            return id;
        }
        warn!(host = name, "configured audio host not found, using default");
    }
    cpal::default_host().id()
}

pub fn get_output_devices(host_id: HostId) -> Result<Vec<(String, Device)>> {
    let host = get_host_from_id(host_id)?;
    let devices = host.output_devices()?;
    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push((name, device));
        }
    }
    Ok(result)
}
