//! Request bodies for creating and reshaping instances.

use lxdvm_core::{MemorySize, VirtualMachineDescription};
use serde_json::{json, Map, Value};

/// Instance `config` keys: resource limits, secure boot off, and whichever
/// cloud-init documents are non-empty.
pub(crate) fn base_config(desc: &VirtualMachineDescription) -> Map<String, Value> {
    let mut config = Map::new();
    config.insert("limits.cpu".to_owned(), json!(desc.num_cores.to_string()));
    config.insert("limits.memory".to_owned(), json!(desc.mem_size.in_bytes().to_string()));
    config.insert("security.secureboot".to_owned(), json!("false"));

    let docs = &desc.cloud_init;
    for (key, doc) in [
        ("user.meta-data", &docs.meta_data),
        ("user.vendor-data", &docs.vendor_data),
        ("user.user-data", &docs.user_data),
        ("user.network-config", &docs.network_config),
    ] {
        if !doc.is_empty() {
            config.insert(key.to_owned(), json!(doc));
        }
    }

    config
}

/// The root disk device.
pub(crate) fn root_device(storage_pool: &str, size: MemorySize) -> Value {
    json!({
        "path": "/",
        "pool": storage_pool,
        "size": size.in_bytes().to_string(),
        "type": "disk",
    })
}

fn bridged_nic(name: &str, parent: &str, mac: &str) -> Value {
    json!({
        "name": name,
        "nictype": "bridged",
        "parent": parent,
        "type": "nic",
        "hwaddr": mac,
    })
}

/// Instance `devices`: the cloud-init config disk, the root disk, `eth0` on
/// the backend bridge, then `eth1..` for each extra interface.
pub(crate) fn devices_config(
    desc: &VirtualMachineDescription,
    bridge_name: &str,
    storage_pool: &str,
) -> Map<String, Value> {
    let mut devices = Map::new();
    devices.insert(
        "config".to_owned(),
        json!({"source": "cloud-init:config", "type": "disk"}),
    );
    devices.insert("root".to_owned(), root_device(storage_pool, desc.disk_space));
    devices.insert(
        "eth0".to_owned(),
        bridged_nic("eth0", bridge_name, &desc.default_mac_address),
    );

    for (i, net) in desc.extra_interfaces.iter().enumerate() {
        let net_name = format!("eth{}", i + 1);
        let nic = bridged_nic(&net_name, &net.id, &net.mac_address);
        devices.insert(net_name, nic);
    }

    devices
}

/// Body of `POST {base}/virtual-machines`.
pub(crate) fn create_request(
    desc: &VirtualMachineDescription,
    bridge_name: &str,
    storage_pool: &str,
) -> Value {
    json!({
        "name": desc.vm_name,
        "config": base_config(desc),
        "devices": devices_config(desc, bridge_name, storage_pool),
        "source": {"type": "image", "fingerprint": desc.image_id},
    })
}
