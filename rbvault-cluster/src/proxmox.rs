use anyhow::{Context, Result};
use async_trait::async_trait;
use rbvault_types::{ImageId, Profile, ProfileTable};
use serde_json::{json, Value};

use crate::adapter::ClusterAdapter;
use crate::unit::{destination_for, ClusterUnit, VmDisk, VmUnit};

/// Disk bus prefixes PVE config understands as block devices (as
/// opposed to `net0`, `ide2` cdroms, etc.).
const DISK_BUSES: [&str; 4] = ["scsi", "virtio", "sata", "ide"];

/// Talks to a Proxmox VE cluster's own HTTP API directly — not the
/// PBS ticket+CSRF dialect the teacher's `pbs-client::HttpClient`
/// speaks, since this adapter is authenticating against PVE, not PBS
/// (see DESIGN.md). Authenticated with a PVE API token
/// (`user@realm!tokenid=secret`) sent as an `Authorization` header on
/// every request, the same shape the teacher uses for its own ticket
/// header, just a different token scheme.
pub struct ProxmoxAdapter {
    cluster_name: String,
    fqdn: String,
    api_token: String,
    use_smbios: bool,
    uuid_fallback: bool,
    profiles_api: Option<String>,
    default_profiles: ProfileTable,
    http: reqwest::Client,
}

impl ProxmoxAdapter {
    pub fn new(
        cluster_name: impl Into<String>,
        fqdn: impl Into<String>,
        api_token: impl Into<String>,
        use_smbios: bool,
        uuid_fallback: bool,
        profiles_api: Option<String>,
        default_profiles: ProfileTable,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            fqdn: fqdn.into(),
            api_token: api_token.into(),
            use_smbios,
            uuid_fallback,
            profiles_api,
            default_profiles,
            http: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> String {
        format!("https://{}:8006/api2/json", self.fqdn)
    }

    async fn api_get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url(), path);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", format!("PVEAPIToken={}", self.api_token))
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?;
        let body: Value = resp.json().await.with_context(|| format!("parsing JSON from {url}"))?;
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn api_post(&self, path: &str, body: &Value) -> Result<()> {
        let url = format!("{}{}", self.base_url(), path);
        self.http
            .post(&url)
            .header("Authorization", format!("PVEAPIToken={}", self.api_token))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url} returned an error status"))?;
        Ok(())
    }

    fn parse_disks(&self, config: &Value) -> Vec<VmDisk> {
        let Some(config) = config.as_object() else {
            return Vec::new();
        };
        let mut disks = Vec::new();
        for (key, value) in config {
            let is_disk_bus = DISK_BUSES.iter().any(|bus| {
                key.strip_prefix(bus)
                    .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
            });
            if !is_disk_bus {
                continue;
            }
            let Some(raw) = value.as_str() else { continue };
            if raw.contains("media=cdrom") {
                continue;
            }
            // Volume syntax: "storage:image,opt=val,opt=val"
            let Some((storage, rest)) = raw.split_once(':') else {
                continue;
            };
            let image_name = rest.split(',').next().unwrap_or(rest);
            let rbd = ImageId::new(format!("{storage}/{image_name}"));
            let backup_target = destination_for(&self.cluster_name, &rbd);
            disks.push(VmDisk {
                rbd,
                adapter: key.clone(),
                backup_target,
            });
        }
        disks
    }

    fn parse_smbios(&self, config: &Value) -> Option<String> {
        let raw = config.get("smbios1")?.as_str()?;
        for field in raw.split(',') {
            if let Some(uuid) = field.strip_prefix("uuid=") {
                return Some(uuid.to_owned());
            }
        }
        None
    }
}

#[async_trait]
impl ClusterAdapter for ProxmoxAdapter {
    async fn list_units(&self) -> Result<Vec<ClusterUnit>> {
        let resources = self.api_get("/cluster/resources?type=vm").await?;
        let mut units = Vec::new();

        let Some(resources) = resources.as_array() else {
            return Ok(units);
        };

        for resource in resources {
            let (Some(vmid), Some(node), Some(name)) = (
                resource.get("vmid").and_then(Value::as_u64),
                resource.get("node").and_then(Value::as_str),
                resource.get("name").and_then(Value::as_str),
            ) else {
                continue;
            };

            let config = match self
                .api_get(&format!("/nodes/{node}/qemu/{vmid}/config"))
                .await
            {
                Ok(config) => config,
                Err(err) => {
                    log::error!("{err} thrown while listing vm {vmid} on {}", self.cluster_name);
                    continue;
                }
            };

            let smbios = self.parse_smbios(&config);
            if smbios.is_none() && self.use_smbios && !self.uuid_fallback {
                log::warn!("no smbios found for vm {vmid}, skipping");
                continue;
            }

            units.push(ClusterUnit::Vm(VmUnit {
                vmid: vmid as u32,
                name: name.to_owned(),
                node: node.to_owned(),
                smbios,
                disks: self.parse_disks(&config),
            }));
        }

        Ok(units)
    }

    async fn profiles_for(&self, unit: &ClusterUnit, disk: Option<&VmDisk>) -> Result<Vec<(String, Profile)>> {
        let mut profiles: Vec<(String, Profile)> = self
            .default_profiles
            .iter()
            .map(|(name, profile)| (name.clone(), profile.clone()))
            .collect();

        let (Some(api), ClusterUnit::Vm(vm), Some(disk)) = (&self.profiles_api, unit, disk) else {
            return Ok(profiles);
        };

        let body = json!({
            "cluster": {
                "type": "proxmox",
                "name": self.cluster_name,
                "fqdn": self.fqdn,
            },
            "vm": {
                "vmid": vm.vmid,
                "name": vm.name,
            },
            "disk": {
                "rbd": disk.rbd.as_str(),
                "adapter": disk.adapter,
            },
        });

        let resp = match self.http.post(api).json(&body).send().await {
            Ok(resp) => resp,
            Err(err) => {
                log::warn!("{err} thrown while fetching profiles for vm {}", vm.vmid);
                return Ok(profiles);
            }
        };
        let resp = match resp.error_for_status() {
            Ok(resp) => resp,
            Err(err) => {
                log::warn!("{err} thrown while fetching profiles for vm {}", vm.vmid);
                return Ok(profiles);
            }
        };
        let body: Value = match resp.json().await {
            Ok(body) => body,
            Err(err) => {
                log::warn!("{err} thrown while fetching profiles for vm {}", vm.vmid);
                return Ok(profiles);
            }
        };

        if body.get("backup").and_then(Value::as_bool) == Some(false) {
            return Ok(Vec::new());
        }

        if let Some(overrides) = body.get("profiles").and_then(Value::as_object) {
            for (name, value) in overrides {
                if let Ok(profile) = serde_json::from_value::<Profile>(value.clone()) {
                    profiles.push((name.clone(), profile));
                }
            }
        }

        Ok(profiles)
    }

    async fn freeze(&self, unit: &ClusterUnit) -> Result<()> {
        let ClusterUnit::Vm(vm) = unit else {
            return Ok(());
        };
        self.api_post(
            &format!("/nodes/{}/qemu/{}/agent/fsfreeze-freeze", vm.node, vm.vmid),
            &json!({}),
        )
        .await
    }

    async fn thaw(&self, unit: &ClusterUnit) -> Result<()> {
        let ClusterUnit::Vm(vm) = unit else {
            return Ok(());
        };
        self.api_post(
            &format!("/nodes/{}/qemu/{}/agent/fsfreeze-thaw", vm.node, vm.vmid),
            &json!({}),
        )
        .await
    }
}
