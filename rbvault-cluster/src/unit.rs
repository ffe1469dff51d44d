use rbvault_types::ImageId;

/// One disk belonging to a VM unit: its live image, the PVE bus/slot it
/// is attached on (`scsi0`, `virtio1`, ...), and the image it mirrors
/// to on the backup cluster.
#[derive(Debug, Clone)]
pub struct VmDisk {
    pub rbd: ImageId,
    pub adapter: String,
    pub backup_target: ImageId,
}

/// A virtualization unit: a VM with its SMBIOS identity, the node it
/// currently runs on, and the disks to back up (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct VmUnit {
    pub vmid: u32,
    pub name: String,
    pub node: String,
    pub smbios: Option<String>,
    pub disks: Vec<VmDisk>,
}

/// A backup unit from a cluster, per spec.md §4.3: either a VM (with
/// disks, freeze/thaw-able as one consistency point) or a standalone
/// image from a plain pool.
#[derive(Debug, Clone)]
pub enum ClusterUnit {
    Vm(VmUnit),
    Image(ImageId),
}

impl ClusterUnit {
    pub fn label(&self) -> String {
        match self {
            ClusterUnit::Vm(vm) => format!("vm/{} ({})", vm.vmid, vm.name),
            ClusterUnit::Image(image) => image.to_string(),
        }
    }
}

/// Deterministic backup-side image id for `(cluster_name, image)`, so
/// plain-pool images and VM disks originating from different live
/// clusters never collide in the shared backup pool namespace
/// (SPEC_FULL.md §3, mirroring `Bck.dest` in the original tool).
pub fn destination_for(cluster_name: &str, image: &ImageId) -> ImageId {
    let sanitized = image.as_str().replace('/', "-");
    ImageId::new(format!("{cluster_name}-{sanitized}"))
}
