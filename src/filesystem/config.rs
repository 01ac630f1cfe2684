//! Options controlling how a volume is opened and interpreted.

use getset::Getters;

/// Where the root directory chain starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootCluster {
    /// The conventional cluster 2, whatever the boot sector says.
    #[default]
    Fixed,
    /// The root cluster field stored in the boot sector at offset 0x2C.
    BootSector,
}

/// Settings applied when a volume is opened.
///
/// ```ignore
/// let config = VolumeConfig::default().with_read_only(true).with_recovery_dir("FOUND");
/// ```
#[derive(Debug, Clone, Getters)]
#[get = "pub"]
pub struct VolumeConfig {
    /// Refuse every mutation even if the image is writable.
    read_only: bool,
    /// Source of the root directory cluster.
    root_cluster: RootCluster,
    /// Ignore long names whose checksum doesn't match the short record.
    validate_lfn_checksum: bool,
    /// Name of the directory collecting recovered lost clusters.
    recovery_dir: String,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            root_cluster: RootCluster::Fixed,
            validate_lfn_checksum: false,
            recovery_dir: String::from("LOSTFOUND"),
        }
    }
}

impl VolumeConfig {
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_root_cluster(mut self, root_cluster: RootCluster) -> Self {
        self.root_cluster = root_cluster;
        self
    }

    pub fn with_lfn_checksum(mut self, validate: bool) -> Self {
        self.validate_lfn_checksum = validate;
        self
    }

    pub fn with_recovery_dir(mut self, name: &str) -> Self {
        self.recovery_dir = name.to_string();
        self
    }
}
