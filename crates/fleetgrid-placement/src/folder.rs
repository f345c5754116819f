//! VM and template folder resolution.
//!
//! Paths are recomputed on every access from configuration and the
//! deployment id; nothing here talks to the infrastructure.

/// A folder inside a datacenter's VM inventory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    datacenter: String,
    path: String,
}

impl Folder {
    pub fn new(datacenter: &str, path: &str) -> Self {
        Self {
            datacenter: datacenter.to_string(),
            path: path.to_string(),
        }
    }

    /// `root/deployment_id` when `per_deployment`, otherwise `root`.
    pub fn resolve(datacenter: &str, root: &str, deployment_id: &str, per_deployment: bool) -> Self {
        if per_deployment {
            Self::new(datacenter, &[root, deployment_id].join("/"))
        } else {
            Self::new(datacenter, root)
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    pub fn path_components(&self) -> Vec<&str> {
        self.path.split('/').filter(|c| !c.is_empty()).collect()
    }

    /// Full inventory path: `<datacenter>/vm/<path>`.
    pub fn inventory_path(&self) -> String {
        let mut parts = vec![self.datacenter.as_str(), "vm"];
        parts.extend(self.path_components());
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_deployment_folder_appends_id() {
        let folder = Folder::resolve("dc1", "vms", "abc-123", true);
        assert_eq!(folder.path(), "vms/abc-123");
    }

    #[test]
    fn shared_folder_is_root() {
        let folder = Folder::resolve("dc1", "vms", "abc-123", false);
        assert_eq!(folder.path(), "vms");
    }

    #[test]
    fn inventory_path_includes_datacenter_and_vm_root() {
        let folder = Folder::resolve("dc1", "fleet/vms", "abc-123", true);
        assert_eq!(folder.path_components(), vec!["fleet", "vms", "abc-123"]);
        assert_eq!(folder.inventory_path(), "dc1/vm/fleet/vms/abc-123");
        assert_eq!(folder.datacenter(), "dc1");
    }
}
